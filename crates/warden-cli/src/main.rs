use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use warden_core::recognizer::DEFAULT_MAX_CONFIDENCE;
use warden_core::{Identity, RecognizerStore, StoreError};

#[zbus::proxy(
    interface = "org.warden.Controller1",
    default_service = "org.warden.Controller1",
    default_path = "/org/warden/Controller1"
)]
trait Controller {
    async fn status(&self) -> zbus::Result<String>;
    async fn create_recognizer(&self) -> zbus::Result<()>;
    async fn load_recognizer(&self, path: &str) -> zbus::Result<u32>;
    async fn save_recognizer(&self, path: &str) -> zbus::Result<()>;
    async fn track_face(&self) -> zbus::Result<()>;
    async fn save_face(&self, name: &str, authorized: bool) -> zbus::Result<String>;
    async fn faces(&self) -> zbus::Result<String>;
    async fn identities(&self) -> zbus::Result<String>;
    async fn restart_camera(&self) -> zbus::Result<()>;
}

#[derive(Parser)]
#[command(name = "warden", about = "Warden access controller CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// Replace the daemon's recognizer with an empty one
    CreateRecognizer,
    /// Load a recognizer directory into the daemon
    LoadRecognizer { path: PathBuf },
    /// Save the daemon's recognizer to a directory
    SaveRecognizer { path: PathBuf },
    /// Start collecting face crops for a new identity
    TrackFace,
    /// Enroll the collected crops under a name
    SaveFace {
        name: String,
        /// Allow this person to trigger the output
        #[arg(short, long)]
        authorized: bool,
    },
    /// Show faces seen on the latest capture tick
    Faces,
    /// List identities known to the daemon's recognizer
    Identities,
    /// Re-open the camera and restart capture
    RestartCamera,
    /// List identities stored in a recognizer directory (offline)
    Inspect { dir: PathBuf },
    /// Train a recognizer directory from face images (offline)
    Enroll {
        /// Recognizer directory; created if missing
        #[arg(short, long)]
        recognizer: PathBuf,
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        authorized: bool,
        /// Face crops, any format the `image` crate reads
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { dir } => inspect(&dir),
        Commands::Enroll {
            recognizer,
            name,
            authorized,
            images,
        } => enroll_offline(&recognizer, Identity::new(name, authorized), &images),
        Commands::Devices => {
            let devices = warden_hw::Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({})", d.path, d.name, d.driver);
            }
            Ok(())
        }
        command => remote(command, cli.session).await,
    }
}

async fn remote(command: Commands, session: bool) -> Result<()> {
    let connection = if session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("failed to connect to D-Bus")?;
    let proxy = ControllerProxy::new(&connection)
        .await
        .context("wardend is not reachable")?;

    match command {
        Commands::Status => println!("{}", pretty(&proxy.status().await?)),
        Commands::CreateRecognizer => {
            proxy.create_recognizer().await?;
            println!("Empty recognizer created");
        }
        Commands::LoadRecognizer { path } => {
            let count = proxy.load_recognizer(&absolute(&path)?).await?;
            println!("Recognizer loaded with {count} identities");
        }
        Commands::SaveRecognizer { path } => {
            proxy.save_recognizer(&absolute(&path)?).await?;
            println!("Recognizer saved to {}", path.display());
        }
        Commands::TrackFace => {
            proxy.track_face().await?;
            println!("Tracking face; look at the camera, then run `warden save-face <name>`");
        }
        Commands::SaveFace { name, authorized } => {
            println!("{}", pretty(&proxy.save_face(&name, authorized).await?));
        }
        Commands::Faces => println!("{}", pretty(&proxy.faces().await?)),
        Commands::Identities => println!("{}", pretty(&proxy.identities().await?)),
        Commands::RestartCamera => {
            proxy.restart_camera().await?;
            println!("Camera restarted");
        }
        Commands::Inspect { .. } | Commands::Enroll { .. } | Commands::Devices => {
            bail!("this command does not talk to the daemon")
        }
    }
    Ok(())
}

fn inspect(dir: &Path) -> Result<()> {
    let store = RecognizerStore::load(dir, DEFAULT_MAX_CONFIDENCE)
        .with_context(|| format!("failed to load recognizer from {}", dir.display()))?;
    let identities = store.identities();
    if identities.is_empty() {
        println!("No identities enrolled");
    }
    for (label, identity) in identities.iter().enumerate() {
        println!("{label:>3}  {identity}");
    }
    Ok(())
}

fn enroll_offline(dir: &Path, identity: Identity, images: &[PathBuf]) -> Result<()> {
    let store = match RecognizerStore::load(dir, DEFAULT_MAX_CONFIDENCE) {
        Ok(store) => store,
        Err(StoreError::NotFound(_)) => {
            tracing::info!(dir = %dir.display(), "creating new recognizer");
            RecognizerStore::new(DEFAULT_MAX_CONFIDENCE)
        }
        Err(e) => return Err(e).context("failed to load recognizer"),
    };

    let faces = images
        .iter()
        .map(|path| {
            image::open(path)
                .map(|img| img.to_luma8())
                .with_context(|| format!("failed to read {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let name = identity.name.clone();
    match store.enroll(&faces, identity)? {
        Some(label) => println!("Enrolled {name} as label {label} from {} images", faces.len()),
        None => bail!("no images to enroll"),
    }
    store.save(dir).context("failed to save recognizer")?;
    println!("Recognizer saved to {}", dir.display());
    Ok(())
}

/// The daemon resolves paths against its own working directory.
fn absolute(path: &Path) -> Result<String> {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .context("cannot resolve current directory")?
            .join(path)
    };
    Ok(path.to_string_lossy().into_owned())
}

fn pretty(json: &str) -> String {
    serde_json::from_str::<serde_json::Value>(json)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| json.to_string())
}
