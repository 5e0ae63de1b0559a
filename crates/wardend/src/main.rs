use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

const BUS_NAME: &str = "org.warden.Controller1";
const OBJECT_PATH: &str = "/org/warden/Controller1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("wardend starting");
    let config = config::Config::from_env();
    tracing::info!(
        camera = %config.camera_device,
        rate_hz = config.capture_rate_hz,
        frame_change_count = config.frame_change_count,
        disable_delay_secs = config.disable_delay.as_secs(),
        max_confidence = config.max_confidence,
        "configuration loaded"
    );

    let engine = Arc::new(
        engine::Engine::start(&config, tokio::runtime::Handle::current())
            .context("failed to start engine")?,
    );

    let service = dbus_interface::WardenService::new(engine.clone());
    let builder = match config.bus {
        config::BusKind::System => zbus::connection::Builder::system()?,
        config::BusKind::Session => zbus::connection::Builder::session()?,
    };
    let connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(bus = ?config.bus, name = BUS_NAME, "wardend ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("wardend shutting down");

    drop(connection);
    engine.shutdown().await;
    tracing::info!("wardend stopped");

    Ok(())
}
