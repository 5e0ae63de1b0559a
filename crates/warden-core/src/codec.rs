//! Little-endian, length-prefixed primitives for the on-disk artifacts.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of data at offset {offset} (wanted {wanted} bytes)")]
    Truncated { offset: usize, wanted: usize },
    #[error("bad magic: expected {expected:?}")]
    BadMagic { expected: [u8; 4] },
    #[error("unsupported version {0}")]
    UnsupportedVersion(u16),
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,
    #[error("invalid boolean byte {0:#04x}")]
    InvalidBool(u8),
    #[error("{0} trailing bytes after last record")]
    TrailingBytes(usize),
    #[error("malformed record: {0}")]
    Malformed(String),
}

pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new(magic: &[u8; 4], version: u16) -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(magic);
        buf.extend_from_slice(&version.to_le_bytes());
        Self { buf }
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn bool(&mut self, v: bool) {
        self.u8(u8::from(v));
    }

    pub fn str(&mut self, s: &str) {
        self.u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

pub struct Reader<'a> {
    bytes: &'a [u8],
    cursor: usize,
}

impl<'a> Reader<'a> {
    /// Check the magic and return the reader positioned after the version,
    /// along with the version itself.
    pub fn open(bytes: &'a [u8], magic: &[u8; 4]) -> Result<(Self, u16), DecodeError> {
        let mut reader = Self { bytes, cursor: 0 };
        if reader.slice(4)? != magic {
            return Err(DecodeError::BadMagic { expected: *magic });
        }
        let version = u16::from_le_bytes([reader.u8()?, reader.u8()?]);
        Ok((reader, version))
    }

    fn slice(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.cursor + len > self.bytes.len() {
            return Err(DecodeError::Truncated {
                offset: self.cursor,
                wanted: len,
            });
        }
        let out = &self.bytes[self.cursor..self.cursor + len];
        self.cursor += len;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.slice(1)?[0])
    }

    pub fn u32(&mut self) -> Result<u32, DecodeError> {
        let s = self.slice(4)?;
        Ok(u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
    }

    pub fn f32(&mut self) -> Result<f32, DecodeError> {
        let s = self.slice(4)?;
        Ok(f32::from_le_bytes([s[0], s[1], s[2], s[3]]))
    }

    pub fn bool(&mut self) -> Result<bool, DecodeError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DecodeError::InvalidBool(other)),
        }
    }

    pub fn str(&mut self) -> Result<String, DecodeError> {
        let len = self.u32()? as usize;
        let raw = self.slice(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }

    /// Bytes left unread.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.cursor
    }

    pub fn expect_end(&self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }
}
