//! Primitive wire encoding shared by every message on both channels
//!
//! All multi-byte values are little-endian regardless of the host, so the
//! format is identical across implementations. Messages are built with
//! [`WireWriter`] and consumed with [`WireReader`], which never panics on short
//! input and reports exactly how many bytes were missing instead.

use glam::{Vec2, Vec3};
use thiserror::Error;

/// Size of the length prefix used by reliable framing.
pub const LENGTH_PREFIX_SIZE: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of message: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEnd { needed: usize, remaining: usize },
    #[error("invalid boolean byte {0}")]
    InvalidBool(u8),
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,
    #[error("negative length {0}")]
    NegativeLength(i32),
    #[error("unknown command discriminant {0}")]
    UnknownCommand(u8),
    #[error("unknown update type {0}")]
    UnknownUpdateType(u8),
    #[error("invalid cell type {0}")]
    InvalidCellType(u8),
    #[error("arena payload of {0} bytes is not a square grid")]
    NonSquareArena(usize),
    #[error("non-finite value in {0}")]
    NonFinite(&'static str),
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

/// Append-only message builder.
#[derive(Debug, Default, Clone)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn put_bool(&mut self, value: bool) -> &mut Self {
        self.put_u8(value as u8)
    }

    pub fn put_i32(&mut self, value: i32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn put_f32(&mut self, value: f32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn put_f64(&mut self, value: f64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn put_vec2(&mut self, value: Vec2) -> &mut Self {
        self.put_f32(value.x).put_f32(value.y)
    }

    pub fn put_vec3(&mut self, value: Vec3) -> &mut Self {
        self.put_f32(value.x).put_f32(value.y).put_f32(value.z)
    }

    /// Writes an `i32` byte length followed by the UTF-8 bytes.
    pub fn put_str(&mut self, value: &str) -> &mut Self {
        self.put_i32(value.len() as i32);
        self.put_bytes(value.as_bytes())
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a received message.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::UnexpectedEnd {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn get_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_bool(&mut self) -> Result<bool, CodecError> {
        match self.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::InvalidBool(other)),
        }
    }

    pub fn get_i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn get_f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    pub fn get_f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    pub fn get_vec2(&mut self) -> Result<Vec2, CodecError> {
        Ok(Vec2::new(self.get_f32()?, self.get_f32()?))
    }

    pub fn get_vec3(&mut self) -> Result<Vec3, CodecError> {
        Ok(Vec3::new(self.get_f32()?, self.get_f32()?, self.get_f32()?))
    }

    /// Reads a non-negative `i32` count or length.
    pub fn get_len(&mut self) -> Result<usize, CodecError> {
        let len = self.get_i32()?;
        if len < 0 {
            return Err(CodecError::NegativeLength(len));
        }
        Ok(len as usize)
    }

    pub fn get_str(&mut self) -> Result<String, CodecError> {
        let len = self.get_len()?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    pub fn get_bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        self.take(n)
    }

    /// Everything not consumed yet.
    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.bytes[self.pos..];
        self.pos = self.bytes.len();
        slice
    }

    /// Fails if any bytes were left unread.
    pub fn finish(&self) -> Result<(), CodecError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}

/// Prepends the little-endian `i32` payload length.
pub fn prepend_length(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    framed.extend_from_slice(&(payload.len() as i32).to_le_bytes());
    framed.extend_from_slice(payload);
    framed
}

/// Prepends a little-endian `i32` value, used for the piggy-backed input ack.
pub fn prepend_i32(value: i32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&value.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Splits a length-prefixed buffer into its payload, checking the prefix.
pub fn strip_length(framed: &[u8]) -> Result<&[u8], CodecError> {
    let mut reader = WireReader::new(framed);
    let len = reader.get_len()?;
    let payload = reader.get_bytes(len)?;
    reader.finish()?;
    Ok(payload)
}
