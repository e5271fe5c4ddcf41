//! Checked binary primitives for the internal cluster channel.
//!
//! All integers are big-endian. Booleans are a single byte (0/1). Byte
//! strings are length-prefixed with a `u16`, which caps any single field at
//! 65 535 bytes. Readers never panic on truncated input; they fail with
//! [`CodecError::ShortRead`] so the framing layer can distinguish "wait for
//! more bytes" from corruption.

use bytes::{Buf, BufMut, Bytes};
use std::io;
use thiserror::Error;

/// Maximum length of a length-prefixed byte string.
pub const MAX_BINARY_LEN: usize = u16::MAX as usize;

/// Errors produced while encoding or decoding wire fields.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The source ended in the middle of a field.
    #[error("short read: need {needed} bytes, {remaining} available")]
    ShortRead { needed: usize, remaining: usize },

    /// Unknown event type tag.
    #[error("invalid event type: {0}")]
    InvalidEventType(u8),

    /// A length-prefixed field exceeds the `u16` length space.
    #[error("field too large: {0} bytes")]
    FieldTooLarge(usize),

    /// A string field was not valid UTF-8.
    #[error("invalid utf-8 in string field")]
    InvalidString,
}

impl From<CodecError> for io::Error {
    fn from(err: CodecError) -> Self {
        Self::new(io::ErrorKind::InvalidData, err)
    }
}

#[inline]
fn ensure(buf: &impl Buf, needed: usize) -> Result<(), CodecError> {
    let remaining = buf.remaining();
    if remaining < needed {
        return Err(CodecError::ShortRead { needed, remaining });
    }
    Ok(())
}

pub fn read_u8(buf: &mut impl Buf) -> Result<u8, CodecError> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

pub fn read_u16(buf: &mut impl Buf) -> Result<u16, CodecError> {
    ensure(buf, 2)?;
    Ok(buf.get_u16())
}

pub fn read_u32(buf: &mut impl Buf) -> Result<u32, CodecError> {
    ensure(buf, 4)?;
    Ok(buf.get_u32())
}

pub fn read_u64(buf: &mut impl Buf) -> Result<u64, CodecError> {
    ensure(buf, 8)?;
    Ok(buf.get_u64())
}

/// Reads a single byte as a boolean; zero is `false`, anything else `true`.
pub fn read_bool(buf: &mut impl Buf) -> Result<bool, CodecError> {
    Ok(read_u8(buf)? != 0)
}

/// Reads a `u16`-length-prefixed byte string.
pub fn read_binary(buf: &mut impl Buf) -> Result<Bytes, CodecError> {
    let len = read_u16(buf)? as usize;
    ensure(buf, len)?;
    Ok(buf.copy_to_bytes(len))
}

/// Reads a length-prefixed UTF-8 string.
pub fn read_string(buf: &mut impl Buf) -> Result<String, CodecError> {
    let raw = read_binary(buf)?;
    String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidString)
}

pub fn write_u8(buf: &mut impl BufMut, v: u8) {
    buf.put_u8(v);
}

pub fn write_u16(buf: &mut impl BufMut, v: u16) {
    buf.put_u16(v);
}

pub fn write_u32(buf: &mut impl BufMut, v: u32) {
    buf.put_u32(v);
}

pub fn write_u64(buf: &mut impl BufMut, v: u64) {
    buf.put_u64(v);
}

pub fn write_bool(buf: &mut impl BufMut, v: bool) {
    buf.put_u8(u8::from(v));
}

/// Writes a `u16`-length-prefixed byte string.
///
/// # Errors
///
/// Returns [`CodecError::FieldTooLarge`] if `data` exceeds
/// [`MAX_BINARY_LEN`].
pub fn write_binary(buf: &mut impl BufMut, data: &[u8]) -> Result<(), CodecError> {
    if data.len() > MAX_BINARY_LEN {
        return Err(CodecError::FieldTooLarge(data.len()));
    }
    buf.put_u16(data.len() as u16);
    buf.put_slice(data);
    Ok(())
}

/// Writes a length-prefixed UTF-8 string.
pub fn write_string(buf: &mut impl BufMut, s: &str) -> Result<(), CodecError> {
    write_binary(buf, s.as_bytes())
}
