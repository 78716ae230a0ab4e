//! Canonical wire helpers shared by hash preimages and persisted frames.
//!
//! The encoding is fixed by this crate, not by a general-purpose serializer:
//! integers are big-endian, strings are a u32 length prefix followed by UTF-8
//! bytes, and sequences are a u32 count followed by their items in order. The
//! same bytes are fed to the block digest and written to disk, so a decoded
//! block re-hashes to exactly the digest it was sealed with.

use bytes::{Buf, BufMut};
use thiserror::Error;

/// Longest identifier accepted when decoding untrusted bytes.
pub const MAX_IDENTIFIER: u32 = 4096;

/// Most records accepted in a single decoded block.
pub const MAX_RECORDS: u32 = 1 << 20;

/// Errors that can occur when decoding untrusted bytes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("end of buffer")]
    EndOfBuffer,
    #[error("length {0} exceeds limit {1}")]
    LengthTooLarge(u32, u32),
    #[error("invalid utf-8")]
    InvalidUtf8,
    #[error("invalid tag: {0}")]
    InvalidTag(u8),
    #[error("trailing bytes")]
    TrailingBytes,
}

pub fn write_string(buf: &mut impl BufMut, value: &str) {
    buf.put_u32(value.len() as u32);
    buf.put_slice(value.as_bytes());
}

pub fn read_u8(buf: &mut impl Buf) -> Result<u8, Error> {
    if buf.remaining() < 1 {
        return Err(Error::EndOfBuffer);
    }
    Ok(buf.get_u8())
}

pub fn read_u32(buf: &mut impl Buf) -> Result<u32, Error> {
    if buf.remaining() < 4 {
        return Err(Error::EndOfBuffer);
    }
    Ok(buf.get_u32())
}

pub fn read_u64(buf: &mut impl Buf) -> Result<u64, Error> {
    if buf.remaining() < 8 {
        return Err(Error::EndOfBuffer);
    }
    Ok(buf.get_u64())
}

pub fn read_array<const N: usize>(buf: &mut impl Buf) -> Result<[u8; N], Error> {
    if buf.remaining() < N {
        return Err(Error::EndOfBuffer);
    }
    let mut out = [0u8; N];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

pub fn read_string(buf: &mut impl Buf) -> Result<String, Error> {
    let len = read_u32(buf)?;
    if len > MAX_IDENTIFIER {
        return Err(Error::LengthTooLarge(len, MAX_IDENTIFIER));
    }
    if buf.remaining() < len as usize {
        return Err(Error::EndOfBuffer);
    }
    let mut bytes = vec![0u8; len as usize];
    buf.copy_to_slice(&mut bytes);
    String::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)
}
