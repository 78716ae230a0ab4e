//! Ordered batch of vote records sealed behind a proof-of-work digest.

use crate::{
    codec::{self, Error as CodecError},
    record::VoteRecord,
};
use bytes::{Buf, BufMut};
use sha2::{Digest as _, Sha256};
use std::fmt;

/// SHA-256 digest of a block's canonical encoding, or the marker anchoring
/// the genesis block.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum Digest {
    /// The `previous` anchor of the genesis block, rendered as the literal "0".
    Genesis,
    /// SHA-256 over a block's canonical encoding.
    Hash([u8; 32]),
}

impl Digest {
    /// Number of leading zero hex characters. The genesis marker has none.
    pub fn leading_zeros(&self) -> u32 {
        let Digest::Hash(bytes) = self else { return 0 };
        let mut count = 0;
        for byte in bytes {
            if byte >> 4 != 0 {
                return count;
            }
            count += 1;
            if byte & 0x0f != 0 {
                return count;
            }
            count += 1;
        }
        count
    }

    /// Whether this digest satisfies the proof-of-work threshold.
    pub fn meets(&self, difficulty: u32) -> bool {
        self.leading_zeros() >= difficulty
    }

    pub(crate) fn write(&self, buf: &mut impl BufMut) {
        match self {
            Digest::Genesis => buf.put_u8(0),
            Digest::Hash(bytes) => {
                buf.put_u8(1);
                buf.put_slice(bytes);
            }
        }
    }

    pub(crate) fn read(buf: &mut impl Buf) -> Result<Self, CodecError> {
        match codec::read_u8(buf)? {
            0 => Ok(Digest::Genesis),
            1 => Ok(Digest::Hash(codec::read_array(buf)?)),
            tag => Err(CodecError::InvalidTag(tag)),
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Digest::Genesis => f.write_str("0"),
            Digest::Hash(bytes) => {
                for byte in bytes {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Compact description of a sealed block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockSummary {
    pub index: u64,
    pub digest: Digest,
    pub sealed_at: u64,
    pub records: usize,
}

impl From<&Block> for BlockSummary {
    fn from(block: &Block) -> Self {
        Self {
            index: block.index,
            digest: block.digest,
            sealed_at: block.sealed_at,
            records: block.records.len(),
        }
    }
}

/// An immutable batch of records sealed behind a proof-of-work digest.
///
/// The digest covers the canonical encoding of `(index, sealed_at, records,
/// previous, nonce)`, with record order part of the input. Blocks are created
/// once by the sealer and never mutated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub(crate) index: u64,
    pub(crate) sealed_at: u64,
    pub(crate) records: Vec<VoteRecord>,
    pub(crate) previous: Digest,
    pub(crate) nonce: u64,
    pub(crate) digest: Digest,
}

impl Block {
    pub(crate) fn from_parts(
        index: u64,
        sealed_at: u64,
        records: Vec<VoteRecord>,
        previous: Digest,
        nonce: u64,
        digest: Digest,
    ) -> Self {
        Self {
            index,
            sealed_at,
            records,
            previous,
            nonce,
            digest,
        }
    }

    /// Canonical bytes hashed by the seal, excluding the trailing nonce.
    pub(crate) fn preimage(
        index: u64,
        sealed_at: u64,
        records: &[VoteRecord],
        previous: &Digest,
    ) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u64(index);
        buf.put_u64(sealed_at);
        buf.put_u32(records.len() as u32);
        for record in records {
            record.write(&mut buf);
        }
        previous.write(&mut buf);
        buf
    }

    /// Extend a preimage hasher with `nonce` and finalize.
    pub(crate) fn digest_at(base: &Sha256, nonce: u64) -> Digest {
        let mut hasher = base.clone();
        hasher.update(nonce.to_be_bytes());
        Digest::Hash(hasher.finalize().into())
    }

    /// Recompute this block's digest from its own fields.
    pub fn compute_digest(&self) -> Digest {
        let preimage = Self::preimage(self.index, self.sealed_at, &self.records, &self.previous);
        Self::digest_at(&Sha256::new_with_prefix(&preimage), self.nonce)
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    /// Milliseconds since the UNIX epoch at which the block was sealed.
    pub fn sealed_at(&self) -> u64 {
        self.sealed_at
    }

    /// Records in insertion order.
    pub fn records(&self) -> &[VoteRecord] {
        &self.records
    }

    pub fn previous(&self) -> Digest {
        self.previous
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn digest(&self) -> Digest {
        self.digest
    }

    pub(crate) fn write(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.index);
        buf.put_u64(self.sealed_at);
        buf.put_u32(self.records.len() as u32);
        for record in &self.records {
            record.write(buf);
        }
        self.previous.write(buf);
        buf.put_u64(self.nonce);
        self.digest.write(buf);
    }

    pub(crate) fn read(buf: &mut impl Buf) -> Result<Self, CodecError> {
        let index = codec::read_u64(buf)?;
        let sealed_at = codec::read_u64(buf)?;
        let count = codec::read_u32(buf)?;
        if count > codec::MAX_RECORDS {
            return Err(CodecError::LengthTooLarge(count, codec::MAX_RECORDS));
        }
        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            records.push(VoteRecord::read(buf)?);
        }
        let previous = Digest::read(buf)?;
        let nonce = codec::read_u64(buf)?;
        let digest = Digest::read(buf)?;
        Ok(Self {
            index,
            sealed_at,
            records,
            previous,
            nonce,
            digest,
        })
    }

    /// Encode to the canonical persisted form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write(&mut buf);
        buf
    }

    /// Decode a block from its canonical persisted form.
    pub fn decode(mut buf: &[u8]) -> Result<Self, CodecError> {
        let block = Self::read(&mut buf)?;
        if buf.has_remaining() {
            return Err(CodecError::TrailingBytes);
        }
        Ok(block)
    }
}
