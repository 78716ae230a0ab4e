//! A single cast vote admitted into the ledger.

use crate::codec::{self, Error as CodecError};
use bytes::{Buf, BufMut};
use hmac::{Hmac, Mac};
use sha2::{Digest as _, Sha256};
use std::fmt;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Errors that can occur when constructing a record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("empty {0}")]
    EmptyField(&'static str),
    #[error("oversized {0}")]
    OversizedField(&'static str),
}

/// Content-derived identifier of a [VoteRecord].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId([u8; 32]);

impl RecordId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for RecordId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Immutable record of one cast vote.
///
/// The integrity tag is a keyed digest (HMAC-SHA256) over the record's
/// fields. It detects post-hoc tampering by anyone without the sealing key;
/// it is not an asymmetric signature and offers no voter-side non-repudiation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoteRecord {
    pub(crate) id: RecordId,
    pub(crate) election_id: String,
    pub(crate) candidate_id: String,
    pub(crate) voter_id: String,
    pub(crate) cast_at: u64,
    pub(crate) integrity_tag: [u8; 32],
}

impl VoteRecord {
    /// Construct a record for a vote cast at `cast_at` (milliseconds since
    /// the UNIX epoch), tagged under the process-wide `secret`.
    pub fn new(
        election_id: impl Into<String>,
        candidate_id: impl Into<String>,
        voter_id: impl Into<String>,
        cast_at: u64,
        secret: &[u8],
    ) -> Result<Self, Error> {
        let election_id = election_id.into();
        let candidate_id = candidate_id.into();
        let voter_id = voter_id.into();
        for (field, value) in [
            ("election_id", &election_id),
            ("candidate_id", &candidate_id),
            ("voter_id", &voter_id),
        ] {
            if value.is_empty() {
                return Err(Error::EmptyField(field));
            }
            // Decoding bounds identifiers, so admission must too or a sealed
            // record would not survive a reload.
            if value.len() > codec::MAX_IDENTIFIER as usize {
                return Err(Error::OversizedField(field));
            }
        }

        let preimage = Self::preimage(&election_id, &candidate_id, &voter_id, cast_at);
        let id = RecordId(Sha256::digest(&preimage).into());
        let mut mac =
            HmacSha256::new_from_slice(secret).expect("hmac accepts keys of any length");
        mac.update(&preimage);
        let integrity_tag = mac.finalize().into_bytes().into();
        Ok(Self {
            id,
            election_id,
            candidate_id,
            voter_id,
            cast_at,
            integrity_tag,
        })
    }

    fn preimage(election_id: &str, candidate_id: &str, voter_id: &str, cast_at: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        codec::write_string(&mut buf, election_id);
        codec::write_string(&mut buf, candidate_id);
        codec::write_string(&mut buf, voter_id);
        buf.put_u64(cast_at);
        buf
    }

    /// Recompute the integrity tag under `secret` and compare against the
    /// stored tag in constant time.
    pub fn verify_tag(&self, secret: &[u8]) -> bool {
        let preimage =
            Self::preimage(&self.election_id, &self.candidate_id, &self.voter_id, self.cast_at);
        let mut mac =
            HmacSha256::new_from_slice(secret).expect("hmac accepts keys of any length");
        mac.update(&preimage);
        mac.verify_slice(&self.integrity_tag).is_ok()
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn election_id(&self) -> &str {
        &self.election_id
    }

    pub fn candidate_id(&self) -> &str {
        &self.candidate_id
    }

    pub fn voter_id(&self) -> &str {
        &self.voter_id
    }

    /// Milliseconds since the UNIX epoch at which the vote was cast.
    pub fn cast_at(&self) -> u64 {
        self.cast_at
    }

    pub fn integrity_tag(&self) -> &[u8; 32] {
        &self.integrity_tag
    }

    pub(crate) fn write(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.id.0);
        codec::write_string(buf, &self.election_id);
        codec::write_string(buf, &self.candidate_id);
        codec::write_string(buf, &self.voter_id);
        buf.put_u64(self.cast_at);
        buf.put_slice(&self.integrity_tag);
    }

    pub(crate) fn read(buf: &mut impl Buf) -> Result<Self, CodecError> {
        let id = RecordId(codec::read_array(buf)?);
        let election_id = codec::read_string(buf)?;
        let candidate_id = codec::read_string(buf)?;
        let voter_id = codec::read_string(buf)?;
        let cast_at = codec::read_u64(buf)?;
        let integrity_tag = codec::read_array(buf)?;
        Ok(Self {
            id,
            election_id,
            candidate_id,
            voter_id,
            cast_at,
            integrity_tag,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret";

    #[test]
    fn test_rejects_empty_identifiers() {
        assert_eq!(
            VoteRecord::new("", "c1", "v1", 1, SECRET),
            Err(Error::EmptyField("election_id"))
        );
        assert_eq!(
            VoteRecord::new("e1", "", "v1", 1, SECRET),
            Err(Error::EmptyField("candidate_id"))
        );
        assert_eq!(
            VoteRecord::new("e1", "c1", "", 1, SECRET),
            Err(Error::EmptyField("voter_id"))
        );
    }

    #[test]
    fn test_rejects_oversized_identifiers() {
        let long = "x".repeat(codec::MAX_IDENTIFIER as usize + 1);
        assert_eq!(
            VoteRecord::new(long.clone(), "c1", "v1", 1, SECRET),
            Err(Error::OversizedField("election_id"))
        );
        assert_eq!(
            VoteRecord::new("e1", "c1", long, 1, SECRET),
            Err(Error::OversizedField("voter_id"))
        );
    }

    #[test]
    fn test_longest_identifier_survives_the_wire() {
        // Admission and decoding share the same identifier bound.
        let longest = "x".repeat(codec::MAX_IDENTIFIER as usize);
        let record = VoteRecord::new(longest, "c1", "v1", 42, SECRET).unwrap();
        let mut buf = Vec::new();
        record.write(&mut buf);
        let decoded = VoteRecord::read(&mut buf.as_slice()).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn test_id_is_deterministic() {
        let a = VoteRecord::new("e1", "c1", "v1", 42, SECRET).unwrap();
        let b = VoteRecord::new("e1", "c1", "v1", 42, SECRET).unwrap();
        assert_eq!(a.id(), b.id());

        let c = VoteRecord::new("e1", "c1", "v1", 43, SECRET).unwrap();
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn test_tag_verifies_under_sealing_key_only() {
        let record = VoteRecord::new("e1", "c1", "v1", 42, SECRET).unwrap();
        assert!(record.verify_tag(SECRET));
        assert!(!record.verify_tag(b"another-secret"));
    }

    #[test]
    fn test_tag_detects_tampering() {
        let mut record = VoteRecord::new("e1", "c1", "v1", 42, SECRET).unwrap();
        record.candidate_id = "c2".into();
        assert!(!record.verify_tag(SECRET));
    }

    #[test]
    fn test_wire_roundtrip() {
        let record = VoteRecord::new("e1", "c1", "v1", 42, SECRET).unwrap();
        let mut buf = Vec::new();
        record.write(&mut buf);
        let decoded = VoteRecord::read(&mut buf.as_slice()).unwrap();
        assert_eq!(record, decoded);
    }
}
