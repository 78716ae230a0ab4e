//! Proof-of-work search that seals a batch of pending records into a block.

use crate::{
    block::{Block, Digest},
    record::VoteRecord,
};
use sha2::{Digest as _, Sha256};
use thiserror::Error;

/// Errors that can occur while sealing.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No qualifying nonce was found within the attempt budget. The batch is
    /// untouched and may be retried on a later trigger.
    #[error("no qualifying nonce within {attempts} attempts")]
    Exhausted { attempts: u64 },
}

/// Search nonces from zero upward until the block digest carries `difficulty`
/// leading zero hex characters, or the attempt budget runs out.
///
/// The search is CPU-bound and should run off the mutation path; the batch is
/// an immutable snapshot, so admissions may proceed concurrently.
pub fn seal(
    index: u64,
    sealed_at: u64,
    records: &[VoteRecord],
    previous: Digest,
    difficulty: u32,
    max_attempts: u64,
) -> Result<Block, Error> {
    let preimage = Block::preimage(index, sealed_at, records, &previous);
    let base = Sha256::new_with_prefix(&preimage);
    for nonce in 0..max_attempts {
        let digest = Block::digest_at(&base, nonce);
        if digest.meets(difficulty) {
            return Ok(Block::from_parts(
                index,
                sealed_at,
                records.to_vec(),
                previous,
                nonce,
                digest,
            ));
        }
    }
    Err(Error::Exhausted {
        attempts: max_attempts,
    })
}
