//! Consistency verification across the chain of sealed blocks.

use crate::block::Block;
use thiserror::Error;

/// Kinds of corruption the validator can detect.
///
/// Faults are surfaced, never repaired: rewriting a block to "fix" it would
/// destroy the evidence of tampering.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// A block's stored digest does not match its contents.
    #[error("block digest does not match its contents")]
    HashMismatch,
    /// A block's previous-hash link does not point at its predecessor.
    #[error("previous-hash link is broken")]
    BrokenLink,
    /// A block's stored digest does not meet the difficulty threshold.
    #[error("proof of work does not meet difficulty")]
    ProofOfWorkInvalid,
}

/// Outcome of a validation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub valid: bool,
    /// Index of the first failing block, if any.
    pub first_invalid: Option<u64>,
    pub fault: Option<Fault>,
}

impl Report {
    fn ok() -> Self {
        Self {
            valid: true,
            first_invalid: None,
            fault: None,
        }
    }

    fn faulty(index: u64, fault: Fault) -> Self {
        Self {
            valid: false,
            first_invalid: Some(index),
            fault: Some(fault),
        }
    }
}

/// Walk `blocks[1..]` in order, recomputing each digest and checking the link
/// to its predecessor and the proof-of-work threshold. Stops at the first
/// failing block. A genesis-only chain is vacuously valid.
///
/// Read-only; may run against a point-in-time snapshot while the ledger keeps
/// admitting and sealing.
pub fn validate(blocks: &[Block], difficulty: u32) -> Report {
    for (i, block) in blocks.iter().enumerate().skip(1) {
        if block.compute_digest() != block.digest() {
            return Report::faulty(i as u64, Fault::HashMismatch);
        }
        if block.previous() != blocks[i - 1].digest() {
            return Report::faulty(i as u64, Fault::BrokenLink);
        }
        if !block.digest().meets(difficulty) {
            return Report::faulty(i as u64, Fault::ProofOfWorkInvalid);
        }
    }
    Report::ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{block::Digest, chain::Chain, record::VoteRecord, sealer};

    const SECRET: &[u8] = b"test-secret";
    const MAX_ATTEMPTS: u64 = 1 << 24;

    fn record(voter: &str) -> VoteRecord {
        VoteRecord::new("e1", "c1", voter, 42, SECRET).unwrap()
    }

    fn sealed_chain(difficulty: u32) -> Chain {
        let mut chain = Chain::genesis(0, difficulty, MAX_ATTEMPTS).unwrap();
        chain.admit(record("v1")).unwrap();
        chain.admit(record("v2")).unwrap();
        let batch = chain.batch();
        let block = sealer::seal(
            1,
            10,
            &batch,
            chain.latest().digest(),
            difficulty,
            MAX_ATTEMPTS,
        )
        .unwrap();
        let sealed = batch.iter().map(|r| r.id()).collect();
        chain.push(block);
        chain.drain(&sealed);
        chain
    }

    #[test]
    fn test_genesis_only_chain_is_valid() {
        let chain = Chain::genesis(0, 1, MAX_ATTEMPTS).unwrap();
        assert_eq!(validate(chain.blocks(), 1), Report::ok());
    }

    #[test]
    fn test_honest_chain_is_valid() {
        let chain = sealed_chain(1);
        assert!(validate(chain.blocks(), 1).valid);
    }

    #[test]
    fn test_tampered_record_is_a_hash_mismatch() {
        let mut chain = sealed_chain(1);
        chain.blocks[1].records[0].candidate_id = "c2".into();
        assert_eq!(
            validate(chain.blocks(), 1),
            Report::faulty(1, Fault::HashMismatch)
        );
    }

    #[test]
    fn test_forged_link_is_broken() {
        let mut chain = sealed_chain(1);
        // A block honestly sealed against the wrong predecessor: its own
        // digest recomputes, but the link does not hold.
        let forged = sealer::seal(2, 20, &[], Digest::Hash([9; 32]), 1, MAX_ATTEMPTS).unwrap();
        chain.blocks.push(forged);
        assert_eq!(
            validate(chain.blocks(), 1),
            Report::faulty(2, Fault::BrokenLink)
        );
    }

    #[test]
    fn test_weakened_seal_fails_proof_of_work() {
        let mut chain = Chain::genesis(0, 0, MAX_ATTEMPTS).unwrap();
        // Sealed with no difficulty at all; consistent but underworked.
        let weak = sealer::seal(1, 10, &[], chain.latest().digest(), 0, MAX_ATTEMPTS).unwrap();
        chain.blocks.push(weak);
        assert_eq!(
            validate(chain.blocks(), 6),
            Report::faulty(1, Fault::ProofOfWorkInvalid)
        );
    }
}
