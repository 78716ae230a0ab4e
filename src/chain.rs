//! The ledger state: sealed blocks plus the pending-admission mempool.

use crate::{
    block::{Block, BlockSummary, Digest},
    record::{RecordId, VoteRecord},
    sealer,
};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

/// Errors that can occur when admitting a record.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The voter already has a record (sealed or pending) for the election.
    #[error("voter already has a record for this election")]
    Duplicate,
}

/// Where a record id was found, if anywhere.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verification {
    /// Sealed into the block at `index`.
    Included { index: u64, digest: Digest },
    /// Admitted but not yet sealed.
    Pending,
    NotFound,
}

/// One entry of a voter's history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryEntry {
    pub election_id: String,
    pub candidate_id: String,
    pub cast_at: u64,
    /// The sealing block, or None while the record is pending.
    pub sealed: Option<BlockSummary>,
}

/// Sealed blocks in order plus the pending mempool.
///
/// Invariants: `blocks[0]` is the genesis block and is always present; every
/// later block links to its predecessor's digest; a record lives in the
/// mempool or in exactly one block, never both.
pub struct Chain {
    pub(crate) blocks: Vec<Block>,
    pub(crate) mempool: Vec<VoteRecord>,
}

impl Chain {
    /// Mine a fresh chain holding only the empty genesis block.
    pub fn genesis(sealed_at: u64, difficulty: u32, max_attempts: u64) -> Result<Self, sealer::Error> {
        let genesis = sealer::seal(0, sealed_at, &[], Digest::Genesis, difficulty, max_attempts)?;
        Ok(Self {
            blocks: vec![genesis],
            mempool: Vec::new(),
        })
    }

    /// Rebuild from blocks loaded out of storage. `blocks` must be non-empty.
    pub fn from_blocks(blocks: Vec<Block>) -> Self {
        debug_assert!(!blocks.is_empty());
        Self {
            blocks,
            mempool: Vec::new(),
        }
    }

    /// Number of sealed blocks, genesis included.
    pub fn height(&self) -> u64 {
        self.blocks.len() as u64
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn latest(&self) -> &Block {
        self.blocks.last().expect("chain always holds genesis")
    }

    pub fn mempool(&self) -> &[VoteRecord] {
        &self.mempool
    }

    /// Snapshot the mempool for sealing.
    pub fn batch(&self) -> Vec<VoteRecord> {
        self.mempool.clone()
    }

    /// Append `record` to the mempool unless the voter already has a record
    /// for the election, sealed or pending. The scan is linear in chain plus
    /// mempool size; callers needing O(1) duplicate checks should keep their
    /// own index.
    pub fn admit(&mut self, record: VoteRecord) -> Result<(), Error> {
        if self.has_voted(&record.election_id, &record.voter_id) {
            return Err(Error::Duplicate);
        }
        self.mempool.push(record);
        Ok(())
    }

    /// Append a sealed block. The caller must have sealed against the current
    /// tip.
    pub fn push(&mut self, block: Block) {
        debug_assert_eq!(block.index(), self.height());
        debug_assert_eq!(block.previous(), self.latest().digest());
        self.blocks.push(block);
    }

    /// Remove exactly the identified records from the mempool. Records
    /// admitted after a seal snapshot was taken are preserved.
    pub fn drain(&mut self, sealed: &HashSet<RecordId>) {
        self.mempool.retain(|record| !sealed.contains(&record.id));
    }

    fn all_records(&self) -> impl Iterator<Item = &VoteRecord> {
        self.blocks
            .iter()
            .flat_map(|block| block.records().iter())
            .chain(self.mempool.iter())
    }

    /// Whether any sealed block or the mempool holds a record for the pair.
    pub fn has_voted(&self, election_id: &str, voter_id: &str) -> bool {
        self.all_records()
            .any(|record| record.election_id == election_id && record.voter_id == voter_id)
    }

    /// Locate a record id across sealed blocks, then the mempool.
    pub fn locate(&self, id: &RecordId) -> Verification {
        for block in &self.blocks {
            if block.records().iter().any(|record| record.id == *id) {
                return Verification::Included {
                    index: block.index(),
                    digest: block.digest(),
                };
            }
        }
        if self.mempool.iter().any(|record| record.id == *id) {
            Verification::Pending
        } else {
            Verification::NotFound
        }
    }

    /// Lazy traversal of an election's records: sealed blocks in order, then
    /// the mempool.
    pub fn records_for_election<'a>(
        &'a self,
        election_id: &'a str,
    ) -> impl Iterator<Item = &'a VoteRecord> + 'a {
        self.all_records()
            .filter(move |record| record.election_id == election_id)
    }

    /// A voter's records, each annotated with its sealing block or pending.
    pub fn voter_history(&self, voter_id: &str) -> Vec<HistoryEntry> {
        let mut history = Vec::new();
        for block in &self.blocks {
            for record in block.records() {
                if record.voter_id == voter_id {
                    history.push(HistoryEntry {
                        election_id: record.election_id.clone(),
                        candidate_id: record.candidate_id.clone(),
                        cast_at: record.cast_at,
                        sealed: Some(BlockSummary::from(block)),
                    });
                }
            }
        }
        for record in &self.mempool {
            if record.voter_id == voter_id {
                history.push(HistoryEntry {
                    election_id: record.election_id.clone(),
                    candidate_id: record.candidate_id.clone(),
                    cast_at: record.cast_at,
                    sealed: None,
                });
            }
        }
        history
    }

    /// Per-candidate counts for an election, across sealed and pending
    /// records.
    pub fn tally(&self, election_id: &str) -> BTreeMap<String, u64> {
        let mut counts = BTreeMap::new();
        for record in self.records_for_election(election_id) {
            *counts.entry(record.candidate_id.clone()).or_insert(0) += 1;
        }
        counts
    }
}
