//! Orchestration of admission, sealing, validation, and queries.
//!
//! The engine is the single writer of the in-memory chain: one event loop
//! consumes a mailbox of requests, which serializes admissions, seals, and
//! reinitialization against each other. The proof-of-work search and
//! persistence I/O run on separate tasks and report back through the same
//! loop, so neither blocks admission for its duration.

use crate::{block::BlockSummary, chain, record, sealer};
use std::time::Duration;
use thiserror::Error;

mod actor;
pub use actor::Engine;
mod ingress;
pub use ingress::{Mailbox, Message};

/// Errors surfaced to callers of the engine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("record: {0}")]
    Record(#[from] record::Error),
    #[error("chain: {0}")]
    Chain(#[from] chain::Error),
    #[error("sealer: {0}")]
    Sealer(#[from] sealer::Error),
    #[error("engine shut down")]
    Shutdown,
}

/// Configuration for the ledger engine.
#[derive(Clone)]
pub struct Config {
    /// Process-wide secret for record integrity tags.
    pub secret: Vec<u8>,

    /// Required leading zero hex characters in a sealed block's digest.
    pub difficulty: u32,

    /// Mempool size that triggers a seal immediately after admission.
    pub seal_threshold: usize,

    /// Attempt budget for a single proof-of-work search.
    pub max_attempts: u64,

    /// Period of the background seal timer, which seals whatever is pending
    /// regardless of threshold.
    pub seal_interval: Duration,

    /// Number of external requests to hold in the backlog before senders
    /// block.
    pub mailbox_size: usize,
}

impl Config {
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            difficulty: 2,
            seal_threshold: 5,
            max_attempts: 1 << 24,
            seal_interval: Duration::from_secs(30),
            mailbox_size: 128,
        }
    }
}

/// Point-in-time summary of the ledger.
#[derive(Clone, Debug)]
pub struct Status {
    /// Number of sealed blocks, genesis included.
    pub chain_length: u64,
    pub mempool_size: usize,
    pub latest: BlockSummary,
    /// Result of the most recent validation pass over the sealed chain.
    pub valid: bool,
    /// True while persistence is unavailable and the ledger runs memory-only.
    pub degraded: bool,
}
