//! Append-only, tamper-evident ledger for cast votes.
//!
//! Votes admitted into the ledger wait in a mempool until a proof-of-work
//! search seals them into a block chained to its predecessor by hash. Any
//! in-place mutation of a sealed record breaks its block's digest, any
//! re-seal breaks the link from the next block, and a validation pass walks
//! the whole chain to report the first inconsistency. The chain survives
//! restarts through a durable store and keeps operating memory-only when
//! persistence is unavailable.
//!
//! # Architecture
//!
//! - [record]: immutable vote records with keyed integrity tags.
//! - [block]: canonical encoding and proof-of-work digests.
//! - [chain]: sealed blocks plus the pending mempool, with queries.
//! - [sealer]: the bounded nonce search.
//! - [validator]: the consistency walk and its fault taxonomy.
//! - [store]: durable persistence (disk and in-memory backends).
//! - [engine]: the single-writer event loop tying it all together, driven
//!   through a clonable [Mailbox].
//!
//! This is a single-process ledger with one authoritative copy. There is no
//! multi-party consensus, no forks or reorganization, and the integrity tag
//! is tamper evidence, not a legal signature.

pub mod block;
pub mod chain;
pub mod codec;
pub mod engine;
pub mod record;
pub mod sealer;
pub mod store;
pub mod validator;

pub use block::{Block, BlockSummary, Digest};
pub use chain::{Chain, HistoryEntry, Verification};
pub use engine::{Config, Engine, Mailbox, Status};
pub use record::{RecordId, VoteRecord};
pub use validator::{validate, Fault, Report};
