//! Durable persistence of the chain of sealed blocks.
//!
//! The persisted layout is one frame per block, appended in order; reloading
//! yields blocks whose digests re-validate byte-for-byte. A store failure
//! never rolls the in-memory chain back; the engine degrades to memory-only
//! mode and retries opportunistically.

use crate::{block::Block, codec};
use std::future::Future;
use thiserror::Error;

pub mod disk;
pub mod memory;

/// Errors that can occur when interacting with a store.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec: {0}")]
    Codec(#[from] codec::Error),
    #[error("store corrupt: {0}")]
    Corrupt(&'static str),
}

/// Durable home of the sealed chain.
pub trait Store: Send + 'static {
    /// Load every persisted block in order. An absent store yields an empty
    /// vector.
    fn load(&mut self) -> impl Future<Output = Result<Vec<Block>, Error>> + Send;

    /// Append one sealed block.
    fn append(&mut self, block: &Block) -> impl Future<Output = Result<(), Error>> + Send;

    /// Replace the persisted chain wholesale. Used to reinitialize and to
    /// resynchronize after a failed append.
    fn rewrite(&mut self, blocks: &[Block]) -> impl Future<Output = Result<(), Error>> + Send;
}
