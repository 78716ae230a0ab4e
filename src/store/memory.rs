//! In-memory store for tests and ephemeral deployments.
//!
//! Clones share state, so a test can hold one handle while the engine owns
//! another, and can switch the store "offline" to exercise degraded mode.

use super::{Error, Store};
use crate::block::Block;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Clone, Default)]
pub struct Memory {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    blocks: Vec<Block>,
    offline: bool,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail until switched back on.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// The blocks currently persisted.
    pub fn blocks(&self) -> Vec<Block> {
        self.lock().blocks.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(inner: &Inner) -> Result<(), Error> {
        if inner.offline {
            return Err(Error::Io(std::io::Error::other("store offline")));
        }
        Ok(())
    }
}

impl Store for Memory {
    async fn load(&mut self) -> Result<Vec<Block>, Error> {
        let inner = self.lock();
        Self::check(&inner)?;
        Ok(inner.blocks.clone())
    }

    async fn append(&mut self, block: &Block) -> Result<(), Error> {
        let mut inner = self.lock();
        Self::check(&inner)?;
        inner.blocks.push(block.clone());
        Ok(())
    }

    async fn rewrite(&mut self, blocks: &[Block]) -> Result<(), Error> {
        let mut inner = self.lock();
        Self::check(&inner)?;
        inner.blocks = blocks.to_vec();
        Ok(())
    }
}
