//! Append-only single-file store.
//!
//! Each block is one frame: a u32 payload length, the block's canonical
//! encoding, and a CRC32 of the payload. Frames are appended and synced on
//! every write. A torn trailing frame (an unclean shutdown mid-append) is
//! truncated away on load; corruption anywhere else is surfaced, not
//! repaired.

use super::{Error, Store};
use crate::block::Block;
use bytes::BufMut;
use rand::Rng;
use std::path::PathBuf;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, warn};

pub struct Disk {
    path: PathBuf,
}

impl Disk {
    /// A store backed by the file at `path`. The parent directory must
    /// already exist; the file is created on first write.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

fn frame(block: &Block) -> Vec<u8> {
    let payload = block.encode();
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.put_u32(payload.len() as u32);
    out.extend_from_slice(&payload);
    out.put_u32(crc32fast::hash(&payload));
    out
}

enum Frame {
    Complete(Block, usize),
    Torn,
    Corrupt(&'static str),
}

fn parse_frame(bytes: &[u8]) -> Frame {
    if bytes.len() < 4 {
        return Frame::Torn;
    }
    let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if bytes.len() < 4 + len + 4 {
        return Frame::Torn;
    }
    let payload = &bytes[4..4 + len];
    let stored = u32::from_be_bytes([
        bytes[4 + len],
        bytes[4 + len + 1],
        bytes[4 + len + 2],
        bytes[4 + len + 3],
    ]);
    if crc32fast::hash(payload) != stored {
        return Frame::Corrupt("checksum mismatch");
    }
    match Block::decode(payload) {
        Ok(block) => Frame::Complete(block, 4 + len + 4),
        Err(_) => Frame::Corrupt("undecodable frame"),
    }
}

impl Store for Disk {
    async fn load(&mut self) -> Result<Vec<Block>, Error> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut blocks = Vec::new();
        let mut offset = 0usize;
        while offset < bytes.len() {
            match parse_frame(&bytes[offset..]) {
                Frame::Complete(block, consumed) => {
                    if block.index() != blocks.len() as u64 {
                        return Err(Error::Corrupt("non-contiguous block index"));
                    }
                    blocks.push(block);
                    offset += consumed;
                }
                Frame::Torn => {
                    // A partially written final frame from an unclean
                    // shutdown; drop it and keep the intact prefix.
                    warn!(
                        offset,
                        len = bytes.len(),
                        "torn trailing frame; truncating"
                    );
                    let file = fs::OpenOptions::new().write(true).open(&self.path).await?;
                    file.set_len(offset as u64).await?;
                    file.sync_all().await?;
                    break;
                }
                Frame::Corrupt(reason) => return Err(Error::Corrupt(reason)),
            }
        }
        debug!(blocks = blocks.len(), "loaded chain");
        Ok(blocks)
    }

    async fn append(&mut self, block: &Block) -> Result<(), Error> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&frame(block)).await?;
        file.sync_all().await?;
        debug!(index = block.index(), "appended block");
        Ok(())
    }

    async fn rewrite(&mut self, blocks: &[Block]) -> Result<(), Error> {
        let tmp = self
            .path
            .with_extension(format!("tmp-{:016x}", rand::thread_rng().gen::<u64>()));
        let mut file = fs::File::create(&tmp).await?;
        for block in blocks {
            file.write_all(&frame(block)).await?;
        }
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, &self.path).await?;
        debug!(blocks = blocks.len(), "rewrote chain");
        Ok(())
    }
}
