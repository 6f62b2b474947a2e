use dashmap::DashMap;

use crate::proto::{hash_block, Block};

/// Content-addressed block operations the server exposes.
///
/// Implementations must be safe for concurrent callers; two PutBlocks of the
/// same bytes store the same value, so racing writers are harmless.
pub trait BlockStore: Send + Sync {
    /// Store `block` under the SHA-256 hex of its data and return that hash.
    /// Idempotent for identical data.
    fn put_block(&self, block: Block) -> String;

    /// Fetch a block by hash, or `None` if the store has never seen it.
    fn get_block(&self, hash: &str) -> Option<Block>;

    /// The subset of `hashes` already present, preserving input order.
    fn has_blocks(&self, hashes: &[String]) -> Vec<String>;
}

/// Volatile block store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    blocks: DashMap<String, Block>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockStore for MemoryBlockStore {
    fn put_block(&self, block: Block) -> String {
        let hash = hash_block(&block.data);
        self.blocks.insert(hash.clone(), block);
        hash
    }

    fn get_block(&self, hash: &str) -> Option<Block> {
        self.blocks.get(hash).map(|entry| entry.value().clone())
    }

    fn has_blocks(&self, hashes: &[String]) -> Vec<String> {
        hashes
            .iter()
            .filter(|hash| self.blocks.contains_key(hash.as_str()))
            .cloned()
            .collect()
    }
}
