//! Block loader contract.
//!
//! The block registry itself (search index, storage) lives outside the
//! core; the interpreter resolves `use` statements through this trait
//! and verifies source integrity against the registered hash.

use crate::error::NaabError;
use crate::limits::MonotonicCounter;
use data_encoding::HEXLOWER;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Registry metadata for one block.
#[derive(Debug, Clone, Default)]
pub struct BlockInfo {
    /// Identifier (`BLOCK-CPP-MATH`).
    pub block_id: String,
    /// Human-readable name.
    pub name: String,
    /// Language the block is written in.
    pub language: String,
    /// Version string.
    pub version: String,
    /// Source location on disk, when file-backed.
    pub file_path: String,
    /// SHA-256 of the source, lowercase hex.
    pub code_hash: String,
    /// Free-form metadata.
    pub metadata: BTreeMap<String, String>,
}

/// Resolves block identifiers to metadata and source bytes.
pub trait BlockLoader: Send + Sync {
    /// Metadata for `id`; Import error when not found.
    fn get_block(&self, id: &str) -> Result<BlockInfo, NaabError>;

    /// Source bytes for `id`; Import error when not found.
    fn load_source(&self, id: &str) -> Result<Vec<u8>, NaabError>;

    /// Record one use of `id`, crediting `tokens_saved`.
    fn record_usage(&self, id: &str, tokens_saved: u64);

    /// Record that `id_a` and `id_b` were used together.
    fn record_pair(&self, id_a: &str, id_b: &str);
}

/// SHA-256 of `source`, lowercase hex — the hash stored in block
/// registries.
pub fn source_hash(source: &[u8]) -> String {
    HEXLOWER.encode(&Sha256::digest(source))
}

/// Per-block usage statistics; the counters refuse to wrap.
#[derive(Debug, Default)]
struct BlockUsage {
    uses: MonotonicCounter,
    tokens_saved: MonotonicCounter,
}

/// An in-memory loader for embedding and tests.
#[derive(Default)]
pub struct MemoryBlockLoader {
    blocks: Mutex<FxHashMap<String, (BlockInfo, Vec<u8>)>>,
    usage: Mutex<FxHashMap<String, BlockUsage>>,
    pairs: Mutex<FxHashMap<(String, String), u64>>,
}

impl MemoryBlockLoader {
    /// An empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a block; the hash is computed from `source`.
    pub fn insert(&self, id: &str, name: &str, language: &str, source: &[u8]) {
        let info = BlockInfo {
            block_id: id.to_string(),
            name: name.to_string(),
            language: language.to_string(),
            version: "1.0.0".to_string(),
            file_path: String::new(),
            code_hash: source_hash(source),
            metadata: BTreeMap::new(),
        };
        self.blocks
            .lock()
            .insert(id.to_string(), (info, source.to_vec()));
    }

    /// Times `id` was used and tokens credited.
    pub fn usage(&self, id: &str) -> (u64, u64) {
        self.usage
            .lock()
            .get(id)
            .map(|u| (u.uses.get(), u.tokens_saved.get()))
            .unwrap_or_default()
    }

    /// Times the pair was used together (order-insensitive).
    pub fn pair_count(&self, a: &str, b: &str) -> u64 {
        let key = pair_key(a, b);
        self.pairs.lock().get(&key).copied().unwrap_or_default()
    }
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

impl BlockLoader for MemoryBlockLoader {
    fn get_block(&self, id: &str) -> Result<BlockInfo, NaabError> {
        self.blocks
            .lock()
            .get(id)
            .map(|(info, _)| info.clone())
            .ok_or_else(|| NaabError::import(format!("block not found: {id}")))
    }

    fn load_source(&self, id: &str) -> Result<Vec<u8>, NaabError> {
        self.blocks
            .lock()
            .get(id)
            .map(|(_, src)| src.clone())
            .ok_or_else(|| NaabError::import(format!("block not found: {id}")))
    }

    fn record_usage(&self, id: &str, tokens_saved: u64) {
        let mut usage = self.usage.lock();
        let entry = usage.entry(id.to_string()).or_default();
        // A counter at its ceiling stays pinned there.
        let _ = entry.uses.increment();
        let _ = entry.tokens_saved.add(tokens_saved);
    }

    fn record_pair(&self, id_a: &str, id_b: &str) {
        *self.pairs.lock().entry(pair_key(id_a, id_b)).or_default() += 1;
    }
}
