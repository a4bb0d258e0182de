//! Filesystem-backed block loader.
//!
//! Blocks live in one directory: the source file is named by the block
//! id (`BLOCK-PY-MATH.py`), and a JSON sidecar (`BLOCK-PY-MATH.json`)
//! carries `{name, language, version, file, hash?}`. When the sidecar
//! records a hash it is authoritative; otherwise the hash is computed
//! from the source at load time. Usage statistics are in-memory
//! counters for the life of the process.

use naab_engine::error::NaabError;
use naab_engine::limits::MonotonicCounter;
use naab_engine::polyglot::loader::{source_hash, BlockInfo, BlockLoader};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct Sidecar {
    name: String,
    language: String,
    #[serde(default)]
    version: Option<String>,
    file: String,
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

/// Per-block usage statistics; the counters refuse to wrap.
#[derive(Debug, Default)]
struct BlockUsage {
    uses: MonotonicCounter,
    tokens_saved: MonotonicCounter,
}

/// Loads blocks from a directory of source files with JSON sidecars.
pub struct DirectoryBlockLoader {
    root: PathBuf,
    usage: Mutex<FxHashMap<String, BlockUsage>>,
    pairs: Mutex<FxHashMap<(String, String), u64>>,
}

impl DirectoryBlockLoader {
    /// Loader rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            usage: Mutex::new(FxHashMap::default()),
            pairs: Mutex::new(FxHashMap::default()),
        }
    }

    /// The blocks directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Times `id` was used plus tokens credited.
    pub fn usage(&self, id: &str) -> (u64, u64) {
        self.usage
            .lock()
            .get(id)
            .map(|u| (u.uses.get(), u.tokens_saved.get()))
            .unwrap_or_default()
    }

    fn sidecar(&self, id: &str) -> Result<Sidecar, NaabError> {
        validate_block_id(id)?;
        let path = self.root.join(format!("{id}.json"));
        let text = std::fs::read_to_string(&path)
            .map_err(|_| NaabError::import(format!("block not found: {id}")))?;
        serde_json::from_str(&text).map_err(|e| {
            NaabError::import(format!("block {id} has a malformed sidecar: {e}"))
        })
    }

    fn source_path(&self, id: &str, sidecar: &Sidecar) -> Result<PathBuf, NaabError> {
        // Sidecars reference sources by bare file name; anything that
        // escapes the blocks directory is a traversal attempt.
        let file = Path::new(&sidecar.file);
        if file.components().count() != 1 || sidecar.file.starts_with('.') {
            return Err(NaabError::import(format!(
                "block {id} references an invalid source path"
            )));
        }
        Ok(self.root.join(file))
    }
}

fn validate_block_id(id: &str) -> Result<(), NaabError> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(NaabError::import(format!("invalid block id: '{id}'")));
    }
    Ok(())
}

impl BlockLoader for DirectoryBlockLoader {
    fn get_block(&self, id: &str) -> Result<BlockInfo, NaabError> {
        let sidecar = self.sidecar(id)?;
        let path = self.source_path(id, &sidecar)?;
        let code_hash = match &sidecar.hash {
            Some(hash) => hash.clone(),
            None => {
                let source = std::fs::read(&path)
                    .map_err(|_| NaabError::import(format!("block source missing: {id}")))?;
                source_hash(&source)
            }
        };
        Ok(BlockInfo {
            block_id: id.to_string(),
            name: sidecar.name.clone(),
            language: sidecar.language.clone(),
            version: sidecar.version.clone().unwrap_or_else(|| "0.0.0".to_string()),
            file_path: path.to_string_lossy().into_owned(),
            code_hash,
            metadata: sidecar.metadata,
        })
    }

    fn load_source(&self, id: &str) -> Result<Vec<u8>, NaabError> {
        let sidecar = self.sidecar(id)?;
        let path = self.source_path(id, &sidecar)?;
        std::fs::read(&path)
            .map_err(|_| NaabError::import(format!("block source missing: {id}")))
    }

    fn record_usage(&self, id: &str, tokens_saved: u64) {
        let mut usage = self.usage.lock();
        let entry = usage.entry(id.to_string()).or_default();
        // A counter at its ceiling stays pinned there.
        let _ = entry.uses.increment();
        let _ = entry.tokens_saved.add(tokens_saved);
    }

    fn record_pair(&self, id_a: &str, id_b: &str) {
        let key = if id_a <= id_b {
            (id_a.to_string(), id_b.to_string())
        } else {
            (id_b.to_string(), id_a.to_string())
        };
        *self.pairs.lock().entry(key).or_default() += 1;
    }
}
