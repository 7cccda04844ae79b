//! Ledger persistence for Owonero

use crate::blockchain::Block;
use crate::error::{ChainError, Result};
use parking_lot::Mutex;
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Abstraction for persistence backends. Implementations must replace the
/// stored sequence atomically so a reader never observes a partial ledger.
pub trait Persistence: Send + Sync {
    /// `Ok(None)` when nothing has been stored yet.
    fn load_chain(&self) -> Result<Option<Vec<Block>>>;
    fn save_chain(&self, blocks: &[Block]) -> Result<()>;
    /// Human-readable location for log lines.
    fn describe(&self) -> String;
}

/// Both layouts found in the wild: a bare array and `{"chain": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredLedger {
    Bare(Vec<Block>),
    Wrapped { chain: Vec<Block> },
}

impl StoredLedger {
    fn into_blocks(self) -> Vec<Block> {
        match self {
            StoredLedger::Bare(blocks) | StoredLedger::Wrapped { chain: blocks } => blocks,
        }
    }
}

pub fn parse_ledger(data: &str) -> Result<Vec<Block>> {
    let stored: StoredLedger = serde_json::from_str(data)
        .map_err(|e| ChainError::Serialization(format!("unrecognised ledger layout: {}", e)))?;
    Ok(stored.into_blocks())
}

/// Pretty-printed JSON array on disk.
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

impl Persistence for JsonFilePersistence {
    fn load_chain(&self) -> Result<Option<Vec<Block>>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&self.path)?;
        if data.trim().is_empty() {
            return Ok(None);
        }
        parse_ledger(&data).map(Some)
    }

    fn save_chain(&self, blocks: &[Block]) -> Result<()> {
        let dir = self.parent_dir();
        std::fs::create_dir_all(&dir)?;

        let json = serde_json::to_vec_pretty(blocks)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| {
            ChainError::Persistence(format!("failed to replace {}: {}", self.path.display(), e))
        })?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Simple in-memory persistence implementation useful for tests and ephemeral runs.
#[derive(Clone, Default)]
pub struct InMemoryPersistence {
    pub blocks: Arc<Mutex<Option<Vec<Block>>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blocks(blocks: Vec<Block>) -> Self {
        Self {
            blocks: Arc::new(Mutex::new(Some(blocks))),
        }
    }

    pub fn stored_len(&self) -> Option<usize> {
        self.blocks.lock().as_ref().map(Vec::len)
    }
}

impl Persistence for InMemoryPersistence {
    fn load_chain(&self) -> Result<Option<Vec<Block>>> {
        Ok(self.blocks.lock().clone())
    }

    fn save_chain(&self, blocks: &[Block]) -> Result<()> {
        *self.blocks.lock() = Some(blocks.to_vec());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
