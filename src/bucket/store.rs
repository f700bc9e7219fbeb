//! Key-value stores for persisted bucket state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use tracing::{trace, warn};

use crate::error::{Result, TollgateError};

/// A string key-value capability the token bucket persists into.
///
/// Implementations report faults as errors; the bucket decides how to
/// recover from them.
pub trait StateStore: Send + Sync {
    /// Read the value stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// In-process store. State lasts as long as the store does.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Durable store backed by a single JSON object file.
///
/// Writes go to a sibling temporary file which is then renamed over the
/// target, so a crash mid-write leaves the previous contents intact.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileStore {
    /// Create a store persisting to `path`. The file is created on first write.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    /// The backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, String>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };
        if contents.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&contents).map_err(|e| {
            TollgateError::Storage(format!(
                "corrupt state file {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

impl StateStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock();
        let mut entries = self.read_all()?;
        Ok(entries.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock();
        // An unreadable file is replaced rather than left to block every write.
        let mut entries = match self.read_all() {
            Ok(entries) => entries,
            Err(TollgateError::Storage(e)) => {
                warn!(path = %self.path.display(), error = %e, "Overwriting corrupt state file");
                HashMap::new()
            }
            Err(e) => return Err(e),
        };
        entries.insert(key.to_string(), value.to_string());

        let encoded = serde_json::to_string_pretty(&entries)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, encoded)?;
        std::fs::rename(&tmp, &self.path)?;

        trace!(path = %self.path.display(), key = key, "Persisted state");
        Ok(())
    }
}
