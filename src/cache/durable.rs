//! Durable Store Module
//!
//! Persistence adapters consulted when the in-memory store misses. Records are
//! kept as JSON `{"value": ..., "expiry": ...}` so they survive restarts.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cache::entry::is_expired_at;
use crate::error::StoreError;

// == Durable Record ==
/// The persisted form of a cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurableRecord {
    /// Opaque serialized value
    pub value: serde_json::Value,
    /// Expiration timestamp (Unix milliseconds)
    pub expiry: u64,
}

impl DurableRecord {
    pub fn new(value: serde_json::Value, expiry: u64) -> Self {
        Self { value, expiry }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        is_expired_at(self.expiry, now_ms)
    }
}

// == Durable Store Trait ==
/// A keyed store that outlives the process.
///
/// Callers must not assume any operation succeeds.
pub trait DurableStore: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<DurableRecord>, StoreError>;
    fn write(&self, key: &str, record: &DurableRecord) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

// == Null Store ==
/// Disables durability: reads always miss and writes are dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStore;

impl DurableStore for NullStore {
    fn read(&self, _key: &str) -> Result<Option<DurableRecord>, StoreError> {
        Ok(None)
    }

    fn write(&self, _key: &str, _record: &DurableRecord) -> Result<(), StoreError> {
        Ok(())
    }

    fn remove(&self, _key: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

// == Memory Store ==
/// Serialized records held in a process-local map, like a browser's local
/// storage. Mostly useful for tests that simulate a restart by building a new
/// engine over the same store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, expired ones included.
    pub fn len(&self) -> usize {
        self.lock().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores raw text under `key`, bypassing serialization.
    pub fn insert_raw(&self, key: &str, raw: impl Into<String>) -> Result<(), StoreError> {
        self.lock()?.insert(key.to_string(), raw.into());
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StoreError> {
        self.items
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl DurableStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<DurableRecord>, StoreError> {
        match self.lock()?.get(key) {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }

    fn write(&self, key: &str, record: &DurableRecord) -> Result<(), StoreError> {
        let raw = serde_json::to_string(record)?;
        self.lock()?.insert(key.to_string(), raw);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.lock()?.remove(key);
        Ok(())
    }
}

// == File Store ==
/// One JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Creates a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File names are the SHA-256 of the key, so any key length fits.
    fn record_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{}.json", hex::encode(digest)))
    }
}

impl DurableStore for FileStore {
    fn read(&self, key: &str) -> Result<Option<DurableRecord>, StoreError> {
        let content = match fs::read_to_string(self.record_path(key)) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn write(&self, key: &str, record: &DurableRecord) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string(record)?;
        fs::write(self.record_path(key), json)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.record_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
