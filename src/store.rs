//! Persistent key-value store for the user snapshot.
//!
//! DESIGN
//! ======
//! The accessor only needs `read` and `write` of JSON values by key, so the
//! seam is a small async trait. `FileStore` keeps one JSON file per key and
//! survives restarts; `MemoryStore` backs tests and ephemeral sessions.
//!
//! TRADE-OFFS
//! ==========
//! `FileStore` writes through a temp file and a rename, so a crash mid-write
//! leaves the previous snapshot intact rather than a truncated file.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store value for key {key} is not valid JSON: {source}")]
    Serde {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid store key: {0:?}")]
    InvalidKey(String),
}

/// Key-value persistence surviving process restarts.
#[async_trait::async_trait]
pub trait PersistentStore: Send + Sync {
    /// Read the value stored under `key`. `None` means it was never written.
    async fn read(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Overwrite the value stored under `key`.
    async fn write(&self, key: &str, value: Value) -> Result<(), StoreError>;
}

// =============================================================================
// FILE STORE
// =============================================================================

/// One `<key>.json` file per key inside a directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// The directory is created lazily on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{key}.json")))
    }
}

/// Keys become file names, so only a conservative character set is allowed.
pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !key.starts_with('.');
    if valid { Ok(()) } else { Err(StoreError::InvalidKey(key.to_owned())) }
}

#[async_trait::async_trait]
impl PersistentStore for FileStore {
    async fn read(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(key)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        let value = serde_json::from_slice(&bytes).map_err(|source| StoreError::Serde { key: key.to_owned(), source })?;
        Ok(Some(value))
    }

    async fn write(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let bytes = serde_json::to_vec(&value).map_err(|source| StoreError::Serde { key: key.to_owned(), source })?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StoreError::Io { path: self.dir.clone(), source })?;

        let tmp = self.dir.join(format!(".{key}.{}.tmp", Uuid::new_v4()));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|source| StoreError::Io { path: tmp.clone(), source })?;
        if let Err(source) = tokio::fs::rename(&tmp, &path).await {
            if let Err(e) = tokio::fs::remove_file(&tmp).await {
                warn!(error = %e, path = %tmp.display(), "temp snapshot cleanup failed");
            }
            return Err(StoreError::Io { path, source });
        }

        debug!(key, bytes = bytes.len(), "store write");
        Ok(())
    }
}

// =============================================================================
// MEMORY STORE
// =============================================================================

/// Process-local store. Contents are lost when the store is dropped.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a value as if a previous session had written it.
    #[must_use]
    pub fn with_value(self, key: &str, value: Value) -> Self {
        self.values
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key.to_owned(), value);
        self
    }

    /// Synchronous peek used by tests and diagnostics.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

#[async_trait::async_trait]
impl PersistentStore for MemoryStore {
    async fn read(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.get(key))
    }

    async fn write(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.values
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key.to_owned(), value);
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
