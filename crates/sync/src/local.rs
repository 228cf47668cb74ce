//! Device-local ephemeral storage for cart and saved-for-later lists.
//!
//! Backends are synchronous key/value stores. [`LocalCache`] adds the typed
//! contract the engine relies on: loads never fail (missing or corrupt data is
//! an empty list) and saves overwrite the whole sequence.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

/// Storage keys used by the engine.
pub mod keys {
    /// Key for the serialized cart-line sequence.
    pub const CART: &str = "cart_lines";

    /// Key for the serialized saved-line sequence.
    pub const SAVED: &str = "saved_lines";
}

/// Errors from a local storage backend.
#[derive(Debug, Error)]
pub enum LocalStoreError {
    /// Filesystem operation failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Value could not be serialized.
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Key contains characters that are not safe as a file name.
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
}

/// A synchronous, single-writer key/value store.
pub trait LocalStore: Send {
    /// Read the raw value for `key`, or `None` if absent or unreadable.
    fn read(&self, key: &str) -> Option<String>;

    /// Overwrite the value for `key`.
    ///
    /// # Errors
    ///
    /// Returns `LocalStoreError` if the value could not be persisted.
    fn write(&mut self, key: &str, value: &str) -> Result<(), LocalStoreError>;

    /// Remove the value for `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns `LocalStoreError` if the backend failed to delete the value.
    fn remove(&mut self, key: &str) -> Result<(), LocalStoreError>;
}

// =============================================================================
// MemoryStore
// =============================================================================

/// In-process store, used by tests and embedders without a filesystem.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `key` currently holds a value.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

impl LocalStore for MemoryStore {
    fn read(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), LocalStoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), LocalStoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

// =============================================================================
// FileStore
// =============================================================================

/// One JSON file per key inside a directory.
///
/// Writes go to a temporary sibling file and are renamed into place, so a
/// crash mid-write leaves the previous value intact.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns `LocalStoreError::Io` if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, LocalStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| LocalStoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// Directory backing this store.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, LocalStoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(LocalStoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl LocalStore for FileStore {
    fn read(&self, key: &str) -> Option<String> {
        let path = self.path_for(key).ok()?;
        match fs::read_to_string(&path) {
            Ok(contents) => Some(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read local store entry");
                None
            }
        }
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), LocalStoreError> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        let io_err = |source| LocalStoreError::Io {
            path: tmp.clone(),
            source,
        };

        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(value.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        fs::rename(&tmp, &path).map_err(|source| LocalStoreError::Io { path, source })
    }

    fn remove(&mut self, key: &str) -> Result<(), LocalStoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(LocalStoreError::Io { path, source }),
        }
    }
}

// =============================================================================
// LocalCache
// =============================================================================

/// Typed sequence storage over any [`LocalStore`].
pub struct LocalCache {
    store: Box<dyn LocalStore>,
}

impl LocalCache {
    #[must_use]
    pub fn new(store: Box<dyn LocalStore>) -> Self {
        Self { store }
    }

    /// Load the sequence stored under `key`.
    ///
    /// Missing data yields an empty vector and unparseable data is logged and
    /// also yields an empty vector. Individual entries that fail validation
    /// are dropped while the rest load.
    #[must_use]
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        let Some(raw) = self.store.read(key) else {
            debug!(key, "No local data");
            return Vec::new();
        };

        let entries: Vec<serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(key, error = %e, "Discarding corrupt local data");
                return Vec::new();
            }
        };

        entries
            .into_iter()
            .filter_map(|entry| {
                serde_json::from_value(entry)
                    .inspect_err(|e| warn!(key, error = %e, "Discarding corrupt local entry"))
                    .ok()
            })
            .collect()
    }

    /// Overwrite the sequence stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `LocalStoreError` if serialization or the backend write fails.
    pub fn save<T: Serialize>(&mut self, key: &str, items: &[T]) -> Result<(), LocalStoreError> {
        let raw = serde_json::to_string(items)?;
        self.store.write(key, &raw)
    }

    /// Remove the sequence stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `LocalStoreError` if the backend delete fails.
    pub fn clear(&mut self, key: &str) -> Result<(), LocalStoreError> {
        self.store.remove(key)
    }

    /// Raw access to the underlying backend.
    #[must_use]
    pub fn store(&self) -> &dyn LocalStore {
        self.store.as_ref()
    }
}

impl std::fmt::Debug for LocalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache").finish_non_exhaustive()
    }
}
