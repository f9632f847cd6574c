// ── Durable key/value storage backends ──
//
// The cache layer only needs string-in, string-out storage. Backends are
// synchronous: they are small local writes, never network calls.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use url::form_urlencoded;

const FILE_EXTENSION: &str = "json";

/// Failure of a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("storage quota exceeded writing {key}: {needed} bytes needed, limit {limit}")]
    QuotaExceeded { key: String, needed: u64, limit: u64 },

    #[error("storage lock poisoned")]
    Poisoned,
}

/// String key/value storage, the contract `PersistentCache` is built on.
pub trait Storage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
    fn clear(&self) -> Result<(), StorageError>;
}

fn len_u64(s: &str) -> u64 {
    u64::try_from(s.len()).unwrap_or(u64::MAX)
}

// ── MemoryStorage ────────────────────────────────────────────────────

/// In-process storage. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    items: Arc<Mutex<HashMap<String, String>>>,
    quota: Option<u64>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage that refuses writes once keys + values exceed `bytes`.
    pub fn with_quota(bytes: u64) -> Self {
        Self {
            items: Arc::default(),
            quota: Some(bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().map_or(0, |items| items.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let items = self.items.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut items = self.items.lock().map_err(|_| StorageError::Poisoned)?;
        if let Some(limit) = self.quota {
            let others: u64 = items
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| len_u64(k) + len_u64(v))
                .sum();
            let needed = others + len_u64(key) + len_u64(value);
            if needed > limit {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_owned(),
                    needed,
                    limit,
                });
            }
        }
        items.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let mut items = self.items.lock().map_err(|_| StorageError::Poisoned)?;
        items.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        let mut items = self.items.lock().map_err(|_| StorageError::Poisoned)?;
        items.clear();
        Ok(())
    }
}

// ── FileStorage ──────────────────────────────────────────────────────

/// One JSON file per key in a directory.
///
/// Keys are percent-encoded into file names, so any key is safe on disk.
/// Writes go to a temporary file first and are renamed into place.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
    quota: Option<u64>,
}

impl FileStorage {
    /// Storage rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            quota: None,
        }
    }

    pub fn with_quota(dir: impl Into<PathBuf>, bytes: u64) -> Self {
        Self {
            dir: dir.into(),
            quota: Some(bytes),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let encoded: String = form_urlencoded::byte_serialize(key.as_bytes()).collect();
        self.dir.join(format!("{encoded}.{FILE_EXTENSION}"))
    }

    /// Entry files currently in the directory. A missing directory is empty.
    fn entry_files(&self) -> Result<Vec<(PathBuf, u64)>, StorageError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(FILE_EXTENSION) {
                files.push((path, entry.metadata()?.len()));
            }
        }
        Ok(files)
    }
}

impl Storage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);

        if let Some(limit) = self.quota {
            let others: u64 = self
                .entry_files()?
                .into_iter()
                .filter(|(p, _)| *p != path)
                .map(|(_, len)| len)
                .sum();
            let needed = others + len_u64(value);
            if needed > limit {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_owned(),
                    needed,
                    limit,
                });
            }
        }

        fs::create_dir_all(&self.dir)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn clear(&self) -> Result<(), StorageError> {
        for (path, _) in self.entry_files()? {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}
