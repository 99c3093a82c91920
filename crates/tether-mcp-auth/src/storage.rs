//! Key/value storage backends.
//!
//! The authorization flow persists credentials in an origin-local key/value
//! store supplied by the host. [`MemoryStorage`] backs tests and hosts that
//! manage persistence themselves; [`FileStorage`] persists the whole map as
//! one JSON file for native hosts.

use crate::error::{AuthError, AuthResult};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};
use tracing::warn;

/// Host-supplied persistent string-to-string store.
///
/// Implementations must be safe to share across tasks. Values are opaque to
/// the store; callers handle (de)serialization.
pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> AuthResult<()>;
    fn remove(&self, key: &str);
    fn keys(&self) -> Vec<String>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().unwrap_or_else(std::sync::PoisonError::into_inner).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> AuthResult<()> {
        self.entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) {
        self.entries.write().unwrap_or_else(std::sync::PoisonError::into_inner).remove(key);
    }

    fn keys(&self) -> Vec<String> {
        self.entries.read().unwrap_or_else(std::sync::PoisonError::into_inner).keys().cloned().collect()
    }
}

/// File-backed store holding the whole map in a single JSON document.
///
/// Reads tolerate a missing or unparseable file (treated as empty). On Unix
/// the file is written with 0600 permissions since it holds tokens.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> HashMap<String, String> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "storage file read failed");
                return HashMap::new();
            }
        };
        match serde_json::from_str(&data) {
            Ok(map) => map,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "storage file parse failed");
                HashMap::new()
            }
        }
    }

    fn persist(&self, map: &HashMap<String, String>) -> AuthResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AuthError::StorageFull(e.to_string()))?;
        }
        let data = serde_json::to_string_pretty(map)?;
        std::fs::write(&self.path, &data).map_err(|e| AuthError::StorageFull(e.to_string()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| AuthError::StorageFull(e.to_string()))?;
        }
        Ok(())
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        let _guard = self.lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.load().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> AuthResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut map = self.load();
        map.insert(key.to_string(), value.to_string());
        self.persist(&map)
    }

    fn remove(&self, key: &str) {
        let _guard = self.lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut map = self.load();
        if map.remove(key).is_some() {
            if let Err(e) = self.persist(&map) {
                warn!(path = %self.path.display(), error = %e, "storage file write failed");
            }
        }
    }

    fn keys(&self) -> Vec<String> {
        let _guard = self.lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.load().into_keys().collect()
    }
}
