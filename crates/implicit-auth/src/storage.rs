//! Durable key-value storage for state that must survive a full navigation
//!
//! A redirect login tears down the whole page, so its correlation token and
//! replay nonce live in a `DurableStore` rather than in memory. `MemoryStore`
//! lasts for one page lifetime; `FileStore` persists a JSON map to disk the
//! way session storage outlives a reload.
//!
//! Values written with `secure = true` (correlation tokens, nonces) keep that
//! flag in the session file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Durable store collaborator.
pub trait DurableStore: Send + Sync {
    /// Read a value, `None` if never written.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value. `secure` marks correlation secrets.
    fn set(&self, key: &str, value: &str, secure: bool) -> Result<()>;
}

/// One stored value with its isolation flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredValue {
    value: String,
    #[serde(default, skip_serializing_if = "is_false")]
    secure: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory store for a single page lifetime.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<HashMap<String, StoredValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` was last written with `secure = true`.
    #[cfg(test)]
    pub(crate) fn is_secure(&self, key: &str) -> bool {
        lock(&self.state).get(key).is_some_and(|v| v.secure)
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.state).get(key).map(|v| v.value.clone()))
    }

    fn set(&self, key: &str, value: &str, secure: bool) -> Result<()> {
        lock(&self.state).insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                secure,
            },
        );
        Ok(())
    }
}

/// File-backed store.
///
/// Every write persists the whole map with an atomic temp-file + rename, so a
/// crash mid-write never leaves a truncated session file. The file is created
/// 0600 since it holds correlation secrets.
pub struct FileStore {
    path: PathBuf,
    state: Mutex<HashMap<String, StoredValue>>,
}

impl FileStore {
    /// Load the store from `path`, creating an empty file if none exists.
    pub fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| Error::Storage(format!("reading session file: {e}")))?;
            let values: HashMap<String, StoredValue> = serde_json::from_str(&contents)
                .map_err(|e| Error::Storage(format!("parsing session file: {e}")))?;
            info!(path = %path.display(), keys = values.len(), "loaded session store");
            values
        } else {
            info!(path = %path.display(), "session file not found, starting empty");
            let values = HashMap::new();
            write_atomic(&path, &values)?;
            values
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DurableStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.state).get(key).map(|v| v.value.clone()))
    }

    fn set(&self, key: &str, value: &str, secure: bool) -> Result<()> {
        let mut state = lock(&self.state);
        state.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                secure,
            },
        );
        debug!(key, secure, "stored value");
        write_atomic(&self.path, &state)
    }
}

/// Write the session map atomically (temp file in the same directory, then rename).
fn write_atomic(path: &Path, data: &HashMap<String, StoredValue>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Storage(format!("serializing session: {e}")))?;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let tmp_path = dir.join(format!(".session.tmp.{}", std::process::id()));

    std::fs::write(&tmp_path, json.as_bytes())
        .map_err(|e| Error::Storage(format!("writing temp session file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&tmp_path, perms)
            .map_err(|e| Error::Storage(format!("setting session file permissions: {e}")))?;
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| Error::Storage(format!("renaming temp session file: {e}")))?;

    debug!(path = %path.display(), "persisted session");
    Ok(())
}
