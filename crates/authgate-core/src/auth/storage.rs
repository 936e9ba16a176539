//! Durable key-value storage for the session snapshot.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use tracing::debug;

/// Session file name in the session directory
const SESSION_FILE: &str = "session.json";

/// Key-value persistence for the session snapshot.
///
/// `write` must be all-or-nothing: either every entry is stored or the
/// previous contents remain.
pub trait SessionStorage: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>>;

    fn write(&self, entries: &[(&str, &str)]) -> Result<()>;

    fn remove(&self, keys: &[&str]) -> Result<()>;
}

/// In-process storage. Clones share the same entries, so a clone kept by a
/// test observes everything the store writes.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored entry.
    pub fn entries(&self) -> HashMap<String, String> {
        self.lock().clone()
    }

    pub fn insert(&self, key: &str, value: &str) {
        self.lock().insert(key.to_string(), value.to_string());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // A poisoned map still holds consistent string entries.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SessionStorage for MemoryStorage {
    fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }

    fn write(&self, entries: &[(&str, &str)]) -> Result<()> {
        let mut map = self.lock();
        for (key, value) in entries {
            map.insert((*key).to_string(), (*value).to_string());
        }
        Ok(())
    }

    fn remove(&self, keys: &[&str]) -> Result<()> {
        let mut map = self.lock();
        for key in keys {
            map.remove(*key);
        }
        Ok(())
    }
}

/// Storage backed by a single JSON object file.
///
/// Every write goes to a temp file in the same directory which is then
/// renamed over `session.json`, so a crash never leaves a half-written
/// snapshot behind.
pub struct FileStorage {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(SESSION_FILE)
    }

    fn load_map(&self) -> Result<HashMap<String, String>> {
        let path = self.path();
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let contents = std::fs::read_to_string(&path).context("Failed to read session file")?;
        if contents.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&contents).context("Failed to parse session file")
    }

    fn store_map(&self, map: &HashMap<String, String>) -> Result<()> {
        let path = self.path();
        if map.is_empty() {
            if path.exists() {
                std::fs::remove_file(&path).context("Failed to remove session file")?;
            }
            return Ok(());
        }

        std::fs::create_dir_all(&self.dir).context("Failed to create session directory")?;
        let contents = serde_json::to_string_pretty(map)?;

        let mut tmp = NamedTempFile::new_in(&self.dir)
            .context("Failed to create temporary session file")?;
        tmp.write_all(contents.as_bytes())
            .context("Failed to write temporary session file")?;
        tmp.as_file()
            .sync_all()
            .context("Failed to sync temporary session file")?;
        tmp.persist(&path)
            .map_err(|e| e.error)
            .context("Failed to replace session file")?;

        debug!(path = %path.display(), keys = map.len(), "Session file written");
        Ok(())
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SessionStorage for FileStorage {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.guard();
        Ok(self.load_map()?.remove(key))
    }

    fn write(&self, entries: &[(&str, &str)]) -> Result<()> {
        let _guard = self.guard();
        let mut map = self.load_map()?;
        for (key, value) in entries {
            map.insert((*key).to_string(), (*value).to_string());
        }
        self.store_map(&map)
    }

    fn remove(&self, keys: &[&str]) -> Result<()> {
        let _guard = self.guard();
        // An unreadable file is dropped entirely rather than kept around.
        let mut map = self.load_map().unwrap_or_default();
        for key in keys {
            map.remove(*key);
        }
        if map.is_empty() {
            let path = self.path();
            if path.exists() {
                std::fs::remove_file(&path).context("Failed to remove session file")?;
            }
            return Ok(());
        }
        self.store_map(&map)
    }
}
