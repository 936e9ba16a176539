use anyhow::{Context, Result};
use keyring::Entry;
use tracing::warn;

use super::storage::SessionStorage;

/// Default keychain service name for session entries
pub const DEFAULT_SERVICE_NAME: &str = "authgate";

/// Per-key secret slots. Missing entries read as `None` and delete cleanly.
trait Keychain: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn delete(&self, key: &str) -> Result<()>;
}

/// The platform credential store, one `keyring::Entry` per key.
struct OsKeychain {
    service: String,
}

impl OsKeychain {
    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, key).context("Failed to create keyring entry")
    }
}

impl Keychain for OsKeychain {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve value from keychain"),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?
            .set_password(value)
            .context("Failed to store value in keychain")
    }

    fn delete(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete credential from keychain"),
        }
    }
}

/// Session storage in the OS keychain, one entry per snapshot key.
pub struct KeyringStorage {
    keychain: Box<dyn Keychain>,
}

impl KeyringStorage {
    pub fn new(service: impl Into<String>) -> Self {
        Self::with_keychain(OsKeychain {
            service: service.into(),
        })
    }

    fn with_keychain(keychain: impl Keychain + 'static) -> Self {
        Self {
            keychain: Box::new(keychain),
        }
    }

    /// Put back the values overwritten so far, newest first.
    fn restore(&self, previous: &[(&str, Option<String>)]) {
        for (key, old) in previous.iter().rev() {
            let restored = match old {
                Some(value) => self.keychain.set(key, value),
                None => self.keychain.delete(key),
            };
            if let Err(e) = restored {
                warn!(key = *key, error = %e, "Failed to roll back keychain entry");
            }
        }
    }
}

impl Default for KeyringStorage {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE_NAME)
    }
}

impl SessionStorage for KeyringStorage {
    fn read(&self, key: &str) -> Result<Option<String>> {
        self.keychain.get(key)
    }

    fn write(&self, entries: &[(&str, &str)]) -> Result<()> {
        // Everything we might overwrite is read before the first set.
        let mut previous = Vec::with_capacity(entries.len());
        for (key, _) in entries {
            previous.push((*key, self.keychain.get(key)?));
        }

        for (done, (key, value)) in entries.iter().enumerate() {
            if let Err(e) = self.keychain.set(key, value) {
                self.restore(&previous[..done]);
                return Err(e);
            }
        }
        Ok(())
    }

    fn remove(&self, keys: &[&str]) -> Result<()> {
        let mut first_error = None;
        for key in keys {
            if let Err(e) = self.keychain.delete(key) {
                warn!(key = *key, error = %e, "Failed to delete keychain entry");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
