use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::state::SessionState;
use super::storage::SessionStorage;
use crate::models::{Credentials, User, UserUpdate};

/// Storage key for the access token
pub const TOKEN_KEY: &str = "token";

/// Storage key for the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Storage key for the JSON-encoded user
pub const USER_KEY: &str = "user";

const SNAPSHOT_KEYS: [&str; 3] = [TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY];

/// Holds the session state and keeps its durable snapshot in sync.
///
/// Mutations are synchronous. Each one that touches tokens or the user
/// rewrites the snapshot before returning; storage failures are logged and
/// never roll back the in-memory state. Subscribers get every new state
/// through a `watch` channel.
pub struct SessionStore {
    storage: Arc<dyn SessionStorage>,
    state: watch::Sender<SessionState>,
    writes: Mutex<()>,
}

impl SessionStore {
    /// Create a store rehydrated from `storage`.
    pub fn open(storage: Arc<dyn SessionStorage>) -> Self {
        let initial = Self::load(storage.as_ref());
        debug!(authenticated = initial.is_authenticated, "Session store opened");
        let (state, _) = watch::channel(initial);
        Self {
            storage,
            state,
            writes: Mutex::new(()),
        }
    }

    /// Read the persisted snapshot. A snapshot that can't be read or decoded
    /// is deleted and the unauthenticated state returned instead.
    pub fn load(storage: &dyn SessionStorage) -> SessionState {
        match Self::read_snapshot(storage) {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Discarding corrupt session snapshot");
                Self::discard(storage);
                SessionState::default()
            }
        }
    }

    fn read_snapshot(storage: &dyn SessionStorage) -> Result<SessionState> {
        let token = storage.read(TOKEN_KEY)?.filter(|t| !t.is_empty());
        let refresh_token = storage.read(REFRESH_TOKEN_KEY)?.filter(|t| !t.is_empty());
        let user = match storage.read(USER_KEY)? {
            Some(raw) => serde_json::from_str::<Option<User>>(&raw)
                .context("Failed to parse stored user")?,
            None => None,
        };

        match token {
            Some(token) => Ok(SessionState::restored(token, refresh_token, user)),
            None => {
                if refresh_token.is_some() || user.is_some() {
                    debug!("Dropping session snapshot without an access token");
                    Self::discard(storage);
                }
                Ok(SessionState::default())
            }
        }
    }

    fn discard(storage: &dyn SessionStorage) {
        if let Err(e) = storage.remove(&SNAPSHOT_KEYS) {
            warn!(error = %e, "Failed to remove session snapshot");
        }
    }

    // ===== Mutations =====

    pub fn set_credentials(&self, credentials: Credentials, user: User) -> SessionState {
        let _writes = self.lock_writes();
        self.state.send_modify(|state| state.set_credentials(credentials, user));
        let state = self.state();
        self.persist(&state);
        debug!(user_id = ?state.user.as_ref().map(|u| &u.id), "Credentials stored");
        state
    }

    /// Merge `update` into the current user; no-op without a user.
    pub fn update_user(&self, update: &UserUpdate) -> SessionState {
        let _writes = self.lock_writes();
        if self.state.send_if_modified(|state| state.update_user(update)) {
            let state = self.state();
            self.persist(&state);
            return state;
        }
        self.state()
    }

    /// Replace the current user with a server copy; no-op when not authenticated.
    pub fn replace_user(&self, user: User) -> SessionState {
        let _writes = self.lock_writes();
        if self.state.send_if_modified(|state| state.replace_user(user)) {
            let state = self.state();
            self.persist(&state);
            return state;
        }
        self.state()
    }

    /// Reset to the unauthenticated state and delete the snapshot.
    pub fn clear(&self) -> SessionState {
        let _writes = self.lock_writes();
        self.state.send_if_modified(|state| {
            let changed = *state != SessionState::default();
            state.clear();
            changed
        });
        Self::discard(self.storage.as_ref());
        debug!("Session cleared");
        self.state()
    }

    /// Toggle the loading hint. Never persisted.
    pub fn set_loading(&self, loading: bool) -> SessionState {
        self.state.send_if_modified(|state| {
            let changed = state.is_loading != loading;
            state.set_loading(loading);
            changed
        });
        self.state()
    }

    // ===== Accessors =====

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn access_token(&self) -> Option<String> {
        self.state.borrow().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.state.borrow().refresh_token.clone()
    }

    pub fn user(&self) -> Option<User> {
        self.state.borrow().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, state: &SessionState) {
        if let Err(e) = Self::write_snapshot(self.storage.as_ref(), state) {
            warn!(error = %e, "Failed to persist session snapshot");
        }
    }

    fn write_snapshot(storage: &dyn SessionStorage, state: &SessionState) -> Result<()> {
        let user = state
            .user
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to encode user")?;

        let mut entries = Vec::with_capacity(SNAPSHOT_KEYS.len());
        if let Some(ref token) = state.access_token {
            entries.push((TOKEN_KEY, token.as_str()));
        }
        if let Some(ref refresh_token) = state.refresh_token {
            entries.push((REFRESH_TOKEN_KEY, refresh_token.as_str()));
        }
        if let Some(ref user) = user {
            entries.push((USER_KEY, user.as_str()));
        }
        storage.write(&entries)
    }
}
