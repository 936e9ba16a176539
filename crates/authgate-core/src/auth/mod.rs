//! Session state, its store, and durable storage backends.
//!
//! This module provides:
//! - `SessionState`: the authentication state and its pure transitions
//! - `SessionStore`: the state plus its persisted snapshot and subscribers
//! - `SessionStorage`: the persistence boundary, with in-memory, file and
//!   OS keychain backends
//!
//! The snapshot is three string keys: `token`, `refreshToken` and `user`
//! (JSON-encoded).

pub mod credentials;
pub mod state;
pub mod storage;
pub mod store;

pub use credentials::KeyringStorage;
pub use state::SessionState;
pub use storage::{FileStorage, MemoryStorage, SessionStorage};
pub use store::SessionStore;
