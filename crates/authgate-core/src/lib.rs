//! Client-side session management for a bearer-token auth service.
//!
//! - `auth`: session state, the `SessionStore`, and durable storage backends
//! - `api`: the transport boundary and the `CredentialGateway`, which
//!   attaches credentials and recovers from expired access tokens
//! - `session`: `AuthSession`, the surface application code uses
//! - `config`: configuration loading
//!
//! ```no_run
//! use authgate_core::{AuthSession, Config, LoginRequest};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let session = AuthSession::from_config(&Config::from_env()?)?;
//! if !session.is_authenticated() {
//!     session
//!         .login(&LoginRequest {
//!             email: "ada@example.com".to_string(),
//!             password: "correct horse".to_string(),
//!             remember_me: Some(true),
//!         })
//!         .await?;
//! }
//! let profile = session.fetch_profile().await?;
//! println!("signed in as {}", profile.name);
//! session.logout().await.ok();
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod session;

pub use api::{ApiError, ApiRequest, ApiResponse, CredentialGateway, Transport, TransportError};
pub use auth::{SessionState, SessionStorage, SessionStore};
pub use config::{Config, StorageBackend};
pub use models::{Credentials, LoginRequest, RegisterRequest, User, UserUpdate};
pub use session::AuthSession;
