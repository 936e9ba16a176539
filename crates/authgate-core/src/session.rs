//! Application-facing session API.
//!
//! `AuthSession` is what application code talks to: it reads the current
//! session, and runs login, logout and profile calls through the
//! `CredentialGateway`, applying successful results to the `SessionStore`.
//! Failures are returned unchanged and leave the local session alone, except
//! for logout, which always clears the local session.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::api::gateway::{
    FORGOT_PASSWORD_PATH, LOGIN_PATH, LOGOUT_PATH, PROFILE_PATH, REGISTER_PATH,
    RESET_PASSWORD_PATH,
};
use crate::api::{ApiError, ApiRequest, CredentialGateway, ReqwestTransport, Transport};
use crate::auth::{
    FileStorage, KeyringStorage, MemoryStorage, SessionState, SessionStorage, SessionStore,
};
use crate::config::{Config, StorageBackend};
use crate::models::{
    AuthResponse, ForgotPasswordRequest, LoginRequest, MessageResponse, RegisterRequest,
    ResetPasswordRequest, User, UserUpdate,
};

pub struct AuthSession {
    gateway: CredentialGateway,
}

impl AuthSession {
    pub fn new(
        transport: Arc<dyn Transport>,
        storage: Arc<dyn SessionStorage>,
        base_url: impl Into<String>,
    ) -> Self {
        let store = Arc::new(SessionStore::open(storage));
        Self::from_gateway(CredentialGateway::new(transport, store, base_url))
    }

    pub fn from_gateway(gateway: CredentialGateway) -> Self {
        Self { gateway }
    }

    /// Wire a `reqwest` transport and the configured storage backend.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let transport = ReqwestTransport::with_timeout(config.request_timeout())
            .context("Failed to build HTTP client")?;

        let storage: Arc<dyn SessionStorage> = match config.storage {
            StorageBackend::File => Arc::new(FileStorage::new(config.session_dir()?)),
            StorageBackend::Keyring => Arc::new(KeyringStorage::default()),
            StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        };
        debug!(backend = ?config.storage, base_url = %config.api_base_url, "Session configured");

        let store = Arc::new(SessionStore::open(storage));
        let gateway = CredentialGateway::new(Arc::new(transport), store, &config.api_base_url)
            .with_refresh_timeout(config.refresh_timeout());
        Ok(Self::from_gateway(gateway))
    }

    pub fn gateway(&self) -> &CredentialGateway {
        &self.gateway
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        self.gateway.store()
    }

    // ===== Read-only projection =====

    pub fn state(&self) -> SessionState {
        self.store().state()
    }

    pub fn user(&self) -> Option<User> {
        self.store().user()
    }

    pub fn access_token(&self) -> Option<String> {
        self.store().access_token()
    }

    pub fn is_authenticated(&self) -> bool {
        self.store().is_authenticated()
    }

    pub fn is_loading(&self) -> bool {
        self.store().is_loading()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.store().subscribe()
    }

    // ===== Authentication =====

    pub async fn login(&self, credentials: &LoginRequest) -> Result<User, ApiError> {
        let request = ApiRequest::post(LOGIN_PATH).json(credentials)?;
        let user = self.authenticate(&request).await?;
        info!(user_id = %user.id, "Login successful");
        Ok(user)
    }

    pub async fn register(&self, details: &RegisterRequest) -> Result<User, ApiError> {
        let request = ApiRequest::post(REGISTER_PATH).json(details)?;
        let user = self.authenticate(&request).await?;
        info!(user_id = %user.id, "Registration successful");
        Ok(user)
    }

    /// End the session. The local session is cleared no matter how the
    /// remote call ends, including when this future is dropped early; the
    /// remote result is returned for diagnostics only.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let _teardown = scopeguard::guard(Arc::clone(self.store()), |store| {
            store.clear();
            info!("Logged out");
        });

        let result = match self.gateway.execute(&ApiRequest::post(LOGOUT_PATH)).await {
            Ok(response) => response.error_for_status().map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(ref e) = result {
            error!(error = %e, "Logout failed");
        }
        result
    }

    /// Exchange the refresh token for a new pair now rather than on the next 401.
    pub async fn refresh(&self) -> Result<User, ApiError> {
        self.gateway.refresh_credentials().await
    }

    // ===== Profile =====

    /// Fetch the profile and replace the local user with it.
    pub async fn fetch_profile(&self) -> Result<User, ApiError> {
        let user: User = self.gateway.execute(&ApiRequest::get(PROFILE_PATH)).await?.json()?;
        self.store().replace_user(user.clone());
        Ok(user)
    }

    /// Send a partial update; the returned profile replaces the local user.
    /// An empty update sends no PATCH and re-reads the profile instead.
    pub async fn update_profile(&self, update: &UserUpdate) -> Result<User, ApiError> {
        if update.is_empty() {
            debug!("Empty profile update, fetching profile instead");
            return self.fetch_profile().await;
        }
        let request = ApiRequest::patch(PROFILE_PATH).json(update)?;
        let user: User = self.gateway.execute(&request).await?.json()?;
        self.store().replace_user(user.clone());
        Ok(user)
    }

    // ===== Password reset =====

    pub async fn forgot_password(&self, email: &str) -> Result<String, ApiError> {
        let request = ApiRequest::post(FORGOT_PASSWORD_PATH).json(&ForgotPasswordRequest { email })?;
        let response: MessageResponse = self.gateway.execute(&request).await?.json()?;
        Ok(response.message)
    }

    pub async fn reset_password(&self, token: &str, password: &str) -> Result<String, ApiError> {
        let request =
            ApiRequest::post(RESET_PASSWORD_PATH).json(&ResetPasswordRequest { token, password })?;
        let response: MessageResponse = self.gateway.execute(&request).await?.json()?;
        Ok(response.message)
    }

    /// Run a login-style request and store the returned credentials.
    async fn authenticate(&self, request: &ApiRequest) -> Result<User, ApiError> {
        let store = self.store();
        store.set_loading(true);
        let _loading = scopeguard::guard(Arc::clone(store), |store| {
            store.set_loading(false);
        });

        let auth: AuthResponse = self.gateway.execute(request).await?.json()?;
        let (credentials, user) = auth.into_parts();
        store.set_credentials(credentials, user.clone());
        Ok(user)
    }
}
