//! Authenticated request execution with refresh-and-retry.
//!
//! `CredentialGateway` attaches the current bearer token to each request.
//! When the service answers 401 it exchanges the refresh token for a new
//! pair, stores it, and replays the original request once. If the refresh
//! fails the session is cleared and the caller gets the original 401.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::error::{ApiError, TransportError};
use super::transport::{ApiResponse, Transport, TransportRequest};
use crate::auth::SessionStore;
use crate::models::{AuthResponse, RefreshRequest, User};

// ============================================================================
// Endpoints
// ============================================================================

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";
pub const LOGOUT_PATH: &str = "/auth/logout";
pub const PROFILE_PATH: &str = "/auth/profile";
pub const FORGOT_PASSWORD_PATH: &str = "/auth/forgot-password";
pub const RESET_PASSWORD_PATH: &str = "/auth/reset-password";
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Endpoints that carry their own credentials in the body and never get a
/// bearer header.
const SELF_AUTHENTICATED_PATHS: [&str; 3] = [LOGIN_PATH, REGISTER_PATH, REFRESH_PATH];

/// Upper bound on a single refresh call, in seconds.
pub const REFRESH_TIMEOUT_SECS: u64 = 10;

/// A request relative to the service base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<String>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    /// Attach a JSON body.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        self.body = Some(serde_json::to_string(body)?);
        Ok(self)
    }

    fn carries_own_credentials(&self) -> bool {
        SELF_AUTHENTICATED_PATHS.contains(&self.path.as_str())
    }
}

pub struct CredentialGateway {
    transport: Arc<dyn Transport>,
    store: Arc<SessionStore>,
    base_url: String,
    refresh_timeout: Duration,
    refresh_lock: Mutex<()>,
}

impl CredentialGateway {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<SessionStore>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            store,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            refresh_timeout: Duration::from_secs(REFRESH_TIMEOUT_SECS),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send `request` with the current access token, refreshing and retrying
    /// once on 401.
    ///
    /// Any non-401 response is returned as-is, whatever its status. A
    /// transport failure is an `Err`.
    pub async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let sent_token = self.store.access_token();
        let response = self.dispatch(request, sent_token.as_deref()).await?;

        if response.status != StatusCode::UNAUTHORIZED || request.carries_own_credentials() {
            return Ok(response);
        }

        debug!(path = %request.path, "Access token rejected, attempting refresh");
        match self.recover(sent_token.as_deref()).await {
            Some(token) => {
                let retried = self.dispatch(request, Some(&token)).await?;
                debug!(path = %request.path, status = %retried.status, "Retried request after refresh");
                Ok(retried)
            }
            None => Ok(response),
        }
    }

    /// Exchange the stored refresh token for a new pair right now.
    ///
    /// Clears the session on any failure.
    pub async fn refresh_credentials(&self) -> Result<User, ApiError> {
        let _refreshing = self.refresh_lock.lock().await;
        match self.store.refresh_token() {
            Some(refresh_token) => self.refresh_locked(&refresh_token).await,
            None => {
                warn!("No refresh token available, clearing session");
                self.store.clear();
                Err(ApiError::Unauthorized)
            }
        }
    }

    /// Get a usable access token after `stale` was rejected, or None if the
    /// session could not be recovered.
    async fn recover(&self, stale: Option<&str>) -> Option<String> {
        let _refreshing = self.refresh_lock.lock().await;

        // Another request may have rotated the tokens while we waited
        if let Some(current) = self.store.access_token() {
            if stale != Some(current.as_str()) {
                debug!("Credentials already refreshed by a concurrent request");
                return Some(current);
            }
        }

        let Some(refresh_token) = self.store.refresh_token() else {
            warn!("No refresh token available, clearing session");
            self.store.clear();
            return None;
        };

        match self.refresh_locked(&refresh_token).await {
            Ok(_) => self.store.access_token(),
            Err(_) => None,
        }
    }

    /// Run the refresh call and apply its outcome. Caller holds `refresh_lock`.
    async fn refresh_locked(&self, refresh_token: &str) -> Result<User, ApiError> {
        let outcome = match tokio::time::timeout(self.refresh_timeout, self.request_refresh(refresh_token)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.refresh_timeout).into()),
        };

        match outcome {
            Ok(auth) => {
                let (credentials, user) = auth.into_parts();
                self.store.set_credentials(credentials, user.clone());
                info!(user_id = %user.id, "Session refreshed");
                Ok(user)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, clearing session");
                self.store.clear();
                Err(e)
            }
        }
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<AuthResponse, ApiError> {
        let request = ApiRequest::post(REFRESH_PATH).json(&RefreshRequest { refresh_token })?;
        self.dispatch(&request, None).await?.json()
    }

    async fn dispatch(&self, request: &ApiRequest, token: Option<&str>) -> Result<ApiResponse, ApiError> {
        let outbound = TransportRequest {
            method: request.method.clone(),
            url: format!("{}{}", self.base_url, request.path),
            headers: self.headers(request, token)?,
            body: request.body.clone(),
        };
        Ok(self.transport.send(outbound).await?)
    }

    fn headers(&self, request: &ApiRequest, token: Option<&str>) -> Result<HeaderMap, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = token.filter(|_| !request.carries_own_credentials()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{auth_json, bearer, path_of, user_json, MockTransport, Reply, BASE_URL};
    use crate::auth::{MemoryStorage, SessionState};
    use crate::models::Credentials;

    fn signed_in(access: &str, refresh: &str) -> (MemoryStorage, Arc<SessionStore>) {
        let storage = MemoryStorage::new();
        let store = Arc::new(SessionStore::open(Arc::new(storage.clone())));
        store.set_credentials(
            Credentials {
                access_token: access.to_string(),
                refresh_token: refresh.to_string(),
            },
            serde_json::from_str(&user_json("u-1", "Ada")).unwrap(),
        );
        (storage, store)
    }

    fn gateway(transport: Arc<MockTransport>, store: Arc<SessionStore>) -> CredentialGateway {
        CredentialGateway::new(transport, store, BASE_URL)
    }

    /// Profile succeeds only with `at-new`; refresh answers with `refresh_reply`.
    fn expiring_profile(refresh_reply: fn() -> Reply) -> Arc<MockTransport> {
        MockTransport::new(move |req| match path_of(req) {
            REFRESH_PATH => refresh_reply(),
            PROFILE_PATH if bearer(req) == Some("Bearer at-new") => Reply::ok(user_json("u-1", "Ada")),
            PROFILE_PATH => Reply::status(401, "token expired"),
            other => panic!("unexpected request to {}", other),
        })
    }

    #[tokio::test]
    async fn test_single_refresh_retry() {
        let (storage, store) = signed_in("at-old", "rt-old");
        let transport = expiring_profile(|| Reply::ok(auth_json("at-new", "rt-new")));
        let gateway = gateway(transport.clone(), store.clone());

        let response = gateway.execute(&ApiRequest::get(PROFILE_PATH)).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(transport.count(Method::GET, PROFILE_PATH), 2);
        assert_eq!(transport.count(Method::POST, REFRESH_PATH), 1);
        assert_eq!(store.access_token().as_deref(), Some("at-new"));
        assert_eq!(store.refresh_token().as_deref(), Some("rt-new"));
        assert_eq!(storage.entries()["token"], "at-new");
        assert_eq!(storage.entries()["refreshToken"], "rt-new");

        let calls = transport.calls();
        assert_eq!(bearer(&calls[0]), Some("Bearer at-old"));
        let refresh = &calls[1];
        assert_eq!(bearer(refresh), None);
        assert_eq!(refresh.body.as_deref(), Some(r#"{"refreshToken":"rt-old"}"#));
        assert_eq!(bearer(&calls[2]), Some("Bearer at-new"));
    }

    #[tokio::test]
    async fn test_refresh_failure_clears_session() {
        let (storage, store) = signed_in("at-old", "rt-old");
        let transport = expiring_profile(|| Reply::status(403, "refresh token revoked"));
        let gateway = gateway(transport.clone(), store.clone());

        let response = gateway.execute(&ApiRequest::get(PROFILE_PATH)).await.unwrap();

        assert_eq!(response, ApiResponse::new(StatusCode::UNAUTHORIZED, "token expired"));
        assert_eq!(transport.count(Method::GET, PROFILE_PATH), 1);
        assert_eq!(store.state(), SessionState::default());
        assert!(storage.entries().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_refresh_body_is_failure() {
        let (_storage, store) = signed_in("at-old", "rt-old");
        let transport = expiring_profile(|| Reply::ok(r#"{"accessToken":"at-new"}"#));
        let gateway = gateway(transport.clone(), store.clone());

        let response = gateway.execute(&ApiRequest::get(PROFILE_PATH)).await.unwrap();

        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn test_refresh_transport_error_is_failure() {
        let (_storage, store) = signed_in("at-old", "rt-old");
        let transport = expiring_profile(|| Reply::Fail);
        let gateway = gateway(transport.clone(), store.clone());

        let response = gateway.execute(&ApiRequest::get(PROFILE_PATH)).await.unwrap();

        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert!(!store.is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_timeout_is_failure() {
        let (_storage, store) = signed_in("at-old", "rt-old");
        let transport = expiring_profile(|| {
            Reply::Delayed(Duration::from_secs(120), StatusCode::OK, auth_json("at-new", "rt-new"))
        });
        let gateway = gateway(transport.clone(), store.clone()).with_refresh_timeout(Duration::from_secs(5));

        let response = gateway.execute(&ApiRequest::get(PROFILE_PATH)).await.unwrap();

        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(transport.count(Method::GET, PROFILE_PATH), 1);
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn test_non_401_errors_pass_through() {
        let (_storage, store) = signed_in("at-old", "rt-old");
        let transport = MockTransport::new(|_| Reply::status(500, "boom"));
        let gateway = gateway(transport.clone(), store.clone());

        let response = gateway.execute(&ApiRequest::get(PROFILE_PATH)).await.unwrap();

        assert_eq!(response, ApiResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "boom"));
        assert_eq!(transport.count(Method::POST, REFRESH_PATH), 0);
        assert_eq!(store.access_token().as_deref(), Some("at-old"));
    }

    #[tokio::test]
    async fn test_missing_refresh_token_skips_refresh() {
        let storage = MemoryStorage::new();
        storage.insert("token", "at-old");
        let store = Arc::new(SessionStore::open(Arc::new(storage.clone())));
        let transport = expiring_profile(|| Reply::ok(auth_json("at-new", "rt-new")));
        let gateway = gateway(transport.clone(), store.clone());

        let response = gateway.execute(&ApiRequest::get(PROFILE_PATH)).await.unwrap();

        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(transport.count(Method::POST, REFRESH_PATH), 0);
        assert!(!store.is_authenticated());
        assert!(storage.entries().is_empty());
    }

    #[tokio::test]
    async fn test_retry_is_not_recursive() {
        let (_storage, store) = signed_in("at-old", "rt-old");
        let transport = MockTransport::new(|req| match path_of(req) {
            REFRESH_PATH => Reply::ok(auth_json("at-new", "rt-new")),
            _ => Reply::status(401, "still no"),
        });
        let gateway = gateway(transport.clone(), store.clone());

        let response = gateway.execute(&ApiRequest::get(PROFILE_PATH)).await.unwrap();

        assert_eq!(response, ApiResponse::new(StatusCode::UNAUTHORIZED, "still no"));
        assert_eq!(transport.count(Method::GET, PROFILE_PATH), 2);
        assert_eq!(transport.count(Method::POST, REFRESH_PATH), 1);
        // The refresh itself worked, so the new credentials stay
        assert_eq!(store.access_token().as_deref(), Some("at-new"));
    }

    #[tokio::test]
    async fn test_transport_error_is_returned() {
        let (_storage, store) = signed_in("at-old", "rt-old");
        let transport = MockTransport::new(|_| Reply::Fail);
        let gateway = gateway(transport.clone(), store.clone());

        let err = gateway.execute(&ApiRequest::get(PROFILE_PATH)).await.unwrap_err();

        assert!(err.is_transport());
        assert!(store.is_authenticated());
    }

    #[tokio::test]
    async fn test_self_authenticated_endpoints_skip_bearer_and_refresh() {
        let (_storage, store) = signed_in("at-old", "rt-old");
        let transport = MockTransport::new(|_| Reply::status(401, "bad password"));
        let gateway = gateway(transport.clone(), store.clone());

        let request = ApiRequest::post(LOGIN_PATH)
            .json(&serde_json::json!({"email": "a@b.co", "password": "nope"}))
            .unwrap();
        let response = gateway.execute(&request).await.unwrap();

        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(bearer(&calls[0]), None);
        assert_eq!(calls[0].headers[header::CONTENT_TYPE], "application/json");
        assert!(store.is_authenticated());
    }

    #[tokio::test]
    async fn test_unauthenticated_request_has_no_bearer() {
        let store = Arc::new(SessionStore::open(Arc::new(MemoryStorage::new())));
        let transport = MockTransport::new(|_| Reply::ok(r#"{"message":"sent"}"#));
        let gateway = gateway(transport.clone(), store);

        gateway.execute(&ApiRequest::post(FORGOT_PASSWORD_PATH)).await.unwrap();

        assert_eq!(bearer(&transport.calls()[0]), None);
        assert_eq!(transport.calls()[0].url, format!("{}{}", BASE_URL, FORGOT_PASSWORD_PATH));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_401s_share_one_refresh() {
        let (_storage, store) = signed_in("at-old", "rt-old");
        let transport = expiring_profile(|| {
            Reply::Delayed(Duration::from_millis(50), StatusCode::OK, auth_json("at-new", "rt-new"))
        });
        let gateway = gateway(transport.clone(), store.clone());

        let request = ApiRequest::get(PROFILE_PATH);
        let results = futures::future::join_all((0..3).map(|_| gateway.execute(&request))).await;

        for result in results {
            assert_eq!(result.unwrap().status, StatusCode::OK);
        }
        assert_eq!(transport.count(Method::POST, REFRESH_PATH), 1);
        assert_eq!(store.access_token().as_deref(), Some("at-new"));
    }

    #[tokio::test]
    async fn test_explicit_refresh() {
        let (_storage, store) = signed_in("at-old", "rt-old");
        let transport = expiring_profile(|| Reply::ok(auth_json("at-new", "rt-new")));
        let gateway = gateway(transport.clone(), store.clone());

        let user = gateway.refresh_credentials().await.unwrap();
        assert_eq!(user.id, "u-1");
        assert_eq!(store.refresh_token().as_deref(), Some("rt-new"));
    }

    #[tokio::test]
    async fn test_explicit_refresh_failure_clears() {
        let (_storage, store) = signed_in("at-old", "rt-old");
        let transport = expiring_profile(|| Reply::status(401, "expired"));
        let gateway = gateway(transport.clone(), store.clone());

        let err = gateway.refresh_credentials().await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        assert!(!store.is_authenticated());

        // Nothing left to refresh with
        let err = gateway.refresh_credentials().await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        assert_eq!(transport.count(Method::POST, REFRESH_PATH), 1);
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let store = Arc::new(SessionStore::open(Arc::new(MemoryStorage::new())));
        let transport = MockTransport::new(|_| Reply::Fail);
        let gateway = CredentialGateway::new(transport, store, "http://auth.test/api/");
        assert_eq!(gateway.base_url(), "http://auth.test/api");
    }
}
