//! Request and response bodies for the `/auth/*` endpoints.

use serde::{Deserialize, Serialize};

use super::User;

/// Access/refresh token pair. Both values are opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
}

/// Success body of login, register and refresh.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub user: User,
    #[serde(rename = "accessToken", alias = "token")]
    pub access_token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
}

impl AuthResponse {
    /// Split into the credential pair and the user.
    pub fn into_parts(self) -> (Credentials, User) {
        (
            Credentials {
                access_token: self.access_token,
                refresh_token: self.refresh_token,
            },
            self.user,
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(rename = "rememberMe", skip_serializing_if = "Option::is_none")]
    pub remember_me: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(rename = "confirmPassword")]
    pub confirm_password: String,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct RefreshRequest<'a> {
    #[serde(rename = "refreshToken")]
    pub refresh_token: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ForgotPasswordRequest<'a> {
    pub email: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ResetPasswordRequest<'a> {
    pub token: &'a str,
    pub password: &'a str,
}

/// Generic `{message}` body returned by logout and the password endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}
