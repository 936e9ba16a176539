//! Data models for the auth service.
//!
//! - `User`, `UserUpdate`: account identity and partial profile updates
//! - `Credentials`, `AuthResponse`: token pair and the login/refresh body
//! - Request bodies for the `/auth/*` endpoints

pub mod auth;
pub mod user;

pub(crate) use auth::{ForgotPasswordRequest, RefreshRequest, ResetPasswordRequest};
pub use auth::{AuthResponse, Credentials, LoginRequest, MessageResponse, RegisterRequest};
pub use user::{User, UserUpdate};
