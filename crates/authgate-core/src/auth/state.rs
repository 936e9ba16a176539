//! Session state and its pure transitions.
//!
//! Nothing here touches storage or subscribers; `SessionStore` wraps these
//! transitions with persistence and change notification.

use serde::{Deserialize, Serialize};

use crate::models::{Credentials, User, UserUpdate};

/// Current authentication state.
///
/// `is_authenticated` is true exactly when `access_token` is present, and
/// `user` is only present while authenticated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub user: Option<User>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub is_authenticated: bool,
    pub is_loading: bool,
}

impl SessionState {
    /// Rebuild an authenticated state from persisted parts.
    pub(crate) fn restored(access_token: String, refresh_token: Option<String>, user: Option<User>) -> Self {
        Self {
            user,
            access_token: Some(access_token),
            refresh_token,
            is_authenticated: true,
            is_loading: false,
        }
    }

    pub fn set_credentials(&mut self, credentials: Credentials, user: User) {
        self.user = Some(user);
        self.access_token = Some(credentials.access_token);
        self.refresh_token = Some(credentials.refresh_token);
        self.is_authenticated = true;
        self.is_loading = false;
    }

    /// Merge a partial user. Returns false when there is no user to merge into.
    pub fn update_user(&mut self, update: &UserUpdate) -> bool {
        match self.user {
            Some(ref mut user) => {
                user.apply(update);
                true
            }
            None => false,
        }
    }

    /// Replace the user wholesale. Returns false when not authenticated.
    pub fn replace_user(&mut self, user: User) -> bool {
        if !self.is_authenticated {
            return false;
        }
        self.user = Some(user);
        true
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn set_loading(&mut self, loading: bool) {
        self.is_loading = loading;
    }
}
