use serde::{Deserialize, Serialize};

/// An authenticated account as returned by the auth service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Partial user used for profile updates. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct UserUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl User {
    /// Merge the fields present in `update` into this user.
    pub fn apply(&mut self, update: &UserUpdate) {
        if let Some(ref id) = update.id {
            self.id = id.clone();
        }
        if let Some(ref email) = update.email {
            self.email = email.clone();
        }
        if let Some(ref name) = update.name {
            self.name = name.clone();
        }
        if let Some(ref role) = update.role {
            self.role = role.clone();
        }
        if let Some(ref avatar) = update.avatar {
            self.avatar = Some(avatar.clone());
        }
    }
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.email.is_none()
            && self.name.is_none()
            && self.role.is_none()
            && self.avatar.is_none()
    }
}
