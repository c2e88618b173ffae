use serde::{Deserialize, Serialize};
use std::fmt;

pub const GUEST_USER: &str = "Guest";
pub const ADMINISTRATOR: &str = "Administrator";

/// Newtype for user identifiers (usually an email address)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn guest() -> Self {
        Self(GUEST_USER.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The user a request is executed on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub user_id: UserId,
    pub roles: Vec<String>,
}

impl SessionUser {
    pub fn new(user_id: impl Into<UserId>, roles: Vec<String>) -> Self {
        Self {
            user_id: user_id.into(),
            roles,
        }
    }

    pub fn guest() -> Self {
        Self {
            user_id: UserId::guest(),
            roles: vec![GUEST_USER.to_string()],
        }
    }

    pub fn administrator() -> Self {
        Self {
            user_id: UserId::new(ADMINISTRATOR),
            roles: vec![ADMINISTRATOR.to_string()],
        }
    }

    pub fn is_guest(&self) -> bool {
        self.user_id.as_str() == GUEST_USER
    }

    pub fn is_administrator(&self) -> bool {
        self.user_id.as_str() == ADMINISTRATOR
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn has_any_role(&self, roles: &[String]) -> bool {
        roles.iter().any(|r| self.has_role(r))
    }
}

impl Default for SessionUser {
    fn default() -> Self {
        Self::guest()
    }
}
