//! Session snapshot types shared with front-ends.
//!
//! Both types serialize with camelCase keys. `User` is also the on-disk shape
//! of the `user` store key.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// A registered account on this device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub username: String,
    /// Milliseconds since the Unix epoch on disk.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    #[cfg_attr(feature = "ts", ts(type = "number"))]
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a user with a fresh random id, stamped with the current time.
    pub fn new(email: &str, username: &str) -> Self {
        Self {
            id: generate_user_id(),
            email: email.to_string(),
            username: username.to_string(),
            // Millisecond precision so the record survives a store round trip unchanged
            created_at: Utc::now().trunc_subsecs(3),
        }
    }
}

/// 128 random bits rendered as 32 lowercase hex characters.
fn generate_user_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

/// The observable session.
///
/// Fields are private so `is_authenticated` can only ever mirror whether a
/// user is present. New states are produced by the transition methods, which
/// the `SessionManager` is the only caller of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    user: Option<User>,
    is_authenticated: bool,
    is_loading: bool,
    error: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::loading()
    }
}

impl SessionState {
    /// Process start: nothing is known until the stored session is read.
    pub fn loading() -> Self {
        Self {
            user: None,
            is_authenticated: false,
            is_loading: true,
            error: None,
        }
    }

    pub fn authenticated(user: User) -> Self {
        Self {
            user: Some(user),
            is_authenticated: true,
            is_loading: false,
            error: None,
        }
    }

    pub fn unauthenticated() -> Self {
        Self {
            user: None,
            is_authenticated: false,
            is_loading: false,
            error: None,
        }
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// An operation started. `clear_error` drops a message left by a previous failure.
    pub(crate) fn begin(&self, clear_error: bool) -> Self {
        Self {
            is_loading: true,
            error: if clear_error { None } else { self.error.clone() },
            ..self.clone()
        }
    }

    /// An operation failed; whoever was signed in stays signed in.
    pub(crate) fn failed(&self, message: impl Into<String>) -> Self {
        Self {
            is_loading: false,
            error: Some(message.into()),
            ..self.clone()
        }
    }

    /// Signed out with a message explaining what went wrong on the way.
    pub(crate) fn unauthenticated_with_error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::unauthenticated()
        }
    }
}
