use std::time::Duration;

use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Failed to read {key}: {source}")]
    StoreRead {
        key: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("Failed to write {key}: {source}")]
    StoreWrite {
        key: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("{0}")]
    NotFound(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Malformed {key} record: {source}")]
    Parse {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Storage did not respond within {}s ({key})", .after.as_secs())]
    Timeout { key: &'static str, after: Duration },

    #[error("Failed to hash password")]
    Hash,

    #[error("{0}")]
    Validation(String),
}

impl AuthError {
    /// No credential record exists: nobody has signed up on this device.
    pub fn no_account() -> Self {
        AuthError::NotFound("No account found".to_string())
    }

    /// Credentials matched but the user record is gone.
    pub fn no_user_data() -> Self {
        AuthError::NotFound("User data not found".to_string())
    }

    /// True for failures of the backing store rather than of the user's input.
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            AuthError::StoreRead { .. }
                | AuthError::StoreWrite { .. }
                | AuthError::Parse { .. }
                | AuthError::Timeout { .. }
        )
    }
}
