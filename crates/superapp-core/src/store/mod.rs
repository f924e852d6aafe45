//! Key-value persistence for the session.
//!
//! The session core only needs three asynchronous calls: `get`, `set` and
//! `remove` over string keys and string (JSON) values. Backends:
//!
//! - `FileStore`: one JSON file per key in the app data directory
//! - `KeyringStore`: one OS keychain entry per key
//! - `MemoryStore`: process-local map, used by tests and ephemeral sessions

pub mod file;
pub mod keychain;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use file::FileStore;
pub use keychain::KeyringStore;
pub use memory::MemoryStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Keychain error: {0}")]
    Keychain(#[from] keyring::Error),

    #[error("Invalid store key: {0:?}")]
    InvalidKey(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value. A key that was never set (or was removed) is `Ok(None)`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete a value. Removing a missing key succeeds.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Keys become file names and keychain accounts, so keep them to a safe alphabet.
pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}
