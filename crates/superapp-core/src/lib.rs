//! SuperApp core library.
//!
//! This crate owns the only durable state of the SuperApp front-end: the
//! authentication session. It provides:
//!
//! - `auth`: the session state machine, user/credential records, form validation
//! - `store`: the key-value persistence layer the session is backed by
//! - `config`: application configuration and data directory resolution
//!
//! Front-ends (the `superapp` CLI, a mobile shell) hold an
//! `Arc<SessionManager>`, restore the stored session at start-up and
//! subscribe to state changes.

pub mod auth;
pub mod config;
pub mod store;

pub use auth::{AuthError, SessionManager, SessionState, User};
pub use config::{Config, StoreBackend};
pub use store::{FileStore, KeyValueStore, KeyringStore, MemoryStore, StoreError};
