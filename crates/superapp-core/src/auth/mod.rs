//! Authentication module for managing the user session and credentials.
//!
//! This module provides:
//! - `SessionManager`: the session state machine (load, sign up, sign in, sign out)
//! - `SessionState` / `User`: the observable session snapshot
//! - `StoredCredential`: the persisted, hashed login record
//! - `SignUpForm` / `SignInForm`: input checks run before an operation is issued
//!
//! The session is persisted under two store keys, `user` and `credentials`.

pub mod credentials;
pub mod error;
pub mod session;
pub mod state;
pub mod validate;

pub use credentials::StoredCredential;
pub use error::AuthError;
pub use session::{SessionManager, DEFAULT_STORE_TIMEOUT};
pub use state::{SessionState, User};
pub use validate::{SignInForm, SignUpForm, MIN_PASSWORD_LEN};

/// Store key holding the JSON-serialized signed-in `User`.
pub const USER_KEY: &str = "user";

/// Store key holding the JSON-serialized `StoredCredential`.
pub const CREDENTIALS_KEY: &str = "credentials";
