//! The persisted account record.
//!
//! New records hold an Argon2id PHC string plus the account's `User`, so one
//! write creates the whole account. Records written by earlier app versions
//! hold only the email and a plaintext password; they are still accepted and
//! get rewritten in the hashed form after the next successful sign-in.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{AuthError, User};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredCredential {
    Hashed {
        email: String,
        #[serde(rename = "passwordHash")]
        password_hash: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<User>,
    },
    Plaintext {
        email: String,
        password: String,
    },
}

impl StoredCredential {
    /// Build the account record for `user`, hashing `password` with a fresh random salt.
    pub fn hash(argon2: &Argon2<'_>, user: &User, password: &str) -> Result<Self, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|_| AuthError::Hash)?
            .to_string();

        Ok(StoredCredential::Hashed {
            email: user.email.clone(),
            password_hash,
            user: Some(user.clone()),
        })
    }

    pub fn email(&self) -> &str {
        match self {
            StoredCredential::Hashed { email, .. } | StoredCredential::Plaintext { email, .. } => {
                email
            }
        }
    }

    /// The user this account belongs to. Plaintext records predate this and carry none.
    pub fn account_user(&self) -> Option<&User> {
        match self {
            StoredCredential::Hashed { user, .. } => user.as_ref(),
            StoredCredential::Plaintext { .. } => None,
        }
    }

    pub fn is_plaintext(&self) -> bool {
        matches!(self, StoredCredential::Plaintext { .. })
    }

    /// Check a sign-in attempt. Email comparison is exact and case-sensitive.
    pub fn verify(&self, argon2: &Argon2<'_>, email: &str, password: &str) -> bool {
        // Run the password check even on an email mismatch so both paths cost the same
        let password_ok = match self {
            StoredCredential::Hashed { password_hash, .. } => {
                match PasswordHash::new(password_hash) {
                    Ok(parsed) => argon2.verify_password(password.as_bytes(), &parsed).is_ok(),
                    Err(e) => {
                        warn!(error = %e, "Stored password hash is malformed");
                        false
                    }
                }
            }
            StoredCredential::Plaintext { password: stored, .. } => {
                constant_time_eq(stored.as_bytes(), password.as_bytes())
            }
        };

        password_ok && self.email() == email
    }
}

/// Constant-time byte comparison.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
