//! Input checks for the sign-up and sign-in forms.
//!
//! These run in the front-end before an operation is issued; the session
//! manager itself accepts whatever it is given.

use std::sync::LazyLock;

use regex::Regex;

use super::AuthError;

/// Shortest password the sign-up form accepts.
pub const MIN_PASSWORD_LEN: usize = 6;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap_or_else(|e| panic!("email regex: {e}"))
});

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

#[derive(Debug, Clone, Default)]
pub struct SignUpForm {
    pub email: String,
    pub username: String,
    pub password: String,
    pub confirm_password: String,
}

impl SignUpForm {
    pub fn validate(&self) -> Result<(), AuthError> {
        let fields = [
            &self.email,
            &self.username,
            &self.password,
            &self.confirm_password,
        ];
        if fields.iter().any(|f| f.is_empty()) {
            return Err(AuthError::Validation("Please fill in all fields".to_string()));
        }
        if !is_valid_email(&self.email) {
            return Err(AuthError::Validation(
                "Please enter a valid email address".to_string(),
            ));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        if self.password != self.confirm_password {
            return Err(AuthError::Validation("Passwords do not match".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SignInForm {
    pub email: String,
    pub password: String,
}

impl SignInForm {
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.email.is_empty() || self.password.is_empty() {
            return Err(AuthError::Validation(
                "Email and password are required".to_string(),
            ));
        }
        Ok(())
    }
}
