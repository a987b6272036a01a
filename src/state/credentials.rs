//! # Credentials
//!
//! Password hashing and policy checks.
//!
//! Hashing uses a random salt, so it runs on the Master before an operation is
//! logged; the log and every replica only ever see the resulting hash.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use super::errors::{ChatError, ChatResult};

/// Password requirements
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_digit_and_uppercase: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 1,
            require_digit_and_uppercase: false,
        }
    }
}

impl PasswordPolicy {
    /// Validate a password against this policy
    pub fn validate(&self, password: &str) -> ChatResult<()> {
        if password.chars().count() < self.min_length.max(1) {
            return Err(ChatError::WeakPassword(format!(
                "Password must be at least {} characters",
                self.min_length.max(1)
            )));
        }

        if self.require_digit_and_uppercase {
            if !password.chars().any(|c| c.is_ascii_digit()) {
                return Err(ChatError::WeakPassword(
                    "Password must contain at least one number".to_string(),
                ));
            }
            if !password.chars().any(|c| c.is_uppercase()) {
                return Err(ChatError::WeakPassword(
                    "Password must contain at least one uppercase letter".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Hash a password using Argon2id with a fresh salt
pub fn hash_password(password: &str) -> ChatResult<String> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| ChatError::HashingFailed)
}

/// Verify a password against a stored hash.
///
/// An unparseable hash verifies as false.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}
