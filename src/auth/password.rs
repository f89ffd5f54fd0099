//! Password hashing with Argon2id and the password policy.

use argon2::{
    password_hash::{
        PasswordHash, PasswordHasher as Argon2PasswordHasher, PasswordVerifier, SaltString,
    },
    Argon2, Params,
};
use rand::rngs::OsRng;
use std::sync::OnceLock;
use thiserror::Error;

use crate::error::ApiError;

/// Characters accepted as the "special" character of a complex password.
pub const SPECIAL_CHARACTERS: &str = "@$!%*?&#^()-_=+[]{};:'\",.<>/\\|`~";

#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_special: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_uppercase: false,
            require_lowercase: false,
            require_digit: false,
            require_special: false,
        }
    }
}

impl PasswordPolicy {
    pub fn complex(min_length: usize) -> Self {
        Self {
            min_length,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_special: true,
        }
    }

    pub fn validate(&self, password: &str) -> Result<(), PasswordPolicyError> {
        if password.chars().count() < self.min_length {
            return Err(PasswordPolicyError::TooShort {
                min_length: self.min_length,
            });
        }

        if self.require_lowercase && !password.chars().any(|c| c.is_ascii_lowercase()) {
            return Err(PasswordPolicyError::MissingLowercase);
        }

        if self.require_uppercase && !password.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(PasswordPolicyError::MissingUppercase);
        }

        if self.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            return Err(PasswordPolicyError::MissingDigit);
        }

        if self.require_special && !password.chars().any(|c| SPECIAL_CHARACTERS.contains(c)) {
            return Err(PasswordPolicyError::MissingSpecial);
        }

        Ok(())
    }

    /// Runs the policy and reports a failure against `field`.
    pub fn check_field(&self, field: &str, password: &str) -> Result<(), ApiError> {
        self.validate(password).map_err(|e| {
            ApiError::validation_with(
                "Validation failed",
                vec![crate::error::FieldError::new(field, e.to_string())],
            )
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PasswordPolicyError {
    #[error("Password must be at least {min_length} characters")]
    TooShort { min_length: usize },
    #[error("Password must contain at least one uppercase letter")]
    MissingUppercase,
    #[error("Password must contain at least one lowercase letter")]
    MissingLowercase,
    #[error("Password must contain at least one digit")]
    MissingDigit,
    #[error("Password must contain at least one special character")]
    MissingSpecial,
}

pub struct PasswordService;

impl PasswordService {
    /// Hashes a password using Argon2id with configurable memory cost.
    ///
    /// The cost parameter controls the memory usage (in KiB = 2^cost).
    /// Recommended values:
    /// - 12: ~4MB memory, suitable for development/testing
    /// - 16: ~64MB memory, suitable for production
    pub fn hash_password_with_cost(
        password: &str,
        memory_cost_log2: u32,
    ) -> Result<String, argon2::password_hash::Error> {
        let salt = SaltString::generate(&mut OsRng);

        let m_cost = 1u32 << memory_cost_log2.clamp(3, 22);

        let params =
            Params::new(m_cost, 3, 1, None).map_err(|_| argon2::password_hash::Error::Algorithm)?;

        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);
        let password_hash = argon2.hash_password(password.as_bytes(), &salt)?;
        Ok(password_hash.to_string())
    }

    pub fn verify_password(
        password: &str,
        password_hash: &str,
    ) -> Result<bool, argon2::password_hash::Error> {
        let parsed_hash = PasswordHash::new(password_hash)?;
        let argon2 = Argon2::default();
        match argon2.verify_password(password.as_bytes(), &parsed_hash) {
            Ok(_) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Hash compared against when the account does not exist, so a miss costs
    /// as much as a wrong password.
    pub fn dummy_hash() -> &'static str {
        static DUMMY: OnceLock<String> = OnceLock::new();
        DUMMY.get_or_init(|| {
            Self::hash_password_with_cost("kadacare-dummy-password", 12)
                .unwrap_or_else(|_| String::from("$argon2id$v=19$m=4096,t=3,p=1$invalid"))
        })
    }

    pub async fn hash(password: String, memory_cost_log2: u32) -> Result<String, ApiError> {
        tokio::task::spawn_blocking(move || {
            Self::hash_password_with_cost(&password, memory_cost_log2)
        })
        .await
        .map_err(|e| ApiError::internal(format!("Password hashing task failed: {e}")))?
        .map_err(|e| ApiError::internal(format!("Failed to process password: {e}")))
    }

    /// Verifies on the blocking pool. `None` checks against the dummy hash and
    /// always yields `false`.
    pub async fn verify(password: String, password_hash: Option<String>) -> Result<bool, ApiError> {
        tokio::task::spawn_blocking(move || match password_hash {
            Some(hash) => Self::verify_password(&password, &hash),
            None => Self::verify_password(&password, Self::dummy_hash()).map(|_| false),
        })
        .await
        .map_err(|e| ApiError::internal(format!("Password verification task failed: {e}")))?
        .map_err(|e| ApiError::internal(format!("Password verification error: {e}")))
    }
}
