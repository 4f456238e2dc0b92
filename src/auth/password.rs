use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

use crate::error::AppError;

/// Reason reported for every failed verification, whatever actually failed.
pub const MISMATCH_REASON: &str = "Invalid email or password";

/// Outcome of [`Hasher::verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Valid,
    Invalid(&'static str),
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verification::Valid)
    }
}

/// Argon2id password hashing with a minimum-length policy.
#[derive(Debug, Clone, Copy)]
pub struct Hasher {
    min_length: usize,
}

impl Hasher {
    pub fn new(min_length: usize) -> Self {
        Self { min_length }
    }

    /// Rejects passwords shorter than the configured minimum.
    pub fn check_length(&self, plain: &str) -> Result<(), AppError> {
        if plain.chars().count() < self.min_length {
            return Err(AppError::PasswordTooShort(self.min_length));
        }
        Ok(())
    }

    pub fn hash(&self, plain: &str) -> Result<String, AppError> {
        self.check_length(plain)?;
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                AppError::Internal(anyhow::anyhow!(e.to_string()))
            })?
            .to_string();
        Ok(hash)
    }

    /// Constant-time check of `plain` against a stored PHC hash. An empty hash
    /// (federated account without a local password) never verifies.
    pub fn verify(&self, plain: &str, hash: &str) -> Verification {
        if hash.is_empty() {
            return Verification::Invalid(MISMATCH_REASON);
        }
        let parsed = match PasswordHash::new(hash) {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "argon2 parse hash error");
                return Verification::Invalid(MISMATCH_REASON);
            }
        };
        match Argon2::default().verify_password(plain.as_bytes(), &parsed) {
            Ok(()) => Verification::Valid,
            Err(_) => Verification::Invalid(MISMATCH_REASON),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_roundtrip() {
        let hasher = Hasher::new(6);
        let password = "Secur3P@ssw0rd!";
        let hash = hasher.hash(password).expect("hashing should succeed");
        assert_ne!(hash, password);
        assert!(hasher.verify(password, &hash).is_valid());
    }

    #[test]
    fn same_password_gets_a_fresh_salt() {
        let hasher = Hasher::new(6);
        let a = hasher.hash("secret1").unwrap();
        let b = hasher.hash("secret1").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let hasher = Hasher::new(6);
        let hash = hasher.hash("correct-horse-battery-staple").unwrap();
        assert_eq!(
            hasher.verify("wrong-password", &hash),
            Verification::Invalid(MISMATCH_REASON)
        );
    }

    #[test]
    fn short_passwords_are_rejected_before_hashing() {
        let err = Hasher::new(6).hash("12345").unwrap_err();
        assert!(matches!(err, AppError::PasswordTooShort(6)));
    }

    #[test]
    fn malformed_or_empty_hash_never_verifies() {
        let hasher = Hasher::new(6);
        assert!(!hasher.verify("anything", "not-a-valid-hash").is_valid());
        assert!(!hasher.verify("", "").is_valid());
    }
}
