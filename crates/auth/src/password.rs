//! bcrypt password hashing.
//!
//! The cost factor is clamped to [10, 16]; verification is constant-time
//! over the hash region (bcrypt's own comparison). Plaintext never leaves
//! this module.

use choir_domain::error::{Error, Result};

pub const MIN_COST: u32 = 10;
pub const MAX_COST: u32 = 16;

/// bcrypt truncates input past 72 bytes; longer passwords are rejected
/// instead of silently truncated.
const MAX_PASSWORD_BYTES: usize = 72;

#[derive(Debug, Clone)]
pub struct PasswordHasher {
    cost: u32,
}

impl PasswordHasher {
    /// Build a hasher with the given cost, clamped to [10, 16].
    pub fn new(cost: u32) -> Self {
        let clamped = cost.clamp(MIN_COST, MAX_COST);
        if clamped != cost {
            tracing::warn!(requested = cost, using = clamped, "bcrypt cost clamped");
        }
        Self { cost: clamped }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    pub fn hash(&self, password: &str) -> Result<String> {
        if password.is_empty() {
            return Err(Error::Validation("password must not be empty".into()));
        }
        if password.len() > MAX_PASSWORD_BYTES {
            return Err(Error::Validation(format!(
                "password exceeds {MAX_PASSWORD_BYTES} bytes"
            )));
        }
        bcrypt::hash(password, self.cost)
            .map_err(|e| Error::Internal(format!("password hashing failed: {e}")))
    }

    /// Check a candidate against a stored hash. Malformed hashes verify
    /// as false rather than erroring — a corrupted record must not let a
    /// caller distinguish it from a wrong password.
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        bcrypt::verify(password, hash).unwrap_or(false)
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(12)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Cost 10 keeps the test suite fast; production uses the config value.
    fn hasher() -> PasswordHasher {
        PasswordHasher::new(10)
    }

    #[test]
    fn hash_and_verify_round_trip() {
        let hasher = hasher();
        let hash = hasher.hash("Secur3Pass!").unwrap();
        assert!(hash.starts_with("$2"));
        assert!(hasher.verify("Secur3Pass!", &hash));
        assert!(!hasher.verify("WrongPass1!", &hash));
    }

    #[test]
    fn same_password_hashes_differently() {
        let hasher = hasher();
        let a = hasher.hash("Secur3Pass!").unwrap();
        let b = hasher.hash("Secur3Pass!").unwrap();
        assert_ne!(a, b); // per-hash salt
    }

    #[test]
    fn cost_is_clamped() {
        assert_eq!(PasswordHasher::new(4).cost(), MIN_COST);
        assert_eq!(PasswordHasher::new(31).cost(), MAX_COST);
        assert_eq!(PasswordHasher::new(12).cost(), 12);
    }

    #[test]
    fn empty_and_oversized_passwords_rejected() {
        let hasher = hasher();
        assert!(hasher.hash("").is_err());
        assert!(hasher.hash(&"x".repeat(73)).is_err());
    }

    #[test]
    fn malformed_hash_verifies_false() {
        assert!(!hasher().verify("anything", "not-a-bcrypt-hash"));
    }
}
