use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::distributions::{Alphanumeric, DistString};
use secrecy::{ExposeSecret, Secret};
use std::sync::OnceLock;

static DUMMY_HASH: OnceLock<Option<String>> = OnceLock::new();

/// Plaintext password. Never printed by `Debug`.
#[derive(Debug, Clone)]
pub struct Password(Secret<String>);

impl Password {
    pub fn new(password: String) -> Self {
        Self(Secret::new(password))
    }

    /// Random alphanumeric password for resets.
    pub fn generate(length: usize) -> Self {
        Self::new(Alphanumeric.sample_string(&mut rand::rngs::OsRng, length))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }
}

/// Hashes a password with Argon2id and a fresh salt, PHC string format.
pub fn hash_password(password: &Password) -> Result<String, anyhow::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.expose().as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))
}

/// Constant-time check of `password` against a PHC hash. A malformed hash
/// never verifies.
pub fn verify_password(password: &Password, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        tracing::warn!("Stored password hash is malformed");
        return false;
    };
    Argon2::default()
        .verify_password(password.expose().as_bytes(), &parsed)
        .is_ok()
}

/// Verifies against a throwaway hash and always fails, so rejecting an
/// unknown login takes as long as rejecting a wrong password.
pub fn verify_against_dummy(password: &Password) -> bool {
    let hash = DUMMY_HASH.get_or_init(|| hash_password(&Password::generate(32)).ok());
    if let Some(hash) = hash {
        verify_password(password, hash);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let password = Password::new("s3cret-phrase".to_string());
        let hash = hash_password(&password).unwrap();

        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(&password, &hash));
        assert!(!verify_password(&Password::new("wrong".to_string()), &hash));
    }

    #[test]
    fn test_salts_differ() {
        let password = Password::new("same".to_string());
        assert_ne!(hash_password(&password).unwrap(), hash_password(&password).unwrap());
    }

    #[test]
    fn test_malformed_hash_never_verifies() {
        assert!(!verify_password(&Password::new("x".to_string()), "not-a-hash"));
    }

    #[test]
    fn test_generate() {
        let a = Password::generate(16);
        let b = Password::generate(16);
        assert_eq!(a.expose().len(), 16);
        assert!(a.expose().chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a.expose(), b.expose());
    }

    #[test]
    fn test_debug_redacts() {
        let password = Password::new("visible?".to_string());
        assert!(!format!("{:?}", password).contains("visible?"));
    }

    #[test]
    fn test_dummy_verification_runs_and_fails() {
        let password = Password::new("anything".to_string());
        assert!(!verify_against_dummy(&password));
        assert!(!verify_against_dummy(&Password::new(String::new())));

        let hash = DUMMY_HASH.get().and_then(Option::as_deref).unwrap();
        assert!(hash.starts_with("$argon2"));
    }
}
