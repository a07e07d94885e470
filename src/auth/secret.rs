//! Secret generation and verification
//!
//! This module provides functions for generating, hashing, and verifying API
//! identity secrets. Secrets are 48 random alphanumeric characters; the first
//! 8 characters are stored in clear as a lookup prefix, the full secret only as
//! an Argon2id hash.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;

/// Length of a generated secret in characters
pub const SECRET_LENGTH: usize = 48;

/// Length of the stored lookup prefix in characters
pub const SECRET_PREFIX_LENGTH: usize = 8;

/// A freshly generated secret
///
/// The plaintext is handed to the caller once and must never be persisted.
#[derive(Clone)]
pub struct GeneratedSecret {
    /// Full plaintext secret
    pub plaintext: String,

    /// First `SECRET_PREFIX_LENGTH` characters of the plaintext
    pub prefix: String,

    /// Argon2id PHC hash of the plaintext
    pub hash: String,
}

impl std::fmt::Debug for GeneratedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedSecret")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

/// Generate a new secret together with its prefix and hash
///
/// # Errors
///
/// Returns an error if hashing fails (should not happen in normal operation)
///
/// # Example
///
/// ```
/// use api_guard::auth::secret::{generate_secret, verify_secret, SECRET_LENGTH};
///
/// let secret = generate_secret().unwrap();
/// assert_eq!(secret.plaintext.len(), SECRET_LENGTH);
/// assert!(secret.plaintext.starts_with(&secret.prefix));
/// assert!(verify_secret(&secret.hash, &secret.plaintext));
/// ```
pub fn generate_secret() -> Result<GeneratedSecret, HashError> {
    let plaintext = Alphanumeric.sample_string(&mut OsRng, SECRET_LENGTH);
    let prefix = plaintext[..SECRET_PREFIX_LENGTH].to_string();
    let hash = hash_secret(&plaintext)?;

    Ok(GeneratedSecret {
        plaintext,
        prefix,
        hash,
    })
}

/// Hash a secret using Argon2id
///
/// The hash includes a random salt and uses the default Argon2 parameters.
///
/// # Returns
///
/// The Argon2id hash string (PHC format)
pub fn hash_secret(secret: &str) -> Result<String, HashError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| HashError::HashFailed(e.to_string()))
}

/// Verify a candidate secret against a stored hash
///
/// Returns `false` on mismatch and on a malformed stored hash.
pub fn verify_secret(hash: &str, candidate: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };

    Argon2::default()
        .verify_password(candidate.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Extract the lookup prefix from a presented secret
///
/// Returns `None` if the candidate is shorter than `SECRET_PREFIX_LENGTH`
/// characters.
pub fn secret_prefix(candidate: &str) -> Option<&str> {
    let (end, _) = candidate.char_indices().nth(SECRET_PREFIX_LENGTH - 1)?;
    let end = end + candidate[end..].chars().next()?.len_utf8();
    Some(&candidate[..end])
}

/// Error type for secret hashing operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HashError {
    /// Hashing failed
    #[error("Hash failed: {0}")]
    HashFailed(String),
}
