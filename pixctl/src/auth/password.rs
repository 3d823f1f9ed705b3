use crate::errors::Error;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// Hash a secret with Argon2id and a random salt, returning the PHC string
pub fn hash_string(input: &str) -> Result<String, Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(input.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| Error::Internal {
            operation: "hash password".to_string(),
        })
}

/// Check a secret against a stored PHC string. Malformed hashes never verify.
pub fn verify_string(input: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| Argon2::default().verify_password(input.as_bytes(), &parsed).is_ok())
        .unwrap_or(false)
}
