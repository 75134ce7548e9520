//! One-way password hashing.
//!
//! Hashes are argon2id PHC strings (`$argon2id$v=19$...`). The salt is 16
//! bytes from the OS random source.

use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use password_hash::{PasswordHash, SaltString};

use crate::error::AppError;

/// hash_password
///
/// Produces a salted argon2id hash of `password` with the library's default
/// (memory-hard) cost parameters.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes)
        .map_err(|e| AppError::Internal(format!("could not read random salt: {e}")))?;
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| AppError::Internal(format!("could not encode salt: {e}")))?;

    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(format!("could not hash password: {e}")))?;
    Ok(hash.to_string())
}

/// verify_password
///
/// Returns `Ok(false)` when the password does not match. A hash that cannot
/// be parsed or verified for any other reason is an internal error.
///
/// The digest comparison inside argon2 is constant-time.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    let parsed = PasswordHash::new(hash).map_err(|e| AppError::MalformedHash(e.to_string()))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(e) => Err(AppError::MalformedHash(e.to_string())),
    }
}
