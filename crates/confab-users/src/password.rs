//! Hash-of-hash password handling.
//!
//! The client transmits a SHA-256 digest of the plaintext (64 hex chars);
//! the server stores an argon2 hash of that digest. The plaintext never
//! crosses the wire and never reaches this module.

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};

use confab_core::{ApiError, Result};

/// Reject anything that is not a well-formed SHA-256 hex digest.
pub fn validate_client_digest(digest: &str) -> Result<()> {
    if digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(ApiError::BadRequest(
            "password must be a 64-character SHA-256 hex digest".to_string(),
        ))
    }
}

pub fn hash_digest(digest: &str) -> Result<String> {
    validate_client_digest(digest)?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(digest.as_bytes(), &salt)
        .map_err(|e| ApiError::Internal(format!("password hashing failed: {}", e)))?;
    Ok(hash.to_string())
}

pub fn verify_digest(digest: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(digest.as_bytes(), &parsed)
        .is_ok()
}

/// SHA-256 hex of a plaintext. Used only for the bootstrap root user, whose
/// password arrives via configuration rather than from a hashing client.
pub fn sha256_hex(plaintext: &str) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_validation() {
        assert!(validate_client_digest(&"a".repeat(64)).is_ok());
        assert!(validate_client_digest("short").is_err());
        assert!(validate_client_digest(&"z".repeat(64)).is_err());
    }

    #[test]
    fn hash_and_verify_round_trip() {
        let digest = sha256_hex("CorrectPass123");
        let stored = hash_digest(&digest).unwrap();
        assert!(verify_digest(&digest, &stored));
        assert!(!verify_digest(&sha256_hex("WrongPass456"), &stored));
    }

    #[test]
    fn verify_tolerates_garbage_stored_hash() {
        assert!(!verify_digest(&sha256_hex("x"), "not-a-phc-string"));
    }

    #[test]
    fn sha256_hex_is_stable() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
