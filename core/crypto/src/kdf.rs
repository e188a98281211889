//! Key derivation using Argon2id.
//!
//! Argon2id is a memory-hard password hashing function that provides
//! resistance to both GPU and time-memory trade-off attacks. The password
//! is first stretched into a 32-byte master secret; the encryption key and
//! the password-verification value are then derived from that secret with
//! distinct Blake2b context strings. Persisting the verification value
//! therefore reveals nothing about the encryption key.

use argon2::{Algorithm, Argon2, Params, Version};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::keys::{DerivedKey, Salt, VerificationValue, KEY_LENGTH};
use argo_common::{Error, Result};

/// Context string for deriving the encryption key.
const ENCRYPTION_CONTEXT: &[u8] = b"argo.encryption.v1";

/// Context string for deriving the password-verification value.
const VERIFICATION_CONTEXT: &[u8] = b"argo.verification.v1";

/// Parameters for Argon2id key derivation.
///
/// Stored in the container footer so that files written under older
/// defaults remain openable after the defaults are raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (e.g., 65536 = 64 MiB).
    pub memory_cost: u32,
    /// Number of iterations.
    pub time_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl KdfParams {
    /// Create parameters suitable for interactive use.
    ///
    /// These parameters provide a balance between security and usability,
    /// targeting approximately 0.5-1 second of derivation time.
    pub fn interactive() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }

    /// Create parameters suitable for sensitive data.
    ///
    /// Higher security parameters that may take several seconds.
    pub fn sensitive() -> Self {
        Self {
            memory_cost: 262144, // 256 MiB
            time_cost: 4,
            parallelism: 4,
        }
    }

    /// Create moderate parameters for constrained devices.
    pub fn moderate() -> Self {
        Self {
            memory_cost: 32768, // 32 MiB
            time_cost: 3,
            parallelism: 2,
        }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::interactive()
    }
}

/// Stretch a password into the 32-byte master secret.
fn derive_master(password: &[u8], salt: &Salt, params: &KdfParams) -> Result<[u8; KEY_LENGTH]> {
    if password.is_empty() {
        return Err(Error::InvalidArgument(
            "Password cannot be empty".to_string(),
        ));
    }

    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(KEY_LENGTH),
    )
    .map_err(|e| Error::InvalidArgument(format!("Invalid KDF parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut secret = [0u8; KEY_LENGTH];
    argon2
        .hash_password_into(password, salt.as_bytes(), &mut secret)
        .map_err(|e| Error::InvalidArgument(format!("Key derivation failed: {}", e)))?;

    Ok(secret)
}

/// Derive a subkey from the master secret under a context string.
fn derive_subkey(master: &[u8; KEY_LENGTH], context: &[u8]) -> [u8; KEY_LENGTH] {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(master);
    hasher.update(context);

    let result = hasher.finalize();
    let mut subkey = [0u8; KEY_LENGTH];
    subkey.copy_from_slice(&result);
    subkey
}

/// Derive the encryption key from a password and salt.
///
/// # Preconditions
/// - `password` must not be empty
/// - `params` must have valid Argon2id parameters
///
/// # Postconditions
/// - The derived key is deterministic given the same inputs
/// - The key is independent of the verification value for the same inputs
///
/// # Errors
/// - `InvalidArgument` if the password is empty or the parameters are invalid
///
/// # Security
/// - The password is not stored or logged
/// - The master secret is zeroized before returning
pub fn derive_key(password: &[u8], salt: &Salt, params: &KdfParams) -> Result<DerivedKey> {
    let mut master = derive_master(password, salt, params)?;
    let key = derive_subkey(&master, ENCRYPTION_CONTEXT);
    master.zeroize();
    Ok(DerivedKey::from_bytes(key))
}

/// Compute the password-verification value for a password and salt.
///
/// Used only to check "is this the right password" before committing to a
/// full decrypt. Safe to persist in the unencrypted footer.
pub fn compute_verification_value(
    password: &[u8],
    salt: &Salt,
    params: &KdfParams,
) -> Result<VerificationValue> {
    let mut master = derive_master(password, salt, params)?;
    let value = derive_subkey(&master, VERIFICATION_CONTEXT);
    master.zeroize();
    Ok(VerificationValue::from_bytes(value))
}

/// Verify a password against a stored verification value.
///
/// Performs a constant-time comparison to prevent timing attacks.
pub fn verify_password(
    password: &[u8],
    salt: &Salt,
    params: &KdfParams,
    stored: &VerificationValue,
) -> Result<bool> {
    let computed = compute_verification_value(password, salt, params)?;
    Ok(computed.ct_eq(stored))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_deterministic() {
        let password = b"test-password-123";
        let salt = Salt::from_bytes([42u8; 32]);
        let params = KdfParams::moderate();

        let key1 = derive_key(password, &salt, &params).unwrap();
        let key2 = derive_key(password, &salt, &params).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_different_salt() {
        let password = b"test-password-123";
        let salt1 = Salt::from_bytes([1u8; 32]);
        let salt2 = Salt::from_bytes([2u8; 32]);
        let params = KdfParams::moderate();

        let key1 = derive_key(password, &salt1, &params).unwrap();
        let key2 = derive_key(password, &salt2, &params).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_different_password() {
        let salt = Salt::from_bytes([42u8; 32]);
        let params = KdfParams::moderate();

        let key1 = derive_key(b"password1", &salt, &params).unwrap();
        let key2 = derive_key(b"password2", &salt, &params).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_empty_password_fails() {
        let salt = Salt::generate();
        let params = KdfParams::moderate();

        assert!(matches!(
            derive_key(b"", &salt, &params),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_verification_value_differs_from_key() {
        let password = b"secure-password";
        let salt = Salt::from_bytes([99u8; 32]);
        let params = KdfParams::moderate();

        let key = derive_key(password, &salt, &params).unwrap();
        let verification = compute_verification_value(password, &salt, &params).unwrap();

        // Domain separation: persisting the verification value must not
        // expose the encryption key.
        assert_ne!(key.as_bytes(), verification.as_bytes());
    }

    #[test]
    fn test_verify_password() {
        let password = b"secure-password";
        let salt = Salt::from_bytes([99u8; 32]);
        let params = KdfParams::moderate();

        let stored = compute_verification_value(password, &salt, &params).unwrap();
        assert!(verify_password(password, &salt, &params, &stored).unwrap());
        assert!(!verify_password(b"wrong-password", &salt, &params, &stored).unwrap());
    }
}
