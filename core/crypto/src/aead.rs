//! Authenticated encryption using ChaCha20-Poly1305.
//!
//! ChaCha20-Poly1305 provides both confidentiality and authenticity. The
//! 12-byte nonce is generated fresh per encryption call by the caller and
//! stored alongside the ciphertext; it must never repeat under one key.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    ChaCha20Poly1305,
};

use crate::kdf::{derive_key, KdfParams};
use crate::keys::{DerivedKey, Nonce, Salt};
use argo_common::{Error, Result};

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Encrypt plaintext under an already-derived key.
///
/// # Postconditions
/// - Returns ciphertext || tag
/// - Output length is plaintext length + TAG_SIZE
/// - Empty plaintext is valid and round-trips to empty
pub fn encrypt_with_key(key: &DerivedKey, nonce: &Nonce, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));

    cipher
        .encrypt(GenericArray::from_slice(nonce.as_bytes()), plaintext)
        .map_err(|_| Error::InvalidArgument("Encryption failed".to_string()))
}

/// Decrypt ciphertext || tag under an already-derived key.
///
/// # Errors
/// - `CorruptData` if the input is too short to contain a tag
/// - `AuthenticationFailure` if the tag does not verify (wrong password,
///   wrong nonce, or tampered ciphertext; indistinguishable to the caller)
pub fn decrypt_with_key(key: &DerivedKey, nonce: &Nonce, ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < TAG_SIZE {
        return Err(Error::CorruptData(
            "Ciphertext too short to contain an authentication tag".to_string(),
        ));
    }

    let cipher = ChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));

    cipher
        .decrypt(GenericArray::from_slice(nonce.as_bytes()), ciphertext)
        .map_err(|_| Error::AuthenticationFailure)
}

/// Encrypt plaintext with a key derived from a password and salt.
///
/// # Preconditions
/// - `password` must not be empty
/// - `nonce` must be fresh for this (password, salt) pair
///
/// # Errors
/// - `InvalidArgument` on an empty password
pub fn encrypt(
    plaintext: &[u8],
    password: &[u8],
    salt: &Salt,
    nonce: &Nonce,
    params: &KdfParams,
) -> Result<Vec<u8>> {
    let key = derive_key(password, salt, params)?;
    encrypt_with_key(&key, nonce, plaintext)
}

/// Decrypt ciphertext || tag with a key derived from a password and salt.
pub fn decrypt(
    ciphertext: &[u8],
    password: &[u8],
    salt: &Salt,
    nonce: &Nonce,
    params: &KdfParams,
) -> Result<Vec<u8>> {
    let key = derive_key(password, salt, params)?;
    decrypt_with_key(&key, nonce, ciphertext)
}
