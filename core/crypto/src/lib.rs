//! Cryptographic primitives for the Argo document container.
//!
//! This module provides:
//! - Key derivation using Argon2id with domain-separated subkeys
//! - Authenticated encryption using ChaCha20-Poly1305
//! - Secure key material handling with automatic zeroization
//! - Password strength validation
//! - Streaming encryption for large payloads
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Constant-time operations for sensitive comparisons
//! - The password-verification value and the encryption key are derived
//!   with distinct context strings and cannot be confused for one another

pub mod aead;
pub mod kdf;
pub mod keys;
pub mod password;
pub mod stream;

pub use aead::{decrypt, decrypt_with_key, encrypt, encrypt_with_key, TAG_SIZE};
pub use kdf::{compute_verification_value, derive_key, verify_password, KdfParams};
pub use keys::{DerivedKey, Nonce, Salt, VerificationValue, KEY_LENGTH, NONCE_LENGTH, SALT_LENGTH};
pub use password::{strength_score, validate, PasswordRule};
pub use stream::{decrypt_stream, encrypt_stream, StreamDecryptor, StreamEncryptor};
