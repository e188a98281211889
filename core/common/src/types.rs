//! Common types used throughout the container core.

use std::fmt;
use zeroize::Zeroize;

/// A password (or other secret) in transit, zeroized on drop.
///
/// Wraps the raw bytes so that secrets never appear in `Debug` output or
/// log lines and do not linger in memory after use.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    /// Create new secret bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Get a reference to the inner bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Get the length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for SecretBytes {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for SecretBytes {
    fn from(mut s: String) -> Self {
        let bytes = s.as_bytes().to_vec();
        s.zeroize();
        Self(bytes)
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes([REDACTED; {} bytes])", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_bytes_debug_redacted() {
        let secret = SecretBytes::from("hunter2");
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_secret_bytes_roundtrip() {
        let secret = SecretBytes::from("Secret123");
        assert_eq!(secret.as_bytes(), b"Secret123");
        assert_eq!(secret.len(), 9);
        assert!(!secret.is_empty());
    }
}
