//! Common error types for the Argo document container.
//!
//! Every failure in the container core surfaces as one of these variants;
//! nothing is swallowed silently. Callers decide retry policy per variant:
//! `PasswordRequired` is recoverable (re-prompt), `Io` may be retried,
//! `InvalidArgument` must not be.

use thiserror::Error;

/// Top-level error type for container operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Programmer error: a precondition on the arguments was violated.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The file is encrypted and no password was supplied.
    ///
    /// Recoverable: the caller should prompt for a password and retry.
    #[error("A password is required to open this file")]
    PasswordRequired,

    /// Wrong password or tampered ciphertext.
    ///
    /// The two cases are deliberately indistinguishable; revealing which
    /// would give an attacker an oracle.
    #[error("The file could not be opened with the supplied password")]
    AuthenticationFailure,

    /// The file content is structurally unreadable.
    #[error("Corrupt data: {0}")]
    CorruptData(String),

    /// The file does not carry the container format signature.
    #[error("Not a container file: {0}")]
    NotAContainerFile(String),

    /// The file was written by a newer, incompatible format version.
    #[error("Unsupported container version {found} (this build supports up to {supported})")]
    UnsupportedVersion { found: u16, supported: u16 },

    /// A long-running operation was cancelled by the caller.
    #[error("Operation cancelled")]
    OperationCancelled,

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Recover a typed error smuggled across an `io::Read`/`io::Write`
    /// trait boundary.
    ///
    /// Adapter types implementing the `io` traits can only fail with
    /// `io::Error`, so they wrap the real error; callers on the other
    /// side of the seam unwrap it here.
    pub fn flatten_io(self) -> Self {
        match self {
            Error::Io(err) => match err.downcast::<Error>() {
                Ok(inner) => inner,
                Err(err) => Error::Io(err),
            },
            other => other,
        }
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
