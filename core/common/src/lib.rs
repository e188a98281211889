//! Common utilities and types shared across Argo container modules.
//!
//! This module provides the error taxonomy and foundational types used
//! throughout the codebase, ensuring consistency and type safety.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::SecretBytes;
