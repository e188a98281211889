//! The Argo secure document container.
//!
//! Composes key derivation, compression and authenticated encryption into
//! the on-disk file format: an unencrypted identification footer followed
//! by a compressed-and-encrypted payload section.
//!
//! [`FileService`] is the only surface the application layer calls; no
//! caller reaches into compression or encryption directly.

pub mod footer;
mod paths;
pub mod platform;
pub mod service;

pub use footer::{ContainerKind, Footer, FORMAT_VERSION};
pub use platform::{MemorySecretStore, SecretStore};
pub use service::FileService;
