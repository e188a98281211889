//! The unencrypted container footer.
//!
//! Leading plaintext metadata that identifies a container file without a
//! password: display name, encrypted flag, timestamps, format version and
//! the key-derivation inputs. Powers recent-file listings and the decision
//! whether to prompt for a password.
//!
//! # On-disk layout
//!
//! ```text
//! magic "ARGO" (4) | format version (u16 LE) | footer length (u32 LE) | footer JSON
//! ```
//!
//! The payload section follows immediately after the footer JSON. Reading
//! the footer is a bounded operation: it never touches the payload.

use std::io::{Read, Write};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use argo_common::{Error, Result};
use argo_crypto::{KdfParams, Salt, VerificationValue};

/// Magic bytes identifying a container file.
pub const MAGIC: &[u8; 4] = b"ARGO";

/// Current container format version.
pub const FORMAT_VERSION: u16 = 1;

/// Upper bound on the serialized footer, to bound the initial read.
const MAX_FOOTER_LENGTH: usize = 64 * 1024;

/// What kind of artifact this container holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    /// A live business dataset.
    Document,
    /// A backup archive of a directory tree.
    Backup,
}

/// Unencrypted container metadata.
///
/// Written fresh on every save: `created_at` is preserved, `updated_at`
/// refreshed. Contains no business data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Footer {
    /// Company or display name shown in recent-file lists.
    pub display_name: String,
    /// Document or backup.
    pub kind: ContainerKind,
    /// Whether the payload section is encrypted.
    pub is_encrypted: bool,
    /// Dataset schema version, for the deserializer.
    pub schema_version: u32,
    /// Creation timestamp, preserved across saves.
    pub created_at: DateTime<Utc>,
    /// Refreshed on every save.
    pub updated_at: DateTime<Utc>,
    /// Key-derivation salt. Present (and random) even for plaintext files
    /// so the footer shape does not reveal more than `is_encrypted` does.
    pub salt: Salt,
    /// Key-derivation parameters used for this file.
    pub kdf_params: KdfParams,
    /// Password-verification value; `None` for plaintext containers.
    pub verification: Option<VerificationValue>,
}

impl Footer {
    /// Create a footer for a plaintext container.
    pub fn plaintext(display_name: impl Into<String>, kind: ContainerKind) -> Self {
        let now = Utc::now();
        Self {
            display_name: display_name.into(),
            kind,
            is_encrypted: false,
            schema_version: 1,
            created_at: now,
            updated_at: now,
            salt: Salt::generate(),
            kdf_params: KdfParams::default(),
            verification: None,
        }
    }

    /// Create a footer for an encrypted container.
    pub fn encrypted(
        display_name: impl Into<String>,
        kind: ContainerKind,
        salt: Salt,
        kdf_params: KdfParams,
        verification: VerificationValue,
    ) -> Self {
        let now = Utc::now();
        Self {
            display_name: display_name.into(),
            kind,
            is_encrypted: true,
            schema_version: 1,
            created_at: now,
            updated_at: now,
            salt,
            kdf_params,
            verification: Some(verification),
        }
    }

    /// Refresh the modification timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Serialize the footer to a writer.
    ///
    /// # Errors
    /// - `InvalidArgument` if the serialized record exceeds the length
    ///   bound `read_from` enforces; a footer that saved but could never
    ///   be reopened must not reach disk
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let json =
            serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))?;
        if json.len() > MAX_FOOTER_LENGTH {
            return Err(Error::InvalidArgument(format!(
                "Footer record exceeds {} bytes",
                MAX_FOOTER_LENGTH
            )));
        }

        writer.write_all(MAGIC)?;
        writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
        writer.write_all(&(json.len() as u32).to_le_bytes())?;
        writer.write_all(&json)?;
        Ok(())
    }

    /// Read a footer from a reader positioned at the start of the file.
    ///
    /// Performs only bounded reads; the reader is left positioned at the
    /// first payload byte.
    ///
    /// # Errors
    /// - `NotAContainerFile` if the magic bytes do not match
    /// - `UnsupportedVersion` if the file was written by a newer format
    /// - `CorruptData` if the footer record is truncated or malformed
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|_| Error::NotAContainerFile("File too short".to_string()))?;
        if &magic != MAGIC {
            return Err(Error::NotAContainerFile(
                "Format signature mismatch".to_string(),
            ));
        }

        let mut version = [0u8; 2];
        reader
            .read_exact(&mut version)
            .map_err(|_| Error::CorruptData("Truncated footer".to_string()))?;
        let version = u16::from_le_bytes(version);
        if version > FORMAT_VERSION {
            return Err(Error::UnsupportedVersion {
                found: version,
                supported: FORMAT_VERSION,
            });
        }

        let mut len = [0u8; 4];
        reader
            .read_exact(&mut len)
            .map_err(|_| Error::CorruptData("Truncated footer".to_string()))?;
        let len = u32::from_le_bytes(len) as usize;
        if len == 0 || len > MAX_FOOTER_LENGTH {
            return Err(Error::CorruptData("Implausible footer length".to_string()));
        }

        let mut json = vec![0u8; len];
        reader
            .read_exact(&mut json)
            .map_err(|_| Error::CorruptData("Truncated footer".to_string()))?;

        serde_json::from_slice(&json)
            .map_err(|e| Error::CorruptData(format!("Malformed footer record: {}", e)))
    }
}
