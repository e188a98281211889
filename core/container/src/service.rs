//! The container file service.
//!
//! Save/open/verify-password operations over the on-disk container format.
//! Serialization, compression, key derivation and encryption all happen on
//! blocking worker threads so interactive callers never stall, and every
//! write follows the temp-file-then-atomic-rename discipline: a failed or
//! cancelled save never disturbs a previously good file.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use argo_common::{Error, Result, SecretBytes};
use argo_compress::{
    compress, create_archive, decompress, extract_archive, CompressWriter, CompressionLevel,
    DecompressReader,
};
use argo_crypto::{
    compute_verification_value, decrypt_with_key, derive_key, encrypt_with_key, password,
    verify_password, KdfParams, Nonce, Salt, StreamDecryptor, StreamEncryptor, NONCE_LENGTH,
};

use crate::footer::{ContainerKind, Footer};
use crate::paths::TempFileGuard;
use crate::platform::SecretStore;

/// Entry point for all container operations.
///
/// One instance per process, constructed by the application shell and
/// passed to whatever needs it. The UI/business layer calls only this
/// surface; it never reaches into compression or encryption directly.
pub struct FileService {
    kdf_params: KdfParams,
    level: CompressionLevel,
    secrets: Option<Arc<dyn SecretStore>>,
}

impl FileService {
    /// Create a service with default key-derivation and compression
    /// settings.
    pub fn new() -> Self {
        Self {
            kdf_params: KdfParams::default(),
            level: CompressionLevel::Default,
            secrets: None,
        }
    }

    /// Override the key-derivation parameters used for new saves.
    ///
    /// Existing files carry their own parameters in the footer and remain
    /// openable regardless of this setting.
    pub fn with_kdf_params(mut self, params: KdfParams) -> Self {
        self.kdf_params = params;
        self
    }

    /// Override the compression level used for new saves.
    pub fn with_compression_level(mut self, level: CompressionLevel) -> Self {
        self.level = level;
        self
    }

    /// Attach a secret store for remembered passwords (biometric unlock).
    pub fn with_secret_store(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.secrets = Some(store);
        self
    }

    /// Read the unencrypted footer of a container file.
    ///
    /// Requires no password; used for recent-file listings and to decide
    /// whether to prompt for one.
    pub async fn peek_footer(&self, path: impl AsRef<Path>) -> Result<Footer> {
        let path = path.as_ref().to_path_buf();
        run_blocking(move || {
            let mut reader = BufReader::new(File::open(&path)?);
            Footer::read_from(&mut reader)
        })
        .await
    }

    /// Open a container file and deserialize its dataset.
    ///
    /// # Errors
    /// - `PasswordRequired` if the file is encrypted and no password was
    ///   supplied (recoverable: prompt and retry)
    /// - `AuthenticationFailure` on a wrong password or tampered payload
    /// - `CorruptData` / `NotAContainerFile` / `UnsupportedVersion` for
    ///   unreadable files
    pub async fn open<T>(
        &self,
        path: impl AsRef<Path>,
        password: Option<&SecretBytes>,
        token: &CancellationToken,
    ) -> Result<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let path = path.as_ref().to_path_buf();
        let password = password.cloned();
        let token = token.clone();

        run_blocking(move || {
            let (footer, plain) = read_container(&path, password.as_ref(), &token)?;
            debug!(name = %footer.display_name, bytes = plain.len(), "Container opened");
            serde_json::from_slice(&plain).map_err(|e| Error::Serialization(e.to_string()))
        })
        .await
    }

    /// Serialize, compress, optionally encrypt and atomically save a
    /// dataset.
    ///
    /// With a password the payload is encrypted under a fresh salt and
    /// nonce; the password must satisfy the password policy. Without one
    /// the payload is stored compressed in the clear. `created_at` is
    /// preserved when overwriting an existing container.
    pub async fn save<T: Serialize>(
        &self,
        path: impl AsRef<Path>,
        display_name: &str,
        dataset: &T,
        password: Option<&SecretBytes>,
        token: &CancellationToken,
    ) -> Result<()> {
        let plain =
            serde_json::to_vec(dataset).map_err(|e| Error::Serialization(e.to_string()))?;

        let path = path.as_ref().to_path_buf();
        let display_name = display_name.to_string();
        let password = password.cloned();
        let kdf_params = self.kdf_params.clone();
        let level = self.level;
        let token = token.clone();

        run_blocking(move || {
            if let Some(password) = &password {
                enforce_password_policy(password)?;
            }

            let mut footer = Footer::plaintext(display_name, ContainerKind::Document);
            if let Ok(previous) = peek_footer_blocking(&path) {
                footer.created_at = previous.created_at;
            }

            write_container(&path, footer, &plain, password.as_ref(), kdf_params, level, &token)?;
            info!(path = %path.display(), "Container saved");
            Ok(())
        })
        .await
    }

    /// Re-encrypt a container under a new password.
    ///
    /// Fully decrypts with the old password, derives a fresh salt and key
    /// for the new one, and re-saves atomically. The on-disk file never
    /// mixes old- and new-password material.
    pub async fn change_password(
        &self,
        path: impl AsRef<Path>,
        old_password: &SecretBytes,
        new_password: &SecretBytes,
        token: &CancellationToken,
    ) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        let old_password = old_password.clone();
        let new_password = new_password.clone();
        let kdf_params = self.kdf_params.clone();
        let level = self.level;
        let token = token.clone();

        run_blocking(move || {
            enforce_password_policy(&new_password)?;

            let (mut footer, plain) = read_container(&path, Some(&old_password), &token)?;
            footer.touch();

            write_container(
                &path,
                footer,
                &plain,
                Some(&new_password),
                kdf_params,
                level,
                &token,
            )?;
            info!(path = %path.display(), "Password changed");
            Ok(())
        })
        .await
    }

    /// Export a directory tree as an encrypted backup artifact.
    ///
    /// The backup is a distinct container (archive + compress + encrypt)
    /// independent of any live document file, so a corrupted live file
    /// does not invalidate prior backups.
    pub async fn create_backup(
        &self,
        source_dir: impl AsRef<Path>,
        dest: impl AsRef<Path>,
        display_name: &str,
        password: &SecretBytes,
        token: &CancellationToken,
    ) -> Result<()> {
        let source_dir = source_dir.as_ref().to_path_buf();
        let dest = dest.as_ref().to_path_buf();
        let display_name = display_name.to_string();
        let password = password.clone();
        let kdf_params = self.kdf_params.clone();
        let level = self.level;
        let token = token.clone();

        run_blocking(move || {
            enforce_password_policy(&password)?;

            if token.is_cancelled() {
                return Err(Error::OperationCancelled);
            }

            let salt = Salt::generate();
            let verification =
                compute_verification_value(password.as_bytes(), &salt, &kdf_params)?;
            let key = derive_key(password.as_bytes(), &salt, &kdf_params)?;

            let footer = Footer::encrypted(
                display_name,
                ContainerKind::Backup,
                salt,
                kdf_params,
                verification,
            );

            // Archive, compress and encrypt as one chained writer pipeline
            // into the temp file; no stage buffers the directory whole.
            let guard = TempFileGuard::new(&dest);
            let file = File::create(guard.path())?;
            let mut writer = BufWriter::new(file);
            footer.write_to(&mut writer)?;

            let encryptor = StreamEncryptor::new(&key, writer)?;
            let mut compressor = CompressWriter::new(encryptor, level)?;
            let entries = create_archive(&source_dir, false, &mut compressor, &token)
                .map_err(Error::flatten_io)?;

            let encryptor = compressor.finish().map_err(Error::flatten_io)?;
            let mut writer = encryptor.finish()?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
            drop(writer);

            if token.is_cancelled() {
                return Err(Error::OperationCancelled);
            }

            guard.commit(&dest)?;
            info!(dest = %dest.display(), entries, "Backup created");
            Ok(())
        })
        .await
    }

    /// Restore a backup artifact into a destination directory.
    ///
    /// Archive entries that would resolve outside the destination are
    /// rejected. Extraction is incremental: entries written before a
    /// corruption is detected (or before the token fires) remain in the
    /// destination.
    pub async fn restore_backup(
        &self,
        src: impl AsRef<Path>,
        dest_dir: impl AsRef<Path>,
        password: &SecretBytes,
        token: &CancellationToken,
    ) -> Result<()> {
        let src = src.as_ref().to_path_buf();
        let dest_dir = dest_dir.as_ref().to_path_buf();
        let password = password.clone();
        let token = token.clone();

        run_blocking(move || {
            let mut reader = BufReader::new(File::open(&src)?);
            let footer = Footer::read_from(&mut reader)?;

            if footer.kind != ContainerKind::Backup {
                return Err(Error::InvalidArgument(
                    "Not a backup container".to_string(),
                ));
            }

            let verification = footer.verification.as_ref().ok_or_else(|| {
                Error::CorruptData("Encrypted backup lacks a verification value".to_string())
            })?;
            if !verify_password(
                password.as_bytes(),
                &footer.salt,
                &footer.kdf_params,
                verification,
            )? {
                return Err(Error::AuthenticationFailure);
            }

            let key = derive_key(password.as_bytes(), &footer.salt, &footer.kdf_params)?;

            // Decrypt, decompress and extract as one chained reader
            // pipeline; typed errors cross the io seams wrapped and are
            // recovered here.
            let decryptor = StreamDecryptor::new(&key, reader)?;
            let decoder = DecompressReader::new(decryptor)?;
            let entries =
                extract_archive(decoder, &dest_dir, &token).map_err(Error::flatten_io)?;

            info!(dest = %dest_dir.display(), entries, "Backup restored");
            Ok(())
        })
        .await
    }

    /// Remember a password in the configured secret store.
    pub async fn remember_password(&self, id: &str, secret: &SecretBytes) -> Result<()> {
        self.secret_store()?.store_password(id, secret).await
    }

    /// Open a container using a password previously remembered under `id`.
    ///
    /// # Errors
    /// - `PasswordRequired` if no password is stored under `id`
    pub async fn open_remembered<T>(
        &self,
        path: impl AsRef<Path>,
        id: &str,
        token: &CancellationToken,
    ) -> Result<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let password = self
            .secret_store()?
            .retrieve_password(id)
            .await?
            .ok_or(Error::PasswordRequired)?;
        self.open(path, Some(&password), token).await
    }

    /// Forget a remembered password.
    pub async fn forget_password(&self, id: &str) -> Result<()> {
        self.secret_store()?.remove_password(id).await
    }

    fn secret_store(&self) -> Result<&Arc<dyn SecretStore>> {
        self.secrets.as_ref().ok_or_else(|| {
            Error::InvalidArgument("No secret store configured".to_string())
        })
    }
}

impl Default for FileService {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
}

fn peek_footer_blocking(path: &Path) -> Result<Footer> {
    let mut reader = BufReader::new(File::open(path)?);
    Footer::read_from(&mut reader)
}

fn enforce_password_policy(password: &SecretBytes) -> Result<()> {
    let text = std::str::from_utf8(password.as_bytes())
        .map_err(|_| Error::InvalidArgument("Password is not valid UTF-8".to_string()))?;

    let violations = password::validate(text);
    if violations.is_empty() {
        return Ok(());
    }

    let rules: Vec<String> = violations.iter().map(|r| r.to_string()).collect();
    Err(Error::InvalidArgument(format!(
        "Password rejected: {}",
        rules.join("; ")
    )))
}

/// Read a document container and return its footer plus the decompressed
/// dataset bytes.
fn read_container(
    path: &Path,
    password: Option<&SecretBytes>,
    token: &CancellationToken,
) -> Result<(Footer, Vec<u8>)> {
    let mut reader = BufReader::new(File::open(path)?);
    let footer = Footer::read_from(&mut reader)?;

    if footer.kind != ContainerKind::Document {
        return Err(Error::InvalidArgument(
            "Not a document container".to_string(),
        ));
    }

    if token.is_cancelled() {
        return Err(Error::OperationCancelled);
    }

    let compressed = if footer.is_encrypted {
        let password = password.ok_or(Error::PasswordRequired)?;
        let verification = footer.verification.as_ref().ok_or_else(|| {
            Error::CorruptData("Encrypted container lacks a verification value".to_string())
        })?;

        if !verify_password(
            password.as_bytes(),
            &footer.salt,
            &footer.kdf_params,
            verification,
        )? {
            return Err(Error::AuthenticationFailure);
        }

        let mut nonce = [0u8; NONCE_LENGTH];
        reader
            .read_exact(&mut nonce)
            .map_err(|_| Error::CorruptData("Truncated payload section".to_string()))?;

        let mut ciphertext = Vec::new();
        reader.read_to_end(&mut ciphertext)?;

        if token.is_cancelled() {
            return Err(Error::OperationCancelled);
        }

        let key = derive_key(password.as_bytes(), &footer.salt, &footer.kdf_params)?;
        decrypt_with_key(&key, &Nonce::from_bytes(nonce), &ciphertext)?
    } else {
        let mut compressed = Vec::new();
        reader.read_to_end(&mut compressed)?;
        compressed
    };

    if token.is_cancelled() {
        return Err(Error::OperationCancelled);
    }

    let plain = decompress(&compressed)?;
    Ok((footer, plain))
}

/// Compress, optionally encrypt, and atomically write a document payload.
///
/// A fresh salt and nonce are generated on every encrypted save, so salts
/// rotate on password change and nonces never repeat under a key.
fn write_container(
    dest: &Path,
    mut footer: Footer,
    plain: &[u8],
    password: Option<&SecretBytes>,
    kdf_params: KdfParams,
    level: CompressionLevel,
    token: &CancellationToken,
) -> Result<()> {
    if token.is_cancelled() {
        return Err(Error::OperationCancelled);
    }

    let compressed = compress(plain, level)?;

    let payload = if let Some(password) = password {
        if token.is_cancelled() {
            return Err(Error::OperationCancelled);
        }

        let salt = Salt::generate();
        let verification = compute_verification_value(password.as_bytes(), &salt, &kdf_params)?;
        let key = derive_key(password.as_bytes(), &salt, &kdf_params)?;
        let nonce = Nonce::generate();

        let ciphertext = encrypt_with_key(&key, &nonce, &compressed)?;

        footer.is_encrypted = true;
        footer.salt = salt;
        footer.kdf_params = kdf_params;
        footer.verification = Some(verification);

        let mut payload = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        payload.extend_from_slice(nonce.as_bytes());
        payload.extend_from_slice(&ciphertext);
        payload
    } else {
        footer.is_encrypted = false;
        footer.verification = None;
        compressed
    };

    footer.touch();

    if token.is_cancelled() {
        return Err(Error::OperationCancelled);
    }

    write_raw(dest, &footer, &payload)
}

/// Write footer + payload through a temp file and atomic rename.
fn write_raw(dest: &Path, footer: &Footer, payload: &[u8]) -> Result<()> {
    let guard = TempFileGuard::new(dest);
    {
        let file = File::create(guard.path())?;
        let mut writer = BufWriter::new(file);
        footer.write_to(&mut writer)?;
        writer.write_all(payload)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    guard.commit(dest)
}
