//! Platform collaborator interfaces.
//!
//! The OS keychain (used for biometric unlock on desktop) is an external
//! collaborator; the container core only sees it as an opaque store of
//! passwords keyed by a credential id. Instances are constructed per
//! process and passed explicitly to the components that need them; there
//! is no global singleton.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use argo_common::{Result, SecretBytes};

/// Opaque secure storage for passwords.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Store a password under a credential id, replacing any previous one.
    async fn store_password(&self, id: &str, secret: &SecretBytes) -> Result<()>;

    /// Retrieve a previously stored password, if any.
    async fn retrieve_password(&self, id: &str) -> Result<Option<SecretBytes>>;

    /// Remove a stored password. Removing an absent id is not an error.
    async fn remove_password(&self, id: &str) -> Result<()>;
}

/// In-memory secret store, for tests and for platforms without a keychain.
///
/// Secrets are zeroized when the store is dropped, but this offers none of
/// the at-rest protection of a real OS credential vault.
#[derive(Default)]
pub struct MemorySecretStore {
    entries: RwLock<HashMap<String, SecretBytes>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn store_password(&self, id: &str, secret: &SecretBytes) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(id.to_string(), secret.clone());
        Ok(())
    }

    async fn retrieve_password(&self, id: &str) -> Result<Option<SecretBytes>> {
        Ok(self.entries.read().await.get(id).cloned())
    }

    async fn remove_password(&self, id: &str) -> Result<()> {
        self.entries.write().await.remove(id);
        Ok(())
    }
}
