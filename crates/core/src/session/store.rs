//! Encrypted session-record persistence facade.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;
use crate::secrets::SecretCache;

use super::record::SessionRecord;

/// Repository wrapper for the envelope-encrypted session file.
pub struct SessionStore {
    path: PathBuf,
    secrets: Arc<SecretCache>,
}

impl SessionStore {
    pub fn new(path: PathBuf, secrets: Arc<SecretCache>) -> Self {
        Self { path, secrets }
    }

    /// Path of the envelope file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the persisted record, if any.
    pub async fn load(&self) -> Result<Option<SessionRecord>> {
        self.secrets.load_decrypted(&self.path).await
    }

    /// Persists a record, replacing any previous envelope.
    pub async fn save(&self, record: &SessionRecord) -> Result<()> {
        self.secrets.save_encrypted(record, &self.path).await
    }

    /// Removes the envelope file if present.
    pub fn clear(&self) -> Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}
