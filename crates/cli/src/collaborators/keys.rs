//! Local file-backed key service.
//!
//! Stands in for an external key-management dependency when the operator
//! runs without one: data keys are wrapped under a master key kept next to
//! the rest of the state. The core neither knows nor cares which is in use.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use snag::capabilities::{DataKey, KeyService};
use snag::secrets;

pub struct LocalKeyService {
    master: Zeroizing<Vec<u8>>,
}

impl LocalKeyService {
    /// Loads the master key, generating and persisting one on first use.
    pub fn new(path: &Path) -> Result<Self> {
        let master = match std::fs::read(path) {
            Ok(bytes) => {
                anyhow::ensure!(
                    bytes.len() == 32,
                    "master key at {} must be 32 bytes",
                    path.display()
                );
                Zeroizing::new(bytes)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let mut bytes = Zeroizing::new(vec![0u8; 32]);
                OsRng.fill_bytes(&mut bytes);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, &bytes)
                    .with_context(|| format!("cannot write master key to {}", path.display()))?;
                restrict_permissions(path)?;
                bytes
            }
            Err(err) => {
                return Err(anyhow::Error::from(err)
                    .context(format!("cannot read master key at {}", path.display())));
            }
        };
        Ok(Self { master })
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[async_trait]
impl KeyService for LocalKeyService {
    async fn generate_data_key(&self) -> snag::Result<DataKey> {
        let mut plaintext = Zeroizing::new(vec![0u8; 32]);
        OsRng.fill_bytes(&mut plaintext);
        let wrapped = secrets::seal(&plaintext, &self.master)?;
        Ok(DataKey { plaintext, wrapped })
    }

    async fn unwrap_key(&self, wrapped: &[u8]) -> snag::Result<Zeroizing<Vec<u8>>> {
        Ok(Zeroizing::new(secrets::open(wrapped, &self.master)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn data_keys_round_trip_through_the_master_key() {
        let dir = tempfile::tempdir().unwrap();
        let service = LocalKeyService::new(&dir.path().join("master.key")).unwrap();

        let data_key = service.generate_data_key().await.unwrap();
        let unwrapped = service.unwrap_key(&data_key.wrapped).await.unwrap();
        assert_eq!(*unwrapped, *data_key.plaintext);
    }

    #[tokio::test]
    async fn master_key_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.key");

        let first = LocalKeyService::new(&path).unwrap();
        let data_key = first.generate_data_key().await.unwrap();

        let second = LocalKeyService::new(&path).unwrap();
        let unwrapped = second.unwrap_key(&data_key.wrapped).await.unwrap();
        assert_eq!(*unwrapped, *data_key.plaintext);
    }

    #[test]
    fn truncated_master_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.key");
        std::fs::write(&path, [0u8; 16]).unwrap();
        assert!(LocalKeyService::new(&path).is_err());
    }
}
