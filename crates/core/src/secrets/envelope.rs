//! AEAD primitives and the encrypted envelope file.

use std::path::Path;

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, KeyInit, Nonce};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use snag_protocol::{ENVELOPE_VERSION, EnvelopeFile, from_b64, to_b64};

use super::SecretCache;
use crate::error::{Result, SnagError};

const NONCE_LEN: usize = 12;

/// Encrypts `plaintext` under a 32-byte key with AES-256-GCM.
///
/// A random 96-bit nonce is generated per call and prepended to the
/// ciphertext.
pub fn seal(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| SnagError::Crypto("data key must be 32 bytes".into()))?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| SnagError::Crypto(format!("encryption failed: {e}")))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts nonce-prefixed AEAD output. Tampered or truncated input fails
/// closed.
pub fn open(data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if data.len() <= NONCE_LEN {
        return Err(SnagError::Crypto("ciphertext truncated".into()));
    }
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| SnagError::Crypto("data key must be 32 bytes".into()))?;
    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| SnagError::Crypto(format!("decryption failed: {e}")))
}

impl SecretCache {
    /// Serializes `value`, encrypts it under a fresh data key, and writes
    /// the envelope file.
    pub async fn save_encrypted<T: Serialize>(&self, value: &T, path: &Path) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        let data_key = self.generate_data_key().await?;
        let encrypted = seal(&payload, &data_key.plaintext)?;

        let envelope = EnvelopeFile {
            version: ENVELOPE_VERSION,
            encrypted_data_key: to_b64(&data_key.wrapped),
            encrypted_data: to_b64(&encrypted),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_vec_pretty(&envelope)?)?;
        debug!(target = "snag.secrets", path = %path.display(), "saved encrypted envelope");
        Ok(())
    }

    /// Loads and decrypts an envelope file.
    ///
    /// A missing file is `None`, not an error. An unsupported version is
    /// fatal and short-circuits before any key unwrapping.
    pub async fn load_decrypted<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let envelope: EnvelopeFile = serde_json::from_slice(&raw)?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(SnagError::UnsupportedVersion(envelope.version));
        }

        let wrapped = from_b64(&envelope.encrypted_data_key)
            .map_err(|e| SnagError::Crypto(format!("bad data-key encoding: {e}")))?;
        let encrypted = from_b64(&envelope.encrypted_data)
            .map_err(|e| SnagError::Crypto(format!("bad payload encoding: {e}")))?;

        let key = self.unwrap_key(&wrapped).await?;
        let payload = open(&encrypted, &key)?;
        Ok(Some(serde_json::from_slice(&payload)?))
    }
}
