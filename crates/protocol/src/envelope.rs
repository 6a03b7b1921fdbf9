//! Persisted session-envelope file format.

use serde::{Deserialize, Serialize};

/// Current envelope format version. Readers must reject anything else.
pub const ENVELOPE_VERSION: u32 = 1;

/// On-disk envelope wrapping an encrypted payload.
///
/// `encrypted_data` decrypts (after unwrapping the data key) to the payload
/// JSON. Absence of the file is a normal "no session" condition; an
/// unrecognized `version` is fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeFile {
    pub version: u32,
    /// Data key wrapped by the external key service, base64.
    pub encrypted_data_key: String,
    /// Nonce-prefixed AEAD ciphertext of the payload, base64.
    pub encrypted_data: String,
    /// ISO-8601 write timestamp.
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_field_names() {
        let envelope = EnvelopeFile {
            version: ENVELOPE_VERSION,
            encrypted_data_key: "a2V5".into(),
            encrypted_data: "ZGF0YQ==".into(),
            timestamp: "2026-08-07T12:00:00Z".into(),
        };
        let raw = serde_json::to_value(&envelope).unwrap();
        assert_eq!(raw["version"], 1);
        assert!(raw.get("encryptedDataKey").is_some());
        assert!(raw.get("encryptedData").is_some());
    }
}
