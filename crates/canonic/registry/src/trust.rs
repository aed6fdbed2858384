use std::collections::BTreeMap;

use ed25519_dalek::VerifyingKey;

use crate::error::TrustError;

/// Set of Ed25519 verifying keys allowed to sign validator bundles.
///
/// Keys are addressed by their lowercase hex encoding, which is also what a
/// descriptor carries in its `signer` field.
#[derive(Clone, Debug, Default)]
pub struct TrustStore {
    keys: BTreeMap<String, VerifyingKey>,
}

impl TrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from hex-encoded verifying keys.
    pub fn from_hex_keys<I, S>(keys: I) -> Result<Self, TrustError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut store = Self::new();
        for key in keys {
            store.add_hex(key.as_ref())?;
        }
        Ok(store)
    }

    pub fn add(&mut self, key: VerifyingKey) {
        self.keys.insert(hex::encode(key.as_bytes()), key);
    }

    pub fn add_hex(&mut self, key_hex: &str) -> Result<(), TrustError> {
        let bytes = hex::decode(key_hex.trim())
            .map_err(|e| TrustError::InvalidHex(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| TrustError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))?;
        let key = VerifyingKey::from_bytes(&bytes).map_err(|e| TrustError::InvalidKey(e.to_string()))?;
        self.add(key);
        Ok(())
    }

    /// Look up a trusted key by its hex encoding.
    pub fn get(&self, signer_hex: &str) -> Option<&VerifyingKey> {
        self.keys.get(&signer_hex.to_ascii_lowercase())
    }

    pub fn is_trusted(&self, signer_hex: &str) -> bool {
        self.get(signer_hex).is_some()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn signers(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }
}
