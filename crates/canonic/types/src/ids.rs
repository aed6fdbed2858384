use serde::{Deserialize, Serialize};

// Strong typed IDs used throughout the gate.

/// Identity of a registered validator (e.g. `recipient.allowlist`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidatorId(pub String);

/// Identity of a message template in the template store.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(pub String);

/// BLAKE3 digest (lowercase hex) identifying one action across retries.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl ValidatorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TemplateId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Fingerprint {
    /// Wrap a finished BLAKE3 hash.
    pub fn from_hash(hash: blake3::Hash) -> Self {
        Self(hash.to_hex().to_string())
    }

    /// Parse a hex fingerprint, rejecting anything that is not a BLAKE3 digest.
    pub fn parse(hex: &str) -> Option<Self> {
        blake3::Hash::from_hex(hex.trim())
            .ok()
            .map(Self::from_hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for tables and log lines.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(12);
        &self.0[..end]
    }
}

impl std::fmt::Display for ValidatorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fp:{}", self.0)
    }
}

impl From<&str> for ValidatorId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for TemplateId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_parse_round_trips_blake3_hex() {
        let fp = Fingerprint::from_hash(blake3::hash(b"canonic"));
        let parsed = Fingerprint::parse(fp.as_str()).unwrap();
        assert_eq!(fp, parsed);
    }

    #[test]
    fn fingerprint_parse_rejects_garbage() {
        assert!(Fingerprint::parse("not-a-digest").is_none());
        assert!(Fingerprint::parse("abcd").is_none());
    }

    #[test]
    fn display_formats() {
        let fp = Fingerprint::from_hash(blake3::hash(b"x"));
        assert!(format!("{}", fp).starts_with("fp:"));
        assert_eq!(fp.short().len(), 12);
        assert_eq!(format!("{}", ValidatorId::new("email.audit")), "email.audit");
    }
}
