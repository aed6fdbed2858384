use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use canonic_types::ValidatorDescriptor;
use serde::{Deserialize, Serialize};

use crate::error::RegistrationError;
use crate::validator::Validator;

/// A validator ready for registration.
#[derive(Clone)]
pub struct ValidatorBundle {
    pub descriptor: ValidatorDescriptor,
    /// Exact bytes the content hash commits to.
    pub payload: Vec<u8>,
    pub validator: Arc<dyn Validator>,
}

impl ValidatorBundle {
    pub fn new(
        descriptor: ValidatorDescriptor,
        payload: impl Into<Vec<u8>>,
        validator: Arc<dyn Validator>,
    ) -> Self {
        Self {
            descriptor,
            payload: payload.into(),
            validator,
        }
    }
}

impl fmt::Debug for ValidatorBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorBundle")
            .field("descriptor", &self.descriptor)
            .field("payload_len", &self.payload.len())
            .finish_non_exhaustive()
    }
}

/// On-disk form of a bundle: the signed descriptor plus its payload text.
///
/// The payload is kept as a string so the hashed bytes survive a
/// serialize/deserialize cycle unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub descriptor: ValidatorDescriptor,
    pub payload: String,
}

impl BundleManifest {
    pub fn from_file(path: &Path) -> Result<Self, RegistrationError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RegistrationError::Malformed(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| RegistrationError::Malformed(format!("{}: {}", path.display(), e)))
    }

    pub fn to_file(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Read every `*.json` manifest in `dir`, sorted by file name.
    ///
    /// A manifest that fails to parse is returned as an error alongside its
    /// path rather than aborting the scan.
    pub fn load_dir(
        dir: &Path,
    ) -> std::io::Result<Vec<(PathBuf, Result<BundleManifest, RegistrationError>)>> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        Ok(paths
            .into_iter()
            .map(|path| {
                let manifest = Self::from_file(&path);
                (path, manifest)
            })
            .collect())
    }

    pub fn into_bundle(self, validator: Arc<dyn Validator>) -> ValidatorBundle {
        ValidatorBundle::new(self.descriptor, self.payload.into_bytes(), validator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::{generate_signing_key, sign_descriptor};
    use canonic_types::{TriggerPoint, ValidatorId};

    #[test]
    fn load_dir_reports_bad_files_without_aborting() {
        let dir = tempfile::tempdir().unwrap();
        let key = generate_signing_key();
        let payload = r#"{"required":["to","subject"]}"#;
        let manifest = BundleManifest {
            descriptor: sign_descriptor(
                &key,
                ValidatorId::new("email.audit"),
                semver::Version::new(1, 0, 0),
                TriggerPoint::PreAction,
                10,
                payload.as_bytes(),
            ),
            payload: payload.to_string(),
        };
        manifest.to_file(&dir.path().join("a-audit.json")).unwrap();
        std::fs::write(dir.path().join("b-broken.json"), "{ nope").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let loaded = BundleManifest::load_dir(dir.path()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].1.as_ref().unwrap(), &manifest);
        assert!(matches!(loaded[1].1, Err(RegistrationError::Malformed(_))));
    }
}
