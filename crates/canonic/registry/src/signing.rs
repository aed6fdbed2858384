use canonic_types::descriptor::signing_message;
use canonic_types::{TriggerPoint, ValidatorDescriptor, ValidatorId};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use rand::RngCore;

use crate::error::RegistrationError;
use crate::trust::TrustStore;

/// BLAKE3 hex digest of a validator payload.
pub fn content_hash(payload: &[u8]) -> String {
    blake3::hash(payload).to_hex().to_string()
}

/// Fresh Ed25519 signing key from the OS-seeded thread RNG.
pub fn generate_signing_key() -> SigningKey {
    let mut secret = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    SigningKey::from_bytes(&secret)
}

/// Produce a signed descriptor for `payload`.
pub fn sign_descriptor(
    signing_key: &SigningKey,
    id: ValidatorId,
    version: semver::Version,
    trigger: TriggerPoint,
    priority: u32,
    payload: &[u8],
) -> ValidatorDescriptor {
    let signer = hex::encode(signing_key.verifying_key().as_bytes());
    let content_hash = content_hash(payload);
    let message = signing_message(&id, &version, &content_hash, &signer, trigger, priority);
    let signature = signing_key.sign(&message);

    ValidatorDescriptor {
        id,
        version,
        content_hash,
        signature: hex::encode(signature.to_bytes()),
        signer,
        trigger,
        priority,
    }
}

/// Check a descriptor's signature against the trusted signer set.
pub fn verify_signature(
    descriptor: &ValidatorDescriptor,
    trust: &TrustStore,
) -> Result<(), RegistrationError> {
    let invalid = |reason: &str| RegistrationError::SignatureInvalid {
        id: descriptor.id.clone(),
        reason: reason.to_string(),
    };

    let key = trust
        .get(&descriptor.signer)
        .ok_or_else(|| invalid("unknown signer"))?;

    let sig_bytes = hex::decode(&descriptor.signature).map_err(|_| invalid("malformed signature hex"))?;
    let sig_bytes: [u8; 64] = sig_bytes
        .as_slice()
        .try_into()
        .map_err(|_| invalid("signature must be 64 bytes"))?;
    let signature = Signature::from_bytes(&sig_bytes);

    key.verify(&descriptor.signing_message(), &signature)
        .map_err(|_| invalid("signature does not verify"))
}

/// Pure verification of a bundle: signature by a trusted key, and payload
/// matching the declared content hash.
pub fn verify(descriptor: &ValidatorDescriptor, payload: &[u8], trust: &TrustStore) -> bool {
    verify_signature(descriptor, trust).is_ok() && content_hash(payload) == descriptor.content_hash
}
