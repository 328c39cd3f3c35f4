//! Key generation for provisioning local containers.

use base64ct::{Base64UrlUnpadded, Encoding};
use cellcrypt_core::keys::EncryptionKey;
use cellcrypt_core::signature::PublicKey;
use cellcrypt_core::{CryptoError, SignatureAlgorithm};
use serde::Deserialize;
use tracing::debug;
use zeroize::Zeroizing;

use crate::encryption::LocalEncryptionKeyContainer;
use crate::error::KeyFileError;
use crate::signature::LocalSignatureKeyContainer;

/// Every key length the ciphers accept, in bytes.
pub const SYMMETRIC_KEY_LENGTHS: [usize; 5] = [16, 24, 32, 48, 64];

/// One key to provision, at every version from 0 to `version`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRequest {
    #[serde(default)]
    pub attribute: Option<String>,
    pub id: String,
    pub version: i32,
}

impl KeyRequest {
    pub fn new(id: impl Into<String>, version: i32) -> Self {
        Self {
            attribute: None,
            id: id.into(),
            version,
        }
    }

    pub fn for_attribute(attribute: impl Into<String>, id: impl Into<String>, version: i32) -> Self {
        Self {
            attribute: Some(attribute.into()),
            id: id.into(),
            version,
        }
    }
}

/// Fresh random key material.
pub fn random_key(length: usize) -> Result<Zeroizing<Vec<u8>>, KeyFileError> {
    let mut key = Zeroizing::new(vec![0u8; length]);
    getrandom::getrandom(&mut key)
        .map_err(|e| CryptoError::RngFailed(e.to_string()))?;
    Ok(key)
}

/// A container holding random keys for every request, version and length.
pub fn generate_encryption_keys(
    requests: &[KeyRequest],
    lengths: &[usize],
) -> Result<LocalEncryptionKeyContainer, KeyFileError> {
    let mut container = LocalEncryptionKeyContainer::new();
    for request in requests {
        for version in 0..=request.version {
            for &length in lengths {
                let key = EncryptionKey::new(random_key(length)?.to_vec());
                match &request.attribute {
                    Some(attribute) => {
                        container.add_attribute_key(attribute, &request.id, version, key)?
                    }
                    None => container.add_key(&request.id, version, key)?,
                }
            }
        }
    }
    debug!(keys = container.len(), "generated encryption keys");
    Ok(container)
}

/// A container with a new key pair that signs as `id`.
pub fn generate_signing_keys(
    algorithm: SignatureAlgorithm,
    id: impl Into<Vec<u8>>,
) -> Result<LocalSignatureKeyContainer, KeyFileError> {
    let key = algorithm.generate()?;
    LocalSignatureKeyContainer::with_signing_key(key, id)
}

/// Signer id derived from a public key: its fingerprint in unpadded base64url.
pub fn fingerprint_id(key: &PublicKey) -> Vec<u8> {
    Base64UrlUnpadded::encode_string(&key.fingerprint()).into_bytes()
}

/// A container with a new key pair that signs under its own fingerprint.
pub fn generate_fingerprinted_signing_keys(
    algorithm: SignatureAlgorithm,
) -> Result<LocalSignatureKeyContainer, KeyFileError> {
    let key = algorithm.generate()?;
    let id = fingerprint_id(&key.public_key());
    LocalSignatureKeyContainer::with_signing_key(key, id)
}

/// Give every container the verifying key of every other container's signer.
pub fn exchange_verifying_keys(
    containers: &mut [LocalSignatureKeyContainer],
) -> Result<(), KeyFileError> {
    let signers: Vec<_> = containers
        .iter()
        .filter_map(|container| {
            container
                .signer()
                .map(|(id, key)| (id.to_vec(), key))
        })
        .collect();
    for container in containers.iter_mut() {
        for (id, key) in &signers {
            container.add_verifying_key(id.clone(), key.clone())?;
        }
    }
    Ok(())
}
