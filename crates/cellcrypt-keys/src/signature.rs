//! In-process signature key container backed by a JSON key file.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use cellcrypt_core::keys::{SignatureKeyContainer, SigningKey, VerifyingKey};
use cellcrypt_core::signature::{PrivateKey, SignatureAlgorithm};
use cellcrypt_core::CryptoError;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::KeyFileError;
use crate::format::{decode_key, encode_key, parse_versioned, CURRENT_VERSION};

/// Holds at most one signing key and any number of verifying keys by signer id.
#[derive(Debug, Default)]
pub struct LocalSignatureKeyContainer {
    signing_key: Option<SigningKey>,
    verifying_keys: BTreeMap<Vec<u8>, VerifyingKey>,
}

impl LocalSignatureKeyContainer {
    /// A container that can only verify.
    pub fn new() -> Self {
        Self::default()
    }

    /// A container that signs as `id`. Its own public key is registered for
    /// verification under the same id.
    pub fn with_signing_key(key: PrivateKey, id: impl Into<Vec<u8>>) -> Result<Self, KeyFileError> {
        let id = id.into();
        let mut container = Self::new();
        container.add_verifying_key(id.clone(), VerifyingKey::new(key.public_key()))?;
        container.signing_key = Some(SigningKey { key, id });
        Ok(container)
    }

    pub fn add_verifying_key(
        &mut self,
        id: impl Into<Vec<u8>>,
        key: VerifyingKey,
    ) -> Result<(), KeyFileError> {
        let id = id.into();
        if id.is_empty() {
            return Err(KeyFileError::InvalidKey("signer id is empty".to_string()));
        }
        self.verifying_keys.insert(id, key);
        Ok(())
    }

    /// The signer id and public key of the signing key, if there is one.
    pub fn signer(&self) -> Option<(&[u8], VerifyingKey)> {
        self.signing_key
            .as_ref()
            .map(|signing| (signing.id.as_slice(), VerifyingKey::new(signing.key.public_key())))
    }

    pub fn verifying_keys(&self) -> impl Iterator<Item = (&[u8], &VerifyingKey)> {
        self.verifying_keys.iter().map(|(id, key)| (id.as_slice(), key))
    }

    pub fn write<W: Write>(&self, out: W) -> Result<(), KeyFileError> {
        let signing_key = self
            .signing_key
            .as_ref()
            .map(|signing| -> Result<StoredSigningKey, KeyFileError> {
                Ok(StoredSigningKey {
                    key_id: key_id_string(&signing.id)?,
                    algorithm: signing.key.algorithm(),
                    key: encode_key(&signing.key.to_bytes()),
                })
            })
            .transpose()?;
        let verification_keys = self
            .verifying_keys
            .iter()
            .map(|(id, verifying)| {
                Ok(StoredVerifyingKey {
                    key_id: key_id_string(id)?,
                    algorithm: verifying.key.algorithm(),
                    key: encode_key(&verifying.key.to_bytes()),
                    start_validity: verifying.start_validity,
                    end_validity: verifying.end_validity,
                })
            })
            .collect::<Result<Vec<_>, KeyFileError>>()?;

        let file = SignatureKeyFile {
            version: CURRENT_VERSION,
            signing_key,
            verification_keys,
        };
        serde_json::to_writer_pretty(out, &file)?;
        Ok(())
    }

    pub fn read<R: Read>(input: R) -> Result<Self, KeyFileError> {
        let file: SignatureKeyFile = parse_versioned(serde_json::from_reader(input)?)?;

        let mut container = match file.signing_key {
            Some(stored) => {
                let bytes = Zeroizing::new(decode_key(&stored.key)?);
                let key = stored.algorithm.private_key_from_bytes(&bytes)?;
                let mut container = Self::new();
                container.signing_key = Some(SigningKey {
                    key,
                    id: stored.key_id.into_bytes(),
                });
                container
            }
            None => Self::new(),
        };

        for stored in file.verification_keys {
            let key = stored.algorithm.public_key_from_bytes(&decode_key(&stored.key)?)?;
            container.add_verifying_key(
                stored.key_id.into_bytes(),
                VerifyingKey {
                    key,
                    start_validity: stored.start_validity,
                    end_validity: stored.end_validity,
                },
            )?;
        }
        debug!(
            signer = container.signing_key.is_some(),
            verifying_keys = container.verifying_keys.len(),
            "loaded signature keys"
        );
        Ok(container)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), KeyFileError> {
        let mut out = BufWriter::new(File::create(path)?);
        self.write(&mut out)?;
        out.flush()?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, KeyFileError> {
        Self::read(BufReader::new(File::open(path)?))
    }
}

fn key_id_string(id: &[u8]) -> Result<String, KeyFileError> {
    String::from_utf8(id.to_vec())
        .map_err(|_| KeyFileError::InvalidKey("signer id is not UTF-8".to_string()))
}

impl SignatureKeyContainer for LocalSignatureKeyContainer {
    fn get_signing_key(&self) -> Result<SigningKey, CryptoError> {
        self.signing_key
            .clone()
            .ok_or_else(|| CryptoError::PermissionDenied("no signing key available".to_string()))
    }

    fn get_verifying_key(&self, id: &[u8]) -> Result<VerifyingKey, CryptoError> {
        self.verifying_keys.get(id).cloned().ok_or_else(|| {
            CryptoError::PermissionDenied(format!(
                "no verification key for {{id={}}}",
                String::from_utf8_lossy(id)
            ))
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignatureKeyFile {
    version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    signing_key: Option<StoredSigningKey>,
    #[serde(default)]
    verification_keys: Vec<StoredVerifyingKey>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSigningKey {
    key_id: String,
    algorithm: SignatureAlgorithm,
    key: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredVerifyingKey {
    key_id: String,
    algorithm: SignatureAlgorithm,
    key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    start_validity: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    end_validity: Option<i64>,
}
