//! Key material and the key-container capabilities the encryptors and signers consume.
//!
//! Containers hand out versioned symmetric keys by `(id, length)`, attribute-scoped
//! keys for visibility sharing, and signing/verifying keys. Lack of rights is
//! reported as [`CryptoError::PermissionDenied`].

use std::collections::HashMap;

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;
use crate::signature::algorithm::{PrivateKey, PublicKey};
use crate::varint::{vint_len, write_len_prefixed, write_vint};

/// A key together with the version it was issued under.
#[derive(Debug, Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyWithVersion {
    pub key: Vec<u8>,
    pub version: i32,
}

impl KeyWithVersion {
    pub fn new(key: Vec<u8>, version: i32) -> Self {
        Self { key, version }
    }
}

/// True when `time` falls inside the optional inclusive window.
fn within(start: Option<i64>, end: Option<i64>, time: i64) -> bool {
    start.map_or(true, |start| start <= time) && end.map_or(true, |end| time <= end)
}

/// Symmetric key material with an optional validity window.
#[derive(Debug, Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    pub key: Vec<u8>,
    pub start_validity: Option<i64>,
    pub end_validity: Option<i64>,
}

impl EncryptionKey {
    pub fn new(key: Vec<u8>) -> Self {
        Self {
            key,
            start_validity: None,
            end_validity: None,
        }
    }

    pub fn with_validity(key: Vec<u8>, start: Option<i64>, end: Option<i64>) -> Self {
        Self {
            key,
            start_validity: start,
            end_validity: end,
        }
    }

    /// Both bounds are inclusive.
    pub fn is_valid(&self, time: i64) -> bool {
        within(self.start_validity, self.end_validity, time)
    }
}

/// A public key with an optional validity window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyingKey {
    pub key: PublicKey,
    pub start_validity: Option<i64>,
    pub end_validity: Option<i64>,
}

impl VerifyingKey {
    pub fn new(key: PublicKey) -> Self {
        Self {
            key,
            start_validity: None,
            end_validity: None,
        }
    }

    pub fn is_valid(&self, time: i64) -> bool {
        within(self.start_validity, self.end_validity, time)
    }
}

/// The private key used for signing and the signer id written next to each signature.
#[derive(Debug, Clone)]
pub struct SigningKey {
    pub key: PrivateKey,
    pub id: Vec<u8>,
}

pub trait EncryptionKeyContainer {
    /// Every version of the key, ascending by version.
    fn get_keys(&self, id: &str, length: usize) -> Result<Vec<KeyWithVersion>, CryptoError>;

    /// The newest version of the key.
    fn get_key(&self, id: &str, length: usize) -> Result<KeyWithVersion, CryptoError>;

    fn get_key_version(
        &self,
        id: &str,
        version: i32,
        length: usize,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError>;

    /// The newest version of the key scoped to a visibility attribute.
    fn get_attribute_key(
        &self,
        attribute: &str,
        id: &str,
        length: usize,
    ) -> Result<KeyWithVersion, CryptoError>;

    fn get_attribute_key_version(
        &self,
        attribute: &str,
        id: &str,
        version: i32,
        length: usize,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError>;
}

pub trait SignatureKeyContainer {
    fn get_signing_key(&self) -> Result<SigningKey, CryptoError>;

    fn get_verifying_key(&self, id: &[u8]) -> Result<VerifyingKey, CryptoError>;
}

/// Formats the permission-denied message for a missing key.
pub fn no_such_key(
    attribute: Option<&str>,
    id: &str,
    length: usize,
    version: Option<i32>,
) -> CryptoError {
    let mut description = String::from("no such key available {");
    if let Some(attribute) = attribute {
        description.push_str(&format!("attribute={attribute}, "));
    }
    description.push_str(&format!("id={id}, length={length}"));
    if let Some(version) = version {
        description.push_str(&format!(", version={version}"));
    }
    description.push('}');
    CryptoError::PermissionDenied(description)
}

const DERIVED_KEY_SALT: &[u8] = b"cellcrypt:derived-key:v1";

/// Encryption keys derived on demand from one root secret with HKDF-SHA256.
///
/// Only ids and attributes registered with a version count are served;
/// versions run from 1 to that count. Every `(attribute, id, version, length)`
/// tuple yields an independent key.
pub struct DerivedKeyContainer {
    root: Vec<u8>,
    keys: HashMap<String, i32>,
    attribute_keys: HashMap<(String, String), i32>,
}

impl DerivedKeyContainer {
    pub fn new(root: &[u8]) -> Self {
        Self {
            root: root.to_vec(),
            keys: HashMap::new(),
            attribute_keys: HashMap::new(),
        }
    }

    /// Grant access to `versions` versions of the key `id`.
    pub fn with_key(mut self, id: &str, versions: i32) -> Self {
        self.keys.insert(id.to_string(), versions);
        self
    }

    /// Grant access to `versions` versions of the key `id` scoped to `attribute`.
    pub fn with_attribute_key(mut self, attribute: &str, id: &str, versions: i32) -> Self {
        self.attribute_keys
            .insert((attribute.to_string(), id.to_string()), versions);
        self
    }

    fn derive(
        &self,
        attribute: Option<&str>,
        id: &str,
        version: i32,
        length: usize,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let mut info = Vec::new();
        match attribute {
            Some(attribute) => {
                info.push(1);
                write_len_prefixed(&mut info, attribute.as_bytes())?;
            }
            None => info.push(0),
        }
        write_len_prefixed(&mut info, id.as_bytes())?;
        write_vint(&mut info, version);
        write_vint(&mut info, vint_len(length)?);

        let hk = Hkdf::<Sha256>::new(Some(DERIVED_KEY_SALT), &self.root);
        let mut okm = Zeroizing::new(vec![0u8; length]);
        hk.expand(&info, &mut okm)
            .map_err(|e| CryptoError::EncryptionFailed(format!("HKDF expand failed: {e}")))?;
        Ok(okm)
    }

    fn max_version(&self, attribute: Option<&str>, id: &str) -> Option<i32> {
        match attribute {
            Some(attribute) => self
                .attribute_keys
                .get(&(attribute.to_string(), id.to_string()))
                .copied(),
            None => self.keys.get(id).copied(),
        }
        .filter(|versions| *versions > 0)
    }

    fn versioned(
        &self,
        attribute: Option<&str>,
        id: &str,
        version: i32,
        length: usize,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        match self.max_version(attribute, id) {
            Some(max) if (1..=max).contains(&version) => {
                self.derive(attribute, id, version, length)
            }
            _ => Err(no_such_key(attribute, id, length, Some(version))),
        }
    }

    fn newest(
        &self,
        attribute: Option<&str>,
        id: &str,
        length: usize,
    ) -> Result<KeyWithVersion, CryptoError> {
        let max = self
            .max_version(attribute, id)
            .ok_or_else(|| no_such_key(attribute, id, length, None))?;
        let key = self.derive(attribute, id, max, length)?;
        Ok(KeyWithVersion::new(key.to_vec(), max))
    }
}

impl Drop for DerivedKeyContainer {
    fn drop(&mut self) {
        self.root.zeroize();
    }
}

impl EncryptionKeyContainer for DerivedKeyContainer {
    fn get_keys(&self, id: &str, length: usize) -> Result<Vec<KeyWithVersion>, CryptoError> {
        let max = self
            .max_version(None, id)
            .ok_or_else(|| no_such_key(None, id, length, None))?;
        (1..=max)
            .map(|version| {
                let key = self.derive(None, id, version, length)?;
                Ok(KeyWithVersion::new(key.to_vec(), version))
            })
            .collect()
    }

    fn get_key(&self, id: &str, length: usize) -> Result<KeyWithVersion, CryptoError> {
        self.newest(None, id, length)
    }

    fn get_key_version(
        &self,
        id: &str,
        version: i32,
        length: usize,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.versioned(None, id, version, length)
    }

    fn get_attribute_key(
        &self,
        attribute: &str,
        id: &str,
        length: usize,
    ) -> Result<KeyWithVersion, CryptoError> {
        self.newest(Some(attribute), id, length)
    }

    fn get_attribute_key_version(
        &self,
        attribute: &str,
        id: &str,
        version: i32,
        length: usize,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.versioned(Some(attribute), id, version, length)
    }
}
