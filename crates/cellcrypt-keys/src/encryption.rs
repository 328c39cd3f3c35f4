//! In-process encryption key container backed by a JSON key file.
//!
//! ```json
//! {
//!   "version": 1,
//!   "keys": [
//!     {"id": "AES_GCM", "version": 1, "key": "…"},
//!     {"attribute": "admin", "id": "labels", "version": 0, "key": "…",
//!      "startValidity": 0, "endValidity": 1700000000000}
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use cellcrypt_core::keys::{no_such_key, EncryptionKey, EncryptionKeyContainer, KeyWithVersion};
use cellcrypt_core::CryptoError;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::KeyFileError;
use crate::format::{decode_key, encode_key, parse_versioned, CURRENT_VERSION};

/// Keys are looked up by attribute, id and length together.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct KeyLookup {
    attribute: Option<String>,
    id: String,
    length: usize,
}

#[derive(Debug, Default)]
pub struct LocalEncryptionKeyContainer {
    keys: BTreeMap<KeyLookup, BTreeMap<i32, EncryptionKey>>,
}

impl LocalEncryptionKeyContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) one version of the key `id`. The key's length is
    /// part of its identity.
    pub fn add_key(&mut self, id: &str, version: i32, key: EncryptionKey) -> Result<(), KeyFileError> {
        self.insert(None, id, version, key)
    }

    /// Add (or replace) one version of the key `id` scoped to `attribute`.
    pub fn add_attribute_key(
        &mut self,
        attribute: &str,
        id: &str,
        version: i32,
        key: EncryptionKey,
    ) -> Result<(), KeyFileError> {
        self.insert(Some(attribute), id, version, key)
    }

    fn insert(
        &mut self,
        attribute: Option<&str>,
        id: &str,
        version: i32,
        key: EncryptionKey,
    ) -> Result<(), KeyFileError> {
        if id.is_empty() {
            return Err(KeyFileError::InvalidKey("id is empty".to_string()));
        }
        if version < 0 {
            return Err(KeyFileError::InvalidKey(format!("version {version} is negative")));
        }
        if key.key.is_empty() {
            return Err(KeyFileError::InvalidKey("key is empty".to_string()));
        }
        if let (Some(start), Some(end)) = (key.start_validity, key.end_validity) {
            if end < start {
                return Err(KeyFileError::InvalidKey(
                    "end validity cannot come before start validity".to_string(),
                ));
            }
        }

        let lookup = KeyLookup {
            attribute: attribute.map(str::to_string),
            id: id.to_string(),
            length: key.key.len(),
        };
        self.keys.entry(lookup).or_default().insert(version, key);
        Ok(())
    }

    /// Number of stored key versions across all ids and lengths.
    pub fn len(&self) -> usize {
        self.keys.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn versions(
        &self,
        attribute: Option<&str>,
        id: &str,
        length: usize,
    ) -> Result<&BTreeMap<i32, EncryptionKey>, CryptoError> {
        let lookup = KeyLookup {
            attribute: attribute.map(str::to_string),
            id: id.to_string(),
            length,
        };
        self.keys
            .get(&lookup)
            .filter(|versions| !versions.is_empty())
            .ok_or_else(|| no_such_key(attribute, id, length, None))
    }

    fn newest(
        &self,
        attribute: Option<&str>,
        id: &str,
        length: usize,
    ) -> Result<KeyWithVersion, CryptoError> {
        self.versions(attribute, id, length)?
            .iter()
            .next_back()
            .map(|(version, key)| KeyWithVersion::new(key.key.clone(), *version))
            .ok_or_else(|| no_such_key(attribute, id, length, None))
    }

    fn versioned(
        &self,
        attribute: Option<&str>,
        id: &str,
        version: i32,
        length: usize,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.versions(attribute, id, length)?
            .get(&version)
            .map(|key| Zeroizing::new(key.key.clone()))
            .ok_or_else(|| no_such_key(attribute, id, length, Some(version)))
    }

    pub fn write<W: Write>(&self, out: W) -> Result<(), KeyFileError> {
        let keys = self
            .keys
            .iter()
            .flat_map(|(lookup, versions)| {
                versions.iter().map(move |(version, key)| StoredKey {
                    attribute: lookup.attribute.clone(),
                    id: lookup.id.clone(),
                    version: *version,
                    key: encode_key(&key.key),
                    start_validity: key.start_validity,
                    end_validity: key.end_validity,
                })
            })
            .collect();
        let file = KeyFile {
            version: CURRENT_VERSION,
            keys,
        };
        serde_json::to_writer_pretty(out, &file)?;
        Ok(())
    }

    pub fn read<R: Read>(input: R) -> Result<Self, KeyFileError> {
        let file: KeyFile = parse_versioned(serde_json::from_reader(input)?)?;
        let mut container = Self::new();
        for stored in file.keys {
            let key = EncryptionKey::with_validity(
                decode_key(&stored.key)?,
                stored.start_validity,
                stored.end_validity,
            );
            container.insert(stored.attribute.as_deref(), &stored.id, stored.version, key)?;
        }
        debug!(keys = container.len(), "loaded encryption keys");
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

impl EncryptionKeyContainer for LocalEncryptionKeyContainer {
    fn get_keys(&self, id: &str, length: usize) -> Result<Vec<KeyWithVersion>, CryptoError> {
        Ok(self
            .versions(None, id, length)?
            .iter()
            .map(|(version, key)| KeyWithVersion::new(key.key.clone(), *version))
            .collect())
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

#[derive(Debug, Serialize, Deserialize)]
struct KeyFile {
    version: u64,
    keys: Vec<StoredKey>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attribute: Option<String>,
    id: String,
    version: i32,
    key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    start_validity: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    end_validity: Option<i64>,
}
