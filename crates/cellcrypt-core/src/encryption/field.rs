//! Encryption of one destination field from its configured source fields.
//!
//! Destination layout: `[key metadata][cipher blob]`, where the key metadata
//! is either the key version as a vint or the visibility share stream. The
//! plaintext is the source fields, each as `[vint len][bytes]`, in field order.

use std::collections::BTreeSet;
use std::sync::Arc;

use zeroize::Zeroizing;

use super::config::FieldEncryptorConfig;
use super::share::ShareCodec;
use crate::cipher::fill_random;
use crate::entry::{Entry, Field};
use crate::error::CryptoError;
use crate::keys::EncryptionKeyContainer;
use crate::varint::{write_len_prefixed, write_vint, ByteReader};
use crate::visibility::ColumnVisibility;

pub struct FieldEncryptor {
    config: FieldEncryptorConfig,
    keys: Arc<dyn EncryptionKeyContainer>,
}

impl FieldEncryptor {
    pub fn new(config: FieldEncryptorConfig, keys: Arc<dyn EncryptionKeyContainer>) -> Self {
        Self { config, keys }
    }

    pub fn config(&self) -> &FieldEncryptorConfig {
        &self.config
    }

    pub fn destination(&self) -> Field {
        self.config.destination()
    }

    pub fn sources(&self) -> &BTreeSet<Field> {
        self.config.sources()
    }

    fn share_codec(&self) -> ShareCodec<'_> {
        ShareCodec {
            keys: self.keys.as_ref(),
            cipher: self.config.cipher(),
            key_id: self.config.key_id(),
            key_length: self.config.key_length(),
        }
    }

    /// Encrypt the sources of `entry` into the destination field of `result`.
    pub fn encrypt(
        &self,
        entry: &Entry,
        result: &mut Entry,
        visibility: &ColumnVisibility,
    ) -> Result<(), CryptoError> {
        let plaintext = self.concat_sources(entry)?;
        let mut destination = Vec::new();
        let key = self.write_key(visibility, &mut destination)?;
        destination.extend_from_slice(&self.config.cipher().encrypt(&key, &plaintext)?);
        result.set_bytes(self.config.destination(), destination)
    }

    /// Decrypt the destination field of `entry` back into the sources of `result`.
    pub fn decrypt(
        &self,
        entry: &Entry,
        result: &mut Entry,
        visibility: &ColumnVisibility,
    ) -> Result<(), CryptoError> {
        let mut input = ByteReader::new(entry.bytes(self.config.destination())?);
        let key = self.read_key(visibility, &mut input)?;
        let plaintext = Zeroizing::new(self.config.cipher().decrypt(&key, input.remaining())?);

        let mut parts = ByteReader::new(&plaintext);
        for source in self.config.sources() {
            let bytes = parts.read_len_prefixed()?;
            result.set_bytes(*source, bytes.to_vec())?;
        }
        if !parts.is_empty() {
            return Err(CryptoError::Malformed(format!(
                "trailing bytes after the sources of {}",
                self.config.destination()
            )));
        }
        Ok(())
    }

    fn concat_sources(&self, entry: &Entry) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let mut out = Zeroizing::new(Vec::new());
        for source in self.config.sources() {
            write_len_prefixed(&mut out, entry.bytes(*source)?)?;
        }
        Ok(out)
    }

    fn write_key(
        &self,
        visibility: &ColumnVisibility,
        out: &mut Vec<u8>,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if !self.config.use_visibility() {
            let key = self
                .keys
                .get_key(self.config.key_id(), self.config.key_length())?;
            write_vint(out, key.version);
            return Ok(Zeroizing::new(key.key.clone()));
        }

        let mut key = Zeroizing::new(vec![0u8; self.config.key_length()]);
        if let Some(root) = visibility.root() {
            fill_random(&mut key)?;
            self.share_codec().write_share(visibility, root, &key, out)?;
        }
        Ok(key)
    }

    fn read_key(
        &self,
        visibility: &ColumnVisibility,
        input: &mut ByteReader<'_>,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if !self.config.use_visibility() {
            let version = input.read_vint()?;
            return self
                .keys
                .get_key_version(self.config.key_id(), version, self.config.key_length());
        }

        match visibility.root() {
            Some(root) => self
                .share_codec()
                .read_share(visibility, root, input, false)?
                .ok_or_else(|| {
                    CryptoError::PermissionDenied(format!(
                        "visibility {} does not grant the key for {}",
                        String::from_utf8_lossy(visibility.expression()),
                        self.config.destination()
                    ))
                }),
            None => Ok(Zeroizing::new(vec![0u8; self.config.key_length()])),
        }
    }

    /// Deterministic and every source is among `available`.
    pub fn can_be_filtered_server_side(&self, available: &[Field]) -> bool {
        self.config.cipher().is_deterministic()
            && self.config.sources().iter().all(|s| available.contains(s))
    }

    /// Deterministic and the sources are exactly `fields`.
    pub fn can_search_for(&self, fields: &BTreeSet<Field>) -> bool {
        self.config.cipher().is_deterministic() && fields == self.config.sources()
    }

    /// One destination value per key version, as it would be stored for `entry`.
    ///
    /// With `following`, each value carries a trailing `0x00`, the smallest
    /// value sorting after it.
    pub fn server_side_filter_values(
        &self,
        entry: &Entry,
        following: bool,
    ) -> Result<Vec<Vec<u8>>, CryptoError> {
        let plaintext = self.concat_sources(entry)?;
        self.keys
            .get_keys(self.config.key_id(), self.config.key_length())?
            .iter()
            .map(|key| {
                let mut value = Vec::new();
                write_vint(&mut value, key.version);
                value.extend_from_slice(&self.config.cipher().encrypt(&key.key, &plaintext)?);
                if following {
                    value.push(0);
                }
                Ok(value)
            })
            .collect()
    }
}
