//! Field and entry encryption configuration.
//!
//! Text form is TOML with one table per destination field:
//!
//! ```toml
//! [ROW]
//! cipher = "AES_SIV_DETERMINISTIC"
//! keyId = "rows"
//! sources = ["ROW", "COLUMN_FAMILY"]
//!
//! [COLUMN_FAMILY]
//! cipher = "AES_GCM"
//!
//! [VALUE]
//! cipher = "AES_GCM"
//! useVisibility = true
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::cipher::CipherKind;
use crate::entry::Field;
use crate::error::CryptoError;

fn invalid(message: impl Into<String>) -> CryptoError {
    CryptoError::InvalidConfig(message.into())
}

/// How one destination field is produced from its source fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldEncryptorConfig {
    cipher: CipherKind,
    provider: Option<String>,
    use_visibility: bool,
    key_id: String,
    key_length: usize,
    destination: Field,
    sources: BTreeSet<Field>,
}

impl FieldEncryptorConfig {
    pub fn new(
        cipher: CipherKind,
        provider: Option<String>,
        use_visibility: bool,
        key_id: impl Into<String>,
        key_length: usize,
        destination: Field,
        sources: impl IntoIterator<Item = Field>,
    ) -> Result<Self, CryptoError> {
        let config = Self {
            cipher,
            provider,
            use_visibility,
            key_id: key_id.into(),
            key_length,
            destination,
            sources: sources.into_iter().collect(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Default key id (the cipher name) and default key length.
    pub fn with_defaults(
        cipher: CipherKind,
        destination: Field,
        sources: impl IntoIterator<Item = Field>,
    ) -> Result<Self, CryptoError> {
        Self::new(
            cipher,
            None,
            false,
            cipher.name(),
            cipher.default_key_length(),
            destination,
            sources,
        )
    }

    pub fn cipher(&self) -> CipherKind {
        self.cipher
    }

    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    /// Whether the field key is derived from the entry's visibility expression.
    pub fn use_visibility(&self) -> bool {
        self.use_visibility
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Key length in bytes.
    pub fn key_length(&self) -> usize {
        self.key_length
    }

    pub fn destination(&self) -> Field {
        self.destination
    }

    /// Iterated in field order; this order is part of the wire format.
    pub fn sources(&self) -> &BTreeSet<Field> {
        &self.sources
    }

    fn validate(&self) -> Result<(), CryptoError> {
        if self.use_visibility && self.cipher.is_deterministic() {
            return Err(invalid(
                "cannot deterministically encrypt when encrypting fields using the visibility expression",
            ));
        }
        if self.key_id.is_empty() {
            return Err(invalid("keyId is empty"));
        }
        if !self.cipher.is_valid_key_length(self.key_length) {
            return Err(invalid(format!(
                "invalid key length {} for {}",
                self.key_length, self.cipher
            )));
        }
        if !Field::KEY_DESTINATION_FIELDS.contains(&self.destination)
            && self.destination != Field::Value
        {
            return Err(invalid(format!("invalid destination {}", self.destination)));
        }
        if self.sources.is_empty() {
            return Err(invalid("sources is empty"));
        }

        if self.destination == Field::Value {
            if let Some(source) = self.sources.iter().find(|s| **s != Field::Value) {
                return Err(invalid(format!(
                    "{source} cannot be encrypted into the value field"
                )));
            }
        } else if let Some(source) = self
            .sources
            .iter()
            .find(|s| !Field::KEY_SOURCE_FIELDS.contains(*s))
        {
            return Err(invalid(format!("{source} cannot be encrypted into a key field")));
        }
        Ok(())
    }
}

/// The field encryptors applied to every entry, unique by destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionConfig {
    configs: Vec<FieldEncryptorConfig>,
}

impl EncryptionConfig {
    pub fn new(configs: Vec<FieldEncryptorConfig>) -> Result<Self, CryptoError> {
        if configs.is_empty() {
            return Err(invalid("fieldEncryptorConfigs is empty"));
        }

        let mut destinations = BTreeSet::new();
        let mut sources = BTreeSet::new();
        for config in &configs {
            config.validate()?;
            if !destinations.insert(config.destination) {
                return Err(invalid(format!(
                    "duplicate destination {} in fieldEncryptorConfigs",
                    config.destination
                )));
            }
            sources.extend(config.sources.iter().copied());
        }
        if let Some(destination) = destinations.iter().find(|d| !sources.contains(*d)) {
            return Err(invalid(format!(
                "{destination} was a destination, but it was not a source"
            )));
        }

        Ok(Self { configs })
    }

    pub fn field_configs(&self) -> &[FieldEncryptorConfig] {
        &self.configs
    }

    pub fn from_toml_str(text: &str) -> Result<Self, CryptoError> {
        let tables: BTreeMap<String, RawFieldConfig> =
            toml::from_str(text).map_err(|e| invalid(e.to_string()))?;

        let mut configs = Vec::with_capacity(tables.len());
        for (name, raw) in tables {
            configs.push(raw.into_config(name.parse()?)?);
        }
        configs.sort_by_key(|config| config.destination);
        Self::new(configs)
    }

    pub fn to_toml_string(&self) -> Result<String, CryptoError> {
        let tables: BTreeMap<String, RawFieldConfig> = self
            .configs
            .iter()
            .map(|config| (config.destination.name().to_string(), RawFieldConfig::from(config)))
            .collect();
        toml::to_string(&tables).map_err(|e| invalid(e.to_string()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawFieldConfig {
    cipher: CipherKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    provider: Option<String>,
    #[serde(default)]
    use_visibility: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sources: Option<Vec<Field>>,
}

impl RawFieldConfig {
    fn into_config(self, destination: Field) -> Result<FieldEncryptorConfig, CryptoError> {
        FieldEncryptorConfig::new(
            self.cipher,
            self.provider,
            self.use_visibility,
            self.key_id.unwrap_or_else(|| self.cipher.name().to_string()),
            self.key_length.unwrap_or(self.cipher.default_key_length()),
            destination,
            self.sources.unwrap_or_else(|| vec![destination]),
        )
    }
}

impl From<&FieldEncryptorConfig> for RawFieldConfig {
    fn from(config: &FieldEncryptorConfig) -> Self {
        Self {
            cipher: config.cipher,
            provider: config.provider.clone(),
            use_visibility: config.use_visibility,
            key_id: Some(config.key_id.clone()),
            key_length: Some(config.key_length),
            sources: Some(config.sources.iter().copied().collect()),
        }
    }
}
