//! Signature configuration.
//!
//! ```toml
//! [signature]
//! algorithm = "ECDSA_P256"
//! destination = "SEPARATE_TABLE"
//! table = "records_signatures"
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::algorithm::SignatureAlgorithm;
use crate::error::CryptoError;
use crate::visibility::ColumnVisibility;

fn invalid(message: impl Into<String>) -> CryptoError {
    CryptoError::InvalidConfig(message.into())
}

/// Where the signature of an entry is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Destination {
    /// Prepended to the value.
    Value,
    /// Appended to the visibility expression as an OR-ed quoted term.
    ColumnVisibility,
    /// Written to a companion entry with the same key in another table.
    SeparateTable,
}

impl Destination {
    pub const ALL: [Destination; 3] = [
        Destination::Value,
        Destination::ColumnVisibility,
        Destination::SeparateTable,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Destination::Value => "VALUE",
            Destination::ColumnVisibility => "COLUMN_VISIBILITY",
            Destination::SeparateTable => "SEPARATE_TABLE",
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Destination {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Destination::ALL
            .into_iter()
            .find(|destination| destination.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| invalid(format!("unknown signature destination: {s}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureConfig {
    algorithm: SignatureAlgorithm,
    provider: Option<String>,
    destination: Destination,
    destination_table: Option<String>,
    default_visibility: Option<Vec<u8>>,
}

impl SignatureConfig {
    pub fn new(
        algorithm: SignatureAlgorithm,
        provider: Option<String>,
        destination: Destination,
        destination_table: Option<String>,
        default_visibility: Option<Vec<u8>>,
    ) -> Result<Self, CryptoError> {
        let config = Self {
            algorithm,
            provider,
            destination,
            destination_table,
            default_visibility,
        };
        config.validate()?;
        Ok(config)
    }

    /// Signatures prepended to the value.
    pub fn value(algorithm: SignatureAlgorithm) -> Self {
        Self {
            algorithm,
            provider: None,
            destination: Destination::Value,
            destination_table: None,
            default_visibility: None,
        }
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    pub fn destination(&self) -> Destination {
        self.destination
    }

    /// Signature table; set exactly when the destination is a separate table.
    pub fn destination_table(&self) -> Option<&str> {
        self.destination_table.as_deref()
    }

    /// Substituted for empty visibilities; set exactly when signatures go
    /// into the visibility.
    pub fn default_visibility(&self) -> Option<&[u8]> {
        self.default_visibility.as_deref()
    }

    fn validate(&self) -> Result<(), CryptoError> {
        match (&self.destination_table, self.destination) {
            (None, Destination::SeparateTable) => {
                return Err(invalid("a separate signature table requires a table name"))
            }
            (Some(table), Destination::SeparateTable) if table.is_empty() => {
                return Err(invalid("signature table name is empty"))
            }
            (Some(_), Destination::Value | Destination::ColumnVisibility) => {
                return Err(invalid(format!(
                    "a table name is only used with {}",
                    Destination::SeparateTable
                )))
            }
            _ => {}
        }

        match (&self.default_visibility, self.destination) {
            (None, Destination::ColumnVisibility) => {
                return Err(invalid(
                    "signatures in the visibility require a default visibility",
                ))
            }
            (Some(visibility), Destination::ColumnVisibility) => {
                if ColumnVisibility::parse(visibility.clone())?.is_empty() {
                    return Err(invalid("default visibility is empty"));
                }
            }
            (Some(_), Destination::Value | Destination::SeparateTable) => {
                return Err(invalid(format!(
                    "a default visibility is only used with {}",
                    Destination::ColumnVisibility
                )))
            }
            (None, _) => {}
        }
        Ok(())
    }

    pub fn from_toml_str(text: &str) -> Result<Self, CryptoError> {
        let file: RawSignatureFile = toml::from_str(text).map_err(|e| invalid(e.to_string()))?;
        let raw = file.signature;
        Self::new(
            raw.algorithm,
            raw.provider,
            raw.destination.unwrap_or(Destination::Value),
            raw.table,
            raw.default_visibility.map(String::into_bytes),
        )
    }

    pub fn to_toml_string(&self) -> Result<String, CryptoError> {
        let default_visibility = self
            .default_visibility
            .as_ref()
            .map(|visibility| {
                String::from_utf8(visibility.clone())
                    .map_err(|_| invalid("default visibility is not UTF-8"))
            })
            .transpose()?;
        let file = RawSignatureFile {
            signature: RawSignatureConfig {
                algorithm: self.algorithm,
                provider: self.provider.clone(),
                destination: Some(self.destination),
                table: self.destination_table.clone(),
                default_visibility,
            },
        };
        toml::to_string(&file).map_err(|e| invalid(e.to_string()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSignatureFile {
    signature: RawSignatureConfig,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawSignatureConfig {
    algorithm: SignatureAlgorithm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    destination: Option<Destination>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default_visibility: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_destination_by_default() {
        let config = SignatureConfig::from_toml_str(
            r#"
            [signature]
            algorithm = "ED25519"
            "#,
        )
        .unwrap();
        assert_eq!(config, SignatureConfig::value(SignatureAlgorithm::Ed25519));
    }

    #[test]
    fn separate_table_needs_table() {
        let err = SignatureConfig::from_toml_str(
            r#"
            [signature]
            algorithm = "ECDSA_P256"
            destination = "SEPARATE_TABLE"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, CryptoError::InvalidConfig(_)));

        let config = SignatureConfig::from_toml_str(
            r#"
            [signature]
            algorithm = "ECDSA_P256"
            destination = "SEPARATE_TABLE"
            table = "sigs"
            "#,
        )
        .unwrap();
        assert_eq!(config.destination_table(), Some("sigs"));
    }

    #[test]
    fn visibility_destination_needs_valid_default() {
        let build = |visibility: Option<&str>| {
            SignatureConfig::new(
                SignatureAlgorithm::Ed25519,
                None,
                Destination::ColumnVisibility,
                None,
                visibility.map(|v| v.as_bytes().to_vec()),
            )
        };
        assert!(build(None).is_err());
        assert!(build(Some("")).is_err());
        assert!(matches!(
            build(Some("a&|b")),
            Err(CryptoError::InvalidVisibility { .. })
        ));
        build(Some("public")).unwrap();
    }

    #[test]
    fn options_only_with_their_destination() {
        assert!(SignatureConfig::new(
            SignatureAlgorithm::Ed25519,
            None,
            Destination::Value,
            Some("sigs".to_string()),
            None,
        )
        .is_err());
        assert!(SignatureConfig::new(
            SignatureAlgorithm::Ed25519,
            None,
            Destination::SeparateTable,
            Some("sigs".to_string()),
            Some(b"public".to_vec()),
        )
        .is_err());
    }

    #[test]
    fn toml_survives_write_and_read() {
        let config = SignatureConfig::new(
            SignatureAlgorithm::EcdsaP256,
            Some("default".to_string()),
            Destination::ColumnVisibility,
            None,
            Some(b"public|admin".to_vec()),
        )
        .unwrap();
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("defaultVisibility = \"public|admin\""));
        assert_eq!(SignatureConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn rejects_unknown_keys_and_algorithms() {
        assert!(SignatureConfig::from_toml_str("[signature]\nalgorithm = \"RSA\"\n").is_err());
        assert!(SignatureConfig::from_toml_str(
            "[signature]\nalgorithm = \"ED25519\"\nkeyLength = 3\n"
        )
        .is_err());
    }

    #[test]
    fn destination_names() {
        for destination in Destination::ALL {
            assert_eq!(destination.name().parse::<Destination>().unwrap(), destination);
        }
    }
}
