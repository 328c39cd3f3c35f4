//! Pieces shared by the JSON key file formats.

use base64ct::{Base64, Encoding};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::KeyFileError;

pub(crate) const CURRENT_VERSION: u64 = 1;

pub(crate) fn encode_key(bytes: &[u8]) -> String {
    Base64::encode_string(bytes)
}

pub(crate) fn decode_key(text: &str) -> Result<Vec<u8>, KeyFileError> {
    Base64::decode_vec(text).map_err(|e| KeyFileError::Base64Decode(e.to_string()))
}

/// Parse a key file after checking its `version` field.
pub(crate) fn parse_versioned<T: DeserializeOwned>(data: Value) -> Result<T, KeyFileError> {
    let version = data
        .get("version")
        .and_then(Value::as_u64)
        .ok_or_else(|| KeyFileError::InvalidKey("key file has no version".to_string()))?;
    if version != CURRENT_VERSION {
        return Err(KeyFileError::UnsupportedVersion(version));
    }
    Ok(serde_json::from_value(data)?)
}
