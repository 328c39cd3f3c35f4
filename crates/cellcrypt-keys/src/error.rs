use cellcrypt_core::CryptoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyFileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Base64 decode error: {0}")]
    Base64Decode(String),

    #[error("Unsupported key file version: {0}")]
    UnsupportedVersion(u64),

    #[error("Invalid key: {0}")]
    InvalidKey(String),
}
