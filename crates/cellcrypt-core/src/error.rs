use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// The key container refused to hand out a key.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Unsupported key length for {cipher}: got {got} bytes")]
    UnsupportedKeyLength { cipher: &'static str, got: usize },

    #[error("Encrypted data too short")]
    DataTooShort,

    #[error("Malformed data: {0}")]
    Malformed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Random number generation failed: {0}")]
    RngFailed(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    /// Verification mismatch, malformed signature wrapper, or missing signature.
    #[error("Signature verification failed: {0}")]
    SignatureFailed(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid visibility expression: {message} at position {position}")]
    InvalidVisibility {
        message: &'static str,
        position: usize,
    },

    #[error("Store error: {0}")]
    Store(String),
}

impl CryptoError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, CryptoError::PermissionDenied(_))
    }

    /// True for verification failures, the class callers treat as tampering.
    pub fn is_signature_failure(&self) -> bool {
        matches!(self, CryptoError::SignatureFailed(_))
    }
}
