//! Local key containers for `cellcrypt-core`.
//!
//! Keys live in memory and persist to JSON key files, one for encryption
//! keys and one for signature keys. The [`generate`] helpers provision new
//! containers.

mod error;
mod format;

pub mod encryption;
pub mod generate;
pub mod signature;

pub use encryption::LocalEncryptionKeyContainer;
pub use error::KeyFileError;
pub use generate::{
    exchange_verifying_keys, fingerprint_id, generate_encryption_keys,
    generate_fingerprinted_signing_keys, generate_signing_keys, random_key, KeyRequest,
    SYMMETRIC_KEY_LENGTHS,
};
pub use signature::LocalSignatureKeyContainer;
