//! Client-side encryption and signing for sorted wide-column key-value stores.
//!
//! Entries are encrypted field by field before they reach the store, with
//! keys shared through the visibility expression, and queries are rewritten
//! so that deterministic ciphertext can still be searched. Signatures cover
//! the whole entry and live in the value, the visibility, or a companion
//! table.

pub mod cipher;
pub mod encryption;
pub mod entry;
pub mod error;
pub mod keys;
pub mod signature;
pub mod store;
pub mod varint;
pub mod visibility;

pub use cipher::CipherKind;
pub use encryption::{
    EncryptedScanner, EncryptedWriter, EncryptionConfig, EntryEncryptor, FieldEncryptorConfig,
};
pub use entry::{Column, Entry, Field, Key, PartialKey, Range};
pub use error::CryptoError;
pub use keys::{
    DerivedKeyContainer, EncryptionKey, EncryptionKeyContainer, KeyWithVersion,
    SignatureKeyContainer, SigningKey, VerifyingKey,
};
pub use signature::{
    Destination, EntrySigner, SignatureAlgorithm, SignatureConfig, SignedScanner, SignedWriter,
};
pub use store::{EntryCursor, EntryScanner, EntryWriter, MemoryTable, ProcessingCursor};
pub use visibility::{Authorizations, ColumnVisibility};
