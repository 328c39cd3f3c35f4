//! Field-level encryption of entries.
//!
//! - [`config`]: which destination fields are encrypted from which sources
//! - [`field`]: one destination field
//! - [`entry`]: every configured field, plus range/column query rewriting
//! - [`scanner`] / [`writer`]: the store collaborators wrapped with encryption

pub mod config;
pub mod entry;
pub mod field;
pub mod scanner;
mod share;
pub mod writer;

pub use config::{EncryptionConfig, FieldEncryptorConfig};
pub use entry::{ColumnFilterResult, EntryEncryptor};
pub use field::FieldEncryptor;
pub use scanner::{DecryptingCursor, EncryptedScanner};
pub use writer::EncryptedWriter;
