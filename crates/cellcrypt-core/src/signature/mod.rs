//! Entry signatures.
//!
//! An [`EntrySigner`] signs the whole key and value of an entry and stores
//! the signature in the value, the visibility, or a companion table as the
//! [`SignatureConfig`] says. [`SignedWriter`] and [`SignedScanner`] wrap the
//! store collaborators with it.

pub mod algorithm;
pub mod config;
pub mod merge;
pub mod scanner;
pub mod signer;
pub mod writer;

pub use algorithm::{PrivateKey, PublicKey, SignatureAlgorithm};
pub use config::{Destination, SignatureConfig};
pub use merge::MergeCursor;
pub use scanner::{SignedScanner, VerifyingCursor};
pub use signer::EntrySigner;
pub use writer::SignedWriter;
