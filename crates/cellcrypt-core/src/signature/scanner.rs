use tracing::debug;

use super::config::Destination;
use super::merge::MergeCursor;
use super::signer::EntrySigner;
use crate::entry::{Column, Entry, Range};
use crate::error::CryptoError;
use crate::store::{no_unprocessed_entry, EntryCursor, EntryScanner, ProcessingCursor};

/// Verifies entries that carry their own signature.
pub struct VerifyingCursor<'a> {
    inner: EntryCursor<'a>,
    signer: &'a EntrySigner,
    unprocessed: Option<Entry>,
}

impl<'a> VerifyingCursor<'a> {
    pub fn new(inner: EntryCursor<'a>, signer: &'a EntrySigner) -> Self {
        Self {
            inner,
            signer,
            unprocessed: None,
        }
    }
}

impl Iterator for VerifyingCursor<'_> {
    type Item = Result<Entry, CryptoError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.unprocessed = None;
        let raw = match self.inner.next()? {
            Ok(raw) => raw,
            Err(e) => return Some(Err(e)),
        };
        let verified = self.signer.verify(&raw, None);
        if verified.is_ok() {
            self.unprocessed = Some(raw);
        }
        Some(verified)
    }
}

impl ProcessingCursor for VerifyingCursor<'_> {
    fn unprocessed(&self) -> Result<&Entry, CryptoError> {
        self.unprocessed.as_ref().ok_or_else(no_unprocessed_entry)
    }
}

/// Scanner over a signed table, optionally joined with its signature table.
pub struct SignedScanner<S> {
    scanner: S,
    signature_scanner: Option<S>,
    signer: EntrySigner,
    in_order: bool,
}

impl<S: EntryScanner> SignedScanner<S> {
    /// Signatures inside the scanned entries.
    pub fn new(scanner: S, signer: EntrySigner) -> Result<Self, CryptoError> {
        if signer.config().destination() == Destination::SeparateTable {
            return Err(CryptoError::InvalidArgument(
                "signatures are in a separate table, but no signature scanner was given"
                    .to_string(),
            ));
        }
        Ok(Self {
            scanner,
            signature_scanner: None,
            signer,
            in_order: true,
        })
    }

    /// Signatures in a companion table scanned with the same ranges and columns.
    pub fn with_signature_table(
        scanner: S,
        signature_scanner: S,
        signer: EntrySigner,
    ) -> Result<Self, CryptoError> {
        if signer.config().destination() != Destination::SeparateTable {
            return Err(CryptoError::InvalidArgument(format!(
                "signatures are stored in the {}, not a separate table",
                signer.config().destination()
            )));
        }
        Ok(Self {
            scanner,
            signature_scanner: Some(signature_scanner),
            signer,
            in_order: true,
        })
    }

    /// Whether both tables return entries in the same order. When not, the
    /// signature side is buffered while joining.
    pub fn set_in_order(&mut self, in_order: bool) {
        self.in_order = in_order;
    }

    pub fn signer(&self) -> &EntrySigner {
        &self.signer
    }

    pub fn entries(
        &self,
        ranges: &[Range],
        columns: &[Column],
    ) -> Result<Box<dyn ProcessingCursor + '_>, CryptoError> {
        let values = self.scanner.scan(ranges, columns)?;
        match &self.signature_scanner {
            None => Ok(Box::new(VerifyingCursor::new(values, &self.signer))),
            Some(signature_scanner) => {
                debug!(in_order = self.in_order, "joining signature table");
                let signatures = signature_scanner.scan(ranges, columns)?;
                Ok(Box::new(MergeCursor::new(
                    values,
                    signatures,
                    &self.signer,
                    self.in_order,
                )))
            }
        }
    }
}

impl<S: EntryScanner> EntryScanner for SignedScanner<S> {
    fn scan(&self, ranges: &[Range], columns: &[Column]) -> Result<EntryCursor<'_>, CryptoError> {
        Ok(Box::new(self.entries(ranges, columns)?))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::entry::Key;
    use crate::keys::{SignatureKeyContainer, SigningKey, VerifyingKey};
    use crate::signature::algorithm::SignatureAlgorithm;
    use crate::signature::config::SignatureConfig;
    use crate::store::MemoryTable;

    struct OneSigner(SigningKey);

    impl SignatureKeyContainer for OneSigner {
        fn get_signing_key(&self) -> Result<SigningKey, CryptoError> {
            Ok(self.0.clone())
        }

        fn get_verifying_key(&self, _id: &[u8]) -> Result<VerifyingKey, CryptoError> {
            Ok(VerifyingKey::new(self.0.key.public_key()))
        }
    }

    fn signer(destination: Destination) -> EntrySigner {
        let (table, visibility) = match destination {
            Destination::SeparateTable => (Some("sigs".to_string()), None),
            Destination::ColumnVisibility => (None, Some(b"public".to_vec())),
            Destination::Value => (None, None),
        };
        let config = SignatureConfig::new(
            SignatureAlgorithm::EcdsaP256,
            None,
            destination,
            table,
            visibility,
        )
        .unwrap();
        let key = SignatureAlgorithm::EcdsaP256.generate().unwrap();
        EntrySigner::new(config, Arc::new(OneSigner(SigningKey { key, id: b"s".to_vec() })))
    }

    fn entry(row: &str, family: &str) -> Entry {
        Entry::new(Key::new(row, family, "q", "", 3), format!("{row}:{family}"))
    }

    #[test]
    fn verifies_inline_signatures() {
        for destination in [Destination::Value, Destination::ColumnVisibility] {
            let signer = signer(destination);
            let table = MemoryTable::new();
            for row in ["a", "b"] {
                table.insert(signer.sign(&entry(row, "f"), true).unwrap());
            }
            let scanner = SignedScanner::new(&table, signer).unwrap();
            let mut cursor = scanner.entries(&[Range::row("b")], &[]).unwrap();
            let found = cursor.next().unwrap().unwrap();
            assert_eq!(found.value, b"b:f");
            assert_ne!(cursor.unprocessed().unwrap(), &found);
            assert!(cursor.next().is_none());
        }
    }

    #[test]
    fn joins_signature_table() {
        let signer = signer(Destination::SeparateTable);
        let values = MemoryTable::new();
        let signatures = MemoryTable::new();
        for family in ["f", "g"] {
            let value = entry("r", family);
            signatures.insert(signer.sign(&value, true).unwrap());
            values.insert(value);
        }

        let mut scanner = SignedScanner::with_signature_table(&values, &signatures, signer).unwrap();
        for in_order in [true, false] {
            scanner.set_in_order(in_order);
            let found: Vec<Entry> = scanner
                .scan(&[], &[Column::family("g")])
                .unwrap()
                .map(Result::unwrap)
                .collect();
            assert_eq!(found, vec![entry("r", "g")]);
        }
    }

    #[test]
    fn unsigned_entries_fail() {
        let signer = signer(Destination::Value);
        let table = MemoryTable::new();
        table.insert(Entry::new(Key::new("a", "f", "q", "", 1), "plain"));
        let scanner = SignedScanner::new(&table, signer).unwrap();
        let err = scanner.scan(&[], &[]).unwrap().next().unwrap().unwrap_err();
        assert!(err.is_signature_failure());
    }

    #[test]
    fn constructor_must_match_destination() {
        let table = MemoryTable::new();
        assert!(SignedScanner::new(&table, signer(Destination::SeparateTable)).is_err());
        assert!(
            SignedScanner::with_signature_table(&table, &table, signer(Destination::Value))
                .is_err()
        );
    }
}
