//! Joining a value table with its signature table.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use tracing::debug;

use super::signer::EntrySigner;
use crate::entry::{Entry, Key, PartialKey};
use crate::error::CryptoError;
use crate::store::{no_unprocessed_entry, EntryCursor, ProcessingCursor};

/// Walks value entries and signature entries side by side, verifying each
/// value against the signature whose row, family, qualifier and visibility
/// match.
///
/// In order, both cursors are assumed sorted the same way: signatures for
/// keys before the current value are skipped, and one past it means the
/// value has none. Out of order, every signature seen while searching is
/// buffered until its value arrives.
pub struct MergeCursor<'a> {
    values: EntryCursor<'a>,
    signatures: EntryCursor<'a>,
    signer: &'a EntrySigner,
    in_order: bool,
    buffered: BTreeMap<Key, Entry>,
    unprocessed: Option<Entry>,
}

impl<'a> MergeCursor<'a> {
    pub fn new(
        values: EntryCursor<'a>,
        signatures: EntryCursor<'a>,
        signer: &'a EntrySigner,
        in_order: bool,
    ) -> Self {
        Self {
            values,
            signatures,
            signer,
            in_order,
            buffered: BTreeMap::new(),
            unprocessed: None,
        }
    }

    fn take_buffered(&mut self, key: &Key) -> Option<Entry> {
        if let Some(signature) = self.buffered.remove(key) {
            return Some(signature);
        }
        let first = Key {
            timestamp: i64::MAX,
            deleted: true,
            ..key.clone()
        };
        let found = self
            .buffered
            .range(first..)
            .next()
            .filter(|(candidate, _)| {
                candidate.equals_prefix(key, PartialKey::RowColfamColqualColvis)
            })
            .map(|(candidate, _)| candidate.clone())?;
        self.buffered.remove(&found)
    }

    fn find_signature(&mut self, entry: &Entry) -> Result<Entry, CryptoError> {
        if let Some(signature) = self.take_buffered(&entry.key) {
            return Ok(signature);
        }

        loop {
            let signature = match self.signatures.next() {
                Some(signature) => signature?,
                None => {
                    return Err(CryptoError::SignatureFailed(
                        "no signature found".to_string(),
                    ))
                }
            };

            match entry
                .key
                .compare_prefix(&signature.key, PartialKey::RowColfamColqualColvis)
            {
                Ordering::Equal => return Ok(signature),
                Ordering::Less if self.in_order => {
                    return Err(CryptoError::SignatureFailed(
                        "no signature found for entry".to_string(),
                    ))
                }
                Ordering::Greater if self.in_order => {}
                _ => {
                    debug!(
                        buffered = self.buffered.len() + 1,
                        "buffering out-of-order signature"
                    );
                    self.buffered.insert(signature.key.clone(), signature);
                }
            }
        }
    }
}

impl Iterator for MergeCursor<'_> {
    type Item = Result<Entry, CryptoError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.unprocessed = None;
        let entry = match self.values.next()? {
            Ok(entry) => entry,
            Err(e) => return Some(Err(e)),
        };
        let verified = self
            .find_signature(&entry)
            .and_then(|signature| self.signer.verify(&entry, Some(&signature)));
        if verified.is_ok() {
            self.unprocessed = Some(entry);
        }
        Some(verified)
    }
}

impl ProcessingCursor for MergeCursor<'_> {
    fn unprocessed(&self) -> Result<&Entry, CryptoError> {
        self.unprocessed.as_ref().ok_or_else(no_unprocessed_entry)
    }
}
