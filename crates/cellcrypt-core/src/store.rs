//! The store collaborators the encrypting and signing layers sit on, and a
//! sorted in-memory table implementing them.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use tracing::trace;

use crate::entry::{Column, Entry, Key, PartialKey, Range};
use crate::error::CryptoError;

/// Forward-only cursor over entries. Each item may fail on its own.
pub type EntryCursor<'a> = Box<dyn Iterator<Item = Result<Entry, CryptoError>> + 'a>;

// ============================================================================
// Collaborator traits
// ============================================================================

/// Read side of a sorted key-value store with range and column push-down.
pub trait EntryScanner {
    /// Entries inside any of `ranges` and matching any of `columns`, in key
    /// order. Empty `ranges` means every key; empty `columns` means every column.
    fn scan(&self, ranges: &[Range], columns: &[Column]) -> Result<EntryCursor<'_>, CryptoError>;
}

impl<S: EntryScanner + ?Sized> EntryScanner for &S {
    fn scan(&self, ranges: &[Range], columns: &[Column]) -> Result<EntryCursor<'_>, CryptoError> {
        (**self).scan(ranges, columns)
    }
}

/// Write side of a store. Delete-marked entries remove older versions.
pub trait EntryWriter {
    fn put(&mut self, entry: Entry) -> Result<(), CryptoError>;

    fn flush(&mut self) -> Result<(), CryptoError> {
        Ok(())
    }
}

impl<W: EntryWriter + ?Sized> EntryWriter for &mut W {
    fn put(&mut self, entry: Entry) -> Result<(), CryptoError> {
        (**self).put(entry)
    }

    fn flush(&mut self) -> Result<(), CryptoError> {
        (**self).flush()
    }
}

/// A cursor that also hands back the stored form of the entry it last
/// returned, before decryption or verification.
pub trait ProcessingCursor: Iterator<Item = Result<Entry, CryptoError>> {
    /// Valid only right after `next()` returned an entry.
    fn unprocessed(&self) -> Result<&Entry, CryptoError>;
}

pub(crate) fn no_unprocessed_entry() -> CryptoError {
    CryptoError::InvalidArgument("next() has not returned an entry".to_string())
}

// ============================================================================
// MemoryTable
// ============================================================================

/// Sorted in-memory table.
///
/// Interior mutability via `parking_lot::Mutex`, so one table can back
/// several writers and scanners at once.
#[derive(Debug, Default)]
pub struct MemoryTable {
    entries: Mutex<BTreeMap<Key, Vec<u8>>>,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `entry`, or apply it as a delete marker when it is one.
    pub fn insert(&self, entry: Entry) {
        let mut entries = self.entries.lock();
        if entry.key.deleted {
            let marker = entry.key;
            let before = entries.len();
            entries.retain(|key, _| {
                !(key.equals_prefix(&marker, PartialKey::RowColfamColqualColvis)
                    && key.timestamp <= marker.timestamp)
            });
            trace!(removed = before - entries.len(), "applied delete marker");
        } else {
            entries.insert(entry.key, entry.value);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Snapshot of every stored entry in key order.
    pub fn entries(&self) -> Vec<Entry> {
        self.entries
            .lock()
            .iter()
            .map(|(key, value)| Entry::new(key.clone(), value.clone()))
            .collect()
    }
}

impl EntryScanner for MemoryTable {
    fn scan(&self, ranges: &[Range], columns: &[Column]) -> Result<EntryCursor<'_>, CryptoError> {
        let matching: Vec<Entry> = self
            .entries
            .lock()
            .iter()
            .filter(|(key, _)| ranges.is_empty() || ranges.iter().any(|range| range.contains(key)))
            .filter(|(key, _)| {
                columns.is_empty() || columns.iter().any(|column| column.matches(key))
            })
            .map(|(key, value)| Entry::new(key.clone(), value.clone()))
            .collect();
        Ok(Box::new(matching.into_iter().map(Ok)))
    }
}

impl EntryWriter for &MemoryTable {
    fn put(&mut self, entry: Entry) -> Result<(), CryptoError> {
        self.insert(entry);
        Ok(())
    }
}
