//! Reading encrypted tables: query rewriting on the way in, decryption and
//! client-side filtering on the way out.

use std::collections::BTreeSet;

use tracing::debug;

use super::entry::EntryEncryptor;
use crate::entry::{Column, Entry, Range};
use crate::error::CryptoError;
use crate::store::{no_unprocessed_entry, EntryCursor, EntryScanner, ProcessingCursor};

/// Decrypts a cursor over stored entries, dropping decrypted entries that
/// fall outside the client-side ranges or columns (when any are set).
pub struct DecryptingCursor<'a> {
    inner: EntryCursor<'a>,
    encryptor: &'a EntryEncryptor,
    ranges: Vec<Range>,
    columns: Vec<Column>,
    unprocessed: Option<Entry>,
}

impl<'a> DecryptingCursor<'a> {
    pub fn new(
        inner: EntryCursor<'a>,
        encryptor: &'a EntryEncryptor,
        ranges: Vec<Range>,
        columns: Vec<Column>,
    ) -> Self {
        Self {
            inner,
            encryptor,
            ranges,
            columns,
            unprocessed: None,
        }
    }

    fn wanted(&self, entry: &Entry) -> bool {
        let in_range =
            self.ranges.is_empty() || self.ranges.iter().any(|range| range.contains(&entry.key));
        let in_columns = self.columns.is_empty()
            || self.columns.iter().any(|column| column.matches(&entry.key));
        in_range && in_columns
    }
}

impl Iterator for DecryptingCursor<'_> {
    type Item = Result<Entry, CryptoError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.unprocessed = None;
        loop {
            let raw = match self.inner.next()? {
                Ok(raw) => raw,
                Err(e) => return Some(Err(e)),
            };
            let entry = match self.encryptor.decrypt(&raw) {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e)),
            };
            if self.wanted(&entry) {
                self.unprocessed = Some(raw);
                return Some(Ok(entry));
            }
        }
    }
}

impl ProcessingCursor for DecryptingCursor<'_> {
    fn unprocessed(&self) -> Result<&Entry, CryptoError> {
        self.unprocessed.as_ref().ok_or_else(no_unprocessed_entry)
    }
}

/// The store-side form of a query and what must be re-checked afterwards.
#[derive(Debug, Default)]
struct ScanPlan {
    server_ranges: Vec<Range>,
    server_columns: Vec<Column>,
    client_ranges: Vec<Range>,
    client_columns: Vec<Column>,
}

/// Scanner over an encrypted table.
///
/// Ranges and columns are given in plaintext terms and rewritten per scan.
pub struct EncryptedScanner<S> {
    scanner: S,
    encryptor: EntryEncryptor,
    ranges: Vec<Range>,
    columns: BTreeSet<Column>,
}

impl<S: EntryScanner> EncryptedScanner<S> {
    pub fn new(scanner: S, encryptor: EntryEncryptor) -> Self {
        Self {
            scanner,
            encryptor,
            ranges: Vec::new(),
            columns: BTreeSet::new(),
        }
    }

    pub fn encryptor(&self) -> &EntryEncryptor {
        &self.encryptor
    }

    /// Replace the ranges to scan. Empty scans the whole table.
    pub fn set_ranges(&mut self, ranges: impl IntoIterator<Item = Range>) {
        self.ranges = ranges.into_iter().collect();
    }

    pub fn fetch_column_family(&mut self, family: impl Into<Vec<u8>>) {
        self.columns.insert(Column::family(family));
    }

    pub fn fetch_column(&mut self, family: impl Into<Vec<u8>>, qualifier: impl Into<Vec<u8>>) {
        self.columns.insert(Column::new(family, qualifier));
    }

    pub fn clear_columns(&mut self) {
        self.columns.clear();
    }

    /// Scan with the configured ranges and columns.
    pub fn entries(&self) -> Result<DecryptingCursor<'_>, CryptoError> {
        let columns: Vec<Column> = self.columns.iter().cloned().collect();
        self.cursor(&self.ranges, &columns)
    }

    fn cursor(
        &self,
        ranges: &[Range],
        columns: &[Column],
    ) -> Result<DecryptingCursor<'_>, CryptoError> {
        let plan = self.plan(ranges, columns)?;
        let inner = self.scanner.scan(&plan.server_ranges, &plan.server_columns)?;
        Ok(DecryptingCursor::new(
            inner,
            &self.encryptor,
            plan.client_ranges,
            plan.client_columns,
        ))
    }

    fn plan(&self, ranges: &[Range], columns: &[Column]) -> Result<ScanPlan, CryptoError> {
        let mut plan = ScanPlan::default();

        let mut filter_ranges = false;
        for range in ranges {
            let (server_ranges, needs_client) = self.encryptor.transform_range(range)?;
            plan.server_ranges.extend(server_ranges);
            filter_ranges |= needs_client;
        }
        if filter_ranges {
            plan.client_ranges = ranges.to_vec();
        }

        let mut filter_columns = false;
        let mut fetch_all_columns = false;
        let mut server_columns = BTreeSet::new();
        for column in columns {
            let result = match &column.qualifier {
                None => self.encryptor.get_column_family_filter(&column.family)?,
                Some(qualifier) => self.encryptor.get_column_filter(&column.family, qualifier)?,
            };
            fetch_all_columns |= result.server_side_filters.is_empty();
            filter_columns |= result.needs_client_side_filtering;
            server_columns.extend(result.server_side_filters);
        }
        if !fetch_all_columns {
            plan.server_columns = server_columns.into_iter().collect();
        }
        if filter_columns {
            plan.client_columns = columns.to_vec();
        }

        debug!(
            server_ranges = plan.server_ranges.len(),
            server_columns = plan.server_columns.len(),
            filter_ranges,
            filter_columns,
            "planned encrypted scan"
        );
        Ok(plan)
    }
}

impl<S: EntryScanner> EntryScanner for EncryptedScanner<S> {
    fn scan(&self, ranges: &[Range], columns: &[Column]) -> Result<EntryCursor<'_>, CryptoError> {
        Ok(Box::new(self.cursor(ranges, columns)?))
    }
}
