//! Entry model: the seven entry fields, keys and their ordering, ranges, and
//! column filters.
//!
//! Keys sort byte-lexicographically by row, column family, column qualifier
//! and column visibility, then by timestamp descending (newest first), then
//! with delete markers ahead of ordinary entries.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

/// The fields of an entry, in composite-key prefix order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Field {
    Row,
    ColumnFamily,
    ColumnQualifier,
    ColumnVisibility,
    Timestamp,
    Delete,
    Value,
}

impl Field {
    pub const ALL: [Field; 7] = [
        Field::Row,
        Field::ColumnFamily,
        Field::ColumnQualifier,
        Field::ColumnVisibility,
        Field::Timestamp,
        Field::Delete,
        Field::Value,
    ];

    /// Fields that may feed an encrypted key field.
    pub const KEY_SOURCE_FIELDS: [Field; 4] = [
        Field::Row,
        Field::ColumnFamily,
        Field::ColumnQualifier,
        Field::ColumnVisibility,
    ];

    /// Key fields that may hold ciphertext.
    pub const KEY_DESTINATION_FIELDS: [Field; 3] =
        [Field::Row, Field::ColumnFamily, Field::ColumnQualifier];

    pub fn name(self) -> &'static str {
        match self {
            Field::Row => "ROW",
            Field::ColumnFamily => "COLUMN_FAMILY",
            Field::ColumnQualifier => "COLUMN_QUALIFIER",
            Field::ColumnVisibility => "COLUMN_VISIBILITY",
            Field::Timestamp => "TIMESTAMP",
            Field::Delete => "DELETE",
            Field::Value => "VALUE",
        }
    }

    /// Whether the field holds a byte string (everything but timestamp and delete).
    pub fn is_bytes(self) -> bool {
        !matches!(self, Field::Timestamp | Field::Delete)
    }

    /// The key prefix that ends with this field. `None` for the value.
    pub fn partial_key(self) -> Option<PartialKey> {
        match self {
            Field::Row => Some(PartialKey::Row),
            Field::ColumnFamily => Some(PartialKey::RowColfam),
            Field::ColumnQualifier => Some(PartialKey::RowColfamColqual),
            Field::ColumnVisibility => Some(PartialKey::RowColfamColqualColvis),
            Field::Timestamp => Some(PartialKey::RowColfamColqualColvisTime),
            Field::Delete => Some(PartialKey::RowColfamColqualColvisTimeDel),
            Field::Value => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Field {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .into_iter()
            .find(|field| field.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CryptoError::InvalidConfig(format!("unknown entry field: {s}")))
    }
}

/// A prefix of the key fields, used for prefix comparison and successor keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PartialKey {
    Row,
    RowColfam,
    RowColfamColqual,
    RowColfamColqualColvis,
    RowColfamColqualColvisTime,
    RowColfamColqualColvisTimeDel,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Key {
    pub row: Vec<u8>,
    pub column_family: Vec<u8>,
    pub column_qualifier: Vec<u8>,
    pub column_visibility: Vec<u8>,
    pub timestamp: i64,
    pub deleted: bool,
}

impl Key {
    pub fn new(
        row: impl Into<Vec<u8>>,
        column_family: impl Into<Vec<u8>>,
        column_qualifier: impl Into<Vec<u8>>,
        column_visibility: impl Into<Vec<u8>>,
        timestamp: i64,
    ) -> Self {
        Self {
            row: row.into(),
            column_family: column_family.into(),
            column_qualifier: column_qualifier.into(),
            column_visibility: column_visibility.into(),
            timestamp,
            deleted: false,
        }
    }

    /// The first possible key of a row.
    pub fn from_row(row: impl Into<Vec<u8>>) -> Self {
        Self {
            row: row.into(),
            timestamp: i64::MAX,
            ..Self::default()
        }
    }

    pub fn with_deleted(mut self, deleted: bool) -> Self {
        self.deleted = deleted;
        self
    }

    pub fn bytes(&self, field: Field) -> Result<&[u8], CryptoError> {
        match field {
            Field::Row => Ok(&self.row),
            Field::ColumnFamily => Ok(&self.column_family),
            Field::ColumnQualifier => Ok(&self.column_qualifier),
            Field::ColumnVisibility => Ok(&self.column_visibility),
            _ => Err(CryptoError::InvalidArgument(format!(
                "{field} is not a byte field of a key"
            ))),
        }
    }

    pub fn set_bytes(&mut self, field: Field, bytes: Vec<u8>) -> Result<(), CryptoError> {
        match field {
            Field::Row => self.row = bytes,
            Field::ColumnFamily => self.column_family = bytes,
            Field::ColumnQualifier => self.column_qualifier = bytes,
            Field::ColumnVisibility => self.column_visibility = bytes,
            _ => {
                return Err(CryptoError::InvalidArgument(format!(
                    "{field} is not a byte field of a key"
                )))
            }
        }
        Ok(())
    }

    /// Compare only the fields covered by `part`.
    pub fn compare_prefix(&self, other: &Key, part: PartialKey) -> Ordering {
        let ordering = self.row.cmp(&other.row);
        if ordering != Ordering::Equal || part == PartialKey::Row {
            return ordering;
        }
        let ordering = self.column_family.cmp(&other.column_family);
        if ordering != Ordering::Equal || part == PartialKey::RowColfam {
            return ordering;
        }
        let ordering = self.column_qualifier.cmp(&other.column_qualifier);
        if ordering != Ordering::Equal || part == PartialKey::RowColfamColqual {
            return ordering;
        }
        let ordering = self.column_visibility.cmp(&other.column_visibility);
        if ordering != Ordering::Equal || part == PartialKey::RowColfamColqualColvis {
            return ordering;
        }
        let ordering = other.timestamp.cmp(&self.timestamp);
        if ordering != Ordering::Equal || part == PartialKey::RowColfamColqualColvisTime {
            return ordering;
        }
        other.deleted.cmp(&self.deleted)
    }

    pub fn equals_prefix(&self, other: &Key, part: PartialKey) -> bool {
        self.compare_prefix(other, part) == Ordering::Equal
    }

    /// The smallest key that sorts after every key sharing this key's `part` prefix.
    ///
    /// Fails for the full-key part, which has no such successor.
    pub fn following_key(&self, part: PartialKey) -> Result<Key, CryptoError> {
        let successor = |bytes: &[u8]| {
            let mut next = Vec::with_capacity(bytes.len() + 1);
            next.extend_from_slice(bytes);
            next.push(0);
            next
        };

        let mut key = Key {
            timestamp: i64::MAX,
            ..Key::default()
        };
        match part {
            PartialKey::Row => key.row = successor(&self.row),
            PartialKey::RowColfam => {
                key.row = self.row.clone();
                key.column_family = successor(&self.column_family);
            }
            PartialKey::RowColfamColqual => {
                key.row = self.row.clone();
                key.column_family = self.column_family.clone();
                key.column_qualifier = successor(&self.column_qualifier);
            }
            PartialKey::RowColfamColqualColvis => {
                key.row = self.row.clone();
                key.column_family = self.column_family.clone();
                key.column_qualifier = self.column_qualifier.clone();
                key.column_visibility = successor(&self.column_visibility);
            }
            PartialKey::RowColfamColqualColvisTime => {
                if self.timestamp == i64::MIN {
                    return self.following_key(PartialKey::RowColfamColqualColvis);
                }
                key = Key {
                    timestamp: self.timestamp - 1,
                    deleted: false,
                    ..self.clone()
                };
            }
            PartialKey::RowColfamColqualColvisTimeDel => {
                return Err(CryptoError::InvalidArgument(
                    "no following key for a full key".to_string(),
                ))
            }
        }
        Ok(key)
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare_prefix(other, PartialKey::RowColfamColqualColvisTimeDel)
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A key and its value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Entry {
    pub key: Key,
    pub value: Vec<u8>,
}

impl Entry {
    pub fn new(key: Key, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }

    pub fn bytes(&self, field: Field) -> Result<&[u8], CryptoError> {
        match field {
            Field::Value => Ok(&self.value),
            _ => self.key.bytes(field),
        }
    }

    pub fn set_bytes(&mut self, field: Field, bytes: Vec<u8>) -> Result<(), CryptoError> {
        match field {
            Field::Value => {
                self.value = bytes;
                Ok(())
            }
            _ => self.key.set_bytes(field, bytes),
        }
    }
}

/// A span of keys. `None` bounds are infinite.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Range {
    pub start: Option<Key>,
    pub start_inclusive: bool,
    pub end: Option<Key>,
    pub end_inclusive: bool,
}

impl Default for Range {
    fn default() -> Self {
        Self::all()
    }
}

impl Range {
    pub fn new(
        start: Option<Key>,
        start_inclusive: bool,
        end: Option<Key>,
        end_inclusive: bool,
    ) -> Self {
        Self {
            start,
            start_inclusive,
            end,
            end_inclusive,
        }
    }

    /// Every key.
    pub fn all() -> Self {
        Self::new(None, true, None, true)
    }

    /// Inclusive on both ends.
    pub fn between(start: Option<Key>, end: Option<Key>) -> Self {
        Self::new(start, true, end, true)
    }

    /// Every key of a single row.
    pub fn row(row: impl Into<Vec<u8>>) -> Self {
        let start = Key::from_row(row);
        let mut end_row = start.row.clone();
        end_row.push(0);
        Self::new(Some(start), true, Some(Key::from_row(end_row)), false)
    }

    /// Every key whose row starts with `prefix`.
    pub fn prefix(prefix: impl Into<Vec<u8>>) -> Self {
        let prefix = prefix.into();
        let end = following_prefix(&prefix).map(Key::from_row);
        Self::new(Some(Key::from_row(prefix)), true, end, false)
    }

    pub fn is_infinite_start_key(&self) -> bool {
        self.start.is_none()
    }

    pub fn is_infinite_stop_key(&self) -> bool {
        self.end.is_none()
    }

    pub fn before_start_key(&self, key: &Key) -> bool {
        match &self.start {
            None => false,
            Some(start) if self.start_inclusive => key < start,
            Some(start) => key <= start,
        }
    }

    pub fn after_end_key(&self, key: &Key) -> bool {
        match &self.end {
            None => false,
            Some(end) if self.end_inclusive => key > end,
            Some(end) => key >= end,
        }
    }

    pub fn contains(&self, key: &Key) -> bool {
        !self.before_start_key(key) && !self.after_end_key(key)
    }
}

/// Smallest byte string greater than every string starting with `prefix`.
fn following_prefix(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut next = prefix.to_vec();
    while let Some(last) = next.last_mut() {
        if *last == 0xff {
            next.pop();
        } else {
            *last += 1;
            return Some(next);
        }
    }
    None
}

/// A column to fetch: a family and optionally a qualifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Column {
    pub family: Vec<u8>,
    pub qualifier: Option<Vec<u8>>,
    pub visibility: Option<Vec<u8>>,
}

impl Column {
    pub fn family(family: impl Into<Vec<u8>>) -> Self {
        Self {
            family: family.into(),
            qualifier: None,
            visibility: None,
        }
    }

    pub fn new(family: impl Into<Vec<u8>>, qualifier: impl Into<Vec<u8>>) -> Self {
        Self {
            family: family.into(),
            qualifier: Some(qualifier.into()),
            visibility: None,
        }
    }

    /// Family matches, and the qualifier too when one is set.
    pub fn matches(&self, key: &Key) -> bool {
        self.family == key.column_family
            && self
                .qualifier
                .as_ref()
                .map_or(true, |qualifier| *qualifier == key.column_qualifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(row: &[u8], cf: &[u8], cq: &[u8], ts: i64) -> Key {
        Key::new(row, cf, cq, b"".to_vec(), ts)
    }

    #[test]
    fn field_order_is_prefix_order() {
        let mut sorted = Field::ALL;
        sorted.sort();
        assert_eq!(sorted, Field::ALL);
        assert!(Field::ColumnVisibility < Field::Timestamp);
    }

    #[test]
    fn field_names_parse() {
        for field in Field::ALL {
            assert_eq!(field.name().parse::<Field>().unwrap(), field);
        }
        assert_eq!("column_family".parse::<Field>().unwrap(), Field::ColumnFamily);
        assert!("colf".parse::<Field>().is_err());
    }

    #[test]
    fn timestamps_sort_newest_first() {
        let older = key(b"r", b"f", b"q", 1);
        let newer = key(b"r", b"f", b"q", 2);
        assert!(newer < older);
    }

    #[test]
    fn delete_markers_sort_first() {
        let put = key(b"r", b"f", b"q", 1);
        let delete = put.clone().with_deleted(true);
        assert!(delete < put);
    }

    #[test]
    fn row_dominates_ordering() {
        assert!(key(b"a", b"z", b"z", 0) < key(b"b", b"a", b"a", 0));
        assert!(key(b"a", b"", b"", 0) < key(b"a\x00", b"", b"", 0));
    }

    #[test]
    fn prefix_comparison_ignores_trailing_fields() {
        let a = key(b"r", b"f", b"q1", 5);
        let b = key(b"r", b"f", b"q2", 9);
        assert!(a.equals_prefix(&b, PartialKey::RowColfam));
        assert!(!a.equals_prefix(&b, PartialKey::RowColfamColqual));
        assert_eq!(
            a.compare_prefix(&b, PartialKey::RowColfamColqual),
            Ordering::Less
        );
    }

    #[test]
    fn following_key_by_part() {
        let k = Key::new(b"r".to_vec(), b"f".to_vec(), b"q".to_vec(), b"v".to_vec(), 7);

        let row = k.following_key(PartialKey::Row).unwrap();
        assert_eq!(row, Key::from_row(b"r\x00".to_vec()));

        let family = k.following_key(PartialKey::RowColfam).unwrap();
        assert_eq!(family.row, b"r");
        assert_eq!(family.column_family, b"f\x00");
        assert!(family.column_qualifier.is_empty());
        assert_eq!(family.timestamp, i64::MAX);

        let time = k.following_key(PartialKey::RowColfamColqualColvisTime).unwrap();
        assert_eq!(time.timestamp, 6);
        assert_eq!(time.column_visibility, b"v");

        assert!(k
            .following_key(PartialKey::RowColfamColqualColvisTimeDel)
            .is_err());
    }

    #[test]
    fn following_key_sorts_after_prefix() {
        let k = key(b"r", b"f", b"q", 0);
        let next = k.following_key(PartialKey::RowColfamColqual).unwrap();
        assert!(k < next);
        assert!(key(b"r", b"f", b"q", i64::MIN) < next);
        assert!(next < key(b"r", b"f", b"q\x00", 0));
    }

    #[test]
    fn row_range_contains_only_that_row() {
        let range = Range::row(b"A".to_vec());
        assert!(range.contains(&key(b"A", b"x", b"y", 3)));
        assert!(range.contains(&key(b"A", b"", b"", i64::MAX)));
        assert!(!range.contains(&key(b"A\x00", b"", b"", 0)));
        assert!(!range.contains(&key(b"B", b"", b"", 0)));
    }

    #[test]
    fn inclusive_and_exclusive_bounds() {
        let start = key(b"b", b"", b"", 0);
        let end = key(b"d", b"", b"", 0);

        let closed = Range::between(Some(start.clone()), Some(end.clone()));
        assert!(closed.contains(&start));
        assert!(closed.contains(&end));

        let open = Range::new(Some(start.clone()), false, Some(end.clone()), false);
        assert!(!open.contains(&start));
        assert!(!open.contains(&end));
        assert!(open.contains(&key(b"c", b"", b"", 0)));
    }

    #[test]
    fn infinite_range_contains_everything() {
        let range = Range::all();
        assert!(range.is_infinite_start_key() && range.is_infinite_stop_key());
        assert!(range.contains(&Key::default()));
        assert!(range.contains(&key(&[0xff; 4], b"", b"", i64::MIN)));
    }

    #[test]
    fn prefix_range() {
        let range = Range::prefix(b"ab".to_vec());
        assert!(range.contains(&key(b"ab", b"", b"", 0)));
        assert!(range.contains(&key(b"abzzz", b"", b"", 0)));
        assert!(!range.contains(&key(b"ac", b"", b"", 0)));

        let unbounded = Range::prefix(vec![0xff, 0xff]);
        assert!(unbounded.is_infinite_stop_key());
    }

    #[test]
    fn column_matching() {
        let k = key(b"r", b"fam", b"qual", 0);
        assert!(Column::family(b"fam".to_vec()).matches(&k));
        assert!(Column::new(b"fam".to_vec(), b"qual".to_vec()).matches(&k));
        assert!(!Column::new(b"fam".to_vec(), b"other".to_vec()).matches(&k));
        assert!(!Column::family(b"other".to_vec()).matches(&k));
    }

    #[test]
    fn entry_field_access() {
        let mut entry = Entry::new(key(b"r", b"f", b"q", 0), b"v".to_vec());
        assert_eq!(entry.bytes(Field::Value).unwrap(), b"v");
        entry.set_bytes(Field::ColumnFamily, b"g".to_vec()).unwrap();
        assert_eq!(entry.key.column_family, b"g");
        assert!(entry.bytes(Field::Timestamp).is_err());
        assert!(entry.set_bytes(Field::Delete, vec![]).is_err());
    }
}
