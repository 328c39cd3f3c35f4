//! Whole-entry encryption and the query rewriting that keeps encrypted
//! tables searchable.
//!
//! Range and column queries are split into the part the store can answer
//! over ciphertext and a flag telling the caller whether decrypted entries
//! still need to be checked against the original query.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use super::config::EncryptionConfig;
use super::field::FieldEncryptor;
use crate::entry::{Column, Entry, Field, Key, PartialKey, Range};
use crate::error::CryptoError;
use crate::keys::EncryptionKeyContainer;
use crate::visibility::ColumnVisibility;

/// Fields zeroed in the stored entry when they feed an encryptor.
const ZEROED_SOURCES: [Field; 4] = [
    Field::Row,
    Field::ColumnFamily,
    Field::ColumnQualifier,
    Field::Value,
];

/// Columns to fetch from the store, and whether the decrypted entries must
/// be filtered again on the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnFilterResult {
    pub server_side_filters: Vec<Column>,
    pub needs_client_side_filtering: bool,
}

impl ColumnFilterResult {
    fn new(server_side_filters: Vec<Column>, needs_client_side_filtering: bool) -> Self {
        Self {
            server_side_filters,
            needs_client_side_filtering,
        }
    }
}

pub struct EntryEncryptor {
    encryptors: Vec<FieldEncryptor>,
    destinations: BTreeMap<Field, usize>,
    sources: BTreeSet<Field>,
}

impl EntryEncryptor {
    pub fn new(config: &EncryptionConfig, keys: Arc<dyn EncryptionKeyContainer>) -> Self {
        let encryptors: Vec<FieldEncryptor> = config
            .field_configs()
            .iter()
            .map(|field_config| FieldEncryptor::new(field_config.clone(), Arc::clone(&keys)))
            .collect();
        let destinations = encryptors
            .iter()
            .enumerate()
            .map(|(index, encryptor)| (encryptor.destination(), index))
            .collect();
        let sources = encryptors
            .iter()
            .flat_map(|encryptor| encryptor.sources().iter().copied())
            .collect();

        Self {
            encryptors,
            destinations,
            sources,
        }
    }

    fn encryptor(&self, field: Field) -> Option<&FieldEncryptor> {
        self.destinations
            .get(&field)
            .and_then(|index| self.encryptors.get(*index))
    }

    fn is_source(&self, field: Field) -> bool {
        self.sources.contains(&field)
    }

    pub fn encrypt(&self, entry: &Entry) -> Result<Entry, CryptoError> {
        let visibility = ColumnVisibility::parse(entry.key.column_visibility.clone())?;

        let mut result = entry.clone();
        for field in ZEROED_SOURCES {
            if self.is_source(field) {
                result.set_bytes(field, Vec::new())?;
            }
        }
        for encryptor in &self.encryptors {
            encryptor.encrypt(entry, &mut result, &visibility)?;
        }
        Ok(result)
    }

    pub fn decrypt(&self, entry: &Entry) -> Result<Entry, CryptoError> {
        let visibility = ColumnVisibility::parse(entry.key.column_visibility.clone())?;

        let mut result = entry.clone();
        for encryptor in &self.encryptors {
            encryptor.decrypt(entry, &mut result, &visibility)?;
        }
        Ok(result)
    }

    /// Whether a delete marker can be rebuilt from a plaintext key alone.
    pub fn can_be_deleted_server_side(&self) -> bool {
        Field::KEY_DESTINATION_FIELDS.iter().all(|field| {
            self.encryptor(*field).map_or(true, |encryptor| {
                encryptor.can_be_filtered_server_side(&Field::KEY_SOURCE_FIELDS)
            })
        })
    }

    /// Every stored key a delete of `key` has to cover, one per combination
    /// of key versions of the encrypted key fields.
    pub fn get_delete_keys(&self, key: &Key) -> Result<Vec<Key>, CryptoError> {
        if !self.can_be_deleted_server_side() {
            return Err(CryptoError::InvalidArgument(
                "deletes are not supported by the encryption configuration".to_string(),
            ));
        }

        let entry = Entry::new(key.clone(), Vec::new());
        let mut candidates = Vec::with_capacity(Field::KEY_DESTINATION_FIELDS.len());
        for field in Field::KEY_DESTINATION_FIELDS {
            let values = match self.encryptor(field) {
                Some(encryptor) => encryptor.server_side_filter_values(&entry, false)?,
                None if self.is_source(field) => vec![Vec::new()],
                None => vec![key.bytes(field)?.to_vec()],
            };
            candidates.push(values);
        }

        let [rows, families, qualifiers] = candidates.as_slice() else {
            return Err(CryptoError::InvalidArgument(
                "unexpected key field count".to_string(),
            ));
        };
        let mut keys = Vec::with_capacity(rows.len() * families.len() * qualifiers.len());
        for row in rows {
            for family in families {
                for qualifier in qualifiers {
                    keys.push(Key {
                        row: row.clone(),
                        column_family: family.clone(),
                        column_qualifier: qualifier.clone(),
                        column_visibility: key.column_visibility.clone(),
                        timestamp: key.timestamp,
                        deleted: true,
                    });
                }
            }
        }
        Ok(keys)
    }

    pub fn get_column_family_filter(
        &self,
        family: &[u8],
    ) -> Result<ColumnFilterResult, CryptoError> {
        let entry = Entry::new(
            Key {
                column_family: family.to_vec(),
                ..Key::default()
            },
            Vec::new(),
        );
        self.family_filter(&entry, &[Field::ColumnFamily])
    }

    fn family_filter(
        &self,
        entry: &Entry,
        fields: &[Field],
    ) -> Result<ColumnFilterResult, CryptoError> {
        let result = match self.encryptor(Field::ColumnFamily) {
            None if !self.is_source(Field::ColumnFamily) => ColumnFilterResult::new(
                vec![Column::family(entry.key.column_family.clone())],
                false,
            ),
            None => ColumnFilterResult::new(vec![Column::family(Vec::new())], true),
            Some(encryptor) if encryptor.can_be_filtered_server_side(fields) => {
                ColumnFilterResult::new(
                    encryptor
                        .server_side_filter_values(entry, false)?
                        .into_iter()
                        .map(Column::family)
                        .collect(),
                    false,
                )
            }
            Some(_) => ColumnFilterResult::new(Vec::new(), true),
        };
        Ok(result)
    }

    /// Whether the family ciphertext alone pins down family and qualifier.
    fn family_searches_column(&self, fields: &BTreeSet<Field>) -> bool {
        self.encryptor(Field::ColumnFamily)
            .is_some_and(|encryptor| encryptor.can_search_for(fields))
    }

    pub fn get_column_filter(
        &self,
        family: &[u8],
        qualifier: &[u8],
    ) -> Result<ColumnFilterResult, CryptoError> {
        let fields = [Field::ColumnFamily, Field::ColumnQualifier];
        let field_set: BTreeSet<Field> = fields.into_iter().collect();
        let entry = Entry::new(
            Key {
                column_family: family.to_vec(),
                column_qualifier: qualifier.to_vec(),
                ..Key::default()
            },
            Vec::new(),
        );
        let family_search = self.family_filter(&entry, &fields)?;
        let families = family_search.server_side_filters.iter();

        let result = match self.encryptor(Field::ColumnQualifier) {
            None if !self.is_source(Field::ColumnQualifier) => ColumnFilterResult::new(
                families
                    .map(|column| Column::new(column.family.clone(), qualifier.to_vec()))
                    .collect(),
                family_search.needs_client_side_filtering,
            ),
            None => ColumnFilterResult::new(
                families
                    .map(|column| Column::new(column.family.clone(), Vec::new()))
                    .collect(),
                !self.family_searches_column(&field_set),
            ),
            Some(encryptor) if encryptor.can_be_filtered_server_side(&fields) => {
                let server_side_only = !family_search.needs_client_side_filtering
                    || (self.encryptor(Field::ColumnFamily).is_none()
                        && self.is_source(Field::ColumnFamily)
                        && encryptor.can_search_for(&field_set));
                let values = encryptor.server_side_filter_values(&entry, false)?;
                let mut columns = Vec::with_capacity(
                    family_search.server_side_filters.len() * values.len(),
                );
                for column in families {
                    for value in &values {
                        columns.push(Column::new(column.family.clone(), value.clone()));
                    }
                }
                ColumnFilterResult::new(columns, !server_side_only)
            }
            Some(_) => ColumnFilterResult::new(
                families
                    .map(|column| Column::family(column.family.clone()))
                    .collect(),
                !self.family_searches_column(&field_set),
            ),
        };
        Ok(result)
    }

    /// Rewrite `range` into ranges over the stored (encrypted) keys.
    ///
    /// Returns the server-side ranges and whether decrypted entries must
    /// still be checked against `range`.
    pub fn transform_range(&self, range: &Range) -> Result<(Vec<Range>, bool), CryptoError> {
        if self.destinations.len() == 1 && self.destinations.contains_key(&Field::Value) {
            return Ok((vec![range.clone()], false));
        }
        if range.is_infinite_start_key() && range.is_infinite_stop_key() {
            return Ok((vec![range.clone()], false));
        }

        let bound = |key: &Option<Key>| {
            key.clone()
                .map(|key| Entry::new(key, Vec::new()))
                .unwrap_or_default()
        };
        let start_key = bound(&range.start);
        let end_key = bound(&range.end);

        let (equal_fields, following_field) = equal_fields(range)?;

        let mut start_keys = vec![Entry::default()];
        let mut end_keys = vec![Entry::default()];
        let mut prefix: Option<PartialKey> = None;
        let mut has_variance = range.is_infinite_start_key() || range.is_infinite_stop_key();

        for field in Field::ALL {
            if field == Field::Value {
                continue;
            }

            match self.encryptor(field) {
                None if self.is_source(field) => {}
                None => {
                    if range.is_infinite_start_key() {
                        for key in &mut end_keys {
                            copy_field(key, &end_key, field)?;
                        }
                    } else if range.is_infinite_stop_key() {
                        for key in &mut start_keys {
                            copy_field(key, &start_key, field)?;
                        }
                    } else {
                        if !equal_fields.contains(&field) {
                            has_variance = true;
                        }
                        for key in &mut start_keys {
                            copy_field(key, &start_key, field)?;
                        }
                        for key in &mut end_keys {
                            copy_field(key, &end_key, field)?;
                        }
                    }
                }
                Some(encryptor) => {
                    if has_variance || !encryptor.can_be_filtered_server_side(&equal_fields) {
                        debug!(
                            field = %field,
                            has_variance,
                            "range rewriting truncated, client-side filtering required"
                        );
                        let ranges = truncated_ranges(range, &start_keys, &end_keys, prefix)?;
                        return Ok((ranges, true));
                    }
                    start_keys = with_filter_values(start_keys, encryptor, &start_key, false)?;
                    end_keys = with_filter_values(
                        end_keys,
                        encryptor,
                        &start_key,
                        following_field == Some(field),
                    )?;
                }
            }

            prefix = field.partial_key();
        }

        let ranges = start_keys
            .into_iter()
            .zip(end_keys)
            .map(|(start, end)| {
                Range::new(
                    Some(start.key),
                    range.start_inclusive,
                    Some(end.key),
                    range.end_inclusive,
                )
            })
            .collect();
        Ok((ranges, false))
    }
}

/// Key source fields with identical bytes on both bounds, plus the field (if
/// any) whose successor turns the start key into the exclusive end key. The
/// first such field in key order is taken.
fn equal_fields(range: &Range) -> Result<(Vec<Field>, Option<Field>), CryptoError> {
    let mut equal = Vec::new();
    let mut following = None;

    let (Some(start), Some(end)) = (&range.start, &range.end) else {
        return Ok((equal, following));
    };

    for field in Field::KEY_SOURCE_FIELDS {
        if start.bytes(field)? == end.bytes(field)? {
            equal.push(field);
            continue;
        }
        let Some(part) = field.partial_key() else {
            continue;
        };
        if !range.end_inclusive && start.following_key(part)? == *end {
            following = Some(field);
            break;
        }
    }

    if let Some(field) = following {
        equal.push(field);
    }
    Ok((equal, following))
}

fn copy_field(target: &mut Entry, source: &Entry, field: Field) -> Result<(), CryptoError> {
    match field {
        Field::Timestamp => target.key.timestamp = source.key.timestamp,
        Field::Delete => target.key.deleted = source.key.deleted,
        _ => target.set_bytes(field, source.bytes(field)?.to_vec())?,
    }
    Ok(())
}

/// Fan every partial key out over the per-version ciphertexts of `encryptor`.
fn with_filter_values(
    keys: Vec<Entry>,
    encryptor: &FieldEncryptor,
    source: &Entry,
    following: bool,
) -> Result<Vec<Entry>, CryptoError> {
    let values = encryptor.server_side_filter_values(source, following)?;
    let mut expanded = Vec::with_capacity(keys.len() * values.len());
    for key in &keys {
        for value in &values {
            let mut next = key.clone();
            next.set_bytes(encryptor.destination(), value.clone())?;
            expanded.push(next);
        }
    }
    Ok(expanded)
}

/// Prefix ranges over the key fields resolved so far.
fn truncated_ranges(
    range: &Range,
    start_keys: &[Entry],
    end_keys: &[Entry],
    prefix: Option<PartialKey>,
) -> Result<Vec<Range>, CryptoError> {
    let Some(prefix) = prefix else {
        return Ok(vec![Range::all()]);
    };

    let first_key = |entry: &Entry| Key {
        timestamp: i64::MAX,
        ..entry.key.clone()
    };

    if range.is_infinite_start_key() {
        end_keys
            .iter()
            .map(|end| Ok(Range::new(None, true, Some(end.key.following_key(prefix)?), false)))
            .collect()
    } else if range.is_infinite_stop_key() {
        Ok(start_keys
            .iter()
            .map(|start| Range::new(Some(first_key(start)), true, None, true))
            .collect())
    } else {
        start_keys
            .iter()
            .zip(end_keys)
            .map(|(start, end)| {
                Ok(Range::new(
                    Some(first_key(start)),
                    true,
                    Some(end.key.following_key(prefix)?),
                    false,
                ))
            })
            .collect()
    }
}
