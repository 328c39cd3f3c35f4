//! End-to-end tests over an in-memory table: writers and scanners stacked
//! the way an application would use them.

use std::sync::Arc;

use cellcrypt_core::keys::VerifyingKey;
use cellcrypt_core::{
    CipherKind, Column, CryptoError, DerivedKeyContainer, Destination, EncryptedScanner,
    EncryptedWriter, EncryptionConfig, Entry, EntryEncryptor, EntryScanner, EntrySigner,
    EntryWriter, Field, FieldEncryptorConfig, Key, MemoryTable, Range, SignatureAlgorithm,
    SignatureConfig, SignatureKeyContainer, SignedScanner, SignedWriter, SigningKey,
};

// ============================================================================
// Test helpers
// ============================================================================

const ROOT: [u8; 32] = [9u8; 32];

struct StaticSigner(SigningKey);

impl SignatureKeyContainer for StaticSigner {
    fn get_signing_key(&self) -> Result<SigningKey, CryptoError> {
        Ok(self.0.clone())
    }

    fn get_verifying_key(&self, id: &[u8]) -> Result<VerifyingKey, CryptoError> {
        if id != self.0.id.as_slice() {
            return Err(CryptoError::PermissionDenied("unknown signer".to_string()));
        }
        Ok(VerifyingKey::new(self.0.key.public_key()))
    }
}

fn searchable_config() -> EncryptionConfig {
    EncryptionConfig::from_toml_str(
        r#"
        [ROW]
        cipher = "AES_SIV_DETERMINISTIC"

        [COLUMN_FAMILY]
        cipher = "AES_SIV_DETERMINISTIC"

        [VALUE]
        cipher = "AES_GCM"
        "#,
    )
    .unwrap()
}

fn key_container(versions: i32) -> Arc<DerivedKeyContainer> {
    Arc::new(
        DerivedKeyContainer::new(&ROOT)
            .with_key(CipherKind::AesSivDeterministic.name(), versions)
            .with_key(CipherKind::AesGcm.name(), versions),
    )
}

fn encryptor(versions: i32) -> EntryEncryptor {
    EntryEncryptor::new(&searchable_config(), key_container(versions))
}

fn sample(row: &str, family: &str) -> Entry {
    Entry::new(
        Key::new(row, family, "q", "", 100),
        format!("{row}/{family}"),
    )
}

fn values<I: Iterator<Item = Result<Entry, CryptoError>>>(cursor: I) -> Vec<String> {
    let mut values: Vec<String> = cursor
        .map(|entry| String::from_utf8(entry.unwrap().value).unwrap())
        .collect();
    values.sort();
    values
}

// ============================================================================
// Encryption
// ============================================================================

#[test]
fn encrypted_table_answers_plaintext_queries() {
    let table = MemoryTable::new();
    let mut writer = EncryptedWriter::new(&table, encryptor(1));
    for row in ["apple", "banana", "cherry"] {
        for family in ["meta", "data"] {
            writer.put(sample(row, family)).unwrap();
        }
    }
    writer.flush().unwrap();

    for stored in table.entries() {
        for row in ["apple", "banana", "cherry"] {
            assert_ne!(stored.key.row, row.as_bytes());
        }
        assert_eq!(stored.key.column_qualifier, b"q");
    }

    let scanner = EncryptedScanner::new(&table, encryptor(1));
    assert_eq!(
        values(scanner.scan(&[Range::row("banana")], &[]).unwrap()),
        vec!["banana/data", "banana/meta"]
    );
    assert_eq!(
        values(
            scanner
                .scan(&[Range::prefix("ch"), Range::row("apple")], &[Column::family("meta")])
                .unwrap()
        ),
        vec!["apple/meta", "cherry/meta"]
    );
    assert_eq!(
        values(
            scanner
                .scan(
                    &[Range::between(Some(Key::from_row("b")), Some(Key::from_row("c")))],
                    &[]
                )
                .unwrap()
        ),
        vec!["banana/data", "banana/meta"]
    );
}

#[test]
fn rotated_keys_still_find_old_rows() {
    let table = MemoryTable::new();
    EncryptedWriter::new(&table, encryptor(1))
        .put(sample("old", "f"))
        .unwrap();
    EncryptedWriter::new(&table, encryptor(2))
        .put(sample("new", "f"))
        .unwrap();
    EncryptedWriter::new(&table, encryptor(2))
        .put(sample("old", "g"))
        .unwrap();

    let scanner = EncryptedScanner::new(&table, encryptor(2));
    assert_eq!(
        values(scanner.scan(&[Range::row("old")], &[]).unwrap()),
        vec!["old/f", "old/g"]
    );

    // A reader without the new version cannot open the new entries.
    let stale = EncryptedScanner::new(&table, encryptor(1));
    let results: Vec<_> = stale.scan(&[], &[]).unwrap().collect();
    assert!(results
        .iter()
        .any(|result| matches!(result, Err(e) if e.is_permission_denied())));
}

#[test]
fn deletes_through_the_encrypted_writer() {
    let table = MemoryTable::new();
    let mut writer = EncryptedWriter::new(&table, encryptor(2));
    writer.put(sample("a", "f")).unwrap();
    writer.put(sample("b", "f")).unwrap();
    writer
        .put(Entry::new(sample("a", "f").key.with_deleted(true), Vec::new()))
        .unwrap();

    let scanner = EncryptedScanner::new(&table, encryptor(2));
    assert_eq!(values(scanner.scan(&[], &[]).unwrap()), vec!["b/f"]);
}

#[test]
fn visibility_keyed_values_need_an_attribute() {
    let config = EncryptionConfig::new(vec![FieldEncryptorConfig::new(
        CipherKind::AesGcm,
        None,
        true,
        "labels",
        32,
        Field::Value,
        [Field::Value],
    )
    .unwrap()])
    .unwrap();
    let writer_keys = DerivedKeyContainer::new(&ROOT)
        .with_attribute_key("admin", "labels", 1)
        .with_attribute_key("ops", "labels", 1);
    let table = MemoryTable::new();
    let mut entry = sample("r", "f");
    entry.key.column_visibility = b"admin|ops".to_vec();
    EncryptedWriter::new(&table, EntryEncryptor::new(&config, Arc::new(writer_keys)))
        .put(entry.clone())
        .unwrap();

    let ops = DerivedKeyContainer::new(&ROOT).with_attribute_key("ops", "labels", 1);
    let scanner = EncryptedScanner::new(&table, EntryEncryptor::new(&config, Arc::new(ops)));
    let found: Vec<Entry> = scanner
        .scan(&[], &[])
        .unwrap()
        .map(Result::unwrap)
        .collect();
    assert_eq!(found, vec![entry]);

    let outsider = DerivedKeyContainer::new(&ROOT).with_attribute_key("guest", "labels", 1);
    let scanner = EncryptedScanner::new(&table, EntryEncryptor::new(&config, Arc::new(outsider)));
    let err = scanner.scan(&[], &[]).unwrap().next().unwrap().unwrap_err();
    assert!(err.is_permission_denied());
}

// ============================================================================
// Signing
// ============================================================================

fn signer_keys() -> Arc<StaticSigner> {
    let key = SignatureAlgorithm::EcdsaP256.generate().unwrap();
    Arc::new(StaticSigner(SigningKey {
        key,
        id: b"app-signer".to_vec(),
    }))
}

fn signer(keys: &Arc<StaticSigner>, destination: Destination) -> EntrySigner {
    let (table, visibility) = match destination {
        Destination::Value => (None, None),
        Destination::ColumnVisibility => (None, Some(b"signed".to_vec())),
        Destination::SeparateTable => (Some("records_sigs".to_string()), None),
    };
    let config = SignatureConfig::new(
        SignatureAlgorithm::EcdsaP256,
        None,
        destination,
        table,
        visibility,
    )
    .unwrap();
    EntrySigner::new(config, keys.clone())
}

#[test]
fn sign_then_encrypt() {
    let keys = signer_keys();
    let table = MemoryTable::new();
    let mut writer = SignedWriter::new(
        EncryptedWriter::new(&table, encryptor(1)),
        signer(&keys, Destination::Value),
    )
    .unwrap();
    for row in ["x", "y"] {
        writer.put(sample(row, "f")).unwrap();
    }
    writer.flush().unwrap();

    let scanner = SignedScanner::new(
        EncryptedScanner::new(&table, encryptor(1)),
        signer(&keys, Destination::Value),
    )
    .unwrap();
    let found: Vec<Entry> = scanner
        .scan(&[Range::row("y")], &[])
        .unwrap()
        .map(Result::unwrap)
        .collect();
    assert_eq!(found, vec![sample("y", "f")]);
}

#[test]
fn separate_signature_table_round_trip() {
    let keys = signer_keys();
    let values_table = MemoryTable::new();
    let signatures_table = MemoryTable::new();
    let mut writer = SignedWriter::with_signature_table(
        &values_table,
        &signatures_table,
        signer(&keys, Destination::SeparateTable),
    )
    .unwrap();
    for row in ["a", "b", "c"] {
        writer.put(sample(row, "f")).unwrap();
    }
    writer
        .put(Entry::new(sample("b", "f").key.with_deleted(true), Vec::new()))
        .unwrap();

    let mut scanner = SignedScanner::with_signature_table(
        &values_table,
        &signatures_table,
        signer(&keys, Destination::SeparateTable),
    )
    .unwrap();
    for in_order in [true, false] {
        scanner.set_in_order(in_order);
        assert_eq!(
            values(scanner.scan(&[], &[]).unwrap()),
            vec!["a/f", "c/f"]
        );
    }
}

#[test]
fn tampered_entries_fail_verification() {
    let keys = signer_keys();
    let table = MemoryTable::new();
    let mut writer = SignedWriter::new(&table, signer(&keys, Destination::ColumnVisibility)).unwrap();
    writer.put(sample("r", "f")).unwrap();

    let mut stored = table.entries().remove(0);
    table.insert(Entry::new(stored.key.clone().with_deleted(true), Vec::new()));
    stored.value = b"forged".to_vec();
    table.insert(stored);

    let scanner = SignedScanner::new(&table, signer(&keys, Destination::ColumnVisibility)).unwrap();
    let err = scanner.scan(&[], &[]).unwrap().next().unwrap().unwrap_err();
    assert!(err.is_signature_failure());
}

#[test]
fn another_signer_is_rejected() {
    let table = MemoryTable::new();
    let mut writer = SignedWriter::new(&table, signer(&signer_keys(), Destination::Value)).unwrap();
    writer.put(sample("r", "f")).unwrap();

    let scanner = SignedScanner::new(&table, signer(&signer_keys(), Destination::Value)).unwrap();
    let err = scanner.scan(&[], &[]).unwrap().next().unwrap().unwrap_err();
    // Same signer id, different key pair.
    assert!(err.is_signature_failure());
}
