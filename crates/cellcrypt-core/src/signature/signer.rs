//! Entry signing and verification.
//!
//! The signed message is `row ‖ family ‖ qualifier ‖ visibility ‖ flag ‖
//! [timestamp] ‖ value`, where `flag` is `0` when the big-endian timestamp
//! follows and `1` when it is left out. The signature travels in an envelope
//! `[vint len][signer id][has timestamp][vint len][signature]` followed by
//! the signed value.

use std::cell::OnceCell;
use std::sync::Arc;

use super::config::{Destination, SignatureConfig};
use crate::entry::Entry;
use crate::error::CryptoError;
use crate::keys::{SignatureKeyContainer, SigningKey};
use crate::varint::{write_len_prefixed, ByteReader};
use crate::visibility::{escape, unescape, ColumnVisibility, VisibilityNode};

pub struct EntrySigner {
    config: SignatureConfig,
    keys: Arc<dyn SignatureKeyContainer>,
    signing_key: OnceCell<SigningKey>,
}

impl EntrySigner {
    pub fn new(config: SignatureConfig, keys: Arc<dyn SignatureKeyContainer>) -> Self {
        Self {
            config,
            keys,
            signing_key: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &SignatureConfig {
        &self.config
    }

    /// Fetched from the container on first use.
    fn signing_key(&self) -> Result<&SigningKey, CryptoError> {
        if let Some(key) = self.signing_key.get() {
            return Ok(key);
        }
        let key = self.keys.get_signing_key()?;
        if key.key.algorithm() != self.config.algorithm() {
            return Err(CryptoError::InvalidConfig(format!(
                "signing key is {}, but signatures are configured as {}",
                key.key.algorithm(),
                self.config.algorithm()
            )));
        }
        Ok(self.signing_key.get_or_init(|| key))
    }

    /// Sign `entry`. For a separate table the result is the signature entry;
    /// `entry` itself is stored unchanged.
    pub fn sign(&self, entry: &Entry, has_timestamp: bool) -> Result<Entry, CryptoError> {
        if entry.key.deleted {
            return Err(CryptoError::InvalidArgument(
                "cannot sign deleted entries".to_string(),
            ));
        }
        let signing_key = self.signing_key()?;

        let mut signed = entry.clone();
        if self.config.destination() == Destination::ColumnVisibility
            && signed.key.column_visibility.is_empty()
        {
            if let Some(default) = self.config.default_visibility() {
                signed.key.column_visibility = default.to_vec();
            }
        }

        let signature = signing_key
            .key
            .sign(&signed_message(&signed, has_timestamp))?;

        let mut envelope = Vec::with_capacity(signing_key.id.len() + signature.len() + 8);
        write_len_prefixed(&mut envelope, &signing_key.id)?;
        envelope.push(u8::from(has_timestamp));
        write_len_prefixed(&mut envelope, &signature)?;
        envelope.extend_from_slice(&signed.value);

        match self.config.destination() {
            Destination::Value | Destination::SeparateTable => signed.value = envelope,
            Destination::ColumnVisibility => {
                signed.key.column_visibility =
                    wrap_visibility(&signed.key.column_visibility, &envelope);
            }
        }
        Ok(signed)
    }

    /// Check the signature of `entry` and return it as it was before signing.
    ///
    /// `signature` is the companion entry when signatures live in a separate
    /// table, and must be `None` otherwise.
    pub fn verify(&self, entry: &Entry, signature: Option<&Entry>) -> Result<Entry, CryptoError> {
        if entry.key.deleted {
            return Err(CryptoError::InvalidArgument(
                "cannot verify deleted entries".to_string(),
            ));
        }

        let mut verified = entry.clone();
        let envelope = match (self.config.destination(), signature) {
            (Destination::Value, None) => entry.value.clone(),
            (Destination::ColumnVisibility, None) => {
                let (visibility, envelope) = unwrap_visibility(&entry.key.column_visibility)?;
                verified.key.column_visibility = visibility;
                envelope
            }
            (Destination::SeparateTable, Some(signature)) => signature.value.clone(),
            (Destination::SeparateTable, None) => {
                return Err(CryptoError::InvalidArgument(
                    "signature is in a separate table, but no signature entry was given"
                        .to_string(),
                ))
            }
            (_, Some(_)) => {
                return Err(CryptoError::InvalidArgument(
                    "signature is not in a separate table, but a signature entry was given"
                        .to_string(),
                ))
            }
        };

        let mut input = ByteReader::new(&envelope);
        let signer_id = input.read_len_prefixed().map_err(malformed_envelope)?;
        let has_timestamp = input.read_bool().map_err(malformed_envelope)?;
        let signature = input.read_len_prefixed().map_err(malformed_envelope)?;
        let signed_value = input.remaining();

        if self.config.destination() == Destination::Value {
            verified.value = signed_value.to_vec();
        } else if signed_value != entry.value.as_slice() {
            return Err(CryptoError::SignatureFailed(
                "signed value does not match the entry".to_string(),
            ));
        }

        let verifying_key = self.keys.get_verifying_key(signer_id)?;
        if verifying_key.key.algorithm() != self.config.algorithm() {
            return Err(CryptoError::SignatureFailed(format!(
                "signer uses {}, but signatures are configured as {}",
                verifying_key.key.algorithm(),
                self.config.algorithm()
            )));
        }
        verifying_key
            .key
            .verify(&signed_message(&verified, has_timestamp), signature)?;
        Ok(verified)
    }
}

fn malformed_envelope(e: CryptoError) -> CryptoError {
    CryptoError::SignatureFailed(format!("malformed signature envelope: {e}"))
}

fn signed_message(entry: &Entry, has_timestamp: bool) -> Vec<u8> {
    let key = &entry.key;
    let mut message = Vec::with_capacity(
        key.row.len()
            + key.column_family.len()
            + key.column_qualifier.len()
            + key.column_visibility.len()
            + entry.value.len()
            + 9,
    );
    message.extend_from_slice(&key.row);
    message.extend_from_slice(&key.column_family);
    message.extend_from_slice(&key.column_qualifier);
    message.extend_from_slice(&key.column_visibility);
    if has_timestamp {
        message.push(0);
        message.extend_from_slice(&key.timestamp.to_be_bytes());
    } else {
        message.push(1);
    }
    message.extend_from_slice(&entry.value);
    message
}

/// `(visibility)|"escaped data"`
fn wrap_visibility(visibility: &[u8], data: &[u8]) -> Vec<u8> {
    let escaped = escape(data, true);
    let mut wrapped = Vec::with_capacity(visibility.len() + escaped.len() + 3);
    wrapped.push(b'(');
    wrapped.extend_from_slice(visibility);
    wrapped.extend_from_slice(b")|");
    wrapped.extend_from_slice(&escaped);
    wrapped
}

fn invalid_wrapped_visibility() -> CryptoError {
    CryptoError::SignatureFailed("Invalid signature in the column visibility".to_string())
}

/// Split a wrapped visibility into the original expression text, taken
/// verbatim from between the outer parentheses, and the unescaped data.
fn unwrap_visibility(expression: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
    let visibility = ColumnVisibility::parse(expression.to_vec())
        .map_err(|_| invalid_wrapped_visibility())?;
    let Some(VisibilityNode::Or(children)) = visibility.root() else {
        return Err(invalid_wrapped_visibility());
    };
    let [_, wrapped] = children.as_slice() else {
        return Err(invalid_wrapped_visibility());
    };
    let VisibilityNode::Term { start, .. } = *wrapped else {
        return Err(invalid_wrapped_visibility());
    };
    if start < 3 || expression.first() != Some(&b'(') || &expression[start - 2..start] != b")|" {
        return Err(invalid_wrapped_visibility());
    }

    let term = visibility
        .term(wrapped)
        .ok_or_else(invalid_wrapped_visibility)?;
    let data = unescape(term).map_err(|_| invalid_wrapped_visibility())?;
    Ok((expression[1..start - 2].to_vec(), data))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::entry::Key;
    use crate::keys::VerifyingKey;
    use crate::signature::algorithm::SignatureAlgorithm;

    struct TestKeys {
        signing: SigningKey,
        verifying: HashMap<Vec<u8>, VerifyingKey>,
        signing_fetches: AtomicUsize,
    }

    impl TestKeys {
        fn new(algorithm: SignatureAlgorithm) -> Self {
            let key = algorithm.generate().unwrap();
            let id = b"signer-1".to_vec();
            let verifying = HashMap::from([(id.clone(), VerifyingKey::new(key.public_key()))]);
            Self {
                signing: SigningKey { key, id },
                verifying,
                signing_fetches: AtomicUsize::new(0),
            }
        }
    }

    impl SignatureKeyContainer for TestKeys {
        fn get_signing_key(&self) -> Result<SigningKey, CryptoError> {
            self.signing_fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.signing.clone())
        }

        fn get_verifying_key(&self, id: &[u8]) -> Result<VerifyingKey, CryptoError> {
            self.verifying.get(id).cloned().ok_or_else(|| {
                CryptoError::PermissionDenied(format!(
                    "no verification key for {{id={}}}",
                    String::from_utf8_lossy(id)
                ))
            })
        }
    }

    fn config(algorithm: SignatureAlgorithm, destination: Destination) -> SignatureConfig {
        let (table, visibility) = match destination {
            Destination::Value => (None, None),
            Destination::ColumnVisibility => (None, Some(b"default".to_vec())),
            Destination::SeparateTable => (Some("sigs".to_string()), None),
        };
        SignatureConfig::new(algorithm, None, destination, table, visibility).unwrap()
    }

    fn signer(algorithm: SignatureAlgorithm, destination: Destination) -> EntrySigner {
        EntrySigner::new(
            config(algorithm, destination),
            Arc::new(TestKeys::new(algorithm)),
        )
    }

    fn sample() -> Entry {
        Entry::new(Key::new("row", "family", "qualifier", "a&b", 42), "value")
    }

    fn round_trip(signer: &EntrySigner, entry: &Entry, has_timestamp: bool) -> Entry {
        let signed = signer.sign(entry, has_timestamp).unwrap();
        match signer.config().destination() {
            Destination::SeparateTable => signer.verify(entry, Some(&signed)).unwrap(),
            _ => signer.verify(&signed, None).unwrap(),
        }
    }

    #[test]
    fn every_destination_round_trips() {
        for algorithm in SignatureAlgorithm::ALL {
            for destination in Destination::ALL {
                let signer = signer(algorithm, destination);
                for has_timestamp in [true, false] {
                    assert_eq!(
                        round_trip(&signer, &sample(), has_timestamp),
                        sample(),
                        "{algorithm} {destination} {has_timestamp}"
                    );
                }
            }
        }
    }

    #[test]
    fn value_destination_layout() {
        let signer = signer(SignatureAlgorithm::Ed25519, Destination::Value);
        let signed = signer.sign(&sample(), true).unwrap();
        assert_eq!(signed.key, sample().key);

        let mut input = ByteReader::new(&signed.value);
        assert_eq!(input.read_len_prefixed().unwrap(), b"signer-1");
        assert!(input.read_bool().unwrap());
        assert_eq!(input.read_len_prefixed().unwrap().len(), 64);
        assert_eq!(input.remaining(), b"value");
    }

    #[test]
    fn visibility_destination_wraps_expression() {
        let signer = signer(SignatureAlgorithm::Ed25519, Destination::ColumnVisibility);
        let signed = signer.sign(&sample(), true).unwrap();
        assert!(signed.key.column_visibility.starts_with(b"(a&b)|\""));
        assert_eq!(signed.value, b"value");
        ColumnVisibility::parse(signed.key.column_visibility.clone()).unwrap();
    }

    #[test]
    fn visibility_text_is_restored_verbatim() {
        let signer = signer(SignatureAlgorithm::EcdsaP256, Destination::ColumnVisibility);
        for visibility in ["a|b", "(a|b)", "(a|b)&c", "\"x\\\"y\"|z"] {
            let mut entry = sample();
            entry.key.column_visibility = visibility.as_bytes().to_vec();
            assert_eq!(round_trip(&signer, &entry, true), entry, "{visibility}");
        }
    }

    #[test]
    fn empty_visibility_takes_default() {
        let signer = signer(SignatureAlgorithm::Ed25519, Destination::ColumnVisibility);
        let mut entry = sample();
        entry.key.column_visibility.clear();
        let verified = round_trip(&signer, &entry, true);
        assert_eq!(verified.key.column_visibility, b"default");
        assert_eq!(verified.value, entry.value);
    }

    fn tampered_copies(entry: &Entry) -> Vec<(&'static str, Entry)> {
        let mut row = entry.clone();
        row.key.row = b"rox".to_vec();
        let mut timestamp = entry.clone();
        timestamp.key.timestamp += 1;
        let mut value = entry.clone();
        *value.value.last_mut().unwrap() ^= 1;
        vec![("row", row), ("timestamp", timestamp), ("value", value)]
    }

    #[test]
    fn tampering_is_detected() {
        for destination in Destination::ALL {
            let signer = signer(SignatureAlgorithm::EcdsaP256, destination);
            let signed = signer.sign(&sample(), true).unwrap();

            let results: Vec<_> = match destination {
                Destination::SeparateTable => tampered_copies(&sample())
                    .into_iter()
                    .map(|(what, entry)| (what, signer.verify(&entry, Some(&signed))))
                    .collect(),
                _ => tampered_copies(&signed)
                    .into_iter()
                    .map(|(what, entry)| (what, signer.verify(&entry, None)))
                    .collect(),
            };
            for (what, result) in results {
                let err = result.unwrap_err();
                assert!(err.is_signature_failure(), "{destination} {what}: {err}");
            }
        }
    }

    #[test]
    fn tampered_wrapped_visibility_is_detected() {
        let signer = signer(SignatureAlgorithm::Ed25519, Destination::ColumnVisibility);
        let mut signed = signer.sign(&sample(), true).unwrap();
        assert_eq!(signed.key.column_visibility[3], b'b');
        signed.key.column_visibility[3] = b'c';
        assert!(signer
            .verify(&signed, None)
            .unwrap_err()
            .is_signature_failure());
    }

    #[test]
    fn tampered_separate_signature_is_detected() {
        let signer = signer(SignatureAlgorithm::Ed25519, Destination::SeparateTable);
        let mut signature = signer.sign(&sample(), true).unwrap();
        let signature_end = 1 + b"signer-1".len() + 1 + 1 + 64;
        signature.value[signature_end - 1] ^= 1;
        assert!(signer
            .verify(&sample(), Some(&signature))
            .unwrap_err()
            .is_signature_failure());
    }

    #[test]
    fn timestamp_ignored_when_not_signed() {
        let signer = signer(SignatureAlgorithm::Ed25519, Destination::Value);
        let mut signed = signer.sign(&sample(), false).unwrap();
        signed.key.timestamp = 7;
        assert_eq!(signer.verify(&signed, None).unwrap().key.timestamp, 7);
    }

    #[test]
    fn separate_table_checks_the_value() {
        let signer = signer(SignatureAlgorithm::Ed25519, Destination::SeparateTable);
        let signature = signer.sign(&sample(), true).unwrap();
        let mut entry = sample();
        entry.value = b"other".to_vec();
        assert!(signer
            .verify(&entry, Some(&signature))
            .unwrap_err()
            .is_signature_failure());
    }

    #[test]
    fn companion_entry_must_match_destination() {
        let separate = signer(SignatureAlgorithm::Ed25519, Destination::SeparateTable);
        assert!(matches!(
            separate.verify(&sample(), None),
            Err(CryptoError::InvalidArgument(_))
        ));

        let inline = signer(SignatureAlgorithm::Ed25519, Destination::Value);
        let signed = inline.sign(&sample(), true).unwrap();
        assert!(matches!(
            inline.verify(&signed, Some(&signed)),
            Err(CryptoError::InvalidArgument(_))
        ));
    }

    #[test]
    fn deleted_entries_are_rejected() {
        let signer = signer(SignatureAlgorithm::Ed25519, Destination::Value);
        let mut entry = sample();
        entry.key.deleted = true;
        assert!(matches!(
            signer.sign(&entry, true),
            Err(CryptoError::InvalidArgument(_))
        ));
        assert!(matches!(
            signer.verify(&entry, None),
            Err(CryptoError::InvalidArgument(_))
        ));
    }

    #[test]
    fn malformed_wrappers_fail_closed() {
        let signer = signer(SignatureAlgorithm::Ed25519, Destination::ColumnVisibility);
        for visibility in ["a&b", "a|b|c", "(a)|(b)", ""] {
            let mut entry = sample();
            entry.key.column_visibility = visibility.as_bytes().to_vec();
            let err = signer.verify(&entry, None).unwrap_err();
            assert!(err.is_signature_failure(), "{visibility}: {err}");
        }

        let value_signer = self::signer(SignatureAlgorithm::Ed25519, Destination::Value);
        let mut truncated = value_signer.sign(&sample(), true).unwrap();
        truncated.value.truncate(5);
        assert!(value_signer
            .verify(&truncated, None)
            .unwrap_err()
            .is_signature_failure());
    }

    #[test]
    fn unknown_signer_is_rejected() {
        let writer = signer(SignatureAlgorithm::Ed25519, Destination::Value);
        let reader = signer(SignatureAlgorithm::Ed25519, Destination::Value);
        let mut signed = writer.sign(&sample(), true).unwrap();
        // Same id, different key pair.
        assert!(reader.verify(&signed, None).unwrap_err().is_signature_failure());

        signed.value[1] = b'X';
        assert!(reader.verify(&signed, None).unwrap_err().is_permission_denied());
    }

    #[test]
    fn signing_key_fetched_once() {
        let keys = Arc::new(TestKeys::new(SignatureAlgorithm::Ed25519));
        let signer = EntrySigner::new(
            config(SignatureAlgorithm::Ed25519, Destination::Value),
            keys.clone(),
        );
        for _ in 0..3 {
            signer.sign(&sample(), true).unwrap();
        }
        assert_eq!(keys.signing_fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn algorithm_mismatch_is_a_config_error() {
        let signer = EntrySigner::new(
            config(SignatureAlgorithm::EcdsaP256, Destination::Value),
            Arc::new(TestKeys::new(SignatureAlgorithm::Ed25519)),
        );
        assert!(matches!(
            signer.sign(&sample(), true),
            Err(CryptoError::InvalidConfig(_))
        ));
    }
}
