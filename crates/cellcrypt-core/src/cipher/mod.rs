//! Value ciphers.
//!
//! Every cipher produces a self-describing blob: decrypting needs only the
//! key and the blob. The semantic modes (CTR, CFB, CBC, OFB, GCM) prefix the
//! ciphertext with `[vint ivLen][iv]`; the deterministic SIV mode writes the
//! synthetic IV followed by the ciphertext.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

/// Dispatch on AES key length to the concrete block cipher type.
macro_rules! with_aes {
    ($cipher_name:expr, $key:expr, |$aes:ident| $body:expr) => {
        match $key.len() {
            16 => {
                type $aes = aes::Aes128;
                $body
            }
            24 => {
                type $aes = aes::Aes192;
                $body
            }
            32 => {
                type $aes = aes::Aes256;
                $body
            }
            got => Err(CryptoError::UnsupportedKeyLength {
                cipher: $cipher_name,
                got,
            }),
        }
    };
}

mod gcm;
mod modes;
mod siv;

const AES_KEY_LENGTHS: &[usize] = &[16, 24, 32];
const SIV_KEY_LENGTHS: &[usize] = &[32, 48, 64];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CipherKind {
    AesSivDeterministic,
    AesCtr,
    AesCfb,
    AesCbc,
    AesOfb,
    AesGcm,
}

impl CipherKind {
    pub const ALL: [CipherKind; 6] = [
        CipherKind::AesSivDeterministic,
        CipherKind::AesCtr,
        CipherKind::AesCfb,
        CipherKind::AesCbc,
        CipherKind::AesOfb,
        CipherKind::AesGcm,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CipherKind::AesSivDeterministic => "AES_SIV_DETERMINISTIC",
            CipherKind::AesCtr => "AES_CTR",
            CipherKind::AesCfb => "AES_CFB",
            CipherKind::AesCbc => "AES_CBC",
            CipherKind::AesOfb => "AES_OFB",
            CipherKind::AesGcm => "AES_GCM",
        }
    }

    /// Only deterministic ciphers can be searched by re-encrypting the query.
    pub fn is_deterministic(self) -> bool {
        matches!(self, CipherKind::AesSivDeterministic)
    }

    pub fn is_authenticated(self) -> bool {
        matches!(self, CipherKind::AesSivDeterministic | CipherKind::AesGcm)
    }

    /// Default key length in bytes.
    pub fn default_key_length(self) -> usize {
        match self {
            CipherKind::AesSivDeterministic => 32,
            _ => 16,
        }
    }

    /// Accepted key lengths in bytes.
    pub fn valid_key_lengths(self) -> &'static [usize] {
        match self {
            CipherKind::AesSivDeterministic => SIV_KEY_LENGTHS,
            _ => AES_KEY_LENGTHS,
        }
    }

    pub fn is_valid_key_length(self, length: usize) -> bool {
        self.valid_key_lengths().contains(&length)
    }

    fn check_key(self, key: &[u8]) -> Result<(), CryptoError> {
        if self.is_valid_key_length(key.len()) {
            Ok(())
        } else {
            Err(CryptoError::UnsupportedKeyLength {
                cipher: self.name(),
                got: key.len(),
            })
        }
    }

    pub fn encrypt(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.check_key(key)?;
        match self {
            CipherKind::AesSivDeterministic => siv::encrypt(key, data),
            CipherKind::AesGcm => gcm::encrypt(key, data),
            CipherKind::AesCtr => modes::encrypt(modes::Mode::Ctr, key, data),
            CipherKind::AesCfb => modes::encrypt(modes::Mode::Cfb, key, data),
            CipherKind::AesCbc => modes::encrypt(modes::Mode::Cbc, key, data),
            CipherKind::AesOfb => modes::encrypt(modes::Mode::Ofb, key, data),
        }
    }

    pub fn decrypt(self, key: &[u8], blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.check_key(key)?;
        match self {
            CipherKind::AesSivDeterministic => siv::decrypt(key, blob),
            CipherKind::AesGcm => gcm::decrypt(key, blob),
            CipherKind::AesCtr => modes::decrypt(modes::Mode::Ctr, key, blob),
            CipherKind::AesCfb => modes::decrypt(modes::Mode::Cfb, key, blob),
            CipherKind::AesCbc => modes::decrypt(modes::Mode::Cbc, key, blob),
            CipherKind::AesOfb => modes::decrypt(modes::Mode::Ofb, key, blob),
        }
    }
}

impl fmt::Display for CipherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CipherKind {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CipherKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CryptoError::InvalidConfig(format!("unknown cipher: {s}")))
    }
}

/// Fill `buf` from the OS random source.
pub fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    getrandom::getrandom(buf).map_err(|e| CryptoError::RngFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_key(length: usize) -> Vec<u8> {
        let mut key = vec![0u8; length];
        getrandom::getrandom(&mut key).unwrap();
        key
    }

    #[test]
    fn every_kind_round_trips_at_every_key_length() {
        let data = b"the quick brown fox jumps over the lazy dog";
        for kind in CipherKind::ALL {
            for &length in kind.valid_key_lengths() {
                let key = random_key(length);
                let blob = kind.encrypt(&key, data).unwrap();
                assert_ne!(&blob[..], &data[..], "{kind} left plaintext visible");
                assert_eq!(kind.decrypt(&key, &blob).unwrap(), data, "{kind}/{length}");
            }
        }
    }

    #[test]
    fn empty_plaintext() {
        for kind in CipherKind::ALL {
            let key = random_key(kind.default_key_length());
            let blob = kind.encrypt(&key, b"").unwrap();
            assert!(kind.decrypt(&key, &blob).unwrap().is_empty(), "{kind}");
        }
    }

    #[test]
    fn only_siv_is_deterministic() {
        for kind in CipherKind::ALL {
            let key = random_key(kind.default_key_length());
            let first = kind.encrypt(&key, b"same input").unwrap();
            let second = kind.encrypt(&key, b"same input").unwrap();
            assert_eq!(first == second, kind.is_deterministic(), "{kind}");
        }
    }

    #[test]
    fn wrong_key_length_rejected() {
        assert!(matches!(
            CipherKind::AesGcm.encrypt(&[0u8; 20], b"data"),
            Err(CryptoError::UnsupportedKeyLength { got: 20, .. })
        ));
        assert!(matches!(
            CipherKind::AesSivDeterministic.encrypt(&[0u8; 16], b"data"),
            Err(CryptoError::UnsupportedKeyLength { got: 16, .. })
        ));
    }

    #[test]
    fn authenticated_kinds_detect_tampering() {
        for kind in CipherKind::ALL.into_iter().filter(|k| k.is_authenticated()) {
            let key = random_key(kind.default_key_length());
            let mut blob = kind.encrypt(&key, b"integrity matters").unwrap();
            let last = blob.len() - 1;
            blob[last] ^= 0x01;
            assert!(
                matches!(kind.decrypt(&key, &blob), Err(CryptoError::DecryptionFailed(_))),
                "{kind}"
            );
        }
    }

    #[test]
    fn wrong_key_fails_authenticated_decrypt() {
        for kind in [CipherKind::AesGcm, CipherKind::AesSivDeterministic] {
            let blob = kind
                .encrypt(&random_key(kind.default_key_length()), b"data")
                .unwrap();
            assert!(kind
                .decrypt(&random_key(kind.default_key_length()), &blob)
                .is_err());
        }
    }

    #[test]
    fn names_parse() {
        for kind in CipherKind::ALL {
            assert_eq!(kind.name().parse::<CipherKind>().unwrap(), kind);
        }
        assert!("AES_ECB".parse::<CipherKind>().is_err());
    }

    #[test]
    fn key_length_metadata() {
        assert_eq!(CipherKind::AesSivDeterministic.default_key_length(), 32);
        assert_eq!(CipherKind::AesGcm.default_key_length(), 16);
        assert!(CipherKind::AesCbc.is_valid_key_length(24));
        assert!(!CipherKind::AesCbc.is_valid_key_length(48));
        assert!(CipherKind::AesSivDeterministic.is_valid_key_length(48));
    }
}
