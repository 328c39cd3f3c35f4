//! Deterministic AES-SIV (RFC 5297) without associated data.
//!
//! The stored key is `encKey || macKey`; the RFC key order is the reverse.
//! Blob layout: `[siv:16][ciphertext]`.

use aes::cipher::KeyInit;
use aes_siv::siv::{Aes128Siv, Aes256Siv, CmacSiv};
use zeroize::Zeroizing;

use crate::error::CryptoError;

type Aes192Siv = CmacSiv<aes::Aes192>;

const NO_HEADERS: [&[u8]; 0] = [];
const SIV_LENGTH: usize = 16;

fn rfc_key(key: &[u8]) -> Zeroizing<Vec<u8>> {
    let (enc_key, mac_key) = key.split_at(key.len() / 2);
    let mut out = Zeroizing::new(Vec::with_capacity(key.len()));
    out.extend_from_slice(mac_key);
    out.extend_from_slice(enc_key);
    out
}

macro_rules! with_siv {
    ($key:expr, |$siv:ident| $body:expr) => {
        match $key.len() {
            32 => {
                type $siv = Aes128Siv;
                $body
            }
            48 => {
                type $siv = Aes192Siv;
                $body
            }
            64 => {
                type $siv = Aes256Siv;
                $body
            }
            got => Err(CryptoError::UnsupportedKeyLength {
                cipher: "AES_SIV_DETERMINISTIC",
                got,
            }),
        }
    };
}

pub(super) fn encrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let key = rfc_key(key);
    with_siv!(key, |Siv| {
        Siv::new_from_slice(&key)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?
            .encrypt(NO_HEADERS, data)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
    })
}

pub(super) fn decrypt(key: &[u8], blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if blob.len() < SIV_LENGTH {
        return Err(CryptoError::DataTooShort);
    }
    let key = rfc_key(key);
    with_siv!(key, |Siv| {
        Siv::new_from_slice(&key)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?
            .decrypt(NO_HEADERS, blob)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    })
}
