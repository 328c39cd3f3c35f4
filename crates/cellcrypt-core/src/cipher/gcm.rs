//! AES-GCM with a random 12-byte nonce.
//!
//! Blob layout: `[vint 12][nonce:12][ciphertext + tag:16]`.

use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{AesGcm, Nonce};

use super::fill_random;
use crate::error::CryptoError;
use crate::varint::{write_len_prefixed, ByteReader};

const NONCE_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;

fn generate_nonce() -> Result<[u8; NONCE_LENGTH], CryptoError> {
    let mut nonce = [0u8; NONCE_LENGTH];
    fill_random(&mut nonce)?;
    Ok(nonce)
}

pub(super) fn encrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let nonce = generate_nonce()?;
    let ciphertext = with_aes!("AES_GCM", key, |Aes| {
        AesGcm::<Aes, U12>::new_from_slice(key)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?
            .encrypt(Nonce::from_slice(&nonce), data)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
    })?;

    let mut out = Vec::with_capacity(1 + NONCE_LENGTH + ciphertext.len());
    write_len_prefixed(&mut out, &nonce)?;
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub(super) fn decrypt(key: &[u8], blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut reader = ByteReader::new(blob);
    let nonce = reader.read_len_prefixed()?;
    if nonce.len() != NONCE_LENGTH {
        return Err(CryptoError::Malformed(format!(
            "AES_GCM expects a {NONCE_LENGTH}-byte nonce, got {}",
            nonce.len()
        )));
    }
    let ciphertext = reader.remaining();
    if ciphertext.len() < TAG_LENGTH {
        return Err(CryptoError::DataTooShort);
    }

    with_aes!("AES_GCM", key, |Aes| {
        AesGcm::<Aes, U12>::new_from_slice(key)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    })
}
