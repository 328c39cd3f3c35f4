//! Unauthenticated AES modes with a random 16-byte IV.
//!
//! Blob layout: `[vint 16][iv:16][ciphertext]`.

use aes::cipher::{
    AsyncStreamCipher, BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher,
};
use cbc::cipher::block_padding::Pkcs7;

use super::fill_random;
use crate::error::CryptoError;
use crate::varint::{write_len_prefixed, ByteReader};

const IV_LENGTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Mode {
    Ctr,
    Cfb,
    Cbc,
    Ofb,
}

impl Mode {
    fn name(self) -> &'static str {
        match self {
            Mode::Ctr => "AES_CTR",
            Mode::Cfb => "AES_CFB",
            Mode::Cbc => "AES_CBC",
            Mode::Ofb => "AES_OFB",
        }
    }
}

fn init_error(e: impl std::fmt::Display) -> CryptoError {
    CryptoError::EncryptionFailed(e.to_string())
}

fn apply(
    mode: Mode,
    key: &[u8],
    iv: &[u8],
    data: &[u8],
    encrypt: bool,
) -> Result<Vec<u8>, CryptoError> {
    with_aes!(mode.name(), key, |Aes| match mode {
        Mode::Cbc if encrypt => {
            let cipher = cbc::Encryptor::<Aes>::new_from_slices(key, iv).map_err(init_error)?;
            Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(data))
        }
        Mode::Cbc => {
            let cipher = cbc::Decryptor::<Aes>::new_from_slices(key, iv).map_err(init_error)?;
            cipher
                .decrypt_padded_vec_mut::<Pkcs7>(data)
                .map_err(|_| CryptoError::DecryptionFailed("bad padding".to_string()))
        }
        Mode::Ctr => {
            let mut buf = data.to_vec();
            let mut cipher = ctr::Ctr128BE::<Aes>::new_from_slices(key, iv).map_err(init_error)?;
            cipher.apply_keystream(&mut buf);
            Ok(buf)
        }
        Mode::Ofb => {
            let mut buf = data.to_vec();
            let mut cipher = ofb::Ofb::<Aes>::new_from_slices(key, iv).map_err(init_error)?;
            cipher.apply_keystream(&mut buf);
            Ok(buf)
        }
        Mode::Cfb if encrypt => {
            let mut buf = data.to_vec();
            cfb_mode::Encryptor::<Aes>::new_from_slices(key, iv)
                .map_err(init_error)?
                .encrypt(&mut buf);
            Ok(buf)
        }
        Mode::Cfb => {
            let mut buf = data.to_vec();
            cfb_mode::Decryptor::<Aes>::new_from_slices(key, iv)
                .map_err(init_error)?
                .decrypt(&mut buf);
            Ok(buf)
        }
    })
}

pub(super) fn encrypt(mode: Mode, key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut iv = [0u8; IV_LENGTH];
    fill_random(&mut iv)?;

    let ciphertext = apply(mode, key, &iv, data, true)?;
    let mut out = Vec::with_capacity(1 + IV_LENGTH + ciphertext.len());
    write_len_prefixed(&mut out, &iv)?;
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub(super) fn decrypt(mode: Mode, key: &[u8], blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut reader = ByteReader::new(blob);
    let iv = reader.read_len_prefixed()?;
    if iv.len() != IV_LENGTH {
        return Err(CryptoError::Malformed(format!(
            "{} expects a {IV_LENGTH}-byte IV, got {}",
            mode.name(),
            iv.len()
        )));
    }
    apply(mode, key, iv, reader.remaining(), false)
}
