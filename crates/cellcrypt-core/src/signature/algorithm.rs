//! Signature algorithms: ECDSA P-256 (SHA-256, raw r||s signatures) and Ed25519.

use std::fmt;
use std::str::FromStr;

use ecdsa::signature::{Signer, Verifier};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::cipher::fill_random;
use crate::error::CryptoError;

const FINGERPRINT_LENGTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    #[serde(rename = "ECDSA_P256")]
    EcdsaP256,
    #[serde(rename = "ED25519")]
    Ed25519,
}

impl SignatureAlgorithm {
    pub const ALL: [SignatureAlgorithm; 2] =
        [SignatureAlgorithm::EcdsaP256, SignatureAlgorithm::Ed25519];

    pub fn name(self) -> &'static str {
        match self {
            SignatureAlgorithm::EcdsaP256 => "ECDSA_P256",
            SignatureAlgorithm::Ed25519 => "ED25519",
        }
    }

    /// Generate a fresh signing key.
    pub fn generate(self) -> Result<PrivateKey, CryptoError> {
        match self {
            SignatureAlgorithm::EcdsaP256 => Ok(PrivateKey::EcdsaP256(
                p256::ecdsa::SigningKey::random(&mut p256::elliptic_curve::rand_core::OsRng),
            )),
            SignatureAlgorithm::Ed25519 => {
                let mut seed = Zeroizing::new([0u8; ed25519_dalek::SECRET_KEY_LENGTH]);
                fill_random(&mut seed[..])?;
                Ok(PrivateKey::Ed25519(ed25519_dalek::SigningKey::from_bytes(
                    &seed,
                )))
            }
        }
    }

    /// Decode a private key: a 32-byte scalar for P-256, a 32-byte seed for Ed25519.
    pub fn private_key_from_bytes(self, bytes: &[u8]) -> Result<PrivateKey, CryptoError> {
        match self {
            SignatureAlgorithm::EcdsaP256 => p256::ecdsa::SigningKey::from_slice(bytes)
                .map(PrivateKey::EcdsaP256)
                .map_err(|e| CryptoError::Malformed(format!("P-256 scalar: {e}"))),
            SignatureAlgorithm::Ed25519 => {
                let seed: &[u8; ed25519_dalek::SECRET_KEY_LENGTH] =
                    bytes.try_into().map_err(|_| {
                        CryptoError::Malformed(format!(
                            "Ed25519 seed must be 32 bytes, got {}",
                            bytes.len()
                        ))
                    })?;
                Ok(PrivateKey::Ed25519(ed25519_dalek::SigningKey::from_bytes(
                    seed,
                )))
            }
        }
    }

    /// Decode a public key: a SEC1 point for P-256, 32 bytes for Ed25519.
    pub fn public_key_from_bytes(self, bytes: &[u8]) -> Result<PublicKey, CryptoError> {
        match self {
            SignatureAlgorithm::EcdsaP256 => p256::ecdsa::VerifyingKey::from_sec1_bytes(bytes)
                .map(PublicKey::EcdsaP256)
                .map_err(|e| CryptoError::Malformed(format!("P-256 point: {e}"))),
            SignatureAlgorithm::Ed25519 => {
                let raw: &[u8; ed25519_dalek::PUBLIC_KEY_LENGTH] =
                    bytes.try_into().map_err(|_| {
                        CryptoError::Malformed(format!(
                            "Ed25519 public key must be 32 bytes, got {}",
                            bytes.len()
                        ))
                    })?;
                ed25519_dalek::VerifyingKey::from_bytes(raw)
                    .map(PublicKey::Ed25519)
                    .map_err(|e| CryptoError::Malformed(format!("Ed25519 point: {e}")))
            }
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SignatureAlgorithm::ALL
            .into_iter()
            .find(|algorithm| algorithm.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CryptoError::InvalidConfig(format!("unknown signature algorithm: {s}")))
    }
}

/// Private half of a signing key pair.
#[derive(Debug, Clone)]
pub enum PrivateKey {
    EcdsaP256(p256::ecdsa::SigningKey),
    Ed25519(ed25519_dalek::SigningKey),
}

impl PrivateKey {
    pub fn algorithm(&self) -> SignatureAlgorithm {
        match self {
            PrivateKey::EcdsaP256(_) => SignatureAlgorithm::EcdsaP256,
            PrivateKey::Ed25519(_) => SignatureAlgorithm::Ed25519,
        }
    }

    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self {
            PrivateKey::EcdsaP256(key) => {
                let signature: p256::ecdsa::Signature = key
                    .try_sign(message)
                    .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
                Ok(signature.to_bytes().to_vec())
            }
            PrivateKey::Ed25519(key) => {
                let signature: ed25519_dalek::Signature = key
                    .try_sign(message)
                    .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
                Ok(signature.to_bytes().to_vec())
            }
        }
    }

    pub fn public_key(&self) -> PublicKey {
        match self {
            PrivateKey::EcdsaP256(key) => PublicKey::EcdsaP256(key.verifying_key().clone()),
            PrivateKey::Ed25519(key) => PublicKey::Ed25519(key.verifying_key()),
        }
    }

    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        match self {
            PrivateKey::EcdsaP256(key) => Zeroizing::new(key.to_bytes().to_vec()),
            PrivateKey::Ed25519(key) => Zeroizing::new(key.to_bytes().to_vec()),
        }
    }
}

/// Public half of a signing key pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    EcdsaP256(p256::ecdsa::VerifyingKey),
    Ed25519(ed25519_dalek::VerifyingKey),
}

impl PublicKey {
    pub fn algorithm(&self) -> SignatureAlgorithm {
        match self {
            PublicKey::EcdsaP256(_) => SignatureAlgorithm::EcdsaP256,
            PublicKey::Ed25519(_) => SignatureAlgorithm::Ed25519,
        }
    }

    /// Fails with [`CryptoError::SignatureFailed`] on a malformed or mismatched signature.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let valid = match self {
            PublicKey::EcdsaP256(key) => p256::ecdsa::Signature::from_slice(signature)
                .map(|signature| key.verify(message, &signature).is_ok())
                .unwrap_or(false),
            PublicKey::Ed25519(key) => ed25519_dalek::Signature::from_slice(signature)
                .map(|signature| key.verify(message, &signature).is_ok())
                .unwrap_or(false),
        };
        if valid {
            Ok(())
        } else {
            Err(CryptoError::SignatureFailed(
                "invalid signature found".to_string(),
            ))
        }
    }

    /// Compressed SEC1 point for P-256, raw 32 bytes for Ed25519.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            PublicKey::EcdsaP256(key) => key.to_encoded_point(true).as_bytes().to_vec(),
            PublicKey::Ed25519(key) => key.to_bytes().to_vec(),
        }
    }

    /// Truncated SHA-256 over the algorithm name and encoded key.
    pub fn fingerprint(&self) -> [u8; FINGERPRINT_LENGTH] {
        let mut hasher = Sha256::new();
        hasher.update(self.algorithm().name().as_bytes());
        hasher.update(self.to_bytes());
        let digest = hasher.finalize();
        let mut fingerprint = [0u8; FINGERPRINT_LENGTH];
        fingerprint.copy_from_slice(&digest[..FINGERPRINT_LENGTH]);
        fingerprint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_round_trip() {
        for algorithm in SignatureAlgorithm::ALL {
            let key = algorithm.generate().unwrap();
            let signature = key.sign(b"hello world").unwrap();
            key.public_key().verify(b"hello world", &signature).unwrap();
        }
    }

    #[test]
    fn wrong_message_fails() {
        for algorithm in SignatureAlgorithm::ALL {
            let key = algorithm.generate().unwrap();
            let signature = key.sign(b"hello world").unwrap();
            let err = key
                .public_key()
                .verify(b"hello worle", &signature)
                .unwrap_err();
            assert!(err.is_signature_failure(), "{algorithm}");
        }
    }

    #[test]
    fn wrong_key_fails() {
        let signer = SignatureAlgorithm::EcdsaP256.generate().unwrap();
        let other = SignatureAlgorithm::EcdsaP256.generate().unwrap();
        let signature = signer.sign(b"msg").unwrap();
        assert!(other.public_key().verify(b"msg", &signature).is_err());
    }

    #[test]
    fn garbage_signature_fails() {
        for algorithm in SignatureAlgorithm::ALL {
            let key = algorithm.generate().unwrap();
            assert!(key.public_key().verify(b"msg", &[0u8; 7]).is_err());
        }
    }

    #[test]
    fn p256_signature_is_raw_64_bytes() {
        let key = SignatureAlgorithm::EcdsaP256.generate().unwrap();
        assert_eq!(key.sign(b"x").unwrap().len(), 64);
    }

    #[test]
    fn ed25519_is_deterministic() {
        let key = SignatureAlgorithm::Ed25519.generate().unwrap();
        assert_eq!(key.sign(b"x").unwrap(), key.sign(b"x").unwrap());
    }

    #[test]
    fn keys_survive_byte_encoding() {
        for algorithm in SignatureAlgorithm::ALL {
            let key = algorithm.generate().unwrap();
            let restored = algorithm.private_key_from_bytes(&key.to_bytes()).unwrap();
            assert_eq!(restored.public_key(), key.public_key());

            let public = algorithm
                .public_key_from_bytes(&key.public_key().to_bytes())
                .unwrap();
            assert_eq!(public, key.public_key());
            assert_eq!(public.fingerprint(), key.public_key().fingerprint());
        }
    }

    #[test]
    fn rejects_bad_key_bytes() {
        assert!(SignatureAlgorithm::Ed25519
            .private_key_from_bytes(&[1u8; 31])
            .is_err());
        assert!(SignatureAlgorithm::EcdsaP256
            .public_key_from_bytes(&[4u8; 10])
            .is_err());
    }

    #[test]
    fn names_parse() {
        assert_eq!(
            "ecdsa_p256".parse::<SignatureAlgorithm>().unwrap(),
            SignatureAlgorithm::EcdsaP256
        );
        assert_eq!(
            "ED25519".parse::<SignatureAlgorithm>().unwrap(),
            SignatureAlgorithm::Ed25519
        );
        assert!("RSA".parse::<SignatureAlgorithm>().is_err());
    }
}
