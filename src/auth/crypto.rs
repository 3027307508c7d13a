//! Authenticated encryption for persisted token material
//!
//! Tokens are sealed with AES-256-GCM under a key supplied at process start.
//! Each call to [`seal`] draws a fresh 96-bit nonce. The blob version is bound
//! into the associated data, so a blob whose version field has been edited
//! fails the tag check instead of being reinterpreted.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VitalgateError};

/// Key length in bytes (AES-256)
pub const KEY_LEN: usize = 32;

/// Nonce length in bytes (GCM standard nonce)
pub const NONCE_LEN: usize = 12;

/// Current on-disk blob version
pub const BLOB_VERSION: u8 = 1;

/// A 256-bit symmetric key.
///
/// The envelope never derives keys; the operator supplies the raw key as
/// standard base64 (see `vitalgate keygen`).
#[derive(Clone)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    /// Wraps raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Decodes a standard-base64 key and checks its length.
    ///
    /// # Errors
    ///
    /// Returns [`VitalgateError::Config`] when the value is not base64 or does
    /// not decode to exactly 32 bytes. The message never includes the value.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|_| {
                VitalgateError::Config("encryption_key is not valid base64".to_string())
            })?;
        let bytes: [u8; KEY_LEN] = raw.as_slice().try_into().map_err(|_| {
            VitalgateError::Config(format!(
                "encryption_key must decode to {} bytes, got {}",
                KEY_LEN,
                raw.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Generates a random key.
    pub fn generate() -> Self {
        use rand::RngCore as _;

        let mut bytes = [0u8; KEY_LEN];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Standard-base64 rendering, used by the `keygen` subcommand.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.0)
            .map_err(|_| VitalgateError::Config("invalid encryption key length".to_string()).into())
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey([redacted])")
    }
}

/// The persisted representation of a sealed payload.
///
/// `ciphertext` carries the GCM tag appended to the encrypted bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    /// Format version; only [`BLOB_VERSION`] is understood
    pub version: u8,
    /// Base64 nonce
    pub nonce: String,
    /// Base64 ciphertext with trailing tag
    pub ciphertext: String,
}

fn associated_data(version: u8) -> Vec<u8> {
    format!("vitalgate-token-v{}", version).into_bytes()
}

/// Encrypts `plaintext` under `key` with a fresh random nonce.
///
/// # Errors
///
/// Fails only if the cipher rejects the input, which does not happen for
/// payloads of realistic size.
///
/// # Examples
///
/// ```
/// use vitalgate::auth::crypto::{open, seal, EncryptionKey};
///
/// let key = EncryptionKey::generate();
/// let blob = seal(b"hello", &key).unwrap();
/// assert_eq!(open(&blob, &key).unwrap(), b"hello");
/// ```
pub fn seal(plaintext: &[u8], key: &EncryptionKey) -> Result<EncryptedBlob> {
    use rand::RngCore as _;

    let cipher = key.cipher()?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce_bytes);

    let aad = associated_data(BLOB_VERSION);
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|_| VitalgateError::BlobFormat("encryption failed".to_string()))?;

    let engine = base64::engine::general_purpose::STANDARD;
    Ok(EncryptedBlob {
        version: BLOB_VERSION,
        nonce: engine.encode(nonce_bytes),
        ciphertext: engine.encode(ciphertext),
    })
}

/// Decrypts and authenticates `blob`.
///
/// # Errors
///
/// - [`VitalgateError::BlobFormat`] for unknown versions or undecodable fields
/// - [`VitalgateError::CryptoFailure`] when tag verification fails, which
///   means either tampering or the wrong key
pub fn open(blob: &EncryptedBlob, key: &EncryptionKey) -> Result<Vec<u8>> {
    if blob.version != BLOB_VERSION {
        return Err(VitalgateError::BlobFormat(format!(
            "unsupported blob version {}",
            blob.version
        ))
        .into());
    }

    let engine = base64::engine::general_purpose::STANDARD;
    let nonce = engine
        .decode(&blob.nonce)
        .map_err(|_| VitalgateError::BlobFormat("nonce is not valid base64".to_string()))?;
    if nonce.len() != NONCE_LEN {
        return Err(VitalgateError::BlobFormat(format!(
            "nonce must be {} bytes, got {}",
            NONCE_LEN,
            nonce.len()
        ))
        .into());
    }
    let ciphertext = engine
        .decode(&blob.ciphertext)
        .map_err(|_| VitalgateError::BlobFormat("ciphertext is not valid base64".to_string()))?;

    let aad = associated_data(blob.version);
    let cipher = key.cipher()?;
    cipher
        .decrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: &ciphertext,
                aad: &aad,
            },
        )
        .map_err(|_| VitalgateError::CryptoFailure.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{error_kind, ErrorKind};

    #[test]
    fn test_seal_open_arbitrary_bytes() {
        let key = EncryptionKey::generate();
        let payloads: [&[u8]; 4] = [b"", b"x", &[0u8, 255, 1, 254, 0, 0], &[7u8; 4096]];
        for payload in payloads {
            let blob = seal(payload, &key).unwrap();
            assert_eq!(open(&blob, &key).unwrap(), payload);
        }
    }

    #[test]
    fn test_open_with_other_key_is_crypto_failure() {
        let blob = seal(b"refresh-token-material", &EncryptionKey::generate()).unwrap();
        let err = open(&blob, &EncryptionKey::generate()).unwrap_err();
        assert_eq!(error_kind(&err), ErrorKind::CryptoFailure);
    }

    #[test]
    fn test_tampered_ciphertext_is_crypto_failure() {
        let key = EncryptionKey::generate();
        let mut blob = seal(b"payload", &key).unwrap();
        let engine = base64::engine::general_purpose::STANDARD;
        let mut raw = engine.decode(&blob.ciphertext).unwrap();
        raw[0] ^= 0x01;
        blob.ciphertext = engine.encode(raw);

        let err = open(&blob, &key).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VitalgateError>(),
            Some(VitalgateError::CryptoFailure)
        ));
    }

    #[test]
    fn test_unknown_version_rejected_as_format_error() {
        let key = EncryptionKey::generate();
        let mut blob = seal(b"payload", &key).unwrap();
        blob.version = 2;
        let err = open(&blob, &key).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VitalgateError>(),
            Some(VitalgateError::BlobFormat(_))
        ));
    }

    #[test]
    fn test_bad_nonce_length_is_format_error() {
        let key = EncryptionKey::generate();
        let mut blob = seal(b"payload", &key).unwrap();
        blob.nonce = base64::engine::general_purpose::STANDARD.encode([0u8; 8]);
        let err = open(&blob, &key).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VitalgateError>(),
            Some(VitalgateError::BlobFormat(_))
        ));
    }

    #[test]
    fn test_nonces_differ_between_seals() {
        let key = EncryptionKey::generate();
        let a = seal(b"same", &key).unwrap();
        let b = seal(b"same", &key).unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_key_from_base64_roundtrip_and_length_check() {
        let key = EncryptionKey::generate();
        let restored = EncryptionKey::from_base64(&key.to_base64()).unwrap();
        let blob = seal(b"abc", &key).unwrap();
        assert_eq!(open(&blob, &restored).unwrap(), b"abc");

        let short = base64::engine::general_purpose::STANDARD.encode([1u8; 16]);
        let err = EncryptionKey::from_base64(&short).unwrap_err();
        assert!(err.to_string().contains("32 bytes"));
        assert!(EncryptionKey::from_base64("not base64 !!").is_err());
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key = EncryptionKey::from_bytes([0xAB; KEY_LEN]);
        let rendered = format!("{:?}", key);
        assert!(rendered.contains("redacted"));
        assert!(!rendered.contains(&key.to_base64()));
    }
}
