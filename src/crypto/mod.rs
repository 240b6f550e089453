//! Region cipher (C1): AES-GCM seal/open of region pixel buffers, plus the
//! HMAC-SHA256 primitive used to seal a data pack's trailer.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes128Gcm, Aes192Gcm, Aes256Gcm, Nonce};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::RvaError;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// A cryptographic key that wipes its buffer on drop and is never logged
/// unless the caller explicitly formats it to hex.
#[derive(Clone)]
pub struct Key(Vec<u8>);

impl Key {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, RvaError> {
        match bytes.len() {
            16 | 24 | 32 => Ok(Self(bytes)),
            n => Err(RvaError::InvalidKeyLength(n)),
        }
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, RvaError> {
        let bytes =
            hex::decode(hex_str).map_err(|e| RvaError::InvalidInput(format!("bad hex key: {e}")))?;
        Self::from_bytes(bytes)
    }

    pub fn random(len: usize) -> Result<Self, RvaError> {
        if !matches!(len, 16 | 24 | 32) {
            return Err(RvaError::InvalidKeyLength(len));
        }
        let mut bytes = vec![0u8; len];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl Drop for Key {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Dispatches to the AES-GCM implementation matching the key length.
///
/// `aes-gcm` exposes `Aes128Gcm`/`Aes192Gcm`/`Aes256Gcm` as distinct concrete
/// types rather than one runtime-configurable cipher; this enum picks the
/// right one once per call and shares a single encrypt/decrypt code path
/// since all three use a 96-bit nonce and a 128-bit tag.
enum AnyAesGcm {
    Aes128(Aes128Gcm),
    Aes192(Aes192Gcm),
    Aes256(Aes256Gcm),
}

impl AnyAesGcm {
    fn new(key: &Key) -> Result<Self, RvaError> {
        match key.as_bytes().len() {
            16 => Ok(Self::Aes128(
                Aes128Gcm::new_from_slice(key.as_bytes())
                    .map_err(|_| RvaError::InvalidKeyLength(16))?,
            )),
            24 => Ok(Self::Aes192(
                Aes192Gcm::new_from_slice(key.as_bytes())
                    .map_err(|_| RvaError::InvalidKeyLength(24))?,
            )),
            32 => Ok(Self::Aes256(
                Aes256Gcm::new_from_slice(key.as_bytes())
                    .map_err(|_| RvaError::InvalidKeyLength(32))?,
            )),
            n => Err(RvaError::InvalidKeyLength(n)),
        }
    }

    fn encrypt(&self, nonce: &Nonce, plaintext: &[u8]) -> Result<Vec<u8>, RvaError> {
        let result = match self {
            Self::Aes128(c) => c.encrypt(nonce, plaintext),
            Self::Aes192(c) => c.encrypt(nonce, plaintext),
            Self::Aes256(c) => c.encrypt(nonce, plaintext),
        };
        result.map_err(|_| RvaError::InternalError("AES-GCM encryption failed".into()))
    }

    fn decrypt(&self, nonce: &Nonce, ciphertext: &[u8]) -> Result<Vec<u8>, RvaError> {
        let result = match self {
            Self::Aes128(c) => c.decrypt(nonce, ciphertext),
            Self::Aes192(c) => c.decrypt(nonce, ciphertext),
            Self::Aes256(c) => c.decrypt(nonce, ciphertext),
        };
        result.map_err(|_| RvaError::AuthFailed)
    }
}

/// Seals `plaintext` with a fresh random 96-bit nonce and empty AAD.
///
/// Returns `nonce ‖ ciphertext ‖ tag`. The bbox the plaintext came from is
/// authenticated separately by the pack's HMAC trailer, not as AEAD AAD.
pub fn seal(plaintext: &[u8], key: &Key) -> Result<Vec<u8>, RvaError> {
    let cipher = AnyAesGcm::new(key)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher.encrypt(&nonce, plaintext)?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(nonce.as_slice());
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Opens a blob produced by [`seal`], verifying the length and the GCM tag.
pub fn open(blob: &[u8], key: &Key, expected_len: usize) -> Result<Vec<u8>, RvaError> {
    if blob.len() < NONCE_LEN + TAG_LEN {
        return Err(RvaError::ShapeMismatch {
            expected: NONCE_LEN + TAG_LEN,
            actual: blob.len(),
        });
    }

    let cipher = AnyAesGcm::new(key)?;
    let nonce = Nonce::from_slice(&blob[..NONCE_LEN]);
    let plaintext = cipher.decrypt(nonce, &blob[NONCE_LEN..])?;

    if plaintext.len() != expected_len {
        return Err(RvaError::ShapeMismatch {
            expected: expected_len,
            actual: plaintext.len(),
        });
    }
    Ok(plaintext)
}

type HmacSha256 = Hmac<Sha256>;

/// Computes HMAC-SHA256 of `data` under `key`.
pub fn hmac_sha256(key: &Key, data: &[u8]) -> [u8; 32] {
    let mut mac =
        HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Constant-time comparison of two 32-byte digests.
pub fn constant_time_eq(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        for len in [16usize, 24, 32] {
            let key = Key::random(len).unwrap();
            let plaintext = vec![7u8; 300];
            let blob = seal(&plaintext, &key).unwrap();
            let opened = open(&blob, &key, plaintext.len()).unwrap();
            assert_eq!(plaintext, opened);
        }
    }

    #[test]
    fn open_rejects_wrong_key() {
        let key = Key::random(32).unwrap();
        let other = Key::random(32).unwrap();
        let blob = seal(b"hello region", &key).unwrap();
        let err = open(&blob, &other, b"hello region".len()).unwrap_err();
        assert!(matches!(err, RvaError::AuthFailed));
    }

    #[test]
    fn open_rejects_wrong_expected_len() {
        let key = Key::random(16).unwrap();
        let blob = seal(b"hello region", &key).unwrap();
        let err = open(&blob, &key, 999).unwrap_err();
        assert!(matches!(err, RvaError::ShapeMismatch { .. }));
    }

    #[test]
    fn from_bytes_rejects_bad_length() {
        assert!(matches!(
            Key::from_bytes(vec![0u8; 17]),
            Err(RvaError::InvalidKeyLength(17))
        ));
    }

    #[test]
    fn hmac_is_deterministic_and_key_dependent() {
        let key = Key::random(32).unwrap();
        let other = Key::random(32).unwrap();
        let data = b"pack body bytes";
        let d1 = hmac_sha256(&key, data);
        let d2 = hmac_sha256(&key, data);
        assert_eq!(d1, d2);
        assert_ne!(d1, hmac_sha256(&other, data));
    }
}
