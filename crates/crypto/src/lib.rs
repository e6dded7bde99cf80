//! Symmetric encryption of secret values under a process-wide master key.
//!
//! Ciphertext blobs are self-describing: a version byte, a random 96-bit
//! nonce, then the AES-256-GCM ciphertext with the authentication tag
//! appended. A deployment running with the wrong master key fails on the
//! first decrypt with [`CryptoError::DecryptFailed`].

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

/// Current blob format version.
const BLOB_VERSION: u8 = 0x01;

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Minimum valid blob: version + nonce + 16-byte tag.
const MIN_BLOB_LEN: usize = 1 + NONCE_LEN + 16;

pub type Result<T> = std::result::Result<T, CryptoError>;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("master key must not be empty")]
    EmptyMasterKey,

    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed: wrong master key or tampered ciphertext")]
    DecryptFailed,

    #[error("malformed ciphertext blob: {0}")]
    Malformed(String),

    #[error("unsupported ciphertext version: {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("decrypted value is not valid UTF-8")]
    InvalidUtf8,
}

/// Authenticated cipher for secret values.
///
/// The master key is supplied once at process start. A 64-character hex
/// string is used as the raw 256-bit key; any other string is treated as a
/// passphrase and digested with SHA-256.
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    pub fn new(master_key: &str) -> Result<Self> {
        let master_key = master_key.trim();
        if master_key.is_empty() {
            return Err(CryptoError::EmptyMasterKey);
        }

        let key_bytes = derive_key(master_key);
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);

        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Encrypt a plaintext into a self-describing blob.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::EncryptFailed)?;

        let mut blob = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        blob.push(BLOB_VERSION);
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);

        debug!("Encrypted {} bytes of plaintext", plaintext.len());
        Ok(blob)
    }

    /// Decrypt a blob produced by [`SecretCipher::encrypt`].
    ///
    /// Fails on truncated input, unknown versions, and authentication
    /// failure. Wrong key and tampering are indistinguishable and both
    /// surface as [`CryptoError::DecryptFailed`].
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < MIN_BLOB_LEN {
            return Err(CryptoError::Malformed(format!(
                "blob too short: {} bytes",
                blob.len()
            )));
        }

        let version = blob[0];
        if version != BLOB_VERSION {
            return Err(CryptoError::UnsupportedVersion(version));
        }

        let nonce = Nonce::from_slice(&blob[1..1 + NONCE_LEN]);
        let ciphertext = &blob[1 + NONCE_LEN..];

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::DecryptFailed)
    }

    /// Encrypt a UTF-8 string value.
    pub fn encrypt_str(&self, plaintext: &str) -> Result<Vec<u8>> {
        self.encrypt(plaintext.as_bytes())
    }

    /// Decrypt a blob into a UTF-8 string value.
    pub fn decrypt_str(&self, blob: &[u8]) -> Result<String> {
        let plaintext = self.decrypt(blob)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
    }
}

/// Derive the 256-bit key: raw hex when the string is exactly 64 hex chars,
/// SHA-256 of the passphrase otherwise.
fn derive_key(master_key: &str) -> [u8; 32] {
    if master_key.len() == 64 {
        if let Ok(raw) = hex::decode(master_key) {
            let mut key = [0u8; 32];
            key.copy_from_slice(&raw);
            return key;
        }
    }

    let digest = Sha256::digest(master_key.as_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let cipher = SecretCipher::new("test-master-key").unwrap();
        let blob = cipher.encrypt(b"hunter2").unwrap();
        assert_eq!(cipher.decrypt(&blob).unwrap(), b"hunter2");
    }

    #[test]
    fn test_round_trip_str() {
        let cipher = SecretCipher::new("test-master-key").unwrap();
        let blob = cipher.encrypt_str("sk-live-abc123").unwrap();
        assert_eq!(cipher.decrypt_str(&blob).unwrap(), "sk-live-abc123");
    }

    #[test]
    fn test_nonce_uniqueness() {
        let cipher = SecretCipher::new("test-master-key").unwrap();
        let a = cipher.encrypt(b"same plaintext").unwrap();
        let b = cipher.encrypt(b"same plaintext").unwrap();
        // Same plaintext must never produce the same blob
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let cipher = SecretCipher::new("key-one").unwrap();
        let other = SecretCipher::new("key-two").unwrap();
        let blob = cipher.encrypt(b"secret").unwrap();
        assert!(matches!(
            other.decrypt(&blob),
            Err(CryptoError::DecryptFailed)
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let cipher = SecretCipher::new("test-master-key").unwrap();
        let mut blob = cipher.encrypt(b"secret").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(matches!(
            cipher.decrypt(&blob),
            Err(CryptoError::DecryptFailed)
        ));
    }

    #[test]
    fn test_truncated_blob_fails() {
        let cipher = SecretCipher::new("test-master-key").unwrap();
        assert!(matches!(
            cipher.decrypt(&[0x01, 0x02, 0x03]),
            Err(CryptoError::Malformed(_))
        ));
    }

    #[test]
    fn test_unknown_version_fails() {
        let cipher = SecretCipher::new("test-master-key").unwrap();
        let mut blob = cipher.encrypt(b"secret").unwrap();
        blob[0] = 0x7f;
        assert!(matches!(
            cipher.decrypt(&blob),
            Err(CryptoError::UnsupportedVersion(0x7f))
        ));
    }

    #[test]
    fn test_hex_master_key_accepted() {
        let hex_key = "a".repeat(64);
        let cipher = SecretCipher::new(&hex_key).unwrap();
        let blob = cipher.encrypt(b"value").unwrap();
        assert_eq!(cipher.decrypt(&blob).unwrap(), b"value");
    }

    #[test]
    fn test_empty_master_key_rejected() {
        assert!(matches!(
            SecretCipher::new("  "),
            Err(CryptoError::EmptyMasterKey)
        ));
    }
}
