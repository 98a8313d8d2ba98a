//! Passphrase encryption for archives
//!
//! Container layout: `MAGIC` (8 bytes) | salt (16) | nonce (12) | AES-256-GCM
//! ciphertext. The key is derived from the passphrase and salt with Argon2id,
//! so the same passphrase never produces the same key twice.

use crate::AppError;
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use argon2::Argon2;

/// Leading bytes of every encrypted archive.
pub const MAGIC: &[u8; 8] = b"VKENC001";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const HEADER_LEN: usize = MAGIC.len() + SALT_LEN + NONCE_LEN;

/// Seals and opens archive containers with a passphrase.
#[derive(Clone)]
pub struct ArchiveCipher {
    passphrase: String,
}

impl std::fmt::Debug for ArchiveCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveCipher").finish_non_exhaustive()
    }
}

impl ArchiveCipher {
    pub fn new(passphrase: impl Into<String>) -> Result<Self, AppError> {
        let passphrase = passphrase.into();
        if passphrase.is_empty() {
            return Err(AppError::Encryption(
                "Encryption passphrase must not be empty".to_string(),
            ));
        }
        Ok(Self { passphrase })
    }

    /// Whether `data` starts with the encrypted container magic.
    pub fn is_sealed(data: &[u8]) -> bool {
        data.starts_with(MAGIC)
    }

    fn cipher_for(&self, salt: &[u8]) -> Result<Aes256Gcm, AppError> {
        let mut key_bytes = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(self.passphrase.as_bytes(), salt, &mut key_bytes)
            .map_err(|e| AppError::Encryption(format!("Key derivation failed: {}", e)))?;
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Aes256Gcm::new(key))
    }

    /// Encrypt `plaintext` into a self-describing container.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, AppError> {
        let salt: [u8; SALT_LEN] = rand::random();
        let cipher = self.cipher_for(&salt)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| AppError::Encryption(format!("Encryption failed: {}", e)))?;

        let mut sealed = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        sealed.extend_from_slice(MAGIC);
        sealed.extend_from_slice(&salt);
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypt a container produced by [`ArchiveCipher::seal`].
    ///
    /// A wrong passphrase or any tampering fails the GCM tag check; no
    /// plaintext is returned in that case.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, AppError> {
        if !Self::is_sealed(sealed) {
            return Err(AppError::Encryption(
                "Not an encrypted archive container".to_string(),
            ));
        }
        if sealed.len() < HEADER_LEN {
            return Err(AppError::Encryption(
                "Encrypted archive is truncated".to_string(),
            ));
        }

        let salt = &sealed[MAGIC.len()..MAGIC.len() + SALT_LEN];
        let nonce = Nonce::from_slice(&sealed[MAGIC.len() + SALT_LEN..HEADER_LEN]);
        let ciphertext = &sealed[HEADER_LEN..];

        self.cipher_for(salt)?
            .decrypt(nonce, ciphertext)
            .map_err(|_| {
                AppError::Encryption(
                    "Decryption failed: wrong passphrase or corrupted archive".to_string(),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_and_open() {
        let cipher = ArchiveCipher::new("correct horse").unwrap();
        let sealed = cipher.seal(b"PK\x03\x04 archive bytes").unwrap();

        assert!(ArchiveCipher::is_sealed(&sealed));
        assert!(!sealed
            .windows(b"archive bytes".len())
            .any(|w| w == b"archive bytes"));
        assert_eq!(cipher.open(&sealed).unwrap(), b"PK\x03\x04 archive bytes");
    }

    #[test]
    fn test_salt_makes_containers_differ() {
        let cipher = ArchiveCipher::new("pass").unwrap();
        let a = cipher.seal(b"same").unwrap();
        let b = cipher.seal(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let sealed = ArchiveCipher::new("right").unwrap().seal(b"secret").unwrap();
        let result = ArchiveCipher::new("wrong").unwrap().open(&sealed);
        assert!(matches!(result, Err(AppError::Encryption(_))));
    }

    #[test]
    fn test_tampered_and_truncated_containers_fail() {
        let cipher = ArchiveCipher::new("pass").unwrap();
        let mut sealed = cipher.seal(b"secret").unwrap();

        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(cipher.open(&sealed).is_err());

        assert!(cipher.open(&sealed[..HEADER_LEN - 1]).is_err());
        assert!(cipher.open(b"PK\x03\x04").is_err());
    }

    #[test]
    fn test_empty_passphrase_rejected() {
        assert!(matches!(
            ArchiveCipher::new(""),
            Err(AppError::Encryption(_))
        ));
    }
}
