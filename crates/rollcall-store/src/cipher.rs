//! Template encryption at rest (AES-256-GCM).
//!
//! Blob layout: 12-byte random nonce followed by the ciphertext+tag of the
//! template's little-endian `f32` bytes.

use std::fs;
use std::io::Write;
use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use rollcall_core::FaceTemplate;
use sha2::{Digest, Sha256};
use thiserror::Error;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum CipherError {
    #[error("template encryption failed")]
    Encrypt,
    #[error("template decryption failed: wrong key or corrupted data")]
    Decrypt,
    #[error("encrypted template is truncated ({0} bytes)")]
    Truncated(usize),
    #[error("key file {path}: expected 32 bytes, found {found}")]
    BadKeyFile { path: String, found: usize },
    #[error("decrypted template is invalid: {0}")]
    Template(#[from] rollcall_core::TemplateError),
    #[error("key file I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Encrypts and decrypts face templates with one deployment key.
#[derive(Clone)]
pub struct TemplateCipher {
    cipher: Aes256Gcm,
}

impl TemplateCipher {
    pub fn from_key_bytes(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Derive the key from an operator-supplied passphrase (SHA-256).
    pub fn from_passphrase(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&digest);
        Self::from_key_bytes(&key)
    }

    /// Fresh random key, for tests and ephemeral stores.
    pub fn random() -> Self {
        let mut key = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut key);
        Self::from_key_bytes(&key)
    }

    /// Load the key file, creating it with a random key (mode 0600) if absent.
    pub fn load_or_create(path: &Path) -> Result<Self, CipherError> {
        if path.exists() {
            let bytes = fs::read(path)?;
            let key: [u8; KEY_LEN] =
                bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| CipherError::BadKeyFile {
                        path: path.display().to_string(),
                        found: bytes.len(),
                    })?;
            tracing::debug!(path = %path.display(), "template key loaded");
            return Ok(Self::from_key_bytes(&key));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut key = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut key);

        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        file.write_all(&key)?;
        file.sync_all()?;

        tracing::info!(path = %path.display(), "generated new template key");
        Ok(Self::from_key_bytes(&key))
    }

    pub fn encrypt(&self, template: &FaceTemplate) -> Result<Vec<u8>, CipherError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, template.to_le_bytes().as_slice())
            .map_err(|_| CipherError::Encrypt)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    pub fn decrypt(&self, blob: &[u8]) -> Result<FaceTemplate, CipherError> {
        if blob.len() <= NONCE_LEN {
            return Err(CipherError::Truncated(blob.len()));
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CipherError::Decrypt)?;
        Ok(FaceTemplate::from_le_bytes(&plaintext)?)
    }
}

impl std::fmt::Debug for TemplateCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TemplateCipher(..)")
    }
}
