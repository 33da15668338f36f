//! AES-256-GCM record encryption.
//!
//! Each write draws a random seed. The AES subkey and the nonce are derived
//! from the master key, the seed and the store key, so a ciphertext only
//! decrypts under the key it was written to.
//!
//! Layout: `seed (16 bytes) || ciphertext || tag (16 bytes)`.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use cellar_core::{Error, Result};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use super::traits::StorageCodec;

/// Random seed size in bytes.
pub const SEED_SIZE: usize = 16;

/// AES-256-GCM authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Minimum ciphertext size: seed + tag (no plaintext).
pub const MIN_CIPHERTEXT_LEN: usize = SEED_SIZE + TAG_SIZE;

const NONCE_SIZE: usize = 12;
const KEY_DOMAIN: &[u8] = b"cellar/record-key";
const NONCE_DOMAIN: &[u8] = b"cellar/record-nonce";

/// Wrapper for 32 raw key bytes that zeroizes on drop.
struct MasterKey([u8; 32]);

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Per-record authenticated encryption over a master key.
pub struct RecordCipher {
    master: MasterKey,
}

impl RecordCipher {
    /// Create a cipher from 32 raw key bytes.
    pub fn new(master: [u8; 32]) -> Self {
        Self {
            master: MasterKey(master),
        }
    }

    /// Create a cipher from a 64-character hex string.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let hex = hex.trim();
        if hex.len() != 64 {
            return Err(Error::invalid_input(format!(
                "master key must be 64 hex characters (32 bytes), got {}",
                hex.len()
            )));
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|e| {
                Error::invalid_input(format!("invalid hex at position {}: {}", i * 2, e))
            })?;
        }
        Ok(Self::new(bytes))
    }

    fn digest(&self, domain: &[u8], seed: &[u8], record_key: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        hasher.update(self.master.0);
        hasher.update(seed);
        hasher.update(record_key);
        hasher.finalize().into()
    }

    fn derive(&self, seed: &[u8], record_key: &[u8]) -> (Aes256Gcm, [u8; NONCE_SIZE]) {
        let mut subkey = self.digest(KEY_DOMAIN, seed, record_key);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&subkey));
        subkey.zeroize();

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&self.digest(NONCE_DOMAIN, seed, record_key)[..NONCE_SIZE]);
        (cipher, nonce)
    }

    /// Encrypt `plaintext` for storage under `record_key`.
    pub fn encrypt(&self, record_key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut seed = [0u8; SEED_SIZE];
        OsRng.fill_bytes(&mut seed);

        let (cipher, nonce) = self.derive(&seed, record_key);
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| Error::storage("AES-GCM encryption failed"))?;

        let mut output = Vec::with_capacity(SEED_SIZE + sealed.len());
        output.extend_from_slice(&seed);
        output.extend_from_slice(&sealed);
        Ok(output)
    }

    /// Decrypt data produced by [`encrypt`](Self::encrypt) for `record_key`.
    pub fn decrypt(&self, record_key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < MIN_CIPHERTEXT_LEN {
            return Err(Error::ContentTooShort {
                len: data.len(),
                min: MIN_CIPHERTEXT_LEN,
            });
        }
        let (seed, sealed) = data.split_at(SEED_SIZE);
        let (cipher, nonce) = self.derive(seed, record_key);
        cipher
            .decrypt(Nonce::from_slice(&nonce), sealed)
            .map_err(|_| Error::AuthenticationFailed)
    }
}

impl StorageCodec for RecordCipher {
    fn encode(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        self.encrypt(key, data)
    }

    fn decode(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        self.decrypt(key, data)
    }

    fn codec_id(&self) -> &str {
        "aes-gcm-256"
    }
}

// Prevent accidental debug-printing of key material
impl std::fmt::Debug for RecordCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCipher")
            .field("algorithm", &"AES-256-GCM")
            .finish()
    }
}
