//! On-disk vault format.
//!
//! ```text
//! magic "DMKV" (4) | version (1) | m_cost, t_cost, p_cost (u32 LE, 12)
//! | salt (16) | nonce (12) | AES-256-GCM ciphertext + tag
//! ```
//!
//! Everything before the ciphertext is the header and is bound to it as
//! associated data, so flipping any byte of the file fails authentication.
//! Every parse or authentication failure is reported as
//! [`CryptoError::WrongPassphraseOrCorruptData`].

use crate::config::KdfParams;
use crate::error::CryptoError;
use crate::provider::ProviderProfile;
use crate::vault::kdf::{derive_key, generate_salt, validate_params, DerivedKey, SALT_LENGTH};
use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::{Aes256Gcm, Key, Nonce};
use std::collections::HashSet;
use zeroize::Zeroizing;

pub const MAGIC: &[u8; 4] = b"DMKV";
pub const FORMAT_VERSION: u8 = 1;
pub const NONCE_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;
const HEADER_LENGTH: usize = 4 + 1 + 12 + SALT_LENGTH + NONCE_LENGTH;

/// A sealed profile list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultEnvelope {
    pub version: u8,
    pub kdf: KdfParams,
    pub salt: [u8; SALT_LENGTH],
    pub nonce: [u8; NONCE_LENGTH],
    pub ciphertext: Vec<u8>,
}

impl VaultEnvelope {
    /// Seal under a fresh salt and nonce. Returns the key for session reuse.
    pub fn seal(
        passphrase: &str,
        profiles: &[ProviderProfile],
        kdf: &KdfParams,
    ) -> Result<(Self, DerivedKey), CryptoError> {
        if passphrase.is_empty() {
            return Err(CryptoError::EmptyPassphrase);
        }
        check_profiles(profiles)?;
        let salt = generate_salt();
        let key = derive_key(passphrase.as_bytes(), &salt, kdf)?;
        let envelope = Self::seal_with_key(&key, salt, *kdf, profiles)?;
        Ok((envelope, key))
    }

    /// Seal with an already-derived key under a fresh nonce.
    pub fn seal_with_key(
        key: &DerivedKey,
        salt: [u8; SALT_LENGTH],
        kdf: KdfParams,
        profiles: &[ProviderProfile],
    ) -> Result<Self, CryptoError> {
        check_profiles(profiles)?;
        let plaintext = Zeroizing::new(
            serde_json::to_vec(profiles).map_err(|e| CryptoError::SerializationFailed(e.to_string()))?,
        );

        let mut nonce = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce);

        let mut envelope = Self {
            version: FORMAT_VERSION,
            kdf,
            salt,
            nonce,
            ciphertext: Vec::new(),
        };
        let aad = envelope.header_bytes();
        envelope.ciphertext = cipher(key)
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::CipherInit("encryption failed".into()))?;
        Ok(envelope)
    }

    /// Re-derive the key from `passphrase` and decrypt.
    pub fn open(&self, passphrase: &str) -> Result<(Vec<ProviderProfile>, DerivedKey), CryptoError> {
        if passphrase.is_empty() {
            return Err(CryptoError::EmptyPassphrase);
        }
        validate_params(&self.kdf).map_err(|_| CryptoError::WrongPassphraseOrCorruptData)?;
        let key = derive_key(passphrase.as_bytes(), &self.salt, &self.kdf)?;
        let profiles = self.open_with_key(&key)?;
        Ok((profiles, key))
    }

    pub fn open_with_key(&self, key: &DerivedKey) -> Result<Vec<ProviderProfile>, CryptoError> {
        let aad = self.header_bytes();
        let plaintext = Zeroizing::new(
            cipher(key)
                .decrypt(
                    Nonce::from_slice(&self.nonce),
                    Payload {
                        msg: &self.ciphertext,
                        aad: &aad,
                    },
                )
                .map_err(|_| CryptoError::WrongPassphraseOrCorruptData)?,
        );
        // Authenticated but unreadable means a writer bug, not tampering.
        serde_json::from_slice(&plaintext).map_err(|e| CryptoError::SerializationFailed(e.to_string()))
    }

    fn header_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LENGTH);
        out.extend_from_slice(MAGIC);
        out.push(self.version);
        out.extend_from_slice(&self.kdf.memory_kib.to_le_bytes());
        out.extend_from_slice(&self.kdf.iterations.to_le_bytes());
        out.extend_from_slice(&self.kdf.parallelism.to_le_bytes());
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.nonce);
        out
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.header_bytes();
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let corrupt = || CryptoError::WrongPassphraseOrCorruptData;
        if bytes.len() < HEADER_LENGTH + TAG_LENGTH || &bytes[..4] != MAGIC {
            return Err(corrupt());
        }
        let version = bytes[4];
        if version != FORMAT_VERSION {
            return Err(corrupt());
        }
        let u32_at = |at: usize| -> Result<u32, CryptoError> {
            let raw: [u8; 4] = bytes[at..at + 4].try_into().map_err(|_| corrupt())?;
            Ok(u32::from_le_bytes(raw))
        };
        let kdf = KdfParams {
            memory_kib: u32_at(5)?,
            iterations: u32_at(9)?,
            parallelism: u32_at(13)?,
        };
        let salt_at = 17;
        let nonce_at = salt_at + SALT_LENGTH;
        let salt: [u8; SALT_LENGTH] = bytes[salt_at..nonce_at].try_into().map_err(|_| corrupt())?;
        let nonce: [u8; NONCE_LENGTH] = bytes[nonce_at..HEADER_LENGTH]
            .try_into()
            .map_err(|_| corrupt())?;

        Ok(Self {
            version,
            kdf,
            salt,
            nonce,
            ciphertext: bytes[HEADER_LENGTH..].to_vec(),
        })
    }
}

fn cipher(key: &DerivedKey) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()))
}

/// Unique names and individually valid profiles.
pub fn check_profiles(profiles: &[ProviderProfile]) -> Result<(), CryptoError> {
    let mut seen = HashSet::new();
    for profile in profiles {
        profile.validate()?;
        if !seen.insert(profile.name.trim()) {
            return Err(CryptoError::DuplicateProfileName {
                name: profile.name.clone(),
            });
        }
    }
    Ok(())
}
