//! Argon2id key derivation.

use crate::config::KdfParams;
use crate::error::CryptoError;
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const KEY_LENGTH: usize = 32;
pub const SALT_LENGTH: usize = 16;

/// Upper bounds for parameters read from an untrusted envelope header.
const MAX_MEMORY_KIB: u32 = 1_048_576;
const MAX_ITERATIONS: u32 = 10;
const MAX_PARALLELISM: u32 = 16;

/// AES-256 key derived from the passphrase. Zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; KEY_LENGTH]);

impl DerivedKey {
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey(..)")
    }
}

/// Reject parameters that are invalid for Argon2 or expensive enough to be
/// a denial of service when read from a tampered header.
pub fn validate_params(params: &KdfParams) -> Result<(), CryptoError> {
    let p = params.parallelism;
    if !(1..=MAX_PARALLELISM).contains(&p) {
        return Err(CryptoError::CipherInit(format!(
            "parallelism {p} outside 1..={MAX_PARALLELISM}"
        )));
    }
    if !(1..=MAX_ITERATIONS).contains(&params.iterations) {
        return Err(CryptoError::CipherInit(format!(
            "iterations {} outside 1..={MAX_ITERATIONS}",
            params.iterations
        )));
    }
    let min_memory = 8 * p;
    if !(min_memory..=MAX_MEMORY_KIB).contains(&params.memory_kib) {
        return Err(CryptoError::CipherInit(format!(
            "memory {} KiB outside {min_memory}..={MAX_MEMORY_KIB}",
            params.memory_kib
        )));
    }
    Ok(())
}

/// Derive a key. CPU and memory heavy; call from a blocking context.
pub fn derive_key(
    passphrase: &[u8],
    salt: &[u8; SALT_LENGTH],
    params: &KdfParams,
) -> Result<DerivedKey, CryptoError> {
    validate_params(params)?;
    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_LENGTH),
    )
    .map_err(|e| CryptoError::CipherInit(e.to_string()))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut key = [0u8; KEY_LENGTH];
    argon
        .hash_password_into(passphrase, salt, &mut key)
        .map_err(|e| CryptoError::CipherInit(e.to_string()))?;
    let derived = DerivedKey(key);
    key.zeroize();
    Ok(derived)
}

pub fn generate_salt() -> [u8; SALT_LENGTH] {
    let mut salt = [0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> KdfParams {
        KdfParams {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn deterministic_for_same_inputs() {
        let salt = [7u8; SALT_LENGTH];
        let a = derive_key(b"p@ss", &salt, &fast()).unwrap();
        let b = derive_key(b"p@ss", &salt, &fast()).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn passphrase_and_salt_both_matter() {
        let k1 = derive_key(b"one", &[1u8; SALT_LENGTH], &fast()).unwrap();
        let k2 = derive_key(b"two", &[1u8; SALT_LENGTH], &fast()).unwrap();
        let k3 = derive_key(b"one", &[2u8; SALT_LENGTH], &fast()).unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
        assert_ne!(k1.as_bytes(), k3.as_bytes());
    }

    #[test]
    fn hostile_params_rejected() {
        for params in [
            KdfParams { memory_kib: u32::MAX, iterations: 1, parallelism: 1 },
            KdfParams { memory_kib: 64, iterations: 0, parallelism: 1 },
            KdfParams { memory_kib: 64, iterations: 1_000, parallelism: 1 },
            KdfParams { memory_kib: 64, iterations: 1, parallelism: 0 },
            KdfParams { memory_kib: 8, iterations: 1, parallelism: 4 },
        ] {
            assert!(validate_params(&params).is_err(), "{params:?}");
        }
        assert!(validate_params(&KdfParams::default()).is_ok());
    }

    #[test]
    fn salts_are_random() {
        assert_ne!(generate_salt(), generate_salt());
    }

    #[test]
    fn debug_does_not_leak() {
        let k = derive_key(b"x", &[0u8; SALT_LENGTH], &fast()).unwrap();
        assert_eq!(format!("{k:?}"), "DerivedKey(..)");
    }
}
