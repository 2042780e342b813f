//! Keystore metadata: the KDF salt and a passphrase verifier.
//!
//! Stored as readable JSON at `<store>/.keystore`. Nothing in it is secret;
//! it only lets the daemon check a passphrase and re-derive the master key.

use std::path::{Path, PathBuf};

use aplane_crypto::SecretBytes;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

const META_FILE: &str = ".keystore";
const META_VERSION: u32 = 1;
const SALT_LEN: usize = 16;
const MASTER_KEY_LEN: usize = 32;
const VERIFIER_CONTEXT: &[u8] = b"aplane-keystore-verifier";

#[derive(Debug, Serialize, Deserialize)]
pub struct KeystoreMeta {
    pub version: u32,
    pub kdf: String,
    pub salt: String,
    pub verifier: String,
}

pub fn meta_path(store_dir: &Path) -> PathBuf {
    store_dir.join(META_FILE)
}

/// Derive the 32-byte master key from a passphrase and the store salt.
pub fn derive_master_key(
    passphrase: &SecretBytes,
    salt: &[u8],
) -> Result<SecretBytes, StoreError> {
    let mut out = vec![0u8; MASTER_KEY_LEN];
    passphrase.with_bytes(|pass| {
        argon2::Argon2::default()
            .hash_password_into(pass, salt, &mut out)
            .map_err(|e| StoreError::Kdf(e.to_string()))
    })?;
    Ok(SecretBytes::new(out))
}

fn verifier_tag(master_key: &SecretBytes) -> [u8; 32] {
    master_key.with_bytes(|key| {
        let key: &[u8; 32] = key.try_into().expect("master key is 32 bytes");
        *blake3::keyed_hash(key, VERIFIER_CONTEXT).as_bytes()
    })
}

fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b) {
        acc |= x ^ y;
    }
    acc == 0
}

impl KeystoreMeta {
    /// Create fresh metadata for `passphrase` and write it to disk.
    pub fn create(store_dir: &Path, passphrase: &SecretBytes) -> Result<Self, StoreError> {
        let salt: [u8; SALT_LEN] = rand::random();
        let master_key = derive_master_key(passphrase, &salt)?;
        let meta = Self {
            version: META_VERSION,
            kdf: "argon2id".into(),
            salt: hex::encode(salt),
            verifier: hex::encode(verifier_tag(&master_key)),
        };
        std::fs::create_dir_all(store_dir)?;
        let json = serde_json::to_string_pretty(&meta).expect("meta serializes");
        std::fs::write(meta_path(store_dir), json)?;
        Ok(meta)
    }

    pub fn load(store_dir: &Path) -> Result<Self, StoreError> {
        let path = meta_path(store_dir);
        let json = std::fs::read_to_string(&path)
            .map_err(|_| StoreError::MetadataMissing(path.display().to_string()))?;
        serde_json::from_str(&json).map_err(|e| StoreError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    pub fn salt_bytes(&self) -> Result<Vec<u8>, StoreError> {
        hex::decode(&self.salt).map_err(|e| StoreError::Corrupt {
            path: META_FILE.into(),
            reason: format!("salt hex: {e}"),
        })
    }

    /// Derive the master key from `passphrase` and check it against the
    /// stored verifier. Returns the key only when the passphrase is right.
    pub fn verify_and_derive(
        &self,
        passphrase: &SecretBytes,
    ) -> Result<SecretBytes, StoreError> {
        let salt = self.salt_bytes()?;
        let master_key = derive_master_key(passphrase, &salt)?;
        let expected = hex::decode(&self.verifier).map_err(|e| StoreError::Corrupt {
            path: META_FILE.into(),
            reason: format!("verifier hex: {e}"),
        })?;
        if !ct_eq(&verifier_tag(&master_key), &expected) {
            return Err(StoreError::BadPassphrase);
        }
        Ok(master_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_verify_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pass = SecretBytes::from(b"correct horse".as_slice());
        KeystoreMeta::create(dir.path(), &pass).expect("create");

        let meta = KeystoreMeta::load(dir.path()).expect("load");
        assert!(meta.verify_and_derive(&pass).is_ok());

        let wrong = SecretBytes::from(b"wrong horse".as_slice());
        assert!(matches!(
            meta.verify_and_derive(&wrong),
            Err(StoreError::BadPassphrase)
        ));
    }

    #[test]
    fn missing_metadata_is_distinguished() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            KeystoreMeta::load(dir.path()),
            Err(StoreError::MetadataMissing(_))
        ));
    }

    #[test]
    fn derivation_is_salt_dependent() {
        let pass = SecretBytes::from(b"p".as_slice());
        let k1 = derive_master_key(&pass, &[1u8; 16]).expect("kdf");
        let k2 = derive_master_key(&pass, &[2u8; 16]).expect("kdf");
        let b1 = k1.with_bytes(|b| b.to_vec());
        let b2 = k2.with_bytes(|b| b.to_vec());
        assert_ne!(b1, b2);
    }
}
