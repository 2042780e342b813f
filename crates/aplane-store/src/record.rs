//! The on-disk key record: one bincode-encoded file per address.
//!
//! Everything except `encrypted_secret` is readable without the master key,
//! so a scan can index addresses, key types and LogicSig sizes while the
//! signer stays locked.

use std::collections::BTreeMap;
use std::path::Path;

use aplane_core::types::Address;
use aplane_crypto::SecretBytes;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub const RECORD_VERSION: u32 = 1;
const NONCE_LEN: usize = 24;

#[derive(Debug, Serialize, Deserialize)]
pub struct KeyRecord {
    pub version: u32,

    /// Provider type label (`ed25519`, `falcon1024-v1`, ...).
    pub key_type: String,

    /// Creation-time parameters (templates only; empty otherwise).
    pub params: BTreeMap<String, String>,

    /// Raw public key; empty for generic templates.
    pub public_key: Vec<u8>,

    /// Compiled LogicSig bytecode; empty for native keys.
    pub bytecode: Vec<u8>,

    /// This key's contribution to a group's LogicSig byte budget
    /// (bytecode plus worst-case signature argument; 0 for native keys).
    pub lsig_size: u64,

    /// AEAD nonce for `encrypted_secret`.
    pub nonce: Vec<u8>,

    /// XChaCha20-Poly1305 ciphertext of the secret under the master key,
    /// bound to the address via AAD. Empty for generic templates.
    pub encrypted_secret: Vec<u8>,

    /// Display material, kept for `get_key_details`.
    pub teal: Option<String>,
}

fn cipher(master_key: &SecretBytes) -> Result<XChaCha20Poly1305, StoreError> {
    master_key.with_bytes(|key| {
        if key.len() != 32 {
            return Err(StoreError::Kdf(format!("master key length {}", key.len())));
        }
        Ok(XChaCha20Poly1305::new(Key::from_slice(key)))
    })
}

/// Encrypt `secret` for storage in a record belonging to `address`.
pub fn seal_secret(
    master_key: &SecretBytes,
    address: &Address,
    secret: &SecretBytes,
) -> Result<(Vec<u8>, Vec<u8>), StoreError> {
    let cipher = cipher(master_key)?;
    let nonce: [u8; NONCE_LEN] = rand::random();
    let ciphertext = secret.with_bytes(|plain| {
        cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload { msg: plain, aad: address.as_bytes() },
            )
            .map_err(|_| StoreError::Kdf("encryption failed".into()))
    })?;
    Ok((nonce.to_vec(), ciphertext))
}

/// Decrypt a record's secret blob.
pub fn open_secret(
    master_key: &SecretBytes,
    address: &Address,
    record: &KeyRecord,
) -> Result<SecretBytes, StoreError> {
    let cipher = cipher(master_key)?;
    if record.nonce.len() != NONCE_LEN {
        return Err(StoreError::Corrupt {
            path: address.encode_string(),
            reason: format!("nonce length {}", record.nonce.len()),
        });
    }
    let plain = cipher
        .decrypt(
            XNonce::from_slice(&record.nonce),
            Payload { msg: &record.encrypted_secret, aad: address.as_bytes() },
        )
        .map_err(|_| StoreError::Corrupt {
            path: address.encode_string(),
            reason: "secret authentication failed".into(),
        })?;
    Ok(SecretBytes::new(plain))
}

impl KeyRecord {
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let bytes = std::fs::read(path)?;
        bincode::deserialize(&bytes).map_err(|e| StoreError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Write the record atomically: temp file in the same directory, then
    /// rename over the final path.
    pub fn write_atomic(&self, path: &Path) -> Result<(), StoreError> {
        let bytes = bincode::serialize(self).map_err(|e| StoreError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let tmp = path.with_extension("key.tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn has_secret(&self) -> bool {
        !self.encrypted_secret.is_empty()
    }
}
