use std::fmt;

use data_encoding::BASE32_NOPAD;
use serde::{de::Visitor, Deserialize, Deserializer, Serialize, Serializer};
use sha2::Digest as _;
use thiserror::Error;

/// Fee and payment amounts, in microAlgos.
pub type MicroAlgos = u64;

/// A protocol round index. Transactions declare a `[first_valid, last_valid]`
/// round window during which the chain will accept them.
pub type Round = u64;

const CHECKSUM_LEN: usize = 4;
const HASH_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("invalid base32: {0}")]
    InvalidBase32(String),

    #[error("wrong address length: {0}")]
    WrongLength(usize),

    #[error("address checksum mismatch")]
    ChecksumMismatch,
}

// ── Address ──────────────────────────────────────────────────────────────────

/// 32-byte account address. The canonical string form is the base32 encoding
/// of the bytes followed by the last four bytes of their SHA-512/256 digest.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; HASH_LEN]);

impl Address {
    pub fn new(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Decode an address from its checksummed base32 string form.
    pub fn from_string(s: &str) -> Result<Self, AddressError> {
        let decoded = BASE32_NOPAD
            .decode(s.as_bytes())
            .map_err(|e| AddressError::InvalidBase32(e.to_string()))?;

        if decoded.len() != HASH_LEN + CHECKSUM_LEN {
            return Err(AddressError::WrongLength(decoded.len()));
        }

        let (body, checksum) = decoded.split_at(HASH_LEN);
        let hashed = sha2::Sha512_256::digest(body);
        if &hashed[HASH_LEN - CHECKSUM_LEN..] != checksum {
            return Err(AddressError::ChecksumMismatch);
        }

        let mut bytes = [0u8; HASH_LEN];
        bytes.copy_from_slice(body);
        Ok(Self(bytes))
    }

    /// Encode to the checksummed base32 string form.
    pub fn encode_string(&self) -> String {
        let hashed = sha2::Sha512_256::digest(self.0);
        let checksum = &hashed[HASH_LEN - CHECKSUM_LEN..];
        let with_checksum = [&self.0[..], checksum].concat();
        BASE32_NOPAD.encode(&with_checksum)
    }

    /// The zero address, used as the absent value in optional slots.
    pub fn zero() -> Self {
        Self([0u8; HASH_LEN])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LEN]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode_string())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({}…)", &self.encode_string()[..8])
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0[..])
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Address(deserializer.deserialize_bytes(VisitorU8_32)?))
    }
}

// ── Digest ───────────────────────────────────────────────────────────────────

/// A 32-byte SHA-512/256 digest (genesis hash, group identifier, lease).
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Digest(pub [u8; HASH_LEN]);

impl Digest {
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != HASH_LEN {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; HASH_LEN];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// SHA-512/256 over `data`.
    pub fn hash(data: &[u8]) -> Self {
        let hashed = sha2::Sha512_256::digest(data);
        let mut arr = [0u8; HASH_LEN];
        arr.copy_from_slice(&hashed);
        Self(arr)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({}…)", &self.to_hex()[..16])
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0[..])
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Digest(deserializer.deserialize_bytes(VisitorU8_32)?))
    }
}

// ── TxId ─────────────────────────────────────────────────────────────────────

/// Canonical transaction identifier: SHA-512/256 of `"TX" || msgpack(txn)`.
/// Displayed as unpadded base32, the chain's conventional txid form.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct TxId(pub [u8; HASH_LEN]);

impl TxId {
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_base32(&self) -> String {
        BASE32_NOPAD.encode(&self.0)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base32())
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({}…)", &self.to_base32()[..12])
    }
}

// ── Ed25519 wire types ───────────────────────────────────────────────────────

/// An Ed25519 signature as it appears in signed-transaction envelopes.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Ed25519Signature(pub [u8; 64]);

impl fmt::Debug for Ed25519Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519Signature(64b)")
    }
}

impl Serialize for Ed25519Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0[..])
    }
}

impl<'de> Deserialize<'de> for Ed25519Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Ed25519Signature(deserializer.deserialize_bytes(VisitorU8_64)?))
    }
}

// ── Serde byte-array visitors ────────────────────────────────────────────────

struct VisitorU8_32;

impl<'de> Visitor<'de> for VisitorU8_32 {
    type Value = [u8; 32];

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a 32 byte array")
    }

    fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
        TryInto::<Self::Value>::try_into(v)
            .map_err(|_| E::custom(format!("invalid byte array length: {}", v.len())))
    }
}

struct VisitorU8_64;

impl<'de> Visitor<'de> for VisitorU8_64 {
    type Value = [u8; 64];

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a 64 byte array")
    }

    fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
        TryInto::<Self::Value>::try_into(v)
            .map_err(|_| E::custom(format!("invalid byte array length: {}", v.len())))
    }
}
