//! 25-word mnemonic encoding for 32-byte secrets.
//!
//! The secret is read as a little-endian bit stream and split into 24
//! 11-bit indexes into the English wordlist; a 25th checksum word encodes
//! the first 11 bits of the secret's SHA-512/256 digest.

use sha2::Digest as _;
use thiserror::Error;

/// Number of words a full phrase carries (24 data + 1 checksum).
pub const PHRASE_WORDS: usize = 25;

const SECRET_LEN: usize = 32;

#[derive(Debug, Error, PartialEq)]
pub enum MnemonicError {
    #[error("expected {PHRASE_WORDS} words, got {0}")]
    WrongWordCount(usize),

    #[error("unknown word: {0}")]
    UnknownWord(String),

    #[error("mnemonic checksum mismatch")]
    ChecksumMismatch,

    #[error("mnemonic encodes trailing non-zero bits")]
    TrailingBits,
}

fn wordlist() -> &'static [&'static str; 2048] {
    bip39::Language::English.word_list()
}

fn to_u11(bytes: &[u8]) -> Vec<u16> {
    let mut out = Vec::with_capacity(bytes.len() * 8 / 11 + 1);
    let mut buffer = 0u32;
    let mut bits = 0u32;
    for &b in bytes {
        buffer |= (b as u32) << bits;
        bits += 8;
        while bits >= 11 {
            out.push((buffer & 0x7FF) as u16);
            buffer >>= 11;
            bits -= 11;
        }
    }
    if bits > 0 {
        out.push((buffer & 0x7FF) as u16);
    }
    out
}

fn from_u11(values: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 11 / 8 + 1);
    let mut buffer = 0u32;
    let mut bits = 0u32;
    for &v in values {
        buffer |= (v as u32) << bits;
        bits += 11;
        while bits >= 8 {
            out.push((buffer & 0xFF) as u8);
            buffer >>= 8;
            bits -= 8;
        }
    }
    if bits > 0 {
        out.push((buffer & 0xFF) as u8);
    }
    out
}

fn checksum_word(secret: &[u8]) -> u16 {
    let digest = sha2::Sha512_256::digest(secret);
    to_u11(&digest[..2])[0]
}

/// Encode a 32-byte secret as a 25-word phrase.
pub fn encode(secret: &[u8; SECRET_LEN]) -> String {
    let words = wordlist();
    let mut indexes = to_u11(secret);
    indexes.push(checksum_word(secret));
    indexes
        .iter()
        .map(|&i| words[i as usize])
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decode a 25-word phrase back to the 32-byte secret, verifying the
/// checksum word.
pub fn decode(phrase: &str) -> Result<[u8; SECRET_LEN], MnemonicError> {
    let words = wordlist();
    let parts: Vec<&str> = phrase.split_whitespace().collect();
    if parts.len() != PHRASE_WORDS {
        return Err(MnemonicError::WrongWordCount(parts.len()));
    }

    let mut indexes = Vec::with_capacity(PHRASE_WORDS);
    for part in &parts {
        let lowered = part.to_lowercase();
        let idx = words
            .iter()
            .position(|w| *w == lowered)
            .ok_or_else(|| MnemonicError::UnknownWord(part.to_string()))?;
        indexes.push(idx as u16);
    }

    let checksum = indexes.pop().expect("25 indexes were pushed");
    let bytes = from_u11(&indexes);

    // 24 * 11 bits = 33 bytes; the final byte carries only padding.
    if bytes.len() != SECRET_LEN + 1 || bytes[SECRET_LEN] != 0 {
        return Err(MnemonicError::TrailingBits);
    }

    let mut secret = [0u8; SECRET_LEN];
    secret.copy_from_slice(&bytes[..SECRET_LEN]);

    if checksum_word(&secret) != checksum {
        return Err(MnemonicError::ChecksumMismatch);
    }
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let secret = [0x5Au8; 32];
        let phrase = encode(&secret);
        assert_eq!(phrase.split_whitespace().count(), PHRASE_WORDS);
        assert_eq!(decode(&phrase).expect("decode"), secret);
    }

    #[test]
    fn round_trip_varied_patterns() {
        for seed in 0u8..8 {
            let mut secret = [0u8; 32];
            for (i, b) in secret.iter_mut().enumerate() {
                *b = seed.wrapping_mul(37).wrapping_add(i as u8);
            }
            assert_eq!(decode(&encode(&secret)).expect("decode"), secret);
        }
    }

    #[test]
    fn rejects_wrong_count() {
        assert_eq!(
            decode("abandon abandon"),
            Err(MnemonicError::WrongWordCount(2))
        );
    }

    #[test]
    fn rejects_unknown_word() {
        let secret = [1u8; 32];
        let mut words: Vec<String> = encode(&secret)
            .split_whitespace()
            .map(String::from)
            .collect();
        words[3] = "zzzzzz".into();
        assert!(matches!(
            decode(&words.join(" ")),
            Err(MnemonicError::UnknownWord(_))
        ));
    }

    #[test]
    fn rejects_swapped_checksum() {
        let secret = [2u8; 32];
        let mut words: Vec<String> = encode(&secret)
            .split_whitespace()
            .map(String::from)
            .collect();
        // Replace the checksum word with some other valid word.
        let replacement = if words[24] == "abandon" { "ability" } else { "abandon" };
        words[24] = replacement.into();
        assert_eq!(
            decode(&words.join(" ")),
            Err(MnemonicError::ChecksumMismatch)
        );
    }
}
