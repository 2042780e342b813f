//! Canonical msgpack encoding for transactions and envelopes.
//!
//! The chain's signature and id domains are defined over a canonical
//! encoding: map keys sorted bytewise, zero-valued fields omitted. Serde
//! struct serialization cannot guarantee that ordering across a flattened
//! type tag, so encoding is done by hand here with `rmp` primitives.
//! Decoding is plain `rmp-serde`, which is order-insensitive.

use thiserror::Error;

use crate::constants::{TG_PREFIX, TX_PREFIX};
use crate::transaction::{LogicSig, SignedTransaction, Transaction, TransactionType};
use crate::types::Digest;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("invalid msgpack: {0}")]
    InvalidMsgpack(String),

    #[error("empty transaction payload")]
    Empty,
}

// ── Canonical value writer ───────────────────────────────────────────────────

enum Val<'a> {
    U64(u64),
    Bytes(&'a [u8]),
    Str(&'a str),
    /// A complete, already-encoded msgpack value (nested map or array).
    Raw(Vec<u8>),
}

fn write_map(fields: &mut Vec<(&'static str, Val<'_>)>) -> Vec<u8> {
    fields.sort_by(|a, b| a.0.cmp(b.0));

    let mut buf = Vec::new();
    rmp::encode::write_map_len(&mut buf, fields.len() as u32).expect("write to Vec");
    for (key, val) in fields.iter() {
        rmp::encode::write_str(&mut buf, key).expect("write to Vec");
        match val {
            Val::U64(v) => {
                rmp::encode::write_uint(&mut buf, *v).expect("write to Vec");
            }
            Val::Bytes(b) => {
                rmp::encode::write_bin(&mut buf, b).expect("write to Vec");
            }
            Val::Str(s) => {
                rmp::encode::write_str(&mut buf, s).expect("write to Vec");
            }
            Val::Raw(raw) => buf.extend_from_slice(raw),
        }
    }
    buf
}

// ── Transactions ─────────────────────────────────────────────────────────────

/// Canonical msgpack bytes for an unsigned transaction.
pub fn encode_transaction(txn: &Transaction) -> Vec<u8> {
    let mut fields: Vec<(&'static str, Val<'_>)> = Vec::with_capacity(16);

    if txn.fee != 0 {
        fields.push(("fee", Val::U64(txn.fee)));
    }
    if txn.first_valid != 0 {
        fields.push(("fv", Val::U64(txn.first_valid)));
    }
    if txn.last_valid != 0 {
        fields.push(("lv", Val::U64(txn.last_valid)));
    }
    if !txn.genesis_id.is_empty() {
        fields.push(("gen", Val::Str(&txn.genesis_id)));
    }
    if let Some(gh) = &txn.genesis_hash {
        fields.push(("gh", Val::Bytes(gh.as_bytes())));
    }
    if let Some(grp) = &txn.group {
        fields.push(("grp", Val::Bytes(grp.as_bytes())));
    }
    if let Some(lx) = &txn.lease {
        fields.push(("lx", Val::Bytes(lx.as_bytes())));
    }
    if !txn.note.is_empty() {
        fields.push(("note", Val::Bytes(&txn.note)));
    }
    if let Some(rekey) = &txn.rekey_to {
        fields.push(("rekey", Val::Bytes(rekey.as_bytes())));
    }
    fields.push(("snd", Val::Bytes(txn.sender.as_bytes())));

    match &txn.txn_type {
        TransactionType::Payment(p) => {
            fields.push(("type", Val::Str("pay")));
            if p.amount != 0 {
                fields.push(("amt", Val::U64(p.amount)));
            }
            fields.push(("rcv", Val::Bytes(p.receiver.as_bytes())));
            if let Some(close) = &p.close_remainder_to {
                fields.push(("close", Val::Bytes(close.as_bytes())));
            }
        }
        TransactionType::AssetTransfer(a) => {
            fields.push(("type", Val::Str("axfer")));
            fields.push(("xaid", Val::U64(a.asset_id)));
            if a.amount != 0 {
                fields.push(("aamt", Val::U64(a.amount)));
            }
            fields.push(("arcv", Val::Bytes(a.receiver.as_bytes())));
            if let Some(close) = &a.close_to {
                fields.push(("aclose", Val::Bytes(close.as_bytes())));
            }
        }
    }

    write_map(&mut fields)
}

/// Canonical msgpack bytes for a signed-transaction envelope.
pub fn encode_signed_transaction(stxn: &SignedTransaction) -> Vec<u8> {
    let mut fields: Vec<(&'static str, Val<'_>)> = Vec::with_capacity(4);

    if let Some(sig) = &stxn.sig {
        fields.push(("sig", Val::Bytes(&sig.0)));
    }
    if let Some(lsig) = &stxn.logic_sig {
        fields.push(("lsig", Val::Raw(encode_logic_sig(lsig))));
    }
    if let Some(sgnr) = &stxn.auth_address {
        fields.push(("sgnr", Val::Bytes(sgnr.as_bytes())));
    }
    fields.push(("txn", Val::Raw(encode_transaction(&stxn.transaction))));

    write_map(&mut fields)
}

fn encode_logic_sig(lsig: &LogicSig) -> Vec<u8> {
    let mut fields: Vec<(&'static str, Val<'_>)> = Vec::with_capacity(3);

    if !lsig.args.is_empty() {
        let mut arr = Vec::new();
        rmp::encode::write_array_len(&mut arr, lsig.args.len() as u32).expect("write to Vec");
        for arg in &lsig.args {
            rmp::encode::write_bin(&mut arr, arg).expect("write to Vec");
        }
        fields.push(("arg", Val::Raw(arr)));
    }
    fields.push(("l", Val::Bytes(&lsig.logic)));
    if let Some(sig) = &lsig.sig {
        fields.push(("sig", Val::Bytes(&sig.0)));
    }

    write_map(&mut fields)
}

// ── Decoding ─────────────────────────────────────────────────────────────────

/// Decode an unsigned transaction, tolerating a leading `"TX"` domain prefix
/// (clients sometimes ship the exact bytes they hashed).
pub fn decode_transaction(bytes: &[u8]) -> Result<Transaction, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::Empty);
    }
    let body = bytes.strip_prefix(TX_PREFIX).unwrap_or(bytes);
    rmp_serde::from_slice(body).map_err(|e| CodecError::InvalidMsgpack(e.to_string()))
}

/// Decode a signed-transaction envelope.
pub fn decode_signed_transaction(bytes: &[u8]) -> Result<SignedTransaction, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::Empty);
    }
    rmp_serde::from_slice(bytes).map_err(|e| CodecError::InvalidMsgpack(e.to_string()))
}

// ── Group digest ─────────────────────────────────────────────────────────────

/// Compute the canonical group digest over an ordered transaction list.
///
/// Each member's id is taken with its own group field cleared, then the
/// digest covers `"TG" || msgpack({txlist: [ids...]})`.
pub fn group_digest(txns: &[Transaction]) -> Digest {
    let mut ids = Vec::with_capacity(txns.len());
    for txn in txns {
        let mut bare = txn.clone();
        bare.group = None;
        ids.push(bare.id());
    }

    let mut body = Vec::new();
    rmp::encode::write_map_len(&mut body, 1).expect("write to Vec");
    rmp::encode::write_str(&mut body, "txlist").expect("write to Vec");
    rmp::encode::write_array_len(&mut body, ids.len() as u32).expect("write to Vec");
    for id in &ids {
        rmp::encode::write_bin(&mut body, id.as_bytes()).expect("write to Vec");
    }

    let mut data = TG_PREFIX.to_vec();
    data.extend_from_slice(&body);
    Digest::hash(&data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{Payment, TransactionType};
    use crate::types::Address;

    fn payment(sender: u8, receiver: u8, amount: u64) -> Transaction {
        Transaction {
            fee: 1000,
            first_valid: 50,
            last_valid: 1050,
            sender: Address::new([sender; 32]),
            genesis_id: "testnet-v1.0".into(),
            genesis_hash: Some(Digest([3u8; 32])),
            group: None,
            lease: None,
            note: vec![],
            rekey_to: None,
            txn_type: TransactionType::Payment(Payment {
                receiver: Address::new([receiver; 32]),
                amount,
                close_remainder_to: None,
            }),
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let txn = payment(1, 2, 12345);
        let bytes = encode_transaction(&txn);
        let decoded = decode_transaction(&bytes).expect("decode");
        assert_eq!(txn, decoded);
    }

    #[test]
    fn decode_strips_tx_prefix() {
        let txn = payment(1, 2, 7);
        let mut prefixed = TX_PREFIX.to_vec();
        prefixed.extend_from_slice(&encode_transaction(&txn));
        assert_eq!(txn, decode_transaction(&prefixed).expect("decode"));
    }

    #[test]
    fn canonical_keys_are_sorted() {
        // First key in the encoded map must be "fee" (lowest of the set keys
        // once the zero amount is omitted).
        let bytes = encode_transaction(&payment(1, 2, 0));
        // fixmap header, then fixstr "fee"
        assert_eq!(bytes[1] & 0xe0, 0xa0, "expected fixstr after map header");
        let len = (bytes[1] & 0x1f) as usize;
        assert_eq!(&bytes[2..2 + len], b"fee");
    }

    #[test]
    fn zero_fields_are_omitted() {
        let with_amt = encode_transaction(&payment(1, 2, 1));
        let without_amt = encode_transaction(&payment(1, 2, 0));
        assert!(with_amt.len() > without_amt.len());
        // "amt" must not appear in the zero-amount encoding.
        assert!(!without_amt.windows(3).any(|w| w == b"amt"));
    }

    #[test]
    fn group_digest_is_order_sensitive() {
        let a = payment(1, 2, 10);
        let b = payment(2, 1, 20);
        let ab = group_digest(&[a.clone(), b.clone()]);
        let ba = group_digest(&[b, a]);
        assert_ne!(ab, ba);
    }

    #[test]
    fn group_digest_ignores_preassigned_group() {
        let mut a = payment(1, 2, 10);
        let b = payment(2, 1, 20);
        let fresh = group_digest(&[a.clone(), b.clone()]);
        a.group = Some(fresh);
        // Digest is computed over members with grp cleared, so assigning the
        // digest back does not change it.
        assert_eq!(fresh, group_digest(&[a, b]));
    }

    #[test]
    fn signed_transaction_round_trip_with_lsig() {
        use crate::constants::ALWAYS_TRUE_PROGRAM;
        use crate::transaction::LogicSig;

        let stxn = SignedTransaction {
            sig: None,
            logic_sig: Some(LogicSig::new(
                ALWAYS_TRUE_PROGRAM.to_vec(),
                vec![vec![1, 2, 3]],
            )),
            auth_address: None,
            transaction: payment(4, 4, 0),
        };
        let bytes = encode_signed_transaction(&stxn);
        let decoded = decode_signed_transaction(&bytes).expect("decode");
        assert_eq!(stxn, decoded);
    }
}
