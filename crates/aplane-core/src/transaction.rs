use serde::{Deserialize, Serialize};

use crate::codec;
use crate::constants::{PROGRAM_PREFIX, TX_PREFIX};
use crate::types::{Address, Digest, Ed25519Signature, MicroAlgos, Round, TxId};

/// An unsigned transaction as decoded from its msgpack wire form.
///
/// Field names mirror the chain's short msgpack keys; zero-valued fields are
/// omitted on the wire, hence the pervasive `default`. Canonical re-encoding
/// (sorted keys, zero omission) is done by [`codec::encode_transaction`], not
/// by serde, so the declaration order here is free to be readable.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Transaction {
    #[serde(default)]
    pub fee: MicroAlgos,

    /// First round at which the chain will accept this transaction.
    #[serde(rename = "fv", default)]
    pub first_valid: Round,

    /// Last round at which the chain will accept this transaction.
    #[serde(rename = "lv", default)]
    pub last_valid: Round,

    /// The account that pays the fee (and amount, for payments).
    #[serde(rename = "snd")]
    pub sender: Address,

    #[serde(rename = "gen", default)]
    pub genesis_id: String,

    #[serde(rename = "gh", default)]
    pub genesis_hash: Option<Digest>,

    /// Atomic-group digest; `None` for ungrouped transactions.
    #[serde(rename = "grp", default)]
    pub group: Option<Digest>,

    #[serde(rename = "lx", default)]
    pub lease: Option<Digest>,

    #[serde(with = "serde_bytes", default)]
    pub note: Vec<u8>,

    /// When set, transfers signing authority for the sender account to this
    /// address for all future transactions.
    #[serde(rename = "rekey", default)]
    pub rekey_to: Option<Address>,

    #[serde(flatten)]
    pub txn_type: TransactionType,
}

/// Type-specific transaction fields, discriminated by the wire `type` tag.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum TransactionType {
    #[serde(rename = "pay")]
    Payment(Payment),

    #[serde(rename = "axfer")]
    AssetTransfer(AssetTransfer),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Payment {
    #[serde(rename = "rcv")]
    pub receiver: Address,

    #[serde(rename = "amt", default)]
    pub amount: MicroAlgos,

    /// When set, closes the sender account and sends its remaining balance
    /// to this address.
    #[serde(rename = "close", default)]
    pub close_remainder_to: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AssetTransfer {
    #[serde(rename = "xaid")]
    pub asset_id: u64,

    #[serde(rename = "aamt", default)]
    pub amount: u64,

    #[serde(rename = "arcv")]
    pub receiver: Address,

    #[serde(rename = "aclose", default)]
    pub close_to: Option<Address>,
}

impl Transaction {
    /// Canonical msgpack bytes (sorted keys, zero-valued fields omitted).
    pub fn canonical_bytes(&self) -> Vec<u8> {
        codec::encode_transaction(self)
    }

    /// The transaction id: SHA-512/256 over `"TX" || canonical_bytes`.
    /// Computed with the group field as currently set.
    pub fn id(&self) -> TxId {
        let mut data = TX_PREFIX.to_vec();
        data.extend_from_slice(&self.canonical_bytes());
        TxId(Digest::hash(&data).0)
    }

    /// The byte string a native Ed25519 signature covers.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut data = TX_PREFIX.to_vec();
        data.extend_from_slice(&self.canonical_bytes());
        data
    }

    /// True for a zero-amount self-payment with no close-out and no rekey.
    /// Such transactions prove signing capability without economic effect.
    pub fn is_validation(&self) -> bool {
        if self.rekey_to.is_some() {
            return false;
        }
        match &self.txn_type {
            TransactionType::Payment(p) => {
                p.amount == 0 && p.receiver == self.sender && p.close_remainder_to.is_none()
            }
            _ => false,
        }
    }
}

/// A signed-transaction envelope: exactly one of `sig` (native Ed25519) or
/// `logic_sig` is set, plus the embedded transaction. `auth_address` appears
/// when the signing authority differs from the declared sender.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SignedTransaction {
    #[serde(default)]
    pub sig: Option<Ed25519Signature>,

    #[serde(rename = "lsig", default)]
    pub logic_sig: Option<LogicSig>,

    #[serde(rename = "sgnr", default)]
    pub auth_address: Option<Address>,

    #[serde(rename = "txn")]
    pub transaction: Transaction,
}

impl SignedTransaction {
    /// Canonical msgpack bytes of the whole envelope.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        codec::encode_signed_transaction(self)
    }
}

/// A LogicSig: program bytecode plus its runtime argument vector. The
/// program's hash defines an account address; no cryptographic signature is
/// needed unless the program was delegated (`sig`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogicSig {
    #[serde(rename = "l", with = "serde_bytes")]
    pub logic: Vec<u8>,

    #[serde(rename = "arg", default)]
    pub args: Vec<serde_bytes::ByteBuf>,

    #[serde(default)]
    pub sig: Option<Ed25519Signature>,
}

impl LogicSig {
    pub fn new(logic: Vec<u8>, args: Vec<Vec<u8>>) -> Self {
        Self {
            logic,
            args: args.into_iter().map(serde_bytes::ByteBuf::from).collect(),

            sig: None,
        }
    }

    /// The account address this program hashes to.
    pub fn address(&self) -> Address {
        program_address(&self.logic)
    }
}

/// Address of a LogicSig account: SHA-512/256 over `"Program" || bytecode`.
pub fn program_address(bytecode: &[u8]) -> Address {
    let mut data = PROGRAM_PREFIX.to_vec();
    data.extend_from_slice(bytecode);
    Address(Digest::hash(&data).0)
}
