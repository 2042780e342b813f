//! The signature dispatcher: walks the final planned list and produces one
//! encoded signed transaction (or empty slot) per entry.

use aplane_core::codec::encode_signed_transaction;
use aplane_core::constants::ALWAYS_TRUE_PROGRAM;
use aplane_core::transaction::{LogicSig, SignedTransaction};
use aplane_core::types::Ed25519Signature;
use aplane_core::Error;
use aplane_crypto::{KeyFamily, ProviderRegistry};
use tracing::debug;

use crate::planner::{Plan, SlotKind};
use crate::session::KeySession;

/// Sign every entry of `plan`. The result list is index-aligned with the
/// plan: passthrough slots carry their original bytes, foreign slots are
/// empty strings for the caller to fill, everything else is a freshly
/// encoded signed transaction in hex.
pub fn dispatch(
    plan: &Plan,
    session: &KeySession,
    registry: &ProviderRegistry,
) -> Result<Vec<String>, Error> {
    let mut signed = Vec::with_capacity(plan.txns.len());

    for (i, planned) in plan.txns.iter().enumerate() {
        let output = match &planned.kind {
            SlotKind::Passthrough { raw } => hex::encode(raw),
            SlotKind::Foreign => String::new(),
            SlotKind::Dummy => {
                let envelope = SignedTransaction {
                    sig: None,
                    logic_sig: Some(LogicSig::new(ALWAYS_TRUE_PROGRAM.to_vec(), vec![])),
                    auth_address: None,
                    transaction: planned.txn.clone(),
                };
                hex::encode(encode_signed_transaction(&envelope))
            }
            SlotKind::ToSign { auth_address, args } => {
                let key = session.get(auth_address).map_err(Error::from)?;
                let provider = registry.get(&key.key_type).map_err(|e| {
                    Error::internal(format!("entry {i}: {e}"))
                })?;

                match provider.family() {
                    KeyFamily::Native => {
                        let secret = key.secret.ok_or_else(|| {
                            Error::internal(format!("entry {i}: native key has no secret"))
                        })?;
                        let signature = provider
                            .sign(secret, &planned.txn.signing_bytes())
                            .map_err(|e| Error::internal(format!("entry {i}: {e}")))?;
                        let sig_bytes: [u8; 64] = signature.as_slice().try_into().map_err(
                            |_| Error::internal(format!("entry {i}: bad signature length")),
                        )?;
                        let envelope = SignedTransaction {
                            sig: Some(Ed25519Signature(sig_bytes)),
                            logic_sig: None,
                            // Rekeyed-account signing: declare the actual
                            // authority when it differs from the sender.
                            auth_address: (planned.txn.sender != *auth_address)
                                .then_some(*auth_address),
                            transaction: planned.txn.clone(),
                        };
                        hex::encode(encode_signed_transaction(&envelope))
                    }

                    KeyFamily::DsaLogicSig => {
                        let secret = key.secret.ok_or_else(|| {
                            Error::internal(format!("entry {i}: DSA key has no secret"))
                        })?;
                        let bytecode = key.bytecode.ok_or_else(|| {
                            Error::internal(format!("entry {i}: DSA key has no bytecode"))
                        })?;
                        // DSA LogicSigs sign the canonical transaction id,
                        // not the full transaction bytes.
                        let txid = planned.txn.id();
                        let signature = provider
                            .sign(secret, txid.as_bytes())
                            .map_err(|e| Error::internal(format!("entry {i}: {e}")))?;
                        let lsig_args = provider
                            .build_args(Some(signature), args)
                            .map_err(|e| Error::bad_request(format!("entry {i}: {e}")))?;
                        logic_sig_envelope(planned.txn.clone(), bytecode, lsig_args, auth_address)
                    }

                    KeyFamily::GenericTemplate => {
                        let bytecode = key.bytecode.ok_or_else(|| {
                            Error::internal(format!("entry {i}: template has no bytecode"))
                        })?;
                        let lsig_args = provider
                            .build_args(None, args)
                            .map_err(|e| Error::bad_request(format!("entry {i}: {e}")))?;
                        logic_sig_envelope(planned.txn.clone(), bytecode, lsig_args, auth_address)
                    }
                }
            }
        };
        signed.push(output);
    }

    debug!(
        total = signed.len(),
        dummies = plan.dummy_count,
        "dispatch complete"
    );
    Ok(signed)
}

fn logic_sig_envelope(
    txn: aplane_core::Transaction,
    bytecode: Vec<u8>,
    args: Vec<Vec<u8>>,
    auth_address: &aplane_core::Address,
) -> String {
    let sender = txn.sender;
    let envelope = SignedTransaction {
        sig: None,
        logic_sig: Some(LogicSig::new(bytecode, args)),
        auth_address: (sender != *auth_address).then_some(*auth_address),
        transaction: txn,
    };
    hex::encode(encode_signed_transaction(&envelope))
}
