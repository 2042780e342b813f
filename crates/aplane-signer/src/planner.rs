//! The group planner: a pure function from a raw sign/plan request and the
//! current key-index snapshot to the final transaction list.
//!
//! No key is decrypted here. The planner decides the to-sign / passthrough /
//! foreign triage, enforces group consistency, computes the LogicSig byte
//! budget, synthesizes dummy padding, redistributes the dummy fee load and
//! recomputes the group identifier.

use std::collections::BTreeMap;

use aplane_core::codec::{decode_signed_transaction, decode_transaction, group_digest};
use aplane_core::constants::{ALWAYS_TRUE_PROGRAM, LOGIC_SIG_BUDGET_PER_TXN, MAX_GROUP_SIZE};
use aplane_core::transaction::{program_address, Payment, Transaction, TransactionType};
use aplane_core::types::Address;
use aplane_core::Error;
use aplane_store::KeyIndexSnapshot;
use serde::{Deserialize, Serialize};

/// Runtime arguments for LogicSig signing, keyed by the provider's declared
/// argument names.
pub type ArgMap = BTreeMap<String, String>;

// ── Request shapes ───────────────────────────────────────────────────────────

/// One entry of a plan/sign request, exactly as it arrives in JSON. The
/// populated field combination decides the entry's role; mixed shapes are
/// rejected by [`RequestEntry::from_raw`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRequestEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txn_bytes_hex: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_txn_hex: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<ArgMap>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lsig_size_hint: Option<u64>,
}

/// Validated, decoded form of one request entry.
#[derive(Debug, Clone)]
pub enum RequestEntry {
    ToSign {
        txn: Transaction,
        auth_address: Address,
        args: ArgMap,
    },
    Passthrough {
        raw: Vec<u8>,
        txn: Transaction,
    },
    Foreign {
        txn: Transaction,
        lsig_size_hint: Option<u64>,
    },
}

impl RequestEntry {
    pub fn from_raw(index: usize, raw: &RawRequestEntry) -> Result<Self, Error> {
        let has_txn = raw.txn_bytes_hex.is_some();
        let has_signed = raw.signed_txn_hex.is_some();
        let has_auth = raw.auth_address.is_some();

        match (has_signed, has_txn, has_auth) {
            (true, false, false) => {
                let bytes = hex::decode(raw.signed_txn_hex.as_deref().expect("checked"))
                    .map_err(|e| Error::bad_request(format!("entry {index}: {e}")))?;
                let signed = decode_signed_transaction(&bytes)
                    .map_err(|e| Error::bad_request(format!("entry {index}: {e}")))?;
                Ok(RequestEntry::Passthrough {
                    raw: bytes,
                    txn: signed.transaction,
                })
            }
            (false, true, true) => {
                let txn = decode_entry_txn(index, raw)?;
                let auth_str = raw.auth_address.as_deref().expect("checked");
                let auth_address = Address::from_string(auth_str).map_err(|e| {
                    Error::bad_request(format!("entry {index}: auth address: {e}"))
                })?;
                Ok(RequestEntry::ToSign {
                    txn,
                    auth_address,
                    args: raw.args.clone().unwrap_or_default(),
                })
            }
            (false, true, false) => Ok(RequestEntry::Foreign {
                txn: decode_entry_txn(index, raw)?,
                lsig_size_hint: raw.lsig_size_hint,
            }),
            _ => Err(Error::bad_request(format!(
                "entry {index}: exactly one of signed_txn_hex or txn_bytes_hex \
                 (with optional auth_address) must be set"
            ))),
        }
    }

    fn txn(&self) -> &Transaction {
        match self {
            RequestEntry::ToSign { txn, .. } => txn,
            RequestEntry::Passthrough { txn, .. } => txn,
            RequestEntry::Foreign { txn, .. } => txn,
        }
    }
}

fn decode_entry_txn(index: usize, raw: &RawRequestEntry) -> Result<Transaction, Error> {
    let bytes = hex::decode(raw.txn_bytes_hex.as_deref().expect("checked"))
        .map_err(|e| Error::bad_request(format!("entry {index}: {e}")))?;
    decode_transaction(&bytes).map_err(|e| Error::bad_request(format!("entry {index}: {e}")))
}

// ── Plan output ──────────────────────────────────────────────────────────────

/// Role of one slot in the final transaction list.
#[derive(Debug, Clone)]
pub enum SlotKind {
    ToSign { auth_address: Address, args: ArgMap },
    Passthrough { raw: Vec<u8> },
    Foreign,
    Dummy,
}

#[derive(Debug, Clone)]
pub struct PlannedTxn {
    pub txn: Transaction,
    pub kind: SlotKind,
}

/// Immutable result of the planning phase.
#[derive(Debug, Clone)]
pub struct Plan {
    pub txns: Vec<PlannedTxn>,
    pub dummy_count: usize,
    pub group_recomputed: bool,
    /// Original-entry indexes contributing LogicSig bytes.
    pub lsig_indexes: Vec<usize>,
    pub passthrough_count: usize,
    pub foreign_count: usize,
    pub signable_count: usize,
    pub mutations: Option<MutationReport>,
}

impl Plan {
    /// Final transactions only, for group hashing and lint.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.txns.iter().map(|p| p.txn.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationReason {
    LsigBudget,
    Passthrough,
    Foreign,
    Regroup,
}

/// Disclosure of everything the planner changed relative to the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationReport {
    pub original_count: usize,
    pub final_count: usize,
    pub dummies_added: usize,
    pub fee_delta_total: u64,
    pub fee_modified_indexes: Vec<usize>,
    pub group_id_changed: bool,
    pub passthrough_count: usize,
    pub foreign_count: usize,
    pub reason: MutationReason,
}

// ── Planner ──────────────────────────────────────────────────────────────────

/// Inputs the planner needs beyond the entries themselves.
pub struct PlannerContext<'a> {
    pub indexes: &'a KeyIndexSnapshot,
    pub min_fee: u64,
    pub allow_group_modification: bool,
    /// Set for sign requests: a request with nothing signable is turned
    /// away. Plan-only requests may consist purely of foreign entries.
    pub require_signable: bool,
}

pub fn plan(raw_entries: &[RawRequestEntry], ctx: &PlannerContext) -> Result<Plan, Error> {
    if raw_entries.is_empty() {
        return Err(Error::bad_request("empty transaction list"));
    }

    // 1–3. Triage and decode.
    let mut entries = Vec::with_capacity(raw_entries.len());
    for (i, raw) in raw_entries.iter().enumerate() {
        entries.push(RequestEntry::from_raw(i, raw)?);
    }

    let passthrough_count = entries
        .iter()
        .filter(|e| matches!(e, RequestEntry::Passthrough { .. }))
        .count();
    let foreign_count = entries
        .iter()
        .filter(|e| matches!(e, RequestEntry::Foreign { .. }))
        .count();

    // 2. Passthrough and foreign entries carry incompatible group
    // expectations and cannot share a request.
    if passthrough_count > 0 && foreign_count > 0 {
        return Err(Error::bad_request(
            "passthrough and foreign entries cannot be mixed in one request",
        ));
    }

    // 4. All entries must agree on the incoming group id.
    let group0 = entries[0].txn().group;
    if entries.iter().any(|e| e.txn().group != group0) {
        return Err(Error::bad_request("inconsistent group ids across entries"));
    }
    let pre_grouped = group0.is_some();

    // 5. A frozen group is required for passthrough entries.
    if passthrough_count > 0 && !pre_grouped {
        return Err(Error::bad_request(
            "passthrough entries require a pre-assigned group id",
        ));
    }

    // 6. Shared network params and a non-empty validity intersection.
    if entries.len() > 1 {
        let first = entries[0].txn();
        for entry in &entries[1..] {
            let txn = entry.txn();
            if txn.genesis_id != first.genesis_id || txn.genesis_hash != first.genesis_hash {
                return Err(Error::bad_request(
                    "entries disagree on genesis id or genesis hash",
                ));
            }
        }
        let max_first = entries.iter().map(|e| e.txn().first_valid).max().expect("non-empty");
        let min_last = entries.iter().map(|e| e.txn().last_valid).min().expect("non-empty");
        if max_first > min_last {
            return Err(Error::bad_request(format!(
                "empty validity window: max first-valid {max_first} > min last-valid {min_last}"
            )));
        }
    }

    // 7. Every to-sign auth address must be a known key.
    let mut signable_count = 0;
    for (i, entry) in entries.iter().enumerate() {
        if let RequestEntry::ToSign { auth_address, .. } = entry {
            if !ctx.indexes.contains(auth_address) {
                return Err(Error::bad_request(format!(
                    "entry {i}: unknown signing key {auth_address}"
                )));
            }
            signable_count += 1;
        }
    }

    // 8. A request with nothing to sign and nothing pre-signed belongs on
    // the plan endpoint, not sign.
    if ctx.require_signable && signable_count == 0 && passthrough_count == 0 {
        return Err(Error::bad_request(
            "request contains only foreign entries; nothing to sign",
        ));
    }

    // 9. LogicSig byte budget. Passthrough mode trusts the frozen group and
    // skips the computation entirely.
    let mut lsig_indexes = Vec::new();
    let mut dummies = 0usize;
    if passthrough_count == 0 {
        let mut lsig_total: u64 = 0;
        for (i, entry) in entries.iter().enumerate() {
            let contribution = match entry {
                RequestEntry::ToSign { auth_address, .. } => ctx.indexes.lsig_size(auth_address),
                RequestEntry::Foreign { lsig_size_hint, .. } => lsig_size_hint.unwrap_or(0),
                RequestEntry::Passthrough { .. } => 0,
            };
            if contribution > 0 {
                lsig_indexes.push(i);
            }
            lsig_total += contribution;
        }
        let pool = entries.len() as u64 * LOGIC_SIG_BUDGET_PER_TXN;
        if lsig_total > pool {
            dummies = ((lsig_total - pool) as usize).div_ceil(LOGIC_SIG_BUDGET_PER_TXN as usize);
        }
    }

    // 10. Group-size ceiling.
    if entries.len() + dummies > MAX_GROUP_SIZE {
        return Err(Error::bad_request(format!(
            "group of {} plus {dummies} padding transactions exceeds the \
             maximum group size of {MAX_GROUP_SIZE}",
            entries.len()
        )));
    }

    // 11. Padding would change a pre-assigned group id.
    if pre_grouped && dummies > 0 && !ctx.allow_group_modification {
        return Err(Error::bad_request(
            "padding would change the pre-assigned group id; \
             enable allow_group_modification to permit this",
        ));
    }

    // Build the final list.
    let mut planned: Vec<PlannedTxn> = entries
        .into_iter()
        .map(|entry| match entry {
            RequestEntry::ToSign { txn, auth_address, args } => PlannedTxn {
                txn,
                kind: SlotKind::ToSign { auth_address, args },
            },
            RequestEntry::Passthrough { raw, txn } => PlannedTxn {
                txn,
                kind: SlotKind::Passthrough { raw },
            },
            RequestEntry::Foreign { txn, .. } => PlannedTxn {
                txn,
                kind: SlotKind::Foreign,
            },
        })
        .collect();

    // 12. Dummy synthesis: zero-amount self-pays from the always-true
    // LogicSig address, borrowing the first entry's network params and
    // validity window. Their only purpose is to enlarge the byte pool.
    if dummies > 0 {
        let template = planned[0].txn.clone();
        let dummy_sender = program_address(ALWAYS_TRUE_PROGRAM);
        for _ in 0..dummies {
            planned.push(PlannedTxn {
                txn: Transaction {
                    fee: 0,
                    first_valid: template.first_valid,
                    last_valid: template.last_valid,
                    sender: dummy_sender,
                    genesis_id: template.genesis_id.clone(),
                    genesis_hash: template.genesis_hash,
                    group: None,
                    lease: None,
                    note: vec![],
                    rekey_to: None,
                    txn_type: TransactionType::Payment(Payment {
                        receiver: dummy_sender,
                        amount: 0,
                        close_remainder_to: None,
                    }),
                },
                kind: SlotKind::Dummy,
            });
        }
    }

    // 13. Fee redistribution: the dummies' fee load lands on the LogicSig
    // slots (they caused the padding), or on entry 0 when none exist. The
    // total is conserved exactly: dummies stay at fee 0.
    let fee_delta_total = dummies as u64 * ctx.min_fee;
    let mut fee_modified_indexes = Vec::new();
    if fee_delta_total > 0 {
        if lsig_indexes.is_empty() {
            planned[0].txn.fee += fee_delta_total;
            fee_modified_indexes.push(0);
        } else {
            let share = fee_delta_total / lsig_indexes.len() as u64;
            let remainder = fee_delta_total % lsig_indexes.len() as u64;
            for (pos, &i) in lsig_indexes.iter().enumerate() {
                let mut raise = share;
                if pos == 0 {
                    raise += remainder;
                }
                planned[i].txn.fee += raise;
                fee_modified_indexes.push(i);
            }
        }
    }

    // 14. Group-id recomputation over the final ordered list. A lone
    // ungrouped entry stays ungrouped; a lone pre-grouped entry keeps its
    // incoming id.
    let final_count = planned.len();
    let mut group_recomputed = false;
    if (dummies > 0 || !pre_grouped) && final_count > 1 {
        for p in planned.iter_mut() {
            p.txn.group = None;
        }
        let txns: Vec<Transaction> = planned.iter().map(|p| p.txn.clone()).collect();
        let digest = group_digest(&txns);
        for p in planned.iter_mut() {
            p.txn.group = Some(digest);
        }
        group_recomputed = true;
    }

    // 15. Emit, with the mutation report when anything changed or needs
    // disclosing.
    let reason = if dummies > 0 {
        Some(MutationReason::LsigBudget)
    } else if passthrough_count > 0 {
        Some(MutationReason::Passthrough)
    } else if foreign_count > 0 {
        Some(MutationReason::Foreign)
    } else if group_recomputed {
        Some(MutationReason::Regroup)
    } else {
        None
    };

    let mutations = reason.map(|reason| MutationReport {
        original_count: raw_entries.len(),
        final_count,
        dummies_added: dummies,
        fee_delta_total,
        fee_modified_indexes: fee_modified_indexes.clone(),
        group_id_changed: group_recomputed,
        passthrough_count,
        foreign_count,
        reason,
    });

    Ok(Plan {
        txns: planned,
        dummy_count: dummies,
        group_recomputed,
        lsig_indexes,
        passthrough_count,
        foreign_count,
        signable_count,
        mutations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use aplane_core::codec::{encode_signed_transaction, encode_transaction};
    use aplane_core::transaction::{LogicSig, SignedTransaction};
    use aplane_core::types::Digest;
    use std::collections::HashMap;

    const ED: Address = Address([1u8; 32]);
    const FALCON: Address = Address([2u8; 32]);

    fn snapshot() -> KeyIndexSnapshot {
        KeyIndexSnapshot {
            key_types: HashMap::from([
                (ED, "ed25519".to_string()),
                (FALCON, "falcon1024-v1".to_string()),
            ]),
            lsig_sizes: HashMap::from([(ED, 0), (FALCON, 3180)]),
        }
    }

    fn ctx(indexes: &KeyIndexSnapshot) -> PlannerContext<'_> {
        PlannerContext {
            indexes,
            min_fee: 1000,
            allow_group_modification: false,
            require_signable: true,
        }
    }

    fn payment(sender: Address, amount: u64) -> Transaction {
        Transaction {
            fee: 1000,
            first_valid: 100,
            last_valid: 1100,
            sender,
            genesis_id: "testnet-v1.0".into(),
            genesis_hash: Some(Digest([7u8; 32])),
            group: None,
            lease: None,
            note: vec![],
            rekey_to: None,
            txn_type: TransactionType::Payment(Payment {
                receiver: sender,
                amount,
                close_remainder_to: None,
            }),
        }
    }

    fn to_sign(txn: &Transaction, auth: Address) -> RawRequestEntry {
        RawRequestEntry {
            txn_bytes_hex: Some(hex::encode(encode_transaction(txn))),
            auth_address: Some(auth.encode_string()),
            ..Default::default()
        }
    }

    fn foreign(txn: &Transaction, hint: Option<u64>) -> RawRequestEntry {
        RawRequestEntry {
            txn_bytes_hex: Some(hex::encode(encode_transaction(txn))),
            lsig_size_hint: hint,
            ..Default::default()
        }
    }

    fn passthrough(txn: &Transaction) -> RawRequestEntry {
        let stxn = SignedTransaction {
            sig: None,
            logic_sig: Some(LogicSig::new(ALWAYS_TRUE_PROGRAM.to_vec(), vec![])),
            auth_address: None,
            transaction: txn.clone(),
        };
        RawRequestEntry {
            signed_txn_hex: Some(hex::encode(encode_signed_transaction(&stxn))),
            ..Default::default()
        }
    }

    fn total_fees(plan: &Plan) -> u64 {
        plan.txns.iter().map(|p| p.txn.fee).sum()
    }

    // S1: one Ed25519 self-pay — nothing changes.
    #[test]
    fn single_ed25519_pay_is_untouched() {
        let indexes = snapshot();
        let entries = vec![to_sign(&payment(ED, 0), ED)];
        let plan = plan(&entries, &ctx(&indexes)).expect("plan");

        assert_eq!(plan.txns.len(), 1);
        assert_eq!(plan.dummy_count, 0);
        assert!(!plan.group_recomputed);
        assert!(plan.mutations.is_none());
        assert_eq!(plan.txns[0].txn.group, None);
    }

    // S2: one Falcon pay at 3180 LogicSig bytes — three dummies, fee load
    // on the Falcon entry, fresh group id.
    #[test]
    fn falcon_pay_gets_padding_and_fee_load() {
        let indexes = snapshot();
        let entries = vec![to_sign(&payment(FALCON, 5), FALCON)];
        let plan = plan(&entries, &ctx(&indexes)).expect("plan");

        assert_eq!(plan.dummy_count, 3);
        assert_eq!(plan.txns.len(), 4);

        // Fee conservation: delta equals dummies * min fee, landing on the
        // lone LogicSig slot.
        assert_eq!(plan.txns[0].txn.fee, 1000 + 3000);
        for dummy in &plan.txns[1..] {
            assert!(matches!(dummy.kind, SlotKind::Dummy));
            assert_eq!(dummy.txn.fee, 0);
        }

        // Budget property: total LogicSig bytes now fit the enlarged pool.
        assert!(3180 <= plan.txns.len() as u64 * LOGIC_SIG_BUDGET_PER_TXN);

        // All four share a freshly computed group id.
        let gid = plan.txns[0].txn.group.expect("group id");
        assert!(plan.txns.iter().all(|p| p.txn.group == Some(gid)));
        let expected = {
            let mut txns = plan.transactions();
            for t in txns.iter_mut() {
                t.group = None;
            }
            group_digest(&txns)
        };
        assert_eq!(gid, expected);

        let report = plan.mutations.expect("mutations");
        assert_eq!(report.dummies_added, 3);
        assert_eq!(report.fee_delta_total, 3000);
        assert_eq!(report.fee_modified_indexes, vec![0]);
        assert!(report.group_id_changed);
        assert_eq!(report.reason, MutationReason::LsigBudget);
    }

    // S3: pre-grouped pair needing padding without allow_group_modification.
    #[test]
    fn pregrouped_padding_requires_modification_flag() {
        let indexes = snapshot();
        let mut a = payment(FALCON, 1);
        let mut b = payment(ED, 1);
        let gid = group_digest(&[a.clone(), b.clone()]);
        a.group = Some(gid);
        b.group = Some(gid);

        let entries = vec![to_sign(&a, FALCON), to_sign(&b, ED)];
        let err = plan(&entries, &ctx(&indexes)).expect_err("rejected");
        match err {
            Error::BadRequest(msg) => assert!(msg.contains("allow_group_modification")),
            other => panic!("expected BadRequest, got {other:?}"),
        }

        // With the flag, the same request plans fine and regroups.
        let permissive = PlannerContext {
            indexes: &indexes,
            min_fee: 1000,
            allow_group_modification: true,
            require_signable: true,
        };
        let plan = plan(&entries, &permissive).expect("plan");
        assert!(plan.dummy_count > 0);
        assert!(plan.group_recomputed);
        assert_ne!(plan.txns[0].txn.group, Some(gid));
    }

    #[test]
    fn fee_conservation_across_multiple_lsig_slots() {
        let mut indexes = snapshot();
        let falcon2 = Address([3u8; 32]);
        indexes.key_types.insert(falcon2, "falcon1024-v1".into());
        indexes.lsig_sizes.insert(falcon2, 3180);

        let entries = vec![
            to_sign(&payment(FALCON, 1), FALCON),
            to_sign(&payment(falcon2, 2), falcon2),
        ];
        let plan = plan(&entries, &ctx(&indexes)).expect("plan");

        // 6360 bytes over a pool of (2 + d) * 1000 → d = 5.
        assert_eq!(plan.dummy_count, 5);
        let fees_in = 2 * 1000;
        assert_eq!(
            total_fees(&plan),
            fees_in + plan.dummy_count as u64 * 1000,
            "fee delta must equal dummies * min fee exactly"
        );
        let report = plan.mutations.expect("mutations");
        assert_eq!(report.fee_modified_indexes, vec![0, 1]);
    }

    #[test]
    fn foreign_hint_contributes_to_budget() {
        let indexes = snapshot();
        let entries = vec![
            to_sign(&payment(ED, 1), ED),
            foreign(&payment(FALCON, 1), Some(3180)),
        ];
        let plan = plan(&entries, &ctx(&indexes)).expect("plan");

        // 3180 over a pool of 2000 → 2 dummies; the foreign slot is the
        // only LogicSig contributor so it absorbs the fee load.
        assert_eq!(plan.dummy_count, 2);
        assert_eq!(plan.txns[1].txn.fee, 1000 + 2000);
        assert_eq!(plan.foreign_count, 1);
        let report = plan.mutations.expect("mutations");
        assert_eq!(report.reason, MutationReason::LsigBudget);
    }

    #[test]
    fn passthrough_mode_skips_budget() {
        let indexes = snapshot();
        let mut a = payment(ED, 1);
        let mut b = payment(FALCON, 1);
        let gid = group_digest(&[a.clone(), b.clone()]);
        a.group = Some(gid);
        b.group = Some(gid);

        let entries = vec![passthrough(&a), to_sign(&b, FALCON)];
        let plan = plan(&entries, &ctx(&indexes)).expect("plan");

        // Despite the Falcon key's 3180 bytes, the frozen group is trusted.
        assert_eq!(plan.dummy_count, 0);
        assert!(!plan.group_recomputed);
        assert_eq!(plan.txns[0].txn.group, Some(gid));
        let report = plan.mutations.expect("disclosure");
        assert_eq!(report.reason, MutationReason::Passthrough);
        assert_eq!(report.passthrough_count, 1);
    }

    #[test]
    fn passthrough_and_foreign_cannot_mix() {
        let indexes = snapshot();
        let mut a = payment(ED, 1);
        a.group = Some(Digest([9u8; 32]));
        let entries = vec![passthrough(&a), foreign(&payment(ED, 1), None)];
        assert!(plan(&entries, &ctx(&indexes)).is_err());
    }

    #[test]
    fn passthrough_requires_frozen_group() {
        let indexes = snapshot();
        let a = payment(ED, 1); // ungrouped
        let entries = vec![passthrough(&a)];
        let err = plan(&entries, &ctx(&indexes)).expect_err("rejected");
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[test]
    fn only_foreign_is_rejected() {
        let indexes = snapshot();
        let entries = vec![foreign(&payment(ED, 1), None)];
        let err = plan(&entries, &ctx(&indexes)).expect_err("rejected");
        match err {
            Error::BadRequest(msg) => assert!(msg.contains("foreign")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn plan_mode_accepts_only_foreign() {
        let indexes = snapshot();
        let plan_ctx = PlannerContext {
            indexes: &indexes,
            min_fee: 1000,
            allow_group_modification: false,
            require_signable: false,
        };
        let entries = vec![foreign(&payment(ED, 1), Some(500))];
        let plan = plan(&entries, &plan_ctx).expect("plan-only request");
        assert_eq!(plan.foreign_count, 1);
        assert_eq!(plan.signable_count, 0);
    }

    #[test]
    fn inconsistent_groups_are_rejected() {
        let indexes = snapshot();
        let mut a = payment(ED, 1);
        a.group = Some(Digest([1u8; 32]));
        let b = payment(ED, 2);
        let entries = vec![to_sign(&a, ED), to_sign(&b, ED)];
        assert!(plan(&entries, &ctx(&indexes)).is_err());
    }

    #[test]
    fn empty_validity_intersection_is_rejected() {
        let indexes = snapshot();
        let mut a = payment(ED, 1);
        a.first_valid = 100;
        a.last_valid = 200;
        let mut b = payment(ED, 2);
        b.first_valid = 300;
        b.last_valid = 400;
        let entries = vec![to_sign(&a, ED), to_sign(&b, ED)];
        let err = plan(&entries, &ctx(&indexes)).expect_err("rejected");
        match err {
            Error::BadRequest(msg) => assert!(msg.contains("validity")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn mismatched_genesis_is_rejected() {
        let indexes = snapshot();
        let a = payment(ED, 1);
        let mut b = payment(ED, 2);
        b.genesis_id = "mainnet-v1.0".into();
        let entries = vec![to_sign(&a, ED), to_sign(&b, ED)];
        assert!(plan(&entries, &ctx(&indexes)).is_err());
    }

    #[test]
    fn unknown_signing_key_is_rejected() {
        let indexes = snapshot();
        let stranger = Address([9u8; 32]);
        let entries = vec![to_sign(&payment(stranger, 1), stranger)];
        let err = plan(&entries, &ctx(&indexes)).expect_err("rejected");
        match err {
            Error::BadRequest(msg) => assert!(msg.contains("unknown signing key")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn group_size_ceiling_is_enforced() {
        let mut indexes = snapshot();
        // A key so large it would need more padding than a group can hold.
        let heavy = Address([8u8; 32]);
        indexes.key_types.insert(heavy, "falcon1024-v1".into());
        indexes.lsig_sizes.insert(heavy, 40_000);
        let entries = vec![to_sign(&payment(heavy, 1), heavy)];
        let err = plan(&entries, &ctx(&indexes)).expect_err("rejected");
        match err {
            Error::BadRequest(msg) => assert!(msg.contains("maximum group size")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn multi_entry_ungrouped_gets_regrouped() {
        let indexes = snapshot();
        let entries = vec![to_sign(&payment(ED, 1), ED), to_sign(&payment(ED, 2), ED)];
        let plan = plan(&entries, &ctx(&indexes)).expect("plan");

        assert_eq!(plan.dummy_count, 0);
        assert!(plan.group_recomputed);
        let report = plan.mutations.expect("report");
        assert_eq!(report.reason, MutationReason::Regroup);
        assert!(report.group_id_changed);
        assert_eq!(report.fee_delta_total, 0);
    }

    #[test]
    fn single_pregrouped_entry_keeps_its_group() {
        let indexes = snapshot();
        let mut a = payment(ED, 1);
        let gid = Digest([5u8; 32]);
        a.group = Some(gid);
        let entries = vec![to_sign(&a, ED)];
        let plan = plan(&entries, &ctx(&indexes)).expect("plan");
        assert_eq!(plan.txns[0].txn.group, Some(gid));
        assert!(!plan.group_recomputed);
    }

    #[test]
    fn mixed_shape_entry_is_rejected() {
        let indexes = snapshot();
        let txn = payment(ED, 1);
        let mut raw = to_sign(&txn, ED);
        raw.signed_txn_hex = Some("00".into());
        assert!(plan(&[raw], &ctx(&indexes)).is_err());

        let empty = RawRequestEntry::default();
        assert!(plan(&[empty], &ctx(&indexes)).is_err());
    }
}
