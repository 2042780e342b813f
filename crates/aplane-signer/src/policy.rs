//! Hard-constraint policy linter.
//!
//! Runs after planning and before any approval: an operator cannot override
//! a linter rejection. Per-transaction rules cover every final entry,
//! dummies included; group rules run once over the final list. The
//! configuration snapshot is captured at sign-request entry.

use aplane_core::transaction::{Transaction, TransactionType};
use aplane_core::Error;
use serde::{Deserialize, Serialize};

use crate::planner::Plan;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// When set, every sender must appear here.
    #[serde(default)]
    pub sender_allowlist: Option<Vec<String>>,

    /// Rekey targets that are never acceptable.
    #[serde(default)]
    pub rekey_denylist: Vec<String>,

    /// Close-remainder targets that are never acceptable.
    #[serde(default)]
    pub close_denylist: Vec<String>,

    /// When set, asset transfers are restricted to these asset ids.
    #[serde(default)]
    pub asset_allowlist: Option<Vec<u64>>,

    /// Group-size cap below the protocol's own ceiling.
    #[serde(default)]
    pub max_group_size: Option<usize>,

    /// Reject groups mixing more than one distinct sender.
    #[serde(default)]
    pub forbid_mixed_senders: bool,
}

fn reject(rule: &str, detail: impl std::fmt::Display) -> Error {
    Error::forbidden(format!("policy violation ({rule}): {detail}"))
}

/// Per-transaction hard constraints.
pub fn lint_transaction(config: &PolicyConfig, txn: &Transaction) -> Result<(), Error> {
    let sender = txn.sender.encode_string();

    if let Some(allow) = &config.sender_allowlist {
        if !allow.iter().any(|a| a == &sender) {
            return Err(reject("sender-allowlist", format!("sender {sender}")));
        }
    }

    if let Some(rekey) = &txn.rekey_to {
        let rekey = rekey.encode_string();
        if config.rekey_denylist.iter().any(|a| a == &rekey) {
            return Err(reject("rekey-denylist", format!("rekey to {rekey}")));
        }
    }

    match &txn.txn_type {
        TransactionType::Payment(p) => {
            if let Some(close) = &p.close_remainder_to {
                let close = close.encode_string();
                if config.close_denylist.iter().any(|a| a == &close) {
                    return Err(reject("close-denylist", format!("close to {close}")));
                }
            }
        }
        TransactionType::AssetTransfer(a) => {
            if let Some(allow) = &config.asset_allowlist {
                if !allow.contains(&a.asset_id) {
                    return Err(reject("asset-allowlist", format!("asset {}", a.asset_id)));
                }
            }
            if let Some(close) = &a.close_to {
                let close = close.encode_string();
                if config.close_denylist.iter().any(|c| c == &close) {
                    return Err(reject("close-denylist", format!("asset close to {close}")));
                }
            }
        }
    }

    Ok(())
}

/// Group-level hard constraints over the final list.
pub fn lint_group(config: &PolicyConfig, txns: &[Transaction]) -> Result<(), Error> {
    if let Some(max) = config.max_group_size {
        if txns.len() > max {
            return Err(reject(
                "max-group-size",
                format!("{} transactions, limit {max}", txns.len()),
            ));
        }
    }

    if config.forbid_mixed_senders && txns.len() > 1 {
        let first = txns[0].sender;
        if txns.iter().any(|t| t.sender != first) {
            return Err(reject("mixed-senders", "group mixes distinct senders"));
        }
    }

    Ok(())
}

/// Lint an entire plan: every final entry, then the group.
pub fn lint_plan(config: &PolicyConfig, plan: &Plan) -> Result<(), Error> {
    let txns = plan.transactions();
    for txn in &txns {
        lint_transaction(config, txn)?;
    }
    lint_group(config, &txns)
}
