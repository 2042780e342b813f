//! The approval coordinator: turns a plan into an operator decision.
//!
//! Single-transaction requests (one entry, no padding) can auto-approve;
//! everything else becomes a group-level approval carried over the control
//! channel, with a hard timeout and scope-guarded cleanup.

use std::sync::Arc;
use std::time::Duration;

use aplane_core::transaction::TransactionType;
use aplane_core::Error;
use thiserror::Error as ThisError;
use tracing::debug;

use crate::hub::SignerHub;
use crate::planner::{Plan, SlotKind};

/// Default time an operator has to answer before the request fails.
pub const APPROVAL_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    pub approved: bool,
    pub reason: Option<String>,
}

#[derive(Debug, ThisError)]
pub enum SinkError {
    #[error("no control client connected")]
    NoClient,

    #[error("control channel send failed: {0}")]
    SendFailed(String),
}

/// The control channel's side of approval delivery. The daemon wires its
/// control server in here; tests substitute fakes.
pub trait ApprovalSink: Send + Sync {
    fn send_sign_request(
        &self,
        request_id: u64,
        description: String,
        txns_hex: Vec<String>,
    ) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ApprovalConfig {
    pub txn_auto_approve: bool,
    pub group_auto_approve: bool,
}

/// Removes the pending entry when the wait ends for any reason, so a late
/// response finds nothing and is dropped.
struct PendingGuard<'a> {
    hub: &'a SignerHub,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.hub.remove_approval(self.id);
    }
}

/// Human-readable description of the final planned transactions. Built from
/// the plan, not the raw request, so server-side mutations are visible to
/// the operator.
pub fn describe_plan(plan: &Plan) -> String {
    let mut lines = Vec::with_capacity(plan.txns.len() + 1);

    if let Some(m) = &plan.mutations {
        lines.push(format!(
            "group of {} transaction(s): {} dummy padding, fee delta {} microAlgos{}",
            m.final_count,
            m.dummies_added,
            m.fee_delta_total,
            if m.group_id_changed { ", group id recomputed" } else { "" },
        ));
    } else {
        lines.push(format!("{} transaction(s)", plan.txns.len()));
    }

    for (i, planned) in plan.txns.iter().enumerate() {
        let txn = &planned.txn;
        let role = match &planned.kind {
            SlotKind::ToSign { .. } => "sign",
            SlotKind::Passthrough { .. } => "passthrough",
            SlotKind::Foreign => "foreign",
            SlotKind::Dummy => "dummy",
        };
        let detail = match &txn.txn_type {
            TransactionType::Payment(p) => format!(
                "pay {} microAlgos from {} to {}",
                p.amount, txn.sender, p.receiver
            ),
            TransactionType::AssetTransfer(a) => format!(
                "transfer {} of asset {} from {} to {}",
                a.amount, a.asset_id, txn.sender, a.receiver
            ),
        };
        lines.push(format!("  {i}: [{role}] {detail}, fee {}", txn.fee));
    }

    lines.join("\n")
}

fn is_auto_approved(plan: &Plan, config: &ApprovalConfig) -> bool {
    // The single-transaction shortcut applies only to a lone to-sign entry
    // with no padding.
    if plan.txns.len() == 1 && plan.dummy_count == 0 {
        if let SlotKind::ToSign { auth_address, .. } = &plan.txns[0].kind {
            if config.txn_auto_approve {
                return true;
            }
            // A validation transaction proves "I can sign for this
            // account"; the shortcut requires the signer to be the account
            // itself, not a rekeyed authority.
            let txn = &plan.txns[0].txn;
            if txn.is_validation() && txn.sender == *auth_address {
                return true;
            }
        }
        return false;
    }
    config.group_auto_approve
}

/// Run the approval exchange for `plan`. Returns `Ok(true)` when the
/// operator (or an auto-approve rule) accepted, an error otherwise; the
/// boolean is false only for auto-approved requests that never reached the
/// control client.
pub async fn request_approval(
    hub: &Arc<SignerHub>,
    sink: &dyn ApprovalSink,
    plan: &Plan,
    config: &ApprovalConfig,
    timeout: Duration,
) -> Result<bool, Error> {
    if is_auto_approved(plan, config) {
        debug!("sign request auto-approved");
        return Ok(false);
    }

    let description = describe_plan(plan);
    let txns_hex: Vec<String> = plan
        .txns
        .iter()
        .map(|p| hex::encode(p.txn.canonical_bytes()))
        .collect();

    let (id, rx) = hub.register_approval();
    let _guard = PendingGuard { hub, id };

    sink.send_sign_request(id, description, txns_hex)
        .map_err(|e| Error::unavailable(e.to_string()))?;

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(outcome)) if outcome.approved => Ok(true),
        Ok(Ok(outcome)) => Err(Error::forbidden(format!(
            "rejected by operator: {}",
            outcome.reason.unwrap_or_else(|| "no reason given".into())
        ))),
        // Sender dropped without an answer (lock path already injected a
        // rejection, so this is a daemon-side teardown).
        Ok(Err(_)) => Err(Error::unavailable("approval channel closed")),
        Err(_) => Err(Error::unavailable("approval timed out")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::planner::{plan as run_planner, PlannerContext, RawRequestEntry};
    use aplane_core::codec::encode_transaction;
    use aplane_core::transaction::{Payment, Transaction};
    use aplane_core::types::{Address, Digest};
    use aplane_store::{KeyIndexSnapshot, KeyStore};
    use aplane_crypto::ProviderRegistry;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const ED: Address = Address([1u8; 32]);
    const FALCON: Address = Address([2u8; 32]);

    struct FakeSink {
        sent: Mutex<Vec<u64>>,
        connected: bool,
    }

    impl ApprovalSink for FakeSink {
        fn send_sign_request(
            &self,
            request_id: u64,
            _description: String,
            _txns_hex: Vec<String>,
        ) -> Result<(), SinkError> {
            if !self.connected {
                return Err(SinkError::NoClient);
            }
            self.sent.lock().expect("sent lock").push(request_id);
            Ok(())
        }
    }

    fn snapshot() -> KeyIndexSnapshot {
        KeyIndexSnapshot {
            key_types: HashMap::from([
                (ED, "ed25519".to_string()),
                (FALCON, "falcon1024-v1".to_string()),
            ]),
            lsig_sizes: HashMap::from([(ED, 0), (FALCON, 3180)]),
        }
    }

    fn payment(sender: Address, amount: u64) -> Transaction {
        Transaction {
            fee: 1000,
            first_valid: 1,
            last_valid: 1000,
            sender,
            genesis_id: "testnet-v1.0".into(),
            genesis_hash: Some(Digest([1u8; 32])),
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

    fn make_plan(entries: &[RawRequestEntry]) -> Plan {
        let indexes = snapshot();
        let ctx = PlannerContext {
            indexes: &indexes,
            min_fee: 1000,
            allow_group_modification: false,
            require_signable: true,
        };
        run_planner(entries, &ctx).expect("plan")
    }

    fn test_hub() -> (tempfile::TempDir, Arc<SignerHub>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Arc::new(ProviderRegistry::with_default_providers());
        let store = Arc::new(KeyStore::new(dir.path(), "default", registry, None));
        let hub = SignerHub::new(store, Arc::new(AuditLog::disabled()), Duration::ZERO);
        (dir, hub)
    }

    // S1: validation transaction auto-approves with no client interaction.
    #[tokio::test]
    async fn validation_transaction_auto_approves() {
        let (_dir, hub) = test_hub();
        let plan = make_plan(&[to_sign(&payment(ED, 0), ED)]);
        let sink = FakeSink { sent: Mutex::new(vec![]), connected: false };

        let asked = request_approval(
            &hub,
            &sink,
            &plan,
            &ApprovalConfig::default(),
            Duration::from_secs(1),
        )
        .await
        .expect("auto-approved");
        assert!(!asked);
        assert!(sink.sent.lock().expect("sent").is_empty());
    }

    #[tokio::test]
    async fn non_validation_single_needs_operator() {
        let (_dir, hub) = test_hub();
        // Non-zero amount: not a validation transaction.
        let plan = make_plan(&[to_sign(&payment(ED, 100), ED)]);
        let sink = FakeSink { sent: Mutex::new(vec![]), connected: false };

        let err = request_approval(
            &hub,
            &sink,
            &plan,
            &ApprovalConfig::default(),
            Duration::from_millis(50),
        )
        .await
        .expect_err("no client connected");
        assert!(matches!(err, Error::Unavailable(_)));
    }

    #[tokio::test]
    async fn txn_auto_approve_flag_short_circuits() {
        let (_dir, hub) = test_hub();
        let plan = make_plan(&[to_sign(&payment(ED, 100), ED)]);
        let sink = FakeSink { sent: Mutex::new(vec![]), connected: false };
        let config = ApprovalConfig { txn_auto_approve: true, ..Default::default() };

        assert!(request_approval(&hub, &sink, &plan, &config, Duration::from_secs(1))
            .await
            .is_ok());
    }

    // A padded Falcon request takes the group path even though the caller
    // sent a single entry.
    #[tokio::test]
    async fn padded_request_is_group_approved() {
        let (_dir, hub) = test_hub();
        let plan = make_plan(&[to_sign(&payment(FALCON, 0), FALCON)]);
        assert!(plan.dummy_count > 0);

        let sink = FakeSink { sent: Mutex::new(vec![]), connected: true };
        let hub2 = Arc::clone(&hub);

        let config = ApprovalConfig::default();
        let wait = request_approval(
            &hub,
            &sink,
            &plan,
            &config,
            Duration::from_secs(5),
        );
        let answer = async {
            // Wait until the request is registered, then approve it.
            loop {
                let sent = sink.sent.lock().expect("sent").clone();
                if let Some(&id) = sent.first() {
                    hub2.resolve_approval(
                        id,
                        ApprovalOutcome { approved: true, reason: None },
                    );
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };

        let (result, ()) = tokio::join!(wait, answer);
        assert!(result.expect("approved"));
    }

    #[tokio::test]
    async fn operator_rejection_maps_to_forbidden() {
        let (_dir, hub) = test_hub();
        let plan = make_plan(&[to_sign(&payment(ED, 1), ED), to_sign(&payment(ED, 2), ED)]);
        let sink = FakeSink { sent: Mutex::new(vec![]), connected: true };
        let hub2 = Arc::clone(&hub);

        let config = ApprovalConfig::default();
        let wait = request_approval(
            &hub,
            &sink,
            &plan,
            &config,
            Duration::from_secs(5),
        );
        let answer = async {
            loop {
                let sent = sink.sent.lock().expect("sent").clone();
                if let Some(&id) = sent.first() {
                    hub2.resolve_approval(
                        id,
                        ApprovalOutcome {
                            approved: false,
                            reason: Some("looks wrong".into()),
                        },
                    );
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };

        let (result, ()) = tokio::join!(wait, answer);
        match result.expect_err("rejected") {
            Error::Forbidden(msg) => assert!(msg.contains("looks wrong")),
            other => panic!("unexpected {other:?}"),
        }
    }

    // S5: timeout cleans the pending map; the late response is dropped.
    #[tokio::test(start_paused = true)]
    async fn timeout_cleans_pending_and_drops_late_response() {
        let (_dir, hub) = test_hub();
        let plan = make_plan(&[to_sign(&payment(ED, 1), ED), to_sign(&payment(ED, 2), ED)]);
        let sink = FakeSink { sent: Mutex::new(vec![]), connected: true };

        let err = request_approval(
            &hub,
            &sink,
            &plan,
            &ApprovalConfig::default(),
            APPROVAL_TIMEOUT,
        )
        .await
        .expect_err("timed out");
        assert!(matches!(err, Error::Unavailable(_)));
        assert_eq!(hub.pending_approval_count(), 0);

        let id = *sink.sent.lock().expect("sent").first().expect("sent id");
        assert!(!hub.resolve_approval(
            id,
            ApprovalOutcome { approved: true, reason: None }
        ));
    }

    #[tokio::test]
    async fn group_auto_approve_flag() {
        let (_dir, hub) = test_hub();
        let plan = make_plan(&[to_sign(&payment(ED, 1), ED), to_sign(&payment(ED, 2), ED)]);
        let sink = FakeSink { sent: Mutex::new(vec![]), connected: false };
        let config = ApprovalConfig { group_auto_approve: true, ..Default::default() };

        assert!(request_approval(&hub, &sink, &plan, &config, Duration::from_secs(1))
            .await
            .is_ok());
    }

    #[test]
    fn description_reflects_mutations() {
        let plan = make_plan(&[to_sign(&payment(FALCON, 0), FALCON)]);
        let description = describe_plan(&plan);
        assert!(description.contains("3 dummy padding"));
        assert!(description.contains("group id recomputed"));
        assert!(description.contains("[dummy]"));
    }
}
