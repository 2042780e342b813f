//! The signer hub: lifecycle state machine between `Locked` and `Unlocked`,
//! owner of the key session, the inactivity watchdog and the
//! pending-approval registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use aplane_core::Error;
use aplane_crypto::SecretBytes;
use aplane_store::KeyStore;
use tokio::sync::{broadcast, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::approval::ApprovalOutcome;
use crate::audit::AuditLog;
use crate::session::KeySession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignerState {
    Locked,
    Unlocked,
}

impl SignerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignerState::Locked => "locked",
            SignerState::Unlocked => "unlocked",
        }
    }
}

/// Push notifications for subscribers (the control channel, mainly).
#[derive(Debug, Clone)]
pub enum HubEvent {
    Unlocked { key_count: usize },
    Locked,
    KeysChanged { key_count: usize },
}

pub struct SignerHub {
    store: Arc<KeyStore>,
    session: KeySession,
    audit: Arc<AuditLog>,
    state: RwLock<SignerState>,
    pending: Mutex<HashMap<u64, oneshot::Sender<ApprovalOutcome>>>,
    next_request_id: AtomicU64,
    events: broadcast::Sender<HubEvent>,
    /// Inactivity auto-lock interval; zero disables the watchdog.
    timeout: Duration,
    last_activity: Mutex<Instant>,
    timer_gen: AtomicU64,
    /// Self-handle for spawning the watchdog task.
    weak_self: Weak<SignerHub>,
}

impl SignerHub {
    pub fn new(store: Arc<KeyStore>, audit: Arc<AuditLog>, timeout: Duration) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new_cyclic(|weak| Self {
            session: KeySession::new(Arc::clone(&store)),
            store,
            audit,
            state: RwLock::new(SignerState::Locked),
            pending: Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
            events,
            timeout,
            last_activity: Mutex::new(Instant::now()),
            timer_gen: AtomicU64::new(0),
            weak_self: weak.clone(),
        })
    }

    pub fn store(&self) -> &Arc<KeyStore> {
        &self.store
    }

    pub fn session(&self) -> &KeySession {
        &self.session
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> SignerState {
        *self.state.read().expect("state lock")
    }

    pub fn is_unlocked(&self) -> bool {
        self.state() == SignerState::Unlocked
    }

    /// Guard used by every signing path.
    pub fn require_unlocked(&self) -> Result<(), Error> {
        if self.is_unlocked() {
            Ok(())
        } else {
            Err(Error::forbidden("signer is locked"))
        }
    }

    // ── Unlock / lock ────────────────────────────────────────────────────────

    /// Verify the passphrase, derive and cache the master key, rescan the
    /// key directory and arm the inactivity watchdog. Returns the key count.
    pub fn unlock(&self, passphrase: &SecretBytes) -> Result<usize, Error> {
        self.store.initialize(passphrase).map_err(Error::from)?;
        let key_count = self.store.scan().map_err(Error::from)?;

        *self.state.write().expect("state lock") = SignerState::Unlocked;
        self.touch_activity();
        self.arm_timer();

        let _ = self.events.send(HubEvent::Unlocked { key_count });
        info!(key_count, "signer unlocked");
        Ok(key_count)
    }

    /// Lock: zero the master key and the session, drop cached metadata
    /// (paths survive for the next rescan) and fail every pending approval.
    pub fn lock(&self, reason: &str) {
        {
            let mut state = self.state.write().expect("state lock");
            if *state == SignerState::Locked {
                return;
            }
            *state = SignerState::Locked;
        }
        // Cancels any armed watchdog task.
        self.timer_gen.fetch_add(1, Ordering::SeqCst);

        self.session.destroy();
        self.store.lock();
        self.fail_all_approvals("locked");

        let _ = self.events.send(HubEvent::Locked);
        info!(reason, "signer locked");
    }

    /// Called by the file-watcher wiring after a rescan.
    pub fn notify_keys_changed(&self, key_count: usize) {
        self.audit
            .record("key-reload", crate::audit_fields! { "keys": key_count });
        let _ = self.events.send(HubEvent::KeysChanged { key_count });
    }

    // ── Inactivity watchdog ──────────────────────────────────────────────────

    /// Record an activity point (sign request begins, admin op arrives).
    pub fn touch_activity(&self) {
        *self.last_activity.lock().expect("activity lock") = Instant::now();
    }

    fn arm_timer(&self) {
        if self.timeout.is_zero() {
            return;
        }
        let Some(hub) = self.weak_self.upgrade() else {
            return;
        };
        let gen = self.timer_gen.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::spawn(async move {
            loop {
                let deadline = *hub.last_activity.lock().expect("activity lock") + hub.timeout;
                let now = Instant::now();
                if now < deadline {
                    tokio::time::sleep_until(deadline).await;
                } else {
                    // The deadline passed with no fresh activity. Re-check
                    // generation so a stale task never locks a newer unlock.
                    if hub.timer_gen.load(Ordering::SeqCst) != gen {
                        return;
                    }
                    debug!("inactivity timeout reached");
                    hub.lock("inactivity timeout");
                    return;
                }
                if hub.timer_gen.load(Ordering::SeqCst) != gen {
                    return;
                }
            }
        });
    }

    // ── Pending approvals ────────────────────────────────────────────────────

    /// Allocate a request id and a one-shot slot for its outcome.
    pub fn register_approval(&self) -> (u64, oneshot::Receiver<ApprovalOutcome>) {
        let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().expect("pending lock").insert(id, tx);
        (id, rx)
    }

    /// Deliver an operator response. Returns false when the id is unknown
    /// (timed out or displaced); such responses are silently dropped.
    pub fn resolve_approval(&self, id: u64, outcome: ApprovalOutcome) -> bool {
        match self.pending.lock().expect("pending lock").remove(&id) {
            Some(tx) => tx.send(outcome).is_ok(),
            None => {
                debug!(id, "dropping response for unknown approval id");
                false
            }
        }
    }

    /// Scope-guard cleanup after a timeout.
    pub fn remove_approval(&self, id: u64) {
        self.pending.lock().expect("pending lock").remove(&id);
    }

    pub fn pending_approval_count(&self) -> usize {
        self.pending.lock().expect("pending lock").len()
    }

    /// Reject every in-flight approval, e.g. on lock or control-client
    /// disconnect.
    pub fn fail_all_approvals(&self, reason: &str) {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock().expect("pending lock");
            pending.drain().collect()
        };
        if !drained.is_empty() {
            warn!(count = drained.len(), reason, "failing pending approvals");
        }
        for (_, tx) in drained {
            let _ = tx.send(ApprovalOutcome {
                approved: false,
                reason: Some(reason.to_string()),
            });
        }
    }
}
