//! Single-client control channel over a local Unix stream socket.
//!
//! At most one *accepted* session exists at any instant. A connection that
//! arrives while another is accepted is offered a displacement handshake;
//! one that arrives while another is still mid-authentication is closed.
//! The accepted session carries unlock, key CRUD, sign approvals and the
//! daemon's push notifications.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aplane_core::types::Address;
use aplane_crypto::SecretBytes;
use aplane_signer::approval::{ApprovalOutcome, ApprovalSink, SinkError};
use aplane_signer::{audit_fields, HubEvent, SignerHub};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use crate::messages::{Envelope, KeyRow, Message};

/// Deadline for the displacement handshake answer.
pub const DISPLACE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ControlConfig {
    pub socket_path: PathBuf,
    pub lock_on_disconnect: bool,
}

/// Hook the daemon installs so the control channel can mint API tokens.
pub trait TokenProvisioner: Send + Sync {
    fn provision(&self) -> Result<String, String>;
}

struct AcceptedSession {
    conn_id: u64,
    writer: mpsc::UnboundedSender<String>,
    displaced: Arc<AtomicBool>,
    kicked: Arc<Notify>,
}

enum SessionSlot {
    Empty,
    Pending { conn_id: u64 },
    Accepted(AcceptedSession),
}

pub struct ControlServer {
    hub: Arc<SignerHub>,
    config: ControlConfig,
    provisioner: Option<Arc<dyn TokenProvisioner>>,
    slot: Mutex<SessionSlot>,
    next_conn_id: AtomicU64,
}

impl ControlServer {
    pub fn new(
        hub: Arc<SignerHub>,
        config: ControlConfig,
        provisioner: Option<Arc<dyn TokenProvisioner>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            hub,
            config,
            provisioner,
            slot: Mutex::new(SessionSlot::Empty),
            next_conn_id: AtomicU64::new(1),
        })
    }

    /// Pre-listen validation of the socket path: refuse symlinks and
    /// foreign-owned inodes, warn about world-writable parents.
    pub fn validate_socket_path(path: &std::path::Path) -> Result<(), String> {
        use std::os::unix::fs::{MetadataExt, PermissionsExt};

        if let Ok(meta) = std::fs::symlink_metadata(path) {
            if meta.file_type().is_symlink() {
                return Err(format!("{} is a symlink", path.display()));
            }
            let uid = unsafe { libc::geteuid() };
            if meta.uid() != uid {
                return Err(format!(
                    "{} is owned by uid {}, not the daemon user",
                    path.display(),
                    meta.uid()
                ));
            }
        }

        if let Some(parent) = path.parent() {
            if let Ok(meta) = std::fs::metadata(parent) {
                if meta.permissions().mode() & 0o002 != 0 {
                    warn!(
                        dir = %parent.display(),
                        "control socket parent directory is world-writable"
                    );
                }
            }
        }
        Ok(())
    }

    /// Bind the socket (owner-only permissions) and serve connections until
    /// the task is dropped.
    pub async fn run(self: Arc<Self>) -> std::io::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let path = &self.config.socket_path;
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(path)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        info!(path = %path.display(), "control channel listening");

        loop {
            let (stream, _) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                let conn_id = server.next_conn_id.fetch_add(1, Ordering::SeqCst);
                if let Err(e) = handle_connection(server, stream, conn_id).await {
                    debug!(conn_id, error = %e, "control connection ended");
                }
            });
        }
    }

    fn send_to_accepted(&self, envelope: &Envelope) -> Result<(), SinkError> {
        let slot = self.slot.lock().expect("slot lock");
        match &*slot {
            SessionSlot::Accepted(session) => session
                .writer
                .send(envelope.to_line())
                .map_err(|e| SinkError::SendFailed(e.to_string())),
            _ => Err(SinkError::NoClient),
        }
    }
}

impl ApprovalSink for ControlServer {
    fn send_sign_request(
        &self,
        request_id: u64,
        description: String,
        txns_hex: Vec<String>,
    ) -> Result<(), SinkError> {
        self.send_to_accepted(&Envelope::reply(
            Some(request_id),
            Message::SignRequest { description, txns_hex },
        ))
    }
}

// ── Connection handling ──────────────────────────────────────────────────────

type LineReader = tokio::io::Lines<BufReader<tokio::net::unix::OwnedReadHalf>>;

struct Connection {
    conn_id: u64,
    reader: LineReader,
    writer: mpsc::UnboundedSender<String>,
}

impl Connection {
    fn send(&self, envelope: Envelope) {
        let _ = self.writer.send(envelope.to_line());
    }

    async fn next_envelope(&mut self) -> Option<Envelope> {
        loop {
            match self.reader.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match Envelope::parse(&line) {
                        Ok(envelope) => return Some(envelope),
                        Err(e) => {
                            self.send(Envelope::push(Message::Error {
                                message: format!("unparseable message: {e}"),
                            }));
                        }
                    }
                }
                Ok(None) | Err(_) => return None,
            }
        }
    }
}

async fn handle_connection(
    server: Arc<ControlServer>,
    stream: UnixStream,
    conn_id: u64,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<String>();

    // All sends to this client are serialized through one writer task.
    let writer_task = tokio::spawn(async move {
        while let Some(line) = writer_rx.recv().await {
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if write_half.write_all(b"\n").await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let mut conn = Connection {
        conn_id,
        reader: BufReader::new(read_half).lines(),
        writer: writer_tx,
    };

    let admitted = admit(&server, &mut conn).await;
    if admitted {
        run_session(&server, &mut conn).await;
    }

    drop(conn);
    let _ = writer_task.await;
    Ok(())
}

/// Decide whether this connection may proceed to authentication,
/// displacing an accepted predecessor if the new client confirms.
async fn admit(server: &Arc<ControlServer>, conn: &mut Connection) -> bool {
    enum Verdict {
        Proceed,
        Reject,
        Displace,
    }

    let verdict = {
        let mut slot = server.slot.lock().expect("slot lock");
        match &*slot {
            SessionSlot::Empty => {
                *slot = SessionSlot::Pending { conn_id: conn.conn_id };
                Verdict::Proceed
            }
            SessionSlot::Pending { .. } => Verdict::Reject,
            SessionSlot::Accepted(_) => Verdict::Displace,
        }
    };

    match verdict {
        Verdict::Proceed => true,
        Verdict::Reject => {
            debug!(conn_id = conn.conn_id, "rejecting connection: another is mid-auth");
            false
        }
        Verdict::Displace => {
            conn.send(Envelope::push(Message::ClientExists));

            let confirmed = matches!(
                tokio::time::timeout(DISPLACE_TIMEOUT, conn.next_envelope()).await,
                Ok(Some(Envelope { msg: Message::DisplaceConfirm, .. }))
            );
            if !confirmed {
                debug!(conn_id = conn.conn_id, "displacement not confirmed; closing");
                return false;
            }

            let mut slot = server.slot.lock().expect("slot lock");
            match std::mem::replace(&mut *slot, SessionSlot::Empty) {
                SessionSlot::Accepted(old) => {
                    // Exactly one displaced notice; the old session skips
                    // its disconnect cleanup.
                    old.displaced.store(true, Ordering::SeqCst);
                    let _ = old.writer.send(Envelope::push(Message::Displaced).to_line());
                    old.kicked.notify_one();
                    *slot = SessionSlot::Pending { conn_id: conn.conn_id };
                    info!(old = old.conn_id, new = conn.conn_id, "control session displaced");
                    true
                }
                other => {
                    // The accepted session vanished while we negotiated;
                    // put things back and treat this as a plain rejection.
                    *slot = other;
                    false
                }
            }
        }
    }
}

/// Authentication loop followed by the accepted-session message loop.
async fn run_session(server: &Arc<ControlServer>, conn: &mut Connection) {
    let hub = &server.hub;
    let displaced = Arc::new(AtomicBool::new(false));
    let kicked = Arc::new(Notify::new());

    conn.send(Envelope::push(Message::AuthRequired));

    // ── Authenticate ─────────────────────────────────────────────────────────
    let authenticated = loop {
        let Some(envelope) = conn.next_envelope().await else {
            break false;
        };
        match envelope.msg {
            Message::Auth { passphrase } => {
                let pass = SecretBytes::new(passphrase.into_bytes());
                let result = if hub.is_unlocked() {
                    hub.store().verify_passphrase(&pass).map_err(|e| e.to_string())
                } else {
                    hub.unlock(&pass).map(|_| ()).map_err(|e| e.to_string())
                };
                match result {
                    Ok(()) => {
                        conn.send(Envelope::reply(
                            envelope.id,
                            Message::AuthResult { success: true, error: None },
                        ));
                        break true;
                    }
                    Err(error) => {
                        hub.audit().record("auth-failed", audit_fields! {});
                        conn.send(Envelope::reply(
                            envelope.id,
                            Message::AuthResult { success: false, error: Some(error) },
                        ));
                        // Bad passphrases are retryable in-session.
                    }
                }
            }
            _ => conn.send(Envelope::push(Message::Error {
                message: "authentication required".into(),
            })),
        }
    };

    if !authenticated {
        let mut slot = server.slot.lock().expect("slot lock");
        if matches!(&*slot, SessionSlot::Pending { conn_id } if *conn_id == conn.conn_id) {
            *slot = SessionSlot::Empty;
        }
        return;
    }

    // ── Promote to accepted ──────────────────────────────────────────────────
    {
        let mut slot = server.slot.lock().expect("slot lock");
        *slot = SessionSlot::Accepted(AcceptedSession {
            conn_id: conn.conn_id,
            writer: conn.writer.clone(),
            displaced: Arc::clone(&displaced),
            kicked: Arc::clone(&kicked),
        });
    }
    hub.audit().record("session-connected", audit_fields! {});
    conn.send(Envelope::push(Message::Status {
        state: hub.state().as_str().into(),
        key_count: hub.store().key_count(),
    }));

    // Forward hub events as pushes for the lifetime of this session. The
    // stop signal is separate from the displacement notify so the single
    // stored permit always reaches the main loop.
    let push_stop = Arc::new(Notify::new());
    let push_writer = conn.writer.clone();
    let push_stop_rx = Arc::clone(&push_stop);
    let mut events = hub.subscribe();
    let push_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    let message = match event {
                        Ok(HubEvent::KeysChanged { key_count }) => Message::KeysChanged { key_count },
                        Ok(HubEvent::Locked) => Message::SignerLocked,
                        Ok(HubEvent::Unlocked { key_count }) => Message::Status {
                            state: "unlocked".into(),
                            key_count,
                        },
                        Err(_) => break,
                    };
                    if push_writer.send(Envelope::push(message).to_line()).is_err() {
                        break;
                    }
                }
                _ = push_stop_rx.notified() => break,
            }
        }
    });

    // ── Main loop ────────────────────────────────────────────────────────────
    loop {
        let envelope = tokio::select! {
            envelope = conn.next_envelope() => envelope,
            _ = kicked.notified() => None,
        };
        let Some(envelope) = envelope else { break };
        handle_message(server, conn, envelope).await;
    }

    // ── Teardown ─────────────────────────────────────────────────────────────
    push_stop.notify_one();
    let _ = push_task.await;

    {
        let mut slot = server.slot.lock().expect("slot lock");
        if matches!(&*slot, SessionSlot::Accepted(s) if s.conn_id == conn.conn_id) {
            *slot = SessionSlot::Empty;
        }
    }

    if displaced.load(Ordering::SeqCst) {
        // A displaced session performs no disconnect cleanup; its
        // replacement is already mid-authentication.
        debug!(conn_id = conn.conn_id, "displaced session closed");
        return;
    }

    hub.audit().record("session-disconnected", audit_fields! {});
    hub.fail_all_approvals("apadmin disconnected");
    if server.config.lock_on_disconnect {
        hub.lock("control client disconnected");
    }
}

async fn handle_message(server: &Arc<ControlServer>, conn: &Connection, envelope: Envelope) {
    let hub = &server.hub;
    let store = hub.store();
    let id = envelope.id;

    match envelope.msg {
        Message::Unlock { passphrase } => {
            let pass = SecretBytes::new(passphrase.into_bytes());
            let reply = match hub.unlock(&pass) {
                Ok(key_count) => Message::UnlockResult {
                    success: true,
                    key_count: Some(key_count),
                    error: None,
                },
                Err(e) => Message::UnlockResult {
                    success: false,
                    key_count: None,
                    error: Some(e.to_string()),
                },
            };
            conn.send(Envelope::reply(id, reply));
        }

        Message::ListKeys => {
            hub.touch_activity();
            let keys = store
                .list()
                .into_iter()
                .map(|row| KeyRow {
                    address: row.address.encode_string(),
                    key_type: row.key_type,
                    public_key_hex: row.public_key_hex,
                    lsig_size: row.lsig_size,
                })
                .collect();
            conn.send(Envelope::reply(id, Message::KeysList { keys }));
        }

        Message::GenerateKey { key_type, params } => {
            hub.touch_activity();
            let reply = match store.generate(&key_type, &params).await {
                Ok(generated) => Message::GenerateResult {
                    success: true,
                    address: Some(generated.address.encode_string()),
                    mnemonic: generated.mnemonic,
                    error: None,
                },
                Err(e) => Message::GenerateResult {
                    success: false,
                    address: None,
                    mnemonic: None,
                    error: Some(e.to_string()),
                },
            };
            conn.send(Envelope::reply(id, reply));
        }

        Message::DeleteKey { address } => {
            hub.touch_activity();
            let reply = match parse_address(&address)
                .and_then(|a| store.delete(&a).map_err(|e| e.to_string()))
            {
                Ok(()) => Message::DeleteResult { success: true, error: None },
                Err(e) => Message::DeleteResult { success: false, error: Some(e) },
            };
            conn.send(Envelope::reply(id, reply));
        }

        Message::ExportKey { address } => {
            hub.touch_activity();
            conn.send(Envelope::reply(id, export_key(server, &address)));
        }

        Message::ImportKey { key_type, mnemonic, params } => {
            hub.touch_activity();
            let reply = match store.import(&key_type, mnemonic.as_deref(), &params).await {
                Ok(imported) => Message::ImportResult {
                    success: true,
                    address: Some(imported.address.encode_string()),
                    error: None,
                },
                Err(e) => Message::ImportResult {
                    success: false,
                    address: None,
                    error: Some(e.to_string()),
                },
            };
            conn.send(Envelope::reply(id, reply));
        }

        Message::GetKeyDetails { address } => {
            hub.touch_activity();
            let reply = match parse_address(&address)
                .and_then(|a| store.load_record(&a).map_err(|e| e.to_string()))
            {
                Ok(record) => Message::KeyDetails {
                    address,
                    key_type: record.key_type,
                    public_key_hex: hex::encode(&record.public_key),
                    lsig_size: record.lsig_size,
                    params: record.params,
                    teal: record.teal,
                },
                Err(message) => Message::Error { message },
            };
            conn.send(Envelope::reply(id, reply));
        }

        Message::SignResponse { approved, reason } => {
            let Some(request_id) = id else {
                conn.send(Envelope::push(Message::Error {
                    message: "sign_response requires an id".into(),
                }));
                return;
            };
            // Unknown ids (timed out, displaced) are dropped silently.
            hub.resolve_approval(request_id, ApprovalOutcome { approved, reason });
        }

        Message::TokenProvisioningRequest => {
            hub.touch_activity();
            let reply = match &server.provisioner {
                Some(provisioner) => match provisioner.provision() {
                    Ok(token) => {
                        hub.audit().record("token-provisioned", audit_fields! {});
                        Message::TokenProvisioningResponse { token }
                    }
                    Err(message) => Message::Error { message },
                },
                None => Message::Error {
                    message: "token provisioning not available".into(),
                },
            };
            conn.send(Envelope::reply(id, reply));
        }

        Message::DisplaceConfirm => {
            // Only meaningful during the admission handshake.
            conn.send(Envelope::push(Message::Error {
                message: "no displacement in progress".into(),
            }));
        }

        other => {
            debug!(conn_id = conn.conn_id, "unexpected control message");
            conn.send(Envelope::push(Message::Error {
                message: format!("unexpected message: {}", message_type_name(&other)),
            }));
        }
    }
}

fn parse_address(s: &str) -> Result<Address, String> {
    Address::from_string(s).map_err(|e| format!("invalid address: {e}"))
}

fn export_key(server: &Arc<ControlServer>, address: &str) -> Message {
    let fail = |error: String| Message::ExportResult {
        success: false,
        mnemonic: None,
        secret_hex: None,
        error: Some(error),
    };

    let address = match parse_address(address) {
        Ok(a) => a,
        Err(e) => return fail(e),
    };
    let key = match server.hub.store().get(&address) {
        Ok(k) => k,
        Err(e) => return fail(e.to_string()),
    };
    let Some(secret) = key.secret else {
        return fail("key type has no exportable secret".into());
    };

    let scheme = server
        .hub
        .store()
        .registry()
        .get(&key.key_type)
        .map(|p| p.mnemonic_scheme().words)
        .unwrap_or(0);

    if scheme > 0 && secret.len() == 32 {
        let phrase = secret.with_bytes(|b| {
            aplane_crypto::mnemonic::encode(b.try_into().expect("32-byte secret"))
        });
        Message::ExportResult {
            success: true,
            mnemonic: Some(phrase),
            secret_hex: None,
            error: None,
        }
    } else {
        Message::ExportResult {
            success: true,
            mnemonic: None,
            secret_hex: Some(secret.with_bytes(|b| hex::encode(b))),
            error: None,
        }
    }
}

fn message_type_name(msg: &Message) -> &'static str {
    match msg {
        Message::AuthRequired => "auth_required",
        Message::Auth { .. } => "auth",
        Message::AuthResult { .. } => "auth_result",
        Message::Status { .. } => "status",
        Message::Unlock { .. } => "unlock",
        Message::UnlockResult { .. } => "unlock_result",
        Message::ListKeys => "list_keys",
        Message::KeysList { .. } => "keys_list",
        Message::GenerateKey { .. } => "generate_key",
        Message::GenerateResult { .. } => "generate_result",
        Message::DeleteKey { .. } => "delete_key",
        Message::DeleteResult { .. } => "delete_result",
        Message::ExportKey { .. } => "export_key",
        Message::ExportResult { .. } => "export_result",
        Message::ImportKey { .. } => "import_key",
        Message::ImportResult { .. } => "import_result",
        Message::GetKeyDetails { .. } => "get_key_details",
        Message::KeyDetails { .. } => "key_details",
        Message::SignRequest { .. } => "sign_request",
        Message::SignResponse { .. } => "sign_response",
        Message::TokenProvisioningRequest => "token_provisioning_request",
        Message::TokenProvisioningResponse { .. } => "token_provisioning_response",
        Message::KeysChanged { .. } => "keys_changed",
        Message::SignerLocked => "signer_locked",
        Message::ClientExists => "client_exists",
        Message::DisplaceConfirm => "displace_confirm",
        Message::Displaced => "displaced",
        Message::Error { .. } => "error",
    }
}
