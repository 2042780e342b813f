//! Control-channel session tests: authentication, displacement and the
//! disconnect policy, driven over a real Unix socket.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use aplane_control::{ControlConfig, ControlServer, Envelope, Message};
use aplane_crypto::{ProviderRegistry, SecretBytes};
use aplane_signer::approval::ApprovalSink;
use aplane_signer::{AuditLog, SignerHub};
use aplane_store::KeyStore;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::UnixStream;

const PASS: &[u8] = b"control test pass";

struct Fixture {
    _dir: tempfile::TempDir,
    hub: Arc<SignerHub>,
    server: Arc<ControlServer>,
    socket: PathBuf,
}

async fn fixture(lock_on_disconnect: bool) -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = Arc::new(ProviderRegistry::with_default_providers());
    let store = Arc::new(KeyStore::new(dir.path(), "default", registry, None));
    store.ensure_layout().expect("layout");
    store
        .create_metadata(&SecretBytes::from(PASS))
        .expect("metadata");

    let hub = SignerHub::new(store, Arc::new(AuditLog::disabled()), Duration::ZERO);
    let socket = dir.path().join("aplane.sock");
    let server = ControlServer::new(
        Arc::clone(&hub),
        ControlConfig {
            socket_path: socket.clone(),
            lock_on_disconnect,
        },
        None,
    );
    tokio::spawn(Arc::clone(&server).run());

    // Wait for the listener to come up.
    for _ in 0..100 {
        if socket.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    Fixture { _dir: dir, hub, server, socket }
}

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl Client {
    async fn connect(socket: &Path) -> Self {
        let stream = UnixStream::connect(socket).await.expect("connect");
        let (read, writer) = stream.into_split();
        Self {
            lines: BufReader::new(read).lines(),
            writer,
        }
    }

    async fn recv(&mut self) -> Envelope {
        let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("read timed out")
            .expect("read")
            .expect("connection closed");
        Envelope::parse(&line).expect("parse message")
    }

    /// Read until the connection closes; panics on timeout.
    async fn recv_eof(&mut self) {
        let result = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("eof timed out")
            .expect("read");
        assert!(result.is_none(), "expected EOF, got {result:?}");
    }

    async fn send(&mut self, envelope: Envelope) {
        let mut line = envelope.to_line();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.expect("send");
    }

    async fn authenticate(&mut self) {
        let hello = self.recv().await;
        assert!(matches!(hello.msg, Message::AuthRequired));

        self.send(Envelope::reply(
            Some(1),
            Message::Auth {
                passphrase: String::from_utf8(PASS.to_vec()).expect("utf8"),
            },
        ))
        .await;

        let result = self.recv().await;
        match result.msg {
            Message::AuthResult { success, error } => {
                assert!(success, "auth failed: {error:?}")
            }
            other => panic!("expected auth_result, got {other:?}"),
        }

        let status = self.recv().await;
        assert!(matches!(status.msg, Message::Status { .. }));
    }
}

#[tokio::test]
async fn authenticate_and_list_keys() {
    let fx = fixture(false).await;
    let mut client = Client::connect(&fx.socket).await;
    client.authenticate().await;
    assert!(fx.hub.is_unlocked(), "auth against a locked hub unlocks it");

    client
        .send(Envelope::reply(Some(2), Message::ListKeys))
        .await;
    let reply = client.recv().await;
    assert_eq!(reply.id, Some(2));
    match reply.msg {
        Message::KeysList { keys } => assert!(keys.is_empty()),
        other => panic!("expected keys_list, got {other:?}"),
    }
}

#[tokio::test]
async fn bad_passphrase_is_retryable_in_session() {
    let fx = fixture(false).await;
    let mut client = Client::connect(&fx.socket).await;

    let hello = client.recv().await;
    assert!(matches!(hello.msg, Message::AuthRequired));

    client
        .send(Envelope::reply(
            Some(1),
            Message::Auth { passphrase: "wrong".into() },
        ))
        .await;
    let result = client.recv().await;
    assert!(matches!(
        result.msg,
        Message::AuthResult { success: false, .. }
    ));
    assert!(!fx.hub.is_unlocked());

    // Same connection, correct passphrase.
    client
        .send(Envelope::reply(
            Some(2),
            Message::Auth {
                passphrase: String::from_utf8(PASS.to_vec()).expect("utf8"),
            },
        ))
        .await;
    let result = client.recv().await;
    assert!(matches!(
        result.msg,
        Message::AuthResult { success: true, .. }
    ));
}

// S6: the accepted session is displaced by a confirming newcomer; exactly
// one `displaced` notice, and none of the disconnect cleanup runs.
#[tokio::test]
async fn displacement_handshake() {
    let fx = fixture(true).await;

    let mut first = Client::connect(&fx.socket).await;
    first.authenticate().await;

    // An approval in flight across the displacement must survive.
    let (_approval_id, approval_rx) = fx.hub.register_approval();

    let mut second = Client::connect(&fx.socket).await;
    let offer = second.recv().await;
    assert!(matches!(offer.msg, Message::ClientExists));
    second.send(Envelope::push(Message::DisplaceConfirm)).await;

    // The old session gets exactly one displaced notice, then EOF.
    let notice = first.recv().await;
    assert!(matches!(notice.msg, Message::Displaced));
    first.recv_eof().await;

    // The newcomer proceeds to authentication and becomes accepted.
    let hello = second.recv().await;
    assert!(matches!(hello.msg, Message::AuthRequired));

    // Displaced teardown skips disconnect cleanup: the approval is still
    // pending and lock_on_disconnect did not fire.
    assert_eq!(fx.hub.pending_approval_count(), 1);
    assert!(fx.hub.is_unlocked());
    drop(approval_rx);
}

#[tokio::test]
async fn unconfirmed_displacement_closes_newcomer() {
    let fx = fixture(false).await;

    let mut first = Client::connect(&fx.socket).await;
    first.authenticate().await;

    let mut second = Client::connect(&fx.socket).await;
    let offer = second.recv().await;
    assert!(matches!(offer.msg, Message::ClientExists));
    // Answer with something that is not displace_confirm.
    second
        .send(Envelope::push(Message::ListKeys))
        .await;
    second.recv_eof().await;

    // The original session is untouched.
    first
        .send(Envelope::reply(Some(9), Message::ListKeys))
        .await;
    let reply = first.recv().await;
    assert!(matches!(reply.msg, Message::KeysList { .. }));
}

#[tokio::test]
async fn disconnect_fails_approvals_and_locks() {
    let fx = fixture(true).await;

    let mut client = Client::connect(&fx.socket).await;
    client.authenticate().await;
    assert!(fx.hub.is_unlocked());

    let (_id, approval_rx) = fx.hub.register_approval();
    drop(client);

    let outcome = tokio::time::timeout(Duration::from_secs(5), approval_rx)
        .await
        .expect("cleanup ran")
        .expect("outcome delivered");
    assert!(!outcome.approved);
    assert_eq!(outcome.reason.as_deref(), Some("apadmin disconnected"));

    // lock_on_disconnect kicked in.
    for _ in 0..100 {
        if !fx.hub.is_unlocked() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!fx.hub.is_unlocked());
}

#[tokio::test]
async fn sign_request_round_trip() {
    let fx = fixture(false).await;
    let mut client = Client::connect(&fx.socket).await;
    client.authenticate().await;

    let (id, approval_rx) = fx.hub.register_approval();
    fx.server
        .send_sign_request(id, "1 transaction(s)".into(), vec!["deadbeef".into()])
        .expect("client connected");

    let request = client.recv().await;
    assert_eq!(request.id, Some(id));
    match &request.msg {
        Message::SignRequest { description, txns_hex } => {
            assert_eq!(description, "1 transaction(s)");
            assert_eq!(txns_hex.len(), 1);
        }
        other => panic!("expected sign_request, got {other:?}"),
    }

    client
        .send(Envelope::reply(
            Some(id),
            Message::SignResponse { approved: true, reason: None },
        ))
        .await;

    let outcome = tokio::time::timeout(Duration::from_secs(5), approval_rx)
        .await
        .expect("response arrived")
        .expect("outcome delivered");
    assert!(outcome.approved);
}

#[tokio::test]
async fn no_client_means_no_sink() {
    let fx = fixture(false).await;
    let err = fx
        .server
        .send_sign_request(1, "desc".into(), vec![])
        .expect_err("nobody connected");
    assert!(matches!(err, aplane_signer::SinkError::NoClient));
}

#[tokio::test]
async fn second_pending_connection_is_rejected() {
    let fx = fixture(false).await;

    // First connection stays mid-auth (never answers).
    let mut first = Client::connect(&fx.socket).await;
    let hello = first.recv().await;
    assert!(matches!(hello.msg, Message::AuthRequired));

    // Second connection is closed outright.
    let mut second = Client::connect(&fx.socket).await;
    second.recv_eof().await;
}

#[tokio::test]
async fn socket_path_validation_rejects_symlink() {
    let dir = tempfile::tempdir().expect("tempdir");
    let target = dir.path().join("real.sock");
    std::fs::write(&target, b"").expect("target");
    let link = dir.path().join("link.sock");
    std::os::unix::fs::symlink(&target, &link).expect("symlink");

    assert!(ControlServer::validate_socket_path(&link).is_err());
    assert!(ControlServer::validate_socket_path(&target).is_ok());
    assert!(ControlServer::validate_socket_path(&dir.path().join("missing.sock")).is_ok());
}
