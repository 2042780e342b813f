//! aplaned — the aplane signing daemon.
//!
//! Startup sequence:
//!   1. Load and validate the configuration
//!   2. Apply memory protection when required (no core dumps, mlockall)
//!   3. Build the crypto provider registry and open the key store
//!   4. Load (or mint) the API bearer token and the audit log
//!   5. Start the control-channel server and the key-directory watcher
//!   6. Optionally unlock from a headless passphrase source
//!   7. Serve the request API until SIGINT/SIGTERM

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};

use aplane_api::{ApiState, BearerAuth};
use aplane_control::{ControlConfig, ControlServer, TokenProvisioner};
use aplane_crypto::{ProviderRegistry, SecretBytes};
use aplane_signer::approval::ApprovalConfig;
use aplane_signer::{audit_fields, AuditLog, SignerHub, APPROVAL_TIMEOUT};
use aplane_store::{AlgodClient, KeyStore};

use crate::config::{expand_tilde, Config};

#[derive(Parser, Debug)]
#[command(name = "aplaned", version, about = "aplane key-custody signing daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "~/.aplane/aplane.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,aplane=debug".parse().expect("valid filter")),
        )
        .init();

    let args = Args::parse();
    info!("aplane daemon starting");

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = expand_tilde(&args.config);
    let config = if config_path.exists() {
        Config::load(&config_path)?
    } else {
        info!(path = %config_path.display(), "no config file; using defaults");
        Config::default()
    };

    // ── Memory protection ─────────────────────────────────────────────────────
    if config.require_memory_protection {
        apply_memory_protection().context("memory protection required but unavailable")?;
        info!("memory protection active: core dumps off, pages locked");
    }

    // ── Store, providers, audit ───────────────────────────────────────────────
    let registry = Arc::new(ProviderRegistry::with_default_providers());
    let algod = match (&config.teal_compiler_algod_url, &config.teal_compiler_algod_token) {
        (Some(url), Some(token)) => Some(AlgodClient::new(url, token)),
        _ => None,
    };

    let store = Arc::new(KeyStore::new(
        expand_tilde(&config.store),
        &config.identity,
        Arc::clone(&registry),
        algod.clone(),
    ));
    store.ensure_layout().context("creating store layout")?;
    let initial_keys = store.scan().context("initial key scan")?;
    info!(keys = initial_keys, identity = %config.identity, "key store opened");

    let data_dir = expand_tilde(&config.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let audit = Arc::new(AuditLog::new(data_dir.join("audit.log")));
    audit.record(
        "server-start",
        audit_fields! { "identity": config.identity, "keys": initial_keys },
    );

    let hub = SignerHub::new(
        Arc::clone(&store),
        Arc::clone(&audit),
        Duration::from_secs(config.passphrase_timeout),
    );

    // ── API token ─────────────────────────────────────────────────────────────
    let auth = Arc::new(BearerAuth::new(load_or_mint_token(&store)?));

    // ── Control channel ───────────────────────────────────────────────────────
    let ipc_path = expand_tilde(&config.ipc_path);
    ControlServer::validate_socket_path(&ipc_path)
        .map_err(|e| anyhow::anyhow!("control socket path rejected: {e}"))?;

    let provisioner = Arc::new(FileTokenProvisioner {
        auth: Arc::clone(&auth),
        token_path: store.token_path(),
    });
    let control = ControlServer::new(
        Arc::clone(&hub),
        ControlConfig {
            socket_path: ipc_path,
            lock_on_disconnect: config.lock_on_disconnect,
        },
        Some(provisioner),
    );
    tokio::spawn(Arc::clone(&control).run());

    // ── Key-directory watcher ─────────────────────────────────────────────────
    let watcher_hub = Arc::clone(&hub);
    let _watcher = aplane_store::watcher::spawn(Arc::clone(&store), move |count| {
        watcher_hub.notify_keys_changed(count);
    })
    .context("starting key watcher")?;

    // ── Headless passphrase source ────────────────────────────────────────────
    if let Some(argv) = &config.passphrase_command_argv {
        let pass = run_passphrase_command(argv)?;
        if !store.metadata_exists() {
            info!("first run: creating keystore metadata");
            store.create_metadata(&pass).context("creating keystore metadata")?;
        }
        let count = hub
            .unlock(&pass)
            .map_err(|e| anyhow::anyhow!("headless unlock failed: {e}"))?;
        info!(keys = count, "unlocked from passphrase command");
    }

    // ── Fee floor ─────────────────────────────────────────────────────────────
    let min_fee = match &algod {
        Some(client) => match client.suggested_params().await {
            Ok(params) => params.min_fee,
            Err(e) => {
                warn!(error = %e, "node unavailable for suggested params; using fallback fee");
                aplane_core::constants::MIN_FEE_FALLBACK
            }
        },
        None => aplane_core::constants::MIN_FEE_FALLBACK,
    };

    // ── Request API ───────────────────────────────────────────────────────────
    let state = Arc::new(ApiState {
        hub: Arc::clone(&hub),
        sink: control,
        auth,
        policy: config.policy.clone(),
        approval: ApprovalConfig {
            txn_auto_approve: config.txn_auto_approve,
            group_auto_approve: config.group_auto_approve,
        },
        allow_group_modification: config.allow_group_modification,
        min_fee,
        approval_timeout: APPROVAL_TIMEOUT,
    });

    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], config.signer_port));
    let (drain_tx, drain_rx) = tokio::sync::oneshot::channel::<()>();
    let mut server = tokio::spawn(aplane_api::server::serve(state, addr, async move {
        let _ = drain_rx.await;
    }));

    tokio::select! {
        joined = &mut server => {
            joined.context("api server task")??;
            bail!("request API exited unexpectedly");
        }
        _ = shutdown_signal() => {
            let _ = drain_tx.send(());
            // Drain in-flight requests within the shutdown budget.
            match tokio::time::timeout(Duration::from_secs(5), &mut server).await {
                Ok(joined) => joined.context("api server task")??,
                Err(_) => {
                    warn!("shutdown budget exceeded; aborting open connections");
                    server.abort();
                }
            }
        }
    }

    hub.lock("shutdown");
    audit.record("server-stop", audit_fields! { "identity": config.identity });
    info!("aplane daemon stopped");
    Ok(())
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm.recv() => {},
    }
    info!("shutdown signal received");
}

/// Load the per-identity API token, minting and persisting a fresh one on
/// first run.
fn load_or_mint_token(store: &KeyStore) -> anyhow::Result<String> {
    let path = store.token_path();
    if path.exists() {
        let token = std::fs::read_to_string(&path)
            .with_context(|| format!("reading token {}", path.display()))?;
        return Ok(token.trim().to_string());
    }

    let fresh: [u8; 32] = rand::random();
    let token = hex::encode(fresh);
    write_token_file(&path, &token)?;
    info!(path = %path.display(), "minted new API token");
    Ok(token)
}

fn write_token_file(path: &std::path::Path, token: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("token.tmp");
    std::fs::write(&tmp, token)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Rotates the in-memory token and rewrites the token file; wired into the
/// control channel's token-provisioning message.
struct FileTokenProvisioner {
    auth: Arc<BearerAuth>,
    token_path: PathBuf,
}

impl TokenProvisioner for FileTokenProvisioner {
    fn provision(&self) -> Result<String, String> {
        let token = self.auth.rotate();
        write_token_file(&self.token_path, &token).map_err(|e| e.to_string())?;
        Ok(token)
    }
}

/// Disable core dumps and lock the process address space.
fn apply_memory_protection() -> anyhow::Result<()> {
    let no_core = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
    if unsafe { libc::setrlimit(libc::RLIMIT_CORE, &no_core) } != 0 {
        bail!("setrlimit(RLIMIT_CORE, 0) failed: {}", std::io::Error::last_os_error());
    }
    if unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) } != 0 {
        bail!("mlockall failed: {}", std::io::Error::last_os_error());
    }
    Ok(())
}

/// Run the configured passphrase command and read the passphrase from its
/// stdout (trailing newline stripped).
fn run_passphrase_command(argv: &[String]) -> anyhow::Result<SecretBytes> {
    let output = std::process::Command::new(&argv[0])
        .args(&argv[1..])
        .output()
        .with_context(|| format!("running passphrase command {:?}", argv[0]))?;
    if !output.status.success() {
        bail!("passphrase command exited with {}", output.status);
    }
    let mut bytes = output.stdout;
    while bytes.last() == Some(&b'\n') || bytes.last() == Some(&b'\r') {
        bytes.pop();
    }
    if bytes.is_empty() {
        bail!("passphrase command produced no output");
    }
    Ok(SecretBytes::new(bytes))
}
