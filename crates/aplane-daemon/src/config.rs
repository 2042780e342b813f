//! Daemon configuration: a TOML file plus startup validation.

use std::path::{Path, PathBuf};

use aplane_signer::PolicyConfig;
use anyhow::{bail, Context};
use serde::Deserialize;

fn default_identity() -> String {
    "default".into()
}

fn default_signer_port() -> u16 {
    7833
}

fn default_home(file: &str) -> PathBuf {
    expand_tilde(Path::new(&format!("~/.aplane/{file}")))
}

fn default_ipc_path() -> PathBuf {
    default_home("aplane.sock")
}

fn default_store() -> PathBuf {
    default_home("store")
}

fn default_data_dir() -> PathBuf {
    default_home("")
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_identity")]
    pub identity: String,

    /// HTTP listen port for the request API.
    #[serde(default = "default_signer_port")]
    pub signer_port: u16,

    /// Control socket path.
    #[serde(default = "default_ipc_path")]
    pub ipc_path: PathBuf,

    /// Store directory (keystore metadata + users/).
    #[serde(default = "default_store")]
    pub store: PathBuf,

    /// Directory for the audit log.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Inactivity auto-lock interval in seconds; 0 disables it.
    #[serde(default)]
    pub passphrase_timeout: u64,

    #[serde(default)]
    pub lock_on_disconnect: bool,

    #[serde(default)]
    pub txn_auto_approve: bool,

    #[serde(default)]
    pub group_auto_approve: bool,

    /// Allow dummy-induced group-id recomputation of pre-grouped requests.
    #[serde(default)]
    pub allow_group_modification: bool,

    /// Refuse to start unless core dumps are disabled and memory is locked.
    #[serde(default)]
    pub require_memory_protection: bool,

    #[serde(default)]
    pub teal_compiler_algod_url: Option<String>,

    #[serde(default)]
    pub teal_compiler_algod_token: Option<String>,

    /// Headless passphrase source: argv of a command whose stdout is the
    /// passphrase.
    #[serde(default)]
    pub passphrase_command_argv: Option<Vec<String>>,

    #[serde(default)]
    pub policy: PolicyConfig,
}

impl Default for Config {
    fn default() -> Self {
        // An empty document picks up every serde default.
        toml::from_str("").expect("empty config parses")
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Startup validation of conflicting settings.
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(argv) = &self.passphrase_command_argv {
            if self.lock_on_disconnect {
                bail!("passphrase_command_argv conflicts with lock_on_disconnect = true");
            }
            if self.passphrase_timeout != 0 {
                bail!("passphrase_command_argv conflicts with a nonzero passphrase_timeout");
            }
            if argv.is_empty() {
                bail!("passphrase_command_argv must not be empty");
            }
        }
        if self.teal_compiler_algod_url.is_some() != self.teal_compiler_algod_token.is_some() {
            bail!("teal_compiler_algod_url and teal_compiler_algod_token must be set together");
        }
        Ok(())
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
