//! Control-channel message vocabulary.
//!
//! One UTF-8 JSON object per line. Every message shares the base shape
//! `{type, id?}`; request/response pairs correlate by `id`, server pushes
//! carry none.

use aplane_crypto::ParamMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    #[serde(flatten)]
    pub msg: Message,
}

impl Envelope {
    pub fn push(msg: Message) -> Self {
        Self { id: None, msg }
    }

    pub fn reply(id: Option<u64>, msg: Message) -> Self {
        Self { id, msg }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).expect("control message serializes")
    }

    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    // ── Authentication ───────────────────────────────────────────────────────
    AuthRequired,
    Auth {
        passphrase: String,
    },
    AuthResult {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Status {
        state: String,
        key_count: usize,
    },

    // ── Lifecycle ────────────────────────────────────────────────────────────
    Unlock {
        passphrase: String,
    },
    UnlockResult {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key_count: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    // ── Key CRUD ─────────────────────────────────────────────────────────────
    ListKeys,
    KeysList {
        keys: Vec<KeyRow>,
    },
    GenerateKey {
        key_type: String,
        #[serde(default)]
        params: ParamMap,
    },
    GenerateResult {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        address: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mnemonic: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    DeleteKey {
        address: String,
    },
    DeleteResult {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ExportKey {
        address: String,
    },
    ExportResult {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mnemonic: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret_hex: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ImportKey {
        key_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mnemonic: Option<String>,
        #[serde(default)]
        params: ParamMap,
    },
    ImportResult {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        address: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    GetKeyDetails {
        address: String,
    },
    KeyDetails {
        address: String,
        key_type: String,
        public_key_hex: String,
        lsig_size: u64,
        #[serde(default)]
        params: ParamMap,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        teal: Option<String>,
    },

    // ── Sign approvals (daemon → client, then back) ──────────────────────────
    SignRequest {
        description: String,
        txns_hex: Vec<String>,
    },
    SignResponse {
        approved: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    // ── Token provisioning ───────────────────────────────────────────────────
    TokenProvisioningRequest,
    TokenProvisioningResponse {
        token: String,
    },

    // ── Server pushes ────────────────────────────────────────────────────────
    KeysChanged {
        key_count: usize,
    },
    SignerLocked,

    // ── Displacement ─────────────────────────────────────────────────────────
    ClientExists,
    DisplaceConfirm,
    Displaced,

    // ── Errors ───────────────────────────────────────────────────────────────
    Error {
        message: String,
    },
}

/// One row of a `keys_list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRow {
    pub address: String,
    pub key_type: String,
    pub public_key_hex: String,
    pub lsig_size: u64,
}
