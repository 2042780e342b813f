//! JSON request/response shapes for the request API.

use aplane_crypto::{ArgSpec, ParamMap, ParamSpec};
use aplane_signer::planner::MutationReport;
use aplane_signer::RawRequestEntry;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize)]
pub struct SignRequest {
    pub txns: Vec<RawRequestEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlanResponse {
    /// Final transaction list, canonical unsigned encoding, hex.
    pub txns: Vec<String>,
    pub mutations: Option<MutationReport>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignResponse {
    /// Signed transactions, index-aligned with the final list; foreign
    /// slots are empty strings.
    pub txns: Vec<String>,
    pub mutations: Option<MutationReport>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ArgSpecDto {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub ty: String,
}

impl From<&ArgSpec> for ArgSpecDto {
    fn from(spec: &ArgSpec) -> Self {
        Self {
            name: spec.name.into(),
            label: spec.label.into(),
            ty: spec.ty.as_str().into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ParamSpecDto {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
}

impl From<&ParamSpec> for ParamSpecDto {
    fn from(spec: &ParamSpec) -> Self {
        Self {
            name: spec.name.into(),
            label: spec.label.into(),
            ty: spec.ty.as_str().into(),
            required: spec.required,
            example: spec.example.map(Into::into),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KeyInfo {
    pub address: String,
    pub key_type: String,
    pub public_key_hex: String,
    pub lsig_size: u64,
    pub is_template: bool,
    pub runtime_args: Vec<ArgSpecDto>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KeyListResponse {
    pub checksum: String,
    pub keys: Vec<KeyInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KeyTypeInfo {
    pub key_type: String,
    pub family: String,
    pub mnemonic_words: usize,
    pub mnemonic_wordlist: String,
    pub creation_params: Vec<ParamSpecDto>,
    pub runtime_args: Vec<ArgSpecDto>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KeyTypesResponse {
    pub key_types: Vec<KeyTypeInfo>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GenerateRequest {
    pub key_type: String,
    #[serde(default)]
    pub params: ParamMap,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mnemonic: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub address: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub state: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
