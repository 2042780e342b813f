//! Minimal algod REST client: TEAL compilation for template key
//! generation, plus suggested params for the fee floor.

use data_encoding::BASE64;
use serde::Deserialize;

use crate::error::StoreError;

#[derive(Clone)]
pub struct AlgodClient {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

/// Result of compiling TEAL source on the node.
#[derive(Debug)]
pub struct CompiledProgram {
    pub bytecode: Vec<u8>,
    /// Address the node derived from the program hash.
    pub address: String,
}

#[derive(Debug, Deserialize)]
struct CompileResponse {
    hash: String,
    result: String,
}

#[derive(Debug, Deserialize)]
pub struct SuggestedParams {
    #[serde(rename = "min-fee")]
    pub min_fee: u64,
    #[serde(rename = "last-round")]
    pub last_round: u64,
    #[serde(rename = "genesis-id")]
    pub genesis_id: String,
    #[serde(rename = "genesis-hash")]
    pub genesis_hash: String,
}

impl AlgodClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Compile TEAL source into bytecode via `POST /v2/teal/compile`.
    pub async fn compile_teal(&self, source: &str) -> Result<CompiledProgram, StoreError> {
        let url = format!("{}/v2/teal/compile", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("X-Algo-API-Token", &self.token)
            .header("Content-Type", "text/plain")
            .body(source.to_string())
            .send()
            .await
            .map_err(|e| StoreError::NodeUnreachable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::CompileFailed(format!("{status}: {body}")));
        }

        let compiled: CompileResponse = response
            .json()
            .await
            .map_err(|e| StoreError::CompileFailed(e.to_string()))?;
        let bytecode = BASE64
            .decode(compiled.result.as_bytes())
            .map_err(|e| StoreError::CompileFailed(format!("bytecode base64: {e}")))?;

        Ok(CompiledProgram { bytecode, address: compiled.hash })
    }

    /// Fetch the node's suggested transaction parameters.
    pub async fn suggested_params(&self) -> Result<SuggestedParams, StoreError> {
        let url = format!("{}/v2/transactions/params", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("X-Algo-API-Token", &self.token)
            .send()
            .await
            .map_err(|e| StoreError::NodeUnreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StoreError::NodeUnreachable(format!(
                "params returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| StoreError::NodeUnreachable(e.to_string()))
    }
}
