//! The authenticated HTTP request API.
//!
//! One task per request; every endpoint except `/health` checks the
//! `aplane-token` bearer header. Errors map onto HTTP statuses via the
//! shared error kind.

use std::sync::Arc;
use std::time::Duration;

use aplane_core::Error;
use aplane_signer::approval::{request_approval, ApprovalConfig, ApprovalSink};
use aplane_signer::planner::{plan, PlannerContext};
use aplane_signer::{dispatch, lint_plan, PolicyConfig, SignerHub};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use tracing::{debug, info};

use crate::auth::BearerAuth;
use crate::types::{
    DeleteQuery, ErrorBody, GenerateRequest, GenerateResponse, HealthResponse, KeyInfo,
    KeyListResponse, KeyTypeInfo, KeyTypesResponse, PlanResponse, SignRequest, SignResponse,
};

pub const KEYS_CHECKSUM_HEADER: &str = "x-keys-checksum";

pub struct ApiState {
    pub hub: Arc<SignerHub>,
    pub sink: Arc<dyn ApprovalSink>,
    pub auth: Arc<BearerAuth>,
    pub policy: PolicyConfig,
    pub approval: ApprovalConfig,
    pub allow_group_modification: bool,
    pub min_fee: u64,
    pub approval_timeout: Duration,
}

/// Error wrapper so handlers can use `?` on the shared error kind.
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

fn authorize(state: &ApiState, headers: &HeaderMap) -> Result<(), ApiError> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    state.auth.verify(header).map_err(ApiError)
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/plan", post(plan_handler))
        .route("/sign", post(sign_handler))
        .route("/keys", get(keys_handler))
        .route("/keytypes", get(keytypes_handler))
        .route("/admin/generate", post(generate_handler))
        .route("/admin/keys", delete(delete_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Bind and serve until the daemon shuts the listener down.
pub async fn serve(
    state: Arc<ApiState>,
    addr: std::net::SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "request API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn plan_handler(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(request): Json<SignRequest>,
) -> Result<Json<PlanResponse>, ApiError> {
    authorize(&state, &headers)?;

    let snapshot = state.hub.store().snapshot();
    let ctx = PlannerContext {
        indexes: &snapshot,
        min_fee: state.min_fee,
        allow_group_modification: state.allow_group_modification,
        require_signable: false,
    };
    let plan = plan(&request.txns, &ctx)?;

    Ok(Json(PlanResponse {
        txns: plan
            .txns
            .iter()
            .map(|p| hex::encode(p.txn.canonical_bytes()))
            .collect(),
        mutations: plan.mutations,
    }))
}

async fn sign_handler(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(request): Json<SignRequest>,
) -> Result<Json<SignResponse>, ApiError> {
    authorize(&state, &headers)?;

    let audit = Arc::clone(state.hub.audit());
    audit.record(
        "sign-request",
        aplane_signer::audit_fields! { "txn_count": request.txns.len() },
    );

    state.hub.require_unlocked()?;
    state.hub.touch_activity();

    // Snapshot once; planning, lint and approval see one key set.
    let snapshot = state.hub.store().snapshot();
    let ctx = PlannerContext {
        indexes: &snapshot,
        min_fee: state.min_fee,
        allow_group_modification: state.allow_group_modification,
        require_signable: true,
    };
    let plan = plan(&request.txns, &ctx)?;

    lint_plan(&state.policy, &plan).map_err(|e| {
        audit.record(
            "sign-rejected",
            aplane_signer::audit_fields! { "reason": e.to_string(), "by": "policy" },
        );
        ApiError(e)
    })?;

    let asked_operator = request_approval(
        &state.hub,
        state.sink.as_ref(),
        &plan,
        &state.approval,
        state.approval_timeout,
    )
    .await
    .map_err(|e| {
        audit.record(
            "sign-rejected",
            aplane_signer::audit_fields! { "reason": e.to_string(), "by": "operator" },
        );
        ApiError(e)
    })?;
    audit.record(
        "sign-approved",
        aplane_signer::audit_fields! { "auto": !asked_operator, "txn_count": plan.txns.len() },
    );

    let signed = dispatch(&plan, state.hub.session(), state.hub.store().registry()).map_err(
        |e| {
            audit.record(
                "sign-failed",
                aplane_signer::audit_fields! { "reason": e.to_string() },
            );
            ApiError(e)
        },
    )?;

    debug!(count = signed.len(), "sign request complete");
    Ok(Json(SignResponse { txns: signed, mutations: plan.mutations }))
}

async fn keys_handler(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    authorize(&state, &headers)?;
    state.hub.touch_activity();

    let store = state.hub.store();
    let checksum = store.checksum();
    let checksum_header = (
        HeaderName::from_static(KEYS_CHECKSUM_HEADER),
        checksum.clone(),
    );

    // Conditional listing: a matching client checksum means the address
    // set is unchanged and the body can be skipped.
    if let Some(client) = headers
        .get(KEYS_CHECKSUM_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        if client == checksum {
            return Ok((StatusCode::NOT_MODIFIED, [checksum_header]).into_response());
        }
    }

    let registry = store.registry();
    let keys = store
        .list()
        .into_iter()
        .map(|row| {
            let runtime_args = registry
                .get(&row.key_type)
                .map(|p| p.runtime_args().iter().map(Into::into).collect())
                .unwrap_or_default();
            KeyInfo {
                address: row.address.encode_string(),
                is_template: registry.is_generic_template(&row.key_type),
                key_type: row.key_type,
                public_key_hex: row.public_key_hex,
                lsig_size: row.lsig_size,
                runtime_args,
            }
        })
        .collect();

    Ok((
        StatusCode::OK,
        [checksum_header],
        Json(KeyListResponse { checksum, keys }),
    )
        .into_response())
}

async fn keytypes_handler(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Json<KeyTypesResponse>, ApiError> {
    authorize(&state, &headers)?;

    let registry = state.hub.store().registry();
    let key_types = registry
        .enumerate()
        .into_iter()
        .filter_map(|label| registry.get(label).ok())
        .map(|provider| {
            let scheme = provider.mnemonic_scheme();
            KeyTypeInfo {
                key_type: provider.type_label().into(),
                family: provider.family().as_str().into(),
                mnemonic_words: scheme.words,
                mnemonic_wordlist: scheme.wordlist.into(),
                creation_params: provider.creation_params().iter().map(Into::into).collect(),
                runtime_args: provider.runtime_args().iter().map(Into::into).collect(),
            }
        })
        .collect();

    Ok(Json(KeyTypesResponse { key_types }))
}

async fn generate_handler(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    authorize(&state, &headers)?;
    state.hub.touch_activity();

    let generated = state
        .hub
        .store()
        .generate(&request.key_type, &request.params)
        .await
        .map_err(Error::from)?;

    Ok(Json(GenerateResponse {
        address: generated.address.encode_string(),
        mnemonic: generated.mnemonic,
    }))
}

async fn delete_handler(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    authorize(&state, &headers)?;
    state.hub.touch_activity();

    let address = aplane_core::Address::from_string(&query.address)
        .map_err(|e| Error::bad_request(format!("address: {e}")))?;
    state.hub.store().delete(&address).map_err(Error::from)?;

    Ok(Json(serde_json::json!({ "deleted": query.address })))
}

async fn health_handler(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        state: state.hub.state().as_str().into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}
