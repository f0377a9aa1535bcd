//! # REST + WebSocket API
//!
//! Builds the axum router that exposes the registry node's HTTP interface.
//! All endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                         | Description                          |
//! |--------|------------------------------|--------------------------------------|
//! | GET    | `/health`                    | Liveness probe                       |
//! | GET    | `/status`                    | Node and registry summary            |
//! | GET    | `/deployment`                | Deployment record                    |
//! | POST   | `/transactions`              | Submit a signed transaction          |
//! | GET    | `/transactions/:hash`        | Receipt by transaction hash          |
//! | GET    | `/users/:address`            | Membership, file count and nonce     |
//! | GET    | `/users/:address/files`      | File list, read as `?caller=0x..`    |
//! | GET    | `/content/:cid`              | Bytes pinned on this node            |
//! | POST   | `/rpc`                       | JSON-RPC 2.0 gateway                 |
//! | GET    | `/ws`                        | WebSocket for live registry events   |

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use ipfs_storage_contracts::{Address, RegistryError, UserFile};

use crate::host::{ContractHost, HostError, Receipt};
use crate::metrics::SharedMetrics;
use crate::pinning::{validate_cid, ContentPinner, PinError};
use crate::transaction::SignedTransaction;

/// JSON-RPC error code for a call the contract reverted.
pub const RPC_EXECUTION_ERROR: i32 = 3;
/// JSON-RPC error code for a transaction refused before execution.
pub const RPC_TRANSACTION_REJECTED: i32 = -32000;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone, everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// The hosted registry.
    pub host: Arc<ContractHost>,
    /// Reference to Prometheus metrics for in-handler recording.
    pub metrics: SharedMetrics,
    /// Where uploaded content is pinned.
    pub pinner: Arc<dyn ContentPinner>,
}

impl AppState {
    /// Submits a transaction and records the outcome in metrics.
    fn submit(&self, stx: &SignedTransaction) -> Result<Receipt, HostError> {
        let started = Instant::now();
        let result = self.host.submit(stx);
        self.metrics
            .observe_submission(&self.host, &result, started.elapsed());
        result
    }
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/deployment", get(deployment_handler))
        .route("/transactions", post(submit_transaction_handler))
        .route("/transactions/:hash", get(receipt_handler))
        .route("/users/:address", get(user_handler))
        .route("/users/:address/files", get(user_files_handler))
        .route("/content/:cid", get(content_handler))
        .route("/rpc", post(rpc_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// JSON-RPC Types
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request envelope.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version. Must be "2.0".
    pub jsonrpc: String,
    /// The method to invoke.
    pub method: String,
    /// Positional method parameters.
    pub params: Option<serde_json::Value>,
    /// Request identifier. Echoed back in the response.
    pub id: serde_json::Value,
}

/// A JSON-RPC 2.0 response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version. Always "2.0".
    pub jsonrpc: String,
    /// The result on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// The error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    /// Request identifier, echoed from the request.
    pub id: serde_json::Value,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code.
    pub code: i32,
    /// Short human-readable error description.
    pub message: String,
    /// Optional structured error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcError {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    fn invalid_params(expected: &str) -> Self {
        Self::new(-32602, format!("Invalid params: expected {}", expected))
    }

    fn internal(err: impl std::fmt::Display) -> Self {
        Self::new(-32603, format!("Internal error: {}", err))
    }

    fn reverted(reason: &RegistryError, receipt: Option<&Receipt>) -> Self {
        let mut data = serde_json::json!({ "kind": reason.kind() });
        if let Some(receipt) = receipt {
            data["receipt"] = serde_json::to_value(receipt).unwrap_or_default();
        }
        Self {
            code: RPC_EXECUTION_ERROR,
            message: format!("execution reverted: {}", reason),
            data: Some(data),
        }
    }

    fn from_host(err: &HostError) -> Self {
        match err {
            HostError::Reverted { reason, receipt } => Self::reverted(reason, Some(receipt)),
            HostError::Rejected(_) | HostError::WrongChain { .. } | HostError::BadNonce { .. } => {
                Self::new(RPC_TRANSACTION_REJECTED, err.to_string())
            }
            _ => Self::internal(err),
        }
    }
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Node software version.
    pub version: String,
    /// Network preset name.
    pub network: String,
    pub chain_id: u64,
    /// Height of the last committed transaction.
    pub block_height: u64,
    pub contract_address: Address,
    pub owner: Address,
    pub registered_users: usize,
    pub total_files: u64,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
}

/// Response payload for `GET /users/:address`.
#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub address: Address,
    pub registered: bool,
    pub file_count: u64,
    /// Next nonce this address must sign with.
    pub nonce: u64,
}

/// Query string for `GET /users/:address/files`.
#[derive(Debug, Deserialize)]
pub struct FilesQuery {
    /// Address the read is performed as.
    pub caller: Option<String>,
}

/// Generic error body returned by REST endpoints on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Contract error kind, for reverted calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Receipt of a reverted transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<Receipt>,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            kind: None,
            receipt: None,
        }
    }
}

/// HTTP status for a contract error.
pub fn registry_status(err: &RegistryError) -> StatusCode {
    match err {
        RegistryError::Unauthorized { .. } => StatusCode::FORBIDDEN,
        RegistryError::AlreadyRegistered(_) | RegistryError::CannotRemoveOwner => {
            StatusCode::CONFLICT
        }
        RegistryError::NotRegistered(_) | RegistryError::EmptyHash => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
    }
}

/// Error type for REST handlers.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Registry(RegistryError),
    Host(HostError),
    Pin(PinError),
}

impl From<PinError> for ApiError {
    fn from(err: PinError) -> Self {
        ApiError::Pin(err)
    }
}

impl From<HostError> for ApiError {
    fn from(err: HostError) -> Self {
        ApiError::Host(err)
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        ApiError::Registry(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ErrorResponse::new(msg)),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorResponse::new(msg)),
            ApiError::Registry(err) => (
                registry_status(&err),
                ErrorResponse {
                    error: err.to_string(),
                    kind: Some(err.kind().to_string()),
                    receipt: None,
                },
            ),
            ApiError::Host(HostError::Reverted { reason, receipt }) => (
                registry_status(&reason),
                ErrorResponse {
                    error: reason.to_string(),
                    kind: Some(reason.kind().to_string()),
                    receipt: Some(*receipt),
                },
            ),
            ApiError::Host(
                err @ (HostError::Rejected(_)
                | HostError::WrongChain { .. }
                | HostError::BadNonce { .. }),
            ) => (StatusCode::BAD_REQUEST, ErrorResponse::new(err.to_string())),
            ApiError::Host(err) => {
                tracing::error!("host error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new(err.to_string()),
                )
            }
            ApiError::Pin(err @ PinError::InvalidCid(_)) => {
                (StatusCode::BAD_REQUEST, ErrorResponse::new(err.to_string()))
            }
            ApiError::Pin(err) => {
                tracing::error!("pin store error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new(err.to_string()),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

fn parse_address(raw: &str) -> Result<Address, ApiError> {
    Address::from_str(raw).map_err(|e| ApiError::BadRequest(format!("invalid address {}: {}", raw, e)))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — returns 200 if the node is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status` — returns node and registry summary.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let host = &state.host;
    Json(StatusResponse {
        version: state.version.clone(),
        network: host.network().name().to_string(),
        chain_id: host.chain_id(),
        block_height: host.height(),
        contract_address: host.contract_address(),
        owner: host.owner(),
        registered_users: host.registered_count(),
        total_files: host.total_files(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

async fn deployment_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.host.deployment().clone())
}

/// `POST /transactions` — submits a signed transaction.
///
/// Returns the receipt on success. A reverted call still consumed its nonce;
/// its receipt travels in the error body.
async fn submit_transaction_handler(
    State(state): State<AppState>,
    Json(stx): Json<SignedTransaction>,
) -> Result<Json<Receipt>, ApiError> {
    Ok(Json(state.submit(&stx)?))
}

/// `GET /transactions/:hash` — returns a receipt by transaction hash.
async fn receipt_handler(
    Path(hash): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Receipt>, ApiError> {
    state
        .host
        .receipt(&hash)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Receipt not found: {}", hash)))
}

/// `GET /users/:address` — returns membership state for the address.
async fn user_handler(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<UserResponse>, ApiError> {
    let address = parse_address(&address)?;
    Ok(Json(UserResponse {
        address,
        registered: state.host.is_user_registered(&address),
        file_count: state.host.user_file_count(&address),
        nonce: state.host.nonce(&address),
    }))
}

/// `GET /users/:address/files?caller=0x..` — the address's files, read as
/// `caller`. Only the address itself and the owner may read them.
async fn user_files_handler(
    Path(address): Path<String>,
    Query(query): Query<FilesQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<UserFile>>, ApiError> {
    let target = parse_address(&address)?;
    let caller = query
        .caller
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("missing caller query parameter".into()))
        .and_then(parse_address)?;
    Ok(Json(state.host.user_files(caller, &target)?))
}

/// `GET /content/:cid` — raw bytes pinned under `cid` on this node.
async fn content_handler(
    Path(cid): Path<String>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    validate_cid(&cid)?;
    let data = state
        .pinner
        .fetch(&cid)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Content not pinned here: {}", cid)))?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], data).into_response())
}

fn param<T: DeserializeOwned>(params: &Option<serde_json::Value>, index: usize) -> Option<T> {
    let value = params.as_ref()?.as_array()?.get(index)?;
    serde_json::from_value(value.clone()).ok()
}

/// `POST /rpc` — JSON-RPC 2.0 gateway.
///
/// Routes method calls to internal handlers. Unknown methods return
/// error code -32601 (Method not found).
async fn rpc_handler(
    State(state): State<AppState>,
    Json(req): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    if req.jsonrpc != "2.0" {
        return Json(JsonRpcResponse {
            jsonrpc: "2.0".into(),
            result: None,
            error: Some(JsonRpcError::new(
                -32600,
                "Invalid Request: jsonrpc must be \"2.0\"",
            )),
            id: req.id,
        });
    }

    let host = &state.host;
    let outcome: Result<serde_json::Value, JsonRpcError> = match req.method.as_str() {
        "net_chainId" => Ok(serde_json::json!(host.chain_id())),
        "registry_owner" => Ok(serde_json::json!(host.owner())),
        "registry_isUserRegistered" => param::<Address>(&req.params, 0)
            .map(|a| serde_json::json!(host.is_user_registered(&a)))
            .ok_or_else(|| JsonRpcError::invalid_params("[address]")),
        "registry_getUserFileCount" => param::<Address>(&req.params, 0)
            .map(|a| serde_json::json!(host.user_file_count(&a)))
            .ok_or_else(|| JsonRpcError::invalid_params("[address]")),
        "registry_getUserFiles" => {
            match (
                param::<Address>(&req.params, 0),
                param::<Address>(&req.params, 1),
            ) {
                (Some(caller), Some(target)) => host
                    .user_files(caller, &target)
                    .map(|files| serde_json::json!(files))
                    .map_err(|e| JsonRpcError::reverted(&e, None)),
                _ => Err(JsonRpcError::invalid_params("[caller, target]")),
            }
        }
        "registry_sendTransaction" => match param::<SignedTransaction>(&req.params, 0) {
            Some(stx) => state
                .submit(&stx)
                .map(|receipt| serde_json::json!(receipt))
                .map_err(|e| JsonRpcError::from_host(&e)),
            None => Err(JsonRpcError::invalid_params("[signedTransaction]")),
        },
        "registry_getReceipt" => match param::<String>(&req.params, 0) {
            Some(hash) => host
                .receipt(&hash)
                .map(|receipt| serde_json::json!(receipt))
                .map_err(JsonRpcError::internal),
            None => Err(JsonRpcError::invalid_params("[hash]")),
        },
        _ => Err(JsonRpcError::new(
            -32601,
            format!("Method not found: {}", req.method),
        )),
    };

    let (result, error) = match outcome {
        Ok(value) => (Some(value), None),
        Err(err) => (None, Some(err)),
    };
    Json(JsonRpcResponse {
        jsonrpc: "2.0".into(),
        result,
        error,
        id: req.id,
    })
}

/// `GET /ws` — WebSocket upgrade for live event streaming.
///
/// Clients receive JSON-encoded event records for every event emitted by a
/// committed transaction. Client messages are ignored.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Drives a single WebSocket connection, forwarding broadcast events
/// until the client disconnects or the channel is closed.
async fn handle_ws_connection(mut socket: WebSocket, state: AppState) {
    let mut rx = state.host.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(ev) => {
                        let payload = match serde_json::to_string(&ev) {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!("failed to serialize ws event: {}", e);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("ws subscriber lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
