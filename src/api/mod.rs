//! HTTP API over the orchestrator operations
//!
//! Every response uses the envelope `{success: true, data}` or
//! `{success: false, error: {kind, message, retryable}}` with a non-2xx status.
//! Malformed bodies and path parameters are reported the same way.

use crate::config::ApiConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::protocol::{ChannelConfig, ChannelSetupReport, Orchestrator, TransferRequest};

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        FromRequest, FromRequestParts, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/connections", post(initialize_connections))
        .route("/channels/open", post(open_channel))
        .route("/channels/accept", post(accept_channel))
        .route("/channels/setup", post(setup_channels))
        .route("/transfers", post(transfer))
        .route("/balances/:para_id", get(well_known_balances))
        .route("/balances/:para_id/:address", get(balance_of))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { orchestrator })
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, orchestrator: Arc<Orchestrator>) -> OrchestratorResult<()> {
    let app = router(orchestrator);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| OrchestratorError::Internal(format!("Failed to bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| OrchestratorError::Internal(format!("API server failed: {}", e)))?;

    Ok(())
}

// Envelope

#[derive(Serialize)]
struct Success<T> {
    success: bool,
    data: T,
}

#[derive(Serialize)]
struct Failure {
    success: bool,
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
    retryable: bool,
    /// Channel setup steps that finalized before the failure
    #[serde(skip_serializing_if = "Option::is_none")]
    completed: Option<ChannelSetupReport>,
}

/// Operation error rendered as a failure envelope
pub struct ApiError(OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(error: OrchestratorError) -> Self {
        Self(error)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(OrchestratorError::InvalidInput(rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self(OrchestratorError::InvalidInput(rejection.body_text()))
    }
}

/// JSON body extractor whose rejections use the failure envelope
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
struct ApiJson<T>(T);

/// Path extractor whose rejections use the failure envelope
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
struct ApiPath<T>(T);

/// Status follows the failing step for channel setup errors
fn status_for(error: &OrchestratorError) -> StatusCode {
    match error.root_cause() {
        OrchestratorError::UnsupportedChain { .. }
        | OrchestratorError::InvalidInput(_)
        | OrchestratorError::Config(_) => StatusCode::BAD_REQUEST,
        OrchestratorError::RuntimeExecution(_) | OrchestratorError::ChannelSetup { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        OrchestratorError::Connection { .. }
        | OrchestratorError::Query { .. }
        | OrchestratorError::OpaqueTransaction(_)
        | OrchestratorError::Nonce { .. } => StatusCode::BAD_GATEWAY,
        OrchestratorError::CryptoNotReady => StatusCode::SERVICE_UNAVAILABLE,
        OrchestratorError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        OrchestratorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        warn!("Request failed with {}: {}", status, self.0);

        let completed = match &self.0 {
            OrchestratorError::ChannelSetup { completed, .. } => Some(completed.clone()),
            _ => None,
        };
        let body = Failure {
            success: false,
            error: ErrorBody {
                kind: self.0.kind(),
                message: self.0.to_string(),
                retryable: self.0.is_retryable(),
                completed,
            },
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<Success<T>>, ApiError>;

fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(Json(Success {
        success: true,
        data,
    }))
}

// Request types

fn default_capacity() -> u32 {
    ChannelConfig::default().max_capacity
}

fn default_message_size() -> u32 {
    ChannelConfig::default().max_message_size
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenChannelBody {
    from: u32,
    to: u32,
    #[serde(default = "default_capacity")]
    max_capacity: u32,
    #[serde(default = "default_message_size")]
    max_message_size: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AcceptChannelBody {
    acceptor: u32,
    sender: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetupChannelsBody {
    para_a: u32,
    para_b: u32,
    #[serde(default = "default_capacity")]
    max_capacity: u32,
    #[serde(default = "default_message_size")]
    max_message_size: u32,
}

// Response types

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: String,
    version: String,
    crypto_ready: bool,
    connected_chains: Vec<crate::chain::ChainId>,
}

// Handlers

/// Liveness plus warm-up and connection state
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    crate::metrics::record_health_check();

    Json(Success {
        success: true,
        data: HealthResponse {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            crypto_ready: state.orchestrator.is_ready(),
            connected_chains: state.orchestrator.pool().connected_chains(),
        },
    })
}

async fn initialize_connections(
    State(state): State<AppState>,
) -> ApiResult<crate::protocol::ConnectionsReport> {
    ok(state.orchestrator.initialize_connections().await?)
}

async fn open_channel(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<OpenChannelBody>,
) -> ApiResult<crate::protocol::TxSummary> {
    let config = ChannelConfig::new(body.max_capacity, body.max_message_size)?;
    ok(state.orchestrator.open_channel(body.from, body.to, config).await?)
}

async fn accept_channel(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<AcceptChannelBody>,
) -> ApiResult<crate::protocol::TxSummary> {
    ok(state
        .orchestrator
        .accept_channel(body.acceptor, body.sender)
        .await?)
}

async fn setup_channels(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<SetupChannelsBody>,
) -> ApiResult<ChannelSetupReport> {
    let config = ChannelConfig::new(body.max_capacity, body.max_message_size)?;
    ok(state
        .orchestrator
        .setup_bidirectional_channels(body.para_a, body.para_b, config)
        .await?)
}

async fn transfer(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<TransferRequest>,
) -> ApiResult<crate::protocol::TransferReceipt> {
    ok(state.orchestrator.transfer(request).await?)
}

async fn balance_of(
    State(state): State<AppState>,
    ApiPath((para_id, address)): ApiPath<(u32, String)>,
) -> ApiResult<crate::chain::AccountBalance> {
    ok(state.orchestrator.balance_of(para_id, &address).await?)
}

async fn well_known_balances(
    State(state): State<AppState>,
    ApiPath(para_id): ApiPath<u32>,
) -> ApiResult<Vec<crate::protocol::AccountBalanceEntry>> {
    ok(state
        .orchestrator
        .balances_for_well_known_accounts(para_id)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainId, ConnectionPool, EndpointRegistry};
    use crate::keys::AccountProvider;
    use crate::protocol::OrchestratorOptions;
    use crate::testing::FakeConnector;
    use crate::tx::NonceManager;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    async fn app(connector: Arc<FakeConnector>, warm: bool) -> Router {
        let registry = EndpointRegistry::new(
            "fake://relay",
            vec![(1000, "fake://1000".to_string()), (1001, "fake://1001".to_string())],
        );
        let pool = ConnectionPool::new(registry, connector, Duration::from_secs(1));
        let orchestrator = Orchestrator::new(
            Arc::new(pool),
            Arc::new(AccountProvider::new()),
            Arc::new(NonceManager::new()),
            OrchestratorOptions::default(),
        );
        if warm {
            orchestrator.warm_up().await.unwrap();
        }
        router(Arc::new(orchestrator))
    }

    fn connector() -> Arc<FakeConnector> {
        Arc::new(
            FakeConnector::new()
                .with_chain(ChainId::Relay)
                .with_chain(ChainId::Parachain(1000))
                .with_chain(ChainId::Parachain(1001)),
        )
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(
            app(connector(), false).await,
            Request::get("/health").body(Body::empty()).unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["data"]["cryptoReady"], json!(false));
    }

    #[tokio::test]
    async fn test_transfer_envelope() {
        let (status, body) = send(
            app(connector(), true).await,
            post_json("/transfers", json!({ "from": 1000, "to": 1001, "amount": "500" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["data"]["amount"], json!("500"));
        assert_eq!(body["data"]["symbol"], json!("UNIT"));
    }

    #[tokio::test]
    async fn test_unsupported_chain_is_bad_request() {
        let (status, body) = send(
            app(connector(), true).await,
            Request::get("/balances/9999/5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["error"]["kind"], json!("unsupported_chain"));
        assert_eq!(body["error"]["retryable"], json!(false));
    }

    #[tokio::test]
    async fn test_not_warmed_up_is_unavailable() {
        let (status, body) = send(
            app(connector(), false).await,
            post_json("/channels/open", json!({ "from": 1000, "to": 1001 })),
        )
        .await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["kind"], json!("crypto_not_ready"));
        assert_eq!(body["error"]["retryable"], json!(true));
    }

    #[tokio::test]
    async fn test_unreachable_chain_is_bad_gateway() {
        let connector = connector();
        connector.set_unreachable(ChainId::Relay, true);

        let (status, body) = send(app(connector, true).await, post_json("/connections", json!({}))).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["kind"], json!("connection"));
    }

    #[tokio::test]
    async fn test_setup_channels_report_keys() {
        let (status, body) = send(
            app(connector(), true).await,
            post_json("/channels/setup", json!({ "paraA": 1000, "paraB": 1001 })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let keys: Vec<&String> = body["data"].as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 4);
        assert!(body["data"]["accept1001"]["blockHash"].is_string());
    }

    #[tokio::test]
    async fn test_failed_setup_reports_completed_steps() {
        let connector = connector();
        connector
            .client(ChainId::Parachain(1001))
            .reject_submissions(Some("1010: Invalid Transaction: Stale"));

        let (status, body) = send(
            app(connector, true).await,
            post_json("/channels/setup", json!({ "paraA": 1000, "paraB": 1001 })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["error"]["kind"], json!("channel_setup"));
        assert_eq!(body["error"]["retryable"], json!(true));
        let completed = body["error"]["completed"].as_object().unwrap();
        assert_eq!(completed.len(), 1);
        assert!(completed["1000to1001"]["txHash"].is_string());
    }

    #[tokio::test]
    async fn test_other_failures_omit_completed() {
        let (_, body) = send(
            app(connector(), true).await,
            post_json("/channels/open", json!({ "from": 1000, "to": 9999 })),
        )
        .await;

        assert_eq!(body["error"]["kind"], json!("unsupported_chain"));
        assert!(body["error"].get("completed").is_none());
    }

    #[tokio::test]
    async fn test_malformed_body_uses_envelope() {
        let request = Request::builder()
            .method("POST")
            .uri("/transfers")
            .header("content-type", "application/json")
            .body(Body::from("{\"from\": 1000,"))
            .unwrap();
        let (status, body) = send(app(connector(), true).await, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["error"]["kind"], json!("invalid_input"));
        assert_eq!(body["error"]["retryable"], json!(false));
    }

    #[tokio::test]
    async fn test_missing_field_uses_envelope() {
        let (status, body) = send(
            app(connector(), true).await,
            post_json("/channels/accept", json!({ "acceptor": 1000 })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], json!("invalid_input"));
    }

    #[tokio::test]
    async fn test_non_numeric_para_id_uses_envelope() {
        let (status, body) = send(
            app(connector(), true).await,
            Request::get("/balances/abc").body(Body::empty()).unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["error"]["kind"], json!("invalid_input"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&OrchestratorError::Timeout {
                operation: "x".to_string()
            }),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for(&OrchestratorError::OpaqueTransaction("x".to_string())),
            StatusCode::BAD_GATEWAY
        );
        let setup_failure = |source: OrchestratorError| OrchestratorError::ChannelSetup {
            step: "accept1000".to_string(),
            completed: ChannelSetupReport::default(),
            source: Box::new(source),
        };
        assert_eq!(
            status_for(&setup_failure(OrchestratorError::Timeout {
                operation: "x".to_string()
            })),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for(&setup_failure(OrchestratorError::Connection {
                chain: ChainId::Parachain(1000),
                message: "closed".to_string(),
            })),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&setup_failure(OrchestratorError::RuntimeExecution(
                crate::chain::ModuleError {
                    section: "hrmp".to_string(),
                    name: "OpenHrmpChannelAlreadyExists".to_string(),
                    documentation: String::new(),
                }
            ))),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
