//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Chain connection attempts
//! - Transaction lifecycle outcomes and finality latency
//! - Health checks

use crate::chain::ChainId;
use crate::error::{OrchestratorError, OrchestratorResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Connection metrics
    pub static ref CONNECTIONS_OPENED: CounterVec = register_counter_vec!(
        "xcm_orchestrator_connections_opened_total",
        "Successful chain handshakes",
        &["chain"]
    ).unwrap();

    pub static ref CONNECTIONS_FAILED: CounterVec = register_counter_vec!(
        "xcm_orchestrator_connections_failed_total",
        "Failed or timed out chain handshakes",
        &["chain"]
    ).unwrap();

    pub static ref CONNECTIONS_LOST: CounterVec = register_counter_vec!(
        "xcm_orchestrator_connections_lost_total",
        "Cached connections found closed and reopened",
        &["chain"]
    ).unwrap();

    // Transaction metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "xcm_orchestrator_transactions_submitted_total",
        "Total transactions submitted",
        &["chain"]
    ).unwrap();

    pub static ref TX_FINALIZED: CounterVec = register_counter_vec!(
        "xcm_orchestrator_transactions_finalized_total",
        "Total transactions finalized successfully",
        &["chain"]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "xcm_orchestrator_transactions_failed_total",
        "Total transactions failed",
        &["chain"]
    ).unwrap();

    pub static ref TX_LATENCY: HistogramVec = register_histogram_vec!(
        "xcm_orchestrator_finality_latency_seconds",
        "Time from submission to finality",
        &["chain"],
        vec![1.0, 6.0, 12.0, 24.0, 36.0, 60.0, 120.0, 300.0]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECKS: CounterVec = register_counter_vec!(
        "xcm_orchestrator_health_checks_total",
        "Total health checks served",
        &[]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> OrchestratorResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| OrchestratorError::Internal(format!("Failed to bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| OrchestratorError::Internal(format!("Metrics server failed: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Text exposition of every registered metric
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

// Helper functions to record metrics

pub fn record_connection_opened(chain: ChainId) {
    CONNECTIONS_OPENED
        .with_label_values(&[&chain.to_string()])
        .inc();
}

pub fn record_connection_failed(chain: ChainId) {
    CONNECTIONS_FAILED
        .with_label_values(&[&chain.to_string()])
        .inc();
}

pub fn record_connection_lost(chain: ChainId) {
    CONNECTIONS_LOST
        .with_label_values(&[&chain.to_string()])
        .inc();
}

pub fn record_tx_submitted(chain: ChainId) {
    TX_SUBMITTED
        .with_label_values(&[&chain.to_string()])
        .inc();
}

pub fn record_tx_finalized(chain: ChainId) {
    TX_FINALIZED
        .with_label_values(&[&chain.to_string()])
        .inc();
}

pub fn record_tx_failed(chain: ChainId) {
    TX_FAILED
        .with_label_values(&[&chain.to_string()])
        .inc();
}

pub fn record_tx_latency(chain: ChainId, latency_secs: f64) {
    TX_LATENCY
        .with_label_values(&[&chain.to_string()])
        .observe(latency_secs);
}

pub fn record_health_check() {
    HEALTH_CHECKS.with_label_values(&[]).inc();
}
