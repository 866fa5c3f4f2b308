//! Chain module - endpoint registry and shared connection pool
//!
//! This module provides:
//! - The static registry of relay and parachain endpoints
//! - A pool that lazily opens exactly one connection per chain
//! - The client-runtime seam (`ChainClient` / `ChainConnector`)
//! - A JSON-RPC over WebSocket connector for live nodes

pub mod client;
pub mod rpc;
pub mod types;

pub use client::{ChainClient, ChainConnector, RuntimeCall, SignedExtrinsic, TxStatusStream};
pub use rpc::WsConnector;
pub use types::{
    AccountBalance, BlockHash, ChainEndpoint, ChainEvent, ChainId, ModuleError, TxHash,
    TxProgress, TxStatus,
};

use crate::config::Settings;
use crate::error::{OrchestratorError, OrchestratorResult};

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Immutable endpoint table, loaded once at startup
#[derive(Debug, Clone)]
pub struct EndpointRegistry {
    endpoints: BTreeMap<ChainId, ChainEndpoint>,
}

impl EndpointRegistry {
    pub fn new(relay_url: &str, parachains: impl IntoIterator<Item = (u32, String)>) -> Self {
        let mut endpoints = BTreeMap::new();
        endpoints.insert(
            ChainId::Relay,
            ChainEndpoint {
                chain: ChainId::Relay,
                url: relay_url.to_string(),
            },
        );
        for (para_id, url) in parachains {
            let chain = ChainId::Parachain(para_id);
            endpoints.insert(chain, ChainEndpoint { chain, url });
        }

        Self { endpoints }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            &settings.relay.url,
            settings
                .parachains
                .iter()
                .map(|p| (p.para_id, p.url.clone())),
        )
    }

    /// Endpoint for a chain, or `UnsupportedChain`
    pub fn get(&self, chain: ChainId) -> OrchestratorResult<&ChainEndpoint> {
        self.endpoints
            .get(&chain)
            .ok_or(OrchestratorError::UnsupportedChain { chain })
    }

    pub fn relay(&self) -> &ChainEndpoint {
        &self.endpoints[&ChainId::Relay]
    }

    /// Parachain endpoints in ascending para id order
    pub fn parachains(&self) -> impl Iterator<Item = &ChainEndpoint> {
        self.endpoints
            .values()
            .filter(|e| matches!(e.chain, ChainId::Parachain(_)))
    }
}

type ConnectionSlot = Arc<OnceCell<Arc<dyn ChainClient>>>;

/// One long-lived connection per chain, opened on first use
pub struct ConnectionPool {
    registry: EndpointRegistry,
    connector: Arc<dyn ChainConnector>,
    /// In-flight or settled connection per chain
    connections: DashMap<ChainId, ConnectionSlot>,
    handshake_timeout: Duration,
}

impl ConnectionPool {
    pub fn new(
        registry: EndpointRegistry,
        connector: Arc<dyn ChainConnector>,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            connector,
            connections: DashMap::new(),
            handshake_timeout,
        }
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    /// Get the connection for `chain`, opening it on first use.
    ///
    /// Concurrent first calls share one handshake. A failed handshake leaves the
    /// slot empty so a later call retries. A cached connection whose transport
    /// has closed is replaced by a fresh handshake.
    pub async fn get_connection(&self, chain: ChainId) -> OrchestratorResult<Arc<dyn ChainClient>> {
        let endpoint = self.registry.get(chain)?.clone();

        let slot: ConnectionSlot = {
            let mut entry = self
                .connections
                .entry(chain)
                .or_insert_with(|| Arc::new(OnceCell::new()));
            let lost = entry.value().get().is_some_and(|client| !client.is_connected());
            if lost {
                warn!("Connection to chain {} lost, reconnecting", chain);
                crate::metrics::record_connection_lost(chain);
                *entry.value_mut() = Arc::new(OnceCell::new());
            }
            entry.value().clone()
        };

        if let Some(client) = slot.get() {
            return Ok(client.clone());
        }

        let client = slot
            .get_or_try_init(|| self.open(endpoint))
            .await?;
        Ok(client.clone())
    }

    async fn open(&self, endpoint: ChainEndpoint) -> OrchestratorResult<Arc<dyn ChainClient>> {
        let chain = endpoint.chain;
        debug!("Opening connection to chain {} at {}", chain, endpoint.url);

        let result = match tokio::time::timeout(self.handshake_timeout, self.connector.connect(&endpoint)).await {
            Ok(result) => result,
            Err(_) => Err(OrchestratorError::Connection {
                chain,
                message: format!("handshake with {} timed out after {:?}", endpoint.url, self.handshake_timeout),
            }),
        };

        match &result {
            Ok(_) => {
                info!("Connected to chain {} at {}", chain, endpoint.url);
                crate::metrics::record_connection_opened(chain);
            }
            Err(e) => {
                warn!("Connection to chain {} failed: {}", chain, e);
                crate::metrics::record_connection_failed(chain);
            }
        }

        result
    }

    /// Chains with an established connection
    pub fn connected_chains(&self) -> Vec<ChainId> {
        let mut chains: Vec<ChainId> = self
            .connections
            .iter()
            .filter(|entry| entry.value().get().is_some_and(|client| client.is_connected()))
            .map(|entry| *entry.key())
            .collect();
        chains.sort();
        chains
    }
}
