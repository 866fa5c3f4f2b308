//! Protocol orchestration
//!
//! `Orchestrator` composes the connection pool, account provider and
//! transaction tracker into the operations offered to front-ends:
//! channel establishment, transfers and balance queries.

mod balance;
mod channel;
mod summary;
mod transfer;

pub use channel::ChannelConfig;
pub use summary::{
    AccountBalanceEntry, ChannelSetupReport, ConnectionsReport, TransferReceipt, TxSummary,
};
pub use transfer::TransferRequest;

use crate::chain::{ChainConnector, ChainId, ConnectionPool, EndpointRegistry, RuntimeCall};
use crate::config::{OrchestratorConfig, Settings};
use crate::error::OrchestratorResult;
use crate::keys::{AccountIdentity, AccountProvider};
use crate::tx::{NonceManager, NonceSource, TransactionRequest, TransactionTracker};

use futures::future::try_join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Behavioural knobs taken from `[orchestrator]`
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub sudo_seed: String,
    pub transfer_source_chains: Vec<u32>,
    pub tx_timeout: Option<Duration>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        OrchestratorOptions::from(&OrchestratorConfig::default())
    }
}

impl From<&OrchestratorConfig> for OrchestratorOptions {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            sudo_seed: config.sudo_seed.clone(),
            transfer_source_chains: config.transfer_source_chains.clone(),
            tx_timeout: config.tx_timeout(),
        }
    }
}

pub struct Orchestrator {
    pool: Arc<ConnectionPool>,
    accounts: Arc<AccountProvider>,
    tracker: TransactionTracker,
    sudo_seed: String,
    transfer_sources: BTreeSet<u32>,
}

impl Orchestrator {
    pub fn new(
        pool: Arc<ConnectionPool>,
        accounts: Arc<AccountProvider>,
        nonces: Arc<dyn NonceSource>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            pool,
            accounts,
            tracker: TransactionTracker::new(nonces, options.tx_timeout),
            sudo_seed: options.sudo_seed,
            transfer_sources: options.transfer_source_chains.into_iter().collect(),
        }
    }

    /// Wire everything from loaded settings around the given connector
    pub fn from_settings(settings: &Settings, connector: Arc<dyn ChainConnector>) -> Self {
        let pool = ConnectionPool::new(
            EndpointRegistry::from_settings(settings),
            connector,
            settings.orchestrator.handshake_timeout(),
        );

        Self::new(
            Arc::new(pool),
            Arc::new(AccountProvider::new()),
            Arc::new(NonceManager::new()),
            OrchestratorOptions::from(&settings.orchestrator),
        )
    }

    /// One-time key derivation warm-up; required before any signing operation
    pub async fn warm_up(&self) -> OrchestratorResult<()> {
        self.accounts.warm_up().await
    }

    pub fn is_ready(&self) -> bool {
        self.accounts.is_ready()
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn accounts(&self) -> &AccountProvider {
        &self.accounts
    }

    /// Open the relay and every parachain connection concurrently
    pub async fn initialize_connections(&self) -> OrchestratorResult<ConnectionsReport> {
        let registry = self.pool.registry();
        let chains = std::iter::once(registry.relay().chain)
            .chain(registry.parachains().map(|e| e.chain));

        try_join_all(chains.map(|chain| self.pool.get_connection(chain))).await?;
        info!(
            "Connected to relay and {} parachains",
            registry.parachains().count()
        );

        Ok(ConnectionsReport {
            relay_endpoint: registry.relay().url.clone(),
            parachain_endpoints: registry.parachains().cloned().collect(),
        })
    }

    /// Sign `call` with `signer`, submit it on `chain` and await finality
    async fn execute(
        &self,
        chain: ChainId,
        signer: AccountIdentity,
        call: RuntimeCall,
    ) -> OrchestratorResult<TxSummary> {
        let client = self.pool.get_connection(chain).await?;
        let finalized = self
            .tracker
            .submit_and_track(TransactionRequest {
                chain: client,
                signer,
                call,
            })
            .await?;

        Ok(TxSummary::new(chain, finalized))
    }

    fn sudo(&self) -> OrchestratorResult<AccountIdentity> {
        self.accounts.identity(&self.sudo_seed)
    }
}
