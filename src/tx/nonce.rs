//! Nonce management for transaction submission
//!
//! Handles:
//! - Explicit per-(chain, account) nonce allocation
//! - Releasing a nonce whose submission never reached the pool
//! - Re-syncing with the chain's view on every allocation

use crate::chain::{ChainClient, ChainId};
use crate::error::{OrchestratorError, OrchestratorResult};

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Source of nonces for submitted transactions
#[async_trait]
pub trait NonceSource: Send + Sync {
    /// Allocate the next nonce for `address` on the client's chain
    async fn next_nonce(&self, client: &dyn ChainClient, address: &str) -> OrchestratorResult<u64>;

    /// Return a nonce whose transaction was never accepted
    async fn release(&self, chain: ChainId, address: &str, nonce: u64);

    /// Forget the local counter; the next allocation starts from the chain
    async fn invalidate(&self, chain: ChainId, address: &str);
}

/// Per-account nonce state
struct AccountNonceState {
    /// Next nonce to hand out, `None` until fetched from the chain
    current: Option<u64>,
}

impl AccountNonceState {
    /// Reconcile with the chain's next index. The chain wins when it is ahead.
    fn sync(&mut self, chain: ChainId, address: &str, on_chain: u64) -> u64 {
        let next = match self.current {
            Some(local) if local < on_chain => {
                warn!(
                    "Nonce gap for {} on chain {}: local {}, chain {}",
                    address, chain, local, on_chain
                );
                on_chain
            }
            Some(local) => local,
            None => on_chain,
        };
        self.current = Some(next);
        next
    }
}

/// Manages nonces across chains and accounts
#[derive(Default)]
pub struct NonceManager {
    accounts: DashMap<(ChainId, String), Arc<Mutex<AccountNonceState>>>,
}

impl NonceManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self, chain: ChainId, address: &str) -> Arc<Mutex<AccountNonceState>> {
        self.accounts
            .entry((chain, address.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(AccountNonceState { current: None })))
            .clone()
    }
}

#[async_trait]
impl NonceSource for NonceManager {
    async fn next_nonce(&self, client: &dyn ChainClient, address: &str) -> OrchestratorResult<u64> {
        let chain = client.chain();
        let state = self.state(chain, address);
        // Held across the fetch so concurrent allocations never read the same counter
        let mut state = state.lock().await;

        let on_chain = fetch_nonce(client, address).await?;
        let nonce = state.sync(chain, address, on_chain);
        state.current = Some(nonce + 1);

        debug!("Allocated nonce {} for {} on chain {}", nonce, address, chain);
        Ok(nonce)
    }

    async fn release(&self, chain: ChainId, address: &str, nonce: u64) {
        let state = self.state(chain, address);
        let mut state = state.lock().await;

        // Only the most recent allocation can be handed out again
        if state.current == Some(nonce + 1) {
            state.current = Some(nonce);
            debug!("Released nonce {} for {} on chain {}", nonce, address, chain);
        }
    }

    async fn invalidate(&self, chain: ChainId, address: &str) {
        let state = self.state(chain, address);
        state.lock().await.current = None;
        debug!("Nonce for {} on chain {} will be re-read", address, chain);
    }
}

async fn fetch_nonce(client: &dyn ChainClient, address: &str) -> OrchestratorResult<u64> {
    client
        .account_next_index(address)
        .await
        .map_err(|e| OrchestratorError::Nonce {
            chain: client.chain(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeChainClient;

    #[tokio::test]
    async fn test_sequential_allocation_starts_from_chain() {
        let client = FakeChainClient::new(ChainId::Parachain(1000)).with_next_index(5);
        let nonces = NonceManager::new();

        assert_eq!(nonces.next_nonce(&client, "alice").await.unwrap(), 5);
        assert_eq!(nonces.next_nonce(&client, "alice").await.unwrap(), 6);
        assert_eq!(nonces.next_nonce(&client, "bob").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_concurrent_allocation_is_unique() {
        let client = Arc::new(FakeChainClient::new(ChainId::Parachain(1000)));
        let nonces = Arc::new(NonceManager::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let client = client.clone();
                let nonces = nonces.clone();
                tokio::spawn(async move { nonces.next_nonce(&*client, "alice").await.unwrap() })
            })
            .collect();

        let mut allocated: Vec<u64> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        allocated.sort_unstable();
        assert_eq!(allocated, (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_release_only_rewinds_latest() {
        let client = FakeChainClient::new(ChainId::Parachain(1000));
        let chain = client.chain();
        let nonces = NonceManager::new();

        let first = nonces.next_nonce(&client, "alice").await.unwrap();
        let second = nonces.next_nonce(&client, "alice").await.unwrap();

        nonces.release(chain, "alice", first).await;
        assert_eq!(nonces.next_nonce(&client, "alice").await.unwrap(), 2);

        nonces.release(chain, "alice", 2).await;
        assert_eq!(nonces.next_nonce(&client, "alice").await.unwrap(), 2);
        assert_eq!(second, 1);
    }

    #[tokio::test]
    async fn test_chain_ahead_of_local_counter_wins() {
        let client = FakeChainClient::new(ChainId::Parachain(1000)).with_next_index(3);
        let nonces = NonceManager::new();

        assert_eq!(nonces.next_nonce(&client, "alice").await.unwrap(), 3);
        // The account signed elsewhere in the meantime
        client.set_next_index(10);
        assert_eq!(nonces.next_nonce(&client, "alice").await.unwrap(), 10);
        assert_eq!(nonces.next_nonce(&client, "alice").await.unwrap(), 11);
    }

    #[tokio::test]
    async fn test_invalidate_rewinds_to_chain_index() {
        let client = FakeChainClient::new(ChainId::Parachain(1000)).with_next_index(4);
        let chain = client.chain();
        let nonces = NonceManager::new();

        assert_eq!(nonces.next_nonce(&client, "alice").await.unwrap(), 4);
        assert_eq!(nonces.next_nonce(&client, "alice").await.unwrap(), 5);

        // Neither transaction made it into a block
        nonces.invalidate(chain, "alice").await;
        assert_eq!(nonces.next_nonce(&client, "alice").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_nonce_error() {
        let client = FakeChainClient::new(ChainId::Parachain(1000));
        client.set_connected(false);
        let nonces = NonceManager::new();

        assert!(matches!(
            nonces.next_nonce(&client, "alice").await,
            Err(OrchestratorError::Nonce { .. })
        ));
    }
}
