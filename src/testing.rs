//! In-memory chain doubles
//!
//! `FakeChainClient` finalizes every submission immediately unless a script has
//! been queued for it. All clients created by one `FakeConnector` share a
//! submission log, so cross-chain ordering can be asserted.

use crate::chain::{
    AccountBalance, BlockHash, ChainClient, ChainConnector, ChainEndpoint, ChainEvent, ChainId,
    ModuleError, RuntimeCall, SignedExtrinsic, TxHash, TxProgress, TxStatus, TxStatusStream,
};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::keys::ss58_decode;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A transaction as seen by a fake chain
#[derive(Debug, Clone)]
pub struct Submission {
    pub chain: ChainId,
    pub call: RuntimeCall,
    pub signer: String,
    pub nonce: u64,
    pub hash: TxHash,
}

pub type SubmissionLog = Arc<Mutex<Vec<Submission>>>;

struct Script {
    updates: Vec<TxProgress>,
    hold_open: bool,
}

pub struct FakeChainClient {
    endpoint: ChainEndpoint,
    block_hash: BlockHash,
    next_index: AtomicU64,
    scripts: Mutex<VecDeque<Script>>,
    events: Mutex<Vec<ChainEvent>>,
    balances: Mutex<HashMap<String, AccountBalance>>,
    module_errors: Mutex<HashMap<(u8, u8), ModuleError>>,
    rejection: Mutex<Option<String>>,
    connected: AtomicBool,
    log: SubmissionLog,
}

impl FakeChainClient {
    pub fn new(chain: ChainId) -> Self {
        let seed = match chain {
            ChainId::Relay => 0,
            ChainId::Parachain(id) => id as u64,
        };
        Self {
            endpoint: ChainEndpoint {
                chain,
                url: format!("fake://{}", chain),
            },
            block_hash: BlockHash(format!("0x{:064x}", seed)),
            next_index: AtomicU64::new(0),
            scripts: Mutex::new(VecDeque::new()),
            events: Mutex::new(vec![ChainEvent::new("system", "ExtrinsicSuccess", json!([]))]),
            balances: Mutex::new(HashMap::new()),
            module_errors: Mutex::new(HashMap::new()),
            rejection: Mutex::new(None),
            connected: AtomicBool::new(true),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_log(mut self, log: SubmissionLog) -> Self {
        self.log = log;
        self
    }

    pub fn with_next_index(self, nonce: u64) -> Self {
        self.set_next_index(nonce);
        self
    }

    pub fn set_next_index(&self, nonce: u64) {
        self.next_index.store(nonce, Ordering::SeqCst);
    }

    /// Block hash reported for immediately-finalized submissions
    pub fn block_hash(&self) -> &BlockHash {
        &self.block_hash
    }

    /// Events attached to immediately-finalized submissions
    pub fn set_events(&self, events: Vec<ChainEvent>) {
        *self.events.lock().unwrap() = events;
    }

    pub fn set_balance(&self, address: &str, balance: AccountBalance) {
        self.balances
            .lock()
            .unwrap()
            .insert(address.to_string(), balance);
    }

    pub fn register_module_error(&self, pallet_index: u8, error_code: u8, error: ModuleError) {
        self.module_errors
            .lock()
            .unwrap()
            .insert((pallet_index, error_code), error);
    }

    /// Queue the exact status sequence for the next submission
    pub fn push_script(&self, updates: Vec<TxProgress>) {
        self.scripts.lock().unwrap().push_back(Script {
            updates,
            hold_open: false,
        });
    }

    /// Next submission emits `updates` and then never reaches a terminal status
    pub fn push_hanging_script(&self, updates: Vec<TxProgress>) {
        self.scripts.lock().unwrap().push_back(Script {
            updates,
            hold_open: true,
        });
    }

    /// Next submission finalizes with a module dispatch error
    pub fn fail_next_with_module_error(&self, pallet_index: u8, error_code: u8) {
        self.push_script(vec![
            TxProgress::status(TxStatus::Ready),
            TxProgress {
                status: TxStatus::Finalized(self.block_hash.clone()),
                events: vec![ChainEvent::new("system", "ExtrinsicFailed", json!([]))],
                dispatch_error: Some(json!({
                    "module": { "index": pallet_index, "error": format!("0x{:02x}000000", error_code) }
                })),
            },
        ]);
    }

    /// Reject submissions outright with `message`; `None` accepts again
    pub fn reject_submissions(&self, message: Option<&str>) {
        *self.rejection.lock().unwrap() = message.map(str::to_string);
    }

    /// Simulate the node closing the socket; every call fails until reconnected
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn ensure_connected(&self) -> OrchestratorResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(OrchestratorError::Connection {
                chain: self.endpoint.chain,
                message: "connection closed".to_string(),
            })
        }
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.chain == self.endpoint.chain)
            .cloned()
            .collect()
    }

    fn finalize_immediately(&self) -> Vec<TxProgress> {
        vec![
            TxProgress::status(TxStatus::Ready),
            TxProgress::status(TxStatus::InBlock(self.block_hash.clone())),
            TxProgress {
                status: TxStatus::Finalized(self.block_hash.clone()),
                events: self.events.lock().unwrap().clone(),
                dispatch_error: None,
            },
        ]
    }
}

#[async_trait]
impl ChainClient for FakeChainClient {
    fn endpoint(&self) -> &ChainEndpoint {
        &self.endpoint
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn account_next_index(&self, _address: &str) -> OrchestratorResult<u64> {
        self.ensure_connected()?;
        Ok(self.next_index.load(Ordering::SeqCst))
    }

    async fn submit_and_watch(
        &self,
        extrinsic: SignedExtrinsic,
    ) -> OrchestratorResult<TxStatusStream> {
        self.ensure_connected()?;
        if let Some(message) = self.rejection.lock().unwrap().clone() {
            return Err(OrchestratorError::OpaqueTransaction(message));
        }

        self.log.lock().unwrap().push(Submission {
            chain: self.endpoint.chain,
            call: extrinsic.call,
            signer: extrinsic.signer,
            nonce: extrinsic.nonce,
            hash: extrinsic.hash,
        });

        let script = self.scripts.lock().unwrap().pop_front();
        let stream = match script {
            Some(Script {
                updates,
                hold_open: true,
            }) => stream::iter(updates).chain(stream::pending()).boxed(),
            Some(Script { updates, .. }) => stream::iter(updates).boxed(),
            None => stream::iter(self.finalize_immediately()).boxed(),
        };
        Ok(stream)
    }

    async fn account_balance(&self, address: &str) -> OrchestratorResult<AccountBalance> {
        self.ensure_connected()?;
        ss58_decode(address).map_err(|e| OrchestratorError::Query {
            chain: self.endpoint.chain,
            message: e.to_string(),
        })?;
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .unwrap_or_default())
    }

    async fn module_error(
        &self,
        pallet_index: u8,
        error_code: u8,
    ) -> OrchestratorResult<Option<ModuleError>> {
        self.ensure_connected()?;
        Ok(self
            .module_errors
            .lock()
            .unwrap()
            .get(&(pallet_index, error_code))
            .cloned())
    }
}

/// Connector handing out pre-built fake clients
pub struct FakeConnector {
    clients: HashMap<ChainId, Arc<FakeChainClient>>,
    connects: Mutex<HashMap<ChainId, usize>>,
    unreachable: Mutex<HashSet<ChainId>>,
    handshake_delay: Option<Duration>,
    total_connects: AtomicUsize,
    log: SubmissionLog,
}

impl Default for FakeConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeConnector {
    pub fn new() -> Self {
        Self {
            clients: HashMap::new(),
            connects: Mutex::new(HashMap::new()),
            unreachable: Mutex::new(HashSet::new()),
            handshake_delay: None,
            total_connects: AtomicUsize::new(0),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_chain(self, chain: ChainId) -> Self {
        let client = FakeChainClient::new(chain);
        self.with_client(client)
    }

    pub fn with_client(mut self, client: FakeChainClient) -> Self {
        let client = client.with_log(self.log.clone());
        self.clients.insert(client.endpoint.chain, Arc::new(client));
        self
    }

    pub fn with_handshake_delay(mut self, delay: Duration) -> Self {
        self.handshake_delay = Some(delay);
        self
    }

    pub fn client(&self, chain: ChainId) -> Arc<FakeChainClient> {
        self.clients
            .get(&chain)
            .cloned()
            .unwrap_or_else(|| panic!("no fake client for chain {}", chain))
    }

    pub fn set_unreachable(&self, chain: ChainId, unreachable: bool) {
        let mut set = self.unreachable.lock().unwrap();
        if unreachable {
            set.insert(chain);
        } else {
            set.remove(&chain);
        }
    }

    /// Handshakes attempted against `chain`
    pub fn connect_count(&self, chain: ChainId) -> usize {
        self.connects.lock().unwrap().get(&chain).copied().unwrap_or(0)
    }

    pub fn total_connects(&self) -> usize {
        self.total_connects.load(Ordering::SeqCst)
    }

    /// Every submission across all chains, in submission order
    pub fn submissions(&self) -> Vec<Submission> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainConnector for FakeConnector {
    async fn connect(&self, endpoint: &ChainEndpoint) -> OrchestratorResult<Arc<dyn ChainClient>> {
        *self
            .connects
            .lock()
            .unwrap()
            .entry(endpoint.chain)
            .or_insert(0) += 1;
        self.total_connects.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.handshake_delay {
            tokio::time::sleep(delay).await;
        }

        if self.unreachable.lock().unwrap().contains(&endpoint.chain) {
            return Err(OrchestratorError::Connection {
                chain: endpoint.chain,
                message: format!("{} unreachable", endpoint.url),
            });
        }

        self.clients
            .get(&endpoint.chain)
            .map(|client| {
                client.set_connected(true);
                client.clone() as Arc<dyn ChainClient>
            })
            .ok_or_else(|| OrchestratorError::Connection {
                chain: endpoint.chain,
                message: "no such node".to_string(),
            })
    }
}
