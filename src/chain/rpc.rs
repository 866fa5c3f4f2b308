//! JSON-RPC 2.0 over WebSocket
//!
//! One socket per chain. A reader task routes responses by request id and
//! notifications by subscription id, so concurrent subscriptions on the same
//! socket never observe each other's messages.

use super::client::{ChainClient, ChainConnector, SignedExtrinsic, TxStatusStream};
use super::types::{AccountBalance, ChainEndpoint, ChainId, ModuleError, TxProgress};
use crate::error::{OrchestratorError, OrchestratorResult};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{SplitStream, Stream, StreamExt};
use futures::SinkExt;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Method names understood by the node and its runtime gateway
pub mod methods {
    pub const CHAIN_NAME: &str = "system_chain";
    pub const ACCOUNT_NEXT_INDEX: &str = "system_accountNextIndex";
    pub const SUBMIT_AND_WATCH: &str = "author_submitAndWatchExtrinsic";
    pub const UNWATCH: &str = "author_unwatchExtrinsic";
    pub const ACCOUNT_BALANCE: &str = "runtime_accountBalance";
    pub const MODULE_ERROR: &str = "runtime_moduleError";
}

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection closed")]
    Closed,

    #[error("server error {code}: {message}")]
    Server { code: i64, message: String },

    #[error("unexpected response: {0}")]
    Decode(String),
}

type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

enum PendingRequest {
    Call(oneshot::Sender<Result<Value, RpcError>>),
    Subscribe {
        reply: oneshot::Sender<Result<String, RpcError>>,
        notifications: mpsc::UnboundedSender<Value>,
    },
}

#[derive(Default)]
struct Shared {
    pending: DashMap<u64, PendingRequest>,
    subscriptions: DashMap<String, mpsc::UnboundedSender<Value>>,
    closed: AtomicBool,
}

/// Multiplexed JSON-RPC client
pub struct RpcClient {
    url: String,
    next_id: AtomicU64,
    outgoing: mpsc::UnboundedSender<Message>,
    shared: Arc<Shared>,
}

impl RpcClient {
    /// Open the socket and start the reader/writer tasks
    pub async fn connect(url: &str) -> Result<Self, RpcError> {
        let (socket, _) = connect_async(url)
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        let (mut sink, source) = socket.split();

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let shared = Arc::new(Shared::default());

        let writer_shared = shared.clone();
        tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    warn!("WebSocket write failed: {}", e);
                    writer_shared.closed.store(true, Ordering::SeqCst);
                    break;
                }
            }
        });

        tokio::spawn(read_loop(url.to_string(), source, shared.clone()));

        Ok(Self {
            url: url.to_string(),
            next_id: AtomicU64::new(1),
            outgoing,
            shared,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Set once the reader task sees the socket close
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    fn send(&self, id: u64, method: &str, params: Value) -> Result<(), RpcError> {
        if self.is_closed() {
            return Err(RpcError::Closed);
        }
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        self.outgoing
            .send(Message::Text(body.to_string()))
            .map_err(|_| RpcError::Closed)
    }

    /// Single request/response call
    pub async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (reply, response) = oneshot::channel();
        self.shared.pending.insert(id, PendingRequest::Call(reply));

        if let Err(e) = self.send(id, method, params) {
            self.shared.pending.remove(&id);
            return Err(e);
        }

        let value = response.await.map_err(|_| RpcError::Closed)??;
        serde_json::from_value(value).map_err(|e| RpcError::Decode(format!("{}: {}", method, e)))
    }

    /// Open a subscription; notifications are decoded as `T`
    pub async fn subscribe<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        unsubscribe_method: &'static str,
    ) -> Result<Subscription<T>, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (reply, response) = oneshot::channel();
        let (notifications, receiver) = mpsc::unbounded_channel();
        self.shared.pending.insert(
            id,
            PendingRequest::Subscribe {
                reply,
                notifications,
            },
        );

        if let Err(e) = self.send(id, method, params) {
            self.shared.pending.remove(&id);
            return Err(e);
        }

        let subscription_id = response.await.map_err(|_| RpcError::Closed)??;
        debug!("Subscribed via {} as {}", method, subscription_id);

        Ok(Subscription {
            id: subscription_id,
            receiver,
            unsubscribe_method,
            outgoing: self.outgoing.clone(),
            shared: self.shared.clone(),
            request_id: self.next_id.fetch_add(1, Ordering::SeqCst),
            _item: PhantomData,
        })
    }
}

async fn read_loop(url: String, mut source: WsSource, shared: Arc<Shared>) {
    while let Some(message) = source.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!("WebSocket read from {} failed: {}", url, e);
                break;
            }
        };

        match serde_json::from_str::<Value>(&text) {
            Ok(value) => dispatch(&shared, value),
            Err(e) => warn!("Discarding malformed message from {}: {}", url, e),
        }
    }

    info!("Connection to {} closed", url);
    shared.closed.store(true, Ordering::SeqCst);

    let ids: Vec<u64> = shared.pending.iter().map(|e| *e.key()).collect();
    for id in ids {
        match shared.pending.remove(&id) {
            Some((_, PendingRequest::Call(reply))) => {
                let _ = reply.send(Err(RpcError::Closed));
            }
            Some((_, PendingRequest::Subscribe { reply, .. })) => {
                let _ = reply.send(Err(RpcError::Closed));
            }
            None => {}
        }
    }
    // Dropping the senders ends every open subscription stream
    shared.subscriptions.clear();
}

fn dispatch(shared: &Shared, message: Value) {
    if let Some(id) = message.get("id").and_then(Value::as_u64) {
        let Some((_, pending)) = shared.pending.remove(&id) else {
            return;
        };
        let result = match message.get("error") {
            Some(error) => Err(RpcError::Server {
                code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            }),
            None => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
        };

        match pending {
            PendingRequest::Call(reply) => {
                let _ = reply.send(result);
            }
            PendingRequest::Subscribe {
                reply,
                notifications,
            } => {
                let subscription = result.and_then(|value| match value {
                    Value::String(id) => Ok(id),
                    Value::Number(id) => Ok(id.to_string()),
                    other => Err(RpcError::Decode(format!("subscription id {}", other))),
                });
                // Registered before the caller is woken so no early notification is lost
                if let Ok(id) = &subscription {
                    shared.subscriptions.insert(id.clone(), notifications);
                }
                let _ = reply.send(subscription);
            }
        }
        return;
    }

    let Some(params) = message.get("params") else {
        return;
    };
    let subscription = match params.get("subscription") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => return,
    };
    let result = params.get("result").cloned().unwrap_or(Value::Null);

    if let Some(sender) = shared.subscriptions.get(&subscription) {
        let _ = sender.send(result);
    } else {
        debug!("Notification for unknown subscription {}", subscription);
    }
}

/// Live subscription; dropping it unsubscribes
pub struct Subscription<T> {
    id: String,
    receiver: mpsc::UnboundedReceiver<Value>,
    unsubscribe_method: &'static str,
    outgoing: mpsc::UnboundedSender<Message>,
    shared: Arc<Shared>,
    request_id: u64,
    _item: PhantomData<fn() -> T>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<T: DeserializeOwned> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        loop {
            match futures::ready!(self.receiver.poll_recv(cx)) {
                Some(value) => match serde_json::from_value(value) {
                    Ok(item) => return Poll::Ready(Some(item)),
                    Err(e) => warn!("Skipping undecodable notification on {}: {}", self.id, e),
                },
                None => return Poll::Ready(None),
            }
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.shared.subscriptions.remove(&self.id);
        if self.shared.closed.load(Ordering::SeqCst) {
            return;
        }
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.request_id,
            "method": self.unsubscribe_method,
            "params": [self.id],
        });
        let _ = self.outgoing.send(Message::Text(body.to_string()));
    }
}

/// `ChainClient` backed by an [`RpcClient`]
pub struct RpcChainClient {
    endpoint: ChainEndpoint,
    rpc: RpcClient,
}

impl RpcChainClient {
    fn query_error(&self, e: RpcError) -> OrchestratorError {
        match e {
            RpcError::Transport(_) | RpcError::Closed => OrchestratorError::Connection {
                chain: self.endpoint.chain,
                message: e.to_string(),
            },
            other => OrchestratorError::Query {
                chain: self.endpoint.chain,
                message: other.to_string(),
            },
        }
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    fn endpoint(&self) -> &ChainEndpoint {
        &self.endpoint
    }

    fn is_connected(&self) -> bool {
        !self.rpc.is_closed()
    }

    async fn account_next_index(&self, address: &str) -> OrchestratorResult<u64> {
        self.rpc
            .request(methods::ACCOUNT_NEXT_INDEX, json!([address]))
            .await
            .map_err(|e| self.query_error(e))
    }

    async fn submit_and_watch(
        &self,
        extrinsic: SignedExtrinsic,
    ) -> OrchestratorResult<TxStatusStream> {
        let envelope = serde_json::to_value(&extrinsic)
            .map_err(|e| OrchestratorError::Internal(format!("Failed to encode extrinsic: {}", e)))?;

        let subscription = self
            .rpc
            .subscribe::<TxProgress>(methods::SUBMIT_AND_WATCH, json!([envelope]), methods::UNWATCH)
            .await
            .map_err(|e| match e {
                RpcError::Server { .. } => OrchestratorError::OpaqueTransaction(e.to_string()),
                other => self.query_error(other),
            })?;

        Ok(subscription.boxed())
    }

    async fn account_balance(&self, address: &str) -> OrchestratorResult<AccountBalance> {
        self.rpc
            .request(methods::ACCOUNT_BALANCE, json!([address]))
            .await
            .map_err(|e| self.query_error(e))
    }

    async fn module_error(
        &self,
        pallet_index: u8,
        error_code: u8,
    ) -> OrchestratorResult<Option<ModuleError>> {
        self.rpc
            .request(methods::MODULE_ERROR, json!([pallet_index, error_code]))
            .await
            .map_err(|e| self.query_error(e))
    }
}

/// Connector for live nodes; the handshake asks the node for its chain name
#[derive(Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ChainConnector for WsConnector {
    async fn connect(&self, endpoint: &ChainEndpoint) -> OrchestratorResult<Arc<dyn ChainClient>> {
        let connection_error = |chain: ChainId, e: RpcError| OrchestratorError::Connection {
            chain,
            message: e.to_string(),
        };

        let rpc = RpcClient::connect(&endpoint.url)
            .await
            .map_err(|e| connection_error(endpoint.chain, e))?;
        let chain_name: String = rpc
            .request(methods::CHAIN_NAME, json!([]))
            .await
            .map_err(|e| connection_error(endpoint.chain, e))?;

        info!("Chain {} at {} identifies as {}", endpoint.chain, rpc.url(), chain_name);

        Ok(Arc::new(RpcChainClient {
            endpoint: endpoint.clone(),
            rpc,
        }))
    }
}
