//! Transaction lifecycle tracking
//!
//! `submit_and_track` signs and submits a call, then follows the transaction's
//! status stream until it reaches exactly one terminal state:
//!
//! ```text
//! Pending -> (InBlock) -> Finalized | Failed
//! ```
//!
//! InBlock is informational only. Finalized with a dispatch error becomes
//! Failed, decoded through the chain metadata when possible. Usurped, dropped,
//! invalid and finality-timeout statuses are opaque failures.

use super::nonce::NonceSource;
use crate::chain::{
    BlockHash, ChainClient, ChainEvent, ModuleError, RuntimeCall, SignedExtrinsic, TxHash,
    TxStatus, TxStatusStream,
};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::keys::AccountIdentity;

use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A call to sign and submit on one chain
#[derive(Clone)]
pub struct TransactionRequest {
    pub chain: Arc<dyn ChainClient>,
    pub signer: AccountIdentity,
    pub call: RuntimeCall,
}

/// Why a transaction failed
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorDescriptor {
    /// Decoded runtime module error
    Runtime(ModuleError),
    /// Anything that could not be decoded
    Opaque { message: String },
}

impl From<ErrorDescriptor> for OrchestratorError {
    fn from(descriptor: ErrorDescriptor) -> Self {
        match descriptor {
            ErrorDescriptor::Runtime(error) => OrchestratorError::RuntimeExecution(error),
            ErrorDescriptor::Opaque { message } => OrchestratorError::OpaqueTransaction(message),
        }
    }
}

/// Lifecycle state of a tracked transaction
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionOutcome {
    Pending,
    InBlock(BlockHash),
    Finalized {
        block: BlockHash,
        events: Vec<ChainEvent>,
    },
    Failed(ErrorDescriptor),
}

impl TransactionOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionOutcome::Finalized { .. } | TransactionOutcome::Failed(_)
        )
    }
}

/// Terminal success value of a tracked transaction
#[derive(Debug, Clone)]
pub struct FinalizedTransaction {
    pub tx_hash: TxHash,
    pub nonce: u64,
    pub block: BlockHash,
    pub events: Vec<ChainEvent>,
}

/// Submits transactions and awaits their finality
pub struct TransactionTracker {
    nonces: Arc<dyn NonceSource>,
    default_timeout: Option<Duration>,
}

impl TransactionTracker {
    pub fn new(nonces: Arc<dyn NonceSource>, default_timeout: Option<Duration>) -> Self {
        Self {
            nonces,
            default_timeout,
        }
    }

    /// Submit and track with the configured default timeout
    pub async fn submit_and_track(
        &self,
        request: TransactionRequest,
    ) -> OrchestratorResult<FinalizedTransaction> {
        self.submit_and_track_with_timeout(request, self.default_timeout)
            .await
    }

    /// Submit and track; `None` waits for finality indefinitely.
    ///
    /// On timeout the subscription is dropped. The broadcast transaction itself
    /// may still land.
    pub async fn submit_and_track_with_timeout(
        &self,
        request: TransactionRequest,
        timeout: Option<Duration>,
    ) -> OrchestratorResult<FinalizedTransaction> {
        let client = request.chain.clone();
        let chain = client.chain();
        let address = request.signer.address.clone();
        let call_name = request.call.name();

        let nonce = self.nonces.next_nonce(&*client, &address).await?;
        let extrinsic = match SignedExtrinsic::sign(chain, &request.signer, nonce, request.call) {
            Ok(extrinsic) => extrinsic,
            Err(e) => {
                self.nonces.release(chain, &address, nonce).await;
                return Err(e);
            }
        };
        let tx_hash = extrinsic.hash.clone();

        let stream = match client.submit_and_watch(extrinsic).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Submission of {} on chain {} failed: {}", call_name, chain, e);
                self.nonces.release(chain, &address, nonce).await;
                crate::metrics::record_tx_failed(chain);
                return Err(e);
            }
        };

        info!(
            "Submitted {} on chain {} as {} (nonce {})",
            call_name, chain, tx_hash, nonce
        );
        crate::metrics::record_tx_submitted(chain);
        let started = Instant::now();

        let tracked = follow(&*client, &tx_hash, stream);
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, tracked).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("Gave up waiting for {} on chain {} after {:?}", tx_hash, chain, limit);
                    self.nonces.invalidate(chain, &address).await;
                    crate::metrics::record_tx_failed(chain);
                    return Err(OrchestratorError::Timeout {
                        operation: format!("finality of {} on chain {}", tx_hash, chain),
                    });
                }
            },
            None => tracked.await,
        };

        match outcome {
            TransactionOutcome::Finalized { block, events } => {
                crate::metrics::record_tx_finalized(chain);
                crate::metrics::record_tx_latency(chain, started.elapsed().as_secs_f64());
                Ok(FinalizedTransaction {
                    tx_hash,
                    nonce,
                    block,
                    events,
                })
            }
            TransactionOutcome::Failed(descriptor) => {
                // A dispatch error still consumed the nonce; anything opaque may not have
                if matches!(descriptor, ErrorDescriptor::Opaque { .. }) {
                    self.nonces.invalidate(chain, &address).await;
                }
                crate::metrics::record_tx_failed(chain);
                Err(descriptor.into())
            }
            TransactionOutcome::Pending | TransactionOutcome::InBlock(_) => {
                self.nonces.invalidate(chain, &address).await;
                crate::metrics::record_tx_failed(chain);
                Err(OrchestratorError::OpaqueTransaction(format!(
                    "status stream for {} closed before finality",
                    tx_hash
                )))
            }
        }
    }
}

/// Drive the state machine over `stream` until the first terminal status.
/// Returns the last state reached if the stream ends early.
pub async fn follow(
    client: &dyn ChainClient,
    tx_hash: &TxHash,
    mut stream: TxStatusStream,
) -> TransactionOutcome {
    let chain = client.chain();
    let mut outcome = TransactionOutcome::Pending;

    while let Some(progress) = stream.next().await {
        outcome = match progress.status {
            TxStatus::InBlock(block) => {
                info!("{} included in block {} on chain {}", tx_hash, block, chain);
                TransactionOutcome::InBlock(block)
            }
            TxStatus::Finalized(block) => {
                let dispatch_error = progress
                    .dispatch_error
                    .or_else(|| extrinsic_failed_error(&progress.events));

                match dispatch_error {
                    Some(raw) => {
                        let descriptor = describe_dispatch_error(client, &raw).await;
                        warn!(
                            "{} failed in finalized block {} on chain {}: {:?}",
                            tx_hash, block, chain, descriptor
                        );
                        TransactionOutcome::Failed(descriptor)
                    }
                    None => {
                        info!("{} finalized in block {} on chain {}", tx_hash, block, chain);
                        TransactionOutcome::Finalized {
                            block,
                            events: progress.events,
                        }
                    }
                }
            }
            status @ (TxStatus::Usurped(_)
            | TxStatus::Dropped
            | TxStatus::Invalid
            | TxStatus::FinalityTimeout(_)) => {
                warn!("{} on chain {} ended as {}", tx_hash, chain, status.label());
                TransactionOutcome::Failed(ErrorDescriptor::Opaque {
                    message: format!("transaction {} {}", tx_hash, status.label()),
                })
            }
            status => {
                debug!("{} on chain {}: {}", tx_hash, chain, status.label());
                continue;
            }
        };

        if outcome.is_terminal() {
            break;
        }
    }

    outcome
}

/// Dispatch error carried by a `system.ExtrinsicFailed` event.
/// Falls back to the whole payload when the error field can't be located.
fn extrinsic_failed_error(events: &[ChainEvent]) -> Option<Value> {
    let event = events.iter().find(|e| e.is("system", "ExtrinsicFailed"))?;
    let error = match &event.data {
        Value::Array(fields) => fields.first().cloned(),
        Value::Object(fields) => fields.get("dispatchError").cloned(),
        _ => None,
    };
    Some(error.unwrap_or_else(|| event.data.clone()))
}

/// (pallet index, error code) of a module dispatch error, if present
pub fn module_error_index(raw: &Value) -> Option<(u8, u8)> {
    let module = raw.get("module").or_else(|| raw.get("Module"))?;
    let index = module.get("index")?.as_u64()?;
    let code = match module.get("error")? {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => {
            let bytes = hex::decode(s.trim_start_matches("0x")).ok()?;
            *bytes.first()? as u64
        }
        Value::Array(bytes) => bytes.first()?.as_u64()?,
        _ => return None,
    };

    Some((u8::try_from(index).ok()?, u8::try_from(code).ok()?))
}

async fn describe_dispatch_error(client: &dyn ChainClient, raw: &Value) -> ErrorDescriptor {
    if let Some((index, code)) = module_error_index(raw) {
        match client.module_error(index, code).await {
            Ok(Some(error)) => return ErrorDescriptor::Runtime(error),
            Ok(None) => debug!("No metadata entry for module error {}:{}", index, code),
            Err(e) => warn!("Module error lookup failed: {}", e),
        }
    }

    ErrorDescriptor::Opaque {
        message: raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainId, TxProgress};
    use crate::keys::AccountProvider;
    use crate::testing::FakeChainClient;
    use crate::tx::NonceManager;
    use futures::stream;
    use serde_json::json;

    fn hash(n: u8) -> BlockHash {
        BlockHash(format!("0x{:064x}", n))
    }

    fn tx_hash() -> TxHash {
        TxHash("0x01".to_string())
    }

    fn hrmp_error() -> ModuleError {
        ModuleError {
            section: "hrmp".to_string(),
            name: "OpenHrmpChannelToSelf".to_string(),
            documentation: "The sender tried to open a channel to themselves.".to_string(),
        }
    }

    async fn request(client: Arc<FakeChainClient>) -> TransactionRequest {
        let accounts = AccountProvider::new();
        accounts.warm_up().await.unwrap();
        TransactionRequest {
            chain: client,
            signer: accounts.identity("//Alice").unwrap(),
            call: RuntimeCall::new("system", "remark", json!({ "remark": "0x00" })),
        }
    }

    fn tracker(timeout: Option<Duration>) -> TransactionTracker {
        TransactionTracker::new(Arc::new(NonceManager::new()), timeout)
    }

    #[tokio::test]
    async fn test_in_block_is_not_terminal() {
        let client = FakeChainClient::new(ChainId::Parachain(1000));
        let updates = stream::iter(vec![
            TxProgress::status(TxStatus::Ready),
            TxProgress::status(TxStatus::InBlock(hash(1))),
        ])
        .boxed();

        let outcome = follow(&client, &tx_hash(), updates).await;
        assert_eq!(outcome, TransactionOutcome::InBlock(hash(1)));
        assert!(!outcome.is_terminal());
    }

    #[tokio::test]
    async fn test_finalized_carries_full_event_list() {
        let client = FakeChainClient::new(ChainId::Parachain(1000));
        let events = vec![
            ChainEvent::new("balances", "Withdraw", json!([])),
            ChainEvent::new("system", "ExtrinsicSuccess", json!([])),
        ];
        let updates = stream::iter(vec![
            TxProgress::status(TxStatus::InBlock(hash(1))),
            TxProgress {
                status: TxStatus::Finalized(hash(1)),
                events: events.clone(),
                dispatch_error: None,
            },
            TxProgress::status(TxStatus::Dropped),
        ])
        .boxed();

        let outcome = follow(&client, &tx_hash(), updates).await;
        assert_eq!(
            outcome,
            TransactionOutcome::Finalized {
                block: hash(1),
                events
            }
        );
    }

    #[tokio::test]
    async fn test_module_error_is_decoded() {
        let client = FakeChainClient::new(ChainId::Parachain(1000));
        client.register_module_error(60, 2, hrmp_error());
        let updates = stream::iter(vec![TxProgress {
            status: TxStatus::Finalized(hash(2)),
            events: vec![],
            dispatch_error: Some(json!({ "module": { "index": 60, "error": "0x02000000" } })),
        }])
        .boxed();

        let outcome = follow(&client, &tx_hash(), updates).await;
        assert_eq!(
            outcome,
            TransactionOutcome::Failed(ErrorDescriptor::Runtime(hrmp_error()))
        );
    }

    #[tokio::test]
    async fn test_undecodable_error_is_opaque_raw_string() {
        let client = FakeChainClient::new(ChainId::Parachain(1000));
        let raw = json!({ "other": "BadOrigin" });
        let updates = stream::iter(vec![TxProgress {
            status: TxStatus::Finalized(hash(3)),
            events: vec![],
            dispatch_error: Some(raw.clone()),
        }])
        .boxed();

        let outcome = follow(&client, &tx_hash(), updates).await;
        assert_eq!(
            outcome,
            TransactionOutcome::Failed(ErrorDescriptor::Opaque {
                message: raw.to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_extrinsic_failed_event_supplies_error() {
        let client = FakeChainClient::new(ChainId::Parachain(1000));
        client.register_module_error(60, 2, hrmp_error());
        let updates = stream::iter(vec![TxProgress {
            status: TxStatus::Finalized(hash(4)),
            events: vec![ChainEvent::new(
                "system",
                "ExtrinsicFailed",
                json!([{ "module": { "index": 60, "error": 2 } }, {}]),
            )],
            dispatch_error: None,
        }])
        .boxed();

        let outcome = follow(&client, &tx_hash(), updates).await;
        assert!(matches!(
            outcome,
            TransactionOutcome::Failed(ErrorDescriptor::Runtime(_))
        ));
    }

    #[tokio::test]
    async fn test_extrinsic_failed_without_error_field_is_opaque() {
        let client = FakeChainClient::new(ChainId::Parachain(1000));
        for data in [json!([]), json!({ "info": {} }), json!("BadOrigin")] {
            let updates = stream::iter(vec![TxProgress {
                status: TxStatus::Finalized(hash(4)),
                events: vec![ChainEvent::new("system", "ExtrinsicFailed", data.clone())],
                dispatch_error: None,
            }])
            .boxed();

            let outcome = follow(&client, &tx_hash(), updates).await;
            assert_eq!(
                outcome,
                TransactionOutcome::Failed(ErrorDescriptor::Opaque {
                    message: data.to_string()
                })
            );
        }
    }

    #[tokio::test]
    async fn test_dropped_and_invalid_are_opaque_failures() {
        let client = FakeChainClient::new(ChainId::Parachain(1000));
        for status in [
            TxStatus::Dropped,
            TxStatus::Invalid,
            TxStatus::Usurped("0x02".to_string()),
            TxStatus::FinalityTimeout(hash(5)),
        ] {
            let updates = stream::iter(vec![TxProgress::status(TxStatus::Ready), TxProgress::status(status)]).boxed();
            let outcome = follow(&client, &tx_hash(), updates).await;
            assert!(matches!(
                outcome,
                TransactionOutcome::Failed(ErrorDescriptor::Opaque { .. })
            ));
        }
    }

    #[test]
    fn test_module_error_index_formats() {
        assert_eq!(
            module_error_index(&json!({ "module": { "index": 10, "error": 3 } })),
            Some((10, 3))
        );
        assert_eq!(
            module_error_index(&json!({ "Module": { "index": 10, "error": "0x03000000" } })),
            Some((10, 3))
        );
        assert_eq!(
            module_error_index(&json!({ "module": { "index": 10, "error": [3, 0, 0, 0] } })),
            Some((10, 3))
        );
        assert_eq!(module_error_index(&json!("BadOrigin")), None);
    }

    #[tokio::test]
    async fn test_submit_and_track_success() {
        let client = Arc::new(FakeChainClient::new(ChainId::Parachain(1000)).with_next_index(7));
        let finalized = tracker(None)
            .submit_and_track(request(client.clone()).await)
            .await
            .unwrap();

        assert_eq!(&finalized.block, client.block_hash());
        assert_eq!(finalized.nonce, 7);
        assert_eq!(client.submissions().len(), 1);
        assert_eq!(client.submissions()[0].hash, finalized.tx_hash);
    }

    #[tokio::test]
    async fn test_submit_and_track_rejects_with_runtime_error() {
        let client = Arc::new(FakeChainClient::new(ChainId::Parachain(1000)));
        client.register_module_error(60, 2, hrmp_error());
        client.fail_next_with_module_error(60, 2);

        let err = tracker(None)
            .submit_and_track(request(client).await)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::RuntimeExecution(e) if e == hrmp_error()));
    }

    #[tokio::test]
    async fn test_timeout_rejects() {
        let client = Arc::new(FakeChainClient::new(ChainId::Parachain(1000)));
        client.push_hanging_script(vec![TxProgress::status(TxStatus::InBlock(hash(6)))]);

        let err = tracker(Some(Duration::from_millis(50)))
            .submit_and_track(request(client).await)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_stream_closing_early_is_opaque() {
        let client = Arc::new(FakeChainClient::new(ChainId::Parachain(1000)));
        client.push_script(vec![TxProgress::status(TxStatus::Ready)]);

        let err = tracker(None)
            .submit_and_track(request(client).await)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::OpaqueTransaction(_)));
    }

    #[tokio::test]
    async fn test_rejected_submission_releases_nonce() {
        let client = Arc::new(FakeChainClient::new(ChainId::Parachain(1000)));
        let tracker = tracker(None);

        client.reject_submissions(Some("1010: Invalid Transaction"));
        assert!(tracker.submit_and_track(request(client.clone()).await).await.is_err());

        client.reject_submissions(None);
        let finalized = tracker
            .submit_and_track(request(client).await)
            .await
            .unwrap();
        assert_eq!(finalized.nonce, 0);
    }

    #[tokio::test]
    async fn test_invalid_transaction_frees_its_nonce() {
        let client = Arc::new(FakeChainClient::new(ChainId::Parachain(1000)));
        let tracker = tracker(None);

        client.push_script(vec![
            TxProgress::status(TxStatus::Ready),
            TxProgress::status(TxStatus::Invalid),
        ]);
        let err = tracker
            .submit_and_track(request(client.clone()).await)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::OpaqueTransaction(_)));

        let finalized = tracker
            .submit_and_track(request(client.clone()).await)
            .await
            .unwrap();
        assert_eq!(finalized.nonce, 0);
        let used: Vec<u64> = client.submissions().iter().map(|s| s.nonce).collect();
        assert_eq!(used, vec![0, 0]);
    }

    #[tokio::test]
    async fn test_timed_out_transaction_frees_its_nonce() {
        let client = Arc::new(FakeChainClient::new(ChainId::Parachain(1000)));
        let tracker = tracker(Some(Duration::from_millis(50)));

        client.push_hanging_script(vec![TxProgress::status(TxStatus::Ready)]);
        assert!(tracker.submit_and_track(request(client.clone()).await).await.is_err());

        let finalized = tracker
            .submit_and_track(request(client).await)
            .await
            .unwrap();
        assert_eq!(finalized.nonce, 0);
    }

    #[tokio::test]
    async fn test_external_activity_advances_nonce() {
        let client = Arc::new(FakeChainClient::new(ChainId::Parachain(1000)));
        let tracker = tracker(None);

        let first = tracker
            .submit_and_track(request(client.clone()).await)
            .await
            .unwrap();
        assert_eq!(first.nonce, 0);

        client.set_next_index(5);
        let second = tracker
            .submit_and_track(request(client).await)
            .await
            .unwrap();
        assert_eq!(second.nonce, 5);
    }

    #[tokio::test]
    async fn test_runtime_failure_keeps_nonce_consumed() {
        let client = Arc::new(FakeChainClient::new(ChainId::Parachain(1000)));
        client.register_module_error(60, 2, hrmp_error());
        client.fail_next_with_module_error(60, 2);
        let tracker = tracker(None);

        assert!(tracker.submit_and_track(request(client.clone()).await).await.is_err());
        let finalized = tracker
            .submit_and_track(request(client).await)
            .await
            .unwrap();
        assert_eq!(finalized.nonce, 1);
    }
}
