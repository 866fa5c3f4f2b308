//! Seam to the per-chain client runtime
//!
//! The orchestrator never encodes or signs at the wire level itself. It hands a
//! signed call envelope to a [`ChainClient`] and consumes the status stream the
//! runtime pushes back.

use super::types::{AccountBalance, ChainEndpoint, ChainId, ModuleError, TxHash, TxProgress};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::keys::AccountIdentity;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Push-based status stream for one submitted transaction.
/// Dropping the stream unsubscribes.
pub type TxStatusStream = BoxStream<'static, TxProgress>;

/// Connection to one chain's client runtime
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Endpoint this connection is bound to
    fn endpoint(&self) -> &ChainEndpoint;

    /// Next usable account nonce, counting transactions in the pool
    async fn account_next_index(&self, address: &str) -> OrchestratorResult<u64>;

    /// Submit a signed extrinsic and subscribe to its status transitions
    async fn submit_and_watch(&self, extrinsic: SignedExtrinsic)
        -> OrchestratorResult<TxStatusStream>;

    /// Read the balances of an account
    async fn account_balance(&self, address: &str) -> OrchestratorResult<AccountBalance>;

    /// Resolve a (pallet index, error code) pair through the chain metadata
    async fn module_error(
        &self,
        pallet_index: u8,
        error_code: u8,
    ) -> OrchestratorResult<Option<ModuleError>>;

    fn chain(&self) -> ChainId {
        self.endpoint().chain
    }

    /// Whether the underlying transport is still usable
    fn is_connected(&self) -> bool {
        true
    }
}

/// Opens connections; the handshake is complete when `connect` resolves
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainConnector: Send + Sync {
    async fn connect(&self, endpoint: &ChainEndpoint) -> OrchestratorResult<Arc<dyn ChainClient>>;
}

/// Runtime call, addressed by pallet and call name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeCall {
    pub pallet: String,
    pub call: String,
    pub args: serde_json::Value,
}

impl RuntimeCall {
    pub fn new(pallet: &str, call: &str, args: serde_json::Value) -> Self {
        Self {
            pallet: pallet.to_string(),
            call: call.to_string(),
            args,
        }
    }

    pub fn name(&self) -> String {
        format!("{}.{}", self.pallet, self.call)
    }
}

#[derive(Serialize)]
struct SigningPayload<'a> {
    chain: ChainId,
    nonce: u64,
    call: &'a RuntimeCall,
}

/// A call signed by an account, ready for submission
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedExtrinsic {
    pub call: RuntimeCall,
    pub signer: String,
    pub nonce: u64,
    pub signature: String,
    #[serde(skip)]
    pub hash: TxHash,
}

impl SignedExtrinsic {
    /// Sign `call` for submission on `chain` with the given nonce
    pub fn sign(
        chain: ChainId,
        signer: &AccountIdentity,
        nonce: u64,
        call: RuntimeCall,
    ) -> OrchestratorResult<Self> {
        let payload = serde_json::to_vec(&SigningPayload {
            chain,
            nonce,
            call: &call,
        })
        .map_err(|e| OrchestratorError::Internal(format!("Failed to encode call: {}", e)))?;

        let signature = signer.sign(&payload);

        let mut envelope = payload;
        envelope.extend_from_slice(&signature);
        let hash = TxHash::from_bytes(blake2b_simd::Params::new().hash_length(32).hash(&envelope).as_bytes());

        Ok(Self {
            call,
            signer: signer.address.clone(),
            nonce,
            signature: format!("0x{}", hex::encode(signature)),
            hash,
        })
    }
}
