//! Caller-facing result records

use crate::chain::{AccountBalance, BlockHash, ChainEndpoint, ChainId, TxHash};
use crate::events::{classify, ClassifiedEvents};
use crate::tx::FinalizedTransaction;

use serde::ser::{Serialize, SerializeMap, Serializer};

/// Outcome of one finalized transaction
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxSummary {
    pub chain: ChainId,
    pub tx_hash: TxHash,
    pub block_hash: BlockHash,
    pub nonce: u64,
    pub events: ClassifiedEvents,
}

impl TxSummary {
    pub fn new(chain: ChainId, finalized: FinalizedTransaction) -> Self {
        Self {
            chain,
            events: classify(&finalized.events),
            tx_hash: finalized.tx_hash,
            block_hash: finalized.block,
            nonce: finalized.nonce,
        }
    }
}

/// Per-step outcomes of a bidirectional channel setup, in execution order.
/// Serializes as a map keyed `"{src}to{dst}"` / `"accept{chain}"`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelSetupReport {
    steps: Vec<(String, TxSummary)>,
}

impl ChannelSetupReport {
    pub(crate) fn record(&mut self, key: String, summary: TxSummary) {
        self.steps.push((key, summary));
    }

    pub fn get(&self, key: &str) -> Option<&TxSummary> {
        self.steps.iter().find(|(k, _)| k == key).map(|(_, s)| s)
    }

    /// Step keys in the order they finalized
    pub fn keys(&self) -> Vec<String> {
        self.steps.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Serialize for ChannelSetupReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.steps.len()))?;
        for (key, summary) in &self.steps {
            map.serialize_entry(key, summary)?;
        }
        map.end()
    }
}

/// Result of a cross-chain transfer. `amount` and `symbol` echo the request.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReceipt {
    pub from: u32,
    pub to: u32,
    pub amount: String,
    pub symbol: String,
    pub sender_address: String,
    pub beneficiary_address: String,
    pub tx_hash: TxHash,
    pub block_hash: BlockHash,
    pub events: ClassifiedEvents,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionsReport {
    pub relay_endpoint: String,
    pub parachain_endpoints: Vec<ChainEndpoint>,
}

/// Balance of one named account
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct AccountBalanceEntry {
    pub name: String,
    pub address: String,
    pub balance: AccountBalance,
}
