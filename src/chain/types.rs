//! Value types exchanged with the per-chain client runtime

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Logical chain identifier: the relay chain or one of its parachains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChainId {
    Relay,
    Parachain(u32),
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainId::Relay => write!(f, "relay"),
            ChainId::Parachain(id) => write!(f, "{}", id),
        }
    }
}

impl Serialize for ChainId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ChainId::Relay => serializer.serialize_str("relay"),
            ChainId::Parachain(id) => serializer.serialize_u32(*id),
        }
    }
}

/// Static endpoint configuration for one chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainEndpoint {
    pub chain: ChainId,
    pub url: String,
}

/// Hex-encoded 32-byte block hash as reported by the node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockHash(pub String);

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hex-encoded transaction hash
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(pub String);

impl TxHash {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        TxHash(format!("0x{}", hex::encode(bytes)))
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A ledger event emitted by a finalized transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEvent {
    /// Emitting pallet, e.g. `balances`
    pub section: String,
    /// Event name, e.g. `Transfer`
    pub method: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ChainEvent {
    pub fn new(section: &str, method: &str, data: serde_json::Value) -> Self {
        Self {
            section: section.to_string(),
            method: method.to_string(),
            data,
        }
    }

    pub fn is(&self, section: &str, method: &str) -> bool {
        self.section == section && self.method == method
    }
}

/// Transaction pool status, as pushed by `author_submitAndWatchExtrinsic`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TxStatus {
    Future,
    Ready,
    Broadcast(Vec<String>),
    InBlock(BlockHash),
    Retracted(BlockHash),
    FinalityTimeout(BlockHash),
    Finalized(BlockHash),
    Usurped(String),
    Dropped,
    Invalid,
}

impl TxStatus {
    pub fn label(&self) -> &'static str {
        match self {
            TxStatus::Future => "future",
            TxStatus::Ready => "ready",
            TxStatus::Broadcast(_) => "broadcast",
            TxStatus::InBlock(_) => "inBlock",
            TxStatus::Retracted(_) => "retracted",
            TxStatus::FinalityTimeout(_) => "finalityTimeout",
            TxStatus::Finalized(_) => "finalized",
            TxStatus::Usurped(_) => "usurped",
            TxStatus::Dropped => "dropped",
            TxStatus::Invalid => "invalid",
        }
    }
}

/// One notification on a transaction's status stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxProgress {
    pub status: TxStatus,
    /// Ordered events of the including block, present once included
    #[serde(default)]
    pub events: Vec<ChainEvent>,
    /// Raw dispatch error reported by the runtime, if execution failed
    #[serde(default)]
    pub dispatch_error: Option<serde_json::Value>,
}

impl TxProgress {
    pub fn status(status: TxStatus) -> Self {
        Self {
            status,
            events: Vec::new(),
            dispatch_error: None,
        }
    }
}

/// Decoded runtime module error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleError {
    pub section: String,
    pub name: String,
    #[serde(default)]
    pub documentation: String,
}

impl fmt::Display for ModuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {}", self.section, self.name, self.documentation)
    }
}

/// Free/reserved/frozen balances of one account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBalance {
    #[serde(with = "u128_string")]
    pub free: u128,
    #[serde(with = "u128_string")]
    pub reserved: u128,
    #[serde(with = "u128_string", default)]
    pub misc_frozen: u128,
    #[serde(with = "u128_string", default)]
    pub fee_frozen: u128,
}

/// Balances travel as decimal strings; numbers and `0x` hex are accepted on input
pub(crate) mod u128_string {
    use super::*;

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        deserializer.deserialize_any(U128Visitor)
    }

    struct U128Visitor;

    impl<'de> de::Visitor<'de> for U128Visitor {
        type Value = u128;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an unsigned integer, decimal string or 0x-prefixed hex string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
            Ok(v as u128)
        }

        fn visit_u128<E: de::Error>(self, v: u128) -> Result<u128, E> {
            Ok(v)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
            let parsed = match v.strip_prefix("0x") {
                Some(hex) => u128::from_str_radix(hex, 16),
                None => v.replace(',', "").parse::<u128>(),
            };
            parsed.map_err(|e| E::custom(format!("invalid balance {:?}: {}", v, e)))
        }
    }
}
