//! Location and asset descriptors
//!
//! Everything here targets sibling parachains through the common relay chain,
//! so every location has exactly one parent hop.

use serde_json::{json, Value};

/// Descriptor format version understood by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XcmVersion {
    V3,
}

impl XcmVersion {
    fn tag(&self) -> &'static str {
        match self {
            XcmVersion::V3 => "V3",
        }
    }
}

/// One step of a location's interior path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Junction {
    Parachain(u32),
    AccountId32 {
        id: [u8; 32],
        network: Option<String>,
    },
}

impl Junction {
    fn to_json(&self) -> Value {
        match self {
            Junction::Parachain(id) => json!({ "Parachain": id }),
            Junction::AccountId32 { id, network } => json!({
                "AccountId32": {
                    "network": network,
                    "id": format!("0x{}", hex::encode(id)),
                }
            }),
        }
    }
}

/// Hop-counted address relative to the submitting chain.
/// Interior order is significant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationDescriptor {
    pub version: XcmVersion,
    pub parents: u8,
    pub interior: Vec<Junction>,
}

impl LocationDescriptor {
    /// Versioned JSON form, e.g. `{"V3": {"parents": 1, "interior": {"X1": {...}}}}`
    pub fn to_json(&self) -> Value {
        let interior = match self.interior.len() {
            0 => json!("Here"),
            1 => json!({ "X1": self.interior[0].to_json() }),
            n => {
                let junctions: Vec<Value> = self.interior.iter().map(Junction::to_json).collect();
                json!({ format!("X{}", n): junctions })
            }
        };

        json!({
            self.version.tag(): {
                "parents": self.parents,
                "interior": interior,
            }
        })
    }
}

/// Asset identifier as the runtime's currency id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetDescriptor {
    Local { symbol: String },
    Foreign { origin: u32, symbol: String },
}

impl AssetDescriptor {
    pub fn symbol(&self) -> &str {
        match self {
            AssetDescriptor::Local { symbol } | AssetDescriptor::Foreign { symbol, .. } => symbol,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            AssetDescriptor::Local { symbol } => json!({ "Token": symbol }),
            AssetDescriptor::Foreign { origin, symbol } => json!({
                "ForeignAsset": { "origin": origin, "symbol": symbol }
            }),
        }
    }
}

/// Location of a sibling parachain, optionally down to an account on it
pub fn build_location(dest_para_id: u32, account: Option<[u8; 32]>) -> LocationDescriptor {
    let mut interior = vec![Junction::Parachain(dest_para_id)];
    if let Some(id) = account {
        interior.push(Junction::AccountId32 { id, network: None });
    }

    LocationDescriptor {
        version: XcmVersion::V3,
        parents: 1,
        interior,
    }
}

pub fn build_asset(symbol: &str, origin: Option<u32>) -> AssetDescriptor {
    match origin {
        None => AssetDescriptor::Local {
            symbol: symbol.to_string(),
        },
        Some(origin) => AssetDescriptor::Foreign {
            origin,
            symbol: symbol.to_string(),
        },
    }
}
