//! Cross-chain token transfers via `xTokens.transfer`

use super::summary::TransferReceipt;
use super::Orchestrator;
use crate::chain::{ChainId, RuntimeCall};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::keys::ss58_decode;
use crate::xcm::{build_asset, build_location};

use serde::Deserialize;
use serde_json::json;
use tracing::info;

pub const DEFAULT_SYMBOL: &str = "UNIT";
pub const DEFAULT_SIGNER: &str = "//Alice";

/// Transfer parameters. `amount` is a decimal string in the token's base unit.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub from: u32,
    pub to: u32,
    pub amount: String,
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_signer")]
    pub signer_seed: String,
    /// SS58 address on the destination; the signer's own account when absent
    #[serde(default)]
    pub beneficiary: Option<String>,
}

fn default_symbol() -> String {
    DEFAULT_SYMBOL.to_string()
}

fn default_signer() -> String {
    DEFAULT_SIGNER.to_string()
}

impl TransferRequest {
    pub fn new(from: u32, to: u32, amount: impl Into<String>) -> Self {
        Self {
            from,
            to,
            amount: amount.into(),
            symbol: default_symbol(),
            signer_seed: default_signer(),
            beneficiary: None,
        }
    }

    pub fn symbol(mut self, symbol: &str) -> Self {
        self.symbol = symbol.to_string();
        self
    }

    pub fn signer(mut self, seed: &str) -> Self {
        self.signer_seed = seed.to_string();
        self
    }

    pub fn beneficiary(mut self, address: &str) -> Self {
        self.beneficiary = Some(address.to_string());
        self
    }
}

fn parse_amount(amount: &str) -> OrchestratorResult<u128> {
    let value: u128 = amount
        .trim()
        .parse()
        .map_err(|_| OrchestratorError::InvalidInput(format!("Invalid amount: {:?}", amount)))?;
    if value == 0 {
        return Err(OrchestratorError::InvalidInput(
            "Amount must be greater than zero".to_string(),
        ));
    }
    Ok(value)
}

impl Orchestrator {
    /// Send `amount` of `symbol` from one parachain to an account on a sibling.
    ///
    /// The source must be on the transfer allow-list. The token is addressed as
    /// a local currency and assumed to be registered on the destination.
    pub async fn transfer(&self, request: TransferRequest) -> OrchestratorResult<TransferReceipt> {
        let source = ChainId::Parachain(request.from);
        if !self.transfer_sources.contains(&request.from) {
            return Err(OrchestratorError::UnsupportedChain { chain: source });
        }
        self.pool.registry().get(ChainId::Parachain(request.to))?;

        let amount = parse_amount(&request.amount)?;
        if request.symbol.is_empty() {
            return Err(OrchestratorError::InvalidInput("Token symbol is empty".to_string()));
        }

        let signer = self.accounts.identity(&request.signer_seed)?;
        let (beneficiary, beneficiary_address) = match &request.beneficiary {
            Some(address) => (ss58_decode(address)?, address.clone()),
            None => (signer.public_key(), signer.address.clone()),
        };

        let dest = build_location(request.to, Some(beneficiary));
        let asset = build_asset(&request.symbol, None);
        let call = RuntimeCall::new(
            "xTokens",
            "transfer",
            json!({
                "currencyId": asset.to_json(),
                "amount": amount.to_string(),
                "dest": dest.to_json(),
                "destWeightLimit": "Unlimited",
            }),
        );

        info!(
            "Transferring {} {} from {} to {} for {}",
            request.amount, request.symbol, request.from, request.to, beneficiary_address
        );

        let sender_address = signer.address.clone();
        let summary = self.execute(source, signer, call).await?;

        Ok(TransferReceipt {
            from: request.from,
            to: request.to,
            amount: request.amount,
            symbol: request.symbol,
            sender_address,
            beneficiary_address,
            tx_hash: summary.tx_hash,
            block_hash: summary.block_hash,
            events: summary.events,
        })
    }
}
