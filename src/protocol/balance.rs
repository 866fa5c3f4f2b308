//! Balance reads

use super::summary::AccountBalanceEntry;
use super::Orchestrator;
use crate::chain::{AccountBalance, ChainId};
use crate::error::OrchestratorResult;

use futures::future::try_join_all;
use tracing::debug;

impl Orchestrator {
    /// Single balance read; no transaction is involved
    pub async fn balance_of(&self, para_id: u32, address: &str) -> OrchestratorResult<AccountBalance> {
        let chain = ChainId::Parachain(para_id);
        let client = self.pool.get_connection(chain).await?;

        let balance = client.account_balance(address).await?;
        debug!("Balance of {} on {}: {} free", address, chain, balance.free);
        Ok(balance)
    }

    /// Balances of every well-known dev account on `para_id`, in canonical order
    pub async fn balances_for_well_known_accounts(
        &self,
        para_id: u32,
    ) -> OrchestratorResult<Vec<AccountBalanceEntry>> {
        let chain = ChainId::Parachain(para_id);
        let client = self.pool.get_connection(chain).await?;
        let identities = self.accounts.well_known()?;

        let balances = try_join_all(
            identities
                .iter()
                .map(|identity| client.account_balance(&identity.address)),
        )
        .await?;

        Ok(identities
            .into_iter()
            .zip(balances)
            .map(|(identity, balance)| AccountBalanceEntry {
                name: identity.name,
                address: identity.address,
                balance,
            })
            .collect())
    }
}
