//! HRMP channel establishment
//!
//! A channel is one-way and needs an open request from the sender and an
//! acceptance from the recipient. A bidirectional setup runs four tracked
//! transactions strictly in sequence and stops at the first failure. Steps that
//! already finalized stay on chain.

use super::summary::{ChannelSetupReport, TxSummary};
use super::Orchestrator;
use crate::chain::{ChainId, RuntimeCall};
use crate::error::{OrchestratorError, OrchestratorResult};

use serde_json::json;
use tracing::{info, warn};

/// Proposed channel limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    pub max_capacity: u32,
    pub max_message_size: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_capacity: 8,
            max_message_size: 1024,
        }
    }
}

impl ChannelConfig {
    pub fn new(max_capacity: u32, max_message_size: u32) -> OrchestratorResult<Self> {
        let config = Self {
            max_capacity,
            max_message_size,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.max_capacity == 0 {
            return Err(OrchestratorError::InvalidInput(
                "maxCapacity must be at least 1".to_string(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(OrchestratorError::InvalidInput(
                "maxMessageSize must be at least 1 byte".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum ChannelStep {
    Open { from: u32, to: u32 },
    Accept { acceptor: u32, sender: u32 },
}

impl ChannelStep {
    fn key(&self) -> String {
        match self {
            ChannelStep::Open { from, to } => format!("{}to{}", from, to),
            ChannelStep::Accept { acceptor, .. } => format!("accept{}", acceptor),
        }
    }
}

impl Orchestrator {
    /// Request a channel from `from` to `to`, submitted on `from`
    pub async fn open_channel(
        &self,
        from: u32,
        to: u32,
        config: ChannelConfig,
    ) -> OrchestratorResult<TxSummary> {
        config.validate()?;
        if from == to {
            return Err(OrchestratorError::InvalidInput(format!(
                "Cannot open a channel from {} to itself",
                from
            )));
        }
        self.pool.registry().get(ChainId::Parachain(to))?;

        let call = RuntimeCall::new(
            "hrmp",
            "hrmpInitOpenChannel",
            json!({
                "recipient": to,
                "proposedMaxCapacity": config.max_capacity,
                "proposedMaxMessageSize": config.max_message_size,
            }),
        );

        info!(
            "Opening channel {} -> {} (capacity {}, message size {})",
            from, to, config.max_capacity, config.max_message_size
        );
        self.execute(ChainId::Parachain(from), self.sudo()?, call)
            .await
    }

    /// Accept on `acceptor` the pending channel request from `sender`
    pub async fn accept_channel(&self, acceptor: u32, sender: u32) -> OrchestratorResult<TxSummary> {
        self.pool.registry().get(ChainId::Parachain(sender))?;

        let call = RuntimeCall::new("hrmp", "hrmpAcceptOpenChannel", json!({ "sender": sender }));

        info!("Accepting channel {} -> {} on {}", sender, acceptor, acceptor);
        self.execute(ChainId::Parachain(acceptor), self.sudo()?, call)
            .await
    }

    /// Open and accept channels in both directions between `a` and `b`.
    ///
    /// Order: open a->b, open b->a, accept on a, accept on b. A failing step
    /// aborts the rest and is reported together with the steps that completed.
    pub async fn setup_bidirectional_channels(
        &self,
        a: u32,
        b: u32,
        config: ChannelConfig,
    ) -> OrchestratorResult<ChannelSetupReport> {
        config.validate()?;
        if a == b {
            return Err(OrchestratorError::InvalidInput(format!(
                "Cannot set up channels between {} and itself",
                a
            )));
        }
        self.pool.registry().get(ChainId::Parachain(a))?;
        self.pool.registry().get(ChainId::Parachain(b))?;

        let steps = [
            ChannelStep::Open { from: a, to: b },
            ChannelStep::Open { from: b, to: a },
            ChannelStep::Accept {
                acceptor: a,
                sender: b,
            },
            ChannelStep::Accept {
                acceptor: b,
                sender: a,
            },
        ];

        let mut report = ChannelSetupReport::default();
        for step in steps {
            let key = step.key();
            let result = match step {
                ChannelStep::Open { from, to } => self.open_channel(from, to, config).await,
                ChannelStep::Accept { acceptor, sender } => {
                    self.accept_channel(acceptor, sender).await
                }
            };

            match result {
                Ok(summary) => report.record(key, summary),
                Err(e) => {
                    warn!("Channel setup {}<->{} failed at {}: {}", a, b, key, e);
                    return Err(OrchestratorError::ChannelSetup {
                        step: key,
                        completed: report,
                        source: Box::new(e),
                    });
                }
            }
        }

        info!("Bidirectional channels {}<->{} established", a, b);
        Ok(report)
    }
}
