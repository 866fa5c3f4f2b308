//! Error types for the XCM orchestrator

use crate::chain::{ChainId, ModuleError};
use crate::protocol::ChannelSetupReport;
use thiserror::Error;

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error for chain {chain}: {message}")]
    Connection { chain: ChainId, message: String },

    #[error("Cryptography is not ready; await warm-up before deriving accounts")]
    CryptoNotReady,

    #[error("Chain {chain} is not supported")]
    UnsupportedChain { chain: ChainId },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Runtime execution error {0}")]
    RuntimeExecution(ModuleError),

    #[error("Transaction failed: {0}")]
    OpaqueTransaction(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Query failed on chain {chain}: {message}")]
    Query { chain: ChainId, message: String },

    #[error("Nonce error for chain {chain}: {message}")]
    Nonce { chain: ChainId, message: String },

    #[error("Channel setup failed at step {step}: {source}")]
    ChannelSetup {
        step: String,
        /// Steps that finalized before `step` failed; they stay on chain
        completed: ChannelSetupReport,
        #[source]
        source: Box<OrchestratorError>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            OrchestratorError::ChannelSetup { source, .. } => source.is_retryable(),
            other => matches!(
                other,
                OrchestratorError::Connection { .. }
                    | OrchestratorError::CryptoNotReady
                    | OrchestratorError::OpaqueTransaction(_)
                    | OrchestratorError::Timeout { .. }
                    | OrchestratorError::Nonce { .. }
            ),
        }
    }

    /// Stable code reported to API callers
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::Config(_) => "config",
            OrchestratorError::Connection { .. } => "connection",
            OrchestratorError::CryptoNotReady => "crypto_not_ready",
            OrchestratorError::UnsupportedChain { .. } => "unsupported_chain",
            OrchestratorError::InvalidInput(_) => "invalid_input",
            OrchestratorError::RuntimeExecution(_) => "runtime_execution",
            OrchestratorError::OpaqueTransaction(_) => "opaque_transaction",
            OrchestratorError::Timeout { .. } => "timeout",
            OrchestratorError::Query { .. } => "query",
            OrchestratorError::Nonce { .. } => "nonce",
            OrchestratorError::ChannelSetup { .. } => "channel_setup",
            OrchestratorError::Internal(_) => "internal",
        }
    }

    /// Innermost error, looking through channel setup step wrappers
    pub fn root_cause(&self) -> &OrchestratorError {
        match self {
            OrchestratorError::ChannelSetup { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
