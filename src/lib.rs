//! XCM Orchestrator - cross-chain messaging between parachains
//!
//! Manages one connection per relay/parachain node, submits signed
//! transactions and follows them to finality, and composes those into HRMP
//! channel setup, cross-chain token transfers and balance queries.

pub mod api;
pub mod chain;
pub mod config;
pub mod error;
pub mod events;
pub mod keys;
pub mod metrics;
pub mod protocol;
pub mod testing;
pub mod tx;
pub mod xcm;

pub use error::{OrchestratorError, OrchestratorResult};
pub use protocol::Orchestrator;
