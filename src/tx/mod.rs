//! Transaction submission with explicit nonce management and finality tracking

mod nonce;
mod tracker;

pub use nonce::{NonceManager, NonceSource};
pub use tracker::{
    follow, module_error_index, ErrorDescriptor, FinalizedTransaction, TransactionOutcome,
    TransactionRequest, TransactionTracker,
};
