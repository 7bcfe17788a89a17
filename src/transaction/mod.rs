//! Deposits and pix transfers.
//!
//! The server is the only source of truth for balances: a completed operation returns the
//! balance the server reports and nothing is computed locally.

/// Submission of mutations and completion observers
mod service;
/// Request, result and error types
mod types;

pub use service::{TransactionObserver, TransactionService};
pub use types::{TransactionError, TransactionRequest, TransactionResult};
