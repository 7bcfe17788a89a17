//!
//! Utility module for the bank client.
//!
//! Re-exports formatting helpers used by the command line front end.
/// Formatting for amounts and summaries
pub mod format;

pub use format::{format_amount, format_summary};
