//! Session ownership.
//!
//! The bearer token lives in exactly one place, the `SessionStore`. It is read on every outbound
//! request, written by login and logout, and dropped when the server rejects it. Persistence is
//! abstracted behind `TokenStorage` so the store can be exercised without touching the disk.

/// Persistence backends for the token
mod storage;
/// The process-wide session store
mod store;

pub use storage::{FileTokenStorage, MemoryTokenStorage, TokenStorage};
pub use store::{Session, SessionStore};

/// Error types for session persistence
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),

	#[error("JSON parse error: {0}")]
	JsonError(#[from] serde_json::Error),

	#[error("Corrupt session file: {0}")]
	Corrupt(String),

	#[error("Session storage lock poisoned")]
	Poisoned,
}
