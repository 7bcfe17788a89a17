//!
//! Client core for the bank simulator with a digital twin.
//!
//! The crate keeps a single consistent view of server-owned account state (balance and the
//! digital twin summary) while three things happen concurrently: the bearer session may expire,
//! the user submits deposits and transfers, and the broker pushes events that invalidate the
//! cached view. The pieces, leaves first:
//!
//! - `session`: the persisted bearer token.
//! - `api`: the HTTP gateway, its error taxonomy, authentication and read-side calls.
//! - `transaction`: deposits and pix transfers, never retried.
//! - `events`: the MQTT-over-WebSocket event channel with wildcard topic dispatch.
//! - `sync`: the coalescing refresh orchestrator that owns the cached snapshot.

/// HTTP gateway, authentication and account reads
pub mod api;
/// Environment-driven client configuration
pub mod config;
/// Broker connection and topic dispatch
pub mod events;
/// Bearer token ownership and persistence
pub mod session;
/// Coalescing refresh of the cached account view
pub mod sync;
/// Deposit and transfer submission
pub mod transaction;
/// Formatting helpers
pub mod utils;

pub use api::{AccountApi, ApiError, AuthService, RequestClient, TwinSummary};
pub use config::{ClientConfig, ConfigError};
pub use events::{
    ChannelConfig, ChannelStatus, EventChannel, EventError, EventHandler, EventMessage, SubscriptionId,
};
pub use session::{
    FileTokenStorage, MemoryTokenStorage, Session, SessionError, SessionStore, TokenStorage,
};
pub use sync::{AccountReader, CacheSnapshot, RefreshOutcome, RefreshReason, SyncOrchestrator};
pub use transaction::{
    TransactionError, TransactionObserver, TransactionRequest, TransactionResult, TransactionService,
};
