//! Event channel integration for the bank broker.
//!
//! The backend publishes one message per account action on `banco/{user}/events`. This module
//! keeps a persistent MQTT-over-WebSocket connection to the broker, re-issues subscriptions on
//! every (re)connect and dispatches inbound messages to handlers whose pattern matches the
//! message topic.
//!
//! Delivery is at-least-once and unordered across publishers, so consumers treat a message as a
//! signal that server state changed, never as a delta to apply.

/// Connection lifecycle, reconnect and keepalive
mod channel;
/// MQTT 3.1.1 wire format
pub mod packet;
/// Handler bookkeeping and payload dispatch
mod registry;
/// Wildcard topic matching
pub mod topic;

pub use channel::{ChannelConfig, ChannelStatus, EventChannel};
pub use registry::SubscriptionId;
pub use topic::{topic_matches, validate_pattern};

/// A parsed inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMessage {
    /// Concrete topic the message was published on.
    pub topic: String,
    /// JSON payload. Schema is owned by the publisher.
    pub payload: serde_json::Value,
}

/// Trait for consuming event channel messages.
///
/// Handlers are invoked on the channel's connection task; they should hand work off rather than
/// block it.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle a message whose topic matched the handler's pattern.
    async fn handle(&self, message: &EventMessage);

    /// Get the name of this handler for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Error types for the event channel
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("WebSocket error: {0}")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid topic pattern {pattern:?}: {reason}")]
    InvalidPattern {
        pattern: String,
        reason: &'static str,
    },

    #[error("MQTT protocol error: {0}")]
    Protocol(String),

    #[error("Broker refused connection (return code {0})")]
    ConnectionRefused(u8),

    #[error("Connection closed by broker")]
    ConnectionClosed,

    #[error("No traffic from broker within {0:?}")]
    KeepaliveTimeout(std::time::Duration),

    #[error("Event channel is shut down")]
    Closed,
}
