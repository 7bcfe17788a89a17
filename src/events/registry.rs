use super::topic::topic_matches;
use super::{EventHandler, EventMessage};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Handle returned by `subscribe`, used to remove the subscription again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    pattern: String,
    handler: Arc<dyn EventHandler>,
}

/// Registered handlers, independent of any broker connection.
///
/// The registry outlives connections: on every (re)connect the channel re-issues
/// `patterns()` to the broker, and handlers stay registered exactly once.
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    next_id: u64,
    subscriptions: Vec<Subscription>,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a handler. The flag is `true` if no other handler used this pattern yet,
    /// meaning the broker has to be told about it.
    pub(crate) fn add(&mut self, pattern: &str, handler: Arc<dyn EventHandler>) -> (SubscriptionId, bool) {
        let first_for_pattern = !self.subscriptions.iter().any(|s| s.pattern == pattern);
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        debug!(
            "Registered handler {} for {} ({:?})",
            handler.name(),
            pattern,
            id
        );
        self.subscriptions.push(Subscription {
            id,
            pattern: pattern.to_string(),
            handler,
        });
        (id, first_for_pattern)
    }

    /// Remove a handler. Returns its pattern and whether it was the last one using it.
    pub(crate) fn remove(&mut self, id: SubscriptionId) -> Option<(String, bool)> {
        let index = self.subscriptions.iter().position(|s| s.id == id)?;
        let removed = self.subscriptions.remove(index);
        let last_for_pattern = !self
            .subscriptions
            .iter()
            .any(|s| s.pattern == removed.pattern);
        Some((removed.pattern, last_for_pattern))
    }

    /// Distinct patterns, in a stable order.
    pub(crate) fn patterns(&self) -> Vec<String> {
        self.subscriptions
            .iter()
            .map(|s| s.pattern.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub(crate) fn matching(&self, topic: &str) -> Vec<Arc<dyn EventHandler>> {
        self.subscriptions
            .iter()
            .filter(|s| topic_matches(&s.pattern, topic))
            .map(|s| s.handler.clone())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.subscriptions.len()
    }
}

/// Parse an inbound payload and hand it to `handlers`.
///
/// A payload that is not valid JSON is logged and dropped; it never reaches a handler and
/// never surfaces as an error. Returns the number of handlers invoked.
pub(crate) async fn dispatch(
    handlers: Vec<Arc<dyn EventHandler>>,
    topic: &str,
    payload: &[u8],
) -> usize {
    if handlers.is_empty() {
        debug!("No handler for message on {}", topic);
        return 0;
    }

    let payload = match serde_json::from_slice::<serde_json::Value>(payload) {
        Ok(value) => value,
        Err(e) => {
            warn!(
                "Dropping malformed event payload on {} ({} bytes): {}",
                topic,
                payload.len(),
                e
            );
            return 0;
        }
    };

    let message = EventMessage {
        topic: topic.to_string(),
        payload,
    };
    for handler in &handlers {
        handler.handle(&message).await;
    }
    handlers.len()
}
