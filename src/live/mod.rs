//! Live subscriptions: a change hub that write paths publish to, a registry
//! that keeps one subscription per view, and snapshot streams that redeliver
//! the full result set whenever their filter key changes.

mod registry;
mod stream;

use tokio::sync::broadcast;

pub use self::registry::{LiveRegistry, SubscriptionHandle};
pub use self::stream::snapshot_stream;

const HUB_CAPACITY: usize = 256;

/// What a live query is filtered on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FilterKey {
    Members(String),
    Posts(String),
}

impl FilterKey {
    pub fn members(community_id: &str) -> Self {
        FilterKey::Members(community_id.to_string())
    }

    pub fn posts(community_id: &str) -> Self {
        FilterKey::Posts(community_id.to_string())
    }
}

/// Process-wide fan-out of change notifications.
#[derive(Clone)]
pub struct ChangeHub {
    tx: broadcast::Sender<FilterKey>,
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(HUB_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, key: FilterKey) {
        // No receivers just means nobody is watching.
        let watchers = self.tx.send(key.clone()).unwrap_or(0);
        tracing::debug!(?key, watchers, "Published change");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FilterKey> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_every_receiver() {
        let hub = ChangeHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        hub.publish(FilterKey::posts("c1"));
        assert_eq!(a.recv().await.unwrap(), FilterKey::posts("c1"));
        assert_eq!(b.recv().await.unwrap(), FilterKey::posts("c1"));
    }

    #[test]
    fn publish_without_receivers_is_fine() {
        ChangeHub::new().publish(FilterKey::members("c1"));
    }
}
