use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

use super::FilterKey;

struct ActiveSubscription {
    id: u64,
    key: FilterKey,
    cancel: oneshot::Sender<()>,
}

/// Tracks the single live subscription each view instance may hold.
#[derive(Default)]
pub struct LiveRegistry {
    active: Mutex<HashMap<String, ActiveSubscription>>,
    next_id: AtomicU64,
}

impl LiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a subscription for `view_id`. Any subscription the view already
    /// holds is cancelled before the new one is registered.
    pub fn open(self: &Arc<Self>, view_id: &str, key: FilterKey) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel, cancelled) = oneshot::channel();

        let mut active = self.lock();
        if let Some(previous) = active.remove(view_id) {
            tracing::debug!(view_id, old = ?previous.key, new = ?key, "Replacing live subscription");
            let _ = previous.cancel.send(());
        }
        active.insert(
            view_id.to_string(),
            ActiveSubscription {
                id,
                key: key.clone(),
                cancel,
            },
        );
        drop(active);

        SubscriptionHandle {
            id,
            view_id: view_id.to_string(),
            key,
            cancelled: Some(cancelled),
            registry: Arc::clone(self),
        }
    }

    /// Explicit teardown, e.g. when a view unmounts without dropping its stream.
    pub fn close(&self, view_id: &str) -> bool {
        match self.lock().remove(view_id) {
            Some(sub) => {
                let _ = sub.cancel.send(());
                true
            }
            None => false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    pub fn key_for(&self, view_id: &str) -> Option<FilterKey> {
        self.lock().get(view_id).map(|s| s.key.clone())
    }

    fn release(&self, view_id: &str, id: u64) {
        let mut active = self.lock();
        if active.get(view_id).map(|s| s.id) == Some(id) {
            active.remove(view_id);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ActiveSubscription>> {
        // A panic while holding the lock cannot leave the map inconsistent.
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Owned by the stream serving a subscription; deregisters on drop.
pub struct SubscriptionHandle {
    id: u64,
    view_id: String,
    key: FilterKey,
    cancelled: Option<oneshot::Receiver<()>>,
    registry: Arc<LiveRegistry>,
}

impl SubscriptionHandle {
    pub fn key(&self) -> &FilterKey {
        &self.key
    }

    pub fn view_id(&self) -> &str {
        &self.view_id
    }

    /// Resolves once the registry cancels this subscription.
    pub async fn cancelled(&mut self) {
        if let Some(rx) = self.cancelled.as_mut() {
            let _ = rx.await;
            self.cancelled = None;
        }
    }

    pub fn is_cancelled(&mut self) -> bool {
        match self.cancelled.as_mut() {
            Some(rx) => !matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)),
            None => true,
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.registry.release(&self.view_id, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn reopening_a_view_cancels_the_previous_subscription() {
        let registry = Arc::new(LiveRegistry::new());
        let mut first = registry.open("view-1", FilterKey::members("c1"));
        assert!(!first.is_cancelled());

        let second = registry.open("view-1", FilterKey::members("c2"));
        assert!(first.is_cancelled());
        assert_eq!(registry.active_count(), 1);
        assert_eq!(registry.key_for("view-1"), Some(FilterKey::members("c2")));

        // Dropping the stale handle must not evict the live one.
        drop(first);
        assert_eq!(registry.active_count(), 1);
        drop(second);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn cancelled_future_wakes_on_replacement() {
        let registry = Arc::new(LiveRegistry::new());
        let mut first = registry.open("view-1", FilterKey::posts("c1"));
        {
            let mut waiting = task::spawn(first.cancelled());
            assert_pending!(waiting.poll());
            let _second = registry.open("view-1", FilterKey::posts("c1"));
            assert!(waiting.is_woken());
            assert_ready!(waiting.poll());
        }
    }

    #[test]
    fn views_are_independent() {
        let registry = Arc::new(LiveRegistry::new());
        let mut a = registry.open("a", FilterKey::posts("c1"));
        let _b = registry.open("b", FilterKey::posts("c1"));
        assert!(!a.is_cancelled());
        assert_eq!(registry.active_count(), 2);
    }

    #[test]
    fn explicit_close_tears_down() {
        let registry = Arc::new(LiveRegistry::new());
        let mut handle = registry.open("view", FilterKey::members("c1"));
        assert!(registry.close("view"));
        assert!(handle.is_cancelled());
        assert!(!registry.close("view"));
        assert_eq!(registry.active_count(), 0);
    }
}
