use futures::stream::{self, Stream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;

use super::{ChangeHub, FilterKey, SubscriptionHandle};
use crate::error::AppError;

struct LiveQuery<F> {
    changes: Receiver<FilterKey>,
    handle: SubscriptionHandle,
    load: F,
    primed: bool,
}

/// Full-result-set stream for one live query.
///
/// Emits the current snapshot immediately, then a fresh snapshot after every
/// change published for the handle's filter key. Ends when the handle is
/// cancelled or the hub shuts down. Dropping the stream releases the handle.
pub fn snapshot_stream<T, F>(
    hub: &ChangeHub,
    handle: SubscriptionHandle,
    load: F,
) -> impl Stream<Item = Vec<T>> + Send
where
    T: Send + 'static,
    F: FnMut() -> Result<Vec<T>, AppError> + Send + 'static,
{
    // Subscribe before the first load so no change slips between the two.
    let query = LiveQuery {
        changes: hub.subscribe(),
        handle,
        load,
        primed: false,
    };

    stream::unfold(query, |mut query| async move {
        if !query.primed {
            query.primed = true;
            // A failed first read degrades to an empty list.
            let items = query.reload().unwrap_or_default();
            return Some((items, query));
        }

        loop {
            tokio::select! {
                _ = query.handle.cancelled() => {
                    tracing::debug!(view_id = query.handle.view_id(), "Live subscription cancelled");
                    return None;
                }
                change = query.changes.recv() => match change {
                    Ok(key) if &key == query.handle.key() => {
                        if let Some(items) = query.reload() {
                            return Some((items, query));
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Live subscription lagged, reloading");
                        if let Some(items) = query.reload() {
                            return Some((items, query));
                        }
                    }
                    Err(RecvError::Closed) => return None,
                },
            }
        }
    })
}

impl<F> LiveQuery<F> {
    fn reload<T>(&mut self) -> Option<Vec<T>>
    where
        F: FnMut() -> Result<Vec<T>, AppError>,
    {
        match (self.load)() {
            Ok(items) => Some(items),
            Err(e) => {
                // Keep the last delivered snapshot on screen.
                tracing::warn!(key = ?self.handle.key(), "Live query reload failed: {}", e);
                None
            }
        }
    }
}
