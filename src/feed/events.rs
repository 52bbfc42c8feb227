use std::time::Duration;
use tokio::sync::mpsc;

use super::error::Action;
use crate::model::{FeedSource, Id};

/// Notifications emitted by the feed for presentation code.
///
/// Delivery is best-effort: a full or closed channel drops the event
/// rather than stalling the feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// The item list or phase of a source changed.
    ItemsChanged { source: FeedSource },
    /// A page was merged into a source's cache.
    PageLoaded {
        source: FeedSource,
        page: u32,
        received: usize,
    },
    /// A request was rate limited and will be retried after `delay`.
    RateLimited {
        channel: String,
        attempt: u32,
        delay: Duration,
    },
    /// An optimistic mutation failed and was rolled back.
    MutationFailed {
        action: Action,
        item_id: Id,
        message: String,
    },
}

/// Send without awaiting; the feed never blocks on a slow consumer.
pub(crate) fn emit(tx: Option<&mpsc::Sender<FeedEvent>>, event: FeedEvent) {
    let Some(tx) = tx else {
        return;
    };
    if let Err(e) = tx.try_send(event) {
        tracing::debug!(error = %e, "Feed event dropped");
    }
}
