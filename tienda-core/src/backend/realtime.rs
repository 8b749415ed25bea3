//! In-process fan-out of change notifications and broadcast messages.
//!
//! Both backends push everything they receive into one `RealtimeHub`; each
//! feed filters for its own subscriber. Dropping a feed unsubscribes.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use super::{BroadcastMessage, ChangeEvent, ChangeFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedError {
    /// The subscriber fell behind and `n` notifications were dropped.
    Lagged(u64),
    /// The backend is gone.
    Closed,
}

#[derive(Clone)]
pub struct RealtimeHub {
    changes: broadcast::Sender<ChangeEvent>,
    broadcasts: broadcast::Sender<BroadcastMessage>,
}

impl RealtimeHub {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (changes, _) = broadcast::channel(capacity);
        let (broadcasts, _) = broadcast::channel(capacity);
        Self { changes, broadcasts }
    }

    pub fn publish_change(&self, event: ChangeEvent) {
        // No subscribers is not an error.
        let _ = self.changes.send(event);
    }

    pub fn publish_broadcast(&self, message: BroadcastMessage) {
        let _ = self.broadcasts.send(message);
    }

    pub fn change_feed(&self, filter: ChangeFilter) -> ChangeFeed {
        ChangeFeed {
            filter,
            rx: self.changes.subscribe(),
        }
    }

    pub fn broadcast_feed(&self, channel: &str) -> BroadcastFeed {
        BroadcastFeed {
            channel: channel.to_string(),
            rx: self.broadcasts.subscribe(),
        }
    }

    pub fn change_subscribers(&self) -> usize {
        self.changes.receiver_count()
    }
}

/// Standing subscription to row changes matching a `ChangeFilter`.
pub struct ChangeFeed {
    filter: ChangeFilter,
    rx: broadcast::Receiver<ChangeEvent>,
}

impl ChangeFeed {
    pub fn filter(&self) -> &ChangeFilter {
        &self.filter
    }

    /// Wait for the next matching change. A lag is reported so callers that
    /// depend on completeness can resynchronize.
    pub async fn recv(&mut self) -> Result<ChangeEvent, FeedError> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.filter.matches(&event) => return Ok(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(n)) => return Err(FeedError::Lagged(n)),
                Err(RecvError::Closed) => return Err(FeedError::Closed),
            }
        }
    }

    /// Next matching change, skipping over lag. `None` once the backend is gone.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.recv().await {
                Ok(event) => return Some(event),
                Err(FeedError::Lagged(n)) => {
                    tracing::warn!(table = %self.filter.table, skipped = n, "Change feed lagged");
                }
                Err(FeedError::Closed) => return None,
            }
        }
    }

    /// Consume notifications already queued without waiting. Returns how many
    /// matching (or possibly matching, after a lag) notifications were dropped.
    pub fn drain_pending(&mut self) -> usize {
        let mut drained = 0;
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.filter.matches(&event) => drained += 1,
                Ok(_) => {}
                Err(TryRecvError::Lagged(_)) => drained += 1,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return drained,
            }
        }
    }
}

/// Subscription to one named broadcast channel.
pub struct BroadcastFeed {
    channel: String,
    rx: broadcast::Receiver<BroadcastMessage>,
}

impl BroadcastFeed {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next message on this channel; lagged messages are skipped since
    /// broadcasts carry no delivery guarantee.
    pub async fn next(&mut self) -> Option<BroadcastMessage> {
        loop {
            match self.rx.recv().await {
                Ok(message) if message.channel == self.channel => return Some(message),
                Ok(_) => continue,
                Err(RecvError::Lagged(n)) => {
                    tracing::debug!(channel = %self.channel, skipped = n, "Broadcast feed lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
