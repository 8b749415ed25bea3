//! Typing presence
//!
//! Typing signals travel on the thread's broadcast channel `typing:<thread>`
//! and are never persisted. Each tracker keeps its own view of who is typing:
//! a `true` signal (re)starts a per-user expiry timer, `false` or expiry
//! removes the user. A refreshed entry is never removed by an older timer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tienda_core::backend::{Backend, BroadcastFeed};
use tienda_core::models::TypingEvent;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub const TYPING_EVENT: &str = "typing";

pub fn typing_channel(thread_id: Uuid) -> String {
    format!("typing:{}", thread_id)
}

struct Entry {
    generation: u64,
    timer: JoinHandle<()>,
}

struct Inner {
    backend: Arc<dyn Backend>,
    timeout: Duration,
    typing: Mutex<HashMap<(Uuid, Uuid), Entry>>,
    generation: AtomicU64,
}

impl Inner {
    fn expire(&self, key: (Uuid, Uuid), generation: u64) {
        let mut typing = lock(&self.typing);
        if typing.get(&key).is_some_and(|e| e.generation == generation) {
            typing.remove(&key);
            tracing::debug!(thread_id = %key.0, user_id = %key.1, "Typing expired");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let typing = self.typing.get_mut().unwrap_or_else(|p| p.into_inner());
        for (_, entry) in typing.drain() {
            entry.timer.abort();
        }
    }
}

/// Per-thread set of users currently typing. Cheap to clone.
#[derive(Clone)]
pub struct PresenceTracker {
    inner: Arc<Inner>,
}

impl PresenceTracker {
    pub fn new(backend: Arc<dyn Backend>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                timeout,
                typing: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Broadcast a typing signal for `user_id` on the thread, then record it
    /// locally. Delivery is not acknowledged; a failed publish is logged.
    pub async fn notify_typing(&self, thread_id: Uuid, user_id: Uuid, is_typing: bool) {
        let event = TypingEvent { user_id, is_typing };
        match serde_json::to_value(event) {
            Ok(payload) => {
                if let Err(e) = self
                    .inner
                    .backend
                    .broadcast(&typing_channel(thread_id), TYPING_EVENT, payload)
                    .await
                {
                    tracing::warn!(thread_id = %thread_id, error = %e, "Failed to broadcast typing");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to encode typing event"),
        }
        self.record(thread_id, user_id, is_typing);
    }

    /// Apply a typing signal to the local set.
    pub fn record(&self, thread_id: Uuid, user_id: Uuid, is_typing: bool) {
        let key = (thread_id, user_id);
        let mut typing = lock(&self.inner.typing);
        if let Some(previous) = typing.remove(&key) {
            previous.timer.abort();
        }
        if !is_typing {
            return;
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let timeout = self.inner.timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.expire(key, generation);
            }
        });
        typing.insert(key, Entry { generation, timer });
    }

    pub fn is_typing(&self, thread_id: Uuid, user_id: Uuid) -> bool {
        lock(&self.inner.typing).contains_key(&(thread_id, user_id))
    }

    pub fn typing_users(&self, thread_id: Uuid) -> Vec<Uuid> {
        let mut users: Vec<Uuid> = lock(&self.inner.typing)
            .keys()
            .filter(|(thread, _)| *thread == thread_id)
            .map(|(_, user)| *user)
            .collect();
        users.sort();
        users
    }

    /// Forget every entry of a thread and cancel its timers.
    pub fn clear_thread(&self, thread_id: Uuid) {
        lock(&self.inner.typing).retain(|(thread, _), entry| {
            let keep = *thread != thread_id;
            if !keep {
                entry.timer.abort();
            }
            keep
        });
    }

    /// Incoming typing signals for a thread. `None` if the channel could not
    /// be joined.
    pub async fn subscribe_typing(&self, thread_id: Uuid) -> Option<TypingFeed> {
        match self
            .inner
            .backend
            .subscribe_broadcast(&typing_channel(thread_id))
            .await
        {
            Ok(feed) => Some(TypingFeed { feed }),
            Err(e) => {
                tracing::error!(thread_id = %thread_id, error = %e, "Failed to join typing channel");
                None
            }
        }
    }
}

pub struct TypingFeed {
    feed: BroadcastFeed,
}

impl TypingFeed {
    /// Next typing event on the channel. No ordering across users, no dedup.
    pub async fn next(&mut self) -> Option<TypingEvent> {
        loop {
            let message = self.feed.next().await?;
            if message.event != TYPING_EVENT {
                continue;
            }
            match serde_json::from_value::<TypingEvent>(message.payload) {
                Ok(event) => return Some(event),
                Err(e) => tracing::debug!(channel = %self.feed.channel(), error = %e, "Ignoring malformed typing payload"),
            }
        }
    }

    /// Like `next`, minus the consumer's own echoes.
    pub async fn next_from_others(&mut self, self_id: Uuid) -> Option<TypingEvent> {
        loop {
            let event = self.next().await?;
            if event.user_id != self_id {
                return Some(event);
            }
        }
    }
}

/// Turns raw input changes into typing signals after a quiet period.
pub struct TypingDebouncer {
    presence: PresenceTracker,
    thread_id: Uuid,
    user_id: Uuid,
    quiet: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl TypingDebouncer {
    pub fn new(presence: PresenceTracker, thread_id: Uuid, user_id: Uuid, quiet: Duration) -> Self {
        Self {
            presence,
            thread_id,
            user_id,
            quiet,
            pending: Mutex::new(None),
        }
    }

    /// Restart the quiet-period timer. When it fires the user is reported as
    /// typing iff the latest text is non-blank.
    pub fn input_changed(&self, text: &str) {
        let is_typing = !text.trim().is_empty();
        let presence = self.presence.clone();
        let (thread_id, user_id, quiet) = (self.thread_id, self.user_id, self.quiet);

        let mut pending = lock(&self.pending);
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            presence.notify_typing(thread_id, user_id, is_typing).await;
        }));
    }

    /// Drop a pending signal without sending it.
    pub fn cancel(&self) {
        if let Some(previous) = lock(&self.pending).take() {
            previous.abort();
        }
    }
}

impl Drop for TypingDebouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tienda_core::MemoryBackend;

    const TIMEOUT: Duration = Duration::from_secs(3);

    fn tracker() -> (Arc<MemoryBackend>, PresenceTracker) {
        let memory = Arc::new(MemoryBackend::default());
        let presence = PresenceTracker::new(memory.clone(), TIMEOUT);
        (memory, presence)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_decays_after_timeout() {
        let (_memory, presence) = tracker();
        let (thread, user) = (Uuid::new_v4(), Uuid::new_v4());

        presence.record(thread, user, true);
        settle().await;
        assert!(presence.is_typing(thread, user));

        tokio::time::advance(Duration::from_millis(2_900)).await;
        settle().await;
        assert!(presence.is_typing(thread, user));

        tokio::time::advance(Duration::from_millis(200)).await;
        settle().await;
        assert!(!presence.is_typing(thread, user));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_restarts_timer() {
        let (_memory, presence) = tracker();
        let (thread, user) = (Uuid::new_v4(), Uuid::new_v4());

        presence.record(thread, user, true);
        settle().await;
        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        presence.record(thread, user, true);
        settle().await;

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert!(presence.is_typing(thread, user), "refreshed entry must survive the old timer");

        tokio::time::advance(Duration::from_millis(1_100)).await;
        settle().await;
        assert!(!presence.is_typing(thread, user));
    }

    #[tokio::test(start_paused = true)]
    async fn test_false_removes_immediately() {
        let (_memory, presence) = tracker();
        let thread = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        presence.record(thread, a, true);
        presence.record(thread, b, true);
        presence.record(thread, a, false);

        assert_eq!(presence.typing_users(thread), vec![b]);
        presence.clear_thread(thread);
        assert!(presence.typing_users(thread).is_empty());
    }

    #[tokio::test]
    async fn test_notify_broadcasts_and_records() {
        let (_memory, presence) = tracker();
        let (thread, user) = (Uuid::new_v4(), Uuid::new_v4());
        let mut feed = presence.subscribe_typing(thread).await.unwrap();

        presence.notify_typing(thread, user, true).await;
        assert!(presence.is_typing(thread, user));

        let event = feed.next().await.unwrap();
        assert_eq!(event, TypingEvent { user_id: user, is_typing: true });
    }

    #[tokio::test]
    async fn test_feed_skips_own_events() {
        let (memory, presence) = tracker();
        let thread = Uuid::new_v4();
        let (me, peer) = (Uuid::new_v4(), Uuid::new_v4());
        let mut feed = presence.subscribe_typing(thread).await.unwrap();

        memory
            .broadcast(&typing_channel(thread), "other", serde_json::json!({}))
            .await
            .unwrap();
        presence.notify_typing(thread, me, true).await;
        presence.notify_typing(thread, peer, true).await;

        let event = feed.next_from_others(me).await.unwrap();
        assert_eq!(event.user_id, peer);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debouncer_sends_after_quiet_period() {
        let (_memory, presence) = tracker();
        let (thread, user) = (Uuid::new_v4(), Uuid::new_v4());
        let debouncer = TypingDebouncer::new(presence.clone(), thread, user, Duration::from_millis(300));

        debouncer.input_changed("h");
        settle().await;
        tokio::time::advance(Duration::from_millis(200)).await;
        settle().await;
        debouncer.input_changed("ho");
        settle().await;
        tokio::time::advance(Duration::from_millis(200)).await;
        settle().await;
        assert!(!presence.is_typing(thread, user));

        tokio::time::advance(Duration::from_millis(150)).await;
        settle().await;
        assert!(presence.is_typing(thread, user));

        debouncer.input_changed("   ");
        settle().await;
        tokio::time::advance(Duration::from_millis(350)).await;
        settle().await;
        assert!(!presence.is_typing(thread, user));
    }
}
