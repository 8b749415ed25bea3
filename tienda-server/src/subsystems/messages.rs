//! Message store: live, per-thread message lists
//!
//! `subscribe(thread)` loads every message of the thread (oldest first),
//! publishes it, and keeps it fresh: each insert/update notification for the
//! thread triggers a full re-query. After every successful load the thread's
//! unread messages are marked read, best effort.
//!
//! The store is an owned object; dropping it (or `clear`) tears down every
//! thread it watches.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::json;
use tienda_core::backend::{decode, encode, Backend, ChangeFilter, ChangeKind, Filter, Query};
use tienda_core::models::message::MESSAGES_TABLE;
use tienda_core::models::{Message, NewMessage};
use tokio::sync::watch;
use uuid::Uuid;

use super::live::{self, LiveView, LoadHook};

pub struct MessageStore {
    backend: Arc<dyn Backend>,
    threads: Mutex<HashMap<Uuid, LiveView<Message>>>,
}

impl MessageStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            threads: Mutex::new(HashMap::new()),
        }
    }

    /// Live message list for `thread_id`. The first call starts the view;
    /// later calls share it.
    pub fn subscribe(&self, thread_id: Uuid) -> watch::Receiver<Vec<Message>> {
        let mut threads = lock(&self.threads);
        threads
            .entry(thread_id)
            .or_insert_with(|| {
                tracing::debug!(thread_id = %thread_id, "Starting message view");
                self.start_view(thread_id)
            })
            .subscribe()
    }

    /// Stop watching `thread_id`. Returns false if it was not watched.
    pub fn unsubscribe(&self, thread_id: Uuid) -> bool {
        let removed = lock(&self.threads).remove(&thread_id);
        match removed {
            Some(view) => {
                view.stop();
                tracing::debug!(thread_id = %thread_id, "Message view stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_subscribed(&self, thread_id: Uuid) -> bool {
        lock(&self.threads).contains_key(&thread_id)
    }

    pub fn subscribed_threads(&self) -> usize {
        lock(&self.threads).len()
    }

    /// Tear down every thread.
    pub fn clear(&self) {
        let views: Vec<_> = lock(&self.threads).drain().map(|(_, view)| view).collect();
        for view in &views {
            view.stop();
        }
    }

    pub async fn load_messages(&self, thread_id: Uuid) -> Vec<Message> {
        load_messages(self.backend.as_ref(), thread_id).await
    }

    pub async fn mark_as_read(&self, thread_id: Uuid) -> bool {
        mark_thread_read(self.backend.as_ref(), thread_id).await
    }

    fn start_view(&self, thread_id: Uuid) -> LiveView<Message> {
        let backend = self.backend.clone();
        let hook: LoadHook = Arc::new(move || {
            let backend = backend.clone();
            Box::pin(async move {
                mark_thread_read(backend.as_ref(), thread_id).await;
            })
        });
        LiveView::with_hook(
            self.backend.clone(),
            thread_query(thread_id),
            thread_changes(thread_id),
            Some(hook),
        )
    }
}

pub fn thread_query(thread_id: Uuid) -> Query {
    Query::table(MESSAGES_TABLE)
        .eq("contratacion_id", thread_id)
        .order("created_at", true)
}

fn thread_changes(thread_id: Uuid) -> ChangeFilter {
    ChangeFilter::table(MESSAGES_TABLE)
        .eq("contratacion_id", thread_id)
        .kinds(&[ChangeKind::Insert, ChangeKind::Update])
}

/// All messages of a thread, oldest first. Empty on failure.
pub async fn load_messages(backend: &dyn Backend, thread_id: Uuid) -> Vec<Message> {
    match live::load(backend, &thread_query(thread_id)).await {
        Ok(messages) => messages,
        Err(e) => {
            tracing::error!(thread_id = %thread_id, error = %e, "Failed to load messages");
            Vec::new()
        }
    }
}

/// Mark every unread message of the thread as read.
///
/// Only unread rows are touched, so a second call writes nothing and emits
/// no change notification.
pub async fn mark_thread_read(backend: &dyn Backend, thread_id: Uuid) -> bool {
    let filters = [
        Filter::eq("contratacion_id", thread_id),
        Filter::eq("leido", false),
    ];
    match backend
        .update(MESSAGES_TABLE, &filters, json!({ "leido": true }))
        .await
    {
        Ok(rows) => {
            if !rows.is_empty() {
                tracing::debug!(thread_id = %thread_id, count = rows.len(), "Marked messages as read");
            }
            true
        }
        Err(e) => {
            tracing::warn!(thread_id = %thread_id, error = %e, "Failed to mark messages as read");
            false
        }
    }
}

/// Insert a message and return it as stored. `None` on failure.
pub async fn insert_message(backend: &dyn Backend, message: &NewMessage) -> Option<Message> {
    let stored = match encode(message) {
        Ok(row) => backend.insert(MESSAGES_TABLE, row).await,
        Err(e) => Err(e),
    };
    match stored.and_then(decode::<Message>) {
        Ok(message) => {
            tracing::info!(thread_id = %message.thread_id, id = %message.id, "Message sent");
            Some(message)
        }
        Err(e) => {
            tracing::error!(thread_id = %message.thread_id, error = %e, "Failed to send message");
            None
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
