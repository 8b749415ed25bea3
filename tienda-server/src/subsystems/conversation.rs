//! Conversation session: one user's chat on one contract thread
//!
//! Owns the thread's message view, the typing presence set and the task that
//! applies the peer's typing signals. `close` (or drop) tears all of it down.

use std::sync::Arc;

use tienda_core::backend::Backend;
use tienda_core::config::RealtimeConfig;
use tienda_core::models::{Message, NewMessage};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::messages::{self, MessageStore};
use super::presence::{PresenceTracker, TypingDebouncer};

pub struct ConversationSession {
    backend: Arc<dyn Backend>,
    thread_id: Uuid,
    user_id: Uuid,
    advisor_id: Option<Uuid>,
    store: MessageStore,
    presence: PresenceTracker,
    debouncer: TypingDebouncer,
    messages: watch::Receiver<Vec<Message>>,
    typing_task: Option<JoinHandle<()>>,
}

impl ConversationSession {
    /// Start watching `thread_id` as `user_id`. `advisor_id` is stamped on
    /// outgoing messages as the counterpart.
    pub async fn open(
        backend: Arc<dyn Backend>,
        settings: &RealtimeConfig,
        thread_id: Uuid,
        user_id: Uuid,
        advisor_id: Option<Uuid>,
    ) -> Self {
        let store = MessageStore::new(backend.clone());
        let messages = store.subscribe(thread_id);
        let presence = PresenceTracker::new(backend.clone(), settings.typing_timeout());
        let debouncer =
            TypingDebouncer::new(presence.clone(), thread_id, user_id, settings.typing_debounce());

        let typing_task = presence.subscribe_typing(thread_id).await.map(|mut feed| {
            let presence = presence.clone();
            tokio::spawn(async move {
                while let Some(event) = feed.next_from_others(user_id).await {
                    presence.record(thread_id, event.user_id, event.is_typing);
                }
            })
        });

        tracing::info!(thread_id = %thread_id, user_id = %user_id, "Conversation opened");

        Self {
            backend,
            thread_id,
            user_id,
            advisor_id,
            store,
            presence,
            debouncer,
            messages,
            typing_task,
        }
    }

    pub fn thread_id(&self) -> Uuid {
        self.thread_id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn messages(&self) -> watch::Receiver<Vec<Message>> {
        self.messages.clone()
    }

    pub fn current_messages(&self) -> Vec<Message> {
        self.messages.borrow().clone()
    }

    /// Send a message. Blank bodies are rejected. The message is not appended
    /// locally; it shows up through the change-triggered reload.
    pub async fn send(&self, body: &str) -> Option<Message> {
        if body.trim().is_empty() {
            tracing::debug!(thread_id = %self.thread_id, "Ignoring blank message");
            return None;
        }

        let new = NewMessage::new(self.thread_id, self.user_id, self.advisor_id, body);
        let message = messages::insert_message(self.backend.as_ref(), &new).await?;

        self.debouncer.cancel();
        self.presence
            .notify_typing(self.thread_id, self.user_id, false)
            .await;
        Some(message)
    }

    pub async fn notify_typing(&self, is_typing: bool) {
        self.presence
            .notify_typing(self.thread_id, self.user_id, is_typing)
            .await;
    }

    /// Feed raw composer input; typing is signalled after the quiet period.
    pub fn input_changed(&self, text: &str) {
        self.debouncer.input_changed(text);
    }

    pub async fn mark_read(&self) -> bool {
        self.store.mark_as_read(self.thread_id).await
    }

    /// Whether anyone other than this user is typing.
    pub fn peer_typing(&self) -> bool {
        self.typing_users().iter().any(|u| *u != self.user_id)
    }

    pub fn typing_users(&self) -> Vec<Uuid> {
        self.presence.typing_users(self.thread_id)
    }

    pub fn close(&mut self) {
        if let Some(task) = self.typing_task.take() {
            task.abort();
        }
        self.debouncer.cancel();
        self.store.clear();
        self.presence.clear_thread(self.thread_id);
        tracing::debug!(thread_id = %self.thread_id, user_id = %self.user_id, "Conversation closed");
    }
}

impl Drop for ConversationSession {
    fn drop(&mut self) {
        self.close();
    }
}
