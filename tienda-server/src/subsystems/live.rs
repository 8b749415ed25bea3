//! Live views: subscribe first, then reload wholesale on every change
//!
//! One task per view. It opens the change feed before the initial load so no
//! change between "loaded" and "subscribed" is missed, then re-queries on
//! every notification. Reloads run sequentially inside that task, so the most
//! recent reload is always the one published. Notifications that pile up
//! while a reload is in flight are folded into the next one.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use tienda_core::backend::{decode_all, Backend, ChangeFilter, FeedError, Query};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Runs after every successful load, inside the view task.
pub type LoadHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub struct LiveView<T> {
    rx: watch::Receiver<Vec<T>>,
    task: JoinHandle<()>,
}

impl<T> LiveView<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn start(backend: Arc<dyn Backend>, query: Query, filter: ChangeFilter) -> Self {
        Self::with_hook(backend, query, filter, None)
    }

    pub fn with_hook(
        backend: Arc<dyn Backend>,
        query: Query,
        filter: ChangeFilter,
        hook: Option<LoadHook>,
    ) -> Self {
        let (tx, rx) = watch::channel(Vec::new());
        let task = tokio::spawn(run_view(backend, query, filter, tx, hook));
        Self { rx, task }
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<T>> {
        self.rx.clone()
    }

    pub fn current(&self) -> Vec<T> {
        self.rx.borrow().clone()
    }

    /// Stop refreshing. Cancels a reload in flight; nothing is published after this.
    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl<T> Drop for LiveView<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_view<T>(
    backend: Arc<dyn Backend>,
    query: Query,
    filter: ChangeFilter,
    tx: watch::Sender<Vec<T>>,
    hook: Option<LoadHook>,
) where
    T: DeserializeOwned + Send + Sync + 'static,
{
    let feed = match backend.subscribe_changes(filter).await {
        Ok(feed) => Some(feed),
        Err(e) => {
            tracing::error!(table = %query.table, error = %e, "Failed to open change feed, view will not refresh");
            None
        }
    };

    reload(backend.as_ref(), &query, &tx, hook.as_ref()).await;

    let Some(mut feed) = feed else {
        return;
    };

    loop {
        match feed.recv().await {
            Ok(_) => {}
            // Skipped notifications may have been for this view; resync.
            Err(FeedError::Lagged(skipped)) => {
                tracing::warn!(table = %query.table, skipped, "Change feed lagged, forcing reload");
            }
            Err(FeedError::Closed) => break,
        }
        let coalesced = feed.drain_pending();
        if coalesced > 0 {
            tracing::debug!(table = %query.table, coalesced, "Coalesced queued notifications");
        }
        reload(backend.as_ref(), &query, &tx, hook.as_ref()).await;
    }

    tracing::debug!(table = %query.table, "Change feed closed, live view stopped");
}

async fn reload<T>(
    backend: &dyn Backend,
    query: &Query,
    tx: &watch::Sender<Vec<T>>,
    hook: Option<&LoadHook>,
) where
    T: DeserializeOwned,
{
    match load::<T>(backend, query).await {
        Ok(rows) => {
            tx.send_replace(rows);
            if let Some(hook) = hook {
                hook().await;
            }
        }
        Err(e) => {
            // An empty list is indistinguishable from a failed load downstream.
            tracing::error!(table = %query.table, error = %e, "Live view load failed, publishing empty result");
            tx.send_replace(Vec::new());
        }
    }
}

/// One-shot typed query.
pub async fn load<T: DeserializeOwned>(
    backend: &dyn Backend,
    query: &Query,
) -> tienda_core::error::Result<Vec<T>> {
    decode_all(backend.select(query).await?)
}
