//! Postgres implementation of the backend facade
//!
//! Rows cross the boundary as `jsonb`:
//! - reads use `to_jsonb(t)`
//! - writes go through `jsonb_populate_record(NULL::<table>, $n)` so column
//!   types come from the table definition, not from the caller
//! - equality filters compare typed columns against the same populated record,
//!   which keeps them index-friendly
//!
//! Realtime: the schema trigger NOTIFYs `{table, event, record}` on the
//! changes channel; broadcasts are NOTIFYs on the broadcast channel. One
//! `PgListener` task per backend routes both into the `RealtimeHub`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::task::JoinHandle;

use super::realtime::RealtimeHub;
use super::{
    ident, Backend, BroadcastFeed, BroadcastMessage, ChangeEvent, ChangeFeed, ChangeFilter, Filter,
    Query,
};
use crate::config::RealtimeConfig;
use crate::error::{Result, TiendaError};

pub struct PgBackend {
    pool: PgPool,
    hub: RealtimeHub,
    broadcast_channel: String,
    listener: JoinHandle<()>,
}

impl PgBackend {
    /// Wrap an existing pool and start the realtime listener.
    pub async fn with_pool(pool: PgPool, realtime: &RealtimeConfig) -> Result<Self> {
        let changes_channel = ident(&realtime.changes_channel)?.to_string();
        let broadcast_channel = ident(&realtime.broadcast_channel)?.to_string();
        let hub = RealtimeHub::new(realtime.feed_capacity);

        let mut listener = PgListener::connect_with(&pool).await?;
        listener
            .listen_all([changes_channel.as_str(), broadcast_channel.as_str()])
            .await?;
        tracing::info!(
            changes = %changes_channel,
            broadcast = %broadcast_channel,
            "Realtime listener subscribed"
        );

        let listener = tokio::spawn(run_listener(listener, hub.clone(), changes_channel));

        Ok(Self {
            pool,
            hub,
            broadcast_channel,
            listener,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Drop for PgBackend {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

async fn run_listener(mut listener: PgListener, hub: RealtimeHub, changes_channel: String) {
    loop {
        match listener.recv().await {
            Ok(notification) => route_notification(
                &hub,
                &changes_channel,
                notification.channel(),
                notification.payload(),
            ),
            Err(e) => {
                // PgListener reconnects on the next recv; notifications sent
                // while disconnected are lost, as with any hosted feed.
                tracing::warn!(error = %e, "Realtime listener error, retrying");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

fn route_notification(hub: &RealtimeHub, changes_channel: &str, channel: &str, payload: &str) {
    if channel == changes_channel {
        match serde_json::from_str::<ChangeEvent>(payload) {
            Ok(event) => hub.publish_change(event),
            Err(e) => tracing::warn!(error = %e, "Malformed change notification"),
        }
    } else {
        match serde_json::from_str::<BroadcastMessage>(payload) {
            Ok(message) => hub.publish_broadcast(message),
            Err(e) => tracing::warn!(error = %e, "Malformed broadcast notification"),
        }
    }
}

// ============================================================================
// SQL builders (pure; identifiers validated before interpolation)
// ============================================================================

fn where_clause(table: &str, filters: &[Filter], first_param: usize) -> Result<String> {
    if filters.is_empty() {
        return Ok(String::new());
    }
    let table = ident(table)?;
    let parts = filters
        .iter()
        .enumerate()
        .map(|(i, f)| {
            let col = ident(&f.column)?;
            Ok(format!(
                "t.\"{col}\" = (jsonb_populate_record(NULL::\"{table}\", jsonb_build_object('{col}', ${}::jsonb))).\"{col}\"",
                first_param + i
            ))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(format!(" WHERE {}", parts.join(" AND ")))
}

pub(crate) fn select_sql(query: &Query) -> Result<String> {
    let table = ident(&query.table)?;
    let mut sql = format!("SELECT to_jsonb(t) FROM \"{table}\" AS t");
    sql.push_str(&where_clause(table, &query.filters, 1)?);
    if let Some(order) = &query.order {
        let col = ident(&order.column)?;
        let dir = if order.ascending { "ASC" } else { "DESC" };
        sql.push_str(&format!(" ORDER BY t.\"{col}\" {dir}"));
    }
    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    Ok(sql)
}

pub(crate) fn insert_sql(table: &str, columns: &[&str]) -> Result<String> {
    let table = ident(table)?;
    if columns.is_empty() {
        return Ok(format!(
            "INSERT INTO \"{table}\" AS t DEFAULT VALUES RETURNING to_jsonb(t.*)"
        ));
    }
    let cols = columns
        .iter()
        .map(|c| ident(c).map(|c| format!("\"{c}\"")))
        .collect::<Result<Vec<_>>>()?;
    let source = cols
        .iter()
        .map(|c| format!("r.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!(
        "INSERT INTO \"{table}\" AS t ({}) SELECT {source} FROM jsonb_populate_record(NULL::\"{table}\", $1::jsonb) AS r RETURNING to_jsonb(t.*)",
        cols.join(", ")
    ))
}

pub(crate) fn update_sql(table: &str, columns: &[&str], filters: &[Filter]) -> Result<String> {
    let table = ident(table)?;
    if columns.is_empty() {
        return Err(TiendaError::Backend("update patch must be a non-empty object".to_string()));
    }
    if filters.is_empty() {
        return Err(TiendaError::Backend(format!("refusing unfiltered write on {}", table)));
    }
    let assignments = columns
        .iter()
        .map(|c| ident(c).map(|c| format!("\"{c}\" = r.\"{c}\"")))
        .collect::<Result<Vec<_>>>()?;
    Ok(format!(
        "UPDATE \"{table}\" AS t SET {} FROM jsonb_populate_record(NULL::\"{table}\", $1::jsonb) AS r{} RETURNING to_jsonb(t.*)",
        assignments.join(", "),
        where_clause(table, filters, 2)?
    ))
}

pub(crate) fn delete_sql(table: &str, filters: &[Filter]) -> Result<String> {
    let table = ident(table)?;
    if filters.is_empty() {
        return Err(TiendaError::Backend(format!("refusing unfiltered write on {}", table)));
    }
    Ok(format!(
        "DELETE FROM \"{table}\" AS t{} RETURNING to_jsonb(t.*)",
        where_clause(table, filters, 1)?
    ))
}

fn object_keys(value: &Value) -> Result<Vec<&str>> {
    value
        .as_object()
        .map(|map| map.keys().map(String::as_str).collect())
        .ok_or_else(|| TiendaError::Backend("row payload must be a JSON object".to_string()))
}

// ============================================================================
// Backend impl
// ============================================================================

#[async_trait]
impl Backend for PgBackend {
    async fn select(&self, query: &Query) -> Result<Vec<Value>> {
        let sql = select_sql(query)?;
        let mut q = sqlx::query_scalar::<_, Value>(&sql);
        for f in &query.filters {
            q = q.bind(&f.value);
        }
        Ok(q.fetch_all(&self.pool).await?)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value> {
        let sql = insert_sql(table, &object_keys(&row)?)?;
        let stored = sqlx::query_scalar::<_, Value>(&sql)
            .bind(&row)
            .fetch_one(&self.pool)
            .await?;
        Ok(stored)
    }

    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<Vec<Value>> {
        let sql = update_sql(table, &object_keys(&patch)?, filters)?;
        let mut q = sqlx::query_scalar::<_, Value>(&sql).bind(&patch);
        for f in filters {
            q = q.bind(&f.value);
        }
        Ok(q.fetch_all(&self.pool).await?)
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Value>> {
        let sql = delete_sql(table, filters)?;
        let mut q = sqlx::query_scalar::<_, Value>(&sql);
        for f in filters {
            q = q.bind(&f.value);
        }
        Ok(q.fetch_all(&self.pool).await?)
    }

    async fn rpc(&self, procedure: &str, args: Value) -> Result<Value> {
        let procedure = ident(procedure)?;
        let sql = format!("SELECT to_jsonb(\"{procedure}\"($1::jsonb))");
        let result = sqlx::query_scalar::<_, Value>(&sql)
            .bind(&args)
            .fetch_one(&self.pool)
            .await?;
        Ok(result)
    }

    async fn subscribe_changes(&self, filter: ChangeFilter) -> Result<ChangeFeed> {
        ident(&filter.table)?;
        Ok(self.hub.change_feed(filter))
    }

    async fn broadcast(&self, channel: &str, event: &str, payload: Value) -> Result<()> {
        let message = serde_json::to_string(&BroadcastMessage {
            channel: channel.to_string(),
            event: event.to_string(),
            payload,
        })?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&self.broadcast_channel)
            .bind(message)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn subscribe_broadcast(&self, channel: &str) -> Result<BroadcastFeed> {
        Ok(self.hub.broadcast_feed(channel))
    }

    async fn health(&self) -> Result<String> {
        crate::db::health_check(&self.pool).await
    }

    fn name(&self) -> &str {
        "postgres"
    }
}
