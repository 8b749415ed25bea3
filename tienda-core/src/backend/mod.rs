//! Backend facade: the only way business code touches the data platform
//!
//! Provides a `Backend` trait with implementations for:
//! - **Postgres**: `sqlx` pool, rows as `jsonb`, change feed over LISTEN/NOTIFY
//! - **Memory**: in-process tables with the same semantics, for tests and local runs
//!
//! Every operation speaks JSON rows; typed access lives one layer up.

pub mod memory;
pub mod postgres;
pub mod realtime;

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{BackendKind, TiendaConfig};
use crate::error::{Result, TiendaError};

pub use memory::MemoryBackend;
pub use postgres::PgBackend;
pub use realtime::{BroadcastFeed, ChangeFeed, FeedError, RealtimeHub};

// ============================================================================
// Query types
// ============================================================================

/// Equality filter on one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

impl Filter {
    pub fn eq<V: Serialize>(column: &str, value: V) -> Self {
        Self {
            column: column.to_string(),
            value: serde_json::to_value(value).unwrap_or(Value::Null),
        }
    }

    pub fn matches(&self, row: &Value) -> bool {
        row.get(&self.column) == Some(&self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Point-in-time query against a table or view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub table: String,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn eq<V: Serialize>(mut self, column: &str, value: V) -> Self {
        self.filters.push(Filter::eq(column, value));
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

// ============================================================================
// Realtime types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row change pushed by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    #[serde(rename = "event")]
    pub kind: ChangeKind,
    #[serde(default)]
    pub record: Value,
}

/// Which changes a feed delivers: one table, an optional equality filter,
/// and a set of event kinds (empty means all).
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeFilter {
    pub table: String,
    pub filter: Option<Filter>,
    pub kinds: Vec<ChangeKind>,
}

impl ChangeFilter {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            filter: None,
            kinds: Vec::new(),
        }
    }

    pub fn eq<V: Serialize>(mut self, column: &str, value: V) -> Self {
        self.filter = Some(Filter::eq(column, value));
        self
    }

    pub fn kinds(mut self, kinds: &[ChangeKind]) -> Self {
        self.kinds = kinds.to_vec();
        self
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
            return false;
        }
        match &self.filter {
            Some(f) => f.matches(&event.record),
            None => true,
        }
    }
}

/// Ephemeral message on a named broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub channel: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

// ============================================================================
// Backend trait
// ============================================================================

/// Abstraction over the hosted data platform.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Run a point-in-time query and return the matching rows.
    async fn select(&self, query: &Query) -> Result<Vec<Value>>;

    /// Insert one row and return it as stored (defaults applied).
    async fn insert(&self, table: &str, row: Value) -> Result<Value>;

    /// Apply `patch` to every row matching all `filters`; returns the updated rows.
    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<Vec<Value>>;

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Value>>;

    /// Invoke a remote procedure with a JSON argument object.
    async fn rpc(&self, procedure: &str, args: Value) -> Result<Value>;

    async fn subscribe_changes(&self, filter: ChangeFilter) -> Result<ChangeFeed>;

    /// Fire-and-forget publish; there is no delivery acknowledgement.
    async fn broadcast(&self, channel: &str, event: &str, payload: Value) -> Result<()>;

    async fn subscribe_broadcast(&self, channel: &str) -> Result<BroadcastFeed>;

    async fn health(&self) -> Result<String>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Build the backend selected by `[backend] kind`.
pub async fn create_backend(config: &TiendaConfig) -> Result<Arc<dyn Backend>> {
    match config.backend.kind {
        BackendKind::Memory => Ok(Arc::new(MemoryBackend::new(config.realtime.feed_capacity))),
        BackendKind::Postgres => {
            let pool = crate::db::create_pool(&config.database).await?;
            if config.backend.apply_schema {
                crate::db::apply_schema(&pool, &config.realtime).await?;
            }
            let backend = PgBackend::with_pool(pool, &config.realtime).await?;
            Ok(Arc::new(backend))
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Validate a table, column, channel or procedure name before it reaches SQL.
pub fn ident(name: &str) -> Result<&str> {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    let re = IDENT.get_or_init(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("static regex"));
    if name.len() <= 63 && re.is_match(name) {
        Ok(name)
    } else {
        Err(TiendaError::InvalidIdentifier(name.to_string()))
    }
}

pub fn decode<T: DeserializeOwned>(row: Value) -> Result<T> {
    Ok(serde_json::from_value(row)?)
}

pub fn decode_all<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>> {
    rows.into_iter().map(decode).collect()
}

/// Serialize a typed insert/patch payload into a JSON object.
pub fn encode<T: Serialize>(value: &T) -> Result<Value> {
    let value = serde_json::to_value(value)?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(TiendaError::Backend("row payload must be a JSON object".to_string()))
    }
}
