//! In-process backend with the same observable semantics as `PgBackend`
//!
//! Tables are vectors of JSON rows. Inserts fill `id` / `created_at` /
//! `updated_at` defaults, every affected row emits a change event, ordering
//! compares RFC 3339 timestamps as instants, and the two store views plus
//! `crear_perfil_usuario` are built in. Individual tables can be made to fail
//! to exercise error paths.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::realtime::RealtimeHub;
use super::{
    Backend, BroadcastFeed, BroadcastMessage, ChangeEvent, ChangeFeed, ChangeFilter, ChangeKind,
    Filter, Query,
};
use crate::error::{Result, TiendaError};
use crate::models::contract::{CONTRACTS_DETAIL_VIEW, CONTRACTS_TABLE};
use crate::models::message::{CONVERSATIONS_VIEW, MESSAGES_TABLE};
use crate::models::plan::PLANS_TABLE;
use crate::models::profile::{CREATE_PROFILE_PROCEDURE, PROFILES_TABLE};

pub type Tables = HashMap<String, Vec<Value>>;
pub type ViewFn = Arc<dyn Fn(&Tables) -> Vec<Value> + Send + Sync>;
pub type ProcedureFn = Arc<dyn Fn(&MemoryBackend, Value) -> Result<Value> + Send + Sync>;

pub struct MemoryBackend {
    tables: Mutex<Tables>,
    views: Mutex<HashMap<String, ViewFn>>,
    procedures: Mutex<HashMap<String, ProcedureFn>>,
    failing: Mutex<HashSet<String>>,
    hub: RealtimeHub,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(256)
    }
}

impl MemoryBackend {
    pub fn new(feed_capacity: usize) -> Self {
        let backend = Self {
            tables: Mutex::new(HashMap::new()),
            views: Mutex::new(HashMap::new()),
            procedures: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            hub: RealtimeHub::new(feed_capacity),
        };
        backend.register_view(CONTRACTS_DETAIL_VIEW, contracts_detail_view);
        backend.register_view(CONVERSATIONS_VIEW, conversations_view);
        backend.register_procedure(CREATE_PROFILE_PROCEDURE, create_profile_procedure);
        backend
    }

    pub fn register_view<F>(&self, name: &str, view: F)
    where
        F: Fn(&Tables) -> Vec<Value> + Send + Sync + 'static,
    {
        lock(&self.views).insert(name.to_string(), Arc::new(view));
    }

    pub fn register_procedure<F>(&self, name: &str, procedure: F)
    where
        F: Fn(&MemoryBackend, Value) -> Result<Value> + Send + Sync + 'static,
    {
        lock(&self.procedures).insert(name.to_string(), Arc::new(procedure));
    }

    /// Make every operation on `table` fail until `restore_table` is called.
    pub fn fail_table(&self, table: &str) {
        lock(&self.failing).insert(table.to_string());
    }

    pub fn restore_table(&self, table: &str) {
        lock(&self.failing).remove(table);
    }

    pub fn hub(&self) -> &RealtimeHub {
        &self.hub
    }

    /// Raw copy of a table, for assertions.
    pub fn rows(&self, table: &str) -> Vec<Value> {
        lock(&self.tables).get(table).cloned().unwrap_or_default()
    }

    fn check(&self, table: &str) -> Result<()> {
        super::ident(table)?;
        if lock(&self.failing).contains(table) {
            return Err(TiendaError::Backend(format!("table {} unavailable", table)));
        }
        Ok(())
    }

    fn emit(&self, table: &str, kind: ChangeKind, rows: &[Value]) {
        for record in rows {
            self.hub.publish_change(ChangeEvent {
                table: table.to_string(),
                kind,
                record: record.clone(),
            });
        }
    }

    pub fn select_rows(&self, query: &Query) -> Result<Vec<Value>> {
        self.check(&query.table)?;
        let view = lock(&self.views).get(&query.table).cloned();
        let source = {
            let tables = lock(&self.tables);
            match view {
                Some(view) => view(&*tables),
                None => tables.get(&query.table).cloned().unwrap_or_default(),
            }
        };

        let mut rows: Vec<Value> = source
            .into_iter()
            .filter(|row| query.filters.iter().all(|f| f.matches(row)))
            .collect();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ord = compare_values(
                    a.get(&order.column).unwrap_or(&Value::Null),
                    b.get(&order.column).unwrap_or(&Value::Null),
                );
                if order.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    pub fn insert_row(&self, table: &str, row: Value) -> Result<Value> {
        self.check(table)?;
        let mut row = match row {
            Value::Object(map) => map,
            _ => return Err(TiendaError::Backend("row payload must be a JSON object".to_string())),
        };
        for key in row.keys() {
            super::ident(key)?;
        }
        let now = Value::String(Utc::now().to_rfc3339());
        fill_default(&mut row, "id", || Value::String(Uuid::new_v4().to_string()));
        fill_default(&mut row, "created_at", || now.clone());
        fill_default(&mut row, "updated_at", || now.clone());
        let row = Value::Object(row);

        lock(&self.tables)
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        self.emit(table, ChangeKind::Insert, std::slice::from_ref(&row));
        Ok(row)
    }

    pub fn update_rows(&self, table: &str, filters: &[Filter], patch: Value) -> Result<Vec<Value>> {
        self.check(table)?;
        let patch = match patch {
            Value::Object(map) if !map.is_empty() => map,
            _ => return Err(TiendaError::Backend("update patch must be a non-empty object".to_string())),
        };
        require_filters(table, filters)?;
        for key in patch.keys() {
            super::ident(key)?;
        }

        let updated: Vec<Value> = {
            let mut tables = lock(&self.tables);
            let rows = tables.entry(table.to_string()).or_default();
            rows.iter_mut()
                .filter(|row| filters.iter().all(|f| f.matches(row)))
                .map(|row| {
                    if let Value::Object(map) = row {
                        for (k, v) in &patch {
                            map.insert(k.clone(), v.clone());
                        }
                    }
                    row.clone()
                })
                .collect()
        };
        self.emit(table, ChangeKind::Update, &updated);
        Ok(updated)
    }

    pub fn delete_rows(&self, table: &str, filters: &[Filter]) -> Result<Vec<Value>> {
        self.check(table)?;
        require_filters(table, filters)?;

        let deleted: Vec<Value> = {
            let mut tables = lock(&self.tables);
            let rows = tables.entry(table.to_string()).or_default();
            let (gone, kept): (Vec<Value>, Vec<Value>) = rows
                .drain(..)
                .partition(|row| filters.iter().all(|f| f.matches(row)));
            *rows = kept;
            gone
        };
        self.emit(table, ChangeKind::Delete, &deleted);
        Ok(deleted)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn select(&self, query: &Query) -> Result<Vec<Value>> {
        self.select_rows(query)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value> {
        self.insert_row(table, row)
    }

    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<Vec<Value>> {
        self.update_rows(table, filters, patch)
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Value>> {
        self.delete_rows(table, filters)
    }

    async fn rpc(&self, procedure: &str, args: Value) -> Result<Value> {
        super::ident(procedure)?;
        let procedure_fn = lock(&self.procedures)
            .get(procedure)
            .cloned()
            .ok_or_else(|| TiendaError::NotFound(format!("procedure {}", procedure)))?;
        procedure_fn(self, args)
    }

    async fn subscribe_changes(&self, filter: ChangeFilter) -> Result<ChangeFeed> {
        super::ident(&filter.table)?;
        Ok(self.hub.change_feed(filter))
    }

    async fn broadcast(&self, channel: &str, event: &str, payload: Value) -> Result<()> {
        self.hub.publish_broadcast(BroadcastMessage {
            channel: channel.to_string(),
            event: event.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe_broadcast(&self, channel: &str) -> Result<BroadcastFeed> {
        Ok(self.hub.broadcast_feed(channel))
    }

    async fn health(&self) -> Result<String> {
        let tables = lock(&self.tables);
        let rows: usize = tables.values().map(Vec::len).sum();
        Ok(format!("memory ({} tables, {} rows)", tables.len(), rows))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ============================================================================
// Built-in views and procedures
// ============================================================================

fn contracts_detail_view(tables: &Tables) -> Vec<Value> {
    let empty = Vec::new();
    let profiles = tables.get(PROFILES_TABLE).unwrap_or(&empty);
    let plans = tables.get(PLANS_TABLE).unwrap_or(&empty);

    tables
        .get(CONTRACTS_TABLE)
        .unwrap_or(&empty)
        .iter()
        .map(|contract| {
            let mut row = contract.clone();
            if let Value::Object(map) = &mut row {
                let customer = find_by(profiles, "user_id", contract.get("usuario_id"));
                let plan = find_by(plans, "id", contract.get("plan_id"));
                map.insert("usuario_nombre".to_string(), field(customer, "full_name"));
                map.insert("plan_nombre".to_string(), field(plan, "nombre"));
            }
            row
        })
        .collect()
}

fn conversations_view(tables: &Tables) -> Vec<Value> {
    let empty = Vec::new();
    let profiles = tables.get(PROFILES_TABLE).unwrap_or(&empty);
    let plans = tables.get(PLANS_TABLE).unwrap_or(&empty);
    let messages = tables.get(MESSAGES_TABLE).unwrap_or(&empty);

    tables
        .get(CONTRACTS_TABLE)
        .unwrap_or(&empty)
        .iter()
        .filter_map(|contract| {
            let thread_id = contract.get("id")?;
            let mut thread: Vec<&Value> = messages
                .iter()
                .filter(|m| m.get("contratacion_id") == Some(thread_id))
                .collect();
            thread.sort_by(|a, b| {
                compare_values(
                    a.get("created_at").unwrap_or(&Value::Null),
                    b.get("created_at").unwrap_or(&Value::Null),
                )
            });
            let last = *thread.last()?;
            let advisor_id = thread
                .iter()
                .rev()
                .filter_map(|m| m.get("asesor_id"))
                .find(|v| !v.is_null())
                .cloned()
                .unwrap_or(Value::Null);
            let unread = thread
                .iter()
                .filter(|m| m.get("leido") == Some(&Value::Bool(false)))
                .count();

            let customer = find_by(profiles, "user_id", contract.get("usuario_id"));
            let advisor = find_by(profiles, "user_id", Some(&advisor_id));
            let plan = find_by(plans, "id", contract.get("plan_id"));

            Some(json!({
                "contratacion_id": thread_id,
                "usuario_id": contract.get("usuario_id").cloned().unwrap_or(Value::Null),
                "usuario_nombre": field(customer, "full_name"),
                "asesor_id": advisor_id,
                "asesor_nombre": field(advisor, "full_name"),
                "plan_nombre": field(plan, "nombre"),
                "ultimo_mensaje": last.get("mensaje").cloned().unwrap_or(Value::Null),
                "timestamp_ultimo": last.get("created_at").cloned().unwrap_or(Value::Null),
                "no_leidos": unread,
            }))
        })
        .collect()
}

fn create_profile_procedure(backend: &MemoryBackend, args: Value) -> Result<Value> {
    let user_id = args
        .get("p_user_id")
        .cloned()
        .filter(|v| !v.is_null())
        .ok_or_else(|| TiendaError::Backend("p_user_id is required".to_string()))?;
    let full_name = args.get("p_full_name").cloned().unwrap_or(Value::Null);
    let phone = args.get("p_phone").cloned().unwrap_or(Value::Null);
    let role = args
        .get("p_rol")
        .cloned()
        .filter(|v| !v.is_null())
        .unwrap_or_else(|| json!("usuario_registrado"));

    let existing = Filter::eq("user_id", &user_id);
    let updated = backend.update_rows(
        PROFILES_TABLE,
        std::slice::from_ref(&existing),
        json!({
            "full_name": full_name,
            "phone": phone,
            "updated_at": Utc::now().to_rfc3339(),
        }),
    )?;
    if let Some(profile) = updated.into_iter().next() {
        return Ok(profile);
    }
    backend.insert_row(
        PROFILES_TABLE,
        json!({
            "user_id": user_id,
            "full_name": full_name,
            "phone": phone,
            "rol": role,
            "avatar_url": null,
            "bio": null,
        }),
    )
}

// ============================================================================
// Helpers
// ============================================================================

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn fill_default(row: &mut Map<String, Value>, key: &str, value: impl FnOnce() -> Value) {
    if row.get(key).map_or(true, Value::is_null) {
        row.insert(key.to_string(), value());
    }
}

fn require_filters(table: &str, filters: &[Filter]) -> Result<()> {
    if filters.is_empty() {
        return Err(TiendaError::Backend(format!("refusing unfiltered write on {}", table)));
    }
    for f in filters {
        super::ident(&f.column)?;
    }
    Ok(())
}

fn find_by<'a>(rows: &'a [Value], column: &str, value: Option<&Value>) -> Option<&'a Value> {
    let value = value.filter(|v| !v.is_null())?;
    rows.iter().find(|row| row.get(column) == Some(value))
}

fn field(row: Option<&Value>, column: &str) -> Value {
    row.and_then(|r| r.get(column)).cloned().unwrap_or(Value::Null)
}

/// Total order over JSON scalars: nulls first, then booleans, numbers,
/// strings. Strings that both parse as RFC 3339 compare as instants.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => {
            match (
                DateTime::parse_from_rfc3339(x),
                DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_fills_defaults() {
        let backend = MemoryBackend::default();
        let row = backend
            .insert("planes_moviles", json!({"nombre": "Básico 5GB", "precio": 9.9}))
            .await
            .unwrap();
        assert!(Uuid::parse_str(row["id"].as_str().unwrap()).is_ok());
        assert!(row["created_at"].is_string());
        assert_eq!(backend.rows("planes_moviles").len(), 1);
    }

    #[tokio::test]
    async fn test_select_filters_orders_limits() {
        let backend = MemoryBackend::default();
        for (name, price, active) in [("c", 30.0, true), ("a", 10.0, true), ("b", 20.0, false)] {
            backend
                .insert("planes_moviles", json!({"nombre": name, "precio": price, "activo": active}))
                .await
                .unwrap();
        }

        let rows = backend
            .select(&Query::table("planes_moviles").eq("activo", true).order("precio", true))
            .await
            .unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r["nombre"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["a", "c"]);

        let rows = backend
            .select(&Query::table("planes_moviles").order("precio", false).limit(1))
            .await
            .unwrap();
        assert_eq!(rows[0]["nombre"], "c");
    }

    #[tokio::test]
    async fn test_update_emits_only_for_matched_rows() {
        let backend = MemoryBackend::default();
        let mut feed = backend
            .subscribe_changes(ChangeFilter::table("mensajes_chat").kinds(&[ChangeKind::Update]))
            .await
            .unwrap();
        backend
            .insert("mensajes_chat", json!({"contratacion_id": "t", "leido": false}))
            .await
            .unwrap();

        let filters = [Filter::eq("contratacion_id", "t"), Filter::eq("leido", false)];
        let first = backend.update("mensajes_chat", &filters, json!({"leido": true})).await.unwrap();
        let second = backend.update("mensajes_chat", &filters, json!({"leido": true})).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());

        assert!(feed.next().await.is_some());
        assert_eq!(feed.drain_pending(), 0);
    }

    #[tokio::test]
    async fn test_unfiltered_writes_refused() {
        let backend = MemoryBackend::default();
        assert!(backend.update("perfiles", &[], json!({"bio": "x"})).await.is_err());
        assert!(backend.delete("perfiles", &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_failing_table() {
        let backend = MemoryBackend::default();
        backend.fail_table("mensajes_chat");
        assert!(backend.select(&Query::table("mensajes_chat")).await.is_err());
        backend.restore_table("mensajes_chat");
        assert!(backend.select(&Query::table("mensajes_chat")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_profile_procedure_upserts() {
        let backend = MemoryBackend::default();
        let user = Uuid::new_v4();
        let args = json!({"p_user_id": user, "p_full_name": "Ana", "p_phone": null, "p_rol": "usuario_registrado"});
        let created = backend.rpc("crear_perfil_usuario", args).await.unwrap();
        assert_eq!(created["full_name"], "Ana");

        let args = json!({"p_user_id": user, "p_full_name": "Ana María"});
        let updated = backend.rpc("crear_perfil_usuario", args).await.unwrap();
        assert_eq!(updated["full_name"], "Ana María");
        assert_eq!(backend.rows("perfiles").len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_procedure() {
        let backend = MemoryBackend::default();
        assert!(matches!(
            backend.rpc("no_such_fn", json!({})).await,
            Err(TiendaError::NotFound(_))
        ));
    }

    #[test]
    fn test_compare_values_rfc3339_instants() {
        // Lexically "…05Z" sorts after "…05.500Z"; as instants it is earlier.
        let a = json!("2026-02-23T10:00:05Z");
        let b = json!("2026-02-23T10:00:05.500Z");
        assert_eq!(compare_values(&a, &b), Ordering::Less);
        assert_eq!(compare_values(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare_values(&Value::Null, &json!("x")), Ordering::Less);
    }

    #[tokio::test]
    async fn test_conversations_view_aggregates_threads() {
        let backend = MemoryBackend::default();
        let customer = Uuid::new_v4();
        let advisor = Uuid::new_v4();
        backend.insert("perfiles", json!({"user_id": customer, "full_name": "Ana", "rol": "usuario_registrado"})).await.unwrap();
        backend.insert("perfiles", json!({"user_id": advisor, "full_name": "Luis", "rol": "asesor_comercial"})).await.unwrap();
        let plan = backend.insert("planes_moviles", json!({"nombre": "Medio 20GB"})).await.unwrap();
        let contract = backend
            .insert("contrataciones", json!({"usuario_id": customer, "plan_id": plan["id"], "estado": "pendiente"}))
            .await
            .unwrap();
        backend
            .insert("contrataciones", json!({"usuario_id": customer, "plan_id": plan["id"], "estado": "pendiente"}))
            .await
            .unwrap();

        backend.insert("mensajes_chat", json!({
            "contratacion_id": contract["id"], "usuario_id": customer, "asesor_id": null,
            "mensaje": "hola", "leido": false, "created_at": "2026-02-23T10:00:00Z"
        })).await.unwrap();
        backend.insert("mensajes_chat", json!({
            "contratacion_id": contract["id"], "usuario_id": advisor, "asesor_id": advisor,
            "mensaje": "buenas", "leido": false, "created_at": "2026-02-23T10:00:01Z"
        })).await.unwrap();

        let rows = backend.select(&Query::table("vw_conversaciones_chat")).await.unwrap();
        assert_eq!(rows.len(), 1, "threads without messages are not conversations");
        let row = &rows[0];
        assert_eq!(row["ultimo_mensaje"], "buenas");
        assert_eq!(row["asesor_nombre"], "Luis");
        assert_eq!(row["usuario_nombre"], "Ana");
        assert_eq!(row["plan_nombre"], "Medio 20GB");
        assert_eq!(row["no_leidos"], 2);
    }
}
