//! Tienda HTTP REST API
//!
//! Axum server over the subsystems. Each endpoint has a thin handler that
//! delegates to an `*_inner` function returning `(StatusCode, Value)`, so the
//! business paths are testable without axum dispatch.
//!
//! The caller is identified by the `x-user-id` header, set by the auth
//! gateway in front of this service.
//!
//! Endpoints:
//! - GET    /health, /version
//! - GET    /plans[?segmento=]       POST /plans
//! - GET    /plans/:id               PATCH|DELETE /plans/:id
//! - POST   /contracts               GET /contracts[?usuario_id=]
//! - GET    /contracts/pending       GET /contracts/:id
//! - POST   /contracts/:id/approve   POST /contracts/:id/reject
//! - GET    /advisor/stats
//! - GET    /conversations[?advisor=]
//! - GET    /threads/:id/messages    POST /threads/:id/messages
//! - POST   /threads/:id/read        POST /threads/:id/typing
//! - GET    /threads/:id/events      (SSE: `messages` snapshots, `typing` events)
//! - POST   /profiles                GET /profiles/:user_id

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tienda_core::models::{Message, NewMessage, NewPlan, PlanPatch, Segment, TypingEvent};
use tienda_core::{Backend, TiendaConfig};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use crate::subsystems::catalog::{filter_segment, PlanService};
use crate::subsystems::contracts::ContractService;
use crate::subsystems::messages::{self, MessageStore};
use crate::subsystems::presence::{PresenceTracker, TypingFeed};
use crate::subsystems::profiles::ProfileService;

pub const USER_HEADER: &str = "x-user-id";

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub backend: Arc<dyn Backend>,
    pub config: TiendaConfig,
    pub presence: PresenceTracker,
}

impl HttpState {
    pub fn new(backend: Arc<dyn Backend>, config: TiendaConfig) -> Self {
        let presence = PresenceTracker::new(backend.clone(), config.realtime.typing_timeout());
        Self {
            backend,
            config,
            presence,
        }
    }
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/plans", get(list_plans_handler).post(create_plan_handler))
        .route(
            "/plans/:id",
            get(get_plan_handler)
                .patch(update_plan_handler)
                .delete(delete_plan_handler),
        )
        .route(
            "/contracts",
            get(list_contracts_handler).post(create_contract_handler),
        )
        .route("/contracts/pending", get(pending_contracts_handler))
        .route("/contracts/:id", get(get_contract_handler))
        .route("/contracts/:id/approve", post(approve_contract_handler))
        .route("/contracts/:id/reject", post(reject_contract_handler))
        .route("/advisor/stats", get(advisor_stats_handler))
        .route("/conversations", get(conversations_handler))
        .route(
            "/threads/:id/messages",
            get(thread_messages_handler).post(send_message_handler),
        )
        .route("/threads/:id/read", post(mark_read_handler))
        .route("/threads/:id/typing", post(typing_handler))
        .route("/threads/:id/events", get(thread_events_handler))
        .route("/profiles", post(register_profile_handler))
        .route("/profiles/:user_id", get(get_profile_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    backend: Arc<dyn Backend>,
    config: TiendaConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.http.host, config.http.port);
    let state = Arc::new(HttpState::new(backend, config));

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Tienda HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct PlansParams {
    pub segmento: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ContractsParams {
    pub usuario_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ConversationsParams {
    pub advisor: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CreateContractRequest {
    pub plan_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub mensaje: String,
    #[serde(default)]
    pub asesor_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct TypingRequest {
    pub is_typing: bool,
}

#[derive(Debug, Deserialize)]
pub struct RegisterProfileRequest {
    /// Defaults to the caller. Only advisors may name another user.
    #[serde(default)]
    pub user_id: Option<Uuid>,
    pub full_name: String,
    #[serde(default)]
    pub phone: Option<String>,
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check: asks the backend and returns (status_code, json_body).
pub async fn health_inner(backend: &dyn Backend) -> (StatusCode, Value) {
    match backend.health().await {
        Ok(info) => (
            StatusCode::OK,
            json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "backend": backend.name(),
                "backend_info": info,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({
                "status": "unhealthy",
                "backend": backend.name(),
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "tienda/1",
    })
}

pub async fn list_plans_inner(backend: Arc<dyn Backend>, segment: Option<&str>) -> (StatusCode, Value) {
    let segment = match segment.map(str::parse::<Segment>).transpose() {
        Ok(s) => s,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    let mut plans = PlanService::new(backend).list_active().await;
    if let Some(segment) = segment {
        plans = filter_segment(plans, segment);
    }
    (StatusCode::OK, json!({ "count": plans.len(), "plans": plans }))
}

pub async fn get_plan_inner(backend: Arc<dyn Backend>, plan_id: Uuid) -> (StatusCode, Value) {
    match PlanService::new(backend).get(plan_id).await {
        Some(plan) => (StatusCode::OK, json!(plan)),
        None => error_response(StatusCode::NOT_FOUND, "plan not found"),
    }
}

pub async fn create_plan_inner(
    backend: Arc<dyn Backend>,
    caller: Option<Uuid>,
    plan: NewPlan,
) -> (StatusCode, Value) {
    let actor = match require_advisor(backend.clone(), caller).await {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    match PlanService::new(backend).create(actor, &plan).await {
        Some(plan) => (StatusCode::CREATED, json!(plan)),
        None => error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to create plan"),
    }
}

pub async fn update_plan_inner(
    backend: Arc<dyn Backend>,
    caller: Option<Uuid>,
    plan_id: Uuid,
    patch: PlanPatch,
) -> (StatusCode, Value) {
    if let Err(response) = require_advisor(backend.clone(), caller).await {
        return response;
    }
    match PlanService::new(backend).update(plan_id, &patch).await {
        Some(plan) => (StatusCode::OK, json!(plan)),
        None => error_response(StatusCode::NOT_FOUND, "plan not found"),
    }
}

pub async fn delete_plan_inner(
    backend: Arc<dyn Backend>,
    caller: Option<Uuid>,
    plan_id: Uuid,
) -> (StatusCode, Value) {
    if let Err(response) = require_advisor(backend.clone(), caller).await {
        return response;
    }
    if PlanService::new(backend).delete(plan_id).await {
        (StatusCode::OK, json!({ "deleted": true, "id": plan_id }))
    } else {
        error_response(StatusCode::NOT_FOUND, "plan not found")
    }
}

/// The caller contracts a plan at its current catalog price.
pub async fn create_contract_inner(
    backend: Arc<dyn Backend>,
    caller: Option<Uuid>,
    req: CreateContractRequest,
) -> (StatusCode, Value) {
    let Some(customer) = caller else {
        return unauthenticated();
    };
    let plan = match PlanService::new(backend.clone()).get(req.plan_id).await {
        Some(plan) if plan.active => plan,
        _ => return error_response(StatusCode::NOT_FOUND, "plan not found"),
    };
    match ContractService::new(backend)
        .create(customer, plan.id, plan.price)
        .await
    {
        Some(contract) => (StatusCode::CREATED, json!(contract)),
        None => error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to create contract"),
    }
}

pub async fn list_contracts_inner(
    backend: Arc<dyn Backend>,
    caller: Option<Uuid>,
    customer: Option<Uuid>,
) -> (StatusCode, Value) {
    let customer = match acting_for(backend.clone(), caller, customer).await {
        Ok(user) => user,
        Err(response) => return response,
    };
    let contracts = ContractService::new(backend).list_by_user(customer).await;
    (StatusCode::OK, json!({ "count": contracts.len(), "contracts": contracts }))
}

pub async fn pending_contracts_inner(backend: Arc<dyn Backend>, caller: Option<Uuid>) -> (StatusCode, Value) {
    if let Err(response) = require_advisor(backend.clone(), caller).await {
        return response;
    }
    let contracts = ContractService::new(backend).list_pending().await;
    (StatusCode::OK, json!({ "count": contracts.len(), "contracts": contracts }))
}

pub async fn get_contract_inner(backend: Arc<dyn Backend>, contract_id: Uuid) -> (StatusCode, Value) {
    match ContractService::new(backend).get(contract_id).await {
        Some(contract) => (StatusCode::OK, json!(contract)),
        None => error_response(StatusCode::NOT_FOUND, "contract not found"),
    }
}

/// Approve (`approve = true`) or reject a pending contract. Advisors only.
pub async fn decide_contract_inner(
    backend: Arc<dyn Backend>,
    caller: Option<Uuid>,
    contract_id: Uuid,
    approve: bool,
) -> (StatusCode, Value) {
    let actor = match require_advisor(backend.clone(), caller).await {
        Ok(actor) => actor,
        Err(response) => return response,
    };
    let contracts = ContractService::new(backend);
    let done = if approve {
        contracts.approve(actor, contract_id).await
    } else {
        contracts.reject(actor, contract_id).await
    };
    if !done {
        return error_response(StatusCode::NOT_FOUND, "contract not found");
    }
    match contracts.get(contract_id).await {
        Some(contract) => (StatusCode::OK, json!(contract)),
        None => (StatusCode::OK, json!({ "id": contract_id })),
    }
}

pub async fn advisor_stats_inner(backend: Arc<dyn Backend>, caller: Option<Uuid>) -> (StatusCode, Value) {
    if let Err(response) = require_advisor(backend.clone(), caller).await {
        return response;
    }
    let stats = ContractService::new(backend).advisor_stats().await;
    (StatusCode::OK, json!(stats))
}

/// Conversations of the caller. The advisor/customer side is taken from the
/// caller's profile unless `advisor` says otherwise.
pub async fn conversations_inner(
    backend: Arc<dyn Backend>,
    caller: Option<Uuid>,
    advisor: Option<bool>,
) -> (StatusCode, Value) {
    let Some(user) = caller else {
        return unauthenticated();
    };
    let profiles = ProfileService::new(backend);
    let is_advisor = match advisor {
        Some(flag) => flag,
        None => profiles.load(user).await.is_some_and(|p| p.is_advisor()),
    };
    let conversations = profiles.list_conversations(user, is_advisor).await;
    (
        StatusCode::OK,
        json!({ "count": conversations.len(), "conversations": conversations }),
    )
}

pub async fn thread_messages_inner(backend: Arc<dyn Backend>, thread_id: Uuid) -> (StatusCode, Value) {
    let messages = messages::load_messages(backend.as_ref(), thread_id).await;
    (StatusCode::OK, json!({ "count": messages.len(), "messages": messages }))
}

pub async fn send_message_inner(
    state: &HttpState,
    caller: Option<Uuid>,
    thread_id: Uuid,
    req: SendMessageRequest,
) -> (StatusCode, Value) {
    let Some(sender) = caller else {
        return unauthenticated();
    };
    if req.mensaje.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "mensaje must not be blank");
    }
    let new = NewMessage::new(thread_id, sender, req.asesor_id, req.mensaje);
    match messages::insert_message(state.backend.as_ref(), &new).await {
        Some(message) => {
            state.presence.notify_typing(thread_id, sender, false).await;
            (StatusCode::CREATED, json!(message))
        }
        None => error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to send message"),
    }
}

pub async fn mark_read_inner(backend: Arc<dyn Backend>, thread_id: Uuid) -> (StatusCode, Value) {
    if messages::mark_thread_read(backend.as_ref(), thread_id).await {
        (StatusCode::OK, json!({ "ok": true }))
    } else {
        error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to mark messages as read")
    }
}

/// Broadcast the caller's typing state. `typing_users` is this server's own
/// presence set: typing recorded through this process, not signals that other
/// processes broadcast.
pub async fn typing_inner(
    state: &HttpState,
    caller: Option<Uuid>,
    thread_id: Uuid,
    req: TypingRequest,
) -> (StatusCode, Value) {
    let Some(user) = caller else {
        return unauthenticated();
    };
    state.presence.notify_typing(thread_id, user, req.is_typing).await;
    (
        StatusCode::ACCEPTED,
        json!({ "typing_users": state.presence.typing_users(thread_id) }),
    )
}

pub async fn register_profile_inner(
    backend: Arc<dyn Backend>,
    caller: Option<Uuid>,
    req: RegisterProfileRequest,
) -> (StatusCode, Value) {
    let user = match acting_for(backend.clone(), caller, req.user_id).await {
        Ok(user) => user,
        Err(response) => return response,
    };
    if req.full_name.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "full_name is required");
    }
    match ProfileService::new(backend)
        .register(user, req.full_name.trim(), req.phone.as_deref())
        .await
    {
        Some(profile) => (StatusCode::CREATED, json!(profile)),
        None => error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to register profile"),
    }
}

pub async fn get_profile_inner(backend: Arc<dyn Backend>, user_id: Uuid) -> (StatusCode, Value) {
    match ProfileService::new(backend).load(user_id).await {
        Some(profile) => (StatusCode::OK, json!(profile)),
        None => error_response(StatusCode::NOT_FOUND, "profile not found"),
    }
}

// ============================================================================
// Server-Sent Events
// ============================================================================

struct ThreadEvents {
    // Owns the live view; dropping the stream stops it.
    _store: MessageStore,
    messages: watch::Receiver<Vec<Message>>,
    typing: Option<TypingFeed>,
}

async fn next_typing(feed: &mut Option<TypingFeed>) -> Option<TypingEvent> {
    match feed {
        Some(feed) => feed.next().await,
        None => std::future::pending().await,
    }
}

/// One item of a thread's live stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ThreadEvent {
    Messages(Vec<Message>),
    Typing(TypingEvent),
}

impl ThreadEvent {
    fn into_sse(self) -> Event {
        match self {
            ThreadEvent::Messages(snapshot) => sse_event("messages", &snapshot),
            ThreadEvent::Typing(event) => sse_event("typing", &event),
        }
    }
}

impl ThreadEvents {
    async fn next_event(&mut self) -> Option<ThreadEvent> {
        tokio::select! {
            changed = self.messages.changed() => {
                changed.ok()?;
                let snapshot = self.messages.borrow_and_update().clone();
                Some(ThreadEvent::Messages(snapshot))
            }
            Some(event) = next_typing(&mut self.typing) => Some(ThreadEvent::Typing(event)),
        }
    }
}

fn sse_event<T: serde::Serialize>(name: &str, data: &T) -> Event {
    Event::default()
        .event(name)
        .json_data(data)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

/// Live updates for a thread: a `Messages` snapshot after every reload and
/// each `Typing` signal as it arrives.
pub async fn thread_updates(
    backend: Arc<dyn Backend>,
    presence: PresenceTracker,
    thread_id: Uuid,
) -> impl Stream<Item = ThreadEvent> {
    let store = MessageStore::new(backend);
    let messages = store.subscribe(thread_id);
    let typing = presence.subscribe_typing(thread_id).await;
    let events = ThreadEvents {
        _store: store,
        messages,
        typing,
    };
    stream::unfold(events, |mut events| async move {
        let event = events.next_event().await?;
        Some((event, events))
    })
}

/// `thread_updates` encoded as SSE `messages` and `typing` events.
pub async fn thread_events(
    backend: Arc<dyn Backend>,
    presence: PresenceTracker,
    thread_id: Uuid,
) -> impl Stream<Item = std::result::Result<Event, Infallible>> {
    thread_updates(backend, presence, thread_id)
        .await
        .map(|event| Ok(event.into_sse()))
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(state.backend.as_ref()).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn list_plans_handler(
    State(state): State<Arc<HttpState>>,
    Query(params): Query<PlansParams>,
) -> impl IntoResponse {
    let (status, body) = list_plans_inner(state.backend.clone(), params.segmento.as_deref()).await;
    (status, Json(body))
}

pub async fn get_plan_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = get_plan_inner(state.backend.clone(), id).await;
    (status, Json(body))
}

pub async fn create_plan_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Json(plan): Json<NewPlan>,
) -> impl IntoResponse {
    let (status, body) = create_plan_inner(state.backend.clone(), caller_id(&headers), plan).await;
    (status, Json(body))
}

pub async fn update_plan_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(patch): Json<PlanPatch>,
) -> impl IntoResponse {
    let (status, body) =
        update_plan_inner(state.backend.clone(), caller_id(&headers), id, patch).await;
    (status, Json(body))
}

pub async fn delete_plan_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = delete_plan_inner(state.backend.clone(), caller_id(&headers), id).await;
    (status, Json(body))
}

pub async fn create_contract_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Json(req): Json<CreateContractRequest>,
) -> impl IntoResponse {
    let (status, body) =
        create_contract_inner(state.backend.clone(), caller_id(&headers), req).await;
    (status, Json(body))
}

pub async fn list_contracts_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Query(params): Query<ContractsParams>,
) -> impl IntoResponse {
    let (status, body) =
        list_contracts_inner(state.backend.clone(), caller_id(&headers), params.usuario_id).await;
    (status, Json(body))
}

pub async fn pending_contracts_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let (status, body) = pending_contracts_inner(state.backend.clone(), caller_id(&headers)).await;
    (status, Json(body))
}

pub async fn get_contract_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = get_contract_inner(state.backend.clone(), id).await;
    (status, Json(body))
}

pub async fn approve_contract_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) =
        decide_contract_inner(state.backend.clone(), caller_id(&headers), id, true).await;
    (status, Json(body))
}

pub async fn reject_contract_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) =
        decide_contract_inner(state.backend.clone(), caller_id(&headers), id, false).await;
    (status, Json(body))
}

pub async fn advisor_stats_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let (status, body) = advisor_stats_inner(state.backend.clone(), caller_id(&headers)).await;
    (status, Json(body))
}

pub async fn conversations_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Query(params): Query<ConversationsParams>,
) -> impl IntoResponse {
    let (status, body) =
        conversations_inner(state.backend.clone(), caller_id(&headers), params.advisor).await;
    (status, Json(body))
}

pub async fn thread_messages_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = thread_messages_inner(state.backend.clone(), id).await;
    (status, Json(body))
}

pub async fn send_message_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> impl IntoResponse {
    let (status, body) = send_message_inner(&state, caller_id(&headers), id, req).await;
    (status, Json(body))
}

pub async fn mark_read_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = mark_read_inner(state.backend.clone(), id).await;
    (status, Json(body))
}

pub async fn typing_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<TypingRequest>,
) -> impl IntoResponse {
    let (status, body) = typing_inner(&state, caller_id(&headers), id, req).await;
    (status, Json(body))
}

pub async fn thread_events_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let events = thread_events(state.backend.clone(), state.presence.clone(), id).await;
    Sse::new(events).keep_alive(KeepAlive::default())
}

pub async fn register_profile_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Json(req): Json<RegisterProfileRequest>,
) -> impl IntoResponse {
    let (status, body) =
        register_profile_inner(state.backend.clone(), caller_id(&headers), req).await;
    (status, Json(body))
}

pub async fn get_profile_handler(
    State(state): State<Arc<HttpState>>,
    Path(user_id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = get_profile_inner(state.backend.clone(), user_id).await;
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

/// Caller identity from the gateway header. Absent or malformed means anonymous.
pub fn caller_id(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get(USER_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

pub fn error_response(status: StatusCode, msg: impl ToString) -> (StatusCode, Value) {
    (
        status,
        json!({
            "error": msg.to_string(),
            "status": "error",
        }),
    )
}

fn unauthenticated() -> (StatusCode, Value) {
    error_response(StatusCode::UNAUTHORIZED, format!("missing {} header", USER_HEADER))
}

async fn require_advisor(
    backend: Arc<dyn Backend>,
    caller: Option<Uuid>,
) -> std::result::Result<Uuid, (StatusCode, Value)> {
    let Some(user) = caller else {
        return Err(unauthenticated());
    };
    match ProfileService::new(backend).require_advisor(user).await {
        Some(profile) => Ok(profile.user_id),
        None => Err(error_response(StatusCode::FORBIDDEN, "advisor role required")),
    }
}

/// The user a request acts on: the caller, or `requested` when it differs and
/// the caller is an advisor.
async fn acting_for(
    backend: Arc<dyn Backend>,
    caller: Option<Uuid>,
    requested: Option<Uuid>,
) -> std::result::Result<Uuid, (StatusCode, Value)> {
    let Some(user) = caller else {
        return Err(unauthenticated());
    };
    match requested {
        Some(other) if other != user => require_advisor(backend, caller).await.map(|_| other),
        _ => Ok(user),
    }
}

// ============================================================================
// Unit tests, calling inner functions directly
// ============================================================================
