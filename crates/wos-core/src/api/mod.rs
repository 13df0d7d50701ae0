/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Ingress
//!
//! A minimal axum router exercising the pipeline end to end. The full
//! HTTP/WebSocket surface (auth, pagination, the web dashboard) lives
//! outside this crate's scope; this module implements just the six
//! ingress operations, thin enough that adapters (Telegram, the
//! dashboard) are a straightforward translation layer on top.

mod auth;

pub use auth::Principal;

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};
use uuid::Uuid;

use wos_models::models::audit_logs::{
    NewAuditLog, ACTION_BUDGET_BLOCK, ACTION_CLARIFICATION_REQUESTED, ACTION_CREATED,
    ACTION_RATE_LIMITED, ACTOR_ADMIN, ACTOR_INGRESS, ACTOR_SYSTEM, STATUS_INFO, STATUS_SUCCESS,
};
use wos_models::models::work_orders::{NewWorkOrder, WorkOrder, DIFFICULTY_UNCLEAR, STATUS_QUEUED, TIER_ADMIN};
use wos_utils::config::Settings;
use wos_utils::logging::prelude::*;

use crate::admin::AdminClassifier;
use crate::dispatcher::Dispatcher;
use crate::error::{Result, SchedulerError};
use crate::event_bus::ProgressEvent;
use crate::metrics;
use crate::rate_limit::RateLimiter;
use crate::store::{ReclassifyFields, WorkOrderFilter, WorkOrderStore};

/// Shared state for every route handler. Cloning is cheap: every field is
/// already `Arc`-backed.
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn WorkOrderStore>,
    dispatcher: Arc<Dispatcher>,
    admin: Arc<AdminClassifier>,
    rate_limiter: Arc<RateLimiter>,
    settings: Arc<Settings>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn WorkOrderStore>,
        dispatcher: Arc<Dispatcher>,
        admin: Arc<AdminClassifier>,
        rate_limiter: Arc<RateLimiter>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            admin,
            rate_limiter,
            settings,
        }
    }
}

/// Builds the full router. `cors_allowed_origins` empty means "no CORS
/// layer added" rather than "allow nothing", matching how an empty
/// `default.toml` list reads operationally (the dashboard is same-origin
/// until configured otherwise).
pub fn configure_api_routes(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/work-orders", post(create_work_order).get(query_work_orders))
        .route("/work-orders/:id", get(get_work_order))
        .route("/work-orders/:id/resume", post(resume_work_order))
        .route("/work-orders/:id/events", get(subscribe_work_order_events))
        .route("/sessions/:id/events", get(subscribe_session_events))
        .route("/metrics/cost", get(query_cost))
        .route("/metrics", get(prometheus_metrics))
        .route("/healthz", get(healthz));

    if !state.settings.ingress.cors_allowed_origins.is_empty() {
        let origins: Vec<axum::http::HeaderValue> = state
            .settings
            .ingress
            .cors_allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        router = router.layer(CorsLayer::new().allow_origin(AllowOrigin::list(origins)));
    }

    router.with_state(state)
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "backend": match state.store.backend() {
        crate::store::Backend::Postgres => "postgres",
        crate::store::Backend::SqliteFallback => "sqlite-fallback",
    } }))
}

async fn prometheus_metrics() -> impl IntoResponse {
    (StatusCode::OK, metrics::encode_metrics())
}

// ---------------------------------------------------------------------
// createWorkOrder
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateWorkOrderRequest {
    pub raw_message: String,
    pub session_id: Option<Uuid>,
    pub channel: Option<String>,
    pub external_user_id: Option<String>,
    #[serde(default)]
    pub conversation_history: Vec<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateWorkOrderResponse {
    pub id: Uuid,
    pub difficulty: String,
    pub owner: String,
    pub clarifying_question: Option<String>,
}

/// `createWorkOrder(raw_message, session_id?, principal) → {id, difficulty,
/// owner}`. Runs the rate limiter, the daily budget check, Admin
/// classification, and enqueues the result, in that order — a rejection at
/// any stage never creates a work order.
async fn create_work_order(
    State(state): State<AppState>,
    principal: Principal,
    Json(req): Json<CreateWorkOrderRequest>,
) -> Result<(StatusCode, Json<CreateWorkOrderResponse>)> {
    if req.raw_message.trim().is_empty() {
        return Err(SchedulerError::ValidationError(
            "raw_message cannot be empty".to_string(),
        ));
    }

    if !state.rate_limiter.check(principal.as_str()) {
        let entry = NewAuditLog::new(None, req.session_id, ACTOR_INGRESS, ACTION_RATE_LIMITED, STATUS_INFO)
            .map_err(SchedulerError::ValidationError)?
            .with_details(serde_json::json!({ "principal": principal.as_str() }));
        state.store.append_audit(entry).await?;
        return Err(SchedulerError::RateLimited);
    }

    if let Some(cap) = state.settings.budget.daily_cost_cap_usd {
        let spent = state.store.today_cost_usd().await?;
        if spent >= cap {
            let entry =
                NewAuditLog::new(None, req.session_id, ACTOR_SYSTEM, ACTION_BUDGET_BLOCK, STATUS_INFO)
                    .map_err(SchedulerError::ValidationError)?
                    .with_details(serde_json::json!({ "cap_usd": cap, "spent_usd": spent }));
            state.store.append_audit(entry).await?;
            return Err(SchedulerError::BudgetExceeded);
        }
    }

    let session_id = resolve_session(&state, req.session_id, req.channel.as_deref(), req.external_user_id.as_deref()).await?;

    let classification = state
        .admin
        .classify(&req.raw_message, &req.conversation_history, req.channel.as_deref());

    let new_wo = NewWorkOrder::new(
        session_id,
        req.idempotency_key,
        classification.intent.clone(),
        classification.difficulty.clone(),
        classification.owner.clone(),
        classification.compressed_context.clone(),
        classification.relevant_files.clone(),
        classification.qa_requirements.clone(),
        None,
        classification.equipment_hint.clone(),
        None,
    )
    .map_err(SchedulerError::ValidationError)?;

    let wo = state
        .store
        .create_work_order(new_wo, state.settings.ingress.dedup_window_s)
        .await?;

    if classification.difficulty == DIFFICULTY_UNCLEAR {
        // The row stays `queued` (not terminal) so `resumeWorkOrder` can
        // reclassify it in place and hand it to the dispatcher once the
        // caller answers, instead of enqueueing a work order that can't
        // be dispatched yet.
        let entry = NewAuditLog::new(
            Some(wo.id),
            wo.session_id,
            ACTOR_ADMIN,
            ACTION_CLARIFICATION_REQUESTED,
            STATUS_INFO,
        )
        .map_err(SchedulerError::ValidationError)?
        .with_details(serde_json::json!({ "question": classification.clarifying_question }));
        state.store.append_audit(entry).await?;

        return Ok((
            StatusCode::ACCEPTED,
            Json(CreateWorkOrderResponse {
                id: wo.id,
                difficulty: wo.difficulty,
                owner: wo.owner,
                clarifying_question: classification.clarifying_question,
            }),
        ));
    }

    let entry = NewAuditLog::new(Some(wo.id), wo.session_id, ACTOR_INGRESS, ACTION_CREATED, STATUS_SUCCESS)
        .map_err(SchedulerError::ValidationError)?;
    state.store.append_audit(entry).await?;
    state.dispatcher.enqueue(wo.id);

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateWorkOrderResponse {
            id: wo.id,
            difficulty: wo.difficulty,
            owner: wo.owner,
            clarifying_question: None,
        }),
    ))
}

async fn resolve_session(
    state: &AppState,
    session_id: Option<Uuid>,
    channel: Option<&str>,
    external_user_id: Option<&str>,
) -> Result<Option<Uuid>> {
    if session_id.is_some() {
        return Ok(session_id);
    }
    match (channel, external_user_id) {
        (Some(channel), Some(external_user_id)) => {
            let session = state.store.get_or_create_session(channel, external_user_id).await?;
            Ok(Some(session.id))
        }
        _ => Ok(None),
    }
}

// ---------------------------------------------------------------------
// getWorkOrder
// ---------------------------------------------------------------------

async fn get_work_order(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<WorkOrder>> {
    let wo = state.store.get_work_order(id).await?;
    Ok(Json(wo))
}

// ---------------------------------------------------------------------
// queryWorkOrders
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct QueryWorkOrdersParams {
    pub status: Option<String>,
    pub owner: Option<String>,
    pub limit: Option<i64>,
}

async fn query_work_orders(
    State(state): State<AppState>,
    Query(params): Query<QueryWorkOrdersParams>,
) -> Result<Json<Vec<WorkOrder>>> {
    let filter = WorkOrderFilter {
        status: params.status,
        owner: params.owner,
        limit: params.limit,
    };
    let results = state.store.query_work_orders(filter).await?;
    Ok(Json(results))
}

// ---------------------------------------------------------------------
// queryMetrics
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct QueryMetricsParams {
    /// Width of the lookback window in seconds. Defaults to the last 24h.
    pub window_s: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub cost_usd: f64,
    pub counts_by_status: HashMap<String, i64>,
}

async fn query_cost(
    State(state): State<AppState>,
    Query(params): Query<QueryMetricsParams>,
) -> Result<Json<MetricsResponse>> {
    let window_s = params.window_s.unwrap_or(86_400);
    let since: DateTime<Utc> = Utc::now() - chrono::Duration::seconds(window_s.max(1));
    let summary = state.store.query_cost(since).await?;
    Ok(Json(MetricsResponse {
        prompt_tokens: summary.prompt_tokens,
        completion_tokens: summary.completion_tokens,
        cost_usd: summary.cost_usd,
        counts_by_status: summary.counts_by_status,
    }))
}

// ---------------------------------------------------------------------
// resumeWorkOrder
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ResumeWorkOrderRequest {
    pub user_reply: String,
}

/// `resumeWorkOrder(id, user_reply)`. Only valid on a work order
/// still parked in the `unclear` clarification state (`status=queued`,
/// `owner=admin`); reclassifies it in place and, if the new classification
/// is no longer `unclear`, hands it to the dispatcher.
async fn resume_work_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ResumeWorkOrderRequest>,
) -> Result<Json<CreateWorkOrderResponse>> {
    let wo = state.store.get_work_order(id).await?;

    if wo.status != STATUS_QUEUED || wo.owner != TIER_ADMIN || wo.difficulty != DIFFICULTY_UNCLEAR {
        return Err(SchedulerError::ValidationError(
            "work order is not awaiting clarification".to_string(),
        ));
    }

    let classification = state
        .admin
        .classify(&req.user_reply, std::slice::from_ref(&wo.compressed_context), None);

    let wo = state
        .store
        .reclassify(
            id,
            &ReclassifyFields {
                intent: classification.intent.clone(),
                difficulty: classification.difficulty.clone(),
                owner: classification.owner.clone(),
                compressed_context: classification.compressed_context.clone(),
                relevant_files: classification.relevant_files.clone(),
                qa_requirements: classification.qa_requirements.clone(),
                equipment_hint: classification.equipment_hint.clone(),
            },
        )
        .await?;

    if classification.difficulty == DIFFICULTY_UNCLEAR {
        return Ok(Json(CreateWorkOrderResponse {
            id: wo.id,
            difficulty: wo.difficulty,
            owner: wo.owner,
            clarifying_question: classification.clarifying_question,
        }));
    }

    let entry = NewAuditLog::new(Some(wo.id), wo.session_id, ACTOR_INGRESS, ACTION_CREATED, STATUS_SUCCESS)
        .map_err(SchedulerError::ValidationError)?;
    state.store.append_audit(entry).await?;
    state.dispatcher.enqueue(wo.id);

    Ok(Json(CreateWorkOrderResponse {
        id: wo.id,
        difficulty: wo.difficulty,
        owner: wo.owner,
        clarifying_question: None,
    }))
}

// ---------------------------------------------------------------------
// subscribeProgress
// ---------------------------------------------------------------------

type EventStream = std::pin::Pin<Box<dyn Stream<Item = std::result::Result<Event, std::convert::Infallible>> + Send>>;

/// `subscribeProgress(work_order_id) → event stream`. Missed events
/// are acceptable; a client that connects late simply starts from
/// whatever is published next and recovers the rest via `getWorkOrder`.
async fn subscribe_work_order_events(
    State(state): State<AppState>,
    Path(work_order_id): Path<Uuid>,
) -> Sse<EventStream> {
    let rx = state.dispatcher.event_bus().subscribe();
    let stream = tokio_stream::wrappers::BroadcastStream::new(rx).filter_map(move |item| async move {
        match item {
            Ok(event) if event.work_order_id == work_order_id => Some(Ok(to_sse_event(&event))),
            _ => None,
        }
    });
    Sse::new(Box::pin(stream) as EventStream).keep_alive(KeepAlive::default())
}

/// `subscribeProgress(session_id) → event stream`. Filters the
/// shared event bus by looking up each event's work order's session —
/// acceptable overhead since events are comparatively rare next to work
/// order execution itself.
async fn subscribe_session_events(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Sse<EventStream> {
    let rx = state.dispatcher.event_bus().subscribe();
    let store = state.store.clone();
    let stream = tokio_stream::wrappers::BroadcastStream::new(rx).filter_map(move |item| {
        let store = store.clone();
        async move {
            let event = item.ok()?;
            let wo = store.get_work_order(event.work_order_id).await.ok()?;
            if wo.session_id == Some(session_id) {
                Some(Ok(to_sse_event(&event)))
            } else {
                None
            }
        }
    });
    Sse::new(Box::pin(stream) as EventStream).keep_alive(KeepAlive::default())
}

fn to_sse_event(event: &ProgressEvent) -> Event {
    Event::default()
        .event(event.status.clone())
        .json_data(event)
        .unwrap_or_else(|_| Event::default().data("{}"))
}
