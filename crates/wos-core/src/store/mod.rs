/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # WorkOrderStore
//!
//! The store is the only component allowed to touch durable state. Every
//! other component — Admin, Dispatcher, Escalation, QA — mutates a work
//! order exclusively through this trait, never through a raw connection.
//!
//! Two backends implement it: [`postgres::PostgresStore`] (primary, durable,
//! concurrent) and [`sqlite::SqliteStore`] (embedded, single-writer,
//! automatic fallback when the primary is unreachable at startup). Both
//! honor the same CAS semantics for `transition_status`; cross-row
//! atomicity is not required.

pub mod postgres;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;
use wos_models::models::agent_metrics::NewAgentMetric;
use wos_models::models::audit_logs::NewAuditLog;
use wos_models::models::qa_specs::QaSpecDefinition;
use wos_models::models::sessions::Session;
use wos_models::models::work_orders::{NewWorkOrder, WorkOrder};

use crate::error::{Result, SchedulerError};

/// Which backend is currently serving requests. Surfaced on `GET /healthz`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Backend {
    #[serde(rename = "postgres")]
    Postgres,
    #[serde(rename = "sqlite-fallback")]
    SqliteFallback,
}

/// Filter accepted by `QueryWorkOrders`.
#[derive(Debug, Clone, Default)]
pub struct WorkOrderFilter {
    pub status: Option<String>,
    pub owner: Option<String>,
    pub limit: Option<i64>,
}

/// Aggregate counts returned by `QuerySystemStatus`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SystemStatus {
    pub counts_by_status: HashMap<String, i64>,
    pub total: i64,
}

/// Aggregate cost/tokens returned by `QueryCost`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CostSummary {
    pub cost_usd: f64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub counts_by_status: HashMap<String, i64>,
}

/// The fields a re-run of the classifier overwrites on an existing row.
#[derive(Debug, Clone)]
pub struct ReclassifyFields {
    pub intent: String,
    pub difficulty: String,
    pub owner: String,
    pub compressed_context: String,
    pub relevant_files: Vec<String>,
    pub qa_requirements: String,
    pub equipment_hint: Option<String>,
}

/// The narrow, transactional API every other component goes through.
#[async_trait]
pub trait WorkOrderStore: Send + Sync {
    /// Creates a work order with `status=queued`. If `(session_id,
    /// idempotency_key)` was already used within `dedup_window_s`, returns
    /// the previously created row instead of inserting a new one.
    async fn create_work_order(
        &self,
        new_work_order: NewWorkOrder,
        dedup_window_s: i64,
    ) -> Result<WorkOrder>;

    async fn get_work_order(&self, id: Uuid) -> Result<WorkOrder>;

    /// Atomic compare-and-set on `status`. Rejects any pair not present in
    /// `wos_models::work_orders::ALLOWED_TRANSITIONS` without touching
    /// storage.
    async fn transition_status(
        &self,
        id: Uuid,
        from: &str,
        to: &str,
        reason: &str,
    ) -> Result<WorkOrder>;

    /// Appends an `AgentMetric`, adds its tokens/cost to the work order's
    /// running totals, and bumps `retry_count` when `attempt_failed`.
    async fn record_attempt(
        &self,
        id: Uuid,
        metric: NewAgentMetric,
        attempt_failed: bool,
    ) -> Result<WorkOrder>;

    /// Sets `result_output` and `completed_at`.
    async fn record_result(&self, id: Uuid, output: String) -> Result<WorkOrder>;

    async fn append_audit(&self, entry: NewAuditLog) -> Result<()>;

    async fn query_work_orders(&self, filter: WorkOrderFilter) -> Result<Vec<WorkOrder>>;

    async fn query_system_status(&self) -> Result<SystemStatus>;

    async fn query_cost(&self, since: DateTime<Utc>) -> Result<CostSummary>;

    /// Promotes a work order to `new_owner`: appends the tier to
    /// `escalation_chain`, resets `retry_count`, transitions to `escalated`.
    /// Does not create a new work order.
    async fn escalate(&self, id: Uuid, new_owner: &str, reason: &str) -> Result<WorkOrder>;

    async fn cancel(&self, id: Uuid, reason: &str) -> Result<WorkOrder>;

    /// Rewrites a work order's classification fields in place and sets
    /// `owner`/`escalation_chain` to match, without changing `id` or
    /// `created_at`. Used to resolve the `unclear` clarification flow: the
    /// row created at classification time is reclassified once the caller
    /// supplies the missing detail, then handed to the dispatcher.
    async fn reclassify(&self, id: Uuid, classification: &ReclassifyFields) -> Result<WorkOrder>;

    /// Sum of `cost_usd` across agent_metrics recorded since midnight UTC.
    async fn today_cost_usd(&self) -> Result<f64>;

    async fn get_or_create_session(
        &self,
        channel: &str,
        external_user_id: &str,
    ) -> Result<Session>;

    async fn get_qa_spec(&self, name: &str) -> Result<Option<QaSpecDefinition>>;

    async fn put_qa_spec(&self, name: &str, definition: &QaSpecDefinition) -> Result<()>;

    fn backend(&self) -> Backend;
}

/// Opens the primary backend, falling back to the embedded backend when the
/// primary cannot be reached. The choice is logged and exposed via health.
pub async fn open(
    database_url: &str,
    max_pool_size: u32,
    fallback_path: &str,
) -> Result<std::sync::Arc<dyn WorkOrderStore>> {
    let db_url = database_url.to_string();
    let max_size = max_pool_size;
    let primary = tokio::task::spawn_blocking(move || {
        crate::db::try_create_connection_pool(&db_url, max_size)
    })
    .await
    .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;

    if let Some(pool) = primary {
        tracing::info!("primary store backend selected: postgres");
        return Ok(std::sync::Arc::new(postgres::PostgresStore::new(pool)));
    }

    tracing::warn!(
        fallback_path,
        "primary postgres backend unreachable at startup, opening embedded sqlite fallback"
    );
    let store = sqlite::SqliteStore::open(fallback_path).await?;
    Ok(std::sync::Arc::new(store))
}
