/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Embedded SQLite fallback [`WorkOrderStore`](super::WorkOrderStore), used
//! automatically when the primary PostgreSQL backend cannot be reached at
//! startup. Single-writer, file-backed, natively async via
//! `sqlx`. Array columns (`relevant_files`, `escalation_chain`) and the QA
//! spec definition are stored as JSON-encoded text since SQLite has no
//! native array or jsonb type.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use wos_models::models::agent_metrics::NewAgentMetric;
use wos_models::models::audit_logs::NewAuditLog;
use wos_models::models::qa_specs::QaSpecDefinition;
use wos_models::models::sessions::Session;
use wos_models::models::work_orders::{is_allowed_transition, is_terminal, NewWorkOrder, WorkOrder};

use crate::error::{Result, SchedulerError};

use super::{Backend, CostSummary, ReclassifyFields, SystemStatus, WorkOrderFilter, WorkOrderStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY NOT NULL,
    channel TEXT NOT NULL,
    external_user_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    last_active_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS work_orders (
    id TEXT PRIMARY KEY NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT,
    session_id TEXT,
    idempotency_key TEXT,
    intent TEXT NOT NULL,
    difficulty TEXT NOT NULL,
    owner TEXT NOT NULL,
    status TEXT NOT NULL,
    compressed_context TEXT NOT NULL,
    relevant_files TEXT NOT NULL,
    qa_requirements TEXT NOT NULL,
    qa_spec_ref TEXT,
    equipment_hint TEXT,
    retry_count INTEGER NOT NULL,
    max_retries INTEGER NOT NULL,
    escalation_chain TEXT NOT NULL,
    last_error TEXT,
    result_output TEXT,
    cost_usd REAL NOT NULL,
    prompt_tokens INTEGER NOT NULL,
    completion_tokens INTEGER NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_work_orders_session_idempotency
    ON work_orders (session_id, idempotency_key)
    WHERE idempotency_key IS NOT NULL;

CREATE TABLE IF NOT EXISTS audit_logs (
    id TEXT PRIMARY KEY NOT NULL,
    work_order_id TEXT,
    session_id TEXT,
    actor TEXT NOT NULL,
    action TEXT NOT NULL,
    status TEXT NOT NULL,
    details_json TEXT,
    timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS agent_metrics (
    id TEXT PRIMARY KEY NOT NULL,
    work_order_id TEXT NOT NULL,
    agent_name TEXT NOT NULL,
    role TEXT NOT NULL,
    model TEXT NOT NULL,
    provider TEXT NOT NULL,
    success INTEGER NOT NULL,
    latency_ms INTEGER NOT NULL,
    prompt_tokens INTEGER NOT NULL,
    completion_tokens INTEGER NOT NULL,
    cost_usd REAL NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS qa_specs (
    name TEXT PRIMARY KEY NOT NULL,
    definition_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if absent) the embedded database at `path` and runs
    /// the embedded schema. `path`'s parent directory is created if missing.
    pub async fn open(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;
            }
        }
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;
        Ok(Self { pool })
    }

    fn row_to_work_order(row: &sqlx::sqlite::SqliteRow) -> Result<WorkOrder> {
        let relevant_files: String = row.try_get("relevant_files").map_err(db_err)?;
        let escalation_chain: String = row.try_get("escalation_chain").map_err(db_err)?;
        let session_id: Option<String> = row.try_get("session_id").map_err(db_err)?;
        Ok(WorkOrder {
            id: parse_uuid(row.try_get::<String, _>("id").map_err(db_err)?)?,
            created_at: parse_ts(row.try_get::<String, _>("created_at").map_err(db_err)?)?,
            updated_at: parse_ts(row.try_get::<String, _>("updated_at").map_err(db_err)?)?,
            completed_at: row
                .try_get::<Option<String>, _>("completed_at")
                .map_err(db_err)?
                .map(parse_ts)
                .transpose()?,
            session_id: session_id.map(parse_uuid).transpose()?,
            idempotency_key: row.try_get("idempotency_key").map_err(db_err)?,
            intent: row.try_get("intent").map_err(db_err)?,
            difficulty: row.try_get("difficulty").map_err(db_err)?,
            owner: row.try_get("owner").map_err(db_err)?,
            status: row.try_get("status").map_err(db_err)?,
            compressed_context: row.try_get("compressed_context").map_err(db_err)?,
            relevant_files: serde_json::from_str(&relevant_files).unwrap_or_default(),
            qa_requirements: row.try_get("qa_requirements").map_err(db_err)?,
            qa_spec_ref: row.try_get("qa_spec_ref").map_err(db_err)?,
            equipment_hint: row.try_get("equipment_hint").map_err(db_err)?,
            retry_count: row.try_get("retry_count").map_err(db_err)?,
            max_retries: row.try_get("max_retries").map_err(db_err)?,
            escalation_chain: serde_json::from_str(&escalation_chain).unwrap_or_default(),
            last_error: row.try_get("last_error").map_err(db_err)?,
            result_output: row.try_get("result_output").map_err(db_err)?,
            cost_usd: row.try_get("cost_usd").map_err(db_err)?,
            prompt_tokens: row.try_get("prompt_tokens").map_err(db_err)?,
            completion_tokens: row.try_get("completion_tokens").map_err(db_err)?,
        })
    }

    async fn fetch_work_order(&self, id: Uuid) -> Result<WorkOrder> {
        let row = sqlx::query("SELECT * FROM work_orders WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;
        Self::row_to_work_order(&row)
    }
}

fn db_err(e: sqlx::Error) -> SchedulerError {
    SchedulerError::StorageUnavailable(e.to_string())
}

fn parse_uuid(s: String) -> Result<Uuid> {
    Uuid::parse_str(&s).map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))
}

fn parse_ts(s: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))
}

#[async_trait]
impl WorkOrderStore for SqliteStore {
    async fn create_work_order(
        &self,
        new_work_order: NewWorkOrder,
        dedup_window_s: i64,
    ) -> Result<WorkOrder> {
        if let (Some(session_id), Some(key)) =
            (new_work_order.session_id, &new_work_order.idempotency_key)
        {
            let cutoff = Utc::now() - chrono::Duration::seconds(dedup_window_s);
            let row = sqlx::query(
                "SELECT * FROM work_orders WHERE session_id = ? AND idempotency_key = ? AND created_at >= ?",
            )
            .bind(session_id.to_string())
            .bind(key)
            .bind(cutoff.to_rfc3339())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
            if let Some(row) = row {
                return Self::row_to_work_order(&row);
            }
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO work_orders (
                id, created_at, updated_at, completed_at, session_id, idempotency_key,
                intent, difficulty, owner, status, compressed_context, relevant_files,
                qa_requirements, qa_spec_ref, equipment_hint, retry_count, max_retries,
                escalation_chain, last_error, result_output, cost_usd, prompt_tokens,
                completion_tokens
            ) VALUES (?, ?, ?, NULL, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, NULL, NULL, 0.0, 0, 0)",
        )
        .bind(id.to_string())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(new_work_order.session_id.map(|s| s.to_string()))
        .bind(&new_work_order.idempotency_key)
        .bind(&new_work_order.intent)
        .bind(&new_work_order.difficulty)
        .bind(&new_work_order.owner)
        .bind(&new_work_order.status)
        .bind(&new_work_order.compressed_context)
        .bind(serde_json::to_string(&new_work_order.relevant_files).unwrap())
        .bind(&new_work_order.qa_requirements)
        .bind(&new_work_order.qa_spec_ref)
        .bind(&new_work_order.equipment_hint)
        .bind(new_work_order.max_retries)
        .bind(serde_json::to_string(&new_work_order.escalation_chain).unwrap())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        self.fetch_work_order(id).await
    }

    async fn get_work_order(&self, id: Uuid) -> Result<WorkOrder> {
        self.fetch_work_order(id).await
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: &str,
        to: &str,
        _reason: &str,
    ) -> Result<WorkOrder> {
        if !is_allowed_transition(from, to) {
            return Err(SchedulerError::ConflictingState(format!(
                "{from} -> {to} is not an allowed transition"
            )));
        }
        let now = Utc::now();
        let completed_at = if to == wos_models::models::work_orders::STATUS_COMPLETED {
            Some(now.to_rfc3339())
        } else {
            None
        };
        let result = sqlx::query(
            "UPDATE work_orders SET status = ?, updated_at = ?, completed_at = ? WHERE id = ? AND status = ?",
        )
        .bind(to)
        .bind(now.to_rfc3339())
        .bind(completed_at)
        .bind(id.to_string())
        .bind(from)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            let current = self.fetch_work_order(id).await?;
            return Err(SchedulerError::ConflictingState(format!(
                "expected status {from}, found {} (terminal={})",
                current.status,
                is_terminal(&current.status)
            )));
        }
        self.fetch_work_order(id).await
    }

    async fn record_attempt(
        &self,
        id: Uuid,
        metric: NewAgentMetric,
        attempt_failed: bool,
    ) -> Result<WorkOrder> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            "INSERT INTO agent_metrics (
                id, work_order_id, agent_name, role, model, provider, success,
                latency_ms, prompt_tokens, completion_tokens, cost_usd, timestamp
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(metric.work_order_id.to_string())
        .bind(&metric.agent_name)
        .bind(&metric.role)
        .bind(&metric.model)
        .bind(&metric.provider)
        .bind(metric.success)
        .bind(metric.latency_ms)
        .bind(metric.prompt_tokens)
        .bind(metric.completion_tokens)
        .bind(metric.cost_usd)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let retry_bump = if attempt_failed { 1 } else { 0 };
        sqlx::query(
            "UPDATE work_orders SET
                prompt_tokens = prompt_tokens + ?,
                completion_tokens = completion_tokens + ?,
                cost_usd = cost_usd + ?,
                retry_count = retry_count + ?,
                updated_at = ?
            WHERE id = ?",
        )
        .bind(metric.prompt_tokens)
        .bind(metric.completion_tokens)
        .bind(metric.cost_usd)
        .bind(retry_bump)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        self.fetch_work_order(id).await
    }

    async fn record_result(&self, id: Uuid, output: String) -> Result<WorkOrder> {
        sqlx::query("UPDATE work_orders SET result_output = ?, updated_at = ? WHERE id = ?")
            .bind(output)
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        self.fetch_work_order(id).await
    }

    async fn append_audit(&self, entry: NewAuditLog) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_logs (
                id, work_order_id, session_id, actor, action, status, details_json, timestamp
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(entry.work_order_id.map(|u| u.to_string()))
        .bind(entry.session_id.map(|u| u.to_string()))
        .bind(&entry.actor)
        .bind(&entry.action)
        .bind(&entry.status)
        .bind(entry.details_json.as_ref().map(|v| v.to_string()))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn query_work_orders(&self, filter: WorkOrderFilter) -> Result<Vec<WorkOrder>> {
        let mut sql = "SELECT * FROM work_orders WHERE 1 = 1".to_string();
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.owner.is_some() {
            sql.push_str(" AND owner = ?");
        }
        sql.push_str(" ORDER BY updated_at DESC");
        if filter.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(status) = &filter.status {
            query = query.bind(status);
        }
        if let Some(owner) = &filter.owner {
            query = query.bind(owner);
        }
        if let Some(limit) = filter.limit {
            query = query.bind(limit);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(db_err)?;
        rows.iter().map(Self::row_to_work_order).collect()
    }

    async fn query_system_status(&self) -> Result<SystemStatus> {
        let rows = sqlx::query("SELECT status, COUNT(*) as n FROM work_orders GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        let mut counts_by_status = HashMap::new();
        let mut total = 0i64;
        for row in rows {
            let status: String = row.try_get("status").map_err(db_err)?;
            let n: i64 = row.try_get("n").map_err(db_err)?;
            total += n;
            counts_by_status.insert(status, n);
        }
        Ok(SystemStatus {
            counts_by_status,
            total,
        })
    }

    async fn query_cost(&self, since: DateTime<Utc>) -> Result<CostSummary> {
        let metric_rows = sqlx::query(
            "SELECT cost_usd, prompt_tokens, completion_tokens FROM agent_metrics WHERE timestamp >= ?",
        )
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut summary = CostSummary::default();
        for row in metric_rows {
            summary.cost_usd += row.try_get::<f64, _>("cost_usd").map_err(db_err)?;
            summary.prompt_tokens += row.try_get::<i64, _>("prompt_tokens").map_err(db_err)?;
            summary.completion_tokens +=
                row.try_get::<i64, _>("completion_tokens").map_err(db_err)?;
        }

        let status_rows = sqlx::query(
            "SELECT status, COUNT(*) as n FROM work_orders WHERE updated_at >= ? GROUP BY status",
        )
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        for row in status_rows {
            let status: String = row.try_get("status").map_err(db_err)?;
            let n: i64 = row.try_get("n").map_err(db_err)?;
            summary.counts_by_status.insert(status, n);
        }
        Ok(summary)
    }

    async fn escalate(&self, id: Uuid, new_owner: &str, _reason: &str) -> Result<WorkOrder> {
        let current = self.fetch_work_order(id).await?;
        let mut chain = current.escalation_chain.clone();
        if chain.last().map(String::as_str) != Some(new_owner) {
            chain.push(new_owner.to_string());
        }
        sqlx::query(
            "UPDATE work_orders SET owner = ?, status = ?, retry_count = 0, escalation_chain = ?, updated_at = ? WHERE id = ?",
        )
        .bind(new_owner)
        .bind(wos_models::models::work_orders::STATUS_ESCALATED)
        .bind(serde_json::to_string(&chain).unwrap())
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        self.fetch_work_order(id).await
    }

    async fn reclassify(&self, id: Uuid, classification: &ReclassifyFields) -> Result<WorkOrder> {
        let current = self.fetch_work_order(id).await?;
        let mut chain = current.escalation_chain.clone();
        if chain.last().map(String::as_str) != Some(classification.owner.as_str()) {
            chain.push(classification.owner.clone());
        }
        sqlx::query(
            "UPDATE work_orders SET intent = ?, difficulty = ?, owner = ?, compressed_context = ?,
                relevant_files = ?, qa_requirements = ?, equipment_hint = ?, escalation_chain = ?,
                updated_at = ?
            WHERE id = ?",
        )
        .bind(&classification.intent)
        .bind(&classification.difficulty)
        .bind(&classification.owner)
        .bind(&classification.compressed_context)
        .bind(serde_json::to_string(&classification.relevant_files).unwrap())
        .bind(&classification.qa_requirements)
        .bind(&classification.equipment_hint)
        .bind(serde_json::to_string(&chain).unwrap())
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        self.fetch_work_order(id).await
    }

    async fn cancel(&self, id: Uuid, _reason: &str) -> Result<WorkOrder> {
        let result = sqlx::query(
            "UPDATE work_orders SET status = ?, updated_at = ? WHERE id = ? AND status IN (?, ?)",
        )
        .bind(wos_models::models::work_orders::STATUS_CANCELLED)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .bind(wos_models::models::work_orders::STATUS_QUEUED)
        .bind(wos_models::models::work_orders::STATUS_IN_PROGRESS)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(SchedulerError::ConflictingState("not cancellable".to_string()));
        }
        self.fetch_work_order(id).await
    }

    async fn today_cost_usd(&self) -> Result<f64> {
        let since = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc();
        let row = sqlx::query("SELECT COALESCE(SUM(cost_usd), 0.0) as total FROM agent_metrics WHERE timestamp >= ?")
            .bind(since.to_rfc3339())
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        row.try_get::<f64, _>("total").map_err(db_err)
    }

    async fn get_or_create_session(
        &self,
        channel: &str,
        external_user_id: &str,
    ) -> Result<Session> {
        let existing = sqlx::query("SELECT * FROM sessions WHERE channel = ? AND external_user_id = ?")
            .bind(channel)
            .bind(external_user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        if let Some(row) = existing {
            let id: String = row.try_get("id").map_err(db_err)?;
            let now = Utc::now();
            sqlx::query("UPDATE sessions SET last_active_at = ? WHERE id = ?")
                .bind(now.to_rfc3339())
                .bind(&id)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
            return Ok(Session {
                id: parse_uuid(id)?,
                channel: row.try_get("channel").map_err(db_err)?,
                external_user_id: row.try_get("external_user_id").map_err(db_err)?,
                created_at: parse_ts(row.try_get::<String, _>("created_at").map_err(db_err)?)?,
                last_active_at: now,
            });
        }

        if channel.trim().is_empty() || external_user_id.trim().is_empty() {
            return Err(SchedulerError::ValidationError(
                "channel and external_user_id are required".to_string(),
            ));
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO sessions (id, channel, external_user_id, created_at, last_active_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(channel)
        .bind(external_user_id)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(Session {
            id,
            channel: channel.to_string(),
            external_user_id: external_user_id.to_string(),
            created_at: now,
            last_active_at: now,
        })
    }

    async fn get_qa_spec(&self, name: &str) -> Result<Option<QaSpecDefinition>> {
        let row = sqlx::query("SELECT definition_json FROM qa_specs WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            None => Ok(None),
            Some(row) => {
                let raw: String = row.try_get("definition_json").map_err(db_err)?;
                let value: JsonValue = serde_json::from_str(&raw)
                    .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;
                Ok(serde_json::from_value(value).ok())
            }
        }
    }

    async fn put_qa_spec(&self, name: &str, definition: &QaSpecDefinition) -> Result<()> {
        let raw = serde_json::to_string(definition)
            .map_err(|e| SchedulerError::ValidationError(e.to_string()))?;
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO qa_specs (name, definition_json, created_at, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET definition_json = excluded.definition_json, updated_at = excluded.updated_at",
        )
        .bind(name)
        .bind(raw)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    fn backend(&self) -> Backend {
        Backend::SqliteFallback
    }
}
