/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Postgres-backed primary [`WorkOrderStore`](super::WorkOrderStore), via
//! diesel + r2d2: one struct wrapping a connection pool, one method per
//! operation, blocking diesel calls moved onto `spawn_blocking` since the
//! trait itself is async.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use std::collections::HashMap;
use uuid::Uuid;

use wos_models::models::agent_metrics::NewAgentMetric;
use wos_models::models::audit_logs::NewAuditLog;
use wos_models::models::qa_specs::{NewQaSpecRow, QaSpecDefinition, QaSpecRow};
use wos_models::models::sessions::{NewSession, Session};
use wos_models::models::work_orders::{is_allowed_transition, is_terminal, NewWorkOrder, WorkOrder};
use wos_models::schema::{agent_metrics, audit_logs, qa_specs, sessions, work_orders};

use crate::db::ConnectionPool;
use crate::error::{Result, SchedulerError};

use super::{Backend, CostSummary, ReclassifyFields, SystemStatus, WorkOrderFilter, WorkOrderStore};

#[derive(Clone)]
pub struct PostgresStore {
    pool: ConnectionPool,
}

impl PostgresStore {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }
}

/// Runs a blocking diesel closure on the blocking thread pool, translating
/// panics/join errors into `StorageUnavailable`.
async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?
}

#[async_trait]
impl WorkOrderStore for PostgresStore {
    async fn create_work_order(
        &self,
        new_work_order: NewWorkOrder,
        dedup_window_s: i64,
    ) -> Result<WorkOrder> {
        let pool = self.pool.clone();
        blocking(move || {
            let conn = &mut pool
                .pool
                .get()
                .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;

            if let (Some(session_id), Some(key)) =
                (new_work_order.session_id, &new_work_order.idempotency_key)
            {
                let cutoff = Utc::now() - Duration::seconds(dedup_window_s);
                let existing: Option<WorkOrder> = work_orders::table
                    .filter(work_orders::session_id.eq(session_id))
                    .filter(work_orders::idempotency_key.eq(key))
                    .filter(work_orders::created_at.ge(cutoff))
                    .first(conn)
                    .optional()
                    .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;
                if let Some(existing) = existing {
                    return Ok(existing);
                }
            }

            diesel::insert_into(work_orders::table)
                .values(&new_work_order)
                .get_result(conn)
                .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))
        })
        .await
    }

    async fn get_work_order(&self, id: Uuid) -> Result<WorkOrder> {
        let pool = self.pool.clone();
        blocking(move || {
            let conn = &mut pool
                .pool
                .get()
                .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;
            work_orders::table
                .filter(work_orders::id.eq(id))
                .first(conn)
                .optional()
                .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?
                .ok_or_else(|| SchedulerError::NotFound(id.to_string()))
        })
        .await
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: &str,
        to: &str,
        reason: &str,
    ) -> Result<WorkOrder> {
        if !is_allowed_transition(from, to) {
            return Err(SchedulerError::ConflictingState(format!(
                "{from} -> {to} is not an allowed transition"
            )));
        }
        let pool = self.pool.clone();
        let (from, to, reason) = (from.to_string(), to.to_string(), reason.to_string());
        blocking(move || {
            let conn = &mut pool
                .pool
                .get()
                .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;

            let now = Utc::now();
            let completed_at = if matches!(
                to.as_str(),
                wos_models::models::work_orders::STATUS_COMPLETED
            ) {
                Some(now)
            } else {
                None
            };

            let updated: Vec<WorkOrder> = diesel::update(
                work_orders::table
                    .filter(work_orders::id.eq(id))
                    .filter(work_orders::status.eq(&from)),
            )
            .set((
                work_orders::status.eq(&to),
                work_orders::updated_at.eq(now),
                work_orders::completed_at.eq(completed_at),
            ))
            .get_results(conn)
            .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;

            match updated.into_iter().next() {
                Some(wo) => {
                    let _ = reason; // audit carries the reason; CAS itself does not store it
                    Ok(wo)
                }
                None => {
                    let current: Option<WorkOrder> = work_orders::table
                        .filter(work_orders::id.eq(id))
                        .first(conn)
                        .optional()
                        .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;
                    match current {
                        None => Err(SchedulerError::NotFound(id.to_string())),
                        Some(wo) => Err(SchedulerError::ConflictingState(format!(
                            "expected status {from}, found {} (terminal={})",
                            wo.status,
                            is_terminal(&wo.status)
                        ))),
                    }
                }
            }
        })
        .await
    }

    async fn record_attempt(
        &self,
        id: Uuid,
        metric: NewAgentMetric,
        attempt_failed: bool,
    ) -> Result<WorkOrder> {
        let pool = self.pool.clone();
        blocking(move || {
            let conn = &mut pool
                .pool
                .get()
                .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;

            conn.transaction(|conn| {
                diesel::insert_into(agent_metrics::table)
                    .values(&metric)
                    .execute(conn)?;

                let wo: WorkOrder = work_orders::table
                    .filter(work_orders::id.eq(id))
                    .first(conn)?;

                let new_retry_count = if attempt_failed {
                    wo.retry_count + 1
                } else {
                    wo.retry_count
                };

                diesel::update(work_orders::table.filter(work_orders::id.eq(id)))
                    .set((
                        work_orders::prompt_tokens.eq(wo.prompt_tokens + metric.prompt_tokens),
                        work_orders::completion_tokens
                            .eq(wo.completion_tokens + metric.completion_tokens),
                        work_orders::cost_usd.eq(wo.cost_usd + metric.cost_usd),
                        work_orders::retry_count.eq(new_retry_count),
                        work_orders::updated_at.eq(Utc::now()),
                    ))
                    .get_result(conn)
            })
            .map_err(|e: diesel::result::Error| SchedulerError::StorageUnavailable(e.to_string()))
        })
        .await
    }

    async fn record_result(&self, id: Uuid, output: String) -> Result<WorkOrder> {
        let pool = self.pool.clone();
        blocking(move || {
            let conn = &mut pool
                .pool
                .get()
                .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;
            diesel::update(work_orders::table.filter(work_orders::id.eq(id)))
                .set((
                    work_orders::result_output.eq(Some(output)),
                    work_orders::updated_at.eq(Utc::now()),
                ))
                .get_result(conn)
                .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))
        })
        .await
    }

    async fn append_audit(&self, entry: NewAuditLog) -> Result<()> {
        let pool = self.pool.clone();
        blocking(move || {
            let conn = &mut pool
                .pool
                .get()
                .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;
            diesel::insert_into(audit_logs::table)
                .values(&entry)
                .execute(conn)
                .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn query_work_orders(&self, filter: WorkOrderFilter) -> Result<Vec<WorkOrder>> {
        let pool = self.pool.clone();
        blocking(move || {
            let conn = &mut pool
                .pool
                .get()
                .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;
            let mut query = work_orders::table.into_boxed();
            if let Some(status) = &filter.status {
                query = query.filter(work_orders::status.eq(status));
            }
            if let Some(owner) = &filter.owner {
                query = query.filter(work_orders::owner.eq(owner));
            }
            query = query.order(work_orders::updated_at.desc());
            if let Some(limit) = filter.limit {
                query = query.limit(limit);
            }
            query
                .load(conn)
                .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))
        })
        .await
    }

    async fn query_system_status(&self) -> Result<SystemStatus> {
        let pool = self.pool.clone();
        blocking(move || {
            let conn = &mut pool
                .pool
                .get()
                .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;
            let rows: Vec<(String, i64)> = work_orders::table
                .group_by(work_orders::status)
                .select((work_orders::status, diesel::dsl::count_star()))
                .load(conn)
                .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;
            let total = rows.iter().map(|(_, c)| c).sum();
            Ok(SystemStatus {
                counts_by_status: rows.into_iter().collect::<HashMap<_, _>>(),
                total,
            })
        })
        .await
    }

    async fn query_cost(&self, since: DateTime<Utc>) -> Result<CostSummary> {
        let pool = self.pool.clone();
        blocking(move || {
            let conn = &mut pool
                .pool
                .get()
                .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;
            let metrics: Vec<(f64, i64, i64)> = agent_metrics::table
                .filter(agent_metrics::timestamp.ge(since))
                .select((
                    agent_metrics::cost_usd,
                    agent_metrics::prompt_tokens,
                    agent_metrics::completion_tokens,
                ))
                .load(conn)
                .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;

            let rows: Vec<(String, i64)> = work_orders::table
                .filter(work_orders::updated_at.ge(since))
                .group_by(work_orders::status)
                .select((work_orders::status, diesel::dsl::count_star()))
                .load(conn)
                .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;

            let mut summary = CostSummary {
                counts_by_status: rows.into_iter().collect(),
                ..Default::default()
            };
            for (cost, p, c) in metrics {
                summary.cost_usd += cost;
                summary.prompt_tokens += p;
                summary.completion_tokens += c;
            }
            Ok(summary)
        })
        .await
    }

    async fn escalate(&self, id: Uuid, new_owner: &str, reason: &str) -> Result<WorkOrder> {
        let pool = self.pool.clone();
        let (new_owner, _reason) = (new_owner.to_string(), reason.to_string());
        blocking(move || {
            let conn = &mut pool
                .pool
                .get()
                .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;

            conn.transaction(|conn| {
                let wo: WorkOrder = work_orders::table
                    .filter(work_orders::id.eq(id))
                    .first(conn)?;

                let mut chain = wo.escalation_chain.clone();
                if chain.last().map(String::as_str) != Some(new_owner.as_str()) {
                    chain.push(new_owner.clone());
                }

                diesel::update(work_orders::table.filter(work_orders::id.eq(id)))
                    .set((
                        work_orders::owner.eq(&new_owner),
                        work_orders::status
                            .eq(wos_models::models::work_orders::STATUS_ESCALATED),
                        work_orders::retry_count.eq(0),
                        work_orders::escalation_chain.eq(chain),
                        work_orders::updated_at.eq(Utc::now()),
                    ))
                    .get_result(conn)
            })
            .map_err(|e: diesel::result::Error| SchedulerError::StorageUnavailable(e.to_string()))
        })
        .await
    }

    async fn reclassify(&self, id: Uuid, classification: &ReclassifyFields) -> Result<WorkOrder> {
        let pool = self.pool.clone();
        let classification = classification.clone();
        blocking(move || {
            let conn = &mut pool
                .pool
                .get()
                .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;

            conn.transaction(|conn| {
                let wo: WorkOrder = work_orders::table
                    .filter(work_orders::id.eq(id))
                    .first(conn)?;

                let mut chain = wo.escalation_chain.clone();
                if chain.last().map(String::as_str) != Some(classification.owner.as_str()) {
                    chain.push(classification.owner.clone());
                }

                diesel::update(work_orders::table.filter(work_orders::id.eq(id)))
                    .set((
                        work_orders::intent.eq(&classification.intent),
                        work_orders::difficulty.eq(&classification.difficulty),
                        work_orders::owner.eq(&classification.owner),
                        work_orders::compressed_context.eq(&classification.compressed_context),
                        work_orders::relevant_files.eq(&classification.relevant_files),
                        work_orders::qa_requirements.eq(&classification.qa_requirements),
                        work_orders::equipment_hint.eq(&classification.equipment_hint),
                        work_orders::escalation_chain.eq(chain),
                        work_orders::updated_at.eq(Utc::now()),
                    ))
                    .get_result(conn)
            })
            .map_err(|e: diesel::result::Error| SchedulerError::StorageUnavailable(e.to_string()))
        })
        .await
    }

    async fn cancel(&self, id: Uuid, _reason: &str) -> Result<WorkOrder> {
        let pool = self.pool.clone();
        blocking(move || {
            let conn = &mut pool
                .pool
                .get()
                .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;
            let updated: Vec<WorkOrder> = diesel::update(
                work_orders::table
                    .filter(work_orders::id.eq(id))
                    .filter(
                        work_orders::status
                            .eq(wos_models::models::work_orders::STATUS_QUEUED)
                            .or(work_orders::status
                                .eq(wos_models::models::work_orders::STATUS_IN_PROGRESS)),
                    ),
            )
            .set((
                work_orders::status.eq(wos_models::models::work_orders::STATUS_CANCELLED),
                work_orders::result_output.eq(None::<String>),
                work_orders::updated_at.eq(Utc::now()),
            ))
            .get_results(conn)
            .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;

            updated
                .into_iter()
                .next()
                .ok_or_else(|| SchedulerError::ConflictingState("not cancellable".to_string()))
        })
        .await
    }

    async fn today_cost_usd(&self) -> Result<f64> {
        let since = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc();
        let pool = self.pool.clone();
        blocking(move || {
            let conn = &mut pool
                .pool
                .get()
                .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;
            let costs: Vec<f64> = agent_metrics::table
                .filter(agent_metrics::timestamp.ge(since))
                .select(agent_metrics::cost_usd)
                .load(conn)
                .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;
            Ok(costs.into_iter().sum())
        })
        .await
    }

    async fn get_or_create_session(
        &self,
        channel: &str,
        external_user_id: &str,
    ) -> Result<Session> {
        let pool = self.pool.clone();
        let (channel, external_user_id) = (channel.to_string(), external_user_id.to_string());
        blocking(move || {
            let conn = &mut pool
                .pool
                .get()
                .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;
            let existing: Option<Session> = sessions::table
                .filter(sessions::channel.eq(&channel))
                .filter(sessions::external_user_id.eq(&external_user_id))
                .first(conn)
                .optional()
                .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;
            if let Some(session) = existing {
                diesel::update(sessions::table.filter(sessions::id.eq(session.id)))
                    .set(sessions::last_active_at.eq(Utc::now()))
                    .execute(conn)
                    .ok();
                return Ok(session);
            }
            let new_session = NewSession::new(channel, external_user_id)
                .map_err(SchedulerError::ValidationError)?;
            diesel::insert_into(sessions::table)
                .values(&new_session)
                .get_result(conn)
                .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))
        })
        .await
    }

    async fn get_qa_spec(&self, name: &str) -> Result<Option<QaSpecDefinition>> {
        let pool = self.pool.clone();
        let name = name.to_string();
        blocking(move || {
            let conn = &mut pool
                .pool
                .get()
                .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;
            let row: Option<QaSpecRow> = qa_specs::table
                .filter(qa_specs::name.eq(&name))
                .first(conn)
                .optional()
                .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;
            Ok(row.map(|r| {
                serde_json::from_value(r.definition_json).unwrap_or_default()
            }))
        })
        .await
    }

    async fn put_qa_spec(&self, name: &str, definition: &QaSpecDefinition) -> Result<()> {
        let pool = self.pool.clone();
        let name = name.to_string();
        let definition_json = serde_json::to_value(definition)
            .map_err(|e| SchedulerError::ValidationError(e.to_string()))?;
        blocking(move || {
            let conn = &mut pool
                .pool
                .get()
                .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;
            let new_row = NewQaSpecRow {
                name: name.clone(),
                definition_json: definition_json.clone(),
            };
            diesel::insert_into(qa_specs::table)
                .values(&new_row)
                .on_conflict(qa_specs::name)
                .do_update()
                .set((
                    qa_specs::definition_json.eq(&definition_json),
                    qa_specs::updated_at.eq(Utc::now()),
                ))
                .execute(conn)
                .map_err(|e| SchedulerError::StorageUnavailable(e.to_string()))?;
            Ok(())
        })
        .await
    }

    fn backend(&self) -> Backend {
        Backend::Postgres
    }
}
