/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Audit Logs Module
//!
//! Append-only record of every actor action against the system. Rows are
//! never updated or deleted; the DAL only ever inserts.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

/// Actor categories that can appear in an audit entry.
pub const ACTOR_SYSTEM: &str = "system";
pub const ACTOR_ADMIN: &str = "admin";
pub const ACTOR_DISPATCHER: &str = "dispatcher";
pub const ACTOR_QA: &str = "qa";
pub const ACTOR_ESCALATION: &str = "escalation";
pub const ACTOR_INGRESS: &str = "ingress";

pub const VALID_ACTORS: &[&str] = &[
    ACTOR_SYSTEM,
    ACTOR_ADMIN,
    ACTOR_DISPATCHER,
    ACTOR_QA,
    ACTOR_ESCALATION,
    ACTOR_INGRESS,
];

/// Action identifiers, one per noteworthy lifecycle event.
pub const ACTION_CREATED: &str = "work_order_created";
pub const ACTION_CLARIFICATION_REQUESTED: &str = "clarification_requested";
pub const ACTION_TRANSITIONED: &str = "status_transitioned";
pub const ACTION_ATTEMPT_RECORDED: &str = "attempt_recorded";
pub const ACTION_QA_PASSED: &str = "qa_passed";
pub const ACTION_QA_FAILED: &str = "qa_failed";
pub const ACTION_ESCALATED: &str = "escalated";
pub const ACTION_BOARD_NOTIFY: &str = "board_notify";
pub const ACTION_BUDGET_BLOCK: &str = "budget_block";
pub const ACTION_RATE_LIMITED: &str = "rate_limited";
pub const ACTION_CANCELLED: &str = "cancelled";

/// Outcome status recorded alongside the action.
pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_FAILURE: &str = "failure";
pub const STATUS_INFO: &str = "info";

/// An immutable audit trail entry.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone, Serialize, Deserialize, ToSchema)]
#[diesel(table_name = crate::schema::audit_logs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AuditLog {
    pub id: Uuid,
    pub work_order_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub actor: String,
    pub action: String,
    pub status: String,
    pub details_json: Option<JsonValue>,
    pub timestamp: DateTime<Utc>,
}

/// A new audit entry to be inserted. Construct via `NewAuditLog::new` so the
/// actor/action/status vocabulary stays consistent.
#[derive(Insertable, Debug, Clone, Serialize, Deserialize, ToSchema)]
#[diesel(table_name = crate::schema::audit_logs)]
pub struct NewAuditLog {
    pub work_order_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub actor: String,
    pub action: String,
    pub status: String,
    pub details_json: Option<JsonValue>,
}

impl NewAuditLog {
    pub fn new(
        work_order_id: Option<Uuid>,
        session_id: Option<Uuid>,
        actor: &str,
        action: &str,
        status: &str,
    ) -> Result<Self, String> {
        if !VALID_ACTORS.contains(&actor) {
            return Err(format!("invalid actor: {actor}"));
        }
        if action.trim().is_empty() {
            return Err("action cannot be empty".to_string());
        }
        Ok(NewAuditLog {
            work_order_id,
            session_id,
            actor: actor.to_string(),
            action: action.to_string(),
            status: status.to_string(),
            details_json: None,
        })
    }

    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details_json = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_audit_log_success() {
        let entry = NewAuditLog::new(
            Some(Uuid::new_v4()),
            None,
            ACTOR_DISPATCHER,
            ACTION_TRANSITIONED,
            STATUS_SUCCESS,
        )
        .unwrap();
        assert_eq!(entry.actor, ACTOR_DISPATCHER);
    }

    #[test]
    fn test_new_audit_log_invalid_actor() {
        let result = NewAuditLog::new(None, None, "nobody", ACTION_CREATED, STATUS_SUCCESS);
        assert!(result.is_err());
    }

    #[test]
    fn test_new_audit_log_empty_action() {
        let result = NewAuditLog::new(None, None, ACTOR_SYSTEM, "", STATUS_SUCCESS);
        assert!(result.is_err());
    }

    #[test]
    fn test_with_details() {
        let entry = NewAuditLog::new(None, None, ACTOR_SYSTEM, ACTION_BUDGET_BLOCK, STATUS_INFO)
            .unwrap()
            .with_details(serde_json::json!({"cap_usd": 50.0}));
        assert!(entry.details_json.is_some());
    }
}
