/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Work Orders Module
//!
//! A `WorkOrder` is one unit of user-originated work moving through the
//! classification → dispatch → QA → escalation pipeline. Unlike the rest of
//! the durable state, a work order is mutated in place over its lifetime:
//! its `status` advances through a bounded state machine (see
//! `ALLOWED_TRANSITIONS`) enforced by the DAL via compare-and-set, never by
//! this module.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Work order lifecycle states.
pub const STATUS_QUEUED: &str = "queued";
pub const STATUS_IN_PROGRESS: &str = "in_progress";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";
pub const STATUS_ESCALATED: &str = "escalated";
pub const STATUS_CANCELLED: &str = "cancelled";
pub const STATUS_BLOCKED: &str = "blocked";

/// Difficulty classes produced by the Admin classifier.
pub const DIFFICULTY_TRIVIAL: &str = "trivial";
pub const DIFFICULTY_NORMAL: &str = "normal";
pub const DIFFICULTY_COMPLEX: &str = "complex";
pub const DIFFICULTY_UNCLEAR: &str = "unclear";

/// Tiers. `admin` is a classifier-only role, never an escalation target.
pub const TIER_INTERN: &str = "intern";
pub const TIER_DIRECTOR: &str = "director";
pub const TIER_CEO: &str = "ceo";
pub const TIER_ADMIN: &str = "admin";

/// Ordered escalation ladder, excluding the classifier-only `admin` tier.
pub const ESCALATION_LADDER: [&str; 3] = [TIER_INTERN, TIER_DIRECTOR, TIER_CEO];

/// The allowed status transitions. `TransitionStatus` rejects any
/// pair not present here with `ConflictingState`.
pub const ALLOWED_TRANSITIONS: &[(&str, &str)] = &[
    (STATUS_QUEUED, STATUS_IN_PROGRESS),
    (STATUS_QUEUED, STATUS_CANCELLED),
    (STATUS_IN_PROGRESS, STATUS_COMPLETED),
    (STATUS_IN_PROGRESS, STATUS_FAILED),
    (STATUS_IN_PROGRESS, STATUS_ESCALATED),
    (STATUS_IN_PROGRESS, STATUS_BLOCKED),
    (STATUS_IN_PROGRESS, STATUS_CANCELLED),
    (STATUS_FAILED, STATUS_IN_PROGRESS),
    (STATUS_FAILED, STATUS_ESCALATED),
    (STATUS_FAILED, STATUS_BLOCKED),
    (STATUS_ESCALATED, STATUS_IN_PROGRESS),
    (STATUS_ESCALATED, STATUS_BLOCKED),
];

/// Returns whether `from -> to` is a legal transition.
pub fn is_allowed_transition(from: &str, to: &str) -> bool {
    ALLOWED_TRANSITIONS.contains(&(from, to))
}

/// Terminal statuses accept no further mutation.
pub fn is_terminal(status: &str) -> bool {
    matches!(
        status,
        STATUS_COMPLETED | STATUS_CANCELLED | STATUS_BLOCKED
    )
}

fn default_max_retries() -> i32 {
    3
}

/// The primary entity: one unit of user-originated work.
#[derive(
    Queryable, Selectable, Identifiable, AsChangeset, Debug, Clone, Serialize, Deserialize, ToSchema,
)]
#[diesel(table_name = crate::schema::work_orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[schema(example = json!({
    "id": "123e4567-e89b-12d3-a456-426614174000",
    "created_at": "2026-07-28T00:00:00Z",
    "updated_at": "2026-07-28T00:00:00Z",
    "intent": "answer_question",
    "difficulty": "trivial",
    "owner": "intern",
    "status": "queued",
    "compressed_context": "User wants a one-line echo of 'hello'.",
    "relevant_files": [],
    "qa_requirements": "Output must contain the word hello.",
    "retry_count": 0,
    "max_retries": 3,
    "escalation_chain": ["intern"],
    "cost_usd": 0.0,
    "prompt_tokens": 0,
    "completion_tokens": 0
}))]
pub struct WorkOrder {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub session_id: Option<Uuid>,
    pub idempotency_key: Option<String>,
    /// Short tag describing the user's goal, e.g. `build_feature`.
    pub intent: String,
    /// One of `trivial | normal | complex | unclear`.
    pub difficulty: String,
    /// Tier currently responsible: `intern | director | ceo | admin`.
    pub owner: String,
    /// One of the lifecycle states.
    pub status: String,
    /// ≤ ~1000-token summary produced by Admin.
    pub compressed_context: String,
    /// Ordered path hints the worker should consult.
    pub relevant_files: Vec<String>,
    /// Free-text success criteria injected into the model prompt.
    pub qa_requirements: String,
    /// Optional reference to a declarative QA spec.
    pub qa_spec_ref: Option<String>,
    /// Deterministic-script shortcut detected by Admin, if any.
    pub equipment_hint: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    /// Ordered list of tiers already attempted; append-only.
    pub escalation_chain: Vec<String>,
    pub last_error: Option<String>,
    pub result_output: Option<String>,
    /// Accumulated across attempts; never decreases.
    pub cost_usd: f64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
}

impl WorkOrder {
    /// Whether this work order is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        is_terminal(&self.status)
    }

    /// The tier currently at the head of the escalation chain, if any.
    pub fn current_tier(&self) -> Option<&str> {
        self.escalation_chain.last().map(String::as_str)
    }
}

/// Fields supplied by Admin when creating a new work order.
#[derive(Insertable, Debug, Clone, Serialize, Deserialize, ToSchema)]
#[diesel(table_name = crate::schema::work_orders)]
pub struct NewWorkOrder {
    pub session_id: Option<Uuid>,
    pub idempotency_key: Option<String>,
    pub intent: String,
    pub difficulty: String,
    pub owner: String,
    pub status: String,
    pub compressed_context: String,
    pub relevant_files: Vec<String>,
    pub qa_requirements: String,
    pub qa_spec_ref: Option<String>,
    pub equipment_hint: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
    pub escalation_chain: Vec<String>,
}

impl NewWorkOrder {
    /// Builds a `NewWorkOrder` from Admin's classification output, validating
    /// the fields the rest of the pipeline assumes are well-formed.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: Option<Uuid>,
        idempotency_key: Option<String>,
        intent: String,
        difficulty: String,
        owner: String,
        compressed_context: String,
        relevant_files: Vec<String>,
        qa_requirements: String,
        qa_spec_ref: Option<String>,
        equipment_hint: Option<String>,
        max_retries: Option<i32>,
    ) -> Result<Self, String> {
        if intent.trim().is_empty() {
            return Err("intent cannot be empty".to_string());
        }

        if !matches!(
            difficulty.as_str(),
            DIFFICULTY_TRIVIAL | DIFFICULTY_NORMAL | DIFFICULTY_COMPLEX | DIFFICULTY_UNCLEAR
        ) {
            return Err(format!("invalid difficulty: {difficulty}"));
        }

        if !matches!(
            owner.as_str(),
            TIER_INTERN | TIER_DIRECTOR | TIER_CEO | TIER_ADMIN
        ) {
            return Err(format!("invalid owner tier: {owner}"));
        }

        let max_retries = max_retries.unwrap_or_else(default_max_retries);
        if max_retries < 0 {
            return Err("max_retries must be non-negative".to_string());
        }

        let escalation_chain = if owner == TIER_ADMIN {
            Vec::new()
        } else {
            vec![owner.clone()]
        };

        Ok(NewWorkOrder {
            session_id,
            idempotency_key,
            intent,
            difficulty,
            owner,
            status: STATUS_QUEUED.to_string(),
            compressed_context,
            relevant_files,
            qa_requirements,
            qa_spec_ref,
            equipment_hint,
            max_retries,
            escalation_chain,
        })
    }
}
