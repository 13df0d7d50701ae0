/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Error taxonomy
//!
//! `SchedulerError` is the single error type crossing every component
//! boundary in `wos-core`. The Dispatcher is the sole place that
//! interprets a `ModelTransient`/`ModelPermanent`/`QAFailure` into a retry,
//! escalate, or block decision; everything else just returns the error
//! upward.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Malformed input at ingress. Never creates a work order.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Primary storage backend down; only ever surfaced at startup.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Queue backend unavailable.
    #[error("queue unavailable: {0}")]
    QueueUnavailable(String),

    /// Timeout, 5xx, or rate-limited response from a `ModelClient`.
    #[error("transient model error: {0}")]
    ModelTransient(String),

    /// Bad request, auth failure, or context-length exceeded.
    #[error("permanent model error: {0}")]
    ModelPermanent(String),

    /// QA verdict negative.
    #[error("QA failure: {0}")]
    QAFailure(String),

    /// Daily cost cap exceeded.
    #[error("budget exceeded")]
    BudgetExceeded,

    /// Work order was cancelled out from under an in-flight attempt.
    #[error("cancelled")]
    Cancelled,

    /// A status transition not present in the allowed set.
    #[error("conflicting state: {0}")]
    ConflictingState(String),

    /// The referenced work order does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller exceeded their rate limit window.
    #[error("rate limited")]
    RateLimited,

    /// Declarative QA spec references a disabled capability.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl SchedulerError {
    /// Whether this error classifies as a transient ModelClient failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, SchedulerError::ModelTransient(_))
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, SchedulerError::ModelPermanent(_))
    }
}

impl IntoResponse for SchedulerError {
    fn into_response(self) -> Response {
        let status = match &self {
            SchedulerError::ValidationError(_) => StatusCode::BAD_REQUEST,
            SchedulerError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            SchedulerError::NotFound(_) => StatusCode::NOT_FOUND,
            SchedulerError::ConflictingState(_) => StatusCode::CONFLICT,
            SchedulerError::BudgetExceeded => StatusCode::TOO_MANY_REQUESTS,
            SchedulerError::StorageUnavailable(_) | SchedulerError::QueueUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            SchedulerError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SchedulerError::ModelTransient(_)
            | SchedulerError::ModelPermanent(_)
            | SchedulerError::QAFailure(_)
            | SchedulerError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
