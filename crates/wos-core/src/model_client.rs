/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # ModelClient
//!
//! No concrete LLM provider SDK is wired up here; `ModelClient` is the seam
//! the Dispatcher calls through. Production deployments supply
//! an implementation backed by whatever HTTP client the operator wants
//! (`reqwest` is already part of the dependency stack); tests use
//! [`ScriptedModelClient`].

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::{Result, SchedulerError};

/// One call to a tiered model.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub tier: String,
    pub model: String,
    pub provider: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub timeout_s: u64,
}

/// A successful model invocation's output plus the accounting fields that
/// feed `AgentMetric` and the work order's running totals.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub output: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub cost_usd: f64,
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse>;
}

/// Always succeeds, echoing a fixed response. Useful as the `admin` tier's
/// "local free model or heuristic" default and for smoke tests.
pub struct MockModelClient {
    pub fixed_output: String,
}

impl MockModelClient {
    pub fn new(fixed_output: impl Into<String>) -> Self {
        Self {
            fixed_output: fixed_output.into(),
        }
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse> {
        let prompt_tokens = (request.prompt.len() / 4) as i64;
        let completion_tokens = (self.fixed_output.len() / 4) as i64;
        Ok(ModelResponse {
            output: self.fixed_output.clone(),
            prompt_tokens,
            completion_tokens,
            cost_usd: 0.0,
        })
    }
}

/// A queued outcome for [`ScriptedModelClient`], one call in, one outcome
/// out, in the order enqueued.
pub enum ScriptedOutcome {
    Success(ModelResponse),
    Transient(String),
    Permanent(String),
}

/// Replays a pre-programmed sequence of outcomes regardless of the request,
/// one per call. Useful wherever a specific attempt sequence (fail, fail,
/// pass; or fail three times) needs to be driven deterministically.
/// Panics if called more times than scripted.
pub struct ScriptedModelClient {
    outcomes: Mutex<VecDeque<ScriptedOutcome>>,
}

impl ScriptedModelClient {
    pub fn new(outcomes: Vec<ScriptedOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
        }
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    async fn complete(&self, _request: &ModelRequest) -> Result<ModelResponse> {
        let outcome = self
            .outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .expect("ScriptedModelClient called more times than scripted");
        match outcome {
            ScriptedOutcome::Success(response) => Ok(response),
            ScriptedOutcome::Transient(reason) => Err(SchedulerError::ModelTransient(reason)),
            ScriptedOutcome::Permanent(reason) => Err(SchedulerError::ModelPermanent(reason)),
        }
    }
}
