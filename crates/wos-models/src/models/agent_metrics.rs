/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Agent Metrics Module
//!
//! One row per model (or equipment-script) invocation. Write-once, queried by
//! time range for cost/latency reporting.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Queryable, Selectable, Identifiable, Debug, Clone, Serialize, Deserialize, ToSchema)]
#[diesel(table_name = crate::schema::agent_metrics)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AgentMetric {
    pub id: Uuid,
    pub work_order_id: Uuid,
    pub agent_name: String,
    /// Tier role at the time of the call: `intern | director | ceo | admin`.
    pub role: String,
    pub model: String,
    pub provider: String,
    pub success: bool,
    pub latency_ms: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub cost_usd: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone, Serialize, Deserialize, ToSchema)]
#[diesel(table_name = crate::schema::agent_metrics)]
pub struct NewAgentMetric {
    pub work_order_id: Uuid,
    pub agent_name: String,
    pub role: String,
    pub model: String,
    pub provider: String,
    pub success: bool,
    pub latency_ms: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub cost_usd: f64,
}

impl NewAgentMetric {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        work_order_id: Uuid,
        agent_name: String,
        role: String,
        model: String,
        provider: String,
        success: bool,
        latency_ms: i64,
        prompt_tokens: i64,
        completion_tokens: i64,
        cost_usd: f64,
    ) -> Result<Self, String> {
        if latency_ms < 0 {
            return Err("latency_ms must be non-negative".to_string());
        }
        if cost_usd < 0.0 {
            return Err("cost_usd must be non-negative".to_string());
        }
        Ok(NewAgentMetric {
            work_order_id,
            agent_name,
            role,
            model,
            provider,
            success,
            latency_ms,
            prompt_tokens,
            completion_tokens,
            cost_usd,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_agent_metric_rejects_negative_latency() {
        let result = NewAgentMetric::new(
            Uuid::new_v4(),
            "intern-1".to_string(),
            "intern".to_string(),
            "cheap-model".to_string(),
            "mock".to_string(),
            true,
            -1,
            10,
            20,
            0.01,
        );
        assert!(result.is_err());
    }
}
