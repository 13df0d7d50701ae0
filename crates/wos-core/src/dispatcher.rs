/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Dispatcher
//!
//! The worker pool. Each worker loops: consume → load work order → execute
//! tier → validate → write back → publish event → ack. This module is the
//! one place that turns a `SchedulerError` into a retry/escalate/block
//! decision; every other component just returns the error upward.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use rand::Rng;
use uuid::Uuid;

use wos_models::models::agent_metrics::NewAgentMetric;
use wos_models::models::audit_logs::{
    NewAuditLog, ACTION_BOARD_NOTIFY, ACTION_ESCALATED, ACTION_QA_FAILED, ACTION_QA_PASSED,
    ACTOR_DISPATCHER, STATUS_FAILURE, STATUS_INFO, STATUS_SUCCESS,
};
use wos_models::models::work_orders::{
    WorkOrder, STATUS_BLOCKED, STATUS_CANCELLED, STATUS_COMPLETED, STATUS_ESCALATED,
    STATUS_FAILED, STATUS_IN_PROGRESS, STATUS_QUEUED,
};
use wos_utils::config::TierModel;
use wos_utils::logging::prelude::*;

use crate::equipment::EquipmentRegistry;
use crate::error::{Result, SchedulerError};
use crate::escalation::{EscalationAction, EscalationController};
use crate::event_bus::{EventBus, ProgressEvent};
use crate::metrics;
use crate::model_client::{ModelClient, ModelRequest, ModelResponse};
use crate::qa::{QaPolicy, QaValidator};
use crate::queue::{Queue, QueueMessage};
use crate::store::WorkOrderStore;

/// The consumer group every dispatcher worker shares.
pub const DISPATCHER_GROUP: &str = "dispatcher";

/// Tunables a running dispatcher needs from configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub workers: usize,
    pub max_in_flight: usize,
    pub backoff_base_s: u64,
    pub backoff_cap_s: u64,
    pub block_timeout: StdDuration,
    pub idle_claim_threshold: StdDuration,
    pub qa_policy: QaPolicy,
}

/// Everything a worker needs to run one attempt end to end. Cloning is
/// cheap: every field is already `Arc`/`Clone`-backed, matching the
/// teacher's `AppState`-style shared-handle convention.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn WorkOrderStore>,
    queue: Queue,
    event_bus: EventBus,
    escalation: Arc<EscalationController>,
    qa: Arc<QaValidator>,
    equipment: EquipmentRegistry,
    model_clients: Arc<HashMap<String, Arc<dyn ModelClient>>>,
    tier_table: Arc<HashMap<String, TierModel>>,
    config: Arc<DispatcherConfig>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn WorkOrderStore>,
        queue: Queue,
        event_bus: EventBus,
        escalation_ladder: Vec<String>,
        equipment: EquipmentRegistry,
        model_clients: HashMap<String, Arc<dyn ModelClient>>,
        tier_table: HashMap<String, TierModel>,
        config: DispatcherConfig,
    ) -> Self {
        let qa_policy = config.qa_policy.clone();
        queue.ensure_group(DISPATCHER_GROUP);
        Self {
            store,
            queue,
            event_bus,
            escalation: Arc::new(EscalationController::new(escalation_ladder)),
            qa: Arc::new(QaValidator::new(qa_policy)),
            equipment,
            model_clients: Arc::new(model_clients),
            tier_table: Arc::new(tier_table),
            config: Arc::new(config),
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Enqueues an already-created work order for dispatch. Called by
    /// ingress right after `WorkOrderStore::create_work_order`.
    pub fn enqueue(&self, work_order_id: Uuid) -> Uuid {
        self.queue
            .enqueue(work_order_id, serde_json::json!({ "work_order_id": work_order_id }))
    }

    /// Spawns `self.config.workers` long-running consumer tasks plus one
    /// periodic stale-claim sweeper.
    pub fn spawn_pool(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.config.workers + 1);
        for i in 0..self.config.workers {
            let dispatcher = Arc::clone(&self);
            let consumer_name = format!("worker-{i}");
            handles.push(tokio::spawn(async move {
                dispatcher.run_worker(&consumer_name).await;
            }));
        }

        let sweeper = Arc::clone(&self);
        handles.push(tokio::spawn(async move {
            sweeper.run_stale_claim_sweeper().await;
        }));

        handles
    }

    /// One worker's main loop. Runs until the process is torn down; errors
    /// handling an individual message are logged and do not kill the worker
    /// (a crashed handler is exactly what `claim_stale` recovers from).
    pub async fn run_worker(&self, consumer_name: &str) {
        loop {
            let messages = match self
                .queue
                .consume(
                    DISPATCHER_GROUP,
                    consumer_name,
                    self.config.max_in_flight,
                    self.config.block_timeout,
                )
                .await
            {
                Ok(messages) => messages,
                Err(e) => {
                    error!("dispatcher {consumer_name} failed to consume: {e}");
                    tokio::time::sleep(StdDuration::from_millis(250)).await;
                    continue;
                }
            };

            for message in messages {
                if let Err(e) = self.handle_message(message).await {
                    error!("dispatcher {consumer_name} failed to handle message: {e}");
                }
            }
        }
    }

    async fn run_stale_claim_sweeper(&self) {
        let mut interval = tokio::time::interval(self.config.idle_claim_threshold / 2);
        loop {
            interval.tick().await;
            match self.queue.claim_stale(
                DISPATCHER_GROUP,
                self.config.idle_claim_threshold,
                "stale-claim-sweeper",
            ) {
                Ok(reclaimed) => {
                    for message in reclaimed {
                        if let Err(e) = self.handle_message(message).await {
                            error!("failed to reprocess reclaimed message: {e}");
                        }
                    }
                }
                Err(e) => warn!("stale-claim sweep failed: {e}"),
            }
        }
    }

    /// Executes the dispatch algorithm for one queue entry.
    pub async fn handle_message(&self, message: QueueMessage) -> Result<()> {
        let wo = self.store.get_work_order(message.work_order_id).await?;

        if !matches!(
            wo.status.as_str(),
            STATUS_QUEUED | STATUS_FAILED | STATUS_ESCALATED
        ) {
            // Duplicate delivery of an attempt already resolved elsewhere.
            self.queue.ack(DISPATCHER_GROUP, message.entry_id);
            return Ok(());
        }

        let wo = self
            .store
            .transition_status(wo.id, &wo.status, STATUS_IN_PROGRESS, "dispatch")
            .await?;
        self.publish(&wo, "in_progress", None);

        let tier = wo.owner.clone();
        let tier_model = self.tier_table.get(&tier).cloned().ok_or_else(|| {
            SchedulerError::Configuration(format!("no tier_model_table entry for tier {tier}"))
        })?;

        let started = Instant::now();
        let outcome = if let Some(equipment_name) = wo.equipment_hint.clone() {
            self.equipment
                .run(&equipment_name, &wo.compressed_context)
                .await
        } else {
            self.call_model(&wo, &tier, &tier_model).await
        };
        let latency_ms = started.elapsed().as_millis() as i64;

        // Cancellation checkpoint: the call has returned, so this is the
        // first safe point to check whether the work order was cancelled
        // out from under us.
        let current = self.store.get_work_order(wo.id).await?;
        if current.status == STATUS_CANCELLED {
            self.queue.ack(DISPATCHER_GROUP, message.entry_id);
            self.publish(&current, STATUS_CANCELLED, Some("discarded post-cancel output"));
            return Ok(());
        }

        match outcome {
            Ok(response) => {
                self.handle_model_success(&current, &tier, &tier_model, response, latency_ms, &message)
                    .await
            }
            Err(e) if e.is_transient() => {
                self.handle_failed_attempt(
                    &current,
                    &tier,
                    &tier_model,
                    latency_ms,
                    &e.to_string(),
                    true,
                    false,
                    &message,
                )
                .await
            }
            Err(e) if e.is_permanent() => {
                self.handle_failed_attempt(
                    &current,
                    &tier,
                    &tier_model,
                    latency_ms,
                    &e.to_string(),
                    false,
                    true,
                    &message,
                )
                .await
            }
            Err(e) => Err(e),
        }
    }

    async fn call_model(
        &self,
        wo: &WorkOrder,
        tier: &str,
        tier_model: &TierModel,
    ) -> Result<ModelResponse> {
        let client = self.model_clients.get(tier).ok_or_else(|| {
            SchedulerError::Configuration(format!("no ModelClient registered for tier {tier}"))
        })?;
        let prompt = assemble_prompt(wo);
        let request = ModelRequest {
            tier: tier.to_string(),
            model: tier_model.model.clone(),
            provider: tier_model.provider.clone(),
            prompt,
            max_tokens: tier_model.max_tokens,
            timeout_s: tier_model.timeout_s,
        };
        tokio::time::timeout(StdDuration::from_secs(tier_model.timeout_s), client.complete(&request))
            .await
            .map_err(|_| SchedulerError::ModelTransient("timed out".to_string()))?
    }

    async fn handle_model_success(
        &self,
        wo: &WorkOrder,
        tier: &str,
        tier_model: &TierModel,
        response: ModelResponse,
        latency_ms: i64,
        message: &QueueMessage,
    ) -> Result<()> {
        let spec = match &wo.qa_spec_ref {
            Some(name) => self.store.get_qa_spec(name).await?,
            None => None,
        };
        let verdict = self.qa.validate(&response.output, spec.as_ref()).await;

        if verdict.passed {
            let metric = NewAgentMetric::new(
                wo.id,
                format!("{tier}-agent"),
                tier.to_string(),
                tier_model.model.clone(),
                tier_model.provider.clone(),
                true,
                latency_ms,
                response.prompt_tokens,
                response.completion_tokens,
                response.cost_usd,
            )
            .map_err(SchedulerError::ValidationError)?;
            self.store.record_attempt(wo.id, metric, false).await?;
            self.store.record_result(wo.id, response.output).await?;
            let wo = self
                .store
                .transition_status(wo.id, STATUS_IN_PROGRESS, STATUS_COMPLETED, "qa passed")
                .await?;
            self.audit(&wo, ACTION_QA_PASSED, STATUS_SUCCESS).await;
            self.queue.ack(DISPATCHER_GROUP, message.entry_id);
            self.publish(&wo, STATUS_COMPLETED, None);
            return Ok(());
        }

        let metric = NewAgentMetric::new(
            wo.id,
            format!("{tier}-agent"),
            tier.to_string(),
            tier_model.model.clone(),
            tier_model.provider.clone(),
            true,
            latency_ms,
            response.prompt_tokens,
            response.completion_tokens,
            response.cost_usd,
        )
        .map_err(SchedulerError::ValidationError)?;
        self.audit(wo, ACTION_QA_FAILED, STATUS_FAILURE).await;

        self.resolve_failure(
            wo,
            metric,
            verdict.retry_recommended,
            verdict.security_failed,
            &verdict.failed_reasons.join("; "),
            message,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_failed_attempt(
        &self,
        wo: &WorkOrder,
        tier: &str,
        tier_model: &TierModel,
        latency_ms: i64,
        reason: &str,
        transient: bool,
        permanent: bool,
        message: &QueueMessage,
    ) -> Result<()> {
        let metric = NewAgentMetric::new(
            wo.id,
            format!("{tier}-agent"),
            tier.to_string(),
            tier_model.model.clone(),
            tier_model.provider.clone(),
            false,
            latency_ms,
            0,
            0,
            0.0,
        )
        .map_err(SchedulerError::ValidationError)?;

        self.resolve_failure(wo, metric, transient, permanent, reason, message)
            .await
    }

    /// Shared tail for every non-passing attempt (model error or QA
    /// failure): record the attempt, consult the escalation controller, and
    /// apply whichever action it returns.
    async fn resolve_failure(
        &self,
        wo: &WorkOrder,
        metric: NewAgentMetric,
        transient: bool,
        permanent: bool,
        reason: &str,
        message: &QueueMessage,
    ) -> Result<()> {
        // Permanent failures never consume retry budget; anything else bumps `retry_count` so the
        // escalation controller sees the post-attempt state.
        let wo = self.store.record_attempt(wo.id, metric, !permanent).await?;
        let action = self.escalation.next_action(&wo, transient, permanent);

        match action {
            EscalationAction::RetrySameTier => {
                let wo = self
                    .store
                    .transition_status(wo.id, STATUS_IN_PROGRESS, STATUS_FAILED, reason)
                    .await?;
                let delay = backoff_delay(
                    self.config.backoff_base_s,
                    self.config.backoff_cap_s,
                    wo.retry_count,
                );
                self.queue
                    .requeue_with_delay(DISPATCHER_GROUP, message.entry_id, delay)?;
                self.queue.ack(DISPATCHER_GROUP, message.entry_id);
                self.publish(&wo, STATUS_FAILED, Some(reason));
            }
            EscalationAction::EscalateNextTier { next_tier } => {
                let wo = self.store.escalate(wo.id, &next_tier, reason).await?;
                self.audit(&wo, ACTION_ESCALATED, STATUS_INFO).await;
                self.queue.ack(DISPATCHER_GROUP, message.entry_id);
                self.enqueue(wo.id);
                self.publish(&wo, STATUS_ESCALATED, Some(reason));
            }
            EscalationAction::NotifyBoard => {
                let wo = self
                    .store
                    .transition_status(wo.id, STATUS_IN_PROGRESS, STATUS_BLOCKED, reason)
                    .await?;
                self.audit(&wo, ACTION_BOARD_NOTIFY, STATUS_INFO).await;
                self.queue.ack(DISPATCHER_GROUP, message.entry_id);
                self.publish(&wo, STATUS_BLOCKED, Some(&format!("board_notify: {reason}")));
            }
            EscalationAction::Block => {
                let wo = self
                    .store
                    .transition_status(wo.id, STATUS_IN_PROGRESS, STATUS_BLOCKED, reason)
                    .await?;
                self.queue.ack(DISPATCHER_GROUP, message.entry_id);
                self.publish(&wo, STATUS_BLOCKED, Some(reason));
            }
        }
        Ok(())
    }

    async fn audit(&self, wo: &WorkOrder, action: &str, status: &str) {
        if let Ok(entry) = NewAuditLog::new(Some(wo.id), wo.session_id, ACTOR_DISPATCHER, action, status) {
            if let Err(e) = self.store.append_audit(entry).await {
                warn!("failed to append audit log for {}: {}", wo.id, e);
            }
        }
    }

    fn publish(&self, wo: &WorkOrder, status: &str, detail: Option<&str>) {
        metrics::record_status_transition(&wo.owner, status);
        let mut event = ProgressEvent::new(wo.id, status, &wo.owner, wo.retry_count);
        if let Some(detail) = detail {
            event = event.with_detail(detail.to_string());
        }
        self.event_bus.publish(event);
    }
}

/// Assembles the prompt: compressed context, relevant file
/// hints, and QA requirements. Conversation history lives with the ingress
/// adapter, not the durable work order, so it is not replayed here.
fn assemble_prompt(wo: &WorkOrder) -> String {
    let mut prompt = wo.compressed_context.clone();
    if !wo.relevant_files.is_empty() {
        prompt.push_str(&format!("\n\nRelevant files: {}", wo.relevant_files.join(", ")));
    }
    if !wo.qa_requirements.is_empty() {
        prompt.push_str(&format!("\n\nAcceptance criteria: {}", wo.qa_requirements));
    }
    prompt
}

/// `base · 2^retry_count ± jitter`, capped.
fn backoff_delay(base_s: u64, cap_s: u64, retry_count: i32) -> StdDuration {
    let exponent = retry_count.max(0).min(20) as u32;
    let unjittered = base_s.saturating_mul(1u64 << exponent).min(cap_s);
    let jitter_ms = rand::thread_rng().gen_range(0..=250);
    StdDuration::from_secs(unjittered) + StdDuration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_client::{ScriptedModelClient, ScriptedOutcome};
    use crate::store::sqlite::SqliteStore;
    use wos_models::models::qa_specs::{FormatSpec, QaSpecDefinition};
    use wos_models::models::work_orders::{NewWorkOrder, DIFFICULTY_TRIVIAL, TIER_INTERN};

    fn tier_table() -> HashMap<String, TierModel> {
        let mut map = HashMap::new();
        for tier in ["intern", "director", "ceo", "admin"] {
            map.insert(
                tier.to_string(),
                TierModel {
                    model: format!("{tier}-model"),
                    provider: "mock".to_string(),
                    input_price_per_mtok: 0.0,
                    output_price_per_mtok: 0.0,
                    timeout_s: 5,
                    max_tokens: 1024,
                },
            );
        }
        map
    }

    fn config() -> DispatcherConfig {
        DispatcherConfig {
            workers: 1,
            max_in_flight: 10,
            backoff_base_s: 0,
            backoff_cap_s: 1,
            block_timeout: StdDuration::from_millis(20),
            idle_claim_threshold: StdDuration::from_secs(300),
            qa_policy: QaPolicy {
                allow_command_checks: false,
                sandbox_timeout_s: 10,
                strict_mode: false,
            },
        }
    }

    async fn store() -> (Arc<dyn WorkOrderStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wos-test.sqlite3");
        let store: Arc<dyn WorkOrderStore> =
            Arc::new(SqliteStore::open(path.to_str().unwrap()).await.unwrap());
        (store, dir)
    }

    #[tokio::test]
    async fn s1_trivial_pass_on_first_attempt() {
        let (store, _dir) = store().await;
        let queue = Queue::new();
        let mut clients: HashMap<String, Arc<dyn ModelClient>> = HashMap::new();
        clients.insert(
            TIER_INTERN.to_string(),
            Arc::new(ScriptedModelClient::new(vec![ScriptedOutcome::Success(
                ModelResponse {
                    output: "hello".to_string(),
                    prompt_tokens: 5,
                    completion_tokens: 2,
                    cost_usd: 0.001,
                },
            )])),
        );

        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            queue.clone(),
            EventBus::new(),
            vec!["intern".into(), "director".into(), "ceo".into()],
            EquipmentRegistry::new(),
            clients,
            tier_table(),
            config(),
        );

        let new_wo = NewWorkOrder::new(
            None,
            None,
            "answer_question".to_string(),
            DIFFICULTY_TRIVIAL.to_string(),
            TIER_INTERN.to_string(),
            "echo hello".to_string(),
            vec![],
            "must say hello".to_string(),
            None,
            None,
            None,
        )
        .unwrap();
        let wo = store.create_work_order(new_wo, 300).await.unwrap();
        dispatcher.enqueue(wo.id);

        let msg = queue
            .consume(DISPATCHER_GROUP, "test-worker", 1, StdDuration::from_millis(100))
            .await
            .unwrap();
        dispatcher.handle_message(msg.into_iter().next().unwrap()).await.unwrap();

        let final_wo = store.get_work_order(wo.id).await.unwrap();
        assert_eq!(final_wo.status, STATUS_COMPLETED);
        assert_eq!(final_wo.retry_count, 0);
        assert_eq!(final_wo.escalation_chain, vec![TIER_INTERN.to_string()]);
        assert_eq!(final_wo.result_output, Some("hello".to_string()));
    }

    #[tokio::test]
    async fn s2_qa_retry_then_pass() {
        let (store, _dir) = store().await;
        let queue = Queue::new();
        let mut clients: HashMap<String, Arc<dyn ModelClient>> = HashMap::new();
        clients.insert(
            "director".to_string(),
            Arc::new(ScriptedModelClient::new(vec![
                ScriptedOutcome::Success(ModelResponse {
                    output: "Here is: {name: alice}".to_string(),
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    cost_usd: 0.002,
                }),
                ScriptedOutcome::Success(ModelResponse {
                    output: r#"{"name":"alice","age":30}"#.to_string(),
                    prompt_tokens: 10,
                    completion_tokens: 6,
                    cost_usd: 0.002,
                }),
            ])),
        );

        let mut cfg = config();
        cfg.backoff_base_s = 0;
        cfg.backoff_cap_s = 0;

        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            queue.clone(),
            EventBus::new(),
            vec!["intern".into(), "director".into(), "ceo".into()],
            EquipmentRegistry::new(),
            clients,
            tier_table(),
            cfg,
        );

        store
            .put_qa_spec(
                "json-name-age",
                &QaSpecDefinition {
                    format: Some(FormatSpec {
                        format_type: "json".to_string(),
                        required_keys: Some(vec!["name".to_string(), "age".to_string()]),
                        pattern: None,
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let new_wo = NewWorkOrder::new(
            None,
            None,
            "produce_json".to_string(),
            "normal".to_string(),
            "director".to_string(),
            "produce JSON {name, age}".to_string(),
            vec![],
            "must be valid JSON with name and age".to_string(),
            Some("json-name-age".to_string()),
            None,
            None,
        )
        .unwrap();
        let wo = store.create_work_order(new_wo, 300).await.unwrap();
        dispatcher.enqueue(wo.id);

        let first = queue
            .consume(DISPATCHER_GROUP, "w", 1, StdDuration::from_millis(100))
            .await
            .unwrap();
        dispatcher.handle_message(first.into_iter().next().unwrap()).await.unwrap();

        let mid = store.get_work_order(wo.id).await.unwrap();
        assert_eq!(mid.status, STATUS_FAILED);
        assert_eq!(mid.retry_count, 1);

        tokio::time::sleep(StdDuration::from_millis(30)).await;
        let second = queue
            .consume(DISPATCHER_GROUP, "w", 1, StdDuration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        dispatcher.handle_message(second.into_iter().next().unwrap()).await.unwrap();

        let final_wo = store.get_work_order(wo.id).await.unwrap();
        assert_eq!(final_wo.status, STATUS_COMPLETED);
        assert_eq!(final_wo.retry_count, 1);
        assert_eq!(final_wo.escalation_chain, vec!["director".to_string()]);
    }

    #[tokio::test]
    async fn s4_security_violation_is_terminal() {
        let (store, _dir) = store().await;
        let queue = Queue::new();
        let mut clients: HashMap<String, Arc<dyn ModelClient>> = HashMap::new();
        clients.insert(
            "ceo".to_string(),
            Arc::new(ScriptedModelClient::new(vec![ScriptedOutcome::Success(
                ModelResponse {
                    output: "your key is sk-abcdefghijklmnopqrstuvwxyz".to_string(),
                    prompt_tokens: 10,
                    completion_tokens: 8,
                    cost_usd: 0.01,
                },
            )])),
        );

        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            queue.clone(),
            EventBus::new(),
            vec!["intern".into(), "director".into(), "ceo".into()],
            EquipmentRegistry::new(),
            clients,
            tier_table(),
            config(),
        );

        store
            .put_qa_spec(
                "no-secrets",
                &QaSpecDefinition {
                    security: Some(wos_models::models::qa_specs::SecuritySpec {
                        check_placeholders: false,
                        forbidden_patterns: vec!["sk-[A-Za-z0-9]{20,}".to_string()],
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let new_wo = NewWorkOrder::new(
            None,
            None,
            "build_feature".to_string(),
            "complex".to_string(),
            "ceo".to_string(),
            "wire up the api key".to_string(),
            vec![],
            "no secrets in output".to_string(),
            Some("no-secrets".to_string()),
            None,
            None,
        )
        .unwrap();
        let wo = store.create_work_order(new_wo, 300).await.unwrap();
        dispatcher.enqueue(wo.id);

        let msg = queue
            .consume(DISPATCHER_GROUP, "w", 1, StdDuration::from_millis(100))
            .await
            .unwrap();
        dispatcher.handle_message(msg.into_iter().next().unwrap()).await.unwrap();

        let final_wo = store.get_work_order(wo.id).await.unwrap();
        assert_eq!(final_wo.status, STATUS_BLOCKED);
        assert_eq!(final_wo.retry_count, 0);
    }
}
