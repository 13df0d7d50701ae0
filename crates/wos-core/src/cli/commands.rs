/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

use std::collections::HashMap;
use std::sync::Arc;

use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tokio::signal;
use uuid::Uuid;

use wos_models::models::work_orders::{NewWorkOrder, DIFFICULTY_UNCLEAR};
use wos_utils::config::Settings;
use wos_utils::logging::prelude::*;

use crate::admin::AdminClassifier;
use crate::api::{self, AppState};
use crate::dispatcher::{Dispatcher, DispatcherConfig};
use crate::equipment::EquipmentRegistry;
use crate::event_bus::EventBus;
use crate::model_client::{MockModelClient, ModelClient};
use crate::qa::QaPolicy;
use crate::queue::Queue;
use crate::rate_limit::RateLimiter;
use crate::store;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("../wos-models/migrations");

/// Starts the ingress API and the dispatcher worker pool.
///
/// Since no remote LLM provider SDK is wired up, every tier's `ModelClient`
/// is a [`MockModelClient`] — enough to drive the pipeline and the seed
/// scenarios end to end; a production deployment swaps these for
/// real provider clients without touching anything else wired here.
pub async fn serve(config: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    info!("starting work order scheduler");

    let store = store::open(
        &config.database.url,
        config.database.max_pool_size,
        &config.storage.fallback_path,
    )
    .await?;
    info!("store opened with backend {:?}", store.backend());

    if store.backend() == crate::store::Backend::Postgres {
        run_migrations(&config.database.url)?;
    }

    let queue = Queue::new();
    let event_bus = EventBus::new();
    let equipment = EquipmentRegistry::new();
    let admin = Arc::new(AdminClassifier::new(equipment.clone()));
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.requests, config.rate_limit.window_s as i64));

    let mut model_clients: HashMap<String, Arc<dyn ModelClient>> = HashMap::new();
    for tier in config.tier_model_table.keys() {
        model_clients.insert(
            tier.clone(),
            Arc::new(MockModelClient::new(format!("mock response from {tier}"))),
        );
    }

    let dispatcher_config = DispatcherConfig {
        workers: config.dispatcher.workers,
        max_in_flight: config.dispatcher.max_in_flight,
        backoff_base_s: config.dispatcher.backoff_base_s,
        backoff_cap_s: config.dispatcher.backoff_cap_s,
        block_timeout: std::time::Duration::from_millis(config.queue.block_ms),
        idle_claim_threshold: std::time::Duration::from_secs(config.queue.idle_claim_s as u64),
        qa_policy: QaPolicy {
            allow_command_checks: config.qa.allow_command_checks,
            sandbox_timeout_s: config.qa.sandbox_timeout_s,
            strict_mode: config.qa.strict_mode,
        },
    };

    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        queue,
        event_bus,
        config.escalation.ladder.clone(),
        equipment,
        model_clients,
        config.tier_model_table.clone(),
        dispatcher_config,
    ));

    info!("spawning dispatcher pool with {} workers", config.dispatcher.workers);
    let _worker_handles = Arc::clone(&dispatcher).spawn_pool();

    let state = AppState::new(
        store,
        dispatcher,
        admin,
        rate_limiter,
        Arc::new(config.clone()),
    );
    let app = api::configure_api_routes(state);

    let addr = &config.ingress.bind_addr;
    info!("binding ingress listener on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
        shutdown_tx.send(()).ok();
    });

    info!("scheduler is now running");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.await.ok();
        })
        .await?;

    Ok(())
}

fn run_migrations(database_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    use diesel::Connection;
    info!("running pending database migrations");
    let mut conn = diesel::PgConnection::establish(database_url)?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| format!("failed to run migrations: {e}"))?;
    info!("database migrations completed");
    Ok(())
}

/// Classifies and stores `message` directly against the configured backend,
/// without dispatching it — there is no running worker pool to hand it to
/// outside of `serve`. Prints the same `{id, difficulty, owner}` triple the
/// HTTP `createWorkOrder` endpoint returns.
pub async fn submit(config: &Settings, message: String, session_id: Option<Uuid>) -> Result<(), Box<dyn std::error::Error>> {
    let store = store::open(
        &config.database.url,
        config.database.max_pool_size,
        &config.storage.fallback_path,
    )
    .await?;

    let admin = AdminClassifier::new(EquipmentRegistry::new());
    let classification = admin.classify(&message, &[], None);

    let new_wo = NewWorkOrder::new(
        session_id,
        None,
        classification.intent,
        classification.difficulty.clone(),
        classification.owner,
        classification.compressed_context,
        classification.relevant_files,
        classification.qa_requirements,
        None,
        classification.equipment_hint,
        None,
    )
    .map_err(|e| format!("invalid classification: {e}"))?;

    let wo = store
        .create_work_order(new_wo, config.ingress.dedup_window_s)
        .await?;

    println!("Work order created:");
    println!("ID: {}", wo.id);
    println!("Difficulty: {}", wo.difficulty);
    println!("Owner: {}", wo.owner);
    if classification.difficulty == DIFFICULTY_UNCLEAR {
        if let Some(question) = classification.clarifying_question {
            println!("Clarifying question: {question}");
        }
        println!("(not dispatched: run `serve` and resume once clarified)");
    } else {
        println!("(not dispatched: run `serve` for a worker pool to pick this up)");
    }

    Ok(())
}

pub async fn status(config: &Settings, id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
    let store = store::open(
        &config.database.url,
        config.database.max_pool_size,
        &config.storage.fallback_path,
    )
    .await?;
    let wo = store.get_work_order(id).await?;
    println!("{}", serde_json::to_string_pretty(&wo)?);
    Ok(())
}

pub async fn list(
    config: &Settings,
    status: Option<String>,
    owner: Option<String>,
    limit: i64,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = store::open(
        &config.database.url,
        config.database.max_pool_size,
        &config.storage.fallback_path,
    )
    .await?;
    let results = store
        .query_work_orders(store::WorkOrderFilter {
            status,
            owner,
            limit: Some(limit),
        })
        .await?;
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

pub async fn cost(config: &Settings, window_s: i64) -> Result<(), Box<dyn std::error::Error>> {
    let store = store::open(
        &config.database.url,
        config.database.max_pool_size,
        &config.storage.fallback_path,
    )
    .await?;
    let since = chrono::Utc::now() - chrono::Duration::seconds(window_s.max(1));
    let summary = store.query_cost(since).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
