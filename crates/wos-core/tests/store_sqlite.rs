use serial_test::serial;
use tempfile::TempDir;

use wos_core::error::SchedulerError;
use wos_core::store::sqlite::SqliteStore;
use wos_core::store::{ReclassifyFields, WorkOrderFilter, WorkOrderStore};
use wos_models::models::agent_metrics::NewAgentMetric;
use wos_models::models::work_orders::{
    NewWorkOrder, DIFFICULTY_NORMAL, DIFFICULTY_TRIVIAL, STATUS_COMPLETED, STATUS_FAILED,
    STATUS_IN_PROGRESS, STATUS_QUEUED, TIER_DIRECTOR, TIER_INTERN,
};

/// Returns the store alongside the `TempDir` it lives in — the directory
/// must outlive every call the test makes against the store.
async fn fresh_store() -> (SqliteStore, TempDir) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("wos-test.sqlite3");
    let store = SqliteStore::open(path.to_str().unwrap())
        .await
        .expect("open sqlite store");
    (store, dir)
}

fn trivial_work_order() -> NewWorkOrder {
    NewWorkOrder::new(
        None,
        None,
        "answer_question".to_string(),
        DIFFICULTY_TRIVIAL.to_string(),
        TIER_INTERN.to_string(),
        "echo hello".to_string(),
        vec![],
        "output must contain hello".to_string(),
        None,
        None,
        None,
    )
    .expect("valid work order")
}

#[tokio::test]
#[serial]
async fn create_and_get_round_trips() {
    let (store, _dir) = fresh_store().await;
    let created = store.create_work_order(trivial_work_order(), 300).await.unwrap();
    assert_eq!(created.status, STATUS_QUEUED);

    let fetched = store.get_work_order(created.id).await.unwrap();
    assert_eq!(fetched.id, created.id);
    assert_eq!(fetched.owner, TIER_INTERN);
}

#[tokio::test]
#[serial]
async fn get_missing_work_order_returns_not_found() {
    let (store, _dir) = fresh_store().await;
    let err = store.get_work_order(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound(_)));
}

#[tokio::test]
#[serial]
async fn idempotency_key_dedups_within_window() {
    let (store, _dir) = fresh_store().await;
    let session_id = uuid::Uuid::new_v4();

    let mut first = trivial_work_order();
    first.session_id = Some(session_id);
    first.idempotency_key = Some("abc123".to_string());
    let created = store.create_work_order(first, 300).await.unwrap();

    let mut second = trivial_work_order();
    second.session_id = Some(session_id);
    second.idempotency_key = Some("abc123".to_string());
    let replayed = store.create_work_order(second, 300).await.unwrap();

    assert_eq!(created.id, replayed.id);

    let all = store
        .query_work_orders(WorkOrderFilter::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
#[serial]
async fn transition_status_rejects_illegal_pair() {
    let (store, _dir) = fresh_store().await;
    let wo = store.create_work_order(trivial_work_order(), 300).await.unwrap();

    let err = store
        .transition_status(wo.id, STATUS_QUEUED, STATUS_COMPLETED, "skip ahead")
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::ConflictingState(_)));
}

#[tokio::test]
#[serial]
async fn transition_status_is_compare_and_set() {
    let (store, _dir) = fresh_store().await;
    let wo = store.create_work_order(trivial_work_order(), 300).await.unwrap();

    let advanced = store
        .transition_status(wo.id, STATUS_QUEUED, STATUS_IN_PROGRESS, "dispatched")
        .await
        .unwrap();
    assert_eq!(advanced.status, STATUS_IN_PROGRESS);

    // stale `from` no longer matches the row's actual status.
    let err = store
        .transition_status(wo.id, STATUS_QUEUED, STATUS_IN_PROGRESS, "stale retry")
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::ConflictingState(_)));
}

#[tokio::test]
#[serial]
async fn record_attempt_accumulates_tokens_and_retry_count() {
    let (store, _dir) = fresh_store().await;
    let wo = store.create_work_order(trivial_work_order(), 300).await.unwrap();

    let metric = NewAgentMetric::new(
        wo.id,
        TIER_INTERN.to_string(),
        TIER_INTERN.to_string(),
        "mock-model".to_string(),
        "mock".to_string(),
        false,
        120,
        50,
        20,
        0.002,
    )
    .unwrap();

    let updated = store.record_attempt(wo.id, metric, true).await.unwrap();
    assert_eq!(updated.retry_count, 1);
    assert_eq!(updated.prompt_tokens, 50);
    assert_eq!(updated.completion_tokens, 20);
    assert!((updated.cost_usd - 0.002).abs() < 1e-9);
}

#[tokio::test]
#[serial]
async fn escalate_appends_to_chain_and_resets_retries() {
    let (store, _dir) = fresh_store().await;
    let wo = store.create_work_order(trivial_work_order(), 300).await.unwrap();

    let metric = NewAgentMetric::new(
        wo.id,
        TIER_INTERN.to_string(),
        TIER_INTERN.to_string(),
        "mock-model".to_string(),
        "mock".to_string(),
        false,
        100,
        10,
        10,
        0.001,
    )
    .unwrap();
    store.record_attempt(wo.id, metric, true).await.unwrap();
    store
        .transition_status(wo.id, STATUS_QUEUED, STATUS_IN_PROGRESS, "dispatched")
        .await
        .unwrap();
    store
        .transition_status(wo.id, STATUS_IN_PROGRESS, STATUS_FAILED, "model error")
        .await
        .unwrap();

    let escalated = store.escalate(wo.id, TIER_DIRECTOR, "exhausted retries").await.unwrap();
    assert_eq!(escalated.owner, TIER_DIRECTOR);
    assert_eq!(escalated.retry_count, 0);
    assert_eq!(escalated.escalation_chain, vec![TIER_INTERN, TIER_DIRECTOR]);
}

#[tokio::test]
#[serial]
async fn reclassify_rewrites_fields_without_touching_status() {
    let (store, _dir) = fresh_store().await;
    let wo = store.create_work_order(trivial_work_order(), 300).await.unwrap();
    assert_eq!(wo.status, STATUS_QUEUED);

    let reclassified = store
        .reclassify(
            wo.id,
            &ReclassifyFields {
                intent: "build_feature".to_string(),
                difficulty: DIFFICULTY_NORMAL.to_string(),
                owner: TIER_DIRECTOR.to_string(),
                compressed_context: "clarified: add a retry button".to_string(),
                relevant_files: vec!["src/ui.rs".to_string()],
                qa_requirements: "button must call retry()".to_string(),
                equipment_hint: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(reclassified.status, STATUS_QUEUED);
    assert_eq!(reclassified.difficulty, DIFFICULTY_NORMAL);
    assert_eq!(reclassified.owner, TIER_DIRECTOR);
    assert_eq!(reclassified.escalation_chain, vec![TIER_DIRECTOR]);
}

#[tokio::test]
#[serial]
async fn cancel_only_succeeds_from_queued_or_in_progress() {
    let (store, _dir) = fresh_store().await;
    let wo = store.create_work_order(trivial_work_order(), 300).await.unwrap();

    store
        .transition_status(wo.id, STATUS_QUEUED, STATUS_IN_PROGRESS, "dispatched")
        .await
        .unwrap();
    store
        .transition_status(wo.id, STATUS_IN_PROGRESS, STATUS_COMPLETED, "done")
        .await
        .unwrap();

    let err = store.cancel(wo.id, "too late").await.unwrap_err();
    assert!(matches!(err, SchedulerError::ConflictingState(_)));
}

#[tokio::test]
#[serial]
async fn today_cost_usd_sums_recent_metrics() {
    let (store, _dir) = fresh_store().await;
    let wo = store.create_work_order(trivial_work_order(), 300).await.unwrap();

    for cost in [0.01, 0.02, 0.03] {
        let metric = NewAgentMetric::new(
            wo.id,
            TIER_INTERN.to_string(),
            TIER_INTERN.to_string(),
            "mock-model".to_string(),
            "mock".to_string(),
            true,
            50,
            10,
            10,
            cost,
        )
        .unwrap();
        store.record_attempt(wo.id, metric, false).await.unwrap();
    }

    let total = store.today_cost_usd().await.unwrap();
    assert!((total - 0.06).abs() < 1e-9);
}

#[tokio::test]
#[serial]
async fn sessions_are_reused_for_the_same_channel_and_user() {
    let (store, _dir) = fresh_store().await;
    let first = store.get_or_create_session("slack", "U123").await.unwrap();
    let second = store.get_or_create_session("slack", "U123").await.unwrap();
    assert_eq!(first.id, second.id);
    assert!(second.last_active_at >= first.last_active_at);

    let other = store.get_or_create_session("slack", "U456").await.unwrap();
    assert_ne!(other.id, first.id);
}
