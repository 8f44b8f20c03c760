//! Counter cascades: concurrent deltas, idempotent thresholds and task
//! completion rolling up into complaint status.

mod common;

use serde_json::Map;

use warranty_core::domain::{ComplaintStatus, CounterField, DocumentKey, COMPLAINT_STATUS_FIELD};
use warranty_core::flows::{ReconcileComplaintStatus, TaskCompletion};
use warranty_core::infra::{
    AggregateCounterCascade, CoreError, RetryConfig, SetFieldAction, ThresholdAction,
    ThresholdOutcome,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interleaved_deltas_sum_exactly() {
    let store = common::memory_store().await;
    let company = common::seed_company(&store, "555-0100").await;
    let cascade = AggregateCounterCascade::new(store.clone(), RetryConfig::fast());

    cascade
        .apply_delta(&company, CounterField::Products, 10)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..40 {
        let cascade = cascade.clone();
        let company = company.clone();
        let delta = if i % 4 == 0 { 1 } else { -1 };
        handles.push(tokio::spawn(async move {
            cascade
                .apply_delta(&company, CounterField::Products, delta)
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // 10 increments, 30 decrements.
    let doc = common::load(&store, &company).await;
    assert_eq!(doc.field_i64("products"), Some(10 + 10 - 30));
}

#[tokio::test]
async fn test_threshold_action_is_idempotent() {
    let store = common::memory_store().await;
    let tasks = common::tasks(&store);
    let complaint = tasks
        .open_complaint("company-1", "PUR-000001", "agent", Map::new())
        .await
        .unwrap()
        .key();
    let cascade = AggregateCounterCascade::new(store.clone(), RetryConfig::fast());
    let action = SetFieldAction::new(
        store.clone(),
        COMPLAINT_STATUS_FIELD,
        ComplaintStatus::Completed.to_json(),
    );

    for _ in 0..2 {
        let outcome = cascade
            .on_threshold_reached(&complaint, CounterField::TasksPending, 0, 0, &action)
            .await
            .unwrap();
        assert_eq!(outcome, ThresholdOutcome::Fired);
        let doc = common::load(&store, &complaint).await;
        assert_eq!(doc.field_str(COMPLAINT_STATUS_FIELD), Some("completed"));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_completions_complete_complaint() {
    let store = common::memory_store().await;
    let tasks = std::sync::Arc::new(common::tasks(&store));
    let complaint = tasks
        .open_complaint("company-1", "PUR-000001", "agent", Map::new())
        .await
        .unwrap()
        .key();

    let first = tasks
        .create_task(&complaint.id, common::task_draft("screen"))
        .await
        .unwrap();
    let second = tasks
        .create_task(&complaint.id, common::task_draft("battery"))
        .await
        .unwrap();
    assert_eq!(second.tasks_pending, 2);

    let a = {
        let tasks = tasks.clone();
        let id = first.key.id.clone();
        tokio::spawn(async move { tasks.complete_task(&id, "tech-a").await })
    };
    let b = {
        let tasks = tasks.clone();
        let id = second.key.id.clone();
        tokio::spawn(async move { tasks.complete_task(&id, "tech-b").await })
    };
    let outcomes = [a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];

    let fired = outcomes
        .iter()
        .filter(|o| {
            matches!(
                o,
                TaskCompletion::Completed {
                    status: ThresholdOutcome::Fired,
                    ..
                }
            )
        })
        .count();
    assert_eq!(fired, 1);

    let doc = common::load(&store, &complaint).await;
    assert_eq!(doc.field_i64("tasks_pending"), Some(0));
    assert_eq!(doc.field_i64("tasks_completed"), Some(2));
    assert_eq!(doc.field_str(COMPLAINT_STATUS_FIELD), Some("completed"));

    // Reconciling again changes nothing.
    assert_eq!(
        tasks.reconcile_complaint(&complaint.id).await.unwrap(),
        ComplaintStatus::Completed
    );
}

struct Unavailable;

#[async_trait::async_trait]
impl ThresholdAction for Unavailable {
    async fn fire(&self, _parent: &DocumentKey) -> warranty_core::Result<()> {
        Err(CoreError::Internal("status service unavailable".into()))
    }
}

#[tokio::test]
async fn test_failed_threshold_keeps_delta_and_is_redriven() {
    let store = common::memory_store().await;
    let tasks = common::tasks(&store);
    let complaint = tasks
        .open_complaint("company-1", "PUR-000001", "agent", Map::new())
        .await
        .unwrap()
        .key();
    tasks
        .create_task(&complaint.id, common::task_draft("screen"))
        .await
        .unwrap();

    let cascade = AggregateCounterCascade::new(store.clone(), RetryConfig::fast());
    cascade
        .apply_delta(&complaint, CounterField::TasksCompleted, 1)
        .await
        .unwrap();
    let err = cascade
        .apply_delta_with_threshold(&complaint, CounterField::TasksPending, -1, 0, &Unavailable)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ThresholdActionFailed { value: 0, .. }));

    let doc = common::load(&store, &complaint).await;
    assert_eq!(doc.field_i64("tasks_pending"), Some(0));
    assert_eq!(doc.field_str(COMPLAINT_STATUS_FIELD), Some("in_progress"));

    let reconcile = ReconcileComplaintStatus::new(store.clone());
    let outcome = cascade
        .redrive_threshold(&complaint, CounterField::TasksPending, 0, &reconcile)
        .await
        .unwrap();
    assert_eq!(outcome, ThresholdOutcome::Fired);

    let doc = common::load(&store, &complaint).await;
    assert_eq!(doc.field_i64("tasks_pending"), Some(0));
    assert_eq!(doc.field_str(COMPLAINT_STATUS_FIELD), Some("completed"));
}
