//! Property-based tests using proptest.
//!
//! Counter arithmetic, id formatting and workflow atomicity for arbitrary
//! inputs.

mod common;

use std::future::Future;

use proptest::prelude::*;
use serde_json::{json, Value};

use warranty_core::domain::{ComplaintStatus, CounterField, EntityKind};
use warranty_core::flows::steps::{IncrementCounterStep, InsertEntityStep};
use warranty_core::flows::FlowState;
use warranty_core::infra::{
    AggregateCounterCascade, CoreError, DocumentStore, RetryConfig, SequenceAllocator,
    StepOutcome, TransactionalWorkflow, WorkflowUnit,
};
use warranty_core::{Collection, Document, DocumentFilter};

use common::Store;

fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

// ============================================================================
// Custom Strategies
// ============================================================================

fn arb_kind() -> impl Strategy<Value = EntityKind> {
    prop_oneof![
        Just(EntityKind::Address),
        Just(EntityKind::Model),
        Just(EntityKind::Purchase),
        Just(EntityKind::ServiceCenter),
        Just(EntityKind::Store),
        Just(EntityKind::Task),
    ]
}

fn arb_deltas() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(-5i64..=5, 1..30)
}

fn arb_body() -> impl Strategy<Value = Value> {
    (0..3u8, 0..2i64).prop_map(|(phone, status)| {
        json!({ "phone": format!("555-01{phone:02}"), "status": status })
    })
}

// ============================================================================
// Pure Properties
// ============================================================================

proptest! {
    /// Property: ids sort in allocation order
    #[test]
    fn formatted_ids_sort_like_values(kind in arb_kind(), a in 1u64..999_999, b in 1u64..999_999) {
        let (ia, ib) = (kind.format_id(a), kind.format_id(b));
        prop_assert_eq!(a.cmp(&b), ia.cmp(&ib));
        prop_assert!(ia.starts_with(kind.id_prefix()));
    }

    /// Property: pending work always means in progress
    #[test]
    fn pending_tasks_keep_complaint_in_progress(pending in 1i64..1000, completed in 0i64..1000) {
        prop_assert_eq!(ComplaintStatus::derive(pending, completed), ComplaintStatus::InProgress);
    }

    /// Property: a complaint is completed only when nothing is pending
    #[test]
    fn completed_requires_no_pending(pending in 0i64..5, completed in 0i64..5) {
        let status = ComplaintStatus::derive(pending, completed);
        prop_assert_eq!(
            status == ComplaintStatus::Completed,
            pending == 0 && completed > 0
        );
    }
}

// ============================================================================
// Storage Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: the stored counter equals the sum of applied deltas
    #[test]
    fn counter_equals_sum_of_deltas(deltas in arb_deltas()) {
        let expected: i64 = deltas.iter().sum();
        let stored = block_on(async {
            let store = common::memory_store().await;
            let company = common::seed_company(&store, "555-0100").await;
            let cascade = AggregateCounterCascade::new(store.clone(), RetryConfig::none());

            let mut last = 0;
            for delta in &deltas {
                last = cascade
                    .apply_delta(&company, CounterField::Products, *delta)
                    .await
                    .unwrap();
            }
            let doc = common::load(&store, &company).await;
            assert_eq!(doc.field_i64("products"), Some(last));
            last
        });
        prop_assert_eq!(stored, expected);
    }

    /// Property: store counts agree with in-memory filter evaluation
    #[test]
    fn store_count_agrees_with_filter(bodies in prop::collection::vec(arb_body(), 0..12)) {
        let filter = DocumentFilter::new().eq("phone", "555-0101").active();
        let expected = bodies.iter().filter(|b| filter.matches(b)).count() as u64;

        let counted = block_on(async {
            let store = common::memory_store().await;
            for (i, body) in bodies.iter().enumerate() {
                let doc = Document::new(Collection::Stores, format!("STR-{i:06}"), body.clone());
                store.insert(&doc, None).await.unwrap();
            }
            store.count(Collection::Stores, &filter).await.unwrap()
        });
        prop_assert_eq!(counted, expected);
    }

    /// Property: a unit rejected at any step leaves counters and sequences untouched
    #[test]
    fn rejected_unit_is_invisible(steps in 1usize..6, fail_at in 1usize..6) {
        let fail_at = fail_at.min(steps);
        let (products, head, stores) = block_on(async {
            let store = common::memory_store().await;
            let company = common::seed_company(&store, "555-0100").await;
            let allocator = SequenceAllocator::new(store.clone());
            let cascade = AggregateCounterCascade::new(store.clone(), RetryConfig::none());

            let mut unit = WorkflowUnit::<Store, FlowState>::new("arbitrary");
            for position in 1..=steps {
                unit = if position == fail_at {
                    unit.step_fn("reject", |_, _| {
                        Box::pin(async {
                            Ok::<_, CoreError>(StepOutcome::Rejected(json!({"position": "last"})))
                        })
                    })
                } else if position % 2 == 1 {
                    unit.step(InsertEntityStep::new(
                        store.clone(),
                        allocator.clone(),
                        common::store_draft("Shop", &format!("555-03{position:02}")),
                    ))
                } else {
                    unit.step(IncrementCounterStep::new(
                        cascade.clone(),
                        company.clone(),
                        CounterField::Products,
                        1,
                    ))
                };
            }

            let err = TransactionalWorkflow::new(store.clone())
                .run(&unit)
                .await
                .unwrap_err();
            let position = match err {
                CoreError::WorkflowStepFailed { position, .. } => position,
                other => panic!("unexpected error: {other:?}"),
            };
            assert_eq!(position, fail_at);

            let products = common::load(&store, &company).await.field_i64("products");
            let head = allocator
                .head(&EntityKind::Store.sequence_name())
                .await
                .unwrap();
            let stores = common::count(&store, Collection::Stores).await;
            (products, head, stores)
        });
        prop_assert_eq!(products, Some(0));
        prop_assert_eq!(head, 0);
        prop_assert_eq!(stores, 0);
    }
}
