//! Sequence allocation under concurrency and compensation.

mod common;

use std::collections::BTreeSet;

use warranty_core::domain::SequenceName;
use warranty_core::infra::{CompensationOutcome, SequenceAllocator};
use warranty_core::DocumentStore;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_allocations_form_contiguous_run() {
    let store = common::memory_store().await;
    let allocator = SequenceAllocator::new(store.clone());
    let name = SequenceName::from("TASK");

    // Prior value of 5.
    for _ in 0..5 {
        allocator.next(&name, None).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..32 {
        let allocator = allocator.clone();
        let name = name.clone();
        handles.push(tokio::spawn(
            async move { allocator.next(&name, None).await },
        ));
    }

    let mut values = BTreeSet::new();
    for handle in handles {
        values.insert(handle.await.unwrap().unwrap());
    }

    assert_eq!(values.len(), 32);
    assert_eq!(values.iter().copied().collect::<Vec<_>>(), (6..=37).collect::<Vec<u64>>());
    assert_eq!(allocator.head(&name).await.unwrap(), 37);
}

#[tokio::test]
async fn test_sequences_are_independent() {
    let store = common::memory_store().await;
    let allocator = SequenceAllocator::new(store);

    let stores = SequenceName::from("STORE");
    let tasks = SequenceName::from("TASK");

    assert_eq!(allocator.next(&stores, None).await.unwrap(), 1);
    assert_eq!(allocator.next(&stores, None).await.unwrap(), 2);
    assert_eq!(allocator.next(&tasks, None).await.unwrap(), 1);
}

#[tokio::test]
async fn test_allocation_in_aborted_session_rolls_back() {
    let store = common::memory_store().await;
    let allocator = SequenceAllocator::new(store.clone());
    let name = SequenceName::from("SERVICE_CENTER");

    allocator.next(&name, None).await.unwrap();

    let mut session = store.start_session().await.unwrap();
    assert_eq!(allocator.next(&name, Some(&mut session)).await.unwrap(), 2);
    store.abort_session(session).await.unwrap();

    assert_eq!(allocator.head(&name).await.unwrap(), 1);
    assert_eq!(allocator.next(&name, None).await.unwrap(), 2);
}

#[tokio::test]
async fn test_dropped_session_rolls_back() {
    let store = common::memory_store().await;
    let allocator = SequenceAllocator::new(store.clone());
    let name = SequenceName::from("STORE");

    {
        let mut session = store.start_session().await.unwrap();
        allocator.next(&name, Some(&mut session)).await.unwrap();
    }

    assert_eq!(allocator.head(&name).await.unwrap(), 0);
}

#[tokio::test]
async fn test_compensation_never_rewinds_below_later_allocation() {
    let store = common::memory_store().await;
    let allocator = SequenceAllocator::new(store);
    let name = SequenceName::from("ADDRESS");

    let mine = allocator.next(&name, None).await.unwrap();
    let theirs = allocator.next(&name, None).await.unwrap();

    let outcome = allocator.compensate(&name, mine).await.unwrap();
    assert_eq!(
        outcome,
        CompensationOutcome::Drift {
            allocated: mine,
            head: theirs
        }
    );
    assert_eq!(allocator.head(&name).await.unwrap(), theirs);

    // Compensating the head value itself rewinds exactly once.
    assert_eq!(
        allocator.compensate(&name, theirs).await.unwrap(),
        CompensationOutcome::Rewound
    );
    assert_eq!(allocator.head(&name).await.unwrap(), mine);
}
