//! Complaints and their repair tasks
//!
//! A complaint's counters track its tasks: `tasks_assigned` counts active
//! tasks, `tasks_pending` and `tasks_completed` split them by work state.
//! The complaint status is derived from those counters and rewritten by
//! [`ReconcileComplaintStatus`] whenever `tasks_pending` drops to zero or a
//! task changes bucket.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};

use crate::domain::{
    complaint_document, ComplaintStatus, CounterField, Document, DocumentFilter, DocumentKey,
    EntityDraft, EntityKind, EntityStatus, TaskState, COMPLAINT_REF_FIELD,
    COMPLAINT_STATUS_FIELD, TASK_STATE_FIELD,
};
use crate::infra::{
    AggregateCounterCascade, CoreError, DocumentStore, Result, RetryConfig, SequenceAllocator,
    ThresholdAction, ThresholdOutcome, TransactionalWorkflow, WorkflowUnit,
};

use super::steps::{
    FlippedCounterStep, FlowState, GuardedSetStep, IncrementCounterStep, InsertEntityStep,
    SetFieldStep,
};

/// Re-reads before giving up when counters keep moving under a reconcile
const RECONCILE_ATTEMPTS: usize = 16;

/// Re-derives a complaint's status from its current counters.
///
/// The write is conditional on the counters it was derived from, so a
/// reconcile that read stale counters never overwrites a newer status. Any
/// number of calls converge on the same state.
pub struct ReconcileComplaintStatus<S: DocumentStore> {
    store: Arc<S>,
}

impl<S: DocumentStore> ReconcileComplaintStatus<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, complaint), fields(complaint = %complaint))]
    pub async fn reconcile(&self, complaint: &DocumentKey) -> Result<ComplaintStatus> {
        for attempt in 1..=RECONCILE_ATTEMPTS {
            let snapshot = self
                .store
                .find(complaint, None)
                .await?
                .ok_or_else(|| CoreError::not_found(complaint.collection, complaint.id.clone()))?;

            if let Some(status) = self.write_derived(complaint, &snapshot).await? {
                return Ok(status);
            }
            debug!(attempt, "Counters moved since read; re-deriving");
        }

        Err(CoreError::Internal(format!(
            "counters of {complaint} kept moving during reconcile"
        )))
    }

    /// Write the status derived from `snapshot`, unless its counters changed
    /// since it was read. Returns `None` in that case.
    async fn write_derived(
        &self,
        complaint: &DocumentKey,
        snapshot: &Document,
    ) -> Result<Option<ComplaintStatus>> {
        let pending = snapshot.field_i64(CounterField::TasksPending.as_str());
        let completed = snapshot.field_i64(CounterField::TasksCompleted.as_str());
        let derived = ComplaintStatus::derive(pending.unwrap_or(0), completed.unwrap_or(0));
        let stored = snapshot
            .field_str(COMPLAINT_STATUS_FIELD)
            .and_then(ComplaintStatus::parse);

        if stored == Some(derived) {
            return Ok(Some(derived));
        }

        let mut guard = DocumentFilter::new();
        for (counter, value) in [
            (CounterField::TasksPending, pending),
            (CounterField::TasksCompleted, completed),
        ] {
            if let Some(value) = value {
                guard = guard.eq(counter.as_str(), value);
            }
        }

        let written = self
            .store
            .set_field_if(
                complaint,
                &guard,
                COMPLAINT_STATUS_FIELD,
                &derived.to_json(),
                None,
            )
            .await?;
        if !written {
            return Ok(None);
        }

        info!(complaint = %complaint.id, status = %derived, "Complaint status updated");
        Ok(Some(derived))
    }
}

#[async_trait]
impl<S: DocumentStore> ThresholdAction for ReconcileComplaintStatus<S> {
    async fn fire(&self, parent: &DocumentKey) -> Result<()> {
        self.reconcile(parent).await.map(|_| ())
    }
}

/// Outcome of a task creation unit
#[derive(Debug, Clone, PartialEq)]
pub struct TaskCreated {
    pub key: DocumentKey,
    pub tasks_pending: i64,
    pub tasks_assigned: i64,
}

/// Outcome of completing a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskCompletion {
    Completed {
        tasks_pending: i64,
        status: ThresholdOutcome,
    },
    /// Another caller completed it first; no counter moved
    AlreadyCompleted,
}

/// Opens complaints and drives their tasks
pub struct TaskService<S: DocumentStore> {
    store: Arc<S>,
    allocator: SequenceAllocator<S>,
    workflow: TransactionalWorkflow<S>,
    cascade: AggregateCounterCascade<S>,
    reconciler: ReconcileComplaintStatus<S>,
}

impl<S: DocumentStore> TaskService<S> {
    pub fn new(store: Arc<S>, retry: RetryConfig) -> Self {
        Self {
            allocator: SequenceAllocator::new(store.clone()),
            workflow: TransactionalWorkflow::new(store.clone()),
            cascade: AggregateCounterCascade::new(store.clone(), retry),
            reconciler: ReconcileComplaintStatus::new(store.clone()),
            store,
        }
    }

    pub async fn open_complaint(
        &self,
        company_id: &str,
        purchase_id: &str,
        created_by: &str,
        payload: Map<String, Value>,
    ) -> Result<Document> {
        let doc = complaint_document(company_id, purchase_id, created_by, payload);
        self.store.insert(&doc, None).await?;
        Ok(doc)
    }

    /// Create a pending task and count it against its complaint in one unit
    #[instrument(skip(self, draft))]
    pub async fn create_task(&self, complaint_id: &str, draft: EntityDraft) -> Result<TaskCreated> {
        if draft.kind != EntityKind::Task {
            return Err(CoreError::InvalidDocument(format!(
                "expected a task draft, got {}",
                draft.kind
            )));
        }

        let complaint = DocumentKey::complaint(complaint_id);
        let draft = draft
            .with(COMPLAINT_REF_FIELD, complaint_id)
            .with(TASK_STATE_FIELD, TaskState::Pending.to_json());

        let unit = WorkflowUnit::<S, FlowState>::new("create_task")
            .step(InsertEntityStep::new(
                self.store.clone(),
                self.allocator.clone(),
                draft,
            ))
            .step(IncrementCounterStep::new(
                self.cascade.clone(),
                complaint.clone(),
                CounterField::TasksPending,
                1,
            ))
            .step(IncrementCounterStep::new(
                self.cascade.clone(),
                complaint.clone(),
                CounterField::TasksAssigned,
                1,
            ))
            .step(SetFieldStep::new(
                self.store.clone(),
                complaint,
                COMPLAINT_STATUS_FIELD,
                ComplaintStatus::InProgress.to_json(),
            ));

        let state = self.workflow.run(&unit).await?;
        let key = state
            .entity
            .clone()
            .ok_or_else(|| CoreError::Internal("task unit produced no entity".into()))?;

        Ok(TaskCreated {
            key,
            tasks_pending: state.counter(CounterField::TasksPending).unwrap_or(0),
            tasks_assigned: state.counter(CounterField::TasksAssigned).unwrap_or(0),
        })
    }

    /// Move an active task from pending to completed.
    ///
    /// The state flip and both counter moves commit together. Completed is
    /// counted before pending is decremented, so when pending reaches zero
    /// the derived status is already `completed`.
    #[instrument(skip(self))]
    pub async fn complete_task(&self, task_id: &str, updated_by: &str) -> Result<TaskCompletion> {
        let key = DocumentKey::new(EntityKind::Task.collection(), task_id);
        let guard = DocumentFilter::new()
            .eq(TASK_STATE_FIELD, TaskState::Pending.to_json())
            .active();

        let unit = WorkflowUnit::<S, FlowState>::new("complete_task")
            .step(GuardedSetStep::new(
                self.store.clone(),
                key.clone(),
                guard,
                TASK_STATE_FIELD,
                TaskState::Completed.to_json(),
                updated_by,
            ))
            .step(FlippedCounterStep::new(
                self.cascade.clone(),
                CounterField::TasksCompleted.as_str(),
                |task| complaint_of(task).map(|c| Some((c, CounterField::TasksCompleted))),
                1,
            ))
            .step(FlippedCounterStep::new(
                self.cascade.clone(),
                CounterField::TasksPending.as_str(),
                |task| complaint_of(task).map(|c| Some((c, CounterField::TasksPending))),
                -1,
            ));

        let state = self.workflow.run(&unit).await?;
        let Some(task) = state.flipped.as_ref() else {
            return self.lost_completion(&key).await;
        };

        let complaint = complaint_of(task)?;
        let tasks_pending = state
            .counter(CounterField::TasksPending)
            .ok_or_else(|| CoreError::Internal("completion moved no pending counter".into()))?;
        let status = self
            .cascade
            .on_threshold_reached(
                &complaint,
                CounterField::TasksPending,
                tasks_pending,
                0,
                &self.reconciler,
            )
            .await?;

        Ok(TaskCompletion::Completed {
            tasks_pending,
            status,
        })
    }

    /// Explain why a completion guard did not match
    async fn lost_completion(&self, key: &DocumentKey) -> Result<TaskCompletion> {
        let task = self.load_task(key).await?;
        if !task.is_active() {
            return Err(CoreError::InvalidStateTransition {
                entity: key.id.clone(),
                from: EntityStatus::Inactive.to_string(),
                to: TaskState::Completed.as_str().to_string(),
            });
        }
        Ok(TaskCompletion::AlreadyCompleted)
    }

    /// Soft-delete or restore a task, moving its bucket and the assigned
    /// count by one in the same unit, then reconcile the complaint
    #[instrument(skip(self))]
    pub async fn set_task_status(
        &self,
        task_id: &str,
        target: EntityStatus,
        updated_by: &str,
    ) -> Result<Option<ComplaintStatus>> {
        let key = DocumentKey::new(EntityKind::Task.collection(), task_id);
        let from = match target {
            EntityStatus::Active => EntityStatus::Inactive,
            EntityStatus::Inactive => EntityStatus::Active,
        };
        let delta = target.counter_delta();

        let unit = WorkflowUnit::<S, FlowState>::new("set_task_status")
            .step(GuardedSetStep::new(
                self.store.clone(),
                key.clone(),
                DocumentFilter::new().eq("status", from.to_json()),
                "status",
                target.to_json(),
                updated_by,
            ))
            .step(FlippedCounterStep::new(
                self.cascade.clone(),
                "task_bucket",
                |task| {
                    let state = task
                        .field_str(TASK_STATE_FIELD)
                        .and_then(TaskState::parse)
                        .ok_or_else(|| {
                            CoreError::InvalidDocument(format!("task {} has no state", task.id))
                        })?;
                    Ok(Some((complaint_of(task)?, state.counter())))
                },
                delta,
            ))
            .step(FlippedCounterStep::new(
                self.cascade.clone(),
                CounterField::TasksAssigned.as_str(),
                |task| complaint_of(task).map(|c| Some((c, CounterField::TasksAssigned))),
                delta,
            ));

        let state = self.workflow.run(&unit).await?;
        let Some(task) = state.flipped.as_ref() else {
            self.load_task(&key).await?;
            return Ok(None);
        };

        let complaint = complaint_of(task)?;
        self.reconcile_complaint(&complaint.id).await.map(Some)
    }

    /// Re-derive a complaint's status from its counters
    pub async fn reconcile_complaint(&self, complaint_id: &str) -> Result<ComplaintStatus> {
        self.reconciler
            .reconcile(&DocumentKey::complaint(complaint_id))
            .await
    }

    async fn load_task(&self, key: &DocumentKey) -> Result<Document> {
        self.store
            .find(key, None)
            .await?
            .ok_or_else(|| CoreError::not_found(key.collection, key.id.clone()))
    }
}

fn complaint_of(task: &Document) -> Result<DocumentKey> {
    task.field_str(COMPLAINT_REF_FIELD)
        .map(DocumentKey::complaint)
        .ok_or_else(|| CoreError::InvalidDocument(format!("task {} has no complaint", task.id)))
}
