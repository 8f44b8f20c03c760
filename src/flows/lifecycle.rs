//! Soft delete and restore for company-owned entities
//!
//! The status flip, the `updated_by` stamp and the company counter move in
//! one workflow unit. Only the caller that wins the flip moves the counter,
//! so retries and races never count a child twice, and a failed counter
//! update leaves the flag where it was.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::domain::{
    CounterField, Document, DocumentFilter, DocumentKey, EntityKind, EntityStatus,
    COMPANY_REF_FIELD,
};
use crate::infra::{
    AggregateCounterCascade, CoreError, DocumentStore, Result, RetryConfig,
    TransactionalWorkflow, WorkflowUnit,
};

use super::steps::{FlippedCounterStep, FlowState, GuardedSetStep};

/// What a status change did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    /// Flag flipped; carries the parent counter value if one moved
    Applied { parent_counter: Option<i64> },
    /// Flag was already at the target
    Unchanged,
}

/// Deactivates and restores stores, service centers, models, addresses and
/// purchases
pub struct LifecycleService<S: DocumentStore> {
    store: Arc<S>,
    workflow: TransactionalWorkflow<S>,
    cascade: AggregateCounterCascade<S>,
}

impl<S: DocumentStore> LifecycleService<S> {
    pub fn new(store: Arc<S>, retry: RetryConfig) -> Self {
        Self {
            workflow: TransactionalWorkflow::new(store.clone()),
            cascade: AggregateCounterCascade::new(store.clone(), retry),
            store,
        }
    }

    pub async fn deactivate(
        &self,
        kind: EntityKind,
        entity_id: &str,
        updated_by: &str,
    ) -> Result<StatusChange> {
        self.set_status(kind, entity_id, EntityStatus::Inactive, updated_by)
            .await
    }

    pub async fn restore(
        &self,
        kind: EntityKind,
        entity_id: &str,
        updated_by: &str,
    ) -> Result<StatusChange> {
        self.set_status(kind, entity_id, EntityStatus::Active, updated_by)
            .await
    }

    #[instrument(skip(self))]
    async fn set_status(
        &self,
        kind: EntityKind,
        entity_id: &str,
        target: EntityStatus,
        updated_by: &str,
    ) -> Result<StatusChange> {
        if kind == EntityKind::Task {
            return Err(CoreError::InvalidStateTransition {
                entity: kind.to_string(),
                from: "any".into(),
                to: target.to_string(),
            });
        }

        let key = DocumentKey::new(kind.collection(), entity_id);
        let from = match target {
            EntityStatus::Active => EntityStatus::Inactive,
            EntityStatus::Inactive => EntityStatus::Active,
        };

        let unit = WorkflowUnit::<S, FlowState>::new("set_status")
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
                "company_counter",
                move |doc| Ok(company_counter(kind, doc)),
                target.counter_delta(),
            ));

        let state = self.workflow.run(&unit).await?;
        if state.flipped.is_none() {
            if self.store.find(&key, None).await?.is_none() {
                return Err(CoreError::not_found(key.collection, entity_id));
            }
            debug!(entity = entity_id, status = %target, "Status already at target");
            return Ok(StatusChange::Unchanged);
        }

        let parent_counter = kind
            .company_counter()
            .and_then(|counter| state.counter(counter));
        Ok(StatusChange::Applied { parent_counter })
    }
}

fn company_counter(kind: EntityKind, doc: &Document) -> Option<(DocumentKey, CounterField)> {
    let counter = kind.company_counter()?;
    let company_id = doc.field_str(COMPANY_REF_FIELD)?;
    Some((DocumentKey::company(company_id), counter))
}
