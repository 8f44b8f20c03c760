//! Address, model and purchase registration
//!
//! The id is reserved first and settled once the write has landed:
//! confirmed on success, released on failure. A model's insert and its
//! company's product count commit together in one workflow unit.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::domain::{
    Collection, CounterField, Document, DocumentFilter, DocumentKey, EntityDraft, EntityKind,
    COMPANY_REF_FIELD,
};
use crate::infra::{
    AggregateCounterCascade, CompensationOutcome, CoreError, DocumentStore, Result, RetryConfig,
    SequenceAllocator, TransactionalWorkflow, WorkflowUnit,
};

use super::steps::{FlowState, IncrementCounterStep, InsertDocumentStep};

/// Registered model plus the company's product count
#[derive(Debug, Clone)]
pub struct RegisteredModel {
    pub document: Document,
    pub products: i64,
}

/// Registers entities that need an id but no multi-collection unit
pub struct RegistrationService<S: DocumentStore> {
    store: Arc<S>,
    allocator: SequenceAllocator<S>,
    workflow: TransactionalWorkflow<S>,
    cascade: AggregateCounterCascade<S>,
}

impl<S: DocumentStore> RegistrationService<S> {
    pub fn new(store: Arc<S>, retry: RetryConfig) -> Self {
        Self {
            allocator: SequenceAllocator::new(store.clone()),
            workflow: TransactionalWorkflow::new(store.clone()),
            cascade: AggregateCounterCascade::new(store.clone(), retry),
            store,
        }
    }

    /// Register an address; an active address at the same coordinates is a
    /// duplicate
    pub async fn register_address(&self, draft: EntityDraft) -> Result<Document> {
        Self::expect_kind(&draft, EntityKind::Address)?;

        let latitude = draft.payload.get("latitude").cloned();
        let longitude = draft.payload.get("longitude").cloned();
        if let (Some(latitude), Some(longitude)) = (latitude, longitude) {
            let filter = DocumentFilter::new()
                .eq("latitude", latitude.clone())
                .eq("longitude", longitude.clone())
                .active();
            if self
                .store
                .find_one(Collection::Addresses, &filter, None)
                .await?
                .is_some()
            {
                return Err(CoreError::duplicate(
                    Collection::Addresses,
                    format!("coordinates {latitude},{longitude}"),
                ));
            }
        }

        self.register(draft, None).await.map(|(document, _)| document)
    }

    pub async fn register_purchase(&self, draft: EntityDraft) -> Result<Document> {
        Self::expect_kind(&draft, EntityKind::Purchase)?;
        self.register(draft, None).await.map(|(document, _)| document)
    }

    /// Register a model and count it against the company's products
    pub async fn register_model(
        &self,
        company_id: &str,
        draft: EntityDraft,
    ) -> Result<RegisteredModel> {
        Self::expect_kind(&draft, EntityKind::Model)?;

        let company = DocumentKey::company(company_id);
        if self.store.find(&company, None).await?.is_none() {
            return Err(CoreError::not_found(company.collection, company_id));
        }

        let (document, products) = self
            .register(
                draft.with(COMPANY_REF_FIELD, Value::from(company_id)),
                Some((company, CounterField::Products)),
            )
            .await?;
        let products = products
            .ok_or_else(|| CoreError::Internal("model unit moved no product counter".into()))?;

        Ok(RegisteredModel { document, products })
    }

    /// Insert under a reserved id. With a `parent`, the insert and a +1 on
    /// the parent counter run as one unit and the new counter value is
    /// returned.
    #[instrument(skip(self, draft, parent), fields(kind = %draft.kind))]
    async fn register(
        &self,
        draft: EntityDraft,
        parent: Option<(DocumentKey, CounterField)>,
    ) -> Result<(Document, Option<i64>)> {
        let reservation = self.allocator.reserve(&draft.kind.sequence_name()).await?;
        let document = draft.into_document(reservation.value());

        let written = match parent {
            None => self.store.insert(&document, None).await.map(|()| None),
            Some((parent, counter)) => {
                let unit = WorkflowUnit::<S, FlowState>::new("register")
                    .step(InsertDocumentStep::new(self.store.clone(), document.clone()))
                    .step(IncrementCounterStep::new(
                        self.cascade.clone(),
                        parent,
                        counter,
                        1,
                    ));
                self.workflow
                    .run(&unit)
                    .await
                    .map(|state| state.counter(counter))
            }
        };

        match written {
            Ok(counter) => {
                let value = self.allocator.confirm(reservation);
                info!(entity = %document.id, value, "Entity registered");
                Ok((document, counter))
            }
            Err(e) => {
                match self.allocator.release(reservation).await {
                    Ok(CompensationOutcome::Rewound) => {}
                    Ok(CompensationOutcome::Drift { allocated, head }) => {
                        warn!(allocated, head, "Released id left as a gap");
                    }
                    Err(release_err) => {
                        warn!(error = %release_err, "Failed to release reserved id");
                    }
                }
                Err(e)
            }
        }
    }

    fn expect_kind(draft: &EntityDraft, kind: EntityKind) -> Result<()> {
        if draft.kind == kind {
            Ok(())
        } else {
            Err(CoreError::InvalidDocument(format!(
                "expected a {kind} draft, got {}",
                draft.kind
            )))
        }
    }
}
