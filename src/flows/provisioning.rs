//! Company, store and service-center provisioning
//!
//! Each creation is one workflow unit: the entity write, the parent counter
//! increment and the owner's role with its permissions either all commit or
//! none do.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{info, instrument};

use crate::domain::{
    company_document, Collection, CounterField, DocumentFilter, DocumentKey, EntityDraft,
    EntityKind, RoleId, RoleTemplate, COMPANY_REF_FIELD,
};
use crate::infra::{
    AggregateCounterCascade, CoreError, DocumentStore, Result, RetryConfig, RoleProvisioner,
    SequenceAllocator, TransactionalWorkflow, WorkflowUnit,
};

use super::steps::{
    FlowState, IncrementCounterStep, InsertDocumentStep, InsertEntityStep, ProvisionRoleStep,
};

/// Result of a provisioning unit
#[derive(Debug, Clone, PartialEq)]
pub struct Provisioned {
    pub key: DocumentKey,
    pub role_id: RoleId,
    /// Parent counter after the increment, when the entity has a parent
    pub parent_counter: Option<i64>,
}

impl Provisioned {
    fn from_state(state: FlowState, counter: Option<CounterField>) -> Result<Self> {
        let key = state
            .entity
            .clone()
            .ok_or_else(|| CoreError::Internal("provisioning produced no entity".into()))?;
        let role_id = state
            .role_id
            .clone()
            .ok_or_else(|| CoreError::Internal("provisioning produced no role".into()))?;
        Ok(Self {
            key,
            role_id,
            parent_counter: counter.and_then(|c| state.counter(c)),
        })
    }
}

/// Creates counter-holding companies and their role-owning children
pub struct ProvisioningService<S: DocumentStore> {
    store: Arc<S>,
    allocator: SequenceAllocator<S>,
    workflow: TransactionalWorkflow<S>,
    cascade: AggregateCounterCascade<S>,
    roles: Arc<dyn RoleProvisioner<S>>,
}

impl<S: DocumentStore> ProvisioningService<S> {
    pub fn new(store: Arc<S>, roles: Arc<dyn RoleProvisioner<S>>, retry: RetryConfig) -> Self {
        Self {
            allocator: SequenceAllocator::new(store.clone()),
            workflow: TransactionalWorkflow::new(store.clone()),
            cascade: AggregateCounterCascade::new(store.clone(), retry),
            store,
            roles,
        }
    }

    /// Create a company with zeroed counters and its admin role
    #[instrument(skip(self, payload))]
    pub async fn create_company(
        &self,
        name: &str,
        phone: &str,
        created_by: &str,
        payload: Map<String, Value>,
    ) -> Result<Provisioned> {
        self.ensure_unique_phone(Collection::Companies, phone).await?;

        let document = company_document(name, phone, created_by, payload);
        let unit = WorkflowUnit::<S, FlowState>::new("create_company")
            .step(InsertDocumentStep::new(self.store.clone(), document))
            .step(ProvisionRoleStep::new(
                self.roles.clone(),
                RoleTemplate::CompanyAdmin,
                created_by,
            ));

        let state = self.workflow.run(&unit).await?;
        let provisioned = Provisioned::from_state(state, None)?;
        info!(company = %provisioned.key.id, "Company provisioned");
        Ok(provisioned)
    }

    /// Create a store under a company
    pub async fn create_store(&self, company_id: &str, draft: EntityDraft) -> Result<Provisioned> {
        self.create_child(company_id, draft, EntityKind::Store, RoleTemplate::StoreManager)
            .await
    }

    /// Create a service center under a company
    pub async fn create_service_center(
        &self,
        company_id: &str,
        draft: EntityDraft,
    ) -> Result<Provisioned> {
        self.create_child(
            company_id,
            draft,
            EntityKind::ServiceCenter,
            RoleTemplate::ServiceCenterManager,
        )
        .await
    }

    #[instrument(skip(self, draft))]
    async fn create_child(
        &self,
        company_id: &str,
        draft: EntityDraft,
        kind: EntityKind,
        template: RoleTemplate,
    ) -> Result<Provisioned> {
        if draft.kind != kind {
            return Err(CoreError::InvalidDocument(format!(
                "expected a {kind} draft, got {}",
                draft.kind
            )));
        }
        let counter = kind.company_counter().ok_or_else(|| {
            CoreError::Internal(format!("{kind} has no company counter"))
        })?;

        if let Some(phone) = draft.field_str("phone") {
            self.ensure_unique_phone(kind.collection(), phone).await?;
        }

        let company = DocumentKey::company(company_id);
        let created_by = draft.created_by.clone();
        let draft = draft.with(COMPANY_REF_FIELD, company_id);

        let unit = WorkflowUnit::<S, FlowState>::new(format!("create_{kind}"))
            .step(InsertEntityStep::new(
                self.store.clone(),
                self.allocator.clone(),
                draft,
            ))
            .step(IncrementCounterStep::new(
                self.cascade.clone(),
                company,
                counter,
                1,
            ))
            .step(ProvisionRoleStep::new(
                self.roles.clone(),
                template,
                created_by,
            ));

        let state = self.workflow.run(&unit).await?;
        let provisioned = Provisioned::from_state(state, Some(counter))?;
        info!(
            entity = %provisioned.key.id,
            company = company_id,
            counter_value = provisioned.parent_counter,
            "Entity provisioned"
        );
        Ok(provisioned)
    }

    /// Reject a phone already held by an active entity in `collection`.
    ///
    /// Advisory only: the read runs before the unit, so two concurrent
    /// creations with the same phone can both pass. Nothing in the document
    /// schema enforces uniqueness; callers that need it strictly must
    /// serialize creations per phone.
    async fn ensure_unique_phone(&self, collection: Collection, phone: &str) -> Result<()> {
        let filter = DocumentFilter::new().eq("phone", phone).active();
        if self.store.find_one(collection, &filter, None).await?.is_some() {
            return Err(CoreError::duplicate(collection, format!("phone {phone}")));
        }
        Ok(())
    }
}
