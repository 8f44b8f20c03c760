//! Reusable workflow steps for multi-collection writes
//!
//! Every step threads a [`FlowState`] forward: it clones the state left by
//! the previous step, adds what it produced and returns it.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{
    CounterField, Document, DocumentFilter, DocumentKey, EntityDraft, PermissionSet, RoleId,
    RoleSpec, RoleTemplate,
};
use crate::infra::{
    AggregateCounterCascade, CoreError, DocumentStore, Result, RoleProvisioner,
    SequenceAllocator, StepOutcome, WorkflowStep,
};

/// Accumulated outputs of a provisioning unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowState {
    /// Document created by the unit
    pub entity: Option<DocumentKey>,
    /// Post-update values of counters moved by the unit
    pub counters: Vec<(CounterField, i64)>,
    pub role_id: Option<RoleId>,
    /// Document after a guarded flip; `None` when the guard did not match
    pub flipped: Option<Document>,
}

impl FlowState {
    fn carried(completed: &[FlowState]) -> FlowState {
        completed.last().cloned().unwrap_or_default()
    }

    pub fn counter(&self, field: CounterField) -> Option<i64> {
        self.counters
            .iter()
            .rev()
            .find(|(f, _)| *f == field)
            .map(|(_, v)| *v)
    }
}

/// Allocates an entity id inside the session and inserts the entity
pub struct InsertEntityStep<S: DocumentStore> {
    store: Arc<S>,
    allocator: SequenceAllocator<S>,
    draft: EntityDraft,
}

impl<S: DocumentStore> InsertEntityStep<S> {
    pub fn new(store: Arc<S>, allocator: SequenceAllocator<S>, draft: EntityDraft) -> Self {
        Self {
            store,
            allocator,
            draft,
        }
    }
}

#[async_trait]
impl<S: DocumentStore> WorkflowStep<S, FlowState> for InsertEntityStep<S> {
    fn name(&self) -> &str {
        "insert_entity"
    }

    async fn execute(
        &self,
        session: &mut S::Session,
        completed: &[FlowState],
    ) -> Result<StepOutcome<FlowState>> {
        let value = self
            .allocator
            .next(&self.draft.kind.sequence_name(), Some(&mut *session))
            .await?;
        let document = self.draft.clone().into_document(value);
        self.store.insert(&document, Some(session)).await?;

        let mut state = FlowState::carried(completed);
        state.entity = Some(document.key());
        Ok(StepOutcome::Completed(state))
    }
}

/// Inserts a prebuilt document (companies, which carry UUID ids)
pub struct InsertDocumentStep<S: DocumentStore> {
    store: Arc<S>,
    document: Document,
}

impl<S: DocumentStore> InsertDocumentStep<S> {
    pub fn new(store: Arc<S>, document: Document) -> Self {
        Self { store, document }
    }
}

#[async_trait]
impl<S: DocumentStore> WorkflowStep<S, FlowState> for InsertDocumentStep<S> {
    fn name(&self) -> &str {
        "insert_document"
    }

    async fn execute(
        &self,
        session: &mut S::Session,
        completed: &[FlowState],
    ) -> Result<StepOutcome<FlowState>> {
        self.store.insert(&self.document, Some(session)).await?;

        let mut state = FlowState::carried(completed);
        state.entity = Some(self.document.key());
        Ok(StepOutcome::Completed(state))
    }
}

/// Moves a parent counter inside the session
pub struct IncrementCounterStep<S: DocumentStore> {
    cascade: AggregateCounterCascade<S>,
    parent: DocumentKey,
    counter: CounterField,
    delta: i64,
}

impl<S: DocumentStore> IncrementCounterStep<S> {
    pub fn new(
        cascade: AggregateCounterCascade<S>,
        parent: DocumentKey,
        counter: CounterField,
        delta: i64,
    ) -> Self {
        Self {
            cascade,
            parent,
            counter,
            delta,
        }
    }
}

#[async_trait]
impl<S: DocumentStore> WorkflowStep<S, FlowState> for IncrementCounterStep<S> {
    fn name(&self) -> &str {
        self.counter.as_str()
    }

    async fn execute(
        &self,
        session: &mut S::Session,
        completed: &[FlowState],
    ) -> Result<StepOutcome<FlowState>> {
        let value = self
            .cascade
            .apply_delta_in(&self.parent, self.counter, self.delta, session)
            .await?;

        let mut state = FlowState::carried(completed);
        state.counters.push((self.counter, value));
        Ok(StepOutcome::Completed(state))
    }
}

/// Creates the owner's role and attaches the template's permissions
pub struct ProvisionRoleStep<S: DocumentStore> {
    provisioner: Arc<dyn RoleProvisioner<S>>,
    template: RoleTemplate,
    created_by: String,
}

impl<S: DocumentStore> ProvisionRoleStep<S> {
    pub fn new(
        provisioner: Arc<dyn RoleProvisioner<S>>,
        template: RoleTemplate,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            provisioner,
            template,
            created_by: created_by.into(),
        }
    }
}

#[async_trait]
impl<S: DocumentStore> WorkflowStep<S, FlowState> for ProvisionRoleStep<S> {
    fn name(&self) -> &str {
        "provision_role"
    }

    async fn execute(
        &self,
        session: &mut S::Session,
        completed: &[FlowState],
    ) -> Result<StepOutcome<FlowState>> {
        let mut state = FlowState::carried(completed);
        let owner = state.entity.clone().ok_or_else(|| {
            CoreError::Internal("role provisioning needs an owner created earlier".into())
        })?;

        let spec = RoleSpec::new(self.template, owner);
        let role_id = self
            .provisioner
            .create_role(&spec, &self.created_by, session)
            .await?;
        self.provisioner
            .attach_permissions(
                &PermissionSet::for_template(self.template),
                &role_id,
                &self.created_by,
                session,
            )
            .await?;

        state.role_id = Some(role_id);
        Ok(StepOutcome::Completed(state))
    }
}

/// Overwrites one field of a document inside the session
pub struct SetFieldStep<S: DocumentStore> {
    store: Arc<S>,
    key: DocumentKey,
    field: String,
    value: Value,
}

impl<S: DocumentStore> SetFieldStep<S> {
    pub fn new(
        store: Arc<S>,
        key: DocumentKey,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            store,
            key,
            field: field.into(),
            value: value.into(),
        }
    }
}

#[async_trait]
impl<S: DocumentStore> WorkflowStep<S, FlowState> for SetFieldStep<S> {
    fn name(&self) -> &str {
        &self.field
    }

    async fn execute(
        &self,
        session: &mut S::Session,
        completed: &[FlowState],
    ) -> Result<StepOutcome<FlowState>> {
        self.store
            .set_field(&self.key, &self.field, &self.value, Some(session))
            .await?;
        Ok(StepOutcome::Completed(FlowState::carried(completed)))
    }
}

/// Sets a field only while the document matches `guard` and stamps
/// `updated_by` on the winner.
///
/// Losing the guard is not a failure: the step completes with
/// `flipped = None` and the [`FlippedCounterStep`]s after it do nothing.
pub struct GuardedSetStep<S: DocumentStore> {
    store: Arc<S>,
    name: String,
    key: DocumentKey,
    guard: DocumentFilter,
    field: String,
    value: Value,
    updated_by: String,
}

impl<S: DocumentStore> GuardedSetStep<S> {
    pub fn new(
        store: Arc<S>,
        key: DocumentKey,
        guard: DocumentFilter,
        field: impl Into<String>,
        value: impl Into<Value>,
        updated_by: impl Into<String>,
    ) -> Self {
        let field = field.into();
        Self {
            store,
            name: format!("set_{field}"),
            key,
            guard,
            field,
            value: value.into(),
            updated_by: updated_by.into(),
        }
    }
}

#[async_trait]
impl<S: DocumentStore> WorkflowStep<S, FlowState> for GuardedSetStep<S> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        session: &mut S::Session,
        completed: &[FlowState],
    ) -> Result<StepOutcome<FlowState>> {
        let mut state = FlowState::carried(completed);
        let won = self
            .store
            .set_field_if(
                &self.key,
                &self.guard,
                &self.field,
                &self.value,
                Some(&mut *session),
            )
            .await?;
        if !won {
            state.flipped = None;
            return Ok(StepOutcome::Completed(state));
        }

        self.store
            .set_field(
                &self.key,
                "updated_by",
                &Value::from(self.updated_by.as_str()),
                Some(&mut *session),
            )
            .await?;
        let document = self
            .store
            .find(&self.key, Some(session))
            .await?
            .ok_or_else(|| CoreError::not_found(self.key.collection, self.key.id.clone()))?;

        state.flipped = Some(document);
        Ok(StepOutcome::Completed(state))
    }
}

/// Resolves which parent counter a flipped document moves, if any
pub type CounterTarget =
    Box<dyn Fn(&Document) -> Result<Option<(DocumentKey, CounterField)>> + Send + Sync>;

/// Moves the parent counter of the document flipped by a preceding
/// [`GuardedSetStep`]
pub struct FlippedCounterStep<S: DocumentStore> {
    cascade: AggregateCounterCascade<S>,
    name: String,
    target: CounterTarget,
    delta: i64,
}

impl<S: DocumentStore> FlippedCounterStep<S> {
    pub fn new<F>(
        cascade: AggregateCounterCascade<S>,
        name: impl Into<String>,
        target: F,
        delta: i64,
    ) -> Self
    where
        F: Fn(&Document) -> Result<Option<(DocumentKey, CounterField)>> + Send + Sync + 'static,
    {
        Self {
            cascade,
            name: name.into(),
            target: Box::new(target),
            delta,
        }
    }
}

#[async_trait]
impl<S: DocumentStore> WorkflowStep<S, FlowState> for FlippedCounterStep<S> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        session: &mut S::Session,
        completed: &[FlowState],
    ) -> Result<StepOutcome<FlowState>> {
        let mut state = FlowState::carried(completed);
        let target = match state.flipped.as_ref() {
            Some(document) => (self.target)(document)?,
            None => None,
        };

        if let Some((parent, counter)) = target {
            let value = self
                .cascade
                .apply_delta_in(&parent, counter, self.delta, session)
                .await?;
            state.counters.push((counter, value));
        }
        Ok(StepOutcome::Completed(state))
    }
}
