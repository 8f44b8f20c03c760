//! Transactional workflow runner
//!
//! A [`WorkflowUnit`] is an ordered list of steps that must land together.
//! The runner opens one store session, passes it to every step in order and
//! commits only if every step completes. The first failing step, whether it
//! returns an error or an explicit rejection, aborts the session and its
//! payload is handed back unchanged inside [`CoreError::WorkflowStepFailed`].
//!
//! Steps see the outputs of the steps before them, so a later step can use
//! an id minted by an earlier one.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::{CoreError, DocumentStore, Result, StepFailure};

/// Outcome of a single step
#[derive(Debug)]
pub enum StepOutcome<T> {
    Completed(T),
    /// The step declined to continue; the payload is returned to the caller
    Rejected(Value),
}

/// Boxed future returned by closure steps
pub type StepFuture<'a, T> = Pin<Box<dyn Future<Output = Result<StepOutcome<T>>> + Send + 'a>>;

/// One step of a workflow unit
#[async_trait]
pub trait WorkflowStep<S: DocumentStore, T: Send + Sync + 'static>: Send + Sync {
    fn name(&self) -> &str;

    /// Run inside the unit's session. `completed` holds the outputs of the
    /// earlier steps, oldest first.
    async fn execute(&self, session: &mut S::Session, completed: &[T]) -> Result<StepOutcome<T>>;
}

/// Step backed by a closure
pub struct FnStep<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<S, T, F> WorkflowStep<S, T> for FnStep<F>
where
    S: DocumentStore,
    T: Send + Sync + 'static,
    F: for<'a> Fn(&'a mut S::Session, &'a [T]) -> StepFuture<'a, T> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, session: &mut S::Session, completed: &[T]) -> Result<StepOutcome<T>> {
        (self.f)(session, completed).await
    }
}

/// Named, ordered list of steps
pub struct WorkflowUnit<S: DocumentStore, T: Send + Sync + 'static> {
    name: String,
    steps: Vec<Box<dyn WorkflowStep<S, T>>>,
}

impl<S: DocumentStore, T: Send + Sync + 'static> WorkflowUnit<S, T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Append a step
    pub fn step(mut self, step: impl WorkflowStep<S, T> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Append a closure step
    pub fn step_fn<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut S::Session, &'a [T]) -> StepFuture<'a, T> + Send + Sync + 'static,
    {
        self.step(FnStep {
            name: name.into(),
            f,
        })
    }
}

/// Runs workflow units against a store
pub struct TransactionalWorkflow<S: DocumentStore> {
    store: Arc<S>,
}

impl<S: DocumentStore> Clone for TransactionalWorkflow<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: DocumentStore> TransactionalWorkflow<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Run every step in one session and return the last step's output.
    ///
    /// On failure the session is aborted before returning. If the abort
    /// itself fails the session is dropped, which rolls it back as well.
    #[instrument(skip(self, unit), fields(unit = %unit.name, steps = unit.steps.len()))]
    pub async fn run<T: Send + Sync + 'static>(&self, unit: &WorkflowUnit<S, T>) -> Result<T> {
        if unit.steps.is_empty() {
            return Err(CoreError::EmptyWorkflow(unit.name.clone()));
        }

        let mut session = self.store.start_session().await?;
        let mut completed: Vec<T> = Vec::with_capacity(unit.steps.len());

        for (index, step) in unit.steps.iter().enumerate() {
            let position = index + 1;
            let failure = match step.execute(&mut session, &completed).await {
                Ok(StepOutcome::Completed(output)) => {
                    debug!(step = step.name(), position, "Workflow step completed");
                    completed.push(output);
                    continue;
                }
                Ok(StepOutcome::Rejected(payload)) => StepFailure::Rejected(payload),
                Err(e) => StepFailure::Error(e),
            };

            warn!(
                step = step.name(),
                position,
                failure = %failure,
                "Workflow step failed, aborting unit"
            );
            if let Err(e) = self.store.abort_session(session).await {
                warn!(error = %e, "Workflow abort failed; session dropped");
            }

            return Err(CoreError::WorkflowStepFailed {
                unit: unit.name.clone(),
                step: step.name().to_string(),
                position,
                failure: Box::new(failure),
            });
        }

        self.store.commit_session(session).await?;

        completed
            .pop()
            .ok_or_else(|| CoreError::EmptyWorkflow(unit.name.clone()))
    }
}
