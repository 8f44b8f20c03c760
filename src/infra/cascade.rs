//! Aggregate counter cascade
//!
//! Parent documents (companies, complaints) carry integer counters that track
//! their active children. Counters only move through atomic deltas; nothing
//! ever reads, adds and writes back.
//!
//! When a delta lands exactly on a threshold the parent's status transition
//! fires. The transition runs outside the delta's write, is retried with
//! backoff and must be idempotent, so firing more than once per crossing is
//! harmless. If it keeps failing the delta stays committed and the caller gets
//! [`CoreError::ThresholdActionFailed`]; [`AggregateCounterCascade::redrive_threshold`]
//! recovers by re-reading the counter.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::domain::{Collection, CounterField, DocumentFilter, DocumentKey};

use super::retry::{is_retryable, Retry, RetryConfig};
use super::{CoreError, DocumentStore, Result, ThresholdAction};

/// Whether a threshold action ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdOutcome {
    NotReached,
    Fired,
}

/// Counter value after a delta and what happened at the threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeOutcome {
    pub value: i64,
    pub threshold: ThresholdOutcome,
}

/// Stored counter versus the live child count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterDrift {
    pub stored: i64,
    pub derived: i64,
}

impl CounterDrift {
    pub fn is_consistent(&self) -> bool {
        self.stored == self.derived
    }

    /// Delta that would bring the stored value in line
    pub fn correction(&self) -> i64 {
        self.derived - self.stored
    }
}

/// Applies counter deltas and fires threshold actions
pub struct AggregateCounterCascade<S: DocumentStore> {
    store: Arc<S>,
    retry: RetryConfig,
}

impl<S: DocumentStore> Clone for AggregateCounterCascade<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            retry: self.retry.clone(),
        }
    }
}

impl<S: DocumentStore> AggregateCounterCascade<S> {
    pub fn new(store: Arc<S>, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    /// Atomically add `delta` to a parent counter and return the new value
    #[instrument(skip(self, parent), fields(parent = %parent, counter = %counter))]
    pub async fn apply_delta(
        &self,
        parent: &DocumentKey,
        counter: CounterField,
        delta: i64,
    ) -> Result<i64> {
        let value = self
            .store
            .increment_field(parent, counter.as_str(), delta, None)
            .await?;
        Self::check_underflow(parent, counter, value);
        Ok(value)
    }

    /// Same as [`apply_delta`](Self::apply_delta) inside a workflow session
    pub async fn apply_delta_in(
        &self,
        parent: &DocumentKey,
        counter: CounterField,
        delta: i64,
        session: &mut S::Session,
    ) -> Result<i64> {
        let value = self
            .store
            .increment_field(parent, counter.as_str(), delta, Some(session))
            .await?;
        Self::check_underflow(parent, counter, value);
        Ok(value)
    }

    /// Fire `action` if `value` equals `threshold`.
    ///
    /// `value` must be the post-update value returned by a delta, never a
    /// separate read.
    #[instrument(skip(self, parent, action), fields(parent = %parent, counter = %counter))]
    pub async fn on_threshold_reached(
        &self,
        parent: &DocumentKey,
        counter: CounterField,
        value: i64,
        threshold: i64,
        action: &dyn ThresholdAction,
    ) -> Result<ThresholdOutcome> {
        if value != threshold {
            return Ok(ThresholdOutcome::NotReached);
        }

        let context = format!("threshold {parent}.{counter}={threshold}");
        let result = Retry::new(self.retry.clone())
            .run_with_context(&context, || action.fire(parent), is_retryable)
            .await;
        let attempts = result.attempts;

        match result.into_result() {
            Ok(()) => {
                info!(value, attempts, "Threshold action fired");
                Ok(ThresholdOutcome::Fired)
            }
            Err(e) => {
                warn!(
                    value,
                    attempts,
                    error = %e,
                    "Threshold action failed; counter change retained"
                );
                Err(CoreError::ThresholdActionFailed {
                    parent: parent.to_string(),
                    counter: counter.to_string(),
                    value,
                    source: Box::new(e),
                })
            }
        }
    }

    /// Apply a delta then check the returned value against `threshold`
    pub async fn apply_delta_with_threshold(
        &self,
        parent: &DocumentKey,
        counter: CounterField,
        delta: i64,
        threshold: i64,
        action: &dyn ThresholdAction,
    ) -> Result<CascadeOutcome> {
        let value = self.apply_delta(parent, counter, delta).await?;
        let threshold = self
            .on_threshold_reached(parent, counter, value, threshold, action)
            .await?;
        Ok(CascadeOutcome { value, threshold })
    }

    /// Re-read the counter and fire `action` if it sits at `threshold`.
    ///
    /// Recovery path after [`CoreError::ThresholdActionFailed`]; no delta is
    /// replayed.
    pub async fn redrive_threshold(
        &self,
        parent: &DocumentKey,
        counter: CounterField,
        threshold: i64,
        action: &dyn ThresholdAction,
    ) -> Result<ThresholdOutcome> {
        let value = self.read_counter(parent, counter).await?;
        self.on_threshold_reached(parent, counter, value, threshold, action)
            .await
    }

    /// Compare a stored counter against the number of `children` matching
    /// `filter`. Read only.
    pub async fn verify_counter(
        &self,
        parent: &DocumentKey,
        counter: CounterField,
        children: Collection,
        filter: &DocumentFilter,
    ) -> Result<CounterDrift> {
        let stored = self.read_counter(parent, counter).await?;
        let derived = self.store.count(children, filter).await? as i64;
        let drift = CounterDrift { stored, derived };

        if !drift.is_consistent() {
            warn!(
                parent = %parent,
                counter = %counter,
                stored,
                derived,
                "Counter drift detected"
            );
        }
        Ok(drift)
    }

    async fn read_counter(&self, parent: &DocumentKey, counter: CounterField) -> Result<i64> {
        let doc = self
            .store
            .find(parent, None)
            .await?
            .ok_or_else(|| CoreError::not_found(parent.collection, parent.id.clone()))?;
        Ok(doc.field_i64(counter.as_str()).unwrap_or(0))
    }

    fn check_underflow(parent: &DocumentKey, counter: CounterField, value: i64) {
        if value < 0 {
            warn!(parent = %parent, counter = %counter, value, "Counter went negative");
        }
    }
}

/// Writes a fixed value to one parent field
pub struct SetFieldAction<S: DocumentStore> {
    store: Arc<S>,
    field: String,
    value: Value,
}

impl<S: DocumentStore> SetFieldAction<S> {
    pub fn new(store: Arc<S>, field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            store,
            field: field.into(),
            value: value.into(),
        }
    }
}

#[async_trait]
impl<S: DocumentStore> ThresholdAction for SetFieldAction<S> {
    async fn fire(&self, parent: &DocumentKey) -> Result<()> {
        self.store
            .set_field(parent, &self.field, &self.value, None)
            .await
    }
}
