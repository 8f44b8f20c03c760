//! Error types for the warranty core

use std::fmt;

use thiserror::Error;

/// Errors returned by the allocator, the workflow runner and the cascade
#[derive(Error, Debug)]
pub enum CoreError {
    /// Storage transport or database fault
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] sqlx::Error),

    /// A uniqueness precondition failed before any write
    #[error("duplicate entity in {collection}: {detail}")]
    DuplicateEntity { collection: String, detail: String },

    /// Document not found
    #[error("document not found: {collection}/{id}")]
    DocumentNotFound { collection: String, id: String },

    /// Stored or supplied document has an unexpected shape
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// Invalid state transition
    #[error("invalid state transition for {entity}: {from} -> {to}")]
    InvalidStateTransition {
        entity: String,
        from: String,
        to: String,
    },

    /// A step of a workflow unit failed; the unit was aborted
    #[error("workflow {unit} failed at step {position} ({step}): {failure}")]
    WorkflowStepFailed {
        unit: String,
        step: String,
        position: usize,
        failure: Box<StepFailure>,
    },

    /// Workflow unit without steps
    #[error("workflow {0} has no steps")]
    EmptyWorkflow(String),

    /// Threshold side effect failed after the counter delta was committed
    #[error("threshold action on {parent}.{counter} at {value} failed: {source}")]
    ThresholdActionFailed {
        parent: String,
        counter: String,
        value: i64,
        source: Box<CoreError>,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn not_found(collection: impl fmt::Display, id: impl Into<String>) -> Self {
        CoreError::DocumentNotFound {
            collection: collection.to_string(),
            id: id.into(),
        }
    }

    pub fn duplicate(collection: impl fmt::Display, detail: impl Into<String>) -> Self {
        CoreError::DuplicateEntity {
            collection: collection.to_string(),
            detail: detail.into(),
        }
    }

    /// Failure payload of a failed workflow step, if this is one
    pub fn step_failure(&self) -> Option<&StepFailure> {
        match self {
            CoreError::WorkflowStepFailed { failure, .. } => Some(failure),
            _ => None,
        }
    }
}

/// Why a workflow step failed.
///
/// Steps may fail by returning an error or by rejecting with an explicit
/// payload; the runner treats both the same and hands the payload back as is.
#[derive(Debug)]
pub enum StepFailure {
    Error(CoreError),
    Rejected(serde_json::Value),
}

impl StepFailure {
    pub fn rejection(&self) -> Option<&serde_json::Value> {
        match self {
            StepFailure::Rejected(payload) => Some(payload),
            StepFailure::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&CoreError> {
        match self {
            StepFailure::Error(e) => Some(e),
            StepFailure::Rejected(_) => None,
        }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepFailure::Error(e) => write!(f, "{e}"),
            StepFailure::Rejected(payload) => write!(f, "rejected: {payload}"),
        }
    }
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
