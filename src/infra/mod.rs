//! Infrastructure layer for the warranty core
//!
//! Contains the storage seams and the components built on them:
//! - Document stores (PostgreSQL, SQLite)
//! - Sequence allocator with reservation-based compensation
//! - Transactional workflow runner
//! - Aggregate counter cascade and threshold actions
//! - Document-backed role provisioning

mod cascade;
mod error;
pub mod postgres;
pub mod retry;
mod roles;
mod sequence;
pub mod sqlite;
mod traits;
mod workflow;

pub use cascade::{
    AggregateCounterCascade, CascadeOutcome, CounterDrift, SetFieldAction, ThresholdOutcome,
};
pub use error::*;
pub use postgres::PgDocumentStore;
pub use retry::RetryConfig;
pub use roles::DocumentRoleProvisioner;
pub use sequence::{
    CompensationOutcome, ReservationState, SequenceAllocator, SequenceReservation,
};
pub use sqlite::SqliteDocumentStore;
pub use traits::*;
pub use workflow::{
    FnStep, StepFuture, StepOutcome, TransactionalWorkflow, WorkflowStep, WorkflowUnit,
};
