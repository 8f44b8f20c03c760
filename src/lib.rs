//! Warranty Core Library
//!
//! Identifier allocation and cross-collection consistency for a multi-tenant
//! warranty backend.
//!
//! ## Modules
//!
//! - [`domain`] - Documents, entity kinds, counter holders, role templates
//! - [`infra`] - Document stores, sequence allocator, workflow runner, counter cascade
//! - [`flows`] - Provisioning, registration, lifecycle and task flows
//! - [`config`] - Environment configuration
//! - [`telemetry`] - Structured logging setup

pub mod config;
pub mod domain;
pub mod flows;
pub mod infra;
pub mod migrations;
pub mod telemetry;

// Re-export commonly used types
pub use domain::{
    Collection, CounterField, Document, DocumentFilter, DocumentKey, EntityDraft, EntityKind,
    EntityStatus, SequenceName,
};

pub use infra::{
    AggregateCounterCascade, CoreError, DocumentStore, Result, RoleProvisioner,
    SequenceAllocator, ThresholdAction, TransactionalWorkflow,
};
