//! Warranty flows built on the core components
//!
//! - [`ProvisioningService`] - companies, stores and service centers with
//!   their roles, each as one workflow unit
//! - [`RegistrationService`] - addresses, models and purchases through id
//!   reservations
//! - [`LifecycleService`] - soft delete and restore with counter cascades
//! - [`TaskService`] - complaints, tasks and derived complaint status

mod lifecycle;
mod provisioning;
mod registration;
pub mod steps;
mod tasks;

pub use lifecycle::{LifecycleService, StatusChange};
pub use provisioning::{Provisioned, ProvisioningService};
pub use registration::{RegisteredModel, RegistrationService};
pub use steps::FlowState;
pub use tasks::{ReconcileComplaintStatus, TaskCompletion, TaskCreated, TaskService};
