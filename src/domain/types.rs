//! Core type definitions for the warranty core
//!
//! Collections, document keys, sequence names and counter fields shared by
//! the allocator, the workflow runner and the counter cascade.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Document collection inside the shared store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Companies,
    Complaints,
    Addresses,
    Models,
    Purchases,
    ServiceCenters,
    Stores,
    Tasks,
    Roles,
    Permissions,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Companies => "companies",
            Collection::Complaints => "complaints",
            Collection::Addresses => "addresses",
            Collection::Models => "models",
            Collection::Purchases => "purchases",
            Collection::ServiceCenters => "service_centers",
            Collection::Stores => "stores",
            Collection::Tasks => "tasks",
            Collection::Roles => "roles",
            Collection::Permissions => "permissions",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Address of a single document: collection plus id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentKey {
    pub collection: Collection,
    pub id: String,
}

impl DocumentKey {
    pub fn new(collection: Collection, id: impl Into<String>) -> Self {
        Self {
            collection,
            id: id.into(),
        }
    }

    pub fn company(id: impl Into<String>) -> Self {
        Self::new(Collection::Companies, id)
    }

    pub fn complaint(id: impl Into<String>) -> Self {
        Self::new(Collection::Complaints, id)
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Name of an identifier sequence (one per entity type)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceName(pub String);

impl SequenceName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SequenceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SequenceName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SequenceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Soft-delete flag carried by every entity document.
/// 1 = active, 0 = inactive; documents are never physically removed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde_repr::Serialize_repr, serde_repr::Deserialize_repr,
)]
#[repr(u8)]
pub enum EntityStatus {
    Inactive = 0,
    Active = 1,
}

impl EntityStatus {
    pub fn as_i64(&self) -> i64 {
        match self {
            EntityStatus::Inactive => 0,
            EntityStatus::Active => 1,
        }
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(EntityStatus::Inactive),
            1 => Some(EntityStatus::Active),
            _ => None,
        }
    }

    /// Counter delta applied to a parent when a child moves into this status
    pub fn counter_delta(&self) -> i64 {
        match self {
            EntityStatus::Active => 1,
            EntityStatus::Inactive => -1,
        }
    }

    pub fn to_json(self) -> serde_json::Value {
        serde_json::Value::from(self.as_i64())
    }
}

impl Default for EntityStatus {
    fn default() -> Self {
        EntityStatus::Active
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityStatus::Active => write!(f, "active"),
            EntityStatus::Inactive => write!(f, "inactive"),
        }
    }
}

/// Derived counter carried by a counter holder (Company, Complaint)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterField {
    Stores,
    ServiceCenters,
    Products,
    TasksPending,
    TasksCompleted,
    TasksAssigned,
}

impl CounterField {
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterField::Stores => "stores",
            CounterField::ServiceCenters => "service_centers",
            CounterField::Products => "products",
            CounterField::TasksPending => "tasks_pending",
            CounterField::TasksCompleted => "tasks_completed",
            CounterField::TasksAssigned => "tasks_assigned",
        }
    }

    pub fn company_counters() -> [CounterField; 3] {
        [
            CounterField::Stores,
            CounterField::ServiceCenters,
            CounterField::Products,
        ]
    }

    pub fn complaint_counters() -> [CounterField; 3] {
        [
            CounterField::TasksPending,
            CounterField::TasksCompleted,
            CounterField::TasksAssigned,
        ]
    }
}

impl fmt::Display for CounterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Role identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleId(pub uuid::Uuid);

impl RoleId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn from_uuid(id: uuid::Uuid) -> Self {
        Self(id)
    }
}

impl Default for RoleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
