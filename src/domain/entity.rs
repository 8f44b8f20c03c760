//! Entity kinds and the documents minted for them
//!
//! Every entity gets a human-readable id from its own sequence
//! (`STR-000001`, `TSK-000042`, ...). The id doubles as the document id in the
//! entity's collection, so it is unique within the type and never rewritten.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::{Collection, CounterField, Document, EntityStatus, SequenceName};

/// Entity types whose ids come from the sequence allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Address,
    Model,
    Purchase,
    ServiceCenter,
    Store,
    Task,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Address => "address",
            EntityKind::Model => "model",
            EntityKind::Purchase => "purchase",
            EntityKind::ServiceCenter => "service_center",
            EntityKind::Store => "store",
            EntityKind::Task => "task",
        }
    }

    pub fn collection(&self) -> Collection {
        match self {
            EntityKind::Address => Collection::Addresses,
            EntityKind::Model => Collection::Models,
            EntityKind::Purchase => Collection::Purchases,
            EntityKind::ServiceCenter => Collection::ServiceCenters,
            EntityKind::Store => Collection::Stores,
            EntityKind::Task => Collection::Tasks,
        }
    }

    pub fn sequence_name(&self) -> SequenceName {
        let name = match self {
            EntityKind::Address => "ADDRESS",
            EntityKind::Model => "MODEL",
            EntityKind::Purchase => "PURCHASE",
            EntityKind::ServiceCenter => "SERVICE_CENTER",
            EntityKind::Store => "STORE",
            EntityKind::Task => "TASK",
        };
        SequenceName::new(name)
    }

    pub fn id_prefix(&self) -> &'static str {
        match self {
            EntityKind::Address => "ADR",
            EntityKind::Model => "MDL",
            EntityKind::Purchase => "PUR",
            EntityKind::ServiceCenter => "SVC",
            EntityKind::Store => "STR",
            EntityKind::Task => "TSK",
        }
    }

    /// Render a sequence value as the entity's human-readable id
    pub fn format_id(&self, value: u64) -> String {
        format!("{}-{:06}", self.id_prefix(), value)
    }

    /// Company counter that tracks active children of this kind.
    ///
    /// Tasks roll up into complaints and are handled by the task flow.
    pub fn company_counter(&self) -> Option<CounterField> {
        match self {
            EntityKind::Store => Some(CounterField::Stores),
            EntityKind::ServiceCenter => Some(CounterField::ServiceCenters),
            EntityKind::Model => Some(CounterField::Products),
            EntityKind::Address | EntityKind::Purchase | EntityKind::Task => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Field on child documents pointing at the owning company
pub const COMPANY_REF_FIELD: &str = "company_id";

/// Field on task documents pointing at the owning complaint
pub const COMPLAINT_REF_FIELD: &str = "complaint_id";

/// Entity payload waiting for its id
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDraft {
    pub kind: EntityKind,
    pub created_by: String,
    pub payload: Map<String, Value>,
}

impl EntityDraft {
    pub fn new(kind: EntityKind, created_by: impl Into<String>) -> Self {
        Self {
            kind,
            created_by: created_by.into(),
            payload: Map::new(),
        }
    }

    /// Set a payload field
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(field.into(), value.into());
        self
    }

    pub fn field_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(Value::as_str)
    }

    /// Build the stored document once an id has been allocated.
    ///
    /// Reserved fields (`entity_id`, `status`, audit fields) always win over
    /// payload fields of the same name.
    pub fn into_document(self, sequence_value: u64) -> Document {
        let entity_id = self.kind.format_id(sequence_value);
        let mut body = self.payload;
        body.insert("entity_id".to_string(), Value::from(entity_id.clone()));
        body.insert("status".to_string(), EntityStatus::Active.to_json());
        body.insert("created_by".to_string(), Value::from(self.created_by.clone()));
        body.insert("updated_by".to_string(), Value::from(self.created_by));
        Document::new(self.kind.collection(), entity_id, Value::Object(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_id_pads_sequence_value() {
        assert_eq!(EntityKind::Store.format_id(1), "STR-000001");
        assert_eq!(EntityKind::Task.format_id(1_234_567), "TSK-1234567");
    }

    #[test]
    fn test_draft_reserved_fields_override_payload() {
        let doc = EntityDraft::new(EntityKind::Store, "user-1")
            .with("name", "Main Street")
            .with("status", 0)
            .with("entity_id", "forged")
            .into_document(7);

        assert_eq!(doc.id, "STR-000007");
        assert_eq!(doc.collection, Collection::Stores);
        assert_eq!(doc.field_str("entity_id"), Some("STR-000007"));
        assert_eq!(doc.status(), Some(EntityStatus::Active));
        assert_eq!(doc.field_str("name"), Some("Main Street"));
    }

    #[test]
    fn test_sequence_names_are_distinct() {
        let kinds = [
            EntityKind::Address,
            EntityKind::Model,
            EntityKind::Purchase,
            EntityKind::ServiceCenter,
            EntityKind::Store,
            EntityKind::Task,
        ];
        let names: std::collections::HashSet<_> =
            kinds.iter().map(|k| k.sequence_name()).collect();
        assert_eq!(names.len(), kinds.len());
    }
}
