//! Stored documents and equality filters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Collection, DocumentKey, EntityStatus};

/// A document in the shared store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub collection: Collection,
    pub id: String,
    pub body: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Create a new document stamped with the current time
    pub fn new(collection: Collection, id: impl Into<String>, body: Value) -> Self {
        let now = Utc::now();
        Self {
            collection,
            id: id.into(),
            body,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> DocumentKey {
        DocumentKey::new(self.collection, self.id.clone())
    }

    pub fn field(&self, field: &str) -> Option<&Value> {
        self.body.get(field)
    }

    pub fn field_i64(&self, field: &str) -> Option<i64> {
        self.body.get(field).and_then(Value::as_i64)
    }

    pub fn field_str(&self, field: &str) -> Option<&str> {
        self.body.get(field).and_then(Value::as_str)
    }

    /// Soft-delete flag; `None` for documents that do not carry one
    pub fn status(&self) -> Option<EntityStatus> {
        self.field_i64("status").and_then(EntityStatus::from_i64)
    }

    pub fn is_active(&self) -> bool {
        DocumentFilter::new().active().matches(&self.body)
    }
}

/// Conjunction of top-level field equality conditions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentFilter {
    conditions: Vec<(String, Value)>,
}

impl DocumentFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field == value`
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    /// Only match documents whose soft-delete flag is active
    pub fn active(self) -> Self {
        self.eq("status", EntityStatus::Active.to_json())
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Evaluate the filter against a document body
    pub fn matches(&self, body: &Value) -> bool {
        self.conditions
            .iter()
            .all(|(field, expected)| body.get(field) == Some(expected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_matches_all_conditions() {
        let filter = DocumentFilter::new().eq("phone", "555-0100").active();

        assert!(filter.matches(&json!({"phone": "555-0100", "status": 1})));
        assert!(!filter.matches(&json!({"phone": "555-0100", "status": 0})));
        assert!(!filter.matches(&json!({"phone": "555-0199", "status": 1})));
    }

    #[test]
    fn test_document_status_accessors() {
        let doc = Document::new(
            Collection::Stores,
            "STR-000001",
            json!({"status": 1, "stores": 4}),
        );
        assert!(doc.is_active());
        assert_eq!(doc.field_i64("stores"), Some(4));
        assert_eq!(doc.key(), DocumentKey::new(Collection::Stores, "STR-000001"));
    }
}
