//! Counter holders: companies and complaints
//!
//! Counters on these documents are derived state. They only ever move through
//! atomic increments; complaint status is a pure function of the task counters.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use super::{Collection, CounterField, Document, EntityStatus};

/// Field holding a complaint's status
pub const COMPLAINT_STATUS_FIELD: &str = "complaint_status";

/// Field holding a task's work state
pub const TASK_STATE_FIELD: &str = "task_state";

/// Complaint lifecycle derived from its task counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplaintStatus {
    Open,
    InProgress,
    Completed,
}

impl ComplaintStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplaintStatus::Open => "open",
            ComplaintStatus::InProgress => "in_progress",
            ComplaintStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(ComplaintStatus::Open),
            "in_progress" => Some(ComplaintStatus::InProgress),
            "completed" => Some(ComplaintStatus::Completed),
            _ => None,
        }
    }

    /// Status implied by the task counters
    pub fn derive(tasks_pending: i64, tasks_completed: i64) -> Self {
        if tasks_pending > 0 {
            ComplaintStatus::InProgress
        } else if tasks_completed > 0 {
            ComplaintStatus::Completed
        } else {
            ComplaintStatus::Open
        }
    }

    pub fn to_json(self) -> Value {
        Value::from(self.as_str())
    }
}

impl fmt::Display for ComplaintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Work state of a task, separate from its soft-delete flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Completed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskState::Pending),
            "completed" => Some(TaskState::Completed),
            _ => None,
        }
    }

    /// Complaint counter that counts active tasks in this state
    pub fn counter(&self) -> CounterField {
        match self {
            TaskState::Pending => CounterField::TasksPending,
            TaskState::Completed => CounterField::TasksCompleted,
        }
    }

    pub fn to_json(self) -> Value {
        Value::from(self.as_str())
    }
}

fn holder_body(counters: &[CounterField], mut payload: Map<String, Value>) -> Map<String, Value> {
    for counter in counters {
        payload.insert(counter.as_str().to_string(), Value::from(0));
    }
    payload.insert("status".to_string(), EntityStatus::Active.to_json());
    payload
}

/// New company document with zeroed counters
pub fn company_document(
    name: &str,
    phone: &str,
    created_by: &str,
    mut payload: Map<String, Value>,
) -> Document {
    payload.insert("name".to_string(), Value::from(name));
    payload.insert("phone".to_string(), Value::from(phone));
    payload.insert("created_by".to_string(), Value::from(created_by));
    let body = holder_body(&CounterField::company_counters(), payload);
    Document::new(
        Collection::Companies,
        Uuid::new_v4().to_string(),
        Value::Object(body),
    )
}

/// New complaint document with zeroed task counters
pub fn complaint_document(
    company_id: &str,
    purchase_id: &str,
    created_by: &str,
    mut payload: Map<String, Value>,
) -> Document {
    payload.insert("company_id".to_string(), Value::from(company_id));
    payload.insert("purchase_id".to_string(), Value::from(purchase_id));
    payload.insert("created_by".to_string(), Value::from(created_by));
    payload.insert(
        COMPLAINT_STATUS_FIELD.to_string(),
        ComplaintStatus::Open.to_json(),
    );
    let body = holder_body(&CounterField::complaint_counters(), payload);
    Document::new(
        Collection::Complaints,
        Uuid::new_v4().to_string(),
        Value::Object(body),
    )
}
