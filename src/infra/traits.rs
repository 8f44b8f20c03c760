//! Trait definitions for the warranty core seams

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde_json::Value;

use crate::domain::{
    Collection, Document, DocumentFilter, DocumentKey, PermissionSet, RoleId, RoleSpec,
    SequenceName,
};

use super::Result;

/// Transactional document store.
///
/// Every mutating operation takes an optional session. With a session the
/// write joins that transaction and is undone if it aborts; without one it
/// autocommits. Dropping a session without committing rolls it back.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Transaction context handed to workflow steps
    type Session: Send;

    /// Start a new transaction session
    async fn start_session(&self) -> Result<Self::Session>;

    /// Commit and end the session
    async fn commit_session(&self, session: Self::Session) -> Result<()>;

    /// Abort and end the session, undoing its writes
    async fn abort_session(&self, session: Self::Session) -> Result<()>;

    /// Atomically increment a sequence counter and return the new value.
    ///
    /// A missing counter starts at 0, so the first call returns 1.
    async fn increment_sequence(
        &self,
        name: &SequenceName,
        session: Option<&mut Self::Session>,
    ) -> Result<u64>;

    /// Decrement a sequence counter by one only while it still equals
    /// `expected_head`. Returns whether the rewind happened.
    async fn rewind_sequence(&self, name: &SequenceName, expected_head: u64) -> Result<bool>;

    /// Current value of a sequence counter (0 when absent)
    async fn sequence_head(&self, name: &SequenceName) -> Result<u64>;

    /// Insert a new document; an existing key is a `DuplicateEntity`
    async fn insert(&self, document: &Document, session: Option<&mut Self::Session>)
        -> Result<()>;

    /// Read a document by key
    async fn find(
        &self,
        key: &DocumentKey,
        session: Option<&mut Self::Session>,
    ) -> Result<Option<Document>>;

    /// Read the first document matching a filter
    async fn find_one(
        &self,
        collection: Collection,
        filter: &DocumentFilter,
        session: Option<&mut Self::Session>,
    ) -> Result<Option<Document>>;

    /// Count documents matching a filter
    async fn count(&self, collection: Collection, filter: &DocumentFilter) -> Result<u64>;

    /// Atomically add `delta` to an integer field and return the new value.
    ///
    /// A missing field counts as 0.
    async fn increment_field(
        &self,
        key: &DocumentKey,
        field: &str,
        delta: i64,
        session: Option<&mut Self::Session>,
    ) -> Result<i64>;

    /// Overwrite a top-level field
    async fn set_field(
        &self,
        key: &DocumentKey,
        field: &str,
        value: &Value,
        session: Option<&mut Self::Session>,
    ) -> Result<()>;

    /// Overwrite a top-level field only while the document matches every
    /// condition of `guard`, in one statement. Returns whether the write
    /// happened.
    async fn set_field_if(
        &self,
        key: &DocumentKey,
        guard: &DocumentFilter,
        field: &str,
        value: &Value,
        session: Option<&mut Self::Session>,
    ) -> Result<bool>;
}

/// Creates roles and attaches their permission sets.
///
/// Both operations must write through the caller's session so a role never
/// commits without its permissions.
#[async_trait]
pub trait RoleProvisioner<S: DocumentStore>: Send + Sync {
    /// Create a role document
    async fn create_role(
        &self,
        spec: &RoleSpec,
        created_by: &str,
        session: &mut S::Session,
    ) -> Result<RoleId>;

    /// Attach a permission set to a role
    async fn attach_permissions(
        &self,
        permissions: &PermissionSet,
        role_id: &RoleId,
        created_by: &str,
        session: &mut S::Session,
    ) -> Result<()>;
}

/// Side effect fired when a parent counter reaches its threshold.
///
/// Implementations must be idempotent: firing twice for the same counter
/// value leaves the parent in the same state as firing once.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ThresholdAction: Send + Sync {
    /// Apply the transition to the parent document
    async fn fire(&self, parent: &DocumentKey) -> Result<()>;
}
