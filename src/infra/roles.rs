//! Document-backed role provisioning
//!
//! A role is one document in `roles`; each capability of its permission set
//! is one document in `permissions` pointing back at the role. Both writes go
//! through the caller's session.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::instrument;

use crate::domain::{Collection, Document, EntityStatus, PermissionSet, RoleId, RoleSpec};

use super::{CoreError, DocumentStore, Result, RoleProvisioner};

/// Stores roles and permissions as documents in the same store
pub struct DocumentRoleProvisioner<S: DocumentStore> {
    store: Arc<S>,
}

impl<S: DocumentStore> DocumentRoleProvisioner<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: DocumentStore> RoleProvisioner<S> for DocumentRoleProvisioner<S> {
    #[instrument(skip(self, spec, session), fields(role = %spec.name))]
    async fn create_role(
        &self,
        spec: &RoleSpec,
        created_by: &str,
        session: &mut S::Session,
    ) -> Result<RoleId> {
        let role_id = RoleId::new();
        let doc = Document::new(
            Collection::Roles,
            role_id.to_string(),
            json!({
                "name": spec.name,
                "template": spec.template.as_str(),
                "owner_collection": spec.owner.collection.as_str(),
                "owner_id": spec.owner.id,
                "created_by": created_by,
                "status": EntityStatus::Active.as_i64(),
            }),
        );
        self.store.insert(&doc, Some(session)).await?;
        Ok(role_id)
    }

    #[instrument(skip(self, permissions, session), fields(role_id = %role_id, count = permissions.len()))]
    async fn attach_permissions(
        &self,
        permissions: &PermissionSet,
        role_id: &RoleId,
        created_by: &str,
        session: &mut S::Session,
    ) -> Result<()> {
        if permissions.is_empty() {
            return Err(CoreError::InvalidDocument(format!(
                "empty permission set for role {role_id}"
            )));
        }

        for capability in permissions.capabilities() {
            let doc = Document::new(
                Collection::Permissions,
                format!("{}:{}", role_id, capability.resource),
                json!({
                    "role_id": role_id.to_string(),
                    "resource": capability.resource,
                    "actions": capability.actions,
                    "created_by": created_by,
                }),
            );
            self.store.insert(&doc, Some(&mut *session)).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DocumentFilter, DocumentKey, RoleTemplate};
    use crate::infra::SqliteDocumentStore;

    #[tokio::test]
    async fn test_role_and_permissions_written_in_session() {
        let store = Arc::new(SqliteDocumentStore::in_memory().await.unwrap());
        let provisioner = DocumentRoleProvisioner::new(store.clone());
        let spec = RoleSpec::new(
            RoleTemplate::StoreManager,
            DocumentKey::new(Collection::Stores, "STR-000001"),
        );

        let mut session = store.start_session().await.unwrap();
        let role_id = provisioner
            .create_role(&spec, "admin", &mut session)
            .await
            .unwrap();
        provisioner
            .attach_permissions(
                &PermissionSet::for_template(RoleTemplate::StoreManager),
                &role_id,
                "admin",
                &mut session,
            )
            .await
            .unwrap();
        store.commit_session(session).await.unwrap();

        let role = store
            .find(&DocumentKey::new(Collection::Roles, role_id.to_string()), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(role.field_str("name"), Some("store_manager:STR-000001"));

        let filter = DocumentFilter::new().eq("role_id", role_id.to_string());
        assert_eq!(
            store.count(Collection::Permissions, &filter).await.unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn test_empty_permission_set_rejected() {
        let store = Arc::new(SqliteDocumentStore::in_memory().await.unwrap());
        let provisioner = DocumentRoleProvisioner::new(store.clone());

        let mut session = store.start_session().await.unwrap();
        let err = provisioner
            .attach_permissions(&PermissionSet::default(), &RoleId::new(), "admin", &mut session)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidDocument(_)));
    }
}
