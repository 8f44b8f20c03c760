//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Map;

use warranty_core::domain::{
    Collection, Document, DocumentFilter, DocumentKey, EntityDraft, EntityKind, PermissionSet,
    RoleId, RoleSpec,
};
use warranty_core::flows::{ProvisioningService, TaskService};
use warranty_core::infra::{
    CoreError, DocumentRoleProvisioner, DocumentStore, Result, RetryConfig, RoleProvisioner,
    SqliteDocumentStore,
};

pub type Store = SqliteDocumentStore;

/// Fresh migrated in-memory store
pub async fn memory_store() -> Arc<Store> {
    Arc::new(Store::in_memory().await.unwrap())
}

/// Provisioning service over the document-backed role provisioner
pub fn provisioning(store: &Arc<Store>) -> ProvisioningService<Store> {
    let roles: Arc<dyn RoleProvisioner<Store>> =
        Arc::new(DocumentRoleProvisioner::new(store.clone()));
    ProvisioningService::new(store.clone(), roles, RetryConfig::fast())
}

pub fn tasks(store: &Arc<Store>) -> TaskService<Store> {
    TaskService::new(store.clone(), RetryConfig::fast())
}

pub fn store_draft(name: &str, phone: &str) -> EntityDraft {
    EntityDraft::new(EntityKind::Store, "admin")
        .with("name", name)
        .with("phone", phone)
}

pub fn task_draft(summary: &str) -> EntityDraft {
    EntityDraft::new(EntityKind::Task, "agent").with("summary", summary)
}

/// Create a company and return its key
pub async fn seed_company(store: &Arc<Store>, phone: &str) -> DocumentKey {
    provisioning(store)
        .create_company("Acme", phone, "admin", Map::new())
        .await
        .unwrap()
        .key
}

pub async fn load(store: &Arc<Store>, key: &DocumentKey) -> Document {
    store.find(key, None).await.unwrap().unwrap()
}

pub async fn count(store: &Arc<Store>, collection: Collection) -> u64 {
    store
        .count(collection, &DocumentFilter::new())
        .await
        .unwrap()
}

/// Role provisioner whose permission attach always fails after the role
/// has been written
pub struct FailingAttachProvisioner<S: DocumentStore> {
    inner: DocumentRoleProvisioner<S>,
    pub attach_calls: AtomicUsize,
}

impl<S: DocumentStore> FailingAttachProvisioner<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            inner: DocumentRoleProvisioner::new(store),
            attach_calls: AtomicUsize::new(0),
        }
    }

    pub fn attach_calls(&self) -> usize {
        self.attach_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: DocumentStore> RoleProvisioner<S> for FailingAttachProvisioner<S> {
    async fn create_role(
        &self,
        spec: &RoleSpec,
        created_by: &str,
        session: &mut S::Session,
    ) -> Result<RoleId> {
        self.inner.create_role(spec, created_by, session).await
    }

    async fn attach_permissions(
        &self,
        _permissions: &PermissionSet,
        role_id: &RoleId,
        _created_by: &str,
        _session: &mut S::Session,
    ) -> Result<()> {
        self.attach_calls.fetch_add(1, Ordering::SeqCst);
        Err(CoreError::Internal(format!(
            "permission service unavailable for role {role_id}"
        )))
    }
}
