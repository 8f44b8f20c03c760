//! Store provisioning as a single unit: id, entity, counter and role.

mod common;

use std::sync::Arc;

use warranty_core::domain::{Collection, DocumentFilter, EntityKind};
use warranty_core::flows::ProvisioningService;
use warranty_core::infra::{CoreError, DocumentStore, RetryConfig, RoleProvisioner};

use common::{FailingAttachProvisioner, Store};

#[tokio::test]
async fn test_store_creation_is_consistent() {
    let store = common::memory_store().await;
    let company = common::seed_company(&store, "555-0100").await;
    let service = common::provisioning(&store);

    let created = service
        .create_store(&company.id, common::store_draft("Main Street", "555-0101"))
        .await
        .unwrap();

    assert_eq!(created.key.id, "STR-000001");
    assert_eq!(created.parent_counter, Some(1));

    let company_doc = common::load(&store, &company).await;
    assert_eq!(company_doc.field_i64("stores"), Some(1));

    let store_doc = common::load(&store, &created.key).await;
    assert_eq!(store_doc.field_str("entity_id"), Some("STR-000001"));
    assert_eq!(store_doc.field_str("company_id"), Some(company.id.as_str()));
    assert!(store_doc.is_active());

    let role = store
        .find_one(
            Collection::Roles,
            &DocumentFilter::new().eq("owner_id", "STR-000001"),
            None,
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(role.field_str("template"), Some("store_manager"));

    let permissions = store
        .count(
            Collection::Permissions,
            &DocumentFilter::new().eq("role_id", created.role_id.to_string()),
        )
        .await
        .unwrap();
    assert_eq!(permissions, 3);
}

#[tokio::test]
async fn test_failed_permission_attach_leaves_nothing_behind() {
    let store = common::memory_store().await;
    let company = common::seed_company(&store, "555-0100").await;
    let roles_before = common::count(&store, Collection::Roles).await;

    let failing = Arc::new(FailingAttachProvisioner::new(store.clone()));
    let roles: Arc<dyn RoleProvisioner<Store>> = failing.clone();
    let service = ProvisioningService::new(store.clone(), roles, RetryConfig::fast());

    let err = service
        .create_store(&company.id, common::store_draft("Main Street", "555-0101"))
        .await
        .unwrap_err();

    match &err {
        CoreError::WorkflowStepFailed {
            step, position, failure, ..
        } => {
            assert_eq!(step, "provision_role");
            assert_eq!(*position, 3);
            assert!(matches!(failure.error(), Some(CoreError::Internal(_))));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(failing.attach_calls(), 1);

    assert_eq!(common::count(&store, Collection::Stores).await, 0);
    assert_eq!(common::count(&store, Collection::Roles).await, roles_before);
    assert_eq!(
        common::load(&store, &company).await.field_i64("stores"),
        Some(0)
    );
    assert_eq!(
        store
            .sequence_head(&EntityKind::Store.sequence_name())
            .await
            .unwrap(),
        0
    );

    // A later success takes the first id.
    let created = common::provisioning(&store)
        .create_store(&company.id, common::store_draft("Main Street", "555-0101"))
        .await
        .unwrap();
    assert_eq!(created.key.id, "STR-000001");
}

#[tokio::test]
async fn test_duplicate_store_phone_allocates_nothing() {
    let store = common::memory_store().await;
    let company = common::seed_company(&store, "555-0100").await;
    let service = common::provisioning(&store);

    service
        .create_store(&company.id, common::store_draft("Main Street", "555-0101"))
        .await
        .unwrap();
    let err = service
        .create_store(&company.id, common::store_draft("Side Street", "555-0101"))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::DuplicateEntity { .. }));
    assert_eq!(
        store
            .sequence_head(&EntityKind::Store.sequence_name())
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        common::load(&store, &company).await.field_i64("stores"),
        Some(1)
    );
}

#[tokio::test]
async fn test_company_counters_track_each_child_kind() {
    let store = common::memory_store().await;
    let company = common::seed_company(&store, "555-0100").await;
    let service = common::provisioning(&store);

    for i in 0..3 {
        service
            .create_store(&company.id, common::store_draft("Shop", &format!("555-02{i:02}")))
            .await
            .unwrap();
    }
    service
        .create_service_center(
            &company.id,
            warranty_core::EntityDraft::new(EntityKind::ServiceCenter, "admin")
                .with("phone", "555-0300"),
        )
        .await
        .unwrap();

    let doc = common::load(&store, &company).await;
    assert_eq!(doc.field_i64("stores"), Some(3));
    assert_eq!(doc.field_i64("service_centers"), Some(1));
    assert_eq!(doc.field_i64("products"), Some(0));
}
