//! Role templates and their fixed permission sets

use serde::{Deserialize, Serialize};
use std::fmt;

use super::DocumentKey;

/// Action granted on a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Write,
    Update,
    Delete,
}

/// Capability tuple: a resource and the actions allowed on it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub resource: String,
    pub actions: Vec<Action>,
}

impl Capability {
    pub fn new(resource: impl Into<String>, actions: &[Action]) -> Self {
        Self {
            resource: resource.into(),
            actions: actions.to_vec(),
        }
    }
}

/// Role templates provisioned when their owner is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleTemplate {
    CompanyAdmin,
    StoreManager,
    ServiceCenterManager,
}

impl RoleTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleTemplate::CompanyAdmin => "company_admin",
            RoleTemplate::StoreManager => "store_manager",
            RoleTemplate::ServiceCenterManager => "service_center_manager",
        }
    }
}

impl fmt::Display for RoleTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Role to create for an owner entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSpec {
    pub name: String,
    pub template: RoleTemplate,
    pub owner: DocumentKey,
}

impl RoleSpec {
    pub fn new(template: RoleTemplate, owner: DocumentKey) -> Self {
        Self {
            name: format!("{}:{}", template.as_str(), owner.id),
            template,
            owner,
        }
    }
}

/// Fixed set of capabilities attached to exactly one role
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PermissionSet {
    capabilities: Vec<Capability>,
}

impl PermissionSet {
    pub fn new(capabilities: Vec<Capability>) -> Self {
        Self { capabilities }
    }

    /// Permission set for a role template
    pub fn for_template(template: RoleTemplate) -> Self {
        use Action::*;

        let capabilities = match template {
            RoleTemplate::CompanyAdmin => vec![
                Capability::new("companies", &[Read, Update]),
                Capability::new("stores", &[Read, Write, Update, Delete]),
                Capability::new("service_centers", &[Read, Write, Update, Delete]),
                Capability::new("models", &[Read, Write, Update, Delete]),
            ],
            RoleTemplate::StoreManager => vec![
                Capability::new("purchases", &[Read, Write, Update]),
                Capability::new("models", &[Read]),
                Capability::new("addresses", &[Read, Write, Update]),
            ],
            RoleTemplate::ServiceCenterManager => vec![
                Capability::new("tasks", &[Read, Write, Update]),
                Capability::new("complaints", &[Read, Update]),
                Capability::new("addresses", &[Read]),
            ],
        };
        Self { capabilities }
    }

    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_sizes() {
        assert_eq!(PermissionSet::for_template(RoleTemplate::CompanyAdmin).len(), 4);
        assert_eq!(PermissionSet::for_template(RoleTemplate::StoreManager).len(), 3);
        assert_eq!(
            PermissionSet::for_template(RoleTemplate::ServiceCenterManager).len(),
            3
        );
    }

    #[test]
    fn test_role_spec_name_includes_owner() {
        let spec = RoleSpec::new(
            RoleTemplate::StoreManager,
            DocumentKey::new(crate::domain::Collection::Stores, "STR-000001"),
        );
        assert_eq!(spec.name, "store_manager:STR-000001");
    }
}
