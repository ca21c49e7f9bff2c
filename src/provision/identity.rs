//! Identity provisioning
//!
//! Creates the role the compute instance assumes. Permission grants are an
//! explicit capability list checked against a fixed allow-list of known
//! read-only identifiers; there is no operation that broadens permissions
//! implicitly.

use std::sync::Arc;
use tracing::info;

use crate::models::{fingerprint, IdentitySpec, ResourceKind, ResourceRecord};
use crate::provider::Provider;

use super::{apply, ProvisionError, Provisioned};

/// Grant identifiers the provisioner will attach
///
/// All entries are read-only; write and administrative grants are not
/// representable here.
pub const KNOWN_MANAGED_POLICIES: &[&str] = &[
    "AmazonS3ReadOnlyAccess",
    "AmazonEC2ReadOnlyAccess",
    "CloudWatchReadOnlyAccess",
    "AmazonSSMReadOnlyAccess",
];

/// Identity provisioner
pub struct IdentityProvisioner {
    provider: Arc<dyn Provider>,
}

impl IdentityProvisioner {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    /// Validate the specification without touching the provider
    ///
    /// An unknown managed policy fails creation outright; it is never
    /// silently skipped.
    pub fn validate(spec: &IdentitySpec) -> Result<(), ProvisionError> {
        if spec.role_name.is_empty() {
            return Err(ProvisionError::InvalidSpec {
                component: "identity",
                reason: "role name is empty".to_string(),
            });
        }
        if spec.service_principal.is_empty() {
            return Err(ProvisionError::InvalidSpec {
                component: "identity",
                reason: "service principal is empty".to_string(),
            });
        }
        if spec.managed_policies.is_empty() {
            return Err(ProvisionError::InvalidSpec {
                component: "identity",
                reason: "at least one managed policy is required".to_string(),
            });
        }

        for policy in &spec.managed_policies {
            if !KNOWN_MANAGED_POLICIES.contains(&policy.as_str()) {
                return Err(ProvisionError::UnknownManagedPolicy(policy.clone()));
            }
        }

        Ok(())
    }

    /// Provision the role
    pub async fn provision(&self, spec: &IdentitySpec) -> Result<Provisioned, ProvisionError> {
        Self::validate(spec)?;

        info!(
            "Provisioning role {} (assumed by {})",
            spec.role_name, spec.service_principal
        );

        apply(
            self.provider.as_ref(),
            "identity",
            ResourceRecord::new(ResourceKind::Role, &spec.role_name)
                .attribute("assumed_by", &spec.service_principal)
                .attribute("managed_policies", spec.managed_policies.join(","))
                .fingerprint(fingerprint(spec)),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::LocalProvider;
    use crate::state::{StackState, StateStore};

    fn temp_provider() -> (tempfile::TempDir, Arc<dyn Provider>) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let provider = LocalProvider::open(store, StackState::new("ellipsoid", "a", "r"));
        (dir, Arc::new(provider))
    }

    #[tokio::test]
    async fn test_provision_role() {
        let (_dir, provider) = temp_provider();
        let provisioner = IdentityProvisioner::new(provider.clone());

        let role = provisioner.provision(&IdentitySpec::default()).await.unwrap();

        assert_eq!(role.record.attr("assumed_by"), Some("ec2.amazonaws.com"));
        assert_eq!(role.record.attr("managed_policies"), Some("AmazonS3ReadOnlyAccess"));
    }

    #[tokio::test]
    async fn test_unknown_policy_rejected() {
        let (_dir, provider) = temp_provider();
        let provisioner = IdentityProvisioner::new(provider.clone());

        let spec = IdentitySpec {
            managed_policies: vec!["AdministratorAccess".to_string()],
            ..IdentitySpec::default()
        };
        let err = provisioner.provision(&spec).await.unwrap_err();

        assert!(matches!(err, ProvisionError::UnknownManagedPolicy(p) if p == "AdministratorAccess"));
        assert!(provider.list().await.unwrap().is_empty());
    }

    #[test]
    fn test_allow_list_is_read_only() {
        for policy in KNOWN_MANAGED_POLICIES {
            assert!(policy.contains("ReadOnly"), "{policy} is not read-only");
        }
    }

    #[test]
    fn test_empty_policies_rejected() {
        let spec = IdentitySpec {
            managed_policies: Vec::new(),
            ..IdentitySpec::default()
        };
        assert!(IdentityProvisioner::validate(&spec).is_err());
    }
}
