//! Compute provisioning
//!
//! Launches the single instance inside the network, attached to the identity
//! profile. The instance's deployment-target tag is part of the creation
//! call itself, so a deploy action selecting by tag can never observe an
//! untagged instance.

use std::sync::Arc;
use tracing::info;

use crate::models::{fingerprint, InstanceSpec, ResourceKind, ResourceRecord};
use crate::provider::Provider;

use super::{apply, ProvisionError, Provisioned};

/// Compute provisioner
pub struct ComputeProvisioner {
    provider: Arc<dyn Provider>,
}

impl ComputeProvisioner {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    /// Validate the specification without touching the provider
    pub fn validate(spec: &InstanceSpec) -> Result<(), ProvisionError> {
        if spec.name.is_empty() {
            return Err(ProvisionError::InvalidSpec {
                component: "compute",
                reason: "instance name is empty".to_string(),
            });
        }
        if spec.instance_type.is_empty() {
            return Err(ProvisionError::InvalidSpec {
                component: "compute",
                reason: "instance type is empty".to_string(),
            });
        }
        Ok(())
    }

    /// Launch the instance into the given subnet with the given filter and
    /// role, tagging it with `(tag_key, spec.name)` atomically
    pub async fn provision(
        &self,
        spec: &InstanceSpec,
        tag_key: &str,
        subnet: &ResourceRecord,
        security_group: &ResourceRecord,
        role: &ResourceRecord,
    ) -> Result<Provisioned, ProvisionError> {
        Self::validate(spec)?;

        info!(
            "Provisioning instance {} ({}, {})",
            spec.name, spec.instance_type, spec.image
        );

        // The fingerprint folds in the dependency identifiers, so a replaced
        // network or role cascades into a replaced instance.
        let print = fingerprint(&(
            spec,
            &subnet.physical_id,
            &security_group.physical_id,
            &role.physical_id,
        ));

        apply(
            self.provider.as_ref(),
            "compute",
            ResourceRecord::new(ResourceKind::Instance, &spec.name)
                .attribute("instance_type", &spec.instance_type)
                .attribute("image", spec.image.alias())
                .attribute("subnet_id", &subnet.physical_id)
                .attribute("security_group_id", &security_group.physical_id)
                .attribute("role_id", &role.physical_id)
                .tag(tag_key, &spec.name)
                .depends_on(subnet.logical_id.clone())
                .depends_on(security_group.logical_id.clone())
                .depends_on(role.logical_id.clone())
                .fingerprint(print),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IdentitySpec, NetworkSpec};
    use crate::provider::LocalProvider;
    use crate::provision::{IdentityProvisioner, NetworkProvisioner};
    use crate::state::{StackState, StateStore};

    fn temp_provider() -> (tempfile::TempDir, Arc<dyn Provider>) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let provider = LocalProvider::open(store, StackState::new("ellipsoid", "a", "r"));
        (dir, Arc::new(provider))
    }

    #[tokio::test]
    async fn test_instance_tagged_at_creation() {
        let (_dir, provider) = temp_provider();

        let network = NetworkProvisioner::new(provider.clone())
            .provision(&NetworkSpec::default())
            .await
            .unwrap();
        let role = IdentityProvisioner::new(provider.clone())
            .provision(&IdentitySpec::default())
            .await
            .unwrap();

        let instance = ComputeProvisioner::new(provider.clone())
            .provision(
                &InstanceSpec::default(),
                "Name",
                &network.subnets[0].record,
                &network.security_group.record,
                &role.record,
            )
            .await
            .unwrap();

        assert!(instance.record.has_tag("Name", "EllipsoidInstance"));

        // The tag match is the only membership contract.
        let targets = provider.instances_by_tag("Name", "EllipsoidInstance").await.unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].logical_id, instance.record.logical_id);
    }

    #[tokio::test]
    async fn test_instance_records_dependencies() {
        let (_dir, provider) = temp_provider();

        let network = NetworkProvisioner::new(provider.clone())
            .provision(&NetworkSpec::default())
            .await
            .unwrap();
        let role = IdentityProvisioner::new(provider.clone())
            .provision(&IdentitySpec::default())
            .await
            .unwrap();

        let instance = ComputeProvisioner::new(provider.clone())
            .provision(
                &InstanceSpec::default(),
                "Name",
                &network.subnets[0].record,
                &network.security_group.record,
                &role.record,
            )
            .await
            .unwrap();

        assert!(instance
            .record
            .depends_on
            .contains(&"role/ellipsoid-webserver-role".to_string()));
        assert_eq!(instance.record.attr("subnet_id"), Some(network.subnets[0].record.physical_id.as_str()));
    }
}
