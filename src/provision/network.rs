//! Network provisioning
//!
//! Creates the isolated network, its public subnets, and the
//! ingress-filtering security group. The group starts default-deny-inbound
//! with all outbound allowed; rules are opened one at a time through
//! [`NetworkProvisioner::add_ingress_rule`].

use std::sync::Arc;
use tracing::{debug, info};

use crate::models::{fingerprint, IngressRule, NetworkSpec, ResourceKind, ResourceRecord};
use crate::provider::Provider;

use super::{apply, ProvisionError, Provisioned};

/// Attribute key holding the group's ingress rules as a JSON array
const INGRESS_RULES_ATTR: &str = "ingress_rules";

/// The provisioned network and its parts
#[derive(Clone, Debug)]
pub struct NetworkResources {
    pub network: Provisioned,
    pub subnets: Vec<Provisioned>,
    pub security_group: Provisioned,
}

/// Network provisioner
pub struct NetworkProvisioner {
    provider: Arc<dyn Provider>,
}

impl NetworkProvisioner {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    /// Validate the specification without touching the provider
    ///
    /// Capacity problems must surface here, before any dependent resource
    /// is created.
    pub fn validate(spec: &NetworkSpec) -> Result<(), ProvisionError> {
        if spec.name.is_empty() {
            return Err(ProvisionError::InvalidSpec {
                component: "network",
                reason: "network name is empty".to_string(),
            });
        }
        if spec.public_subnets == 0 {
            return Err(ProvisionError::InvalidSpec {
                component: "network",
                reason: "at least one public subnet is required".to_string(),
            });
        }

        let capacity = spec.capacity().map_err(|reason| ProvisionError::InvalidSpec {
            component: "network",
            reason,
        })?;
        if u64::from(spec.public_subnets) > capacity {
            return Err(ProvisionError::InsufficientCapacity {
                block: spec.cidr_block.clone(),
                requested: spec.public_subnets,
                mask: spec.subnet_mask,
                capacity,
            });
        }

        Ok(())
    }

    /// Provision the network, subnets, and security group
    pub async fn provision(&self, spec: &NetworkSpec) -> Result<NetworkResources, ProvisionError> {
        Self::validate(spec)?;

        let print = fingerprint(spec);

        info!("Provisioning network {}", spec.name);
        let network = apply(
            self.provider.as_ref(),
            "network",
            ResourceRecord::new(ResourceKind::Network, &spec.name)
                .attribute("cidr_block", &spec.cidr_block)
                .fingerprint(&print),
        )
        .await?;

        let mut subnets = Vec::new();
        let blocks = spec.subnet_blocks().map_err(|reason| ProvisionError::InvalidSpec {
            component: "network",
            reason,
        })?;
        for (index, block) in blocks.iter().enumerate() {
            let name = format!("{}{index}", spec.subnet_name);
            let subnet = apply(
                self.provider.as_ref(),
                "network",
                ResourceRecord::new(ResourceKind::Subnet, &name)
                    .attribute("cidr_block", block.to_string())
                    .attribute("public", "true")
                    .depends_on(network.record.logical_id.clone())
                    .fingerprint(&print),
            )
            .await?;
            subnets.push(subnet);
        }

        // Default deny inbound, allow all outbound; rules are added below.
        let security_group = apply(
            self.provider.as_ref(),
            "network",
            ResourceRecord::new(ResourceKind::SecurityGroup, &spec.security_group)
                .attribute("allow_all_outbound", "true")
                .attribute(INGRESS_RULES_ATTR, "[]")
                .depends_on(network.record.logical_id.clone())
                .fingerprint(&print),
        )
        .await?;

        if security_group.action != super::ApplyAction::Unchanged {
            for rule in &spec.ingress_rules {
                self.add_ingress_rule(&security_group.record.logical_id, rule)
                    .await?;
            }
        }

        Ok(NetworkResources {
            network,
            subnets,
            security_group,
        })
    }

    /// Open one ingress rule on an existing security group
    pub async fn add_ingress_rule(
        &self,
        group_logical_id: &str,
        rule: &IngressRule,
    ) -> Result<(), ProvisionError> {
        let wrap = |source| ProvisionError::Provider {
            component: "network",
            source,
        };

        let group = self
            .provider
            .find(group_logical_id)
            .await
            .map_err(wrap)?
            .ok_or_else(|| {
                ProvisionError::InvalidSpec {
                    component: "network",
                    reason: format!("security group {group_logical_id} does not exist"),
                }
            })?;

        let mut rules: Vec<IngressRule> = group
            .attr(INGRESS_RULES_ATTR)
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default();

        if rules.contains(rule) {
            debug!("Ingress rule {}:{} already present", rule.protocol, rule.port);
            return Ok(());
        }

        debug!(
            "Opening {} {} from {} on {} ({})",
            rule.protocol, rule.port, rule.source, group_logical_id, rule.description
        );
        rules.push(rule.clone());
        let json = serde_json::to_string(&rules).map_err(|e| ProvisionError::InvalidSpec {
            component: "network",
            reason: format!("cannot encode ingress rules: {e}"),
        })?;

        self.provider
            .set_attribute(group_logical_id, INGRESS_RULES_ATTR, &json)
            .await
            .map_err(wrap)
    }

    /// Ingress rules currently open on a security group record
    pub fn ingress_rules(group: &ResourceRecord) -> Vec<IngressRule> {
        group
            .attr(INGRESS_RULES_ATTR)
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default()
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
    async fn test_provision_creates_requested_subnets() {
        let (_dir, provider) = temp_provider();
        let provisioner = NetworkProvisioner::new(provider.clone());

        let spec = NetworkSpec::default().with_subnets(2, 24);
        let resources = provisioner.provision(&spec).await.unwrap();

        assert_eq!(resources.subnets.len(), 2);
        assert!(provider.find("subnet/EllipsoidPublicSubnet0").await.unwrap().is_some());
        assert!(provider.find("subnet/EllipsoidPublicSubnet1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_filter_permits_only_https() {
        let (_dir, provider) = temp_provider();
        let provisioner = NetworkProvisioner::new(provider.clone());

        let resources = provisioner.provision(&NetworkSpec::default()).await.unwrap();

        let group = provider
            .find(&resources.security_group.record.logical_id)
            .await
            .unwrap()
            .unwrap();
        let rules = NetworkProvisioner::ingress_rules(&group);

        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].port, 443);
        assert_eq!(rules[0].source, "0.0.0.0/0");
        assert_eq!(group.attr("allow_all_outbound"), Some("true"));
    }

    #[tokio::test]
    async fn test_capacity_failure_leaves_no_partial_state() {
        let (_dir, provider) = temp_provider();
        let provisioner = NetworkProvisioner::new(provider.clone());

        // A /24 block cannot hold 300 /26 subnets.
        let spec = NetworkSpec::default().with_cidr_block("10.0.0.0/24").with_subnets(300, 26);
        let err = provisioner.provision(&spec).await.unwrap_err();

        assert!(matches!(err, ProvisionError::InsufficientCapacity { capacity: 4, .. }));
        assert!(provider.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_ingress_rule_is_idempotent() {
        let (_dir, provider) = temp_provider();
        let provisioner = NetworkProvisioner::new(provider.clone());

        let resources = provisioner.provision(&NetworkSpec::default()).await.unwrap();
        let group_id = resources.security_group.record.logical_id.clone();

        provisioner
            .add_ingress_rule(&group_id, &IngressRule::https_anywhere())
            .await
            .unwrap();

        let group = provider.find(&group_id).await.unwrap().unwrap();
        assert_eq!(NetworkProvisioner::ingress_rules(&group).len(), 1);
    }
}
