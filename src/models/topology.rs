//! Topology specifications
//!
//! The declared shape of one Ellipsoid deployment: network, identity,
//! compute, delivery pipeline, and health alarm. These are plain
//! configuration structs so the same definition can describe multiple
//! environments.

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// IP protocol for ingress rules
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One ingress rule on the network's filter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IngressRule {
    /// Protocol the rule matches
    pub protocol: Protocol,

    /// Destination port
    pub port: u16,

    /// Source address range in CIDR notation
    pub source: String,

    /// Human-readable justification
    pub description: String,
}

impl IngressRule {
    /// The one rule the topology requires: HTTPS from anywhere
    pub fn https_anywhere() -> Self {
        Self {
            protocol: Protocol::Tcp,
            port: 443,
            source: "0.0.0.0/0".to_string(),
            description: "allow HTTPS traffic from anywhere".to_string(),
        }
    }
}

/// Network specification: one logical network with public subnets and an
/// ingress-filtering boundary
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkSpec {
    /// Network name
    pub name: String,

    /// Address block for the whole network, CIDR notation
    pub cidr_block: String,

    /// Number of public subnets to carve out
    pub public_subnets: u32,

    /// Prefix length of each subnet
    pub subnet_mask: u8,

    /// Base name for subnets
    pub subnet_name: String,

    /// Security group name
    pub security_group: String,

    /// Ingress rules to open on the filter
    pub ingress_rules: Vec<IngressRule>,
}

impl Default for NetworkSpec {
    fn default() -> Self {
        Self {
            name: "EllipsoidVPC".to_string(),
            cidr_block: "10.0.0.0/16".to_string(),
            public_subnets: 1,
            subnet_mask: 24,
            subnet_name: "EllipsoidPublicSubnet".to_string(),
            security_group: "EllipsoidSecurityGroup".to_string(),
            ingress_rules: vec![IngressRule::https_anywhere()],
        }
    }
}

impl NetworkSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_cidr_block(mut self, block: impl Into<String>) -> Self {
        self.cidr_block = block.into();
        self
    }

    pub fn with_subnets(mut self, count: u32, mask: u8) -> Self {
        self.public_subnets = count;
        self.subnet_mask = mask;
        self
    }

    /// Parse the address block
    pub fn block(&self) -> Result<Ipv4Net, String> {
        self.cidr_block
            .parse::<Ipv4Net>()
            .map_err(|e| format!("malformed address block '{}': {e}", self.cidr_block))
    }

    /// Number of subnets of the configured mask the block can hold
    pub fn capacity(&self) -> Result<u64, String> {
        let block = self.block()?;
        if self.subnet_mask > 32 {
            return Err(format!("invalid subnet mask /{}", self.subnet_mask));
        }
        if self.subnet_mask < block.prefix_len() {
            return Err(format!(
                "subnet mask /{} is wider than the network block /{}",
                self.subnet_mask,
                block.prefix_len()
            ));
        }
        Ok(1u64 << (self.subnet_mask - block.prefix_len()))
    }

    /// Address blocks for each requested subnet
    pub fn subnet_blocks(&self) -> Result<Vec<Ipv4Net>, String> {
        let block = self.block()?;
        let subnets = block
            .subnets(self.subnet_mask)
            .map_err(|e| format!("cannot subdivide {}: {e}", self.cidr_block))?;
        Ok(subnets.take(self.public_subnets as usize).collect())
    }
}

/// Identity specification: a role for the compute instance
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdentitySpec {
    /// Role name
    pub role_name: String,

    /// The only principal allowed to assume the role
    pub service_principal: String,

    /// Managed permission grants to attach, by identifier
    pub managed_policies: Vec<String>,
}

impl Default for IdentitySpec {
    fn default() -> Self {
        Self {
            role_name: "ellipsoid-webserver-role".to_string(),
            service_principal: "ec2.amazonaws.com".to_string(),
            managed_policies: vec!["AmazonS3ReadOnlyAccess".to_string()],
        }
    }
}

/// Machine image selector for the compute instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageSelector {
    AmazonLinux2,
    AmazonLinux2023,
}

impl ImageSelector {
    /// Stable alias resolved by the provider
    pub fn alias(&self) -> &'static str {
        match self {
            ImageSelector::AmazonLinux2 => "amazon-linux-2",
            ImageSelector::AmazonLinux2023 => "amazon-linux-2023",
        }
    }
}

impl fmt::Display for ImageSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.alias())
    }
}

/// Compute instance specification
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstanceSpec {
    /// Stable, human-readable instance name; doubles as the deployment
    /// target tag value
    pub name: String,

    /// Instance class and size, e.g. `t2.micro`
    pub instance_type: String,

    /// Base machine image
    pub image: ImageSelector,
}

impl Default for InstanceSpec {
    fn default() -> Self {
        Self {
            name: "EllipsoidInstance".to_string(),
            instance_type: "t2.micro".to_string(),
            image: ImageSelector::AmazonLinux2,
        }
    }
}

/// Source repository binding for the pipeline's fetch stage
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Repository owner
    pub owner: String,

    /// Repository name
    pub repo: String,

    /// Branch to fetch
    pub branch: String,

    /// Name of the credential in the secret store; the value is resolved at
    /// apply time and never stored
    pub credential_secret: String,

    /// Action name shown in the pipeline definition
    pub action_name: String,
}

impl Default for SourceSpec {
    fn default() -> Self {
        Self {
            owner: "sauleanf".to_string(),
            repo: "ellipsoid_appserver".to_string(),
            branch: "deploy".to_string(),
            credential_secret: "ellipsoid/github/token".to_string(),
            action_name: "fetchEllipsoidFromGithub".to_string(),
        }
    }
}

impl SourceSpec {
    /// `owner/repo` shorthand
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// Rollback policy attached to a deployment group
///
/// Both conditions must stay enabled: a group that rolls back on failure but
/// not on stop (or vice versa) permits partial silent failure.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RollbackPolicy {
    /// Roll back when a deployment fails
    pub on_failure: bool,

    /// Roll back when a deployment is explicitly stopped
    pub on_stop: bool,
}

impl Default for RollbackPolicy {
    fn default() -> Self {
        Self {
            on_failure: true,
            on_stop: true,
        }
    }
}

/// Deployment group specification
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeploymentGroupSpec {
    /// Group name
    pub name: String,

    /// Tag key used to select target instances
    pub target_tag_key: String,

    /// Tag value used to select target instances
    pub target_tag_value: String,

    /// Whether the deployment agent is installed on targets at group
    /// creation; required for the rollback contract
    pub install_agent: bool,

    /// Whether alarm-poll failures are ignored during deployment; must stay
    /// false so a known-unhealthy system blocks rollout
    pub ignore_poll_alarms_failure: bool,

    /// Automatic rollback policy
    pub rollback: RollbackPolicy,
}

impl Default for DeploymentGroupSpec {
    fn default() -> Self {
        Self {
            name: "DeployEllipsoidAppserverGroup".to_string(),
            target_tag_key: "Name".to_string(),
            target_tag_value: "EllipsoidInstance".to_string(),
            install_agent: true,
            ignore_poll_alarms_failure: false,
            rollback: RollbackPolicy::default(),
        }
    }
}

/// Pipeline specification: ordered stages from source fetch to deploy
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Pipeline name
    pub name: String,

    /// Deployable application name
    pub application: String,

    /// Source stage binding
    pub source: SourceSpec,

    /// Deploy stage target group
    pub deployment_group: DeploymentGroupSpec,
}

impl Default for PipelineSpec {
    fn default() -> Self {
        Self {
            name: "EllipsoidPipeline".to_string(),
            application: "EllipsoidCodeDeploy".to_string(),
            source: SourceSpec::default(),
            deployment_group: DeploymentGroupSpec::default(),
        }
    }
}

/// Metric identity: namespace, name, and dimension set
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricId {
    pub namespace: String,

    #[serde(rename = "metric_name")]
    pub name: String,

    #[serde(default)]
    pub dimensions: BTreeMap<String, String>,
}

impl MetricId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            dimensions: BTreeMap::new(),
        }
    }

    pub fn dimension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.dimensions.insert(key.into(), value.into());
        self
    }

    /// Stable key for storage lookups
    pub fn storage_key(&self) -> String {
        let dims: Vec<String> = self
            .dimensions
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        format!("{}_{}_{}", self.namespace, self.name, dims.join("_"))
            .replace(['/', ' '], "_")
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Threshold comparison direction
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Comparison {
    /// Breach when value <= threshold
    LessThanOrEqual,
    /// Breach when value >= threshold
    GreaterThanOrEqual,
}

impl Comparison {
    /// Whether `value` breaches `threshold` under this comparison
    pub fn breaches(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::LessThanOrEqual => value <= threshold,
            Comparison::GreaterThanOrEqual => value >= threshold,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Comparison::LessThanOrEqual => "<=",
            Comparison::GreaterThanOrEqual => ">=",
        }
    }
}

/// Health alarm specification
///
/// A period with no data point is always treated as breaching; silence is
/// never reported as insufficient data.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlarmSpec {
    /// Alarm name
    pub name: String,

    /// Metric the alarm evaluates
    pub metric: MetricId,

    /// Evaluation period in seconds
    pub period_secs: u64,

    /// Consecutive breaching evaluations required to alarm
    pub evaluation_periods: u32,

    /// Threshold value
    pub threshold: f64,

    /// Comparison direction
    pub comparison: Comparison,
}

impl Default for AlarmSpec {
    fn default() -> Self {
        Self {
            name: "EllipsoidCeleryAlarm".to_string(),
            metric: MetricId::new("CeleryHealth", "WorkHealthStatus")
                .dimension("APP_SERVICE", "EllipsoidApplication"),
            period_secs: 30,
            evaluation_periods: 1,
            threshold: 0.0,
            comparison: Comparison::LessThanOrEqual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_capacity() {
        let spec = NetworkSpec::default();
        // /16 block holds 256 /24 subnets
        assert_eq!(spec.capacity().unwrap(), 256);

        let tight = NetworkSpec::default().with_cidr_block("10.0.0.0/24").with_subnets(4, 26);
        assert_eq!(tight.capacity().unwrap(), 4);
    }

    #[test]
    fn test_network_capacity_rejects_wide_mask() {
        let spec = NetworkSpec::default().with_cidr_block("10.0.0.0/24").with_subnets(1, 16);
        assert!(spec.capacity().is_err());
    }

    #[test]
    fn test_network_malformed_block() {
        let spec = NetworkSpec::default().with_cidr_block("not-a-cidr");
        assert!(spec.block().is_err());
    }

    #[test]
    fn test_subnet_blocks() {
        let spec = NetworkSpec::default().with_subnets(2, 24);
        let blocks = spec.subnet_blocks().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].to_string(), "10.0.0.0/24");
        assert_eq!(blocks[1].to_string(), "10.0.1.0/24");
    }

    #[test]
    fn test_https_rule() {
        let rule = IngressRule::https_anywhere();
        assert_eq!(rule.protocol, Protocol::Tcp);
        assert_eq!(rule.port, 443);
        assert_eq!(rule.source, "0.0.0.0/0");
    }

    #[test]
    fn test_comparison() {
        let cmp = Comparison::LessThanOrEqual;
        assert!(cmp.breaches(0.0, 0.0));
        assert!(cmp.breaches(-1.0, 0.0));
        assert!(!cmp.breaches(1.0, 0.0));

        let cmp = Comparison::GreaterThanOrEqual;
        assert!(cmp.breaches(5.0, 5.0));
        assert!(!cmp.breaches(4.9, 5.0));
    }

    #[test]
    fn test_metric_storage_key() {
        let metric = MetricId::new("CeleryHealth", "WorkHealthStatus")
            .dimension("APP_SERVICE", "EllipsoidApplication");
        let key = metric.storage_key();
        assert!(key.contains("CeleryHealth"));
        assert!(!key.contains('/'));
    }

    #[test]
    fn test_defaults_describe_ellipsoid() {
        let pipeline = PipelineSpec::default();
        assert_eq!(pipeline.source.slug(), "sauleanf/ellipsoid_appserver");
        assert_eq!(pipeline.source.branch, "deploy");
        assert_eq!(pipeline.deployment_group.target_tag_key, "Name");
        assert!(pipeline.deployment_group.rollback.on_failure);
        assert!(pipeline.deployment_group.rollback.on_stop);
        assert!(!pipeline.deployment_group.ignore_poll_alarms_failure);
    }
}
