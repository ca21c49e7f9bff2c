//! Configuration module
//!
//! The whole topology is declared as configuration. One definition serves
//! multiple environments: account, region, and name overrides come from an
//! environment profile, environment variables, or CLI flags.

mod env;
mod file;
mod profile;
mod secrets;

pub use env::{print_env_help, EnvConfig};
pub use file::ConfigFile;
pub use profile::EnvironmentProfile;
pub use secrets::{SecretError, SecretStore};

use serde::{Deserialize, Serialize};

use crate::models::{AlarmSpec, IdentitySpec, InstanceSpec, NetworkSpec, PipelineSpec};
use crate::provision::{
    AlarmProvisioner, ComputeProvisioner, IdentityProvisioner, NetworkProvisioner, ProvisionError,
};
use crate::pipeline::PipelineProvisioner;

/// Full declaration of one stack
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StackConfig {
    /// Stack name; all resources register under it
    pub stack_name: String,

    /// Target account identifier
    pub account: String,

    /// Target region
    pub region: String,

    /// Network topology
    #[serde(default)]
    pub network: NetworkSpec,

    /// Instance role
    #[serde(default)]
    pub identity: IdentitySpec,

    /// Compute instance
    #[serde(default)]
    pub instance: InstanceSpec,

    /// Delivery pipeline
    #[serde(default)]
    pub pipeline: PipelineSpec,

    /// Health alarm
    #[serde(default)]
    pub alarm: AlarmSpec,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            stack_name: "EllipsoidStack".to_string(),
            account: "105320045388".to_string(),
            region: "us-east-1".to_string(),
            network: NetworkSpec::default(),
            identity: IdentitySpec::default(),
            instance: InstanceSpec::default(),
            pipeline: PipelineSpec::default(),
            alarm: AlarmSpec::default(),
        }
    }
}

impl StackConfig {
    pub fn new(stack_name: impl Into<String>) -> Self {
        Self {
            stack_name: stack_name.into(),
            ..Self::default()
        }
    }

    /// Validate every component specification
    pub fn validate(&self) -> Result<(), ProvisionError> {
        if self.stack_name.is_empty() {
            return Err(ProvisionError::InvalidSpec {
                component: "stack",
                reason: "stack name is empty".to_string(),
            });
        }
        if self.account.is_empty() || self.region.is_empty() {
            return Err(ProvisionError::InvalidSpec {
                component: "stack",
                reason: "account and region are required".to_string(),
            });
        }

        NetworkProvisioner::validate(&self.network)?;
        IdentityProvisioner::validate(&self.identity)?;
        ComputeProvisioner::validate(&self.instance)?;
        PipelineProvisioner::validate(&self.pipeline)?;
        AlarmProvisioner::validate(&self.alarm)?;
        Ok(())
    }

    /// Apply an environment profile's overrides
    pub fn apply_profile(&mut self, profile: &EnvironmentProfile) {
        self.stack_name = profile.stack_name.clone();
        self.account = profile.account.clone();
        self.region = profile.region.clone();
        if let Some(tag_key) = &profile.target_tag_key {
            self.pipeline.deployment_group.target_tag_key = tag_key.clone();
        }
        if let Some(branch) = &profile.branch {
            self.pipeline.source.branch = branch.clone();
        }
    }

    /// Apply environment variable overrides
    pub fn apply_env(&mut self, env: &EnvConfig) {
        if let Some(account) = &env.account {
            self.account = account.clone();
        }
        if let Some(region) = &env.region {
            self.region = region.clone();
        }
        if let Some(stack_name) = &env.stack_name {
            self.stack_name = stack_name.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        StackConfig::default().validate().unwrap();
    }

    #[test]
    fn test_empty_account_rejected() {
        let config = StackConfig {
            account: String::new(),
            ..StackConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_profile_overrides() {
        let mut config = StackConfig::default();
        let profile = EnvironmentProfile::staging();
        config.apply_profile(&profile);

        assert_eq!(config.stack_name, profile.stack_name);
        assert_eq!(config.region, profile.region);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = StackConfig::default();
        let env = EnvConfig {
            account: Some("999999999999".to_string()),
            region: Some("eu-west-1".to_string()),
            ..EnvConfig::default()
        };
        config.apply_env(&env);

        assert_eq!(config.account, "999999999999");
        assert_eq!(config.region, "eu-west-1");
    }
}
