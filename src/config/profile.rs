//! Environment profiles
//!
//! One topology definition serves several environments; a profile carries
//! the per-environment overrides.

use serde::{Deserialize, Serialize};

/// Per-environment overrides for the stack declaration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvironmentProfile {
    /// Profile name
    pub name: String,

    /// Stack name for this environment
    pub stack_name: String,

    /// Target account
    pub account: String,

    /// Target region
    pub region: String,

    /// Deployment target tag key override; the canonical key is `Name`
    #[serde(default)]
    pub target_tag_key: Option<String>,

    /// Source branch override
    #[serde(default)]
    pub branch: Option<String>,
}

impl EnvironmentProfile {
    /// Predefined environments
    pub fn predefined() -> Vec<EnvironmentProfile> {
        vec![Self::staging(), Self::production()]
    }

    /// Staging environment
    pub fn staging() -> Self {
        Self {
            name: "staging".to_string(),
            stack_name: "EllipsoidStack-staging".to_string(),
            account: "105320045388".to_string(),
            region: "us-east-1".to_string(),
            target_tag_key: None,
            branch: Some("develop".to_string()),
        }
    }

    /// Production environment
    pub fn production() -> Self {
        Self {
            name: "production".to_string(),
            stack_name: "EllipsoidStack".to_string(),
            account: "105320045388".to_string(),
            region: "us-east-1".to_string(),
            target_tag_key: None,
            branch: Some("deploy".to_string()),
        }
    }

    /// Look up a predefined profile by name
    pub fn find(name: &str) -> Option<EnvironmentProfile> {
        Self::predefined().into_iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predefined_profiles() {
        let profiles = EnvironmentProfile::predefined();
        assert_eq!(profiles.len(), 2);
        assert!(profiles.iter().any(|p| p.name == "staging"));
        assert!(profiles.iter().any(|p| p.name == "production"));
    }

    #[test]
    fn test_find() {
        assert!(EnvironmentProfile::find("staging").is_some());
        assert!(EnvironmentProfile::find("qa").is_none());
    }

    #[test]
    fn test_production_follows_deploy_branch() {
        let production = EnvironmentProfile::production();
        assert_eq!(production.branch.as_deref(), Some("deploy"));
    }
}
