//! Configuration file management
//!
//! Handles finding, loading, and validating configuration files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::profile::EnvironmentProfile;
use super::StackConfig;

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./ellipsoid-stack.yaml",
    "./ellipsoid-stack.yml",
    "./.ellipsoid-stack.yaml",
    "./.ellipsoid-stack/config.yaml",
    "~/.config/ellipsoid-stack/config.yaml",
    "~/.ellipsoid-stack.yaml",
];

/// Full configuration file structure
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Version of config file format
    #[serde(default = "default_version")]
    pub version: String,

    /// Stack declaration
    #[serde(default)]
    pub stack: StackConfig,

    /// Environment profiles
    #[serde(default)]
    pub environments: Vec<EnvironmentProfile>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            version: default_version(),
            stack: StackConfig::default(),
            environments: EnvironmentProfile::predefined(),
        }
    }
}

impl ConfigFile {
    /// Create a new config file with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Find configuration file in standard locations
    pub fn find() -> Option<PathBuf> {
        for location in CONFIG_LOCATIONS {
            let path = expand_path(location);
            if path.exists() {
                return Some(path);
            }
        }
        None
    }

    /// Load configuration from default location
    pub fn load_default() -> Result<Self> {
        if let Some(path) = Self::find() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        // Validate version
        if !["1.0", "1.1"].contains(&self.version.as_str()) {
            anyhow::bail!("Unsupported config version: {}", self.version);
        }

        self.stack
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid stack declaration: {e}"))?;

        for profile in &self.environments {
            if profile.name.is_empty() || profile.stack_name.is_empty() {
                anyhow::bail!("environment profile with empty name");
            }
        }

        Ok(())
    }

    /// Look up an environment profile by name
    pub fn environment(&self, name: &str) -> Option<&EnvironmentProfile> {
        self.environments.iter().find(|p| p.name == name)
    }

    /// Resolve the stack declaration for an optional environment
    pub fn resolve(&self, environment: Option<&str>) -> Result<StackConfig> {
        let mut stack = self.stack.clone();

        if let Some(name) = environment {
            let profile = self
                .environment(name)
                .ok_or_else(|| anyhow::anyhow!("unknown environment: {name}"))?;
            stack.apply_profile(profile);
        }

        Ok(stack)
    }
}

fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(true)
}

fn expand_path(location: &str) -> PathBuf {
    if let Some(rest) = location.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(location)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validates() {
        ConfigFile::default().validate().unwrap();
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ellipsoid-stack.yaml");

        let config = ConfigFile::default();
        config.save(&path).unwrap();

        let loaded = ConfigFile::load(&path).unwrap();
        assert_eq!(loaded.stack.stack_name, config.stack.stack_name);
        assert_eq!(loaded.environments.len(), config.environments.len());
    }

    #[test]
    fn test_unknown_version_rejected() {
        let config = ConfigFile {
            version: "9.9".to_string(),
            ..ConfigFile::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_environment() {
        let config = ConfigFile::default();

        let staging = config.resolve(Some("staging")).unwrap();
        assert_eq!(staging.stack_name, "EllipsoidStack-staging");

        assert!(config.resolve(Some("nonexistent")).is_err());

        let bare = config.resolve(None).unwrap();
        assert_eq!(bare.stack_name, "EllipsoidStack");
    }
}
