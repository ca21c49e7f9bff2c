//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

/// Environment variable prefix
const ENV_PREFIX: &str = "ELLIPSOID";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Account from ELLIPSOID_ACCOUNT
    pub account: Option<String>,
    /// Region from ELLIPSOID_REGION
    pub region: Option<String>,
    /// Stack name from ELLIPSOID_STACK
    pub stack_name: Option<String>,
    /// Environment name from ELLIPSOID_ENV
    pub environment: Option<String>,
    /// Config file from ELLIPSOID_CONFIG
    pub config_file: Option<String>,
    /// Secrets file from ELLIPSOID_SECRETS_FILE
    pub secrets_file: Option<String>,
    /// State directory from ELLIPSOID_STATE_DIR
    pub state_dir: Option<String>,
    /// Verbose from ELLIPSOID_VERBOSE
    pub verbose: Option<bool>,
    /// Output format from ELLIPSOID_FORMAT
    pub format: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            account: get_env("ACCOUNT"),
            region: get_env("REGION"),
            stack_name: get_env("STACK"),
            environment: get_env("ENV"),
            config_file: get_env("CONFIG"),
            secrets_file: get_env("SECRETS_FILE"),
            state_dir: get_env("STATE_DIR"),
            verbose: get_env_bool("VERBOSE"),
            format: get_env("FORMAT"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.account.is_some()
            || self.region.is_some()
            || self.stack_name.is_some()
            || self.environment.is_some()
            || self.config_file.is_some()
            || self.secrets_file.is_some()
            || self.state_dir.is_some()
            || self.verbose.is_some()
            || self.format.is_some()
    }

    /// Print a summary of the loaded values
    pub fn print_summary(&self) {
        println!("Environment configuration:");
        print_value("ELLIPSOID_ACCOUNT", &self.account);
        print_value("ELLIPSOID_REGION", &self.region);
        print_value("ELLIPSOID_STACK", &self.stack_name);
        print_value("ELLIPSOID_ENV", &self.environment);
        print_value("ELLIPSOID_CONFIG", &self.config_file);
        print_value("ELLIPSOID_SECRETS_FILE", &self.secrets_file);
        print_value("ELLIPSOID_STATE_DIR", &self.state_dir);
        print_value("ELLIPSOID_VERBOSE", &self.verbose.map(|v| v.to_string()));
        print_value("ELLIPSOID_FORMAT", &self.format);
    }
}

fn print_value(name: &str, value: &Option<String>) {
    match value {
        Some(v) => println!("  {name} = {v}"),
        None => println!("  {name} (unset)"),
    }
}

fn get_env(suffix: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{suffix}")).ok().filter(|v| !v.is_empty())
}

fn get_env_bool(suffix: &str) -> Option<bool> {
    get_env(suffix).map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

/// Print help for supported environment variables
pub fn print_env_help() {
    println!("Supported environment variables:\n");
    println!("  ELLIPSOID_ACCOUNT       Target account identifier");
    println!("  ELLIPSOID_REGION        Target region");
    println!("  ELLIPSOID_STACK         Stack name override");
    println!("  ELLIPSOID_ENV           Environment profile name");
    println!("  ELLIPSOID_CONFIG        Configuration file path");
    println!("  ELLIPSOID_SECRETS_FILE  Secrets file path (name -> value YAML)");
    println!("  ELLIPSOID_STATE_DIR     State storage directory");
    println!("  ELLIPSOID_VERBOSE       Enable debug logging (true/false)");
    println!("  ELLIPSOID_FORMAT        Default output format (table/json)");
    println!();
    println!("  ELLIPSOID_SECRET_<NAME> Secret values, e.g.");
    println!("  ELLIPSOID_SECRET_ELLIPSOID_GITHUB_TOKEN for 'ellipsoid/github/token'");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_env_has_nothing() {
        // Fresh struct rather than load(), to stay independent of the
        // ambient environment.
        let config = EnvConfig::default();
        assert!(!config.has_any());
    }

    #[test]
    fn test_env_override_load() {
        env::set_var("ELLIPSOID_REGION", "eu-west-1");
        let config = EnvConfig::load();
        assert_eq!(config.region.as_deref(), Some("eu-west-1"));
        assert!(config.has_any());
        env::remove_var("ELLIPSOID_REGION");
    }

    #[test]
    fn test_bool_parsing() {
        env::set_var("ELLIPSOID_VERBOSE", "true");
        assert_eq!(get_env_bool("VERBOSE"), Some(true));
        env::set_var("ELLIPSOID_VERBOSE", "0");
        assert_eq!(get_env_bool("VERBOSE"), Some(false));
        env::remove_var("ELLIPSOID_VERBOSE");
    }
}
