//! Named secret resolution
//!
//! Credentials are referenced by name in configuration and resolved here at
//! apply time, from the process environment first and an optional secrets
//! file second. Resolved values never appear in stored configuration or
//! state.

use secrecy::SecretString;
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

/// Prefix for secret environment variables
const SECRET_ENV_PREFIX: &str = "ELLIPSOID_SECRET";

/// Secret resolution errors
#[derive(Error, Debug)]
pub enum SecretError {
    #[error("secret '{0}' not found")]
    NotFound(String),

    #[error("secrets file {path}: {reason}")]
    Unreadable { path: String, reason: String },
}

/// Resolves named secrets at apply time
#[derive(Clone, Debug, Default)]
pub struct SecretStore {
    file: Option<PathBuf>,
}

impl SecretStore {
    /// Store resolving from the environment only
    pub fn new() -> Self {
        Self::default()
    }

    /// Also resolve from a YAML secrets file (name -> value)
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Environment variable name for a secret
    ///
    /// `ellipsoid/github/token` resolves through
    /// `ELLIPSOID_SECRET_ELLIPSOID_GITHUB_TOKEN`.
    pub fn env_key(name: &str) -> String {
        let normalized: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{SECRET_ENV_PREFIX}_{normalized}")
    }

    /// Resolve a secret by name
    pub fn resolve(&self, name: &str) -> Result<SecretString, SecretError> {
        let key = Self::env_key(name);
        if let Ok(value) = env::var(&key) {
            debug!("Resolved secret '{}' from environment", name);
            return Ok(SecretString::from(value));
        }

        if let Some(path) = &self.file {
            let content =
                std::fs::read_to_string(path).map_err(|e| SecretError::Unreadable {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            let secrets: BTreeMap<String, String> =
                serde_yaml::from_str(&content).map_err(|e| SecretError::Unreadable {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;

            if let Some(value) = secrets.get(name) {
                debug!("Resolved secret '{}' from {}", name, path.display());
                return Ok(SecretString::from(value.clone()));
            }
        }

        Err(SecretError::NotFound(name.to_string()))
    }
}
