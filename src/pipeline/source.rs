//! Source stage
//!
//! Fetches the contents of one branch of a hosted repository and produces
//! the single artifact the deploy stage consumes. The credential arrives as
//! a resolved secret; it is never part of the pipeline definition.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::SourceSpec;

use super::Artifact;

/// Default API endpoint of the hosted git provider
const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Source stage errors
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("credential '{name}' could not be resolved: {reason}")]
    Credential { name: String, reason: String },

    #[error("authentication to {repo} was rejected")]
    AuthenticationFailed { repo: String },

    #[error("branch '{branch}' not found in {repo}")]
    BranchNotFound { repo: String, branch: String },

    #[error("repository {repo} unreachable: {reason}")]
    Unreachable { repo: String, reason: String },

    #[error("failed to store artifact: {0}")]
    Artifact(String),
}

/// Fetches source content for the pipeline
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetch the branch head and produce an artifact
    async fn fetch(
        &self,
        source: &SourceSpec,
        credential: &SecretString,
    ) -> Result<Artifact, FetchError>;
}

#[derive(Deserialize)]
struct CommitResponse {
    sha: String,
}

/// Fetcher backed by the GitHub REST API
pub struct GitHubFetcher {
    client: Client,
    api_base: String,
    artifact_dir: PathBuf,
}

impl GitHubFetcher {
    /// Create a fetcher writing artifacts under the given directory
    pub fn new(artifact_dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("ellipsoid-stack/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_base: DEFAULT_API_BASE.to_string(),
            artifact_dir: artifact_dir.into(),
        })
    }

    /// Override the API endpoint
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn classify_status(
        status: reqwest::StatusCode,
        source: &SourceSpec,
    ) -> Option<FetchError> {
        let repo = source.slug();
        match status.as_u16() {
            200..=299 => None,
            401 | 403 => Some(FetchError::AuthenticationFailed { repo }),
            404 => Some(FetchError::BranchNotFound {
                repo,
                branch: source.branch.clone(),
            }),
            code => Some(FetchError::Unreachable {
                repo,
                reason: format!("unexpected status {code}"),
            }),
        }
    }

    async fn resolve_head(
        &self,
        source: &SourceSpec,
        credential: &SecretString,
    ) -> Result<String, FetchError> {
        let url = format!(
            "{}/repos/{}/commits/{}",
            self.api_base,
            source.slug(),
            source.branch
        );
        debug!("Resolving branch head: {}", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(credential.expose_secret())
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| FetchError::Unreachable {
                repo: source.slug(),
                reason: e.to_string(),
            })?;

        if let Some(err) = Self::classify_status(response.status(), source) {
            return Err(err);
        }

        let commit: CommitResponse = response.json().await.map_err(|e| FetchError::Unreachable {
            repo: source.slug(),
            reason: format!("malformed commit response: {e}"),
        })?;

        Ok(commit.sha)
    }

    async fn download_tarball(
        &self,
        source: &SourceSpec,
        credential: &SecretString,
    ) -> Result<Vec<u8>, FetchError> {
        let url = format!(
            "{}/repos/{}/tarball/{}",
            self.api_base,
            source.slug(),
            source.branch
        );
        debug!("Downloading tarball: {}", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(credential.expose_secret())
            .send()
            .await
            .map_err(|e| FetchError::Unreachable {
                repo: source.slug(),
                reason: e.to_string(),
            })?;

        if let Some(err) = Self::classify_status(response.status(), source) {
            return Err(err);
        }

        let bytes = response.bytes().await.map_err(|e| FetchError::Unreachable {
            repo: source.slug(),
            reason: format!("download interrupted: {e}"),
        })?;

        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl SourceFetcher for GitHubFetcher {
    async fn fetch(
        &self,
        source: &SourceSpec,
        credential: &SecretString,
    ) -> Result<Artifact, FetchError> {
        let revision = self.resolve_head(source, credential).await?;
        let content = self.download_tarball(source, credential).await?;

        std::fs::create_dir_all(&self.artifact_dir)
            .map_err(|e| FetchError::Artifact(e.to_string()))?;

        let artifact = Artifact::new(&revision);
        let path = self.artifact_dir.join(format!("{}.tar.gz", artifact.id));
        std::fs::write(&path, &content).map_err(|e| FetchError::Artifact(e.to_string()))?;

        info!(
            "Fetched {}@{} ({} bytes) as artifact {}",
            source.slug(),
            &revision[..revision.len().min(12)],
            content.len(),
            artifact.id
        );

        Ok(artifact.with_path(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> SourceSpec {
        SourceSpec::default()
    }

    #[test]
    fn test_classify_status() {
        assert!(GitHubFetcher::classify_status(reqwest::StatusCode::OK, &spec()).is_none());

        let err =
            GitHubFetcher::classify_status(reqwest::StatusCode::UNAUTHORIZED, &spec()).unwrap();
        assert!(matches!(err, FetchError::AuthenticationFailed { .. }));

        let err = GitHubFetcher::classify_status(reqwest::StatusCode::NOT_FOUND, &spec()).unwrap();
        assert!(matches!(err, FetchError::BranchNotFound { ref branch, .. } if branch == "deploy"));

        let err =
            GitHubFetcher::classify_status(reqwest::StatusCode::BAD_GATEWAY, &spec()).unwrap();
        assert!(matches!(err, FetchError::Unreachable { .. }));
    }
}
