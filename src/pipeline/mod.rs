//! Deployment pipeline
//!
//! A two-stage pipeline: a source stage that fetches a branch of a hosted
//! repository with a secret-stored credential, and a deploy stage that
//! pushes the fetched artifact to every instance matching the deployment
//! group's tag predicate, rolling all of them back on failure or stop.

mod deploy;
mod execution;
mod provision;
mod source;

pub use deploy::{AgentError, DeployAgent, DeployError, DeployReport, Deployer, LocalAgent};
pub use execution::{
    ExecutionRecord, ExecutionStatus, PipelineExecutor, StageOutcome, StageStatus,
};
pub use provision::{PipelineProvisioner, PipelineResources};
pub use source::{FetchError, GitHubFetcher, SourceFetcher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The two stages of a pipeline execution, in order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageName {
    Source,
    Deploy,
}

impl StageName {
    /// Stage name as it appears in the pipeline definition
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Source => "SourceStage",
            StageName::Deploy => "Deploy",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One named stage in a pipeline definition
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Stage {
    /// Stage name
    pub name: String,

    /// Actions the stage runs
    pub actions: Vec<String>,
}

/// The single unit of output passed from the source stage to the deploy
/// stage
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Artifact {
    /// Unique artifact id
    pub id: String,

    /// Source revision the artifact was built from
    pub revision: String,

    /// Where the fetched content was written, if anywhere
    pub path: Option<PathBuf>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Create an artifact handle for a revision
    pub fn new(revision: impl Into<String>) -> Self {
        let suffix: u32 = rand::random::<u32>() % 0x1000_0000;
        Self {
            id: format!("art-{suffix:07x}"),
            revision: revision.into(),
            path: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}
