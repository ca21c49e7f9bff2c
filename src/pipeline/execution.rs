//! Pipeline execution
//!
//! Runs one execution through the two stages in order. The deploy stage
//! never starts before the source stage has produced its artifact; a failed
//! source stage terminates the execution with the deploy stage skipped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::SecretStore;
use crate::models::PipelineSpec;
use crate::state::StateStore;

use super::{
    Artifact, DeployError, Deployer, FetchError, SourceFetcher, StageName,
};

/// Terminal and in-flight states of one execution
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Running => "Running",
            ExecutionStatus::Succeeded => "Succeeded",
            ExecutionStatus::Failed => "Failed",
        };
        write!(f, "{s}")
    }
}

/// Outcome of one stage within an execution
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// Record of one stage run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StageOutcome {
    /// Which stage
    pub stage: StageName,

    /// How it ended
    pub status: StageStatus,

    /// Failure cause, if any
    pub error: Option<String>,

    /// When the stage started, if it ran
    pub started_at: Option<DateTime<Utc>>,

    /// When the stage finished, if it ran
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageOutcome {
    fn succeeded(stage: StageName, started_at: DateTime<Utc>) -> Self {
        Self {
            stage,
            status: StageStatus::Succeeded,
            error: None,
            started_at: Some(started_at),
            finished_at: Some(Utc::now()),
        }
    }

    fn failed(stage: StageName, started_at: DateTime<Utc>, error: String) -> Self {
        Self {
            stage,
            status: StageStatus::Failed,
            error: Some(error),
            started_at: Some(started_at),
            finished_at: Some(Utc::now()),
        }
    }

    fn skipped(stage: StageName) -> Self {
        Self {
            stage,
            status: StageStatus::Skipped,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Persisted record of one pipeline execution
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Unique execution id
    pub id: String,

    /// Pipeline name
    pub pipeline: String,

    /// Overall status
    pub status: ExecutionStatus,

    /// Per-stage outcomes, in stage order
    pub stages: Vec<StageOutcome>,

    /// The artifact the source stage produced, if it ran
    pub artifact: Option<Artifact>,

    /// Logical ids of the instances the deploy stage pushed to
    pub targets: Vec<String>,

    /// Whether automatic rollback ran for this execution
    pub rolled_back: bool,

    /// Start timestamp
    pub started_at: DateTime<Utc>,

    /// Finish timestamp
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    fn new(pipeline: &str) -> Self {
        Self {
            id: generate_execution_id(),
            pipeline: pipeline.to_string(),
            status: ExecutionStatus::Running,
            stages: Vec::new(),
            artifact: None,
            targets: Vec::new(),
            rolled_back: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Outcome of a stage, if recorded
    pub fn stage(&self, stage: StageName) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}

/// Generate a unique execution id
fn generate_execution_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let random: u32 = rand::random::<u32>() % 10000;
    format!("{timestamp}_{random:04}")
}

/// Runs pipeline executions
pub struct PipelineExecutor {
    spec: PipelineSpec,
    fetcher: Arc<dyn SourceFetcher>,
    deployer: Deployer,
    secrets: SecretStore,
    store: StateStore,
}

impl PipelineExecutor {
    pub fn new(
        spec: PipelineSpec,
        fetcher: Arc<dyn SourceFetcher>,
        deployer: Deployer,
        secrets: SecretStore,
        store: StateStore,
    ) -> Self {
        Self {
            spec,
            fetcher,
            deployer,
            secrets,
            store,
        }
    }

    /// Run one execution to a terminal state
    ///
    /// Raising `stop` while the deploy stage runs reaches the same rollback
    /// path as a failed push. Stage failures end the execution; they are
    /// reported through the returned record, not as an `Err`.
    pub async fn run(&self, stop: Arc<AtomicBool>) -> anyhow::Result<ExecutionRecord> {
        let mut record = ExecutionRecord::new(&self.spec.name);
        info!(
            "Starting execution {} of pipeline {}",
            record.id, self.spec.name
        );

        let source_started = Utc::now();
        match self.run_source().await {
            Ok(artifact) => {
                record
                    .stages
                    .push(StageOutcome::succeeded(StageName::Source, source_started));
                record.artifact = Some(artifact);
            }
            Err(e) => {
                warn!("Source stage failed: {}", e);
                record
                    .stages
                    .push(StageOutcome::failed(StageName::Source, source_started, e.to_string()));
                record.stages.push(StageOutcome::skipped(StageName::Deploy));
                record.status = ExecutionStatus::Failed;
            }
        }

        // The deploy stage only ever sees an artifact the source stage
        // actually produced.
        if let Some(artifact) = record.artifact.clone() {
            let deploy_started = Utc::now();
            match self.deployer.deploy(&artifact, &stop).await {
                Ok(report) => {
                    record
                        .stages
                        .push(StageOutcome::succeeded(StageName::Deploy, deploy_started));
                    record.targets = report.targets;
                    record.status = ExecutionStatus::Succeeded;
                }
                Err(e) => {
                    warn!("Deploy stage failed: {}", e);
                    record.rolled_back = matches!(
                        e,
                        DeployError::PushFailed { .. } | DeployError::Stopped { .. }
                    );
                    record
                        .stages
                        .push(StageOutcome::failed(StageName::Deploy, deploy_started, e.to_string()));
                    record.status = ExecutionStatus::Failed;
                }
            }
        }

        record.finished_at = Some(Utc::now());
        self.store.save_execution(&record)?;

        info!("Execution {} finished: {}", record.id, record.status);
        Ok(record)
    }

    async fn run_source(&self) -> Result<Artifact, FetchError> {
        let source = &self.spec.source;
        let credential =
            self.secrets
                .resolve(&source.credential_secret)
                .map_err(|e| FetchError::Credential {
                    name: source.credential_secret.clone(),
                    reason: e.to_string(),
                })?;

        info!("Fetching {}@{}", source.slug(), source.branch);
        self.fetcher.fetch(source, &credential).await
    }
}
