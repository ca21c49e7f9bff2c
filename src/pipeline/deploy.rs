//! Deploy stage
//!
//! Pushes the source artifact to every instance matching the deployment
//! group's tag predicate through the in-instance agent. A failed push or an
//! explicit stop rolls back every targeted instance to its prior revision in
//! one operation; alarm state is polled first and an unhealthy system blocks
//! the rollout entirely.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{logical_id, DeploymentGroupSpec, ResourceKind, ResourceRecord};
use crate::provider::Provider;
use crate::provision::{AlarmPoller, AlarmState};

use super::Artifact;

/// Instance attribute holding the currently deployed revision
pub const DEPLOYED_REVISION_ATTR: &str = "deployed_revision";

/// Group attribute holding the last revision that deployed everywhere
pub const LAST_GOOD_REVISION_ATTR: &str = "last_good_revision";

/// Deployment agent errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("push to {instance} failed: {reason}")]
    PushFailed { instance: String, reason: String },

    #[error("rollback of {instance} failed: {reason}")]
    RollbackFailed { instance: String, reason: String },
}

/// The in-instance deployment agent
#[async_trait]
pub trait DeployAgent: Send + Sync {
    /// Push an artifact onto one instance
    async fn push(&self, instance: &ResourceRecord, artifact: &Artifact) -> Result<(), AgentError>;

    /// Revert one instance to a prior revision, or to nothing if it had none
    async fn rollback(
        &self,
        instance: &ResourceRecord,
        revision: Option<&str>,
    ) -> Result<(), AgentError>;
}

/// Agent that records deployed revisions on the instance's resource record
pub struct LocalAgent {
    provider: Arc<dyn Provider>,
}

impl LocalAgent {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl DeployAgent for LocalAgent {
    async fn push(&self, instance: &ResourceRecord, artifact: &Artifact) -> Result<(), AgentError> {
        self.provider
            .set_attribute(&instance.logical_id, DEPLOYED_REVISION_ATTR, &artifact.revision)
            .await
            .map_err(|e| AgentError::PushFailed {
                instance: instance.logical_id.clone(),
                reason: e.to_string(),
            })
    }

    async fn rollback(
        &self,
        instance: &ResourceRecord,
        revision: Option<&str>,
    ) -> Result<(), AgentError> {
        self.provider
            .set_attribute(
                &instance.logical_id,
                DEPLOYED_REVISION_ATTR,
                revision.unwrap_or(""),
            )
            .await
            .map_err(|e| AgentError::RollbackFailed {
                instance: instance.logical_id.clone(),
                reason: e.to_string(),
            })
    }
}

/// Deploy stage errors
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("alarm {alarm} is in ALARM state ({detail}); rollout blocked")]
    AlarmBlocked { alarm: String, detail: String },

    #[error("alarm poll failed: {0}")]
    AlarmPoll(String),

    #[error("no instances match tag {key}={value}")]
    NoTargets { key: String, value: String },

    #[error("deployment to {instance} failed: {reason}; rolled back {count} target(s)")]
    PushFailed {
        instance: String,
        reason: String,
        count: usize,
    },

    #[error("deployment stopped; rolled back {count} target(s)")]
    Stopped { count: usize },

    #[error("rollback failed: {0}")]
    Rollback(String),

    #[error("provider error: {0}")]
    Provider(String),
}

/// Successful deploy stage outcome
#[derive(Clone, Debug)]
pub struct DeployReport {
    /// Logical ids of every targeted instance
    pub targets: Vec<String>,

    /// Revision now deployed everywhere
    pub revision: String,
}

/// Runs the deploy stage for one deployment group
pub struct Deployer {
    group: DeploymentGroupSpec,
    provider: Arc<dyn Provider>,
    agent: Arc<dyn DeployAgent>,
    alarm: Arc<dyn AlarmPoller>,
}

impl Deployer {
    pub fn new(
        group: DeploymentGroupSpec,
        provider: Arc<dyn Provider>,
        agent: Arc<dyn DeployAgent>,
        alarm: Arc<dyn AlarmPoller>,
    ) -> Self {
        Self {
            group,
            provider,
            agent,
            alarm,
        }
    }

    /// Push the artifact to all current targets
    ///
    /// Once any push has begun, a failure or a raised stop flag rolls back
    /// every target, in one pass, exactly once.
    pub async fn deploy(
        &self,
        artifact: &Artifact,
        stop: &AtomicBool,
    ) -> Result<DeployReport, DeployError> {
        // Poll failures are never ignored: an unreadable or breaching alarm
        // blocks the rollout before anything is pushed.
        let evaluation = self
            .alarm
            .poll()
            .await
            .map_err(|e| DeployError::AlarmPoll(e.to_string()))?;
        if evaluation.state == AlarmState::Alarm {
            let detail = evaluation.describe();
            return Err(DeployError::AlarmBlocked {
                alarm: evaluation.alarm,
                detail,
            });
        }

        let targets = self
            .provider
            .instances_by_tag(&self.group.target_tag_key, &self.group.target_tag_value)
            .await
            .map_err(|e| DeployError::Provider(e.to_string()))?;
        if targets.is_empty() {
            return Err(DeployError::NoTargets {
                key: self.group.target_tag_key.clone(),
                value: self.group.target_tag_value.clone(),
            });
        }

        info!(
            "Deploying revision {} to {} instance(s) tagged {}={}",
            artifact.revision,
            targets.len(),
            self.group.target_tag_key,
            self.group.target_tag_value
        );

        // Rollback points: what each target was running before this push.
        let prior: Vec<(ResourceRecord, Option<String>)> = targets
            .iter()
            .map(|t| (t.clone(), t.attr(DEPLOYED_REVISION_ATTR).map(String::from)))
            .collect();

        let mut failure: Option<(String, String)> = None;
        let mut stopped = false;

        for target in &targets {
            if stop.load(Ordering::SeqCst) {
                stopped = true;
                break;
            }

            if let Err(e) = self.agent.push(target, artifact).await {
                failure = Some((target.logical_id.clone(), e.to_string()));
                break;
            }
        }

        if let Some((instance, reason)) = failure {
            warn!("Push to {} failed: {}", instance, reason);
            let count = self.rollback_all(&prior).await?;
            return Err(DeployError::PushFailed {
                instance,
                reason,
                count,
            });
        }

        if stopped {
            warn!("Deployment of {} stopped", artifact.id);
            let count = self.rollback_all(&prior).await?;
            return Err(DeployError::Stopped { count });
        }

        let group_id = logical_id(ResourceKind::DeploymentGroup, &self.group.name);
        self.provider
            .set_attribute(&group_id, LAST_GOOD_REVISION_ATTR, &artifact.revision)
            .await
            .map_err(|e| DeployError::Provider(e.to_string()))?;

        info!("Deployed revision {} to all targets", artifact.revision);
        Ok(DeployReport {
            targets: targets.iter().map(|t| t.logical_id.clone()).collect(),
            revision: artifact.revision.clone(),
        })
    }

    /// Revert every target to its pre-execution revision
    async fn rollback_all(
        &self,
        prior: &[(ResourceRecord, Option<String>)],
    ) -> Result<usize, DeployError> {
        info!("Rolling back {} target(s)", prior.len());

        let mut count = 0;
        for (record, revision) in prior {
            self.agent
                .rollback(record, revision.as_deref())
                .await
                .map_err(|e| DeployError::Rollback(e.to_string()))?;
            count += 1;
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InstanceSpec, ResourceKind};
    use crate::provider::LocalProvider;
    use crate::provision::{AlarmReason, Evaluation};
    use crate::state::{StackState, StateStore};
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    struct StubAlarm {
        state: AlarmState,
    }

    #[async_trait]
    impl AlarmPoller for StubAlarm {
        async fn poll(&self) -> anyhow::Result<Evaluation> {
            Ok(Evaluation {
                alarm: "EllipsoidCeleryAlarm".to_string(),
                state: self.state,
                reason: match self.state {
                    AlarmState::Ok => AlarmReason::WithinThreshold(1.0),
                    AlarmState::Alarm => AlarmReason::MissingData,
                },
                threshold: 0.0,
                evaluated_at: Utc::now(),
            })
        }
    }

    /// Agent that fails pushes to the named instances and counts rollbacks
    struct ScriptedAgent {
        fail_on: Vec<String>,
        pushes: AtomicUsize,
        rollbacks: Mutex<Vec<(String, Option<String>)>>,
    }

    impl ScriptedAgent {
        fn new(fail_on: Vec<String>) -> Self {
            Self {
                fail_on,
                pushes: AtomicUsize::new(0),
                rollbacks: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DeployAgent for ScriptedAgent {
        async fn push(
            &self,
            instance: &ResourceRecord,
            _artifact: &Artifact,
        ) -> Result<(), AgentError> {
            if self.fail_on.contains(&instance.logical_id) {
                return Err(AgentError::PushFailed {
                    instance: instance.logical_id.clone(),
                    reason: "agent rejected revision".to_string(),
                });
            }
            self.pushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn rollback(
            &self,
            instance: &ResourceRecord,
            revision: Option<&str>,
        ) -> Result<(), AgentError> {
            self.rollbacks
                .lock()
                .unwrap()
                .push((instance.logical_id.clone(), revision.map(String::from)));
            Ok(())
        }
    }

    async fn seeded_provider(instances: &[&str]) -> Arc<dyn Provider> {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.keep());
        let provider = LocalProvider::open(store, StackState::new("ellipsoid", "a", "r"));

        for name in instances {
            provider
                .create(
                    ResourceRecord::new(ResourceKind::Instance, name)
                        .tag("Name", "EllipsoidInstance")
                        .attribute(DEPLOYED_REVISION_ATTR, "rev-old"),
                )
                .await
                .unwrap();
        }
        provider
            .create(ResourceRecord::new(
                ResourceKind::DeploymentGroup,
                "DeployEllipsoidAppserverGroup",
            ))
            .await
            .unwrap();

        Arc::new(provider)
    }

    fn group() -> DeploymentGroupSpec {
        DeploymentGroupSpec::default()
    }

    #[tokio::test]
    async fn test_successful_deploy_updates_all_targets() {
        let provider = seeded_provider(&["a", "b"]).await;
        let agent = Arc::new(ScriptedAgent::new(Vec::new()));
        let deployer = Deployer::new(
            group(),
            provider.clone(),
            agent.clone(),
            Arc::new(StubAlarm {
                state: AlarmState::Ok,
            }),
        );

        let artifact = Artifact::new("rev-new");
        let report = deployer.deploy(&artifact, &AtomicBool::new(false)).await.unwrap();

        assert_eq!(report.targets.len(), 2);
        assert_eq!(agent.pushes.load(Ordering::SeqCst), 2);
        assert!(agent.rollbacks.lock().unwrap().is_empty());

        let dg = provider
            .find("dg/DeployEllipsoidAppserverGroup")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dg.attr(LAST_GOOD_REVISION_ATTR), Some("rev-new"));
    }

    #[tokio::test]
    async fn test_one_failed_push_rolls_back_every_target() {
        let provider = seeded_provider(&["a", "b", "c"]).await;
        let agent = Arc::new(ScriptedAgent::new(vec!["i/b".to_string()]));
        let deployer = Deployer::new(
            group(),
            provider,
            agent.clone(),
            Arc::new(StubAlarm {
                state: AlarmState::Ok,
            }),
        );

        let err = deployer
            .deploy(&Artifact::new("rev-new"), &AtomicBool::new(false))
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::PushFailed { count: 3, .. }));

        // All three targets reverted in a single pass, including the ones
        // that never saw the new revision.
        let rollbacks = agent.rollbacks.lock().unwrap();
        assert_eq!(rollbacks.len(), 3);
        assert!(rollbacks.iter().all(|(_, rev)| rev.as_deref() == Some("rev-old")));
    }

    #[tokio::test]
    async fn test_stop_reaches_the_same_rollback_path() {
        let provider = seeded_provider(&["a", "b"]).await;
        let agent = Arc::new(ScriptedAgent::new(Vec::new()));
        let deployer = Deployer::new(
            group(),
            provider,
            agent.clone(),
            Arc::new(StubAlarm {
                state: AlarmState::Ok,
            }),
        );

        let err = deployer
            .deploy(&Artifact::new("rev-new"), &AtomicBool::new(true))
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::Stopped { count: 2 }));
        assert_eq!(agent.rollbacks.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_alarm_blocks_rollout_before_any_push() {
        let provider = seeded_provider(&["a"]).await;
        let agent = Arc::new(ScriptedAgent::new(Vec::new()));
        let deployer = Deployer::new(
            group(),
            provider,
            agent.clone(),
            Arc::new(StubAlarm {
                state: AlarmState::Alarm,
            }),
        );

        let err = deployer
            .deploy(&Artifact::new("rev-new"), &AtomicBool::new(false))
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::AlarmBlocked { .. }));
        assert_eq!(agent.pushes.load(Ordering::SeqCst), 0);
        assert!(agent.rollbacks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_matching_targets_is_an_error() {
        let provider = seeded_provider(&[]).await;
        let deployer = Deployer::new(
            group(),
            provider,
            Arc::new(ScriptedAgent::new(Vec::new())),
            Arc::new(StubAlarm {
                state: AlarmState::Ok,
            }),
        );

        let err = deployer
            .deploy(&Artifact::new("rev-new"), &AtomicBool::new(false))
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::NoTargets { .. }));
    }

    #[tokio::test]
    async fn test_local_agent_round_trip() {
        let provider = seeded_provider(&["a"]).await;
        let agent = LocalAgent::new(provider.clone());

        let instance = provider.find("i/a").await.unwrap().unwrap();
        let artifact = Artifact::new("rev-new");

        agent.push(&instance, &artifact).await.unwrap();
        let updated = provider.find("i/a").await.unwrap().unwrap();
        assert_eq!(updated.attr(DEPLOYED_REVISION_ATTR), Some("rev-new"));

        agent.rollback(&instance, Some("rev-old")).await.unwrap();
        let reverted = provider.find("i/a").await.unwrap().unwrap();
        assert_eq!(reverted.attr(DEPLOYED_REVISION_ATTR), Some("rev-old"));
    }
}
