//! Pipeline provisioning
//!
//! Creates the deployable application, the deployment group, and the
//! pipeline definition itself. Group invariants are enforced at creation
//! time: the deployment agent is installed on targets, alarm polls are
//! never ignored, and rollback covers both failure and stop.

use std::sync::Arc;
use tracing::info;

use crate::models::{fingerprint, PipelineSpec, ResourceKind, ResourceRecord};
use crate::provider::Provider;
use crate::provision::{apply, ProvisionError, Provisioned};

use super::{Stage, StageName};

/// Action name of the deploy stage
const DEPLOY_ACTION: &str = "CodeDeploy";

/// The provisioned pipeline and its parts
#[derive(Clone, Debug)]
pub struct PipelineResources {
    pub application: Provisioned,
    pub deployment_group: Provisioned,
    pub pipeline: Provisioned,
}

/// Pipeline provisioner
pub struct PipelineProvisioner {
    provider: Arc<dyn Provider>,
}

impl PipelineProvisioner {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    /// Validate the specification without touching the provider
    pub fn validate(spec: &PipelineSpec) -> Result<(), ProvisionError> {
        let invalid = |reason: String| ProvisionError::InvalidSpec {
            component: "pipeline",
            reason,
        };

        if spec.name.is_empty() {
            return Err(invalid("pipeline name is empty".to_string()));
        }
        if spec.application.is_empty() {
            return Err(invalid("application name is empty".to_string()));
        }
        if spec.source.owner.is_empty() || spec.source.repo.is_empty() {
            return Err(invalid("source repository is incomplete".to_string()));
        }
        if spec.source.branch.is_empty() {
            return Err(invalid("source branch is empty".to_string()));
        }
        if spec.source.credential_secret.is_empty() {
            return Err(invalid("credential secret name is empty".to_string()));
        }

        let group = &spec.deployment_group;
        if group.name.is_empty() {
            return Err(invalid("deployment group name is empty".to_string()));
        }
        if group.target_tag_key.is_empty() || group.target_tag_value.is_empty() {
            return Err(invalid("deployment target tag is incomplete".to_string()));
        }
        if !group.install_agent {
            return Err(invalid(
                "the deployment agent must be installed on targets".to_string(),
            ));
        }
        if group.ignore_poll_alarms_failure {
            return Err(invalid(
                "alarm polls cannot be ignored during deployment".to_string(),
            ));
        }
        if !group.rollback.on_failure || !group.rollback.on_stop {
            return Err(invalid(
                "rollback must cover both failed and stopped deployments".to_string(),
            ));
        }

        Ok(())
    }

    /// Provision the application, group, and pipeline definition
    pub async fn provision(
        &self,
        spec: &PipelineSpec,
    ) -> Result<PipelineResources, ProvisionError> {
        Self::validate(spec)?;

        let print = fingerprint(spec);
        let group = &spec.deployment_group;

        info!("Provisioning pipeline {}", spec.name);

        let application = apply(
            self.provider.as_ref(),
            "pipeline",
            ResourceRecord::new(ResourceKind::Application, &spec.application)
                .fingerprint(&print),
        )
        .await?;

        // Targets are matched by tag only; the dependency edges record that
        // the agent is installed on the instances existing at creation time.
        let wrap = |source| ProvisionError::Provider {
            component: "pipeline",
            source,
        };
        let targets = self
            .provider
            .instances_by_tag(&group.target_tag_key, &group.target_tag_value)
            .await
            .map_err(wrap)?;

        let mut group_record = ResourceRecord::new(ResourceKind::DeploymentGroup, &group.name)
            .attribute("application", &spec.application)
            .attribute("target_tag_key", &group.target_tag_key)
            .attribute("target_tag_value", &group.target_tag_value)
            .attribute("install_agent", "true")
            .attribute("ignore_poll_alarms_failure", "false")
            .attribute("rollback_on_failure", "true")
            .attribute("rollback_on_stop", "true")
            .depends_on(application.record.logical_id.clone())
            .fingerprint(&print);
        for target in &targets {
            group_record = group_record.depends_on(target.logical_id.clone());
        }

        let deployment_group = apply(self.provider.as_ref(), "pipeline", group_record).await?;

        for target in &targets {
            self.provider
                .set_attribute(&target.logical_id, "agent_installed", "true")
                .await
                .map_err(wrap)?;
        }

        let stages = vec![
            Stage {
                name: StageName::Source.as_str().to_string(),
                actions: vec![spec.source.action_name.clone()],
            },
            Stage {
                name: StageName::Deploy.as_str().to_string(),
                actions: vec![DEPLOY_ACTION.to_string()],
            },
        ];
        let stages_json =
            serde_json::to_string(&stages).map_err(|e| ProvisionError::InvalidSpec {
                component: "pipeline",
                reason: format!("cannot encode stages: {e}"),
            })?;

        let pipeline = apply(
            self.provider.as_ref(),
            "pipeline",
            ResourceRecord::new(ResourceKind::Pipeline, &spec.name)
                .attribute("stages", stages_json)
                .attribute("source_owner", &spec.source.owner)
                .attribute("source_repo", &spec.source.repo)
                .attribute("source_branch", &spec.source.branch)
                .attribute("credential_secret", &spec.source.credential_secret)
                .depends_on(deployment_group.record.logical_id.clone())
                .fingerprint(&print),
        )
        .await?;

        Ok(PipelineResources {
            application,
            deployment_group,
            pipeline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RollbackPolicy;
    use crate::provider::LocalProvider;
    use crate::state::{StackState, StateStore};

    fn temp_provider() -> (tempfile::TempDir, Arc<dyn Provider>) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let provider = LocalProvider::open(store, StackState::new("ellipsoid", "a", "r"));
        (dir, Arc::new(provider))
    }

    #[tokio::test]
    async fn test_provision_pipeline_trio() {
        let (_dir, provider) = temp_provider();
        let provisioner = PipelineProvisioner::new(provider.clone());

        let resources = provisioner.provision(&PipelineSpec::default()).await.unwrap();

        assert!(provider.find("app/EllipsoidCodeDeploy").await.unwrap().is_some());
        assert!(provider
            .find("dg/DeployEllipsoidAppserverGroup")
            .await
            .unwrap()
            .is_some());

        let pipeline = provider.find("pipe/EllipsoidPipeline").await.unwrap().unwrap();
        let stages: Vec<Stage> =
            serde_json::from_str(pipeline.attr("stages").unwrap()).unwrap();
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0].name, "SourceStage");
        assert_eq!(stages[1].name, "Deploy");

        assert_eq!(
            resources.deployment_group.record.attr("ignore_poll_alarms_failure"),
            Some("false")
        );
        // The stored credential is a name, never a value.
        assert_eq!(
            pipeline.attr("credential_secret"),
            Some("ellipsoid/github/token")
        );
    }

    #[tokio::test]
    async fn test_partial_rollback_policy_rejected() {
        let mut spec = PipelineSpec::default();
        spec.deployment_group.rollback = RollbackPolicy {
            on_failure: true,
            on_stop: false,
        };

        let err = PipelineProvisioner::validate(&spec).unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidSpec { component: "pipeline", .. }));
    }

    #[tokio::test]
    async fn test_ignored_alarm_polls_rejected() {
        let mut spec = PipelineSpec::default();
        spec.deployment_group.ignore_poll_alarms_failure = true;

        assert!(PipelineProvisioner::validate(&spec).is_err());
    }

    #[tokio::test]
    async fn test_missing_agent_rejected() {
        let mut spec = PipelineSpec::default();
        spec.deployment_group.install_agent = false;

        assert!(PipelineProvisioner::validate(&spec).is_err());
    }

    #[tokio::test]
    async fn test_empty_branch_rejected() {
        let mut spec = PipelineSpec::default();
        spec.source.branch = String::new();

        assert!(PipelineProvisioner::validate(&spec).is_err());
    }
}
