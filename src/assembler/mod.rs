//! Stack assembly
//!
//! Composes the provisioners into one named stack. Components are applied
//! in dependency order; independent branches (network and identity) are
//! applied concurrently because neither needs the other's identifiers. A
//! failure in any component aborts the assembly and removes everything the
//! attempt created, so no partially-assembled stack survives.

mod graph;

pub use graph::{DependencyGraph, GraphError};

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::StackConfig;
use crate::models::{fingerprint, logical_id, ResourceKind, ResourceRecord};
use crate::provider::Provider;
use crate::provision::{
    AlarmProvisioner, ApplyAction, ComputeProvisioner, IdentityProvisioner, NetworkProvisioner,
    ProvisionError, Provisioned,
};
use crate::pipeline::PipelineProvisioner;
use crate::utils::Timer;

/// Assembly errors
#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error("assembly of stack '{stack}' failed: {source}")]
    Component {
        stack: String,
        #[source]
        source: ProvisionError,
    },

    #[error("dependency resolution failed: {0}")]
    Graph(#[from] GraphError),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("cleanup after a failed assembly also failed: {0}")]
    Cleanup(String),
}

impl AssemblyError {
    /// Name of the component that failed, when one did
    pub fn component(&self) -> Option<&'static str> {
        match self {
            AssemblyError::Component { source, .. } => Some(source.component()),
            _ => None,
        }
    }
}

/// One resource in an assembly report
#[derive(Clone, Debug, Serialize)]
pub struct AssemblyEntry {
    pub logical_id: String,
    pub kind: ResourceKind,
    pub physical_id: String,
    pub action: ApplyAction,
}

impl From<&Provisioned> for AssemblyEntry {
    fn from(provisioned: &Provisioned) -> Self {
        Self {
            logical_id: provisioned.record.logical_id.clone(),
            kind: provisioned.record.kind,
            physical_id: provisioned.record.physical_id.clone(),
            action: provisioned.action,
        }
    }
}

/// Result of one assembly
#[derive(Clone, Debug, Serialize)]
pub struct AssemblyReport {
    pub stack: String,
    pub entries: Vec<AssemblyEntry>,
    pub duration_ms: u64,
}

/// One resource in a plan
#[derive(Clone, Debug, Serialize)]
pub struct PlannedResource {
    pub logical_id: String,
    pub kind: ResourceKind,
    pub action: ApplyAction,
    pub depends_on: Vec<String>,
}

/// Assembles one stack against a provider
pub struct StackAssembler {
    config: StackConfig,
    provider: Arc<dyn Provider>,
}

impl StackAssembler {
    pub fn new(config: StackConfig, provider: Arc<dyn Provider>) -> Self {
        Self { config, provider }
    }

    fn component_failed(&self, source: ProvisionError) -> AssemblyError {
        AssemblyError::Component {
            stack: self.config.stack_name.clone(),
            source,
        }
    }

    /// Validate the whole declaration
    ///
    /// All configuration errors surface here, before any resource is
    /// touched.
    pub fn validate(&self) -> Result<(), ProvisionError> {
        self.config.validate()
    }

    /// Apply the whole stack in dependency order
    pub async fn assemble(&self) -> Result<AssemblyReport, AssemblyError> {
        self.validate().map_err(|e| self.component_failed(e))?;

        let timer = Timer::start("assemble");
        info!(
            "Assembling stack {} in {}/{}",
            self.config.stack_name, self.config.account, self.config.region
        );

        // Logical ids that existed before this attempt; anything newer is
        // removed again if the attempt fails.
        let preexisting: BTreeSet<String> = self
            .provider
            .list()
            .await
            .map_err(|e| AssemblyError::Provider(e.to_string()))?
            .into_iter()
            .map(|r| r.logical_id)
            .collect();

        match self.apply_all().await {
            Ok(entries) => {
                let report = AssemblyReport {
                    stack: self.config.stack_name.clone(),
                    entries,
                    duration_ms: timer.elapsed_ms(),
                };
                info!(
                    "Assembled {} resource(s) in {}ms",
                    report.entries.len(),
                    report.duration_ms
                );
                Ok(report)
            }
            Err(source) => {
                warn!("Assembly failed ({}); removing partial state", source);
                self.cleanup(&preexisting).await?;
                Err(self.component_failed(source))
            }
        }
    }

    /// Apply all components in dependency order
    async fn apply_all(&self) -> Result<Vec<AssemblyEntry>, ProvisionError> {
        let network_provisioner = NetworkProvisioner::new(self.provider.clone());
        let identity_provisioner = IdentityProvisioner::new(self.provider.clone());
        let compute_provisioner = ComputeProvisioner::new(self.provider.clone());
        let pipeline_provisioner = PipelineProvisioner::new(self.provider.clone());
        let alarm_provisioner = AlarmProvisioner::new(self.provider.clone());

        // Independent branches; neither needs the other's identifiers.
        let (network, role) = futures::future::try_join(
            network_provisioner.provision(&self.config.network),
            identity_provisioner.provision(&self.config.identity),
        )
        .await?;

        let instance = compute_provisioner
            .provision(
                &self.config.instance,
                &self.config.pipeline.deployment_group.target_tag_key,
                &network.subnets[0].record,
                &network.security_group.record,
                &role.record,
            )
            .await?;

        let pipeline = pipeline_provisioner
            .provision(&self.config.pipeline)
            .await?;

        let alarm = alarm_provisioner.provision(&self.config.alarm).await?;

        let mut entries = vec![AssemblyEntry::from(&network.network)];
        entries.extend(network.subnets.iter().map(AssemblyEntry::from));
        entries.push(AssemblyEntry::from(&network.security_group));
        entries.push(AssemblyEntry::from(&role));
        entries.push(AssemblyEntry::from(&instance));
        entries.push(AssemblyEntry::from(&pipeline.application));
        entries.push(AssemblyEntry::from(&pipeline.deployment_group));
        entries.push(AssemblyEntry::from(&pipeline.pipeline));
        entries.push(AssemblyEntry::from(&alarm));
        Ok(entries)
    }

    /// Remove everything a failed attempt created
    async fn cleanup(&self, preexisting: &BTreeSet<String>) -> Result<(), AssemblyError> {
        let records = self
            .provider
            .list()
            .await
            .map_err(|e| AssemblyError::Cleanup(e.to_string()))?;

        let mut created: Vec<ResourceRecord> = records
            .into_iter()
            .filter(|r| !preexisting.contains(&r.logical_id))
            .collect();

        // Dependents first.
        let rank = |kind: ResourceKind| {
            ResourceKind::all().iter().position(|k| *k == kind).unwrap_or(0)
        };
        created.sort_by(|a, b| rank(b.kind).cmp(&rank(a.kind)));

        for record in created {
            if let Err(e) = self.provider.delete(&record.logical_id).await {
                return Err(AssemblyError::Cleanup(format!(
                    "{}: {e}",
                    record.logical_id
                )));
            }
        }

        Ok(())
    }

    /// Render the dependency-resolved creation order without applying
    pub async fn plan(&self) -> Result<Vec<PlannedResource>, AssemblyError> {
        self.validate().map_err(|e| self.component_failed(e))?;

        let config = &self.config;
        let network_print = fingerprint(&config.network);
        let identity_print = fingerprint(&config.identity);
        let pipeline_print = fingerprint(&config.pipeline);
        let alarm_print = fingerprint(&config.alarm);

        let network_id = logical_id(ResourceKind::Network, &config.network.name);
        let group_id = logical_id(
            ResourceKind::DeploymentGroup,
            &config.pipeline.deployment_group.name,
        );
        let application_id = logical_id(ResourceKind::Application, &config.pipeline.application);
        let instance_id = logical_id(ResourceKind::Instance, &config.instance.name);
        let role_id = logical_id(ResourceKind::Role, &config.identity.role_name);
        let subnet0_id = logical_id(
            ResourceKind::Subnet,
            &format!("{}0", config.network.subnet_name),
        );
        let group_sg_id =
            logical_id(ResourceKind::SecurityGroup, &config.network.security_group);

        let mut plan = Vec::new();

        plan.push(
            self.planned(ResourceKind::Network, &config.network.name, &network_print, vec![])
                .await?,
        );
        for index in 0..config.network.public_subnets {
            let name = format!("{}{index}", config.network.subnet_name);
            plan.push(
                self.planned(ResourceKind::Subnet, &name, &network_print, vec![network_id.clone()])
                    .await?,
            );
        }
        plan.push(
            self.planned(
                ResourceKind::SecurityGroup,
                &config.network.security_group,
                &network_print,
                vec![network_id.clone()],
            )
            .await?,
        );
        plan.push(
            self.planned(ResourceKind::Role, &config.identity.role_name, &identity_print, vec![])
                .await?,
        );

        // The instance fingerprint folds in its dependencies' physical ids,
        // so a replaced network cascades into a replaced instance.
        let dependency_ids = {
            let subnet = self.existing_physical_id(&subnet0_id).await?;
            let sg = self.existing_physical_id(&group_sg_id).await?;
            let role = self.existing_physical_id(&role_id).await?;
            match (subnet, sg, role) {
                (Some(subnet), Some(sg), Some(role)) => Some((subnet, sg, role)),
                _ => None,
            }
        };
        let instance_plan = match dependency_ids {
            Some((subnet, sg, role)) => {
                let print = fingerprint(&(&config.instance, &subnet, &sg, &role));
                self.planned(
                    ResourceKind::Instance,
                    &config.instance.name,
                    &print,
                    vec![subnet0_id.clone(), group_sg_id.clone(), role_id.clone()],
                )
                .await?
            }
            None => PlannedResource {
                logical_id: instance_id.clone(),
                kind: ResourceKind::Instance,
                action: if self.existing_physical_id(&instance_id).await?.is_some() {
                    ApplyAction::Replaced
                } else {
                    ApplyAction::Created
                },
                depends_on: vec![subnet0_id.clone(), group_sg_id.clone(), role_id.clone()],
            },
        };
        plan.push(instance_plan);

        plan.push(
            self.planned(
                ResourceKind::Application,
                &config.pipeline.application,
                &pipeline_print,
                vec![],
            )
            .await?,
        );
        plan.push(
            self.planned(
                ResourceKind::DeploymentGroup,
                &config.pipeline.deployment_group.name,
                &pipeline_print,
                vec![application_id.clone(), instance_id.clone()],
            )
            .await?,
        );
        plan.push(
            self.planned(
                ResourceKind::Pipeline,
                &config.pipeline.name,
                &pipeline_print,
                vec![group_id.clone()],
            )
            .await?,
        );
        plan.push(
            self.planned(ResourceKind::Alarm, &config.alarm.name, &alarm_print, vec![])
                .await?,
        );

        Ok(plan)
    }

    async fn planned(
        &self,
        kind: ResourceKind,
        name: &str,
        print: &str,
        depends_on: Vec<String>,
    ) -> Result<PlannedResource, AssemblyError> {
        let id = logical_id(kind, name);
        let existing = self
            .provider
            .find(&id)
            .await
            .map_err(|e| AssemblyError::Provider(e.to_string()))?;

        let action = match existing {
            Some(record) if record.fingerprint == print => ApplyAction::Unchanged,
            Some(_) => ApplyAction::Replaced,
            None => ApplyAction::Created,
        };

        Ok(PlannedResource {
            logical_id: id,
            kind,
            action,
            depends_on,
        })
    }

    async fn existing_physical_id(&self, id: &str) -> Result<Option<String>, AssemblyError> {
        Ok(self
            .provider
            .find(id)
            .await
            .map_err(|e| AssemblyError::Provider(e.to_string()))?
            .map(|r| r.physical_id))
    }

    /// Tear the whole stack down, dependents first
    pub async fn teardown(&self) -> Result<usize, AssemblyError> {
        let records = self
            .provider
            .list()
            .await
            .map_err(|e| AssemblyError::Provider(e.to_string()))?;

        let mut graph = DependencyGraph::new();
        for record in &records {
            graph.add_node(record.logical_id.clone());
        }
        for record in &records {
            for dep in &record.depends_on {
                if records.iter().any(|r| &r.logical_id == dep) {
                    graph.depend(record.logical_id.clone(), dep.clone())?;
                }
            }
        }

        let order = graph.teardown_order()?;
        info!(
            "Tearing down stack {} ({} resources)",
            self.config.stack_name,
            order.len()
        );

        let mut removed = 0;
        for id in order {
            match self.provider.delete(&id).await {
                Ok(()) => removed += 1,
                Err(crate::provider::ProviderError::NotFound(_)) => {}
                Err(e) => return Err(AssemblyError::Provider(format!("{id}: {e}"))),
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{LocalProvider, ProviderError};
    use crate::state::{StackState, StateStore};
    use async_trait::async_trait;

    fn temp_assembler() -> (tempfile::TempDir, StackAssembler, Arc<dyn Provider>) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let config = StackConfig::default();
        let provider: Arc<dyn Provider> = Arc::new(LocalProvider::open(
            store,
            StackState::new(&config.stack_name, &config.account, &config.region),
        ));
        let assembler = StackAssembler::new(config, provider.clone());
        (dir, assembler, provider)
    }

    #[tokio::test]
    async fn test_assemble_creates_whole_topology() {
        let (_dir, assembler, provider) = temp_assembler();

        let report = assembler.assemble().await.unwrap();

        assert_eq!(report.entries.len(), 9);
        assert!(report.entries.iter().all(|e| e.action == ApplyAction::Created));

        for id in [
            "net/EllipsoidVPC",
            "subnet/EllipsoidPublicSubnet0",
            "sg/EllipsoidSecurityGroup",
            "role/ellipsoid-webserver-role",
            "i/EllipsoidInstance",
            "app/EllipsoidCodeDeploy",
            "dg/DeployEllipsoidAppserverGroup",
            "pipe/EllipsoidPipeline",
            "alarm/EllipsoidCeleryAlarm",
        ] {
            assert!(provider.find(id).await.unwrap().is_some(), "missing {id}");
        }
    }

    #[tokio::test]
    async fn test_reassembly_is_idempotent() {
        let (_dir, assembler, provider) = temp_assembler();

        let first = assembler.assemble().await.unwrap();
        let graph_before: Vec<(String, String)> = {
            let mut records = provider.list().await.unwrap();
            records.sort_by(|a, b| a.logical_id.cmp(&b.logical_id));
            records
                .iter()
                .map(|r| (r.logical_id.clone(), r.physical_id.clone()))
                .collect()
        };

        let second = assembler.assemble().await.unwrap();
        assert!(second.entries.iter().all(|e| e.action == ApplyAction::Unchanged));
        assert_eq!(first.entries.len(), second.entries.len());

        // Identical resource graph: same ids, same physical identifiers, no
        // duplicates.
        let graph_after: Vec<(String, String)> = {
            let mut records = provider.list().await.unwrap();
            records.sort_by(|a, b| a.logical_id.cmp(&b.logical_id));
            records
                .iter()
                .map(|r| (r.logical_id.clone(), r.physical_id.clone()))
                .collect()
        };
        assert_eq!(graph_before, graph_after);
    }

    #[tokio::test]
    async fn test_config_error_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let mut config = StackConfig::default();
        config.identity.managed_policies = vec!["AdministratorAccess".to_string()];

        let provider: Arc<dyn Provider> = Arc::new(LocalProvider::open(
            store,
            StackState::new(&config.stack_name, &config.account, &config.region),
        ));
        let assembler = StackAssembler::new(config, provider.clone());

        let err = assembler.assemble().await.unwrap_err();
        assert_eq!(err.component(), Some("identity"));
        assert!(provider.list().await.unwrap().is_empty());
    }

    /// Provider that refuses to create instances, to force a mid-assembly
    /// failure after the network and role already exist
    struct InstanceRejectingProvider {
        inner: Arc<dyn Provider>,
    }

    #[async_trait]
    impl Provider for InstanceRejectingProvider {
        async fn create(
            &self,
            record: crate::models::ResourceRecord,
        ) -> Result<crate::models::ResourceRecord, ProviderError> {
            if record.kind == ResourceKind::Instance {
                return Err(ProviderError::Invalid("capacity exhausted".to_string()));
            }
            self.inner.create(record).await
        }

        async fn find(
            &self,
            logical_id: &str,
        ) -> Result<Option<crate::models::ResourceRecord>, ProviderError> {
            self.inner.find(logical_id).await
        }

        async fn delete(&self, logical_id: &str) -> Result<(), ProviderError> {
            self.inner.delete(logical_id).await
        }

        async fn list(&self) -> Result<Vec<crate::models::ResourceRecord>, ProviderError> {
            self.inner.list().await
        }

        async fn instances_by_tag(
            &self,
            key: &str,
            value: &str,
        ) -> Result<Vec<crate::models::ResourceRecord>, ProviderError> {
            self.inner.instances_by_tag(key, value).await
        }

        async fn set_attribute(
            &self,
            logical_id: &str,
            key: &str,
            value: &str,
        ) -> Result<(), ProviderError> {
            self.inner.set_attribute(logical_id, key, value).await
        }
    }

    #[tokio::test]
    async fn test_component_failure_rolls_back_the_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let config = StackConfig::default();
        let inner: Arc<dyn Provider> = Arc::new(LocalProvider::open(
            store,
            StackState::new(&config.stack_name, &config.account, &config.region),
        ));
        let provider: Arc<dyn Provider> = Arc::new(InstanceRejectingProvider {
            inner: inner.clone(),
        });
        let assembler = StackAssembler::new(config, provider);

        let err = assembler.assemble().await.unwrap_err();
        assert_eq!(err.component(), Some("compute"));

        // Network and role were created before compute failed; the failed
        // attempt leaves nothing behind.
        assert!(inner.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_plan_before_and_after_assembly() {
        let (_dir, assembler, _provider) = temp_assembler();

        let plan = assembler.plan().await.unwrap();
        assert_eq!(plan.len(), 9);
        assert!(plan.iter().all(|p| p.action == ApplyAction::Created));

        assembler.assemble().await.unwrap();

        let plan = assembler.plan().await.unwrap();
        assert!(plan.iter().all(|p| p.action == ApplyAction::Unchanged));
    }

    #[tokio::test]
    async fn test_teardown_removes_everything() {
        let (_dir, assembler, provider) = temp_assembler();

        assembler.assemble().await.unwrap();
        let removed = assembler.teardown().await.unwrap();

        assert_eq!(removed, 9);
        assert!(provider.list().await.unwrap().is_empty());
    }
}
