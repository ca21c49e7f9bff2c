//! Resource provisioners
//!
//! One provisioner per topology component. Each validates its specification
//! before touching the provider (configuration errors fail fast, before any
//! dependent resource exists) and reconciles against records left by a
//! previous assembly instead of recreating them.

mod compute;
mod identity;
mod monitor;
mod network;

pub use compute::ComputeProvisioner;
pub use identity::{IdentityProvisioner, KNOWN_MANAGED_POLICIES};
pub use monitor::{
    AlarmEvaluator, AlarmPoller, AlarmProvisioner, AlarmReason, AlarmState, Evaluation,
    MetricSource, StoredMetricSource,
};
pub use network::{NetworkProvisioner, NetworkResources};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::models::ResourceRecord;
use crate::provider::{Provider, ProviderError};

/// Provisioning errors, tagged with the failing component
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error(
        "network: address block {block} cannot hold {requested} /{mask} subnets (capacity {capacity})"
    )]
    InsufficientCapacity {
        block: String,
        requested: u32,
        mask: u8,
        capacity: u64,
    },

    #[error("{component}: invalid specification: {reason}")]
    InvalidSpec {
        component: &'static str,
        reason: String,
    },

    #[error("identity: unknown managed policy '{0}'")]
    UnknownManagedPolicy(String),

    #[error("{component}: {source}")]
    Provider {
        component: &'static str,
        #[source]
        source: ProviderError,
    },
}

impl ProvisionError {
    /// Name of the component that failed
    pub fn component(&self) -> &'static str {
        match self {
            ProvisionError::InsufficientCapacity { .. } => "network",
            ProvisionError::InvalidSpec { component, .. } => component,
            ProvisionError::UnknownManagedPolicy(_) => "identity",
            ProvisionError::Provider { component, .. } => component,
        }
    }
}

/// What reconciliation did to a resource
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyAction {
    /// Resource did not exist and was created
    Created,

    /// Resource existed with a matching specification
    Unchanged,

    /// Resource existed with a diverged specification and was recreated
    Replaced,
}

impl fmt::Display for ApplyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApplyAction::Created => "created",
            ApplyAction::Unchanged => "unchanged",
            ApplyAction::Replaced => "replaced",
        };
        write!(f, "{s}")
    }
}

/// A resource record together with the action reconciliation took
#[derive(Clone, Debug)]
pub struct Provisioned {
    pub record: ResourceRecord,
    pub action: ApplyAction,
}

/// Reconcile one desired record against the provider
///
/// An existing record with a matching fingerprint is kept as-is; a diverged
/// one is replaced; a missing one is created.
pub(crate) async fn apply(
    provider: &dyn Provider,
    component: &'static str,
    desired: ResourceRecord,
) -> Result<Provisioned, ProvisionError> {
    let wrap = |source| ProvisionError::Provider { component, source };

    match provider.find(&desired.logical_id).await.map_err(wrap)? {
        Some(existing) if existing.fingerprint == desired.fingerprint => Ok(Provisioned {
            record: existing,
            action: ApplyAction::Unchanged,
        }),
        Some(_) => {
            provider.delete(&desired.logical_id).await.map_err(wrap)?;
            let record = provider.create(desired).await.map_err(wrap)?;
            Ok(Provisioned {
                record,
                action: ApplyAction::Replaced,
            })
        }
        None => {
            let record = provider.create(desired).await.map_err(wrap)?;
            Ok(Provisioned {
                record,
                action: ApplyAction::Created,
            })
        }
    }
}
