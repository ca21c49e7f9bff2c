//! Data models for the Ellipsoid stack
//!
//! This module contains the resource records tracked in durable state and
//! the topology specifications that declare the stack.

mod resource;
mod topology;

pub use resource::{fingerprint, logical_id, ResourceKind, ResourceRecord};
pub use topology::{
    AlarmSpec, Comparison, DeploymentGroupSpec, IdentitySpec, ImageSelector, IngressRule,
    InstanceSpec, MetricId, NetworkSpec, PipelineSpec, Protocol, RollbackPolicy, SourceSpec,
};
