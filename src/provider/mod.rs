//! Provider seam for the apply mechanism
//!
//! Provisioners and the deploy stage talk to the target environment through
//! the [`Provider`] trait. The default implementation is backed by the
//! durable state store, so the tool plans, applies, and reconciles without a
//! remote control plane; tests exercise the same trait.

mod local;

pub use local::LocalProvider;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::ResourceRecord;

/// Provider errors
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("resource already exists: {0}")]
    AlreadyExists(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("state store error: {0}")]
    Storage(String),
}

/// The apply mechanism behind every provisioner
///
/// A `create` call is atomic: the record becomes visible with its tags and
/// attributes in one step, so a deploy action selecting by tag never
/// observes a half-created resource.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Create a resource; fails if the logical id already exists
    async fn create(&self, record: ResourceRecord) -> Result<ResourceRecord, ProviderError>;

    /// Find a resource by logical id
    async fn find(&self, logical_id: &str) -> Result<Option<ResourceRecord>, ProviderError>;

    /// Delete a resource by logical id
    async fn delete(&self, logical_id: &str) -> Result<(), ProviderError>;

    /// List all resources
    async fn list(&self) -> Result<Vec<ResourceRecord>, ProviderError>;

    /// List instances matching a tag key/value pair
    async fn instances_by_tag(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Vec<ResourceRecord>, ProviderError>;

    /// Update one attribute on an existing resource
    async fn set_attribute(
        &self,
        logical_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), ProviderError>;
}
