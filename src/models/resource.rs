//! Resource records and identifiers
//!
//! Every entity the stack owns is tracked as a [`ResourceRecord`] in durable
//! state, keyed by a logical id derived from its kind and declared name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Kinds of resources a stack can own
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Network,
    Subnet,
    SecurityGroup,
    Role,
    Instance,
    Application,
    DeploymentGroup,
    Pipeline,
    Alarm,
}

impl ResourceKind {
    /// Get display name
    pub fn name(&self) -> &'static str {
        match self {
            ResourceKind::Network => "Network",
            ResourceKind::Subnet => "Subnet",
            ResourceKind::SecurityGroup => "Security Group",
            ResourceKind::Role => "Role",
            ResourceKind::Instance => "Instance",
            ResourceKind::Application => "Application",
            ResourceKind::DeploymentGroup => "Deployment Group",
            ResourceKind::Pipeline => "Pipeline",
            ResourceKind::Alarm => "Alarm",
        }
    }

    /// Prefix used in logical ids and generated physical ids
    pub fn prefix(&self) -> &'static str {
        match self {
            ResourceKind::Network => "net",
            ResourceKind::Subnet => "subnet",
            ResourceKind::SecurityGroup => "sg",
            ResourceKind::Role => "role",
            ResourceKind::Instance => "i",
            ResourceKind::Application => "app",
            ResourceKind::DeploymentGroup => "dg",
            ResourceKind::Pipeline => "pipe",
            ResourceKind::Alarm => "alarm",
        }
    }

    /// Get all resource kinds in dependency-friendly order
    pub fn all() -> Vec<ResourceKind> {
        vec![
            ResourceKind::Network,
            ResourceKind::Subnet,
            ResourceKind::SecurityGroup,
            ResourceKind::Role,
            ResourceKind::Instance,
            ResourceKind::Application,
            ResourceKind::DeploymentGroup,
            ResourceKind::Pipeline,
            ResourceKind::Alarm,
        ]
    }

    /// Generate a fresh physical id for this kind
    pub fn new_physical_id(&self) -> String {
        let suffix: u32 = rand::random::<u32>() % 0x1000_0000;
        format!("{}-{suffix:07x}", self.prefix())
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Build the logical id of a resource from its kind and declared name
pub fn logical_id(kind: ResourceKind, name: &str) -> String {
    format!("{}/{}", kind.prefix(), name)
}

/// A provisioned resource as recorded in stack state
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Logical id, stable across re-assemblies
    pub logical_id: String,

    /// Resource kind
    pub kind: ResourceKind,

    /// Provider-assigned physical id
    pub physical_id: String,

    /// Resource attributes
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    /// Resource tags
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    /// Logical ids of resources this one depends on
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Fingerprint of the specification that produced this record
    pub fingerprint: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl ResourceRecord {
    /// Create a new record with a freshly generated physical id
    pub fn new(kind: ResourceKind, name: &str) -> Self {
        Self {
            logical_id: logical_id(kind, name),
            kind,
            physical_id: kind.new_physical_id(),
            attributes: BTreeMap::new(),
            tags: BTreeMap::new(),
            depends_on: Vec::new(),
            fingerprint: String::new(),
            created_at: Utc::now(),
        }
    }

    /// Set an attribute
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Set a tag
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add a dependency on another resource
    pub fn depends_on(mut self, logical_id: impl Into<String>) -> Self {
        self.depends_on.push(logical_id.into());
        self
    }

    /// Set the specification fingerprint
    pub fn fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = fingerprint.into();
        self
    }

    /// Get an attribute value
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Check whether the record carries the given tag key/value pair
    pub fn has_tag(&self, key: &str, value: &str) -> bool {
        self.tags.get(key).map(String::as_str) == Some(value)
    }
}

/// Fingerprint a serializable specification
///
/// The fingerprint decides whether an existing record still matches its
/// declared spec during reconciliation.
pub fn fingerprint<T: Serialize>(spec: &T) -> String {
    let json = serde_json::to_string(spec).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    format!("{:x}", hasher.finalize())
}
