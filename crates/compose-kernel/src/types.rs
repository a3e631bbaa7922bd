//! Core identifiers and provisioning results

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Unique resource identifier within one graph
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ResourceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier of one deployment run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Supported resource kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// New VPC with public and private subnets
    Vpc,
    /// Existing VPC, looked up by id
    VpcLookup,
    /// Interface endpoint inside a VPC
    VpcEndpoint,
    /// VPC flow log
    FlowLog,
    /// New Kubernetes cluster
    Cluster,
    /// Existing cluster, imported by name
    ClusterImport,
    /// Security group with ingress rules
    SecurityGroup,
    /// Shared network file system
    FileSystem,
    /// Serverless relational database cluster
    DatabaseCluster,
    /// Connection proxy in front of a database
    DatabaseProxy,
    /// Managed message broker
    MessageBroker,
    /// Generated secret
    Secret,
    /// Rotation schedule for a secret
    SecretRotation,
    /// Serverless function
    Function,
    /// Vault holding recovery points
    BackupVault,
    /// Backup schedule with its selection
    BackupPlan,
    /// Manifest applied to a cluster
    KubernetesManifest,
    /// Helm chart release
    HelmRelease,
    /// Value read from a live cluster object
    KubernetesObjectValue,
}

impl ResourceKind {
    /// Kinds that only read existing infrastructure
    #[must_use]
    pub fn is_lookup(self) -> bool {
        matches!(
            self,
            Self::VpcLookup | Self::ClusterImport | Self::KubernetesObjectValue
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vpc => "vpc",
            Self::VpcLookup => "vpc-lookup",
            Self::VpcEndpoint => "vpc-endpoint",
            Self::FlowLog => "flow-log",
            Self::Cluster => "cluster",
            Self::ClusterImport => "cluster-import",
            Self::SecurityGroup => "security-group",
            Self::FileSystem => "file-system",
            Self::DatabaseCluster => "database-cluster",
            Self::DatabaseProxy => "database-proxy",
            Self::MessageBroker => "message-broker",
            Self::Secret => "secret",
            Self::SecretRotation => "secret-rotation",
            Self::Function => "function",
            Self::BackupVault => "backup-vault",
            Self::BackupPlan => "backup-plan",
            Self::KubernetesManifest => "kubernetes-manifest",
            Self::HelmRelease => "helm-release",
            Self::KubernetesObjectValue => "kubernetes-object-value",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provisioning status reported by the provisioner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionStatus {
    /// Still being created
    Pending,
    Active,
    Failed,
}

/// Materialized result of provisioning one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionedResource {
    pub id: ResourceId,
    pub status: ProvisionStatus,
    /// Attributes addressable by reference paths
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl ProvisionedResource {
    /// An active resource with no attributes yet
    pub fn active(id: impl Into<ResourceId>) -> Self {
        Self {
            id: id.into(),
            status: ProvisionStatus::Active,
            attributes: BTreeMap::new(),
        }
    }

    /// Add an attribute
    #[must_use]
    pub fn with_attribute(
        mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == ProvisionStatus::Active
    }
}
