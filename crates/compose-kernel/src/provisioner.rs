//! Provisioner seam
//!
//! The scheduler hands each ready node to a [`Provisioner`] and awaits its
//! completion. Implementations own the lifecycle of the resulting
//! [`ProvisionedResource`]; the engine never talks to a cloud API itself.

use crate::error::ProvisioningError;
use crate::node::ResourceNode;
use crate::types::{ProvisionedResource, ResourceId, ResourceKind};
use async_trait::async_trait;
use serde::Serialize;

/// Fully resolved request for one resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvisionRequest {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub unit: String,
    /// Property tree after references and imports were substituted
    pub properties: serde_json::Value,
    pub dependencies: Vec<ResourceId>,
}

impl ProvisionRequest {
    /// Request for `node` with already-resolved properties
    #[must_use]
    pub fn for_node(node: &ResourceNode, properties: serde_json::Value) -> Self {
        Self {
            id: node.id().clone(),
            kind: node.kind(),
            unit: node.unit().to_string(),
            properties,
            dependencies: node.dependencies().to_vec(),
        }
    }

    /// Resolved property by name
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&serde_json::Value> {
        self.properties.get(name)
    }
}

/// External provisioner
///
/// Implement this trait to define how individual resources are created.
/// A returned resource whose status is not `Active` is treated as a failure.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create a single resource
    async fn provision(
        &self,
        request: &ProvisionRequest,
    ) -> Result<ProvisionedResource, ProvisioningError>;
}
