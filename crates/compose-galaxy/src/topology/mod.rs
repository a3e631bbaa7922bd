//! Galaxy-on-EKS composition rules
//!
//! Three units are composed in order, each rule reading only the resolved
//! [`DeploymentSettings`]:
//! - `Provider`: VPC, EKS cluster and the cluster-level add-ons
//! - `GlxInfra`: storage, database, message broker, secrets and backups
//! - `GlxApp`: Kubernetes objects, the Galaxy chart and its public address

mod application;
mod infrastructure;
mod provider;

use crate::settings::DeploymentSettings;
use compose_kernel::error::TopologyError;
use compose_kernel::graph::{GraphBuilder, ResourceGraph};

pub const PROVIDER_UNIT: &str = "Provider";
pub const INFRA_UNIT: &str = "GlxInfra";
pub const APP_UNIT: &str = "GlxApp";

/// Resource ids shared across units
pub mod ids {
    pub const VPC: &str = "vpc";
    pub const CLUSTER: &str = "eksCluster";
    pub const FILE_SYSTEM: &str = "fileSystem";
    pub const DATABASE: &str = "databaseCluster";
    pub const DATABASE_PROXY: &str = "databaseProxy";
    pub const BROKER_SECRET: &str = "rabbitmqSecret";
    pub const BROKER: &str = "rabbitmqCluster";
    pub const BACKUP_VAULT: &str = "backupVault";
    pub const BACKUP_PLAN: &str = "backupPlan";
    pub const CHART: &str = "galaxyChart";
    pub const DNS: &str = "galaxyDNS";
}

/// Output names published for consumers
pub mod outputs {
    pub const BROKER_ENDPOINT: &str = "rabbitmqEndpoint";
    pub const GALAXY_DNS: &str = "galaxyDNSOutput";
}

/// Compose the whole deployment graph
///
/// # Errors
/// Any [`TopologyError`] raised while adding nodes, edges or outputs.
pub fn compose(settings: &DeploymentSettings) -> Result<ResourceGraph, TopologyError> {
    let mut builder = GraphBuilder::new();
    provider::compose(&mut builder, settings)?;
    infrastructure::compose(&mut builder, settings)?;
    application::compose(&mut builder, settings)?;

    let graph = builder.build()?;
    tracing::info!(
        nodes = graph.len(),
        edges = graph.edge_count(),
        outputs = graph.outputs().len(),
        "composed galaxy deployment"
    );
    Ok(graph)
}
