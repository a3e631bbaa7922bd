//! Galaxy on EKS (compose-galaxy)
//!
//! The concrete deployment composed on top of `compose-kernel`: settings are
//! resolved from a layered context, the three units are composed into one
//! resource graph, and the graph is handed to a provisioner.

pub mod settings;
pub mod simulate;
pub mod topology;

use compose_kernel::config::{ConfigResolver, ConfigSource};
use compose_kernel::error::ComposeError;
use compose_kernel::graph::ResourceGraph;
use compose_kernel::outputs::OutputRegistry;
use compose_kernel::provisioner::Provisioner;
use compose_kernel::scheduler::{DependencyScheduler, DeploymentReport, SchedulerOptions};
use settings::DeploymentSettings;
use std::sync::Arc;

/// Resolve settings from `source` and compose the deployment graph
///
/// Nothing is provisioned here; every configuration and topology error
/// surfaces before a single node could be dispatched.
///
/// # Errors
/// Configuration or topology errors.
pub fn compose(source: &ConfigSource) -> Result<(DeploymentSettings, ResourceGraph), ComposeError> {
    let config = ConfigResolver::new(source);
    let settings = DeploymentSettings::resolve(&config)?;
    let graph = topology::compose(&settings)?;
    Ok((settings, graph))
}

/// Compose and provision in one go
///
/// # Errors
/// Configuration, topology or cycle errors; provisioning failures are
/// reported in the returned [`DeploymentReport`] instead.
pub async fn deploy(
    source: &ConfigSource,
    provisioner: Arc<dyn Provisioner>,
    options: SchedulerOptions,
    registry: &OutputRegistry,
) -> Result<DeploymentReport, ComposeError> {
    let (_, graph) = compose(source)?;
    let report = DependencyScheduler::with_options(provisioner, options)
        .run(&graph, registry)
        .await?;
    Ok(report)
}
