//! Compose Kernel (compose-kernel)
//!
//! Declarative resource graphs in three phases:
//! 1. **Resolution**: typed configuration values from layered sources
//! 2. **Construction**: conditional rules add nodes and edges to a builder
//! 3. **Provisioning**: nodes are dispatched in dependency order to an
//!    external provisioner, and declared outputs are published as their
//!    sources become active
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use compose_kernel::prelude::*;
//!
//! let source = ConfigSourceBuilder::new().merge_file("cdk.json")?.build();
//! let config = ConfigResolver::new(&source);
//!
//! let mut builder = GraphBuilder::new();
//! builder.add(ResourceNode::new("vpc", ResourceKind::Vpc))?;
//! builder.add_when(config.boolean_or("backups", false)?, || {
//!     ResourceNode::new("vault", ResourceKind::BackupVault).depends_on("vpc")
//! })?;
//! let graph = builder.build()?;
//!
//! let registry = OutputRegistry::new();
//! let report = DependencyScheduler::new(provisioner).run(&graph, &registry).await?;
//! ```

pub mod attribute;
pub mod config;
pub mod error;
pub mod graph;
pub mod node;
pub mod outputs;
pub mod provisioner;
pub mod scheduler;
pub mod types;

pub use error::*;
pub use types::*;

/// Common imports
pub mod prelude {
    pub use crate::config::{
        ConfigKind, ConfigResolver, ConfigSource, ConfigSourceBuilder, ConfigValue, Origin, Value,
    };
    pub use crate::error::{
        AttributeNotFoundError, ComposeError, ConfigurationError, CycleDetectedError,
        OutputError, ProvisioningError, ProvisioningFailure, TopologyError,
    };
    pub use crate::graph::{GraphBuilder, ResourceGraph};
    pub use crate::node::{Property, ResourceNode};
    pub use crate::outputs::{Derivation, OutputExporter, OutputRegistry, OutputSpec, OutputValue, Transform};
    pub use crate::provisioner::{ProvisionRequest, Provisioner};
    pub use crate::scheduler::{
        DependencyScheduler, DeploymentReport, NodeOutcome, NodeReport, SchedulerOptions,
    };
    pub use crate::types::{ProvisionStatus, ProvisionedResource, ResourceId, ResourceKind, RunId};
}

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
