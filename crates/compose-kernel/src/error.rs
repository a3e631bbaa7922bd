//! Error types for the compose kernel
//!
//! Provides the error taxonomy for:
//! - Missing or malformed configuration
//! - Invalid graph topology (dangling edges, contradictory flags)
//! - Cycles found by the scheduler's defensive check
//! - Provisioning failures reported by the external provisioner
//! - Outputs that reference attributes a resource never produced

use crate::types::ResourceId;

/// Main kernel error type
#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    /// Configuration could not be resolved
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Builder produced an invalid graph
    #[error("invalid topology: {0}")]
    Topology(#[from] TopologyError),

    /// Dependency relation is not acyclic
    #[error("{0}")]
    Cycle(#[from] CycleDetectedError),

    /// External provisioner failed a resource
    #[error("provisioning failed: {0}")]
    Provisioning(#[from] ProvisioningFailure),

    /// Output source lacks the requested attribute
    #[error("{0}")]
    AttributeNotFound(#[from] AttributeNotFoundError),

    /// Output registry rejected a publication
    #[error("output error: {0}")]
    Output(#[from] OutputError),
}

impl ComposeError {
    /// Errors that must stop the run before any provisioning happens
    #[inline]
    #[must_use]
    pub fn aborts_run(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::Topology(_) | Self::Cycle(_)
        )
    }

    /// Errors the operator can fix by changing inputs
    #[inline]
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// Configuration resolution errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// Required key has neither a value nor a default
    #[error("missing required configuration key `{key}`{}", reason_suffix(.reason))]
    MissingKey {
        key: String,
        reason: Option<String>,
    },

    /// Value present but of the wrong kind
    #[error("configuration key `{key}` expected {expected}, found {found}")]
    TypeMismatch {
        key: String,
        expected: String,
        found: String,
    },

    /// Enum value outside the allowed set
    #[error("configuration key `{key}` must be one of [{allowed}], found `{found}`")]
    InvalidChoice {
        key: String,
        allowed: String,
        found: String,
    },

    /// Configuration source could not be read or parsed
    #[error("cannot load configuration from {origin}: {message}")]
    Source { origin: String, message: String },
}

fn join_ids(ids: &[ResourceId]) -> String {
    ids.iter()
        .map(ResourceId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason
        .as_ref()
        .map(|r| format!(" ({r})"))
        .unwrap_or_default()
}

impl ConfigurationError {
    /// Missing key with no further explanation
    #[must_use]
    pub fn missing(key: impl Into<String>) -> Self {
        Self::MissingKey {
            key: key.into(),
            reason: None,
        }
    }

    /// Missing key that is only required in some topologies
    #[must_use]
    pub fn missing_because(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MissingKey {
            key: key.into(),
            reason: Some(reason.into()),
        }
    }

    /// The key this error is about, if any
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::MissingKey { key, .. }
            | Self::TypeMismatch { key, .. }
            | Self::InvalidChoice { key, .. } => Some(key),
            Self::Source { .. } => None,
        }
    }
}

/// Low-level DAG errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("self loop")]
    SelfLoop,
    #[error("cycle detected")]
    CycleDetected,
    #[error("node not found")]
    NodeNotFound,
}

/// Topology errors raised by the graph builder
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    /// Two nodes declared with the same id
    #[error("resource `{0}` declared twice")]
    DuplicateResource(ResourceId),

    /// Node depends on a resource that was never created
    #[error("resource `{dependent}` depends on undeclared resource `{missing}`")]
    DanglingDependency {
        dependent: ResourceId,
        missing: ResourceId,
    },

    /// Node refers to itself
    #[error("resource `{0}` cannot depend on itself")]
    SelfDependency(ResourceId),

    /// Edge would close a cycle
    #[error("dependency `{dependent}` -> `{dependency}` would create a cycle")]
    WouldCreateCycle {
        dependent: ResourceId,
        dependency: ResourceId,
    },

    /// Property refers to a resource that is not a declared dependency
    #[error("resource `{resource}` references `{target}` without depending on it")]
    UndeclaredReference {
        resource: ResourceId,
        target: ResourceId,
    },

    /// Property imports an output of this graph without depending on its source
    #[error("resource `{resource}` imports output `{output}` without depending on its source")]
    UnknownImport { resource: ResourceId, output: String },

    /// Output declared twice or sourced from an unknown resource
    #[error("invalid output `{name}`: {reason}")]
    InvalidOutput { name: String, reason: String },

    /// Flags that cannot be combined
    #[error("contradictory configuration: {0}")]
    Contradiction(String),
}

/// Defensive cycle check failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("dependency cycle detected among [{}]", join_ids(.members))]
pub struct CycleDetectedError {
    /// Resources participating in the cycle, in declaration order
    pub members: Vec<ResourceId>,
}

/// Error reported by a provisioner for a single resource
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{cause}")]
pub struct ProvisioningError {
    /// Human-readable cause
    pub cause: String,
}

impl ProvisioningError {
    #[must_use]
    pub fn new(cause: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
        }
    }
}

/// A provisioning error attributed to the resource it happened on
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("resource `{id}`: {cause}")]
pub struct ProvisioningFailure {
    /// Resource whose provisioning failed
    pub id: ResourceId,
    /// Cause reported by the provisioner or by property resolution
    pub cause: String,
}

/// Export requested an attribute the resource never produced
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("resource `{resource}` has no attribute `{attribute}`")]
pub struct AttributeNotFoundError {
    /// Resource that was asked for the attribute
    pub resource: ResourceId,
    /// Attribute path as requested
    pub attribute: String,
}

/// Output registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OutputError {
    /// Name already published with a different value
    #[error("output `{name}` already published as `{existing}`")]
    AlreadyPublished { name: String, existing: String },

    /// Derivation step could not be applied
    #[error("output `{name}` derivation failed: {reason}")]
    Derivation { name: String, reason: String },

    /// Source resource is not active
    #[error("output `{name}` source `{resource}` is not active")]
    SourceNotActive { name: String, resource: ResourceId },
}
