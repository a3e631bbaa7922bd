//! Graph Builder
//!
//! The construction phase: composition rules add nodes one at a time, each
//! node's dependencies must already exist, and `build` checks references
//! before handing out an immutable [`ResourceGraph`].

use super::{Dag, ResourceGraph};
use crate::error::{GraphError, TopologyError};
use crate::node::ResourceNode;
use crate::outputs::OutputSpec;
use crate::types::ResourceId;
use indexmap::IndexMap;

/// Builder for constructing validated resource graphs
///
/// Usage:
/// ```rust,ignore
/// let mut builder = GraphBuilder::new();
/// builder.add(ResourceNode::new("vpc", ResourceKind::Vpc))?;
/// builder.add(ResourceNode::new("db", ResourceKind::DatabaseCluster).depends_on("vpc"))?;
/// let graph = builder.build()?;
/// ```
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: IndexMap<ResourceId, ResourceNode>,
    dag: Dag,
    outputs: Vec<OutputSpec>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.dag.edge_count()
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: &ResourceId) -> Option<&ResourceNode> {
        self.nodes.get(id)
    }

    /// Add a node
    ///
    /// Every dependency must already have been added; a missing one is an
    /// error rather than being dropped.
    ///
    /// # Errors
    /// `DuplicateResource`, `SelfDependency` or `DanglingDependency`.
    pub fn add(&mut self, node: ResourceNode) -> Result<ResourceId, TopologyError> {
        let id = node.id().clone();
        if self.nodes.contains_key(&id) {
            return Err(TopologyError::DuplicateResource(id));
        }

        let mut predecessors = Vec::with_capacity(node.dependencies().len());
        for dependency in node.dependencies() {
            if dependency == &id {
                return Err(TopologyError::SelfDependency(id));
            }
            let index = self.nodes.get_index_of(dependency).ok_or_else(|| {
                TopologyError::DanglingDependency {
                    dependent: id.clone(),
                    missing: dependency.clone(),
                }
            })?;
            predecessors.push(index);
        }

        let index = self.nodes.len();
        self.dag.add_node(index);
        for from in predecessors {
            // new node has no outgoing edges yet, so this cannot close a cycle
            self.dag.insert_edge_unchecked(from, index);
        }

        tracing::debug!(resource = %id, kind = %node.kind(), unit = node.unit(), "declared resource");
        self.nodes.insert(id.clone(), node);
        Ok(id)
    }

    /// Add the node built by `make` only when `guard` holds
    ///
    /// # Errors
    /// Same as [`GraphBuilder::add`].
    pub fn add_when<F>(&mut self, guard: bool, make: F) -> Result<Option<ResourceId>, TopologyError>
    where
        F: FnOnce() -> ResourceNode,
    {
        if guard {
            self.add(make()).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Declare an extra edge between two existing nodes
    ///
    /// # Errors
    /// `DanglingDependency` for unknown ids, `SelfDependency`, or
    /// `WouldCreateCycle`.
    pub fn add_dependency(
        &mut self,
        dependent: &ResourceId,
        dependency: &ResourceId,
    ) -> Result<(), TopologyError> {
        let to = self.index_of(dependent, dependent)?;
        let from = self.index_of(dependent, dependency)?;

        match self.dag.add_edge(from, to) {
            Ok(()) => {}
            Err(GraphError::SelfLoop) => {
                return Err(TopologyError::SelfDependency(dependent.clone()));
            }
            Err(GraphError::CycleDetected) => {
                return Err(TopologyError::WouldCreateCycle {
                    dependent: dependent.clone(),
                    dependency: dependency.clone(),
                });
            }
            Err(GraphError::NodeNotFound) => {
                return Err(TopologyError::DanglingDependency {
                    dependent: dependent.clone(),
                    missing: dependency.clone(),
                });
            }
        }

        if let Some(node) = self.nodes.get_mut(dependent) {
            node.push_dependency(dependency.clone());
        }
        Ok(())
    }

    /// Check whether `dependent` depending on `dependency` would form a cycle
    pub fn would_create_cycle(&self, dependent: &ResourceId, dependency: &ResourceId) -> bool {
        match (
            self.nodes.get_index_of(dependency),
            self.nodes.get_index_of(dependent),
        ) {
            (Some(from), Some(to)) => self.dag.would_create_cycle(from, to),
            _ => false,
        }
    }

    /// Declare a named output of the graph
    ///
    /// # Errors
    /// `InvalidOutput` when the name is taken or the source is unknown.
    pub fn export(&mut self, spec: OutputSpec) -> Result<(), TopologyError> {
        if self.outputs.iter().any(|o| o.name == spec.name) {
            return Err(TopologyError::InvalidOutput {
                name: spec.name,
                reason: "declared twice".to_string(),
            });
        }
        if !self.nodes.contains_key(&spec.source) {
            return Err(TopologyError::InvalidOutput {
                reason: format!("source `{}` is not declared", spec.source),
                name: spec.name,
            });
        }
        self.outputs.push(spec);
        Ok(())
    }

    /// Validate references and produce the immutable graph
    ///
    /// # Errors
    /// `UndeclaredReference` when a property refers to a resource that is not
    /// a dependency, `UnknownImport` when it imports an output declared in
    /// this graph without depending on its source.
    ///
    /// Imports of outputs this graph does not declare are external: another
    /// run publishes them, and they are looked up in the registry when the
    /// importing node is dispatched.
    pub fn build(self) -> Result<ResourceGraph, TopologyError> {
        for node in self.nodes.values() {
            for property in node.properties().values() {
                for target in property.references() {
                    if !node.depends_directly_on(target) {
                        return Err(TopologyError::UndeclaredReference {
                            resource: node.id().clone(),
                            target: target.clone(),
                        });
                    }
                }
                for name in property.imports() {
                    match self.outputs.iter().find(|o| o.name == name) {
                        Some(local) if !node.depends_directly_on(&local.source) => {
                            return Err(TopologyError::UnknownImport {
                                resource: node.id().clone(),
                                output: name.to_string(),
                            });
                        }
                        Some(_) => {}
                        None => {
                            tracing::debug!(resource = %node.id(), output = name, "external import");
                        }
                    }
                }
            }
        }

        tracing::info!(
            nodes = self.nodes.len(),
            edges = self.dag.edge_count(),
            outputs = self.outputs.len(),
            "resource graph built"
        );

        Ok(ResourceGraph {
            nodes: self.nodes,
            dag: self.dag,
            outputs: self.outputs,
        })
    }

    fn index_of(&self, dependent: &ResourceId, id: &ResourceId) -> Result<usize, TopologyError> {
        self.nodes
            .get_index_of(id)
            .ok_or_else(|| TopologyError::DanglingDependency {
                dependent: dependent.clone(),
                missing: id.clone(),
            })
    }
}
