//! Resource graphs
//!
//! A [`ResourceGraph`] is produced by [`GraphBuilder::build`] and is read-only
//! from then on. Node order inside the graph is declaration order, which is
//! also the tie-breaker for scheduling.

mod builder;
mod dag;

pub use builder::GraphBuilder;
pub use dag::Dag;

use crate::error::{CycleDetectedError, TopologyError};
use crate::node::ResourceNode;
use crate::outputs::OutputSpec;
use crate::types::ResourceId;
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::BTreeMap;

/// Immutable dependency graph of resource nodes plus declared outputs
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    pub(crate) nodes: IndexMap<ResourceId, ResourceNode>,
    pub(crate) dag: Dag,
    pub(crate) outputs: Vec<OutputSpec>,
}

impl ResourceGraph {
    /// Assemble a graph from raw declarations
    ///
    /// Duplicate ids and dependencies on unknown ids are rejected. Cycles are
    /// deliberately not checked here; [`ResourceGraph::topological_order`]
    /// reports them.
    ///
    /// # Errors
    /// `DuplicateResource`, `SelfDependency` or `DanglingDependency`.
    pub fn from_declarations(
        declared: Vec<ResourceNode>,
        outputs: Vec<OutputSpec>,
    ) -> Result<Self, TopologyError> {
        let mut nodes = IndexMap::with_capacity(declared.len());
        for node in declared {
            if nodes.contains_key(node.id()) {
                return Err(TopologyError::DuplicateResource(node.id().clone()));
            }
            nodes.insert(node.id().clone(), node);
        }

        let mut dag = Dag::new();
        for index in 0..nodes.len() {
            dag.add_node(index);
        }
        for (index, node) in nodes.values().enumerate() {
            for dependency in node.dependencies() {
                if dependency == node.id() {
                    return Err(TopologyError::SelfDependency(node.id().clone()));
                }
                let from = nodes.get_index_of(dependency).ok_or_else(|| {
                    TopologyError::DanglingDependency {
                        dependent: node.id().clone(),
                        missing: dependency.clone(),
                    }
                })?;
                dag.insert_edge_unchecked(from, index);
            }
        }

        Ok(Self {
            nodes,
            dag,
            outputs,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.nodes.contains_key(id)
    }

    #[must_use]
    pub fn node(&self, id: &ResourceId) -> Option<&ResourceNode> {
        self.nodes.get(id)
    }

    /// Nodes in declaration order
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> + '_ {
        self.nodes.values()
    }

    /// Declaration position of a node
    #[must_use]
    pub fn position(&self, id: &ResourceId) -> Option<usize> {
        self.nodes.get_index_of(id)
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.dag.edge_count()
    }

    /// Declared outputs
    #[must_use]
    pub fn outputs(&self) -> &[OutputSpec] {
        &self.outputs
    }

    /// Outputs sourced from `id`
    pub fn outputs_from<'a>(&'a self, id: &'a ResourceId) -> impl Iterator<Item = &'a OutputSpec> {
        self.outputs.iter().filter(move |o| &o.source == id)
    }

    /// Creation order: dependencies first, declaration order among peers
    ///
    /// # Errors
    /// `CycleDetectedError` listing the resources on a cycle.
    pub fn topological_order(&self) -> Result<Vec<&ResourceNode>, CycleDetectedError> {
        match self.dag.topological_order() {
            Ok(order) => Ok(order.into_iter().filter_map(|i| self.at(i)).collect()),
            Err(members) => Err(CycleDetectedError {
                members: members
                    .into_iter()
                    .filter_map(|i| self.at(i).map(|n| n.id().clone()))
                    .collect(),
            }),
        }
    }

    /// Every resource that depends on `id`, directly or transitively
    #[must_use]
    pub fn dependents_of(&self, id: &ResourceId) -> Vec<&ResourceId> {
        let Some(index) = self.position(id) else {
            return Vec::new();
        };
        self.dag
            .descendants(index)
            .into_iter()
            .filter_map(|i| self.at(i).map(ResourceNode::id))
            .collect()
    }

    /// Nodes without dependencies
    #[must_use]
    pub fn roots(&self) -> Vec<&ResourceNode> {
        self.dag
            .entry_nodes()
            .into_iter()
            .filter_map(|i| self.at(i))
            .collect()
    }

    /// Nodes nothing depends on
    #[must_use]
    pub fn leaves(&self) -> Vec<&ResourceNode> {
        self.dag
            .exit_nodes()
            .into_iter()
            .filter_map(|i| self.at(i))
            .collect()
    }

    /// Node ids grouped by deployment unit, units in first-seen order
    #[must_use]
    pub fn units(&self) -> IndexMap<&str, Vec<&ResourceId>> {
        let mut units: IndexMap<&str, Vec<&ResourceId>> = IndexMap::new();
        for node in self.nodes.values() {
            units.entry(node.unit()).or_default().push(node.id());
        }
        units
    }

    /// Serializable view of the graph in creation order
    ///
    /// # Errors
    /// `CycleDetectedError` if the graph cannot be ordered.
    pub fn plan(&self) -> Result<Plan<'_>, CycleDetectedError> {
        let steps = self
            .topological_order()?
            .into_iter()
            .map(|node| PlanStep {
                id: node.id(),
                kind: node.kind().as_str(),
                unit: node.unit(),
                dependencies: node.dependencies(),
                properties: node.properties(),
            })
            .collect();
        Ok(Plan {
            steps,
            outputs: &self.outputs,
        })
    }

    fn at(&self, index: usize) -> Option<&ResourceNode> {
        self.nodes.get_index(index).map(|(_, node)| node)
    }
}

/// Ordered, serializable rendering of a graph
#[derive(Debug, Serialize)]
pub struct Plan<'a> {
    pub steps: Vec<PlanStep<'a>>,
    pub outputs: &'a [OutputSpec],
}

#[derive(Debug, Serialize)]
pub struct PlanStep<'a> {
    pub id: &'a ResourceId,
    pub kind: &'a str,
    pub unit: &'a str,
    pub dependencies: &'a [ResourceId],
    pub properties: &'a BTreeMap<String, crate::node::Property>,
}
