use crate::error::GraphError;
use petgraph::algo::{has_path_connecting, is_cyclic_directed, kosaraju_scc};
use petgraph::graphmap::DiGraphMap;
use petgraph::visit::Bfs;
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

/// Dependency DAG over declaration indices
///
/// Edges point from a dependency to its dependent, so a topological order
/// lists dependencies first. Node indices are declaration positions and are
/// used to break ties deterministically.
#[derive(Debug, Clone, Default)]
pub struct Dag {
    inner: DiGraphMap<usize, ()>,
}

impl Dag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: usize) {
        self.inner.add_node(node);
    }

    pub fn contains(&self, node: usize) -> bool {
        self.inner.contains_node(node)
    }

    /// Add `from -> to`, rejecting self loops and cycles
    pub fn add_edge(&mut self, from: usize, to: usize) -> Result<(), GraphError> {
        if from == to {
            return Err(GraphError::SelfLoop);
        }
        if !self.contains(from) || !self.contains(to) {
            return Err(GraphError::NodeNotFound);
        }

        let existed = self.inner.contains_edge(from, to);
        self.inner.add_edge(from, to, ());

        if !existed && is_cyclic_directed(&self.inner) {
            self.inner.remove_edge(from, to);
            return Err(GraphError::CycleDetected);
        }

        Ok(())
    }

    /// Add `from -> to` without any check
    ///
    /// Used when ordering raw node lists that did not go through a builder.
    pub(crate) fn insert_edge_unchecked(&mut self, from: usize, to: usize) {
        self.inner.add_edge(from, to, ());
    }

    /// Whether adding `from -> to` would close a cycle
    pub fn would_create_cycle(&self, from: usize, to: usize) -> bool {
        if from == to {
            return true;
        }
        self.contains(from) && self.contains(to) && has_path_connecting(&self.inner, to, from, None)
    }

    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    /// Topological order, smallest declaration index first among ready nodes
    ///
    /// On failure returns the members of every cycle, sorted.
    pub fn topological_order(&self) -> Result<Vec<usize>, Vec<usize>> {
        let mut indegree: HashMap<usize, usize> = self
            .inner
            .nodes()
            .map(|n| (n, self.inner.neighbors_directed(n, Direction::Incoming).count()))
            .collect();

        let mut ready: BinaryHeap<Reverse<usize>> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| Reverse(*n))
            .collect();

        let mut order = Vec::with_capacity(indegree.len());
        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for next in self.inner.neighbors_directed(node, Direction::Outgoing) {
                if let Some(d) = indegree.get_mut(&next) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push(Reverse(next));
                    }
                }
            }
        }

        if order.len() == self.inner.node_count() {
            Ok(order)
        } else {
            Err(self.cycle_members())
        }
    }

    /// Nodes lying on some cycle
    pub fn cycle_members(&self) -> Vec<usize> {
        let mut members: Vec<usize> = kosaraju_scc(&self.inner)
            .into_iter()
            .filter(|scc| scc.len() > 1 || self.inner.contains_edge(scc[0], scc[0]))
            .flatten()
            .collect();
        members.sort_unstable();
        members
    }

    /// Every node reachable from `node`, excluding itself
    pub fn descendants(&self, node: usize) -> BTreeSet<usize> {
        let mut out = BTreeSet::new();
        if !self.contains(node) {
            return out;
        }
        let mut bfs = Bfs::new(&self.inner, node);
        while let Some(n) = bfs.next(&self.inner) {
            if n != node {
                out.insert(n);
            }
        }
        out
    }

    /// Nodes with no predecessors
    pub fn entry_nodes(&self) -> Vec<usize> {
        let mut nodes: Vec<usize> = self
            .inner
            .nodes()
            .filter(|n| self.inner.neighbors_directed(*n, Direction::Incoming).next().is_none())
            .collect();
        nodes.sort_unstable();
        nodes
    }

    /// Nodes with no successors
    pub fn exit_nodes(&self) -> Vec<usize> {
        let mut nodes: Vec<usize> = self
            .inner
            .nodes()
            .filter(|n| self.inner.neighbors_directed(*n, Direction::Outgoing).next().is_none())
            .collect();
        nodes.sort_unstable();
        nodes
    }
}
