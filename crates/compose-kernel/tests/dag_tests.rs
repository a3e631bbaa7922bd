use compose_kernel::graph::{Dag, GraphBuilder};
use compose_kernel::node::ResourceNode;
use compose_kernel::types::{ResourceId, ResourceKind};
use proptest::prelude::*;
use std::collections::HashMap;

proptest! {
    #[test]
    fn prop_dag_remains_acyclic(
        node_count in 1..20usize,
        edges in proptest::collection::vec((0..20usize, 0..20usize), 0..60)
    ) {
        let mut dag = Dag::new();
        for n in 0..node_count {
            dag.add_node(n);
        }

        for (from, to) in edges {
            let _ = dag.add_edge(from, to);
            // whatever was accepted must still order
            prop_assert!(dag.topological_order().is_ok());
        }
    }

    #[test]
    fn prop_builder_graphs_always_order(
        deps in proptest::collection::vec(proptest::collection::vec(0..30usize, 0..4), 1..30)
    ) {
        // node i may only depend on nodes declared before it
        let mut builder = GraphBuilder::new();
        for (i, wanted) in deps.iter().enumerate() {
            let mut node = ResourceNode::new(format!("n{i}"), ResourceKind::Secret);
            for d in wanted.iter().filter(|d| **d < i) {
                node = node.depends_on(format!("n{d}"));
            }
            builder.add(node).unwrap();
        }
        let graph = builder.build().unwrap();

        let order = graph.topological_order().unwrap();
        prop_assert_eq!(order.len(), graph.len());

        let position: HashMap<&ResourceId, usize> =
            order.iter().enumerate().map(|(i, n)| (n.id(), i)).collect();
        for node in graph.nodes() {
            for dep in node.dependencies() {
                prop_assert!(graph.contains(dep));
                prop_assert!(position[dep] < position[node.id()]);
            }
        }
    }

    #[test]
    fn prop_independent_nodes_keep_declaration_order(count in 1..25usize) {
        let mut builder = GraphBuilder::new();
        for i in 0..count {
            builder.add(ResourceNode::new(format!("n{i:02}"), ResourceKind::Secret)).unwrap();
        }
        let graph = builder.build().unwrap();
        let ids: Vec<String> = graph
            .topological_order()
            .unwrap()
            .iter()
            .map(|n| n.id().to_string())
            .collect();
        let expected: Vec<String> = (0..count).map(|i| format!("n{i:02}")).collect();
        prop_assert_eq!(ids, expected);
    }
}

#[test]
fn test_rejects_simple_cycle() {
    let mut dag = Dag::new();
    for n in 0..3 {
        dag.add_node(n);
    }

    dag.add_edge(0, 1).unwrap();
    dag.add_edge(1, 2).unwrap();

    // Cycle: 2 -> 0
    assert!(dag.add_edge(2, 0).is_err());
}

#[test]
fn test_extra_edge_cycle_is_rejected_by_builder() {
    let mut builder = GraphBuilder::new();
    builder
        .add(ResourceNode::new("a", ResourceKind::Secret))
        .unwrap();
    builder
        .add(ResourceNode::new("b", ResourceKind::Secret).depends_on("a"))
        .unwrap();

    assert!(builder
        .add_dependency(&ResourceId::new("a"), &ResourceId::new("b"))
        .is_err());
    assert!(builder.build().unwrap().topological_order().is_ok());
}
