//! Dependency Scheduler
//!
//! Walks a [`ResourceGraph`] in topological order and hands every node to the
//! [`Provisioner`] once all of its dependencies are active. Scheduling is
//! cooperative: everything runs on the caller's task, completions are
//! awaited through a `FuturesUnordered`, and the graph is never mutated.
//!
//! A failed node blocks its transitive dependents. Independent branches keep
//! going and nothing is rolled back.

use crate::error::{CycleDetectedError, ProvisioningError, ProvisioningFailure};
use crate::graph::ResourceGraph;
use crate::node::{ResolveContext, ResourceNode};
use crate::outputs::{OutputExporter, OutputRegistry, OutputValue};
use crate::provisioner::{ProvisionRequest, Provisioner};
use crate::types::{ProvisionedResource, ResourceId, ResourceKind, RunId};
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Scheduler tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Ready nodes awaited at the same time; values below 1 count as 1
    pub max_in_flight: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self { max_in_flight: 1 }
    }
}

/// Final state of one node
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum NodeOutcome {
    /// Provisioned, with the attributes the provisioner reported
    Active {
        attributes: BTreeMap<String, serde_json::Value>,
    },
    /// Provisioning or property resolution failed
    Failed {
        cause: String,
    },
    /// Skipped because a dependency failed
    Blocked {
        root_cause: ResourceId,
    },
}

/// Final state of one node after a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeReport {
    /// Node id
    pub id: ResourceId,
    /// Kind the node was declared with
    pub kind: ResourceKind,
    /// Deployment unit the node belongs to
    pub unit: String,
    /// How the node ended
    #[serde(flatten)]
    pub outcome: NodeOutcome,
}

/// Output that could not be exported during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputFailure {
    /// Output name
    pub name: String,
    /// Why the export failed
    pub reason: String,
}

/// Result of one deployment run
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentReport {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Ids in the order they were handed to the provisioner
    pub dispatch_order: Vec<ResourceId>,
    /// Every node of the graph, in schedule order
    pub nodes: Vec<NodeReport>,
    pub outputs: Vec<OutputValue>,
    pub output_errors: Vec<OutputFailure>,
}

impl DeploymentReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.output_errors.is_empty()
            && self
                .nodes
                .iter()
                .all(|n| matches!(n.outcome, NodeOutcome::Active { .. }))
    }

    #[must_use]
    pub fn outcome(&self, id: &ResourceId) -> Option<&NodeOutcome> {
        self.nodes.iter().find(|n| &n.id == id).map(|n| &n.outcome)
    }

    #[must_use]
    pub fn active(&self) -> Vec<&NodeReport> {
        self.filter(|o| matches!(o, NodeOutcome::Active { .. }))
    }

    #[must_use]
    pub fn failed(&self) -> Vec<&NodeReport> {
        self.filter(|o| matches!(o, NodeOutcome::Failed { .. }))
    }

    #[must_use]
    pub fn blocked(&self) -> Vec<&NodeReport> {
        self.filter(|o| matches!(o, NodeOutcome::Blocked { .. }))
    }

    /// One failure per failed subtree
    #[must_use]
    pub fn root_causes(&self) -> Vec<ProvisioningFailure> {
        self.nodes
            .iter()
            .filter_map(|n| match &n.outcome {
                NodeOutcome::Failed { cause } => Some(ProvisioningFailure {
                    id: n.id.clone(),
                    cause: cause.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Nodes skipped because of `root`
    #[must_use]
    pub fn blocked_by(&self, root: &ResourceId) -> Vec<&ResourceId> {
        self.nodes
            .iter()
            .filter(|n| matches!(&n.outcome, NodeOutcome::Blocked { root_cause } if root_cause == root))
            .map(|n| &n.id)
            .collect()
    }

    /// Human-readable multi-line summary
    #[must_use]
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "run {}: {} active, {} failed, {} blocked, {} outputs",
            self.run_id,
            self.active().len(),
            self.failed().len(),
            self.blocked().len(),
            self.outputs.len()
        );
        for failure in self.root_causes() {
            let blocked = self.blocked_by(&failure.id);
            let _ = writeln!(out, "  failed  {}: {}", failure.id, failure.cause);
            if !blocked.is_empty() {
                let ids: Vec<&str> = blocked.iter().map(|id| id.as_str()).collect();
                let _ = writeln!(out, "          blocked: {}", ids.join(", "));
            }
        }
        for output in &self.outputs {
            let _ = writeln!(out, "  output  {} = {}", output.name, output.value);
        }
        for failure in &self.output_errors {
            let _ = writeln!(out, "  output  {} not exported: {}", failure.name, failure.reason);
        }
        out
    }

    fn filter(&self, pred: impl Fn(&NodeOutcome) -> bool) -> Vec<&NodeReport> {
        self.nodes.iter().filter(|n| pred(&n.outcome)).collect()
    }
}

/// Orders and dispatches resource creation
pub struct DependencyScheduler {
    provisioner: Arc<dyn Provisioner>,
    options: SchedulerOptions,
}

impl DependencyScheduler {
    pub fn new(provisioner: Arc<dyn Provisioner>) -> Self {
        Self::with_options(provisioner, SchedulerOptions::default())
    }

    pub fn with_options(provisioner: Arc<dyn Provisioner>, options: SchedulerOptions) -> Self {
        Self {
            provisioner,
            options,
        }
    }

    pub fn options(&self) -> SchedulerOptions {
        self.options
    }

    /// Creation order for `graph`
    ///
    /// Dependencies come first; among nodes that are ready at the same time
    /// the one declared first wins.
    ///
    /// # Errors
    /// `CycleDetectedError` if the dependency relation is not acyclic.
    pub fn schedule<'g>(
        &self,
        graph: &'g ResourceGraph,
    ) -> Result<Vec<&'g ResourceNode>, CycleDetectedError> {
        let order = graph.topological_order().map_err(|e| {
            error!(members = ?e.members, "refusing to schedule cyclic graph");
            e
        })?;
        debug!(resources = order.len(), "schedule computed");
        Ok(order)
    }

    /// Provision every node of `graph`, exporting declared outputs into
    /// `registry` as soon as their source is active
    ///
    /// Provisioning failures do not abort the run; they show up in the
    /// returned report.
    ///
    /// # Errors
    /// `CycleDetectedError` before anything is dispatched.
    pub async fn run(
        &self,
        graph: &ResourceGraph,
        registry: &OutputRegistry,
    ) -> Result<DeploymentReport, CycleDetectedError> {
        let order = self.schedule(graph)?;
        let run_id = RunId::new();
        let started_at = Utc::now();
        let exporter = OutputExporter::new(registry.clone());
        let max_in_flight = self.options.max_in_flight.max(1);
        info!(%run_id, resources = order.len(), max_in_flight, "deployment started");

        let mut outcomes: HashMap<ResourceId, NodeOutcome> = HashMap::with_capacity(order.len());
        let mut pending: VecDeque<&ResourceNode> = order.iter().copied().collect();
        let mut in_flight = FuturesUnordered::new();
        let mut dispatch_order = Vec::new();
        let mut outputs = Vec::new();
        let mut output_errors = Vec::new();

        loop {
            let mut waiting = VecDeque::with_capacity(pending.len());
            while let Some(node) = pending.pop_front() {
                match readiness(node, &outcomes) {
                    Readiness::Blocked(root_cause) => {
                        warn!(resource = %node.id(), root_cause = %root_cause, "resource blocked");
                        outcomes.insert(node.id().clone(), NodeOutcome::Blocked { root_cause });
                    }
                    Readiness::Ready if in_flight.len() < max_in_flight => {
                        let ctx = RunContext {
                            outcomes: &outcomes,
                            registry,
                        };
                        match resolve_properties(node, &ctx) {
                            Ok(properties) => {
                                debug!(resource = %node.id(), kind = %node.kind(), "dispatching");
                                dispatch_order.push(node.id().clone());
                                let request = ProvisionRequest::for_node(node, properties);
                                in_flight.push(dispatch(Arc::clone(&self.provisioner), request));
                            }
                            Err(cause) => {
                                error!(resource = %node.id(), %cause, "cannot resolve properties");
                                outcomes.insert(node.id().clone(), NodeOutcome::Failed { cause });
                            }
                        }
                    }
                    Readiness::Ready | Readiness::Waiting => waiting.push_back(node),
                }
            }
            pending = waiting;

            let Some((request, result)) = in_flight.next().await else {
                break;
            };

            let id = request.id;
            match result {
                Ok(resource) if resource.is_active() => {
                    info!(resource = %id, "resource active");
                    for spec in graph.outputs_from(&id) {
                        match exporter.export_spec(spec, &resource) {
                            Ok(value) => outputs.push(value),
                            Err(e) => {
                                error!(output = %spec.name, error = %e, "output export failed");
                                output_errors.push(OutputFailure {
                                    name: spec.name.clone(),
                                    reason: e.to_string(),
                                });
                            }
                        }
                    }
                    outcomes.insert(
                        id,
                        NodeOutcome::Active {
                            attributes: resource.attributes,
                        },
                    );
                }
                Ok(resource) => {
                    let cause = format!("provisioner reported status {:?}", resource.status);
                    error!(resource = %id, %cause, "provisioning failed");
                    outcomes.insert(id, NodeOutcome::Failed { cause });
                }
                Err(e) => {
                    error!(resource = %id, cause = %e, "provisioning failed");
                    outcomes.insert(id, NodeOutcome::Failed { cause: e.cause });
                }
            }
        }

        let nodes: Vec<NodeReport> = order
            .iter()
            .map(|node| NodeReport {
                id: node.id().clone(),
                kind: node.kind(),
                unit: node.unit().to_string(),
                outcome: outcomes
                    .remove(node.id())
                    .unwrap_or_else(|| NodeOutcome::Failed {
                        cause: "never dispatched".to_string(),
                    }),
            })
            .collect();

        let report = DeploymentReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            dispatch_order,
            nodes,
            outputs,
            output_errors,
        };
        info!(
            %run_id,
            active = report.active().len(),
            failed = report.failed().len(),
            blocked = report.blocked().len(),
            "deployment finished"
        );
        Ok(report)
    }
}

enum Readiness {
    Ready,
    Waiting,
    Blocked(ResourceId),
}

fn readiness(node: &ResourceNode, outcomes: &HashMap<ResourceId, NodeOutcome>) -> Readiness {
    let mut all_active = true;
    for dependency in node.dependencies() {
        match outcomes.get(dependency) {
            Some(NodeOutcome::Active { .. }) => {}
            Some(NodeOutcome::Failed { .. }) => return Readiness::Blocked(dependency.clone()),
            Some(NodeOutcome::Blocked { root_cause }) => {
                return Readiness::Blocked(root_cause.clone())
            }
            None => all_active = false,
        }
    }
    if all_active {
        Readiness::Ready
    } else {
        Readiness::Waiting
    }
}

struct RunContext<'a> {
    outcomes: &'a HashMap<ResourceId, NodeOutcome>,
    registry: &'a OutputRegistry,
}

impl ResolveContext for RunContext<'_> {
    fn attributes(&self, resource: &ResourceId) -> Option<&BTreeMap<String, serde_json::Value>> {
        match self.outcomes.get(resource) {
            Some(NodeOutcome::Active { attributes }) => Some(attributes),
            _ => None,
        }
    }

    fn import(&self, name: &str) -> Option<String> {
        self.registry.value(name)
    }
}

fn resolve_properties(node: &ResourceNode, ctx: &RunContext<'_>) -> Result<serde_json::Value, String> {
    let mut resolved = serde_json::Map::with_capacity(node.properties().len());
    for (name, property) in node.properties() {
        let value = property
            .resolve(ctx)
            .map_err(|e| format!("property `{name}`: {e}"))?;
        resolved.insert(name.clone(), value);
    }
    Ok(serde_json::Value::Object(resolved))
}

async fn dispatch(
    provisioner: Arc<dyn Provisioner>,
    request: ProvisionRequest,
) -> (
    ProvisionRequest,
    Result<ProvisionedResource, ProvisioningError>,
) {
    let result = provisioner.provision(&request).await;
    (request, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::node::Property;
    use crate::outputs::{Derivation, OutputSpec};
    use crate::provisioner::MockProvisioner;
    use serde_json::json;

    fn graph() -> ResourceGraph {
        let mut b = GraphBuilder::new();
        b.add(ResourceNode::new("vpc", ResourceKind::Vpc)).unwrap();
        b.add(ResourceNode::new("mq", ResourceKind::MessageBroker).depends_on("vpc"))
            .unwrap();
        b.add(ResourceNode::new("fs", ResourceKind::FileSystem).depends_on("vpc"))
            .unwrap();
        b.export(
            OutputSpec::new("mqEndpoint", "mq", "amqpEndpoints[0]")
                .derived(Derivation::url_host()),
        )
        .unwrap();
        b.add(
            ResourceNode::new("chart", ResourceKind::HelmRelease)
                .depends_on_all(["vpc", "mq", "fs"])
                .with_property("broker", Property::import("mqEndpoint"))
                .with_property("subnets", Property::reference("vpc", "privateSubnets")),
        )
        .unwrap();
        b.build().unwrap()
    }

    fn respond(req: &ProvisionRequest) -> Result<ProvisionedResource, ProvisioningError> {
        let resource = ProvisionedResource::active(req.id.clone());
        Ok(match req.id.as_str() {
            "vpc" => resource.with_attribute("privateSubnets", json!(["subnet-a", "subnet-b"])),
            "mq" => resource.with_attribute("amqpEndpoints", json!(["amqps://mq.internal:5671"])),
            _ => resource,
        })
    }

    #[test]
    fn schedule_respects_dependencies_and_declaration_order() {
        let scheduler = DependencyScheduler::new(Arc::new(MockProvisioner::new()));
        let g = graph();
        let order: Vec<&str> = scheduler
            .schedule(&g)
            .unwrap()
            .iter()
            .map(|n| n.id().as_str())
            .collect();
        assert_eq!(order, vec!["vpc", "mq", "fs", "chart"]);
    }

    #[tokio::test]
    async fn run_resolves_imports_and_references() {
        let mut mock = MockProvisioner::new();
        mock.expect_provision()
            .withf(|req| req.id.as_str() == "chart")
            .times(1)
            .returning(|req| {
                assert_eq!(req.property("broker"), Some(&json!("mq.internal")));
                assert_eq!(req.property("subnets"), Some(&json!(["subnet-a", "subnet-b"])));
                respond(req)
            });
        mock.expect_provision()
            .withf(|req| req.id.as_str() != "chart")
            .times(3)
            .returning(respond);

        let registry = OutputRegistry::new();
        let report = DependencyScheduler::new(Arc::new(mock)).run(&graph(), &registry)
            .await
            .unwrap();

        assert!(report.is_success(), "{}", report.summary());
        assert_eq!(registry.value("mqEndpoint").as_deref(), Some("mq.internal"));
        assert_eq!(report.outputs.len(), 1);
    }

    #[tokio::test]
    async fn failure_blocks_dependents_only() {
        let mut mock = MockProvisioner::new();
        mock.expect_provision().returning(|req| {
            if req.id.as_str() == "mq" {
                Err(ProvisioningError::new("broker quota exceeded"))
            } else {
                respond(req)
            }
        });

        let registry = OutputRegistry::new();
        let report = DependencyScheduler::new(Arc::new(mock)).run(&graph(), &registry)
            .await
            .unwrap();

        assert!(!report.is_success());
        assert!(matches!(
            report.outcome(&ResourceId::new("fs")),
            Some(NodeOutcome::Active { .. })
        ));
        assert_eq!(
            report.outcome(&ResourceId::new("chart")),
            Some(&NodeOutcome::Blocked {
                root_cause: ResourceId::new("mq")
            })
        );
        assert_eq!(
            report.root_causes(),
            vec![ProvisioningFailure {
                id: ResourceId::new("mq"),
                cause: "broker quota exceeded".to_string(),
            }]
        );
        assert!(!report.dispatch_order.contains(&ResourceId::new("chart")));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn non_active_status_counts_as_failure() {
        let mut mock = MockProvisioner::new();
        mock.expect_provision().returning(|req| {
            let mut resource = respond(req)?;
            if req.id.as_str() == "vpc" {
                resource.status = crate::types::ProvisionStatus::Pending;
            }
            Ok(resource)
        });

        let report = DependencyScheduler::new(Arc::new(mock))
            .run(&graph(), &OutputRegistry::new())
            .await
            .unwrap();

        assert_eq!(report.failed().len(), 1);
        assert_eq!(report.blocked_by(&ResourceId::new("vpc")).len(), 3);
        assert_eq!(report.dispatch_order, vec![ResourceId::new("vpc")]);
    }

    #[tokio::test]
    async fn missing_attribute_fails_the_consumer() {
        let mut mock = MockProvisioner::new();
        mock.expect_provision().returning(|req| {
            // vpc comes back without subnets
            Ok(ProvisionedResource::active(req.id.clone()).with_attribute(
                "amqpEndpoints",
                json!(["amqps://mq.internal:5671"]),
            ))
        });

        let report = DependencyScheduler::new(Arc::new(mock))
            .run(&graph(), &OutputRegistry::new())
            .await
            .unwrap();

        match report.outcome(&ResourceId::new("chart")) {
            Some(NodeOutcome::Failed { cause }) => assert!(cause.contains("property `subnets`")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    fn external_import_graph() -> ResourceGraph {
        let mut b = GraphBuilder::new();
        b.add(
            ResourceNode::new("chart", ResourceKind::HelmRelease)
                .with_property("broker", Property::import("sharedBroker")),
        )
        .unwrap();
        b.add(ResourceNode::new("dns", ResourceKind::KubernetesObjectValue).depends_on("chart"))
            .unwrap();
        b.build().unwrap()
    }

    #[tokio::test]
    async fn external_import_resolves_from_a_prior_run() {
        let registry = OutputRegistry::new();
        registry
            .publish(OutputValue {
                name: "sharedBroker".to_string(),
                value: "b-1.mq.internal".to_string(),
                source: ResourceId::new("rabbitmqCluster"),
                attribute: "amqpEndpoints[0]".to_string(),
            })
            .unwrap();

        let mut mock = MockProvisioner::new();
        mock.expect_provision()
            .withf(|req| req.id.as_str() == "chart")
            .times(1)
            .returning(|req| {
                assert_eq!(req.property("broker"), Some(&json!("b-1.mq.internal")));
                respond(req)
            });
        mock.expect_provision()
            .withf(|req| req.id.as_str() == "dns")
            .times(1)
            .returning(respond);

        let report = DependencyScheduler::new(Arc::new(mock))
            .run(&external_import_graph(), &registry)
            .await
            .unwrap();
        assert!(report.is_success(), "{}", report.summary());
    }

    #[tokio::test]
    async fn unpublished_external_import_fails_the_consumer() {
        let mut mock = MockProvisioner::new();
        mock.expect_provision().never();

        let report = DependencyScheduler::new(Arc::new(mock))
            .run(&external_import_graph(), &OutputRegistry::new())
            .await
            .unwrap();

        match report.outcome(&ResourceId::new("chart")) {
            Some(NodeOutcome::Failed { cause }) => {
                assert!(cause.contains("output `sharedBroker` has not been published"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(
            report.outcome(&ResourceId::new("dns")),
            Some(&NodeOutcome::Blocked {
                root_cause: ResourceId::new("chart")
            })
        );
        assert!(report.dispatch_order.is_empty());
    }

    #[tokio::test]
    async fn summary_mentions_failures_and_blocked_nodes() {
        let mut mock = MockProvisioner::new();
        mock.expect_provision().returning(|req| {
            if req.id.as_str() == "fs" {
                Err(ProvisioningError::new("mount target limit"))
            } else {
                respond(req)
            }
        });

        let report = DependencyScheduler::new(Arc::new(mock))
            .run(&graph(), &OutputRegistry::new())
            .await
            .unwrap();
        let summary = report.summary();
        assert!(summary.contains("failed  fs: mount target limit"));
        assert!(summary.contains("blocked: chart"));
    }
}
