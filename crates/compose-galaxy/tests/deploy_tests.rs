use compose_galaxy::simulate::SimulatedProvisioner;
use compose_galaxy::topology::{ids, outputs};
use compose_kernel::outputs::OutputRegistry;
use compose_kernel::scheduler::{DependencyScheduler, NodeOutcome, SchedulerOptions};
use compose_kernel::types::ResourceId;
use compose_test_utils::{galaxy_context_with, id, RecordingProvisioner};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

#[tokio::test]
async fn test_simulated_deploy_publishes_outputs() {
    let source = galaxy_context_with(json!({ "galaxy.backupsEnabled": true }));
    let registry = OutputRegistry::new();

    let report = compose_galaxy::deploy(
        &source,
        Arc::new(SimulatedProvisioner::new("eu-west-1")),
        SchedulerOptions::default(),
        &registry,
    )
    .await
    .unwrap();

    assert!(report.is_success(), "{}", report.summary());
    let endpoint = registry.value(outputs::BROKER_ENDPOINT).unwrap();
    assert!(endpoint.starts_with("b-"));
    assert!(endpoint.ends_with(".mq.eu-west-1.amazonaws.com"));
    assert!(!endpoint.contains(':'));

    let dns = registry.value(outputs::GALAXY_DNS).unwrap();
    assert!(dns.ends_with(".eu-west-1.elb.amazonaws.com"));
    assert_eq!(report.outputs.len(), 2);
}

#[tokio::test]
async fn test_dispatch_order_respects_dependencies() {
    let source = galaxy_context_with(json!({
        "galaxy.refdataEnabled": true,
        "rds.proxyEnabled": true,
        "rabbitmq.secretRotationDays": 30
    }));
    let (_, graph) = compose_galaxy::compose(&source).unwrap();

    let report = DependencyScheduler::with_options(
        Arc::new(SimulatedProvisioner::default()),
        SchedulerOptions { max_in_flight: 4 },
    )
    .run(&graph, &OutputRegistry::new())
    .await
    .unwrap();

    assert!(report.is_success(), "{}", report.summary());
    assert_eq!(report.dispatch_order.len(), graph.len());
    assert_eq!(report.dispatch_order[0], id(ids::VPC));

    let position: HashMap<&ResourceId, usize> = report
        .dispatch_order
        .iter()
        .enumerate()
        .map(|(i, n)| (n, i))
        .collect();
    for node in graph.nodes() {
        for dep in node.dependencies() {
            assert!(
                position[dep] < position[node.id()],
                "{} dispatched before {dep}",
                node.id()
            );
        }
    }
}

#[tokio::test]
async fn test_chart_receives_resolved_endpoints() {
    let source = galaxy_context_with(json!({ "rds.proxyEnabled": true }));
    let (_, graph) = compose_galaxy::compose(&source).unwrap();
    let recorder = Arc::new(
        RecordingProvisioner::new()
            .with_attribute(ids::VPC, "vpcId", json!("vpc-1"))
            .with_attribute(ids::VPC, "privateSubnets", json!(["subnet-a", "subnet-b"]))
            .with_attribute(ids::CLUSTER, "clusterSecurityGroupId", json!("sg-cluster"))
            .with_attribute(ids::CLUSTER, "clusterName", json!("galaxy"))
            .with_attribute(ids::CLUSTER, "region", json!("us-west-2"))
            .with_attribute("fileSystemSecurityGroup", "securityGroupId", json!("sg-fs"))
            .with_attribute("databaseSecurityGroup", "securityGroupId", json!("sg-db"))
            .with_attribute("databaseProxySecurityGroup", "securityGroupId", json!("sg-prx"))
            .with_attribute("rabbitmqSecurityGroup", "securityGroupId", json!("sg-mq"))
            .with_attribute(ids::FILE_SYSTEM, "fileSystemId", json!("fs-1"))
            .with_attribute(ids::DATABASE, "clusterArn", json!("arn:db"))
            .with_attribute(ids::DATABASE, "secretArn", json!("arn:db-secret"))
            .with_attribute(ids::DATABASE, "secretName", json!("db-secret"))
            .with_attribute(ids::DATABASE_PROXY, "endpoint", json!("proxy.example"))
            .with_attribute(ids::BROKER_SECRET, "secretArn", json!("arn:mq-secret"))
            .with_attribute(ids::BROKER_SECRET, "secretName", json!("mq-secret"))
            .with_attribute(
                ids::BROKER,
                "amqpEndpoints",
                json!(["amqps://b-1.mq.us-west-2.amazonaws.com:5671"]),
            ),
    );

    let report = DependencyScheduler::new(recorder.clone())
        .run(&graph, &OutputRegistry::new())
        .await
        .unwrap();
    assert!(
        matches!(report.outcome(&id(ids::CHART)), Some(NodeOutcome::Active { .. })),
        "{}",
        report.summary()
    );

    let chart = recorder.request(ids::CHART).unwrap();
    assert_eq!(
        chart.properties["values"]["rabbitmq"]["existingCluster"],
        json!("b-1.mq.us-west-2.amazonaws.com")
    );
    assert_eq!(
        chart.properties["values"]["postgresql"]["existingDatabase"],
        json!("proxy.example")
    );

    let broker = recorder.request(ids::BROKER).unwrap();
    assert_eq!(
        broker.properties["users"][0]["password"],
        json!("{{resolve:secretsmanager:arn:mq-secret:SecretString:password}}")
    );
    assert_eq!(broker.properties["subnetIds"], json!(["subnet-a"]));
}

#[tokio::test]
async fn test_concurrent_simulated_deploy_matches_sequential_outputs() {
    let source = galaxy_context_with(json!({ "rabbitmq.cluster": true }));

    let sequential = OutputRegistry::new();
    compose_galaxy::deploy(
        &source,
        Arc::new(SimulatedProvisioner::default()),
        SchedulerOptions::default(),
        &sequential,
    )
    .await
    .unwrap();

    let concurrent = OutputRegistry::new();
    let report = compose_galaxy::deploy(
        &source,
        Arc::new(SimulatedProvisioner::default()),
        SchedulerOptions { max_in_flight: 8 },
        &concurrent,
    )
    .await
    .unwrap();

    assert!(report.is_success());
    assert_eq!(sequential.snapshot(), concurrent.snapshot());
}

#[tokio::test]
async fn test_database_failure_blocks_dependents_only() {
    let source = galaxy_context_with(json!({ "galaxy.backupsEnabled": true }));
    let provisioner = Arc::new(SimulatedProvisioner::default().failing(ids::DATABASE));
    let registry = OutputRegistry::new();

    let report = compose_galaxy::deploy(
        &source,
        provisioner.clone(),
        SchedulerOptions::default(),
        &registry,
    )
    .await
    .unwrap();

    assert!(!report.is_success());
    assert_eq!(report.root_causes().len(), 1);
    assert_eq!(report.root_causes()[0].id, id(ids::DATABASE));

    let blocked = report.blocked_by(&id(ids::DATABASE));
    for dependent in [
        ids::BACKUP_VAULT,
        ids::BACKUP_PLAN,
        "galaxyEKSSecretPostgresql",
        ids::CHART,
        ids::DNS,
    ] {
        assert!(
            blocked.contains(&&id(dependent)),
            "{dependent} should be blocked by the database"
        );
    }

    // the broker branch does not need the database
    assert!(matches!(
        report.outcome(&id(ids::BROKER)),
        Some(NodeOutcome::Active { .. })
    ));
    assert!(registry.contains(outputs::BROKER_ENDPOINT));
    assert!(!registry.contains(outputs::GALAXY_DNS));
    assert!(!provisioner.provisioned().contains(&ResourceId::new(ids::CHART)));
}
