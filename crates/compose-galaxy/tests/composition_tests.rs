use compose_galaxy::topology::{ids, outputs, APP_UNIT, INFRA_UNIT, PROVIDER_UNIT};
use compose_kernel::error::{ComposeError, TopologyError};
use compose_kernel::graph::ResourceGraph;
use compose_kernel::node::Property;
use compose_kernel::types::{ResourceId, ResourceKind};
use compose_test_utils::{galaxy_context_with, id};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashMap;

fn compose(overrides: serde_json::Value) -> Result<ResourceGraph, ComposeError> {
    compose_galaxy::compose(&galaxy_context_with(overrides)).map(|(_, graph)| graph)
}

fn ids_of(graph: &ResourceGraph) -> Vec<&str> {
    graph.nodes().map(|n| n.id().as_str()).collect()
}

fn deps_of<'g>(graph: &'g ResourceGraph, node: &str) -> Vec<&'g str> {
    graph
        .node(&id(node))
        .unwrap_or_else(|| panic!("{node} not declared"))
        .dependencies()
        .iter()
        .map(ResourceId::as_str)
        .collect()
}

fn existing_cluster() -> serde_json::Value {
    json!({
        "eks.clusterName": "shared",
        "vpc.id": "vpc-0abc",
        "eks.securityGroupId": "sg-0abc",
        "eks.kubectlRoleArn": "arn:aws:iam::123456789012:role/kubectl"
    })
}

#[test]
fn test_minimal_context_composes_all_units() {
    let graph = compose(json!({})).unwrap();

    let units = graph.units();
    assert_eq!(
        units.keys().copied().collect::<Vec<_>>(),
        vec![PROVIDER_UNIT, INFRA_UNIT, APP_UNIT]
    );
    assert!(graph.topological_order().is_ok());
    assert_eq!(
        graph.outputs().iter().map(|o| o.name.as_str()).collect::<Vec<_>>(),
        vec![outputs::BROKER_ENDPOINT, outputs::GALAXY_DNS]
    );
    assert_eq!(graph.node(&id(ids::VPC)).unwrap().kind(), ResourceKind::Vpc);
    assert_eq!(graph.node(&id(ids::CLUSTER)).unwrap().kind(), ResourceKind::Cluster);

    let Some(Property::Literal(addons)) = graph.node(&id(ids::CLUSTER)).unwrap().property("addons")
    else {
        panic!("cluster add-ons should be a literal list");
    };
    let names: Vec<&str> = addons
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["name"].as_str().unwrap())
        .collect();
    assert_eq!(
        names,
        vec![
            "aws-load-balancer-controller",
            "metrics-server",
            "efs-csi-driver",
            "cluster-autoscaler",
            "vpc-cni",
            "coredns",
            "kube-proxy",
            "external-secrets",
            "aws-for-fluent-bit"
        ]
    );
    let fluent_bit = addons.as_array().unwrap().last().unwrap();
    assert_eq!(
        fluent_bit["values"]["cloudWatchLogs"]["logRetentionDays"],
        json!(30)
    );
}

#[test]
fn test_log_retention_configures_fluent_bit() {
    let graph = compose(json!({ "cloudwatch.logRetentionDays": 90 })).unwrap();
    let Some(Property::Literal(addons)) = graph.node(&id(ids::CLUSTER)).unwrap().property("addons")
    else {
        panic!("cluster add-ons should be a literal list");
    };
    let fluent_bit = addons
        .as_array()
        .unwrap()
        .iter()
        .find(|a| a["name"] == "aws-for-fluent-bit")
        .unwrap();
    assert_eq!(
        fluent_bit["values"]["cloudWatchLogs"]["logRetentionDays"],
        json!(90)
    );
}

#[test]
fn test_backups_disabled_adds_no_backup_nodes() {
    let graph = compose(json!({ "galaxy.backupsEnabled": false })).unwrap();
    assert!(!graph.contains(&id(ids::BACKUP_VAULT)));
    assert!(!graph.contains(&id(ids::BACKUP_PLAN)));
}

#[test]
fn test_backups_enabled_adds_vault_and_plan() {
    let without = compose(json!({})).unwrap();
    let with = compose(json!({ "galaxy.backupsEnabled": true })).unwrap();

    assert_eq!(with.len(), without.len() + 2);
    for backup in [ids::BACKUP_VAULT, ids::BACKUP_PLAN] {
        let deps = deps_of(&with, backup);
        assert!(deps.contains(&ids::DATABASE), "{backup} must follow the database");
        assert!(deps.contains(&ids::FILE_SYSTEM), "{backup} must follow the file system");
    }
    assert!(deps_of(&with, ids::BACKUP_PLAN).contains(&ids::BACKUP_VAULT));
}

#[test]
fn test_existing_cluster_is_imported() {
    let graph = compose(existing_cluster()).unwrap();

    assert_eq!(graph.node(&id(ids::VPC)).unwrap().kind(), ResourceKind::VpcLookup);
    let cluster = graph.node(&id(ids::CLUSTER)).unwrap();
    assert_eq!(cluster.kind(), ResourceKind::ClusterImport);
    assert_eq!(
        cluster.property("clusterName"),
        Some(&Property::literal("shared"))
    );
    assert!(!graph.contains(&id("eksVpcEndpoint")));
    assert!(ids_of(&graph).iter().all(|n| !n.starts_with("networkPolicy-")));
}

#[test]
fn test_existing_cluster_without_vpc_id_names_the_key() {
    let mut context = existing_cluster();
    context.as_object_mut().unwrap().remove("vpc.id");

    match compose(context).unwrap_err() {
        ComposeError::Configuration(e) => assert_eq!(e.key(), Some("vpc.id")),
        other => panic!("expected a configuration error, got {other}"),
    }
}

#[test]
fn test_missing_required_key_fails_before_composition() {
    let source = compose_test_utils::source(json!({
        "context": { "rds.minCapacity": 2, "rds.maxCapacity": 4 }
    }));
    let err = compose_galaxy::compose(&source).unwrap_err();
    assert!(err.aborts_run());
    assert!(err.is_user_error());
    assert!(err.to_string().contains("rabbitmq.instance"));
}

#[test]
fn test_contradictory_cluster_flags_are_rejected() {
    let err = compose(json!({ "eks.clusterName": "shared", "eks.useExisting": false })).unwrap_err();
    assert!(matches!(
        err,
        ComposeError::Topology(TopologyError::Contradiction(_))
    ));
}

#[test]
fn test_new_vpc_gets_endpoints_and_optional_flow_log() {
    let plain = compose(json!({})).unwrap();
    assert!(plain.contains(&id("eksVpcEndpoint")));
    assert!(plain.contains(&id("secretsManagerVpcEndpoint")));
    assert!(!plain.contains(&id("vpcFlowLog")));

    let logged = compose(json!({ "vpc.enableFlowlogs": true })).unwrap();
    assert_eq!(deps_of(&logged, "vpcFlowLog"), vec![ids::VPC]);

    // flow logs only apply to a VPC this deployment creates
    let looked_up = compose(json!({ "vpc.id": "vpc-1", "vpc.enableFlowlogs": true })).unwrap();
    assert!(!looked_up.contains(&id("vpcFlowLog")));
    assert!(!looked_up.contains(&id("eksVpcEndpoint")));
}

#[test]
fn test_system_namespace_isolation() {
    let graph = compose(json!({ "eks.isolateSystemNamespaces": true })).unwrap();
    let policies: Vec<&str> = ids_of(&graph)
        .into_iter()
        .filter(|n| n.starts_with("networkPolicy-"))
        .collect();
    assert_eq!(
        policies,
        vec![
            "networkPolicy-default",
            "networkPolicy-kube-public",
            "networkPolicy-kube-node-lease",
            "networkPolicy-external-secrets"
        ]
    );
    for policy in policies {
        assert_eq!(deps_of(&graph, policy), vec![ids::CLUSTER]);
    }
}

#[test]
fn test_refdata_adds_csi_driver_before_chart() {
    let graph = compose(json!({ "galaxy.refdataEnabled": true })).unwrap();
    assert_eq!(deps_of(&graph, "csiS3"), vec![ids::CLUSTER, "csiS3Secret"]);
    assert!(deps_of(&graph, ids::CHART).contains(&"csiS3"));

    let without = compose(json!({})).unwrap();
    assert!(!without.contains(&id("csiS3")));
    assert!(!deps_of(&without, ids::CHART).contains(&"csiS3"));
}

#[test]
fn test_proxy_fronts_the_database_for_the_chart() {
    let graph = compose(json!({ "rds.proxyEnabled": true })).unwrap();
    let chart_deps = deps_of(&graph, ids::CHART);
    assert!(chart_deps.contains(&ids::DATABASE_PROXY));
    assert!(!chart_deps.contains(&ids::DATABASE));
    assert!(deps_of(&graph, ids::DATABASE_PROXY).contains(&ids::DATABASE));

    let direct = compose(json!({})).unwrap();
    assert!(!direct.contains(&id(ids::DATABASE_PROXY)));
    assert!(deps_of(&direct, ids::CHART).contains(&ids::DATABASE));
}

#[test]
fn test_secret_rotation_only_when_configured() {
    let plain = compose(json!({})).unwrap();
    assert!(!plain.contains(&id("rabbitmqSecretRotation")));

    let rotating = compose(json!({ "rabbitmq.secretRotationDays": 30 })).unwrap();
    assert_eq!(
        deps_of(&rotating, "rabbitmqSecretRotation"),
        vec![ids::BROKER_SECRET, "rabbitmqSecretRotationFunction"]
    );
    assert_eq!(
        rotating
            .node(&id("rabbitmqSecretRotation"))
            .unwrap()
            .property("automaticallyAfterDays"),
        Some(&Property::from(30u32))
    );
}

#[test]
fn test_broker_never_receives_plain_credentials() {
    let graph = compose(json!({})).unwrap();
    let broker = graph.node(&id(ids::BROKER)).unwrap();
    let users = serde_json::to_string(broker.property("users").unwrap()).unwrap();
    assert!(users.contains("{{resolve:secretsmanager:"));
    assert!(broker.depends_directly_on(&id(ids::BROKER_SECRET)));
}

#[test]
fn test_plan_lists_every_node_once() {
    let graph = compose(json!({ "galaxy.backupsEnabled": true })).unwrap();
    let plan = graph.plan().unwrap();
    assert_eq!(plan.steps.len(), graph.len());
    let json = serde_json::to_value(&plan).unwrap();
    assert_eq!(json["steps"][0]["id"], json!(ids::VPC));
}

proptest! {
    #[test]
    fn prop_every_flag_combination_orders(
        existing in any::<bool>(),
        lookup_vpc in any::<bool>(),
        flow_logs in any::<bool>(),
        isolate in any::<bool>(),
        proxy in any::<bool>(),
        cluster_mq in any::<bool>(),
        rotation in any::<bool>(),
        refdata in any::<bool>(),
        backups in any::<bool>(),
        network_policy in any::<bool>(),
    ) {
        let mut context = json!({
            "vpc.enableFlowlogs": flow_logs,
            "rds.proxyEnabled": proxy,
            "rabbitmq.cluster": cluster_mq,
            "galaxy.refdataEnabled": refdata,
            "galaxy.backupsEnabled": backups,
            "galaxy.networkPolicyEnabled": network_policy,
        });
        let map = context.as_object_mut().unwrap();
        if existing {
            map.extend(existing_cluster().as_object().unwrap().clone());
        } else {
            map.insert("eks.isolateSystemNamespaces".into(), json!(isolate));
            if lookup_vpc {
                map.insert("vpc.id".into(), json!("vpc-9"));
            }
        }
        if rotation {
            map.insert("rabbitmq.secretRotationDays".into(), json!(30));
        }

        let graph = compose(context).unwrap();
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
        prop_assert_eq!(graph.contains(&id(ids::BACKUP_PLAN)), backups);
        prop_assert_eq!(graph.contains(&id("csiS3")), refdata);
        prop_assert_eq!(graph.contains(&id(ids::DATABASE_PROXY)), proxy);
    }
}
