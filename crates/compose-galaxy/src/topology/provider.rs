use super::{ids, PROVIDER_UNIT};
use crate::settings::{ClusterTopology, DeploymentSettings, NewCluster, VpcChoice};
use compose_kernel::error::TopologyError;
use compose_kernel::graph::GraphBuilder;
use compose_kernel::node::{Property, ResourceNode};
use compose_kernel::types::ResourceKind;
use serde_json::json;

pub(super) const KUBERNETES_VERSION: &str = "1.27";

const VPC_CNI: &str = "vpc-cni";
const FLUENT_BIT: &str = "aws-for-fluent-bit";

/// Add-ons installed on a new cluster, in install order
const CLUSTER_ADDONS: &[&str] = &[
    "aws-load-balancer-controller",
    "metrics-server",
    "efs-csi-driver",
    "cluster-autoscaler",
    VPC_CNI,
    "coredns",
    "kube-proxy",
    "external-secrets",
    FLUENT_BIT,
];

/// Log groups fluent-bit may write to, under `/aws/eks/fluentbit-cloudwatch/`
const FLUENT_BIT_LOG_GROUPS: &[&str] = &[
    "logs",
    "workload/default",
    "workload/external-secrets",
    "workload/galaxy",
    "workload/kube-system",
];

const CONTROL_PLANE_LOGS: &[&str] = &["api", "audit", "authenticator", "controllerManager", "scheduler"];

/// Namespaces that get a default-deny policy when isolation is requested
const SYSTEM_NAMESPACES: &[&str] = &["default", "kube-public", "kube-node-lease", "external-secrets"];

/// Cluster API server and VPC resolver, the only egress left open
const ALLOWED_EGRESS: &[&str] = &["172.20.0.1/32", "10.0.0.2/32"];

pub(super) fn compose(
    builder: &mut GraphBuilder,
    settings: &DeploymentSettings,
) -> Result<(), TopologyError> {
    match &settings.cluster {
        ClusterTopology::Existing(existing) => {
            builder.add(
                ResourceNode::new(ids::VPC, ResourceKind::VpcLookup)
                    .in_unit(PROVIDER_UNIT)
                    .with_property("vpcId", existing.vpc_id.as_str()),
            )?;
            builder.add(
                ResourceNode::new(ids::CLUSTER, ResourceKind::ClusterImport)
                    .in_unit(PROVIDER_UNIT)
                    .depends_on(ids::VPC)
                    .with_property("clusterName", existing.cluster_name.as_str())
                    .with_property("clusterSecurityGroupId", existing.security_group_id.as_str())
                    .with_property("kubectlRoleArn", existing.kubectl_role_arn.as_str())
                    .with_property("vpcId", Property::reference(ids::VPC, "vpcId")),
            )?;
        }
        ClusterTopology::Provisioned(cluster) => compose_new_cluster(builder, cluster)?,
    }
    Ok(())
}

fn compose_new_cluster(builder: &mut GraphBuilder, cluster: &NewCluster) -> Result<(), TopologyError> {
    let vpc = match &cluster.vpc {
        VpcChoice::Lookup { vpc_id } => ResourceNode::new(ids::VPC, ResourceKind::VpcLookup)
            .with_property("vpcId", vpc_id.as_str()),
        VpcChoice::Create { .. } => ResourceNode::new(ids::VPC, ResourceKind::Vpc)
            .with_property("maxAzs", 2u32)
            .with_property("natGateways", 1u32),
    };
    builder.add(vpc.in_unit(PROVIDER_UNIT))?;

    if let VpcChoice::Create { flow_logs } = cluster.vpc {
        builder.add_when(flow_logs, || {
            ResourceNode::new("vpcFlowLog", ResourceKind::FlowLog)
                .in_unit(PROVIDER_UNIT)
                .depends_on(ids::VPC)
                .with_property("name", "eks-vpc-flowlog")
                .with_property("vpcId", Property::reference(ids::VPC, "vpcId"))
                .with_property("trafficType", "ALL")
        })?;
        for (id, service) in [
            ("eksVpcEndpoint", "eks"),
            ("secretsManagerVpcEndpoint", "secretsmanager"),
        ] {
            builder.add(
                ResourceNode::new(id, ResourceKind::VpcEndpoint)
                    .in_unit(PROVIDER_UNIT)
                    .depends_on(ids::VPC)
                    .with_property("service", service)
                    .with_property("vpcId", Property::reference(ids::VPC, "vpcId"))
                    .with_property("subnets", Property::reference(ids::VPC, "privateSubnets"))
                    .with_property("privateDnsEnabled", true),
            )?;
        }
    }

    builder.add(
        ResourceNode::new(ids::CLUSTER, ResourceKind::Cluster)
            .in_unit(PROVIDER_UNIT)
            .depends_on(ids::VPC)
            .with_property("version", KUBERNETES_VERSION)
            .with_property("vpcId", Property::reference(ids::VPC, "vpcId"))
            .with_property("subnets", Property::reference(ids::VPC, "privateSubnets"))
            .with_property("addons", addons(cluster.log_retention_days))
            .with_property("controlPlaneLogs", json!(CONTROL_PLANE_LOGS)),
    )?;

    if cluster.isolate_system_namespaces {
        for namespace in SYSTEM_NAMESPACES {
            builder.add(deny_all_policy(namespace))?;
        }
    }
    Ok(())
}

/// Add-on list with per-add-on values; log retention belongs to fluent-bit
fn addons(log_retention_days: u32) -> serde_json::Value {
    CLUSTER_ADDONS
        .iter()
        .map(|&name| match name {
            VPC_CNI => json!({ "name": name, "values": { "enableNetworkPolicy": true } }),
            FLUENT_BIT => {
                let log_groups: Vec<String> = FLUENT_BIT_LOG_GROUPS
                    .iter()
                    .map(|group| format!("/aws/eks/fluentbit-cloudwatch/{group}:*"))
                    .collect();
                json!({
                    "name": name,
                    "logGroups": log_groups,
                    "values": {
                        "cloudWatchLogs": {
                            "enabled": true,
                            "logRetentionDays": log_retention_days
                        }
                    }
                })
            }
            _ => json!({ "name": name }),
        })
        .collect()
}

fn deny_all_policy(namespace: &str) -> ResourceNode {
    let egress: Vec<_> = ALLOWED_EGRESS
        .iter()
        .map(|cidr| json!({ "to": [{ "ipBlock": { "cidr": cidr } }], "ports": [{ "port": 443, "protocol": "TCP" }] }))
        .collect();

    ResourceNode::new(format!("networkPolicy-{namespace}"), ResourceKind::KubernetesManifest)
        .in_unit(PROVIDER_UNIT)
        .depends_on(ids::CLUSTER)
        .with_property("cluster", Property::reference(ids::CLUSTER, "clusterName"))
        .with_property(
            "manifest",
            json!({
                "apiVersion": "networking.k8s.io/v1",
                "kind": "NetworkPolicy",
                "metadata": { "name": "default-deny", "namespace": namespace },
                "spec": {
                    "podSelector": {},
                    "policyTypes": ["Ingress", "Egress"],
                    "egress": egress
                }
            }),
        )
}
