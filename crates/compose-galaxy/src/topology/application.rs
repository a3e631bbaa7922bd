use super::{ids, infrastructure::AMQPS_PORT, outputs, APP_UNIT};
use crate::settings::DeploymentSettings;
use compose_kernel::error::TopologyError;
use compose_kernel::graph::GraphBuilder;
use compose_kernel::node::{Property, ResourceNode};
use compose_kernel::outputs::OutputSpec;
use compose_kernel::types::{ResourceId, ResourceKind};
use serde_json::{json, Map, Value};

const CHART_REPOSITORY: &str = "https://raw.githubusercontent.com/CloudVE/helm-charts/master/";
const STORAGE_CLASS: &str = "efs-sc";
const SECRET_STORE: &str = "aws-secretsmanager";
const POSTGRES_CREDENTIALS: &str = "galaxy.credentials.postgresql";
const RABBITMQ_CREDENTIALS: &str = "galaxy.credentials.rabbitmq";
const CERTIFICATE_ANNOTATION: &str = "alb.ingress.kubernetes.io/certificate-arn";

pub(super) fn compose(
    builder: &mut GraphBuilder,
    settings: &DeploymentSettings,
) -> Result<(), TopologyError> {
    let galaxy = &settings.galaxy;
    let namespace = galaxy.namespace.as_str();

    builder.add(
        manifest("efsStorageClass", &[ids::FILE_SYSTEM]).with_property(
            "manifest",
            Property::map([
                ("kind", Property::from("StorageClass")),
                ("apiVersion", Property::from("storage.k8s.io/v1")),
                ("metadata", Property::from(json!({ "name": STORAGE_CLASS }))),
                ("provisioner", Property::from("efs.csi.aws.com")),
                ("mountOptions", Property::from(json!(["tls"]))),
                (
                    "parameters",
                    Property::map([
                        ("provisioningMode", Property::from("efs-ap")),
                        (
                            "fileSystemId",
                            Property::reference(ids::FILE_SYSTEM, "fileSystemId"),
                        ),
                        ("directoryPerms", Property::from("700")),
                        ("gidRangeStart", Property::from("1000")),
                        ("gidRangeEnd", Property::from("2000")),
                        ("basePath", Property::from("/dynamic_provisioning")),
                    ]),
                ),
            ]),
        ),
    )?;

    builder.add(
        manifest("galaxyEKSSecretStore", &[]).with_property(
            "manifest",
            Property::map([
                ("apiVersion", Property::from("external-secrets.io/v1beta1")),
                ("kind", Property::from("ClusterSecretStore")),
                ("metadata", Property::from(json!({ "name": SECRET_STORE }))),
                (
                    "spec",
                    Property::map([(
                        "provider",
                        Property::map([(
                            "aws",
                            Property::map([
                                ("service", Property::from("SecretsManager")),
                                ("region", Property::reference(ids::CLUSTER, "region")),
                                (
                                    "auth",
                                    Property::from(json!({
                                        "jwt": {
                                            "serviceAccountRef": {
                                                "name": "external-secrets-sa",
                                                "namespace": "external-secrets"
                                            }
                                        }
                                    })),
                                ),
                            ]),
                        )]),
                    )]),
                ),
            ]),
        ),
    )?;

    builder.add(manifest("galaxyEKSNamespace", &[]).with_property(
        "manifest",
        json!({ "apiVersion": "v1", "kind": "Namespace", "metadata": { "name": namespace } }),
    ))?;

    builder.add_when(galaxy.network_policy_enabled, || {
        manifest("galaxyNetworkPolicy", &["galaxyEKSNamespace"]).with_property(
            "manifest",
            json!({
                "apiVersion": "networking.k8s.io/v1",
                "kind": "NetworkPolicy",
                "metadata": { "name": "default-deny-cross-namespace", "namespace": namespace },
                "spec": {
                    "podSelector": {},
                    "policyTypes": ["Ingress"],
                    "ingress": [{ "from": [{ "podSelector": {} }] }]
                }
            }),
        )
    })?;

    builder.add(external_secret(
        "galaxyEKSSecretPostgresql",
        POSTGRES_CREDENTIALS,
        namespace,
        ids::DATABASE,
    ))?;
    builder.add(external_secret(
        "galaxyEKSSecretRabbitmq",
        RABBITMQ_CREDENTIALS,
        namespace,
        ids::BROKER_SECRET,
    ))?;

    let s3csi = s3csi_values();
    if galaxy.refdata_enabled {
        builder.add(
            manifest("csiS3Secret", &["galaxyEKSNamespace"]).with_property(
                "manifest",
                Property::map([
                    ("apiVersion", Property::from("v1")),
                    ("kind", Property::from("Secret")),
                    (
                        "metadata",
                        Property::from(json!({ "namespace": namespace, "name": "csi-s3-secret" })),
                    ),
                    (
                        "stringData",
                        Property::map([
                            ("accessKeyID", Property::from("")),
                            ("secretAccessKey", Property::from("")),
                            (
                                "endpoint",
                                Property::Concat(vec![
                                    Property::literal("https://s3."),
                                    Property::reference(ids::CLUSTER, "region"),
                                    Property::literal(".amazonaws.com"),
                                ]),
                            ),
                        ]),
                    ),
                ]),
            ),
        )?;
        builder.add(
            helm_release("csiS3", "csi-s3", namespace, &["csiS3Secret"])
                .with_property("values", s3csi.clone()),
        )?;
    }

    // the proxy, when present, fronts the database for the chart
    let (database, database_host) = if settings.database.proxy_enabled {
        (ids::DATABASE_PROXY, "endpoint")
    } else {
        (ids::DATABASE, "endpoint.hostname")
    };

    let mut chart_deps = vec![
        "efsStorageClass",
        "galaxyEKSSecretPostgresql",
        "galaxyEKSSecretRabbitmq",
        ids::BROKER,
        database,
    ];
    if galaxy.refdata_enabled {
        chart_deps.push("csiS3");
    }

    let mut annotations = Map::new();
    for (key, value) in [
        ("alb.ingress.kubernetes.io/target-type", "ip"),
        ("alb.ingress.kubernetes.io/group.name", "galaxy"),
        ("alb.ingress.kubernetes.io/scheme", "internet-facing"),
    ] {
        annotations.insert(key.to_string(), json!(value));
    }
    if let Some(arn) = &galaxy.load_balancer_cert_arn {
        annotations.insert(CERTIFICATE_ANNOTATION.to_string(), json!(arn));
    }
    let tusd_annotations = annotations.clone();
    annotations.insert("alb.ingress.kubernetes.io/group.order".to_string(), json!("99"));

    let mut configs = Map::new();
    configs.insert(
        "galaxy.yml".to_string(),
        json!({
            "galaxy": {
                "admin_users": galaxy.admin_emails,
                "require_login": true,
                "show_welcome_with_login": true,
                "log_level": galaxy.log_level
            }
        }),
    );
    for (name, content) in &galaxy.configs {
        configs.insert(name.clone(), json!(content));
    }

    builder.add(
        helm_release(ids::CHART, "galaxy", namespace, &chart_deps)
            .with_property("timeoutMinutes", 10u32)
            .with_property(
                "values",
                Property::map([
                    ("configs", Property::from(Value::Object(configs))),
                    (
                        "extraInitCommands",
                        Property::from(json!(galaxy.additional_setup_commands)),
                    ),
                    (
                        "rabbitmq",
                        Property::map([
                            ("deploy", Property::from(false)),
                            ("port", Property::from(u32::from(AMQPS_PORT))),
                            ("protocol", Property::from("amqps")),
                            ("existingCluster", Property::import(outputs::BROKER_ENDPOINT)),
                            ("existingSecret", Property::from(RABBITMQ_CREDENTIALS)),
                        ]),
                    ),
                    (
                        "postgresql",
                        Property::map([
                            ("deploy", Property::from(false)),
                            ("existingDatabase", Property::reference(database, database_host)),
                            ("galaxyConnectionParams", Property::from("")),
                            ("galaxyExistingSecret", Property::from(POSTGRES_CREDENTIALS)),
                        ]),
                    ),
                    (
                        "refdata",
                        Property::from(json!({ "enabled": galaxy.refdata_enabled, "type": "s3csi" })),
                    ),
                    ("s3csi", s3csi),
                    ("cvmfs", Property::from(json!({ "deploy": false }))),
                    (
                        "ingress",
                        Property::from(json!({
                            "path": "/",
                            "hosts": [{ "paths": [{ "path": "/*" }] }],
                            "ingressClassName": "alb",
                            "annotations": annotations,
                            "canary": { "enabled": false }
                        })),
                    ),
                    (
                        "tusd",
                        Property::from(json!({
                            "ingress": { "ingressClassName": "alb", "annotations": tusd_annotations }
                        })),
                    ),
                    (
                        "persistence",
                        Property::from(json!({
                            "storageClass": STORAGE_CLASS,
                            "accessMode": "ReadWriteMany"
                        })),
                    ),
                ]),
            ),
    )?;

    builder.add(
        ResourceNode::new(ids::DNS, ResourceKind::KubernetesObjectValue)
            .in_unit(APP_UNIT)
            .depends_on_all([ids::CLUSTER, ids::CHART])
            .with_property("cluster", Property::reference(ids::CLUSTER, "clusterName"))
            .with_property("objectType", "ingress")
            .with_property("objectNamespace", namespace)
            .with_property("objectName", "galaxy")
            .with_property("jsonPath", ".status.loadBalancer.ingress[0].hostname"),
    )?;
    builder.export(OutputSpec::new(outputs::GALAXY_DNS, ids::DNS, "value"))?;
    Ok(())
}

/// Manifest applied to the cluster after `deps`
fn manifest(id: &str, deps: &[&str]) -> ResourceNode {
    ResourceNode::new(id, ResourceKind::KubernetesManifest)
        .in_unit(APP_UNIT)
        .depends_on(ids::CLUSTER)
        .depends_on_all(deps.iter().copied())
        .with_property("cluster", Property::reference(ids::CLUSTER, "clusterName"))
        .with_property("overwrite", true)
}

fn helm_release(id: &str, chart: &str, namespace: &str, deps: &[&str]) -> ResourceNode {
    ResourceNode::new(id, ResourceKind::HelmRelease)
        .in_unit(APP_UNIT)
        .depends_on(ids::CLUSTER)
        .depends_on_all(deps.iter().copied())
        .with_property("cluster", Property::reference(ids::CLUSTER, "clusterName"))
        .with_property("chart", chart)
        .with_property("release", chart)
        .with_property("repository", CHART_REPOSITORY)
        .with_property("namespace", namespace)
}

/// External secret mirroring the `username`/`password` pair of `source`
fn external_secret(id: &str, name: &str, namespace: &str, source: &str) -> ResourceNode {
    let key = || Property::reference(ResourceId::new(source), "secretName");
    let entry = |field: &str| {
        Property::map([
            ("secretKey", Property::from(field)),
            (
                "remoteRef",
                Property::map([("key", key()), ("property", Property::from(field))]),
            ),
        ])
    };

    manifest(id, &["galaxyEKSNamespace", "galaxyEKSSecretStore", source]).with_property(
        "manifest",
        Property::map([
            ("apiVersion", Property::from("external-secrets.io/v1beta1")),
            ("kind", Property::from("ExternalSecret")),
            (
                "metadata",
                Property::from(json!({ "name": name, "namespace": namespace })),
            ),
            (
                "spec",
                Property::map([
                    (
                        "secretStoreRef",
                        Property::from(json!({ "name": SECRET_STORE, "kind": "ClusterSecretStore" })),
                    ),
                    (
                        "target",
                        Property::from(json!({ "name": name, "creationPolicy": "Orphan" })),
                    ),
                    (
                        "data",
                        Property::list([entry("username"), entry("password")]),
                    ),
                ]),
            ),
        ]),
    )
}

fn s3csi_values() -> Property {
    Property::from(json!({
        "deploy": false,
        "storageClass": {
            "name": "refdata-gxy-data",
            "mounter": "geesefs",
            "singleBucket": "biorefdata",
            "mountOptions": "-o allow_other --dir-mode 0777 --file-mode 0666 --cache /tmp/geesecache --stat-cache-ttl 9m0s --cache-to-disk-hits 1 --no-dir-object --no-implicit-dir --stat-cache-ttl 120m0s --max-disk-cache-fd 4096"
        },
        "secret": { "create": false, "usePrefix": true, "prefix": "/galaxy/v1" }
    }))
}
