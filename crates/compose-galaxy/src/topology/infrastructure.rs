use super::{ids, outputs, INFRA_UNIT};
use crate::settings::{BrokerDeployment, DeploymentSettings};
use compose_kernel::error::TopologyError;
use compose_kernel::graph::GraphBuilder;
use compose_kernel::node::{Property, ResourceNode};
use compose_kernel::outputs::{Derivation, OutputSpec};
use compose_kernel::types::ResourceKind;
use serde_json::json;

const DATABASE_ENGINE: &str = "aurora-postgresql";
const DATABASE_ENGINE_VERSION: &str = "13.9";
const DATABASE_USER: &str = "galaxydbuser";
const DATABASE_NAME: &str = "galaxy";

const BROKER_ENGINE: &str = "RABBITMQ";
const BROKER_ENGINE_VERSION: &str = "3.11.16";
const BROKER_USER: &str = "administrator";

/// Characters the broker rejects in passwords
const BROKER_PASSWORD_EXCLUDES: &str = "<>/\"#%{}|\\^~[]`@, :;='.+-?";

pub(super) const NFS_PORT: u16 = 2049;
pub(super) const POSTGRES_PORT: u16 = 5432;
pub(super) const AMQPS_PORT: u16 = 5671;

pub(super) fn compose(
    builder: &mut GraphBuilder,
    settings: &DeploymentSettings,
) -> Result<(), TopologyError> {
    compose_storage(builder)?;
    compose_database(builder, settings)?;
    compose_broker(builder, settings)?;
    compose_backups(builder, settings)?;
    Ok(())
}

/// Security group admitting `port` from the cluster's own security group
fn ingress_group(id: &str, port: u16) -> ResourceNode {
    ResourceNode::new(id, ResourceKind::SecurityGroup)
        .in_unit(INFRA_UNIT)
        .depends_on_all([ids::VPC, ids::CLUSTER])
        .with_property("vpcId", Property::reference(ids::VPC, "vpcId"))
        .with_property(
            "ingress",
            Property::list([Property::map([
                ("port", Property::from(u32::from(port))),
                (
                    "source",
                    Property::reference(ids::CLUSTER, "clusterSecurityGroupId"),
                ),
                ("description", Property::from("k8s ingress")),
            ])]),
        )
}

fn compose_storage(builder: &mut GraphBuilder) -> Result<(), TopologyError> {
    builder.add(ingress_group("fileSystemSecurityGroup", NFS_PORT))?;
    builder.add(
        ResourceNode::new(ids::FILE_SYSTEM, ResourceKind::FileSystem)
            .in_unit(INFRA_UNIT)
            .depends_on_all([ids::VPC, "fileSystemSecurityGroup"])
            .with_property("vpcId", Property::reference(ids::VPC, "vpcId"))
            .with_property("subnets", Property::reference(ids::VPC, "privateSubnets"))
            .with_property(
                "securityGroup",
                Property::reference("fileSystemSecurityGroup", "securityGroupId"),
            )
            .with_property("encrypted", true)
            .with_property("performanceMode", "generalPurpose"),
    )?;
    Ok(())
}

fn compose_database(
    builder: &mut GraphBuilder,
    settings: &DeploymentSettings,
) -> Result<(), TopologyError> {
    let db = &settings.database;
    builder.add(ingress_group("databaseSecurityGroup", POSTGRES_PORT))?;
    builder.add(
        ResourceNode::new(ids::DATABASE, ResourceKind::DatabaseCluster)
            .in_unit(INFRA_UNIT)
            .depends_on_all([ids::VPC, "databaseSecurityGroup"])
            .with_property("engine", DATABASE_ENGINE)
            .with_property("engineVersion", DATABASE_ENGINE_VERSION)
            .with_property("username", DATABASE_USER)
            .with_property("databaseName", DATABASE_NAME)
            .with_property("vpcId", Property::reference(ids::VPC, "vpcId"))
            .with_property("subnets", Property::reference(ids::VPC, "privateSubnets"))
            .with_property(
                "securityGroup",
                Property::reference("databaseSecurityGroup", "securityGroupId"),
            )
            .with_property(
                "scaling",
                json!({
                    "minCapacity": db.min_capacity,
                    "maxCapacity": db.max_capacity,
                    "autoPauseMinutes": db.auto_pause_minutes
                }),
            )
            .with_property("backupRetentionDays", db.snapshot_retention_days)
            .with_property("deletionProtection", true),
    )?;

    if db.proxy_enabled {
        builder.add(ingress_group("databaseProxySecurityGroup", POSTGRES_PORT))?;
        builder.add(
            ResourceNode::new(ids::DATABASE_PROXY, ResourceKind::DatabaseProxy)
                .in_unit(INFRA_UNIT)
                .depends_on_all([ids::DATABASE, "databaseProxySecurityGroup"])
                .with_property("target", Property::reference(ids::DATABASE, "clusterArn"))
                .with_property("secret", Property::reference(ids::DATABASE, "secretArn"))
                .with_property(
                    "securityGroup",
                    Property::reference("databaseProxySecurityGroup", "securityGroupId"),
                )
                .with_property("requireTls", false),
        )?;
    }
    Ok(())
}

fn compose_broker(
    builder: &mut GraphBuilder,
    settings: &DeploymentSettings,
) -> Result<(), TopologyError> {
    let broker = &settings.broker;

    builder.add(
        ResourceNode::new(ids::BROKER_SECRET, ResourceKind::Secret)
            .in_unit(INFRA_UNIT)
            .with_property("secretStringTemplate", json!({ "username": BROKER_USER }).to_string())
            .with_property("generateStringKey", "password")
            .with_property("passwordLength", 16u32)
            .with_property("excludeCharacters", BROKER_PASSWORD_EXCLUDES),
    )?;
    builder.add(ingress_group("rabbitmqSecurityGroup", AMQPS_PORT))?;

    // credentials travel as dynamic references, never as plain text
    let credential = |field: &str| {
        Property::Concat(vec![
            Property::literal("{{resolve:secretsmanager:"),
            Property::reference(ids::BROKER_SECRET, "secretArn"),
            Property::literal(format!(":SecretString:{field}}}}}")),
        ])
    };
    let subnets = match broker.deployment {
        BrokerDeployment::SingleInstance => {
            Property::list([Property::reference(ids::VPC, "privateSubnets[0]")])
        }
        BrokerDeployment::ClusterMultiAz => Property::reference(ids::VPC, "privateSubnets"),
    };

    builder.add(
        ResourceNode::new(ids::BROKER, ResourceKind::MessageBroker)
            .in_unit(INFRA_UNIT)
            .depends_on_all([ids::VPC, ids::BROKER_SECRET, "rabbitmqSecurityGroup"])
            .with_property("brokerName", format!("rabbitmq{INFRA_UNIT}"))
            .with_property("engineType", BROKER_ENGINE)
            .with_property("engineVersion", BROKER_ENGINE_VERSION)
            .with_property("deploymentMode", broker.deployment.as_str())
            .with_property("hostInstanceType", broker.instance_type.as_str())
            .with_property("publiclyAccessible", false)
            .with_property("autoMinorVersionUpgrade", true)
            .with_property("subnetIds", subnets)
            .with_property(
                "securityGroups",
                Property::list([Property::reference("rabbitmqSecurityGroup", "securityGroupId")]),
            )
            .with_property(
                "users",
                Property::list([Property::map([
                    ("username", credential("username")),
                    ("password", credential("password")),
                ])]),
            ),
    )?;

    if let Some(days) = broker.rotation_days {
        builder.add(
            ResourceNode::new("rabbitmqSecretRotationFunction", ResourceKind::Function)
                .in_unit(INFRA_UNIT)
                .depends_on_all([ids::BROKER, ids::VPC])
                .with_property("runtime", "python3.11")
                .with_property("handler", "index.handler")
                .with_property("subnets", Property::reference(ids::VPC, "privateSubnets"))
                .with_property(
                    "environment",
                    Property::map([
                        (
                            "HOST",
                            Property::Concat(vec![
                                Property::reference(ids::BROKER, "consoleUrl"),
                                Property::literal(":443"),
                            ]),
                        ),
                        ("AWS_STS_REGIONAL_ENDPOINTS", Property::from("regional")),
                    ]),
                ),
        )?;
        builder.add(
            ResourceNode::new("rabbitmqSecretRotation", ResourceKind::SecretRotation)
                .in_unit(INFRA_UNIT)
                .depends_on_all([ids::BROKER_SECRET, "rabbitmqSecretRotationFunction"])
                .with_property("secret", Property::reference(ids::BROKER_SECRET, "secretArn"))
                .with_property(
                    "rotationLambda",
                    Property::reference("rabbitmqSecretRotationFunction", "functionArn"),
                )
                .with_property("automaticallyAfterDays", days),
        )?;
    }

    builder.export(
        OutputSpec::new(outputs::BROKER_ENDPOINT, ids::BROKER, "amqpEndpoints[0]")
            .derived(Derivation::url_host()),
    )?;
    Ok(())
}

fn compose_backups(
    builder: &mut GraphBuilder,
    settings: &DeploymentSettings,
) -> Result<(), TopologyError> {
    if !settings.galaxy.backups_enabled {
        return Ok(());
    }

    builder.add(
        ResourceNode::new(ids::BACKUP_VAULT, ResourceKind::BackupVault)
            .in_unit(INFRA_UNIT)
            .depends_on_all([ids::DATABASE, ids::FILE_SYSTEM])
            .with_property("name", format!("{INFRA_UNIT}BackupVault")),
    )?;
    builder.add(
        ResourceNode::new(ids::BACKUP_PLAN, ResourceKind::BackupPlan)
            .in_unit(INFRA_UNIT)
            .depends_on_all([ids::BACKUP_VAULT, ids::DATABASE, ids::FILE_SYSTEM])
            .with_property("vault", Property::reference(ids::BACKUP_VAULT, "vaultName"))
            .with_property(
                "rules",
                json!([
                    { "name": "Daily", "schedule": "cron(0 5 * * ? *)", "deleteAfterDays": 35 },
                    { "name": "Monthly", "schedule": "cron(0 5 1 * ? *)", "deleteAfterDays": 365, "moveToColdStorageAfterDays": 30 }
                ]),
            )
            .with_property(
                "selection",
                Property::map([
                    ("name", Property::from("GalaxyInfraSelection")),
                    (
                        "resources",
                        Property::list([
                            Property::reference(ids::DATABASE, "clusterArn"),
                            Property::reference(ids::FILE_SYSTEM, "fileSystemArn"),
                        ]),
                    ),
                ]),
            ),
    )?;
    Ok(())
}
