//! Typed deployment settings
//!
//! Every context key the composition reads is resolved here, once, before
//! any node is declared. Mutually exclusive choices become enums so the
//! composition rules can match on them exhaustively.

use compose_kernel::config::{ConfigResolver, ConfigSource, ConfigSourceBuilder, ENV_PREFIX};
use compose_kernel::error::{ComposeError, ConfigurationError, TopologyError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Broker host sizes accepted for `rabbitmq.instance`
pub const BROKER_INSTANCE_TYPES: &[&str] = &[
    "mq.t3.micro",
    "mq.m5.large",
    "mq.m5.xlarge",
    "mq.m5.2xlarge",
    "mq.m5.4xlarge",
];

/// Accepted values for `galaxy.logLevel`
pub const LOG_LEVELS: &[&str] = &["DEBUG", "INFO", "WARNING", "ERROR"];

/// File extensions picked up from `galaxy.configDir`
pub const CONFIG_EXTENSIONS: &[&str] = &["xml", "conf", "yml"];

pub const DEFAULT_LOG_RETENTION_DAYS: u32 = 30;
pub const DEFAULT_AUTO_PAUSE_MINUTES: u32 = 10;
pub const DEFAULT_SNAPSHOT_RETENTION_DAYS: u32 = 7;

/// An EKS cluster that already exists and is only imported
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExistingCluster {
    pub cluster_name: String,
    pub vpc_id: String,
    pub security_group_id: String,
    pub kubectl_role_arn: String,
}

/// Where a newly created cluster gets its VPC from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum VpcChoice {
    Lookup { vpc_id: String },
    Create { flow_logs: bool },
}

/// A cluster created by this deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewCluster {
    pub vpc: VpcChoice,
    pub log_retention_days: u32,
    /// Default-deny policies for the system namespaces
    pub isolate_system_namespaces: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ClusterTopology {
    Existing(ExistingCluster),
    Provisioned(NewCluster),
}

impl ClusterTopology {
    #[must_use]
    pub fn is_existing(&self) -> bool {
        matches!(self, Self::Existing(_))
    }

    /// Whether this deployment creates the VPC
    #[must_use]
    pub fn creates_vpc(&self) -> bool {
        matches!(
            self,
            Self::Provisioned(NewCluster {
                vpc: VpcChoice::Create { .. },
                ..
            })
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseSettings {
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub auto_pause_minutes: u32,
    pub snapshot_retention_days: u32,
    pub proxy_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BrokerDeployment {
    /// One broker on the first private subnet
    SingleInstance,
    /// Broker cluster across every private subnet
    ClusterMultiAz,
}

impl BrokerDeployment {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SingleInstance => "SINGLE_INSTANCE",
            Self::ClusterMultiAz => "CLUSTER_MULTI_AZ",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerSettings {
    pub deployment: BrokerDeployment,
    pub instance_type: String,
    /// Rotate the broker secret every this many days
    pub rotation_days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GalaxySettings {
    pub namespace: String,
    pub admin_emails: String,
    pub log_level: String,
    pub refdata_enabled: bool,
    pub backups_enabled: bool,
    pub network_policy_enabled: bool,
    pub load_balancer_cert_arn: Option<String>,
    pub additional_setup_commands: Vec<String>,
    /// Extra chart config files, by file name
    pub configs: BTreeMap<String, String>,
}

/// Everything the composition rules need, fully resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentSettings {
    pub cluster: ClusterTopology,
    pub database: DatabaseSettings,
    pub broker: BrokerSettings,
    pub galaxy: GalaxySettings,
}

impl DeploymentSettings {
    /// Resolve all settings from `config`
    ///
    /// # Errors
    /// `Configuration` for missing or malformed keys, `Topology` for flags
    /// that contradict each other.
    pub fn resolve(config: &ConfigResolver<'_>) -> Result<Self, ComposeError> {
        let settings = Self {
            cluster: resolve_cluster(config)?,
            database: resolve_database(config)?,
            broker: resolve_broker(config)?,
            galaxy: resolve_galaxy(config)?,
        };
        tracing::info!(
            existing_cluster = settings.cluster.is_existing(),
            backups = settings.galaxy.backups_enabled,
            refdata = settings.galaxy.refdata_enabled,
            proxy = settings.database.proxy_enabled,
            "deployment settings resolved"
        );
        Ok(settings)
    }
}

fn resolve_cluster(config: &ConfigResolver<'_>) -> Result<ClusterTopology, ComposeError> {
    let named = config.contains("eks.clusterName");
    let use_existing = config.boolean_or("eks.useExisting", named)?;
    let isolate = config.boolean_or("eks.isolateSystemNamespaces", false)?;

    if use_existing {
        if isolate {
            return Err(TopologyError::Contradiction(
                "eks.isolateSystemNamespaces requires a newly created cluster".to_string(),
            )
            .into());
        }
        const REASON: &str = "required when reusing an existing EKS cluster";
        let require = |key: &str| {
            config
                .optional_string(key)?
                .ok_or_else(|| ConfigurationError::missing_because(key, REASON))
        };
        let vpc_id = require("vpc.id")?;
        let security_group_id = require("eks.securityGroupId")?;
        let kubectl_role_arn = require("eks.kubectlRoleArn")?;
        let cluster_name = require("eks.clusterName")?;

        if config.contains("vpc.enableFlowlogs") {
            tracing::warn!("vpc.enableFlowlogs ignored for an existing cluster");
        }
        return Ok(ClusterTopology::Existing(ExistingCluster {
            cluster_name,
            vpc_id,
            security_group_id,
            kubectl_role_arn,
        }));
    }

    if named {
        return Err(TopologyError::Contradiction(
            "eks.clusterName is set but eks.useExisting is false".to_string(),
        )
        .into());
    }

    let vpc = match config.optional_string("vpc.id")? {
        Some(vpc_id) => {
            if config.boolean_or("vpc.enableFlowlogs", false)? {
                tracing::warn!(%vpc_id, "vpc.enableFlowlogs ignored for a looked-up VPC");
            }
            VpcChoice::Lookup { vpc_id }
        }
        None => VpcChoice::Create {
            flow_logs: config.boolean_or("vpc.enableFlowlogs", false)?,
        },
    };

    Ok(ClusterTopology::Provisioned(NewCluster {
        vpc,
        log_retention_days: config
            .unsigned_or("cloudwatch.logRetentionDays", DEFAULT_LOG_RETENTION_DAYS)?,
        isolate_system_namespaces: isolate,
    }))
}

fn resolve_database(config: &ConfigResolver<'_>) -> Result<DatabaseSettings, ComposeError> {
    let min_capacity = config.unsigned("rds.minCapacity")?;
    let max_capacity = config.unsigned("rds.maxCapacity")?;
    if min_capacity > max_capacity {
        return Err(TopologyError::Contradiction(format!(
            "rds.minCapacity ({min_capacity}) exceeds rds.maxCapacity ({max_capacity})"
        ))
        .into());
    }

    Ok(DatabaseSettings {
        min_capacity,
        max_capacity,
        auto_pause_minutes: config.unsigned_or("rds.autoPause", DEFAULT_AUTO_PAUSE_MINUTES)?,
        snapshot_retention_days: config
            .unsigned_or("rds.snapshotRetentionInDays", DEFAULT_SNAPSHOT_RETENTION_DAYS)?,
        proxy_enabled: config.boolean_or("rds.proxyEnabled", false)?,
    })
}

fn resolve_broker(config: &ConfigResolver<'_>) -> Result<BrokerSettings, ComposeError> {
    let deployment = if config.boolean_or("rabbitmq.cluster", false)? {
        BrokerDeployment::ClusterMultiAz
    } else {
        BrokerDeployment::SingleInstance
    };
    let rotation_days = config.optional_unsigned("rabbitmq.secretRotationDays")?;
    if rotation_days == Some(0) {
        return Err(ConfigurationError::TypeMismatch {
            key: "rabbitmq.secretRotationDays".to_string(),
            expected: "a positive number of days".to_string(),
            found: "0".to_string(),
        }
        .into());
    }

    Ok(BrokerSettings {
        deployment,
        instance_type: config.enumeration("rabbitmq.instance", BROKER_INSTANCE_TYPES)?,
        rotation_days,
    })
}

fn resolve_galaxy(config: &ConfigResolver<'_>) -> Result<GalaxySettings, ComposeError> {
    let configs = match config.optional_string("galaxy.configDir")? {
        Some(dir) => load_configs(Path::new(&dir))?,
        None => BTreeMap::new(),
    };

    Ok(GalaxySettings {
        namespace: config.string("galaxy.namespace")?,
        admin_emails: config.string("galaxy.adminEmails")?,
        log_level: config.enumeration_or("galaxy.logLevel", LOG_LEVELS, "INFO")?,
        refdata_enabled: config.boolean_or("galaxy.refdataEnabled", false)?,
        backups_enabled: config.boolean_or("galaxy.backupsEnabled", false)?,
        network_policy_enabled: config.boolean_or("galaxy.networkPolicyEnabled", true)?,
        load_balancer_cert_arn: config.optional_string("galaxy.loadBalancerCertArn")?,
        additional_setup_commands: config.list("galaxy.additionalSetupCommands")?,
        configs,
    })
}

/// Read chart config files (`.xml`, `.conf`, `.yml`) from `dir`
///
/// # Errors
/// `Source` when the directory or one of its files cannot be read.
pub fn load_configs(dir: &Path) -> Result<BTreeMap<String, String>, ConfigurationError> {
    let source_error = |e: std::io::Error| ConfigurationError::Source {
        origin: dir.display().to_string(),
        message: e.to_string(),
    };

    let mut configs = BTreeMap::new();
    for entry in std::fs::read_dir(dir).map_err(source_error)? {
        let path = entry.map_err(source_error)?.path();
        let wanted = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| CONFIG_EXTENSIONS.contains(&e));
        if !wanted || !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let content = std::fs::read_to_string(&path).map_err(source_error)?;
        configs.insert(name.to_string(), content);
    }
    tracing::debug!(dir = %dir.display(), files = configs.len(), "loaded chart configs");
    Ok(configs)
}

/// Assemble the layered configuration source
///
/// Later layers win: the context file, then `GALAXY_CTX_*` variables from
/// `env`, then `key=value` overrides.
///
/// # Errors
/// `Source` when the file cannot be loaded or an override is malformed.
pub fn load_source<I>(
    context: Option<&Path>,
    env: I,
    overrides: &[String],
) -> Result<ConfigSource, ConfigurationError>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut builder = ConfigSourceBuilder::new();
    if let Some(path) = context {
        builder = builder.merge_file(path)?;
    }
    builder = builder.merge_env(ENV_PREFIX, env);
    for assignment in overrides {
        builder = builder.merge_override(assignment)?;
    }
    Ok(builder.build())
}
