//! Dry-run provisioner
//!
//! Produces plausible, deterministic attributes for every resource kind so
//! that a full deployment can be exercised without touching a cloud account.
//! Identifiers are derived from the resource id, so two runs over the same
//! graph return the same values.

use async_trait::async_trait;
use compose_kernel::attribute;
use compose_kernel::error::ProvisioningError;
use compose_kernel::provisioner::{ProvisionRequest, Provisioner};
use compose_kernel::types::{ProvisionedResource, ResourceId, ResourceKind};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

pub const DEFAULT_REGION: &str = "us-east-1";
const ACCOUNT: &str = "123456789012";

/// Provisioner that fabricates attributes instead of calling a cloud API
#[derive(Debug)]
pub struct SimulatedProvisioner {
    region: String,
    failures: HashSet<ResourceId>,
    provisioned: Mutex<Vec<ResourceId>>,
}

impl Default for SimulatedProvisioner {
    fn default() -> Self {
        Self::new(DEFAULT_REGION)
    }
}

impl SimulatedProvisioner {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            failures: HashSet::new(),
            provisioned: Mutex::new(Vec::new()),
        }
    }

    /// Fail every request for `id`
    #[must_use]
    pub fn failing(mut self, id: impl Into<ResourceId>) -> Self {
        self.failures.insert(id.into());
        self
    }

    /// Ids that were provisioned successfully, in completion order
    pub fn provisioned(&self) -> Vec<ResourceId> {
        self.provisioned.lock().clone()
    }

    fn arn(&self, service: &str, resource: &str) -> String {
        format!("arn:aws:{service}:{}:{ACCOUNT}:{resource}", self.region)
    }

    fn attributes_for(&self, request: &ProvisionRequest) -> BTreeMap<String, Value> {
        let id = request.id.as_str();
        let token = token(id);
        let short = &token[..8];
        let region = self.region.as_str();

        // resolved properties are echoed back, generated attributes fill the rest
        let mut attrs: BTreeMap<String, Value> = match &request.properties {
            Value::Object(map) => map.clone().into_iter().collect(),
            _ => BTreeMap::new(),
        };
        let mut fill = |name: &str, value: Value| {
            attrs.entry(name.to_string()).or_insert(value);
        };

        match request.kind {
            ResourceKind::Vpc | ResourceKind::VpcLookup => {
                fill("vpcId", json!(format!("vpc-{short}")));
                fill(
                    "privateSubnets",
                    json!([format!("subnet-{short}a"), format!("subnet-{short}b")]),
                );
                fill(
                    "publicSubnets",
                    json!([format!("subnet-{short}c"), format!("subnet-{short}d")]),
                );
            }
            ResourceKind::VpcEndpoint => fill("vpcEndpointId", json!(format!("vpce-{short}"))),
            ResourceKind::FlowLog => fill("flowLogId", json!(format!("fl-{short}"))),
            ResourceKind::Cluster | ResourceKind::ClusterImport => {
                fill("clusterName", json!(format!("{id}-{short}")));
                fill("clusterSecurityGroupId", json!(format!("sg-{short}")));
                fill("region", json!(region));
                fill(
                    "clusterArn",
                    json!(self.arn("eks", &format!("cluster/{id}-{short}"))),
                );
                fill(
                    "endpoint",
                    json!(format!("https://{}.gr7.{region}.eks.amazonaws.com", &token[..16])),
                );
            }
            ResourceKind::SecurityGroup => fill("securityGroupId", json!(format!("sg-{short}"))),
            ResourceKind::FileSystem => {
                fill("fileSystemId", json!(format!("fs-{short}")));
                fill(
                    "fileSystemArn",
                    json!(self.arn("elasticfilesystem", &format!("file-system/fs-{short}"))),
                );
            }
            ResourceKind::DatabaseCluster => {
                let secret = format!("{id}Secret-{short}");
                fill("clusterArn", json!(self.arn("rds", &format!("cluster:{id}-{short}"))));
                fill("secretArn", json!(self.arn("secretsmanager", &format!("secret:{secret}"))));
                fill("secretName", json!(secret));
                fill(
                    "endpoint",
                    json!({
                        "hostname": format!("{id}-{short}.cluster-{}.{region}.rds.amazonaws.com", &token[8..20]),
                        "port": 5432
                    }),
                );
            }
            ResourceKind::DatabaseProxy => {
                fill("proxyArn", json!(self.arn("rds", &format!("db-proxy:prx-{short}"))));
                fill(
                    "endpoint",
                    json!(format!("{id}-{short}.proxy-{}.{region}.rds.amazonaws.com", &token[8..20])),
                );
            }
            ResourceKind::MessageBroker => {
                let host = format!("b-{}.mq.{region}.amazonaws.com", stable_uuid(id));
                fill("brokerId", json!(format!("b-{short}")));
                fill("amqpEndpoints", json!([format!("amqps://{host}:5671")]));
                fill("consoleUrl", json!(format!("https://{host}")));
            }
            ResourceKind::Secret => {
                let name = format!("{id}-{}", &token[..6]);
                fill("secretArn", json!(self.arn("secretsmanager", &format!("secret:{name}"))));
                fill("secretName", json!(name));
            }
            ResourceKind::SecretRotation => fill("rotationEnabled", json!(true)),
            ResourceKind::Function => {
                fill("functionArn", json!(self.arn("lambda", &format!("function:{id}-{short}"))));
            }
            ResourceKind::BackupVault => {
                let name = format!("{id}-{short}");
                fill("vaultArn", json!(self.arn("backup", &format!("backup-vault:{name}"))));
                fill("vaultName", json!(name));
            }
            ResourceKind::BackupPlan => fill("backupPlanId", json!(stable_uuid(id).to_string())),
            ResourceKind::KubernetesManifest => fill("applied", json!(true)),
            ResourceKind::HelmRelease => fill("status", json!("deployed")),
            ResourceKind::KubernetesObjectValue => {
                let object = ingress_object(&token, region);
                let value = request
                    .property("jsonPath")
                    .and_then(Value::as_str)
                    .and_then(|path| attribute::lookup(&object, path))
                    .and_then(attribute::as_text);
                if let Some(value) = value {
                    fill("value", json!(value));
                }
            }
        }
        attrs
    }
}

/// A load-balanced ingress as the cluster would report it
fn ingress_object(token: &str, region: &str) -> BTreeMap<String, Value> {
    let hostname = format!("k8s-galaxy-{}.{region}.elb.amazonaws.com", &token[..16]);
    BTreeMap::from([(
        "status".to_string(),
        json!({ "loadBalancer": { "ingress": [{ "hostname": hostname }] } }),
    )])
}

fn stable_uuid(id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, id.as_bytes())
}

fn token(id: &str) -> String {
    stable_uuid(id).simple().to_string()
}

#[async_trait]
impl Provisioner for SimulatedProvisioner {
    async fn provision(
        &self,
        request: &ProvisionRequest,
    ) -> Result<ProvisionedResource, ProvisioningError> {
        if self.failures.contains(&request.id) {
            tracing::warn!(resource = %request.id, "simulated failure");
            return Err(ProvisioningError::new(format!(
                "simulated failure provisioning {} `{}`",
                request.kind, request.id
            )));
        }

        let mut resource = ProvisionedResource::active(request.id.clone());
        resource.attributes = self.attributes_for(request);
        tracing::debug!(
            resource = %request.id,
            kind = %request.kind,
            attributes = resource.attributes.len(),
            "simulated provision"
        );
        self.provisioned.lock().push(request.id.clone());
        Ok(resource)
    }
}
