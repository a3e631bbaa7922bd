//! Named outputs shared across deployment units
//!
//! An [`OutputSpec`] declares which attribute of which resource becomes a
//! named output and how it is derived. The [`OutputExporter`] turns a
//! provisioned resource into an [`OutputValue`] and publishes it into an
//! [`OutputRegistry`], the context object later units read from.

use crate::attribute;
use crate::error::{AttributeNotFoundError, ComposeError, OutputError};
use crate::types::{ProvisionedResource, ResourceId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One string transform step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    /// Split text on a separator into a list
    Split(String),
    /// Pick one element of a list
    Select(usize),
    Prefix(String),
    Suffix(String),
}

/// Pipeline of transforms applied to a raw attribute
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Derivation(pub Vec<Transform>);

enum Stage {
    Text(String),
    List(Vec<String>),
}

impl Derivation {
    /// Use the attribute as is
    #[must_use]
    pub fn identity() -> Self {
        Self::default()
    }

    /// Host part of `scheme://host:port`
    #[must_use]
    pub fn url_host() -> Self {
        Self(vec![
            Transform::Split(":".to_string()),
            Transform::Select(1),
            Transform::Split("//".to_string()),
            Transform::Select(1),
        ])
    }

    #[must_use]
    pub fn then(mut self, step: Transform) -> Self {
        self.0.push(step);
        self
    }

    /// Apply the pipeline, which must end on text
    ///
    /// # Errors
    /// Describes the step that could not be applied.
    pub fn apply(&self, raw: &serde_json::Value) -> Result<String, String> {
        let mut stage = match raw {
            serde_json::Value::Array(items) => Stage::List(
                items
                    .iter()
                    .map(|v| attribute::as_text(v).ok_or_else(|| format!("non-scalar list item {v}")))
                    .collect::<Result<_, _>>()?,
            ),
            other => Stage::Text(
                attribute::as_text(other).ok_or_else(|| format!("non-scalar value {other}"))?,
            ),
        };

        for (step, transform) in self.0.iter().enumerate() {
            stage = match (stage, transform) {
                (Stage::Text(text), Transform::Split(sep)) => {
                    Stage::List(text.split(sep.as_str()).map(str::to_string).collect())
                }
                (Stage::List(items), Transform::Select(index)) => {
                    let len = items.len();
                    Stage::Text(items.into_iter().nth(*index).ok_or_else(|| {
                        format!("step {step}: index {index} out of range for {len} items")
                    })?)
                }
                (Stage::Text(text), Transform::Prefix(p)) => Stage::Text(format!("{p}{text}")),
                (Stage::Text(text), Transform::Suffix(s)) => Stage::Text(format!("{text}{s}")),
                (Stage::List(_), t) => return Err(format!("step {step}: {t:?} needs text, got a list")),
                (Stage::Text(_), t) => return Err(format!("step {step}: {t:?} needs a list, got text")),
            };
        }

        match stage {
            Stage::Text(text) => Ok(text),
            Stage::List(_) => Err("derivation ends on a list".to_string()),
        }
    }
}

/// Declaration of a named output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    pub source: ResourceId,
    /// Attribute path on the source resource
    pub attribute: String,
    #[serde(default, skip_serializing_if = "is_identity")]
    pub derivation: Derivation,
}

fn is_identity(d: &Derivation) -> bool {
    d.0.is_empty()
}

impl OutputSpec {
    pub fn new(
        name: impl Into<String>,
        source: impl Into<ResourceId>,
        attribute: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            attribute: attribute.into(),
            derivation: Derivation::identity(),
        }
    }

    #[must_use]
    pub fn derived(mut self, derivation: Derivation) -> Self {
        self.derivation = derivation;
        self
    }
}

/// A published output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputValue {
    pub name: String,
    pub value: String,
    pub source: ResourceId,
    pub attribute: String,
}

/// Shared, append-only registry of published outputs
///
/// Cloning yields another handle to the same registry.
#[derive(Debug, Clone, Default)]
pub struct OutputRegistry {
    inner: Arc<RwLock<BTreeMap<String, OutputValue>>>,
}

impl OutputRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a value
    ///
    /// Publishing the same value twice is a no-op.
    ///
    /// # Errors
    /// `AlreadyPublished` when the name holds a different value.
    pub fn publish(&self, output: OutputValue) -> Result<(), OutputError> {
        let mut map = self.inner.write();
        if let Some(existing) = map.get(&output.name) {
            if existing.value == output.value {
                return Ok(());
            }
            return Err(OutputError::AlreadyPublished {
                name: output.name,
                existing: existing.value.clone(),
            });
        }
        map.insert(output.name.clone(), output);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<OutputValue> {
        self.inner.read().get(name).cloned()
    }

    /// Just the value of an output
    #[must_use]
    pub fn value(&self, name: &str) -> Option<String> {
        self.inner.read().get(name).map(|o| o.value.clone())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// All outputs, ordered by name
    #[must_use]
    pub fn snapshot(&self) -> Vec<OutputValue> {
        self.inner.read().values().cloned().collect()
    }
}

/// Exports resource attributes into an [`OutputRegistry`]
#[derive(Debug, Clone)]
pub struct OutputExporter {
    registry: OutputRegistry,
}

impl OutputExporter {
    pub fn new(registry: OutputRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &OutputRegistry {
        &self.registry
    }

    /// Publish `attribute_path` of `resource` under `name`
    ///
    /// # Errors
    /// `AttributeNotFound` when the path does not resolve, `Output` when the
    /// resource is not active, the value is not a scalar, or the name is
    /// already taken by a different value.
    pub fn export(
        &self,
        name: &str,
        resource: &ProvisionedResource,
        attribute_path: &str,
    ) -> Result<OutputValue, ComposeError> {
        self.export_derived(name, resource, attribute_path, &Derivation::identity())
    }

    /// Publish a declared output from its provisioned source
    ///
    /// # Errors
    /// Same as [`OutputExporter::export`], plus derivation failures.
    pub fn export_spec(
        &self,
        spec: &OutputSpec,
        resource: &ProvisionedResource,
    ) -> Result<OutputValue, ComposeError> {
        self.export_derived(&spec.name, resource, &spec.attribute, &spec.derivation)
    }

    fn export_derived(
        &self,
        name: &str,
        resource: &ProvisionedResource,
        attribute_path: &str,
        derivation: &Derivation,
    ) -> Result<OutputValue, ComposeError> {
        if !resource.is_active() {
            return Err(OutputError::SourceNotActive {
                name: name.to_string(),
                resource: resource.id.clone(),
            }
            .into());
        }

        let raw = attribute::lookup(&resource.attributes, attribute_path).ok_or_else(|| {
            AttributeNotFoundError {
                resource: resource.id.clone(),
                attribute: attribute_path.to_string(),
            }
        })?;

        let value = derivation
            .apply(raw)
            .map_err(|reason| OutputError::Derivation {
                name: name.to_string(),
                reason,
            })?;

        let output = OutputValue {
            name: name.to_string(),
            value,
            source: resource.id.clone(),
            attribute: attribute_path.to_string(),
        };
        self.registry.publish(output.clone())?;
        tracing::info!(output = name, source = %resource.id, value = %output.value, "output published");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProvisionStatus;
    use serde_json::json;

    fn broker() -> ProvisionedResource {
        ProvisionedResource::active("rabbitmqCluster").with_attribute(
            "amqpEndpoints",
            json!(["amqps://b-1234.mq.us-east-1.amazonaws.com:5671"]),
        )
    }

    #[test]
    fn url_host_extracts_hostname() {
        let host = Derivation::url_host()
            .apply(&json!("amqps://b-1234.mq.us-east-1.amazonaws.com:5671"))
            .unwrap();
        assert_eq!(host, "b-1234.mq.us-east-1.amazonaws.com");
    }

    #[test]
    fn derivation_reports_bad_steps() {
        let err = Derivation::url_host().apply(&json!("no-colon")).unwrap_err();
        assert!(err.contains("out of range"));

        let err = Derivation(vec![Transform::Select(0)])
            .apply(&json!("text"))
            .unwrap_err();
        assert!(err.contains("needs a list"));

        let err = Derivation(vec![Transform::Split(",".into())])
            .apply(&json!("a,b"))
            .unwrap_err();
        assert!(err.contains("ends on a list"));
    }

    #[test]
    fn prefix_and_suffix() {
        let d = Derivation::identity()
            .then(Transform::Prefix("https://".into()))
            .then(Transform::Suffix("/".into()));
        assert_eq!(d.apply(&json!("galaxy.example.org")).unwrap(), "https://galaxy.example.org/");
    }

    #[test]
    fn export_then_read_returns_same_value() {
        let exporter = OutputExporter::new(OutputRegistry::new());
        let spec = OutputSpec::new("rabbitmqEndpoint", "rabbitmqCluster", "amqpEndpoints[0]")
            .derived(Derivation::url_host());

        let published = exporter.export_spec(&spec, &broker()).unwrap();
        assert_eq!(exporter.registry().get("rabbitmqEndpoint"), Some(published.clone()));
        assert_eq!(published.value, "b-1234.mq.us-east-1.amazonaws.com");
        assert_eq!(published.source, ResourceId::new("rabbitmqCluster"));
    }

    #[test]
    fn missing_attribute_is_reported() {
        let exporter = OutputExporter::new(OutputRegistry::new());
        let err = exporter
            .export("dns", &broker(), "status.loadBalancer")
            .unwrap_err();
        assert!(matches!(err, ComposeError::AttributeNotFound(_)));
        assert!(exporter.registry().is_empty());
    }

    #[test]
    fn malformed_path_is_an_unknown_attribute() {
        let exporter = OutputExporter::new(OutputRegistry::new());
        for path in ["amqpEndpoints..0", "amqpEndpoints."] {
            let err = exporter.export("mq", &broker(), path).unwrap_err();
            assert!(matches!(err, ComposeError::AttributeNotFound(_)), "{path}");
        }
    }

    #[test]
    fn inactive_source_is_rejected() {
        let exporter = OutputExporter::new(OutputRegistry::new());
        let mut failed = broker();
        failed.status = ProvisionStatus::Failed;
        let err = exporter.export("x", &failed, "amqpEndpoints[0]").unwrap_err();
        assert!(matches!(
            err,
            ComposeError::Output(OutputError::SourceNotActive { .. })
        ));
    }

    #[test]
    fn published_values_are_immutable() {
        let registry = OutputRegistry::new();
        let value = |v: &str| OutputValue {
            name: "galaxyDNSOutput".into(),
            value: v.into(),
            source: ResourceId::new("galaxyDNS"),
            attribute: "hostname".into(),
        };

        registry.publish(value("a.example.org")).unwrap();
        registry.publish(value("a.example.org")).unwrap();
        let err = registry.publish(value("b.example.org")).unwrap_err();

        assert_eq!(
            err,
            OutputError::AlreadyPublished {
                name: "galaxyDNSOutput".into(),
                existing: "a.example.org".into(),
            }
        );
        assert_eq!(registry.value("galaxyDNSOutput").as_deref(), Some("a.example.org"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn clones_share_state() {
        let registry = OutputRegistry::new();
        let handle = registry.clone();
        let exporter = OutputExporter::new(handle);
        exporter.export("endpoint", &broker(), "amqpEndpoints[0]").unwrap();
        assert!(registry.contains("endpoint"));
    }
}
