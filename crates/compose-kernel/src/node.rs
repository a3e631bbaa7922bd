//! Resource nodes and their property trees

use crate::attribute;
use crate::types::{ResourceId, ResourceKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A property value, possibly referring to other resources
///
/// References are resolved by the scheduler right before dispatch, against
/// the attributes of already-active dependencies and the output registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Property {
    /// Plain JSON value
    Literal(serde_json::Value),
    /// Attribute of another resource, which must be a declared dependency
    Ref {
        resource: ResourceId,
        attribute: String,
    },
    /// Named output published by another deployment unit
    Import(String),
    /// Text concatenation of the resolved parts
    Concat(Vec<Property>),
    List(Vec<Property>),
    Map(BTreeMap<String, Property>),
}

impl Property {
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn reference(resource: impl Into<ResourceId>, attribute: impl Into<String>) -> Self {
        Self::Ref {
            resource: resource.into(),
            attribute: attribute.into(),
        }
    }

    pub fn import(name: impl Into<String>) -> Self {
        Self::Import(name.into())
    }

    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Property)>,
    {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn list(items: impl IntoIterator<Item = Property>) -> Self {
        Self::List(items.into_iter().collect())
    }

    /// Resources this property refers to, in visiting order
    #[must_use]
    pub fn references(&self) -> Vec<&ResourceId> {
        let mut out = Vec::new();
        self.visit(&mut |p| {
            if let Self::Ref { resource, .. } = p {
                out.push(resource);
            }
        });
        out
    }

    /// Output names this property imports
    #[must_use]
    pub fn imports(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.visit(&mut |p| {
            if let Self::Import(name) = p {
                out.push(name.as_str());
            }
        });
        out
    }

    fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Property)) {
        f(self);
        match self {
            Self::Concat(items) | Self::List(items) => {
                for item in items {
                    item.visit(f);
                }
            }
            Self::Map(entries) => {
                for value in entries.values() {
                    value.visit(f);
                }
            }
            Self::Literal(_) | Self::Ref { .. } | Self::Import(_) => {}
        }
    }

    /// Resolve to plain JSON against `ctx`
    ///
    /// # Errors
    /// Describes the first reference that could not be resolved.
    pub fn resolve(&self, ctx: &impl ResolveContext) -> Result<serde_json::Value, String> {
        match self {
            Self::Literal(v) => Ok(v.clone()),
            Self::Ref {
                resource,
                attribute: path,
            } => {
                let attrs = ctx
                    .attributes(resource)
                    .ok_or_else(|| format!("referenced resource `{resource}` is not active"))?;
                attribute::lookup(attrs, path)
                    .cloned()
                    .ok_or_else(|| format!("resource `{resource}` has no attribute `{path}`"))
            }
            Self::Import(name) => ctx
                .import(name)
                .map(serde_json::Value::String)
                .ok_or_else(|| format!("output `{name}` has not been published")),
            Self::Concat(parts) => {
                let mut text = String::new();
                for part in parts {
                    let value = part.resolve(ctx)?;
                    let piece = attribute::as_text(&value)
                        .ok_or_else(|| format!("cannot concatenate non-scalar value {value}"))?;
                    text.push_str(&piece);
                }
                Ok(serde_json::Value::String(text))
            }
            Self::List(items) => items
                .iter()
                .map(|item| item.resolve(ctx))
                .collect::<Result<Vec<_>, _>>()
                .map(serde_json::Value::Array),
            Self::Map(entries) => entries
                .iter()
                .map(|(k, v)| v.resolve(ctx).map(|v| (k.clone(), v)))
                .collect::<Result<serde_json::Map<_, _>, _>>()
                .map(serde_json::Value::Object),
        }
    }
}

/// Lookup surface used while resolving [`Property`] trees
pub trait ResolveContext {
    /// Attribute map of an active resource
    fn attributes(&self, resource: &ResourceId) -> Option<&BTreeMap<String, serde_json::Value>>;

    /// Published value of an output
    fn import(&self, name: &str) -> Option<String>;
}

impl From<serde_json::Value> for Property {
    fn from(value: serde_json::Value) -> Self {
        Self::Literal(value)
    }
}

impl From<&str> for Property {
    fn from(value: &str) -> Self {
        Self::Literal(serde_json::Value::String(value.to_string()))
    }
}

impl From<String> for Property {
    fn from(value: String) -> Self {
        Self::Literal(serde_json::Value::String(value))
    }
}

impl From<bool> for Property {
    fn from(value: bool) -> Self {
        Self::Literal(serde_json::Value::Bool(value))
    }
}

impl From<u32> for Property {
    fn from(value: u32) -> Self {
        Self::Literal(serde_json::Value::from(value))
    }
}

/// One declared infrastructure resource
///
/// Built with the `with_*` / `depends_on` methods and then handed to a
/// [`GraphBuilder`](crate::graph::GraphBuilder), which owns it from then on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceNode {
    id: ResourceId,
    kind: ResourceKind,
    unit: String,
    properties: BTreeMap<String, Property>,
    dependencies: Vec<ResourceId>,
}

impl ResourceNode {
    pub fn new(id: impl Into<ResourceId>, kind: ResourceKind) -> Self {
        Self {
            id: id.into(),
            kind,
            unit: String::new(),
            properties: BTreeMap::new(),
            dependencies: Vec::new(),
        }
    }

    /// Assign the deployment unit this node belongs to
    #[must_use]
    pub fn in_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Property>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Declare a predecessor; duplicates are ignored
    #[must_use]
    pub fn depends_on(mut self, dependency: impl Into<ResourceId>) -> Self {
        self.push_dependency(dependency.into());
        self
    }

    #[must_use]
    pub fn depends_on_all<I, D>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<ResourceId>,
    {
        for dependency in dependencies {
            self.push_dependency(dependency.into());
        }
        self
    }

    pub(crate) fn push_dependency(&mut self, dependency: ResourceId) {
        if !self.dependencies.contains(&dependency) {
            self.dependencies.push(dependency);
        }
    }

    #[must_use]
    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    #[must_use]
    pub fn unit(&self) -> &str {
        &self.unit
    }

    #[must_use]
    pub fn properties(&self) -> &BTreeMap<String, Property> {
        &self.properties
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    #[must_use]
    pub fn dependencies(&self) -> &[ResourceId] {
        &self.dependencies
    }

    #[must_use]
    pub fn depends_directly_on(&self, id: &ResourceId) -> bool {
        self.dependencies.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Ctx {
        attrs: BTreeMap<ResourceId, BTreeMap<String, serde_json::Value>>,
        outputs: BTreeMap<String, String>,
    }

    impl ResolveContext for Ctx {
        fn attributes(&self, resource: &ResourceId) -> Option<&BTreeMap<String, serde_json::Value>> {
            self.attrs.get(resource)
        }

        fn import(&self, name: &str) -> Option<String> {
            self.outputs.get(name).cloned()
        }
    }

    #[test]
    fn dependencies_are_deduplicated_in_order() {
        let node = ResourceNode::new("chart", ResourceKind::HelmRelease)
            .depends_on("b")
            .depends_on("a")
            .depends_on("b");
        assert_eq!(
            node.dependencies(),
            &[ResourceId::new("b"), ResourceId::new("a")]
        );
    }

    #[test]
    fn collects_nested_references_and_imports() {
        let p = Property::map([
            ("host", Property::reference("db", "endpoint.hostname")),
            (
                "broker",
                Property::list([Property::import("rabbitmqEndpoint"), Property::literal(1)]),
            ),
        ]);
        assert_eq!(p.references(), vec![&ResourceId::new("db")]);
        assert_eq!(p.imports(), vec!["rabbitmqEndpoint"]);
    }

    #[test]
    fn literal_tree_resolves_without_context() {
        let p = Property::map([("a", Property::literal(json!([1, 2]))), ("b", "x".into())]);
        let v = p.resolve(&Ctx::default()).unwrap();
        assert_eq!(v, json!({ "a": [1, 2], "b": "x" }));
    }

    #[test]
    fn resolves_refs_imports_and_concat() {
        let mut ctx = Ctx::default();
        let mut db = BTreeMap::new();
        db.insert("endpoint".to_string(), json!({ "hostname": "db.local" }));
        ctx.attrs.insert(ResourceId::new("db"), db);
        ctx.outputs.insert("mq".to_string(), "mq.local".to_string());

        let p = Property::map([
            ("db", Property::reference("db", "endpoint.hostname")),
            ("mq", Property::import("mq")),
            (
                "name",
                Property::Concat(vec!["rabbitmq-".into(), Property::literal(7)]),
            ),
        ]);

        let v = p.resolve(&ctx).unwrap();
        assert_eq!(
            v,
            json!({ "db": "db.local", "mq": "mq.local", "name": "rabbitmq-7" })
        );
    }

    #[test]
    fn unresolved_reference_is_reported() {
        let p = Property::reference("db", "endpoint");
        let err = p.resolve(&Ctx::default()).unwrap_err();
        assert!(err.contains("`db` is not active"));

        let p = Property::import("missing");
        let err = p.resolve(&Ctx::default()).unwrap_err();
        assert!(err.contains("has not been published"));
    }
}
