//! Testing utilities for the compose workspace
//!
//! Shared test helpers, fixtures, and a recording provisioner.

#![allow(missing_docs)]

use async_trait::async_trait;
use compose_kernel::config::{ConfigSource, ConfigSourceBuilder};
use compose_kernel::error::ProvisioningError;
use compose_kernel::graph::{GraphBuilder, ResourceGraph};
use compose_kernel::node::ResourceNode;
use compose_kernel::provisioner::{ProvisionRequest, Provisioner};
use compose_kernel::types::{ProvisionedResource, ResourceId, ResourceKind};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Dispatched,
    Completed,
}

/// One provisioner call boundary, stamped with a logical clock tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: ResourceId,
    pub kind: EventKind,
    pub tick: u64,
}

#[derive(Debug, Default)]
struct Log {
    clock: u64,
    events: Vec<Event>,
    requests: Vec<ProvisionRequest>,
}

impl Log {
    fn stamp(&mut self, id: &ResourceId, kind: EventKind) {
        self.clock += 1;
        self.events.push(Event {
            id: id.clone(),
            kind,
            tick: self.clock,
        });
    }
}

/// Provisioner that records every dispatch and completion
///
/// Each call yields to the runtime `yields` times between dispatch and
/// completion so that several in-flight calls can interleave.
#[derive(Debug, Default)]
pub struct RecordingProvisioner {
    log: Mutex<Log>,
    failures: HashMap<ResourceId, String>,
    attributes: HashMap<ResourceId, BTreeMap<String, serde_json::Value>>,
    yields: usize,
}

impl RecordingProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `id` fail with `cause`
    #[must_use]
    pub fn failing(mut self, id: &str, cause: &str) -> Self {
        self.failures.insert(ResourceId::new(id), cause.to_string());
        self
    }

    /// Attach an attribute to the resource returned for `id`
    #[must_use]
    pub fn with_attribute(mut self, id: &str, name: &str, value: serde_json::Value) -> Self {
        self.attributes
            .entry(ResourceId::new(id))
            .or_default()
            .insert(name.to_string(), value);
        self
    }

    #[must_use]
    pub fn yielding(mut self, yields: usize) -> Self {
        self.yields = yields;
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.lock().events.clone()
    }

    pub fn requests(&self) -> Vec<ProvisionRequest> {
        self.log.lock().requests.clone()
    }

    pub fn request(&self, id: &str) -> Option<ProvisionRequest> {
        self.log
            .lock()
            .requests
            .iter()
            .find(|r| r.id.as_str() == id)
            .cloned()
    }

    /// Ids in dispatch order
    pub fn dispatched(&self) -> Vec<String> {
        self.ids_of(EventKind::Dispatched)
    }

    /// Ids in completion order
    pub fn completed(&self) -> Vec<String> {
        self.ids_of(EventKind::Completed)
    }

    pub fn dispatch_tick(&self, id: &str) -> Option<u64> {
        self.tick_of(id, EventKind::Dispatched)
    }

    pub fn completion_tick(&self, id: &str) -> Option<u64> {
        self.tick_of(id, EventKind::Completed)
    }

    /// Largest number of calls that were in flight at once
    pub fn max_concurrency(&self) -> usize {
        let mut current = 0usize;
        let mut max = 0usize;
        for event in &self.log.lock().events {
            match event.kind {
                EventKind::Dispatched => {
                    current += 1;
                    max = max.max(current);
                }
                EventKind::Completed => current = current.saturating_sub(1),
            }
        }
        max
    }

    fn ids_of(&self, kind: EventKind) -> Vec<String> {
        self.log
            .lock()
            .events
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.id.to_string())
            .collect()
    }

    fn tick_of(&self, id: &str, kind: EventKind) -> Option<u64> {
        self.log
            .lock()
            .events
            .iter()
            .find(|e| e.kind == kind && e.id.as_str() == id)
            .map(|e| e.tick)
    }
}

#[async_trait]
impl Provisioner for RecordingProvisioner {
    async fn provision(
        &self,
        request: &ProvisionRequest,
    ) -> Result<ProvisionedResource, ProvisioningError> {
        {
            let mut log = self.log.lock();
            log.stamp(&request.id, EventKind::Dispatched);
            log.requests.push(request.clone());
        }

        for _ in 0..self.yields {
            tokio::task::yield_now().await;
        }

        self.log.lock().stamp(&request.id, EventKind::Completed);

        if let Some(cause) = self.failures.get(&request.id) {
            return Err(ProvisioningError::new(cause.clone()));
        }
        let mut resource = ProvisionedResource::active(request.id.clone());
        if let Some(attributes) = self.attributes.get(&request.id) {
            resource.attributes = attributes.clone();
        }
        Ok(resource)
    }
}

/// Plain node in the `test` unit
pub fn node(id: &str, deps: &[&str]) -> ResourceNode {
    ResourceNode::new(id, ResourceKind::Secret)
        .in_unit("test")
        .depends_on_all(deps.iter().copied())
}

/// Build a graph from `(id, deps)` pairs in declaration order
pub fn graph(spec: &[(&str, &[&str])]) -> ResourceGraph {
    let mut builder = GraphBuilder::new();
    for (id, deps) in spec {
        builder.add(node(id, deps)).unwrap();
    }
    builder.build().unwrap()
}

/// `root -> (left, right) -> join`, plus an independent `solo`
pub fn diamond() -> ResourceGraph {
    graph(&[
        ("root", &[]),
        ("left", &["root"]),
        ("right", &["root"]),
        ("join", &["left", "right"]),
        ("solo", &[]),
    ])
}

/// Configuration source from a JSON object
pub fn source(document: serde_json::Value) -> ConfigSource {
    ConfigSourceBuilder::new().merge_json(document).build()
}

/// Smallest context accepted by the Galaxy composition
pub fn galaxy_context() -> serde_json::Value {
    serde_json::json!({
        "context": {
            "rds.minCapacity": 2,
            "rds.maxCapacity": 4,
            "rabbitmq.instance": "mq.t3.micro",
            "galaxy.namespace": "galaxy",
            "galaxy.adminEmails": "admin@example.org"
        }
    })
}

/// [`galaxy_context`] with extra keys merged over it
pub fn galaxy_context_with(overrides: serde_json::Value) -> ConfigSource {
    ConfigSourceBuilder::new()
        .merge_json(galaxy_context())
        .merge_json(overrides)
        .build()
}

pub fn id(value: &str) -> ResourceId {
    ResourceId::new(value)
}
