//! Attribute path addressing
//!
//! Paths look like `amqpEndpoints[0]` or `.status.loadBalancer.ingress[0].hostname`.
//! The first segment names a top-level attribute of a provisioned resource.

use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
    Key(&'a str),
    Index(usize),
}

/// Parse a path into segments, `None` when malformed
fn parse(path: &str) -> Option<Vec<Segment<'_>>> {
    let path = path.strip_prefix('.').unwrap_or(path);
    if path.is_empty() {
        return None;
    }

    let mut segments = Vec::new();
    for part in path.split('.') {
        let (key, mut rest) = match part.find('[') {
            Some(pos) => (&part[..pos], &part[pos..]),
            None => (part, ""),
        };
        // "a..b", "a." and ".[0]" have an empty key
        if key.is_empty() {
            return None;
        }
        segments.push(Segment::Key(key));
        while !rest.is_empty() {
            let close = rest.find(']')?;
            let index = rest.get(1..close)?.parse().ok()?;
            segments.push(Segment::Index(index));
            rest = &rest[close + 1..];
            if !rest.is_empty() && !rest.starts_with('[') {
                return None;
            }
        }
    }
    Some(segments)
}

/// Look up `path` in a resource's attribute map
#[must_use]
pub fn lookup<'a>(attributes: &'a BTreeMap<String, Value>, path: &str) -> Option<&'a Value> {
    let segments = parse(path)?;
    let (first, rest) = segments.split_first()?;
    let Segment::Key(root) = first else {
        return None;
    };

    let mut current = attributes.get(*root)?;
    for segment in rest {
        current = match segment {
            Segment::Key(k) => current.get(*k)?,
            Segment::Index(i) => current.get(*i)?,
        };
    }
    Some(current)
}

/// Render a scalar attribute as text; `None` for objects, arrays and null
#[must_use]
pub fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
