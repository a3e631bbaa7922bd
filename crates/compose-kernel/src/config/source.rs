//! Layered configuration sources

use crate::error::ConfigurationError;
use std::collections::BTreeMap;
use std::path::Path;

/// Prefix for environment-supplied context keys
///
/// Keys are lower-cased with `__` turned into `.`. Keys are matched
/// case-insensitively, so an environment value replaces a camel-cased key
/// from an earlier layer.
pub const ENV_PREFIX: &str = "GALAXY_CTX_";

/// Immutable key/value configuration source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigSource {
    entries: BTreeMap<String, serde_json::Value>,
}

impl ConfigSource {
    /// Raw value for `key`; `null` counts as absent
    ///
    /// Falls back to a case-insensitive match so environment keys can
    /// address camel-cased context keys.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        let found = self.entries.get(key).or_else(|| {
            self.entries
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        });
        found.filter(|v| !v.is_null())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.keys().map(String::as_str)
    }
}

/// Builder for [`ConfigSource`]; later merges override earlier ones
#[derive(Debug, Default)]
pub struct ConfigSourceBuilder {
    entries: BTreeMap<String, serde_json::Value>,
}

impl ConfigSourceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a JSON document
    ///
    /// A top-level `"context"` object (as in `cdk.json`) is unwrapped.
    /// Nested objects are flattened into dotted keys.
    #[must_use]
    pub fn merge_json(mut self, document: serde_json::Value) -> Self {
        let document = match document {
            serde_json::Value::Object(mut map) => match map.remove("context") {
                Some(serde_json::Value::Object(ctx)) => serde_json::Value::Object(ctx),
                Some(other) => {
                    map.insert("context".to_string(), other);
                    serde_json::Value::Object(map)
                }
                None => serde_json::Value::Object(map),
            },
            other => other,
        };
        flatten("", document, &mut self.entries);
        self
    }

    /// Merge a JSON or TOML context file, chosen by extension
    ///
    /// # Errors
    /// `Source` when the file cannot be read or parsed.
    pub fn merge_file(self, path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let origin = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigurationError::Source {
            origin: origin.clone(),
            message: e.to_string(),
        })?;

        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml"));

        let document: serde_json::Value = if is_toml {
            toml::from_str(&text).map_err(|e| ConfigurationError::Source {
                origin: origin.clone(),
                message: e.to_string(),
            })?
        } else {
            serde_json::from_str(&text).map_err(|e| ConfigurationError::Source {
                origin: origin.clone(),
                message: e.to_string(),
            })?
        };

        tracing::debug!(file = %origin, "merged context file");
        Ok(self.merge_json(document))
    }

    /// Merge environment variables carrying `prefix`
    ///
    /// `GALAXY_CTX_GALAXY__NAMESPACE=x` becomes `galaxy.namespace = "x"`.
    #[must_use]
    pub fn merge_env<I>(mut self, prefix: &str, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            if let Some(rest) = name.strip_prefix(prefix) {
                if rest.is_empty() {
                    continue;
                }
                let key = rest.to_ascii_lowercase().replace("__", ".");
                insert(&mut self.entries, key, parse_scalar(&value));
            }
        }
        self
    }

    /// Merge one `key=value` override
    ///
    /// The value is parsed as JSON when possible and kept as text otherwise.
    ///
    /// # Errors
    /// `Source` when the text has no `=` or an empty key.
    pub fn merge_override(mut self, assignment: &str) -> Result<Self, ConfigurationError> {
        let (key, value) = assignment
            .split_once('=')
            .filter(|(k, _)| !k.trim().is_empty())
            .ok_or_else(|| ConfigurationError::Source {
                origin: "command line".to_string(),
                message: format!("expected key=value, got `{assignment}`"),
            })?;
        insert(&mut self.entries, key.trim().to_string(), parse_scalar(value));
        Ok(self)
    }

    /// Set a single value
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        insert(&mut self.entries, key.into(), value);
        self
    }

    #[must_use]
    pub fn build(self) -> ConfigSource {
        ConfigSource {
            entries: self.entries,
        }
    }
}

/// Insert `value`, replacing any entry whose key differs only in case
///
/// The first spelling seen is kept so camel-cased keys survive an override.
fn insert(
    entries: &mut BTreeMap<String, serde_json::Value>,
    key: String,
    value: serde_json::Value,
) {
    let key = entries
        .keys()
        .find(|k| k.eq_ignore_ascii_case(&key))
        .cloned()
        .unwrap_or(key);
    entries.insert(key, value);
}

fn parse_scalar(text: &str) -> serde_json::Value {
    serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::String(text.to_string()))
}

fn flatten(
    prefix: &str,
    value: serde_json::Value,
    out: &mut BTreeMap<String, serde_json::Value>,
) {
    match value {
        serde_json::Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k
                } else {
                    format!("{prefix}.{k}")
                };
                flatten(&key, v, out);
            }
        }
        other if !prefix.is_empty() => {
            insert(out, prefix.to_string(), other);
        }
        _ => {}
    }
}
