//! Configuration resolution
//!
//! A [`ConfigSource`] is assembled once at process start from layered inputs
//! (context file, environment, CLI overrides) and never changes afterwards.
//! [`ConfigResolver`] performs typed, pure lookups over it.
//!
//! ```rust,ignore
//! let source = ConfigSourceBuilder::new()
//!     .merge_file("cdk.json")?
//!     .merge_override("galaxy.namespace=galaxy")?
//!     .build();
//! let resolver = ConfigResolver::new(&source);
//! let ns = resolver.string("galaxy.namespace")?;
//! ```

mod source;

pub use source::{ConfigSource, ConfigSourceBuilder, ENV_PREFIX};

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Expected kind of a configuration value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigKind {
    String,
    Number,
    Boolean,
    /// One of a fixed set of string choices
    Enum(&'static [&'static str]),
    /// List of strings
    List,
}

impl fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => f.write_str("a string"),
            Self::Number => f.write_str("a number"),
            Self::Boolean => f.write_str("a boolean"),
            Self::Enum(choices) => write!(f, "one of [{}]", choices.join(", ")),
            Self::List => f.write_str("a list of strings"),
        }
    }
}

/// A typed configuration value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Boolean(bool),
    Number(f64),
    String(String),
    List(Vec<String>),
}

impl Value {
    fn kind_name(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "a boolean",
            Self::Number(_) => "a number",
            Self::String(_) => "a string",
            Self::List(_) => "a list",
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

/// Where a resolved value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Supplied by the configuration source
    Explicit,
    /// Filled in from the caller's default
    Default,
    /// Optional key with no value and no default
    Absent,
}

/// A resolved configuration entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigValue {
    pub key: String,
    pub value: Option<Value>,
    pub origin: Origin,
}

impl ConfigValue {
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            Some(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self.value {
            Some(Value::Boolean(b)) => Some(b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self.value {
            Some(Value::Number(n)) => Some(n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[String]> {
        match &self.value {
            Some(Value::List(items)) => Some(items),
            _ => None,
        }
    }
}

/// Typed lookups over an immutable [`ConfigSource`]
#[derive(Debug, Clone, Copy)]
pub struct ConfigResolver<'a> {
    source: &'a ConfigSource,
}

impl<'a> ConfigResolver<'a> {
    pub fn new(source: &'a ConfigSource) -> Self {
        Self { source }
    }

    /// Resolve `key` as `kind`
    ///
    /// # Errors
    /// - `MissingKey` when `required` is set and neither a value nor a default exists
    /// - `TypeMismatch` / `InvalidChoice` when the raw value does not fit `kind`
    pub fn resolve(
        &self,
        key: &str,
        kind: ConfigKind,
        required: bool,
        default: Option<Value>,
    ) -> Result<ConfigValue, ConfigurationError> {
        if let Some(raw) = self.source.get(key) {
            let value = coerce(key, &kind, raw)?;
            return Ok(ConfigValue {
                key: key.to_string(),
                value: Some(value),
                origin: Origin::Explicit,
            });
        }

        match default {
            Some(value) => {
                check_kind(key, &kind, &value)?;
                Ok(ConfigValue {
                    key: key.to_string(),
                    value: Some(value),
                    origin: Origin::Default,
                })
            }
            None if required => Err(ConfigurationError::missing(key)),
            None => Ok(ConfigValue {
                key: key.to_string(),
                value: None,
                origin: Origin::Absent,
            }),
        }
    }

    /// Whether the source supplies `key` at all
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.source.get(key).is_some()
    }

    /// Required string
    pub fn string(&self, key: &str) -> Result<String, ConfigurationError> {
        self.optional_string(key)?
            .ok_or_else(|| ConfigurationError::missing(key))
    }

    pub fn optional_string(&self, key: &str) -> Result<Option<String>, ConfigurationError> {
        let resolved = self.resolve(key, ConfigKind::String, false, None)?;
        Ok(resolved.as_str().map(str::to_string))
    }

    pub fn boolean_or(&self, key: &str, default: bool) -> Result<bool, ConfigurationError> {
        let resolved = self.resolve(key, ConfigKind::Boolean, true, Some(default.into()))?;
        Ok(resolved.as_bool().unwrap_or(default))
    }

    /// Required boolean
    pub fn boolean(&self, key: &str) -> Result<bool, ConfigurationError> {
        let resolved = self.resolve(key, ConfigKind::Boolean, true, None)?;
        resolved
            .as_bool()
            .ok_or_else(|| ConfigurationError::missing(key))
    }

    /// Required number, fractional values allowed
    pub fn number(&self, key: &str) -> Result<f64, ConfigurationError> {
        let resolved = self.resolve(key, ConfigKind::Number, true, None)?;
        resolved
            .as_f64()
            .ok_or_else(|| ConfigurationError::missing(key))
    }

    /// Required non-negative integer
    pub fn unsigned(&self, key: &str) -> Result<u32, ConfigurationError> {
        self.optional_unsigned(key)?
            .ok_or_else(|| ConfigurationError::missing(key))
    }

    pub fn unsigned_or(&self, key: &str, default: u32) -> Result<u32, ConfigurationError> {
        Ok(self.optional_unsigned(key)?.unwrap_or(default))
    }

    pub fn optional_unsigned(&self, key: &str) -> Result<Option<u32>, ConfigurationError> {
        let resolved = self.resolve(key, ConfigKind::Number, false, None)?;
        resolved.as_f64().map(|n| to_unsigned(key, n)).transpose()
    }

    /// Required choice from a fixed set
    pub fn enumeration(
        &self,
        key: &str,
        choices: &'static [&'static str],
    ) -> Result<String, ConfigurationError> {
        let resolved = self.resolve(key, ConfigKind::Enum(choices), true, None)?;
        resolved
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ConfigurationError::missing(key))
    }

    pub fn enumeration_or(
        &self,
        key: &str,
        choices: &'static [&'static str],
        default: &'static str,
    ) -> Result<String, ConfigurationError> {
        let resolved = self.resolve(key, ConfigKind::Enum(choices), true, Some(default.into()))?;
        Ok(resolved.as_str().unwrap_or(default).to_string())
    }

    /// List of strings, empty when absent
    pub fn list(&self, key: &str) -> Result<Vec<String>, ConfigurationError> {
        let resolved = self.resolve(key, ConfigKind::List, false, None)?;
        Ok(resolved.as_list().map(<[String]>::to_vec).unwrap_or_default())
    }
}

fn to_unsigned(key: &str, n: f64) -> Result<u32, ConfigurationError> {
    if n.fract() != 0.0 || n < 0.0 || n > f64::from(u32::MAX) {
        return Err(ConfigurationError::TypeMismatch {
            key: key.to_string(),
            expected: "a non-negative integer".to_string(),
            found: n.to_string(),
        });
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(n as u32)
}

fn mismatch(key: &str, kind: &ConfigKind, found: impl Into<String>) -> ConfigurationError {
    ConfigurationError::TypeMismatch {
        key: key.to_string(),
        expected: kind.to_string(),
        found: found.into(),
    }
}

fn describe(raw: &serde_json::Value) -> String {
    match raw {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Bool(_) => "a boolean".to_string(),
        serde_json::Value::Number(_) => "a number".to_string(),
        serde_json::Value::String(s) => format!("\"{s}\""),
        serde_json::Value::Array(_) => "a list".to_string(),
        serde_json::Value::Object(_) => "an object".to_string(),
    }
}

/// Coerce a raw source value into `kind`
///
/// Strings are accepted for booleans and numbers since CLI and environment
/// layers only ever carry text.
fn coerce(key: &str, kind: &ConfigKind, raw: &serde_json::Value) -> Result<Value, ConfigurationError> {
    use serde_json::Value as Raw;

    match (kind, raw) {
        (ConfigKind::String, Raw::String(s)) => Ok(Value::String(s.clone())),
        (ConfigKind::String, Raw::Number(n)) => Ok(Value::String(n.to_string())),
        (ConfigKind::Boolean, Raw::Bool(b)) => Ok(Value::Boolean(*b)),
        (ConfigKind::Boolean, Raw::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(Value::Boolean(true)),
            "false" | "no" | "0" => Ok(Value::Boolean(false)),
            _ => Err(mismatch(key, kind, describe(raw))),
        },
        (ConfigKind::Number, Raw::Number(n)) => n
            .as_f64()
            .map(Value::Number)
            .ok_or_else(|| mismatch(key, kind, describe(raw))),
        (ConfigKind::Number, Raw::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Value::Number)
            .map_err(|_| mismatch(key, kind, describe(raw))),
        (ConfigKind::Enum(choices), Raw::String(s)) => {
            if choices.contains(&s.as_str()) {
                Ok(Value::String(s.clone()))
            } else {
                Err(ConfigurationError::InvalidChoice {
                    key: key.to_string(),
                    allowed: choices.join(", "),
                    found: s.clone(),
                })
            }
        }
        (ConfigKind::List, Raw::Array(items)) => items
            .iter()
            .map(|item| match item {
                Raw::String(s) => Ok(s.clone()),
                other => Err(mismatch(key, kind, describe(other))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        (ConfigKind::List, Raw::String(s)) => Ok(Value::List(vec![s.clone()])),
        _ => Err(mismatch(key, kind, describe(raw))),
    }
}

fn check_kind(key: &str, kind: &ConfigKind, value: &Value) -> Result<(), ConfigurationError> {
    let ok = match (kind, value) {
        (ConfigKind::String, Value::String(_))
        | (ConfigKind::Number, Value::Number(_))
        | (ConfigKind::Boolean, Value::Boolean(_))
        | (ConfigKind::List, Value::List(_)) => true,
        (ConfigKind::Enum(choices), Value::String(s)) => choices.contains(&s.as_str()),
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(mismatch(key, kind, value.kind_name()))
    }
}
