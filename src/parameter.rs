//! Parameter tree: the recursive value published by the host and carried by
//! rule-data update documents.
//!
//! A [`Parameter`] is either a scalar leaf, an ordered array, or a map with
//! unique string keys. Maps keep insertion order, which is also the order in
//! which published keys are routed to subscribers.
//!
//! ```rust
//! use appsec_engine::Parameter;
//! use serde_json::json;
//!
//! let p = Parameter::from(json!({"server.request.query": {"id": ["1", "2"]}}));
//! assert!(p.is_map());
//! assert_eq!(p.keys().collect::<Vec<_>>(), vec!["server.request.query"]);
//! ```

use crate::error::{AppsecError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Recursive, ownership-exclusive value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Parameter {
    #[default]
    Null,
    Bool(bool),
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    String(String),
    Array(Vec<Parameter>),
    Map(IndexMap<String, Parameter>),
}

/// One step of a key path: a map key or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(i) => write!(f, "{i}"),
            PathSegment::Key(k) => write!(f, "{k}"),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl Parameter {
    pub fn map() -> Self {
        Parameter::Map(IndexMap::new())
    }

    pub fn string(value: impl Into<String>) -> Self {
        Parameter::String(value.into())
    }

    /// Parse a JSON document into a parameter tree.
    pub fn from_json(input: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(input)?;
        Ok(Parameter::from(value))
    }

    /// Insert `value` under `key`, replacing any previous value for that key.
    pub fn add(&mut self, key: impl Into<String>, value: Parameter) -> Result<()> {
        match self {
            Parameter::Map(entries) => {
                entries.insert(key.into(), value);
                Ok(())
            }
            _ => Err(AppsecError::invalid_input(".", "not a map")),
        }
    }

    /// Append `value` to an array parameter.
    pub fn push(&mut self, value: Parameter) -> Result<()> {
        match self {
            Parameter::Array(items) => {
                items.push(value);
                Ok(())
            }
            _ => Err(AppsecError::invalid_input(".", "not an array")),
        }
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Parameter::Map(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Parameter::Array(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Parameter::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Parameter>> {
        match self {
            Parameter::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Parameter]> {
        match self {
            Parameter::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Number of children for containers, zero for scalars.
    pub fn len(&self) -> usize {
        match self {
            Parameter::Map(entries) => entries.len(),
            Parameter::Array(items) => items.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &str) -> Option<&Parameter> {
        self.as_map().and_then(|entries| entries.get(key))
    }

    /// Top-level keys of a map parameter, in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.as_map()
            .into_iter()
            .flat_map(|entries| entries.keys().map(String::as_str))
    }

    /// Follow a key path. Key segments index maps; on arrays a key segment is
    /// accepted when it parses as an index.
    pub fn resolve(&self, path: &[PathSegment]) -> Option<&Parameter> {
        let mut current = self;
        for segment in path {
            current = match (current, segment) {
                (Parameter::Map(entries), PathSegment::Key(key)) => entries.get(key)?,
                (Parameter::Array(items), PathSegment::Index(idx)) => items.get(*idx)?,
                (Parameter::Array(items), PathSegment::Key(key)) => {
                    items.get(key.parse::<usize>().ok()?)?
                }
                _ => return None,
            };
        }
        Some(current)
    }
}

impl From<Value> for Parameter {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Parameter::Null,
            Value::Bool(b) => Parameter::Bool(b),
            Value::Number(n) => {
                if let Some(v) = n.as_u64() {
                    Parameter::Unsigned(v)
                } else if let Some(v) = n.as_i64() {
                    Parameter::Signed(v)
                } else {
                    Parameter::Float(n.as_f64().unwrap_or_default())
                }
            }
            Value::String(s) => Parameter::String(s),
            Value::Array(items) => Parameter::Array(items.into_iter().map(Parameter::from).collect()),
            Value::Object(entries) => Parameter::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Parameter::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&Parameter> for Value {
    fn from(param: &Parameter) -> Self {
        match param {
            Parameter::Null => Value::Null,
            Parameter::Bool(b) => Value::Bool(*b),
            Parameter::Signed(v) => Value::from(*v),
            Parameter::Unsigned(v) => Value::from(*v),
            Parameter::Float(v) => Value::from(*v),
            Parameter::String(s) => Value::String(s.clone()),
            Parameter::Array(items) => Value::Array(items.iter().map(Value::from).collect()),
            Parameter::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for Parameter {
    fn from(value: &str) -> Self {
        Parameter::String(value.to_string())
    }
}

impl From<String> for Parameter {
    fn from(value: String) -> Self {
        Parameter::String(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_map_builder() {
        let mut p = Parameter::map();
        p.add("arg1", Parameter::string("string 1")).unwrap();
        p.add("arg2", Parameter::string("string 2")).unwrap();

        assert!(p.is_map());
        assert_eq!(p.len(), 2);
        assert_eq!(p.keys().collect::<Vec<_>>(), vec!["arg1", "arg2"]);
        assert_eq!(p.get("arg1").and_then(Parameter::as_str), Some("string 1"));
    }

    #[test]
    fn test_duplicate_key_replaces_value() {
        let mut p = Parameter::map();
        p.add("k", Parameter::string("a")).unwrap();
        p.add("k", Parameter::string("b")).unwrap();
        assert_eq!(p.len(), 1);
        assert_eq!(p.get("k").and_then(Parameter::as_str), Some("b"));
    }

    #[test]
    fn test_add_on_scalar_fails() {
        let mut p = Parameter::string("x");
        let err = p.add("k", Parameter::Null).unwrap_err();
        assert!(matches!(err, AppsecError::InvalidInput { .. }));
        assert!(Parameter::map().push(Parameter::Null).is_err());
    }

    #[test]
    fn test_from_json_preserves_shape() {
        let p = Parameter::from(json!({
            "a": [1, -2, 1.5, true, null, "s"],
            "b": {"c": "d"}
        }));

        let items = p.get("a").and_then(Parameter::as_array).unwrap();
        assert_eq!(items[0], Parameter::Unsigned(1));
        assert_eq!(items[1], Parameter::Signed(-2));
        assert_eq!(items[2], Parameter::Float(1.5));
        assert_eq!(items[3], Parameter::Bool(true));
        assert_eq!(items[4], Parameter::Null);
        assert_eq!(items[5], Parameter::string("s"));

        let back = Value::from(&p);
        assert_eq!(back["b"]["c"], json!("d"));
    }

    #[test]
    fn test_resolve_key_path() {
        let p = Parameter::from(json!({"h": {"list": ["x", {"y": "z"}]}}));
        let path = vec![
            PathSegment::from("h"),
            PathSegment::from("list"),
            PathSegment::Index(1),
            PathSegment::from("y"),
        ];
        assert_eq!(p.resolve(&path).and_then(Parameter::as_str), Some("z"));

        let by_key = vec![PathSegment::from("h"), PathSegment::from("list"), PathSegment::from("0")];
        assert_eq!(p.resolve(&by_key).and_then(Parameter::as_str), Some("x"));

        assert!(p.resolve(&[PathSegment::from("missing")]).is_none());
        assert_eq!(p.resolve(&[]), Some(&p));
    }

    #[test]
    fn test_deserialize_untagged() {
        let p: Parameter = serde_yaml::from_str("a: 1\nb: [x, y]\n").unwrap();
        assert_eq!(p.get("a"), Some(&Parameter::Unsigned(1)));
        assert_eq!(p.get("b").map(Parameter::len), Some(2));
    }
}
