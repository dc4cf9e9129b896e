//! Ruleset documents as handed to subscribers.
//!
//! Rules descriptions are JSON, YAML (a superset of JSON) is accepted as
//! well. The raw document is kept: updates merge into a copy of it and the
//! result is compiled again.

use crate::error::{AppsecError, Result};
use crate::parameter::Parameter;
use serde_json::Value;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineRuleset {
    document: Value,
}

impl EngineRuleset {
    pub fn new(document: Value) -> Result<Self> {
        if !document.is_object() {
            return Err(AppsecError::invalid_input(".", "ruleset is not a map"));
        }
        Ok(Self { document })
    }

    /// Parse a JSON rules description.
    pub fn from_json_str(input: &str) -> Result<Self> {
        Self::new(serde_json::from_str(input)?)
    }

    /// Parse a YAML rules description.
    pub fn from_yaml_str(input: &str) -> Result<Self> {
        Self::new(serde_yaml::from_str(input)?)
    }

    /// Load a rules file. `.yaml`/`.yml` files are parsed as YAML,
    /// everything else as JSON.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), bytes = contents.len(), "Loading rules file");
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&contents),
            _ => Self::from_json_str(&contents),
        }
    }

    /// Build from a parameter tree, as received through remote configuration.
    pub fn from_parameter(param: &Parameter) -> Result<Self> {
        Self::new(Value::from(param))
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn into_document(self) -> Value {
        self.document
    }
}

impl std::str::FromStr for EngineRuleset {
    type Err = AppsecError;

    fn from_str(input: &str) -> Result<Self> {
        Self::from_json_str(input)
    }
}
