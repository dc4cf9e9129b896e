//! Actions: typed enforcement directives derived from a rule's `on_match`.
//!
//! An `on_match` identifier is resolved against the ruleset's action table,
//! falling back to the built-in table. Recognized action types start from a
//! hard-coded parameter set which the table entry overrides key by key.
//! Identifiers or types that cannot be recognized still produce an
//! [`ActionType::Invalid`] action carrying the declared parameters, so the
//! host decides what to do with them.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Block,
    Redirect,
    Stack,
    Invalid,
}

impl ActionType {
    /// Map a declared action type (`block_request`, ...) to its variant.
    pub fn from_declared(declared: &str) -> Self {
        match declared {
            "block_request" => ActionType::Block,
            "redirect_request" => ActionType::Redirect,
            "generate_stack" => ActionType::Stack,
            _ => ActionType::Invalid,
        }
    }

    /// Whether this action interrupts the request.
    pub fn is_blocking(self) -> bool {
        matches!(self, ActionType::Block | ActionType::Redirect)
    }

    fn default_parameters(self) -> BTreeMap<String, String> {
        let pairs: &[(&str, &str)] = match self {
            ActionType::Block => &[
                ("status_code", "403"),
                ("grpc_status_code", "10"),
                ("type", "auto"),
            ],
            ActionType::Redirect => &[("status_code", "303"), ("location", "")],
            ActionType::Stack | ActionType::Invalid => &[],
        };
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub parameters: BTreeMap<String, String>,
}

impl Action {
    pub fn new(action_type: ActionType) -> Self {
        Self {
            action_type,
            parameters: action_type.default_parameters(),
        }
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }
}

/// An entry of the `actions` section: `{id, type, parameters}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionDefinition {
    pub id: String,
    pub declared_type: String,
    pub parameters: BTreeMap<String, String>,
}

impl ActionDefinition {
    pub fn new(id: impl Into<String>, declared_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            declared_type: declared_type.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// Parse an entry of the `actions` section. Returns `None` when `id` or
    /// `type` is missing.
    pub fn from_value(value: &Value) -> Option<Self> {
        let id = value.get("id")?.as_str()?;
        let declared_type = value.get("type")?.as_str()?;
        let mut definition = Self::new(id, declared_type);
        if let Some(params) = value.get("parameters").and_then(Value::as_object) {
            for (key, param) in params {
                if let Some(rendered) = render_parameter(param) {
                    definition.parameters.insert(key.clone(), rendered);
                }
            }
        }
        Some(definition)
    }

    fn to_action(&self) -> Action {
        let action_type = ActionType::from_declared(&self.declared_type);
        let mut action = Action::new(action_type);
        for (key, value) in &self.parameters {
            action.parameters.insert(key.clone(), value.clone());
        }
        action
    }
}

fn render_parameter(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Resolution table from `on_match` identifiers to actions.
#[derive(Debug, Clone)]
pub struct ActionTable {
    definitions: HashMap<String, ActionDefinition>,
}

impl Default for ActionTable {
    fn default() -> Self {
        let mut definitions = HashMap::new();
        for definition in [
            ActionDefinition::new("block", "block_request"),
            ActionDefinition::new("stack_trace", "generate_stack"),
        ] {
            definitions.insert(definition.id.clone(), definition);
        }
        Self { definitions }
    }
}

impl ActionTable {
    /// Built-in table extended (and overridden) by `definitions`.
    pub fn with_definitions(definitions: impl IntoIterator<Item = ActionDefinition>) -> Self {
        let mut table = Self::default();
        for definition in definitions {
            table.definitions.insert(definition.id.clone(), definition);
        }
        table
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn resolve(&self, id: &str) -> Action {
        match self.definitions.get(id) {
            Some(definition) => definition.to_action(),
            None => Action::new(ActionType::Invalid),
        }
    }

    /// Resolve every identifier and merge into `actions`, keeping the first
    /// action of each type.
    pub fn resolve_into<'a>(&self, ids: impl IntoIterator<Item = &'a str>, actions: &mut Vec<Action>) {
        for id in ids {
            let action = self.resolve(id);
            if !actions.iter().any(|a| a.action_type == action.action_type) {
                actions.push(action);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_block_defaults() {
        let table = ActionTable::default();
        let action = table.resolve("block");
        assert_eq!(action.action_type, ActionType::Block);
        assert_eq!(action.parameter("status_code"), Some("403"));
        assert_eq!(action.parameter("grpc_status_code"), Some("10"));
        assert_eq!(action.parameter("type"), Some("auto"));
    }

    #[test]
    fn test_custom_parameters_override_per_key() {
        let definition = ActionDefinition::from_value(&json!({
            "id": "custom",
            "type": "block_request",
            "parameters": {"status_code": 123, "custom_param": "foo"}
        }))
        .unwrap();
        let table = ActionTable::with_definitions([definition]);

        let action = table.resolve("custom");
        assert_eq!(action.action_type, ActionType::Block);
        assert_eq!(action.parameter("status_code"), Some("123"));
        assert_eq!(action.parameter("grpc_status_code"), Some("10"));
        assert_eq!(action.parameter("type"), Some("auto"));
        assert_eq!(action.parameter("custom_param"), Some("foo"));
    }

    #[test]
    fn test_unknown_type_is_invalid_with_raw_parameters() {
        let definition = ActionDefinition::from_value(&json!({
            "id": "custom",
            "type": "custom_type",
            "parameters": {"some": "parameter"}
        }))
        .unwrap();
        let table = ActionTable::with_definitions([definition]);

        let action = table.resolve("custom");
        assert_eq!(action.action_type, ActionType::Invalid);
        assert_eq!(action.parameter("some"), Some("parameter"));
    }

    #[test]
    fn test_unknown_identifier_is_invalid() {
        let action = ActionTable::default().resolve("does-not-exist");
        assert_eq!(action.action_type, ActionType::Invalid);
        assert!(action.parameters.is_empty());
    }

    #[test]
    fn test_resolve_into_deduplicates_by_type() {
        let table = ActionTable::with_definitions([ActionDefinition::new("block2", "block_request")]);
        let mut actions = Vec::new();
        table.resolve_into(["block", "block2", "stack_trace"], &mut actions);
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].action_type, ActionType::Block);
        assert_eq!(actions[1].action_type, ActionType::Stack);
    }

    #[test]
    fn test_definition_requires_id_and_type() {
        assert!(ActionDefinition::from_value(&json!({"type": "block_request"})).is_none());
        assert!(ActionDefinition::from_value(&json!({"id": "x"})).is_none());
    }

    #[test]
    fn test_redirect_is_blocking() {
        assert!(ActionType::Redirect.is_blocking());
        assert!(!ActionType::Stack.is_blocking());
        let action = Action::new(ActionType::Redirect);
        assert_eq!(action.parameter("status_code"), Some("303"));
    }
}
