//! Scanners: key/value classifiers used to tag schema leaves (`pii`, ...).

use crate::compiler::rule_data::RuleDataSet;
use crate::error::{AppsecError, Result};
use crate::matcher::{CompiledOperator, MatcherBuilder};
use serde_json::Value;
use std::collections::BTreeMap;

/// A classifier matching a map key, a string value, or both.
#[derive(Debug, Clone)]
pub struct Scanner {
    pub id: String,
    pub key: Option<CompiledOperator>,
    pub value: Option<CompiledOperator>,
    pub tags: BTreeMap<String, String>,
}

impl Scanner {
    /// Parse an entry of the `scanners` section.
    ///
    /// ```json
    /// {"id": "email", "key": {"operator": "match_regex", "parameters": {"regex": "mail"}},
    ///  "value": {"operator": "match_regex", "parameters": {"regex": "@"}},
    ///  "tags": {"type": "email", "category": "pii"}}
    /// ```
    pub fn from_value(value: &Value, builder: &MatcherBuilder) -> Result<Self> {
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| AppsecError::RuleCompilation("missing key 'id'".to_string()))?;
        let tags = value
            .get("tags")
            .and_then(Value::as_object)
            .ok_or_else(|| AppsecError::RuleCompilation("missing key 'tags'".to_string()))?
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
            .collect();

        let key = value
            .get("key")
            .map(|definition| compile_matcher(definition, builder))
            .transpose()?;
        let value_matcher = value
            .get("value")
            .map(|definition| compile_matcher(definition, builder))
            .transpose()?;

        if key.is_none() && value_matcher.is_none() {
            return Err(AppsecError::RuleCompilation(
                "scanner without key or value matcher".to_string(),
            ));
        }

        Ok(Self {
            id: id.to_string(),
            key,
            value: value_matcher,
            tags,
        })
    }

    /// A scanner matches when every configured matcher does.
    pub fn matches(&self, key: Option<&str>, value: &str) -> bool {
        let key_ok = match (&self.key, key) {
            (None, _) => true,
            (Some(op), Some(key)) => op.matches(key).is_some(),
            (Some(_), None) => false,
        };
        key_ok && self.value.as_ref().map_or(true, |op| op.matches(value).is_some())
    }

    /// Whether every `filter` tag is carried by this scanner.
    pub fn has_tags(&self, filter: &BTreeMap<String, String>) -> bool {
        filter.iter().all(|(k, v)| self.tags.get(k) == Some(v))
    }
}

fn compile_matcher(definition: &Value, builder: &MatcherBuilder) -> Result<CompiledOperator> {
    let operator = definition
        .get("operator")
        .and_then(Value::as_str)
        .ok_or_else(|| AppsecError::RuleCompilation("missing key 'operator'".to_string()))?;
    let params = definition
        .get("parameters")
        .ok_or_else(|| AppsecError::RuleCompilation("missing key 'parameters'".to_string()))?;
    builder.operator(operator, params, &RuleDataSet::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn email_scanner() -> Scanner {
        Scanner::from_value(
            &json!({
                "id": "email",
                "key": {"operator": "match_regex", "parameters": {"regex": "mail"}},
                "value": {"operator": "match_regex", "parameters": {"regex": "^[^@]+@[^@]+$"}},
                "tags": {"type": "email", "category": "pii"}
            }),
            &MatcherBuilder::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_key_and_value_must_match() {
        let scanner = email_scanner();
        assert!(scanner.matches(Some("user_email"), "a@b.c"));
        assert!(!scanner.matches(Some("name"), "a@b.c"));
        assert!(!scanner.matches(Some("email"), "not an address"));
        assert!(!scanner.matches(None, "a@b.c"));
    }

    #[test]
    fn test_tag_filter() {
        let scanner = email_scanner();
        let mut filter = BTreeMap::new();
        filter.insert("category".to_string(), "pii".to_string());
        assert!(scanner.has_tags(&filter));

        filter.insert("type".to_string(), "credit_card".to_string());
        assert!(!scanner.has_tags(&filter));
    }

    #[test]
    fn test_invalid_scanners() {
        let builder = MatcherBuilder::new();
        assert!(Scanner::from_value(&json!({"tags": {}}), &builder).is_err());
        assert!(Scanner::from_value(&json!({"id": "x", "tags": {}}), &builder).is_err());
        assert!(Scanner::from_value(
            &json!({"id": "x", "tags": {}, "value": {"operator": "squash", "parameters": {}}}),
            &builder
        )
        .is_err());
    }
}
