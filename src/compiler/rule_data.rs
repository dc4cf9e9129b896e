//! Rule data: mutable matching inputs (IP block lists, user lists) that
//! conditions reference by id.
//!
//! Each entry of a `rules_data` section has the shape
//! `{"id": "...", "type": "...", "data": [{"value": "...", "expiration": N}]}`.
//! An expiration of `0` (or none) never expires; otherwise it is a UNIX
//! timestamp in seconds, given as a number or a numeric string.

use crate::error::{AppsecError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

pub const IP_WITH_EXPIRATION: &str = "ip_with_expiration";
pub const DATA_WITH_EXPIRATION: &str = "data_with_expiration";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataEntry {
    pub value: String,
    /// Seconds since the epoch, `0` for never.
    pub expiration: u64,
}

impl DataEntry {
    pub fn is_expired(&self, now: u64) -> bool {
        self.expiration != 0 && self.expiration <= now
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleData {
    pub id: String,
    pub data_type: String,
    pub entries: Vec<DataEntry>,
}

/// Rule data indexed by id.
pub type RuleDataSet = HashMap<String, RuleData>;

/// Current time in seconds since the epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Parse one `rules_data` entry, reporting the first malformed node.
pub fn parse_rule_data(value: &Value, path: &str) -> Result<RuleData> {
    let entry = value
        .as_object()
        .ok_or_else(|| AppsecError::invalid_input(path, "not a map"))?;

    let id = entry
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| AppsecError::invalid_input(format!("{path}.id"), "missing or not a string"))?;
    let data_type = entry
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| AppsecError::invalid_input(format!("{path}.type"), "missing or not a string"))?;
    let items = entry
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| AppsecError::invalid_input(format!("{path}.data"), "missing or not an array"))?;

    let mut entries = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let item_path = format!("{path}.data[{i}]");
        let value = item
            .get("value")
            .and_then(Value::as_str)
            .ok_or_else(|| AppsecError::invalid_input(format!("{item_path}.value"), "missing or not a string"))?;
        let expiration = match item.get("expiration") {
            None | Some(Value::Null) => 0,
            Some(raw) => parse_expiration(raw)
                .ok_or_else(|| AppsecError::invalid_input(format!("{item_path}.expiration"), "not a timestamp"))?,
        };
        entries.push(DataEntry {
            value: value.to_string(),
            expiration,
        });
    }

    Ok(RuleData {
        id: id.to_string(),
        data_type: data_type.to_string(),
        entries,
    })
}

fn parse_expiration(raw: &Value) -> Option<u64> {
    match raw {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse a whole `rules_data` array.
pub fn parse_rules_data(values: &[Value]) -> Result<RuleDataSet> {
    let mut set = RuleDataSet::new();
    for (i, value) in values.iter().enumerate() {
        let data = parse_rule_data(value, &format!("rules_data[{i}]"))?;
        set.insert(data.id.clone(), data);
    }
    Ok(set)
}

/// Merge `updates` into the `rules_data` array of a ruleset document:
/// entries with the same id are replaced, new ids appended.
pub fn merge_rules_data(document: &mut Value, updates: &[Value]) -> Result<()> {
    // Validate everything first so a bad entry leaves the document untouched.
    let parsed = updates
        .iter()
        .enumerate()
        .map(|(i, v)| parse_rule_data(v, &format!("rules_data[{i}]")).map(|d| (d.id, v)))
        .collect::<Result<Vec<_>>>()?;

    let root = document
        .as_object_mut()
        .ok_or_else(|| AppsecError::invalid_input(".", "ruleset is not a map"))?;
    let existing = root
        .entry("rules_data")
        .or_insert_with(|| Value::Array(Vec::new()));
    if !existing.is_array() {
        *existing = Value::Array(Vec::new());
    }
    let Value::Array(entries) = existing else {
        return Ok(());
    };

    for (id, update) in parsed {
        let position = entries
            .iter()
            .position(|e| e.get("id").and_then(Value::as_str) == Some(id.as_str()));
        match position {
            Some(idx) => entries[idx] = update.clone(),
            None => entries.push(update.clone()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_entry() {
        let data = parse_rule_data(
            &json!({"id": "blocked_ips", "type": "data_with_expiration", "data": [
                {"value": "192.168.1.1", "expiration": "9999999999"},
                {"value": "10.0.0.1", "expiration": 0},
                {"value": "10.0.0.2"}
            ]}),
            "rules_data[0]",
        )
        .unwrap();

        assert_eq!(data.id, "blocked_ips");
        assert_eq!(data.data_type, DATA_WITH_EXPIRATION);
        assert_eq!(data.entries.len(), 3);
        assert_eq!(data.entries[0].expiration, 9_999_999_999);
        assert_eq!(data.entries[1].expiration, 0);
        assert_eq!(data.entries[2].expiration, 0);
    }

    #[test]
    fn test_expiration() {
        let entry = DataEntry {
            value: "x".into(),
            expiration: 100,
        };
        assert!(entry.is_expired(100));
        assert!(!entry.is_expired(99));

        let never = DataEntry {
            value: "x".into(),
            expiration: 0,
        };
        assert!(!never.is_expired(u64::MAX));
    }

    #[test]
    fn test_malformed_entries() {
        let err = parse_rule_data(&json!({"type": "x", "data": []}), "rules_data[0]").unwrap_err();
        assert_eq!(
            err,
            AppsecError::invalid_input("rules_data[0].id", "missing or not a string")
        );

        let err = parse_rule_data(&json!({"id": "a", "type": "x", "data": [{"value": 1}]}), "r").unwrap_err();
        assert!(matches!(err, AppsecError::InvalidInput { path, .. } if path == "r.data[0].value"));

        let err = parse_rule_data(&json!([]), "r").unwrap_err();
        assert!(matches!(err, AppsecError::InvalidInput { .. }));
    }

    #[test]
    fn test_merge_replaces_by_id() {
        let mut doc = json!({"rules": [], "rules_data": [
            {"id": "a", "type": "data_with_expiration", "data": [{"value": "1"}]},
            {"id": "b", "type": "data_with_expiration", "data": [{"value": "2"}]}
        ]});

        merge_rules_data(
            &mut doc,
            &[
                json!({"id": "b", "type": "data_with_expiration", "data": [{"value": "3"}]}),
                json!({"id": "c", "type": "ip_with_expiration", "data": []}),
            ],
        )
        .unwrap();

        let set = parse_rules_data(doc["rules_data"].as_array().unwrap()).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set["a"].entries[0].value, "1");
        assert_eq!(set["b"].entries[0].value, "3");
        assert!(set["c"].entries.is_empty());
    }

    #[test]
    fn test_merge_rejects_without_touching_document() {
        let mut doc = json!({"rules_data": []});
        let before = doc.clone();
        assert!(merge_rules_data(&mut doc, &[json!({"id": "a"})]).is_err());
        assert_eq!(doc, before);
    }
}
