//! Default operator implementations.
//!
//! Each `create_*` function is an [`OperatorFactory`]: it reads the
//! condition's `parameters` object, resolves rule data when the condition
//! references it, and returns a ready-to-run [`CompiledOperator`].

use crate::compiler::rule_data::{
    now_secs, DataEntry, RuleDataSet, DATA_WITH_EXPIRATION, IP_WITH_EXPIRATION,
};
use crate::error::AppsecError;
use crate::matcher::advanced::create_ip_match;
use crate::matcher::types::{CompiledOperator, MatchFn, OperatorFactory};
use aho_corasick::AhoCorasickBuilder;
use regex::RegexBuilder;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

fn missing(key: &str) -> AppsecError {
    AppsecError::RuleCompilation(format!("missing key '{key}'"))
}

fn case_sensitive(params: &Value) -> bool {
    params
        .pointer("/options/case_sensitive")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn string_list(params: &Value) -> Option<Vec<String>> {
    params.get("list").and_then(Value::as_array).map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
}

/// Rule data referenced by `parameters.data`, filtered by accepted types.
/// Unknown ids yield no entries: the data may arrive with a later update.
fn referenced_data(
    params: &Value,
    data: &RuleDataSet,
    accepted: &[&str],
) -> Option<Vec<DataEntry>> {
    let id = params.get("data")?.as_str()?;
    let entries = match data.get(id) {
        Some(rule_data) if accepted.contains(&rule_data.data_type.as_str()) => rule_data.entries.clone(),
        Some(rule_data) => {
            tracing::warn!(data_id = id, data_type = %rule_data.data_type, "Rule data type not supported by operator, ignoring");
            Vec::new()
        }
        None => Vec::new(),
    };
    Some(entries)
}

/// `match_regex`: `parameters.regex`, `options.case_sensitive` (default
/// false) and `options.min_length` (default 0).
///
/// # Example
/// ```rust,ignore
/// let op = create_regex_match()(&json!({"regex": "^string.*"}), &RuleDataSet::new())?;
/// assert_eq!(op.matches("string 1"), Some("string 1".to_string()));
/// ```
pub fn create_regex_match() -> OperatorFactory {
    Arc::new(|params, _data| {
        let pattern = params
            .get("regex")
            .and_then(Value::as_str)
            .ok_or_else(|| missing("regex"))?;
        let min_length = params
            .pointer("/options/min_length")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;

        let regex = RegexBuilder::new(pattern)
            .case_insensitive(!case_sensitive(params))
            .build()
            .map_err(|_| {
                AppsecError::RuleCompilation(format!("invalid regular expression: {pattern}"))
            })?;

        let match_fn: MatchFn = Arc::new(move |value| {
            if value.len() < min_length {
                return None;
            }
            regex.find(value).map(|m| m.as_str().to_string())
        });
        Ok(CompiledOperator::new("match_regex", pattern, match_fn))
    })
}

/// `phrase_match`: any of `parameters.list` appears in the value.
pub fn create_phrase_match() -> OperatorFactory {
    Arc::new(|params, _data| {
        let phrases = string_list(params).ok_or_else(|| missing("list"))?;
        let automaton = AhoCorasickBuilder::new()
            .ascii_case_insensitive(!case_sensitive(params))
            .build(&phrases)
            .map_err(|e| AppsecError::RuleCompilation(format!("invalid phrase list: {e}")))?;

        let match_fn: MatchFn = Arc::new(move |value| {
            automaton
                .find(value)
                .map(|m| value[m.start()..m.end()].to_string())
        });
        Ok(CompiledOperator::new("phrase_match", "", match_fn))
    })
}

/// `exact_match`: the value equals one of `parameters.list`, or one of the
/// unexpired entries of the rule data named by `parameters.data`.
pub fn create_exact_match() -> OperatorFactory {
    Arc::new(|params, data| {
        let entries: HashMap<String, u64> =
            if let Some(entries) = referenced_data(params, data, &[DATA_WITH_EXPIRATION]) {
                entries.into_iter().map(|e| (e.value, e.expiration)).collect()
            } else if let Some(list) = string_list(params) {
                list.into_iter().map(|v| (v, 0)).collect()
            } else {
                return Err(missing("list"));
            };

        let match_fn: MatchFn = Arc::new(move |value| {
            let expiration = *entries.get(value)?;
            (expiration == 0 || expiration > now_secs()).then(|| value.to_string())
        });
        Ok(CompiledOperator::new("exact_match", "", match_fn))
    })
}

/// `ip_match`: the value is an address inside one of the listed networks,
/// either from `parameters.list` or from rule data.
pub fn create_ip_match_operator() -> OperatorFactory {
    Arc::new(|params, data| {
        let entries = if let Some(entries) =
            referenced_data(params, data, &[IP_WITH_EXPIRATION, DATA_WITH_EXPIRATION])
        {
            entries
        } else if let Some(list) = string_list(params) {
            list.into_iter()
                .map(|value| DataEntry {
                    value,
                    expiration: 0,
                })
                .collect()
        } else {
            return Err(missing("list"));
        };

        let (match_fn, rejected) = create_ip_match(&entries);
        if !rejected.is_empty() {
            tracing::warn!(count = rejected.len(), "Skipping unparsable IP entries");
        }
        Ok(CompiledOperator::new("ip_match", "", match_fn))
    })
}

/// Register all default operators.
///
/// # Operators Registered
/// * `match_regex` - Regular expression matching
/// * `phrase_match` - Multi-phrase substring matching
/// * `exact_match` - Exact value lookup (list or rule data)
/// * `ip_match` - IP / CIDR lookup (list or rule data)
pub fn register_defaults(registry: &mut HashMap<String, OperatorFactory>) {
    registry.insert("match_regex".to_string(), create_regex_match());
    registry.insert("phrase_match".to_string(), create_phrase_match());
    registry.insert("exact_match".to_string(), create_exact_match());
    registry.insert("ip_match".to_string(), create_ip_match_operator());
}
