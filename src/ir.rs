//! Intermediate Representation (IR) of a compiled ruleset.
//!
//! The compiler turns a ruleset document into these structures once per
//! instance; listeners only ever read them.

use crate::action::ActionTable;
use crate::matcher::types::{CompiledOperator, Transformer};
use crate::parameter::PathSegment;
use crate::processor::Processor;
use crate::subscriber::Address;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// An address plus an optional key path inside the published value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub address: Address,
    pub key_path: Vec<PathSegment>,
}

impl Target {
    pub fn new(address: impl Into<Address>) -> Self {
        Self {
            address: address.into(),
            key_path: Vec::new(),
        }
    }

    pub fn with_key_path(mut self, key_path: Vec<PathSegment>) -> Self {
        self.key_path = key_path;
        self
    }
}

/// One operator applied to any of its targets.
#[derive(Debug, Clone)]
pub struct Condition {
    pub operator: CompiledOperator,
    pub targets: Vec<Target>,
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub tags: BTreeMap<String, String>,
    /// All conditions must match for the rule to fire.
    pub conditions: Vec<Condition>,
    pub transformers: Vec<Transformer>,
    pub on_match: Vec<String>,
}

impl Rule {
    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.conditions
            .iter()
            .flat_map(|c| c.targets.iter().map(|t| &t.address))
    }
}

/// Outcome of compiling a ruleset: counters and failures grouped by reason.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileReport {
    pub loaded: usize,
    pub failed: usize,
    /// Failure reason to the ids of the rules that failed with it.
    pub errors: BTreeMap<String, Vec<String>>,
}

impl CompileReport {
    pub fn record_failure(&mut self, rule_id: impl Into<String>, reason: impl Into<String>) {
        self.failed += 1;
        self.errors
            .entry(reason.into())
            .or_default()
            .push(rule_id.into());
    }

    /// The errors as a JSON object, `{}` when nothing failed.
    pub fn errors_json(&self) -> String {
        let object: serde_json::Map<String, Value> = self
            .errors
            .iter()
            .map(|(reason, ids)| {
                (
                    reason.clone(),
                    Value::Array(ids.iter().cloned().map(Value::String).collect()),
                )
            })
            .collect();
        Value::Object(object).to_string()
    }
}

/// Immutable snapshot evaluated by listeners.
#[derive(Debug, Clone, Default)]
pub struct CompiledRuleset {
    /// `metadata.rules_version` of the source document.
    pub version: Option<String>,
    pub rules: Vec<Rule>,
    pub processors: Vec<Processor>,
    pub actions: ActionTable,
    /// Union of every rule and processor input.
    pub addresses: BTreeSet<Address>,
    pub report: CompileReport,
}

impl CompiledRuleset {
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn get_rule(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_groups_by_reason() {
        let mut report = CompileReport::default();
        report.loaded = 1;
        report.record_failure("2", "missing key 'type'");
        report.record_failure("3", "missing key 'type'");
        report.record_failure("4", "unknown matcher: squash");

        assert_eq!(report.failed, 3);
        assert_eq!(report.errors.len(), 2);

        let parsed: Value = serde_json::from_str(&report.errors_json()).unwrap();
        assert_eq!(parsed["missing key 'type'"], serde_json::json!(["2", "3"]));
        assert_eq!(parsed["unknown matcher: squash"], serde_json::json!(["4"]));
    }

    #[test]
    fn test_empty_report_json() {
        assert_eq!(CompileReport::default().errors_json(), "{}");
    }

    #[test]
    fn test_target_builder() {
        let target = Target::new("server.request.query").with_key_path(vec!["id".into()]);
        assert_eq!(&*target.address, "server.request.query");
        assert_eq!(target.key_path, vec![PathSegment::Key("id".into())]);
    }
}
