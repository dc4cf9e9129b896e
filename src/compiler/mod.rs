//! Ruleset compiler.
//!
//! Turns a ruleset document into a [`CompiledRuleset`]. Compilation is
//! lenient at rule granularity: a malformed rule is skipped and recorded in
//! the [`CompileReport`] under a human-readable reason, while the remaining
//! rules stay usable. Only a document that is not a map (or whose sections
//! have the wrong shape) is rejected as a whole.
//!
//! The sub-modules are:
//! - [`rule_data`] - Rule data parsing, expiration and merging
//!
//! # Examples
//!
//! ```rust
//! use appsec_engine::Compiler;
//! use serde_json::json;
//!
//! let compiler = Compiler::new();
//! let ruleset = compiler.compile(&json!({
//!     "version": "2.1",
//!     "rules": [{
//!         "id": "1", "name": "rule1", "tags": {"type": "flow1"},
//!         "conditions": [{"operator": "match_regex",
//!                         "parameters": {"inputs": [{"address": "arg1"}], "regex": "^string.*"}}]
//!     }]
//! }))?;
//! assert_eq!(ruleset.report.loaded, 1);
//! # Ok::<(), appsec_engine::AppsecError>(())
//! ```

pub mod rule_data;

use crate::action::{ActionDefinition, ActionTable};
use crate::error::{AppsecError, Result};
use crate::ir::{CompileReport, CompiledRuleset, Condition, Rule, Target};
use crate::matcher::MatcherBuilder;
use crate::parameter::PathSegment;
use crate::processor::{Generator, Mapping, Processor, Scanner};
use crate::subscriber::Address;
use rule_data::{parse_rules_data, RuleDataSet};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Per-rule changes from the `rules_override` section.
#[derive(Debug, Clone, Default, PartialEq)]
struct RuleOverride {
    enabled: Option<bool>,
    on_match: Option<Vec<String>>,
}

/// The ruleset compiler.
///
/// Holds the operator and transformer registries; compiling does not
/// mutate it, so one compiler can serve many documents.
#[derive(Clone, Default)]
pub struct Compiler {
    builder: MatcherBuilder,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a whole ruleset document.
    pub fn compile(&self, document: &Value) -> Result<CompiledRuleset> {
        let root = document
            .as_object()
            .ok_or_else(|| AppsecError::invalid_input(".", "ruleset is not a map"))?;

        let version = document
            .pointer("/metadata/rules_version")
            .and_then(Value::as_str)
            .map(str::to_string);

        let data = parse_rules_data(section(root, "rules_data")?)?;
        let overrides = parse_overrides(section(root, "rules_override")?);
        let scanners = self.compile_scanners(section(root, "scanners")?);

        let actions = ActionTable::with_definitions(section(root, "actions")?.iter().filter_map(|value| {
            let definition = ActionDefinition::from_value(value);
            if definition.is_none() {
                tracing::warn!(action = %value, "Skipping action without id or type");
            }
            definition
        }));

        let mut report = CompileReport::default();
        let mut rules = Vec::new();
        let mut seen = HashSet::new();

        for (idx, value) in section(root, "rules")?.iter().enumerate() {
            let id = value
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("index:{idx}"));
            let rule_override = overrides.get(&id);

            let enabled = rule_override
                .and_then(|o| o.enabled)
                .or_else(|| value.get("enabled").and_then(Value::as_bool))
                .unwrap_or(true);
            if !enabled {
                tracing::debug!(rule_id = %id, "Rule disabled, skipping");
                continue;
            }

            if !seen.insert(id.clone()) {
                report.record_failure(id, "duplicate rule");
                continue;
            }

            match self.compile_rule(value, &data) {
                Ok(mut rule) => {
                    if let Some(on_match) = rule_override.and_then(|o| o.on_match.clone()) {
                        rule.on_match = on_match;
                    }
                    report.loaded += 1;
                    rules.push(rule);
                }
                Err(e) => {
                    let reason = failure_reason(e);
                    tracing::debug!(rule_id = %id, %reason, "Rule failed to compile");
                    report.record_failure(id, reason);
                }
            }
        }

        let mut processors = Vec::new();
        for value in section(root, "processors")? {
            match self.compile_processor(value, &scanners) {
                Ok(processor) => processors.push(processor),
                Err(e) => {
                    tracing::warn!(processor = ?value.get("id"), error = %e, "Skipping invalid processor");
                }
            }
        }

        let addresses: BTreeSet<Address> = rules
            .iter()
            .flat_map(Rule::addresses)
            .chain(processors.iter().flat_map(Processor::addresses))
            .cloned()
            .collect();

        tracing::debug!(
            loaded = report.loaded,
            failed = report.failed,
            processors = processors.len(),
            addresses = addresses.len(),
            "Ruleset compiled"
        );

        Ok(CompiledRuleset {
            version,
            rules,
            processors,
            actions,
            addresses,
            report,
        })
    }

    /// Compile a single rule.
    pub fn compile_rule(&self, value: &Value, data: &RuleDataSet) -> Result<Rule> {
        let id = required_str(value, "id")?;
        let name = required_str(value, "name")?;

        let tags_object = value
            .get("tags")
            .and_then(Value::as_object)
            .ok_or_else(|| missing("tags"))?;
        if !tags_object.get("type").is_some_and(Value::is_string) {
            return Err(missing("type"));
        }
        let tags: BTreeMap<String, String> = tags_object
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
            .collect();

        let condition_values = value
            .get("conditions")
            .and_then(Value::as_array)
            .ok_or_else(|| missing("conditions"))?;
        let conditions = condition_values
            .iter()
            .map(|c| self.compile_condition(c, data))
            .collect::<Result<Vec<_>>>()?;

        let transformers = match value.get("transformers").and_then(Value::as_array) {
            Some(names) => names
                .iter()
                .filter_map(Value::as_str)
                .map(|name| self.builder.modifier(name))
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        let on_match = value
            .get("on_match")
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();

        Ok(Rule {
            id: id.to_string(),
            name: name.to_string(),
            tags,
            conditions,
            transformers,
            on_match,
        })
    }

    fn compile_condition(&self, value: &Value, data: &RuleDataSet) -> Result<Condition> {
        let operator = required_str(value, "operator")?;
        let params = value.get("parameters").ok_or_else(|| missing("parameters"))?;
        let targets = parse_targets(params.get("inputs"))?;
        if targets.is_empty() {
            return Err(missing("inputs"));
        }
        let operator = self.builder.operator(operator, params, data)?;
        Ok(Condition { operator, targets })
    }

    fn compile_scanners(&self, values: &[Value]) -> Vec<Arc<Scanner>> {
        values
            .iter()
            .filter_map(|value| match Scanner::from_value(value, &self.builder) {
                Ok(scanner) => Some(Arc::new(scanner)),
                Err(e) => {
                    tracing::warn!(scanner = ?value.get("id"), error = %e, "Skipping invalid scanner");
                    None
                }
            })
            .collect()
    }

    fn compile_processor(&self, value: &Value, scanners: &[Arc<Scanner>]) -> Result<Processor> {
        let id = required_str(value, "id")?;
        let params = value.get("parameters").ok_or_else(|| missing("parameters"))?;

        let generator = match required_str(value, "generator")? {
            "extract_schema" => Generator::ExtractSchema {
                scanners: select_scanners(params.get("scanners"), scanners),
            },
            "http_endpoint_fingerprint" => Generator::EndpointFingerprint,
            "http_network_fingerprint" => Generator::NetworkFingerprint,
            "http_header_fingerprint" => Generator::HeaderFingerprint,
            "session_fingerprint" => Generator::SessionFingerprint,
            other => {
                return Err(AppsecError::RuleCompilation(format!("unknown generator: {other}")));
            }
        };

        let mapping_values = params
            .get("mappings")
            .and_then(Value::as_array)
            .filter(|m| !m.is_empty())
            .ok_or_else(|| missing("mappings"))?;

        let mut mappings = Vec::with_capacity(mapping_values.len());
        for mapping in mapping_values {
            let mut inputs = BTreeMap::new();
            for name in generator.input_names() {
                let targets = parse_targets(mapping.get(*name))?;
                if !targets.is_empty() {
                    inputs.insert(name.to_string(), targets);
                }
            }
            if inputs.is_empty() {
                return Err(missing("inputs"));
            }
            mappings.push(Mapping {
                inputs,
                output: required_str(mapping, "output")?.to_string(),
            });
        }

        Ok(Processor {
            id: id.to_string(),
            generator,
            mappings,
            output: value.get("output").and_then(Value::as_bool).unwrap_or(false),
            evaluate: value.get("evaluate").and_then(Value::as_bool).unwrap_or(true),
        })
    }
}

fn missing(key: &str) -> AppsecError {
    AppsecError::RuleCompilation(format!("missing key '{key}'"))
}

fn required_str<'a>(value: &'a Value, key: &str) -> Result<&'a str> {
    value.get(key).and_then(Value::as_str).ok_or_else(|| missing(key))
}

/// An optional top-level array; present with another type is an error.
fn section<'a>(root: &'a serde_json::Map<String, Value>, key: &str) -> Result<&'a [Value]> {
    match root.get(key) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(AppsecError::invalid_input(key, "not an array")),
    }
}

fn failure_reason(error: AppsecError) -> String {
    match error {
        AppsecError::RuleCompilation(reason) => reason,
        other => other.to_string(),
    }
}

/// `[{"address": "...", "key_path": ["a", 0]}]`
fn parse_targets(value: Option<&Value>) -> Result<Vec<Target>> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    items
        .iter()
        .map(|item| {
            let address = required_str(item, "address")?;
            let key_path = item
                .get("key_path")
                .and_then(Value::as_array)
                .map(|segments| {
                    segments
                        .iter()
                        .filter_map(|s| match s {
                            Value::String(k) => Some(PathSegment::Key(k.clone())),
                            Value::Number(n) => n.as_u64().map(|i| PathSegment::Index(i as usize)),
                            _ => None,
                        })
                        .collect()
                })
                .unwrap_or_default();
            Ok(Target::new(address).with_key_path(key_path))
        })
        .collect()
}

/// Scanners whose tags match one of the `{"tags": {...}}` filters.
fn select_scanners(filters: Option<&Value>, scanners: &[Arc<Scanner>]) -> Vec<Arc<Scanner>> {
    let filters: Vec<BTreeMap<String, String>> = filters
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|f| f.get("tags").and_then(Value::as_object))
                .map(|tags| {
                    tags.iter()
                        .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                        .collect()
                })
                .collect()
        })
        .unwrap_or_default();

    scanners
        .iter()
        .filter(|scanner| filters.iter().any(|filter| scanner.has_tags(filter)))
        .cloned()
        .collect()
}

fn parse_overrides(values: &[Value]) -> HashMap<String, RuleOverride> {
    let mut overrides = HashMap::new();
    for value in values {
        let rule_override = RuleOverride {
            enabled: value.get("enabled").and_then(Value::as_bool),
            on_match: value.get("on_match").and_then(Value::as_array).map(|ids| {
                ids.iter().filter_map(Value::as_str).map(str::to_string).collect()
            }),
        };
        let targets = value
            .get("rules_target")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|t| t.get("rule_id").and_then(Value::as_str));
        for rule_id in targets {
            overrides.insert(rule_id.to_string(), rule_override.clone());
        }
    }
    overrides
}
