//! WAF subscriber: a compiled ruleset snapshot and its per-context listener.
//!
//! An [`Instance`] owns one immutable [`CompiledRuleset`]. Updates never
//! touch it: [`Instance::update`] merges the new rule data into a copy of
//! the source document, compiles it again and returns a new instance, so
//! listeners created from the old one keep evaluating the old snapshot.

use crate::compiler::rule_data::merge_rules_data;
use crate::compiler::Compiler;
use crate::config::{EngineSettings, EvaluationLimits, DEFAULT_WAF_TIMEOUT};
use crate::error::{AppsecError, Result};
use crate::ir::{CompiledRuleset, Rule};
use crate::matcher::{EvalContext, MatchRecord};
use crate::obfuscator::{Obfuscator, REDACTED};
use crate::parameter::Parameter;
use crate::processor::Generator;
use crate::result::{Event, Verdict};
use crate::ruleset::EngineRuleset;
use crate::store::{BatchId, ObjectStore};
use crate::subscriber::{add_metric, Address, Listener, Meta, Metrics, Subscriber};
use crate::tags;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Construction options of an [`Instance`].
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceOptions {
    /// Upper bound of every listener call.
    pub timeout: Duration,
    /// Empty disables key-based redaction.
    pub obfuscator_key_regex: String,
    /// Empty disables value-based redaction.
    pub obfuscator_value_regex: String,
    pub limits: EvaluationLimits,
    pub schema_extraction: bool,
}

impl Default for InstanceOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_WAF_TIMEOUT,
            obfuscator_key_regex: String::new(),
            obfuscator_value_regex: String::new(),
            limits: EvaluationLimits::default(),
            schema_extraction: true,
        }
    }
}

impl InstanceOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_obfuscation(mut self, key_regex: impl Into<String>, value_regex: impl Into<String>) -> Self {
        self.obfuscator_key_regex = key_regex.into();
        self.obfuscator_value_regex = value_regex.into();
        self
    }
}

impl From<&EngineSettings> for InstanceOptions {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            timeout: settings.waf_timeout,
            obfuscator_key_regex: settings.obfuscator_key_regex.clone(),
            obfuscator_value_regex: settings.obfuscator_value_regex.clone(),
            limits: settings.limits,
            schema_extraction: settings.schema_extraction,
        }
    }
}

/// The WAF detection subscriber.
///
/// # Example
/// ```rust,ignore
/// let mut meta = Meta::new();
/// let mut metrics = Metrics::new();
/// let waf = Instance::from_json(RULES, &mut meta, &mut metrics)?;
/// let mut listener = waf.listener();
///
/// let mut store = ObjectStore::new();
/// let batch = store.insert(Parameter::from(json!({"arg1": "string 1"})));
/// let verdict = listener.call(&store, batch, Duration::from_millis(10))?;
/// ```
#[derive(Debug)]
pub struct Instance {
    ruleset: Arc<CompiledRuleset>,
    /// Source document the snapshot was compiled from.
    document: Value,
    options: InstanceOptions,
    obfuscator: Arc<Obfuscator>,
}

impl Instance {
    /// Build from a JSON rules description with default options.
    pub fn from_json(rules: &str, meta: &mut Meta, metrics: &mut Metrics) -> Result<Arc<Self>> {
        Self::with_options(rules.parse()?, InstanceOptions::default(), meta, metrics)
    }

    /// Build from engine settings, as the host does at startup.
    pub fn from_settings(
        settings: &EngineSettings,
        ruleset: &EngineRuleset,
        meta: &mut Meta,
        metrics: &mut Metrics,
    ) -> Result<Arc<Self>> {
        settings.validate()?;
        Self::with_options(ruleset.clone(), InstanceOptions::from(settings), meta, metrics)
    }

    /// Build from a ruleset and explicit options. Construction diagnostics
    /// (versions, rule counters, the error report) are written to `meta`
    /// and `metrics`.
    pub fn with_options(
        ruleset: EngineRuleset,
        options: InstanceOptions,
        meta: &mut Meta,
        metrics: &mut Metrics,
    ) -> Result<Arc<Self>> {
        let obfuscator = Arc::new(Obfuscator::new(
            &options.obfuscator_key_regex,
            &options.obfuscator_value_regex,
        )?);
        let instance = Self::build(ruleset.into_document(), options, obfuscator, meta, metrics)?;
        tracing::info!(
            rules = instance.ruleset.rule_count(),
            addresses = instance.ruleset.addresses.len(),
            "WAF instance created"
        );
        Ok(Arc::new(instance))
    }

    fn build(
        document: Value,
        options: InstanceOptions,
        obfuscator: Arc<Obfuscator>,
        meta: &mut Meta,
        metrics: &mut Metrics,
    ) -> Result<Self> {
        let ruleset = Compiler::new().compile(&document)?;
        let report = &ruleset.report;

        meta.insert(tags::WAF_VERSION.to_string(), tags::ENGINE_VERSION.to_string());
        meta.insert(tags::EVENT_RULES_ERRORS.to_string(), report.errors_json());
        if let Some(version) = &ruleset.version {
            meta.insert(tags::EVENT_RULES_VERSION.to_string(), version.clone());
        }
        metrics.insert(tags::EVENT_RULES_LOADED.to_string(), report.loaded as f64);
        metrics.insert(tags::EVENT_RULES_FAILED.to_string(), report.failed as f64);

        if report.failed > 0 {
            tracing::warn!(
                loaded = report.loaded,
                failed = report.failed,
                errors = %report.errors_json(),
                "Some rules failed to load"
            );
        }

        Ok(Self {
            ruleset: Arc::new(ruleset),
            document,
            options,
            obfuscator,
        })
    }

    /// New instance with the rule data of `param` merged in.
    ///
    /// `param` must be a map with a `rules_data` array; an optional
    /// `rules_override` array replaces the current overrides. `self` is left
    /// untouched whatever the outcome.
    pub fn update(&self, param: &Parameter, meta: &mut Meta, metrics: &mut Metrics) -> Result<Arc<Self>> {
        if !param.is_map() {
            return Err(AppsecError::invalid_input(".", "not a map"));
        }
        let rules_data = param
            .get("rules_data")
            .and_then(Parameter::as_array)
            .ok_or_else(|| AppsecError::invalid_input("rules_data", "missing or not an array"))?;
        let rules_data: Vec<Value> = rules_data.iter().map(Value::from).collect();

        let mut document = self.document.clone();
        merge_rules_data(&mut document, &rules_data)?;

        if let Some(overrides) = param.get("rules_override") {
            if !overrides.is_array() {
                return Err(AppsecError::invalid_input("rules_override", "not an array"));
            }
            if let Some(root) = document.as_object_mut() {
                root.insert("rules_override".to_string(), Value::from(overrides));
            }
        }

        let instance = Self::build(
            document,
            self.options.clone(),
            self.obfuscator.clone(),
            meta,
            metrics,
        )?;
        tracing::info!(entries = rules_data.len(), "WAF rule data updated");
        Ok(Arc::new(instance))
    }

    pub fn ruleset(&self) -> &CompiledRuleset {
        &self.ruleset
    }

    pub fn options(&self) -> &InstanceOptions {
        &self.options
    }
}

impl Subscriber for Instance {
    fn name(&self) -> &str {
        "waf"
    }

    fn subscriptions(&self) -> &BTreeSet<Address> {
        &self.ruleset.addresses
    }

    fn listener(&self) -> Box<dyn Listener> {
        Box::new(WafListener::new(
            self.ruleset.clone(),
            self.obfuscator.clone(),
            &self.options,
        ))
    }

    fn update(&self, param: &Parameter, meta: &mut Meta, metrics: &mut Metrics) -> Result<Option<Arc<dyn Subscriber>>> {
        let instance: Arc<dyn Subscriber> = Instance::update(self, param, meta, metrics)?;
        Ok(Some(instance))
    }
}

#[derive(Serialize)]
struct RuleFragment<'a> {
    rule: RuleInfo<'a>,
    rule_matches: Vec<ConditionMatch<'a>>,
}

#[derive(Serialize)]
struct RuleInfo<'a> {
    id: &'a str,
    name: &'a str,
    tags: &'a BTreeMap<String, String>,
}

#[derive(Serialize)]
struct ConditionMatch<'a> {
    operator: &'a str,
    operator_value: &'a str,
    parameters: Vec<MatchParameter<'a>>,
}

#[derive(Serialize)]
struct MatchParameter<'a> {
    address: &'a str,
    key_path: &'a [String],
    value: &'a str,
    highlight: Vec<&'a str>,
}

/// Per-context state of an [`Instance`].
///
/// Keeps the latest batch of every subscribed address, the rules that
/// already fired (a rule fires at most once per context), processor outputs
/// and the cumulative duration and timeout counters.
pub struct WafListener {
    ruleset: Arc<CompiledRuleset>,
    obfuscator: Arc<Obfuscator>,
    timeout: Duration,
    limits: EvaluationLimits,
    schema_extraction: bool,
    addresses: HashMap<Address, BatchId>,
    fired: HashSet<usize>,
    processor_outputs: BTreeMap<String, String>,
    /// Microseconds.
    total_duration: f64,
    timeouts: u64,
}

impl WafListener {
    pub fn new(ruleset: Arc<CompiledRuleset>, obfuscator: Arc<Obfuscator>, options: &InstanceOptions) -> Self {
        Self {
            ruleset,
            obfuscator,
            timeout: options.timeout,
            limits: options.limits,
            schema_extraction: options.schema_extraction,
            addresses: HashMap::new(),
            fired: HashSet::new(),
            processor_outputs: BTreeMap::new(),
            total_duration: 0.0,
            timeouts: 0,
        }
    }

    fn evaluate(&mut self, store: &ObjectStore, fresh: &HashSet<Address>, deadline: Instant) -> Result<Verdict> {
        let ruleset = self.ruleset.clone();
        let ctx = EvalContext::new(store, &self.addresses, self.limits, deadline);
        ctx.check_deadline()?;

        let mut event = Event::default();
        let mut newly_fired = Vec::new();
        for (idx, rule) in ruleset.rules.iter().enumerate() {
            if self.fired.contains(&idx) || !rule.addresses().any(|a| fresh.contains(a)) {
                continue;
            }
            ctx.check_deadline()?;

            let Some(matches) = match_rule(&ctx, rule)? else {
                continue;
            };
            tracing::trace!(rule_id = %rule.id, conditions = matches.len(), "Rule matched");
            event.data.push(serialize_fragment(rule, &matches, &self.obfuscator)?);
            ruleset
                .actions
                .resolve_into(rule.on_match.iter().map(String::as_str), &mut event.actions);
            newly_fired.push(idx);
        }

        let mut outputs = BTreeMap::new();
        for processor in ruleset.processors.iter().filter(|p| p.output) {
            if !self.schema_extraction && matches!(processor.generator, Generator::ExtractSchema { .. }) {
                continue;
            }
            ctx.check_deadline()?;
            processor.run(&ctx, fresh, &self.limits, &mut outputs)?;
        }

        ctx.check_deadline()?;
        self.fired.extend(newly_fired);
        self.processor_outputs.extend(outputs);
        Ok(Verdict::from_event(event))
    }
}

impl Listener for WafListener {
    fn call(&mut self, store: &ObjectStore, batch: BatchId, timeout: Duration) -> Result<Verdict> {
        let start = Instant::now();
        let data = store
            .get(batch)
            .ok_or_else(|| AppsecError::invalid_input(".", "unknown batch"))?;
        if !data.is_map() {
            return Err(AppsecError::invalid_input(".", "not a map"));
        }

        let mut fresh = HashSet::new();
        for key in data.keys() {
            if let Some(address) = self.ruleset.addresses.get(key) {
                self.addresses.insert(address.clone(), batch);
                fresh.insert(address.clone());
            }
        }
        if fresh.is_empty() {
            return Ok(Verdict::default());
        }

        let deadline = start + timeout.min(self.timeout);
        let result = self.evaluate(store, &fresh, deadline);

        self.total_duration += start.elapsed().as_secs_f64() * 1_000_000.0;
        if let Err(AppsecError::Timeout) = &result {
            self.timeouts += 1;
            tracing::debug!(timeouts = self.timeouts, "WAF call exceeded its budget");
        }
        result
    }

    fn get_meta_and_metrics(&self, meta: &mut Meta, metrics: &mut Metrics) {
        if let Some(version) = &self.ruleset.version {
            meta.insert(tags::EVENT_RULES_VERSION.to_string(), version.clone());
        }
        for (tag, value) in &self.processor_outputs {
            meta.insert(tag.clone(), value.clone());
        }
        add_metric(metrics, tags::WAF_DURATION, self.total_duration);
        add_metric(metrics, tags::WAF_TIMEOUTS, self.timeouts as f64);
    }
}

/// One record per condition when every condition matches.
fn match_rule(ctx: &EvalContext<'_>, rule: &Rule) -> Result<Option<Vec<MatchRecord>>> {
    let mut matches = Vec::with_capacity(rule.conditions.len());
    for condition in &rule.conditions {
        match ctx.match_condition(condition, &rule.transformers)? {
            Some(record) => matches.push(record),
            None => return Ok(None),
        }
    }
    Ok(Some(matches))
}

fn serialize_fragment(rule: &Rule, matches: &[MatchRecord], obfuscator: &Obfuscator) -> Result<String> {
    let rule_matches = rule
        .conditions
        .iter()
        .zip(matches)
        .map(|(condition, record)| {
            let redact = obfuscator.should_redact(&record.key_path, &record.value);
            let (value, highlight) = if redact {
                (REDACTED, REDACTED)
            } else {
                (record.value.as_str(), record.highlight.as_str())
            };
            ConditionMatch {
                operator: &condition.operator.name,
                operator_value: &condition.operator.value,
                parameters: vec![MatchParameter {
                    address: &record.address,
                    key_path: &record.key_path,
                    value,
                    highlight: vec![highlight],
                }],
            }
        })
        .collect();

    let fragment = RuleFragment {
        rule: RuleInfo {
            id: &rule.id,
            name: &rule.name,
            tags: &rule.tags,
        },
        rule_matches,
    };
    Ok(serde_json::to_string(&fragment)?)
}
