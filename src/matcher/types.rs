//! Core type definitions for the operator and transformer registry.

use crate::compiler::rule_data::RuleDataSet;
use crate::error::AppsecError;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Compiled match function.
///
/// Takes one (already transformed) string leaf and returns the highlighted
/// fragment when it matches. Everything the operator needs (regex, phrase
/// automaton, rule data) is captured at compile time.
///
/// # Example
/// ```rust,ignore
/// let starts_with_admin: MatchFn = Arc::new(|value| {
///     value.starts_with("admin").then(|| "admin".to_string())
/// });
/// assert_eq!(starts_with_admin("admin/panel"), Some("admin".to_string()));
/// ```
pub type MatchFn = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Builds a [`CompiledOperator`] from a condition's `parameters` object and
/// the rule data available to the ruleset.
///
/// Errors carry the per-rule failure reason reported in diagnostics.
pub type OperatorFactory =
    Arc<dyn Fn(&Value, &RuleDataSet) -> Result<CompiledOperator, AppsecError> + Send + Sync>;

/// Transformer applied to a value before it reaches the operator.
///
/// An error leaves the value untouched; the chain continues with the next
/// transformer.
///
/// # Example
/// ```rust,ignore
/// let lowercase: ModifierFn = Arc::new(|input| Ok(input.to_lowercase()));
/// ```
pub type ModifierFn = Arc<dyn Fn(&str) -> Result<String, AppsecError> + Send + Sync>;

/// An operator ready for evaluation.
#[derive(Clone)]
pub struct CompiledOperator {
    /// Operator name as declared in the rule (`match_regex`, ...).
    pub name: String,
    /// Value reported as `operator_value` in match fragments.
    pub value: String,
    pub match_fn: MatchFn,
}

impl CompiledOperator {
    pub fn new(name: impl Into<String>, value: impl Into<String>, match_fn: MatchFn) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            match_fn,
        }
    }

    pub fn matches(&self, value: &str) -> Option<String> {
        (self.match_fn)(value)
    }
}

impl fmt::Debug for CompiledOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledOperator")
            .field("name", &self.name)
            .field("value", &self.value)
            .finish()
    }
}

/// A named transformer.
#[derive(Clone)]
pub struct Transformer {
    pub name: String,
    pub modifier: ModifierFn,
}

impl Transformer {
    pub fn apply(&self, input: &str) -> Option<String> {
        (self.modifier)(input).ok()
    }
}

impl fmt::Debug for Transformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Transformer").field(&self.name).finish()
    }
}
