//! Registry of operators and transformers used while compiling rules.

use crate::compiler::rule_data::RuleDataSet;
use crate::error::{AppsecError, Result};
use crate::matcher::types::{CompiledOperator, ModifierFn, OperatorFactory, Transformer};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Builder for compiled operators and transformer chains, using the registry
/// pattern.
///
/// Every operator is an [`OperatorFactory`] keyed by the name used in rule
/// conditions; every transformer a [`ModifierFn`] keyed by the name used in a
/// rule's `transformers` list. Custom entries can be registered next to the
/// defaults.
///
/// # Example
/// ```rust,ignore
/// use appsec_engine::matcher::MatcherBuilder;
///
/// let mut builder = MatcherBuilder::new();
/// builder.register_modifier("uppercase", |input| Ok(input.to_uppercase()));
/// let op = builder.operator("match_regex", &json!({"regex": "^admin"}), &RuleDataSet::new())?;
/// ```
#[derive(Clone)]
pub struct MatcherBuilder {
    /// Registry of operator factories by operator name
    operator_registry: HashMap<String, OperatorFactory>,

    /// Registry of transformers by name
    modifier_registry: HashMap<String, ModifierFn>,
}

impl MatcherBuilder {
    /// Create a builder with the default operators and transformers.
    pub fn new() -> Self {
        let mut builder = Self {
            operator_registry: HashMap::new(),
            modifier_registry: HashMap::new(),
        };
        crate::matcher::defaults::register_defaults(&mut builder.operator_registry);
        crate::matcher::modifiers::register_transformers(&mut builder.modifier_registry);
        builder
    }

    /// Register an operator factory.
    ///
    /// # Example
    /// ```rust,ignore
    /// builder.register_operator("equals_admin", |_params, _data| {
    ///     let match_fn: MatchFn = Arc::new(|v| (v == "admin").then(|| v.to_string()));
    ///     Ok(CompiledOperator::new("equals_admin", "admin", match_fn))
    /// });
    /// ```
    pub fn register_operator<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn(&Value, &RuleDataSet) -> Result<CompiledOperator> + Send + Sync + 'static,
    {
        self.operator_registry
            .insert(name.to_string(), Arc::new(factory));
        self
    }

    /// Register a transformer.
    pub fn register_modifier<F>(&mut self, name: &str, modifier: F) -> &mut Self
    where
        F: Fn(&str) -> Result<String> + Send + Sync + 'static,
    {
        self.modifier_registry
            .insert(name.to_string(), Arc::new(modifier));
        self
    }

    /// Compile the operator `name` with the condition's parameters.
    pub fn operator(&self, name: &str, params: &Value, data: &RuleDataSet) -> Result<CompiledOperator> {
        let factory = self
            .operator_registry
            .get(name)
            .ok_or_else(|| AppsecError::RuleCompilation(format!("unknown matcher: {name}")))?;
        factory(params, data)
    }

    /// Look up a transformer by name.
    pub fn modifier(&self, name: &str) -> Result<Transformer> {
        let modifier = self
            .modifier_registry
            .get(name)
            .ok_or_else(|| AppsecError::RuleCompilation(format!("unknown transformer: {name}")))?;
        Ok(Transformer {
            name: name.to_string(),
            modifier: modifier.clone(),
        })
    }

    /// Get the number of registered operators.
    pub fn operator_count(&self) -> usize {
        self.operator_registry.len()
    }

    /// Get the number of registered transformers.
    pub fn modifier_count(&self) -> usize {
        self.modifier_registry.len()
    }

    pub fn has_operator(&self, name: &str) -> bool {
        self.operator_registry.contains_key(name)
    }

    pub fn has_modifier(&self, name: &str) -> bool {
        self.modifier_registry.contains_key(name)
    }
}

impl Default for MatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}
