//! Evaluation context: the data visible to one listener call.

use crate::config::EvaluationLimits;
use crate::error::{AppsecError, Result};
use crate::ir::{Condition, Target};
use crate::matcher::types::Transformer;
use crate::parameter::Parameter;
use crate::store::{BatchId, ObjectStore};
use crate::subscriber::Address;
use std::collections::HashMap;
use std::time::Instant;

/// A successful condition match, before obfuscation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRecord {
    pub address: Address,
    /// Path from the address root to the matched leaf.
    pub key_path: Vec<String>,
    pub value: String,
    pub highlight: String,
}

/// Read-only view over the batches a listener has seen, plus the budget of
/// the current call.
///
/// Each address resolves to the latest batch that carried it. String leaves
/// under a target are visited depth-first, bounded by [`EvaluationLimits`];
/// anything beyond the limits is skipped.
///
/// # Example
/// ```rust,ignore
/// let ctx = EvalContext::new(&store, &addresses, EvaluationLimits::default(), deadline);
/// if let Some(record) = ctx.match_condition(&condition, &rule.transformers)? {
///     println!("{} matched {}", record.address, record.highlight);
/// }
/// ```
pub struct EvalContext<'a> {
    store: &'a ObjectStore,
    addresses: &'a HashMap<Address, BatchId>,
    limits: EvaluationLimits,
    deadline: Instant,
}

impl<'a> EvalContext<'a> {
    pub fn new(
        store: &'a ObjectStore,
        addresses: &'a HashMap<Address, BatchId>,
        limits: EvaluationLimits,
        deadline: Instant,
    ) -> Self {
        Self {
            store,
            addresses,
            limits,
            deadline,
        }
    }

    /// Fails with [`AppsecError::Timeout`] once the deadline has passed.
    pub fn check_deadline(&self) -> Result<()> {
        if Instant::now() >= self.deadline {
            Err(AppsecError::Timeout)
        } else {
            Ok(())
        }
    }

    /// Value published under `address`, if any.
    pub fn get(&self, address: &str) -> Option<&'a Parameter> {
        let batch = self.addresses.get(address)?;
        self.store.get(*batch)?.get(address)
    }

    /// Value designated by `target`, following its key path.
    pub fn resolve(&self, target: &Target) -> Option<&'a Parameter> {
        self.get(&target.address)?.resolve(&target.key_path)
    }

    /// First string leaf of any target that matches the condition's operator
    /// once transformed.
    ///
    /// The deadline is checked before every leaf, so a large batch fails with
    /// [`AppsecError::Timeout`] instead of running past its budget.
    pub fn match_condition(&self, condition: &Condition, transformers: &[Transformer]) -> Result<Option<MatchRecord>> {
        for target in &condition.targets {
            let Some(root) = self.resolve(target) else {
                continue;
            };
            let mut path: Vec<String> = target.key_path.iter().map(ToString::to_string).collect();
            let found = self.find_leaf(root, &mut path, 0, &mut |key_path: &[String], leaf: &str| {
                let transformed = transform(leaf, transformers);
                let highlight = condition.operator.matches(&transformed)?;
                Some(MatchRecord {
                    address: target.address.clone(),
                    key_path: key_path.to_vec(),
                    value: leaf.to_string(),
                    highlight,
                })
            })?;
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    /// Depth-first search over string leaves, stopping at the first leaf for
    /// which `visit` returns a value.
    pub fn find_leaf<T, F>(
        &self,
        value: &'a Parameter,
        path: &mut Vec<String>,
        depth: usize,
        visit: &mut F,
    ) -> Result<Option<T>>
    where
        F: FnMut(&[String], &str) -> Option<T>,
    {
        match value {
            Parameter::String(s) => {
                self.check_deadline()?;
                Ok(visit(path, truncate(s, self.limits.max_string_length)))
            }
            Parameter::Map(entries) if depth < self.limits.max_container_depth => {
                for (key, child) in entries.iter().take(self.limits.max_container_size) {
                    path.push(key.clone());
                    let found = self.find_leaf(child, path, depth + 1, visit);
                    path.pop();
                    if let Some(found) = found.transpose() {
                        return found.map(Some);
                    }
                }
                Ok(None)
            }
            Parameter::Array(items) if depth < self.limits.max_container_depth => {
                for (idx, child) in items.iter().take(self.limits.max_container_size).enumerate() {
                    path.push(idx.to_string());
                    let found = self.find_leaf(child, path, depth + 1, visit);
                    path.pop();
                    if let Some(found) = found.transpose() {
                        return found.map(Some);
                    }
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

fn transform(value: &str, transformers: &[Transformer]) -> String {
    transformers
        .iter()
        .fold(value.to_string(), |current, t| t.apply(&current).unwrap_or(current))
}

/// Longest prefix of `s` no longer than `max` bytes, on a char boundary.
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
