//! Evaluation outcomes: severity, events and the aggregated verdict.

use crate::action::Action;
use serde::Serialize;

/// How severe an outcome is. Ordering is significant: aggregation keeps the
/// highest value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    None,
    /// Something matched; report it but let the request through.
    Record,
    /// A blocking action was produced.
    Block,
}

/// Serialized rule matches plus the actions they resolved to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    /// One JSON document per firing rule.
    pub data: Vec<String>,
    pub actions: Vec<Action>,
}

impl Event {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.actions.is_empty()
    }

    /// Severity implied by the event contents.
    pub fn severity(&self) -> Severity {
        if self.actions.iter().any(|a| a.action_type.is_blocking()) {
            Severity::Block
        } else if !self.data.is_empty() || !self.actions.is_empty() {
            Severity::Record
        } else {
            Severity::None
        }
    }
}

/// Result of one publish (or one listener call).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verdict {
    pub severity: Severity,
    pub event: Event,
}

impl Verdict {
    pub fn from_event(event: Event) -> Self {
        Self {
            severity: event.severity(),
            event,
        }
    }

    /// Replace `self` with `other` when `other` is strictly more severe;
    /// on ties the current verdict is kept.
    pub fn merge_most_severe(&mut self, other: Verdict) {
        if other.severity > self.severity {
            *self = other;
        }
    }
}
