//! Redaction of sensitive values before they are serialized into events.

use crate::error::{AppsecError, Result};
use regex::Regex;

/// Placeholder written in place of redacted values.
pub const REDACTED: &str = "<Redacted>";

/// Key and value patterns identifying sensitive data.
///
/// A value is redacted when any segment of its key path matches the key
/// regex, or when the value itself matches the value regex. Either pattern
/// may be absent.
#[derive(Debug, Clone, Default)]
pub struct Obfuscator {
    key_regex: Option<Regex>,
    value_regex: Option<Regex>,
}

impl Obfuscator {
    /// Build from raw patterns; empty patterns are disabled.
    pub fn new(key_regex: &str, value_regex: &str) -> Result<Self> {
        Ok(Self {
            key_regex: compile(key_regex)?,
            value_regex: compile(value_regex)?,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.key_regex.is_some() || self.value_regex.is_some()
    }

    pub fn is_sensitive_key(&self, key_path: &[String]) -> bool {
        self.key_regex
            .as_ref()
            .is_some_and(|re| key_path.iter().any(|segment| re.is_match(segment)))
    }

    pub fn is_sensitive_value(&self, value: &str) -> bool {
        self.value_regex.as_ref().is_some_and(|re| re.is_match(value))
    }

    /// Whether a match at `key_path` with `value` must be redacted.
    pub fn should_redact(&self, key_path: &[String], value: &str) -> bool {
        self.is_sensitive_key(key_path) || self.is_sensitive_value(value)
    }
}

fn compile(pattern: &str) -> Result<Option<Regex>> {
    if pattern.is_empty() {
        return Ok(None);
    }
    Regex::new(pattern)
        .map(Some)
        .map_err(|e| AppsecError::InvalidRegex(format!("{pattern}: {e}")))
}
