//! Engine configuration.
//!
//! [`EngineSettings`] gathers everything the host decides when the engine is
//! set up: where rules come from, the evaluation budget, the obfuscation
//! policy and the traversal limits applied to published data.
//!
//! # Examples
//!
//! ```rust
//! use appsec_engine::EngineSettings;
//! use std::time::Duration;
//!
//! let settings = EngineSettings::default()
//!     .with_waf_timeout(Duration::from_millis(5))
//!     .with_obfuscator_key_regex("password");
//! assert!(settings.validate().is_ok());
//! ```

use crate::error::{AppsecError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Default evaluation budget per listener call.
pub const DEFAULT_WAF_TIMEOUT: Duration = Duration::from_micros(10_000);

/// Keys whose values are redacted from match reports.
pub const DEFAULT_OBFUSCATOR_KEY_REGEX: &str = r"(?i)(?:p(?:ass)?w(?:or)?d|pass(?:_?phrase)?|secret|(?:api_?|private_?|public_?)key)|token|consumer_?(?:id|key|secret)|sign(?:ed|ature)|bearer|authorization";

/// Values redacted from match reports regardless of their key.
pub const DEFAULT_OBFUSCATOR_VALUE_REGEX: &str = r#"(?i)(?:p(?:ass)?w(?:or)?d|pass(?:_?phrase)?|secret|(?:api_?|private_?|public_?|access_?|secret_?)key(?:_?id)?|token|consumer_?(?:id|key|secret)|sign(?:ed|ature)?|auth(?:entication|orization)?)(?:\s*=[^;]|"\s*:\s*"[^"]+")|bearer\s+[a-z0-9._\-]+|token:[a-z0-9]{13}|gh[opsu]_[0-9a-zA-Z]{36}|ey[I-L][\w=-]+\.ey[I-L][\w=-]+(?:\.[\w.+/=-]+)?|[\-]{5}BEGIN[a-z\s]+PRIVATE\sKEY[\-]{5}[^\-]+[\-]{5}END[a-z\s]+PRIVATE\sKEY|ssh-rsa\s*[a-z0-9/.+]{100,}"#;

/// Bounds applied while walking published data.
///
/// Anything beyond these limits is skipped, never reported as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationLimits {
    /// Maximum nesting depth of maps and arrays.
    pub max_container_depth: usize,
    /// Maximum number of children visited per container.
    pub max_container_size: usize,
    /// Strings longer than this are truncated before matching.
    pub max_string_length: usize,
}

impl Default for EvaluationLimits {
    fn default() -> Self {
        Self {
            max_container_depth: 20,
            max_container_size: 256,
            max_string_length: 4096,
        }
    }
}

/// Settings used to build an engine and its WAF subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Rules description on disk. `None` means the caller supplies the
    /// ruleset directly.
    pub rules_file: Option<PathBuf>,

    /// Default evaluation budget of each listener call.
    pub waf_timeout: Duration,

    /// Regex matched against key paths of reported values. Empty disables it.
    pub obfuscator_key_regex: String,

    /// Regex matched against reported values. Empty disables it.
    pub obfuscator_value_regex: String,

    /// Traversal limits for published data.
    pub limits: EvaluationLimits,

    /// Whether `extract_schema` processors run.
    pub schema_extraction: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            rules_file: None,
            waf_timeout: DEFAULT_WAF_TIMEOUT,
            obfuscator_key_regex: DEFAULT_OBFUSCATOR_KEY_REGEX.to_string(),
            obfuscator_value_regex: DEFAULT_OBFUSCATOR_VALUE_REGEX.to_string(),
            limits: EvaluationLimits::default(),
            schema_extraction: true,
        }
    }
}

impl EngineSettings {
    pub fn with_rules_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.rules_file = Some(path.into());
        self
    }

    pub fn with_waf_timeout(mut self, timeout: Duration) -> Self {
        self.waf_timeout = timeout;
        self
    }

    pub fn with_obfuscator_key_regex(mut self, regex: impl Into<String>) -> Self {
        self.obfuscator_key_regex = regex.into();
        self
    }

    pub fn with_obfuscator_value_regex(mut self, regex: impl Into<String>) -> Self {
        self.obfuscator_value_regex = regex.into();
        self
    }

    pub fn with_limits(mut self, limits: EvaluationLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_schema_extraction(mut self, enabled: bool) -> Self {
        self.schema_extraction = enabled;
        self
    }

    /// Check that the settings can be used to build a subscriber.
    pub fn validate(&self) -> Result<()> {
        if self.limits.max_container_depth == 0 {
            return Err(AppsecError::Configuration(
                "max_container_depth must be greater than zero".to_string(),
            ));
        }
        if self.limits.max_container_size == 0 {
            return Err(AppsecError::Configuration(
                "max_container_size must be greater than zero".to_string(),
            ));
        }
        for pattern in [&self.obfuscator_key_regex, &self.obfuscator_value_regex] {
            if !pattern.is_empty() {
                regex::Regex::new(pattern)
                    .map_err(|e| AppsecError::InvalidRegex(format!("{pattern}: {e}")))?;
            }
        }
        Ok(())
    }
}
