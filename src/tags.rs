//! Meta and metric tag names reported by subscribers.

pub const WAF_VERSION: &str = "_dd.appsec.waf.version";
pub const WAF_DURATION: &str = "_dd.appsec.waf.duration";
pub const WAF_TIMEOUTS: &str = "_dd.appsec.waf.timeouts";

pub const EVENT_RULES_VERSION: &str = "_dd.appsec.event_rules.version";
pub const EVENT_RULES_LOADED: &str = "_dd.appsec.event_rules.loaded";
pub const EVENT_RULES_FAILED: &str = "_dd.appsec.event_rules.error_count";
pub const EVENT_RULES_ERRORS: &str = "_dd.appsec.event_rules.errors";

/// Version string reported under [`WAF_VERSION`].
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
