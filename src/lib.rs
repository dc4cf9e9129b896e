//! # AppSec Engine
//!
//! A runtime security-inspection engine embedded in a host application.
//! The host publishes request data (headers, query, body, client IP,
//! session identifiers) into a per-request [`Context`]; the [`Engine`]
//! routes it to the subscribers interested in those addresses, chiefly a
//! WAF [`Instance`], and returns the most severe [`Verdict`] together with
//! tags and counters describing the evaluation.
//!
//! ## Quick Start
//!
//! ```rust
//! use appsec_engine::{Engine, Instance, Meta, Metrics, Parameter, Severity};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! let rules = r#"{
//!     "version": "2.1",
//!     "metadata": {"rules_version": "1.2.3"},
//!     "rules": [{
//!         "id": "1", "name": "rule1", "tags": {"type": "flow1"},
//!         "conditions": [{"operator": "match_regex",
//!                         "parameters": {"inputs": [{"address": "arg1"}], "regex": "^string.*"}}]
//!     }]
//! }"#;
//!
//! let mut meta = Meta::new();
//! let mut metrics = Metrics::new();
//! let engine = Engine::new();
//! engine.subscribe(Instance::from_json(rules, &mut meta, &mut metrics)?);
//!
//! // One context per request
//! let mut context = engine.create_context();
//! let verdict = context.publish(
//!     Parameter::from(json!({"arg1": "string 1"})),
//!     Duration::from_millis(10),
//! )?;
//! assert_eq!(verdict.severity, Severity::Record);
//! assert_eq!(verdict.event.data.len(), 1);
//! # Ok::<(), appsec_engine::AppsecError>(())
//! ```
//!
//! ### Rule Data Updates
//!
//! ```rust,ignore
//! let update = Parameter::from(json!({"rules_data": [{
//!     "id": "blocked_ips", "type": "ip_with_expiration",
//!     "data": [{"value": "192.168.1.1", "expiration": 0}]
//! }]}));
//!
//! // Contexts created before the update keep the previous rules.
//! engine.update(&update, &mut meta, &mut metrics)?;
//! ```

pub mod action;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod ir;
pub mod matcher;
pub mod obfuscator;
pub mod parameter;
pub mod processor;
pub mod result;
pub mod ruleset;
pub mod store;
pub mod subscriber;
pub mod tags;

// Dispatch
pub use engine::{Context, Engine, SubscriberFailure, SubscriberId};
pub use store::{BatchId, ObjectStore};

// Subscriber contract and the WAF subscriber
pub use subscriber::{Address, Instance, InstanceOptions, Listener, Meta, Metrics, Subscriber, WafListener};

// Data model
pub use action::{Action, ActionTable, ActionType};
pub use parameter::{Parameter, PathSegment};
pub use result::{Event, Severity, Verdict};

// Rules, configuration and errors
pub use compiler::Compiler;
pub use config::{EngineSettings, EvaluationLimits};
pub use error::{AppsecError, Result};
pub use ir::{CompileReport, CompiledRuleset};
pub use matcher::MatcherBuilder;
pub use obfuscator::Obfuscator;
pub use ruleset::EngineRuleset;
