//! Operator and transformer registry for rule conditions.
//!
//! The matcher system separates compilation from evaluation:
//! - **Compilation Phase**: [`MatcherBuilder`] turns each condition into a
//!   [`CompiledOperator`] (regex, phrase automaton, IP networks and rule data
//!   captured up front) and each transformer name into a [`Transformer`].
//! - **Evaluation Phase**: [`EvalContext`] walks the published data under
//!   a condition's targets and runs the transformed string leaves through
//!   the operator.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use appsec_engine::matcher::MatcherBuilder;
//!
//! let builder = MatcherBuilder::new();
//! let op = builder.operator("phrase_match", &json!({"list": ["union select"]}), &RuleDataSet::new())?;
//! assert!(op.matches("1 UNION SELECT password").is_some());
//! ```

pub mod advanced;
pub mod builder;
pub mod context;
pub mod defaults;
pub mod modifiers;
pub mod types;

pub use advanced::IpNetwork;
pub use builder::MatcherBuilder;
pub use context::{EvalContext, MatchRecord};
pub use defaults::register_defaults;
pub use modifiers::register_transformers;
pub use types::{CompiledOperator, MatchFn, ModifierFn, OperatorFactory, Transformer};
