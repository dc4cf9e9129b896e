//! Processors: rule-adjacent generators that turn published data into meta
//! tags (schemas, fingerprints) instead of matches.
//!
//! A processor declares one or more mappings, each binding named inputs to
//! targets and naming the output tag:
//!
//! ```json
//! {"id": "processor-001", "generator": "extract_schema",
//!  "parameters": {"mappings": [{"inputs": [{"address": "arg2"}], "output": "_dd.appsec.s.arg2"}],
//!                 "scanners": [{"tags": {"category": "pii"}}]},
//!  "evaluate": false, "output": true}
//! ```

pub mod fingerprint;
pub mod scanner;
pub mod schema;

use crate::config::EvaluationLimits;
use crate::error::Result;
use crate::ir::Target;
use crate::matcher::EvalContext;
use crate::parameter::Parameter;
use crate::subscriber::Address;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

pub use scanner::Scanner;

#[derive(Debug, Clone)]
pub enum Generator {
    ExtractSchema { scanners: Vec<Arc<Scanner>> },
    EndpointFingerprint,
    NetworkFingerprint,
    HeaderFingerprint,
    SessionFingerprint,
}

impl Generator {
    pub fn name(&self) -> &'static str {
        match self {
            Generator::ExtractSchema { .. } => "extract_schema",
            Generator::EndpointFingerprint => "http_endpoint_fingerprint",
            Generator::NetworkFingerprint => "http_network_fingerprint",
            Generator::HeaderFingerprint => "http_header_fingerprint",
            Generator::SessionFingerprint => "session_fingerprint",
        }
    }

    /// Input names each mapping must (or may) bind.
    pub fn input_names(&self) -> &'static [&'static str] {
        match self {
            Generator::ExtractSchema { .. } => &["inputs"],
            Generator::EndpointFingerprint => &["method", "uri_raw", "query", "body"],
            Generator::NetworkFingerprint | Generator::HeaderFingerprint => &["headers"],
            Generator::SessionFingerprint => &["cookies", "session_id", "user_id"],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Mapping {
    pub inputs: BTreeMap<String, Vec<Target>>,
    pub output: String,
}

impl Mapping {
    fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.inputs.values().flatten().map(|t| &t.address)
    }

    /// First resolvable target bound to `name`.
    fn resolve<'a>(&self, name: &str, ctx: &EvalContext<'a>) -> Option<&'a Parameter> {
        self.inputs
            .get(name)?
            .iter()
            .find_map(|target| ctx.resolve(target))
    }
}

#[derive(Debug, Clone)]
pub struct Processor {
    pub id: String,
    pub generator: Generator,
    pub mappings: Vec<Mapping>,
    /// Whether the outputs are reported as meta tags.
    pub output: bool,
    /// Whether the outputs would be fed back to rules. Recorded only.
    pub evaluate: bool,
}

impl Processor {
    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.mappings.iter().flat_map(Mapping::addresses)
    }

    /// Run every mapping with at least one input in `fresh`, writing each
    /// output (possibly empty) into `outputs`.
    pub fn run(
        &self,
        ctx: &EvalContext<'_>,
        fresh: &HashSet<Address>,
        limits: &EvaluationLimits,
        outputs: &mut BTreeMap<String, String>,
    ) -> Result<()> {
        for mapping in &self.mappings {
            if !mapping.addresses().any(|a| fresh.contains(a)) {
                continue;
            }

            let value = match &self.generator {
                Generator::ExtractSchema { scanners } => {
                    // Only the input that was just published is described.
                    let Some(value) = mapping
                        .inputs
                        .values()
                        .flatten()
                        .filter(|t| fresh.contains(&t.address))
                        .find_map(|t| ctx.resolve(t))
                    else {
                        continue;
                    };
                    Some(schema::extract_schema(value, scanners, limits, ctx.deadline())?)
                }
                Generator::EndpointFingerprint => fingerprint::endpoint(
                    mapping.resolve("method", ctx),
                    mapping.resolve("uri_raw", ctx),
                    mapping.resolve("query", ctx),
                    mapping.resolve("body", ctx),
                ),
                Generator::NetworkFingerprint => fingerprint::network(mapping.resolve("headers", ctx)),
                Generator::HeaderFingerprint => fingerprint::header(mapping.resolve("headers", ctx)),
                Generator::SessionFingerprint => fingerprint::session(
                    mapping.resolve("cookies", ctx),
                    mapping.resolve("session_id", ctx),
                    mapping.resolve("user_id", ctx),
                ),
            };

            tracing::trace!(processor = %self.id, output = %mapping.output, "Processor produced output");
            outputs.insert(mapping.output.clone(), value.unwrap_or_default());
        }
        Ok(())
    }
}
