//! Compact structural schemas of published values.
//!
//! Scalars encode as a one-element array holding a type code; maps as
//! `[{key: schema}]`; arrays as `[[distinct element schemas], {"len": n}]`.
//! A string leaf flagged by a scanner carries the scanner tags:
//! `[8, {"category": "pii", "type": "email"}]`.

use crate::config::EvaluationLimits;
use crate::error::{AppsecError, Result};
use crate::parameter::Parameter;
use crate::processor::scanner::Scanner;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;

pub const TYPE_NULL: u8 = 1;
pub const TYPE_BOOL: u8 = 2;
pub const TYPE_INTEGER: u8 = 4;
pub const TYPE_STRING: u8 = 8;
pub const TYPE_FLOAT: u8 = 16;

/// Distinct element schemas kept per array.
const MAX_ARRAY_SCHEMAS: usize = 10;

/// Schema of `value` serialized as compact JSON. Fails with
/// [`AppsecError::Timeout`] when `deadline` passes mid-walk.
pub fn extract_schema(
    value: &Parameter,
    scanners: &[Arc<Scanner>],
    limits: &EvaluationLimits,
    deadline: Instant,
) -> Result<String> {
    let walk = SchemaWalk {
        scanners,
        limits,
        deadline,
    };
    Ok(walk.schema_of(value, None, 0)?.to_string())
}

struct SchemaWalk<'a> {
    scanners: &'a [Arc<Scanner>],
    limits: &'a EvaluationLimits,
    deadline: Instant,
}

impl SchemaWalk<'_> {
    fn schema_of(&self, value: &Parameter, key: Option<&str>, depth: usize) -> Result<Value> {
        if Instant::now() >= self.deadline {
            return Err(AppsecError::Timeout);
        }

        let schema = match value {
            Parameter::Null => json!([TYPE_NULL]),
            Parameter::Bool(_) => json!([TYPE_BOOL]),
            Parameter::Signed(_) | Parameter::Unsigned(_) => json!([TYPE_INTEGER]),
            Parameter::Float(_) => json!([TYPE_FLOAT]),
            Parameter::String(s) => match self.scanners.iter().find(|sc| sc.matches(key, s)) {
                Some(scanner) => json!([TYPE_STRING, scanner.tags]),
                None => json!([TYPE_STRING]),
            },
            Parameter::Map(entries) => {
                let mut object = Map::new();
                if depth < self.limits.max_container_depth {
                    for (k, child) in entries.iter().take(self.limits.max_container_size) {
                        object.insert(k.clone(), self.schema_of(child, Some(k), depth + 1)?);
                    }
                }
                json!([Value::Object(object)])
            }
            Parameter::Array(items) => {
                let mut distinct: Vec<Value> = Vec::new();
                if depth < self.limits.max_container_depth {
                    for child in items.iter().take(self.limits.max_container_size) {
                        if distinct.len() == MAX_ARRAY_SCHEMAS {
                            break;
                        }
                        let schema = self.schema_of(child, key, depth + 1)?;
                        if !distinct.contains(&schema) {
                            distinct.push(schema);
                        }
                    }
                }
                json!([distinct, {"len": items.len()}])
            }
        };
        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::MatcherBuilder;
    use std::time::Duration;

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    fn schema(value: serde_json::Value) -> String {
        extract_schema(&Parameter::from(value), &[], &EvaluationLimits::default(), far_deadline()).unwrap()
    }

    #[test]
    fn test_scalars() {
        assert_eq!(schema(json!("string 3")), "[8]");
        assert_eq!(schema(json!(null)), "[1]");
        assert_eq!(schema(json!(true)), "[2]");
        assert_eq!(schema(json!(-5)), "[4]");
        assert_eq!(schema(json!(1.5)), "[16]");
    }

    #[test]
    fn test_containers() {
        assert_eq!(schema(json!({"a": "x", "b": 1})), r#"[{"a":[8],"b":[4]}]"#);
        assert_eq!(schema(json!(["x", "y", 3])), r#"[[[8],[4]],{"len":3}]"#);
        assert_eq!(schema(json!([])), r#"[[],{"len":0}]"#);
    }

    #[test]
    fn test_scanner_tags() {
        let scanner = Scanner::from_value(
            &json!({
                "id": "email",
                "key": {"operator": "match_regex", "parameters": {"regex": "mail"}},
                "tags": {"type": "email", "category": "pii"}
            }),
            &MatcherBuilder::new(),
        )
        .unwrap();
        let out = extract_schema(
            &Parameter::from(json!({"email": "a@b.c", "name": "bob"})),
            &[Arc::new(scanner)],
            &EvaluationLimits::default(),
            far_deadline(),
        )
        .unwrap();
        assert_eq!(
            out,
            r#"[{"email":[8,{"category":"pii","type":"email"}],"name":[8]}]"#
        );
    }

    #[test]
    fn test_depth_limit() {
        let limits = EvaluationLimits {
            max_container_depth: 1,
            ..EvaluationLimits::default()
        };
        let out = extract_schema(&Parameter::from(json!({"a": {"b": 1}})), &[], &limits, far_deadline()).unwrap();
        assert_eq!(out, r#"[{"a":[{}]}]"#);
    }

    #[test]
    fn test_expired_deadline() {
        let value = Parameter::from(json!({"a": ["x", 1, null]}));
        let result = extract_schema(&value, &[], &EvaluationLimits::default(), Instant::now());
        assert_eq!(result, Err(AppsecError::Timeout));
    }
}
