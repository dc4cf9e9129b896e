//! Hot rule-data updates through the engine
//!
//! Covers the full round trip: a WAF subscriber registered with a rule that
//! references rule data, updated through `Engine::update`, with contexts
//! created before and after the swap.

use appsec_engine::tags;
use appsec_engine::{ActionType, AppsecError, Engine, Instance, Meta, Metrics, Parameter, Severity};
use serde_json::{json, Value};
use std::time::Duration;

const RULES: &str = r#"{
    "version": "2.1",
    "metadata": {"rules_version": "1.0.0"},
    "rules": [
        {
            "id": "blk-001-001",
            "name": "Block IP Addresses",
            "tags": {"type": "block_ip", "category": "security_response"},
            "conditions": [
                {"operator": "ip_match", "parameters": {"inputs": [{"address": "http.client_ip"}], "data": "blocked_ips"}}
            ],
            "on_match": ["block"]
        },
        {
            "id": "usr-001-001",
            "name": "Flag users",
            "tags": {"type": "block_user", "category": "security_response"},
            "conditions": [
                {"operator": "exact_match", "parameters": {"inputs": [{"address": "usr.id"}], "data": "flagged_users"}}
            ]
        }
    ]
}"#;

const TIMEOUT: Duration = Duration::from_millis(100);

fn engine() -> Engine {
    let engine = Engine::new();
    engine.subscribe(Instance::from_json(RULES, &mut Meta::new(), &mut Metrics::new()).unwrap());
    engine
}

fn blocked_ips(values: &[&str]) -> Value {
    json!({
        "id": "blocked_ips",
        "type": "ip_with_expiration",
        "data": values.iter().map(|v| json!({"value": v, "expiration": 0})).collect::<Vec<_>>()
    })
}

fn severity_for(engine: &Engine, data: Value) -> Severity {
    let mut context = engine.create_context();
    context.publish(Parameter::from(data), TIMEOUT).unwrap().severity
}

#[test]
fn test_update_round_trip() {
    let engine = engine();
    let before = engine.version();
    assert_eq!(severity_for(&engine, json!({"http.client_ip": "10.0.0.1"})), Severity::None);

    let mut meta = Meta::new();
    let mut metrics = Metrics::new();
    engine
        .update(
            &Parameter::from(json!({"rules_data": [blocked_ips(&["10.0.0.0/8"])]})),
            &mut meta,
            &mut metrics,
        )
        .unwrap();

    assert_eq!(engine.version(), before + 1);
    assert_eq!(meta[tags::EVENT_RULES_VERSION], "1.0.0");
    assert_eq!(metrics[tags::EVENT_RULES_LOADED], 2.0);

    let mut context = engine.create_context();
    let verdict = context
        .publish(Parameter::from(json!({"http.client_ip": "10.0.0.1"})), TIMEOUT)
        .unwrap();
    assert_eq!(verdict.severity, Severity::Block);
    assert_eq!(verdict.event.actions[0].action_type, ActionType::Block);
    assert_eq!(verdict.event.actions[0].parameter("status_code"), Some("403"));
}

#[test]
fn test_context_in_flight_keeps_old_rules() {
    let engine = engine();
    let mut in_flight = engine.create_context();

    engine
        .update(
            &Parameter::from(json!({"rules_data": [blocked_ips(&["192.168.1.1"])]})),
            &mut Meta::new(),
            &mut Metrics::new(),
        )
        .unwrap();

    let verdict = in_flight
        .publish(Parameter::from(json!({"http.client_ip": "192.168.1.1"})), TIMEOUT)
        .unwrap();
    assert_eq!(verdict.severity, Severity::None);
    assert_eq!(severity_for(&engine, json!({"http.client_ip": "192.168.1.1"})), Severity::Block);
}

#[test]
fn test_updates_accumulate_per_data_id() {
    let engine = engine();
    let mut meta = Meta::new();
    let mut metrics = Metrics::new();

    engine
        .update(
            &Parameter::from(json!({"rules_data": [blocked_ips(&["192.168.1.1"])]})),
            &mut meta,
            &mut metrics,
        )
        .unwrap();
    engine
        .update(
            &Parameter::from(json!({"rules_data": [{
                "id": "flagged_users",
                "type": "data_with_expiration",
                "data": [{"value": "admin", "expiration": 0}]
            }]})),
            &mut meta,
            &mut metrics,
        )
        .unwrap();

    // Both data sets are live after the second update.
    assert_eq!(severity_for(&engine, json!({"http.client_ip": "192.168.1.1"})), Severity::Block);
    assert_eq!(severity_for(&engine, json!({"usr.id": "admin"})), Severity::Record);
    assert_eq!(severity_for(&engine, json!({"usr.id": "guest"})), Severity::None);
}

#[test]
fn test_override_disables_rule() {
    let engine = engine();
    engine
        .update(
            &Parameter::from(json!({
                "rules_data": [blocked_ips(&["192.168.1.1"])],
                "rules_override": [{"rules_target": [{"rule_id": "blk-001-001"}], "enabled": false}]
            })),
            &mut Meta::new(),
            &mut Metrics::new(),
        )
        .unwrap();

    assert_eq!(severity_for(&engine, json!({"http.client_ip": "192.168.1.1"})), Severity::None);
}

#[test]
fn test_invalid_updates_leave_engine_intact() {
    let engine = engine();
    engine
        .update(
            &Parameter::from(json!({"rules_data": [blocked_ips(&["192.168.1.1"])]})),
            &mut Meta::new(),
            &mut Metrics::new(),
        )
        .unwrap();
    let version = engine.version();

    for update in [
        json!({}),
        json!([]),
        json!({"rules_data": "blocked_ips"}),
        json!({"rules_data": [{"id": "blocked_ips", "type": "ip_with_expiration"}]}),
    ] {
        let err = engine
            .update(&Parameter::from(update), &mut Meta::new(), &mut Metrics::new())
            .unwrap_err();
        assert!(matches!(err, AppsecError::InvalidInput { .. }), "{err}");
    }

    assert_eq!(engine.version(), version);
    assert_eq!(severity_for(&engine, json!({"http.client_ip": "192.168.1.1"})), Severity::Block);
}
