//! Publish benchmarks for the AppSec engine.
//!
//! Measures a full request round trip (context creation, publish, tag
//! collection) against rulesets of increasing size, plus ruleset
//! compilation on its own.

use appsec_engine::{Compiler, Engine, Instance, Meta, Metrics, Parameter};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_millis(50);

fn generate_rule(id: usize) -> Value {
    let (address, operator, parameters) = match id % 3 {
        0 => (
            "server.request.headers.no_cookies",
            "match_regex",
            json!({"regex": format!("^scanner-{id}(/[0-9.]+)?$")}),
        ),
        1 => (
            "server.request.query",
            "phrase_match",
            json!({"list": [format!("payload{id}"), format!("union select {id}")]}),
        ),
        _ => (
            "http.client_ip",
            "ip_match",
            json!({"list": [format!("10.{}.{}.0/24", id / 256 % 256, id % 256)]}),
        ),
    };

    let mut parameters = parameters;
    parameters["inputs"] = json!([{"address": address}]);
    json!({
        "id": format!("bench-{id:04}"),
        "name": format!("Benchmark rule {id}"),
        "tags": {"type": "bench", "category": "attack_attempt"},
        "conditions": [{"operator": operator, "parameters": parameters}],
        "transformers": ["lowercase"]
    })
}

fn generate_ruleset(rule_count: usize) -> Value {
    json!({
        "version": "2.1",
        "metadata": {"rules_version": "1.0.0"},
        "rules": (0..rule_count).map(generate_rule).collect::<Vec<_>>(),
        "processors": [{
            "id": "http-header-fingerprint",
            "generator": "http_header_fingerprint",
            "parameters": {"mappings": [{
                "headers": [{"address": "server.request.headers.no_cookies"}],
                "output": "_dd.appsec.fp.http.header"
            }]},
            "evaluate": false,
            "output": true
        }]
    })
}

fn setup_engine(rule_count: usize) -> Engine {
    let rules = generate_ruleset(rule_count).to_string();
    let engine = Engine::new();
    if let Ok(waf) = Instance::from_json(&rules, &mut Meta::new(), &mut Metrics::new()) {
        engine.subscribe(waf);
    }
    engine
}

fn request() -> Value {
    json!({
        "server.request.headers.no_cookies": {
            "user-agent": "Mozilla/5.0",
            "accept": "text/html",
            "x-forwarded-for": "192.168.1.10"
        },
        "server.request.query": {"q": ["search terms"], "page": "2"},
        "http.client_ip": "192.168.1.10"
    })
}

fn bench_publish_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_scaling");

    for rule_count in [10, 100, 500, 1000].iter() {
        let engine = setup_engine(*rule_count);
        let data = request();

        group.bench_with_input(BenchmarkId::new("clean_request", rule_count), rule_count, |b, _| {
            b.iter(|| {
                let mut context = engine.create_context();
                let verdict = context.publish(Parameter::from(black_box(data.clone())), TIMEOUT);
                let mut meta = Meta::new();
                let mut metrics = Metrics::new();
                context.get_meta_and_metrics(&mut meta, &mut metrics);
                black_box((verdict, meta, metrics))
            })
        });
    }

    group.finish();
}

fn bench_publish_matching(c: &mut Criterion) {
    let engine = setup_engine(100);
    let data = json!({
        "server.request.headers.no_cookies": {"user-agent": "Scanner-3/1.0"},
        "server.request.query": {"q": "1 UNION SELECT 1"},
        "http.client_ip": "10.0.2.7"
    });

    c.bench_function("publish_matching_request", |b| {
        b.iter(|| {
            let mut context = engine.create_context();
            black_box(context.publish(Parameter::from(black_box(data.clone())), TIMEOUT))
        })
    });
}

fn bench_compilation(c: &mut Criterion) {
    let mut group = c.benchmark_group("compilation");

    for rule_count in [10, 100, 1000].iter() {
        let document = generate_ruleset(*rule_count);
        group.bench_with_input(BenchmarkId::new("compile", rule_count), rule_count, |b, _| {
            let compiler = Compiler::new();
            b.iter(|| black_box(compiler.compile(black_box(&document))))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_publish_scaling, bench_publish_matching, bench_compilation);
criterion_main!(benches);
