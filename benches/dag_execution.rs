//! Evaluation throughput benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};
use sigma_dag::{EngineConfig, SigmaEngine};

fn rule_set(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            format!(
                r#"
title: Rule {i}
detection:
    selection:
        EventID: "{}"
        CommandLine|contains: pattern_{}
    condition: selection
"#,
                4600 + (i % 100),
                i % 25
            )
        })
        .collect()
}

fn matching_event() -> Value {
    json!({
        "EventID": "4624",
        "CommandLine": "powershell.exe pattern_12 -enc AAAA",
        "User": "SYSTEM"
    })
}

fn non_matching_event() -> Value {
    json!({
        "EventID": "9999",
        "CommandLine": "svchost.exe -k netsvcs",
        "User": "SYSTEM"
    })
}

fn bench_single_event(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_event");
    for rule_count in [10, 100, 1000] {
        let rules = rule_set(rule_count);
        let rule_refs: Vec<&str> = rules.iter().map(String::as_str).collect();
        let mut engine = SigmaEngine::from_rules(&rule_refs).unwrap();
        let hit = matching_event();
        let miss = non_matching_event();

        group.bench_with_input(
            BenchmarkId::new("matching", rule_count),
            &rule_count,
            |b, _| b.iter(|| engine.evaluate(black_box(&hit)).unwrap()),
        );
        group.bench_with_input(
            BenchmarkId::new("non_matching", rule_count),
            &rule_count,
            |b, _| b.iter(|| engine.evaluate(black_box(&miss)).unwrap()),
        );
    }
    group.finish();
}

fn bench_batch(c: &mut Criterion) {
    let rules = rule_set(200);
    let rule_refs: Vec<&str> = rules.iter().map(String::as_str).collect();
    let events: Vec<Value> = (0..512)
        .map(|i| {
            if i % 10 == 0 {
                matching_event()
            } else {
                non_matching_event()
            }
        })
        .collect();

    let mut group = c.benchmark_group("batch_512");
    let mut sequential = SigmaEngine::from_rules(&rule_refs).unwrap();
    group.bench_function("sequential", |b| {
        b.iter(|| sequential.evaluate_batch(black_box(&events)).unwrap())
    });

    let mut parallel = SigmaEngine::from_rules_with_config(
        &rule_refs,
        EngineConfig::new().with_parallel_processing(true),
    )
    .unwrap();
    group.bench_function("parallel", |b| {
        b.iter(|| parallel.evaluate_batch(black_box(&events)).unwrap())
    });
    group.finish();
}

fn bench_prefilter(c: &mut Criterion) {
    let rules = rule_set(500);
    let rule_refs: Vec<&str> = rules.iter().map(String::as_str).collect();
    let raw_miss = non_matching_event().to_string();

    let mut engine = SigmaEngine::from_rules(&rule_refs).unwrap();
    c.bench_function("prefilter_raw_miss", |b| {
        b.iter(|| engine.evaluate_raw(black_box(&raw_miss)).unwrap())
    });
}

criterion_group!(benches, bench_single_event, bench_batch, bench_prefilter);
criterion_main!(benches);
