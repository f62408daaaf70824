//! Benchmarks for pipeline execution.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use stagepipe::prelude::*;
use stagepipe::stages::{mask_value, DEFAULT_MASK};

fn pipeline_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");

    let pipeline = Pipeline::new()
        .add_stage(ValidationStage::new().require("must be positive", |x: &i64| *x > 0))
        .add_stage(TransformationStage::new(|x: i64| Ok(x * 2)))
        .add_stage(FnStage::new("stringify", |x: i64| Ok(x.to_string())));

    c.bench_function("three_stage_pipeline", |b| {
        b.iter(|| runtime.block_on(pipeline.execute(black_box(21))))
    });
}

fn masking_benchmark(c: &mut Criterion) {
    let users: Vec<_> = (0..100)
        .map(|i| json!({ "email": format!("user{i}@example.com"), "password": "secret" }))
        .collect();
    let payload = json!({ "token": "abc", "users": users });
    let paths = ["token", "users.*.password"];

    c.bench_function("mask_100_users", |b| {
        b.iter(|| mask_value(black_box(&payload), &paths, DEFAULT_MASK))
    });
}

criterion_group!(benches, pipeline_benchmark, masking_benchmark);
criterion_main!(benches);
