//! Criterion benchmarks for suitegen-core.
//!
//! Everything here runs offline: model traffic goes through the scripted
//! backend and the cache lives in a temp directory.
//!
//! ## Benchmark groups
//!
//! 1. **schema**: DDL init + migration overhead.
//! 2. **syntax_check**: tree-sitter verdicts on clean and broken modules.
//! 3. **envelope**: code-fence extraction from replies of growing size.
//! 4. **hyperparams**: factory lookup and range validation.
//! 5. **cache**: write-once register and lookup.
//! 6. **entities**: entity extraction from a synthetic module.
//! 7. **pipeline**: one entity through generation and syntax repair.
//!
//! ## Running
//!
//! ```sh
//! cargo bench --manifest-path crates/suitegen-core/Cargo.toml
//! # Run only the cache group:
//! cargo bench --manifest-path crates/suitegen-core/Cargo.toml -- cache
//! ```

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rusqlite::Connection;

use suitegen_core::check::syntax::SyntacticChecker;
use suitegen_core::check::Checker;
use suitegen_core::config::GenerationConfig;
use suitegen_core::indexer::entities::extract_entities;
use suitegen_core::llm::accessor::ModelAccessor;
use suitegen_core::llm::catalog::known_model;
use suitegen_core::llm::chat::ChatSession;
use suitegen_core::llm::hyperparams::hyperparam_for;
use suitegen_core::llm::scripted::ScriptedBackend;
use suitegen_core::llm::tokenizer::estimate_tokens;
use suitegen_core::models::{Entity, EntityKind, Platform};
use suitegen_core::pipeline::driver::{PipelineDriver, PipelineWorker};
use suitegen_core::pipeline::envelope::ResponseEnvelope;
use suitegen_core::store::cache::CacheAccessor;
use suitegen_core::store::schema::{migrate_schema, SCHEMA_STATEMENTS};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A syntactically valid test module with `n` test functions.
fn synthetic_suite(n: usize) -> String {
    let mut out = String::from("import pytest\n\nfrom pkg.mod import foo\n\n");
    for i in 0..n {
        out.push_str(&format!(
            "\ndef test_foo_{i}():\n    assert foo({i}) == {}\n",
            i + 1
        ));
    }
    out
}

/// A focal module with `n` functions and one class of `n` methods.
fn synthetic_module(n: usize) -> String {
    let mut out = String::new();
    for i in 0..n {
        out.push_str(&format!("def func_{i}(x):\n    return x + {i}\n\n\n"));
    }
    out.push_str("class Widget:\n");
    for i in 0..n {
        out.push_str(&format!("    def method_{i}(self):\n        return {i}\n\n"));
    }
    out
}

fn ready_model(backend: &ScriptedBackend) -> ModelAccessor {
    let mut model = ModelAccessor::new(Box::new(backend.clone()));
    model.init(ChatSession::new([Platform::Ollama])).unwrap();
    model
        .select_model(known_model("qwen2.5-coder:7b").unwrap())
        .unwrap();
    model
}

// ---------------------------------------------------------------------------
// 1. Schema
// ---------------------------------------------------------------------------

fn bench_schema_init(c: &mut Criterion) {
    c.bench_function("schema_init_and_migrate", |b| {
        b.iter(|| {
            let conn = Connection::open_in_memory().unwrap();
            conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
            for stmt in SCHEMA_STATEMENTS {
                conn.execute_batch(stmt).unwrap();
            }
            migrate_schema(&conn).unwrap();
            black_box(&conn);
        });
    });
}

// ---------------------------------------------------------------------------
// 2. Syntax check
// ---------------------------------------------------------------------------

fn bench_syntax_check(c: &mut Criterion) {
    let mut group = c.benchmark_group("syntax_check");
    let mut checker = SyntacticChecker::new().unwrap();
    for size in [10usize, 100, 1000] {
        let clean = synthetic_suite(size);
        let broken = format!("{clean}\ndef test_broken(:\n    pass\n");
        group.bench_with_input(BenchmarkId::new("clean", size), &clean, |b, code| {
            b.iter(|| black_box(checker.check(code).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("broken", size), &broken, |b, code| {
            b.iter(|| black_box(checker.check(code).unwrap()));
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// 3. Envelope + token estimate
// ---------------------------------------------------------------------------

fn bench_envelope(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope");
    let envelope = ResponseEnvelope::default();
    for size in [10usize, 100, 1000] {
        let reply = format!(
            "Sure, here are the tests.\n\n```python\n{}```\n\nLet me know if you need more.",
            synthetic_suite(size)
        );
        group.bench_with_input(BenchmarkId::new("extract", size), &reply, |b, reply| {
            b.iter(|| black_box(envelope.extract(reply).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("estimate_tokens", size), &reply, |b, reply| {
            b.iter(|| black_box(estimate_tokens(reply)));
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// 4. Hyperparameters
// ---------------------------------------------------------------------------

fn bench_hyperparams(c: &mut Criterion) {
    let mut group = c.benchmark_group("hyperparams");
    group.bench_function("factory_lookup", |b| {
        b.iter(|| black_box(hyperparam_for(Platform::Ollama, black_box("Top_K")).unwrap()));
    });
    group.bench_function("set_and_coerce", |b| {
        let mut param = hyperparam_for(Platform::OpenAi, "temperature").unwrap();
        b.iter(|| {
            param.set_value(black_box("0.7")).unwrap();
            black_box(param.to_effective_value().unwrap())
        });
    });
    group.bench_function("reject_out_of_range", |b| {
        let mut param = hyperparam_for(Platform::Ollama, "temperature").unwrap();
        b.iter(|| black_box(param.set_value(black_box("1.5")).is_err()));
    });
    group.finish();
}

// ---------------------------------------------------------------------------
// 5. Cache
// ---------------------------------------------------------------------------

fn bench_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");
    group.sample_size(20);
    let dir = tempfile::tempdir().unwrap();
    let cache = CacheAccessor::open(dir.path().join("bench.db")).unwrap();
    cache.create_project_space("bench").unwrap();
    let artifact = synthetic_suite(50);

    let mut counter = 0u32;
    group.bench_function("register", |b| {
        b.iter(|| {
            counter += 1;
            cache
                .register("bench", "prompt", "model", counter, &artifact)
                .unwrap();
        });
    });

    cache
        .register("bench", "lookup prompt", "model", 1, &artifact)
        .unwrap();
    group.bench_function("get_hit", |b| {
        b.iter(|| black_box(cache.get("bench", "lookup prompt", "model", 1).unwrap()));
    });
    group.bench_function("exists_miss", |b| {
        b.iter(|| black_box(cache.exists("bench", "absent prompt", "model", 1).unwrap()));
    });
    group.finish();
}

// ---------------------------------------------------------------------------
// 6. Entities
// ---------------------------------------------------------------------------

fn bench_entities(c: &mut Criterion) {
    let mut group = c.benchmark_group("entities");
    for size in [10usize, 100, 500] {
        let source = synthetic_module(size);
        group.bench_with_input(BenchmarkId::new("extract", size), &source, |b, src| {
            b.iter(|| black_box(extract_entities(src, "pkg.widgets", true).unwrap()));
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// 7. Pipeline
// ---------------------------------------------------------------------------

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    group.sample_size(10);
    let entity = Entity {
        module: "pkg.mod".into(),
        name: "foo".into(),
        class_name: None,
        kind: EntityKind::Function,
        source: "def foo(x):\n    return x + 1\n".into(),
        start_line: 1,
        end_line: 2,
    };
    let generation = GenerationConfig {
        max_tries: 3,
        syntax_tries: 3,
        lint_tries: 3,
        skip_private: true,
    };

    // Each iteration uses a fresh cache so that every exchange goes live.
    group.bench_function("generate_and_repair_once", |b| {
        b.iter(|| {
            let dir = tempfile::tempdir().unwrap();
            let cache = CacheAccessor::open(dir.path().join("cache.db")).unwrap();
            let driver =
                PipelineDriver::new(cache, "bench", generation.clone(), Duration::from_secs(5))
                    .unwrap();
            let backend = ScriptedBackend::new(Platform::Ollama);
            backend
                .push_reply("```python\ndef test_foo(:\n    pass\n```")
                .push_reply("```python\ndef test_foo():\n    assert foo(1) == 2\n```");
            let mut worker = PipelineWorker::new(ready_model(&backend), None).unwrap();
            black_box(driver.process_entity(&mut worker, &entity).unwrap())
        });
    });

    // Replay: the model is never consulted after the warm-up run.
    let dir = tempfile::tempdir().unwrap();
    let cache = CacheAccessor::open(dir.path().join("cache.db")).unwrap();
    let driver = PipelineDriver::new(cache, "bench", generation, Duration::from_secs(5)).unwrap();
    let backend = ScriptedBackend::new(Platform::Ollama);
    backend
        .push_reply("```python\ndef test_foo(:\n    pass\n```")
        .push_reply("```python\ndef test_foo():\n    assert foo(1) == 2\n```");
    let mut worker = PipelineWorker::new(ready_model(&backend), None).unwrap();
    driver.process_entity(&mut worker, &entity).unwrap();
    group.bench_function("replay_from_cache", |b| {
        b.iter(|| black_box(driver.process_entity(&mut worker, &entity).unwrap()));
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_schema_init,
    bench_syntax_check,
    bench_envelope,
    bench_hyperparams,
    bench_cache,
    bench_entities,
    bench_pipeline,
);
criterion_main!(benches);
