//! State materialization benchmarks.
//!
//! Measures rebuilding a version's state from history, reading it from the
//! cache, answering as-of-commit queries and merging two branches.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench materialize
//! # With a custom filter:
//! cargo bench --bench materialize -- refresh
//! ```

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde_json::json;

use strata::model::records::{Commit, Version};
use strata::version::{CreateVersion, Inherit};
use strata::{Engine, OpenOptions, StateFilter, key_value, state};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const SIZES: [usize; 3] = [100, 1_000, 5_000];

/// An engine whose main version holds `n` entries spread over ten commits.
fn populated(n: usize) -> (Engine, Version, Commit) {
    let engine = Engine::new(OpenOptions::new()).expect("engine");
    let main = engine.active_version().expect("main");
    let per_commit = n.div_ceil(10).max(1);
    let mut head = None;
    for chunk in (0..n).collect::<Vec<_>>().chunks(per_commit) {
        engine
            .transaction(|tx| {
                for i in chunk {
                    key_value::set(tx, &main.id, &format!("key-{i:06}"), json!({ "n": i }), false)?;
                }
                Ok(())
            })
            .expect("write chunk");
        head = Some(engine.checkpoint(&main.id).expect("checkpoint"));
    }
    (engine, main, head.expect("at least one commit"))
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_refresh(c: &mut Criterion) {
    let mut group = c.benchmark_group("state/refresh");
    group.sample_size(20);
    for n in SIZES {
        let (engine, main, _) = populated(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("entries", n), &n, |b, _| {
            b.iter(|| {
                engine
                    .transaction(|tx| state::refresh(tx, &main.id))
                    .expect("refresh");
            });
        });
    }
    group.finish();
}

fn bench_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("state/list");
    for n in SIZES {
        let (engine, main, _) = populated(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("entries", n), &n, |b, _| {
            b.iter(|| {
                engine
                    .list_entities(&main.id, &StateFilter::default())
                    .expect("list")
            });
        });
    }
    group.finish();
}

fn bench_state_at_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("history/state_at_commit");
    group.sample_size(20);
    for n in SIZES {
        let (engine, _, head) = populated(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("entries", n), &n, |b, _| {
            b.iter(|| {
                engine
                    .read(|view| state::state_at_commit(view, &head.id, &StateFilter::default(), None))
                    .expect("as-of query")
            });
        });
    }
    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge/disjoint");
    group.sample_size(10);
    for n in [100, 1_000] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("entries", n), &n, |b, &n| {
            b.iter_batched(
                || {
                    let (engine, main, head) = populated(n);
                    let feature = engine
                        .create_version(CreateVersion {
                            name: Some("feature".to_owned()),
                            commit_id: Some(head.id),
                            inherits_from: Inherit::Nothing,
                            ..CreateVersion::default()
                        })
                        .expect("feature");
                    engine
                        .transaction(|tx| {
                            for i in 0..n / 2 {
                                key_value::set(tx, &feature.id, &format!("key-{i:06}"), json!("f"), false)?;
                            }
                            Ok(())
                        })
                        .expect("feature writes");
                    engine.checkpoint(&feature.id).expect("checkpoint feature");
                    (engine, main, feature)
                },
                |(engine, main, feature)| engine.merge(&main.id, &feature.id).expect("merge"),
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_refresh,
    bench_list,
    bench_state_at_commit,
    bench_merge
);
criterion_main!(benches);
