//! mores benchmark suite.
//!
//! Rough targets on a desktop core:
//!   compile_library_64_signals ............ < 2ms
//!   evaluate_single_sample_4_rules ........ < 2μs
//!   bake_load_64_signals .................. < 1ms
//!   tick/parallel/1000 .................... < 2ms

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use mores_bench::{populated_world, synthetic_definitions};
use mores_core::evaluator::RuleCooldowns;
use mores_core::{
    bake, EntityId, EvaluationRequest, LibraryCompiler, MoresConfig, RandomSeed, RuleEvaluator,
    SimulationContext,
};
use mores_world::{FixedClock, QueuedSignal};

/// Benchmark: full compile of a 64-signal library.
fn bench_compile(c: &mut Criterion) {
    let defs = synthetic_definitions(64, 4);
    let compiler = LibraryCompiler::default();
    c.bench_function("compile_library_64_signals", |b| {
        b.iter(|| black_box(compiler.compile(black_box(&defs))));
    });
}

/// Benchmark: one sample against its rule group.
fn bench_evaluate(c: &mut Criterion) {
    let lib = LibraryCompiler::default().compile(&synthetic_definitions(16, 4));
    let evaluator = RuleEvaluator::default();
    let mut cooldowns = RuleCooldowns::default();
    let mut seed = RandomSeed::new(7);
    let mut commands = Vec::with_capacity(16);
    let mut now = 0.0;

    c.bench_function("evaluate_single_sample_4_rules", |b| {
        b.iter(|| {
            now += 1.0;
            commands.clear();
            let ctx = SimulationContext::new(&lib, now);
            let req = EvaluationRequest::new(0, black_box(0.6), EntityId(1), EntityId(0));
            black_box(evaluator.evaluate(&ctx, &req, &mut cooldowns, &mut seed, &mut commands))
        });
    });
}

/// Benchmark: decode, verify and index a baked library.
fn bench_bake_load(c: &mut Criterion) {
    let lib = LibraryCompiler::default().compile(&synthetic_definitions(64, 4));
    let Ok(bytes) = bake::to_bytes(&lib) else {
        return;
    };
    c.bench_function("bake_load_64_signals", |b| {
        b.iter(|| black_box(bake::from_bytes(black_box(&bytes)).is_ok()));
    });
}

/// Benchmark: whole ticks, serial and parallel, at several populations.
fn bench_tick(c: &mut Criterion) {
    let defs = synthetic_definitions(8, 2);
    let mut group = c.benchmark_group("tick");
    for &members in &[100u32, 1000] {
        for parallel in [false, true] {
            let mut config = MoresConfig::default();
            config.world.parallel = parallel;
            let mut world = populated_world(&defs, config, 4, members / 4);
            let signals = world.library().signals.len() as u32;
            let ids: Vec<EntityId> = world
                .societies()
                .flat_map(|s| s.members.iter().copied())
                .collect();
            let mut clock = FixedClock::new(0.0);
            let label = if parallel { "parallel" } else { "serial" };

            group.bench_with_input(BenchmarkId::new(label, members), &members, |b, _| {
                b.iter(|| {
                    clock.advance(0.5);
                    for (i, &id) in ids.iter().enumerate() {
                        let signal = (i as u32) % signals;
                        let _ = world.emit(QueuedSignal::new(signal, id, 0.8));
                    }
                    black_box(world.tick(&clock))
                });
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_compile, bench_evaluate, bench_bake_load, bench_tick);
criterion_main!(benches);
