//! Evaluator micro-benchmarks: raw stepping, action invocation, and
//! specialization overhead.

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use core_eval::Machine;

fn bench_arithmetic_steps(c: &mut Criterion) {
    let mut m = Machine::startup().expect("boot");
    c.bench_function("eval_infix_chain", |b| {
        b.iter(|| {
            let result = m.run_source(black_box("1 + 2 * 3 + 4"), None);
            black_box(result).expect("evaluates");
        })
    });
}

fn bench_function_call(c: &mut Criterion) {
    let mut m = Machine::startup().expect("boot");
    m.run_source("f: func [x] [x + 1]", None).expect("defines");
    c.bench_function("eval_func_call", |b| {
        b.iter(|| {
            let result = m.run_source(black_box("f 41"), None);
            black_box(result).expect("evaluates");
        })
    });
}

fn bench_specialized_call(c: &mut Criterion) {
    let mut m = Machine::startup().expect("boot");
    m.run_source(
        "g: func [a [integer!] b [integer!]] [a + b] gs: specialize :g [b: 2]",
        None,
    )
    .expect("defines");
    c.bench_function("eval_specialized_call", |b| {
        b.iter(|| {
            let result = m.run_source(black_box("gs 40"), None);
            black_box(result).expect("evaluates");
        })
    });
}

fn bench_loop_with_collection(c: &mut Criterion) {
    let mut m = Machine::startup().expect("boot");
    c.bench_function("eval_loop_allocating", |b| {
        b.iter(|| {
            let result = m.run_source(black_box("repeat 50 [copy [1 2 3]]"), None);
            black_box(result).expect("evaluates");
        })
    });
}

criterion_group!(
    benches,
    bench_arithmetic_steps,
    bench_function_call,
    bench_specialized_call,
    bench_loop_with_collection
);
criterion_main!(benches);
