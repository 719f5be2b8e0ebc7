//! limb splitting and reduction constant benchmarks
//!
//! Usage:
//!   cargo bench -p zkmail-circuit

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use num_bigint::{BigUint, RandBigInt};
use zkmail_circuit::{reduction_constant, split_limbs, CircuitConfig, ReductionParam};

fn random_modulus() -> BigUint {
    let mut rng = rand::thread_rng();
    let mut n = rng.gen_biguint(2048);
    n.set_bit(2047, true);
    n.set_bit(0, true);
    n
}

fn bench_split(c: &mut Criterion) {
    let n = random_modulus();
    c.bench_function("split_limbs/2048", |b| {
        b.iter(|| black_box(split_limbs(black_box(&n), 121, 17).unwrap()))
    });
}

fn bench_reduction(c: &mut Criterion) {
    let mut group = c.benchmark_group("reduction_constant");
    let n = random_modulus();
    for reduction in [ReductionParam::Montgomery, ReductionParam::Barrett] {
        let config = CircuitConfig {
            reduction,
            ..Default::default()
        };
        group.bench_function(BenchmarkId::new(format!("{:?}", reduction), 2048), |b| {
            b.iter(|| black_box(reduction_constant(black_box(&n), &config).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_split, bench_reduction);
criterion_main!(benches);
