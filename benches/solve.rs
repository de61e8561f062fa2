//! Benchmarks for the full λ search over growing matrices

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use emd_approx::{solve, SolveArgs};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_matrix(rows: usize, cols: usize, seed: u64) -> Vec<Vec<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..rows)
        .map(|_| (0..cols).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect()
}

fn bench_solve(c: &mut Criterion) {
    let mut group = c.benchmark_group("solve");

    for (rows, cols) in [(8, 8), (16, 16), (32, 32)] {
        let mut args = SolveArgs::new(random_matrix(rows, cols, 42));
        args.s = 4.min(rows);
        args.emd_bound_low = 0;
        args.emd_bound_high = (rows * cols / 4) as i64;

        group.bench_with_input(
            BenchmarkId::new("dims", format!("{rows}x{cols}")),
            &args,
            |b, a| b.iter(|| solve(black_box(a))),
        );
    }

    group.finish();
}

criterion_group!(benches, bench_solve);
criterion_main!(benches);
