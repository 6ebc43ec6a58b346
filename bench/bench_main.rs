use criterion::{criterion_group, criterion_main};

mod benchmarks;
use benchmarks::step::step_benchmarks;

criterion_group!(step_benches, step_benchmarks,);

criterion_main!(step_benches);
