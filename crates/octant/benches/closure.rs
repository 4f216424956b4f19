//! Benchmarks for octagon closure and the lattice operations.
//!
//! The workload is a difference chain `x_{i+1} - x_i <= 1` with bounds on
//! the first variable: closure has to materialise the quadratic set of
//! implied relations, which is the dominant cost of the domain.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use octant::{AbstractDomain, LinearConstraint, LinearExpr, Octagon, VarFactory, Variable};

fn chain_state(vars: &[Variable]) -> Octagon {
    let mut state = Octagon::top();
    state.assume(&LinearConstraint::geq(
        LinearExpr::var(&vars[0]),
        LinearExpr::constant(0),
    ));
    state.assume(&LinearConstraint::leq(
        LinearExpr::var(&vars[0]),
        LinearExpr::constant(1),
    ));
    for w in vars.windows(2) {
        state.assume(&LinearConstraint::leq(
            LinearExpr::var(&w[1]).plus_term(-1, &w[0]),
            LinearExpr::constant(1),
        ));
    }
    state
}

fn benchmark_chain_closure(c: &mut Criterion) {
    let mut group = c.benchmark_group("octagon_chain");
    for n in [8usize, 16, 32] {
        group.bench_with_input(BenchmarkId::new("assume_chain", n), &n, |b, n| {
            let vfac = VarFactory::new();
            let vars: Vec<Variable> = (0..*n).map(|i| vfac.int(&format!("x{i}"), 32)).collect();
            b.iter(|| chain_state(&vars));
        });
    }
    group.finish();
}

fn benchmark_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("octagon_join");
    for n in [8usize, 16] {
        group.bench_with_input(BenchmarkId::new("join", n), &n, |b, n| {
            let vfac = VarFactory::new();
            let vars: Vec<Variable> = (0..*n).map(|i| vfac.int(&format!("x{i}"), 32)).collect();
            let left = chain_state(&vars);
            let mut right = chain_state(&vars);
            right.assume(&LinearConstraint::leq(
                LinearExpr::var(&vars[*n - 1]),
                LinearExpr::constant(3),
            ));
            b.iter(|| left.join(&right));
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_chain_closure, benchmark_join);
criterion_main!(benches);
