//! End-to-end analyses of small integer programs, checked against the
//! invariants the octagon domain is expected to establish at program exit.

mod common;

use common::*;
use octant::{AbstractDomain, FixpointConfig, LinearConstraint, Octagon, VarFactory};

/// `k := 0; i := 0; while (i <= 99) { i := i + 1; k := k + 1 }`
#[test]
fn simple_counter() {
    let vfac = VarFactory::new();
    let i = vfac.int("i", 32);
    let k = vfac.int("k", 32);

    let mut prog = Program::new();
    prog.block("entry", vec![assign(&k, c(0)), assign(&i, c(0))])
        .block("bb1", vec![])
        .block("bb1_t", vec![assume(leq_c(&i, 99))])
        .block("bb1_f", vec![assume(geq_c(&i, 100))])
        .block("bb2", vec![add(&i, &i, 1), add(&k, &k, 1)])
        .block("ret", vec![])
        .edge("entry", "bb1")
        .edge("bb1", "bb1_t")
        .edge("bb1", "bb1_f")
        .edge("bb1_t", "bb2")
        .edge("bb2", "bb1")
        .edge("bb1_f", "ret");
    prog.finish("entry");

    let states = analyze::<Octagon>(&prog, &FixpointConfig::default());
    let exit = &states["ret"];
    assert!(!exit.is_bottom());
    assert!(exit.entail(&eq_vars(&i, &k)), "expected i = k at exit: {exit}");
    assert!(exit.entail(&eq_c(&i, 100)), "expected i = 100 at exit: {exit}");
}

/// Two sequential loops; `k` is constant throughout.
#[test]
fn two_sequential_loops() {
    let vfac = VarFactory::new();
    let i = vfac.int("i", 32);
    let j = vfac.int("j", 32);
    let k = vfac.int("k", 32);

    let mut prog = Program::new();
    prog.block("loop1_entry", vec![assign(&i, c(0)), assign(&k, c(30))])
        .block("loop1_bb1", vec![])
        .block("loop1_bb1_t", vec![assume(leq_c(&i, 9))])
        .block("loop1_bb1_f", vec![assume(geq_c(&i, 10))])
        .block("loop1_bb2", vec![add(&i, &i, 1)])
        .block("loop2_entry", vec![assign(&j, c(0))])
        .block("loop2_bb1", vec![])
        .block("loop2_bb1_t", vec![assume(leq_c(&j, 9))])
        .block("loop2_bb1_f", vec![assume(geq_c(&j, 10))])
        .block("loop2_bb2", vec![add(&j, &j, 1)])
        .block("ret", vec![])
        .edge("loop1_entry", "loop1_bb1")
        .edge("loop1_bb1", "loop1_bb1_t")
        .edge("loop1_bb1", "loop1_bb1_f")
        .edge("loop1_bb1_t", "loop1_bb2")
        .edge("loop1_bb2", "loop1_bb1")
        .edge("loop1_bb1_f", "loop2_entry")
        .edge("loop2_entry", "loop2_bb1")
        .edge("loop2_bb1", "loop2_bb1_t")
        .edge("loop2_bb1", "loop2_bb1_f")
        .edge("loop2_bb1_t", "loop2_bb2")
        .edge("loop2_bb2", "loop2_bb1")
        .edge("loop2_bb1_f", "ret");
    prog.finish("loop1_entry");

    let states = analyze::<Octagon>(&prog, &FixpointConfig::default());
    let exit = &states["ret"];
    assert!(!exit.is_bottom());
    assert!(exit.entail(&eq_c(&i, 10)), "expected i = 10 at exit: {exit}");
    assert!(exit.entail(&eq_c(&j, 10)), "expected j = 10 at exit: {exit}");
    assert!(exit.entail(&eq_c(&k, 30)), "expected k = 30 at exit: {exit}");
}

/// Nested reset under threshold widening: the outer loop increments `i`, an
/// inner branch resets it at 9, a second loop decrements. The invariant
/// `0 <= i <= 100` must hold at the second loop's exit with thresholds
/// `{0, 10, 100}`.
#[test]
fn nested_reset_with_thresholds() {
    let vfac = VarFactory::new();
    let i = vfac.int("i", 32);

    let mut prog = Program::new();
    prog.block("entry", vec![assign(&i, c(0))])
        .block("loop1_head", vec![])
        .block("loop1_t", vec![assume(leq_c(&i, 10))])
        .block("loop1_f", vec![assume(geq_c(&i, 11))])
        .block("loop1_body", vec![add(&i, &i, 1)])
        .block("loop1_body_t", vec![assume(geq_c(&i, 9)), assign(&i, c(0))])
        .block("loop1_body_f", vec![assume(leq_c(&i, 8))])
        .block("loop1_body_x", vec![])
        .block("cont", vec![])
        .block("loop2_head", vec![])
        .block("loop2_t", vec![assume(leq_c(&i, 100))])
        .block("loop2_f", vec![assume(geq_c(&i, 101))])
        .block("loop2_body", vec![sub(&i, &i, 1)])
        .block("ret", vec![])
        .edge("entry", "loop1_head")
        .edge("loop1_head", "loop1_t")
        .edge("loop1_head", "loop1_f")
        .edge("loop1_t", "loop1_body")
        .edge("loop1_body", "loop1_body_t")
        .edge("loop1_body", "loop1_body_f")
        .edge("loop1_body_t", "loop1_body_x")
        .edge("loop1_body_f", "loop1_body_x")
        .edge("loop1_body_x", "loop1_head")
        .edge("loop1_f", "cont")
        .edge("cont", "loop2_head")
        .edge("loop2_head", "loop2_t")
        .edge("loop2_head", "loop2_f")
        .edge("loop2_t", "loop2_body")
        .edge("loop2_body", "loop2_head")
        .edge("loop2_f", "ret");
    prog.finish("entry");

    let config = FixpointConfig::default().with_thresholds(&[0, 10, 100]);
    let states = analyze::<Octagon>(&prog, &config);
    let exit = &states["ret"];
    assert!(exit.entail(&geq_c(&i, 0)), "expected 0 <= i at exit: {exit}");
    assert!(exit.entail(&leq_c(&i, 100)), "expected i <= 100 at exit: {exit}");
}

/// Linear stride: `p` advances four times as fast as `i`. The octagon keeps
/// the bounds and `i <= p`, not the exact `p = 4i` relation.
#[test]
fn linear_stride() {
    let vfac = VarFactory::new();
    let i = vfac.int("i", 32);
    let p = vfac.int("p", 32);

    let mut prog = Program::new();
    prog.block("entry", vec![assign(&i, c(0)), assign(&p, c(0))])
        .block("loop_head", vec![])
        .block("loop_t", vec![assume(leq_c(&i, 9))])
        .block("loop_f", vec![assume(geq_c(&i, 10))])
        .block("loop_body", vec![add(&i, &i, 1), add(&p, &p, 4)])
        .block("ret", vec![])
        .edge("entry", "loop_head")
        .edge("loop_head", "loop_t")
        .edge("loop_head", "loop_f")
        .edge("loop_t", "loop_body")
        .edge("loop_body", "loop_head")
        .edge("loop_f", "ret");
    prog.finish("entry");

    let states = analyze::<Octagon>(&prog, &FixpointConfig::default());
    let head = &states["loop_head"];
    assert!(head.entail(&geq_c(&i, 0)), "expected 0 <= i at head: {head}");
    assert!(head.entail(&leq_c(&i, 10)), "expected i <= 10 at head: {head}");
    assert!(head.entail(&geq_c(&p, 0)), "expected 0 <= p at head: {head}");
    // i <= p survives as the zone residue of p = 4i.
    assert!(
        head.entail(&LinearConstraint::leq(v(&i), v(&p))),
        "expected i <= p at head: {head}"
    );
    let exit = &states["ret"];
    assert!(exit.entail(&eq_c(&i, 10)), "expected i = 10 at exit: {exit}");
    assert!(exit.entail(&geq_c(&p, 10)), "expected p >= 10 at exit: {exit}");
}

/// Loop guarded by a disequation: `while (i != 9)`.
#[test]
fn disequation_guard() {
    let vfac = VarFactory::new();
    let i = vfac.int("i", 32);
    let k = vfac.int("k", 32);

    let mut prog = Program::new();
    prog.block("entry", vec![assign(&k, c(0)), assign(&i, c(0))])
        .block("bb1", vec![])
        .block("bb1_t", vec![assume(neq_c(&i, 9))])
        .block("bb1_f", vec![assume(eq_c(&i, 9))])
        .block("bb2", vec![add(&i, &i, 1), add(&k, &k, 1)])
        .block("ret", vec![])
        .edge("entry", "bb1")
        .edge("bb1", "bb1_t")
        .edge("bb1", "bb1_f")
        .edge("bb1_t", "bb2")
        .edge("bb2", "bb1")
        .edge("bb1_f", "ret");
    prog.finish("entry");

    let states = analyze::<Octagon>(&prog, &FixpointConfig::default());
    let exit = &states["ret"];
    assert!(!exit.is_bottom());
    assert!(exit.entail(&eq_vars(&i, &k)), "expected i = k at exit: {exit}");
    assert!(exit.entail(&eq_c(&i, 9)), "expected i = 9 at exit: {exit}");
}

/// Conservation: `y` decreases exactly as fast as `2x` grows, so
/// `x + y <= k` holds at the assertion point.
#[test]
fn conservation() {
    let vfac = VarFactory::new();
    let k = vfac.int("k", 32);
    let n = vfac.int("n", 32);
    let x = vfac.int("x", 32);
    let y = vfac.int("y", 32);
    let t = vfac.int("t", 32);

    let mut prog = Program::new();
    prog.block(
        "entry",
        vec![
            assign(&k, c(200)),
            assign(&n, c(100)),
            assign(&x, c(0)),
            assign(&y, v(&k)),
        ],
    )
    .block("loop", vec![])
    .block(
        "loop_body_1",
        vec![assume(LinearConstraint::leq(v(&x), v(&n).plus(-1)))],
    )
    .block("loop_body_2", vec![add(&x, &x, 1)])
    .block("loop_body_3", vec![assign(&t, v(&x).plus_term(1, &x))])
    .block("loop_body_4", vec![sub(&y, &k, &t)])
    .block("ret", vec![assume(LinearConstraint::geq(v(&x), v(&n)))])
    .edge("entry", "loop")
    .edge("loop", "loop_body_1")
    .edge("loop_body_1", "loop_body_2")
    .edge("loop_body_2", "loop_body_3")
    .edge("loop_body_3", "loop_body_4")
    .edge("loop_body_4", "loop")
    .edge("loop", "ret");
    prog.finish("entry");

    let states = analyze::<Octagon>(&prog, &FixpointConfig::default());
    let exit = &states["ret"];
    assert!(!exit.is_bottom());
    // assert x + y <= k
    let assertion = LinearConstraint::leq(v(&x).plus_term(1, &y), v(&k));
    assert!(exit.entail(&assertion), "expected x + y <= k at exit: {exit}");
}
