//! The abstract-domain trait contract.
//!
//! Every numerical domain exposes the same lattice, transfer, and query
//! surface; the fixpoint iterator and the array functors program against this
//! trait and nothing else.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::interval::Interval;
use crate::linear::{ConstraintKind, LinearConstraint, LinearConstraintSystem, LinearExpr};
use crate::variable::Variable;

/// Arithmetic operations for [`AbstractDomain::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Bitwise operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitwiseOp {
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
}

/// Division-family operations beyond signed division.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DivOp {
    SDiv,
    UDiv,
    SRem,
    URem,
}

/// Integer conversions. The domains reason over mathematical integers, so
/// these are width-erasing assignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
}

/// The right operand of a binary transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Var(Variable),
    Const(i64),
}

impl From<&Variable> for Operand {
    fn from(v: &Variable) -> Self {
        Operand::Var(v.clone())
    }
}

impl From<i64> for Operand {
    fn from(k: i64) -> Self {
        Operand::Const(k)
    }
}

/// A sound abstract domain over integer program variables.
///
/// Lattice conventions: `bottom` is unreachability, `top` is no information,
/// `leq` is the precision order. Any operation on a bottom value is a no-op.
pub trait AbstractDomain: Clone + Display + Sized {
    fn top() -> Self;
    fn bottom() -> Self;
    fn is_top(&self) -> bool;
    fn is_bottom(&self) -> bool;

    /// `self ⊑ other`.
    fn leq(&self, other: &Self) -> bool;
    /// Least upper bound.
    fn join(&self, other: &Self) -> Self;
    /// Greatest lower bound.
    fn meet(&self, other: &Self) -> Self;
    /// Widening; must stabilise every ascending chain.
    fn widen(&self, other: &Self) -> Self;
    /// Widening that clamps escaping bounds to the nearest threshold.
    fn widen_with_thresholds(&self, other: &Self, _thresholds: &[i64]) -> Self {
        self.widen(other)
    }
    /// Narrowing; refines a post-widening value without breaking soundness.
    fn narrow(&self, other: &Self) -> Self;

    /// `x := e`.
    fn assign(&mut self, x: &Variable, e: &LinearExpr);
    /// `x := y op z`.
    fn apply(&mut self, op: ArithOp, x: &Variable, y: &Variable, z: &Operand);
    fn apply_bitwise(&mut self, op: BitwiseOp, x: &Variable, y: &Variable, z: &Operand);
    fn apply_div(&mut self, op: DivOp, x: &Variable, y: &Variable, z: &Operand);
    fn apply_cast(&mut self, op: CastOp, dst: &Variable, src: &Variable);

    /// Constrain the state with `cst`.
    fn assume(&mut self, cst: &LinearConstraint);
    fn assume_all(&mut self, csts: &LinearConstraintSystem) {
        for cst in csts.iter() {
            if self.is_bottom() {
                return;
            }
            self.assume(cst);
        }
    }

    /// Drop all knowledge about `v`.
    fn forget(&mut self, v: &Variable);
    fn forget_all(&mut self, vars: &[Variable]) {
        for v in vars {
            self.forget(v);
        }
    }
    /// Keep only the listed variables.
    fn project(&mut self, vars: &[Variable]);
    /// Rename `from[i]` to `to[i]`; constraints are otherwise unchanged.
    fn rename(&mut self, from: &[Variable], to: &[Variable]);
    /// Copy everything known about `x` onto the fresh variable `y` without
    /// relating the two.
    fn expand(&mut self, x: &Variable, y: &Variable);

    /// `x := [lb, ub]`.
    fn set(&mut self, x: &Variable, intv: Interval);
    /// Interval projection of `x`.
    fn value_of(&self, x: &Variable) -> Interval;

    /// Evaluate a linear expression to an interval in this state.
    fn eval(&self, e: &LinearExpr) -> Interval {
        if self.is_bottom() {
            return Interval::bottom();
        }
        let mut r = Interval::singleton_of(e.constant_term());
        for (v, c) in e.terms() {
            r = r.add(&self.value_of(v).mul_const(c));
        }
        r
    }

    /// The state as a conjunction of linear constraints.
    fn to_constraints(&self) -> LinearConstraintSystem;

    /// True when the state implies `cst`: copy, meet with the negation, and
    /// check for bottom. Equalities are first lowered to two inequalities so
    /// the negation never produces a disequation.
    fn entail(&self, cst: &LinearConstraint) -> bool {
        if self.is_bottom() || cst.is_tautology() {
            return true;
        }
        if cst.is_contradiction() {
            return false;
        }
        let parts = if cst.kind() == ConstraintKind::Equality {
            cst.lower_equality()
        } else {
            vec![cst.clone()]
        };
        parts.iter().all(|c| {
            let mut probe = self.clone();
            probe.assume(&c.negate());
            probe.is_bottom()
        })
    }

    /// True when the state is compatible with `cst`.
    fn intersect(&self, cst: &LinearConstraint) -> bool {
        if self.is_bottom() || cst.is_contradiction() {
            return false;
        }
        if self.is_top() || cst.is_tautology() {
            return true;
        }
        let mut probe = self.clone();
        probe.assume(cst);
        !probe.is_bottom()
    }
}

/// The array-operator sub-interface, implemented by the array functors.
pub trait ArrayDomain: AbstractDomain {
    /// `forall i in [lb, ub) step elem_size: a[i] := val`.
    fn array_init(
        &mut self,
        a: &Variable,
        elem_size: &LinearExpr,
        lb: &LinearExpr,
        ub: &LinearExpr,
        val: &LinearExpr,
    );
    /// `lhs := a[i]`.
    fn array_load(&mut self, lhs: &Variable, a: &Variable, elem_size: &LinearExpr, i: &LinearExpr);
    /// `a[i] := val`. `is_singleton` asserts the caller has proven that `i`
    /// denotes one concrete cell, enabling a strong update.
    fn array_store(
        &mut self,
        a: &Variable,
        elem_size: &LinearExpr,
        i: &LinearExpr,
        val: &LinearExpr,
        is_singleton: bool,
    );
    /// `lhs := rhs` between whole arrays.
    fn array_assign(&mut self, lhs: &Variable, rhs: &Variable);
}
