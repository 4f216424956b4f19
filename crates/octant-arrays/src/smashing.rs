//! The array-smashing functor: one summary variable per array.
//!
//! The summary variable is the array variable itself, living inside the
//! wrapped numerical domain. Stores are strong updates only when the caller
//! asserts the index denotes a single concrete cell; loads go through a
//! shadow temporary so the destination is never aliased with the summary
//! (the plain `lhs := summary` assignment would be unsound: later weak
//! updates of the summary must not drag `lhs` along).

use std::fmt;

use tracing::debug;

use octant_core::{
    AbstractDomain, ArithOp, ArrayDomain, BitwiseOp, CastOp, DivOp, Interval, LinearConstraint,
    LinearConstraintSystem, LinearExpr, Operand, ScalarType, VarType, Variable, WarningSink,
};

/// Array smashing over the numerical domain `D`.
#[derive(Debug, Clone)]
pub struct ArraySmashing<D> {
    inv: D,
    sink: WarningSink,
}

impl<D: AbstractDomain> ArraySmashing<D> {
    /// Route imprecision warnings to `sink`.
    pub fn with_sink(mut self, sink: WarningSink) -> Self {
        self.sink = sink;
        self
    }

    /// The wrapped numerical state.
    pub fn content_domain(&self) -> &D {
        &self.inv
    }

    fn from_inv(&self, inv: D) -> Self {
        ArraySmashing {
            inv,
            sink: self.sink.clone(),
        }
    }

    /// Overwrite the summary.
    fn strong_update(&mut self, a: &Variable, rhs: &LinearExpr) {
        match a.ty().element() {
            ScalarType::Int { .. } | ScalarType::Real => self.inv.assign(a, rhs),
            ScalarType::Bool => {
                // Booleans live in the numerical domain as 0/1.
                if rhs.is_constant() {
                    let b = i64::from(rhs.constant_term() != 0);
                    self.inv.assign(a, &LinearExpr::constant(b));
                } else {
                    self.inv.assign(a, rhs);
                }
            }
            ScalarType::Ptr => {
                self.sink
                    .warn(format!("smashing cannot track pointer summary {a}"));
                self.inv.forget(a);
            }
        }
    }

    /// Join the post-state of the strong update with the current state.
    fn weak_update(&mut self, a: &Variable, rhs: &LinearExpr) {
        let mut other = self.clone();
        other.strong_update(a, rhs);
        self.inv = self.inv.join(&other.inv);
    }
}

impl<D: AbstractDomain> AbstractDomain for ArraySmashing<D> {
    fn top() -> Self {
        ArraySmashing {
            inv: D::top(),
            sink: WarningSink::default(),
        }
    }

    fn bottom() -> Self {
        ArraySmashing {
            inv: D::bottom(),
            sink: WarningSink::default(),
        }
    }

    fn is_top(&self) -> bool {
        self.inv.is_top()
    }

    fn is_bottom(&self) -> bool {
        self.inv.is_bottom()
    }

    fn leq(&self, other: &Self) -> bool {
        self.inv.leq(&other.inv)
    }

    fn join(&self, other: &Self) -> Self {
        self.from_inv(self.inv.join(&other.inv))
    }

    fn meet(&self, other: &Self) -> Self {
        self.from_inv(self.inv.meet(&other.inv))
    }

    fn widen(&self, other: &Self) -> Self {
        self.from_inv(self.inv.widen(&other.inv))
    }

    fn widen_with_thresholds(&self, other: &Self, thresholds: &[i64]) -> Self {
        self.from_inv(self.inv.widen_with_thresholds(&other.inv, thresholds))
    }

    fn narrow(&self, other: &Self) -> Self {
        self.from_inv(self.inv.narrow(&other.inv))
    }

    fn assign(&mut self, x: &Variable, e: &LinearExpr) {
        self.inv.assign(x, e);
    }

    fn apply(&mut self, op: ArithOp, x: &Variable, y: &Variable, z: &Operand) {
        self.inv.apply(op, x, y, z);
    }

    fn apply_bitwise(&mut self, op: BitwiseOp, x: &Variable, y: &Variable, z: &Operand) {
        self.inv.apply_bitwise(op, x, y, z);
    }

    fn apply_div(&mut self, op: DivOp, x: &Variable, y: &Variable, z: &Operand) {
        self.inv.apply_div(op, x, y, z);
    }

    fn apply_cast(&mut self, op: CastOp, dst: &Variable, src: &Variable) {
        self.inv.apply_cast(op, dst, src);
    }

    fn assume(&mut self, cst: &LinearConstraint) {
        self.inv.assume(cst);
    }

    fn forget(&mut self, v: &Variable) {
        self.inv.forget(v);
    }

    fn project(&mut self, vars: &[Variable]) {
        self.inv.project(vars);
    }

    fn rename(&mut self, from: &[Variable], to: &[Variable]) {
        self.inv.rename(from, to);
    }

    fn expand(&mut self, x: &Variable, y: &Variable) {
        if x.is_array() {
            // Expanding a summary would need a disjoint copy of the whole
            // array; precision is lost instead.
            self.sink
                .warn(format!("smashing cannot expand array summary {x}"));
            return;
        }
        self.inv.expand(x, y);
    }

    fn set(&mut self, x: &Variable, intv: Interval) {
        self.inv.set(x, intv);
    }

    fn value_of(&self, x: &Variable) -> Interval {
        self.inv.value_of(x)
    }

    fn to_constraints(&self) -> LinearConstraintSystem {
        self.inv.to_constraints()
    }
}

impl<D: AbstractDomain> ArrayDomain for ArraySmashing<D> {
    fn array_init(
        &mut self,
        a: &Variable,
        _elem_size: &LinearExpr,
        _lb: &LinearExpr,
        _ub: &LinearExpr,
        val: &LinearExpr,
    ) {
        self.strong_update(a, val);
        debug!(target: "octant", "forall i: {a}[i] := {val}");
    }

    fn array_load(
        &mut self,
        lhs: &Variable,
        a: &Variable,
        _elem_size: &LinearExpr,
        i: &LinearExpr,
    ) {
        if a.ty().element() == ScalarType::Ptr {
            self.sink
                .warn(format!("smashing cannot load pointer summary {a}"));
            self.inv.forget(lhs);
            return;
        }
        // Materialise a copy of the summary so lhs never aliases it.
        let shadow = a
            .factory()
            .fresh("smash", VarType::Scalar(a.ty().element()));
        self.inv.expand(a, &shadow);
        self.inv.assign(lhs, &LinearExpr::var(&shadow));
        self.inv.forget(&shadow);
        debug!(target: "octant", "{lhs} := {a}[{i}]");
    }

    fn array_store(
        &mut self,
        a: &Variable,
        _elem_size: &LinearExpr,
        i: &LinearExpr,
        val: &LinearExpr,
        is_singleton: bool,
    ) {
        if is_singleton {
            self.strong_update(a, val);
        } else {
            self.weak_update(a, val);
        }
        debug!(target: "octant", "{a}[{i}] := {val}");
    }

    fn array_assign(&mut self, lhs: &Variable, rhs: &Variable) {
        match lhs.ty().element() {
            ScalarType::Int { .. } | ScalarType::Real | ScalarType::Bool => {
                self.inv.assign(lhs, &LinearExpr::var(rhs));
            }
            ScalarType::Ptr => {
                self.sink
                    .warn(format!("smashing cannot assign pointer summary {lhs}"));
                self.inv.forget(lhs);
            }
        }
    }
}

impl<D: AbstractDomain> fmt::Display for ArraySmashing<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inv)
    }
}
