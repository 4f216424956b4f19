//! Copy-on-write wrapper around [`SplitOctagon`].
//!
//! The wrapper keeps two reference-counted handles: `norm`, the current
//! (lazily normalised) state, and `base`, an optional snapshot taken when the
//! wrapper came out of a widening. Widening always uses `base` as its left
//! operand — the raw, unclosed previous result — which is what keeps the
//! ascending sequence from oscillating; every mutation goes through `lock`,
//! which clones a shared `norm` and drops `base`.
//!
//! Cloning a wrapper shares both handles; a clone only pays for a deep copy
//! at its first mutation. A mutation through one handle is never observable
//! through another taken earlier.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use octant_core::{
    AbstractDomain, ArithOp, BitwiseOp, CastOp, Interval, LinearConstraint,
    LinearConstraintSystem, LinearExpr, Operand, Variable,
};
use octant_core::DivOp;

use crate::split_oct::SplitOctagon;

/// The octagon domain value handed to the fixpoint iterator.
#[derive(Debug)]
pub struct Octagon {
    base: RefCell<Option<Rc<SplitOctagon>>>,
    norm: RefCell<Rc<SplitOctagon>>,
}

impl Clone for Octagon {
    fn clone(&self) -> Self {
        Octagon {
            base: RefCell::new(self.base.borrow().clone()),
            norm: RefCell::new(self.norm.borrow().clone()),
        }
    }
}

impl Octagon {
    fn from_impl(t: SplitOctagon) -> Self {
        Octagon {
            base: RefCell::new(None),
            norm: RefCell::new(Rc::new(t)),
        }
    }

    /// Wrap a widening result, retaining it as the next widening's base.
    fn from_base(t: SplitOctagon) -> Self {
        Octagon {
            base: RefCell::new(Some(Rc::new(t.clone()))),
            norm: RefCell::new(Rc::new(t)),
        }
    }

    /// Normalise `norm` in place, cloning first if it is shared.
    fn normalize(&self) {
        let needs = !self.norm.borrow().is_normalized();
        if needs {
            let mut rc = self.norm.borrow_mut();
            Rc::make_mut(&mut rc).normalize();
        }
    }

    /// The normalised current state.
    fn snapshot(&self) -> Rc<SplitOctagon> {
        self.normalize();
        self.norm.borrow().clone()
    }

    /// The widening input: the raw base if one is held, the current state
    /// otherwise. Deliberately not normalised.
    fn base_snapshot(&self) -> Rc<SplitOctagon> {
        match &*self.base.borrow() {
            Some(b) => b.clone(),
            None => self.norm.borrow().clone(),
        }
    }

    /// Transition to uniquely-owned and mutate.
    fn lock_mut<R>(&self, f: impl FnOnce(&mut SplitOctagon) -> R) -> R {
        self.base.borrow_mut().take();
        let mut rc = self.norm.borrow_mut();
        f(Rc::make_mut(&mut rc))
    }

    /// True when the state cannot satisfy `cst`.
    pub fn is_unsat(&self, cst: &LinearConstraint) -> bool {
        self.lock_mut(|t| t.is_unsat(cst))
    }

    /// Variables carrying at least one constraint.
    pub fn active_variables(&self) -> Vec<Variable> {
        self.snapshot().active_variables()
    }

    /// Widening with the base snapshot as the left operand.
    fn widen_inner(&self, other: &Self, thresholds: Option<&[i64]>) -> Self {
        if self.is_bottom() {
            return other.clone();
        }
        if other.is_bottom() {
            return self.clone();
        }
        other.normalize();
        let left = self.base_snapshot();
        let right = other.norm.borrow().clone();
        Octagon::from_base(left.widening(&right, thresholds))
    }
}

impl AbstractDomain for Octagon {
    fn top() -> Self {
        Octagon::from_impl(SplitOctagon::top())
    }

    fn bottom() -> Self {
        Octagon::from_impl(SplitOctagon::bottom())
    }

    fn is_top(&self) -> bool {
        self.norm.borrow().is_top()
    }

    fn is_bottom(&self) -> bool {
        self.norm.borrow().is_bottom()
    }

    fn leq(&self, other: &Self) -> bool {
        if self.is_bottom() {
            return true;
        }
        if other.is_bottom() {
            return false;
        }
        if other.is_top() {
            return true;
        }
        if self.is_top() {
            return false;
        }
        let a = self.snapshot();
        let b = other.snapshot();
        a.leq(&b)
    }

    fn join(&self, other: &Self) -> Self {
        if self.is_bottom() || other.is_top() {
            return other.clone();
        }
        if other.is_bottom() || self.is_top() {
            return self.clone();
        }
        let a = self.snapshot();
        let b = other.snapshot();
        Octagon::from_impl(a.join(&b))
    }

    fn meet(&self, other: &Self) -> Self {
        if self.is_bottom() || other.is_bottom() {
            return Octagon::bottom();
        }
        if self.is_top() {
            return other.clone();
        }
        if other.is_top() {
            return self.clone();
        }
        let a = self.snapshot();
        let b = other.snapshot();
        Octagon::from_impl(a.meet(&b))
    }

    fn widen(&self, other: &Self) -> Self {
        self.widen_inner(other, None)
    }

    fn widen_with_thresholds(&self, other: &Self, thresholds: &[i64]) -> Self {
        self.widen_inner(other, Some(thresholds))
    }

    fn narrow(&self, other: &Self) -> Self {
        if self.is_bottom() || other.is_bottom() {
            return Octagon::bottom();
        }
        if self.is_top() {
            return other.clone();
        }
        let a = self.snapshot();
        let b = other.snapshot();
        Octagon::from_impl(a.narrowing(&b))
    }

    fn assign(&mut self, x: &Variable, e: &LinearExpr) {
        self.lock_mut(|t| t.assign(x, e));
    }

    fn apply(&mut self, op: ArithOp, x: &Variable, y: &Variable, z: &Operand) {
        self.lock_mut(|t| t.apply(op, x, y, z));
    }

    fn apply_bitwise(&mut self, op: BitwiseOp, x: &Variable, y: &Variable, z: &Operand) {
        self.lock_mut(|t| t.apply_bitwise(op, x, y, z));
    }

    fn apply_div(&mut self, op: DivOp, x: &Variable, y: &Variable, z: &Operand) {
        self.lock_mut(|t| t.apply_div(op, x, y, z));
    }

    fn apply_cast(&mut self, op: CastOp, dst: &Variable, src: &Variable) {
        self.lock_mut(|t| t.apply_cast(op, dst, src));
    }

    fn assume(&mut self, cst: &LinearConstraint) {
        self.lock_mut(|t| t.assume(cst));
    }

    fn forget(&mut self, v: &Variable) {
        self.lock_mut(|t| t.forget(v));
    }

    fn project(&mut self, vars: &[Variable]) {
        self.lock_mut(|t| t.project(vars));
    }

    fn rename(&mut self, from: &[Variable], to: &[Variable]) {
        self.lock_mut(|t| t.rename(from, to));
    }

    fn expand(&mut self, x: &Variable, y: &Variable) {
        self.lock_mut(|t| t.expand(x, y));
    }

    fn set(&mut self, x: &Variable, intv: Interval) {
        self.lock_mut(|t| t.set(x, intv));
    }

    fn value_of(&self, x: &Variable) -> Interval {
        self.snapshot().value_of(x)
    }

    fn to_constraints(&self) -> LinearConstraintSystem {
        self.snapshot().to_constraints()
    }
}

impl fmt::Display for Octagon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.snapshot())
    }
}
