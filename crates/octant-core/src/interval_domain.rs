//! The interval domain: one interval per variable, no relations.
//!
//! This is the non-relational base domain the array functors wrap, and the
//! second implementor of [`AbstractDomain`] next to the octagon.

use std::collections::BTreeMap;
use std::fmt;

use tracing::warn;

use crate::bound::Bound;
use crate::domain::{AbstractDomain, ArithOp, BitwiseOp, CastOp, DivOp, Operand};
use crate::interval::Interval;
use crate::linear::{
    ConstraintKind, LinearConstraint, LinearConstraintSystem, LinearExpr,
};
use crate::variable::Variable;

/// Map from variable to interval; absent means top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalDomain {
    env: BTreeMap<Variable, Interval>,
    bottom: bool,
}

impl IntervalDomain {
    fn set_to_bottom(&mut self) {
        self.env.clear();
        self.bottom = true;
    }

    fn store(&mut self, v: &Variable, intv: Interval) {
        if intv.is_bottom() {
            self.set_to_bottom();
        } else if intv.is_top() {
            self.env.remove(v);
        } else {
            self.env.insert(v.clone(), intv);
        }
    }

    fn operand_interval(&self, z: &Operand) -> Interval {
        match z {
            Operand::Var(v) => self.value_of(v),
            Operand::Const(k) => Interval::singleton_of(*k),
        }
    }

    /// Tighten every pivot of `e ≤ 0` against the interval envelope of the
    /// remaining terms.
    fn propagate_leq(&mut self, e: &LinearExpr) {
        let pivots: Vec<(Variable, i64)> = e.terms().map(|(v, c)| (v.clone(), c)).collect();
        if pivots.is_empty() {
            if e.constant_term() > 0 {
                self.set_to_bottom();
            }
            return;
        }
        for (x, a) in pivots {
            if self.bottom {
                return;
            }
            // a*x <= -rest, where rest is e without the pivot term.
            let rest = e.without(&x);
            let rest_i = self.eval(&rest);
            if rest_i.is_bottom() {
                self.set_to_bottom();
                return;
            }
            let limit = -rest_i.lb();
            let new_i = match limit {
                Bound::PosInf => continue,
                Bound::NegInf => Interval::bottom(),
                bound => {
                    if a > 0 {
                        Interval::new(Bound::NegInf, bound.div_floor_const(a))
                    } else {
                        Interval::new(bound.div_ceil_const(a), Bound::PosInf)
                    }
                }
            };
            let tightened = self.value_of(&x).meet(&new_i);
            self.store(&x, tightened);
        }
    }

    fn propagate_disequation(&mut self, e: &LinearExpr) {
        // For each pivot with a singleton residual, trim the pivot interval.
        let pivots: Vec<(Variable, i64)> = e.terms().map(|(v, c)| (v.clone(), c)).collect();
        for (x, a) in pivots {
            if self.bottom {
                return;
            }
            // a*x + rest != 0 excludes x = -rest/a when the residual is a
            // singleton that divides exactly.
            let rest = e.without(&x);
            let Some(r) = self.eval(&rest).singleton() else {
                continue;
            };
            if r % a != 0 {
                // a*x = -r has no integer solution; nothing to exclude.
                continue;
            }
            let k = -r / a;
            let trimmed = self.value_of(&x).trim(k);
            self.store(&x, trimmed);
        }
    }
}

impl AbstractDomain for IntervalDomain {
    fn top() -> Self {
        IntervalDomain {
            env: BTreeMap::new(),
            bottom: false,
        }
    }

    fn bottom() -> Self {
        IntervalDomain {
            env: BTreeMap::new(),
            bottom: true,
        }
    }

    fn is_top(&self) -> bool {
        !self.bottom && self.env.is_empty()
    }

    fn is_bottom(&self) -> bool {
        self.bottom
    }

    fn leq(&self, other: &Self) -> bool {
        if self.bottom {
            return true;
        }
        if other.bottom {
            return false;
        }
        other
            .env
            .iter()
            .all(|(v, i)| self.value_of(v).leq(i))
    }

    fn join(&self, other: &Self) -> Self {
        if self.bottom {
            return other.clone();
        }
        if other.bottom {
            return self.clone();
        }
        let mut out = IntervalDomain::top();
        for v in self.env.keys() {
            if other.env.contains_key(v) {
                out.store(v, self.value_of(v).join(&other.value_of(v)));
            }
        }
        out
    }

    fn meet(&self, other: &Self) -> Self {
        if self.bottom || other.bottom {
            return IntervalDomain::bottom();
        }
        let mut out = self.clone();
        for (v, i) in &other.env {
            if out.bottom {
                break;
            }
            let met = out.value_of(v).meet(i);
            out.store(v, met);
        }
        out
    }

    fn widen(&self, other: &Self) -> Self {
        self.widen_with_thresholds(other, &[])
    }

    fn widen_with_thresholds(&self, other: &Self, thresholds: &[i64]) -> Self {
        if self.bottom {
            return other.clone();
        }
        if other.bottom {
            return self.clone();
        }
        let mut out = IntervalDomain::top();
        for v in self.env.keys() {
            if other.env.contains_key(v) {
                let w = self
                    .value_of(v)
                    .widen_with_thresholds(&other.value_of(v), thresholds);
                out.store(v, w);
            }
        }
        out
    }

    fn narrow(&self, other: &Self) -> Self {
        if self.bottom || other.bottom {
            return IntervalDomain::bottom();
        }
        let mut out = IntervalDomain::top();
        let vars: Vec<&Variable> = self.env.keys().chain(other.env.keys()).collect();
        for v in vars {
            let n = self.value_of(v).narrow(&other.value_of(v));
            out.store(v, n);
            if out.bottom {
                break;
            }
        }
        out
    }

    fn assign(&mut self, x: &Variable, e: &LinearExpr) {
        if self.bottom {
            return;
        }
        let val = self.eval(e);
        self.store(x, val);
    }

    fn apply(&mut self, op: ArithOp, x: &Variable, y: &Variable, z: &Operand) {
        if self.bottom {
            return;
        }
        let yi = self.value_of(y);
        let zi = self.operand_interval(z);
        let r = match op {
            ArithOp::Add => yi.add(&zi),
            ArithOp::Sub => yi.sub(&zi),
            ArithOp::Mul => yi.mul(&zi),
            ArithOp::Div => yi.div(&zi),
        };
        self.store(x, r);
    }

    fn apply_bitwise(&mut self, op: BitwiseOp, x: &Variable, y: &Variable, z: &Operand) {
        if self.bottom {
            return;
        }
        let yi = self.value_of(y);
        let zi = self.operand_interval(z);
        let r = match op {
            BitwiseOp::And => yi.and(&zi),
            BitwiseOp::Or => yi.or(&zi),
            BitwiseOp::Xor => yi.xor(&zi),
            BitwiseOp::Shl => yi.shl(&zi),
            BitwiseOp::LShr => yi.lshr(&zi),
            BitwiseOp::AShr => yi.ashr(&zi),
        };
        self.store(x, r);
    }

    fn apply_div(&mut self, op: DivOp, x: &Variable, y: &Variable, z: &Operand) {
        if self.bottom {
            return;
        }
        let yi = self.value_of(y);
        let zi = self.operand_interval(z);
        let r = match op {
            DivOp::SDiv => yi.div(&zi),
            DivOp::UDiv => yi.udiv(&zi),
            DivOp::SRem => yi.srem(&zi),
            DivOp::URem => yi.urem(&zi),
        };
        self.store(x, r);
    }

    fn apply_cast(&mut self, _op: CastOp, dst: &Variable, src: &Variable) {
        // Reasoning is over unbounded integers; widths are erased.
        if self.bottom {
            return;
        }
        let v = self.value_of(src);
        self.store(dst, v);
    }

    fn assume(&mut self, cst: &LinearConstraint) {
        if self.bottom || cst.is_tautology() {
            return;
        }
        if cst.is_contradiction() {
            self.set_to_bottom();
            return;
        }
        match cst.kind() {
            ConstraintKind::Inequality => self.propagate_leq(cst.expression()),
            ConstraintKind::Equality => {
                self.propagate_leq(cst.expression());
                if !self.bottom {
                    self.propagate_leq(&cst.expression().neg());
                }
            }
            ConstraintKind::Disequation => self.propagate_disequation(cst.expression()),
            ConstraintKind::StrictInequality => {
                warn!(target: "octant", "unhandled strict inequality: {cst}");
            }
        }
    }

    fn forget(&mut self, v: &Variable) {
        if self.bottom {
            return;
        }
        self.env.remove(v);
    }

    fn project(&mut self, vars: &[Variable]) {
        if self.bottom {
            return;
        }
        self.env.retain(|v, _| vars.contains(v));
    }

    fn rename(&mut self, from: &[Variable], to: &[Variable]) {
        assert_eq!(from.len(), to.len(), "rename arity mismatch");
        if self.bottom {
            return;
        }
        for (f, t) in from.iter().zip(to) {
            if let Some(i) = self.env.remove(f) {
                self.env.insert(t.clone(), i);
            }
        }
    }

    fn expand(&mut self, x: &Variable, y: &Variable) {
        if self.bottom {
            return;
        }
        let i = self.value_of(x);
        self.store(y, i);
    }

    fn set(&mut self, x: &Variable, intv: Interval) {
        if self.bottom {
            return;
        }
        self.store(x, intv);
    }

    fn value_of(&self, x: &Variable) -> Interval {
        if self.bottom {
            return Interval::bottom();
        }
        self.env.get(x).copied().unwrap_or_else(Interval::top)
    }

    fn to_constraints(&self) -> LinearConstraintSystem {
        let mut out = LinearConstraintSystem::new();
        if self.bottom {
            out.push(LinearConstraint::contradiction());
            return out;
        }
        for (v, i) in &self.env {
            if let Some(lb) = i.lb().number() {
                out.push(LinearConstraint::geq(
                    LinearExpr::var(v),
                    LinearExpr::constant(lb),
                ));
            }
            if let Some(ub) = i.ub().number() {
                out.push(LinearConstraint::leq(
                    LinearExpr::var(v),
                    LinearExpr::constant(ub),
                ));
            }
        }
        out
    }
}

impl fmt::Display for IntervalDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bottom {
            return f.write_str("_|_");
        }
        if self.env.is_empty() {
            return f.write_str("{}");
        }
        write!(f, "{{")?;
        for (i, (v, intv)) in self.env.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v} -> {intv}")?;
        }
        write!(f, "}}")
    }
}
