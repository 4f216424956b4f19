//! Linear expressions and constraints: the surface every domain consumes.
//!
//! A constraint is `expr ⊕ 0` where `⊕` is one of `=`, `≤`, `<`, `≠`. The
//! convenience constructors take two expressions and move everything to the
//! left-hand side.

use std::collections::BTreeMap;
use std::fmt;

use crate::variable::Variable;

/// `Σ coeff·var + constant` with `i64` coefficients. Zero coefficients are
/// never stored.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinearExpr {
    terms: BTreeMap<Variable, i64>,
    constant: i64,
}

impl LinearExpr {
    pub fn constant(k: i64) -> Self {
        LinearExpr {
            terms: BTreeMap::new(),
            constant: k,
        }
    }

    pub fn var(v: &Variable) -> Self {
        LinearExpr::constant(0).plus_term(1, v)
    }

    pub fn plus_term(mut self, coeff: i64, v: &Variable) -> Self {
        if coeff != 0 {
            let c = self.terms.entry(v.clone()).or_insert(0);
            *c += coeff;
            if *c == 0 {
                self.terms.remove(v);
            }
        }
        self
    }

    pub fn plus(mut self, k: i64) -> Self {
        self.constant += k;
        self
    }

    pub fn add(&self, other: &LinearExpr) -> LinearExpr {
        let mut out = self.clone();
        out.constant += other.constant;
        for (v, c) in &other.terms {
            out = out.plus_term(*c, v);
        }
        out
    }

    pub fn sub(&self, other: &LinearExpr) -> LinearExpr {
        self.add(&other.neg())
    }

    pub fn neg(&self) -> LinearExpr {
        LinearExpr {
            terms: self.terms.iter().map(|(v, c)| (v.clone(), -c)).collect(),
            constant: -self.constant,
        }
    }

    pub fn mul_const(&self, k: i64) -> LinearExpr {
        if k == 0 {
            return LinearExpr::constant(0);
        }
        LinearExpr {
            terms: self.terms.iter().map(|(v, c)| (v.clone(), c * k)).collect(),
            constant: self.constant * k,
        }
    }

    pub fn constant_term(&self) -> i64 {
        self.constant
    }

    pub fn terms(&self) -> impl Iterator<Item = (&Variable, i64)> {
        self.terms.iter().map(|(v, c)| (v, *c))
    }

    pub fn num_terms(&self) -> usize {
        self.terms.len()
    }

    pub fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn coeff_of(&self, v: &Variable) -> i64 {
        self.terms.get(v).copied().unwrap_or(0)
    }

    /// `Some(v)` when the expression is exactly `v`.
    pub fn as_variable(&self) -> Option<&Variable> {
        if self.constant == 0 && self.terms.len() == 1 {
            let (v, c) = self.terms.iter().next()?;
            if *c == 1 {
                return Some(v);
            }
        }
        None
    }

    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.terms.keys()
    }

    /// The expression with `pivot`'s term removed.
    pub fn without(&self, pivot: &Variable) -> LinearExpr {
        let mut out = self.clone();
        out.terms.remove(pivot);
        out
    }
}

impl From<&Variable> for LinearExpr {
    fn from(v: &Variable) -> Self {
        LinearExpr::var(v)
    }
}

impl From<i64> for LinearExpr {
    fn from(k: i64) -> Self {
        LinearExpr::constant(k)
    }
}

impl fmt::Display for LinearExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (v, c) in &self.terms {
            if *c >= 0 && !first {
                write!(f, "+")?;
            }
            match *c {
                1 => write!(f, "{v}")?,
                -1 => write!(f, "-{v}")?,
                c => write!(f, "{c}*{v}")?,
            }
            first = false;
        }
        if self.constant != 0 || first {
            if self.constant >= 0 && !first {
                write!(f, "+")?;
            }
            write!(f, "{}", self.constant)?;
        }
        Ok(())
    }
}

/// How a [`LinearConstraint`] relates its expression to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// `expr = 0`
    Equality,
    /// `expr ≤ 0`
    Inequality,
    /// `expr < 0` — representable but unhandled by the domains, which warn
    /// and leave the state unchanged.
    StrictInequality,
    /// `expr ≠ 0`
    Disequation,
}

/// `expr ⊕ 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConstraint {
    expr: LinearExpr,
    kind: ConstraintKind,
}

impl LinearConstraint {
    pub fn new(expr: LinearExpr, kind: ConstraintKind) -> Self {
        LinearConstraint { expr, kind }
    }

    /// `lhs = rhs`
    pub fn eq(lhs: LinearExpr, rhs: LinearExpr) -> Self {
        LinearConstraint::new(lhs.sub(&rhs), ConstraintKind::Equality)
    }

    /// `lhs ≤ rhs`
    pub fn leq(lhs: LinearExpr, rhs: LinearExpr) -> Self {
        LinearConstraint::new(lhs.sub(&rhs), ConstraintKind::Inequality)
    }

    /// `lhs ≥ rhs`
    pub fn geq(lhs: LinearExpr, rhs: LinearExpr) -> Self {
        LinearConstraint::leq(rhs, lhs)
    }

    /// `lhs < rhs`
    pub fn lt(lhs: LinearExpr, rhs: LinearExpr) -> Self {
        LinearConstraint::new(lhs.sub(&rhs), ConstraintKind::StrictInequality)
    }

    /// `lhs ≠ rhs`
    pub fn neq(lhs: LinearExpr, rhs: LinearExpr) -> Self {
        LinearConstraint::new(lhs.sub(&rhs), ConstraintKind::Disequation)
    }

    /// The canonical unsatisfiable constraint, `1 = 0`.
    pub fn contradiction() -> Self {
        LinearConstraint::new(LinearExpr::constant(1), ConstraintKind::Equality)
    }

    pub fn expression(&self) -> &LinearExpr {
        &self.expr
    }

    pub fn kind(&self) -> ConstraintKind {
        self.kind
    }

    pub fn is_tautology(&self) -> bool {
        if !self.expr.is_constant() {
            return false;
        }
        let k = self.expr.constant_term();
        match self.kind {
            ConstraintKind::Equality => k == 0,
            ConstraintKind::Inequality => k <= 0,
            ConstraintKind::StrictInequality => k < 0,
            ConstraintKind::Disequation => k != 0,
        }
    }

    pub fn is_contradiction(&self) -> bool {
        self.expr.is_constant() && !self.is_tautology()
    }

    /// Logical negation, lowered for integer semantics so the result never
    /// needs a strict inequality: `¬(e ≤ 0)` becomes `-e + 1 ≤ 0`.
    pub fn negate(&self) -> LinearConstraint {
        match self.kind {
            ConstraintKind::Equality => {
                LinearConstraint::new(self.expr.clone(), ConstraintKind::Disequation)
            }
            ConstraintKind::Disequation => {
                LinearConstraint::new(self.expr.clone(), ConstraintKind::Equality)
            }
            ConstraintKind::Inequality => {
                LinearConstraint::new(self.expr.neg().plus(1), ConstraintKind::Inequality)
            }
            ConstraintKind::StrictInequality => {
                LinearConstraint::new(self.expr.neg(), ConstraintKind::Inequality)
            }
        }
    }

    /// Split an equality into its two inequalities; other kinds pass through.
    pub fn lower_equality(&self) -> Vec<LinearConstraint> {
        match self.kind {
            ConstraintKind::Equality => vec![
                LinearConstraint::new(self.expr.clone(), ConstraintKind::Inequality),
                LinearConstraint::new(self.expr.neg(), ConstraintKind::Inequality),
            ],
            _ => vec![self.clone()],
        }
    }
}

impl fmt::Display for LinearConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.kind {
            ConstraintKind::Equality => "=",
            ConstraintKind::Inequality => "<=",
            ConstraintKind::StrictInequality => "<",
            ConstraintKind::Disequation => "!=",
        };
        write!(f, "{} {} 0", self.expr, op)
    }
}

/// A conjunction of constraints.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinearConstraintSystem {
    csts: Vec<LinearConstraint>,
}

impl LinearConstraintSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, cst: LinearConstraint) {
        self.csts.push(cst);
    }

    pub fn iter(&self) -> impl Iterator<Item = &LinearConstraint> {
        self.csts.iter()
    }

    pub fn len(&self) -> usize {
        self.csts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.csts.is_empty()
    }
}

impl FromIterator<LinearConstraint> for LinearConstraintSystem {
    fn from_iter<I: IntoIterator<Item = LinearConstraint>>(iter: I) -> Self {
        LinearConstraintSystem {
            csts: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for LinearConstraintSystem {
    type Item = LinearConstraint;
    type IntoIter = std::vec::IntoIter<LinearConstraint>;

    fn into_iter(self) -> Self::IntoIter {
        self.csts.into_iter()
    }
}

impl fmt::Display for LinearConstraintSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, c) in self.csts.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{c}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::VarFactory;

    #[test]
    fn terms_cancel() {
        let vfac = VarFactory::new();
        let x = vfac.int("x", 32);
        let e = LinearExpr::var(&x).plus_term(-1, &x).plus(7);
        assert!(e.is_constant());
        assert_eq!(e.constant_term(), 7);
    }

    #[test]
    fn negation_is_integer_exact() {
        let vfac = VarFactory::new();
        let x = vfac.int("x", 32);
        // ¬(x ≤ 3) is x ≥ 4, i.e. -x + 4 ≤ 0.
        let cst = LinearConstraint::leq(LinearExpr::var(&x), LinearExpr::constant(3));
        let neg = cst.negate();
        assert_eq!(neg.kind(), ConstraintKind::Inequality);
        assert_eq!(neg.expression().coeff_of(&x), -1);
        assert_eq!(neg.expression().constant_term(), 4);
    }

    #[test]
    fn equality_lowers_to_two_inequalities() {
        let vfac = VarFactory::new();
        let x = vfac.int("x", 32);
        let y = vfac.int("y", 32);
        let cst = LinearConstraint::eq(LinearExpr::var(&x), LinearExpr::var(&y));
        let lowered = cst.lower_equality();
        assert_eq!(lowered.len(), 2);
        assert!(lowered
            .iter()
            .all(|c| c.kind() == ConstraintKind::Inequality));
    }

    #[test]
    fn tautology_and_contradiction() {
        assert!(LinearConstraint::new(LinearExpr::constant(0), ConstraintKind::Equality)
            .is_tautology());
        assert!(LinearConstraint::contradiction().is_contradiction());
        assert!(LinearConstraint::new(LinearExpr::constant(-1), ConstraintKind::Inequality)
            .is_tautology());
    }
}
