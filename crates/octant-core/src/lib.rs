//! Core building blocks for the octant numerical analyzer.
//!
//! This crate defines the pieces every domain shares:
//!
//! - [`Variable`] / [`VarFactory`]: stable program-variable identities
//! - [`Bound`] / [`Interval`]: extended integers and the interval algebra
//! - [`LinearExpr`] / [`LinearConstraint`]: the linear constraint surface
//! - [`AbstractDomain`] / [`ArrayDomain`]: the trait contract the fixpoint
//!   iterator programs against
//! - [`IntervalDomain`]: the non-relational base domain
//! - [`WarningSink`]: the imprecision warning channel
//!
//! # Example
//!
//! ```
//! use octant_core::{AbstractDomain, IntervalDomain, LinearConstraint, LinearExpr, VarFactory};
//!
//! let vfac = VarFactory::new();
//! let x = vfac.int("x", 32);
//!
//! let mut dom = IntervalDomain::top();
//! dom.assume(&LinearConstraint::leq(LinearExpr::var(&x), LinearExpr::constant(10)));
//! dom.assume(&LinearConstraint::geq(LinearExpr::var(&x), LinearExpr::constant(0)));
//!
//! assert!(dom.entail(&LinearConstraint::leq(LinearExpr::var(&x), LinearExpr::constant(10))));
//! ```

pub mod bound;
pub mod domain;
pub mod interval;
pub mod interval_domain;
pub mod linear;
pub mod variable;
pub mod warning;

pub use bound::{div_ceil, div_floor, Bound};
pub use domain::{
    AbstractDomain, ArithOp, ArrayDomain, BitwiseOp, CastOp, DivOp, Operand,
};
pub use interval::Interval;
pub use interval_domain::IntervalDomain;
pub use linear::{ConstraintKind, LinearConstraint, LinearConstraintSystem, LinearExpr};
pub use variable::{ScalarType, VarError, VarFactory, VarType, Variable};
pub use warning::WarningSink;
