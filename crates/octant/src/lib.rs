//! octant: sound numerical invariants for integer programs.
//!
//! The library is a stack of abstract domains over a shared trait contract:
//!
//! - [`IntervalDomain`]: non-relational variable ranges
//! - [`Octagon`]: relations `±x ± y ≤ c` over an incrementally closed
//!   weighted pair graph, behind a copy-on-write wrapper
//! - [`ArraySmashing`] / [`ArrayExpansion`]: functors adding array semantics
//!   on top of any numerical domain
//!
//! plus a small worklist [`fixpoint`] engine with widening (optionally with
//! thresholds) and narrowing, for driving the domains over a control-flow
//! graph.
//!
//! # Example
//!
//! ```
//! use octant::{AbstractDomain, LinearConstraint, LinearExpr, Octagon, VarFactory};
//!
//! let vfac = VarFactory::new();
//! let x = vfac.int("x", 32);
//! let y = vfac.int("y", 32);
//!
//! let mut state = Octagon::top();
//! // x - y <= 0 and y <= 10 entail x <= 10.
//! state.assume(&LinearConstraint::leq(
//!     LinearExpr::var(&x).plus_term(-1, &y),
//!     LinearExpr::constant(0),
//! ));
//! state.assume(&LinearConstraint::leq(LinearExpr::var(&y), LinearExpr::constant(10)));
//! assert!(state.entail(&LinearConstraint::leq(
//!     LinearExpr::var(&x),
//!     LinearExpr::constant(10),
//! )));
//! ```

pub mod fixpoint;

pub use octant_arrays::{ArrayExpansion, ArraySmashing};
pub use octant_core::{
    AbstractDomain, ArithOp, ArrayDomain, BitwiseOp, Bound, CastOp, ConstraintKind, DivOp,
    Interval, IntervalDomain, LinearConstraint, LinearConstraintSystem, LinearExpr, Operand,
    ScalarType, VarError, VarFactory, VarType, Variable, WarningSink,
};
pub use octant_graph as graph;
pub use octant_octagon::{Octagon, SplitOctagon};

pub use fixpoint::{forward_analysis, ControlFlowGraph, FixpointConfig, FixpointResult, TransferFunction};

/// Current version of the library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
