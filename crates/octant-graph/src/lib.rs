//! Weighted directed graphs with incremental shortest-path closure.
//!
//! This crate is the representation layer under the split octagon domain:
//! a [`WeightedGraph`] whose edges carry `i64` weights (an absent edge is
//! `+∞`), two zero-copy views ([`PermView`] for vertex renamings,
//! [`SplitView`] to mask the intra-pair bound edges), and the closure,
//! potential-maintenance, and graph-level lattice algorithms in [`ops`].
//!
//! The closure contract: after a sequence of edge insertions followed by the
//! matching close operation, `edge_val(i, j)` equals the shortest-path
//! distance from `i` to `j` over the current weights for every pair.
//!
//! Potentials (`π`) are Johnson-style reweightings: `π[i] + w(i,j) - π[j] ≥ 0`
//! for every edge. They are state, not cached information: if a transfer makes
//! them unrepairable the constraint system has a negative cycle and the
//! abstract state is unsatisfiable.

pub mod graph;
pub mod ops;
pub mod view;

pub use graph::{Edge, Graph, VertId, Weight, WeightedGraph};
pub use view::{PermView, SplitView};
