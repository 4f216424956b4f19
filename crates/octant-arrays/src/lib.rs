//! Array functor domains.
//!
//! Both functors wrap an arbitrary numerical domain and add the array
//! operator sub-interface on top of it:
//!
//! - [`ArraySmashing`] collapses each array into one summary cell: cheap,
//!   and precise exactly when every store can be proven to hit one cell.
//! - [`ArrayExpansion`] tracks individual byte ranges as per-cell scalar
//!   variables: precise for constant indices, with overlap analysis and
//!   kill-on-overwrite.
//!
//! Imprecision (non-constant index, overlapping load, oversized init) is
//! reported through the [`WarningSink`](octant_core::WarningSink) and the
//! operation degrades conservatively: reads forget their destination, writes
//! are dropped.

pub mod expansion;
pub mod smashing;

pub use expansion::{ArrayExpansion, Cell, OffsetMap};
pub use smashing::ArraySmashing;
