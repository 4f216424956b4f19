//! The array-expansion functor: one scalar variable per byte range.
//!
//! Each array maps offsets to *cells* `(offset, size, scalar)`, where the
//! scalar stands for the contents of `a[offset .. offset+size)`. Cells are
//! created lazily on first access; two cells may overlap as byte ranges (a
//! 4-byte write over a 1-byte one), and a store kills every overlapping cell
//! before strongly updating its own. Cell scalars get their identity from
//! the shared variable factory, so the same `(array, offset, size)` triple
//! names the same scalar in every abstract state of one analysis.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Bound as RangeBound;

use tracing::debug;

use octant_core::{
    AbstractDomain, ArithOp, ArrayDomain, BitwiseOp, CastOp, Interval, LinearConstraint,
    LinearConstraintSystem, LinearExpr, Operand, VarType, Variable, WarningSink,
};
use octant_core::DivOp;

/// Largest number of elements `array_init` is willing to expand eagerly.
const MAX_INIT_ELEMS: i64 = 512;

/// A contiguous byte range of an array together with its scalar variable.
/// Ordering and equality ignore the scalar: cell identity is the range.
#[derive(Debug, Clone, Eq)]
pub struct Cell {
    offset: i64,
    size: u64,
    scalar: Variable,
}

impl Cell {
    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn scalar(&self) -> &Variable {
        &self.scalar
    }

    fn end(&self) -> i64 {
        self.offset + self.size as i64
    }

    /// Byte-range intersection test against `[o, o + size)`.
    pub fn overlaps(&self, o: i64, size: u64) -> bool {
        self.offset.max(o) < self.end().min(o + size as i64)
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset && self.size == other.size
    }
}

impl PartialOrd for Cell {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cell {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.offset, self.size).cmp(&(other.offset, other.size))
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}] -> {}", self.offset, self.end() - 1, self.scalar)
    }
}

/// Sorted map from offset to the cells starting there.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetMap {
    cells: BTreeMap<i64, BTreeSet<Cell>>,
}

impl OffsetMap {
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter_cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.values().flatten()
    }

    fn get_cell(&self, o: i64, size: u64) -> Option<&Cell> {
        self.cells
            .get(&o)
            .and_then(|set| set.iter().find(|c| c.size == size))
    }

    fn insert_cell(&mut self, c: Cell) {
        self.cells.entry(c.offset).or_default().insert(c);
    }

    fn remove_cell(&mut self, c: &Cell) {
        if let Some(set) = self.cells.get_mut(&c.offset) {
            set.remove(c);
            if set.is_empty() {
                self.cells.remove(&c.offset);
            }
        }
    }

    /// Every cell whose byte range intersects `[o, o + size)`, the exact
    /// `(o, size)` cell excluded. The sweep walks the two half-ranges around
    /// `o` and stops as soon as a whole bucket has no overlap with the query;
    /// duplicates are suppressed.
    pub fn overlap_cells(&self, o: i64, size: u64) -> Vec<Cell> {
        let mut out: Vec<Cell> = Vec::new();
        let mut push = |c: &Cell| {
            if !(c.offset == o && c.size == size) && !out.contains(c) {
                out.push(c.clone());
            }
        };
        for (_, set) in self.cells.range(..=o).rev() {
            let mut bucket_overlaps = false;
            for c in set {
                if c.overlaps(o, size) {
                    bucket_overlaps = true;
                    push(c);
                }
            }
            if !bucket_overlaps {
                break;
            }
        }
        for (_, set) in self
            .cells
            .range((RangeBound::Excluded(o), RangeBound::Unbounded))
        {
            let mut bucket_overlaps = false;
            for c in set {
                if c.overlaps(o, size) {
                    bucket_overlaps = true;
                    push(c);
                }
            }
            if !bucket_overlaps {
                break;
            }
        }
        out
    }

    /// Set union per offset.
    fn join(&self, other: &OffsetMap) -> OffsetMap {
        let mut out = self.clone();
        for c in other.iter_cells() {
            out.insert_cell(c.clone());
        }
        out
    }

    /// Set intersection per offset.
    fn meet(&self, other: &OffsetMap) -> OffsetMap {
        let mut out = OffsetMap::default();
        for c in self.iter_cells() {
            if other.get_cell(c.offset, c.size).is_some() {
                out.insert_cell(c.clone());
            }
        }
        out
    }
}

impl fmt::Display for OffsetMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cells.is_empty() {
            return f.write_str("empty");
        }
        let mut first = true;
        for c in self.iter_cells() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{c}")?;
            first = false;
        }
        Ok(())
    }
}

/// Array expansion over the numerical domain `D`.
#[derive(Debug, Clone)]
pub struct ArrayExpansion<D> {
    array_map: BTreeMap<Variable, OffsetMap>,
    inv: D,
    sink: WarningSink,
}

impl<D: AbstractDomain> ArrayExpansion<D> {
    /// Route imprecision warnings to `sink`.
    pub fn with_sink(mut self, sink: WarningSink) -> Self {
        self.sink = sink;
        self
    }

    /// The wrapped numerical state.
    pub fn content_domain(&self) -> &D {
        &self.inv
    }

    /// The offset map of `a`, empty when the array is untouched.
    pub fn offset_map(&self, a: &Variable) -> OffsetMap {
        self.array_map.get(a).cloned().unwrap_or_default()
    }

    /// The stable scalar for `(a, offset, size)`, minted through `a`'s
    /// factory so every state of the analysis agrees on it.
    fn cell_scalar(a: &Variable, offset: i64, size: u64) -> Variable {
        let name = if size == 1 {
            format!("{a}[{offset}]")
        } else {
            format!("{a}[{offset}...{}]", offset + size as i64 - 1)
        };
        a.factory().get(&name, VarType::Scalar(a.ty().element()))
    }

    /// Fetch or lazily create the exact cell `(o, size)` of `a`.
    fn mk_cell(map: &mut OffsetMap, a: &Variable, o: i64, size: u64) -> Cell {
        if let Some(c) = map.get_cell(o, size) {
            return c.clone();
        }
        let c = Cell {
            offset: o,
            size,
            scalar: Self::cell_scalar(a, o, size),
        };
        map.insert_cell(c.clone());
        debug!(target: "octant", "created cell {c}");
        c
    }

    fn singleton_of(&self, e: &LinearExpr) -> Option<i64> {
        self.inv.eval(e).singleton()
    }
}

impl<D: AbstractDomain> AbstractDomain for ArrayExpansion<D> {
    fn top() -> Self {
        ArrayExpansion {
            array_map: BTreeMap::new(),
            inv: D::top(),
            sink: WarningSink::default(),
        }
    }

    fn bottom() -> Self {
        ArrayExpansion {
            array_map: BTreeMap::new(),
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
        let mut array_map = self.array_map.clone();
        for (a, om) in &other.array_map {
            let merged = match array_map.get(a) {
                Some(mine) => mine.join(om),
                None => om.clone(),
            };
            array_map.insert(a.clone(), merged);
        }
        ArrayExpansion {
            array_map,
            inv: self.inv.join(&other.inv),
            sink: self.sink.clone(),
        }
    }

    fn meet(&self, other: &Self) -> Self {
        let mut array_map = BTreeMap::new();
        for (a, om) in &self.array_map {
            if let Some(theirs) = other.array_map.get(a) {
                array_map.insert(a.clone(), om.meet(theirs));
            }
        }
        ArrayExpansion {
            array_map,
            inv: self.inv.meet(&other.inv),
            sink: self.sink.clone(),
        }
    }

    fn widen(&self, other: &Self) -> Self {
        let mut out = self.join(other);
        out.inv = self.inv.widen(&other.inv);
        out
    }

    fn widen_with_thresholds(&self, other: &Self, thresholds: &[i64]) -> Self {
        let mut out = self.join(other);
        out.inv = self.inv.widen_with_thresholds(&other.inv, thresholds);
        out
    }

    fn narrow(&self, other: &Self) -> Self {
        let mut out = self.meet(other);
        out.inv = self.inv.narrow(&other.inv);
        out
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
        if v.is_array() {
            self.array_map.remove(v);
        } else {
            self.inv.forget(v);
        }
    }

    fn project(&mut self, vars: &[Variable]) {
        self.inv.project(vars);
        for v in vars {
            if v.is_array() {
                self.sink
                    .warn(format!("expansion cannot project onto array {v}"));
            }
        }
    }

    fn rename(&mut self, from: &[Variable], to: &[Variable]) {
        self.inv.rename(from, to);
        for v in from {
            if v.is_array() {
                self.sink
                    .warn(format!("expansion cannot rename array {v}"));
            }
        }
    }

    fn expand(&mut self, x: &Variable, y: &Variable) {
        if x.is_array() {
            self.sink
                .warn(format!("expansion cannot expand array {x}"));
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

impl<D: AbstractDomain> ArrayDomain for ArrayExpansion<D> {
    fn array_init(
        &mut self,
        a: &Variable,
        elem_size: &LinearExpr,
        lb: &LinearExpr,
        ub: &LinearExpr,
        val: &LinearExpr,
    ) {
        if self.is_bottom() || self.is_top() {
            return;
        }
        let Some(lb) = self.singleton_of(lb) else {
            self.sink
                .warn(format!("init of {a} ignored: lower bound is not constant"));
            return;
        };
        let Some(ub) = self.singleton_of(ub) else {
            self.sink
                .warn(format!("init of {a} ignored: upper bound is not constant"));
            return;
        };
        let Some(n) = self.singleton_of(elem_size) else {
            self.sink
                .warn(format!("init of {a} ignored: element size is not constant"));
            return;
        };
        if n <= 0 || (ub - lb) % n != 0 {
            self.sink.warn(format!(
                "init of {a} ignored: range is not divisible by the element size {n}"
            ));
            return;
        }
        if (ub - lb) / n > MAX_INIT_ELEMS {
            self.sink.warn(format!(
                "init of {a} ignored: more than {MAX_INIT_ELEMS} elements"
            ));
            return;
        }
        let mut i = lb;
        while i < ub {
            self.array_store(a, elem_size, &LinearExpr::constant(i), val, false);
            i += n;
        }
        debug!(target: "octant", "{a}[{lb}...{ub}] := {val}");
    }

    fn array_load(&mut self, lhs: &Variable, a: &Variable, elem_size: &LinearExpr, i: &LinearExpr) {
        if self.is_bottom() {
            return;
        }
        let Some(o) = self.singleton_of(i) else {
            self.sink
                .warn(format!("load from {a} with non-constant index {i}"));
            self.inv.forget(lhs);
            return;
        };
        let Some(n) = self.singleton_of(elem_size) else {
            self.sink
                .warn(format!("load from {a} with non-constant element size"));
            self.inv.forget(lhs);
            return;
        };
        let size = n.max(0) as u64;
        let mut map = self.array_map.get(a).cloned().unwrap_or_default();
        let overlaps = map.overlap_cells(o, size);
        if !overlaps.is_empty() {
            self.sink.warn(format!(
                "load from {a}[{o}...{}] overlaps {} other cell(s)",
                o + size as i64 - 1,
                overlaps.len()
            ));
            self.inv.forget(lhs);
            return;
        }
        let cell = Self::mk_cell(&mut map, a, o, size);
        self.inv.assign(lhs, &LinearExpr::var(cell.scalar()));
        self.array_map.insert(a.clone(), map);
        debug!(target: "octant", "{lhs} := {a}[{i}]");
    }

    fn array_store(
        &mut self,
        a: &Variable,
        elem_size: &LinearExpr,
        i: &LinearExpr,
        val: &LinearExpr,
        _is_singleton: bool,
    ) {
        if self.is_bottom() {
            return;
        }
        let Some(o) = self.singleton_of(i) else {
            self.sink
                .warn(format!("store to {a} with non-constant index {i} dropped"));
            return;
        };
        let Some(n) = self.singleton_of(elem_size) else {
            self.sink
                .warn(format!("store to {a} with non-constant element size dropped"));
            return;
        };
        let size = n.max(0) as u64;
        let mut map = self.array_map.get(a).cloned().unwrap_or_default();
        let overlaps = map.overlap_cells(o, size);
        if !overlaps.is_empty() {
            debug!(
                target: "octant",
                killed = overlaps.len(),
                "store to {a}[{o}] kills overlapping cells"
            );
        }
        for c in &overlaps {
            self.inv.forget(c.scalar());
            map.remove_cell(c);
        }
        let cell = Self::mk_cell(&mut map, a, o, size);
        self.inv.assign(cell.scalar(), val);
        self.array_map.insert(a.clone(), map);
        debug!(target: "octant", "{a}[{i}] := {val}");
    }

    fn array_assign(&mut self, lhs: &Variable, rhs: &Variable) {
        // Both arrays now share the same cells' scalars in the sub-domain.
        let om = self.array_map.get(rhs).cloned().unwrap_or_default();
        self.array_map.insert(lhs.clone(), om);
    }
}

impl<D: AbstractDomain> fmt::Display for ArrayExpansion<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use octant_core::{Bound, IntervalDomain, VarFactory};

    type Dom = ArrayExpansion<IntervalDomain>;

    fn setup() -> (VarFactory, Dom) {
        (VarFactory::new(), Dom::top())
    }

    fn c(k: i64) -> LinearExpr {
        LinearExpr::constant(k)
    }

    #[test]
    fn exact_store_then_load() {
        let (vfac, mut dom) = setup();
        let a = vfac.array_int("a", 32);
        let x = vfac.int("x", 32);
        dom.array_store(&a, &c(4), &c(0), &c(11), false);
        dom.array_store(&a, &c(4), &c(4), &c(22), false);
        dom.array_load(&x, &a, &c(4), &c(0));
        assert_eq!(dom.value_of(&x), Interval::singleton_of(11));
        dom.array_load(&x, &a, &c(4), &c(4));
        assert_eq!(dom.value_of(&x), Interval::singleton_of(22));
    }

    #[test]
    fn overlapping_store_kills_cells() {
        let (vfac, mut dom) = setup();
        let a = vfac.array_int("a", 8);
        let x = vfac.int("x", 32);
        dom.array_store(&a, &c(1), &c(0), &c(1), false);
        dom.array_store(&a, &c(1), &c(1), &c(2), false);
        // A 4-byte store over [0, 4) kills both 1-byte cells.
        dom.array_store(&a, &c(4), &c(0), &c(1000), false);
        let om = dom.offset_map(&a);
        let cells: Vec<&Cell> = om.iter_cells().collect();
        assert_eq!(cells.len(), 1);
        assert_eq!((cells[0].offset(), cells[0].size()), (0, 4));
        dom.array_load(&x, &a, &c(4), &c(0));
        assert_eq!(dom.value_of(&x), Interval::singleton_of(1000));
    }

    #[test]
    fn overlapping_load_forgets_destination() {
        let (vfac, mut dom) = setup();
        let a = vfac.array_int("a", 8);
        let x = vfac.int("x", 32);
        let (sink, warnings) = WarningSink::collecting();
        dom = dom.with_sink(sink);
        dom.set(&x, Interval::singleton_of(9));
        dom.array_store(&a, &c(4), &c(0), &c(5), false);
        // A 1-byte read inside the 4-byte cell is approximated away.
        dom.array_load(&x, &a, &c(1), &c(2));
        assert!(dom.value_of(&x).is_top());
        assert_eq!(warnings.borrow().len(), 1);
    }

    #[test]
    fn non_constant_index_degrades() {
        let (vfac, mut dom) = setup();
        let a = vfac.array_int("a", 32);
        let x = vfac.int("x", 32);
        let i = vfac.int("i", 32);
        let (sink, warnings) = WarningSink::collecting();
        dom = dom.with_sink(sink);
        dom.set(&x, Interval::singleton_of(3));
        dom.array_store(&a, &c(4), &c(0), &c(1), false);
        // Store with unknown index is dropped; the old cell survives.
        dom.array_store(&a, &c(4), &LinearExpr::var(&i), &c(9), false);
        dom.array_load(&x, &a, &c(4), &c(0));
        assert_eq!(dom.value_of(&x), Interval::singleton_of(1));
        // Load with unknown index forgets the destination.
        dom.array_load(&x, &a, &c(4), &LinearExpr::var(&i));
        assert!(dom.value_of(&x).is_top());
        assert_eq!(warnings.borrow().len(), 2);
    }

    #[test]
    fn init_expands_into_stores() {
        let (vfac, mut dom) = setup();
        let a = vfac.array_int("a", 32);
        let x = vfac.int("x", 32);
        dom.array_init(&a, &c(4), &c(0), &c(16), &c(7));
        for o in [0, 4, 8, 12] {
            dom.array_load(&x, &a, &c(4), &c(o));
            assert_eq!(dom.value_of(&x), Interval::singleton_of(7));
        }
    }

    #[test]
    fn oversized_init_is_dropped_with_warning() {
        let (vfac, mut dom) = setup();
        let a = vfac.array_int("a", 32);
        let (sink, warnings) = WarningSink::collecting();
        dom = dom.with_sink(sink);
        dom.array_init(&a, &c(1), &c(0), &c(100_000), &c(7));
        assert!(dom.offset_map(&a).is_empty());
        assert_eq!(warnings.borrow().len(), 1);
    }

    #[test]
    fn array_assign_shares_cells() {
        let (vfac, mut dom) = setup();
        let a = vfac.array_int("a", 32);
        let b = vfac.array_int("b", 32);
        let x = vfac.int("x", 32);
        dom.array_store(&a, &c(4), &c(0), &c(42), false);
        dom.array_assign(&b, &a);
        dom.array_load(&x, &b, &c(4), &c(0));
        assert_eq!(dom.value_of(&x), Interval::singleton_of(42));
    }

    #[test]
    fn cell_identity_is_stable_across_states() {
        let (vfac, dom) = setup();
        let a = vfac.array_int("a", 32);
        let mut s1 = dom.clone();
        let mut s2 = dom;
        s1.array_store(&a, &c(4), &c(0), &c(1), false);
        s2.array_store(&a, &c(4), &c(0), &c(2), false);
        let c1 = s1.offset_map(&a).iter_cells().next().unwrap().clone();
        let c2 = s2.offset_map(&a).iter_cells().next().unwrap().clone();
        assert_eq!(c1.scalar(), c2.scalar());
        // Joining the states joins the shared scalar's values.
        let j = s1.join(&s2);
        assert_eq!(
            j.value_of(c1.scalar()),
            Interval::new(Bound::Finite(1), Bound::Finite(2))
        );
    }

    proptest::proptest! {
        /// After any sequence of stores and loads, no two distinct cells of
        /// one array overlap: every store kills the cells intersecting its
        /// range and every load refuses to materialise over an overlap.
        #[test]
        fn cells_stay_pairwise_disjoint(
            ops in proptest::collection::vec(
                (0i64..24, 1u64..=4, proptest::bool::ANY),
                1..40,
            ),
        ) {
            let vfac = VarFactory::new();
            let a = vfac.array_int("a", 8);
            let x = vfac.int("x", 32);
            let mut dom = Dom::top();
            for (o, size, is_store) in ops {
                if is_store {
                    dom.array_store(&a, &c(size as i64), &c(o), &c(o), false);
                } else {
                    dom.array_load(&x, &a, &c(size as i64), &c(o));
                }
            }
            let om = dom.offset_map(&a);
            let cells: Vec<&Cell> = om.iter_cells().collect();
            for (i, c1) in cells.iter().enumerate() {
                for c2 in cells.iter().skip(i + 1) {
                    proptest::prop_assert!(
                        !c1.overlaps(c2.offset(), c2.size()),
                        "cells {c1} and {c2} overlap"
                    );
                }
            }
        }
    }

    #[test]
    fn overlap_query_is_complete_for_adjacent_ranges() {
        let (vfac, mut dom) = setup();
        let a = vfac.array_int("a", 8);
        for o in [0i64, 1, 2, 8] {
            dom.array_store(&a, &c(1), &c(o), &c(o), false);
        }
        let om = dom.offset_map(&a);
        let hits = om.overlap_cells(1, 2);
        let ranges: Vec<(i64, u64)> = hits.iter().map(|c| (c.offset(), c.size())).collect();
        assert_eq!(ranges, vec![(1, 1), (2, 1)]);
        // Touching-but-not-intersecting ranges are not overlaps.
        assert!(om.overlap_cells(3, 5).is_empty());
    }
}
