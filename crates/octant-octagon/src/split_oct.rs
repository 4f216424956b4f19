//! The eager split-octagon implementation.
//!
//! Encoding: variable `x` owns the vertex pair `(p, n)` with `n = p + 1` and
//! `p` even. For an edge `s -> d` with weight `w`, with `j` the variable of
//! `s` and `i` the variable of `d`:
//!
//! - `p_j -> p_i`: `x_i - x_j <= w`
//! - `n_j -> p_i`: `x_i + x_j <= w`
//! - `p_j -> n_i`: `-x_i - x_j <= w`
//! - `n_j -> n_i`: `-x_i + x_j <= w`
//!
//! The intra-pair edges carry the (doubled) interval bounds: `n -> p` with
//! weight `w` is `x <= w/2`, `p -> n` with weight `w` is `x >= -w/2`.
//!
//! Coherence: every relational edge `(s, d)` has the mirror edge
//! `(mirror(d), mirror(s))` with the same weight, where `mirror` flips the
//! low bit. `normalize` installs missing mirrors and drains the unstable set
//! left behind by widening.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::{debug, warn};

use octant_core::{
    div_floor, ArithOp, BitwiseOp, Bound, CastOp, ConstraintKind, DivOp, Interval,
    LinearConstraint, LinearConstraintSystem, LinearExpr, Operand, Variable,
};
use octant_graph::ops::{self, EdgeVec};
use octant_graph::{Graph, PermView, SplitView, VertId, Weight, WeightedGraph};

/// The paired vertex: `p <-> n`.
#[inline]
pub(crate) const fn mirror(v: VertId) -> VertId {
    v ^ 1
}

/// A difference or sum constraint derived for an assignment target.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AssignCst {
    /// Upper list: `x - y <= k`; lower list: `x - y >= k`.
    Diff { y: Variable, k: Weight },
    /// Upper list: `x + y <= k`; lower list: `x + y >= k`.
    Sum { y: Variable, k: Weight },
}

/// Apply the two bound-recovery compositions implied by a new relational
/// edge `(s, d, w)`:
///
/// - `mirror(d) -> s -> d` tightens the bound edge of `d`'s variable;
/// - `s -> d -> mirror(s)` tightens the bound edge of `s`'s variable.
///
/// This is the close-bounds-inline step; the four parity cases of the source
/// collapse into the two mirror compositions.
fn recover_bounds(g: &mut WeightedGraph, pot: &mut Vec<Weight>, delta: &EdgeVec) -> bool {
    for ((s, d), w) in delta {
        let (s, d, w) = (*s, *d, *w);
        if s / 2 == d / 2 {
            continue;
        }
        if let Some(wp) = g.lookup(mirror(d), s) {
            g.update_edge_min(mirror(d), wp + w, d);
            if pot[mirror(d)] + g.edge_val(mirror(d), d) - pot[d] < 0
                && !ops::repair_potential(&*g, pot, mirror(d), d)
            {
                return false;
            }
        }
        if let Some(wd) = g.lookup(d, mirror(s)) {
            g.update_edge_min(s, w + wd, mirror(s));
            if pot[s] + g.edge_val(s, mirror(s)) - pot[mirror(s)] < 0
                && !ops::repair_potential(&*g, pot, s, mirror(s))
            {
                return false;
            }
        }
    }
    true
}

/// The split octagon over a weighted pair graph.
#[derive(Debug, Clone)]
pub struct SplitOctagon {
    vert_map: BTreeMap<Variable, (VertId, VertId)>,
    rev_map: Vec<Option<Variable>>,
    graph: WeightedGraph,
    potential: Vec<Weight>,
    unstable: BTreeSet<VertId>,
    normalized: bool,
    bottom: bool,
}

impl Default for SplitOctagon {
    fn default() -> Self {
        SplitOctagon::top()
    }
}

impl SplitOctagon {
    pub fn top() -> Self {
        SplitOctagon {
            vert_map: BTreeMap::new(),
            rev_map: Vec::new(),
            graph: WeightedGraph::new(),
            potential: Vec::new(),
            unstable: BTreeSet::new(),
            normalized: true,
            bottom: false,
        }
    }

    pub fn bottom() -> Self {
        let mut s = SplitOctagon::top();
        s.bottom = true;
        s
    }

    pub fn is_bottom(&self) -> bool {
        self.bottom
    }

    pub fn is_top(&self) -> bool {
        !self.bottom && self.graph.is_edge_free()
    }

    pub fn is_normalized(&self) -> bool {
        self.bottom || self.normalized
    }

    fn set_to_bottom(&mut self) {
        self.vert_map.clear();
        self.rev_map.clear();
        self.graph.clear();
        self.potential.clear();
        self.unstable.clear();
        self.normalized = true;
        self.bottom = true;
    }

    /// Variables with a vertex pair carrying at least one edge.
    pub fn active_variables(&self) -> Vec<Variable> {
        let mut out = Vec::new();
        for (v, (p, n)) in &self.vert_map {
            let touched = |u: VertId| {
                !self.graph.e_succs(u).is_empty() || !self.graph.e_preds(u).is_empty()
            };
            if touched(*p) || touched(*n) {
                out.push(v.clone());
            }
        }
        out
    }

    /// The vertex pair of `v`, if it has one.
    pub fn vertex_pair(&self, v: &Variable) -> Option<(VertId, VertId)> {
        self.vert_map.get(v).copied()
    }

    /// Every edge of the underlying graph. Test and debugging aid.
    pub fn edges(&self) -> Vec<(VertId, VertId, Weight)> {
        let mut out = Vec::new();
        for s in self.graph.verts() {
            for e in self.graph.e_succs(s) {
                out.push((s, e.vert, e.val));
            }
        }
        out
    }

    /// Positive vertex of `v`'s pair, allocating the pair on first use.
    /// Pairs are allocated atomically so `neg == pos + 1` and `pos` is even.
    fn get_vert(&mut self, v: &Variable) -> VertId {
        if let Some((p, _)) = self.vert_map.get(v) {
            return *p;
        }
        let pos = self.graph.new_vertex();
        let neg = self.graph.new_vertex();
        debug_assert!(pos % 2 == 0 && neg == pos + 1, "pair allocation drifted");
        for id in [pos, neg] {
            if id < self.rev_map.len() {
                self.potential[id] = 0;
                self.rev_map[id] = Some(v.clone());
            } else {
                debug_assert_eq!(id, self.rev_map.len());
                self.potential.push(0);
                self.rev_map.push(Some(v.clone()));
            }
        }
        self.vert_map.insert(v.clone(), (pos, neg));
        pos
    }

    /// Remove `v`'s pair without normalising first. Internal; the public
    /// `forget` normalises like every other entry point.
    fn drop_var(&mut self, v: &Variable) {
        if let Some((p, n)) = self.vert_map.remove(v) {
            self.graph.forget(p);
            self.graph.forget(n);
            self.rev_map[p] = None;
            self.rev_map[n] = None;
        }
    }

    /// Install coherent mirrors for every relational edge, then drain the
    /// unstable set by re-running closure from the destabilised sources.
    pub fn normalize(&mut self) {
        if self.bottom || self.normalized {
            return;
        }
        for v in self.graph.verts() {
            for e in self.graph.e_succs(v) {
                let w = e.vert;
                if v / 2 == w / 2 {
                    continue;
                }
                let cur = e.val;
                let (ms, md) = (mirror(w), mirror(v));
                match self.graph.lookup(ms, md) {
                    Some(m) => {
                        let tight = m.min(cur);
                        self.graph.update_edge_min(ms, tight, md);
                        self.graph.update_edge_min(v, tight, w);
                    }
                    None => {
                        self.graph.add_edge(ms, cur, md);
                        if !ops::repair_potential(&self.graph, &mut self.potential, ms, md) {
                            self.set_to_bottom();
                            return;
                        }
                    }
                }
            }
        }
        if !self.unstable.is_empty() {
            debug!(target: "octant", unstable = self.unstable.len(), "restabilising after widening");
            let mut delta = EdgeVec::new();
            {
                let split = SplitView::new(&self.graph);
                ops::close_after_widen(&split, &self.potential, &self.unstable, &mut delta);
            }
            if !ops::apply_delta_checked(&mut self.graph, &mut self.potential, &delta)
                || !recover_bounds(&mut self.graph, &mut self.potential, &delta)
            {
                self.set_to_bottom();
                return;
            }
            self.unstable.clear();
        }
        self.normalized = true;
    }

    /// Incremental closure over a freshly tightened relational edge
    /// `(ii, jj)`: compose it with the relational edges incident to both
    /// endpoints, recovering bounds along the way.
    fn close_over_edge(&mut self, ii: VertId, jj: VertId) -> bool {
        debug_assert!(ii / 2 != jj / 2);
        let Some(c) = self.graph.lookup(ii, jj) else {
            return true;
        };
        let mut new_edges: EdgeVec = vec![((ii, jj), c)];

        // Compose through the endpoint pairs' own bound edges: an existing
        // bound on either pair turns the new relation into a relation on the
        // mirror vertex (e.g. `x <= n - 1` with `n <= 100` yields
        // `x + n <= 199`, whose own bound recovery then caps `x`).
        if let Some(wb) = self.graph.lookup(mirror(ii), ii) {
            let w = wb + c;
            match self.graph.lookup(mirror(ii), jj) {
                Some(old) if old <= w => {}
                _ => {
                    self.graph.update_edge_min(mirror(ii), w, jj);
                    new_edges.push(((mirror(ii), jj), w));
                }
            }
        }
        if let Some(wb) = self.graph.lookup(jj, mirror(jj)) {
            let w = c + wb;
            match self.graph.lookup(ii, mirror(jj)) {
                Some(old) if old <= w => {}
                _ => {
                    self.graph.update_edge_min(ii, w, mirror(jj));
                    new_edges.push(((ii, mirror(jj)), w));
                }
            }
        }

        let preds: Vec<_> = {
            let split = SplitView::new(&self.graph);
            split.e_preds(ii)
        };
        let mut src_dec: Vec<(VertId, Weight)> = Vec::new();
        for e in &preds {
            let se = e.vert;
            if se == jj {
                continue;
            }
            let wt_sij = e.val + c;
            match self.graph.lookup(se, jj) {
                Some(w) if w <= wt_sij => continue,
                _ => {
                    self.graph.update_edge_min(se, wt_sij, jj);
                    src_dec.push((se, e.val));
                    new_edges.push(((se, jj), wt_sij));
                }
            }
        }

        let succs: Vec<_> = {
            let split = SplitView::new(&self.graph);
            split.e_succs(jj)
        };
        let mut dest_dec: Vec<(VertId, Weight)> = Vec::new();
        for e in &succs {
            let de = e.vert;
            if de == ii {
                continue;
            }
            let wt_ijd = c + e.val;
            match self.graph.lookup(ii, de) {
                Some(w) if w <= wt_ijd => continue,
                _ => {
                    self.graph.update_edge_min(ii, wt_ijd, de);
                    dest_dec.push((de, e.val));
                    new_edges.push(((ii, de), wt_ijd));
                }
            }
        }

        for (se, ws) in &src_dec {
            for (de, wd) in &dest_dec {
                if se == de {
                    continue;
                }
                let w = ws + c + wd;
                match self.graph.lookup(*se, *de) {
                    Some(old) if old <= w => continue,
                    _ => {
                        self.graph.update_edge_min(*se, w, *de);
                        new_edges.push(((*se, *de), w));
                    }
                }
            }
        }

        // Path compositions keep the potential feasible; only the bound
        // recovery may need a local repair.
        if !recover_bounds(&mut self.graph, &mut self.potential, &new_edges) {
            self.set_to_bottom();
            return false;
        }
        true
    }

    /// Incremental closure over a freshly tightened bound edge `(b, mirror(b))`:
    /// compose every relational predecessor of `b` with every relational
    /// successor of `mirror(b)` through the bound.
    fn close_over_bound(&mut self, b: VertId) -> bool {
        let mb = mirror(b);
        let Some(wb) = self.graph.lookup(b, mb) else {
            return true;
        };
        let preds: Vec<_> = {
            let split = SplitView::new(&self.graph);
            split.e_preds(b)
        };
        let succs: Vec<_> = {
            let split = SplitView::new(&self.graph);
            split.e_succs(mb)
        };
        let mut new_edges: EdgeVec = Vec::new();
        for e in &preds {
            let w = e.val + wb;
            match self.graph.lookup(e.vert, mb) {
                Some(old) if old <= w => {}
                _ => {
                    self.graph.update_edge_min(e.vert, w, mb);
                    new_edges.push(((e.vert, mb), w));
                }
            }
        }
        for e in &succs {
            let w = wb + e.val;
            match self.graph.lookup(b, e.vert) {
                Some(old) if old <= w => {}
                _ => {
                    self.graph.update_edge_min(b, w, e.vert);
                    new_edges.push(((b, e.vert), w));
                }
            }
        }
        for p in &preds {
            for s in &succs {
                if p.vert == s.vert {
                    continue;
                }
                let w = p.val + wb + s.val;
                match self.graph.lookup(p.vert, s.vert) {
                    Some(old) if old <= w => {}
                    _ => {
                        self.graph.update_edge_min(p.vert, w, s.vert);
                        new_edges.push(((p.vert, s.vert), w));
                    }
                }
            }
        }
        if !recover_bounds(&mut self.graph, &mut self.potential, &new_edges) {
            self.set_to_bottom();
            return false;
        }
        true
    }

    /// Interval projection of a variable, read off the pair's bound edges.
    pub fn value_of(&self, x: &Variable) -> Interval {
        if self.bottom {
            return Interval::bottom();
        }
        let Some((p, n)) = self.vert_map.get(x) else {
            return Interval::top();
        };
        let lb = match self.graph.lookup(*p, *n) {
            Some(w) => Bound::Finite(-div_floor(w, 2)),
            None => Bound::NegInf,
        };
        let ub = match self.graph.lookup(*n, *p) {
            Some(w) => Bound::Finite(div_floor(w, 2)),
            None => Bound::PosInf,
        };
        Interval::new(lb, ub)
    }

    /// Interval evaluation of a linear expression.
    pub fn eval_interval(&self, e: &LinearExpr) -> Interval {
        if self.bottom {
            return Interval::bottom();
        }
        let mut r = Interval::singleton_of(e.constant_term());
        for (v, c) in e.terms() {
            r = r.add(&self.value_of(v).mul_const(c));
        }
        r
    }

    /// Finite lower bound of a variable, `None` when unbounded. An
    /// integer-empty interval (odd crossing bounds the cycle check cannot
    /// see) also reads as unbounded, which is sound.
    fn lb_of(&self, y: &Variable) -> Option<i64> {
        match self.value_of(y) {
            Interval::Bottom => None,
            i => i.lb().number(),
        }
    }

    /// Finite upper bound of a variable, `None` when unbounded.
    fn ub_of(&self, y: &Variable) -> Option<i64> {
        match self.value_of(y) {
            Interval::Bottom => None,
            i => i.ub().number(),
        }
    }

    fn pot_value(&self, v: &Variable) -> Weight {
        match self.vert_map.get(v) {
            Some((p, _)) => self.potential[*p],
            None => 0,
        }
    }

    /// Potential-based estimate of an expression, used to seed the potential
    /// of a freshly assigned vertex pair.
    fn eval_expression(&self, e: &LinearExpr) -> Weight {
        let mut v = e.constant_term();
        for (y, c) in e.terms() {
            v += self.pot_value(y) * c;
        }
        v
    }

    /// Translate an exact octagonal form of `e <= 0` into one primary edge.
    /// Single-variable bounds come back with doubled weights; the `±2`
    /// coefficient forms map to the doubled encoding directly.
    fn octagonal_edge_of_leq(&mut self, e: &LinearExpr) -> Option<(VertId, VertId, Weight)> {
        let c = e.constant_term();
        let terms: Vec<(Variable, i64)> = e.terms().map(|(v, k)| (v.clone(), k)).collect();
        match terms.as_slice() {
            [(x, a)] => {
                let v = self.get_vert(x);
                match a {
                    1 => Some((v + 1, v, -2 * c)),
                    -1 => Some((v, v + 1, -2 * c)),
                    2 => Some((v + 1, v, -c)),
                    -2 => Some((v, v + 1, -c)),
                    _ => None,
                }
            }
            [(x1, a1), (x2, a2)] => {
                let (x1, x2) = (x1.clone(), x2.clone());
                let v1 = self.get_vert(&x1);
                let v2 = self.get_vert(&x2);
                match (a1, a2) {
                    (1, -1) => Some((v2, v1, -c)),
                    (-1, 1) => Some((v1, v2, -c)),
                    (1, 1) => Some((v2 + 1, v1, -c)),
                    (-1, -1) => Some((v2, v1 + 1, -c)),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Decompose a general `e <= 0` into difference constraints plus bounds
    /// using the interval envelopes of the bounded terms. At most one
    /// unbounded variable is tolerated per direction; otherwise the
    /// constraint contributes nothing (sound).
    #[allow(clippy::type_complexity)]
    fn diffcsts_of_lin_leq(
        &self,
        e: &LinearExpr,
    ) -> (
        Vec<((Variable, Variable), Weight)>,
        Vec<(Variable, Weight)>,
        Vec<(Variable, Weight)>,
    ) {
        let mut csts: Vec<((Variable, Variable), Weight)> = Vec::new();
        let mut lbs: Vec<(Variable, Weight)> = Vec::new();
        let mut ubs: Vec<(Variable, Weight)> = Vec::new();

        let mut exp_ub = -e.constant_term();
        let mut pos_terms: Vec<((Weight, Variable), Weight)> = Vec::new();
        let mut neg_terms: Vec<((Weight, Variable), Weight)> = Vec::new();
        let mut unbounded_lbvar: Option<Variable> = None;
        let mut unbounded_lbcoeff = 0;
        let mut unbounded_ubvar: Option<Variable> = None;
        let mut unbounded_ubcoeff = 0;

        for (y, coeff) in e.terms() {
            if coeff > 0 {
                match self.lb_of(y) {
                    Some(ymin) => {
                        exp_ub -= ymin * coeff;
                        pos_terms.push(((coeff, y.clone()), ymin));
                    }
                    None => {
                        if unbounded_lbvar.is_some() {
                            return (csts, lbs, ubs);
                        }
                        unbounded_lbvar = Some(y.clone());
                        unbounded_lbcoeff = coeff;
                    }
                }
            } else {
                match self.ub_of(y) {
                    Some(ymax) => {
                        exp_ub -= ymax * coeff;
                        neg_terms.push(((-coeff, y.clone()), ymax));
                    }
                    None => {
                        if unbounded_ubvar.is_some() {
                            return (csts, lbs, ubs);
                        }
                        unbounded_ubvar = Some(y.clone());
                        unbounded_ubcoeff = -coeff;
                    }
                }
            }
        }

        match (unbounded_lbvar, unbounded_ubvar) {
            (Some(x), Some(y)) => {
                if unbounded_lbcoeff == 1 && unbounded_ubcoeff == 1 {
                    csts.push(((x, y), exp_ub));
                }
            }
            (Some(x), None) => {
                if unbounded_lbcoeff == 1 {
                    for ((_, y), ymax) in &neg_terms {
                        csts.push(((x.clone(), y.clone()), exp_ub - ymax));
                    }
                }
                ubs.push((x, octant_core::div_floor(exp_ub, unbounded_lbcoeff)));
            }
            (None, Some(y)) => {
                if unbounded_ubcoeff == 1 {
                    for ((_, x), ymin) in &pos_terms {
                        csts.push(((x.clone(), y.clone()), exp_ub + ymin));
                    }
                }
                lbs.push((y, octant_core::div_ceil(-exp_ub, unbounded_ubcoeff)));
            }
            (None, None) => {
                for ((_, xl), ymax) in &neg_terms {
                    for ((_, xu), ymin) in &pos_terms {
                        csts.push(((xu.clone(), xl.clone()), exp_ub - ymax + ymin));
                    }
                }
                for ((cl, xl), ymax) in &neg_terms {
                    lbs.push((xl.clone(), octant_core::div_ceil(-exp_ub, *cl) + ymax));
                }
                for ((cu, xu), ymin) in &pos_terms {
                    ubs.push((xu.clone(), octant_core::div_floor(exp_ub, *cu) + ymin));
                }
            }
        }
        (csts, lbs, ubs)
    }

    /// Install a (doubled) bound edge `(b, mirror(b))` if tighter, then close
    /// over it.
    fn add_bound_edge(&mut self, b: VertId, w: Weight) -> bool {
        if let Some(old) = self.graph.lookup(b, mirror(b)) {
            if old <= w {
                return true;
            }
        }
        self.graph.set_edge(b, w, mirror(b));
        if !ops::repair_potential(&self.graph, &mut self.potential, b, mirror(b)) {
            self.set_to_bottom();
            return false;
        }
        self.close_over_bound(b)
    }

    /// Install a relational edge plus its coherent mirror, closing over both.
    fn add_relational_edge(&mut self, s: VertId, w: Weight, d: VertId) -> bool {
        if let Some(old) = self.graph.lookup(s, d) {
            if old <= w {
                return true;
            }
        }
        self.graph.update_edge_min(s, w, d);
        self.graph.update_edge_min(mirror(d), w, mirror(s));
        if !ops::repair_potential(&self.graph, &mut self.potential, s, d) {
            self.set_to_bottom();
            return false;
        }
        if !ops::repair_potential(&self.graph, &mut self.potential, mirror(d), mirror(s)) {
            self.set_to_bottom();
            return false;
        }
        self.close_over_edge(s, d) && self.close_over_edge(mirror(d), mirror(s))
    }

    /// Add `e <= 0`. Returns false when the state became bottom.
    fn add_linear_leq(&mut self, e: &LinearExpr) -> bool {
        if let Some((s, d, w)) = self.octagonal_edge_of_leq(e) {
            if s / 2 == d / 2 {
                return self.add_bound_edge(s, w);
            }
            return self.add_relational_edge(s, w, d);
        }

        let (csts, lbs, ubs) = self.diffcsts_of_lin_leq(e);
        for (x, lb) in lbs {
            let v = self.get_vert(&x);
            if !self.add_bound_edge(v, -2 * lb) {
                return false;
            }
        }
        for (x, ub) in ubs {
            let v = self.get_vert(&x);
            if !self.add_bound_edge(v + 1, 2 * ub) {
                return false;
            }
        }
        for ((x, y), k) in csts {
            // x - y <= k: edge p_y -> p_x.
            let vx = self.get_vert(&x);
            let vy = self.get_vert(&y);
            if !self.add_relational_edge(vy, k, vx) {
                return false;
            }
        }
        true
    }

    fn compute_residual(&self, e: &LinearExpr, pivot: &Variable) -> Interval {
        let mut residual = Interval::singleton_of(-e.constant_term());
        for (v, c) in e.terms() {
            if v != pivot {
                residual = residual.sub(&self.value_of(v).mul_const(c));
            }
        }
        residual
    }

    fn add_univar_disequation(&mut self, x: &Variable, k: i64) {
        let i = self.value_of(x);
        let new_i = i.trim(k);
        if new_i.is_bottom() {
            self.set_to_bottom();
            return;
        }
        if new_i == i {
            return;
        }
        let v = self.get_vert(x);
        if let Some(lb) = new_i.lb().number() {
            match self.graph.lookup(v, v + 1) {
                Some(w) if -2 * lb < w => {
                    if !self.add_bound_edge(v, -2 * lb) {
                        return;
                    }
                }
                _ => {}
            }
        }
        if let Some(ub) = new_i.ub().number() {
            match self.graph.lookup(v + 1, v) {
                Some(w) if 2 * ub < w => {
                    if !self.add_bound_edge(v + 1, 2 * ub) {
                        return;
                    }
                }
                _ => {}
            }
        }
    }

    /// `e != 0`: per pivot with a singleton residual, trim the pivot's
    /// implied interval.
    fn add_disequation(&mut self, e: &LinearExpr) {
        let pivots: Vec<(Variable, i64)> = e.terms().map(|(v, c)| (v.clone(), c)).collect();
        for (pivot, coeff) in pivots {
            if self.bottom {
                return;
            }
            let residual = self.compute_residual(e, &pivot);
            let Some(r) = residual.singleton() else {
                continue;
            };
            if r % coeff != 0 {
                continue;
            }
            self.add_univar_disequation(&pivot, r / coeff);
        }
    }

    /// Constrain the state.
    pub fn assume(&mut self, cst: &LinearConstraint) {
        if self.bottom {
            return;
        }
        self.normalize();
        if cst.is_tautology() {
            return;
        }
        if cst.is_contradiction() {
            self.set_to_bottom();
            return;
        }
        match cst.kind() {
            ConstraintKind::Inequality => {
                if !self.add_linear_leq(cst.expression()) {
                    return;
                }
            }
            ConstraintKind::Equality => {
                let e = cst.expression().clone();
                if !self.add_linear_leq(&e) {
                    return;
                }
                if !self.add_linear_leq(&e.neg()) {
                    return;
                }
            }
            ConstraintKind::Disequation => self.add_disequation(cst.expression()),
            ConstraintKind::StrictInequality => {
                warn!(target: "octant", "unhandled strict inequality: {cst}");
                return;
            }
        }
        self.normalized = false;
    }

    /// `x := [lb, ub]`.
    pub fn set(&mut self, x: &Variable, intv: Interval) {
        if self.bottom {
            return;
        }
        self.normalize();
        if intv.is_bottom() {
            self.set_to_bottom();
            return;
        }
        self.drop_var(x);
        if intv.is_top() {
            return;
        }
        let v = self.get_vert(x);
        if let Some(ub) = intv.ub().number() {
            self.potential[v] = ub;
            self.potential[v + 1] = -ub;
            self.graph.set_edge(v + 1, 2 * ub, v);
        }
        if let Some(lb) = intv.lb().number() {
            self.potential[v] = lb;
            self.potential[v + 1] = -lb;
            self.graph.set_edge(v, -2 * lb, v + 1);
        }
        self.normalized = false;
    }

    /// Derive the difference/sum constraints an assignment `x := e` implies,
    /// solving each term against the interval envelopes. One unbounded
    /// variable with unit coefficient is allowed per direction: coefficient
    /// `+1` yields a difference constraint, `-1` its sum dual.
    fn diffcsts_of_assign(&self, e: &LinearExpr) -> (Vec<AssignCst>, Vec<AssignCst>) {
        let mut ub_out: Vec<AssignCst> = Vec::new();
        let mut lb_out: Vec<AssignCst> = Vec::new();

        // Upper bounds: x <= e's envelope.
        'ub: {
            let mut exp_ub = e.constant_term();
            let mut pos_terms: Vec<(Variable, Weight)> = Vec::new();
            let mut neg_terms: Vec<(Variable, Weight)> = Vec::new();
            let mut unbounded_pos: Option<Variable> = None;
            let mut unbounded_neg: Option<Variable> = None;
            for (y, coeff) in e.terms() {
                if coeff > 0 {
                    match self.ub_of(y) {
                        Some(ymax) => {
                            exp_ub += ymax * coeff;
                            pos_terms.push((y.clone(), ymax));
                        }
                        None => {
                            if coeff != 1 || unbounded_pos.is_some() || unbounded_neg.is_some() {
                                break 'ub;
                            }
                            unbounded_pos = Some(y.clone());
                        }
                    }
                } else {
                    match self.lb_of(y) {
                        Some(ymin) => {
                            exp_ub += ymin * coeff;
                            neg_terms.push((y.clone(), ymin));
                        }
                        None => {
                            if coeff != -1 || unbounded_pos.is_some() || unbounded_neg.is_some() {
                                break 'ub;
                            }
                            unbounded_neg = Some(y.clone());
                        }
                    }
                }
            }
            if let Some(y) = unbounded_pos {
                ub_out.push(AssignCst::Diff { y, k: exp_ub });
            } else if let Some(y) = unbounded_neg {
                ub_out.push(AssignCst::Sum { y, k: exp_ub });
            } else {
                for (y, ymax) in pos_terms {
                    ub_out.push(AssignCst::Diff {
                        y,
                        k: exp_ub - ymax,
                    });
                }
                for (y, ymin) in neg_terms {
                    ub_out.push(AssignCst::Sum {
                        y,
                        k: exp_ub + ymin,
                    });
                }
            }
        }

        // Lower bounds, symmetric.
        'lb: {
            let mut exp_lb = e.constant_term();
            let mut pos_terms: Vec<(Variable, Weight)> = Vec::new();
            let mut neg_terms: Vec<(Variable, Weight)> = Vec::new();
            let mut unbounded_pos: Option<Variable> = None;
            let mut unbounded_neg: Option<Variable> = None;
            for (y, coeff) in e.terms() {
                if coeff > 0 {
                    match self.lb_of(y) {
                        Some(ymin) => {
                            exp_lb += ymin * coeff;
                            pos_terms.push((y.clone(), ymin));
                        }
                        None => {
                            if coeff != 1 || unbounded_pos.is_some() || unbounded_neg.is_some() {
                                break 'lb;
                            }
                            unbounded_pos = Some(y.clone());
                        }
                    }
                } else {
                    match self.ub_of(y) {
                        Some(ymax) => {
                            exp_lb += ymax * coeff;
                            neg_terms.push((y.clone(), ymax));
                        }
                        None => {
                            if coeff != -1 || unbounded_pos.is_some() || unbounded_neg.is_some() {
                                break 'lb;
                            }
                            unbounded_neg = Some(y.clone());
                        }
                    }
                }
            }
            if let Some(y) = unbounded_pos {
                lb_out.push(AssignCst::Diff { y, k: exp_lb });
            } else if let Some(y) = unbounded_neg {
                lb_out.push(AssignCst::Sum { y, k: exp_lb });
            } else {
                for (y, ymin) in pos_terms {
                    lb_out.push(AssignCst::Diff {
                        y,
                        k: exp_lb - ymin,
                    });
                }
                for (y, ymax) in neg_terms {
                    lb_out.push(AssignCst::Sum {
                        y,
                        k: exp_lb + ymax,
                    });
                }
            }
        }

        (lb_out, ub_out)
    }

    /// `x := e`.
    pub fn assign(&mut self, x: &Variable, e: &LinearExpr) {
        if self.bottom {
            return;
        }
        self.normalize();
        if e.is_constant() {
            self.set(x, Interval::singleton_of(e.constant_term()));
            return;
        }
        let x_int = self.eval_interval(e);
        if x_int.is_bottom() {
            self.set_to_bottom();
            return;
        }
        let (lb_csts, ub_csts) = self.diffcsts_of_assign(e);
        if lb_csts.is_empty() && ub_csts.is_empty() {
            self.set(x, x_int);
            return;
        }

        // Allocate the target pair before resolving operand vertices so the
        // operand lookups cannot hand back the pair we are building.
        let v = self.graph.new_vertex();
        let w = self.graph.new_vertex();
        debug_assert_eq!(w, v + 1);
        let seed = self.eval_expression(e);
        for (id, p) in [(v, seed), (w, -seed)] {
            if id < self.rev_map.len() {
                self.potential[id] = p;
                self.rev_map[id] = Some(x.clone());
            } else {
                self.potential.push(p);
                self.rev_map.push(Some(x.clone()));
            }
        }

        let mut delta = EdgeVec::new();
        for cst in &ub_csts {
            match cst {
                AssignCst::Diff { y, k } => {
                    let vy = self.get_vert(y);
                    delta.push(((vy, v), *k));
                    delta.push(((w, vy + 1), *k));
                }
                AssignCst::Sum { y, k } => {
                    let vy = self.get_vert(y);
                    delta.push(((vy + 1, v), *k));
                    delta.push(((w, vy), *k));
                }
            }
        }
        for cst in &lb_csts {
            match cst {
                AssignCst::Diff { y, k } => {
                    let vy = self.get_vert(y);
                    delta.push(((v, vy), -*k));
                    delta.push(((vy + 1, w), -*k));
                }
                AssignCst::Sum { y, k } => {
                    let vy = self.get_vert(y);
                    delta.push(((v, vy + 1), -*k));
                    delta.push(((vy, w), -*k));
                }
            }
        }

        if !ops::apply_delta_checked(&mut self.graph, &mut self.potential, &delta) {
            self.set_to_bottom();
            return;
        }

        let mut closure = EdgeVec::new();
        {
            let split = SplitView::new(&self.graph);
            ops::close_after_assign(&split, &self.potential, v, &mut closure);
        }
        // Coherence makes the closure around the mirror vertex the mirror of
        // this delta; install both halves.
        let mirrored: EdgeVec = closure
            .iter()
            .map(|((s, d), wt)| ((mirror(*d), mirror(*s)), *wt))
            .collect();
        if !ops::apply_delta_checked(&mut self.graph, &mut self.potential, &closure)
            || !ops::apply_delta_checked(&mut self.graph, &mut self.potential, &mirrored)
            || !recover_bounds(&mut self.graph, &mut self.potential, &closure)
        {
            self.set_to_bottom();
            return;
        }

        if let Some(lb) = x_int.lb().number() {
            self.graph.update_edge_min(v, -2 * lb, w);
            if self.potential[v] + self.graph.edge_val(v, w) - self.potential[w] < 0
                && !ops::repair_potential(&self.graph, &mut self.potential, v, w)
            {
                self.set_to_bottom();
                return;
            }
        }
        if let Some(ub) = x_int.ub().number() {
            self.graph.update_edge_min(w, 2 * ub, v);
            if self.potential[w] + self.graph.edge_val(w, v) - self.potential[v] < 0
                && !ops::repair_potential(&self.graph, &mut self.potential, w, v)
            {
                self.set_to_bottom();
                return;
            }
        }
        if !self.close_over_bound(v) || !self.close_over_bound(w) {
            return;
        }

        // Retire the old pair last: the operand lookups above may legitimately
        // refer to the pre-state x (e.g. x := x + 1).
        self.drop_var(x);
        self.vert_map.insert(x.clone(), (v, w));
        self.normalized = false;
    }

    /// `x := y op z`, lowering through assignment or the interval domain.
    pub fn apply(&mut self, op: ArithOp, x: &Variable, y: &Variable, z: &Operand) {
        if self.bottom {
            return;
        }
        self.normalize();
        let z_expr = |z: &Operand| match z {
            Operand::Var(v) => LinearExpr::var(v),
            Operand::Const(k) => LinearExpr::constant(*k),
        };
        match op {
            ArithOp::Add => {
                let e = LinearExpr::var(y).add(&z_expr(z));
                self.assign(x, &e);
            }
            ArithOp::Sub => {
                let e = LinearExpr::var(y).sub(&z_expr(z));
                self.assign(x, &e);
            }
            ArithOp::Mul => {
                let r = self.value_of(y).mul(&self.operand_interval(z));
                self.set(x, r);
            }
            ArithOp::Div => {
                let r = self.value_of(y).div(&self.operand_interval(z));
                if r.is_bottom() {
                    self.set_to_bottom();
                } else {
                    self.set(x, r);
                }
            }
        }
    }

    fn operand_interval(&self, z: &Operand) -> Interval {
        match z {
            Operand::Var(v) => self.value_of(v),
            Operand::Const(k) => Interval::singleton_of(*k),
        }
    }

    pub fn apply_bitwise(&mut self, op: BitwiseOp, x: &Variable, y: &Variable, z: &Operand) {
        if self.bottom {
            return;
        }
        self.normalize();
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
        self.set(x, r);
    }

    pub fn apply_div(&mut self, op: DivOp, x: &Variable, y: &Variable, z: &Operand) {
        if self.bottom {
            return;
        }
        match op {
            DivOp::SDiv => self.apply(ArithOp::Div, x, y, z),
            _ => {
                self.normalize();
                let yi = self.value_of(y);
                let zi = self.operand_interval(z);
                let r = match op {
                    DivOp::UDiv => yi.udiv(&zi),
                    DivOp::SRem => yi.srem(&zi),
                    DivOp::URem => yi.urem(&zi),
                    DivOp::SDiv => unreachable!(),
                };
                self.set(x, r);
            }
        }
    }

    /// Width-erasing conversion: a plain assignment over mathematical
    /// integers.
    pub fn apply_cast(&mut self, _op: CastOp, dst: &Variable, src: &Variable) {
        self.assign(dst, &LinearExpr::var(src));
    }

    pub fn forget(&mut self, v: &Variable) {
        if self.bottom {
            return;
        }
        self.normalize();
        self.drop_var(v);
    }

    pub fn project(&mut self, vars: &[Variable]) {
        if self.bottom {
            return;
        }
        self.normalize();
        let keep: BTreeSet<&Variable> = vars.iter().collect();
        let drop: Vec<Variable> = self
            .vert_map
            .keys()
            .filter(|v| !keep.contains(v))
            .cloned()
            .collect();
        for v in drop {
            self.drop_var(&v);
        }
    }

    pub fn rename(&mut self, from: &[Variable], to: &[Variable]) {
        assert_eq!(from.len(), to.len(), "rename arity mismatch");
        if self.bottom || self.is_top() {
            return;
        }
        let mut new_map = BTreeMap::new();
        for (var, pair) in std::mem::take(&mut self.vert_map) {
            match from.iter().position(|f| *f == var) {
                Some(pos) => {
                    let new_var = to[pos].clone();
                    self.rev_map[pair.0] = Some(new_var.clone());
                    self.rev_map[pair.1] = Some(new_var.clone());
                    new_map.insert(new_var, pair);
                }
                None => {
                    new_map.insert(var, pair);
                }
            }
        }
        self.vert_map = new_map;
    }

    /// Copy everything known about `x` onto the fresh variable `y`. Bound
    /// edges map onto `y`'s own pair; relational edges are duplicated with
    /// the external endpoint kept, so `x` and `y` end up unrelated to each
    /// other except through shared third parties.
    pub fn expand(&mut self, x: &Variable, y: &Variable) {
        if self.bottom {
            return;
        }
        if self.vert_map.contains_key(y) {
            panic!("expand into a variable that already exists: {y}");
        }
        self.normalize();
        let ii = self.get_vert(x);
        let jj = self.get_vert(y);
        let remap = |u: VertId| {
            if u == ii {
                jj
            } else if u == ii + 1 {
                jj + 1
            } else {
                u
            }
        };
        for src in [ii, ii + 1] {
            for e in self.graph.e_succs(src) {
                self.graph
                    .update_edge_min(remap(src), e.val, remap(e.vert));
            }
            for e in self.graph.e_preds(src) {
                // Skip pair-internal edges; the succ pass already copied them.
                if e.vert == ii || e.vert == ii + 1 {
                    continue;
                }
                self.graph.update_edge_min(remap(e.vert), e.val, remap(src));
            }
        }
        self.potential[jj] = self.potential[ii];
        self.potential[jj + 1] = self.potential[ii + 1];
    }

    /// True when `e <= 0` contradicts the state: either the reverse path in
    /// the closed graph violates the bound, or the interval envelope already
    /// excludes every solution.
    pub fn is_unsat(&mut self, cst: &LinearConstraint) -> bool {
        if self.bottom || cst.is_contradiction() {
            return true;
        }
        if self.is_top() || cst.is_tautology() {
            return false;
        }
        if cst.kind() != ConstraintKind::Inequality {
            return false;
        }
        self.normalize();
        if let Some((s, d, k)) = self.octagonal_edge_of_leq(cst.expression()) {
            if let Some(w) = self.graph.lookup(d, s) {
                return w + k < 0;
            }
        }
        match self.eval_interval(cst.expression()) {
            Interval::Bottom => true,
            i => i.lb() > Bound::Finite(0),
        }
    }
}

// Lattice operations. Unless noted otherwise both operands are expected to be
// normalised and neither bottom nor top; the wrapper handles the shortcuts.
impl SplitOctagon {
    /// `self <= o`. For every edge of `o` (renamed into `self`'s vertex
    /// space) the left side must admit a path at most as long; besides the
    /// direct edge, the walk tries every triangle through a bound edge to
    /// account for the split representation.
    pub fn leq(&self, o: &SplitOctagon) -> bool {
        debug_assert!(self.is_normalized() && o.is_normalized());
        let mut ren: Vec<Option<VertId>> = vec![None; o.graph.size()];
        for (var, (op, on)) in &o.vert_map {
            let touched = |u: VertId| {
                !o.graph.e_succs(u).is_empty() || !o.graph.e_preds(u).is_empty()
            };
            if !touched(*op) && !touched(*on) {
                continue;
            }
            match self.vert_map.get(var) {
                None => return false,
                Some((sp, sn)) => {
                    ren[*op] = Some(*sp);
                    ren[*on] = Some(*sn);
                }
            }
        }
        for ox in o.graph.verts() {
            for e in o.graph.e_succs(ox) {
                let oy = e.vert;
                if ox == oy {
                    continue;
                }
                let (Some(x), Some(y)) = (ren[ox], ren[oy]) else {
                    return false;
                };
                let ow = e.val;
                if let Some(wx) = self.graph.lookup(x, y) {
                    if wx <= ow {
                        continue;
                    }
                }
                let mut entailed = false;
                for g in self.graph.verts() {
                    if g % 2 != 0 {
                        continue;
                    }
                    if let Some(wy) = self.graph.lookup(g, g + 1) {
                        if let (Some(wa), Some(wb)) =
                            (self.graph.lookup(x, g), self.graph.lookup(g + 1, y))
                        {
                            if wa + wy + wb <= ow {
                                entailed = true;
                                break;
                            }
                        }
                    }
                    if let Some(wy) = self.graph.lookup(g + 1, g) {
                        if let (Some(wa), Some(wb)) =
                            (self.graph.lookup(x, g + 1), self.graph.lookup(g, y))
                        {
                            if wa + wy + wb <= ow {
                                entailed = true;
                                break;
                            }
                        }
                    }
                }
                if !entailed {
                    return false;
                }
            }
        }
        true
    }

    /// Build the deferred-relation graph: for every relational edge of
    /// `follow`, synthesise the tightest corresponding edge `lift` can offer
    /// from its own pair bounds, averaging the two half-edges.
    fn deferred_relations<L: Graph, F: Graph>(lift: &L, follow: &F, sz: usize) -> WeightedGraph {
        let mut out = WeightedGraph::with_vertices(sz);
        let follow_excl = SplitView::new(follow);
        for s in follow_excl.verts() {
            for e in follow_excl.e_succs(s) {
                let d = e.vert;
                if let (Some(ws), Some(wd)) =
                    (lift.lookup(s, mirror(s)), lift.lookup(mirror(d), d))
                {
                    out.update_edge_min(s, (ws + wd) / 2, d);
                }
            }
        }
        out
    }

    /// Meet one side with its deferred relations and re-close.
    fn close_met_side<G: Graph, D: Graph>(
        side: &G,
        deferred: &D,
        pot: &mut Vec<Weight>,
    ) -> Option<WeightedGraph> {
        let (mut met, is_closed) = ops::meet(side, deferred);
        if !ops::select_potentials(&met, pot) {
            return None;
        }
        if !is_closed {
            let mut delta = EdgeVec::new();
            {
                let excl = SplitView::new(&met);
                ops::close_after_meet(&excl, pot, side, deferred, &mut delta);
            }
            if !ops::apply_delta_checked(&mut met, pot, &delta)
                || !recover_bounds(&mut met, pot, &delta)
            {
                return None;
            }
        }
        Some(met)
    }

    /// Join, restricted to the variables common to both sides.
    pub fn join(&self, o: &SplitOctagon) -> SplitOctagon {
        debug_assert!(self.is_normalized() && o.is_normalized());
        let mut perm_x: Vec<VertId> = Vec::new();
        let mut perm_y: Vec<VertId> = Vec::new();
        let mut out_vmap: BTreeMap<Variable, (VertId, VertId)> = BTreeMap::new();
        let mut out_revmap: Vec<Option<Variable>> = Vec::new();
        let mut pot_rx: Vec<Weight> = Vec::new();
        let mut pot_ry: Vec<Weight> = Vec::new();
        for (var, (sp, sn)) in &self.vert_map {
            if let Some((op, on)) = o.vert_map.get(var) {
                out_vmap.insert(var.clone(), (perm_x.len(), perm_x.len() + 1));
                out_revmap.push(Some(var.clone()));
                out_revmap.push(Some(var.clone()));
                pot_rx.push(self.potential[*sp]);
                pot_rx.push(-self.potential[*sp]);
                pot_ry.push(o.potential[*op]);
                pot_ry.push(-o.potential[*op]);
                perm_x.push(*sp);
                perm_x.push(*sn);
                perm_y.push(*op);
                perm_y.push(*on);
            }
        }
        let sz = perm_x.len();
        let gx = PermView::total(perm_x, &self.graph);
        let gy = PermView::total(perm_y, &o.graph);

        // Lift x's bounds along y's relations and vice versa, then meet each
        // side with the lifted relations and re-close. Skipping this is sound
        // but loses every relation only one side states explicitly.
        let g_ix_ry = Self::deferred_relations(&gx, &gy, sz);
        let Some(g_rx) = Self::close_met_side(&gx, &g_ix_ry, &mut pot_rx) else {
            return SplitOctagon::bottom();
        };
        let g_rx_iy = Self::deferred_relations(&gy, &gx, sz);
        let Some(g_ry) = Self::close_met_side(&gy, &g_rx_iy, &mut pot_ry) else {
            return SplitOctagon::bottom();
        };

        let mut join_g = ops::join(&g_rx, &g_ry);

        // Corner constraints: where the sides disagree on which endpoint is
        // tighter, the crossed halves still bound the difference.
        let mut lb_up: Vec<VertId> = Vec::new();
        let mut lb_down: Vec<VertId> = Vec::new();
        let mut ub_up: Vec<VertId> = Vec::new();
        let mut ub_down: Vec<VertId> = Vec::new();
        for v in (0..sz).step_by(2) {
            if let (Some(wx), Some(wy)) = (gx.lookup(v + 1, v), gy.lookup(v + 1, v)) {
                if wx < wy {
                    ub_up.push(v);
                }
                if wy < wx {
                    ub_down.push(v);
                }
            }
            if let (Some(wx), Some(wy)) = (gx.lookup(v, v + 1), gy.lookup(v, v + 1)) {
                if wx < wy {
                    lb_down.push(v);
                }
                if wy < wx {
                    lb_up.push(v);
                }
            }
        }
        for s in &lb_up {
            let dx_s = gx.edge_val(*s, s + 1) / 2;
            let dy_s = gy.edge_val(*s, s + 1) / 2;
            for d in &ub_up {
                if s == d {
                    continue;
                }
                let w = (dx_s + gx.edge_val(d + 1, *d) / 2).max(dy_s + gy.edge_val(d + 1, *d) / 2);
                join_g.update_edge_min(*s, w, *d);
            }
        }
        for s in &lb_down {
            let dx_s = gx.edge_val(*s, s + 1) / 2;
            let dy_s = gy.edge_val(*s, s + 1) / 2;
            for d in &ub_down {
                if s == d {
                    continue;
                }
                let w = (dx_s + gx.edge_val(d + 1, *d) / 2).max(dy_s + gy.edge_val(d + 1, *d) / 2);
                join_g.update_edge_min(*s, w, *d);
            }
        }

        // Garbage-collect pairs the join left without any constraint.
        for v in (0..sz).step_by(2) {
            let empty = |u: VertId| {
                join_g.e_succs(u).is_empty() && join_g.e_preds(u).is_empty()
            };
            if empty(v) && empty(v + 1) {
                join_g.forget(v);
                join_g.forget(v + 1);
                if let Some(var) = out_revmap[v].take() {
                    out_vmap.remove(&var);
                    out_revmap[v + 1] = None;
                }
            }
        }

        let mut pot = pot_rx;
        if !ops::select_potentials(&join_g, &mut pot) {
            return SplitOctagon::bottom();
        }
        SplitOctagon {
            vert_map: out_vmap,
            rev_map: out_revmap,
            graph: join_g,
            potential: pot,
            unstable: BTreeSet::new(),
            normalized: true,
            bottom: false,
        }
    }

    /// Meet over the union of the two variable sets: syntactic element-wise
    /// min, then potential selection (bottom on infeasibility) and closure.
    pub fn meet(&self, o: &SplitOctagon) -> SplitOctagon {
        debug_assert!(self.is_normalized() && o.is_normalized());
        let mut perm_x: Vec<Option<VertId>> = Vec::new();
        let mut perm_y: Vec<Option<VertId>> = Vec::new();
        let mut meet_verts: BTreeMap<Variable, (VertId, VertId)> = BTreeMap::new();
        let mut meet_rev: Vec<Option<Variable>> = Vec::new();
        let mut meet_pi: Vec<Weight> = Vec::new();
        for (var, (sp, sn)) in &self.vert_map {
            let vv = perm_x.len();
            meet_verts.insert(var.clone(), (vv, vv + 1));
            meet_rev.push(Some(var.clone()));
            meet_rev.push(Some(var.clone()));
            perm_x.push(Some(*sp));
            perm_x.push(Some(*sn));
            perm_y.push(None);
            perm_y.push(None);
            meet_pi.push(self.potential[*sp]);
            meet_pi.push(self.potential[*sn]);
        }
        for (var, (op, on)) in &o.vert_map {
            match meet_verts.get(var) {
                Some((vv, _)) => {
                    perm_y[*vv] = Some(*op);
                    perm_y[*vv + 1] = Some(*on);
                }
                None => {
                    let vv = perm_y.len();
                    meet_verts.insert(var.clone(), (vv, vv + 1));
                    meet_rev.push(Some(var.clone()));
                    meet_rev.push(Some(var.clone()));
                    perm_y.push(Some(*op));
                    perm_y.push(Some(*on));
                    perm_x.push(None);
                    perm_x.push(None);
                    meet_pi.push(o.potential[*op]);
                    meet_pi.push(o.potential[*on]);
                }
            }
        }
        let gx = PermView::new(perm_x, &self.graph);
        let gy = PermView::new(perm_y, &o.graph);
        let (mut meet_g, is_closed) = ops::meet(&gx, &gy);
        if !ops::select_potentials(&meet_g, &mut meet_pi) {
            return SplitOctagon::bottom();
        }
        if !is_closed {
            let mut delta = EdgeVec::new();
            {
                let excl = SplitView::new(&meet_g);
                ops::close_after_meet(&excl, &meet_pi, &gx, &gy, &mut delta);
            }
            if !ops::apply_delta_checked(&mut meet_g, &mut meet_pi, &delta)
                || !recover_bounds(&mut meet_g, &mut meet_pi, &delta)
            {
                return SplitOctagon::bottom();
            }
        }
        SplitOctagon {
            vert_map: meet_verts,
            rev_map: meet_rev,
            graph: meet_g,
            potential: meet_pi,
            unstable: BTreeSet::new(),
            normalized: true,
            bottom: false,
        }
    }

    /// Widening over the common variables. `self` is the raw previous result
    /// (deliberately *not* normalised: widening against the unclosed left
    /// operand is what makes the sequence stabilise); `o` is normalised.
    /// Every destabilised vertex is carried in the unstable set until the
    /// next normalisation re-closes around it.
    pub fn widening(&self, o: &SplitOctagon, thresholds: Option<&[i64]>) -> SplitOctagon {
        debug_assert!(o.is_normalized());
        let mut perm_x: Vec<VertId> = Vec::new();
        let mut perm_y: Vec<VertId> = Vec::new();
        let mut out_vmap: BTreeMap<Variable, (VertId, VertId)> = BTreeMap::new();
        let mut out_revmap: Vec<Option<Variable>> = Vec::new();
        let mut widen_pot: Vec<Weight> = Vec::new();
        let mut remap: BTreeMap<VertId, VertId> = BTreeMap::new();
        for (var, (sp, sn)) in &self.vert_map {
            if let Some((op, on)) = o.vert_map.get(var) {
                let vv = perm_x.len();
                out_vmap.insert(var.clone(), (vv, vv + 1));
                out_revmap.push(Some(var.clone()));
                out_revmap.push(Some(var.clone()));
                widen_pot.push(self.potential[*sp]);
                widen_pot.push(self.potential[*sn]);
                remap.insert(*sp, vv);
                remap.insert(*sn, vv + 1);
                perm_x.push(*sp);
                perm_x.push(*sn);
                perm_y.push(*op);
                perm_y.push(*on);
            }
        }
        let gx = PermView::total(perm_x, &self.graph);
        let gy = PermView::total(perm_y, &o.graph);
        let mut destabilized: Vec<VertId> = Vec::new();
        let widen_g = match thresholds {
            Some(ts) => ops::widen_with_thresholds(&gx, &gy, &mut destabilized, ts),
            None => ops::widen(&gx, &gy, &mut destabilized),
        };
        let mut unstable: BTreeSet<VertId> = destabilized.into_iter().collect();
        for v in &self.unstable {
            if let Some(nv) = remap.get(v) {
                unstable.insert(*nv);
            }
        }
        SplitOctagon {
            vert_map: out_vmap,
            rev_map: out_revmap,
            graph: widen_g,
            potential: widen_pot,
            unstable,
            normalized: false,
            bottom: false,
        }
    }

    /// Narrowing: adopt from `o` exactly the constraints widening dropped to
    /// `+∞` (edges `self` lacks); everything `self` already bounds is kept.
    /// Terminates because an edge can be adopted at most once.
    pub fn narrowing(&self, o: &SplitOctagon) -> SplitOctagon {
        debug_assert!(self.is_normalized() && o.is_normalized());
        let mut res = self.clone();
        let mut ren: Vec<Option<VertId>> = vec![None; o.graph.size()];
        for (var, (op, on)) in &o.vert_map {
            let (sp, sn) = match res.vert_map.get(var) {
                Some(pair) => *pair,
                None => {
                    let sp = res.get_vert(var);
                    (sp, sp + 1)
                }
            };
            ren[*op] = Some(sp);
            ren[*on] = Some(sn);
        }
        for os in o.graph.verts() {
            for e in o.graph.e_succs(os) {
                let (Some(s), Some(d)) = (ren[os], ren[e.vert]) else {
                    continue;
                };
                if res.graph.lookup(s, d).is_none() {
                    res.graph.set_edge(s, e.val, d);
                    if !ops::repair_potential(&res.graph, &mut res.potential, s, d) {
                        return SplitOctagon::bottom();
                    }
                }
            }
        }
        let mut delta = EdgeVec::new();
        {
            let excl = SplitView::new(&res.graph);
            ops::close_johnson(&excl, &res.potential, &mut delta);
        }
        if !ops::apply_delta_checked(&mut res.graph, &mut res.potential, &delta)
            || !recover_bounds(&mut res.graph, &mut res.potential, &delta)
        {
            return SplitOctagon::bottom();
        }
        res.normalized = true;
        res
    }

    /// The state as a linear constraint system: interval bounds from the
    /// pair edges, octagonal relations from the split view.
    pub fn to_constraints(&self) -> LinearConstraintSystem {
        let mut csts = LinearConstraintSystem::new();
        if self.bottom {
            csts.push(LinearConstraint::contradiction());
            return csts;
        }
        for (var, (p, n)) in &self.vert_map {
            if let Some(w) = self.graph.lookup(*p, *n) {
                csts.push(LinearConstraint::geq(
                    LinearExpr::var(var),
                    LinearExpr::constant(-div_floor(w, 2)),
                ));
            }
            if let Some(w) = self.graph.lookup(*n, *p) {
                csts.push(LinearConstraint::leq(
                    LinearExpr::var(var),
                    LinearExpr::constant(div_floor(w, 2)),
                ));
            }
        }
        let split = SplitView::new(&self.graph);
        for s in split.verts() {
            let Some(vs) = self.rev_map.get(s).and_then(|v| v.as_ref()) else {
                continue;
            };
            for e in split.e_succs(s) {
                let d = e.vert;
                let Some(vd) = self.rev_map.get(d).and_then(|v| v.as_ref()) else {
                    continue;
                };
                let expr = match (s % 2 == 0, d % 2 == 0) {
                    // p_j -> p_i: x_i - x_j <= w
                    (true, true) => LinearExpr::var(vd).plus_term(-1, vs),
                    // n_j -> p_i: x_i + x_j <= w
                    (false, true) => LinearExpr::var(vd).plus_term(1, vs),
                    // p_j -> n_i: -x_i - x_j <= w
                    (true, false) => LinearExpr::constant(0)
                        .plus_term(-1, vd)
                        .plus_term(-1, vs),
                    // n_j -> n_i: -x_i + x_j <= w
                    (false, false) => LinearExpr::constant(0)
                        .plus_term(-1, vd)
                        .plus_term(1, vs),
                };
                csts.push(LinearConstraint::leq(expr, LinearExpr::constant(e.val)));
            }
        }
        csts
    }
}

impl fmt::Display for SplitOctagon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bottom {
            return f.write_str("_|_");
        }
        if self.is_top() {
            return f.write_str("{}");
        }
        let mut first = true;
        write!(f, "{{")?;
        for (var, _) in &self.vert_map {
            let intv = self.value_of(var);
            if intv.is_top() {
                continue;
            }
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{var} -> {intv}")?;
            first = false;
        }
        let split = SplitView::new(&self.graph);
        for s in split.verts() {
            let Some(vs) = self.rev_map.get(s).and_then(|v| v.as_ref()) else {
                continue;
            };
            for e in split.e_succs(s) {
                let Some(vd) = self.rev_map.get(e.vert).and_then(|v| v.as_ref()) else {
                    continue;
                };
                if !first {
                    write!(f, ", ")?;
                }
                match (s % 2 == 0, e.vert % 2 == 0) {
                    (true, true) => write!(f, "{vd}-{vs}<={}", e.val)?,
                    (false, true) => write!(f, "{vd}+{vs}<={}", e.val)?,
                    (true, false) => write!(f, "-{vd}-{vs}<={}", e.val)?,
                    (false, false) => write!(f, "-{vd}+{vs}<={}", e.val)?,
                }
                first = false;
            }
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use octant_core::VarFactory;

    fn leq_c(v: &Variable, k: i64) -> LinearConstraint {
        LinearConstraint::leq(LinearExpr::var(v), LinearExpr::constant(k))
    }

    fn geq_c(v: &Variable, k: i64) -> LinearConstraint {
        LinearConstraint::geq(LinearExpr::var(v), LinearExpr::constant(k))
    }

    fn eq_c(v: &Variable, k: i64) -> LinearConstraint {
        LinearConstraint::eq(LinearExpr::var(v), LinearExpr::constant(k))
    }

    fn diff_leq(x: &Variable, y: &Variable, k: i64) -> LinearConstraint {
        // x - y <= k
        LinearConstraint::leq(
            LinearExpr::var(x).plus_term(-1, y),
            LinearExpr::constant(k),
        )
    }

    #[test]
    fn interval_bounds_roundtrip() {
        let vfac = VarFactory::new();
        let x = vfac.int("x", 32);
        let mut oct = SplitOctagon::top();
        oct.assume(&leq_c(&x, 5));
        oct.assume(&geq_c(&x, 0));
        assert_eq!(
            oct.value_of(&x),
            Interval::new(Bound::Finite(0), Bound::Finite(5))
        );
        oct.assume(&geq_c(&x, 6));
        assert!(oct.is_bottom());
    }

    #[test]
    fn pair_allocation_is_atomic() {
        let vfac = VarFactory::new();
        let x = vfac.int("x", 32);
        let y = vfac.int("y", 32);
        let z = vfac.int("z", 32);
        let mut oct = SplitOctagon::top();
        oct.assume(&leq_c(&x, 1));
        oct.assume(&leq_c(&y, 1));
        oct.forget(&x);
        oct.assume(&leq_c(&z, 1));
        let (p, n) = oct.vertex_pair(&z).unwrap();
        assert_eq!(p % 2, 0);
        assert_eq!(n, p + 1);
    }

    #[test]
    fn mirror_symmetry_after_normalize() {
        let vfac = VarFactory::new();
        let x = vfac.int("x", 32);
        let y = vfac.int("y", 32);
        let mut oct = SplitOctagon::top();
        oct.assume(&diff_leq(&x, &y, 3));
        oct.assume(&geq_c(&y, 0));
        oct.normalize();
        for (s, d, w) in oct.edges() {
            if s / 2 == d / 2 {
                continue;
            }
            let m = oct
                .edges()
                .into_iter()
                .find(|(ms, md, _)| *ms == mirror(d) && *md == mirror(s));
            assert_eq!(m.map(|(_, _, mw)| mw), Some(w), "missing mirror of ({s},{d})");
        }
    }

    #[test]
    fn closure_is_idempotent() {
        let vfac = VarFactory::new();
        let x = vfac.int("x", 32);
        let y = vfac.int("y", 32);
        let z = vfac.int("z", 32);
        let mut oct = SplitOctagon::top();
        oct.assume(&geq_c(&x, 0));
        oct.assume(&leq_c(&x, 10));
        oct.assume(&diff_leq(&y, &x, 2));
        oct.assume(&diff_leq(&z, &y, 1));
        oct.normalize();
        let before = oct.edges();
        oct.normalize();
        assert_eq!(before, oct.edges());
    }

    #[test]
    fn difference_chain_entailment() {
        let vfac = VarFactory::new();
        let x = vfac.int("x", 32);
        let y = vfac.int("y", 32);
        let mut oct = SplitOctagon::top();
        oct.assume(&leq_c(&y, 5));
        oct.assume(&geq_c(&y, 0));
        oct.assume(&diff_leq(&x, &y, 3));
        // x <= y + 3 <= 8, detected through the pair-bound cycle.
        let mut probe = oct.clone();
        probe.assume(&geq_c(&x, 9));
        assert!(probe.is_bottom());
        let mut probe = oct.clone();
        probe.assume(&geq_c(&x, 8));
        assert!(!probe.is_bottom());
    }

    #[test]
    fn sum_constraints_close() {
        let vfac = VarFactory::new();
        let x = vfac.int("x", 32);
        let y = vfac.int("y", 32);
        let mut oct = SplitOctagon::top();
        // x + y <= 10, x >= 4 entail y <= 6.
        oct.assume(&LinearConstraint::leq(
            LinearExpr::var(&x).plus_term(1, &y),
            LinearExpr::constant(10),
        ));
        oct.assume(&geq_c(&x, 4));
        let mut probe = oct.clone();
        probe.assume(&geq_c(&y, 7));
        assert!(probe.is_bottom());
        let mut probe = oct.clone();
        probe.assume(&geq_c(&y, 6));
        assert!(!probe.is_bottom());
    }

    #[test]
    fn assign_composes_with_existing_relations() {
        let vfac = VarFactory::new();
        let i = vfac.int("i", 32);
        let k = vfac.int("k", 32);
        let mut oct = SplitOctagon::top();
        oct.assume(&geq_c(&i, 0));
        oct.assume(&eq_c(&k, 0));
        oct.assume(&diff_leq(&i, &k, 0));
        oct.assume(&diff_leq(&k, &i, 0));
        // i := i + 1 must shift the relation: i - k = 1 afterwards.
        oct.assign(&i, &LinearExpr::var(&i).plus(1));
        let mut probe = oct.clone();
        probe.assume(&diff_leq(&k, &i, -2)); // k <= i - 2 contradicts i - k = 1? no: i-k=1 means k = i-1
        assert!(probe.is_bottom());
        let mut probe = oct.clone();
        probe.assume(&diff_leq(&i, &k, 0)); // i <= k contradicts i - k = 1
        assert!(probe.is_bottom());
    }

    #[test]
    fn join_of_two_points_keeps_the_equality() {
        let vfac = VarFactory::new();
        let i = vfac.int("i", 32);
        let k = vfac.int("k", 32);
        let mut a = SplitOctagon::top();
        a.set(&i, Interval::singleton_of(0));
        a.set(&k, Interval::singleton_of(0));
        let mut b = SplitOctagon::top();
        b.set(&i, Interval::singleton_of(1));
        b.set(&k, Interval::singleton_of(1));
        a.normalize();
        b.normalize();
        let j = a.join(&b);
        // Corner constraints derive i = k even though neither side stated it.
        let mut probe = j.clone();
        probe.assume(&diff_leq(&i, &k, -1));
        assert!(probe.is_bottom());
        let mut probe = j.clone();
        probe.assume(&diff_leq(&k, &i, -1));
        assert!(probe.is_bottom());
        assert_eq!(
            j.value_of(&i),
            Interval::new(Bound::Finite(0), Bound::Finite(1))
        );
    }

    #[test]
    fn join_restricts_to_common_variables() {
        let vfac = VarFactory::new();
        let x = vfac.int("x", 32);
        let y = vfac.int("y", 32);
        let mut a = SplitOctagon::top();
        a.assume(&leq_c(&x, 1));
        a.assume(&leq_c(&y, 1));
        let mut b = SplitOctagon::top();
        b.assume(&leq_c(&x, 2));
        a.normalize();
        b.normalize();
        let j = a.join(&b);
        assert_eq!(j.value_of(&x).ub(), Bound::Finite(2));
        assert!(j.value_of(&y).is_top());
    }

    #[test]
    fn meet_is_infeasible_when_bounds_cross() {
        let vfac = VarFactory::new();
        let x = vfac.int("x", 32);
        let mut a = SplitOctagon::top();
        a.assume(&leq_c(&x, 3));
        let mut b = SplitOctagon::top();
        b.assume(&geq_c(&x, 5));
        a.normalize();
        b.normalize();
        let m = a.meet(&b);
        assert!(m.is_bottom());
    }

    #[test]
    fn meet_combines_relations_across_sides() {
        let vfac = VarFactory::new();
        let x = vfac.int("x", 32);
        let y = vfac.int("y", 32);
        let z = vfac.int("z", 32);
        let mut a = SplitOctagon::top();
        a.assume(&diff_leq(&y, &x, 1));
        let mut b = SplitOctagon::top();
        b.assume(&diff_leq(&z, &y, 1));
        a.normalize();
        b.normalize();
        let mut m = a.meet(&b);
        // z - x <= 2 via the mixed path.
        let mut probe = m.clone();
        probe.assume(&geq_c(&x, 0));
        probe.assume(&LinearConstraint::geq(
            LinearExpr::var(&z).plus_term(-1, &x),
            LinearExpr::constant(3),
        ));
        assert!(probe.is_bottom());
        m.normalize();
        assert!(!m.is_bottom());
    }

    #[test]
    fn widening_drops_grown_bounds_and_restabilises() {
        let vfac = VarFactory::new();
        let x = vfac.int("x", 32);
        let y = vfac.int("y", 32);
        let mut a = SplitOctagon::top();
        a.assume(&geq_c(&x, 0));
        a.assume(&leq_c(&x, 0));
        a.assume(&diff_leq(&x, &y, 0));
        a.assume(&diff_leq(&y, &x, 0));
        let mut b = SplitOctagon::top();
        b.assume(&geq_c(&x, 0));
        b.assume(&leq_c(&x, 1));
        b.assume(&diff_leq(&x, &y, 0));
        b.assume(&diff_leq(&y, &x, 0));
        a.normalize();
        b.normalize();
        let mut w = a.widening(&b, None);
        w.normalize();
        assert!(!w.is_bottom());
        assert_eq!(w.value_of(&x).lb(), Bound::Finite(0));
        assert!(w.value_of(&x).ub().is_infinite());
        // The equality is stable and survives.
        let mut probe = w.clone();
        probe.assume(&diff_leq(&x, &y, -1));
        assert!(probe.is_bottom());
        // Widening result is a post-fixpoint of both arguments.
        assert!(a.leq(&w));
        assert!(b.leq(&w));
    }

    #[test]
    fn disequation_trims_implied_interval() {
        let vfac = VarFactory::new();
        let i = vfac.int("i", 32);
        let mut oct = SplitOctagon::top();
        oct.assume(&geq_c(&i, 0));
        oct.assume(&leq_c(&i, 9));
        oct.assume(&LinearConstraint::neq(
            LinearExpr::var(&i),
            LinearExpr::constant(9),
        ));
        assert_eq!(
            oct.value_of(&i),
            Interval::new(Bound::Finite(0), Bound::Finite(8))
        );
    }

    #[test]
    fn is_unsat_uses_the_reverse_path() {
        let vfac = VarFactory::new();
        let x = vfac.int("x", 32);
        let y = vfac.int("y", 32);
        let mut oct = SplitOctagon::top();
        oct.assume(&diff_leq(&x, &y, -1)); // x <= y - 1
        // y - x <= -1 (i.e. y <= x - 1) is unsatisfiable with the above.
        assert!(oct.is_unsat(&diff_leq(&y, &x, -1)));
        assert!(!oct.is_unsat(&diff_leq(&y, &x, 1)));
    }

    #[test]
    fn expand_copies_without_linking() {
        let vfac = VarFactory::new();
        let x = vfac.int("x", 32);
        let y = vfac.int("y", 32);
        let z = vfac.int("z", 32);
        let mut oct = SplitOctagon::top();
        oct.assume(&geq_c(&x, 1));
        oct.assume(&leq_c(&x, 4));
        oct.assume(&diff_leq(&x, &z, 0));
        oct.expand(&x, &y);
        assert_eq!(
            oct.value_of(&y),
            Interval::new(Bound::Finite(1), Bound::Finite(4))
        );
        // No direct x/y relation was introduced.
        let (xp, xn) = oct.vertex_pair(&x).unwrap();
        let (yp, yn) = oct.vertex_pair(&y).unwrap();
        for (s, d, _) in oct.edges() {
            let xs = s == xp || s == xn;
            let yd = d == yp || d == yn;
            let ys = s == yp || s == yn;
            let xd = d == xp || d == xn;
            assert!(!(xs && yd) && !(ys && xd), "expand linked x and y");
        }
        // Forgetting x leaves y's copy intact.
        oct.forget(&x);
        assert_eq!(
            oct.value_of(&y),
            Interval::new(Bound::Finite(1), Bound::Finite(4))
        );
    }

    #[test]
    #[should_panic(expected = "already exists")]
    fn expand_into_existing_variable_aborts() {
        let vfac = VarFactory::new();
        let x = vfac.int("x", 32);
        let y = vfac.int("y", 32);
        let mut oct = SplitOctagon::top();
        oct.assume(&geq_c(&x, 0));
        oct.assume(&geq_c(&y, 0));
        oct.expand(&x, &y);
    }

    #[test]
    fn rename_moves_constraints() {
        let vfac = VarFactory::new();
        let x = vfac.int("x", 32);
        let y = vfac.int("y", 32);
        let mut oct = SplitOctagon::top();
        oct.assume(&leq_c(&x, 7));
        oct.rename(&[x.clone()], &[y.clone()]);
        assert_eq!(oct.value_of(&y).ub(), Bound::Finite(7));
        assert!(oct.value_of(&x).is_top());
    }

    #[test]
    fn to_constraints_roundtrip() {
        let vfac = VarFactory::new();
        let x = vfac.int("x", 32);
        let y = vfac.int("y", 32);
        let mut oct = SplitOctagon::top();
        oct.assume(&geq_c(&x, 0));
        oct.assume(&leq_c(&x, 5));
        oct.assume(&diff_leq(&y, &x, 2));
        oct.normalize();
        let csts = oct.to_constraints();
        let mut back = SplitOctagon::top();
        for c in csts.iter() {
            back.assume(c);
        }
        back.normalize();
        assert!(back.leq(&oct));
        assert!(oct.leq(&back));
    }

    #[test]
    fn narrowing_adopts_only_missing_edges() {
        let vfac = VarFactory::new();
        let x = vfac.int("x", 32);
        let mut a = SplitOctagon::top();
        a.assume(&geq_c(&x, 0));
        let mut b = SplitOctagon::top();
        b.assume(&geq_c(&x, 2));
        b.assume(&leq_c(&x, 9));
        a.normalize();
        b.normalize();
        let n = a.narrowing(&b);
        assert_eq!(
            n.value_of(&x),
            Interval::new(Bound::Finite(0), Bound::Finite(9))
        );
    }

    #[test]
    fn bottom_absorbs_everything() {
        let vfac = VarFactory::new();
        let x = vfac.int("x", 32);
        let mut oct = SplitOctagon::bottom();
        oct.assume(&leq_c(&x, 3));
        oct.assign(&x, &LinearExpr::constant(1));
        oct.forget(&x);
        assert!(oct.is_bottom());
        assert!(oct.value_of(&x).is_bottom());
    }
}
