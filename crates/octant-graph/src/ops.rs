//! Closure, potential maintenance, and graph-level lattice operations.
//!
//! All shortest-path work runs Dijkstra over potential-reduced weights
//! (`r(u,v) = π[u] + w(u,v) - π[v] ≥ 0`), so the only place negative cycles
//! can surface is potential repair/selection, which is exactly where the
//! octagon decides bottom.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, VecDeque};

use tracing::debug;

use crate::graph::{Graph, VertId, Weight, WeightedGraph};

/// Edge tightenings emitted by a closure pass, applied later in one batch.
pub type EdgeVec = Vec<((VertId, VertId), Weight)>;

/// Dijkstra from `src` over reduced weights. Returns reduced distances for
/// reached vertices.
fn dijkstra<G: Graph>(g: &G, pot: &[Weight], src: VertId) -> BTreeMap<VertId, Weight> {
    let mut dist: BTreeMap<VertId, Weight> = BTreeMap::new();
    let mut heap: BinaryHeap<Reverse<(Weight, VertId)>> = BinaryHeap::new();
    dist.insert(src, 0);
    heap.push(Reverse((0, src)));
    while let Some(Reverse((d, u))) = heap.pop() {
        if dist.get(&u) != Some(&d) {
            continue;
        }
        for e in g.e_succs(u) {
            let r = pot[u] + e.val - pot[e.vert];
            debug_assert!(r >= 0, "negative reduced weight under a valid potential");
            let nd = d + r;
            if dist.get(&e.vert).map_or(true, |old| nd < *old) {
                dist.insert(e.vert, nd);
                heap.push(Reverse((nd, e.vert)));
            }
        }
    }
    dist
}

/// Reverse Dijkstra: reduced distances *to* `dst`.
fn dijkstra_rev<G: Graph>(g: &G, pot: &[Weight], dst: VertId) -> BTreeMap<VertId, Weight> {
    let mut dist: BTreeMap<VertId, Weight> = BTreeMap::new();
    let mut heap: BinaryHeap<Reverse<(Weight, VertId)>> = BinaryHeap::new();
    dist.insert(dst, 0);
    heap.push(Reverse((0, dst)));
    while let Some(Reverse((d, u))) = heap.pop() {
        if dist.get(&u) != Some(&d) {
            continue;
        }
        for e in g.e_preds(u) {
            let r = pot[e.vert] + e.val - pot[u];
            debug_assert!(r >= 0, "negative reduced weight under a valid potential");
            let nd = d + r;
            if dist.get(&e.vert).map_or(true, |old| nd < *old) {
                dist.insert(e.vert, nd);
                heap.push(Reverse((nd, e.vert)));
            }
        }
    }
    dist
}

fn push_if_tighter<G: Graph>(g: &G, s: VertId, d: VertId, w: Weight, delta: &mut EdgeVec) {
    if s == d {
        return;
    }
    match g.lookup(s, d) {
        Some(old) if old <= w => {}
        _ => delta.push(((s, d), w)),
    }
}

/// All-pairs shortest paths: Dijkstra with potential-reduced weights from
/// every source with at least one outgoing edge. Tightened and newly implied
/// edges are emitted as a delta.
pub fn close_johnson<G: Graph>(g: &G, pot: &[Weight], delta: &mut EdgeVec) {
    for s in g.verts() {
        if g.e_succs(s).is_empty() {
            continue;
        }
        let dist = dijkstra(g, pot, s);
        for (d, rd) in dist {
            if d == s {
                continue;
            }
            let w = rd + pot[d] - pot[s];
            push_if_tighter(g, s, d, w, delta);
        }
    }
    debug!(target: "octant", tightened = delta.len(), "johnson closure");
}

/// Chromatic closure after a meet of two *closed* graphs.
///
/// Only a path mixing edges of both operands can tighten the meet: a path
/// living entirely in one operand is already summarised by that operand's own
/// closure, hence by an edge of the meet. Each vertex therefore tracks which
/// operands contain its whole shortest path; emissions are pruned to the
/// mixed ones.
pub fn close_after_meet<G: Graph, A: Graph, B: Graph>(
    g: &G,
    pot: &[Weight],
    a: &A,
    b: &B,
    delta: &mut EdgeVec,
) {
    const IN_A: u8 = 1;
    const IN_B: u8 = 2;
    for s in g.verts() {
        if g.e_succs(s).is_empty() {
            continue;
        }
        let mut dist: BTreeMap<VertId, (Weight, u8)> = BTreeMap::new();
        let mut heap: BinaryHeap<Reverse<(Weight, VertId)>> = BinaryHeap::new();
        dist.insert(s, (0, IN_A | IN_B));
        heap.push(Reverse((0, s)));
        while let Some(Reverse((du, u))) = heap.pop() {
            let (best, mask_u) = dist[&u];
            if best != du {
                continue;
            }
            for e in g.e_succs(u) {
                let r = pot[u] + e.val - pot[e.vert];
                debug_assert!(r >= 0);
                let nd = du + r;
                let mut edge_mask = 0u8;
                if a.lookup(u, e.vert) == Some(e.val) {
                    edge_mask |= IN_A;
                }
                if b.lookup(u, e.vert) == Some(e.val) {
                    edge_mask |= IN_B;
                }
                let nm = mask_u & edge_mask;
                match dist.get(&e.vert).copied() {
                    Some((old, old_mask)) => {
                        if nd < old {
                            dist.insert(e.vert, (nd, nm));
                            heap.push(Reverse((nd, e.vert)));
                        } else if nd == old && (old_mask | nm) != old_mask {
                            dist.insert(e.vert, (old, old_mask | nm));
                        }
                    }
                    None => {
                        dist.insert(e.vert, (nd, nm));
                        heap.push(Reverse((nd, e.vert)));
                    }
                }
            }
        }
        for (d, (rd, mask)) in dist {
            if d == s || mask != 0 {
                continue;
            }
            let w = rd + pot[d] - pot[s];
            push_if_tighter(g, s, d, w, delta);
        }
    }
}

/// Closure restricted to paths through `v`: run after an assignment installed
/// a fresh vertex whose edges are the only unclosed ones.
pub fn close_after_assign<G: Graph>(g: &G, pot: &[Weight], v: VertId, delta: &mut EdgeVec) {
    let from_v = dijkstra(g, pot, v);
    let to_v = dijkstra_rev(g, pot, v);
    for (d, rd) in &from_v {
        if *d == v {
            continue;
        }
        push_if_tighter(g, v, *d, rd + pot[*d] - pot[v], delta);
    }
    for (s, rs) in &to_v {
        if *s == v {
            continue;
        }
        push_if_tighter(g, *s, v, rs - pot[*s] + pot[v], delta);
    }
    for (s, rs) in &to_v {
        if *s == v {
            continue;
        }
        let ws = rs - pot[*s] + pot[v];
        for (d, rd) in &from_v {
            if *d == v || s == d {
                continue;
            }
            let wd = rd + pot[*d] - pot[v];
            push_if_tighter(g, *s, *d, ws + wd, delta);
        }
    }
}

/// Re-stabilisation after widening: widening only removes edges, so the only
/// closure violations sit at the sources that lost an out-edge. Dijkstra from
/// each of those re-derives their implied edges.
pub fn close_after_widen<G: Graph>(
    g: &G,
    pot: &[Weight],
    unstable: &BTreeSet<VertId>,
    delta: &mut EdgeVec,
) {
    for s in unstable {
        let s = *s;
        if s >= g.size() || g.e_succs(s).is_empty() {
            continue;
        }
        let dist = dijkstra(g, pot, s);
        for (d, rd) in dist {
            if d == s {
                continue;
            }
            push_if_tighter(g, s, d, rd + pot[d] - pot[s], delta);
        }
    }
}

/// Apply a delta with `min`. The edges must come from a closure pass over the
/// same graph, so potentials stay valid.
pub fn apply_delta(g: &mut WeightedGraph, delta: &EdgeVec) {
    for ((s, d), w) in delta {
        g.update_edge_min(*s, *w, *d);
    }
}

/// Apply a delta with `min`, repairing the potential after each edge that
/// violates it. Returns false when a repair finds a negative cycle, i.e. the
/// resulting constraint system is infeasible.
pub fn apply_delta_checked(g: &mut WeightedGraph, pot: &mut Vec<Weight>, delta: &EdgeVec) -> bool {
    for ((s, d), w) in delta {
        g.update_edge_min(*s, *w, *d);
        if pot[*s] + g.edge_val(*s, *d) - pot[*d] < 0 && !repair_potential(&*g, pot, *s, *d) {
            return false;
        }
    }
    true
}

/// Local potential repair after tightening edge `(src, dst)`.
///
/// Dijkstra from `dst` over the old reduced weights; a vertex's potential
/// drops by `min(0, slack + dist_r)` where `slack` is the new edge's
/// violation. The decrease reaching `src` means the new edge closes a
/// negative cycle; the caller's state is then bottom.
pub fn repair_potential<G: Graph>(
    g: &G,
    pot: &mut Vec<Weight>,
    src: VertId,
    dst: VertId,
) -> bool {
    let w = match g.lookup(src, dst) {
        Some(w) => w,
        None => return true,
    };
    let slack = pot[src] + w - pot[dst];
    if slack >= 0 {
        return true;
    }
    // dist holds reduced distances from dst; only vertices whose change
    // slack + dist stays negative matter.
    let mut dist: BTreeMap<VertId, Weight> = BTreeMap::new();
    let mut heap: BinaryHeap<Reverse<(Weight, VertId)>> = BinaryHeap::new();
    dist.insert(dst, 0);
    heap.push(Reverse((0, dst)));
    let mut changes: Vec<(VertId, Weight)> = Vec::new();
    while let Some(Reverse((d, u))) = heap.pop() {
        if dist.get(&u) != Some(&d) {
            continue;
        }
        let change = slack + d;
        if change >= 0 {
            continue;
        }
        if u == src {
            return false;
        }
        changes.push((u, change));
        for e in g.e_succs(u) {
            if u == src && e.vert == dst {
                continue;
            }
            let r = pot[u] + e.val - pot[e.vert];
            debug_assert!(r >= 0 || (u == src && e.vert == dst));
            let nd = d + r;
            if dist.get(&e.vert).map_or(true, |old| nd < *old) {
                dist.insert(e.vert, nd);
                heap.push(Reverse((nd, e.vert)));
            }
        }
    }
    for (v, change) in changes {
        pot[v] += change;
    }
    debug_assert!(check_potential(g, pot));
    true
}

/// Bellman-Ford (SPFA form) potential selection over an arbitrary graph,
/// warm-started from the current labels. Returns false on a negative cycle.
pub fn select_potentials<G: Graph>(g: &G, pot: &mut Vec<Weight>) -> bool {
    let n = g.size();
    if pot.len() < n {
        pot.resize(n, 0);
    }
    let verts = g.verts();
    let mut queue: VecDeque<VertId> = verts.iter().copied().collect();
    let mut queued = vec![false; n];
    let mut relaxed = vec![0usize; n];
    for v in &verts {
        queued[*v] = true;
    }
    while let Some(u) = queue.pop_front() {
        queued[u] = false;
        for e in g.e_succs(u) {
            if pot[u] + e.val < pot[e.vert] {
                pot[e.vert] = pot[u] + e.val;
                relaxed[e.vert] += 1;
                if relaxed[e.vert] > n {
                    return false;
                }
                if !queued[e.vert] {
                    queued[e.vert] = true;
                    queue.push_back(e.vert);
                }
            }
        }
    }
    debug_assert!(check_potential(g, pot));
    true
}

/// Feasibility check, used in debug assertions.
pub fn check_potential<G: Graph>(g: &G, pot: &[Weight]) -> bool {
    for v in g.verts() {
        for e in g.e_succs(v) {
            if pot[v] + e.val - pot[e.vert] < 0 {
                return false;
            }
        }
    }
    true
}

/// Syntactic meet: element-wise min over the union of edges. The flag is true
/// when the result coincides with one (closed) operand, in which case it is
/// already closed.
pub fn meet<A: Graph, B: Graph>(a: &A, b: &B) -> (WeightedGraph, bool) {
    let sz = a.size().max(b.size());
    let mut out = WeightedGraph::with_vertices(sz);
    let mut a_tightened = false;
    let mut b_tightened = false;
    for u in a.verts() {
        for e in a.e_succs(u) {
            out.set_edge(u, e.val, e.vert);
        }
    }
    for u in b.verts() {
        for e in b.e_succs(u) {
            match out.lookup(u, e.vert) {
                Some(old) => {
                    if e.val < old {
                        out.set_edge(u, e.val, e.vert);
                        a_tightened = true;
                    } else if old < e.val {
                        b_tightened = true;
                    }
                }
                None => {
                    out.set_edge(u, e.val, e.vert);
                    a_tightened = true;
                }
            }
        }
    }
    if !b_tightened {
        // Check for a-edges missing from b.
        'outer: for u in a.verts() {
            for e in a.e_succs(u) {
                if b.lookup(u, e.vert).is_none() {
                    b_tightened = true;
                    break 'outer;
                }
            }
        }
    }
    let is_closed = !a_tightened || !b_tightened;
    (out, is_closed)
}

/// Graph-level join: keep an edge only when both sides have it, with the
/// element-wise max (weaker) weight.
pub fn join<A: Graph, B: Graph>(a: &A, b: &B) -> WeightedGraph {
    let sz = a.size().max(b.size());
    let mut out = WeightedGraph::with_vertices(sz);
    for u in a.verts() {
        for e in a.e_succs(u) {
            if let Some(wb) = b.lookup(u, e.vert) {
                out.set_edge(u, e.val.max(wb), e.vert);
            }
        }
    }
    out
}

/// Graph-level widening: keep a left edge only when the right side bounds it;
/// every source that loses an edge is recorded as destabilised.
pub fn widen<A: Graph, B: Graph>(a: &A, b: &B, unstable: &mut Vec<VertId>) -> WeightedGraph {
    widen_with_thresholds(a, b, unstable, &[])
}

/// Widening that clamps an escaping *bound* edge (an edge within one vertex
/// pair, whose weight is twice the bound value) to the nearest enclosing
/// threshold instead of dropping it. Relational edges still drop. Clamped
/// sources are destabilised too: their weight changed, so closure around them
/// must be restored.
pub fn widen_with_thresholds<A: Graph, B: Graph>(
    a: &A,
    b: &B,
    unstable: &mut Vec<VertId>,
    thresholds: &[i64],
) -> WeightedGraph {
    let sz = a.size().max(b.size());
    let mut out = WeightedGraph::with_vertices(sz);
    for s in a.verts() {
        let mut lost = false;
        for e in a.e_succs(s) {
            let d = e.vert;
            match b.lookup(s, d) {
                Some(wb) if wb <= e.val => {
                    out.set_edge(s, e.val, d);
                }
                Some(wb) if s / 2 == d / 2 && !thresholds.is_empty() => {
                    // Bound edge: weight 2u for an upper bound (odd source),
                    // -2l for a lower bound (even source).
                    let clamped = if s % 2 == 1 {
                        thresholds
                            .iter()
                            .map(|t| 2 * *t)
                            .filter(|w| *w >= wb)
                            .min()
                    } else {
                        thresholds
                            .iter()
                            .map(|t| -2 * *t)
                            .filter(|w| *w >= wb)
                            .min()
                    };
                    match clamped {
                        Some(w) => out.set_edge(s, w, d),
                        None => {}
                    }
                    lost = true;
                }
                _ => {
                    lost = true;
                }
            }
        }
        if lost {
            unstable.push(s);
        }
    }
    out
}
