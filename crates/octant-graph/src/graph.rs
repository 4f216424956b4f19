//! The mutable weighted graph and the read-only trait the algorithms use.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Dense vertex identifier. Retired ids are reused by later allocations.
pub type VertId = usize;

/// Edge weight. An absent edge means `+∞`.
pub type Weight = i64;

/// A successor or predecessor together with the edge weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub vert: VertId,
    pub val: Weight,
}

/// Read-only access to a weighted graph. Implemented by [`WeightedGraph`]
/// and by the views, so the closure algorithms run over either.
pub trait Graph {
    /// Size of the vertex-id space (retired ids included).
    fn size(&self) -> usize;

    /// Live vertices.
    fn verts(&self) -> Vec<VertId>;

    fn lookup(&self, i: VertId, j: VertId) -> Option<Weight>;

    fn elem(&self, i: VertId, j: VertId) -> bool {
        self.lookup(i, j).is_some()
    }

    /// Weight of a present edge. Absence is a caller bug.
    fn edge_val(&self, i: VertId, j: VertId) -> Weight {
        self.lookup(i, j).expect("edge_val on an absent edge")
    }

    fn succs(&self, i: VertId) -> Vec<VertId> {
        self.e_succs(i).into_iter().map(|e| e.vert).collect()
    }

    fn preds(&self, i: VertId) -> Vec<VertId> {
        self.e_preds(i).into_iter().map(|e| e.vert).collect()
    }

    fn e_succs(&self, i: VertId) -> Vec<Edge>;

    fn e_preds(&self, i: VertId) -> Vec<Edge>;

    fn num_edges(&self) -> usize {
        self.verts().iter().map(|v| self.e_succs(*v).len()).sum()
    }
}

/// Adjacency-map graph with vertex retirement and reuse.
///
/// `new_vertex` hands back the smallest retired id, so a caller that always
/// allocates and retires vertices two at a time keeps pairs contiguous
/// (`neg == pos + 1`, `pos` even) by construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeightedGraph {
    fwd: Vec<BTreeMap<VertId, Weight>>,
    rev: Vec<BTreeSet<VertId>>,
    live: Vec<bool>,
    free: BTreeSet<VertId>,
}

impl WeightedGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vertices(n: usize) -> Self {
        let mut g = Self::new();
        g.grow_to(n);
        g
    }

    /// Make every id below `n` a live vertex.
    pub fn grow_to(&mut self, n: usize) {
        while self.fwd.len() < n {
            self.fwd.push(BTreeMap::new());
            self.rev.push(BTreeSet::new());
            self.live.push(true);
        }
        for v in 0..n {
            if !self.live[v] {
                self.live[v] = true;
                self.free.remove(&v);
            }
        }
    }

    /// Allocate a vertex, reusing the smallest retired id if any.
    pub fn new_vertex(&mut self) -> VertId {
        if let Some(v) = self.free.iter().next().copied() {
            self.free.remove(&v);
            self.live[v] = true;
            return v;
        }
        let v = self.fwd.len();
        self.fwd.push(BTreeMap::new());
        self.rev.push(BTreeSet::new());
        self.live.push(true);
        v
    }

    /// Remove every edge incident to `v` and retire the id for reuse.
    /// Other vertices keep their ids.
    pub fn forget(&mut self, v: VertId) {
        if v >= self.live.len() || !self.live[v] {
            return;
        }
        let out: Vec<VertId> = self.fwd[v].keys().copied().collect();
        for d in out {
            self.rev[d].remove(&v);
        }
        self.fwd[v].clear();
        let inc: Vec<VertId> = self.rev[v].iter().copied().collect();
        for s in inc {
            self.fwd[s].remove(&v);
        }
        self.rev[v].clear();
        self.live[v] = false;
        self.free.insert(v);
    }

    pub fn is_live(&self, v: VertId) -> bool {
        v < self.live.len() && self.live[v]
    }

    /// Insert an edge that is known to be absent.
    pub fn add_edge(&mut self, i: VertId, w: Weight, j: VertId) {
        debug_assert!(self.is_live(i) && self.is_live(j));
        debug_assert!(!self.fwd[i].contains_key(&j), "add_edge over existing edge");
        self.fwd[i].insert(j, w);
        self.rev[j].insert(i);
    }

    /// Insert or overwrite.
    pub fn set_edge(&mut self, i: VertId, w: Weight, j: VertId) {
        debug_assert!(self.is_live(i) && self.is_live(j));
        self.fwd[i].insert(j, w);
        self.rev[j].insert(i);
    }

    /// Insert, or keep the smaller of the existing and the new weight.
    pub fn update_edge_min(&mut self, i: VertId, w: Weight, j: VertId) {
        debug_assert!(self.is_live(i) && self.is_live(j));
        match self.fwd[i].get_mut(&j) {
            Some(old) => {
                if w < *old {
                    *old = w;
                }
            }
            None => {
                self.fwd[i].insert(j, w);
                self.rev[j].insert(i);
            }
        }
    }

    pub fn remove_edge(&mut self, i: VertId, j: VertId) {
        if i < self.fwd.len() && self.fwd[i].remove(&j).is_some() {
            self.rev[j].remove(&i);
        }
    }

    pub fn clear(&mut self) {
        self.fwd.clear();
        self.rev.clear();
        self.live.clear();
        self.free.clear();
    }

    /// True when the graph carries no edge at all.
    pub fn is_edge_free(&self) -> bool {
        self.fwd.iter().all(|m| m.is_empty())
    }
}

impl Graph for WeightedGraph {
    fn size(&self) -> usize {
        self.fwd.len()
    }

    fn verts(&self) -> Vec<VertId> {
        (0..self.live.len()).filter(|v| self.live[*v]).collect()
    }

    fn lookup(&self, i: VertId, j: VertId) -> Option<Weight> {
        self.fwd.get(i)?.get(&j).copied()
    }

    fn e_succs(&self, i: VertId) -> Vec<Edge> {
        match self.fwd.get(i) {
            Some(m) => m.iter().map(|(j, w)| Edge { vert: *j, val: *w }).collect(),
            None => Vec::new(),
        }
    }

    fn e_preds(&self, i: VertId) -> Vec<Edge> {
        match self.rev.get(i) {
            Some(s) => s
                .iter()
                .map(|j| Edge {
                    vert: *j,
                    val: self.fwd[*j][&i],
                })
                .collect(),
            None => Vec::new(),
        }
    }
}

impl fmt::Display for WeightedGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        let mut first = true;
        for v in self.verts() {
            for e in self.e_succs(v) {
                if !first {
                    write!(f, ", ")?;
                }
                write!(f, "{v}-({})->{}", e.val, e.vert)?;
                first = false;
            }
        }
        write!(f, "]")
    }
}
