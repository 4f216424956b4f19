//! Zero-copy graph views: vertex renaming and bound-edge masking.

use crate::graph::{Edge, Graph, VertId, Weight};

/// Presents an underlying graph under a vertex renaming without copying it.
///
/// View vertex `k` stands for underlying vertex `perm[k]`; a `None` entry is
/// a view vertex with no counterpart (it has no edges).
pub struct PermView<'g, G> {
    perm: Vec<Option<VertId>>,
    inv: Vec<Option<VertId>>,
    g: &'g G,
}

impl<'g, G: Graph> PermView<'g, G> {
    pub fn new(perm: Vec<Option<VertId>>, g: &'g G) -> Self {
        let mut inv = vec![None; g.size()];
        for (k, p) in perm.iter().enumerate() {
            if let Some(p) = p {
                debug_assert!(*p < g.size());
                inv[*p] = Some(k);
            }
        }
        PermView { perm, inv, g }
    }

    /// A total renaming: every view vertex is mapped.
    pub fn total(perm: Vec<VertId>, g: &'g G) -> Self {
        Self::new(perm.into_iter().map(Some).collect(), g)
    }

    fn fwd(&self, k: VertId) -> Option<VertId> {
        self.perm.get(k).copied().flatten()
    }

    fn back(&self, p: VertId) -> Option<VertId> {
        self.inv.get(p).copied().flatten()
    }
}

impl<G: Graph> Graph for PermView<'_, G> {
    fn size(&self) -> usize {
        self.perm.len()
    }

    fn verts(&self) -> Vec<VertId> {
        (0..self.perm.len())
            .filter(|k| self.perm[*k].is_some())
            .collect()
    }

    fn lookup(&self, i: VertId, j: VertId) -> Option<Weight> {
        self.g.lookup(self.fwd(i)?, self.fwd(j)?)
    }

    fn e_succs(&self, i: VertId) -> Vec<Edge> {
        let Some(u) = self.fwd(i) else {
            return Vec::new();
        };
        self.g
            .e_succs(u)
            .into_iter()
            .filter_map(|e| {
                self.back(e.vert).map(|k| Edge {
                    vert: k,
                    val: e.val,
                })
            })
            .collect()
    }

    fn e_preds(&self, i: VertId) -> Vec<Edge> {
        let Some(u) = self.fwd(i) else {
            return Vec::new();
        };
        self.g
            .e_preds(u)
            .into_iter()
            .filter_map(|e| {
                self.back(e.vert).map(|k| Edge {
                    vert: k,
                    val: e.val,
                })
            })
            .collect()
    }
}

/// Masks the intra-pair (bound) edges of a pair-encoded graph, exposing only
/// the relational edges. Vertices `2k` and `2k+1` form a pair.
pub struct SplitView<'g, G> {
    g: &'g G,
}

impl<'g, G: Graph> SplitView<'g, G> {
    pub fn new(g: &'g G) -> Self {
        SplitView { g }
    }
}

impl<G: Graph> Graph for SplitView<'_, G> {
    fn size(&self) -> usize {
        self.g.size()
    }

    fn verts(&self) -> Vec<VertId> {
        self.g.verts()
    }

    fn lookup(&self, i: VertId, j: VertId) -> Option<Weight> {
        if i / 2 == j / 2 {
            None
        } else {
            self.g.lookup(i, j)
        }
    }

    fn e_succs(&self, i: VertId) -> Vec<Edge> {
        self.g
            .e_succs(i)
            .into_iter()
            .filter(|e| e.vert / 2 != i / 2)
            .collect()
    }

    fn e_preds(&self, i: VertId) -> Vec<Edge> {
        self.g
            .e_preds(i)
            .into_iter()
            .filter(|e| e.vert / 2 != i / 2)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::WeightedGraph;

    #[test]
    fn perm_view_renames_both_directions() {
        let mut g = WeightedGraph::with_vertices(4);
        g.add_edge(2, 7, 3);
        // View vertex 0 is underlying 2, view vertex 1 is underlying 3.
        let view = PermView::total(vec![2, 3], &g);
        assert_eq!(view.lookup(0, 1), Some(7));
        assert_eq!(view.succs(0), vec![1]);
        assert_eq!(view.preds(1), vec![0]);
        assert_eq!(view.lookup(1, 0), None);
    }

    #[test]
    fn perm_view_partial_entries_have_no_edges() {
        let mut g = WeightedGraph::with_vertices(2);
        g.add_edge(0, 1, 1);
        let view = PermView::new(vec![Some(0), None], &g);
        assert_eq!(view.e_succs(0), Vec::new());
        assert_eq!(view.e_succs(1), Vec::new());
        assert_eq!(view.verts(), vec![0]);
    }

    #[test]
    fn split_view_masks_pair_edges() {
        let mut g = WeightedGraph::with_vertices(4);
        g.add_edge(0, 10, 1); // bound edge of pair 0
        g.add_edge(0, 5, 2); // relational
        g.add_edge(3, 2, 0); // relational
        let view = SplitView::new(&g);
        assert_eq!(view.lookup(0, 1), None);
        assert_eq!(view.lookup(0, 2), Some(5));
        assert_eq!(view.succs(0), vec![2]);
        assert_eq!(view.preds(0), vec![3]);
    }
}
