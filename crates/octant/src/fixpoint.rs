//! Fixed-point iteration over a control-flow graph.
//!
//! Forward chaotic iteration with a worklist: the ascending phase joins
//! predecessor states and widens at loop headers once the per-node visit
//! count passes the configured delay (a few plain joins first let the domain
//! discover relations before widening erases the growing bounds). A bounded
//! descending phase then narrows every state against a recomputed transfer.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use serde::{Deserialize, Serialize};
use tracing::debug;

use octant_core::AbstractDomain;

/// Configuration for fixed-point computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixpointConfig {
    /// Hard cap on worklist iterations.
    pub max_iterations: usize,
    /// Number of plain joins at a loop header before widening is applied.
    pub widen_delay: usize,
    /// Run the descending (narrowing) phase after convergence.
    pub use_narrowing: bool,
    /// Widening thresholds; empty means plain widening.
    pub thresholds: Vec<i64>,
}

impl Default for FixpointConfig {
    fn default() -> Self {
        FixpointConfig {
            max_iterations: 1000,
            widen_delay: 2,
            use_narrowing: true,
            thresholds: Vec::new(),
        }
    }
}

impl FixpointConfig {
    pub fn with_thresholds(mut self, thresholds: &[i64]) -> Self {
        self.thresholds = thresholds.to_vec();
        self
    }
}

/// Result of fixed-point computation.
#[derive(Debug, Clone)]
pub struct FixpointResult<K, D> {
    /// The abstract state *after* each node's statements.
    pub states: HashMap<K, D>,
    /// Worklist iterations performed.
    pub iterations: usize,
    /// Whether the ascending phase reached a fixed point within the cap.
    pub converged: bool,
}

/// A control-flow graph the analysis can walk.
pub trait ControlFlowGraph {
    type Node: Clone + Eq + Hash;

    fn entry(&self) -> Self::Node;
    fn successors(&self, node: &Self::Node) -> Vec<Self::Node>;
    fn predecessors(&self, node: &Self::Node) -> Vec<Self::Node>;
    fn nodes(&self) -> Vec<Self::Node>;
    /// Widening points.
    fn is_loop_header(&self, node: &Self::Node) -> bool;
}

/// Abstract transformer for one node.
pub trait TransferFunction<D: AbstractDomain> {
    type Node;

    fn transfer(&self, node: &Self::Node, input: &D) -> D;
}

/// Forward analysis: ascending phase with widening, then bounded narrowing.
pub fn forward_analysis<G, D, T>(
    cfg: &G,
    transfer: &T,
    entry_state: D,
    config: &FixpointConfig,
) -> FixpointResult<G::Node, D>
where
    G: ControlFlowGraph,
    D: AbstractDomain,
    T: TransferFunction<D, Node = G::Node>,
{
    let nodes = cfg.nodes();
    let mut states: HashMap<G::Node, D> = HashMap::with_capacity(nodes.len());
    let mut visits: HashMap<G::Node, usize> = HashMap::with_capacity(nodes.len());
    for node in &nodes {
        states.insert(node.clone(), D::bottom());
    }

    let entry = cfg.entry();
    let entry_out = transfer.transfer(&entry, &entry_state);
    states.insert(entry.clone(), entry_out);

    let mut worklist: VecDeque<G::Node> = cfg.successors(&entry).into();
    let mut iteration = 0;

    while let Some(node) = worklist.pop_front() {
        if iteration >= config.max_iterations {
            break;
        }
        iteration += 1;

        let mut input = D::bottom();
        for p in cfg.predecessors(&node) {
            if let Some(state) = states.get(&p) {
                input = input.join(state);
            }
        }

        let new_state = transfer.transfer(&node, &input);
        let old_state = states.get(&node).cloned().unwrap_or_else(D::bottom);

        let count = visits.entry(node.clone()).or_insert(0);
        *count += 1;
        let widen_now = cfg.is_loop_header(&node) && *count > config.widen_delay;

        let joined = old_state.join(&new_state);
        let final_state = if widen_now {
            if config.thresholds.is_empty() {
                old_state.widen(&joined)
            } else {
                old_state.widen_with_thresholds(&joined, &config.thresholds)
            }
        } else {
            joined
        };

        if !final_state.leq(&old_state) {
            states.insert(node.clone(), final_state);
            for succ in cfg.successors(&node) {
                if !worklist.contains(&succ) {
                    worklist.push_back(succ);
                }
            }
        }
    }

    let converged = worklist.is_empty();
    debug!(target: "octant", iteration, converged, "ascending phase done");

    if converged && config.use_narrowing {
        let mut narrow_iter = 0;
        let mut changed = true;
        while changed && narrow_iter < config.max_iterations {
            changed = false;
            narrow_iter += 1;
            for node in cfg.nodes() {
                if node == entry {
                    continue;
                }
                let mut input = D::bottom();
                for p in cfg.predecessors(&node) {
                    if let Some(state) = states.get(&p) {
                        input = input.join(state);
                    }
                }
                let transferred = transfer.transfer(&node, &input);
                let old_state = states.get(&node).cloned().unwrap_or_else(D::bottom);
                let narrowed = old_state.narrow(&transferred);
                if !old_state.leq(&narrowed) {
                    states.insert(node.clone(), narrowed);
                    changed = true;
                }
            }
        }
    }

    FixpointResult {
        states,
        iterations: iteration,
        converged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use octant_core::{Bound, Interval, IntervalDomain, LinearExpr, VarFactory, Variable};

    // 0 -> 1 -> 2, with 2 -> 1 closing a loop and 1 -> 3 exiting.
    struct LoopCfg;

    impl ControlFlowGraph for LoopCfg {
        type Node = usize;

        fn entry(&self) -> usize {
            0
        }

        fn successors(&self, node: &usize) -> Vec<usize> {
            match node {
                0 => vec![1],
                1 => vec![2, 3],
                2 => vec![1],
                _ => vec![],
            }
        }

        fn predecessors(&self, node: &usize) -> Vec<usize> {
            match node {
                1 => vec![0, 2],
                2 => vec![1],
                3 => vec![1],
                _ => vec![],
            }
        }

        fn nodes(&self) -> Vec<usize> {
            vec![0, 1, 2, 3]
        }

        fn is_loop_header(&self, node: &usize) -> bool {
            *node == 1
        }
    }

    struct Incr {
        x: Variable,
        /// Loop guard: increment only while `x <= guard`.
        guard: Option<i64>,
    }

    impl TransferFunction<IntervalDomain> for Incr {
        type Node = usize;

        fn transfer(&self, node: &usize, input: &IntervalDomain) -> IntervalDomain {
            let mut out = input.clone();
            match node {
                0 => out.assign(&self.x, &LinearExpr::constant(0)),
                2 => {
                    if let Some(g) = self.guard {
                        out.assume(&octant_core::LinearConstraint::leq(
                            LinearExpr::var(&self.x),
                            LinearExpr::constant(g),
                        ));
                    }
                    out.assign(&self.x, &LinearExpr::var(&self.x).plus(1));
                }
                _ => {}
            }
            out
        }
    }

    #[test]
    fn widening_terminates_on_an_unbounded_counter() {
        let vfac = VarFactory::new();
        let x = vfac.int("x", 32);
        let cfg = LoopCfg;
        let transfer = Incr {
            x: x.clone(),
            guard: None,
        };
        let result = forward_analysis(
            &cfg,
            &transfer,
            IntervalDomain::top(),
            &FixpointConfig::default(),
        );
        assert!(result.converged);
        let head = &result.states[&1];
        assert_eq!(head.value_of(&x).lb(), Bound::Finite(0));
        assert!(head.value_of(&x).ub().is_infinite());
    }

    #[test]
    fn thresholds_bound_the_widened_state() {
        let vfac = VarFactory::new();
        let x = vfac.int("x", 32);
        let cfg = LoopCfg;
        let transfer = Incr {
            x: x.clone(),
            guard: Some(63),
        };
        let config = FixpointConfig::default().with_thresholds(&[0, 64]);
        let result = forward_analysis(&cfg, &transfer, IntervalDomain::top(), &config);
        assert!(result.converged);
        let head = &result.states[&1];
        assert_eq!(
            head.value_of(&x),
            Interval::new(Bound::Finite(0), Bound::Finite(64))
        );
    }
}
