//! Shared test helpers: a tiny block-structured program representation and
//! an interpreter turning blocks into transfer functions over any domain.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};

use octant::{
    forward_analysis, AbstractDomain, ArithOp, ControlFlowGraph, FixpointConfig, LinearConstraint,
    LinearExpr, Operand, TransferFunction, Variable,
};

#[derive(Debug, Clone)]
pub enum Stmt {
    Assign(Variable, LinearExpr),
    Assume(LinearConstraint),
    Apply(ArithOp, Variable, Variable, Operand),
}

pub fn assign(x: &Variable, e: LinearExpr) -> Stmt {
    Stmt::Assign(x.clone(), e)
}

pub fn assume(c: LinearConstraint) -> Stmt {
    Stmt::Assume(c)
}

pub fn add(x: &Variable, y: &Variable, z: impl Into<Operand>) -> Stmt {
    Stmt::Apply(ArithOp::Add, x.clone(), y.clone(), z.into())
}

pub fn sub(x: &Variable, y: &Variable, z: impl Into<Operand>) -> Stmt {
    Stmt::Apply(ArithOp::Sub, x.clone(), y.clone(), z.into())
}

/// A control-flow graph of named basic blocks.
pub struct Program {
    names: Vec<String>,
    index: BTreeMap<String, usize>,
    stmts: Vec<Vec<Stmt>>,
    succs: Vec<Vec<usize>>,
    preds: Vec<Vec<usize>>,
    entry: usize,
    loop_heads: BTreeSet<usize>,
}

impl Program {
    pub fn new() -> Self {
        Program {
            names: Vec::new(),
            index: BTreeMap::new(),
            stmts: Vec::new(),
            succs: Vec::new(),
            preds: Vec::new(),
            entry: 0,
            loop_heads: BTreeSet::new(),
        }
    }

    fn node(&mut self, name: &str) -> usize {
        if let Some(i) = self.index.get(name) {
            return *i;
        }
        let i = self.names.len();
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), i);
        self.stmts.push(Vec::new());
        self.succs.push(Vec::new());
        self.preds.push(Vec::new());
        i
    }

    pub fn block(&mut self, name: &str, stmts: Vec<Stmt>) -> &mut Self {
        let i = self.node(name);
        self.stmts[i] = stmts;
        self
    }

    pub fn edge(&mut self, from: &str, to: &str) -> &mut Self {
        let f = self.node(from);
        let t = self.node(to);
        self.succs[f].push(t);
        self.preds[t].push(f);
        self
    }

    /// Finish construction: pick the entry block and detect loop headers as
    /// the targets of DFS back edges.
    pub fn finish(&mut self, entry: &str) {
        self.entry = self.node(entry);
        let n = self.names.len();
        // 0 = unvisited, 1 = on the DFS stack, 2 = finished.
        let mut color = vec![0u8; n];
        let mut stack: Vec<(usize, usize)> = vec![(self.entry, 0)];
        color[self.entry] = 1;
        while let Some((node, idx)) = stack.pop() {
            if idx < self.succs[node].len() {
                stack.push((node, idx + 1));
                let s = self.succs[node][idx];
                match color[s] {
                    0 => {
                        color[s] = 1;
                        stack.push((s, 0));
                    }
                    1 => {
                        self.loop_heads.insert(s);
                    }
                    _ => {}
                }
            } else {
                color[node] = 2;
            }
        }
    }
}

impl ControlFlowGraph for Program {
    type Node = usize;

    fn entry(&self) -> usize {
        self.entry
    }

    fn successors(&self, node: &usize) -> Vec<usize> {
        self.succs[*node].clone()
    }

    fn predecessors(&self, node: &usize) -> Vec<usize> {
        self.preds[*node].clone()
    }

    fn nodes(&self) -> Vec<usize> {
        (0..self.names.len()).collect()
    }

    fn is_loop_header(&self, node: &usize) -> bool {
        self.loop_heads.contains(node)
    }
}

/// Interprets a block's statements over any abstract domain.
pub struct Interp<'p> {
    prog: &'p Program,
}

impl<D: AbstractDomain> TransferFunction<D> for Interp<'_> {
    type Node = usize;

    fn transfer(&self, node: &usize, input: &D) -> D {
        let mut out = input.clone();
        for stmt in &self.prog.stmts[*node] {
            match stmt {
                Stmt::Assign(x, e) => out.assign(x, e),
                Stmt::Assume(c) => out.assume(c),
                Stmt::Apply(op, x, y, z) => out.apply(*op, x, y, z),
            }
        }
        out
    }
}

/// Run the analysis and hand back the post-state of every block by name.
pub fn analyze<D: AbstractDomain>(prog: &Program, config: &FixpointConfig) -> HashMap<String, D> {
    let interp = Interp { prog };
    let result = forward_analysis(prog, &interp, D::top(), config);
    assert!(result.converged, "analysis did not converge");
    result
        .states
        .into_iter()
        .map(|(n, d)| (prog.names[n].clone(), d))
        .collect()
}

// Constraint shorthands in the shape the programs use them.

pub fn c(k: i64) -> LinearExpr {
    LinearExpr::constant(k)
}

pub fn v(x: &Variable) -> LinearExpr {
    LinearExpr::var(x)
}

pub fn leq_c(x: &Variable, k: i64) -> LinearConstraint {
    LinearConstraint::leq(v(x), c(k))
}

pub fn geq_c(x: &Variable, k: i64) -> LinearConstraint {
    LinearConstraint::geq(v(x), c(k))
}

pub fn eq_c(x: &Variable, k: i64) -> LinearConstraint {
    LinearConstraint::eq(v(x), c(k))
}

pub fn neq_c(x: &Variable, k: i64) -> LinearConstraint {
    LinearConstraint::neq(v(x), c(k))
}

pub fn eq_vars(x: &Variable, y: &Variable) -> LinearConstraint {
    LinearConstraint::eq(v(x), v(y))
}
