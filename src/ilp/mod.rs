//! # ILP Problem Model
//!
//! 0/1 integer linear programs produced from proof graphs, and the solution
//! objects solvers hand back. The encoder lives in [`convert`]; solver
//! back-ends only ever see [`Problem`] and produce [`Solution`]s.

pub mod convert;

use std::collections::{BTreeSet, HashMap};
use std::fmt;

pub type VariableId = usize;
pub type ConstraintId = usize;

const EPSILON: f64 = 1e-6;

/// One 0/1 variable of the objective function.
#[derive(Debug, Clone)]
pub struct Variable {
    name: String,
    coefficient: f64,
}

impl Variable {
    pub fn new(name: String, coefficient: f64) -> Variable {
        Variable { name, coefficient }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn coefficient(&self) -> f64 {
        self.coefficient
    }

    pub fn set_coefficient(&mut self, coefficient: f64) {
        self.coefficient = coefficient;
    }
}

/// Comparison operator and bound(s) of one constraint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstraintOp {
    Equal(f64),
    LessEq(f64),
    GreaterEq(f64),
    Range(f64, f64),
}

/// A linear constraint over problem variables.
#[derive(Debug, Clone)]
pub struct Constraint {
    name: String,
    op: ConstraintOp,
    terms: Vec<(VariableId, f64)>,
}

impl Constraint {
    pub fn new(name: String, op: ConstraintOp) -> Constraint {
        Constraint {
            name,
            op,
            terms: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn op(&self) -> ConstraintOp {
        self.op
    }

    pub fn set_op(&mut self, op: ConstraintOp) {
        self.op = op;
    }

    pub fn add_term(&mut self, var: VariableId, coefficient: f64) {
        self.terms.push((var, coefficient));
    }

    pub fn terms(&self) -> &[(VariableId, f64)] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Evaluate against a full variable assignment.
    pub fn is_satisfied(&self, values: &[f64]) -> bool {
        let sum: f64 = self
            .terms
            .iter()
            .map(|&(v, c)| c * values.get(v).copied().unwrap_or(0.0))
            .sum();
        match self.op {
            ConstraintOp::Equal(b) => (sum - b).abs() < EPSILON,
            ConstraintOp::LessEq(b) => sum <= b + EPSILON,
            ConstraintOp::GreaterEq(b) => sum >= b - EPSILON,
            ConstraintOp::Range(lo, hi) => sum >= lo - EPSILON && sum <= hi + EPSILON,
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.name)?;
        for (i, (v, c)) in self.terms.iter().enumerate() {
            if i > 0 {
                write!(f, " + ")?;
            }
            write!(f, "{c:.2}*x{v}")?;
        }
        match self.op {
            ConstraintOp::Equal(b) => write!(f, " = {b:.2}"),
            ConstraintOp::LessEq(b) => write!(f, " <= {b:.2}"),
            ConstraintOp::GreaterEq(b) => write!(f, " >= {b:.2}"),
            ConstraintOp::Range(lo, hi) => write!(f, " in [{lo:.2}, {hi:.2}]"),
        }
    }
}

/// A 0/1 ILP with its proof-graph bookkeeping: which variable encodes which
/// node, hypernode, and edge, which variables are pinned, and which
/// constraints are lazy.
#[derive(Debug, Default)]
pub struct Problem {
    pub name: String,
    pub do_maximize: bool,
    pub timed_out: bool,
    variables: Vec<Variable>,
    constraints: Vec<Constraint>,
    constants: HashMap<VariableId, f64>,
    lazy: BTreeSet<ConstraintId>,
    node_to_var: HashMap<usize, VariableId>,
    hypernode_to_var: HashMap<usize, VariableId>,
    edge_to_var: HashMap<usize, VariableId>,
    requirement_vars: Vec<(usize, VariableId)>,
}

impl Problem {
    pub fn new(name: &str, do_maximize: bool) -> Problem {
        Problem {
            name: name.to_string(),
            do_maximize,
            ..Problem::default()
        }
    }

    pub fn add_variable(&mut self, var: Variable) -> VariableId {
        self.variables.push(var);
        self.variables.len() - 1
    }

    pub fn add_constraint(&mut self, constraint: Constraint) -> ConstraintId {
        self.constraints.push(constraint);
        self.constraints.len() - 1
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn variable_mut(&mut self, id: VariableId) -> &mut Variable {
        &mut self.variables[id]
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn constraint(&self, id: ConstraintId) -> &Constraint {
        &self.constraints[id]
    }

    /// Pin a variable to a fixed value.
    pub fn set_constant(&mut self, var: VariableId, value: f64) {
        self.constants.insert(var, value);
    }

    pub fn constant_value(&self, var: VariableId) -> Option<f64> {
        self.constants.get(&var).copied()
    }

    pub fn constants(&self) -> &HashMap<VariableId, f64> {
        &self.constants
    }

    /// Mark a constraint lazy: the solver starts without it and adds it only
    /// when a round's solution violates it.
    pub fn mark_lazy(&mut self, constraint: ConstraintId) {
        self.lazy.insert(constraint);
    }

    pub fn lazy_constraints(&self) -> &BTreeSet<ConstraintId> {
        &self.lazy
    }

    pub(crate) fn bind_node(&mut self, node: usize, var: VariableId) {
        self.node_to_var.insert(node, var);
    }

    pub(crate) fn bind_hypernode(&mut self, hypernode: usize, var: VariableId) {
        self.hypernode_to_var.insert(hypernode, var);
    }

    pub(crate) fn bind_edge(&mut self, edge: usize, var: VariableId) {
        self.edge_to_var.insert(edge, var);
    }

    pub(crate) fn bind_requirement(&mut self, node: usize, violation_var: VariableId) {
        self.requirement_vars.push((node, violation_var));
    }

    pub fn variable_of_node(&self, node: usize) -> Option<VariableId> {
        self.node_to_var.get(&node).copied()
    }

    pub fn variable_of_hypernode(&self, hypernode: usize) -> Option<VariableId> {
        self.hypernode_to_var.get(&hypernode).copied()
    }

    pub fn variable_of_edge(&self, edge: usize) -> Option<VariableId> {
        self.edge_to_var.get(&edge).copied()
    }

    /// Requirement nodes with their violation variables.
    pub fn requirements(&self) -> &[(usize, VariableId)] {
        &self.requirement_vars
    }

    pub fn objective_value(&self, values: &[f64]) -> f64 {
        self.variables
            .iter()
            .enumerate()
            .map(|(i, v)| v.coefficient() * values.get(i).copied().unwrap_or(0.0))
            .sum()
    }

    /// Of `candidates`, the constraints the assignment violates. Used by the
    /// cutting-plane round-trip.
    pub fn filter_unsatisfied_constraints(
        &self,
        candidates: &BTreeSet<ConstraintId>,
        values: &[f64],
    ) -> Vec<ConstraintId> {
        candidates
            .iter()
            .copied()
            .filter(|&c| !self.constraints[c].is_satisfied(values))
            .collect()
    }
}

/// How good a solver's answer is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolutionKind {
    Optimal,
    SubOptimal,
    NotAvailable,
}

/// One solver answer: per-variable values, per-constraint satisfaction, and
/// the objective.
#[derive(Debug, Clone)]
pub struct Solution {
    values: Vec<f64>,
    satisfied: Vec<bool>,
    objective: f64,
    kind: SolutionKind,
    timed_out: bool,
}

impl Solution {
    pub fn new(problem: &Problem, kind: SolutionKind, values: Vec<f64>) -> Solution {
        let satisfied = problem
            .constraints()
            .iter()
            .map(|c| c.is_satisfied(&values))
            .collect();
        let objective = problem.objective_value(&values);
        Solution {
            values,
            satisfied,
            objective,
            kind,
            timed_out: false,
        }
    }

    /// The all-zero "no answer" solution.
    pub fn not_available(problem: &Problem) -> Solution {
        Solution::new(
            problem,
            SolutionKind::NotAvailable,
            vec![0.0; problem.variables().len()],
        )
    }

    pub fn kind(&self) -> SolutionKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: SolutionKind) {
        self.kind = kind;
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn mark_timed_out(&mut self) {
        self.timed_out = true;
    }

    pub fn objective(&self) -> f64 {
        self.objective
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn variable_active(&self, var: VariableId) -> bool {
        self.values.get(var).copied().unwrap_or(0.0) > 0.5
    }

    pub fn constraint_satisfied(&self, constraint: ConstraintId) -> bool {
        self.satisfied.get(constraint).copied().unwrap_or(false)
    }

    pub fn node_active(&self, problem: &Problem, node: usize) -> bool {
        problem
            .variable_of_node(node)
            .is_some_and(|v| self.variable_active(v))
    }

    pub fn hypernode_active(&self, problem: &Problem, hypernode: usize) -> bool {
        problem
            .variable_of_hypernode(hypernode)
            .is_some_and(|v| self.variable_active(v))
    }

    pub fn edge_active(&self, problem: &Problem, edge: usize) -> bool {
        problem
            .variable_of_edge(edge)
            .is_some_and(|v| self.variable_active(v))
    }
}
