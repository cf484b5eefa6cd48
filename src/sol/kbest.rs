//! K-best adapter over a basic solver.

use super::IlpSolver;
use crate::ilp::{Constraint, ConstraintOp, Problem, Solution, SolutionKind};
use crate::pg::{NodeType, ProofGraph};
use crate::timing::PhaseTimer;
use tracing::debug;

/// Wraps a solver to produce up to `max_count` solutions. After each
/// optimization a margin constraint forces the next solution to differ by at
/// least `margin` active hypothesis nodes from the previous one; the loop
/// stops on the count, on an objective gap past `threshold`, or on
/// infeasibility.
pub struct KBestSolver<S> {
    inner: S,
    pub max_count: usize,
    pub threshold: f64,
    pub margin: usize,
}

impl<S: IlpSolver> KBestSolver<S> {
    pub fn new(inner: S, max_count: usize, threshold: f64, margin: usize) -> KBestSolver<S> {
        KBestSolver {
            inner,
            max_count: max_count.max(1),
            threshold,
            margin: margin.max(1),
        }
    }

    /// K-best needs the graph to know which variables are hypothesis nodes,
    /// so it takes it alongside the problem.
    pub fn solve_k_best(
        &self,
        graph: &ProofGraph,
        problem: &Problem,
        timer: &PhaseTimer,
    ) -> Vec<Solution> {
        // The problem grows a margin constraint per accepted solution, so
        // work on a private copy.
        let mut working = clone_problem(problem);
        let mut out: Vec<Solution> = Vec::new();

        while out.len() < self.max_count {
            if let Some(previous) = out.last() {
                let constraint = margin_constraint(graph, problem, previous, self.margin, out.len());
                working.add_constraint(constraint);
            }

            let mut solutions = self.inner.solve(&working, timer);
            let Some(solution) = solutions.drain(..).next() else {
                break;
            };

            if !out.is_empty() {
                if solution.kind() == SolutionKind::NotAvailable {
                    break;
                }
                if self.threshold >= 0.0 {
                    let gap = (solution.objective() - out[0].objective()).abs();
                    if gap > self.threshold {
                        debug!(gap, threshold = self.threshold, "k-best gap exceeded");
                        break;
                    }
                }
            }

            let stop = solution.kind() == SolutionKind::NotAvailable || solution.timed_out();
            out.push(solution);
            if stop {
                break;
            }
        }
        out
    }
}

impl<S: IlpSolver> IlpSolver for KBestSolver<S> {
    fn name(&self) -> &'static str {
        "k-best"
    }

    fn solve(&self, problem: &Problem, timer: &PhaseTimer) -> Vec<Solution> {
        // Without graph context only the first solution is produced.
        self.inner.solve(problem, timer)
    }

    fn keep_validity_on_timeout(&self) -> bool {
        self.inner.keep_validity_on_timeout()
    }
}

/// Force the next solution to flip at least `margin` of the previous
/// solution's hypothesis-node assignments.
fn margin_constraint(
    graph: &ProofGraph,
    problem: &Problem,
    previous: &Solution,
    margin: usize,
    index: usize,
) -> Constraint {
    let mut constraint = Constraint::new(
        format!("margin:sol({index})"),
        ConstraintOp::GreaterEq(0.0),
    );
    let mut active_count = 0i64;
    for (n, node) in graph.nodes().iter().enumerate() {
        if node.node_type() != NodeType::Hypothesis
            || node.is_equality_node()
            || node.is_neg_equality_node()
        {
            continue;
        }
        let Some(v) = problem.variable_of_node(n) else { continue };
        if previous.node_active(problem, n) {
            constraint.add_term(v, -1.0);
            active_count += 1;
        } else {
            constraint.add_term(v, 1.0);
        }
    }
    constraint.set_op(ConstraintOp::GreaterEq(margin as f64 - active_count as f64));
    constraint
}

fn clone_problem(problem: &Problem) -> Problem {
    let mut out = Problem::new(&problem.name, problem.do_maximize);
    out.timed_out = problem.timed_out;
    for var in problem.variables() {
        out.add_variable(var.clone());
    }
    for constraint in problem.constraints() {
        out.add_constraint(constraint.clone());
    }
    for (&var, &value) in problem.constants() {
        out.set_constant(var, value);
    }
    for &c in problem.lazy_constraints() {
        out.mark_lazy(c);
    }
    out
}
