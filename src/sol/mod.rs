//! # Solver Interface
//!
//! The contract the core uses to request optimization, the cutting-plane
//! loop for lazy constraints, and the k-best adapter. Production back-ends
//! (LP Solve, Gurobi) implement [`IlpSolver`] out of tree; the in-tree
//! [`exhaustive::ExhaustiveSolver`] is exact on small problems and backs the
//! test suite, and [`NullSolver`] reports every problem as not-available.

pub mod exhaustive;
pub mod kbest;

use crate::ilp::{Problem, Solution, SolutionKind};
use crate::timing::PhaseTimer;
use std::collections::BTreeSet;
use tracing::debug;

/// An ILP solver back-end.
pub trait IlpSolver {
    fn name(&self) -> &'static str;

    /// Optimize `problem`, returning one or more solutions (k-best adapters
    /// return several). Solver failure or infeasibility yields a single
    /// not-available solution rather than an error. The remaining time
    /// budget is passed in; the solver is never interrupted from outside.
    fn solve(&self, problem: &Problem, timer: &PhaseTimer) -> Vec<Solution>;

    /// Whether a partial answer obtained after a timeout is still usable
    /// downstream.
    fn keep_validity_on_timeout(&self) -> bool {
        false
    }
}

/// Always answers not-available. Useful to exercise the pipeline without an
/// optimizer.
pub struct NullSolver;

impl IlpSolver for NullSolver {
    fn name(&self) -> &'static str {
        "null"
    }

    fn solve(&self, problem: &Problem, _timer: &PhaseTimer) -> Vec<Solution> {
        vec![Solution::not_available(problem)]
    }
}

/// One round of optimization over an explicit active-constraint set. The
/// cutting-plane loop drives implementations of this.
pub trait RoundSolver {
    /// Optimize with exactly `active` constraints enforced. `None` means
    /// infeasible.
    fn solve_round(
        &self,
        problem: &Problem,
        active: &BTreeSet<usize>,
        timer: &PhaseTimer,
    ) -> Option<Solution>;
}

/// Cutting-plane inference: solve with non-lazy constraints, add the lazy
/// constraints the solution violates, repeat until clean, infeasible, or out
/// of time. Returns the final solution and the number of rounds taken.
pub fn solve_with_cutting_plane<S: RoundSolver>(
    solver: &S,
    problem: &Problem,
    timer: &PhaseTimer,
) -> (Solution, usize) {
    let lazy = problem.lazy_constraints().clone();
    let mut active: BTreeSet<usize> = (0..problem.constraints().len())
        .filter(|c| !lazy.contains(c))
        .collect();
    let mut pending = lazy;
    let mut rounds = 0;

    loop {
        rounds += 1;
        let Some(mut solution) = solver.solve_round(problem, &active, timer) else {
            return (Solution::not_available(problem), rounds);
        };

        let violated = problem.filter_unsatisfied_constraints(&pending, solution.values());
        if violated.is_empty() {
            return (solution, rounds);
        }
        debug!(round = rounds, violated = violated.len(), "adding lazy cuts");
        for c in violated {
            pending.remove(&c);
            active.insert(c);
        }

        if timer.expired() {
            solution.mark_timed_out();
            solution.set_kind(SolutionKind::SubOptimal);
            return (solution, rounds);
        }
    }
}
