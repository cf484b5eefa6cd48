//! Exact enumeration solver for small problems.
//!
//! Walks the full 0/1 assignment space with constant-variable pruning.
//! Intended for tests, smoke runs, and tiny inference problems; anything
//! past [`MAX_FREE_VARIABLES`] free variables is answered not-available.

use super::{solve_with_cutting_plane, IlpSolver, RoundSolver};
use crate::ilp::{Problem, Solution, SolutionKind};
use crate::timing::PhaseTimer;
use std::collections::BTreeSet;
use tracing::warn;

/// Upper bound on free (non-pinned) variables.
pub const MAX_FREE_VARIABLES: usize = 24;

/// Exhaustive 0/1 search. Exact within its size bound.
pub struct ExhaustiveSolver;

impl RoundSolver for ExhaustiveSolver {
    fn solve_round(
        &self,
        problem: &Problem,
        active: &BTreeSet<usize>,
        timer: &PhaseTimer,
    ) -> Option<Solution> {
        let n = problem.variables().len();
        let free: Vec<usize> = (0..n)
            .filter(|v| problem.constant_value(*v).is_none())
            .collect();
        if free.len() > MAX_FREE_VARIABLES {
            warn!(
                free = free.len(),
                limit = MAX_FREE_VARIABLES,
                "problem too large for the exhaustive solver"
            );
            return None;
        }

        let mut values = vec![0.0f64; n];
        for v in 0..n {
            if let Some(pinned) = problem.constant_value(v) {
                values[v] = pinned;
            }
        }

        let mut best: Option<(f64, Vec<f64>)> = None;
        let combinations: u64 = 1 << free.len();
        for mask in 0..combinations {
            if mask % 4096 == 0 && timer.expired() {
                break;
            }
            for (bit, &v) in free.iter().enumerate() {
                values[v] = if (mask >> bit) & 1 == 1 { 1.0 } else { 0.0 };
            }
            let feasible = active
                .iter()
                .all(|&c| problem.constraint(c).is_satisfied(&values));
            if !feasible {
                continue;
            }
            let objective = problem.objective_value(&values);
            let better = match &best {
                None => true,
                Some((incumbent, _)) => {
                    if problem.do_maximize {
                        objective > *incumbent
                    } else {
                        objective < *incumbent
                    }
                }
            };
            if better {
                best = Some((objective, values.clone()));
            }
        }

        best.map(|(_, values)| Solution::new(problem, SolutionKind::Optimal, values))
    }
}

impl IlpSolver for ExhaustiveSolver {
    fn name(&self) -> &'static str {
        "exhaustive"
    }

    fn solve(&self, problem: &Problem, timer: &PhaseTimer) -> Vec<Solution> {
        let (mut solution, _rounds) = solve_with_cutting_plane(self, problem, timer);
        if problem.timed_out && solution.kind() == SolutionKind::Optimal {
            solution.set_kind(SolutionKind::SubOptimal);
        }
        vec![solution]
    }

    fn keep_validity_on_timeout(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ilp::{Constraint, ConstraintOp, Variable};

    #[test]
    fn test_maximize_with_exclusion() {
        let mut problem = Problem::new("t", true);
        let a = problem.add_variable(Variable::new("a".to_string(), 2.0));
        let b = problem.add_variable(Variable::new("b".to_string(), 1.0));
        let mut c = Constraint::new("xor".to_string(), ConstraintOp::LessEq(1.0));
        c.add_term(a, 1.0);
        c.add_term(b, 1.0);
        problem.add_constraint(c);

        let solutions = ExhaustiveSolver.solve(&problem, &PhaseTimer::unlimited());
        assert_eq!(solutions.len(), 1);
        let solution = &solutions[0];
        assert_eq!(solution.kind(), SolutionKind::Optimal);
        assert!(solution.variable_active(a));
        assert!(!solution.variable_active(b));
        assert_eq!(solution.objective(), 2.0);
    }

    #[test]
    fn test_constants_respected() {
        let mut problem = Problem::new("t", true);
        let a = problem.add_variable(Variable::new("a".to_string(), -5.0));
        problem.set_constant(a, 1.0);
        let solutions = ExhaustiveSolver.solve(&problem, &PhaseTimer::unlimited());
        assert!(solutions[0].variable_active(a));
    }

    #[test]
    fn test_infeasible_is_not_available() {
        let mut problem = Problem::new("t", true);
        let a = problem.add_variable(Variable::new("a".to_string(), 1.0));
        problem.set_constant(a, 1.0);
        let mut c = Constraint::new("forbid".to_string(), ConstraintOp::LessEq(0.0));
        c.add_term(a, 1.0);
        problem.add_constraint(c);

        let solutions = ExhaustiveSolver.solve(&problem, &PhaseTimer::unlimited());
        assert_eq!(solutions[0].kind(), SolutionKind::NotAvailable);
    }

    #[test]
    fn test_cutting_plane_rounds() {
        // Without the lazy transitivity cut the optimum activates an
        // inconsistent pair; the second round repairs it.
        let mut problem = Problem::new("t", true);
        let ab = problem.add_variable(Variable::new("ab".to_string(), 1.0));
        let bc = problem.add_variable(Variable::new("bc".to_string(), 1.0));
        let ac = problem.add_variable(Variable::new("ac".to_string(), -1.0));
        let mut c = Constraint::new("trans".to_string(), ConstraintOp::GreaterEq(-1.0));
        c.add_term(ac, 1.0);
        c.add_term(ab, -1.0);
        c.add_term(bc, -1.0);
        let id = problem.add_constraint(c);
        problem.mark_lazy(id);

        let (solution, rounds) =
            solve_with_cutting_plane(&ExhaustiveSolver, &problem, &PhaseTimer::unlimited());
        assert!(rounds >= 2);
        assert!(solution.constraint_satisfied(id));
    }
}
