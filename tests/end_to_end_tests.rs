//! End-to-End Inference Scenarios
//!
//! Full pipeline runs: compile a KB, build the proof graph, encode, solve,
//! and check the chosen hypothesis.

use abduce::engine::{ingest_forms, AbductionEngine, EngineOptions, KBestOptions};
use abduce::fol::{Atom, Term};
use abduce::ilp::convert::{IlpConverter, UniformCosts};
use abduce::ilp::SolutionKind;
use abduce::input::InputReader;
use abduce::kb::{CompileConfig, KnowledgeBase};
use abduce::lhs::Observation;
use abduce::pg::EdgeType;
use abduce::sol::exhaustive::ExhaustiveSolver;
use abduce::sol::solve_with_cutting_plane;
use abduce::timing::{PhaseTimer, Timeouts};
use std::path::Path;
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

fn compile_kb(dir: &Path, source: &str) -> KnowledgeBase {
    let mut kb = KnowledgeBase::create(dir, CompileConfig::default(), "basic").unwrap();
    let reader = InputReader::new(true);
    let forms = reader.read_str(source, kb.predicates_mut()).unwrap();
    ingest_forms(&mut kb, forms).unwrap();
    kb.finalize().unwrap()
}

fn fact(kb: &KnowledgeBase, name_with_arity: &str, terms: &[&str]) -> Atom {
    let pid = kb.predicates().id_of_str(name_with_arity).unwrap();
    Atom::new(pid, terms.iter().map(|t| Term::new(t)).collect(), false, false)
}

fn observation(name: &str, facts: Vec<Atom>) -> Observation {
    Observation {
        name: name.to_string(),
        facts,
        requirements: Vec::new(),
    }
}

// ============================================================================
// S1: smallest abduction
// ============================================================================

#[test]
fn test_smallest_abduction() {
    let temp = TempDir::new().unwrap();
    let kb = compile_kb(temp.path(), "(B (=> (p x) (q x)))");
    let obs = observation("s1", vec![fact(&kb, "q/1", &["A"])]);
    let engine = AbductionEngine::new(kb, EngineOptions::default()).unwrap();

    let result = engine.infer(&obs);
    assert_eq!(result.graph.nodes().len(), 2);
    let chain_edges: Vec<_> = result
        .graph
        .edges()
        .iter()
        .filter(|e| e.is_chain_edge())
        .collect();
    assert_eq!(chain_edges.len(), 1);
    assert_eq!(chain_edges[0].edge_type(), EdgeType::Hypothesize);

    assert_eq!(result.solutions.len(), 1);
    let solution = &result.solutions[0];
    assert_eq!(solution.kind(), SolutionKind::Optimal);
    assert!(solution.node_active(&result.problem, 0), "observation active");
    assert!(solution.node_active(&result.problem, 1), "hypothesis active");
}

// ============================================================================
// S2: forbidden unification of constants
// ============================================================================

#[test]
fn test_forbidden_unification_of_constants() {
    let temp = TempDir::new().unwrap();
    let mut kb = compile_kb(temp.path(), "(B (=> (dummy x) (unused x)))");
    let p = kb
        .predicates_mut()
        .add(abduce::fol::Predicate::new("p", 1));
    let obs = observation(
        "s2",
        vec![
            Atom::new(p, vec![Term::new("A")], false, false),
            Atom::new(p, vec![Term::new("B")], false, false),
        ],
    );
    let engine = AbductionEngine::new(kb, EngineOptions::default()).unwrap();

    let result = engine.infer(&obs);
    assert_eq!(result.graph.nodes().len(), 2);
    assert!(result.graph.edges().iter().all(|e| !e.is_unify_edge()));
    assert!(result.graph.hypernodes().is_empty());
}

// ============================================================================
// S3: cutting-plane triangle
// ============================================================================

#[test]
fn test_cutting_plane_triangle() {
    let temp = TempDir::new().unwrap();
    let mut kb = compile_kb(temp.path(), "(B (=> (dummy x) (unused x)))");
    let p = kb
        .predicates_mut()
        .add(abduce::fol::Predicate::new("p", 1));
    let mk = |t: &str| Atom::new(p, vec![Term::new(t)], false, false);
    let obs = observation("s3", vec![mk("s3x1"), mk("s3x2"), mk("s3x3")]);

    let engine = AbductionEngine::new(kb, EngineOptions::default()).unwrap();
    let timer = PhaseTimer::unlimited();
    let graph = {
        use abduce::lhs::bfs::BfsEnumerator;
        use abduce::lhs::LhsEnumerator;
        BfsEnumerator::default().enumerate(engine.kb(), &obs, &timer)
    };

    // Three equality sub-nodes over the triangle.
    let pairs = [("s3x1", "s3x2"), ("s3x2", "s3x3"), ("s3x1", "s3x3")];
    let subs: Vec<_> = pairs
        .iter()
        .map(|(a, b)| {
            graph
                .find_sub_node(Term::new(a), Term::new(b))
                .expect("equality sub-node")
        })
        .collect();

    let converter = IlpConverter::new(false, Box::new(UniformCosts));
    let mut problem = converter.convert(&graph, engine.kb(), &timer);
    assert_eq!(problem.lazy_constraints().len(), 3);

    // Bias the objective so the first round activates exactly two of the
    // three equalities, violating transitivity.
    let coefs = [1.0, 1.0, -1.0];
    for (&node, &coef) in subs.iter().zip(coefs.iter()) {
        let var = problem.variable_of_node(node).unwrap();
        problem.variable_mut(var).set_coefficient(coef);
    }

    let (solution, rounds) = solve_with_cutting_plane(&ExhaustiveSolver, &problem, &timer);
    assert!(rounds >= 2, "expected at least one lazy-cut round, got {rounds}");
    for &c in problem.lazy_constraints() {
        assert!(
            solution.constraint_satisfied(c),
            "lazy constraint {c} violated after convergence"
        );
    }
}

// ============================================================================
// S4: mutual exclusion
// ============================================================================

#[test]
fn test_mutual_exclusion_picks_one() {
    let temp = TempDir::new().unwrap();
    let kb = compile_kb(temp.path(), "(B (xor (p x) (q x)))");
    let obs = observation(
        "s4",
        vec![fact(&kb, "p/1", &["A"]), fact(&kb, "q/1", &["A"])],
    );
    let engine = AbductionEngine::new(kb, EngineOptions::default()).unwrap();

    let result = engine.infer(&obs);
    let exclusions = result.graph.mutual_exclusions();
    assert_eq!(exclusions.len(), 1);
    assert!(exclusions[0].unifier.is_empty());

    let solution = &result.solutions[0];
    assert_eq!(solution.kind(), SolutionKind::Optimal);
    let active: Vec<bool> = (0..2)
        .map(|n| solution.node_active(&result.problem, n))
        .collect();
    assert_eq!(
        active.iter().filter(|&&a| a).count(),
        1,
        "exactly one of the exclusive observations is active"
    );
}

// ============================================================================
// S5: rule group exclusivity
// ============================================================================

#[test]
fn test_rule_group_exclusivity() {
    let temp = TempDir::new().unwrap();
    let kb = compile_kb(
        temp.path(),
        r#"(B (name "g#r1") (=> (p1 x) (q x)))
           (B (name "g#r2") (=> (p2 x) (q x)))"#,
    );
    let obs = observation("s5", vec![fact(&kb, "q/1", &["A"])]);
    let engine = AbductionEngine::new(kb, EngineOptions::default()).unwrap();

    let result = engine.infer(&obs);
    let chain_edges: Vec<usize> = (0..result.graph.edges().len())
        .filter(|&e| result.graph.edge(e).is_chain_edge())
        .collect();
    assert_eq!(chain_edges.len(), 2);

    let groups: Vec<_> = result
        .problem
        .constraints()
        .iter()
        .filter(|c| c.name().starts_with("exclusive_chains"))
        .collect();
    assert_eq!(groups.len(), 1);

    let solution = &result.solutions[0];
    let active_chains = chain_edges
        .iter()
        .filter(|&&e| solution.edge_active(&result.problem, e))
        .count();
    assert!(active_chains <= 1, "group allows at most one chain");
}

// ============================================================================
// Solver Variants
// ============================================================================

#[test]
fn test_null_solver_reports_not_available() {
    let temp = TempDir::new().unwrap();
    let kb = compile_kb(temp.path(), "(B (=> (p x) (q x)))");
    let obs = observation("null", vec![fact(&kb, "q/1", &["A"])]);
    let options = EngineOptions {
        sol_key: "null".to_string(),
        ..EngineOptions::default()
    };
    let engine = AbductionEngine::new(kb, options).unwrap();

    let result = engine.infer(&obs);
    assert_eq!(result.solutions.len(), 1);
    assert_eq!(result.solutions[0].kind(), SolutionKind::NotAvailable);
}

#[test]
fn test_k_best_returns_distinct_solutions() {
    let temp = TempDir::new().unwrap();
    let kb = compile_kb(
        temp.path(),
        "(B (=> (p1 x) (q x)))
         (B (=> (p2 x) (q x)))",
    );
    let obs = observation("kbest", vec![fact(&kb, "q/1", &["A"])]);
    let options = EngineOptions {
        kbest: Some(KBestOptions {
            max_count: 2,
            threshold: 1_000.0,
            margin: 1,
        }),
        ..EngineOptions::default()
    };
    let engine = AbductionEngine::new(kb, options).unwrap();

    let result = engine.infer(&obs);
    assert_eq!(result.solutions.len(), 2);
    assert!(result.solutions[0].objective() >= result.solutions[1].objective());

    // The margin constraint forces a different hypothesis set.
    let hypotheses: Vec<usize> = (0..result.graph.nodes().len())
        .filter(|&n| {
            result.graph.node(n).node_type() == abduce::pg::NodeType::Hypothesis
                && !result.graph.node(n).is_equality_node()
        })
        .collect();
    let actives: Vec<Vec<bool>> = result
        .solutions
        .iter()
        .map(|s| {
            hypotheses
                .iter()
                .map(|&n| s.node_active(&result.problem, n))
                .collect()
        })
        .collect();
    assert_ne!(actives[0], actives[1]);
}

// ============================================================================
// Timeouts
// ============================================================================

#[test]
fn test_enumeration_timeout_keeps_validity() {
    let temp = TempDir::new().unwrap();
    let kb = compile_kb(temp.path(), "(B (=> (p x) (q x)))");
    let obs = observation("timeout", vec![fact(&kb, "q/1", &["A"])]);
    let options = EngineOptions {
        timeouts: Timeouts {
            lhs: Some(0.0),
            ..Timeouts::default()
        },
        keep_validity_on_timeout: true,
        ..EngineOptions::default()
    };
    let engine = AbductionEngine::new(kb, options).unwrap();

    let result = engine.infer(&obs);
    assert!(result.graph.is_timed_out());
    // Downstream phases still ran over the partial graph.
    assert!(!result.solutions.is_empty());
    assert!(!result.problem.variables().is_empty());
}

#[test]
fn test_enumeration_timeout_without_validity_stops_pipeline() {
    let temp = TempDir::new().unwrap();
    let kb = compile_kb(temp.path(), "(B (=> (p x) (q x)))");
    let obs = observation("timeout", vec![fact(&kb, "q/1", &["A"])]);
    let options = EngineOptions {
        timeouts: Timeouts {
            lhs: Some(0.0),
            ..Timeouts::default()
        },
        keep_validity_on_timeout: false,
        ..EngineOptions::default()
    };
    let engine = AbductionEngine::new(kb, options).unwrap();

    let result = engine.infer(&obs);
    assert!(result.graph.is_timed_out());
    assert_eq!(result.solutions[0].kind(), SolutionKind::NotAvailable);
}

// ============================================================================
// Output
// ============================================================================

#[test]
fn test_xml_output() {
    let temp = TempDir::new().unwrap();
    let kb = compile_kb(temp.path(), "(B (=> (p x) (q x)))");
    let obs = observation("xml-run", vec![fact(&kb, "q/1", &["A"])]);
    let engine = AbductionEngine::new(kb, EngineOptions::default()).unwrap();
    let result = engine.infer(&obs);

    let mut buffer = Vec::new();
    abduce::output::write_solutions(&mut buffer, engine.kb().predicates(), &result).unwrap();
    let xml = String::from_utf8(buffer).unwrap();

    assert!(xml.contains("<proofgraph"));
    assert!(xml.contains("name=\"xml-run\""));
    assert!(xml.contains("<literals>"));
    assert!(xml.contains("<explanations>"));
    assert!(xml.contains("<unifications>"));
    assert!(xml.contains("kind=\"abduction\""));
    assert!(xml.contains("state=\"optimal\""));
}

// ============================================================================
// Target Filters
// ============================================================================

#[test]
fn test_target_and_exclude_filters() {
    let temp = TempDir::new().unwrap();
    let kb = compile_kb(temp.path(), "(B (=> (p x) (q x)))");
    let options = EngineOptions {
        targets: vec!["wanted".to_string()],
        excludes: vec!["banned".to_string()],
        ..EngineOptions::default()
    };
    let engine = AbductionEngine::new(kb, options).unwrap();
    assert!(engine.is_target("wanted"));
    assert!(!engine.is_target("other"));
    assert!(!engine.is_target("banned"));
}
