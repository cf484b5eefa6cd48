//! Proof-Graph Integration Tests
//!
//! Tests for:
//! - Node bookkeeping invariants (depth, types, indexes)
//! - Unification boundaries and equality sub-nodes
//! - Chaining, conditional substitutions, idempotence
//! - Mutual-exclusion candidates

use abduce::engine::ingest_forms;
use abduce::fol::{Atom, Predicate, Term};
use abduce::input::InputReader;
use abduce::kb::{CompileConfig, KnowledgeBase};
use abduce::pg::{EdgeType, NodeType, ProofGraph};
use std::path::Path;
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

fn empty_kb(dir: &Path) -> KnowledgeBase {
    KnowledgeBase::create(dir, CompileConfig::default(), "basic")
        .unwrap()
        .finalize()
        .unwrap()
}

fn compile_kb(dir: &Path, source: &str) -> KnowledgeBase {
    let mut kb = KnowledgeBase::create(dir, CompileConfig::default(), "basic").unwrap();
    let reader = InputReader::new(true);
    let forms = reader.read_str(source, kb.predicates_mut()).unwrap();
    ingest_forms(&mut kb, forms).unwrap();
    kb.finalize().unwrap()
}

fn atom(kb: &mut KnowledgeBase, name: &str, terms: &[&str]) -> Atom {
    let pid = kb
        .predicates_mut()
        .add(Predicate::new(name, terms.len() as u8));
    Atom::new(pid, terms.iter().map(|t| Term::new(t)).collect(), false, false)
}

fn neg_atom(kb: &mut KnowledgeBase, name: &str, terms: &[&str]) -> Atom {
    let pid = kb
        .predicates_mut()
        .add(Predicate::new(name, terms.len() as u8));
    Atom::new(pid, terms.iter().map(|t| Term::new(t)).collect(), true, false)
}

// ============================================================================
// Node Invariants
// ============================================================================

#[test]
fn test_depths() {
    let temp = TempDir::new().unwrap();
    let kb = compile_kb(temp.path(), "(B (=> (p x) (q x)))");
    let mut graph = ProofGraph::new("depths");

    let pid_q = kb.predicates().id_of_str("q/1").unwrap();
    let obs = graph.add_observation(&kb, Atom::new(pid_q, vec![Term::new("C1")], false, false));
    assert_eq!(graph.node(obs).depth(), 0);
    assert_eq!(graph.node(obs).node_type(), NodeType::Observation);

    let head = graph.chain(&kb, &[obs], 0, true).expect("chain applies");
    for &n in graph.hypernode(head) {
        assert_eq!(graph.node(n).depth(), 1);
        assert_eq!(graph.node(n).node_type(), NodeType::Hypothesis);
        assert_eq!(graph.node(n).master_hypernode(), Some(head));
        assert!(graph.node(n).evidences().contains(&obs));
    }

    // Every node: depth >= -1, and depth == 0 iff observation/required.
    for node in graph.nodes() {
        assert!(node.depth() >= -1);
        let is_root = matches!(
            node.node_type(),
            NodeType::Observation | NodeType::Required
        );
        assert_eq!(node.depth() == 0, is_root);
    }
}

#[test]
fn test_required_nodes_have_depth_zero() {
    let temp = TempDir::new().unwrap();
    let mut kb = empty_kb(temp.path());
    let mut graph = ProofGraph::new("req");
    let a = atom(&mut kb, "goal", &["x"]);
    let r = graph.add_required(&kb, a);
    assert_eq!(graph.node(r).depth(), 0);
    assert_eq!(graph.node(r).node_type(), NodeType::Required);
}

#[test]
fn test_hypernode_content_unique() {
    let temp = TempDir::new().unwrap();
    let mut kb = empty_kb(temp.path());
    let mut graph = ProofGraph::new("hn");
    let __n0_atom = atom(&mut kb, "p", &["C1"]);
    let n0 = graph.add_observation(&kb, __n0_atom);
    let __n1_atom = atom(&mut kb, "q", &["C1"]);
    let n1 = graph.add_observation(&kb, __n1_atom);
    let h1 = graph.add_hypernode(vec![n0, n1]);
    let h2 = graph.add_hypernode(vec![n0, n1]);
    let h3 = graph.add_hypernode(vec![n1, n0]);
    assert_eq!(h1, h2);
    // Deduplication is on the sorted content.
    assert_eq!(h1, h3);

    let mut seen = std::collections::HashSet::new();
    for members in graph.hypernodes() {
        let mut sorted = members.clone();
        sorted.sort_unstable();
        assert!(seen.insert(sorted), "duplicate hypernode multiset");
    }
}

// ============================================================================
// Unification
// ============================================================================

#[test]
fn test_identical_atoms_unify_with_empty_head() {
    let temp = TempDir::new().unwrap();
    let mut kb = empty_kb(temp.path());
    let mut graph = ProofGraph::new("same");
    let __obs_atom = atom(&mut kb, "p", &["Ed"]);
    graph.add_observation(&kb, __obs_atom);
    let __obs_atom = atom(&mut kb, "p", &["Ed"]);
    graph.add_observation(&kb, __obs_atom);
    // Identical constant terms: no equality node, but the edge exists.
    assert_eq!(graph.edges().len(), 1);
    let edge = graph.edge(0);
    assert_eq!(edge.edge_type(), EdgeType::Unify);
    assert!(edge.head().is_none());
    assert!(graph.find_sub_node(Term::new("Ed"), Term::new("Ed")).is_none());
}

#[test]
fn test_distinct_constants_refused() {
    let temp = TempDir::new().unwrap();
    let mut kb = empty_kb(temp.path());
    let mut graph = ProofGraph::new("distinct");
    let __obs_atom = atom(&mut kb, "p", &["Ann"]);
    graph.add_observation(&kb, __obs_atom);
    let __obs_atom = atom(&mut kb, "p", &["Bob"]);
    graph.add_observation(&kb, __obs_atom);
    assert_eq!(graph.nodes().len(), 2);
    assert_eq!(graph.edges().len(), 0);
    assert_eq!(graph.hypernodes().len(), 0);
}

#[test]
fn test_variable_unification_creates_sub_node() {
    let temp = TempDir::new().unwrap();
    let mut kb = empty_kb(temp.path());
    let mut graph = ProofGraph::new("vars");
    let __n0_atom = atom(&mut kb, "p", &["Ann", "u1"]);
    let n0 = graph.add_observation(&kb, __n0_atom);
    let __n1_atom = atom(&mut kb, "p", &["Ann", "u2"]);
    let n1 = graph.add_observation(&kb, __n1_atom);
    let edge = graph.find_unifying_edge(n0, n1).expect("unify edge");
    let head = graph.edge(edge).head().expect("non-empty head");
    assert_eq!(graph.hypernode(head).len(), 1);

    let sub = graph
        .find_sub_node(Term::new("u1"), Term::new("u2"))
        .expect("equality sub-node");
    assert_eq!(graph.node(sub).depth(), -1);
    assert!(graph.node(sub).is_equality_node());
    assert!(graph
        .clusters()
        .in_same_cluster(Term::new("u1"), Term::new("u2")));
}

#[test]
fn test_transitive_sub_nodes_materialized() {
    let temp = TempDir::new().unwrap();
    let mut kb = empty_kb(temp.path());
    let mut graph = ProofGraph::new("triangle");
    let __obs_atom = atom(&mut kb, "p", &["t1"]);
    graph.add_observation(&kb, __obs_atom);
    let __obs_atom = atom(&mut kb, "p", &["t2"]);
    graph.add_observation(&kb, __obs_atom);
    let __obs_atom = atom(&mut kb, "p", &["t3"]);
    graph.add_observation(&kb, __obs_atom);
    for (a, b) in [("t1", "t2"), ("t2", "t3"), ("t1", "t3")] {
        assert!(
            graph.find_sub_node(Term::new(a), Term::new(b)).is_some(),
            "missing sub-node ({a}, {b})"
        );
    }
    let cluster = graph.clusters().cluster_of(Term::new("t1")).unwrap();
    assert_eq!(cluster.len(), 3);
}

#[test]
fn test_unification_considered_once() {
    let temp = TempDir::new().unwrap();
    let mut kb = empty_kb(temp.path());
    let mut graph = ProofGraph::new("once");
    let __n0_atom = atom(&mut kb, "p", &["w1"]);
    let n0 = graph.add_observation(&kb, __n0_atom);
    let __n1_atom = atom(&mut kb, "p", &["w2"]);
    let n1 = graph.add_observation(&kb, __n1_atom);
    let edges_before = graph.edges().len();
    // A third node of the same predicate re-proposes pairs; (n0, n1) is
    // already considered and must not produce a second edge.
    let __n2_atom = atom(&mut kb, "p", &["w3"]);
    let n2 = graph.add_observation(&kb, __n2_atom);
    assert!(graph.find_unifying_edge(n0, n2).is_some());
    assert!(graph.find_unifying_edge(n1, n2).is_some());
    let unify_edges_01: Vec<_> = (0..graph.edges().len())
        .filter(|&e| {
            let edge = graph.edge(e);
            edge.is_unify_edge() && {
                let t = graph.hypernode(edge.tail());
                t.contains(&n0) && t.contains(&n1)
            }
        })
        .collect();
    assert_eq!(unify_edges_01.len(), 1);
    assert!(graph.edges().len() > edges_before);
}

#[test]
fn test_right_unique_unification_postponed() {
    let temp = TempDir::new().unwrap();
    let kb = compile_kb(
        temp.path(),
        "(B (define (nsubj 2) right-unique) (=> (p x) (q x)))",
    );
    let nsubj = kb.predicates().id_of_str("nsubj/2").unwrap();
    let mut graph = ProofGraph::new("postpone");

    let mk = |g: &str, d: &str| {
        Atom::new(nsubj, vec![Term::new(g), Term::new(d)], false, false)
    };
    let n0 = graph.add_observation(&kb, mk("g1", "d1"));
    let n1 = graph.add_observation(&kb, mk("g2", "d2"));

    // Governors g1, g2 are not yet unified: the unification is refused.
    assert!(graph.find_unifying_edge(n0, n1).is_none());
}

// ============================================================================
// Chaining
// ============================================================================

#[test]
fn test_chain_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let kb = compile_kb(temp.path(), "(B (=> (p x) (q x)))");
    let mut graph = ProofGraph::new("idem");
    let pid_q = kb.predicates().id_of_str("q/1").unwrap();
    let obs = graph.add_observation(&kb, Atom::new(pid_q, vec![Term::new("C1")], false, false));

    let first = graph.chain(&kb, &[obs], 0, true);
    assert!(first.is_some());
    let edges = graph.edges().len();
    let nodes = graph.nodes().len();

    let second = graph.chain(&kb, &[obs], 0, true);
    assert!(second.is_none());
    assert_eq!(graph.edges().len(), edges);
    assert_eq!(graph.nodes().len(), nodes);
}

#[test]
fn test_chain_refuses_unknown_rule() {
    let temp = TempDir::new().unwrap();
    let kb = compile_kb(temp.path(), "(B (=> (p x) (q x)))");
    let mut graph = ProofGraph::new("unknown");
    let pid_q = kb.predicates().id_of_str("q/1").unwrap();
    let obs = graph.add_observation(&kb, Atom::new(pid_q, vec![Term::new("C1")], false, false));

    assert!(graph.chain(&kb, &[obs], 999, true).is_none());
    assert_eq!(graph.edges().len(), 0);
}

#[test]
fn test_chain_refuses_predicate_mismatch() {
    let temp = TempDir::new().unwrap();
    let kb = compile_kb(temp.path(), "(B (=> (p x) (q x)))");
    let mut graph = ProofGraph::new("mismatch");
    let pid_p = kb.predicates().id_of_str("p/1").unwrap();
    let other = graph.add_observation(&kb, Atom::new(pid_p, vec![Term::new("C1")], false, false));

    // Backward chaining matches the rhs (q), not p.
    assert!(graph.chain(&kb, &[other], 0, true).is_none());
}

#[test]
fn test_chain_introduces_fresh_unknowns() {
    let temp = TempDir::new().unwrap();
    let kb = compile_kb(temp.path(), "(B (=> (knows x y) (famous y)))");
    let mut graph = ProofGraph::new("fresh");
    let famous = kb.predicates().id_of_str("famous/1").unwrap();
    let obs = graph.add_observation(&kb, Atom::new(famous, vec![Term::new("Star")], false, false));

    let head = graph.chain(&kb, &[obs], 0, true).expect("chain applies");
    let members = graph.hypernode(head);
    assert_eq!(members.len(), 1);
    let hypothesized = graph.node(members[0]).atom();
    // knows(_u, Star): x was unpinned and became a fresh unknown.
    assert!(hypothesized.term(0).is_unknown());
    assert_eq!(hypothesized.term(1), Term::new("Star"));
}

#[test]
fn test_chain_conditional_substitutions() {
    let temp = TempDir::new().unwrap();
    let kb = compile_kb(temp.path(), "(B (=> (p x) (q x x)))");
    let mut graph = ProofGraph::new("conds");
    let q = kb.predicates().id_of_str("q/2").unwrap();
    let obs = graph.add_observation(
        &kb,
        Atom::new(q, vec![Term::new("ca"), Term::new("cb")], false, false),
    );

    let head = graph.chain(&kb, &[obs], 0, true).expect("chain applies");
    let edge = (0..graph.edges().len())
        .find(|&e| graph.edge(e).head() == Some(head))
        .unwrap();
    let conditions = graph.chain_conditions(edge).expect("conditions recorded");
    assert_eq!(conditions.require_equal.len(), 1);
    let (t1, t2) = conditions.require_equal[0];
    assert_eq!(
        abduce::fol::sorted_pair(Term::new("ca"), Term::new("cb")),
        (t1, t2)
    );
}

#[test]
fn test_chain_refuses_conflicting_constants() {
    let temp = TempDir::new().unwrap();
    let kb = compile_kb(temp.path(), "(B (=> (p x) (q x x)))");
    let mut graph = ProofGraph::new("conflict");
    let q = kb.predicates().id_of_str("q/2").unwrap();
    let obs = graph.add_observation(
        &kb,
        Atom::new(q, vec![Term::new("Ca"), Term::new("Cb")], false, false),
    );

    assert!(graph.chain(&kb, &[obs], 0, true).is_none());
}

#[test]
fn test_multi_atom_tail() {
    let temp = TempDir::new().unwrap();
    let kb = compile_kb(temp.path(), "(B (=> (cause x) (^ (e1 x) (e2 x))))");
    let mut graph = ProofGraph::new("multi");
    let e1 = kb.predicates().id_of_str("e1/1").unwrap();
    let e2 = kb.predicates().id_of_str("e2/1").unwrap();
    let n0 = graph.add_observation(&kb, Atom::new(e1, vec![Term::new("m")], false, false));
    let n1 = graph.add_observation(&kb, Atom::new(e2, vec![Term::new("m")], false, false));

    let head = graph.chain(&kb, &[n0, n1], 0, true).expect("joint chain");
    assert_eq!(graph.hypernode(head).len(), 1);
    let hyp = graph.node(graph.hypernode(head)[0]);
    assert_eq!(hyp.atom().term(0), Term::new("m"));
    assert!(hyp.evidences().contains(&n0));
    assert!(hyp.evidences().contains(&n1));
}

// ============================================================================
// Mutual Exclusions
// ============================================================================

#[test]
fn test_counter_sign_exclusion() {
    let temp = TempDir::new().unwrap();
    let mut kb = empty_kb(temp.path());
    let mut graph = ProofGraph::new("counter");
    let __obs_atom = atom(&mut kb, "p", &["mx"]);
    graph.add_observation(&kb, __obs_atom);
    let __obs_atom = neg_atom(&mut kb, "p", &["my"]);
    graph.add_observation(&kb, __obs_atom);
    assert_eq!(graph.mutual_exclusions().len(), 1);
    let exclusion = &graph.mutual_exclusions()[0];
    assert_eq!(exclusion.unifier.substitutions().len(), 1);
}

#[test]
fn test_counter_sign_exclusion_with_distinct_constants_dropped() {
    let temp = TempDir::new().unwrap();
    let mut kb = empty_kb(temp.path());
    let mut graph = ProofGraph::new("dropped");
    let __obs_atom = atom(&mut kb, "p", &["Ma"]);
    graph.add_observation(&kb, __obs_atom);
    let __obs_atom = neg_atom(&mut kb, "p", &["Mb"]);
    graph.add_observation(&kb, __obs_atom);
    // The exclusion could only bite if Ma = Mb held, which it cannot.
    assert!(graph.mutual_exclusions().is_empty());
}

#[test]
fn test_declared_inconsistency_exclusion() {
    let temp = TempDir::new().unwrap();
    let kb = compile_kb(temp.path(), "(B (xor (p x) (q x)) (=> (a x) (b x)))");
    let p = kb.predicates().id_of_str("p/1").unwrap();
    let q = kb.predicates().id_of_str("q/1").unwrap();
    let mut graph = ProofGraph::new("xor");
    graph.add_observation(&kb, Atom::new(p, vec![Term::new("K")], false, false));
    graph.add_observation(&kb, Atom::new(q, vec![Term::new("K")], false, false));

    assert_eq!(graph.mutual_exclusions().len(), 1);
    // Same constant in the co-referring slot: the unifier is empty and the
    // exclusion bites unconditionally.
    assert!(graph.mutual_exclusions()[0].unifier.is_empty());
}

#[test]
fn test_functional_conflict_exclusion() {
    let temp = TempDir::new().unwrap();
    let kb = compile_kb(
        temp.path(),
        "(B (define (nsubj 2) right-unique) (=> (a x) (b x)))",
    );
    let nsubj = kb.predicates().id_of_str("nsubj/2").unwrap();
    let mut graph = ProofGraph::new("functional");
    graph.add_observation(
        &kb,
        Atom::new(nsubj, vec![Term::new("fg"), Term::new("Da")], false, false),
    );
    graph.add_observation(
        &kb,
        Atom::new(nsubj, vec![Term::new("fg"), Term::new("Db")], false, false),
    );

    // Same governor, two distinct constant dependents.
    assert_eq!(graph.mutual_exclusions().len(), 1);
    assert!(graph.mutual_exclusions()[0].unifier.is_empty());
}
