//! # Hypothesis-Space Enumerators
//!
//! An enumerator drives proof-graph construction for one observation: it
//! seeds the graph with the observed atoms, then decides which chain
//! operations to apply in which order until its bound or the phase budget is
//! reached. Two strategies are provided: depth-bounded breadth-first
//! ([`bfs::BfsEnumerator`]) and distance-guided best-first
//! ([`astar::AStarEnumerator`]).

pub mod astar;
pub mod bfs;

use crate::fol::{Atom, PredicateId, RuleId};
use crate::kb::{KnowledgeBase, DIR_BACKWARD, DIR_FORWARD};
use crate::pg::{NodeId, ProofGraph};
use crate::timing::PhaseTimer;
use std::collections::HashSet;
use tracing::debug;

/// One named observation: the facts to explain plus optional requirements.
#[derive(Debug, Clone, Default)]
pub struct Observation {
    pub name: String,
    pub facts: Vec<Atom>,
    pub requirements: Vec<Atom>,
}

/// Strategy deciding the order of chain applications.
pub trait LhsEnumerator {
    fn name(&self) -> &'static str;

    /// Build the proof graph for `observation`. Must poll `timer` between
    /// operations and mark the graph timed-out on expiry; the partial graph
    /// stays well-formed.
    fn enumerate(
        &self,
        kb: &KnowledgeBase,
        observation: &Observation,
        timer: &PhaseTimer,
    ) -> ProofGraph;
}

/// A chain operation the enumerator may apply.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChainCandidate {
    pub nodes: Vec<NodeId>,
    pub rule: RuleId,
    pub backward: bool,
}

/// Per-target cap on enumerated tail assignments.
const MAX_ASSIGNMENTS: usize = 1024;

/// Seed a fresh graph with the observation's facts and requirements.
pub(crate) fn seed_graph(kb: &KnowledgeBase, observation: &Observation) -> ProofGraph {
    let mut graph = ProofGraph::new(&observation.name);
    for atom in &observation.facts {
        graph.add_observation(kb, atom.clone());
    }
    for atom in &observation.requirements {
        graph.add_required(kb, atom.clone());
    }
    graph
}

/// Predicate ids of the observed facts, for reachability pruning.
pub(crate) fn observation_pids(graph: &ProofGraph) -> HashSet<PredicateId> {
    graph
        .observations()
        .into_iter()
        .map(|n| graph.node(n).atom().pid())
        .collect()
}

/// Whether every head predicate of the rule side to instantiate can still
/// reach some observation predicate within the matrix bound.
pub(crate) fn passes_reachability(
    kb: &KnowledgeBase,
    rule: &crate::fol::Rule,
    backward: bool,
    obs_pids: &HashSet<PredicateId>,
) -> bool {
    let side_to = if backward { rule.lhs() } else { rule.rhs() };
    side_to.non_equality_atoms().all(|(_, atom)| {
        obs_pids
            .iter()
            .any(|&obs| kb.distance_between(atom.pid(), obs).is_some())
    })
}

/// Enumerate chain candidates that include `target` in their tail. Uses the
/// KB pattern indexes: predicate -> features -> matching rules, then
/// instantiates node tuples against the rule's matched side.
pub(crate) fn candidates_for_node(
    graph: &ProofGraph,
    kb: &KnowledgeBase,
    target: NodeId,
    obs_pids: &HashSet<PredicateId>,
) -> Vec<ChainCandidate> {
    let node = graph.node(target);
    if node.is_equality_node() || node.is_neg_equality_node() {
        return Vec::new();
    }
    let pid = node.atom().pid();

    let features = match kb.features_with_predicate(pid) {
        Ok(features) => features,
        Err(e) => {
            debug!(pid, error = %e, "feature lookup failed");
            return Vec::new();
        }
    };

    let mut out = Vec::new();
    let mut seen: HashSet<ChainCandidate> = HashSet::new();

    for (feature, bits) in features {
        let backward_wanted = bits & DIR_BACKWARD != 0;
        let forward_wanted = bits & DIR_FORWARD != 0 && kb.can_deduce();
        if !backward_wanted && !forward_wanted {
            continue;
        }
        let rules = match kb.rules_matching(&feature) {
            Ok(rules) => rules,
            Err(e) => {
                debug!(error = %e, "pattern lookup failed");
                continue;
            }
        };
        for (rule_id, is_backward) in rules {
            if is_backward && !backward_wanted {
                continue;
            }
            if !is_backward && !forward_wanted {
                continue;
            }
            let Ok(rule) = kb.rule(rule_id) else { continue };
            if !passes_reachability(kb, &rule, is_backward, obs_pids) {
                continue;
            }
            let side_from = if is_backward { rule.rhs() } else { rule.lhs() };
            let slots: Vec<PredicateId> = side_from
                .non_equality_atoms()
                .map(|(_, a)| a.pid())
                .collect();
            if !slots.contains(&pid) {
                continue;
            }
            for nodes in assignments(graph, &slots, target) {
                let candidate = ChainCandidate {
                    nodes,
                    rule: rule_id,
                    backward: is_backward,
                };
                if seen.insert(candidate.clone()) {
                    out.push(candidate);
                }
            }
        }
    }
    out
}

/// Node tuples matching a predicate-id slot sequence, each including
/// `target`, pairwise distinct, capped at [`MAX_ASSIGNMENTS`].
fn assignments(graph: &ProofGraph, slots: &[PredicateId], target: NodeId) -> Vec<Vec<NodeId>> {
    let mut out: Vec<Vec<NodeId>> = Vec::new();
    let mut partial: Vec<NodeId> = Vec::with_capacity(slots.len());
    fill(graph, slots, target, &mut partial, &mut out);
    out
}

fn fill(
    graph: &ProofGraph,
    slots: &[PredicateId],
    target: NodeId,
    partial: &mut Vec<NodeId>,
    out: &mut Vec<Vec<NodeId>>,
) {
    if out.len() >= MAX_ASSIGNMENTS {
        debug!(target, "assignment cap reached, truncating candidates");
        return;
    }
    let slot = partial.len();
    if slot == slots.len() {
        if partial.contains(&target) {
            out.push(partial.clone());
        }
        return;
    }
    let mut nodes: Vec<NodeId> = graph
        .nodes_with_predicate(slots[slot])
        .filter(|&n| !partial.contains(&n))
        .filter(|&n| {
            let node = graph.node(n);
            !node.is_equality_node() && !node.is_neg_equality_node()
        })
        .collect();
    nodes.sort_unstable();
    for n in nodes {
        partial.push(n);
        fill(graph, slots, target, partial, out);
        partial.pop();
    }
}
