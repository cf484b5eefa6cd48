//! Distance-guided best-first enumeration.

use super::{candidates_for_node, observation_pids, seed_graph, ChainCandidate, LhsEnumerator, Observation};
use crate::kb::KnowledgeBase;
use crate::pg::{NodeId, ProofGraph};
use crate::timing::PhaseTimer;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use tracing::debug;

struct Queued {
    cost: f32,
    candidate: ChainCandidate,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Queued) -> bool {
        self.cost == other.cost && self.candidate == other.candidate
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Queued) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Queued) -> Ordering {
        // Min-heap on accumulated distance.
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.candidate.rule.cmp(&self.candidate.rule))
    }
}

/// Expands the cheapest candidate first, where a candidate's cost is the
/// largest accumulated distance among its tail nodes plus the rule's own
/// distance. Candidates beyond the KB's maximum distance are pruned, so the
/// search explores exactly the region the reachability matrix covers.
pub struct AStarEnumerator;

impl AStarEnumerator {
    pub fn new() -> AStarEnumerator {
        AStarEnumerator
    }
}

impl Default for AStarEnumerator {
    fn default() -> AStarEnumerator {
        AStarEnumerator::new()
    }
}

impl LhsEnumerator for AStarEnumerator {
    fn name(&self) -> &'static str {
        "astar"
    }

    fn enumerate(
        &self,
        kb: &KnowledgeBase,
        observation: &Observation,
        timer: &PhaseTimer,
    ) -> ProofGraph {
        let mut graph = seed_graph(kb, observation);
        let obs_pids = observation_pids(&graph);
        let max_distance = kb.max_distance();

        // Accumulated distance from the observations, per node.
        let mut node_distance: HashMap<NodeId, f32> = HashMap::new();
        for i in 0..graph.nodes().len() {
            node_distance.insert(i, 0.0);
        }

        let mut queue: BinaryHeap<Queued> = BinaryHeap::new();
        let mut queued: HashSet<ChainCandidate> = HashSet::new();

        let push_candidates = |graph: &ProofGraph,
                                   queue: &mut BinaryHeap<Queued>,
                                   queued: &mut HashSet<ChainCandidate>,
                                   node_distance: &HashMap<NodeId, f32>,
                                   target: NodeId| {
            for candidate in candidates_for_node(graph, kb, target, &obs_pids) {
                if queued.contains(&candidate) {
                    continue;
                }
                let Ok(rule) = kb.rule(candidate.rule) else { continue };
                let Some(step) = kb.rule_distance(&rule) else { continue };
                let base = candidate
                    .nodes
                    .iter()
                    .map(|n| node_distance.get(n).copied().unwrap_or(0.0))
                    .fold(0.0f32, f32::max);
                let cost = base + step;
                if max_distance >= 0.0 && cost > max_distance {
                    continue;
                }
                queued.insert(candidate.clone());
                queue.push(Queued { cost, candidate });
            }
        };

        for target in 0..graph.nodes().len() {
            push_candidates(&graph, &mut queue, &mut queued, &node_distance, target);
        }

        while let Some(Queued { cost, candidate }) = queue.pop() {
            if timer.expired() {
                graph.mark_timed_out();
                break;
            }
            let before = graph.nodes().len();
            let Some(_head) = graph.chain(kb, &candidate.nodes, candidate.rule, candidate.backward)
            else {
                continue;
            };
            debug!(rule = candidate.rule, cost, "applied chain");

            for new_node in before..graph.nodes().len() {
                let entry = node_distance.entry(new_node).or_insert(cost);
                if cost < *entry {
                    *entry = cost;
                }
                push_candidates(&graph, &mut queue, &mut queued, &node_distance, new_node);
            }
        }
        graph
    }
}
