//! Depth-bounded breadth-first enumeration.

use super::{candidates_for_node, observation_pids, seed_graph, LhsEnumerator, Observation};
use crate::kb::KnowledgeBase;
use crate::pg::ProofGraph;
use crate::timing::PhaseTimer;
use tracing::debug;

/// Applies every applicable chain, frontier by frontier, until the depth
/// bound. Nodes created at depth d+1 become the next frontier.
pub struct BfsEnumerator {
    /// Maximum chaining depth; negative means unbounded.
    pub max_depth: i32,
}

impl BfsEnumerator {
    pub fn new(max_depth: i32) -> BfsEnumerator {
        BfsEnumerator { max_depth }
    }
}

impl Default for BfsEnumerator {
    fn default() -> BfsEnumerator {
        BfsEnumerator::new(3)
    }
}

impl LhsEnumerator for BfsEnumerator {
    fn name(&self) -> &'static str {
        "bfs"
    }

    fn enumerate(
        &self,
        kb: &KnowledgeBase,
        observation: &Observation,
        timer: &PhaseTimer,
    ) -> ProofGraph {
        let mut graph = seed_graph(kb, observation);
        let obs_pids = observation_pids(&graph);

        let mut depth = 0;
        loop {
            if self.max_depth >= 0 && depth >= self.max_depth {
                break;
            }
            if timer.expired() {
                graph.mark_timed_out();
                break;
            }

            let mut frontier: Vec<_> = graph.nodes_with_depth(depth).collect();
            frontier.sort_unstable();
            if frontier.is_empty() {
                break;
            }

            let mut candidates = Vec::new();
            for &target in &frontier {
                candidates.extend(candidates_for_node(&graph, kb, target, &obs_pids));
            }
            debug!(depth, count = candidates.len(), "chain candidates");

            for candidate in candidates {
                if timer.expired() {
                    graph.mark_timed_out();
                    return graph;
                }
                graph.chain(kb, &candidate.nodes, candidate.rule, candidate.backward);
            }

            depth += 1;
            if graph.nodes_with_depth(depth).next().is_none() {
                break;
            }
        }
        graph
    }
}
