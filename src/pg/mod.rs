//! # Proof Graph
//!
//! The AND/OR-like search structure produced by chained rule applications
//! and term unification, built incrementally from an observation.
//!
//! ```text
//! add_observation ──► node
//!                       │ (on every non-equality node)
//!                       ├─► unification proposals ──► equality sub-nodes,
//!                       │                             unification edges,
//!                       │                             variable clusters
//!                       └─► mutual-exclusion candidates
//! chain(tail, rule, direction) ──► head nodes + hypernode + edge,
//!                                  conditional substitutions
//! ```
//!
//! Nodes, hypernodes, and edges live in dense arrays and refer to each other
//! by index. Chain and unify never fail hard: a refused operation returns
//! `None` and the graph is left untouched.

mod clusters;
mod unifier;

pub use clusters::VariableClusters;
pub use unifier::Unifier;

use crate::fol::{sorted_pair, Atom, PredicateId, RuleId, Term};
use crate::kb::KnowledgeBase;
use std::collections::{HashMap, HashSet};
use tracing::debug;

pub type NodeId = usize;
pub type EdgeId = usize;
pub type HypernodeId = usize;

/// How a node entered the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    /// Corresponds to an observed fact; depth 0.
    Observation,
    /// Introduced by chaining or unification.
    Hypothesis,
    /// Corresponds to a requirement; depth 0.
    Required,
}

/// One node of the proof graph.
#[derive(Debug, Clone)]
pub struct Node {
    atom: Atom,
    ntype: NodeType,
    depth: i32,
    master: Option<HypernodeId>,
    evidences: HashSet<NodeId>,
}

impl Node {
    pub fn atom(&self) -> &Atom {
        &self.atom
    }

    pub fn node_type(&self) -> NodeType {
        self.ntype
    }

    /// Distance from the nearest observation. Observations and requirements
    /// have depth 0, chained nodes max(tail)+1, equality sub-nodes -1.
    pub fn depth(&self) -> i32 {
        self.depth
    }

    /// The hypernode whose instantiation introduced this node.
    pub fn master_hypernode(&self) -> Option<HypernodeId> {
        self.master
    }

    /// Ancestor set: the nodes this node was hypothesized from.
    pub fn evidences(&self) -> &HashSet<NodeId> {
        &self.evidences
    }

    pub fn is_equality_node(&self) -> bool {
        self.atom.is_equality()
    }

    pub fn is_neg_equality_node(&self) -> bool {
        self.atom.is_neg_equality()
    }
}

/// Edge kind. Unification edges carry no rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeType {
    /// Abduction: the head hypothesizes rule antecedents.
    Hypothesize,
    /// Deduction: the head derives rule consequents.
    Implicate,
    /// Term unification between the two tail nodes.
    Unify,
}

/// A directed hyperedge between hypernodes.
#[derive(Debug, Clone)]
pub struct Edge {
    etype: EdgeType,
    tail: HypernodeId,
    head: Option<HypernodeId>,
    rule: Option<RuleId>,
}

impl Edge {
    pub fn edge_type(&self) -> EdgeType {
        self.etype
    }

    pub fn tail(&self) -> HypernodeId {
        self.tail
    }

    pub fn head(&self) -> Option<HypernodeId> {
        self.head
    }

    pub fn rule(&self) -> Option<RuleId> {
        self.rule
    }

    pub fn is_chain_edge(&self) -> bool {
        matches!(self.etype, EdgeType::Hypothesize | EdgeType::Implicate)
    }

    pub fn is_unify_edge(&self) -> bool {
        matches!(self.etype, EdgeType::Unify)
    }
}

/// Substitution conditions attached to a chain edge: the edge is live only
/// if every `require_equal` pair is unified elsewhere in the graph and no
/// `forbid_equal` pair is.
#[derive(Debug, Clone, Default)]
pub struct ChainConditions {
    pub require_equal: Vec<(Term, Term)>,
    pub forbid_equal: Vec<(Term, Term)>,
}

/// A mutual exclusion between two nodes, conditional on its unifier holding.
#[derive(Debug, Clone)]
pub struct MutualExclusion {
    pub n1: NodeId,
    pub n2: NodeId,
    pub unifier: Unifier,
}

#[derive(Debug, Default)]
struct Maps {
    predicate_to_nodes: HashMap<PredicateId, HashSet<NodeId>>,
    term_to_nodes: HashMap<Term, HashSet<NodeId>>,
    depth_to_nodes: HashMap<i32, HashSet<NodeId>>,
    type_to_nodes: HashMap<NodeType, HashSet<NodeId>>,
    sub_nodes: HashMap<(Term, Term), NodeId>,
    neg_sub_nodes: HashMap<(Term, Term), NodeId>,
    node_to_hypernodes: HashMap<NodeId, Vec<HypernodeId>>,
    sorted_to_hypernode: HashMap<Vec<NodeId>, HypernodeId>,
    hypernode_to_edges: HashMap<HypernodeId, Vec<EdgeId>>,
    unify_edge_of_pair: HashMap<(NodeId, NodeId), EdgeId>,
}

#[derive(Debug, Default)]
struct Logs {
    considered_unifications: HashSet<(NodeId, NodeId)>,
    considered_exclusions: HashSet<(NodeId, NodeId)>,
    applied_rules: HashSet<(RuleId, HypernodeId, bool)>,
}

/// The proof graph of one observation.
pub struct ProofGraph {
    name: String,
    timed_out: bool,
    nodes: Vec<Node>,
    hypernodes: Vec<Vec<NodeId>>,
    edges: Vec<Edge>,
    unification_hypernodes: HashSet<HypernodeId>,
    chain_conditions: HashMap<EdgeId, ChainConditions>,
    mutual_exclusions: Vec<MutualExclusion>,
    clusters: VariableClusters,
    maps: Maps,
    logs: Logs,
}

impl ProofGraph {
    pub fn new(name: &str) -> ProofGraph {
        ProofGraph {
            name: name.to_string(),
            timed_out: false,
            nodes: Vec::new(),
            hypernodes: Vec::new(),
            edges: Vec::new(),
            unification_hypernodes: HashSet::new(),
            chain_conditions: HashMap::new(),
            mutual_exclusions: Vec::new(),
            clusters: VariableClusters::new(),
            maps: Maps::default(),
            logs: Logs::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mark_timed_out(&mut self) {
        self.timed_out = true;
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out
    }

    // ---- accessors

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, i: NodeId) -> &Node {
        &self.nodes[i]
    }

    pub fn hypernodes(&self) -> &[Vec<NodeId>] {
        &self.hypernodes
    }

    pub fn hypernode(&self, i: HypernodeId) -> &[NodeId] {
        &self.hypernodes[i]
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edge(&self, i: EdgeId) -> &Edge {
        &self.edges[i]
    }

    pub fn mutual_exclusions(&self) -> &[MutualExclusion] {
        &self.mutual_exclusions
    }

    pub fn chain_conditions(&self, edge: EdgeId) -> Option<&ChainConditions> {
        self.chain_conditions.get(&edge)
    }

    pub fn clusters(&self) -> &VariableClusters {
        &self.clusters
    }

    pub fn is_unification_hypernode(&self, h: HypernodeId) -> bool {
        self.unification_hypernodes.contains(&h)
    }

    pub fn nodes_with_predicate(&self, pid: PredicateId) -> impl Iterator<Item = NodeId> + '_ {
        self.maps
            .predicate_to_nodes
            .get(&pid)
            .into_iter()
            .flatten()
            .copied()
    }

    pub fn nodes_with_depth(&self, depth: i32) -> impl Iterator<Item = NodeId> + '_ {
        self.maps
            .depth_to_nodes
            .get(&depth)
            .into_iter()
            .flatten()
            .copied()
    }

    pub fn nodes_with_type(&self, ntype: NodeType) -> impl Iterator<Item = NodeId> + '_ {
        self.maps
            .type_to_nodes
            .get(&ntype)
            .into_iter()
            .flatten()
            .copied()
    }

    pub fn nodes_with_term(&self, term: Term) -> impl Iterator<Item = NodeId> + '_ {
        self.maps
            .term_to_nodes
            .get(&term)
            .into_iter()
            .flatten()
            .copied()
    }

    pub fn observations(&self) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = self.nodes_with_type(NodeType::Observation).collect();
        out.sort_unstable();
        out
    }

    pub fn required_nodes(&self) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = self.nodes_with_type(NodeType::Required).collect();
        out.sort_unstable();
        out
    }

    /// The equality sub-node for `t1 = t2`, if it exists.
    pub fn find_sub_node(&self, t1: Term, t2: Term) -> Option<NodeId> {
        self.maps.sub_nodes.get(&sorted_pair(t1, t2)).copied()
    }

    pub fn find_neg_sub_node(&self, t1: Term, t2: Term) -> Option<NodeId> {
        self.maps.neg_sub_nodes.get(&sorted_pair(t1, t2)).copied()
    }

    /// The unification edge joining nodes `i` and `j`, if any.
    pub fn find_unifying_edge(&self, i: NodeId, j: NodeId) -> Option<EdgeId> {
        let key = if i <= j { (i, j) } else { (j, i) };
        self.maps.unify_edge_of_pair.get(&key).copied()
    }

    pub fn hypernodes_with_node(&self, n: NodeId) -> &[HypernodeId] {
        self.maps
            .node_to_hypernodes
            .get(&n)
            .map_or(&[], Vec::as_slice)
    }

    pub fn edges_with_hypernode(&self, h: HypernodeId) -> &[EdgeId] {
        self.maps
            .hypernode_to_edges
            .get(&h)
            .map_or(&[], Vec::as_slice)
    }

    /// Tails of the edges whose head is `h`.
    pub fn parental_hypernodes(&self, h: HypernodeId) -> Vec<HypernodeId> {
        let mut out = Vec::new();
        for &e in self.edges_with_hypernode(h) {
            let edge = &self.edges[e];
            if edge.head() == Some(h) && !out.contains(&edge.tail()) {
                out.push(edge.tail());
            }
        }
        out
    }

    /// Nodes that carry `n` in their evidence set.
    pub fn descendants_of(&self, n: NodeId) -> HashSet<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.evidences.contains(&n))
            .map(|(i, _)| i)
            .collect()
    }

    /// Whether `rule` was already applied to `tail_hn` in this direction.
    pub fn rule_has_applied(&self, rule: RuleId, tail_hn: HypernodeId, backward: bool) -> bool {
        self.logs.applied_rules.contains(&(rule, tail_hn, backward))
    }

    // ---- construction

    /// Add one observed fact. Never fails.
    pub fn add_observation(&mut self, kb: &KnowledgeBase, atom: Atom) -> NodeId {
        self.add_node(kb, atom, NodeType::Observation, 0, HashSet::new())
    }

    /// Add one requirement atom. Never fails.
    pub fn add_required(&mut self, kb: &KnowledgeBase, atom: Atom) -> NodeId {
        self.add_node(kb, atom, NodeType::Required, 0, HashSet::new())
    }

    /// Append a node, update every index, then propose unification
    /// assumptions and mutual-exclusion candidates against the existing
    /// graph.
    fn add_node(
        &mut self,
        kb: &KnowledgeBase,
        atom: Atom,
        ntype: NodeType,
        depth: i32,
        evidences: HashSet<NodeId>,
    ) -> NodeId {
        let id = self.nodes.len();
        self.maps
            .predicate_to_nodes
            .entry(atom.pid())
            .or_default()
            .insert(id);
        self.maps.depth_to_nodes.entry(depth).or_default().insert(id);
        self.maps.type_to_nodes.entry(ntype).or_default().insert(id);
        for &term in atom.terms() {
            self.maps.term_to_nodes.entry(term).or_default().insert(id);
        }
        if atom.is_equality() {
            self.maps.sub_nodes.insert(atom.term_pair(), id);
        } else if atom.is_neg_equality() {
            self.maps.neg_sub_nodes.insert(atom.term_pair(), id);
        }

        let is_equality = atom.is_equality() || atom.is_neg_equality();
        self.nodes.push(Node {
            atom,
            ntype,
            depth,
            master: None,
            evidences,
        });

        if !is_equality {
            self.propose_unifications(kb, id);
            self.generate_mutual_exclusions(kb, id);
        }
        id
    }

    /// Match two atoms, producing the unifier of their differing term pairs.
    /// Fails on predicate/arity/sign mismatch or a distinct constant pair.
    fn check_unifiability(a1: &Atom, a2: &Atom) -> Option<Unifier> {
        if !a1.unifiable_with(a2) {
            return None;
        }
        let mut unifier = Unifier::new();
        for (&t1, &t2) in a1.terms().iter().zip(a2.terms().iter()) {
            if t1 != t2 {
                unifier.add(t1, t2);
            }
        }
        Some(unifier)
    }

    /// Predicate properties may require the governor argument pair of a
    /// right-unique predicate to already be unified before the atoms may
    /// unify. A refused proposal is not marked considered, so it can
    /// succeed once the prerequisite equality exists.
    fn must_postpone(&self, kb: &KnowledgeBase, i: NodeId, j: NodeId) -> bool {
        let pid = self.nodes[i].atom.pid();
        let Some(property) = kb.predicates().property(pid) else {
            return false;
        };
        if !property.is_right_unique() {
            return false;
        }
        let slot = property.governor();
        let t1 = self.nodes[i].atom.term(slot);
        let t2 = self.nodes[j].atom.term(slot);
        t1 != t2 && self.find_sub_node(t1, t2).is_none()
    }

    /// Propose unification between `target` and every node of the same
    /// predicate not yet considered.
    fn propose_unifications(&mut self, kb: &KnowledgeBase, target: NodeId) {
        let pid = self.nodes[target].atom.pid();
        let mut candidates: Vec<NodeId> = self
            .nodes_with_predicate(pid)
            .filter(|&n| n != target)
            .collect();
        candidates.sort_unstable();

        for candidate in candidates {
            let key = if target <= candidate {
                (target, candidate)
            } else {
                (candidate, target)
            };
            if self.logs.considered_unifications.contains(&key) {
                continue;
            }
            let unifier = match Self::check_unifiability(
                &self.nodes[key.0].atom,
                &self.nodes[key.1].atom,
            ) {
                Some(unifier) => unifier,
                None => {
                    // Permanently non-unifiable; never revisit.
                    self.logs.considered_unifications.insert(key);
                    continue;
                }
            };
            if self.must_postpone(kb, key.0, key.1) {
                continue;
            }
            self.logs.considered_unifications.insert(key);
            self.unify_nodes(kb, key.0, key.1, &unifier);
        }
    }

    /// Build the unification edge between `i` and `j`: tail `(i, j)`, head
    /// the equality sub-nodes of the unifier. Identical-term pairs produce
    /// no sub-node; an empty head still consumes an edge index.
    fn unify_nodes(&mut self, kb: &KnowledgeBase, i: NodeId, j: NodeId, unifier: &Unifier) {
        let mut head_nodes = Vec::new();
        for &(t1, t2) in unifier.substitutions() {
            let sub = self.ensure_sub_node(kb, t1, t2, HashSet::from([i, j]));
            head_nodes.push(sub);
        }

        let tail = self.add_hypernode(vec![i, j]);
        let head = if head_nodes.is_empty() {
            None
        } else {
            let h = self.add_hypernode(head_nodes.clone());
            self.unification_hypernodes.insert(h);
            for &n in &head_nodes {
                if self.nodes[n].master.is_none() {
                    self.nodes[n].master = Some(h);
                }
            }
            Some(h)
        };

        let edge = self.add_edge(Edge {
            etype: EdgeType::Unify,
            tail,
            head,
            rule: None,
        });
        let key = if i <= j { (i, j) } else { (j, i) };
        self.maps.unify_edge_of_pair.entry(key).or_insert(edge);
    }

    /// Locate or create the equality sub-node `t1 = t2`, registering the
    /// pair in the variable clusters and materializing the transitive
    /// sub-nodes a cluster merge newly implies.
    fn ensure_sub_node(
        &mut self,
        kb: &KnowledgeBase,
        t1: Term,
        t2: Term,
        evidences: HashSet<NodeId>,
    ) -> NodeId {
        if let Some(existing) = self.find_sub_node(t1, t2) {
            return existing;
        }
        let id = self.add_node(kb, Atom::equality(t1, t2), NodeType::Hypothesis, -1, evidences);
        let induced = self.clusters.add(t1, t2);
        for (a, b) in induced {
            if a.is_constant() && b.is_constant() {
                continue;
            }
            if self.find_sub_node(a, b).is_none() {
                // Transitive equality node: reachable only through the
                // transitivity constraints, hence no master hypernode.
                self.add_node(kb, Atom::equality(a, b), NodeType::Hypothesis, -1, HashSet::new());
            }
        }
        id
    }

    /// Enumerate mutual-exclusion candidates for a fresh node: counter
    /// nodes of the opposite sign, declared inconsistencies, and functional
    /// predicate conflicts. Exclusions with unsatisfiable unifiers are
    /// dropped.
    fn generate_mutual_exclusions(&mut self, kb: &KnowledgeBase, target: NodeId) {
        let atom = self.nodes[target].atom.clone();

        // 1. Same predicate, opposite truth signs.
        let counters: Vec<NodeId> = self
            .nodes_with_predicate(atom.pid())
            .filter(|&n| n != target)
            .filter(|&n| self.nodes[n].atom.truth() != atom.truth())
            .collect();
        for other in counters {
            let other_atom = self.nodes[other].atom.clone();
            let mut unifier = Unifier::new();
            let mut satisfiable = true;
            for (&t1, &t2) in atom.terms().iter().zip(other_atom.terms().iter()) {
                if t1 != t2 {
                    if t1.is_constant() && t2.is_constant() {
                        satisfiable = false;
                        break;
                    }
                    unifier.add(t1, t2);
                }
            }
            if satisfiable {
                self.push_exclusion(target, other, unifier);
            }
        }

        // 2. Explicit inconsistency declarations from the KB.
        for (other_pid, pairs) in kb.predicates().inconsistencies_with(atom.pid()) {
            let others: Vec<NodeId> = self
                .nodes_with_predicate(other_pid)
                .filter(|&n| n != target)
                .collect();
            for other in others {
                let other_atom = self.nodes[other].atom.clone();
                let mut unifier = Unifier::new();
                let mut satisfiable = true;
                for &(i1, i2) in &pairs {
                    let (t1, t2) = (atom.term(i1), other_atom.term(i2));
                    if t1 != t2 {
                        if t1.is_constant() && t2.is_constant() {
                            satisfiable = false;
                            break;
                        }
                        unifier.add(t1, t2);
                    }
                }
                if satisfiable {
                    self.push_exclusion(target, other, unifier);
                }
            }
        }

        // 3. Functional-predicate conflicts: one governor cannot map to two
        //    distinct dependents.
        if let Some(property) = kb.predicates().property(atom.pid()) {
            if property.is_right_unique() {
                let (gov, dep) = (property.governor(), property.dependent());
                let others: Vec<NodeId> = self
                    .nodes_with_predicate(atom.pid())
                    .filter(|&n| n != target)
                    .filter(|&n| self.nodes[n].atom.truth() == atom.truth())
                    .collect();
                for other in others {
                    let other_atom = self.nodes[other].atom.clone();
                    let (d1, d2) = (atom.term(dep), other_atom.term(dep));
                    if d1 == d2 || !(d1.is_constant() && d2.is_constant()) {
                        continue;
                    }
                    let (g1, g2) = (atom.term(gov), other_atom.term(gov));
                    if g1.is_constant() && g2.is_constant() && g1 != g2 {
                        continue;
                    }
                    let mut unifier = Unifier::new();
                    if g1 != g2 {
                        unifier.add(g1, g2);
                    }
                    self.push_exclusion(target, other, unifier);
                }
            }
        }
    }

    fn push_exclusion(&mut self, n1: NodeId, n2: NodeId, unifier: Unifier) {
        let key = if n1 <= n2 { (n1, n2) } else { (n2, n1) };
        if self.logs.considered_exclusions.contains(&key) {
            return;
        }
        self.logs.considered_exclusions.insert(key);
        self.mutual_exclusions.push(MutualExclusion {
            n1: key.0,
            n2: key.1,
            unifier,
        });
    }

    /// Add a hypernode, deduplicating on the hash of the sorted indices.
    pub fn add_hypernode(&mut self, nodes: Vec<NodeId>) -> HypernodeId {
        let mut sorted = nodes.clone();
        sorted.sort_unstable();
        if let Some(&existing) = self.maps.sorted_to_hypernode.get(&sorted) {
            return existing;
        }
        let id = self.hypernodes.len();
        for &n in &nodes {
            self.maps.node_to_hypernodes.entry(n).or_default().push(id);
        }
        self.maps.sorted_to_hypernode.insert(sorted, id);
        self.hypernodes.push(nodes);
        id
    }

    fn add_edge(&mut self, edge: Edge) -> EdgeId {
        let id = self.edges.len();
        self.maps
            .hypernode_to_edges
            .entry(edge.tail())
            .or_default()
            .push(id);
        if let Some(head) = edge.head() {
            self.maps.hypernode_to_edges.entry(head).or_default().push(id);
        }
        self.edges.push(edge);
        id
    }

    /// Apply `rule` to the `tail` nodes, backward (abduction) or forward
    /// (deduction). Returns the head hypernode, or `None` when the chain is
    /// refused: unknown rule, positional mismatch, contradictory head, an
    /// unsatisfiable constant binding, or a repeat application.
    pub fn chain(
        &mut self,
        kb: &KnowledgeBase,
        tail: &[NodeId],
        rule_id: RuleId,
        backward: bool,
    ) -> Option<HypernodeId> {
        if tail.is_empty() {
            return None;
        }
        let rule = match kb.rule(rule_id) {
            Ok(rule) => rule,
            Err(e) => {
                debug!(rule_id, error = %e, "chain refused: rule lookup failed");
                return None;
            }
        };
        let (side_from, side_to) = if backward {
            (rule.rhs(), rule.lhs())
        } else {
            (rule.lhs(), rule.rhs())
        };

        let from_atoms: Vec<&Atom> = side_from.non_equality_atoms().map(|(_, a)| a).collect();
        if from_atoms.len() != tail.len() {
            return None;
        }
        for (&n, rule_atom) in tail.iter().zip(from_atoms.iter()) {
            let node_atom = &self.nodes[n].atom;
            if node_atom.pid() != rule_atom.pid() || node_atom.arity() != rule_atom.arity() {
                return None;
            }
        }

        // Build the partial substitution from rule terms to graph terms.
        // Conflicting bindings become conditional substitutions on the edge;
        // a conflict between two distinct constants refuses the chain.
        let mut subs: HashMap<Term, Term> = HashMap::new();
        let mut require_equal: Vec<(Term, Term)> = Vec::new();
        for (&n, rule_atom) in tail.iter().zip(from_atoms.iter()) {
            let node_atom = &self.nodes[n].atom;
            for (idx, &rule_term) in rule_atom.terms().iter().enumerate() {
                let graph_term = node_atom.term(idx);
                match subs.get(&rule_term) {
                    None => {
                        subs.insert(rule_term, graph_term);
                    }
                    Some(&bound) if bound == graph_term => {}
                    Some(&bound) => {
                        if bound.is_constant() && graph_term.is_constant() {
                            debug!(rule_id, "chain refused: conflicting constant binding");
                            return None;
                        }
                        let pair = sorted_pair(bound, graph_term);
                        if !require_equal.contains(&pair) {
                            require_equal.push(pair);
                        }
                    }
                }
            }
        }

        // Negative equality atoms on the matched side forbid unification of
        // the bound pairs.
        let mut forbid_equal: Vec<(Term, Term)> = Vec::new();
        for atom in side_from.iter().chain(side_to.iter()) {
            if atom.is_neg_equality() {
                let t1 = Self::substitute(atom.term(0), &mut subs);
                let t2 = Self::substitute(atom.term(1), &mut subs);
                if t1 != t2 {
                    let pair = sorted_pair(t1, t2);
                    if !forbid_equal.contains(&pair) {
                        forbid_equal.push(pair);
                    }
                }
            }
        }

        // Instantiate head atoms; rule terms not pinned by the match become
        // fresh unknowns.
        let mut head_atoms: Vec<Atom> = Vec::new();
        for atom in side_to.iter() {
            if atom.is_neg_equality() {
                continue;
            }
            let mut instantiated = atom.clone();
            for idx in 0..instantiated.arity() {
                let t = Self::substitute(instantiated.term(idx), &mut subs);
                instantiated.set_term(idx, t);
            }
            head_atoms.push(instantiated);
        }
        if head_atoms.is_empty() {
            return None;
        }
        // An equality between two distinct constants can never hold; the
        // chain is dropped silently.
        for atom in &head_atoms {
            if atom.is_equality() && atom.term(0).is_constant() && atom.term(1).is_constant() {
                debug!(rule_id, "chain refused: constant equality in head");
                return None;
            }
        }

        // Refuse heads that contradict a tail node outright.
        for atom in &head_atoms {
            for &n in tail {
                let t = &self.nodes[n].atom;
                if t.pid() == atom.pid()
                    && t.truth() != atom.truth()
                    && t.terms() == atom.terms()
                {
                    debug!(rule_id, "chain refused: head contradicts tail");
                    return None;
                }
            }
        }

        let tail_hn = self.add_hypernode(tail.to_vec());
        if self.rule_has_applied(rule_id, tail_hn, backward) {
            return None;
        }

        let mut depth = tail.iter().map(|&n| self.nodes[n].depth).max().unwrap_or(0);
        if depth >= 0 {
            depth += 1;
        }
        let mut evidences: HashSet<NodeId> = tail.iter().copied().collect();
        for &n in tail {
            evidences.extend(self.nodes[n].evidences.iter().copied());
        }

        let mut head_nodes = Vec::with_capacity(head_atoms.len());
        let mut created = Vec::new();
        for atom in head_atoms {
            if atom.is_equality() {
                let (t1, t2) = atom.term_pair();
                let id = self.ensure_sub_node(kb, t1, t2, evidences.clone());
                head_nodes.push(id);
            } else {
                let id = self.add_node(kb, atom, NodeType::Hypothesis, depth, evidences.clone());
                head_nodes.push(id);
                created.push(id);
            }
        }
        let head_hn = self.add_hypernode(head_nodes);
        for n in created {
            if self.nodes[n].master.is_none() {
                self.nodes[n].master = Some(head_hn);
            }
        }

        let etype = if backward {
            EdgeType::Hypothesize
        } else {
            EdgeType::Implicate
        };
        let edge = self.add_edge(Edge {
            etype,
            tail: tail_hn,
            head: Some(head_hn),
            rule: Some(rule_id),
        });
        if !require_equal.is_empty() || !forbid_equal.is_empty() {
            self.chain_conditions.insert(
                edge,
                ChainConditions {
                    require_equal,
                    forbid_equal,
                },
            );
        }
        self.logs.applied_rules.insert((rule_id, tail_hn, backward));

        Some(head_hn)
    }

    fn substitute(term: Term, subs: &mut HashMap<Term, Term>) -> Term {
        if let Some(&mapped) = subs.get(&term) {
            return mapped;
        }
        let fresh = Term::unknown();
        subs.insert(term, fresh);
        fresh
    }
}
