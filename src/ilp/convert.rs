//! Proof-graph to ILP encoding.
//!
//! Walks a completed (possibly timed-out) proof graph and produces one 0/1
//! variable per node, hypernode, and edge plus the constraint families that
//! capture the graph's semantics. With economization on, a hypernode holding
//! a single non-equality node shares that node's variable, and chain/bare
//! unification edges share their head/tail hypernode's variable.

use crate::fol::Term;
use crate::ilp::{Constraint, ConstraintOp, Problem, Variable, VariableId};
use crate::kb::KnowledgeBase;
use crate::pg::{EdgeId, HypernodeId, NodeId, NodeType, ProofGraph};
use crate::timing::PhaseTimer;
use itertools::Itertools;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Supplies per-node objective coefficients.
pub trait CostProvider: Send + Sync {
    fn key(&self) -> &'static str;

    fn node_coefficient(&self, graph: &ProofGraph, node: NodeId) -> f64;
}

/// Reward 1 for every non-equality hypothesis node: fuller explanations win.
pub struct UniformCosts;

impl CostProvider for UniformCosts {
    fn key(&self) -> &'static str {
        "uniform"
    }

    fn node_coefficient(&self, graph: &ProofGraph, node: NodeId) -> f64 {
        let n = graph.node(node);
        if n.node_type() == NodeType::Hypothesis
            && !n.is_equality_node()
            && !n.is_neg_equality_node()
        {
            1.0
        } else {
            0.0
        }
    }
}

/// Reward decays geometrically with depth: shallow explanations win.
pub struct DepthCosts {
    pub decay: f64,
}

impl Default for DepthCosts {
    fn default() -> DepthCosts {
        DepthCosts { decay: 0.5 }
    }
}

impl CostProvider for DepthCosts {
    fn key(&self) -> &'static str {
        "depth"
    }

    fn node_coefficient(&self, graph: &ProofGraph, node: NodeId) -> f64 {
        let n = graph.node(node);
        if n.node_type() != NodeType::Hypothesis || n.is_equality_node() || n.is_neg_equality_node()
        {
            return 0.0;
        }
        let depth = n.depth().max(0) as u32;
        self.decay.powi(depth as i32)
    }
}

/// Penalty on an unsatisfied requirement.
const REQUIREMENT_PENALTY: f64 = 10_000.0;

/// Reward on an active observation node. Observations are strongly
/// preferred rather than hard-pinned: a mutual exclusion between two
/// observed facts must leave the problem satisfiable.
const OBSERVATION_REWARD: f64 = 100.0;

/// The encoder. One instance per inference; holds the economization flag and
/// the cost provider.
pub struct IlpConverter {
    pub economize: bool,
    costs: Box<dyn CostProvider>,
}

impl IlpConverter {
    pub fn new(economize: bool, costs: Box<dyn CostProvider>) -> IlpConverter {
        IlpConverter { economize, costs }
    }

    /// Hook for weight learning. The default converter has nothing to tune.
    pub fn train(&mut self, _system: &crate::ilp::Solution, _gold: &crate::ilp::Solution) {}

    /// Encode `graph` into a problem. Cooperative timeout: when `timer`
    /// expires mid-walk, the problem built so far is returned marked
    /// timed-out.
    pub fn convert(
        &self,
        graph: &ProofGraph,
        kb: &KnowledgeBase,
        timer: &PhaseTimer,
    ) -> Problem {
        let mut problem = Problem::new(graph.name(), true);
        let mut encoder = Encoder {
            graph,
            kb,
            problem: &mut problem,
            economize: self.economize,
            muex_logged: HashSet::new(),
            triple_logged: HashSet::new(),
        };

        encoder.add_node_variables(&*self.costs);
        encoder.add_hypernode_variables();
        encoder.add_edge_variables();
        if timer.expired() {
            encoder.problem.timed_out = true;
            return problem;
        }

        encoder.add_node_master_constraints();
        encoder.add_hypernode_parent_constraints();
        encoder.add_mutual_exclusion_constraints();
        if timer.expired() {
            encoder.problem.timed_out = true;
            return problem;
        }
        encoder.add_transitive_unification_constraints();
        encoder.add_chain_condition_constraints();
        encoder.add_exclusive_chain_constraints();
        encoder.add_cycle_constraints();
        encoder.add_requirement_variables();

        if timer.expired() {
            problem.timed_out = true;
        }
        debug!(
            variables = problem.variables().len(),
            constraints = problem.constraints().len(),
            lazy = problem.lazy_constraints().len(),
            "encoded ILP problem"
        );
        problem
    }
}

struct Encoder<'a> {
    graph: &'a ProofGraph,
    kb: &'a KnowledgeBase,
    problem: &'a mut Problem,
    economize: bool,
    muex_logged: HashSet<(NodeId, NodeId)>,
    triple_logged: HashSet<(Term, Term, Term)>,
}

impl Encoder<'_> {
    fn node_var(&self, n: NodeId) -> Option<VariableId> {
        self.problem.variable_of_node(n)
    }

    fn hypernode_var(&self, h: HypernodeId) -> Option<VariableId> {
        self.problem.variable_of_hypernode(h)
    }

    /// One variable per node, with the cost provider's coefficient plus the
    /// observation reward.
    fn add_node_variables(&mut self, costs: &dyn CostProvider) {
        for (i, node) in self.graph.nodes().iter().enumerate() {
            let mut coefficient = costs.node_coefficient(self.graph, i);
            if node.node_type() == NodeType::Observation {
                coefficient += if self.problem.do_maximize {
                    OBSERVATION_REWARD
                } else {
                    -OBSERVATION_REWARD
                };
            }
            let var = self.problem.add_variable(Variable::new(
                format!("n({i}):{}", node.atom()),
                coefficient,
            ));
            self.problem.bind_node(i, var);
        }
    }

    /// One variable per hypernode, plus the member constraint: the hypernode
    /// is true iff all its member nodes are. A singleton hypernode over a
    /// non-equality node shares the node's variable when economizing.
    fn add_hypernode_variables(&mut self) {
        for (h, members) in self.graph.hypernodes().iter().enumerate() {
            if members.is_empty() {
                continue;
            }
            if self.economize && members.len() == 1 {
                let node = self.graph.node(members[0]);
                if !node.is_equality_node() && !node.is_neg_equality_node() {
                    if let Some(var) = self.node_var(members[0]) {
                        self.problem.bind_hypernode(h, var);
                        continue;
                    }
                }
            }

            let var = self
                .problem
                .add_variable(Variable::new(format!("hn({h})"), 0.0));
            self.problem.bind_hypernode(h, var);

            let mut constraint = Constraint::new(
                format!("hn_n_dependency:hn({h})"),
                ConstraintOp::Range(0.0, (members.len() - 1) as f64),
            );
            for &n in members {
                if let Some(v) = self.node_var(n) {
                    constraint.add_term(v, 1.0);
                }
            }
            constraint.add_term(var, -(members.len() as f64));
            self.problem.add_constraint(constraint);
        }
    }

    /// One variable per edge, plus the endpoint constraint. When economizing,
    /// a chain edge shares its head hypernode's variable and a headless
    /// unification edge shares its tail's.
    fn add_edge_variables(&mut self) {
        for (e, edge) in self.graph.edges().iter().enumerate() {
            if self.economize {
                let shared = if edge.is_chain_edge() {
                    edge.head().and_then(|h| self.hypernode_var(h))
                } else if edge.head().is_none() {
                    self.hypernode_var(edge.tail())
                } else {
                    None
                };
                if let Some(var) = shared {
                    self.problem.bind_edge(e, var);
                    continue;
                }
            }

            let var = self
                .problem
                .add_variable(Variable::new(format!("edge({e})"), 0.0));
            self.problem.bind_edge(e, var);

            let tail_var = self.hypernode_var(edge.tail());
            let head_var = edge.head().and_then(|h| self.hypernode_var(h));
            if let Some(tail_var) = tail_var {
                if head_var.is_some() || edge.head().is_none() {
                    let mut constraint = Constraint::new(
                        format!("e_hn_dependency:e({e})"),
                        ConstraintOp::GreaterEq(0.0),
                    );
                    constraint.add_term(tail_var, 1.0);
                    let mut count = 1.0;
                    if let Some(head_var) = head_var {
                        constraint.add_term(head_var, 1.0);
                        count += 1.0;
                    }
                    constraint.add_term(var, -count);
                    self.problem.add_constraint(constraint);
                }
            }
        }
    }

    /// A node implies at least one of its master hypernodes. Non-equality
    /// nodes have the hypernode that introduced them; equality sub-nodes are
    /// owned by every unification head they appear under.
    fn add_node_master_constraints(&mut self) {
        for (i, node) in self.graph.nodes().iter().enumerate() {
            if node.node_type() != NodeType::Hypothesis {
                continue;
            }
            let Some(node_var) = self.node_var(i) else { continue };

            let mut masters: Vec<HypernodeId> = Vec::new();
            if node.is_equality_node() || node.is_neg_equality_node() {
                for &h in self.graph.hypernodes_with_node(i) {
                    for &e in self.graph.edges_with_hypernode(h) {
                        let edge = self.graph.edge(e);
                        if edge.head() == Some(h) && !masters.contains(&h) {
                            masters.push(h);
                        }
                    }
                }
            } else if let Some(master) = node.master_hypernode() {
                masters.push(master);
            }

            let mut constraint =
                Constraint::new(format!("n_dependency:n({i})"), ConstraintOp::GreaterEq(0.0));
            for h in masters {
                if let Some(v) = self.hypernode_var(h) {
                    if v != node_var {
                        constraint.add_term(v, 1.0);
                    }
                }
            }
            if constraint.is_empty() {
                continue;
            }
            constraint.add_term(node_var, -1.0);
            self.problem.add_constraint(constraint);
        }
    }

    /// A hypernode implies at least one parent hypernode.
    fn add_hypernode_parent_constraints(&mut self) {
        for h in 0..self.graph.hypernodes().len() {
            let Some(var) = self.hypernode_var(h) else { continue };
            let parents = self.graph.parental_hypernodes(h);
            if parents.is_empty() {
                continue;
            }
            let mut constraint = Constraint::new(
                format!("hn_dependency:hn({h})"),
                ConstraintOp::GreaterEq(0.0),
            );
            constraint.add_term(var, -1.0);
            let mut added = false;
            for parent in parents {
                if let Some(v) = self.hypernode_var(parent) {
                    constraint.add_term(v, 1.0);
                    added = true;
                }
            }
            if added {
                self.problem.add_constraint(constraint);
            }
        }
    }

    /// `n1 + n2 + sum(sub) <= 1 + |sub|` per recorded exclusion; the sub
    /// variables are the equality nodes the exclusion's unifier forces true.
    /// Exclusions whose unifier cannot be represented are dropped.
    fn add_mutual_exclusion_constraints(&mut self) {
        for exclusion in self.graph.mutual_exclusions() {
            let key = (exclusion.n1.min(exclusion.n2), exclusion.n1.max(exclusion.n2));
            if self.muex_logged.contains(&key) {
                continue;
            }
            let (Some(v1), Some(v2)) = (self.node_var(exclusion.n1), self.node_var(exclusion.n2))
            else {
                continue;
            };

            let mut constraint = Constraint::new(
                format!("inconsistency:n({},{})", exclusion.n1, exclusion.n2),
                ConstraintOp::LessEq(1.0),
            );
            constraint.add_term(v1, 1.0);
            constraint.add_term(v2, 1.0);

            let mut bound = 1.0;
            let mut representable = true;
            for &(t1, t2) in exclusion.unifier.substitutions() {
                if t1.is_constant() && t2.is_constant() {
                    representable = false;
                    break;
                }
                let Some(sub) = self.graph.find_sub_node(t1, t2) else {
                    representable = false;
                    break;
                };
                let Some(sub_var) = self.node_var(sub) else {
                    representable = false;
                    break;
                };
                constraint.add_term(sub_var, 1.0);
                bound += 1.0;
            }
            if !representable {
                continue;
            }
            constraint.set_op(ConstraintOp::LessEq(bound));
            self.muex_logged.insert(key);
            self.problem.add_constraint(constraint);
        }
    }

    /// For every term triple in one variable cluster, the three transitivity
    /// constraints, marked lazy for cutting-plane inference.
    fn add_transitive_unification_constraints(&mut self) {
        let clusters: Vec<Vec<Term>> = self
            .graph
            .clusters()
            .clusters()
            .filter(|c| c.len() > 2)
            .map(<[Term]>::to_vec)
            .collect();
        for cluster in clusters {
            let mut terms = cluster;
            terms.sort_unstable();
            for (t1, t2, t3) in terms.iter().copied().tuple_combinations() {
                self.add_transitivity_triple(t1, t2, t3);
            }
        }
    }

    fn add_transitivity_triple(&mut self, t1: Term, t2: Term, t3: Term) {
        if self.triple_logged.contains(&(t1, t2, t3)) {
            return;
        }
        let vars = [
            self.graph.find_sub_node(t1, t2).and_then(|n| self.node_var(n)),
            self.graph.find_sub_node(t2, t3).and_then(|n| self.node_var(n)),
            self.graph.find_sub_node(t1, t3).and_then(|n| self.node_var(n)),
        ];
        let [Some(v12), Some(v23), Some(v13)] = vars else {
            return;
        };

        // (t1=t2) + (t2=t3) - (t1=t3) <= 1, and permutations.
        let patterns = [
            (v12, v23, v13),
            (v23, v13, v12),
            (v13, v12, v23),
        ];
        for (a, b, implied) in patterns {
            let mut constraint = Constraint::new(
                format!("transitivity:({t1},{t2},{t3})"),
                ConstraintOp::GreaterEq(-1.0),
            );
            constraint.add_term(implied, 1.0);
            constraint.add_term(a, -1.0);
            constraint.add_term(b, -1.0);
            let id = self.problem.add_constraint(constraint);
            self.problem.mark_lazy(id);
        }
        self.triple_logged.insert((t1, t2, t3));
    }

    /// Conditional substitutions attached to chain edges. Unsatisfiable
    /// positive conditions pin the edge variable to 0.
    fn add_chain_condition_constraints(&mut self) {
        for e in 0..self.graph.edges().len() {
            let edge = self.graph.edge(e);
            if !edge.is_chain_edge() {
                continue;
            }
            let Some(conditions) = self.graph.chain_conditions(e) else {
                continue;
            };
            let Some(edge_var) = self.problem.variable_of_edge(e) else {
                continue;
            };

            let mut positive_vars = Vec::new();
            let mut available = true;
            for &(t1, t2) in &conditions.require_equal {
                if t1.is_constant() && t2.is_constant() && t1 != t2 {
                    available = false;
                    break;
                }
                match self.graph.find_sub_node(t1, t2).and_then(|n| self.node_var(n)) {
                    Some(v) => positive_vars.push(v),
                    None => {
                        available = false;
                        break;
                    }
                }
            }
            if !available {
                // The chain can never fire; force its edge off.
                self.problem.set_constant(edge_var, 0.0);
                continue;
            }

            if !positive_vars.is_empty() {
                let mut constraint = Constraint::new(
                    format!("chain_conditions_pos:e({e})"),
                    ConstraintOp::GreaterEq(0.0),
                );
                for v in &positive_vars {
                    constraint.add_term(*v, 1.0);
                }
                constraint.add_term(edge_var, -(positive_vars.len() as f64));
                self.problem.add_constraint(constraint);
            }

            let negative_vars: Vec<VariableId> = conditions
                .forbid_equal
                .iter()
                .filter_map(|&(t1, t2)| {
                    self.graph.find_sub_node(t1, t2).and_then(|n| self.node_var(n))
                })
                .collect();
            if !negative_vars.is_empty() {
                let count = negative_vars.len() as f64;
                let mut constraint = Constraint::new(
                    format!("chain_conditions_neg:e({e})"),
                    ConstraintOp::GreaterEq(-count),
                );
                for v in negative_vars {
                    constraint.add_term(v, -1.0);
                }
                constraint.add_term(edge_var, -count);
                self.problem.add_constraint(constraint);
            }
        }
    }

    /// Edges whose rules share a group tag and start at the same tail
    /// hypernode: at most one may be active.
    fn add_exclusive_chain_constraints(&mut self) {
        let mut grouped: HashMap<(HypernodeId, String), Vec<EdgeId>> = HashMap::new();
        for (e, edge) in self.graph.edges().iter().enumerate() {
            if !edge.is_chain_edge() {
                continue;
            }
            let Some(rule) = edge.rule() else { continue };
            for tag in self.kb.groups_of_rule(rule) {
                grouped
                    .entry((edge.tail(), tag.clone()))
                    .or_default()
                    .push(e);
            }
        }

        for ((tail, tag), edges) in grouped {
            if edges.len() < 2 {
                continue;
            }
            let vars: Vec<VariableId> = edges
                .iter()
                .filter_map(|&e| {
                    self.graph
                        .edge(e)
                        .head()
                        .and_then(|h| self.hypernode_var(h))
                })
                .collect();
            if vars.len() != edges.len() {
                continue;
            }
            let mut constraint = Constraint::new(
                format!("exclusive_chains:hn({tail}):{tag}"),
                ConstraintOp::LessEq(1.0),
            );
            for v in vars {
                constraint.add_term(v, 1.0);
            }
            self.problem.add_constraint(constraint);
        }
    }

    /// Cycle and self-reference avoidance around unification edges: a node
    /// explained away by unification may not chain, and two unifications
    /// that would close an explanatory loop may not both be active.
    fn add_cycle_constraints(&mut self) {
        for e in 0..self.graph.edges().len() {
            let edge = self.graph.edge(e);
            if !edge.is_unify_edge() {
                continue;
            }
            let tail_members = self.graph.hypernode(edge.tail()).to_vec();
            if tail_members.len() != 2 {
                continue;
            }
            // The deeper tail node is the one being explained; ties break on
            // the node index.
            let (a, b) = (tail_members[0], tail_members[1]);
            let explained = {
                let (da, db) = (self.graph.node(a).depth(), self.graph.node(b).depth());
                if da > db || (da == db && a > b) {
                    a
                } else {
                    b
                }
            };
            let explains = if explained == a { b } else { a };

            self.forbid_chaining_from_explained(e, explained);
            self.forbid_looping_unification(e, explains, explained);
        }
    }

    fn unify_edge_vars(&self, e: EdgeId) -> Option<Vec<VariableId>> {
        let edge = self.graph.edge(e);
        let tail_var = self.hypernode_var(edge.tail())?;
        let mut vars = vec![tail_var];
        if let Some(head) = edge.head() {
            let head_var = self.hypernode_var(head)?;
            if head_var != tail_var {
                vars.push(head_var);
            }
        }
        Some(vars)
    }

    fn forbid_chaining_from_explained(&mut self, unify_edge: EdgeId, explained: NodeId) {
        let Some(unify_vars) = self.unify_edge_vars(unify_edge) else {
            return;
        };
        let mut chains: Vec<EdgeId> = Vec::new();
        for &h in self.graph.hypernodes_with_node(explained) {
            for &e in self.graph.edges_with_hypernode(h) {
                let edge = self.graph.edge(e);
                if edge.is_chain_edge() && edge.tail() == h && !chains.contains(&e) {
                    chains.push(e);
                }
            }
        }

        for chain_edge in chains {
            let Some(head_var) = self
                .graph
                .edge(chain_edge)
                .head()
                .and_then(|h| self.hypernode_var(h))
            else {
                continue;
            };
            let mut constraint = Constraint::new(
                format!("unify_or_chain:e({unify_edge}):e({chain_edge})"),
                ConstraintOp::GreaterEq(-(unify_vars.len() as f64)),
            );
            constraint.add_term(head_var, -1.0);
            for &v in &unify_vars {
                constraint.add_term(v, -1.0);
            }
            self.problem.add_constraint(constraint);
        }
    }

    fn forbid_looping_unification(
        &mut self,
        unify_edge: EdgeId,
        explains: NodeId,
        explained: NodeId,
    ) {
        let Some(unify_vars) = self.unify_edge_vars(unify_edge) else {
            return;
        };

        let mut descendants = self.graph.descendants_of(explains);
        descendants.insert(explains);
        let mut ancestors: HashSet<NodeId> =
            self.graph.node(explained).evidences().iter().copied().collect();
        ancestors.insert(explained);

        let mut by_pid_desc: HashMap<u32, Vec<NodeId>> = HashMap::new();
        for &n in &descendants {
            by_pid_desc
                .entry(self.graph.node(n).atom().pid())
                .or_default()
                .push(n);
        }

        for &n2 in &ancestors {
            let pid = self.graph.node(n2).atom().pid();
            let Some(others) = by_pid_desc.get(&pid) else { continue };
            for &n1 in others {
                let Some(other_edge) = self.graph.find_unifying_edge(n1, n2) else {
                    continue;
                };
                if other_edge == unify_edge {
                    continue;
                }
                let Some(other_vars) = self.unify_edge_vars(other_edge) else {
                    continue;
                };
                let mut all_vars = unify_vars.clone();
                for v in other_vars {
                    if !all_vars.contains(&v) {
                        all_vars.push(v);
                    }
                }
                let mut constraint = Constraint::new(
                    format!("muex_unify:e({unify_edge},{other_edge})"),
                    ConstraintOp::GreaterEq(-((all_vars.len() as f64) - 1.0)),
                );
                for v in all_vars {
                    constraint.add_term(v, -1.0);
                }
                self.problem.add_constraint(constraint);
            }
        }
    }

    /// Requirements: a violation variable with a large penalty, plus a
    /// constraint forcing a supporting unification or the violation.
    fn add_requirement_variables(&mut self) {
        let penalty = if self.problem.do_maximize {
            -REQUIREMENT_PENALTY
        } else {
            REQUIREMENT_PENALTY
        };
        for r in self.graph.required_nodes() {
            let atom = self.graph.node(r).atom().clone();
            let mut support: Vec<VariableId> = Vec::new();

            if atom.is_equality() {
                if let Some(v) = self.node_var(r) {
                    support.push(v);
                }
            } else {
                let candidates: Vec<NodeId> = self
                    .graph
                    .nodes_with_predicate(atom.pid())
                    .filter(|&n| n != r)
                    .filter(|&n| self.graph.node(n).node_type() != NodeType::Required)
                    .collect();
                for n in candidates {
                    let Some(e) = self.graph.find_unifying_edge(r, n) else {
                        continue;
                    };
                    let edge = self.graph.edge(e);
                    let var = match edge.head() {
                        Some(h) => self.hypernode_var(h),
                        None => self.problem.variable_of_edge(e),
                    };
                    if let Some(v) = var {
                        if !support.contains(&v) {
                            support.push(v);
                        }
                    }
                }
            }

            let violation = self
                .problem
                .add_variable(Variable::new(format!("violation:n({r})"), penalty));
            let mut constraint = Constraint::new(
                format!("for_requirement:n({r})"),
                ConstraintOp::GreaterEq(1.0),
            );
            for v in support {
                constraint.add_term(v, 1.0);
            }
            constraint.add_term(violation, 1.0);
            self.problem.add_constraint(constraint);
            self.problem.bind_requirement(r, violation);
        }
    }
}
