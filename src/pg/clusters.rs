//! Variable clusters: a union-find over terms unified so far.
//!
//! Merging two clusters must report every newly induced term pair so the
//! graph can materialize the transitive equality sub-nodes the merge implies.

use crate::fol::Term;
use std::collections::HashMap;

/// Disjoint-set forest over terms, with member lists kept at each root.
#[derive(Debug, Default)]
pub struct VariableClusters {
    parent: HashMap<Term, Term>,
    members: HashMap<Term, Vec<Term>>,
}

impl VariableClusters {
    pub fn new() -> VariableClusters {
        VariableClusters::default()
    }

    fn find(&self, t: Term) -> Option<Term> {
        let mut current = *self.parent.get(&t)?;
        while let Some(&next) = self.parent.get(&current) {
            if next == current {
                break;
            }
            current = next;
        }
        Some(current)
    }

    fn ensure(&mut self, t: Term) -> Term {
        if let Some(root) = self.find(t) {
            return root;
        }
        self.parent.insert(t, t);
        self.members.insert(t, vec![t]);
        t
    }

    pub fn contains(&self, t: Term) -> bool {
        self.parent.contains_key(&t)
    }

    pub fn in_same_cluster(&self, t1: Term, t2: Term) -> bool {
        match (self.find(t1), self.find(t2)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Record that `t1` and `t2` are unifiable. Returns every cross pair the
    /// merge newly establishes, `(t1, t2)` included; empty when the terms
    /// already share a cluster.
    pub fn add(&mut self, t1: Term, t2: Term) -> Vec<(Term, Term)> {
        let r1 = self.ensure(t1);
        let r2 = self.ensure(t2);
        if r1 == r2 {
            return Vec::new();
        }

        // Merge the smaller cluster into the larger.
        let (root, absorbed) = if self.members[&r1].len() >= self.members[&r2].len() {
            (r1, r2)
        } else {
            (r2, r1)
        };
        let absorbed_members = self.members.remove(&absorbed).unwrap_or_default();
        let mut induced = Vec::new();
        {
            let root_members = self.members.entry(root).or_default();
            for &a in root_members.iter() {
                for &b in &absorbed_members {
                    induced.push((a, b));
                }
            }
            root_members.extend(absorbed_members.iter().copied());
        }
        for t in absorbed_members {
            self.parent.insert(t, root);
        }
        self.parent.insert(absorbed, root);
        induced
    }

    /// Member list of the cluster containing `t`.
    pub fn cluster_of(&self, t: Term) -> Option<&[Term]> {
        let root = self.find(t)?;
        self.members.get(&root).map(Vec::as_slice)
    }

    /// All clusters, as member slices.
    pub fn clusters(&self) -> impl Iterator<Item = &[Term]> {
        self.members.values().map(Vec::as_slice)
    }
}
