//! Conjunctions of atoms and their pattern features.

use crate::fol::atom::Atom;
use crate::fol::predicate::PredicateId;
use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};

/// A position inside a conjunction: `(atom index, term index)`.
pub type TermPos = (u8, u8);

/// The lookup key a conjunction contributes to the pattern index: the sorted
/// predicate ids of its non-equality atoms plus the positions of hard terms
/// (one term occurring in two distinct slots).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Feature {
    pub pids: Vec<PredicateId>,
    pub hard_terms: Vec<(TermPos, TermPos)>,
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, pid) in self.pids.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{pid}")?;
        }
        write!(f, "]")
    }
}

/// An ordered sequence of atoms with an optional free-form parameter string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Conjunction {
    atoms: Vec<Atom>,
    param: String,
}

impl Conjunction {
    pub fn new(atoms: Vec<Atom>) -> Conjunction {
        Conjunction {
            atoms,
            param: String::new(),
        }
    }

    pub fn param(&self) -> &str {
        &self.param
    }

    pub fn set_param(&mut self, param: &str) {
        self.param = param.to_string();
    }

    /// Atoms that are not equality atoms, in order, with their indices.
    pub fn non_equality_atoms(&self) -> impl Iterator<Item = (usize, &Atom)> {
        self.atoms
            .iter()
            .enumerate()
            .filter(|(_, a)| !a.is_equality() && !a.is_neg_equality())
    }

    /// The multiset of predicate ids of the non-equality atoms, sorted, plus
    /// hard-term pair positions.
    pub fn feature(&self) -> Feature {
        let mut pids: Vec<PredicateId> =
            self.non_equality_atoms().map(|(_, a)| a.pid()).collect();
        pids.sort_unstable();

        // A hard term is one term pinning two argument slots together.
        let mut seen: HashMap<crate::fol::Term, TermPos> = HashMap::new();
        let mut hard_terms = Vec::new();
        for (ai, atom) in self.non_equality_atoms() {
            for (ti, &term) in atom.terms().iter().enumerate() {
                let pos = (ai as u8, ti as u8);
                if let Some(&first) = seen.get(&term) {
                    hard_terms.push((first, pos));
                } else {
                    seen.insert(term, pos);
                }
            }
        }
        hard_terms.sort_unstable();

        Feature { pids, hard_terms }
    }
}

impl Deref for Conjunction {
    type Target = Vec<Atom>;

    fn deref(&self) -> &Vec<Atom> {
        &self.atoms
    }
}

impl DerefMut for Conjunction {
    fn deref_mut(&mut self) -> &mut Vec<Atom> {
        &mut self.atoms
    }
}
