//! Term unifiers.

use crate::fol::{Atom, Term};
use std::collections::HashMap;
use std::fmt;

/// A set of term substitutions discovered by matching two atoms. Each
/// unification is one-to-one: `(x = y)` and `(x = z)` cannot coexist in one
/// unifier.
#[derive(Debug, Clone, Default)]
pub struct Unifier {
    substitutions: Vec<(Term, Term)>,
    mapping: HashMap<Term, Term>,
}

impl Unifier {
    pub fn new() -> Unifier {
        Unifier::default()
    }

    /// Record that `x` unifies with `y`. Identical terms are not recorded.
    pub fn add(&mut self, x: Term, y: Term) {
        if x == y || self.mapping.contains_key(&x) {
            return;
        }
        self.substitutions.push((x, y));
        self.mapping.insert(x, y);
    }

    /// The term `x` is mapped to, if any.
    pub fn map(&self, x: Term) -> Option<Term> {
        self.mapping.get(&x).copied()
    }

    pub fn substitutions(&self) -> &[(Term, Term)] {
        &self.substitutions
    }

    pub fn is_empty(&self) -> bool {
        self.substitutions.is_empty()
    }

    /// Substitute the mapped terms in `atom`, e.g. `(x = y) & p(x)` becomes
    /// `p(y)`.
    pub fn apply(&self, atom: &mut Atom) {
        for i in 0..atom.arity() {
            if let Some(mapped) = self.map(atom.term(i)) {
                atom.set_term(i, mapped);
            }
        }
    }

    /// Whether any substitution pairs two distinct constants, which can
    /// never hold.
    pub fn is_satisfiable(&self) -> bool {
        self.substitutions
            .iter()
            .all(|&(a, b)| a.can_unify_with(b))
    }
}

impl fmt::Display for Unifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (a, b)) in self.substitutions.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{a}={b}")?;
        }
        write!(f, "}}")
    }
}
