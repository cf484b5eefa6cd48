//! Predicates, predicate properties, and the predicate library.
//!
//! Predicates are `(identifier, arity)` pairs registered in a library that
//! assigns dense numeric ids. Id 0 is reserved as invalid and id 1 for the
//! equality predicate `=/2`. Ids are assigned at knowledge-base compilation
//! time and preserved on disk, so query mode sees the exact same numbering.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::warn;

/// Dense predicate identifier.
pub type PredicateId = u32;

/// Reserved id for invalid predicates. Never attached to a valid atom.
pub const INVALID_PREDICATE_ID: PredicateId = 0;

/// Reserved id of the equality predicate `=/2`.
pub const EQ_PREDICATE_ID: PredicateId = 1;

/// A predicate: an identifier together with its arity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Predicate {
    name: String,
    arity: u8,
}

impl Predicate {
    pub fn new(name: &str, arity: u8) -> Predicate {
        Predicate {
            name: name.to_string(),
            arity,
        }
    }

    /// Parse the `name/arity` printable form.
    pub fn parse(s: &str) -> Option<Predicate> {
        let (name, arity) = s.rsplit_once('/')?;
        let arity: u8 = arity.parse().ok()?;
        Some(Predicate::new(name, arity))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> u8 {
        self.arity
    }

    /// A predicate is good iff its name is non-empty and its arity is >= 1.
    pub fn good(&self) -> bool {
        !self.name.is_empty() && self.arity >= 1
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.arity)
    }
}

/// Per-predicate property flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PropertyFlag {
    Irreflexive,
    Symmetric,
    Asymmetric,
    Transitive,
    RightUnique,
}

impl PropertyFlag {
    pub fn code(self) -> u8 {
        match self {
            PropertyFlag::Irreflexive => 1,
            PropertyFlag::Symmetric => 2,
            PropertyFlag::Asymmetric => 3,
            PropertyFlag::Transitive => 4,
            PropertyFlag::RightUnique => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<PropertyFlag> {
        match code {
            1 => Some(PropertyFlag::Irreflexive),
            2 => Some(PropertyFlag::Symmetric),
            3 => Some(PropertyFlag::Asymmetric),
            4 => Some(PropertyFlag::Transitive),
            5 => Some(PropertyFlag::RightUnique),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Option<PropertyFlag> {
        match s {
            "irreflexive" => Some(PropertyFlag::Irreflexive),
            "symmetric" => Some(PropertyFlag::Symmetric),
            "asymmetric" => Some(PropertyFlag::Asymmetric),
            "transitive" => Some(PropertyFlag::Transitive),
            "right-unique" | "right_unique" => Some(PropertyFlag::RightUnique),
            _ => None,
        }
    }
}

/// Unifiability class of one argument slot, derived from the property flags.
/// Limited slots prune useless unification proposals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unifiability {
    /// The slot pair must already be unified (`*`).
    StronglyLimited,
    /// At least one weakly-limited slot pair must already be unified (`+`).
    WeaklyLimited,
    /// No prerequisite (`.`).
    Unlimited,
}

/// Properties of one predicate plus the unifiability classes they derive.
#[derive(Debug, Clone)]
pub struct PredicateProperty {
    pid: PredicateId,
    flags: BTreeSet<PropertyFlag>,
    unifiability: Vec<Unifiability>,
}

impl PredicateProperty {
    pub fn new(pid: PredicateId, arity: u8, flags: BTreeSet<PropertyFlag>) -> PredicateProperty {
        let mut property = PredicateProperty {
            pid,
            flags,
            unifiability: Vec::new(),
        };
        property.assign_unifiability(arity);
        property
    }

    pub fn pid(&self) -> PredicateId {
        self.pid
    }

    pub fn flags(&self) -> &BTreeSet<PropertyFlag> {
        &self.flags
    }

    pub fn unifiability(&self) -> &[Unifiability] {
        &self.unifiability
    }

    pub fn is_irreflexive(&self) -> bool {
        self.flags.contains(&PropertyFlag::Irreflexive)
    }

    pub fn is_symmetric(&self) -> bool {
        self.flags.contains(&PropertyFlag::Symmetric)
    }

    pub fn is_asymmetric(&self) -> bool {
        self.flags.contains(&PropertyFlag::Asymmetric)
    }

    pub fn is_transitive(&self) -> bool {
        self.flags.contains(&PropertyFlag::Transitive)
    }

    pub fn is_right_unique(&self) -> bool {
        self.flags.contains(&PropertyFlag::RightUnique)
    }

    /// Argument slot of the governing term of a functional predicate.
    /// Ternary predicates relate their 2nd and 3rd terms; the 1st term is a
    /// variable of the relation itself.
    pub fn governor(&self) -> usize {
        if self.unifiability.len() == 3 {
            1
        } else {
            0
        }
    }

    /// Argument slot of the dependent term of a functional predicate.
    pub fn dependent(&self) -> usize {
        if self.unifiability.len() == 3 {
            2
        } else {
            1
        }
    }

    /// Symmetric + asymmetric and symmetric + right-unique are contradictory.
    pub fn good(&self) -> bool {
        self.pid != INVALID_PREDICATE_ID
            && !(self.is_symmetric() && self.is_asymmetric())
            && !(self.is_symmetric() && self.is_right_unique())
    }

    fn assign_unifiability(&mut self, arity: u8) {
        self.unifiability = match (arity, self.is_right_unique()) {
            (2, true) => vec![Unifiability::StronglyLimited, Unifiability::Unlimited],
            (2, false) => vec![Unifiability::WeaklyLimited, Unifiability::WeaklyLimited],
            (3, true) => vec![
                Unifiability::Unlimited,
                Unifiability::StronglyLimited,
                Unifiability::Unlimited,
            ],
            (3, false) => vec![
                Unifiability::Unlimited,
                Unifiability::WeaklyLimited,
                Unifiability::WeaklyLimited,
            ],
            _ => vec![Unifiability::Unlimited; arity as usize],
        };
    }
}

/// Argument index pairs that co-refer between two mutually exclusive
/// predicates, e.g. `(xor (p x) (q x))` records the pair `(0, 0)`.
pub type InconsistencyPairs = Vec<(usize, usize)>;

/// The registry of predicates, their properties, and declared inconsistencies.
///
/// Filled during knowledge-base compilation, frozen during query. `add` is
/// idempotent; invalid predicates are rejected with a warning.
#[derive(Debug, Default)]
pub struct PredicateLibrary {
    predicates: Vec<Predicate>,
    name_to_id: HashMap<String, PredicateId>,
    properties: HashMap<PredicateId, PredicateProperty>,
    inconsistencies: HashMap<(PredicateId, PredicateId), InconsistencyPairs>,
}

impl PredicateLibrary {
    pub fn new() -> PredicateLibrary {
        let mut library = PredicateLibrary::default();
        library.push(Predicate::new("", 0));
        library.push(Predicate::new("=", 2));
        library
    }

    fn push(&mut self, predicate: Predicate) -> PredicateId {
        let id = self.predicates.len() as PredicateId;
        self.name_to_id.insert(predicate.to_string(), id);
        self.predicates.push(predicate);
        id
    }

    /// Register a predicate and return its id. Returns the existing id if the
    /// predicate is already present; rejects bad predicates with
    /// [`INVALID_PREDICATE_ID`].
    pub fn add(&mut self, predicate: Predicate) -> PredicateId {
        if !predicate.good() {
            warn!(predicate = %predicate, "ignoring invalid predicate");
            return INVALID_PREDICATE_ID;
        }
        if let Some(&id) = self.name_to_id.get(&predicate.to_string()) {
            return id;
        }
        self.push(predicate)
    }

    /// Register or overwrite the property entry for a predicate.
    pub fn add_property(&mut self, property: PredicateProperty) {
        if !property.good() {
            warn!(pid = property.pid(), "ignoring contradictory predicate property");
            return;
        }
        self.properties.insert(property.pid(), property);
    }

    /// Declare two predicates mutually exclusive when the given argument
    /// pairs co-refer. The pair key is canonicalized ascending.
    pub fn add_inconsistency(
        &mut self,
        pid1: PredicateId,
        pid2: PredicateId,
        mut pairs: InconsistencyPairs,
    ) {
        if pid1 == INVALID_PREDICATE_ID || pid2 == INVALID_PREDICATE_ID {
            return;
        }
        let key = if pid1 <= pid2 {
            (pid1, pid2)
        } else {
            pairs = pairs.into_iter().map(|(a, b)| (b, a)).collect();
            (pid2, pid1)
        };
        self.inconsistencies.insert(key, pairs);
    }

    pub fn id_of(&self, predicate: &Predicate) -> Option<PredicateId> {
        self.name_to_id.get(&predicate.to_string()).copied()
    }

    pub fn id_of_str(&self, name_with_arity: &str) -> Option<PredicateId> {
        self.name_to_id.get(name_with_arity).copied()
    }

    pub fn predicate(&self, pid: PredicateId) -> Option<&Predicate> {
        self.predicates.get(pid as usize)
    }

    pub fn arity(&self, pid: PredicateId) -> Option<u8> {
        self.predicate(pid).map(Predicate::arity)
    }

    pub fn property(&self, pid: PredicateId) -> Option<&PredicateProperty> {
        self.properties.get(&pid)
    }

    pub fn is_functional(&self, pid: PredicateId) -> bool {
        self.property(pid).is_some_and(PredicateProperty::is_right_unique)
    }

    /// Inconsistency pairs for `(pid1, pid2)`, oriented so the first index of
    /// each pair refers to `pid1`.
    pub fn inconsistency(&self, pid1: PredicateId, pid2: PredicateId) -> Option<InconsistencyPairs> {
        if pid1 <= pid2 {
            self.inconsistencies.get(&(pid1, pid2)).cloned()
        } else {
            self.inconsistencies
                .get(&(pid2, pid1))
                .map(|pairs| pairs.iter().map(|&(a, b)| (b, a)).collect())
        }
    }

    /// Predicates inconsistent with `pid`, with oriented pairs.
    pub fn inconsistencies_with(
        &self,
        pid: PredicateId,
    ) -> Vec<(PredicateId, InconsistencyPairs)> {
        let mut out = Vec::new();
        for (&(p1, p2), pairs) in &self.inconsistencies {
            if p1 == pid {
                out.push((p2, pairs.clone()));
            } else if p2 == pid {
                out.push((p1, pairs.iter().map(|&(a, b)| (b, a)).collect()));
            }
        }
        out
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn properties(&self) -> impl Iterator<Item = &PredicateProperty> {
        self.properties.values()
    }

    pub fn inconsistencies(
        &self,
    ) -> impl Iterator<Item = (&(PredicateId, PredicateId), &InconsistencyPairs)> {
        self.inconsistencies.iter()
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        // The two reserved entries are always present.
        self.predicates.len() <= 2
    }
}
