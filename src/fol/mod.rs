//! # First-Order Logic Model
//!
//! Terms, predicates, atoms, conjunctions, and rules. This is the leaf layer
//! of the engine: the knowledge base persists these types, the proof graph
//! instantiates them, and the ILP encoder only ever sees their ids.

mod atom;
mod conjunction;
mod predicate;
mod rule;
mod term;

pub use atom::Atom;
pub use conjunction::{Conjunction, Feature, TermPos};
pub use predicate::{
    InconsistencyPairs, Predicate, PredicateId, PredicateLibrary, PredicateProperty, PropertyFlag,
    Unifiability, EQ_PREDICATE_ID, INVALID_PREDICATE_ID,
};
pub use rule::{Rule, RuleId};
pub use term::{sorted_pair, Term, UNKNOWN_PREFIX};
