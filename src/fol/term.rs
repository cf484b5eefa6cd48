//! Interned symbolic terms.
//!
//! A term is a single symbolic constant, variable, or generated unknown,
//! identified by a 32-bit intern id. The printable form decides the kind:
//! an uppercase first letter makes a constant, the reserved `_u` prefix
//! makes an unknown, anything else is a variable.
//!
//! The intern table is process-global behind one mutex; unknown ids come
//! from a separate monotonically increasing counter so generated terms can
//! never collide with parsed ones.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

const FLAG_CONSTANT: u8 = 0b01;
const FLAG_UNKNOWN: u8 = 0b10;

/// Reserved prefix of generated placeholder terms.
pub const UNKNOWN_PREFIX: &str = "_u";

struct Interner {
    strings: Vec<String>,
    flags: Vec<u8>,
    lookup: HashMap<String, u32>,
}

impl Interner {
    fn new() -> Self {
        let mut interner = Interner {
            strings: Vec::new(),
            flags: Vec::new(),
            lookup: HashMap::new(),
        };
        // Id 0 is the empty term.
        interner.intern("");
        interner
    }

    fn intern(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.lookup.get(s) {
            return id;
        }
        let id = self.strings.len() as u32;
        let mut flags = 0u8;
        if s.chars().next().is_some_and(char::is_uppercase) {
            flags |= FLAG_CONSTANT;
        }
        if s.starts_with(UNKNOWN_PREFIX) {
            flags |= FLAG_UNKNOWN;
        }
        self.strings.push(s.to_string());
        self.flags.push(flags);
        self.lookup.insert(s.to_string(), id);
        id
    }
}

fn interner() -> &'static Mutex<Interner> {
    static INTERNER: OnceLock<Mutex<Interner>> = OnceLock::new();
    INTERNER.get_or_init(|| Mutex::new(Interner::new()))
}

static UNKNOWN_COUNTER: AtomicU32 = AtomicU32::new(1);

/// An interned term. Copyable, ordered by intern id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Term(u32);

impl Term {
    /// Intern `s` and return its term. Idempotent.
    pub fn new(s: &str) -> Term {
        Term(interner().lock().intern(s))
    }

    /// Generate a fresh unknown term (`_u1`, `_u2`, ...).
    pub fn unknown() -> Term {
        let n = UNKNOWN_COUNTER.fetch_add(1, Ordering::SeqCst);
        Term::new(&format!("{UNKNOWN_PREFIX}{n}"))
    }

    /// The empty term (intern id 0).
    pub fn empty() -> Term {
        Term(0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The printable form this term was interned from.
    pub fn as_str(self) -> String {
        interner().lock().strings[self.0 as usize].clone()
    }

    pub fn is_constant(self) -> bool {
        interner().lock().flags[self.0 as usize] & FLAG_CONSTANT != 0
    }

    pub fn is_unknown(self) -> bool {
        interner().lock().flags[self.0 as usize] & FLAG_UNKNOWN != 0
    }

    pub fn is_variable(self) -> bool {
        let flags = interner().lock().flags[self.0 as usize];
        flags & (FLAG_CONSTANT | FLAG_UNKNOWN) == 0
    }

    /// Two terms may be unified iff they are not two distinct constants.
    pub fn can_unify_with(self, other: Term) -> bool {
        self == other || !(self.is_constant() && other.is_constant())
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order a term pair ascending. Equality atoms and all pair-keyed maps use
/// this canonical form.
pub fn sorted_pair(t1: Term, t2: Term) -> (Term, Term) {
    if t1 <= t2 {
        (t1, t2)
    } else {
        (t2, t1)
    }
}
