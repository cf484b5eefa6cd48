//! # Input Reader
//!
//! Interprets S-expression files into observations, rules, predicate
//! properties, and inconsistency declarations. Tokenization is generated
//! from `sexpr.pest`; this module only walks the parsed trees.
//!
//! ## Accepted top-level forms
//!
//! ```text
//! (O (^ (p x) (q x A)) (req (r x)) (name "obs-1"))
//! (B (name "g") (=> (p x) (q x)) (=> (^ (a x) (b x)) (c x)))
//! (B (xor (p x) (q x)))
//! (B (define (nsubj 2) right-unique asymmetric))
//! (include "more-rules.lisp")
//! ```
//!
//! Atoms are `(pred t1 t2 ...)`, `(!pred ...)` for negation, `(= t1 t2)` and
//! `(!= t1 t2)` for equality. A trailing symbol starting with `:` becomes
//! the atom's parameter string (e.g. `(p x :d:0.5)`).
//!
//! A malformed form is skipped with a warning by default; strict mode turns
//! it into an error.

use crate::fol::Rule as FolRule;
use crate::fol::{
    Atom, Conjunction, Predicate, PredicateLibrary, PredicateProperty, PropertyFlag, Term,
};
use crate::lhs::Observation;
use pest::Parser;
use pest_derive::Parser;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

#[derive(Parser)]
#[grammar = "input/sexpr.pest"]
struct SexprParser;

const MAX_INCLUDE_DEPTH: usize = 32;

/// Input-layer errors. Syntax errors are fatal only in strict mode.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("S-expression grammar error: {0}")]
    Grammar(Box<pest::error::Error<Rule_>>),

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("include depth exceeds {MAX_INCLUDE_DEPTH}")]
    IncludeDepth,
}

// pest_derive names the rule enum `Rule`, which collides with fol::Rule.
pub use Rule as Rule_;

/// A parsed S-expression.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SExpr {
    Sym(String),
    Str(String),
    List(Vec<SExpr>),
}

impl SExpr {
    fn as_sym(&self) -> Option<&str> {
        match self {
            SExpr::Sym(s) => Some(s),
            _ => None,
        }
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            SExpr::Str(s) => Some(s),
            _ => None,
        }
    }

    fn as_list(&self) -> Option<&[SExpr]> {
        match self {
            SExpr::List(items) => Some(items),
            _ => None,
        }
    }
}

/// One interpreted top-level form.
#[derive(Debug, Clone)]
pub enum Form {
    Observation(Observation),
    Rule(FolRule),
    Property(PredicateProperty),
    Inconsistency(Atom, Atom),
}

/// The input reader; `strict` aborts on the first malformed form.
pub struct InputReader {
    pub strict: bool,
}

impl InputReader {
    pub fn new(strict: bool) -> InputReader {
        InputReader { strict }
    }

    /// Read and interpret one file, following includes.
    pub fn read_file(
        &self,
        path: &Path,
        library: &mut PredicateLibrary,
    ) -> Result<Vec<Form>, InputError> {
        self.read_file_at_depth(path, library, 0)
    }

    /// Interpret source text directly (no includes resolvable).
    pub fn read_str(
        &self,
        source: &str,
        library: &mut PredicateLibrary,
    ) -> Result<Vec<Form>, InputError> {
        let exprs = parse_sexprs(source)?;
        let mut forms = Vec::new();
        for expr in &exprs {
            self.interpret(expr, library, None, 0, &mut forms)?;
        }
        Ok(forms)
    }

    fn read_file_at_depth(
        &self,
        path: &Path,
        library: &mut PredicateLibrary,
        depth: usize,
    ) -> Result<Vec<Form>, InputError> {
        if depth > MAX_INCLUDE_DEPTH {
            return Err(InputError::IncludeDepth);
        }
        let source = fs::read_to_string(path).map_err(|source| InputError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let exprs = parse_sexprs(&source)?;
        let mut forms = Vec::new();
        for expr in &exprs {
            self.interpret(expr, library, path.parent(), depth, &mut forms)?;
        }
        Ok(forms)
    }

    fn interpret(
        &self,
        expr: &SExpr,
        library: &mut PredicateLibrary,
        base_dir: Option<&Path>,
        depth: usize,
        out: &mut Vec<Form>,
    ) -> Result<(), InputError> {
        match self.interpret_toplevel(expr, library, base_dir, depth, out) {
            Ok(()) => Ok(()),
            Err(e @ (InputError::Io { .. } | InputError::IncludeDepth)) => Err(e),
            Err(e) if self.strict => Err(e),
            Err(e) => {
                warn!(error = %e, "skipping malformed form");
                Ok(())
            }
        }
    }

    fn interpret_toplevel(
        &self,
        expr: &SExpr,
        library: &mut PredicateLibrary,
        base_dir: Option<&Path>,
        depth: usize,
        out: &mut Vec<Form>,
    ) -> Result<(), InputError> {
        let items = expr
            .as_list()
            .ok_or_else(|| InputError::Syntax("expected a top-level list".to_string()))?;
        let head = items
            .first()
            .and_then(SExpr::as_sym)
            .ok_or_else(|| InputError::Syntax("empty top-level form".to_string()))?;

        match head {
            "O" => {
                out.push(Form::Observation(parse_observation(&items[1..], library)?));
                Ok(())
            }
            "B" => self.parse_block(&items[1..], library, out),
            "include" => {
                let target = items
                    .get(1)
                    .and_then(SExpr::as_str)
                    .ok_or_else(|| InputError::Syntax("include needs a path string".to_string()))?;
                let resolved = match base_dir {
                    Some(dir) => dir.join(target),
                    None => Path::new(target).to_path_buf(),
                };
                let nested = self.read_file_at_depth(&resolved, library, depth + 1)?;
                out.extend(nested);
                Ok(())
            }
            other => Err(InputError::Syntax(format!("unknown form: ({other} ...)"))),
        }
    }

    /// A `B` block: rules, inconsistencies, and property definitions under
    /// an optional group name.
    fn parse_block(
        &self,
        items: &[SExpr],
        library: &mut PredicateLibrary,
        out: &mut Vec<Form>,
    ) -> Result<(), InputError> {
        let mut name = String::new();
        let mut rules: Vec<(Conjunction, Conjunction)> = Vec::new();

        for item in items {
            let list = item
                .as_list()
                .ok_or_else(|| InputError::Syntax("expected a list inside (B ...)".to_string()))?;
            let head = list
                .first()
                .and_then(SExpr::as_sym)
                .ok_or_else(|| InputError::Syntax("empty form inside (B ...)".to_string()))?;
            match head {
                "name" => {
                    name = list
                        .get(1)
                        .and_then(SExpr::as_str)
                        .ok_or_else(|| InputError::Syntax("name needs a string".to_string()))?
                        .to_string();
                }
                "=>" => {
                    if list.len() != 3 {
                        return Err(InputError::Syntax("=> needs lhs and rhs".to_string()));
                    }
                    let lhs = parse_conjunction(&list[1], library)?;
                    let rhs = parse_conjunction(&list[2], library)?;
                    rules.push((lhs, rhs));
                }
                "xor" => {
                    if list.len() != 3 {
                        return Err(InputError::Syntax("xor needs two atoms".to_string()));
                    }
                    let a1 = parse_atom(&list[1], library)?;
                    let a2 = parse_atom(&list[2], library)?;
                    out.push(Form::Inconsistency(a1, a2));
                }
                "define" => {
                    out.push(Form::Property(parse_property(&list[1..], library)?));
                }
                other => {
                    return Err(InputError::Syntax(format!(
                        "unknown form inside (B ...): ({other} ...)"
                    )));
                }
            }
        }

        let multiple = rules.len() > 1;
        for (i, (lhs, rhs)) in rules.into_iter().enumerate() {
            let rule_name = if multiple {
                format!("{name}#{}", i + 1)
            } else {
                name.clone()
            };
            out.push(Form::Rule(FolRule::new(&rule_name, lhs, rhs)));
        }
        Ok(())
    }
}

fn parse_sexprs(source: &str) -> Result<Vec<SExpr>, InputError> {
    let mut pairs = SexprParser::parse(Rule_::file, source)
        .map_err(|e| InputError::Grammar(Box::new(e)))?;
    let file = pairs
        .next()
        .ok_or_else(|| InputError::Syntax("empty input".to_string()))?;
    let mut out = Vec::new();
    for pair in file.into_inner() {
        if pair.as_rule() == Rule_::EOI {
            continue;
        }
        out.push(build_sexpr(pair));
    }
    Ok(out)
}

fn build_sexpr(pair: pest::iterators::Pair<'_, Rule_>) -> SExpr {
    match pair.as_rule() {
        Rule_::symbol => SExpr::Sym(pair.as_str().to_string()),
        Rule_::string => {
            let inner = pair
                .into_inner()
                .next()
                .map(|p| p.as_str().to_string())
                .unwrap_or_default();
            SExpr::Str(inner)
        }
        Rule_::list => SExpr::List(pair.into_inner().map(build_sexpr).collect()),
        _ => SExpr::List(Vec::new()),
    }
}

fn parse_observation(
    items: &[SExpr],
    library: &mut PredicateLibrary,
) -> Result<Observation, InputError> {
    let mut observation = Observation::default();
    for item in items {
        let list = item
            .as_list()
            .ok_or_else(|| InputError::Syntax("expected a list inside (O ...)".to_string()))?;
        let head = list
            .first()
            .and_then(SExpr::as_sym)
            .ok_or_else(|| InputError::Syntax("empty form inside (O ...)".to_string()))?;
        match head {
            "^" => {
                for expr in &list[1..] {
                    observation.facts.push(parse_atom(expr, library)?);
                }
            }
            "req" => {
                for expr in &list[1..] {
                    observation.requirements.push(parse_atom(expr, library)?);
                }
            }
            "name" => {
                observation.name = list
                    .get(1)
                    .and_then(SExpr::as_str)
                    .ok_or_else(|| InputError::Syntax("name needs a string".to_string()))?
                    .to_string();
            }
            other => {
                return Err(InputError::Syntax(format!(
                    "unknown form inside (O ...): ({other} ...)"
                )));
            }
        }
    }
    if observation.facts.is_empty() {
        return Err(InputError::Syntax("observation without facts".to_string()));
    }
    Ok(observation)
}

/// `(^ atoms...)` or a bare atom.
fn parse_conjunction(
    expr: &SExpr,
    library: &mut PredicateLibrary,
) -> Result<Conjunction, InputError> {
    let list = expr
        .as_list()
        .ok_or_else(|| InputError::Syntax("expected an atom or (^ ...)".to_string()))?;
    if list.first().and_then(SExpr::as_sym) == Some("^") {
        let mut atoms = Vec::new();
        for item in &list[1..] {
            atoms.push(parse_atom(item, library)?);
        }
        Ok(Conjunction::new(atoms))
    } else {
        Ok(Conjunction::new(vec![parse_atom(expr, library)?]))
    }
}

fn parse_atom(expr: &SExpr, library: &mut PredicateLibrary) -> Result<Atom, InputError> {
    let list = expr
        .as_list()
        .ok_or_else(|| InputError::Syntax("expected an atom".to_string()))?;
    let head = list
        .first()
        .and_then(SExpr::as_sym)
        .ok_or_else(|| InputError::Syntax("atom without a predicate".to_string()))?;

    let (name, neg) = match head {
        "=" => ("=", false),
        "!=" => ("=", true),
        _ => match head.strip_prefix('!') {
            Some(stripped) => (stripped, true),
            None => (head, false),
        },
    };
    if name.is_empty() {
        return Err(InputError::Syntax("atom with empty predicate".to_string()));
    }

    let mut terms = Vec::new();
    let mut param = String::new();
    for item in &list[1..] {
        let sym = item
            .as_sym()
            .ok_or_else(|| InputError::Syntax("atom terms must be symbols".to_string()))?;
        if let Some(rest) = sym.strip_prefix(':') {
            param = rest.to_string();
        } else {
            terms.push(Term::new(sym));
        }
    }
    if terms.is_empty() {
        return Err(InputError::Syntax(format!("atom {name} without terms")));
    }

    let pid = if name == "=" {
        crate::fol::EQ_PREDICATE_ID
    } else {
        library.add(Predicate::new(name, terms.len() as u8))
    };
    if pid == crate::fol::INVALID_PREDICATE_ID {
        return Err(InputError::Syntax(format!("invalid predicate: {name}")));
    }
    let mut atom = Atom::new(pid, terms, neg, false);
    atom.set_param(&param);
    Ok(atom)
}

/// `(define (pred arity) flags...)`.
fn parse_property(
    items: &[SExpr],
    library: &mut PredicateLibrary,
) -> Result<PredicateProperty, InputError> {
    let header = items
        .first()
        .and_then(SExpr::as_list)
        .ok_or_else(|| InputError::Syntax("define needs (pred arity)".to_string()))?;
    let name = header
        .first()
        .and_then(SExpr::as_sym)
        .ok_or_else(|| InputError::Syntax("define needs a predicate name".to_string()))?;
    let arity: u8 = header
        .get(1)
        .and_then(SExpr::as_sym)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| InputError::Syntax("define needs a numeric arity".to_string()))?;

    let pid = library.add(Predicate::new(name, arity));
    if pid == crate::fol::INVALID_PREDICATE_ID {
        return Err(InputError::Syntax(format!("invalid predicate: {name}")));
    }

    let mut flags = BTreeSet::new();
    for item in &items[1..] {
        let sym = item
            .as_sym()
            .ok_or_else(|| InputError::Syntax("property flags must be symbols".to_string()))?;
        let flag = PropertyFlag::parse(sym)
            .ok_or_else(|| InputError::Syntax(format!("unknown property flag: {sym}")))?;
        flags.insert(flag);
    }
    Ok(PredicateProperty::new(pid, arity, flags))
}
