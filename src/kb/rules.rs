//! The rule library: append-only storage with random access by rule id.
//!
//! Two parallel files back the store. The index file holds one
//! `(u64 offset, u32 length)` pair per rule id plus a trailing `u32` count;
//! the data file holds the concatenated serialized rule records. Lookup by id
//! is a fixed-size index read plus one data read.
//!
//! A rule record is `conjunction || conjunction || name`. A conjunction is
//! `u8 n_atoms || atoms || param`. An atom is `u32 predicate_id || terms as
//! length-prefixed strings || u8 flags || param`; the term count comes from
//! the predicate library, which is why reading requires the library.

use super::binio::{
    read_str8, read_u32, read_u64, read_u8, write_str8, write_u32, write_u64, write_u8,
};
use super::error::{KbError, KbResult};
use crate::fol::{Atom, Conjunction, PredicateLibrary, Rule, RuleId, Term, INVALID_PREDICATE_ID};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const INDEX_ENTRY_SIZE: u64 = 12;

const FLAG_NEG: u8 = 0b01;
const FLAG_NAF: u8 = 0b10;

fn index_path(dir: &Path) -> PathBuf {
    dir.join("rules.idx")
}

fn data_path(dir: &Path) -> PathBuf {
    dir.join("rules.dat")
}

fn write_atom(buf: &mut Vec<u8>, atom: &Atom) -> KbResult<()> {
    if atom.pid() == INVALID_PREDICATE_ID {
        return Err(KbError::UnknownPredicate(atom.pid()));
    }
    write_u32(buf, atom.pid())?;
    for &term in atom.terms() {
        write_str8(buf, &term.as_str())?;
    }
    let mut flags = 0u8;
    if atom.neg() {
        flags |= FLAG_NEG;
    }
    if atom.naf() {
        flags |= FLAG_NAF;
    }
    write_u8(buf, flags)?;
    write_str8(buf, atom.param())?;
    Ok(())
}

fn read_atom(cursor: &mut Cursor<&[u8]>, library: &PredicateLibrary) -> KbResult<Atom> {
    let pid = read_u32(cursor)?;
    let arity = library.arity(pid).ok_or(KbError::UnknownPredicate(pid))?;
    let mut terms = Vec::with_capacity(arity as usize);
    for _ in 0..arity {
        terms.push(Term::new(&read_str8(cursor)?));
    }
    let flags = read_u8(cursor)?;
    let mut atom = Atom::new(pid, terms, flags & FLAG_NEG != 0, flags & FLAG_NAF != 0);
    let param = read_str8(cursor)?;
    atom.set_param(&param);
    Ok(atom)
}

fn write_conjunction(buf: &mut Vec<u8>, conjunction: &Conjunction) -> KbResult<()> {
    write_u8(buf, conjunction.len() as u8)?;
    for atom in conjunction.iter() {
        write_atom(buf, atom)?;
    }
    write_str8(buf, conjunction.param())?;
    Ok(())
}

fn read_conjunction(
    cursor: &mut Cursor<&[u8]>,
    library: &PredicateLibrary,
) -> KbResult<Conjunction> {
    let n = read_u8(cursor)?;
    let mut atoms = Vec::with_capacity(n as usize);
    for _ in 0..n {
        atoms.push(read_atom(cursor, library)?);
    }
    let mut conjunction = Conjunction::new(atoms);
    let param = read_str8(cursor)?;
    conjunction.set_param(&param);
    Ok(conjunction)
}

/// Serialize one rule record.
pub fn encode_rule(rule: &Rule) -> KbResult<Vec<u8>> {
    let mut buf = Vec::new();
    write_conjunction(&mut buf, rule.lhs())?;
    write_conjunction(&mut buf, rule.rhs())?;
    write_str8(&mut buf, rule.name())?;
    Ok(buf)
}

/// Deserialize one rule record.
pub fn decode_rule(bytes: &[u8], library: &PredicateLibrary) -> KbResult<Rule> {
    let mut cursor = Cursor::new(bytes);
    let lhs = read_conjunction(&mut cursor, library)?;
    let rhs = read_conjunction(&mut cursor, library)?;
    let name = read_str8(&mut cursor)?;
    Ok(Rule::new(&name, lhs, rhs))
}

struct CompileState {
    index: BufWriter<File>,
    data: BufWriter<File>,
    count: u32,
    pos: u64,
}

struct QueryState {
    index: Mutex<File>,
    data: Mutex<File>,
    count: u32,
}

enum State {
    Compile(CompileState),
    Query(QueryState),
}

/// The rule library. Compile mode is append-only; query mode is read-only
/// random access.
pub struct RuleStore {
    dir: PathBuf,
    state: State,
}

impl RuleStore {
    /// Open for compilation, truncating any previous store.
    pub fn create(dir: &Path) -> KbResult<RuleStore> {
        let index = BufWriter::new(File::create(index_path(dir))?);
        let data = BufWriter::new(File::create(data_path(dir))?);
        Ok(RuleStore {
            dir: dir.to_path_buf(),
            state: State::Compile(CompileState {
                index,
                data,
                count: 0,
                pos: 0,
            }),
        })
    }

    /// Open for query. Reads the trailing rule count off the index file.
    pub fn open(dir: &Path) -> KbResult<RuleStore> {
        let idx_path = index_path(dir);
        if !idx_path.exists() {
            return Err(KbError::MissingFile(idx_path));
        }
        let mut index = File::open(idx_path)?;
        index.seek(SeekFrom::End(-4))?;
        let count = read_u32(&mut index)?;
        let data = File::open(data_path(dir))?;
        Ok(RuleStore {
            dir: dir.to_path_buf(),
            state: State::Query(QueryState {
                index: Mutex::new(index),
                data: Mutex::new(data),
                count,
            }),
        })
    }

    /// Append a rule, returning its dense id. Compile mode only.
    pub fn append(&mut self, rule: &Rule) -> KbResult<RuleId> {
        let State::Compile(state) = &mut self.state else {
            return Err(KbError::Mode {
                actual: "query",
                required: "compile",
            });
        };
        let record = encode_rule(rule)?;
        write_u64(&mut state.index, state.pos)?;
        write_u32(&mut state.index, record.len() as u32)?;
        state.data.write_all(&record)?;
        let id = state.count;
        state.count += 1;
        state.pos += record.len() as u64;
        Ok(id)
    }

    /// Write the trailing count and reopen for query.
    pub fn finalize(self) -> KbResult<RuleStore> {
        let dir = self.dir;
        match self.state {
            State::Compile(mut state) => {
                write_u32(&mut state.index, state.count)?;
                state.index.flush()?;
                state.data.flush()?;
                drop(state);
                RuleStore::open(&dir)
            }
            State::Query(_) => RuleStore::open(&dir),
        }
    }

    pub fn count(&self) -> u32 {
        match &self.state {
            State::Compile(state) => state.count,
            State::Query(state) => state.count,
        }
    }

    /// Fetch a rule by id: one index seek plus one data read.
    pub fn get(&self, id: RuleId, library: &PredicateLibrary) -> KbResult<Rule> {
        let State::Query(state) = &self.state else {
            return Err(KbError::Mode {
                actual: "compile",
                required: "query",
            });
        };
        if id >= state.count {
            return Err(KbError::Corrupt(format!(
                "rule id {id} out of range (count {})",
                state.count
            )));
        }

        let (offset, length) = {
            let mut index = state.index.lock();
            index.seek(SeekFrom::Start(u64::from(id) * INDEX_ENTRY_SIZE))?;
            (read_u64(&mut *index)?, read_u32(&mut *index)?)
        };

        let mut record = vec![0u8; length as usize];
        {
            let mut data = state.data.lock();
            data.seek(SeekFrom::Start(offset))?;
            data.read_exact(&mut record)?;
        }

        decode_rule(&record, library)
    }
}
