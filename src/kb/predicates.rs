//! Predicate library file: predicates in id order, then property records,
//! then the persisted inconsistency declarations.

use super::binio::{read_str8, read_u32, read_u64, read_u8, write_str8, write_u32, write_u64, write_u8};
use super::error::{KbError, KbResult};
use crate::fol::{Predicate, PredicateLibrary, PredicateProperty, PropertyFlag};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

fn library_path(dir: &Path) -> PathBuf {
    dir.join("predicates.dat")
}

pub fn save(library: &PredicateLibrary, dir: &Path) -> KbResult<()> {
    let mut file = BufWriter::new(File::create(library_path(dir))?);

    write_u64(&mut file, library.predicates().len() as u64)?;
    for predicate in library.predicates() {
        write_str8(&mut file, &predicate.to_string())?;
    }

    let properties: Vec<&PredicateProperty> = library.properties().collect();
    write_u64(&mut file, properties.len() as u64)?;
    for property in properties {
        write_u32(&mut file, property.pid())?;
        write_u8(&mut file, property.flags().len() as u8)?;
        for flag in property.flags() {
            write_u8(&mut file, flag.code())?;
        }
    }

    let inconsistencies: Vec<_> = library.inconsistencies().collect();
    write_u64(&mut file, inconsistencies.len() as u64)?;
    for (&(pid1, pid2), pairs) in inconsistencies {
        write_u32(&mut file, pid1)?;
        write_u32(&mut file, pid2)?;
        write_u8(&mut file, pairs.len() as u8)?;
        for &(t1, t2) in pairs {
            write_u8(&mut file, t1 as u8)?;
            write_u8(&mut file, t2 as u8)?;
        }
    }

    Ok(())
}

pub fn load(dir: &Path) -> KbResult<PredicateLibrary> {
    let path = library_path(dir);
    if !path.exists() {
        return Err(KbError::MissingFile(path));
    }
    let mut file = BufReader::new(File::open(path)?);
    let mut library = PredicateLibrary::new();

    let n_preds = read_u64(&mut file)?;
    for id in 0..n_preds {
        let printable = read_str8(&mut file)?;
        let predicate = Predicate::parse(&printable)
            .ok_or_else(|| KbError::Corrupt(format!("bad predicate entry: {printable:?}")))?;
        if id < 2 {
            // The two reserved entries are created by the library itself;
            // check rather than re-add.
            let expected = library
                .predicate(id as u32)
                .ok_or_else(|| KbError::Corrupt("missing reserved predicate".to_string()))?;
            if *expected != predicate {
                return Err(KbError::Corrupt(format!(
                    "reserved predicate id {id} is {printable:?} on disk"
                )));
            }
            continue;
        }
        let assigned = library.add(predicate);
        if u64::from(assigned) != id {
            return Err(KbError::Corrupt(format!(
                "predicate id drift: expected {id}, assigned {assigned}"
            )));
        }
    }

    let n_props = read_u64(&mut file)?;
    for _ in 0..n_props {
        let pid = read_u32(&mut file)?;
        let n_flags = read_u8(&mut file)?;
        let mut flags = BTreeSet::new();
        for _ in 0..n_flags {
            let code = read_u8(&mut file)?;
            let flag = PropertyFlag::from_code(code)
                .ok_or_else(|| KbError::Corrupt(format!("bad property flag code {code}")))?;
            flags.insert(flag);
        }
        let arity = library.arity(pid).ok_or(KbError::UnknownPredicate(pid))?;
        library.add_property(PredicateProperty::new(pid, arity, flags));
    }

    let n_incs = read_u64(&mut file)?;
    for _ in 0..n_incs {
        let pid1 = read_u32(&mut file)?;
        let pid2 = read_u32(&mut file)?;
        let n_pairs = read_u8(&mut file)?;
        let mut pairs = Vec::with_capacity(n_pairs as usize);
        for _ in 0..n_pairs {
            let t1 = read_u8(&mut file)?;
            let t2 = read_u8(&mut file)?;
            pairs.push((t1 as usize, t2 as usize));
        }
        library.add_inconsistency(pid1, pid2, pairs);
    }

    Ok(library)
}
