//! Reachability heuristic matrix: minimum rule-distance between predicates.
//!
//! The matrix is symmetric and sparse; only the upper triangle is stored.
//! The file begins with a reserved header position, rows follow in whatever
//! order the workers finish them, and a trailing directory maps each row's
//! predicate id to its file offset. Queries hold one shared file handle
//! behind a mutex and pay a seek plus a linear row scan.

use super::binio::{read_f32, read_u32, read_u64, write_f32, write_u32, write_u64};
use super::distance::DistanceFunction;
use super::error::{KbError, KbResult};
use super::rules::RuleStore;
use crate::fol::{PredicateId, PredicateLibrary, INVALID_PREDICATE_ID};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

fn matrix_path(dir: &Path) -> PathBuf {
    dir.join("reachability.rm")
}

struct WriteState {
    file: File,
    directory: HashMap<PredicateId, u64>,
}

struct ReadState {
    file: Mutex<File>,
    directory: HashMap<PredicateId, u64>,
}

enum State {
    Write(Mutex<WriteState>),
    Read(ReadState),
}

/// The on-disk matrix in either compile (row append) or query (row scan)
/// mode.
pub struct ReachabilityMatrix {
    dir: PathBuf,
    state: State,
}

impl ReachabilityMatrix {
    pub fn create(dir: &Path) -> KbResult<ReachabilityMatrix> {
        let mut file = File::create(matrix_path(dir))?;
        // Reserved header position, patched on finalize.
        write_u64(&mut file, 0)?;
        Ok(ReachabilityMatrix {
            dir: dir.to_path_buf(),
            state: State::Write(Mutex::new(WriteState {
                file,
                directory: HashMap::new(),
            })),
        })
    }

    pub fn open(dir: &Path) -> KbResult<ReachabilityMatrix> {
        let path = matrix_path(dir);
        if !path.exists() {
            return Err(KbError::MissingFile(path));
        }
        let mut file = File::open(path)?;
        let header_pos = read_u64(&mut file)?;
        file.seek(SeekFrom::Start(header_pos))?;
        let n_rows = read_u64(&mut file)?;
        let mut directory = HashMap::with_capacity(n_rows as usize);
        for _ in 0..n_rows {
            let pid = read_u32(&mut file)?;
            let offset = read_u64(&mut file)?;
            directory.insert(pid, offset);
        }
        Ok(ReachabilityMatrix {
            dir: dir.to_path_buf(),
            state: State::Read(ReadState {
                file: Mutex::new(file),
                directory,
            }),
        })
    }

    /// Append one row. Only entries on or above the diagonal are kept; the
    /// symmetric half is reconstructed by `get`'s canonicalization.
    pub fn put(&self, row: PredicateId, distances: &HashMap<PredicateId, f32>) -> KbResult<()> {
        let State::Write(state) = &self.state else {
            return Err(KbError::Mode {
                actual: "query",
                required: "compile",
            });
        };
        let mut state = state.lock();
        let offset = state.file.stream_position()?;
        let entries: Vec<(PredicateId, f32)> = distances
            .iter()
            .filter(|&(&col, _)| col >= row)
            .map(|(&col, &d)| (col, d))
            .collect();
        write_u64(&mut state.file, entries.len() as u64)?;
        for (col, d) in entries {
            write_u32(&mut state.file, col)?;
            write_f32(&mut state.file, d)?;
        }
        state.directory.insert(row, offset);
        Ok(())
    }

    /// Write the trailing directory, patch the header, reopen for query.
    pub fn finalize(self) -> KbResult<ReachabilityMatrix> {
        let dir = self.dir;
        match self.state {
            State::Write(state) => {
                let mut state = state.into_inner();
                let header_pos = state.file.stream_position()?;
                write_u64(&mut state.file, state.directory.len() as u64)?;
                for (&pid, &offset) in &state.directory {
                    write_u32(&mut state.file, pid)?;
                    write_u64(&mut state.file, offset)?;
                }
                state.file.seek(SeekFrom::Start(0))?;
                write_u64(&mut state.file, header_pos)?;
                state.file.flush()?;
                drop(state);
                ReachabilityMatrix::open(&dir)
            }
            State::Read(_) => ReachabilityMatrix::open(&dir),
        }
    }

    /// Minimum rule-distance between two predicates, `None` when unreachable.
    /// Symmetric: `get(a, b) == get(b, a)`.
    pub fn get(&self, a: PredicateId, b: PredicateId) -> KbResult<Option<f32>> {
        let State::Read(state) = &self.state else {
            return Err(KbError::Mode {
                actual: "compile",
                required: "query",
            });
        };
        let (row, col) = if a <= b { (a, b) } else { (b, a) };
        let Some(&offset) = state.directory.get(&row) else {
            return Ok(None);
        };

        let mut file = state.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let n = read_u64(&mut *file)?;
        for _ in 0..n {
            let pid = read_u32(&mut *file)?;
            let d = read_f32(&mut *file)?;
            if pid == col {
                return Ok(Some(d));
            }
        }
        Ok(None)
    }
}

/// Compile-time knobs for matrix construction.
pub struct BuildOptions<'a> {
    /// Maximum searched distance; negative means unlimited.
    pub max_distance: f32,
    /// Worker count; 0 means all available cores.
    pub threads: usize,
    /// Predicates excluded from direct-edge seeding.
    pub ignored: &'a HashSet<PredicateId>,
    /// Whether deduction steps are allowed during query-time chaining.
    pub can_deduce: bool,
}

type DirectMaps = (
    HashMap<PredicateId, HashMap<PredicateId, f32>>,
    HashMap<PredicateId, HashMap<PredicateId, f32>>,
    HashSet<(PredicateId, PredicateId)>,
);

fn sorted(a: PredicateId, b: PredicateId) -> (PredicateId, PredicateId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Seed the direct-edge maps from every rule: forward (lhs to rhs), backward
/// (rhs to lhs), and the paraphrase pairs usable in either mode when
/// deduction is enabled.
fn build_direct(
    rules: &RuleStore,
    library: &PredicateLibrary,
    distance: &dyn DistanceFunction,
    options: &BuildOptions<'_>,
) -> KbResult<DirectMaps> {
    let mut lhs_map: HashMap<PredicateId, HashMap<PredicateId, f32>> = HashMap::new();
    let mut rhs_map: HashMap<PredicateId, HashMap<PredicateId, f32>> = HashMap::new();
    let mut para: HashSet<(PredicateId, PredicateId)> = HashSet::new();

    for pid in 1..library.len() as PredicateId {
        if !options.ignored.contains(&pid) {
            lhs_map.entry(pid).or_default().insert(pid, 0.0);
            rhs_map.entry(pid).or_default().insert(pid, 0.0);
        }
    }

    for id in 0..rules.count() {
        let rule = rules.get(id, library)?;
        let Some(d) = distance.rule_distance(&rule) else {
            continue;
        };

        let collect = |atoms: &crate::fol::Conjunction| -> HashSet<PredicateId> {
            atoms
                .non_equality_atoms()
                .map(|(_, a)| a.pid())
                .filter(|pid| !options.ignored.contains(pid))
                .collect()
        };
        let lhs_pids = collect(rule.lhs());
        let rhs_pids = collect(rule.rhs());

        for &l in &lhs_pids {
            let target = lhs_map.entry(l).or_default();
            for &r in &rhs_pids {
                let entry = target.entry(r).or_insert(d);
                if d < *entry {
                    *entry = d;
                }
            }
        }
        for &r in &rhs_pids {
            let target = rhs_map.entry(r).or_default();
            for &l in &lhs_pids {
                let entry = target.entry(l).or_insert(d);
                if d < *entry {
                    *entry = d;
                }
            }
        }
        if options.can_deduce {
            for &l in &lhs_pids {
                for &r in &rhs_pids {
                    para.insert(sorted(l, r));
                }
            }
        }
    }

    Ok((lhs_map, rhs_map, para))
}

/// Bounded best-first walk from one predicate over the direct maps. A state
/// is `(predicate, abduction allowed, deduction allowed)`; when deduction is
/// disabled for queries, a forward step clears the abduction capability.
fn walk_from(
    target: PredicateId,
    maps: &DirectMaps,
    options: &BuildOptions<'_>,
) -> HashMap<PredicateId, f32> {
    let (lhs_map, rhs_map, para) = maps;
    let mut out: HashMap<PredicateId, f32> = HashMap::new();
    if !lhs_map.contains_key(&target) || !rhs_map.contains_key(&target) {
        return out;
    }

    let mut best: HashMap<(PredicateId, bool, bool), f32> = HashMap::new();
    best.insert((target, true, true), 0.0);
    out.insert(target, 0.0);

    let mut stack = vec![(target, true, true, 0.0f32)];
    while let Some((pid, can_abduce, can_deduce, dist)) = stack.pop() {
        for forward in [true, false] {
            let base = if forward { lhs_map } else { rhs_map };
            let Some(row) = base.get(&pid) else { continue };
            for (&next, &step) in row {
                if next == pid || step < 0.0 {
                    continue;
                }
                let is_paraphrasal = para.contains(&sorted(pid, next));
                if !is_paraphrasal
                    && ((forward && !can_deduce) || (!forward && !can_abduce))
                {
                    continue;
                }
                let new_dist = dist + step;
                if options.max_distance >= 0.0 && new_dist > options.max_distance {
                    continue;
                }

                let mut next_abduce = can_abduce;
                if !options.can_deduce && forward {
                    next_abduce = false;
                }
                let key = (next, next_abduce, can_deduce);
                if best.get(&key).is_some_and(|&d| d <= new_dist) {
                    continue;
                }
                best.insert(key, new_dist);

                let entry = out.entry(next).or_insert(new_dist);
                if new_dist < *entry {
                    *entry = new_dist;
                }
                stack.push((next, next_abduce, can_deduce, new_dist));
            }
        }
    }
    out
}

/// Build the whole matrix: direct seeding, then one bounded walk per
/// predicate row fanned out across the worker pool. Matrix writes serialize
/// on the matrix's own mutex.
pub fn build_matrix(
    matrix: &ReachabilityMatrix,
    rules: &RuleStore,
    library: &PredicateLibrary,
    distance: &dyn DistanceFunction,
    options: &BuildOptions<'_>,
) -> KbResult<()> {
    info!(
        rules = rules.count(),
        predicates = library.len(),
        max_distance = options.max_distance,
        "creating reachability matrix"
    );

    let maps = build_direct(rules, library, distance, options)?;

    let threads = if options.threads == 0 {
        num_cpus::get()
    } else {
        options.threads.min(num_cpus::get())
    };
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .build()
        .map_err(|e| KbError::Corrupt(format!("failed to build worker pool: {e}")))?;

    let processed = AtomicUsize::new(0);
    let total = library.len();
    let result: KbResult<Vec<()>> = pool.install(|| {
        (1..total as PredicateId)
            .into_par_iter()
            .map(|pid| {
                if options.ignored.contains(&pid) || pid == INVALID_PREDICATE_ID {
                    return Ok(());
                }
                let distances = walk_from(pid, &maps, options);
                matrix.put(pid, &distances)?;
                let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
                if done % 1000 == 0 {
                    debug!(processed = done, total, "reachability rows written");
                }
                Ok(())
            })
            .collect()
    });
    result?;

    info!("reachability matrix complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_matrix_file_roundtrip() {
        let temp = TempDir::new().unwrap();
        let matrix = ReachabilityMatrix::create(temp.path()).unwrap();

        let mut row2 = HashMap::new();
        row2.insert(2, 0.0);
        row2.insert(3, 1.0);
        row2.insert(5, 2.0);
        matrix.put(2, &row2).unwrap();

        let mut row3 = HashMap::new();
        row3.insert(2, 1.0);
        row3.insert(3, 0.0);
        matrix.put(3, &row3).unwrap();

        let matrix = matrix.finalize().unwrap();
        assert_eq!(matrix.get(2, 3).unwrap(), Some(1.0));
        assert_eq!(matrix.get(3, 2).unwrap(), Some(1.0));
        assert_eq!(matrix.get(2, 5).unwrap(), Some(2.0));
        assert_eq!(matrix.get(2, 2).unwrap(), Some(0.0));
        assert_eq!(matrix.get(2, 9).unwrap(), None);
        assert_eq!(matrix.get(9, 11).unwrap(), None);
    }

    #[test]
    fn test_lower_triangle_not_duplicated() {
        let temp = TempDir::new().unwrap();
        let matrix = ReachabilityMatrix::create(temp.path()).unwrap();

        // Row 3 carries an entry below the diagonal; only get(2, 3) via
        // row 2 may answer, so the row-3 copy must be skipped on write.
        let mut row3 = HashMap::new();
        row3.insert(2, 4.0);
        row3.insert(3, 0.0);
        matrix.put(3, &row3).unwrap();

        let matrix = matrix.finalize().unwrap();
        assert_eq!(matrix.get(3, 3).unwrap(), Some(0.0));
        assert_eq!(matrix.get(2, 3).unwrap(), None);
    }
}
