//! # Inference Driver
//!
//! Owns the three pipeline components (enumerator, converter, solver) and
//! runs the phases for each observation:
//!
//! ```text
//! observation ──► [enumerate] ──► proof graph
//!                     │ timeout: mark graph, maybe stop
//!                 [convert]   ──► ILP problem
//!                     │ timeout: mark problem, maybe stop
//!                 [solve]     ──► solutions (cutting-plane / k-best inside)
//! ```
//!
//! Each phase has its own budget plus a share of the overall budget; a
//! phase that times out leaves output the next phase can still consume when
//! `keep_validity_on_timeout` is set.

use crate::ilp::convert::{CostProvider, DepthCosts, IlpConverter, UniformCosts};
use crate::ilp::{Problem, Solution};
use crate::input::{Form, InputReader};
use crate::kb::{CompileConfig, KbResult, KnowledgeBase};
use crate::lhs::astar::AStarEnumerator;
use crate::lhs::bfs::BfsEnumerator;
use crate::lhs::{LhsEnumerator, Observation};
use crate::pg::ProofGraph;
use crate::sol::exhaustive::ExhaustiveSolver;
use crate::sol::kbest::KBestSolver;
use crate::sol::{IlpSolver, NullSolver};
use crate::timing::{PhaseTimer, Timeouts};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// K-best settings; `None` disables the adapter.
#[derive(Debug, Clone, Copy)]
pub struct KBestOptions {
    pub max_count: usize,
    pub threshold: f64,
    pub margin: usize,
}

/// Component selection and inference settings.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Enumerator key: `bfs` or `astar`.
    pub lhs_key: String,
    /// Cost-provider key: `uniform` or `depth`.
    pub ilp_key: String,
    /// Solver key: `null` or `exhaustive`.
    pub sol_key: String,
    /// Collapse redundant ILP variables.
    pub economize: bool,
    /// Depth bound for the bfs enumerator.
    pub max_depth: i32,
    pub timeouts: Timeouts,
    /// Let a later phase consume a timed-out phase's partial output.
    pub keep_validity_on_timeout: bool,
    pub kbest: Option<KBestOptions>,
    /// Observation names to run; empty means all.
    pub targets: Vec<String>,
    /// Observation names to skip.
    pub excludes: Vec<String>,
}

impl Default for EngineOptions {
    fn default() -> EngineOptions {
        EngineOptions {
            lhs_key: "bfs".to_string(),
            ilp_key: "uniform".to_string(),
            sol_key: "exhaustive".to_string(),
            economize: true,
            max_depth: 3,
            timeouts: Timeouts::default(),
            keep_validity_on_timeout: true,
            kbest: None,
            targets: Vec::new(),
            excludes: Vec::new(),
        }
    }
}

/// Wall-clock spent per phase.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseTimes {
    pub lhs: Duration,
    pub ilp: Duration,
    pub sol: Duration,
}

/// Everything one inference produced.
pub struct InferenceResult {
    pub graph: ProofGraph,
    pub problem: Problem,
    pub solutions: Vec<Solution>,
    pub times: PhaseTimes,
}

/// The driver. Owns the knowledge base and the components.
pub struct AbductionEngine {
    kb: KnowledgeBase,
    options: EngineOptions,
    enumerator: Box<dyn LhsEnumerator>,
    solver: Box<dyn IlpSolver>,
}

impl AbductionEngine {
    pub fn new(kb: KnowledgeBase, options: EngineOptions) -> Result<AbductionEngine, String> {
        let enumerator = make_enumerator(&options.lhs_key, options.max_depth)?;
        let solver = make_solver(&options.sol_key)?;
        Ok(AbductionEngine {
            kb,
            options,
            enumerator,
            solver,
        })
    }

    pub fn kb(&self) -> &KnowledgeBase {
        &self.kb
    }

    pub fn kb_mut(&mut self) -> &mut KnowledgeBase {
        &mut self.kb
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Whether the observation passes the target/exclude name filters.
    pub fn is_target(&self, name: &str) -> bool {
        if self.options.excludes.iter().any(|n| n == name) {
            return false;
        }
        self.options.targets.is_empty() || self.options.targets.iter().any(|n| n == name)
    }

    /// Run the three phases for one observation.
    pub fn infer(&self, observation: &Observation) -> InferenceResult {
        info!(name = %observation.name, facts = observation.facts.len(), "inferring");
        let overall_deadline = self
            .options
            .timeouts
            .all
            .map(|s| Instant::now() + Duration::from_secs_f64(s));
        let mut times = PhaseTimes::default();

        // Phase 1: enumerate.
        let timer = PhaseTimer::start(self.options.timeouts.lhs, overall_deadline);
        let graph = self.enumerator.enumerate(&self.kb, observation, &timer);
        times.lhs = timer.elapsed();
        if graph.is_timed_out() {
            warn!(name = %observation.name, "enumeration timed out");
            if !self.options.keep_validity_on_timeout {
                let problem = Problem::new(graph.name(), true);
                let solutions = vec![Solution::not_available(&problem)];
                return InferenceResult {
                    graph,
                    problem,
                    solutions,
                    times,
                };
            }
        }

        // Phase 2: convert.
        let timer = PhaseTimer::start(self.options.timeouts.ilp, overall_deadline);
        let converter = IlpConverter::new(
            self.options.economize,
            make_cost_provider(&self.options.ilp_key),
        );
        let problem = converter.convert(&graph, &self.kb, &timer);
        times.ilp = timer.elapsed();
        if problem.timed_out {
            warn!(name = %observation.name, "conversion timed out");
            if !self.options.keep_validity_on_timeout {
                let solutions = vec![Solution::not_available(&problem)];
                return InferenceResult {
                    graph,
                    problem,
                    solutions,
                    times,
                };
            }
        }

        // Phase 3: solve.
        let timer = PhaseTimer::start(self.options.timeouts.sol, overall_deadline);
        let solutions = match self.options.kbest {
            Some(options) => {
                let kbest = KBestSolver::new(
                    ExhaustiveSolver,
                    options.max_count,
                    options.threshold,
                    options.margin,
                );
                kbest.solve_k_best(&graph, &problem, &timer)
            }
            None => self.solver.solve(&problem, &timer),
        };
        times.sol = timer.elapsed();

        InferenceResult {
            graph,
            problem,
            solutions,
            times,
        }
    }
}

fn make_enumerator(key: &str, max_depth: i32) -> Result<Box<dyn LhsEnumerator>, String> {
    match key {
        "bfs" => Ok(Box::new(BfsEnumerator::new(max_depth))),
        "astar" => Ok(Box::new(AStarEnumerator::new())),
        other => Err(format!("unknown lhs component: {other}")),
    }
}

fn make_cost_provider(key: &str) -> Box<dyn CostProvider> {
    match key {
        "depth" => Box::new(DepthCosts::default()),
        _ => Box::new(UniformCosts),
    }
}

fn make_solver(key: &str) -> Result<Box<dyn IlpSolver>, String> {
    match key {
        "null" => Ok(Box::new(NullSolver)),
        "exhaustive" => Ok(Box::new(ExhaustiveSolver)),
        other => Err(format!("unknown sol component: {other}")),
    }
}

/// Compile-mode driver: read every input file, accumulate rules, properties,
/// and inconsistencies into a fresh KB, and finalize it.
pub fn compile_files(
    dir: &Path,
    inputs: &[std::path::PathBuf],
    config: CompileConfig,
    distance_key: &str,
    strict: bool,
) -> KbResult<KnowledgeBase> {
    let mut kb = KnowledgeBase::create(dir, config, distance_key)?;
    let reader = InputReader::new(strict);

    let mut forms = Vec::new();
    for path in inputs {
        match reader.read_file(path, kb.predicates_mut()) {
            Ok(parsed) => forms.extend(parsed),
            Err(e) => {
                if strict {
                    return Err(crate::kb::KbError::Corrupt(format!("input error: {e}")));
                }
                warn!(path = %path.display(), error = %e, "skipping unreadable input");
            }
        }
    }

    ingest_forms(&mut kb, forms)?;
    kb.finalize()
}

/// Feed interpreted forms into a compile-mode KB. Observations are ignored
/// with a warning.
pub fn ingest_forms(kb: &mut KnowledgeBase, forms: Vec<Form>) -> KbResult<()> {
    let mut rules = 0u32;
    for form in forms {
        match form {
            Form::Rule(rule) => {
                kb.add_rule(&rule)?;
                rules += 1;
            }
            Form::Property(property) => kb.predicates_mut().add_property(property),
            Form::Inconsistency(a1, a2) => {
                let pairs: Vec<(usize, usize)> = a1
                    .terms()
                    .iter()
                    .enumerate()
                    .flat_map(|(i, t1)| {
                        a2.terms()
                            .iter()
                            .enumerate()
                            .filter(move |(_, t2)| *t2 == t1)
                            .map(move |(j, _)| (i, j))
                    })
                    .collect();
                kb.predicates_mut().add_inconsistency(a1.pid(), a2.pid(), pairs);
            }
            Form::Observation(obs) => {
                warn!(name = %obs.name, "ignoring observation in compile mode");
            }
        }
    }
    info!(rules, "compiled rule set");
    Ok(())
}

/// Query-mode driver: read observation files against an opened KB.
pub fn read_observations(
    kb: &mut KnowledgeBase,
    inputs: &[std::path::PathBuf],
    strict: bool,
) -> Result<Vec<Observation>, crate::input::InputError> {
    let reader = InputReader::new(strict);
    let mut observations = Vec::new();
    for path in inputs {
        for form in reader.read_file(path, kb.predicates_mut())? {
            match form {
                Form::Observation(obs) => observations.push(obs),
                _ => warn!("ignoring non-observation form in query mode"),
            }
        }
    }
    Ok(observations)
}
