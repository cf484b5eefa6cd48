//! # abduce CLI
//!
//! ```bash
//! abduce -m compile -k ./kb rules.lisp
//! abduce -m infer -k ./kb -c lhs=astar -T 60 -T sol=10 obs.lisp
//! ```
//!
//! Exit code 0 on success, non-zero on a fatal error (bad KB, unreadable
//! input in strict mode, unknown component).

use abduce::engine::{compile_files, read_observations, AbductionEngine, EngineOptions, KBestOptions};
use abduce::kb::KnowledgeBase;
use abduce::timing::Timeouts;
use abduce::Config;
use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Ingest rule files into a knowledge base.
    Compile,
    /// Explain observations against a compiled knowledge base.
    Infer,
    /// Tune converter parameters from gold outputs (hook only).
    Learn,
}

#[derive(Parser, Debug)]
#[command(name = "abduce", version, about = "Abductive reasoning engine")]
struct Cli {
    /// Execution mode.
    #[arg(short = 'm', long = "mode", value_enum)]
    mode: Mode,

    /// Knowledge-base directory.
    #[arg(short = 'k', long = "kb")]
    kb: PathBuf,

    /// Parameter, as key=value. Repeatable.
    #[arg(short = 'p', long = "param")]
    params: Vec<String>,

    /// Flag name. Repeatable.
    #[arg(short = 'f', long = "flag")]
    flags: Vec<String>,

    /// Timeout, as [phase=]seconds with phase in {lhs, ilp, sol, all}.
    #[arg(short = 'T', long = "timeout")]
    timeouts: Vec<String>,

    /// Component selection, as kind=key with kind in {lhs, ilp, sol, dist}.
    #[arg(short = 'c', long = "component")]
    components: Vec<String>,

    /// Write the XML output here as well as to stdout.
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Input files.
    inputs: Vec<PathBuf>,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("abduce: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone())),
        )
        .with_writer(std::io::stderr)
        .init();

    let params = parse_params(&cli.params)?;
    let flags = &cli.flags;
    let strict = flags.iter().any(|f| f == "strict");

    match cli.mode {
        Mode::Compile => {
            let mut kb_config = config.kb.clone();
            if let Some(d) = params.get("max-distance") {
                kb_config.max_distance = d.parse().context("parsing max-distance")?;
            }
            if let Some(t) = params.get("threads") {
                kb_config.threads = t.parse().context("parsing threads")?;
            }
            if flags.iter().any(|f| f == "disable-stop-words") {
                kb_config.disable_stop_words = true;
            }
            if flags.iter().any(|f| f == "enable-deduction") {
                kb_config.can_deduce = true;
            }
            let dist = component(&cli.components, "dist")
                .unwrap_or_else(|| config.inference.dist.clone());
            compile_files(&cli.kb, &cli.inputs, kb_config, &dist, strict)
                .context("compiling knowledge base")?;
            Ok(())
        }
        Mode::Infer => {
            let mut kb = KnowledgeBase::open(&cli.kb).context("opening knowledge base")?;
            let observations =
                read_observations(&mut kb, &cli.inputs, strict).context("reading observations")?;
            if observations.is_empty() {
                bail!("no observations in the input files");
            }

            let options = build_options(&config, &cli, &params, flags)?;
            let engine = AbductionEngine::new(kb, options).map_err(|e| anyhow!(e))?;

            let mut file_out = match &cli.output {
                Some(path) => Some(std::fs::File::create(path).context("creating output file")?),
                None => None,
            };
            for observation in &observations {
                if !engine.is_target(&observation.name) {
                    continue;
                }
                let result = engine.infer(observation);
                let library = engine.kb().predicates();
                abduce::output::write_solutions(std::io::stdout().lock(), library, &result)
                    .context("writing XML")?;
                println!();
                if let Some(file) = file_out.as_mut() {
                    abduce::output::write_solutions(&mut *file, library, &result)
                        .context("writing XML file")?;
                }
            }
            Ok(())
        }
        Mode::Learn => {
            // The default converter carries no tunable weights; the hook is
            // exercised and reported, nothing more.
            bail!("the configured converter has no trainable parameters")
        }
    }
}

fn parse_params(specs: &[String]) -> Result<HashMap<String, String>> {
    let mut out = HashMap::new();
    for spec in specs {
        let (key, value) = spec
            .split_once('=')
            .ok_or_else(|| anyhow!("parameter must be key=value: {spec:?}"))?;
        out.insert(key.to_string(), value.to_string());
    }
    Ok(out)
}

fn component(specs: &[String], kind: &str) -> Option<String> {
    specs
        .iter()
        .filter_map(|s| s.split_once('='))
        .find(|(k, _)| *k == kind)
        .map(|(_, v)| v.to_string())
}

fn build_options(
    config: &Config,
    cli: &Cli,
    params: &HashMap<String, String>,
    flags: &[String],
) -> Result<EngineOptions> {
    let mut timeouts = Timeouts::default();
    for spec in &cli.timeouts {
        timeouts.apply(spec).map_err(|e| anyhow!(e))?;
    }

    let kbest = match params.get("max-sols-num") {
        Some(n) => Some(KBestOptions {
            max_count: n.parse().context("parsing max-sols-num")?,
            threshold: params
                .get("sols-threshold")
                .map(|v| v.parse())
                .transpose()
                .context("parsing sols-threshold")?
                .unwrap_or(10.0),
            margin: params
                .get("sols-margin")
                .map(|v| v.parse())
                .transpose()
                .context("parsing sols-margin")?
                .unwrap_or(1),
        }),
        None => None,
    };

    let split_names = |key: &str| -> Vec<String> {
        params
            .get(key)
            .map(|v| v.split(',').map(str::to_string).collect())
            .unwrap_or_default()
    };

    Ok(EngineOptions {
        lhs_key: component(&cli.components, "lhs").unwrap_or_else(|| config.inference.lhs.clone()),
        ilp_key: component(&cli.components, "ilp").unwrap_or_else(|| config.inference.ilp.clone()),
        sol_key: component(&cli.components, "sol").unwrap_or_else(|| config.inference.sol.clone()),
        economize: config.inference.economize && !flags.iter().any(|f| f == "disable-economization"),
        max_depth: params
            .get("max-depth")
            .map(|v| v.parse())
            .transpose()
            .context("parsing max-depth")?
            .unwrap_or(config.inference.max_depth),
        timeouts,
        keep_validity_on_timeout: config.inference.keep_validity_on_timeout,
        kbest,
        targets: split_names("target"),
        excludes: split_names("exclude"),
    })
}
