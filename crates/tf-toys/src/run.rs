//! End-to-end toy fit run.
//!
//! Order of operations: configuration, toy sources, models and strategies, generator-truth
//! reconciliation, the trial loop, aggregation and one atomic write. Every step before the loop
//! fails with its own error class; nothing is written unless the loop completes.

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use tf_core::{Acceptance, FitModel, FitOptions, FitStrategy, Result};

use crate::acceptance::ExpressionAcceptance;
use crate::aggregate::ResultAggregator;
use crate::batch::JobIdentity;
use crate::config::ToyFitConfig;
use crate::controller::TrialLoop;
use crate::models::build_model;
use crate::paths::{OutputTarget, Paths};
use crate::sampler::DatasetSampler;
use crate::source::{ToySource, load_sources};
use crate::store::FitStore;
use crate::strategies::resolve_strategy;
use crate::truth::{TruthCheck, check_generator_truth};

/// Models, strategies and acceptance bound once per run.
pub struct Capabilities {
    /// Models by configured name, in configured order.
    pub models: Vec<(String, Box<dyn FitModel>)>,
    /// Strategies in configured order.
    pub strategies: Vec<Box<dyn FitStrategy>>,
    /// Acceptance, if configured.
    pub acceptance: Option<Box<dyn Acceptance>>,
}

impl Capabilities {
    /// Build the built-in capabilities named by the configuration.
    pub fn from_config(config: &ToyFitConfig) -> Result<Self> {
        let models = config
            .fit
            .models
            .iter()
            .map(|name| Ok((name.clone(), build_model(name, config.model_section(name)?)?)))
            .collect::<Result<Vec<_>>>()?;
        let strategies = config
            .fit
            .strategies
            .iter()
            .map(|name| resolve_strategy(name, config.fit.bootstrap_replicas))
            .collect::<Result<Vec<_>>>()?;
        let acceptance = match &config.acceptance {
            Some(a) => Some(Box::new(ExpressionAcceptance::from_config(a)?) as Box<dyn Acceptance>),
            None => None,
        };
        Ok(Self { models, strategies, acceptance })
    }
}

/// Inputs of a `fit-toys` invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Configuration files, merged in order.
    pub config_files: Vec<PathBuf>,
    /// Base directory override.
    pub base_dir: Option<PathBuf>,
    /// Alternate storage location (overrides the configuration's `link-from`).
    pub link_from: Option<PathBuf>,
    /// Seed override.
    pub seed: Option<u64>,
    /// Verbose fits.
    pub verbose: bool,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Output name.
    pub name: String,
    /// Output file users refer to.
    pub output: PathBuf,
    /// Job identifier.
    pub job_id: String,
    /// Seed of the run.
    pub seed: u64,
    /// Executed trials.
    pub n_trials: usize,
    /// Rows appended to the result table.
    pub n_rows: usize,
    /// Whether generator truth was written by this run.
    pub truth_written: bool,
    /// Wall time per sample-fit sequence.
    pub ms_per_trial: Option<f64>,
    /// Memory growth per sample-fit sequence.
    pub mb_per_trial: Option<f64>,
}

/// Load configuration and run with the built-in capabilities.
pub fn run_toy_fits(options: &RunOptions) -> Result<RunSummary> {
    let config = ToyFitConfig::load(&options.config_files)?;
    let paths = Paths::discover(options.base_dir.as_deref())?;
    let job = JobIdentity::from_env(options.seed);
    run_with_config(&config, &paths, options.link_from.as_deref(), job, options.verbose)
}

/// Run a parsed configuration with the built-in capabilities.
pub fn run_with_config(
    config: &ToyFitConfig,
    paths: &Paths,
    link_from: Option<&Path>,
    job: JobIdentity,
    verbose: bool,
) -> Result<RunSummary> {
    let sources = load_sources(config, paths)?;
    let capabilities = Capabilities::from_config(config)?;
    run_with_capabilities(config, paths, link_from, job, verbose, sources, capabilities)
}

/// Run with explicit sources and capabilities.
pub fn run_with_capabilities(
    config: &ToyFitConfig,
    paths: &Paths,
    link_from: Option<&Path>,
    job: JobIdentity,
    verbose: bool,
    sources: Vec<ToySource>,
    capabilities: Capabilities,
) -> Result<RunSummary> {
    let link_from = link_from.or(config.link_from.as_deref());
    let target = OutputTarget::resolve(paths, &config.name, link_from);
    target.ensure_link()?;
    let mut store = FitStore::open(target.physical())?;
    let truth_check = check_generator_truth(&sources, &store)?;

    let n_trials = config.n_trials();
    info!(
        name = %config.name,
        job_id = %job.job_id,
        seed = job.seed,
        n_trials,
        models = %config.fit.models.join(", "),
        strategies = %config.fit.strategies.join(", "),
        "starting toy fits"
    );

    let options = FitOptions { extended: config.fit.extended, minos: config.fit.minos, verbose, seed: job.seed };
    let aggregator = ResultAggregator::new(job.clone(), &sources);
    let Capabilities { models, strategies, acceptance } = capabilities;
    let sampler = DatasetSampler::new(sources, acceptance);
    let mut rng = StdRng::seed_from_u64(job.seed);

    let (accumulator, diagnostics) =
        TrialLoop::new(&sampler, &models, &strategies, options, n_trials).run(&mut rng)?;

    let truth_records = match truth_check {
        TruthCheck::Verified => Vec::new(),
        TruthCheck::Staged(records) => records,
    };
    let truth_written = !truth_records.is_empty();
    let result = aggregator.aggregate(accumulator, truth_records)?;
    let n_rows = result.fit_results.n_rows();
    result.persist(&mut store)?;

    Ok(RunSummary {
        name: config.name.clone(),
        output: target.logical().to_path_buf(),
        job_id: job.job_id,
        seed: job.seed,
        n_trials,
        n_rows,
        truth_written,
        ms_per_trial: diagnostics.ms_per_trial(),
        mb_per_trial: diagnostics.mb_per_trial(),
    })
}
