//! The trial loop: sample, bind, fit, record, release.
//!
//! Every trial owns its sampled dataset, the per-model datasets and the strategy outcomes in
//! local scopes, so they are released after use even when a trial aborts the loop.

use rand::Rng;
use rand::rngs::StdRng;
use std::collections::BTreeMap;
use tracing::{debug, info};

use tf_core::{
    CovarianceMatrix, Error, FitModel, FitOptions, FitStrategy, ParameterEstimate, Result, snapshot_outcome,
};

use crate::binder;
use crate::diagnostics::{LoopDiagnostics, TrialProbe};
use crate::sampler::DatasetSampler;

/// Progress is logged after every this many trials.
pub const PROGRESS_EVERY: usize = 20;

/// What one strategy invocation produced, detached from its outcome object.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialRecord {
    /// Trial index.
    pub fitnum: usize,
    /// Parameter estimates.
    pub parameters: Vec<ParameterEstimate>,
    /// Covariance matrix, if the strategy reported one.
    pub covariance: Option<CovarianceMatrix>,
    /// Fit status (0 = success).
    pub status: i32,
    /// Negative log-likelihood.
    pub nll: f64,
}

/// Per-(model, strategy) records and per-source generated sizes of a run.
///
/// Appended to only by the trial loop; handed to the aggregator by value afterwards.
#[derive(Debug, Clone, Default)]
pub struct TrialAccumulator {
    results: Vec<((String, String), Vec<TrialRecord>)>,
    sample_sizes: Vec<(String, Vec<u64>)>,
}

impl TrialAccumulator {
    /// Empty accumulator with one slot per (model, strategy) pair and one series per source.
    pub fn new(models: &[String], strategies: &[String], sources: &[String]) -> Self {
        let results = models
            .iter()
            .flat_map(|m| strategies.iter().map(move |s| ((m.clone(), s.clone()), Vec::new())))
            .collect();
        let sample_sizes = sources.iter().map(|s| (s.clone(), Vec::new())).collect();
        Self { results, sample_sizes }
    }

    pub(crate) fn record_sample_sizes(&mut self, sizes: &[(String, u64)]) {
        for (source, n) in sizes {
            match self.sample_sizes.iter_mut().find(|(s, _)| s == source) {
                Some((_, series)) => series.push(*n),
                None => self.sample_sizes.push((source.clone(), vec![*n])),
            }
        }
    }

    pub(crate) fn record_fit(&mut self, model: &str, strategy: &str, record: TrialRecord) {
        match self.results.iter_mut().find(|((m, s), _)| m == model && s == strategy) {
            Some((_, records)) => records.push(record),
            None => self.results.push(((model.to_string(), strategy.to_string()), vec![record])),
        }
    }

    /// Records grouped by (model, strategy), in configured order.
    pub fn results(&self) -> &[((String, String), Vec<TrialRecord>)] {
        &self.results
    }

    /// Generated sample size series per source, indexed by trial.
    pub fn sample_sizes(&self) -> &[(String, Vec<u64>)] {
        &self.sample_sizes
    }

    /// Number of trials with recorded sample sizes.
    pub fn n_trials(&self) -> usize {
        self.sample_sizes.first().map_or(0, |(_, v)| v.len())
    }

    /// Generated size of each source in trial `fitnum`.
    pub fn sizes_of_trial(&self, fitnum: usize) -> BTreeMap<&str, u64> {
        self.sample_sizes
            .iter()
            .filter_map(|(s, series)| series.get(fitnum).map(|n| (s.as_str(), *n)))
            .collect()
    }
}

/// Drives the configured number of trials.
pub struct TrialLoop<'a> {
    sampler: &'a DatasetSampler,
    models: &'a [(String, Box<dyn FitModel>)],
    strategies: &'a [Box<dyn FitStrategy>],
    options: FitOptions,
    n_trials: usize,
}

impl<'a> TrialLoop<'a> {
    /// Loop over bound capabilities.
    pub fn new(
        sampler: &'a DatasetSampler,
        models: &'a [(String, Box<dyn FitModel>)],
        strategies: &'a [Box<dyn FitStrategy>],
        options: FitOptions,
        n_trials: usize,
    ) -> Self {
        Self { sampler, models, strategies, options, n_trials }
    }

    /// Run all trials, drawing every random number from `rng`.
    pub fn run(&self, rng: &mut StdRng) -> Result<(TrialAccumulator, LoopDiagnostics)> {
        let model_names: Vec<String> = self.models.iter().map(|(n, _)| n.clone()).collect();
        let strategy_names: Vec<String> = self.strategies.iter().map(|s| s.name().to_string()).collect();
        let source_ids: Vec<String> = self.sampler.sources().iter().map(|s| s.id().to_string()).collect();
        let mut acc = TrialAccumulator::new(&model_names, &strategy_names, &source_ids);
        let mut diagnostics = LoopDiagnostics::default();

        for fitnum in 0..self.n_trials {
            let probe = TrialProbe::start();
            self.run_trial(fitnum, rng, &mut acc)?;
            diagnostics.record(probe.finish());
            if (fitnum + 1) % PROGRESS_EVERY == 0 {
                info!(completed = fitnum + 1, total = self.n_trials, "sample-fit progress");
            }
        }

        info!(
            n_trials = self.n_trials,
            mb_per_fit = diagnostics.mb_per_trial(),
            ms_per_fit = diagnostics.ms_per_trial(),
            "sample-fit loop finished"
        );
        Ok((acc, diagnostics))
    }

    fn run_trial(&self, fitnum: usize, rng: &mut StdRng, acc: &mut TrialAccumulator) -> Result<()> {
        let sampled = self.sampler.sample(rng)?;
        debug!(fitnum, n_rows = sampled.n_rows(), "sampled dataset");
        acc.record_sample_sizes(sampled.sample_sizes());

        for (model_name, model) in self.models {
            let dataset = binder::bind(model_name, model.as_ref(), &sampled)?;
            for strategy in self.strategies {
                let options = FitOptions { seed: rng.random(), ..self.options };
                let outcome = strategy
                    .fit(model.as_ref(), &dataset, &options)
                    .map_err(|e| fit_error(fitnum, model_name, strategy.name(), e))?;
                let (parameters, covariance) = snapshot_outcome(outcome.as_ref());
                let record = TrialRecord {
                    fitnum,
                    parameters,
                    covariance,
                    status: outcome.status(),
                    nll: outcome.nll(),
                };
                drop(outcome);
                if record.status != 0 {
                    debug!(fitnum, model = %model_name, strategy = %strategy.name(), status = record.status, "fit did not converge");
                }
                acc.record_fit(model_name, strategy.name(), record);
            }
            drop(dataset);
        }
        drop(sampled);
        Ok(())
    }
}

/// Configuration problems surfacing inside a trial keep their class; everything else a strategy
/// raises is a fit execution failure.
fn fit_error(fitnum: usize, model: &str, strategy: &str, err: Error) -> Error {
    match err {
        Error::Config { .. } | Error::ModelConfig(_) => err,
        other => Error::FitExecution(format!(
            "trial {fitnum}, model '{model}', strategy '{strategy}' -> {other}"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fitnum: usize) -> TrialRecord {
        TrialRecord { fitnum, parameters: Vec::new(), covariance: None, status: 0, nll: 0.0 }
    }

    #[test]
    fn test_accumulator_keeps_configured_order() {
        let mut acc = TrialAccumulator::new(
            &["M2".to_string(), "M1".to_string()],
            &["simple".to_string(), "bootstrap".to_string()],
            &["A".to_string()],
        );
        acc.record_sample_sizes(&[("A".to_string(), 98)]);
        acc.record_fit("M1", "bootstrap", record(0));
        acc.record_fit("M2", "simple", record(0));
        let keys: Vec<(&str, &str)> =
            acc.results().iter().map(|((m, s), _)| (m.as_str(), s.as_str())).collect();
        assert_eq!(
            keys,
            vec![("M2", "simple"), ("M2", "bootstrap"), ("M1", "simple"), ("M1", "bootstrap")]
        );
        assert_eq!(acc.n_trials(), 1);
        assert_eq!(acc.sizes_of_trial(0)["A"], 98);
        assert!(acc.sizes_of_trial(1).is_empty());
    }

    #[test]
    fn test_fit_error_classes() {
        let e = fit_error(3, "M", "simple", Error::Computation("boom".into()));
        assert_eq!(e.exit_status().code(), 4);
        assert!(e.to_string().contains("trial 3"));
        let e = fit_error(3, "M", "simple", Error::ModelConfig("bad".into()));
        assert_eq!(e.exit_status().code(), 3);
    }
}
