//! Result aggregation: flat result table, covariance tables, pulls and the final write.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use tf_core::{ParameterEstimate, Result};

use crate::batch::JobIdentity;
use crate::controller::{TrialAccumulator, TrialRecord};
use crate::source::ToySource;
use crate::store::{Cell, FitStore, Frame};
use crate::truth::{GeneratorTruth, truth_table_name};

/// Name of the flat result table.
pub const RESULTS_TABLE: &str = "fit_results";

/// Leading bookkeeping columns of the result table.
pub const BOOKKEEPING_COLUMNS: [&str; 5] = ["fitnum", "model_name", "fit_strategy", "seed", "jobid"];

/// Name of the covariance table of one trial.
pub fn covariance_table_name(job_id: &str, fitnum: usize) -> String {
    format!("covariance/{job_id}/{fitnum}")
}

/// Generated-size column of a source.
pub fn n_gen_column(source_id: &str) -> String {
    format!("n_gen_{source_id}")
}

/// Fitted-minus-truth difference and the scaled pull of one parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pull {
    /// `fitted - truth`.
    pub diff: f64,
    /// `diff` divided by the uncertainty on the side of the truth (`None` if that is not a
    /// positive finite number).
    pub pull: Option<f64>,
}

/// Pull of one estimate against a truth value.
pub fn compute_pull(estimate: &ParameterEstimate, truth: f64) -> Pull {
    let diff = estimate.value - truth;
    let scale = match estimate.asymmetric {
        Some((lo, _)) if diff > 0.0 => lo.abs(),
        Some((_, hi)) if diff < 0.0 => hi.abs(),
        _ => estimate.error,
    };
    let pull = (scale.is_finite() && scale > 0.0).then(|| diff / scale);
    Pull { diff, pull }
}

/// Pulls of every estimate that has a truth value.
pub fn compute_pulls(
    estimates: &[ParameterEstimate],
    truth: &BTreeMap<String, f64>,
) -> BTreeMap<String, Pull> {
    estimates
        .iter()
        .filter_map(|e| truth.get(&e.name).map(|t| (e.name.clone(), compute_pull(e, *t))))
        .collect()
}

/// Merge per-source truth; names with conflicting values across sources are ambiguous.
pub fn merge_truth(sources: &[ToySource]) -> (BTreeMap<String, f64>, BTreeSet<String>) {
    let mut merged: BTreeMap<String, f64> = BTreeMap::new();
    let mut ambiguous = BTreeSet::new();
    for source in sources {
        for (name, value) in source.truth() {
            match merged.get(name) {
                Some(existing) if existing.to_bits() != value.to_bits() => {
                    ambiguous.insert(name.clone());
                }
                Some(_) => {}
                None => {
                    merged.insert(name.clone(), *value);
                }
            }
        }
    }
    for name in &ambiguous {
        merged.remove(name);
    }
    (merged, ambiguous)
}

/// Everything one run writes to its output target.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateResult {
    /// One row per (trial, model, strategy).
    pub fit_results: Frame,
    /// Covariance tables keyed by table name.
    pub covariances: Vec<(String, Frame)>,
    /// Truth records staged by the consistency check.
    pub truth_records: Vec<GeneratorTruth>,
}

impl AggregateResult {
    /// Stage every table in `store` and commit them in one write.
    pub fn persist(self, store: &mut FitStore) -> Result<()> {
        for record in &self.truth_records {
            store.append(&truth_table_name(&record.source_id), record.to_frame()?);
        }
        let n_rows = self.fit_results.n_rows();
        store.append(RESULTS_TABLE, self.fit_results);
        let n_cov = self.covariances.len();
        for (name, frame) in self.covariances {
            store.append(&name, frame);
        }
        store.commit()?;
        info!(
            path = %store.path().display(),
            rows = n_rows,
            covariance_tables = n_cov,
            truth_tables = self.truth_records.len(),
            "results stored"
        );
        Ok(())
    }
}

/// Builds the [`AggregateResult`] of a finished loop.
#[derive(Debug, Clone)]
pub struct ResultAggregator {
    job: JobIdentity,
    source_ids: Vec<String>,
    truth: BTreeMap<String, f64>,
}

impl ResultAggregator {
    /// Aggregator for a run of `job` over `sources`.
    pub fn new(job: JobIdentity, sources: &[ToySource]) -> Self {
        let (truth, ambiguous) = merge_truth(sources);
        if !ambiguous.is_empty() {
            warn!(
                parameters = %ambiguous.iter().cloned().collect::<Vec<_>>().join(", "),
                "generator truth differs between sources; no pulls for these parameters"
            );
        }
        Self { job, source_ids: sources.iter().map(|s| s.id().to_string()).collect(), truth }
    }

    /// Truth values pulls are computed against.
    pub fn truth(&self) -> &BTreeMap<String, f64> {
        &self.truth
    }

    /// Flatten the accumulated records.
    pub fn aggregate(&self, acc: TrialAccumulator, truth_records: Vec<GeneratorTruth>) -> Result<AggregateResult> {
        let columns = self.result_columns(&acc);
        let mut fit_results = Frame::new(columns);
        let mut covariances: BTreeMap<usize, Frame> = BTreeMap::new();

        for ((model, strategy), records) in acc.results() {
            for record in records {
                fit_results.push_record(&self.result_row(&acc, model, strategy, record))?;
                if let Some(cov) = &record.covariance {
                    let block = covariance_block(model, strategy, &cov.names, &cov.values)?;
                    covariances.entry(record.fitnum).or_default().append(block);
                }
            }
        }

        let covariances = covariances
            .into_iter()
            .map(|(fitnum, frame)| (covariance_table_name(&self.job.job_id, fitnum), frame))
            .collect();
        Ok(AggregateResult { fit_results, covariances, truth_records })
    }

    fn result_columns(&self, acc: &TrialAccumulator) -> Vec<String> {
        let mut columns: Vec<String> = BOOKKEEPING_COLUMNS.iter().map(|c| c.to_string()).collect();
        columns.extend(self.source_ids.iter().map(|s| n_gen_column(s)));
        columns.push("status".into());
        columns.push("nll".into());

        let mut order: Vec<String> = Vec::new();
        let mut asymmetric: BTreeSet<String> = BTreeSet::new();
        for (_, records) in acc.results() {
            for record in records {
                for p in &record.parameters {
                    if !order.contains(&p.name) {
                        order.push(p.name.clone());
                    }
                    if p.asymmetric.is_some() {
                        asymmetric.insert(p.name.clone());
                    }
                }
            }
        }
        for p in &order {
            columns.push(p.clone());
            columns.push(format!("{p}_err"));
            if asymmetric.contains(p) {
                columns.push(format!("{p}_err_lo"));
                columns.push(format!("{p}_err_hi"));
            }
            if self.truth.contains_key(p) {
                columns.push(format!("pull_diff_{p}"));
                columns.push(format!("pull_{p}"));
            }
        }
        columns
    }

    fn result_row(
        &self,
        acc: &TrialAccumulator,
        model: &str,
        strategy: &str,
        record: &TrialRecord,
    ) -> BTreeMap<String, Cell> {
        let mut row: BTreeMap<String, Cell> = BTreeMap::new();
        row.insert("fitnum".into(), Cell::from(record.fitnum));
        row.insert("model_name".into(), Cell::from(model));
        row.insert("fit_strategy".into(), Cell::from(strategy));
        row.insert("seed".into(), Cell::from(self.job.seed));
        row.insert("jobid".into(), Cell::from(self.job.job_id.as_str()));
        for (source, n) in acc.sizes_of_trial(record.fitnum) {
            row.insert(n_gen_column(source), Cell::from(n));
        }
        row.insert("status".into(), Cell::from(record.status));
        row.insert("nll".into(), Cell::from(record.nll));

        for p in &record.parameters {
            row.insert(p.name.clone(), Cell::from(p.value));
            row.insert(format!("{}_err", p.name), Cell::from(p.error));
            if let Some((lo, hi)) = p.asymmetric {
                row.insert(format!("{}_err_lo", p.name), Cell::from(lo));
                row.insert(format!("{}_err_hi", p.name), Cell::from(hi));
            }
        }
        for (name, pull) in compute_pulls(&record.parameters, &self.truth) {
            row.insert(format!("pull_diff_{name}"), Cell::from(pull.diff));
            row.insert(format!("pull_{name}"), Cell::from(pull.pull));
        }
        row
    }
}

fn covariance_block(model: &str, strategy: &str, names: &[String], values: &[f64]) -> Result<Frame> {
    let n = names.len();
    let columns = ["model_name", "fit_strategy", "parameter"]
        .iter()
        .map(|c| c.to_string())
        .chain(names.iter().cloned())
        .collect();
    let mut frame = Frame::new(columns);
    for (i, name) in names.iter().enumerate() {
        let row = [Cell::from(model), Cell::from(strategy), Cell::from(name.as_str())]
            .into_iter()
            .chain(values[i * n..(i + 1) * n].iter().map(|v| Cell::from(*v)))
            .collect();
        frame.push_row(row)?;
    }
    Ok(frame)
}
