//! Pull summaries over a stored result table.

use serde::Serialize;

use tf_core::{Error, Result};

use crate::aggregate::RESULTS_TABLE;
use crate::store::{Cell, FitStore, Frame};

/// Pull statistics of one parameter for one (model, strategy) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PullSummary {
    /// Model name.
    pub model_name: String,
    /// Fit strategy name.
    pub fit_strategy: String,
    /// Parameter name.
    pub parameter: String,
    /// Number of converged fits with a finite pull.
    pub entries: usize,
    /// Mean pull.
    pub mean: f64,
    /// Sample standard deviation of the pull.
    pub std: f64,
    /// Fraction of pulls with `|pull| < 1`.
    pub coverage: f64,
}

/// Summarize every `pull_<p>` column of the stored result table.
pub fn summarize_store(store: &FitStore) -> Result<Vec<PullSummary>> {
    let table = store.table(RESULTS_TABLE).ok_or_else(|| {
        Error::Input(format!("{} has no '{RESULTS_TABLE}' table", store.path().display()))
    })?;
    summarize_pulls(table)
}

/// Summarize the pull columns of a result table; only rows with status 0 contribute.
pub fn summarize_pulls(table: &Frame) -> Result<Vec<PullSummary>> {
    let col = |name: &str| {
        table
            .column_index(name)
            .ok_or_else(|| Error::Validation(format!("result table has no '{name}' column")))
    };
    let model_col = col("model_name")?;
    let strategy_col = col("fit_strategy")?;
    let status_col = table.column_index("status");

    let pull_columns: Vec<(usize, &str)> = table
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, c)| !c.starts_with("pull_diff_"))
        .filter_map(|(i, c)| c.strip_prefix("pull_").map(|p| (i, p)))
        .collect();

    let mut groups: Vec<(&str, &str)> = Vec::new();
    for row in table.rows() {
        let key = (row[model_col].as_str().unwrap_or(""), row[strategy_col].as_str().unwrap_or(""));
        if !groups.contains(&key) {
            groups.push(key);
        }
    }

    let mut out = Vec::new();
    for (model, strategy) in groups {
        for &(i, parameter) in &pull_columns {
            let pulls: Vec<f64> = table
                .rows()
                .iter()
                .filter(|r| r[model_col].as_str().unwrap_or("") == model)
                .filter(|r| r[strategy_col].as_str().unwrap_or("") == strategy)
                .filter(|r| status_col.is_none_or(|s| r[s].as_i64() == Some(0)))
                .filter_map(|r| r[i].as_f64())
                .filter(|v| v.is_finite())
                .collect();
            if pulls.is_empty() {
                continue;
            }
            out.push(describe(model, strategy, parameter, &pulls));
        }
    }
    Ok(out)
}

fn describe(model: &str, strategy: &str, parameter: &str, pulls: &[f64]) -> PullSummary {
    let n = pulls.len() as f64;
    let mean = pulls.iter().sum::<f64>() / n;
    let std = if pulls.len() > 1 {
        (pulls.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
    } else {
        f64::NAN
    };
    let coverage = pulls.iter().filter(|p| p.abs() < 1.0).count() as f64 / n;
    PullSummary {
        model_name: model.to_string(),
        fit_strategy: strategy.to_string(),
        parameter: parameter.to_string(),
        entries: pulls.len(),
        mean,
        std,
        coverage,
    }
}
