//! Per-trial dataset sampling.
//!
//! For each source the realized size is drawn from `Poisson(nevents)`, rows are drawn without
//! replacement from the (optionally accept-reject thinned) pool, category-declaring sources tag
//! their rows, and the per-source samples are concatenated. With an acceptance the merged table
//! gets a fit-weight column.

use rand::rngs::StdRng;
use rand_distr::{Distribution, Poisson};
use std::borrow::Cow;
use tracing::trace;

use tf_core::{Acceptance, CATEGORY_COLUMN, Column, Error, EventTable, Result, WEIGHT_COLUMN};

use crate::source::ToySource;

/// Working table of one trial.
#[derive(Debug, Clone)]
pub struct SampledDataset {
    table: EventTable,
    sample_sizes: Vec<(String, u64)>,
    weight_var: Option<String>,
}

impl SampledDataset {
    /// Merged rows.
    pub fn table(&self) -> &EventTable {
        &self.table
    }

    /// Realized sample size per source, in source order.
    pub fn sample_sizes(&self) -> &[(String, u64)] {
        &self.sample_sizes
    }

    /// Name of the fit-weight column, if acceptance weights were attached.
    pub fn weight_var(&self) -> Option<&str> {
        self.weight_var.as_deref()
    }

    /// Number of merged rows.
    pub fn n_rows(&self) -> usize {
        self.table.n_rows()
    }
}

/// Draws one [`SampledDataset`] per trial from a fixed set of sources.
pub struct DatasetSampler {
    sources: Vec<ToySource>,
    acceptance: Option<Box<dyn Acceptance>>,
}

impl DatasetSampler {
    /// Sampler over `sources`, with an optional acceptance.
    pub fn new(sources: Vec<ToySource>, acceptance: Option<Box<dyn Acceptance>>) -> Self {
        Self { sources, acceptance }
    }

    /// Sources in configured order.
    pub fn sources(&self) -> &[ToySource] {
        &self.sources
    }

    /// Whether acceptance filtering and weights are applied.
    pub fn has_acceptance(&self) -> bool {
        self.acceptance.is_some()
    }

    /// Draw one trial dataset.
    pub fn sample(&self, rng: &mut StdRng) -> Result<SampledDataset> {
        let mut parts = Vec::with_capacity(self.sources.len());
        let mut sample_sizes = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let n = poisson_count(source.nevents(), rng)?;
            let pool: Cow<'_, EventTable> = match &self.acceptance {
                Some(acc) => Cow::Owned(acc.accept_reject(source.rows(), rng)?),
                None => Cow::Borrowed(source.rows()),
            };
            let available = pool.n_rows() as u64;
            if n > available {
                return Err(Error::Input(format!(
                    "toy source '{}' has {available} events available but {n} were requested",
                    source.id()
                )));
            }
            let indices = rand::seq::index::sample(rng, pool.n_rows(), n as usize).into_vec();
            let mut part = pool.take(&indices)?;
            if let Some(label) = source.category() {
                part.set_column(CATEGORY_COLUMN, Column::Label(vec![label.to_string(); indices.len()]))?;
            }
            trace!(source = %source.id(), nominal = source.nevents(), realized = n, pool = available, "sampled source");
            sample_sizes.push((source.id().to_string(), n));
            parts.push(part);
        }

        let mut table = EventTable::concat(&parts)?;
        drop(parts);

        let weight_var = match &self.acceptance {
            Some(acc) => {
                let weights = acc.fit_weights(&table)?;
                table.set_column(WEIGHT_COLUMN, Column::Float(weights))?;
                Some(WEIGHT_COLUMN.to_string())
            }
            None => None,
        };
        Ok(SampledDataset { table, sample_sizes, weight_var })
    }
}

/// Draw a `Poisson(mean)` count; a zero mean yields zero.
pub fn poisson_count(mean: u64, rng: &mut StdRng) -> Result<u64> {
    if mean == 0 {
        return Ok(0);
    }
    let dist = Poisson::new(mean as f64)
        .map_err(|e| Error::Computation(format!("invalid Poisson mean {mean}: {e}")))?;
    Ok(dist.sample(rng) as u64)
}
