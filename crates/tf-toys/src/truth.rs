//! Generator-truth bookkeeping across runs sharing an output target.
//!
//! Truth records are write-once per output target: either every source already has a record and
//! all of them match the inputs exactly, or none has one and all are staged for the final write.

use std::collections::BTreeMap;
use tracing::{debug, info};

use tf_core::{Error, Result};

use crate::source::ToySource;
use crate::store::{Cell, FitStore, Frame};

/// Bookkeeping columns of a truth table; every other column is a truth value.
pub const TRUTH_META_COLUMNS: [&str; 3] = ["id", "source", "nevents"];

/// Name of the truth table of a source.
pub fn truth_table_name(source_id: &str) -> String {
    format!("gen_{source_id}")
}

/// Generator parameters of one source plus their provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorTruth {
    /// Source identifier.
    pub source_id: String,
    /// Originating toy file.
    pub source: String,
    /// Nominal event count of the source.
    pub nevents: u64,
    /// Truth values by parameter name.
    pub values: BTreeMap<String, f64>,
}

impl GeneratorTruth {
    /// Truth record of a loaded source.
    pub fn of(source: &ToySource) -> Self {
        Self {
            source_id: source.id().to_string(),
            source: source.path().display().to_string(),
            nevents: source.nevents(),
            values: source.truth().clone(),
        }
    }

    /// One-row table holding this record.
    pub fn to_frame(&self) -> Result<Frame> {
        let columns = TRUTH_META_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(self.values.keys().cloned())
            .collect();
        let mut frame = Frame::new(columns);
        let row = [
            Cell::from(self.source_id.as_str()),
            Cell::from(self.source.as_str()),
            Cell::from(self.nevents),
        ]
        .into_iter()
        .chain(self.values.values().map(|v| Cell::from(*v)))
        .collect();
        frame.push_row(row)?;
        Ok(frame)
    }

    /// Truth values stored in the first row of a truth table.
    pub fn values_from_frame(frame: &Frame) -> BTreeMap<String, Option<f64>> {
        frame
            .columns()
            .iter()
            .filter(|c| !TRUTH_META_COLUMNS.contains(&c.as_str()))
            .map(|c| (c.clone(), frame.get(0, c).and_then(Cell::as_f64)))
            .collect()
    }
}

/// Outcome of reconciling the inputs with the output target.
#[derive(Debug, Clone, PartialEq)]
pub enum TruthCheck {
    /// Every source has a matching record already.
    Verified,
    /// No source has a record; these are written with the results.
    Staged(Vec<GeneratorTruth>),
}

impl TruthCheck {
    /// Records to write with the results.
    pub fn staged(&self) -> &[GeneratorTruth] {
        match self {
            TruthCheck::Verified => &[],
            TruthCheck::Staged(records) => records,
        }
    }
}

/// Reconcile the generator truth of `sources` with the records in `store`.
pub fn check_generator_truth(sources: &[ToySource], store: &FitStore) -> Result<TruthCheck> {
    let present: Vec<&ToySource> =
        sources.iter().filter(|s| store.contains(&truth_table_name(s.id()))).collect();

    if present.is_empty() {
        let staged: Vec<GeneratorTruth> = sources.iter().map(GeneratorTruth::of).collect();
        debug!(n = staged.len(), "staging generator truth records");
        return Ok(TruthCheck::Staged(staged));
    }

    if present.len() != sources.len() {
        let missing: Vec<&str> = sources
            .iter()
            .filter(|s| !store.contains(&truth_table_name(s.id())))
            .map(|s| s.id())
            .collect();
        return Err(Error::Consistency(format!(
            "output {} has generator truth for some sources but not for {}",
            store.path().display(),
            missing.join(", ")
        )));
    }

    for source in sources {
        let name = truth_table_name(source.id());
        let Some(frame) = store.table(&name) else {
            return Err(Error::Consistency(format!("truth table '{name}' vanished")));
        };
        let stored = GeneratorTruth::values_from_frame(frame);
        let current = source.truth();
        if stored.len() != current.len() || stored.keys().zip(current.keys()).any(|(a, b)| a != b) {
            return Err(Error::Consistency(format!(
                "generator parameters of source '{}' differ from previous fits: stored [{}], current [{}]",
                source.id(),
                stored.keys().cloned().collect::<Vec<_>>().join(", "),
                current.keys().cloned().collect::<Vec<_>>().join(", ")
            )));
        }
        for (var, value) in current {
            let same = match stored.get(var).copied().flatten() {
                Some(old) => old == *value,
                None => value.is_nan(),
            };
            if !same {
                return Err(Error::Consistency(format!(
                    "generator value of '{var}' for source '{}' differs from previous fits",
                    source.id()
                )));
            }
        }
    }
    info!(n_sources = sources.len(), "generator truth matches previous fits");
    Ok(TruthCheck::Verified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tf_core::{Column, EventTable};

    fn source(id: &str, truth: &[(&str, f64)]) -> ToySource {
        let rows = EventTable::from_columns(vec![("x".to_string(), Column::Float(vec![1.0]))]).unwrap();
        let truth = truth.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        ToySource::from_parts(id, rows, truth, 10, None)
    }

    fn empty_store() -> (tempfile::TempDir, FitStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FitStore::open(dir.path().join("out.json")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_fresh_output_stages_all() {
        let (_dir, store) = empty_store();
        let sources = vec![source("A", &[("mu", 1.0)]), source("B", &[])];
        let check = check_generator_truth(&sources, &store).unwrap();
        assert_eq!(check.staged().len(), 2);
        assert_eq!(check.staged()[0].values["mu"], 1.0);
    }

    #[test]
    fn test_frame_round_trip_matches() {
        let (_dir, mut store) = empty_store();
        let sources = vec![source("A", &[("mu", 0.1 + 0.2), ("sigma", 1.5)])];
        for rec in check_generator_truth(&sources, &store).unwrap().staged() {
            store.append(&truth_table_name(&rec.source_id), rec.to_frame().unwrap());
        }
        store.commit().unwrap();

        let reopened = FitStore::open(store.path()).unwrap();
        let frame = reopened.table("gen_A").unwrap();
        assert_eq!(&frame.columns()[..3], &["id", "source", "nevents"]);
        assert_eq!(check_generator_truth(&sources, &reopened).unwrap(), TruthCheck::Verified);
    }

    #[test]
    fn test_mismatch_is_consistency_error() {
        let (_dir, mut store) = empty_store();
        let rec = GeneratorTruth::of(&source("A", &[("mu", 1.0)]));
        store.append("gen_A", rec.to_frame().unwrap());

        let err = check_generator_truth(&[source("A", &[("mu", 1.0000001)])], &store).unwrap_err();
        assert_eq!(err.exit_status().code(), 5);
        let err = check_generator_truth(&[source("A", &[("mu", 1.0), ("tau", 2.0)])], &store).unwrap_err();
        assert!(matches!(err, Error::Consistency(_)));
    }

    #[test]
    fn test_partial_records_are_fatal() {
        let (_dir, mut store) = empty_store();
        store.append("gen_A", GeneratorTruth::of(&source("A", &[])).to_frame().unwrap());
        let err = check_generator_truth(&[source("A", &[]), source("B", &[])], &store).unwrap_err();
        assert!(matches!(err, Error::Consistency(_)));
        assert!(err.to_string().contains('B'));
    }
}
