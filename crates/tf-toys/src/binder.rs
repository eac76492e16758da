//! Adapts a trial's sampled table to the dataset a model expects.

use std::collections::BTreeSet;
use tf_core::{Error, FitModel, ModelDataset, Result};

use crate::sampler::SampledDataset;

/// Name of the model dataset bound for `model_name`.
pub fn dataset_name(model_name: &str) -> String {
    format!("data_{model_name}")
}

/// Transform `sampled` with `model` and wrap it with weight and category metadata.
///
/// Columns the model needs (observables, categories, the weight column) that are absent after
/// the transform are a configuration error.
pub fn bind(model_name: &str, model: &dyn FitModel, sampled: &SampledDataset) -> Result<ModelDataset> {
    let table = model.transform(sampled.table()).map_err(|e| match e {
        Error::Validation(msg) => Error::config(format!("model '{model_name}': {msg}")),
        other => other,
    })?;

    let categories = model.category_variables();
    let missing: BTreeSet<String> = model
        .observables()
        .into_iter()
        .chain(categories.iter().cloned())
        .chain(sampled.weight_var().map(str::to_string))
        .filter(|c| !table.has_column(c))
        .collect();
    if !missing.is_empty() {
        return Err(Error::Config {
            message: format!(
                "model '{model_name}' is missing required columns -> {}",
                missing.into_iter().collect::<Vec<_>>().join(", ")
            ),
            missing_keys: Vec::new(),
        });
    }

    ModelDataset::new(
        dataset_name(model_name),
        table,
        sampled.weight_var().map(str::to_string),
        categories,
    )
}
