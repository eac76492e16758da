//! Model-native dataset handed to fit strategies.

use std::collections::BTreeSet;

use crate::table::{Column, EventTable};
use crate::{Error, Result};

/// Dataset adapted to one fit model: transformed rows plus weight and category metadata.
#[derive(Debug, Clone)]
pub struct ModelDataset {
    name: String,
    table: EventTable,
    weight_var: Option<String>,
    categories: BTreeSet<String>,
}

impl ModelDataset {
    /// Create a model dataset.
    ///
    /// The weight column (if any) must be numeric, finite and non-negative; every category
    /// variable must be present.
    pub fn new(
        name: impl Into<String>,
        table: EventTable,
        weight_var: Option<String>,
        categories: BTreeSet<String>,
    ) -> Result<Self> {
        let name = name.into();
        if let Some(w) = &weight_var {
            let weights = table.float(w).ok_or_else(|| {
                Error::Validation(format!("dataset '{name}': missing numeric weight column '{w}'"))
            })?;
            if weights.iter().any(|x| !x.is_finite()) {
                return Err(Error::Validation(format!("dataset '{name}': weights must be finite")));
            }
            if weights.iter().any(|x| *x < 0.0) {
                return Err(Error::Validation(format!(
                    "dataset '{name}': negative event weights are not supported"
                )));
            }
        }
        for cat in &categories {
            if !table.has_column(cat) {
                return Err(Error::Validation(format!(
                    "dataset '{name}': missing category column '{cat}'"
                )));
            }
        }
        Ok(Self { name, table, weight_var, categories })
    }

    /// Dataset name (`data_<model>`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Underlying rows.
    pub fn table(&self) -> &EventTable {
        &self.table
    }

    /// Number of rows.
    pub fn n_events(&self) -> usize {
        self.table.n_rows()
    }

    /// Name of the weight column, if the dataset is weighted.
    pub fn weight_var(&self) -> Option<&str> {
        self.weight_var.as_deref()
    }

    /// Category variables declared by the model.
    pub fn categories(&self) -> &BTreeSet<String> {
        &self.categories
    }

    /// Per-row weights, if the dataset is weighted.
    pub fn weights(&self) -> Option<&[f64]> {
        self.weight_var.as_deref().and_then(|w| self.table.float(w))
    }

    /// Weight of row `i` (1 for unweighted datasets).
    pub fn weight(&self, i: usize) -> f64 {
        self.weights().map_or(1.0, |w| w[i])
    }

    /// Sum of weights and sum of squared weights.
    pub fn weight_sums(&self) -> (f64, f64) {
        match self.weights() {
            Some(w) => (w.iter().sum(), w.iter().map(|x| x * x).sum()),
            None => {
                let n = self.n_events() as f64;
                (n, n)
            }
        }
    }

    /// Rows whose category variable `var` equals `label`, as a new dataset.
    pub fn category_subset(&self, var: &str, label: &str) -> Result<ModelDataset> {
        let labels = match self.table.column(var) {
            Some(Column::Label(v)) => v,
            Some(Column::Float(_)) => {
                return Err(Error::Validation(format!("category column '{var}' is not a label")));
            }
            None => return Err(Error::Validation(format!("missing category column '{var}'"))),
        };
        let mask: Vec<bool> = labels.iter().map(|l| l == label).collect();
        let table = self.table.filter(&mask)?;
        Ok(Self {
            name: format!("{}_{}", self.name, label),
            table,
            weight_var: self.weight_var.clone(),
            categories: self.categories.clone(),
        })
    }

    /// Same dataset restricted to (possibly repeated) row indices.
    pub fn resample(&self, indices: &[usize]) -> Result<ModelDataset> {
        Ok(Self {
            name: self.name.clone(),
            table: self.table.take(indices)?,
            weight_var: self.weight_var.clone(),
            categories: self.categories.clone(),
        })
    }
}
