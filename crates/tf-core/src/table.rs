//! Columnar event table shared by toy sources, sampled datasets and model datasets.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{Error, Result};

/// Reserved column holding the category label of a row.
pub const CATEGORY_COLUMN: &str = "category";

/// Reserved column holding the per-row fit weight.
pub const WEIGHT_COLUMN: &str = "fit_weight";

/// One column of an [`EventTable`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Column {
    /// Numeric observable.
    Float(Vec<f64>),
    /// Text label (categories, identifiers).
    Label(Vec<String>),
}

impl Column {
    /// Number of entries.
    pub fn len(&self) -> usize {
        match self {
            Column::Float(v) => v.len(),
            Column::Label(v) => v.len(),
        }
    }

    /// Whether the column has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take(&self, indices: &[usize]) -> Column {
        match self {
            Column::Float(v) => Column::Float(indices.iter().map(|&i| v[i]).collect()),
            Column::Label(v) => Column::Label(indices.iter().map(|&i| v[i].clone()).collect()),
        }
    }

    fn filled_like(&self, n: usize) -> Column {
        match self {
            Column::Float(_) => Column::Float(vec![f64::NAN; n]),
            Column::Label(_) => Column::Label(vec![String::new(); n]),
        }
    }
}

/// Columnar table (Structure-of-Arrays) with stable column order.
#[derive(Debug, Clone, Default)]
pub struct EventTable {
    n_rows: usize,
    names: Vec<String>,
    columns: Vec<Column>,
    name_to_index: HashMap<String, usize>,
}

impl EventTable {
    /// Table with no columns and no rows.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a table from named columns. All columns must have the same length.
    pub fn from_columns(columns: impl IntoIterator<Item = (String, Column)>) -> Result<Self> {
        let mut table = Self::empty();
        let mut first = true;
        for (name, col) in columns {
            if first {
                table.n_rows = col.len();
                first = false;
            }
            table.push_column(name, col)?;
        }
        Ok(table)
    }

    fn push_column(&mut self, name: String, col: Column) -> Result<()> {
        if self.name_to_index.contains_key(&name) {
            return Err(Error::Validation(format!("duplicate column '{name}'")));
        }
        if col.len() != self.n_rows {
            return Err(Error::Validation(format!(
                "column length mismatch for '{}': expected {}, got {}",
                name,
                self.n_rows,
                col.len()
            )));
        }
        self.name_to_index.insert(name.clone(), self.names.len());
        self.names.push(name);
        self.columns.push(col);
        Ok(())
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Column names in insertion order.
    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    /// Whether a column exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.name_to_index.contains_key(name)
    }

    /// Get a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.name_to_index.get(name).map(|&i| &self.columns[i])
    }

    /// Numeric column by name (`None` if absent or not numeric).
    pub fn float(&self, name: &str) -> Option<&[f64]> {
        match self.column(name)? {
            Column::Float(v) => Some(v.as_slice()),
            Column::Label(_) => None,
        }
    }

    /// Label column by name (`None` if absent or not a label column).
    pub fn labels(&self, name: &str) -> Option<&[String]> {
        match self.column(name)? {
            Column::Label(v) => Some(v.as_slice()),
            Column::Float(_) => None,
        }
    }

    /// Add a column, replacing an existing one of the same name.
    pub fn set_column(&mut self, name: impl Into<String>, col: Column) -> Result<()> {
        let name = name.into();
        if self.names.is_empty() {
            self.n_rows = col.len();
        }
        match self.name_to_index.get(&name).copied() {
            Some(i) => {
                if col.len() != self.n_rows {
                    return Err(Error::Validation(format!(
                        "column length mismatch for '{}': expected {}, got {}",
                        name,
                        self.n_rows,
                        col.len()
                    )));
                }
                self.columns[i] = col;
                Ok(())
            }
            None => self.push_column(name, col),
        }
    }

    /// New table holding the given rows, in the given order.
    ///
    /// Indices must be in range; they may repeat.
    pub fn take(&self, indices: &[usize]) -> Result<Self> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.n_rows) {
            return Err(Error::Validation(format!(
                "row index {bad} out of range for table with {} rows",
                self.n_rows
            )));
        }
        let mut out = Self::empty();
        out.n_rows = indices.len();
        for (name, col) in self.names.iter().zip(&self.columns) {
            out.push_column(name.clone(), col.take(indices))?;
        }
        Ok(out)
    }

    /// New table holding the rows where `mask` is true.
    pub fn filter(&self, mask: &[bool]) -> Result<Self> {
        if mask.len() != self.n_rows {
            return Err(Error::Validation(format!(
                "mask length mismatch: expected {}, got {}",
                self.n_rows,
                mask.len()
            )));
        }
        let idx: Vec<usize> = mask.iter().enumerate().filter(|(_, keep)| **keep).map(|(i, _)| i).collect();
        self.take(&idx)
    }

    /// Restrict to the named columns (in the given order).
    pub fn select(&self, names: &[&str]) -> Result<Self> {
        let mut out = Self::empty();
        out.n_rows = self.n_rows;
        for &name in names {
            let col = self
                .column(name)
                .ok_or_else(|| Error::Validation(format!("missing column '{name}'")))?;
            out.push_column(name.to_string(), col.clone())?;
        }
        Ok(out)
    }

    /// Row-wise concatenation.
    ///
    /// The result carries the union of all columns (first-seen order). Rows from a table lacking
    /// a column are filled with NaN (numeric) or an empty label.
    pub fn concat(tables: &[EventTable]) -> Result<Self> {
        let mut order: Vec<(String, Column)> = Vec::new();
        for t in tables {
            for (name, col) in t.names.iter().zip(&t.columns) {
                match order.iter().find(|(n, _)| n == name) {
                    Some((_, proto)) => {
                        if std::mem::discriminant(proto) != std::mem::discriminant(col) {
                            return Err(Error::Validation(format!(
                                "column '{name}' has incompatible types across tables"
                            )));
                        }
                    }
                    None => order.push((name.clone(), col.filled_like(0))),
                }
            }
        }

        let n_rows: usize = tables.iter().map(|t| t.n_rows).sum();
        let mut out = Self::empty();
        out.n_rows = n_rows;
        for (name, proto) in order {
            let merged = match proto {
                Column::Float(_) => {
                    let mut v = Vec::with_capacity(n_rows);
                    for t in tables {
                        match t.column(&name) {
                            Some(Column::Float(c)) => v.extend_from_slice(c),
                            _ => v.extend(std::iter::repeat_n(f64::NAN, t.n_rows)),
                        }
                    }
                    Column::Float(v)
                }
                Column::Label(_) => {
                    let mut v = Vec::with_capacity(n_rows);
                    for t in tables {
                        match t.column(&name) {
                            Some(Column::Label(c)) => v.extend(c.iter().cloned()),
                            _ => v.extend(std::iter::repeat_n(String::new(), t.n_rows)),
                        }
                    }
                    Column::Label(v)
                }
            };
            out.push_column(name, merged)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xy(xs: Vec<f64>, ys: Vec<f64>) -> EventTable {
        EventTable::from_columns(vec![
            ("x".to_string(), Column::Float(xs)),
            ("y".to_string(), Column::Float(ys)),
        ])
        .unwrap()
    }

    #[test]
    fn test_from_columns_rejects_length_mismatch() {
        let err = EventTable::from_columns(vec![
            ("x".to_string(), Column::Float(vec![1.0, 2.0])),
            ("y".to_string(), Column::Float(vec![1.0])),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("length mismatch"));
    }

    #[test]
    fn test_take_and_filter() {
        let t = xy(vec![1.0, 2.0, 3.0], vec![10.0, 20.0, 30.0]);
        let taken = t.take(&[2, 0]).unwrap();
        assert_eq!(taken.float("x").unwrap(), &[3.0, 1.0]);
        assert_eq!(taken.float("y").unwrap(), &[30.0, 10.0]);

        let filtered = t.filter(&[false, true, true]).unwrap();
        assert_eq!(filtered.n_rows(), 2);
        assert_eq!(filtered.float("x").unwrap(), &[2.0, 3.0]);
        assert!(t.take(&[3]).is_err());
    }

    #[test]
    fn test_concat_fills_missing_columns() {
        let a = xy(vec![1.0], vec![2.0]);
        let mut b = EventTable::from_columns(vec![("x".to_string(), Column::Float(vec![5.0, 6.0]))])
            .unwrap();
        b.set_column(CATEGORY_COLUMN, Column::Label(vec!["bkg".into(), "bkg".into()])).unwrap();

        let merged = EventTable::concat(&[a, b]).unwrap();
        assert_eq!(merged.n_rows(), 3);
        assert_eq!(merged.column_names(), &["x", "y", "category"]);
        assert_eq!(merged.float("x").unwrap(), &[1.0, 5.0, 6.0]);
        let y = merged.float("y").unwrap();
        assert_eq!(y[0], 2.0);
        assert!(y[1].is_nan() && y[2].is_nan());
        assert_eq!(merged.labels(CATEGORY_COLUMN).unwrap(), &["", "bkg", "bkg"]);
    }

    #[test]
    fn test_select_missing_column() {
        let t = xy(vec![1.0], vec![2.0]);
        assert_eq!(t.select(&["y"]).unwrap().column_names(), &["y"]);
        assert!(t.select(&["z"]).is_err());
    }

    #[test]
    fn test_set_column_replaces() {
        let mut t = xy(vec![1.0, 2.0], vec![3.0, 4.0]);
        t.set_column("x", Column::Float(vec![7.0, 8.0])).unwrap();
        assert_eq!(t.float("x").unwrap(), &[7.0, 8.0]);
        assert!(t.set_column("z", Column::Float(vec![1.0])).is_err());
    }
}
