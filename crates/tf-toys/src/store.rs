//! Append-only store of named result tables.
//!
//! A store is one JSON document holding every table of an output target. All appends of a run
//! are staged in memory and land with a single [`FitStore::commit`], which replaces the file
//! through a synced temporary file and a rename.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tf_core::{Error, Result};

/// Schema tag written into every store document.
pub const SCHEMA_VERSION: &str = "toyfit_fit_store_v1";

/// One table cell.
///
/// Non-finite floats serialize as `null` and read back as [`Cell::Null`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    /// Missing value.
    Null,
    /// Integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Text.
    Text(String),
}

impl Cell {
    /// Numeric value (`None` for null and text cells).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(v) => Some(*v as f64),
            Cell::Float(v) => Some(*v),
            Cell::Null | Cell::Text(_) => None,
        }
    }

    /// Integer value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Text value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Whether the cell is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Cell::Float(v)
    }
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Cell::Int(v)
    }
}

impl From<u64> for Cell {
    fn from(v: u64) -> Self {
        i64::try_from(v).map_or(Cell::Float(v as f64), Cell::Int)
    }
}

impl From<usize> for Cell {
    fn from(v: usize) -> Self {
        Cell::from(v as u64)
    }
}

impl From<i32> for Cell {
    fn from(v: i32) -> Self {
        Cell::Int(i64::from(v))
    }
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Cell::Text(v.to_string())
    }
}

impl From<String> for Cell {
    fn from(v: String) -> Self {
        Cell::Text(v)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(v: Option<T>) -> Self {
        v.map_or(Cell::Null, Into::into)
    }
}

/// Row-oriented table with named columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Frame {
    /// Empty frame with the given columns.
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns, rows: Vec::new() }
    }

    /// Column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows, aligned with [`Frame::columns`].
    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    /// Position of a column.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Whether a column exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Cell at `row` in column `name`.
    pub fn get(&self, row: usize, name: &str) -> Option<&Cell> {
        let col = self.column_index(name)?;
        self.rows.get(row).and_then(|r| r.get(col))
    }

    /// All cells of column `name`.
    pub fn column(&self, name: &str) -> Option<Vec<&Cell>> {
        let col = self.column_index(name)?;
        Some(self.rows.iter().map(|r| &r[col]).collect())
    }

    fn check_shape(&self) -> std::result::Result<(), String> {
        let width = self.columns.len();
        match self.rows.iter().position(|r| r.len() != width) {
            Some(i) => Err(format!("row {i} has {} cells, expected {width}", self.rows[i].len())),
            None => Ok(()),
        }
    }

    /// Append a row; it must have one cell per column.
    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::Storage(format!(
                "row has {} cells, frame has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Append a row given as `(column, cell)` pairs; absent columns become null.
    pub fn push_record(&mut self, record: &BTreeMap<String, Cell>) -> Result<()> {
        if let Some(unknown) = record.keys().find(|k| !self.has_column(k)) {
            return Err(Error::Storage(format!("unknown column '{unknown}'")));
        }
        let row = self.columns.iter().map(|c| record.get(c).cloned().unwrap_or(Cell::Null)).collect();
        self.push_row(row)
    }

    /// Append all rows of `other`.
    ///
    /// The result has the union of both column sets (existing columns first); gaps are null.
    pub fn append(&mut self, other: Frame) {
        for name in &other.columns {
            if !self.has_column(name) {
                self.columns.push(name.clone());
                for row in &mut self.rows {
                    row.push(Cell::Null);
                }
            }
        }
        let positions: Vec<usize> =
            other.columns.iter().filter_map(|name| self.column_index(name)).collect();
        for row in other.rows {
            let mut out = vec![Cell::Null; self.columns.len()];
            for (cell, &pos) in row.into_iter().zip(&positions) {
                out[pos] = cell;
            }
            self.rows.push(out);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreDocument {
    schema_version: String,
    tables: BTreeMap<String, Frame>,
}

/// Named tables of one output target.
#[derive(Debug, Clone)]
pub struct FitStore {
    path: PathBuf,
    tables: BTreeMap<String, Frame>,
    dirty: bool,
}

impl FitStore {
    /// Open the store at `path`; a missing file yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let tables = if path.exists() {
            let bytes = fs::read(&path)?;
            let doc: StoreDocument = serde_json::from_slice(&bytes).map_err(|e| {
                Error::Storage(format!("cannot read fit store {} -> {e}", path.display()))
            })?;
            if doc.schema_version != SCHEMA_VERSION {
                return Err(Error::Storage(format!(
                    "fit store {} has schema '{}', expected '{SCHEMA_VERSION}'",
                    path.display(),
                    doc.schema_version
                )));
            }
            for (name, frame) in &doc.tables {
                frame.check_shape().map_err(|msg| {
                    Error::Storage(format!("fit store {} table '{name}': {msg}", path.display()))
                })?;
            }
            doc.tables
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, tables, dirty: false })
    }

    /// File backing the store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether table `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Table `name`, if present.
    pub fn table(&self, name: &str) -> Option<&Frame> {
        self.tables.get(name)
    }

    /// Names of all tables.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Whether there are staged, uncommitted appends.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Stage rows for table `name`, creating it if needed.
    pub fn append(&mut self, name: &str, frame: Frame) {
        match self.tables.get_mut(name) {
            Some(existing) => existing.append(frame),
            None => {
                self.tables.insert(name.to_string(), frame);
            }
        }
        self.dirty = true;
    }

    /// Write every table to disk in one atomic replacement.
    ///
    /// When the store path is a symbolic link, the file it points to is replaced and the link
    /// is left in place.
    pub fn commit(&mut self) -> Result<()> {
        let doc = StoreDocument { schema_version: SCHEMA_VERSION.to_string(), tables: self.tables.clone() };
        let bytes = serde_json::to_vec(&doc)?;
        let target = resolve_links(&self.path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        atomic_write(&target, &bytes)
            .map_err(|e| Error::Storage(format!("cannot write fit store {} -> {e}", target.display())))?;
        self.dirty = false;
        Ok(())
    }
}

const MAX_LINK_HOPS: usize = 16;

/// Follow symbolic links from `path` to the file they finally name (which may not exist yet).
fn resolve_links(path: &Path) -> Result<PathBuf> {
    let mut current = path.to_path_buf();
    for _ in 0..MAX_LINK_HOPS {
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                let next = fs::read_link(&current)?;
                current = match current.parent() {
                    Some(parent) if next.is_relative() => parent.join(next),
                    _ => next,
                };
            }
            _ => return Ok(current),
        }
    }
    Err(Error::Storage(format!("too many levels of symbolic links at {}", path.display())))
}

fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    let temp_name = format!(
        ".tmp_{}_{}",
        std::process::id(),
        path.file_name().map(|s| s.to_string_lossy()).unwrap_or_default()
    );
    let temp_path = parent.join(temp_name);

    let mut file = File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(columns: &[&str], rows: Vec<Vec<Cell>>) -> Frame {
        let mut f = Frame::new(columns.iter().map(|c| c.to_string()).collect());
        for r in rows {
            f.push_row(r).unwrap();
        }
        f
    }

    #[test]
    fn test_append_unions_columns() {
        let mut a = frame(&["fitnum", "mu"], vec![vec![0i64.into(), 1.5.into()]]);
        let b = frame(&["fitnum", "sigma"], vec![vec![1i64.into(), 0.5.into()]]);
        a.append(b);
        assert_eq!(a.columns(), &["fitnum", "mu", "sigma"]);
        assert_eq!(a.n_rows(), 2);
        assert_eq!(a.get(0, "sigma"), Some(&Cell::Null));
        assert_eq!(a.get(1, "mu"), Some(&Cell::Null));
        assert_eq!(a.get(1, "sigma").and_then(Cell::as_f64), Some(0.5));
    }

    #[test]
    fn test_push_record_fills_nulls() {
        let mut f = Frame::new(vec!["a".into(), "b".into()]);
        let rec = BTreeMap::from([("b".to_string(), Cell::from("x"))]);
        f.push_record(&rec).unwrap();
        assert_eq!(f.rows()[0], vec![Cell::Null, Cell::Text("x".into())]);
        let bad = BTreeMap::from([("c".to_string(), Cell::Int(1))]);
        assert!(f.push_record(&bad).is_err());
    }

    #[test]
    fn test_commit_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toys/fits/study.json");

        let mut store = FitStore::open(&path).unwrap();
        assert!(!store.contains("fit_results"));
        store.append(
            "fit_results",
            frame(&["fitnum", "x", "jobid"], vec![vec![0i64.into(), 0.1.into(), "local".into()]]),
        );
        assert!(store.is_dirty());
        store.commit().unwrap();
        assert!(!store.is_dirty());

        let mut reopened = FitStore::open(&path).unwrap();
        let t = reopened.table("fit_results").unwrap();
        assert_eq!(t.get(0, "x").and_then(Cell::as_f64), Some(0.1));
        assert_eq!(t.get(0, "fitnum").and_then(Cell::as_i64), Some(0));
        assert_eq!(t.get(0, "jobid").and_then(Cell::as_str), Some("local"));

        reopened.append("fit_results", frame(&["fitnum"], vec![vec![1i64.into()]]));
        reopened.commit().unwrap();
        assert_eq!(FitStore::open(&path).unwrap().table("fit_results").unwrap().n_rows(), 2);

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp_"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_nan_reads_back_as_null() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        let mut store = FitStore::open(&path).unwrap();
        store.append("t", frame(&["v"], vec![vec![f64::NAN.into()]]));
        store.commit().unwrap();
        let store = FitStore::open(&path).unwrap();
        assert!(store.table("t").unwrap().get(0, "v").unwrap().is_null());
    }

    #[test]
    fn test_short_row_rejected_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        std::fs::write(
            &path,
            r#"{"schema_version": "toyfit_fit_store_v1",
                "tables": {"fit_results": {"columns": ["model_name", "fit_strategy", "pull_mu"],
                                           "rows": [["M", "simple", 0.1], ["M"]]}}}"#,
        )
        .unwrap();
        let err = FitStore::open(&path).unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(err.to_string().contains("row 1"), "{err}");
    }

    #[cfg(unix)]
    #[test]
    fn test_commit_writes_through_link() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("scratch/study.json");
        let link = dir.path().join("fits/study.json");
        std::fs::create_dir_all(real.parent().unwrap()).unwrap();
        std::fs::create_dir_all(link.parent().unwrap()).unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let mut store = FitStore::open(&link).unwrap();
        store.append("t", frame(&["v"], vec![vec![1i64.into()]]));
        store.commit().unwrap();
        let mut store = FitStore::open(&link).unwrap();
        store.append("t", frame(&["v"], vec![vec![2i64.into()]]));
        store.commit().unwrap();

        assert_eq!(std::fs::read_link(&link).unwrap(), real);
        assert_eq!(FitStore::open(&real).unwrap().table("t").unwrap().n_rows(), 2);
        let names: Vec<&str> = store.table_names().collect();
        assert_eq!(names, vec!["t"]);
    }

    #[test]
    fn test_wrong_schema_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        std::fs::write(&path, r#"{"schema_version": "other", "tables": {}}"#).unwrap();
        assert!(matches!(FitStore::open(&path), Err(Error::Storage(_))));
    }
}
