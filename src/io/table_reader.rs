//! CSV table source.
//!
//! The file is loaded once, when the reader is opened. Column types are
//! inferred: a column is `int` if every cell parses as an integer, `float`
//! if every cell parses as a number, and `str` otherwise.
//!
//! With an index column the reader serves one step at a time: each run of
//! equal, contiguous index values is one step, the metadata declares the
//! number of steps, and a request for `time_step = i` returns only the rows
//! of step `i`. Without one, every request gets the whole table.

use crate::algorithm::{Algorithm, CachePolicy, ExecuteContext};
use crate::dataset::Dataset;
use crate::io::compression::open_reader;
use crate::metadata::{Metadata, keys};
use crate::request;
use crate::table::{Column, ColumnType, Schema, Table};
use crate::value::Value;
use anyhow::{Context, Result, anyhow, bail};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Column appended by [`TableReaderOptions::generate_original_ids`].
pub const ORIGINAL_IDS: &str = "original_ids";

#[derive(Clone, Debug, Default)]
pub struct TableReaderOptions {
    /// Column whose contiguous runs of equal values define the steps.
    pub index_column: Option<String>,
    /// Append the row position in the file as an `original_ids` column.
    pub generate_original_ids: bool,
    /// `(column, metadata key)` pairs: each column's values are copied, as a
    /// list, into the output metadata under the key.
    pub metadata_columns: Vec<(String, String)>,
}

#[derive(Clone, Debug)]
pub struct TableReader {
    path: PathBuf,
    options: TableReaderOptions,
    table: Table,
    steps: Vec<Range<usize>>,
}

impl TableReader {
    /// Load `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read as CSV, or a named column
    /// does not exist or (for the index column) is not an integer column.
    pub fn open(path: impl AsRef<Path>, options: TableReaderOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut table = read_csv_table(&path)?;

        let steps = match &options.index_column {
            Some(name) => {
                let Some(Column::Int(index)) = table.column(name) else {
                    bail!("index column '{name}' of {} is missing or not an integer column", path.display());
                };
                contiguous_runs(index)
            }
            None => vec![0..table.num_rows()],
        };
        for (column, _) in &options.metadata_columns {
            if table.column(column).is_none() {
                bail!("metadata column '{column}' is not in {}", path.display());
            }
        }
        if options.generate_original_ids {
            let ids = (0..table.num_rows()).map(|i| i as i64).collect();
            table.add_column(ORIGINAL_IDS, Column::Int(ids))?;
        }
        debug!(path = %path.display(), rows = table.num_rows(), steps = steps.len(), "table loaded");

        Ok(Self {
            path,
            options,
            table,
            steps,
        })
    }

    #[must_use]
    pub fn table(&self) -> &Table {
        &self.table
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Algorithm for TableReader {
    fn name(&self) -> &str {
        "table_reader"
    }

    fn input_ports(&self) -> usize {
        0
    }

    fn output_metadata(&self, _inputs: &[Metadata]) -> Result<Metadata> {
        let mut md = Metadata::new();
        md.set_schema(self.table.schema());
        if self.options.index_column.is_some() {
            md.set(keys::NUMBER_OF_TIME_STEPS, self.steps.len());
        }
        for (column, key) in &self.options.metadata_columns {
            let values = self
                .table
                .column(column)
                .map(|c| (0..c.len()).filter_map(|i| c.get(i)).collect::<Vec<_>>())
                .unwrap_or_default();
            md.set(key.clone(), Value::List(values));
        }
        Ok(md)
    }

    fn execute(&self, ctx: &ExecuteContext<'_>) -> Result<Dataset> {
        if self.options.index_column.is_none() {
            return Ok(Dataset::Table(self.table.clone()));
        }
        let step = ctx.request().time_step().unwrap_or(0);
        let rows = usize::try_from(step)
            .ok()
            .and_then(|s| self.steps.get(s))
            .ok_or_else(|| anyhow!("step {step} is outside the {} steps of {}", self.steps.len(), self.path.display()))?;
        let keep: Vec<bool> = (0..self.table.num_rows()).map(|i| rows.contains(&i)).collect();
        let mut out = self.table.select_rows(&keep);
        out.attributes_mut().set(request::keys::TIME_STEP, step);
        Ok(Dataset::Table(out))
    }

    fn cache_policy(&self) -> CachePolicy {
        CachePolicy::Persistent
    }
}

fn contiguous_runs(index: &[i64]) -> Vec<Range<usize>> {
    let mut runs: Vec<Range<usize>> = Vec::new();
    for (i, value) in index.iter().enumerate() {
        match runs.last_mut() {
            Some(run) if index[run.start] == *value => run.end = i + 1,
            _ => runs.push(i..i + 1),
        }
    }
    runs
}

fn read_csv_table(path: &Path) -> Result<Table> {
    let input = open_reader(path)?;
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(input);
    let headers: Vec<String> = rdr
        .headers()
        .with_context(|| format!("read CSV header of {}", path.display()))?
        .iter()
        .map(str::to_string)
        .collect();
    let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for (i, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("parse CSV record #{} in {}", i + 1, path.display()))?;
        for (column, cell) in cells.iter_mut().zip(record.iter()) {
            column.push(cell.trim().to_string());
        }
    }

    let mut table = Table::empty(Schema::new());
    for (name, column) in headers.into_iter().zip(cells) {
        table.add_column(name, infer_column(column))?;
    }
    Ok(table)
}

fn infer_column(cells: Vec<String>) -> Column {
    if let Ok(ints) = cells.iter().map(|c| c.parse::<i64>()).collect::<Result<Vec<_>, _>>() {
        return Column::Int(ints);
    }
    if let Ok(floats) = cells.iter().map(|c| c.parse::<f64>()).collect::<Result<Vec<_>, _>>() {
        return Column::Float(floats);
    }
    Column::Str(cells)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_split_on_value_changes() {
        assert_eq!(contiguous_runs(&[0, 0, 1, 1, 1, 0]), vec![0..2, 2..5, 5..6]);
        assert!(contiguous_runs(&[]).is_empty());
    }

    #[test]
    fn columns_take_the_narrowest_type() {
        let strings = |v: &[&str]| v.iter().map(|s| (*s).to_string()).collect::<Vec<_>>();
        assert_eq!(infer_column(strings(&["1", "2"])).ty(), ColumnType::Int);
        assert_eq!(infer_column(strings(&["1", "2.5"])).ty(), ColumnType::Float);
        assert_eq!(infer_column(strings(&["1", "ar"])).ty(), ColumnType::Str);
    }
}
