//! Table sink.
//!
//! Writes its input table as CSV or JSON lines, chosen from the file
//! extension (`.csv`, `.jsonl`/`.json`), gzip-compressed when the name ends
//! in `.gz`. Output goes to a temporary file in the destination directory
//! that is renamed over the target only once it is complete, so a failed run
//! never leaves a truncated artifact behind.

use crate::algorithm::{Algorithm, CachePolicy, ExecuteContext};
use crate::dataset::{Artifact, Dataset};
use crate::io::compression::{FinishWrite, auto_detect_writer, content_extension};
use crate::table::Table;
use crate::value::Value;
use anyhow::{Context, Result, bail};
use std::fs::create_dir_all;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// On-disk table format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableFormat {
    #[cfg(feature = "io-csv")]
    Csv,
    JsonLines,
}

impl TableFormat {
    /// Format named by the extension of `path`.
    ///
    /// # Errors
    /// Returns an error for an unknown or missing extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        match content_extension(path).as_deref() {
            #[cfg(feature = "io-csv")]
            Some("csv") => Ok(TableFormat::Csv),
            Some("jsonl" | "json") => Ok(TableFormat::JsonLines),
            Some(other) => bail!("no table writer for '.{other}' files ({})", path.display()),
            None => bail!("cannot infer a table format for {}", path.display()),
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            #[cfg(feature = "io-csv")]
            TableFormat::Csv => "csv",
            TableFormat::JsonLines => "jsonl",
        }
    }
}

/// Sink that persists the table it receives.
#[derive(Clone, Debug)]
pub struct TableWriter {
    path: PathBuf,
}

impl TableWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `table` to `path` atomically.
    ///
    /// # Errors
    /// Returns an error if the format is unknown or any I/O step fails; the
    /// target is left untouched in that case.
    pub fn write(path: &Path, table: &Table) -> Result<Artifact> {
        let format = TableFormat::from_path(path)?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        create_dir_all(dir).with_context(|| format!("mkdir -p {}", dir.display()))?;

        let temp = tempfile::Builder::new()
            .prefix(".geoflow-")
            .suffix(".part")
            .tempfile_in(dir)
            .with_context(|| format!("create temporary file in {}", dir.display()))?;
        let file = temp.reopen().context("reopen temporary file")?;
        let out = auto_detect_writer(file, path);
        match format {
            #[cfg(feature = "io-csv")]
            TableFormat::Csv => write_csv(out, table)?,
            TableFormat::JsonLines => write_jsonl(out, table)?,
        }
        temp.persist(path)
            .with_context(|| format!("rename into {}", path.display()))?;

        Ok(Artifact {
            path: path.to_path_buf(),
            rows: table.num_rows(),
            format: format.name().to_string(),
        })
    }
}

#[cfg(feature = "io-csv")]
fn write_csv(out: Box<dyn FinishWrite>, table: &Table) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(out);
    wtr.write_record(table.schema().names())?;
    for (i, row) in table.rows().enumerate() {
        wtr.write_record(row.iter().map(cell_text))
            .with_context(|| format!("write CSV row #{}", i + 1))?;
    }
    let out = wtr.into_inner().map_err(|e| e.into_error())?;
    out.finish()?;
    Ok(())
}

#[cfg(feature = "io-csv")]
fn cell_text(value: &Value) -> String {
    match value {
        Value::Str(s) => s.clone(),
        other => other.to_string(),
    }
}

fn write_jsonl(mut out: Box<dyn FinishWrite>, table: &Table) -> Result<()> {
    let names: Vec<&str> = table.schema().names().collect();
    for (i, row) in table.rows().enumerate() {
        let record: serde_json::Map<String, serde_json::Value> = names
            .iter()
            .zip(row)
            .map(|(name, value)| Ok(((*name).to_string(), serde_json::to_value(value)?)))
            .collect::<Result<_, serde_json::Error>>()?;
        serde_json::to_writer(&mut out, &record).with_context(|| format!("write JSON line #{}", i + 1))?;
        out.write_all(b"\n")?;
    }
    out.finish()?;
    Ok(())
}

impl Algorithm for TableWriter {
    fn name(&self) -> &str {
        "table_writer"
    }

    fn execute(&self, ctx: &ExecuteContext<'_>) -> Result<Dataset> {
        let table = ctx.table(0)?;
        let artifact = Self::write(&self.path, table)?;
        info!(path = %artifact.path.display(), rows = artifact.rows, format = %artifact.format, "table written");
        Ok(Dataset::Artifact(artifact))
    }

    fn cache_policy(&self) -> CachePolicy {
        CachePolicy::Never
    }
}
