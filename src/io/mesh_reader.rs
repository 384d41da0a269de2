//! Gridded source backed by JSON-lines files.
//!
//! A dataset is named by a path whose file-name part is a regular expression,
//! e.g. `data/era5_.*\.jsonl`. Every matching file in the directory is part of
//! the dataset; files are ordered by name and each non-blank line is one
//! timestep, serialized as a [`CartesianMesh`]:
//!
//! ```text
//! {"time_step":0,"time":0.0,"x":[0,1,2],"y":[10,11],"arrays":{"prw":[...]}}
//! ```
//!
//! Steps are numbered globally across files. The time step stored in a
//! record is ignored in favour of its position, so the mesh served for
//! `time_step = i` always declares step `i`. Gzip-compressed files are read
//! transparently.

use crate::algorithm::{Algorithm, ExecuteContext};
use crate::dataset::{CartesianMesh, Dataset};
use crate::error::ConfigError;
use crate::io::compression::open_reader;
use crate::metadata::{Metadata, keys};
use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::Deserialize;
use std::fs::read_dir;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

#[derive(Clone, Debug, Default)]
pub struct MeshReaderOptions {
    /// Serialize file access across threads, for file systems that do not
    /// cope with concurrent readers.
    pub serialize_io: bool,
}

/// Where one step lives.
#[derive(Clone, Debug)]
struct StepLocation {
    file: usize,
    line: usize,
}

#[derive(Deserialize)]
struct StepHeader {
    #[serde(default)]
    time: f64,
}

#[derive(Debug)]
pub struct MeshReader {
    files: Vec<PathBuf>,
    steps: Vec<StepLocation>,
    metadata: Metadata,
    io_lock: Option<Mutex<()>>,
}

impl MeshReader {
    /// Scan the files matching `files_regex` and build the dataset metadata.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the regex is invalid, nothing matches, or
    /// a matching file cannot be read as mesh records.
    pub fn open(files_regex: &str, options: MeshReaderOptions) -> Result<Self, ConfigError> {
        let files = matching_files(files_regex)?;
        let mut steps = Vec::new();
        let mut times = Vec::new();
        let mut first: Option<CartesianMesh> = None;

        for (file, path) in files.iter().enumerate() {
            let lines = read_lines(path).map_err(|e| ConfigError::Invalid(format!("{e:#}")))?;
            for (line, text) in lines.iter().enumerate() {
                if text.trim().is_empty() {
                    continue;
                }
                if first.is_none() {
                    let mesh: CartesianMesh = serde_json::from_str(text).map_err(|e| {
                        ConfigError::Invalid(format!("{}:{}: {e}", path.display(), line + 1))
                    })?;
                    first = Some(mesh);
                }
                let header: StepHeader = serde_json::from_str(text)
                    .map_err(|e| ConfigError::Invalid(format!("{}:{}: {e}", path.display(), line + 1)))?;
                times.push(header.time);
                steps.push(StepLocation { file, line });
            }
        }

        let mut metadata = Metadata::new()
            .with(
                keys::FILES,
                files.iter().map(|f| f.display().to_string()).collect::<Vec<_>>(),
            )
            .with(keys::STEP_COUNT, steps.len())
            .with(keys::NUMBER_OF_TIME_STEPS, steps.len())
            .with(keys::COORDINATES_T, times);
        if let Some(mesh) = &first {
            metadata.set(keys::VARIABLES, mesh.arrays.keys().cloned().collect::<Vec<_>>());
            metadata.set(keys::COORDINATES_X, mesh.x.clone());
            metadata.set(keys::COORDINATES_Y, mesh.y.clone());
            if let Some(extent) = mesh.extent() {
                metadata.set(keys::WHOLE_EXTENT, extent.to_vec());
            }
        }
        info!(pattern = files_regex, files = files.len(), steps = steps.len(), "mesh dataset opened");

        Ok(Self {
            files,
            steps,
            metadata,
            io_lock: options.serialize_io.then(|| Mutex::new(())),
        })
    }

    #[must_use]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    #[must_use]
    pub fn number_of_steps(&self) -> usize {
        self.steps.len()
    }

    /// Read step `index` as stored, without applying any request.
    ///
    /// # Errors
    /// Returns an error if the step does not exist or cannot be parsed.
    pub fn read_step(&self, index: u64) -> Result<CartesianMesh> {
        let location = usize::try_from(index)
            .ok()
            .and_then(|i| self.steps.get(i))
            .ok_or_else(|| anyhow!("step {index} is outside the {} available steps", self.steps.len()))?;
        let path = &self.files[location.file];

        let guard = self
            .io_lock
            .as_ref()
            .map(|lock| lock.lock().unwrap_or_else(PoisonError::into_inner));
        let text = BufReader::new(open_reader(path)?)
            .lines()
            .nth(location.line)
            .ok_or_else(|| anyhow!("{} is shorter than when it was opened", path.display()))?
            .with_context(|| format!("read {}", path.display()))?;
        drop(guard);

        let mut mesh: CartesianMesh = serde_json::from_str(&text)
            .with_context(|| format!("parse step {index} at {}:{}", path.display(), location.line + 1))?;
        mesh.time_step = index;
        Ok(mesh)
    }
}

impl Algorithm for MeshReader {
    fn name(&self) -> &str {
        "mesh_reader"
    }

    fn input_ports(&self) -> usize {
        0
    }

    fn output_metadata(&self, _inputs: &[Metadata]) -> Result<Metadata> {
        Ok(self.metadata.clone())
    }

    fn execute(&self, ctx: &ExecuteContext<'_>) -> Result<Dataset> {
        let request = ctx.request();
        let step = request.time_step().unwrap_or(0);
        let mut mesh = self.read_step(step)?;
        if let Some(arrays) = request.arrays() {
            mesh = mesh.with_arrays(&arrays);
        }
        if let Some(extent) = request.extent() {
            mesh = mesh.subset(extent);
        }
        debug!(step, arrays = mesh.arrays.len(), nx = mesh.nx(), ny = mesh.ny(), "mesh read");
        Ok(Dataset::Mesh(mesh))
    }
}

/// Files in the directory of `files_regex` whose names match its last
/// component, sorted by name.
fn matching_files(files_regex: &str) -> Result<Vec<PathBuf>, ConfigError> {
    let pattern = Path::new(files_regex);
    let name = pattern
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| ConfigError::Invalid(format!("'{files_regex}' has no file name part")))?;
    let dir = match pattern.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let re = Regex::new(&format!("^(?:{name})$"))?;

    let entries = read_dir(&dir).map_err(|e| ConfigError::Invalid(format!("list {}: {e}", dir.display())))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .filter(|entry| re.is_match(&entry.file_name().to_string_lossy()))
        .map(|entry| entry.path())
        .collect();
    if files.is_empty() {
        return Err(ConfigError::NoFiles(files_regex.to_string()));
    }
    files.sort();
    Ok(files)
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    BufReader::new(open_reader(path)?)
        .lines()
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("read {}", path.display()))
}
