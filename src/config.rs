//! Run configuration for the detect-and-reduce pipeline.
//!
//! A [`RunConfig`] describes one run of the standard pipeline
//!
//! ```text
//! MeshReader -> ThresholdDetector -> MapReduce(TableConcat) [-> TableSelect] -> TableWriter
//! ```
//!
//! It can be loaded from JSON; every field has a default, so a file only
//! needs the fields it changes:
//!
//! ```json
//! {
//!   "input": { "files_regex": "data/era5_.*\\.jsonl" },
//!   "detector": { "variable": "ivt", "low_threshold": 250.0 },
//!   "reduce": { "worker_count": -1, "skip_failed": true },
//!   "output": "events.csv"
//! }
//! ```

use crate::algorithms::{TableSelect, ThresholdDetector};
use crate::combiners::TableConcat;
use crate::error::ConfigError;
use crate::io::{MeshReader, MeshReaderOptions, TableWriter};
use crate::node_id::AlgorithmId;
use crate::pipeline::Pipeline;
use crate::reduce::{MapReduce, ReduceConfig};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs::read_to_string;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputConfig {
    /// Path whose file-name part is a regex over the dataset's files.
    pub files_regex: Option<String>,
    pub serialize_io: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectorConfig {
    #[serde(default = "DetectorConfig::default_variable")]
    pub variable: String,
    #[serde(default = "DetectorConfig::default_low")]
    pub low_threshold: f64,
    /// Unbounded when absent.
    #[serde(default)]
    pub high_threshold: Option<f64>,
}

impl DetectorConfig {
    fn default_variable() -> String {
        "prw".to_string()
    }

    fn default_low() -> f64 {
        20.0
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            variable: Self::default_variable(),
            low_threshold: Self::default_low(),
            high_threshold: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReduceSection {
    /// Reducer threads; `-1` means one per core.
    #[serde(default = "ReduceSection::default_workers")]
    pub worker_count: i64,
    /// Skip failed timesteps instead of aborting the run.
    #[serde(default)]
    pub skip_failed: bool,
    #[serde(default)]
    pub first_step: Option<u64>,
    #[serde(default)]
    pub last_step: Option<u64>,
}

impl ReduceSection {
    fn default_workers() -> i64 {
        1
    }
}

impl Default for ReduceSection {
    fn default() -> Self {
        Self {
            worker_count: Self::default_workers(),
            skip_failed: false,
            first_step: None,
            last_step: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub input: InputConfig,
    pub detector: DetectorConfig,
    pub reduce: ReduceSection,
    /// Row-filter expression applied before writing.
    pub select: Option<String>,
    pub output: Option<PathBuf>,
    /// Where to save the run's metrics as JSON.
    pub metrics: Option<PathBuf>,
}

impl RunConfig {
    /// Load a JSON configuration file.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = read_to_string(path).map_err(|e| ConfigError::Invalid(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&text).map_err(|e| ConfigError::Invalid(format!("parse {}: {e}", path.display())))
    }

    /// Typed reducer configuration.
    ///
    /// # Errors
    /// Returns [`ConfigError::WorkerCount`] for a worker count other than
    /// `-1` or a positive number, or [`ConfigError::StepRange`] for an
    /// inverted step range.
    pub fn reduce_config(&self) -> Result<ReduceConfig, ConfigError> {
        let section = &self.reduce;
        let mut config = match section.worker_count {
            -1 => ReduceConfig::default().all_cores(),
            n if n >= 1 => ReduceConfig::default()
                .with_workers(usize::try_from(n).map_err(|_| ConfigError::WorkerCount(n))?),
            n => return Err(ConfigError::WorkerCount(n)),
        };
        if section.skip_failed {
            config = config.skip_failures();
        }
        config = config.steps(section.first_step, section.last_step);
        config.validate()?;
        Ok(config)
    }

    /// Check everything that can be checked without touching the input.
    ///
    /// # Errors
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input.files_regex.is_none() {
            return Err(ConfigError::Invalid("no input files_regex given".into()));
        }
        if self.output.is_none() {
            return Err(ConfigError::Invalid("no output file given".into()));
        }
        self.reduce_config()?;
        self.detector()?;
        if let Some(select) = &self.select {
            TableSelect::expression(select)?;
        }
        Ok(())
    }

    /// # Errors
    /// Returns [`ConfigError::ThresholdRange`] for an empty range.
    pub fn detector(&self) -> Result<ThresholdDetector, ConfigError> {
        let d = &self.detector;
        ThresholdDetector::new(
            d.variable.clone(),
            d.low_threshold,
            d.high_threshold.unwrap_or(f64::INFINITY),
        )
    }

    /// Build the pipeline and return it with the id of its terminal stage.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the input cannot
    /// be opened.
    pub fn build_pipeline(&self) -> Result<(Pipeline, AlgorithmId)> {
        self.validate()?;
        let files_regex = self
            .input
            .files_regex
            .as_deref()
            .ok_or_else(|| ConfigError::Invalid("no input files_regex given".into()))?;
        let output = self
            .output
            .as_ref()
            .ok_or_else(|| ConfigError::Invalid("no output file given".into()))?;

        let reader = MeshReader::open(
            files_regex,
            MeshReaderOptions {
                serialize_io: self.input.serialize_io,
            },
        )?;

        let mut p = Pipeline::new();
        let read = p.add("reader", reader);
        let detect = p.add("detect", self.detector()?);
        let reduce = p.add("reduce", MapReduce::new(TableConcat, self.reduce_config()?)?);
        p.connect(read, detect)?;
        p.connect(detect, reduce)?;

        let mut last = reduce;
        if let Some(select) = &self.select {
            let filter = p.add("select", TableSelect::expression(select)?);
            p.connect(last, filter)?;
            last = filter;
        }
        let write = p.add("writer", TableWriter::new(output));
        p.connect(last, write)?;
        Ok((p, write))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_files_fill_in_defaults() {
        let config: RunConfig =
            serde_json::from_str(r#"{"reduce": {"worker_count": 4}, "output": "out.csv"}"#).unwrap();
        assert_eq!(config.reduce.worker_count, 4);
        assert_eq!(config.detector, DetectorConfig::default());
        assert_eq!(config.reduce_config().unwrap().worker_count, 4);
    }

    #[test]
    fn worker_counts_must_be_positive_or_all_cores() {
        let mut config = RunConfig::default();
        config.reduce.worker_count = 0;
        assert!(matches!(config.reduce_config(), Err(ConfigError::WorkerCount(0))));
        config.reduce.worker_count = -2;
        assert!(matches!(config.reduce_config(), Err(ConfigError::WorkerCount(-2))));
        config.reduce.worker_count = -1;
        assert!(config.reduce_config().unwrap().worker_count >= 1);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(serde_json::from_str::<RunConfig>(r#"{"workers": 3}"#).is_err());
    }
}
