//! # geoflow
//!
//! A **demand-driven data-flow engine** for gridded geoscience analysis.
//! Pipelines are graphs of algorithms (readers, per-timestep detectors,
//! map-reduce stages, writers) connected port to port. Nothing runs until the
//! terminal stage is updated; then data is pulled from the sources, one
//! requested unit at a time, and every (algorithm, request) pair is computed
//! at most once.
//!
//! ## Key Features
//!
//! - **Two-phase protocol** - metadata and requests travel upstream before any
//!   bulk data is produced, so bad requests fail before anything runs
//! - **Single-flight cache** - concurrent demands for the same output wait for
//!   one computation
//! - **Map-reduce over timesteps** - one task per step on a per-stage thread
//!   pool, merged in step order for results independent of the worker count
//! - **Failure policies** - abort on the first failed step, or skip failed
//!   steps and report them
//! - **I/O** - JSON-lines meshes, CSV tables, CSV/JSON-lines output with
//!   transparent gzip
//!
//! ## Quick Start
//!
//! ```no_run
//! use geoflow::prelude::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut p = Pipeline::new();
//! let read = p.add("reader", MeshReader::open(r"data/era5_.*\.jsonl", MeshReaderOptions::default())?);
//! let detect = p.add("detect", ThresholdDetector::new("ivt", 250.0, f64::INFINITY)?);
//! let reduce = p.add("reduce", MapReduce::new(TableConcat, ReduceConfig::default().all_cores())?);
//! let select = p.add("select", TableSelect::expression("cells >= 10")?);
//! let write = p.add("writer", TableWriter::new("events.csv.gz"));
//! p.connect(read, detect)?;
//! p.connect(detect, reduce)?;
//! p.connect(reduce, select)?;
//! p.connect(select, write)?;
//!
//! println!("{}", p.explain(write, Request::new())?);
//! p.update(write)?;
//! p.metrics().print();
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Algorithm
//!
//! Every stage implements [`Algorithm`]: it reports output
//! [`Metadata`] from its inputs' metadata, rewrites downstream [`Request`]s
//! into upstream ones, and executes one request into a [`Dataset`].
//!
//! ### Pipeline
//!
//! A [`Pipeline`] owns the graph, the metadata cache, the execution cache and
//! the metrics. [`Pipeline::update`] runs one cycle: metadata pass, request
//! pass (producing a [`RequestPlan`]), then execution.
//!
//! ### Map-reduce
//!
//! [`MapReduce`] fans one request out over the upstream domain (one request
//! per timestep), runs the units on its own [`Scheduler`], and folds the
//! results with a [`Combiner`] such as [`TableConcat`].
//!
//! ## Feature Flags
//!
//! - `io-csv` - CSV table reader and CSV output
//! - `compression-gzip` - gzip for every reader and writer
//! - `cli` - the `geoflow` command line tool
//!
//! ## Module Overview
//!
//! - [`pipeline`] - update cycles and plan execution
//! - [`graph`] - ports and connections
//! - [`planner`] - metadata and request passes, request validation
//! - [`cache`] - single-flight execution cache
//! - [`scheduler`] - bounded worker pools
//! - [`reduce`] / [`combiners`] - map-reduce stages and merge operators
//! - [`algorithms`] / [`io`] - built-in stages
//! - [`expr`] - row-filter expressions
//! - [`testing`] - fixtures and mocks for pipeline tests

pub mod algorithm;
pub mod algorithms;
pub mod cache;
pub mod combiners;
pub mod config;
pub mod dataset;
pub mod error;
pub mod expr;
pub mod graph;
pub mod io;
pub mod metadata;
pub mod metrics;
pub mod node_id;
pub mod pipeline;
pub mod planner;
pub mod reduce;
pub mod request;
pub mod scheduler;
pub mod table;
pub mod testing;
pub mod value;

mod runner;

pub use algorithm::{Algorithm, CachePolicy, ExecuteContext, FailurePolicy, UpstreamRequest};
pub use combiners::{Combiner, FnCombiner, MeshSum, TableConcat};
pub use dataset::{Artifact, CartesianMesh, Dataset, DatasetRef};
pub use error::{ConfigError, GraphError, PipelineError, RequestError, TableError};
pub use metadata::Metadata;
pub use node_id::AlgorithmId;
pub use pipeline::Pipeline;
pub use planner::RequestPlan;
pub use reduce::{MapReduce, ReduceConfig, SkippedUnit};
pub use request::Request;
pub use scheduler::Scheduler;
pub use table::{Column, ColumnType, Schema, Table};
pub use value::Value;

/// Everything needed to build and run a pipeline.
pub mod prelude {
    pub use crate::algorithm::{
        Algorithm, CachePolicy, ExecuteContext, FailurePolicy, UpstreamRequest,
    };
    pub use crate::algorithms::{
        FilterType, ProgrammableAlgorithm, TableSelect, TemporalAverage, ThresholdDetector,
    };
    pub use crate::combiners::{Combiner, FnCombiner, MeshSum, TableConcat};
    pub use crate::dataset::{Artifact, CartesianMesh, Dataset, DatasetRef};
    pub use crate::error::{ConfigError, GraphError, PipelineError, RequestError};
    #[cfg(feature = "io-csv")]
    pub use crate::io::{TableReader, TableReaderOptions};
    pub use crate::io::{MeshReader, MeshReaderOptions, TableWriter};
    pub use crate::metadata::Metadata;
    pub use crate::node_id::AlgorithmId;
    pub use crate::pipeline::Pipeline;
    pub use crate::reduce::{MapReduce, ReduceConfig};
    pub use crate::request::Request;
    pub use crate::table::{ColumnType, Schema, Table};
    pub use crate::value::Value;
}
