//! Testing utilities for geoflow pipelines.
//!
//! - **Fixtures**: synthetic meshes and on-disk mesh datasets
//! - **Mocks**: a counting source, a rows-per-step transform and a recording
//!   sink, for checking what ran and how often
//! - **Assertions**: table comparisons with readable failure messages
//!
//! # Quick Start
//!
//! ```
//! use geoflow::prelude::*;
//! use geoflow::testing::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let source = CountingSource::new(3);
//! let sink = RecordingSink::new();
//! let (mut p, reduce) = reduction_pipeline(
//!     source.clone(),
//!     StepRows::new(|step| usize::from(step == 1)),
//!     ReduceConfig::default().with_workers(3),
//! )?;
//! let out = p.add("sink", sink.clone());
//! p.connect(reduce, out)?;
//! p.update(out)?;
//!
//! assert_eq!(sink.calls(), 1);
//! assert_eq!(column_values(&sink.last().unwrap(), "time_step"), vec![Value::Int(1)]);
//! assert_eq!(source.total_executions(), 3);
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod fixtures;
pub mod mock;

pub use assertions::*;
pub use fixtures::*;
pub use mock::*;

use crate::algorithm::Algorithm;
use crate::combiners::TableConcat;
use crate::node_id::AlgorithmId;
use crate::pipeline::Pipeline;
use crate::reduce::{MapReduce, ReduceConfig};
use anyhow::Result;

/// `source -> transform -> MapReduce(TableConcat)`, labelled `source`,
/// `transform` and `reduce`. Returns the pipeline and the reducer's id.
///
/// # Errors
/// Returns an error if the reducer configuration is invalid.
pub fn reduction_pipeline<S, T>(source: S, transform: T, config: ReduceConfig) -> Result<(Pipeline, AlgorithmId)>
where
    S: Algorithm + 'static,
    T: Algorithm + 'static,
{
    let mut p = Pipeline::new();
    let src = p.add("source", source);
    let step = p.add("transform", transform);
    let reduce = p.add("reduce", MapReduce::new(TableConcat, config)?);
    p.connect(src, step)?;
    p.connect(step, reduce)?;
    Ok((p, reduce))
}
