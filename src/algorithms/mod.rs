//! Built-in per-unit transforms and custom stages.
//!
//! - [`ThresholdDetector`]: one table row per timestep whose grid has cells
//!   inside a value range.
//! - [`TemporalAverage`]: moving average over a window of timesteps.
//! - [`TableSelect`]: keep or remove table rows by predicate.
//! - [`ProgrammableAlgorithm`]: a stage assembled from closures.

pub mod programmable;
pub mod table_filter;
pub mod temporal_average;
pub mod threshold;

pub use programmable::ProgrammableAlgorithm;
pub use table_filter::TableSelect;
pub use temporal_average::{FilterType, TemporalAverage};
pub use threshold::ThresholdDetector;
