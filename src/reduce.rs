//! Map-reduce stage.
//!
//! [`MapReduce`] turns one downstream request into one upstream request per
//! unit of the upstream iteration domain (typically one per timestep). The
//! units run as tasks on the stage's own [`Scheduler`], each realizing its
//! upstream chain through the execution cache, and the results are folded
//! with a [`Combiner`].
//!
//! One reduction moves through these states:
//!
//! ```text
//! Idle -> FanningOut -> AwaitingTasks -> Merging -> Done
//!              \              \              \
//!               +--------------+--------------+--> Error
//! ```
//!
//! Results are merged in ascending unit order, never completion order, so the
//! output is identical for any worker count.
//!
//! ```no_run
//! use geoflow::prelude::*;
//! # fn main() -> anyhow::Result<()> {
//! let config = ReduceConfig::default().with_workers(4).skip_failures();
//! let reduce = MapReduce::new(TableConcat, config)?;
//! # Ok(())
//! # }
//! ```

use crate::algorithm::{Algorithm, ExecuteContext, FailurePolicy, FanOut, UpstreamRequest};
use crate::cache::CacheKey;
use crate::combiners::Combiner;
use crate::dataset::Dataset;
use crate::error::{ConfigError, PipelineError, SharedError};
use crate::graph::Stage;
use crate::metadata::{Metadata, keys};
use crate::request::{self, Request};
use crate::runner::Runner;
use crate::scheduler::{Scheduler, TaskOutcome};
use anyhow::{Result, anyhow};
use std::ops::Range;
use tracing::{debug, info, warn};

/// A unit excluded from a reduction under [`FailurePolicy::Skip`].
#[derive(Debug, Clone)]
pub struct SkippedUnit {
    pub request: Request,
    pub error: PipelineError,
}

/// Lifecycle of one reduction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReductionState {
    Idle,
    FanningOut,
    AwaitingTasks,
    Merging,
    Done,
    Error,
}

impl ReductionState {
    #[must_use]
    pub fn can_move_to(self, next: ReductionState) -> bool {
        use ReductionState::{AwaitingTasks, Done, Error, FanningOut, Idle, Merging};
        matches!(
            (self, next),
            (Idle, FanningOut)
                | (FanningOut, AwaitingTasks)
                | (AwaitingTasks, Merging)
                | (Merging, Done)
                | (FanningOut | AwaitingTasks | Merging, Error)
        )
    }
}

struct Tracker<'a> {
    reducer: &'a str,
    state: ReductionState,
}

impl Tracker<'_> {
    fn advance(&mut self, next: ReductionState) {
        debug_assert!(self.state.can_move_to(next), "{:?} -> {next:?}", self.state);
        debug!(reducer = self.reducer, from = ?self.state, to = ?next, "reduction state");
        self.state = next;
    }
}

/// Typed configuration of a map-reduce stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReduceConfig {
    /// Size of this stage's worker pool. `1` runs units inline, in order.
    pub worker_count: usize,
    pub on_failure: FailurePolicy,
    /// First unit to process (inclusive).
    pub first_step: Option<u64>,
    /// Last unit to process (inclusive).
    pub last_step: Option<u64>,
}

impl Default for ReduceConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            on_failure: FailurePolicy::Abort,
            first_step: None,
            last_step: None,
        }
    }
}

impl ReduceConfig {
    #[must_use]
    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    #[must_use]
    pub fn all_cores(self) -> Self {
        self.with_workers(num_cpus::get().max(1))
    }

    #[must_use]
    pub fn skip_failures(mut self) -> Self {
        self.on_failure = FailurePolicy::Skip;
        self
    }

    #[must_use]
    pub fn steps(mut self, first: Option<u64>, last: Option<u64>) -> Self {
        self.first_step = first;
        self.last_step = last;
        self
    }

    /// # Errors
    /// Returns a [`ConfigError`] for zero workers or an inverted step range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::WorkerCount(0));
        }
        if let (Some(first), Some(last)) = (self.first_step, self.last_step)
            && first > last
        {
            return Err(ConfigError::StepRange { first, last });
        }
        Ok(())
    }

    /// Units of a domain of `size` selected by the step range.
    #[must_use]
    pub fn units(&self, size: u64) -> Range<u64> {
        let end = self.last_step.map_or(size, |last| last.saturating_add(1).min(size));
        let start = self.first_step.unwrap_or(0).min(end);
        start..end
    }
}

/// Map-reduce stage over the upstream iteration domain.
pub struct MapReduce<C> {
    combiner: C,
    config: ReduceConfig,
    scheduler: Scheduler,
}

impl<C: Combiner> MapReduce<C> {
    /// # Errors
    /// Returns a [`ConfigError`] if the configuration is invalid or the worker
    /// pool cannot be started.
    pub fn new(combiner: C, config: ReduceConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let scheduler = Scheduler::new(config.worker_count)?;
        Ok(Self {
            combiner,
            config,
            scheduler,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ReduceConfig {
        &self.config
    }

    fn domain(&self, metadata: &Metadata) -> Result<Range<u64>> {
        let size = metadata.domain_size().ok_or_else(|| {
            anyhow!(
                "upstream metadata does not declare \"{}\"",
                metadata.index_initializer_key()
            )
        })?;
        Ok(self.config.units(size))
    }
}

impl<C: Combiner> Algorithm for MapReduce<C> {
    fn name(&self) -> &str {
        self.combiner.name()
    }

    fn output_metadata(&self, inputs: &[Metadata]) -> Result<Metadata> {
        let upstream = inputs.first().ok_or_else(|| anyhow!("no upstream metadata"))?;
        let units = self.domain(upstream)?;
        let mut md = upstream.clone();
        let initializer = md.index_initializer_key().to_string();
        md.remove(&initializer);
        md.remove(keys::INDEX_INITIALIZER);
        md.remove(keys::INDEX_REQUEST);
        md.set("reduced_units", units.end - units.start);
        self.combiner.output_metadata(md)
    }

    fn upstream_requests(&self, inputs: &[Metadata], request: &Request) -> Result<Vec<UpstreamRequest>> {
        let upstream = inputs.first().ok_or_else(|| anyhow!("no upstream metadata"))?;
        let key = upstream.index_request_key();
        Ok(self
            .domain(upstream)?
            .map(|unit| UpstreamRequest::new(0, request.clone().with(key, unit)))
            .collect())
    }

    /// Merge step: the inputs arrive in ascending unit order.
    fn execute(&self, ctx: &ExecuteContext<'_>) -> Result<Dataset> {
        let mut acc = self.combiner.create(ctx.metadata(0)?)?;
        for part in ctx.inputs() {
            acc = self.combiner.merge(acc, part)?;
        }
        self.combiner.finish(acc, ctx.skipped())
    }

    fn fan_out(&self) -> Option<FanOut<'_>> {
        Some(FanOut {
            scheduler: &self.scheduler,
            on_failure: self.config.on_failure,
        })
    }
}

/// Drive one reduction: run every unit on the stage's scheduler, apply the
/// failure policy, then merge.
pub(crate) fn run(
    runner: &Runner<'_>,
    stage: &Stage,
    key: &CacheKey,
    units: &[CacheKey],
    fan_out: FanOut<'_>,
    metadata: &[Metadata],
) -> Result<Dataset, PipelineError> {
    let mut tracker = Tracker {
        reducer: &stage.label,
        state: ReductionState::Idle,
    };

    tracker.advance(ReductionState::FanningOut);
    let index_key = metadata
        .first()
        .map_or(request::keys::TIME_STEP, Metadata::index_request_key);
    let mut tasks: Vec<&CacheKey> = units.iter().collect();
    tasks.sort_by(|a, b| a.request.get(index_key).cmp(&b.request.get(index_key)));
    info!(
        reducer = %stage.label,
        units = tasks.len(),
        workers = fan_out.scheduler.worker_count(),
        "fanning out"
    );

    tracker.advance(ReductionState::AwaitingTasks);
    let abort = fan_out.on_failure == FailurePolicy::Abort;
    let outcomes = fan_out.scheduler.run_all(&tasks, abort, |unit| runner.realize(unit));
    runner.metrics().increment_counter("reduce.tasks", tasks.len() as u64);

    tracker.advance(ReductionState::Merging);
    let mut inputs = Vec::with_capacity(tasks.len());
    let mut skipped = Vec::new();
    let mut first_failure = None;
    let mut failed_units = 0;
    for (unit, outcome) in tasks.iter().zip(outcomes) {
        let error = match outcome {
            TaskOutcome::Completed(ds) => {
                inputs.push(ds);
                continue;
            }
            TaskOutcome::Cancelled => continue,
            TaskOutcome::Failed(error) => error,
            TaskOutcome::Panicked(message) => PipelineError::Computation {
                algorithm: unit.algorithm.to_string(),
                request: unit.request.clone(),
                source: SharedError::new(anyhow!("task panicked: {message}")),
            },
        };
        failed_units += 1;
        if abort {
            first_failure.get_or_insert((unit.request.clone(), error));
        } else {
            warn!(reducer = %stage.label, unit = %unit.request, %error, "skipping failed unit");
            skipped.push(SkippedUnit {
                request: unit.request.clone(),
                error,
            });
        }
    }

    if let Some((request, error)) = first_failure {
        tracker.advance(ReductionState::Error);
        return Err(PipelineError::Reduction {
            algorithm: stage.label.clone(),
            request,
            failed_units,
            source: Box::new(error),
        });
    }
    if !skipped.is_empty() {
        runner.metrics().increment_counter("reduce.skipped", skipped.len() as u64);
    }

    let ctx = ExecuteContext::new(&key.request, &inputs, metadata, &skipped);
    match stage.algorithm.execute(&ctx) {
        Ok(output) => {
            tracker.advance(ReductionState::Done);
            Ok(output)
        }
        Err(err) => {
            tracker.advance(ReductionState::Error);
            Err(PipelineError::Computation {
                algorithm: stage.label.clone(),
                request: key.request.clone(),
                source: SharedError::new(err),
            })
        }
    }
}
