//! Plan execution.
//!
//! The [`Runner`] realizes plan steps on demand. Realizing a step goes through
//! the execution cache (unless the stage opts out), which realizes the step's
//! inputs first and then calls `execute`. Map-reduce steps hand their inputs
//! to [`reduce::run`](crate::reduce), which realizes them as parallel tasks on
//! the stage's own scheduler; everything else runs on the calling thread.

use crate::algorithm::{CachePolicy, ExecuteContext};
use crate::cache::{CacheKey, ExecutionCache};
use crate::dataset::DatasetRef;
use crate::error::{PipelineError, SharedError};
use crate::graph::{PipelineGraph, Stage};
use crate::metadata::Metadata;
use crate::metrics::MetricsCollector;
use crate::node_id::AlgorithmId;
use crate::planner::{RequestPlan, input_metadata};
use crate::reduce;
use anyhow::anyhow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

pub(crate) struct Runner<'p> {
    graph: &'p PipelineGraph,
    plan: &'p RequestPlan,
    metadata: &'p HashMap<AlgorithmId, Metadata>,
    cache: &'p ExecutionCache,
    metrics: &'p MetricsCollector,
}

impl<'p> Runner<'p> {
    pub(crate) fn new(
        graph: &'p PipelineGraph,
        plan: &'p RequestPlan,
        metadata: &'p HashMap<AlgorithmId, Metadata>,
        cache: &'p ExecutionCache,
        metrics: &'p MetricsCollector,
    ) -> Self {
        Self {
            graph,
            plan,
            metadata,
            cache,
            metrics,
        }
    }

    pub(crate) fn metrics(&self) -> &MetricsCollector {
        self.metrics
    }

    /// Output of the plan's root step.
    pub(crate) fn run(&self) -> Result<DatasetRef, PipelineError> {
        self.realize(self.plan.root())
    }

    /// Output of one step, computed at most once per cache lifetime.
    pub(crate) fn realize(&self, key: &CacheKey) -> Result<DatasetRef, PipelineError> {
        let stage = self.graph.stage(key.algorithm)?;
        match stage.algorithm.cache_policy() {
            CachePolicy::Never => self.compute(stage, key),
            policy => self
                .cache
                .get_or_compute(key, policy == CachePolicy::Persistent, || self.compute(stage, key)),
        }
    }

    fn compute(&self, stage: &Stage, key: &CacheKey) -> Result<DatasetRef, PipelineError> {
        let step = self.plan.step(key).ok_or_else(|| PipelineError::Computation {
            algorithm: stage.label.clone(),
            request: key.request.clone(),
            source: SharedError::new(anyhow!("request was not part of the plan")),
        })?;
        let port_md = input_metadata(self.graph, key.algorithm, self.metadata)?;

        let started = Instant::now();
        let output = if let Some(fan_out) = stage.algorithm.fan_out() {
            reduce::run(self, stage, key, &step.inputs, fan_out, &port_md)?
        } else {
            let inputs = step
                .inputs
                .iter()
                .map(|input| self.realize(input))
                .collect::<Result<Vec<_>, _>>()?;
            debug!(algorithm = %stage.label, request = %key.request, "executing");
            let ctx = ExecuteContext::new(&key.request, &inputs, &port_md, &[]);
            stage
                .algorithm
                .execute(&ctx)
                .map_err(|e| PipelineError::Computation {
                    algorithm: stage.label.clone(),
                    request: key.request.clone(),
                    source: SharedError::new(e),
                })?
        };

        self.metrics.increment_counter(&format!("executions.{}", stage.label), 1);
        self.metrics.record_duration(&format!("time.{}", stage.label), started.elapsed());
        Ok(Arc::new(output))
    }
}
