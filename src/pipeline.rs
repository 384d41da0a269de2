//! The pipeline object and its `update` entry point.
//!
//! A [`Pipeline`] owns everything an update needs: the graph, the metadata
//! cache, the execution cache, and the metrics collector. There is no
//! process-wide state, so independent pipelines never share caches.
//!
//! Structural changes take `&mut self` and invalidate both caches. Updates
//! take `&self`; concurrent `update` calls on the same pipeline are
//! serialized so one cycle cannot clear another's cache mid-flight.
//!
//! ```no_run
//! use geoflow::prelude::*;
//! # fn main() -> anyhow::Result<()> {
//! let mut p = Pipeline::new();
//! let reader = p.add("reader", MeshReader::open("data/era5_.*\\.jsonl", MeshReaderOptions::default())?);
//! let detect = p.add("detect", ThresholdDetector::new("prw", 20.0, f64::INFINITY)?);
//! let reduce = p.add("reduce", MapReduce::new(TableConcat, ReduceConfig::default().all_cores())?);
//! let write = p.add("write", TableWriter::new("events.csv"));
//! p.connect(reader, detect)?;
//! p.connect(detect, reduce)?;
//! p.connect(reduce, write)?;
//! p.update(write)?;
//! # Ok(())
//! # }
//! ```

use crate::algorithm::Algorithm;
use crate::cache::ExecutionCache;
use crate::dataset::DatasetRef;
use crate::error::{GraphError, PipelineError};
use crate::graph::PipelineGraph;
use crate::metadata::Metadata;
use crate::metrics::MetricsCollector;
use crate::node_id::AlgorithmId;
use crate::planner::{self, RequestPlan};
use crate::request::Request;
use crate::runner::Runner;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Default)]
pub struct Pipeline {
    graph: PipelineGraph,
    metadata: Mutex<HashMap<AlgorithmId, Metadata>>,
    cache: ExecutionCache,
    metrics: MetricsCollector,
    cycle: Mutex<u64>,
}

impl Pipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an algorithm under `label` (used in logs, metrics and errors).
    pub fn add<A: Algorithm + 'static>(&mut self, label: impl Into<String>, algorithm: A) -> AlgorithmId {
        self.add_shared(label, Arc::new(algorithm))
    }

    /// Add an algorithm that is already shared.
    pub fn add_shared(&mut self, label: impl Into<String>, algorithm: Arc<dyn Algorithm>) -> AlgorithmId {
        self.set_modified();
        self.graph.add(label, algorithm)
    }

    /// Connect `producer`'s output to `consumer`'s first input port.
    ///
    /// # Errors
    /// See [`Pipeline::connect_ports`].
    pub fn connect(&mut self, producer: AlgorithmId, consumer: AlgorithmId) -> Result<(), GraphError> {
        self.connect_ports(producer, 0, consumer, 0)
    }

    /// Connect `producer`'s output port to `consumer`'s input port.
    ///
    /// # Errors
    /// Returns a [`GraphError`] if a node is unknown, a port does not exist,
    /// the input port is already connected, or the graph would become cyclic.
    pub fn connect_ports(
        &mut self,
        producer: AlgorithmId,
        output_port: usize,
        consumer: AlgorithmId,
        input_port: usize,
    ) -> Result<(), GraphError> {
        self.graph.connect(producer, output_port, consumer, input_port)?;
        self.set_modified();
        Ok(())
    }

    /// Remove the connection feeding `consumer`'s input port.
    pub fn disconnect(&mut self, consumer: AlgorithmId, input_port: usize) -> Option<AlgorithmId> {
        let removed = self.graph.disconnect(consumer, input_port);
        if removed.is_some() {
            self.set_modified();
        }
        removed
    }

    /// Swap the algorithm of a node, keeping its connections.
    ///
    /// # Errors
    /// Returns [`GraphError::UnknownAlgorithm`] for an unknown id.
    pub fn replace<A: Algorithm + 'static>(&mut self, id: AlgorithmId, algorithm: A) -> Result<(), GraphError> {
        self.graph.replace(id, Arc::new(algorithm))?;
        self.set_modified();
        Ok(())
    }

    #[must_use]
    pub fn upstream(&self, consumer: AlgorithmId, input_port: usize) -> Option<AlgorithmId> {
        self.graph.upstream(consumer, input_port)
    }

    #[must_use]
    pub fn graph(&self) -> &PipelineGraph {
        &self.graph
    }

    #[must_use]
    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    #[must_use]
    pub fn cache(&self) -> &ExecutionCache {
        &self.cache
    }

    /// Invalidate cached metadata and every cached output, persistent ones
    /// included.
    pub fn set_modified(&mut self) {
        self.metadata
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.cache.clear();
    }

    /// Output metadata of `id`, computing it (and everything upstream) if it
    /// is not cached yet.
    ///
    /// # Errors
    /// Returns a [`PipelineError`] if an input port is unconnected or an
    /// algorithm cannot describe its output.
    pub fn metadata(&self, id: AlgorithmId) -> Result<Metadata, PipelineError> {
        let mut memo = self.metadata.lock().unwrap_or_else(PoisonError::into_inner);
        planner::resolve_metadata(&self.graph, id, &mut memo)
    }

    /// Run the metadata and request passes without executing anything.
    ///
    /// # Errors
    /// Returns the same planning errors as [`Pipeline::update_with`].
    pub fn explain(&self, terminal: AlgorithmId, request: Request) -> Result<RequestPlan, PipelineError> {
        let metadata = self.metadata_snapshot(terminal)?;
        planner::build_plan(&self.graph, &metadata, terminal, request)
    }

    /// Update `terminal` with the empty request.
    ///
    /// # Errors
    /// See [`Pipeline::update_with`].
    pub fn update(&self, terminal: AlgorithmId) -> Result<DatasetRef, PipelineError> {
        self.update_with(terminal, Request::new())
    }

    /// Run one update cycle: metadata pass, request pass, then execution from
    /// `terminal` back to the sources.
    ///
    /// # Errors
    /// Returns the first unrecovered error, annotated with the algorithm and
    /// request it originated in.
    pub fn update_with(&self, terminal: AlgorithmId, request: Request) -> Result<DatasetRef, PipelineError> {
        let mut cycle = self.cycle.lock().unwrap_or_else(PoisonError::into_inner);
        *cycle += 1;
        let started = Instant::now();
        let label = self.graph.label(terminal);
        info!(cycle = *cycle, terminal = %label, %request, "update started");

        self.cache.begin_cycle();
        let before = self.cache.stats();

        let result = self.metadata_snapshot(terminal).and_then(|metadata| {
            let plan = planner::build_plan(&self.graph, &metadata, terminal, request)?;
            debug!(steps = plan.len(), "request plan built");
            Runner::new(&self.graph, &plan, &metadata, &self.cache, &self.metrics).run()
        });

        let after = self.cache.stats();
        self.metrics.increment_counter("cache.hits", after.hits - before.hits);
        self.metrics.increment_counter("cache.misses", after.misses - before.misses);
        self.metrics.record_duration("time.update", started.elapsed());
        match &result {
            Ok(_) => {
                self.metrics.increment_counter("updates", 1);
                info!(cycle = *cycle, terminal = %label, elapsed_ms = started.elapsed().as_millis(), "update finished");
            }
            Err(err) => warn!(cycle = *cycle, terminal = %label, %err, "update failed"),
        }
        result
    }

    fn metadata_snapshot(&self, terminal: AlgorithmId) -> Result<HashMap<AlgorithmId, Metadata>, PipelineError> {
        let mut memo = self.metadata.lock().unwrap_or_else(PoisonError::into_inner);
        planner::resolve_metadata(&self.graph, terminal, &mut memo)?;
        Ok(memo.clone())
    }
}
