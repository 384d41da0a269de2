//! Instrumented algorithms for exercising the engine.
//!
//! Each mock keeps its counters behind an `Arc`, so a test can hold a clone
//! of the mock after handing the original to a pipeline.

use crate::algorithm::{Algorithm, CachePolicy, ExecuteContext, UpstreamRequest};
use crate::dataset::Dataset;
use crate::metadata::{Metadata, keys};
use crate::request::{self, Request};
use crate::table::{ColumnType, Schema, Table};
use crate::testing::fixtures::synthetic_mesh;
use crate::value::Value;
use anyhow::{Result, bail};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

/* ===================== CountingSource ===================== */

/// A gridded source of `steps` synthetic meshes that counts how often each
/// step is produced, and can be told to fail or stall on chosen steps.
#[derive(Clone)]
pub struct CountingSource {
    steps: u64,
    nx: usize,
    ny: usize,
    failing: BTreeSet<u64>,
    delay: Duration,
    executions: Arc<Mutex<BTreeMap<u64, usize>>>,
}

impl CountingSource {
    #[must_use]
    pub fn new(steps: u64) -> Self {
        Self {
            steps,
            nx: 4,
            ny: 3,
            failing: BTreeSet::new(),
            delay: Duration::ZERO,
            executions: Arc::default(),
        }
    }

    /// Fail whenever one of `steps` is requested.
    #[must_use]
    pub fn failing_on(mut self, steps: impl IntoIterator<Item = u64>) -> Self {
        self.failing.extend(steps);
        self
    }

    /// Sleep this long in every execution.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// How many times `step` was produced.
    #[must_use]
    pub fn executions(&self, step: u64) -> usize {
        self.counts().get(&step).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total_executions(&self) -> usize {
        self.counts().values().sum()
    }

    fn counts(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, usize>> {
        self.executions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Algorithm for CountingSource {
    fn name(&self) -> &str {
        "counting_source"
    }

    fn input_ports(&self) -> usize {
        0
    }

    fn output_metadata(&self, _inputs: &[Metadata]) -> Result<Metadata> {
        let mesh = synthetic_mesh(0, self.nx, self.ny);
        let mut md = Metadata::new()
            .with(keys::NUMBER_OF_TIME_STEPS, self.steps)
            .with(keys::VARIABLES, mesh.arrays.keys().cloned().collect::<Vec<_>>())
            .with(keys::COORDINATES_X, mesh.x.clone())
            .with(keys::COORDINATES_Y, mesh.y.clone());
        if let Some(extent) = mesh.extent() {
            md.set(keys::WHOLE_EXTENT, extent.to_vec());
        }
        Ok(md)
    }

    fn execute(&self, ctx: &ExecuteContext<'_>) -> Result<Dataset> {
        let request = ctx.request();
        let step = request.time_step().unwrap_or(0);
        *self.counts().entry(step).or_default() += 1;
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if self.failing.contains(&step) {
            bail!("synthetic failure at step {step}");
        }
        let mut mesh = synthetic_mesh(step, self.nx, self.ny);
        if let Some(arrays) = request.arrays() {
            mesh = mesh.with_arrays(&arrays);
        }
        if let Some(extent) = request.extent() {
            mesh = mesh.subset(extent);
        }
        Ok(Dataset::Mesh(mesh))
    }
}

/* ===================== StepRows ===================== */

type RowCount = dyn Fn(u64) -> usize + Send + Sync;

/// A per-unit transform emitting `rows_for(step)` rows of
/// `(time_step: int, value: float)` for each input mesh.
#[derive(Clone)]
pub struct StepRows {
    rows_for: Arc<RowCount>,
}

impl StepRows {
    pub fn new(rows_for: impl Fn(u64) -> usize + Send + Sync + 'static) -> Self {
        Self {
            rows_for: Arc::new(rows_for),
        }
    }

    #[must_use]
    pub fn schema() -> Schema {
        Schema::new()
            .with("time_step", ColumnType::Int)
            .with("value", ColumnType::Float)
    }
}

impl Algorithm for StepRows {
    fn name(&self) -> &str {
        "step_rows"
    }

    fn output_metadata(&self, inputs: &[Metadata]) -> Result<Metadata> {
        let mut md = inputs.first().cloned().unwrap_or_default();
        md.set_schema(&Self::schema());
        Ok(md)
    }

    fn upstream_requests(&self, _inputs: &[Metadata], request: &Request) -> Result<Vec<UpstreamRequest>> {
        Ok(vec![UpstreamRequest::new(0, request.clone().with_arrays(["prw"]))])
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
    fn execute(&self, ctx: &ExecuteContext<'_>) -> Result<Dataset> {
        let mesh = ctx.mesh(0)?;
        let step = mesh.time_step;
        let rows = (0..(self.rows_for)(step)).map(|k| vec![Value::Int(step as i64), Value::from(step as f64 + k as f64 / 10.0)]);
        let mut table = Table::from_rows(Self::schema(), rows)?;
        table.attributes_mut().set(request::keys::TIME_STEP, step);
        Ok(Dataset::Table(table))
    }
}

/* ===================== RecordingSink ===================== */

/// A sink that records every table it receives and passes it through.
#[derive(Clone, Default)]
pub struct RecordingSink {
    received: Arc<Mutex<Vec<Table>>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times the sink ran.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.tables().len()
    }

    /// The most recent table received.
    #[must_use]
    pub fn last(&self) -> Option<Table> {
        self.tables().last().cloned()
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Vec<Table>> {
        self.received.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Algorithm for RecordingSink {
    fn name(&self) -> &str {
        "recording_sink"
    }

    fn execute(&self, ctx: &ExecuteContext<'_>) -> Result<Dataset> {
        let table = ctx.table(0)?.clone();
        self.tables().push(table.clone());
        Ok(Dataset::Table(table))
    }

    fn cache_policy(&self) -> CachePolicy {
        CachePolicy::Never
    }
}
