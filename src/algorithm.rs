//! The [`Algorithm`] capability trait and its execution context.
//!
//! Every stage of a pipeline (source, per-unit transform, reducer, sink)
//! implements the same small set of capabilities:
//!
//! 1. **Report metadata**: describe the output given the input metadata,
//!    without producing data ([`Algorithm::output_metadata`]).
//! 2. **Translate requests**: rewrite a downstream request into the requests
//!    it needs from each input port ([`Algorithm::upstream_requests`]).
//! 3. **Execute**: produce one dataset from the request and the realized
//!    inputs ([`Algorithm::execute`]).
//!
//! `execute` must be deterministic in the request, the inputs and the
//! algorithm's own configuration; the engine caches on that assumption.
//! Algorithms are shared across worker threads behind an `Arc`, so
//! configuration is set at construction and never mutated afterwards.

use crate::dataset::{CartesianMesh, Dataset, DatasetRef};
use crate::metadata::Metadata;
use crate::reduce::SkippedUnit;
use crate::request::Request;
use crate::scheduler::Scheduler;
use crate::table::Table;
use anyhow::{Result, anyhow};

/// How long a stage's outputs may stay in the execution cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Cleared at the start of every update cycle.
    #[default]
    PerUpdate,
    /// Kept across update cycles until the topology or configuration changes.
    /// Only for outputs that do not depend on time-varying external state.
    Persistent,
    /// Never cached; executed every time it is demanded. Used by sinks.
    Never,
}

/// What to do when a unit of a fan-out fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Fail the whole reduction with the first failing unit's error.
    #[default]
    Abort,
    /// Exclude the failed unit and report it as skipped.
    Skip,
}

/// Fan-out capability of a map-reduce stage.
#[derive(Clone, Copy)]
pub struct FanOut<'a> {
    pub scheduler: &'a Scheduler,
    pub on_failure: FailurePolicy,
}

/// One request addressed to one input port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpstreamRequest {
    pub port: usize,
    pub request: Request,
}

impl UpstreamRequest {
    #[must_use]
    pub fn new(port: usize, request: Request) -> Self {
        Self { port, request }
    }
}

/// A pipeline stage.
pub trait Algorithm: Send + Sync {
    /// Type name used in logs and errors when no label is given.
    fn name(&self) -> &str;

    /// Number of input ports. Sources have none.
    fn input_ports(&self) -> usize {
        1
    }

    /// Describe the output, given the metadata of each input port in order.
    ///
    /// The default passes the first input's metadata through.
    ///
    /// # Errors
    /// Returns an error if the inputs cannot be combined into a description.
    fn output_metadata(&self, inputs: &[Metadata]) -> Result<Metadata> {
        Ok(inputs.first().cloned().unwrap_or_default())
    }

    /// Rewrite a downstream request into upstream requests.
    ///
    /// The default forwards the request unchanged to every input port.
    ///
    /// # Errors
    /// Returns an error if the request cannot be served; the engine reports it
    /// as an invalid request.
    fn upstream_requests(&self, _inputs: &[Metadata], request: &Request) -> Result<Vec<UpstreamRequest>> {
        Ok((0..self.input_ports())
            .map(|port| UpstreamRequest::new(port, request.clone()))
            .collect())
    }

    /// Produce the output for `ctx.request()`.
    ///
    /// # Errors
    /// Returns an error if the computation fails.
    fn execute(&self, ctx: &ExecuteContext<'_>) -> Result<Dataset>;

    fn cache_policy(&self) -> CachePolicy {
        CachePolicy::PerUpdate
    }

    /// `Some` for map-reduce stages, whose inputs are realized as parallel tasks.
    fn fan_out(&self) -> Option<FanOut<'_>> {
        None
    }
}

/// Everything `execute` may look at.
pub struct ExecuteContext<'a> {
    request: &'a Request,
    inputs: &'a [DatasetRef],
    metadata: &'a [Metadata],
    skipped: &'a [SkippedUnit],
}

impl<'a> ExecuteContext<'a> {
    /// `inputs` are ordered as the `upstream_requests` that produced them;
    /// `metadata` is indexed by input port.
    #[must_use]
    pub fn new(
        request: &'a Request,
        inputs: &'a [DatasetRef],
        metadata: &'a [Metadata],
        skipped: &'a [SkippedUnit],
    ) -> Self {
        Self {
            request,
            inputs,
            metadata,
            skipped,
        }
    }

    #[must_use]
    pub fn request(&self) -> &Request {
        self.request
    }

    #[must_use]
    pub fn inputs(&self) -> &[DatasetRef] {
        self.inputs
    }

    /// Units a fan-out excluded under [`FailurePolicy::Skip`].
    #[must_use]
    pub fn skipped(&self) -> &[SkippedUnit] {
        self.skipped
    }

    /// # Errors
    /// Returns an error if there is no input `i`.
    pub fn input(&self, i: usize) -> Result<&Dataset> {
        self.inputs
            .get(i)
            .map(AsRef::as_ref)
            .ok_or_else(|| anyhow!("missing input {i} (have {})", self.inputs.len()))
    }

    /// # Errors
    /// Returns an error if input `i` is missing or not a table.
    pub fn table(&self, i: usize) -> Result<&Table> {
        let input = self.input(i)?;
        input
            .as_table()
            .ok_or_else(|| anyhow!("input {i} is a {}, expected a table", input.kind()))
    }

    /// # Errors
    /// Returns an error if input `i` is missing or not a mesh.
    pub fn mesh(&self, i: usize) -> Result<&CartesianMesh> {
        let input = self.input(i)?;
        input
            .as_mesh()
            .ok_or_else(|| anyhow!("input {i} is a {}, expected a mesh", input.kind()))
    }

    /// Metadata of input `port`.
    ///
    /// # Errors
    /// Returns an error if the port does not exist.
    pub fn metadata(&self, port: usize) -> Result<&Metadata> {
        self.metadata
            .get(port)
            .ok_or_else(|| anyhow!("no metadata for input port {port}"))
    }
}
