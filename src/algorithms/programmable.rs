//! Stages assembled from closures.
//!
//! ```
//! use geoflow::prelude::*;
//!
//! let double = ProgrammableAlgorithm::new("double", |ctx| {
//!     let mut mesh = ctx.mesh(0)?.clone();
//!     for values in mesh.arrays.values_mut() {
//!         values.iter_mut().for_each(|v| *v *= 2.0);
//!     }
//!     Ok(Dataset::Mesh(mesh))
//! });
//! assert_eq!(double.name(), "double");
//! ```

use crate::algorithm::{Algorithm, CachePolicy, ExecuteContext, UpstreamRequest};
use crate::dataset::Dataset;
use crate::metadata::Metadata;
use crate::request::Request;
use anyhow::Result;
use std::sync::Arc;

type MetadataFn = dyn Fn(&[Metadata]) -> Result<Metadata> + Send + Sync;
type RequestsFn = dyn Fn(&[Metadata], &Request) -> Result<Vec<UpstreamRequest>> + Send + Sync;
type ExecuteFn = dyn Fn(&ExecuteContext<'_>) -> Result<Dataset> + Send + Sync;

/// An [`Algorithm`] whose capabilities are closures. Unset capabilities use
/// the trait defaults.
#[derive(Clone)]
pub struct ProgrammableAlgorithm {
    name: String,
    input_ports: usize,
    cache_policy: CachePolicy,
    metadata: Option<Arc<MetadataFn>>,
    requests: Option<Arc<RequestsFn>>,
    execute: Arc<ExecuteFn>,
}

impl ProgrammableAlgorithm {
    pub fn new<F>(name: impl Into<String>, execute: F) -> Self
    where
        F: Fn(&ExecuteContext<'_>) -> Result<Dataset> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            input_ports: 1,
            cache_policy: CachePolicy::PerUpdate,
            metadata: None,
            requests: None,
            execute: Arc::new(execute),
        }
    }

    /// A source: no input ports, metadata from `metadata`.
    pub fn source<M, F>(name: impl Into<String>, metadata: M, execute: F) -> Self
    where
        M: Fn() -> Result<Metadata> + Send + Sync + 'static,
        F: Fn(&ExecuteContext<'_>) -> Result<Dataset> + Send + Sync + 'static,
    {
        Self::new(name, execute)
            .with_input_ports(0)
            .with_metadata(move |_| metadata())
    }

    #[must_use]
    pub fn with_input_ports(mut self, ports: usize) -> Self {
        self.input_ports = ports;
        self
    }

    #[must_use]
    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    #[must_use]
    pub fn with_metadata<F>(mut self, f: F) -> Self
    where
        F: Fn(&[Metadata]) -> Result<Metadata> + Send + Sync + 'static,
    {
        self.metadata = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn with_requests<F>(mut self, f: F) -> Self
    where
        F: Fn(&[Metadata], &Request) -> Result<Vec<UpstreamRequest>> + Send + Sync + 'static,
    {
        self.requests = Some(Arc::new(f));
        self
    }
}

impl Algorithm for ProgrammableAlgorithm {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_ports(&self) -> usize {
        self.input_ports
    }

    fn output_metadata(&self, inputs: &[Metadata]) -> Result<Metadata> {
        match &self.metadata {
            Some(f) => f(inputs),
            None => Ok(inputs.first().cloned().unwrap_or_default()),
        }
    }

    fn upstream_requests(&self, inputs: &[Metadata], request: &Request) -> Result<Vec<UpstreamRequest>> {
        match &self.requests {
            Some(f) => f(inputs, request),
            None => Ok((0..self.input_ports)
                .map(|port| UpstreamRequest::new(port, request.clone()))
                .collect()),
        }
    }

    fn execute(&self, ctx: &ExecuteContext<'_>) -> Result<Dataset> {
        (self.execute)(ctx)
    }

    fn cache_policy(&self) -> CachePolicy {
        self.cache_policy
    }
}
