//! Metadata and update-request passes.
//!
//! Before any bulk data is produced, an update runs two passes over the
//! graph, both on the coordinating thread:
//!
//! 1. **Metadata**: walk upstream from the terminal and compute each
//!    algorithm's output metadata from its inputs' metadata, producers first.
//! 2. **Update request**: starting from the terminal's request, ask each
//!    algorithm which requests it needs from each input port, validate every
//!    request against the producer's metadata, and record the result as a
//!    [`RequestPlan`]: a deduplicated set of (algorithm, request) steps.
//!
//! Planning failures surface before execution starts, so a bad request never
//! leaves partial output behind.

use crate::cache::CacheKey;
use crate::error::{GraphError, PipelineError, RequestError, SharedError};
use crate::graph::PipelineGraph;
use crate::metadata::Metadata;
use crate::node_id::AlgorithmId;
use crate::request::{Request, keys};
use crate::value::Value;
use std::collections::{HashMap, VecDeque};
use std::fmt::{Display, Formatter, Result as FormatResult};

/// One (algorithm, request) pair to realize.
#[derive(Clone, Debug)]
pub struct PlanStep {
    pub key: CacheKey,
    pub label: String,
    /// Keys of the inputs, in the order the algorithm asked for them.
    pub inputs: Vec<CacheKey>,
    pub fan_out: bool,
}

/// Output of the update-request pass.
#[derive(Clone, Debug)]
pub struct RequestPlan {
    root: CacheKey,
    steps: HashMap<CacheKey, PlanStep>,
    order: Vec<CacheKey>,
}

impl RequestPlan {
    #[must_use]
    pub fn root(&self) -> &CacheKey {
        &self.root
    }

    #[must_use]
    pub fn step(&self, key: &CacheKey) -> Option<&PlanStep> {
        self.steps.get(key)
    }

    /// Steps in discovery order, terminal first.
    pub fn steps(&self) -> impl Iterator<Item = &PlanStep> {
        self.order.iter().filter_map(|k| self.steps.get(k))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Number of distinct requests planned for `algorithm`.
    #[must_use]
    pub fn requests_for(&self, algorithm: AlgorithmId) -> usize {
        self.order.iter().filter(|k| k.algorithm == algorithm).count()
    }
}

impl Display for RequestPlan {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        writeln!(f, "┌─ REQUEST PLAN ──────────────────────────────────────────────┐")?;
        writeln!(f, "│ Root:              {}", self.root)?;
        writeln!(f, "│ Distinct requests: {:>10}", self.len())?;
        writeln!(f, "├─ STAGES ────────────────────────────────────────────────────┤")?;
        let mut seen: Vec<(AlgorithmId, &str, bool)> = Vec::new();
        for step in self.steps() {
            if !seen.iter().any(|(id, _, _)| *id == step.key.algorithm) {
                seen.push((step.key.algorithm, &step.label, step.fan_out));
            }
        }
        for (id, label, fan_out) in seen {
            let requests = self.requests_for(id);
            let marker = if fan_out { "  [map-reduce]" } else { "" };
            writeln!(f, "│ {label:<24} {id:>5} {requests:>8} request(s){marker}")?;
        }
        writeln!(f, "└─────────────────────────────────────────────────────────────┘")
    }
}

/// Metadata of `id` and everything upstream of it, memoized in `memo`.
pub(crate) fn resolve_metadata(
    graph: &PipelineGraph,
    id: AlgorithmId,
    memo: &mut HashMap<AlgorithmId, Metadata>,
) -> Result<Metadata, PipelineError> {
    if let Some(md) = memo.get(&id) {
        return Ok(md.clone());
    }
    let stage = graph.stage(id)?;
    let mut inputs = Vec::new();
    for producer in graph.inputs(id)? {
        inputs.push(resolve_metadata(graph, producer, memo)?);
    }
    let md = stage
        .algorithm
        .output_metadata(&inputs)
        .map_err(|e| PipelineError::Metadata {
            algorithm: stage.label.clone(),
            source: SharedError::new(e),
        })?;
    memo.insert(id, md.clone());
    Ok(md)
}

/// Input metadata of `id`, indexed by port.
pub(crate) fn input_metadata(
    graph: &PipelineGraph,
    id: AlgorithmId,
    metadata: &HashMap<AlgorithmId, Metadata>,
) -> Result<Vec<Metadata>, GraphError> {
    Ok(graph
        .inputs(id)?
        .iter()
        .map(|producer| metadata.get(producer).cloned().unwrap_or_default())
        .collect())
}

/// Run the update-request pass from `terminal`.
pub(crate) fn build_plan(
    graph: &PipelineGraph,
    metadata: &HashMap<AlgorithmId, Metadata>,
    terminal: AlgorithmId,
    request: Request,
) -> Result<RequestPlan, PipelineError> {
    let invalid = |id: AlgorithmId, request: &Request, source: RequestError| PipelineError::InvalidRequest {
        algorithm: graph.label(id),
        request: request.clone(),
        source,
    };

    let terminal_md = metadata.get(&terminal).cloned().unwrap_or_default();
    validate_request(&request, &terminal_md).map_err(|e| invalid(terminal, &request, e))?;

    let root = CacheKey::new(terminal, request);
    let mut steps = HashMap::new();
    let mut order = Vec::new();
    let mut queue = VecDeque::from([root.clone()]);

    while let Some(key) = queue.pop_front() {
        if steps.contains_key(&key) {
            continue;
        }
        let stage = graph.stage(key.algorithm)?;
        let producers = graph.inputs(key.algorithm)?;
        let port_md = input_metadata(graph, key.algorithm, metadata)?;
        let upstream = stage
            .algorithm
            .upstream_requests(&port_md, &key.request)
            .map_err(|e| invalid(key.algorithm, &key.request, RequestError::Rejected(SharedError::new(e))))?;

        let mut inputs = Vec::with_capacity(upstream.len());
        for up in upstream {
            let producer = *producers.get(up.port).ok_or_else(|| GraphError::NoSuchPort {
                algorithm: stage.label.clone(),
                direction: crate::error::PortDirection::Input,
                port: up.port,
            })?;
            validate_request(&up.request, &port_md[up.port]).map_err(|e| invalid(producer, &up.request, e))?;
            let child = CacheKey::new(producer, up.request);
            if !steps.contains_key(&child) {
                queue.push_back(child.clone());
            }
            inputs.push(child);
        }

        order.push(key.clone());
        steps.insert(
            key.clone(),
            PlanStep {
                key,
                label: stage.label.clone(),
                inputs,
                fan_out: stage.algorithm.fan_out().is_some(),
            },
        );
    }

    Ok(RequestPlan { root, steps, order })
}

/// Check a request against the metadata of the algorithm that will serve it.
///
/// Only keys the metadata describes are checked: requested arrays against
/// `variables`, the unit index against the domain size, and the extent
/// against `whole_extent`.
///
/// # Errors
/// Returns the first [`RequestError`] found.
pub fn validate_request(request: &Request, metadata: &Metadata) -> Result<(), RequestError> {
    if let Some(value) = request.get(keys::ARRAYS) {
        let arrays = value
            .as_str_list()
            .ok_or_else(|| RequestError::Malformed(keys::ARRAYS.to_string()))?;
        if let Some(variables) = metadata.variables() {
            if let Some(missing) = arrays.iter().find(|a| !variables.contains(a)) {
                return Err(RequestError::UnknownVariable((*missing).to_string()));
            }
        }
    }

    let index_key = metadata.index_request_key();
    if let (Some(value), Some(available)) = (request.get(index_key), metadata.domain_size()) {
        let index = value
            .as_u64()
            .ok_or_else(|| RequestError::Malformed(index_key.to_string()))?;
        if index >= available {
            return Err(RequestError::OutOfDomain {
                key: index_key.to_string(),
                value: Value::from(index),
                available,
            });
        }
    }

    if request.contains(keys::EXTENT) {
        let requested = request
            .extent()
            .ok_or_else(|| RequestError::Malformed(keys::EXTENT.to_string()))?;
        if requested[0] > requested[1] || requested[2] > requested[3] {
            return Err(RequestError::Malformed(keys::EXTENT.to_string()));
        }
        if let Some(whole) = metadata.whole_extent() {
            let inside = requested[0] >= whole[0]
                && requested[1] <= whole[1]
                && requested[2] >= whole[2]
                && requested[3] <= whole[3];
            if !inside {
                return Err(RequestError::ExtentOutOfBounds { requested, whole });
            }
        }
    }
    Ok(())
}
