//! Error types.
//!
//! Library errors are `thiserror` enums. Algorithm code returns
//! `anyhow::Result`; those errors are wrapped in [`SharedError`] so a single
//! failure can be handed to every caller that was waiting on the same cache
//! entry.

use crate::node_id::AlgorithmId;
use crate::request::Request;
use crate::table::{ColumnType, Schema};
use crate::value::Value;
use std::fmt::{Display, Formatter, Result as FormatResult};
use std::sync::Arc;
use thiserror::Error;

/// A cheaply clonable `anyhow::Error`. Displays the whole context chain.
#[derive(Debug, Clone)]
pub struct SharedError(Arc<anyhow::Error>);

impl Display for SharedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        write!(f, "{:#}", self.0)
    }
}

impl std::error::Error for SharedError {}

impl SharedError {
    #[must_use]
    pub fn new(err: anyhow::Error) -> Self {
        Self(Arc::new(err))
    }

    #[must_use]
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }
}

impl From<anyhow::Error> for SharedError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

impl Display for PortDirection {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            PortDirection::Input => write!(f, "input"),
            PortDirection::Output => write!(f, "output"),
        }
    }
}

/// Malformed topology.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("algorithm {0} is not part of this pipeline")]
    UnknownAlgorithm(AlgorithmId),
    #[error("connecting '{producer}' to '{consumer}' would create a cycle")]
    Cycle { producer: String, consumer: String },
    #[error("input port {port} of '{consumer}' already has an incoming connection")]
    PortOccupied { consumer: String, port: usize },
    #[error("'{algorithm}' has no {direction} port {port}")]
    NoSuchPort {
        algorithm: String,
        direction: PortDirection,
        port: usize,
    },
    #[error("input port {port} of '{algorithm}' is not connected")]
    Unconnected { algorithm: String, port: usize },
}

/// Why a request cannot be satisfied by its producer.
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    #[error("variable '{0}' is not provided upstream")]
    UnknownVariable(String),
    #[error("{key}={value} is outside the domain of {available} units")]
    OutOfDomain {
        key: String,
        value: Value,
        available: u64,
    },
    #[error("extent {requested:?} is outside the whole extent {whole:?}")]
    ExtentOutOfBounds { requested: [u64; 4], whole: [u64; 4] },
    #[error("request key \"{0}\" is malformed")]
    Malformed(String),
    #[error("request key \"{0}\" is required")]
    MissingKey(String),
    #[error(transparent)]
    Rejected(SharedError),
}

/// Errors surfaced by [`Pipeline::update`](crate::pipeline::Pipeline::update).
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("'{algorithm}' could not report its metadata: {source}")]
    Metadata { algorithm: String, source: SharedError },
    #[error("invalid request {request} to '{algorithm}': {source}")]
    InvalidRequest {
        algorithm: String,
        request: Request,
        source: RequestError,
    },
    #[error("'{algorithm}' failed for request {request}: {source}")]
    Computation {
        algorithm: String,
        request: Request,
        source: SharedError,
    },
    #[error("reduction '{algorithm}' aborted, unit {request} failed ({failed_units} failed units): {source}")]
    Reduction {
        algorithm: String,
        request: Request,
        failed_units: usize,
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Label of the algorithm the error originated in.
    #[must_use]
    pub fn algorithm(&self) -> Option<&str> {
        match self {
            PipelineError::Graph(_) => None,
            PipelineError::Metadata { algorithm, .. }
            | PipelineError::InvalidRequest { algorithm, .. }
            | PipelineError::Computation { algorithm, .. }
            | PipelineError::Reduction { algorithm, .. } => Some(algorithm),
        }
    }

    /// Request that was being served when the error occurred.
    #[must_use]
    pub fn request(&self) -> Option<&Request> {
        match self {
            PipelineError::Graph(_) | PipelineError::Metadata { .. } => None,
            PipelineError::InvalidRequest { request, .. }
            | PipelineError::Computation { request, .. }
            | PipelineError::Reduction { request, .. } => Some(request),
        }
    }
}

/// Invalid typed configuration, reported at construction.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("worker count must be at least 1 (or -1 for all cores), got {0}")]
    WorkerCount(i64),
    #[error("first step {first} is after last step {last}")]
    StepRange { first: u64, last: u64 },
    #[error("filter width must be at least 1")]
    FilterWidth,
    #[error("a centered filter needs an odd width, got {0}")]
    CenteredWidth(usize),
    #[error("threshold range [{low}, {high}] is empty")]
    ThresholdRange { low: f64, high: f64 },
    #[error("invalid files regex: {0}")]
    FilesRegex(#[from] regex::Error),
    #[error("no files match {0}")]
    NoFiles(String),
    #[error(transparent)]
    Expression(#[from] ExprError),
    #[error("worker pool could not be started: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("{0}")]
    Invalid(String),
}

/// Table construction and merge errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TableError {
    #[error("schema mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: Schema, found: Schema },
    #[error("column '{column}' holds {expected:?} values, got a {found}")]
    TypeMismatch {
        column: String,
        expected: ColumnType,
        found: &'static str,
    },
    #[error("row has {found} cells, schema has {expected} columns")]
    RowLength { expected: usize, found: usize },
    #[error("column '{column}' has {found} rows, table has {expected}")]
    ColumnLength {
        column: String,
        expected: usize,
        found: usize,
    },
    #[error("column '{0}' already exists")]
    DuplicateColumn(String),
    #[error("column '{0}' does not exist")]
    UnknownColumn(String),
    #[error("no table schema was declared")]
    MissingSchema,
    #[error("malformed table schema {0}")]
    MalformedSchema(String),
}

/// Row-filter expression errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },
    #[error("unterminated string starting at offset {0}")]
    UnterminatedString(usize),
    #[error("expected {expected} at offset {offset}, found {found}")]
    Syntax {
        expected: String,
        found: String,
        offset: usize,
    },
    #[error("unknown column '{0}'")]
    UnknownColumn(String),
    #[error("cannot apply '{op}' to {left} and {right}")]
    Operands {
        op: String,
        left: &'static str,
        right: &'static str,
    },
    #[error("cannot apply '{op}' to {operand}")]
    Operand { op: String, operand: &'static str },
}
