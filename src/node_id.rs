//! Lightweight identifier for algorithms within a [`Pipeline`](crate::pipeline::Pipeline).
//!
//! Each algorithm added to the pipeline graph is assigned an `AlgorithmId`
//! backed by the graph's stable node index. Identifiers stay valid across
//! later additions and connections, and are small, `Copy`, and hashable, so
//! they double as part of the execution cache key.

use petgraph::stable_graph::NodeIndex;
use std::fmt::{Display, Formatter, Result as FormatResult};

/// Unique identifier for an algorithm node in a pipeline graph.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct AlgorithmId(NodeIndex);

impl AlgorithmId {
    pub(crate) fn new(index: NodeIndex) -> Self {
        Self(index)
    }

    pub(crate) fn index(self) -> NodeIndex {
        self.0
    }

    /// Return the underlying numeric value.
    ///
    /// Useful mainly for debugging or logging.
    #[must_use]
    pub fn raw(&self) -> usize {
        self.0.index()
    }
}

impl Display for AlgorithmId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        write!(f, "#{}", self.raw())
    }
}
