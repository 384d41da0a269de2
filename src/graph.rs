//! Port and connection model.
//!
//! The graph holds algorithm nodes and directed connections from a
//! producer's output port to a consumer's input port. It enforces the
//! structural rules at construction time:
//!
//! - the graph stays acyclic (a connection that would close a cycle is
//!   refused);
//! - an input port has at most one incoming connection;
//! - an output port may feed any number of consumers.
//!
//! Every algorithm has exactly one output port, index `0`.

use crate::algorithm::Algorithm;
use crate::error::{GraphError, PortDirection};
use crate::node_id::AlgorithmId;
use petgraph::Direction;
use petgraph::algo::has_path_connecting;
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::EdgeRef;
use std::sync::Arc;

/// A labelled algorithm node.
#[derive(Clone)]
pub struct Stage {
    pub label: String,
    pub algorithm: Arc<dyn Algorithm>,
}

/// Edge weight: which ports the connection joins.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Connection {
    pub output_port: usize,
    pub input_port: usize,
}

#[derive(Default, Clone)]
pub struct PipelineGraph {
    graph: StableDiGraph<Stage, Connection>,
}

impl PipelineGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, label: impl Into<String>, algorithm: Arc<dyn Algorithm>) -> AlgorithmId {
        let label = label.into();
        AlgorithmId::new(self.graph.add_node(Stage { label, algorithm }))
    }

    /// Look up a node.
    ///
    /// # Errors
    /// Returns [`GraphError::UnknownAlgorithm`] for an id from another graph.
    pub fn stage(&self, id: AlgorithmId) -> Result<&Stage, GraphError> {
        self.graph
            .node_weight(id.index())
            .ok_or(GraphError::UnknownAlgorithm(id))
    }

    /// Label of a node, or its id if the node is unknown.
    #[must_use]
    pub fn label(&self, id: AlgorithmId) -> String {
        self.stage(id).map_or_else(|_| id.to_string(), |s| s.label.clone())
    }

    /// Connect `producer`'s output port to `consumer`'s input port.
    ///
    /// # Errors
    /// Returns a [`GraphError`] if either node is unknown, a port index is out
    /// of range, the input port is already connected, or the connection would
    /// create a cycle.
    pub fn connect(
        &mut self,
        producer: AlgorithmId,
        output_port: usize,
        consumer: AlgorithmId,
        input_port: usize,
    ) -> Result<(), GraphError> {
        let producer_label = self.stage(producer)?.label.clone();
        let consumer_stage = self.stage(consumer)?;
        let consumer_label = consumer_stage.label.clone();

        if output_port != 0 {
            return Err(GraphError::NoSuchPort {
                algorithm: producer_label,
                direction: PortDirection::Output,
                port: output_port,
            });
        }
        if input_port >= consumer_stage.algorithm.input_ports() {
            return Err(GraphError::NoSuchPort {
                algorithm: consumer_label,
                direction: PortDirection::Input,
                port: input_port,
            });
        }
        if self.upstream(consumer, input_port).is_some() {
            return Err(GraphError::PortOccupied {
                consumer: consumer_label,
                port: input_port,
            });
        }
        if producer == consumer || has_path_connecting(&self.graph, consumer.index(), producer.index(), None) {
            return Err(GraphError::Cycle {
                producer: producer_label,
                consumer: consumer_label,
            });
        }

        self.graph.add_edge(
            producer.index(),
            consumer.index(),
            Connection {
                output_port,
                input_port,
            },
        );
        Ok(())
    }

    /// Remove the connection feeding `consumer`'s input port, if any.
    pub fn disconnect(&mut self, consumer: AlgorithmId, input_port: usize) -> Option<AlgorithmId> {
        let edge = self
            .graph
            .edges_directed(consumer.index(), Direction::Incoming)
            .find(|e| e.weight().input_port == input_port)?;
        let (edge_id, producer) = (edge.id(), edge.source());
        self.graph.remove_edge(edge_id);
        Some(AlgorithmId::new(producer))
    }

    /// Producer connected to `consumer`'s input port, or `None` if unconnected.
    #[must_use]
    pub fn upstream(&self, consumer: AlgorithmId, input_port: usize) -> Option<AlgorithmId> {
        self.graph
            .edges_directed(consumer.index(), Direction::Incoming)
            .find(|e| e.weight().input_port == input_port)
            .map(|e| AlgorithmId::new(e.source()))
    }

    /// Consumers fed by `producer`, with the input port they are fed on.
    #[must_use]
    pub fn downstream(&self, producer: AlgorithmId) -> Vec<(AlgorithmId, usize)> {
        let mut out: Vec<_> = self
            .graph
            .edges_directed(producer.index(), Direction::Outgoing)
            .map(|e| (AlgorithmId::new(e.target()), e.weight().input_port))
            .collect();
        out.sort();
        out
    }

    /// Producers of every input port of `consumer`, in port order.
    ///
    /// # Errors
    /// Returns [`GraphError::Unconnected`] for the first port with no producer.
    pub fn inputs(&self, consumer: AlgorithmId) -> Result<Vec<AlgorithmId>, GraphError> {
        let stage = self.stage(consumer)?;
        (0..stage.algorithm.input_ports())
            .map(|port| {
                self.upstream(consumer, port).ok_or_else(|| GraphError::Unconnected {
                    algorithm: stage.label.clone(),
                    port,
                })
            })
            .collect()
    }

    /// Swap the algorithm of a node. Connections to ports the new algorithm
    /// does not have are dropped.
    ///
    /// # Errors
    /// Returns [`GraphError::UnknownAlgorithm`] for an unknown id.
    pub fn replace(&mut self, id: AlgorithmId, algorithm: Arc<dyn Algorithm>) -> Result<(), GraphError> {
        let ports = algorithm.input_ports();
        let stage = self
            .graph
            .node_weight_mut(id.index())
            .ok_or(GraphError::UnknownAlgorithm(id))?;
        stage.algorithm = algorithm;
        let stale: Vec<_> = self
            .graph
            .edges_directed(id.index(), Direction::Incoming)
            .filter(|e| e.weight().input_port >= ports)
            .map(|e| e.id())
            .collect();
        for edge in stale {
            self.graph.remove_edge(edge);
        }
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}
