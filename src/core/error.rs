use crate::core::node::NodeId;
use thiserror::Error;

/// A violated precondition on the liability snapshot.
///
/// The engine rejects these before any round executes. Nothing is clamped
/// or repaired.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputViolation {
    #[error("network has no nodes; at least the sink must exist")]
    EmptyNetwork,
    #[error("{node_count} nodes exceed the 32-bit node index space")]
    TooManyNodes { node_count: usize },
    #[error("sink {sink} is outside the node range 0..{node_count}")]
    SinkOutOfRange { sink: NodeId, node_count: usize },
    #[error("{field} has {actual} entries, expected {expected}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("edge offsets of node {node} are not monotone or exceed the edge arrays")]
    MalformedOffsets { node: NodeId },
    #[error("node {node} has a non-finite {field}")]
    NonFinite { node: NodeId, field: &'static str },
    #[error("edge {edge} of node {node} has negative amount {amount}")]
    NegativeAmount { node: NodeId, edge: usize, amount: f64 },
    #[error("node {node} has negative nominal obligation {obligation}")]
    NegativeObligation { node: NodeId, obligation: f64 },
    #[error("edge {edge} of node {node} points to {counterparty}, outside 0..{node_count}")]
    CounterpartyOutOfRange {
        node: NodeId,
        edge: usize,
        counterparty: NodeId,
        node_count: usize,
    },
    #[error("node {node} declares obligation {declared} but its edges sum to {edge_sum}")]
    ObligationMismatch {
        node: NodeId,
        declared: f64,
        edge_sum: f64,
    },
    #[error("sink {sink} cannot owe anything (obligation {obligation}, {edges} edges)")]
    SinkHasLiabilities {
        sink: NodeId,
        obligation: f64,
        edges: usize,
    },
    #[error("default floor of node {node} is {ratio}, outside [0, 1]")]
    FloorOutOfRange { node: NodeId, ratio: f64 },
    #[error("node {node} owes itself a positive amount")]
    SelfLoop { node: NodeId },
}

/// Errors surfaced by the clearing engine and its projector.
#[derive(Debug, Error)]
pub enum ClearingError {
    #[error("input contract violation: {0}")]
    Input(#[from] InputViolation),
    #[error(
        "no fixed point after {rounds} rounds ({defaulted} nodes in default, last ratio change {max_delta:e})"
    )]
    NonConvergence {
        rounds: u32,
        defaulted: usize,
        max_delta: f64,
    },
    #[error("invalid clearing configuration: {0}")]
    InvalidConfig(String),
    #[error("participant {node} is not a clearable node of this snapshot")]
    UnknownParticipant { node: NodeId },
}

impl ClearingError {
    /// Bad data, as opposed to a pathological but well-formed network.
    pub fn is_input_violation(&self) -> bool {
        matches!(self, Self::Input(_))
    }

    pub fn is_non_convergence(&self) -> bool {
        matches!(self, Self::NonConvergence { .. })
    }
}
