use serde::{Deserialize, Serialize};
use std::fmt;

/// Dense index of a node (agent) in one macro iteration's liability graph.
///
/// Nodes are numbered `0..N` and the numbering is only stable for a single
/// clearing request/response pair. A node can stand for a bank, business,
/// household, government body, foreign entity, or the exogenous sink.
///
/// Stored as `u32` so that the per-edge counterparty arrays stay at four
/// bytes per entry even for hundreds of millions of edges.
///
/// # Examples
///
/// ```
/// use cascade_clearing::core::node::NodeId;
///
/// let bank = NodeId::new(3);
/// assert_eq!(bank.index(), 3);
/// assert!(NodeId::new(2) < bank);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
#[repr(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// Largest node count addressable by a `NodeId`.
    pub const MAX_NODES: usize = u32::MAX as usize;

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Convert a slot index into a node id, if it fits in 32 bits.
    pub fn from_index(index: usize) -> Option<Self> {
        u32::try_from(index).ok().map(Self)
    }

    /// Position of this node in the flat per-node arrays.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}
