use crate::core::error::InputViolation;
use crate::core::node::NodeId;
use crate::core::numeric::{approx_eq, ordered_sum};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Flat snapshot of the liability network for one macro iteration.
///
/// Outgoing edges are stored in compressed sparse row form: the edges of
/// node `i` occupy positions `edge_offsets[i]..edge_offsets[i + 1]` of the
/// two parallel arrays `counterparties` and `amounts`. Memory therefore
/// grows with the edge count alone, with no per-node allocation.
///
/// Exactly one node, the sink, stands for everything outside the modelled
/// economy. It may be owed money but never owes any.
///
/// Construction through [`LiabilityGraph::from_raw_parts`] or serde does not
/// check the contract; the clearing engine calls [`LiabilityGraph::validate`]
/// before the first round. Use
/// [`LiabilityGraphBuilder`](crate::graph::builder::LiabilityGraphBuilder)
/// to assemble a consistent snapshot edge by edge.
///
/// # Examples
///
/// ```
/// use cascade_clearing::core::node::NodeId;
/// use cascade_clearing::graph::liability_graph::LiabilityGraph;
///
/// // Node 0 owes node 1 100; node 2 is the sink.
/// let graph = LiabilityGraph::from_raw_parts(
///     NodeId::new(2),
///     vec![100.0, 0.0, 0.0],
///     vec![40.0, 0.0, 0.0],
///     vec![0, 1, 1, 1],
///     vec![NodeId::new(1)],
///     vec![100.0],
/// );
///
/// assert!(graph.validate(1e-4).is_ok());
/// assert_eq!(graph.node_count(), 3);
/// assert_eq!(graph.edge_count(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiabilityGraph {
    sink: NodeId,
    /// Per node: sum of its outgoing edge amounts.
    nominal_obligation: Vec<f64>,
    /// Per node: operating cash flow plus liquid assets; may be negative.
    own_resources: Vec<f64>,
    /// `node_count + 1` offsets into the edge arrays.
    edge_offsets: Vec<usize>,
    counterparties: Vec<NodeId>,
    amounts: Vec<f64>,
}

impl LiabilityGraph {
    /// Assemble a snapshot from flat arrays without checking them.
    pub fn from_raw_parts(
        sink: NodeId,
        nominal_obligation: Vec<f64>,
        own_resources: Vec<f64>,
        edge_offsets: Vec<usize>,
        counterparties: Vec<NodeId>,
        amounts: Vec<f64>,
    ) -> Self {
        Self {
            sink,
            nominal_obligation,
            own_resources,
            edge_offsets,
            counterparties,
            amounts,
        }
    }

    pub fn node_count(&self) -> usize {
        self.nominal_obligation.len()
    }

    pub fn edge_count(&self) -> usize {
        self.counterparties.len()
    }

    pub fn sink(&self) -> NodeId {
        self.sink
    }

    pub fn is_sink(&self, node: NodeId) -> bool {
        node == self.sink
    }

    pub fn nominal_obligation(&self, node: NodeId) -> f64 {
        self.nominal_obligation[node.index()]
    }

    pub fn own_resources(&self, node: NodeId) -> f64 {
        self.own_resources[node.index()]
    }

    pub fn nominal_obligations(&self) -> &[f64] {
        &self.nominal_obligation
    }

    pub fn all_own_resources(&self) -> &[f64] {
        &self.own_resources
    }

    /// Mutable access for callers applying resource shocks between
    /// building a snapshot and clearing it.
    pub fn own_resources_mut(&mut self) -> &mut [f64] {
        &mut self.own_resources
    }

    /// Positions of `node`'s outgoing edges in the flat edge arrays.
    pub fn edge_range(&self, node: NodeId) -> Range<usize> {
        let i = node.index();
        self.edge_offsets[i]..self.edge_offsets[i + 1]
    }

    /// Outgoing edges of `node` as parallel (counterparty, amount) slices.
    pub fn outgoing(&self, node: NodeId) -> (&[NodeId], &[f64]) {
        let range = self.edge_range(node);
        (
            &self.counterparties[range.clone()],
            &self.amounts[range],
        )
    }

    pub fn edge_offsets(&self) -> &[usize] {
        &self.edge_offsets
    }

    pub fn counterparties(&self) -> &[NodeId] {
        &self.counterparties
    }

    pub fn amounts(&self) -> &[f64] {
        &self.amounts
    }

    /// All edges as (debtor, creditor, amount), in storage order.
    pub fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId, f64)> + '_ {
        self.nodes().flat_map(move |debtor| {
            let (creditors, amounts) = self.outgoing(debtor);
            creditors
                .iter()
                .zip(amounts)
                .map(move |(&creditor, &amount)| (debtor, creditor, amount))
        })
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> {
        (0..self.node_count() as u32).map(NodeId::new)
    }

    /// Gross nominal amount of all edges.
    pub fn total_nominal(&self) -> f64 {
        ordered_sum(self.amounts.iter().copied())
    }

    /// Check every input precondition of the clearing engine.
    ///
    /// Structural problems (array lengths, offsets, sink placement) are
    /// reported first; per-node problems are then reported for the lowest
    /// offending node index, independent of thread scheduling.
    pub fn validate(&self, tolerance: f64) -> Result<(), InputViolation> {
        let n = self.node_count();
        if n == 0 {
            return Err(InputViolation::EmptyNetwork);
        }
        if n > NodeId::MAX_NODES {
            return Err(InputViolation::TooManyNodes { node_count: n });
        }
        if self.sink.index() >= n {
            return Err(InputViolation::SinkOutOfRange {
                sink: self.sink,
                node_count: n,
            });
        }
        expect_len("own_resources", n, self.own_resources.len())?;
        expect_len("edge_offsets", n + 1, self.edge_offsets.len())?;
        expect_len("amounts", self.counterparties.len(), self.amounts.len())?;

        if self.edge_offsets[0] != 0 {
            return Err(InputViolation::MalformedOffsets { node: NodeId::new(0) });
        }
        for (i, window) in self.edge_offsets.windows(2).enumerate() {
            if window[1] < window[0] || window[1] > self.counterparties.len() {
                return Err(InputViolation::MalformedOffsets {
                    node: NodeId::new(i as u32),
                });
            }
        }
        if self.edge_offsets[n] != self.counterparties.len() {
            return Err(InputViolation::MalformedOffsets {
                node: NodeId::new((n - 1) as u32),
            });
        }

        let sink_edges = self.edge_range(self.sink).len();
        let sink_obligation = self.nominal_obligation(self.sink);
        if sink_edges > 0 || sink_obligation != 0.0 {
            return Err(InputViolation::SinkHasLiabilities {
                sink: self.sink,
                obligation: sink_obligation,
                edges: sink_edges,
            });
        }

        match (0..n as u32)
            .into_par_iter()
            .find_map_first(|raw| self.check_node(NodeId::new(raw), tolerance).err())
        {
            Some(violation) => Err(violation),
            None => Ok(()),
        }
    }

    fn check_node(&self, node: NodeId, tolerance: f64) -> Result<(), InputViolation> {
        let n = self.node_count();
        let own = self.own_resources(node);
        if !own.is_finite() {
            return Err(InputViolation::NonFinite {
                node,
                field: "own_resources",
            });
        }
        let declared = self.nominal_obligation(node);
        if !declared.is_finite() {
            return Err(InputViolation::NonFinite {
                node,
                field: "nominal_obligation",
            });
        }
        if declared < 0.0 {
            return Err(InputViolation::NegativeObligation {
                node,
                obligation: declared,
            });
        }

        let range = self.edge_range(node);
        for edge in range.clone() {
            let amount = self.amounts[edge];
            if !amount.is_finite() {
                return Err(InputViolation::NonFinite {
                    node,
                    field: "edge amount",
                });
            }
            if amount < 0.0 {
                return Err(InputViolation::NegativeAmount { node, edge, amount });
            }
            let counterparty = self.counterparties[edge];
            if counterparty.index() >= n {
                return Err(InputViolation::CounterpartyOutOfRange {
                    node,
                    edge,
                    counterparty,
                    node_count: n,
                });
            }
        }

        let edge_sum = ordered_sum(self.amounts[range].iter().copied());
        if !approx_eq(declared, edge_sum, tolerance) {
            return Err(InputViolation::ObligationMismatch {
                node,
                declared,
                edge_sum,
            });
        }
        Ok(())
    }
}

fn expect_len(field: &'static str, expected: usize, actual: usize) -> Result<(), InputViolation> {
    if expected == actual {
        Ok(())
    } else {
        Err(InputViolation::LengthMismatch {
            field,
            expected,
            actual,
        })
    }
}
