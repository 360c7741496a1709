use crate::core::error::{ClearingError, InputViolation};
use crate::core::node::NodeId;
use crate::core::numeric::CompensatedSum;
use crate::graph::liability_graph::LiabilityGraph;

/// Assembles a [`LiabilityGraph`] one liability at a time.
///
/// Every liability is checked as it is added, so a graph produced by
/// [`build`](Self::build) always satisfies the engine's input contract:
/// nominal obligations equal edge sums, amounts are non-negative, every
/// counterparty is a node of the snapshot, and the sink owes nothing.
///
/// Repeated liabilities between the same pair are merged into one edge.
///
/// # Examples
///
/// ```
/// use cascade_clearing::core::node::NodeId;
/// use cascade_clearing::graph::builder::LiabilityGraphBuilder;
///
/// let (a, b, sink) = (NodeId::new(0), NodeId::new(1), NodeId::new(2));
/// let mut builder = LiabilityGraphBuilder::new(3, sink).unwrap();
/// builder.add_liability(a, b, 70.0).unwrap();
/// builder.add_liability(a, b, 30.0).unwrap();
/// builder.add_resources(a, 40.0).unwrap();
///
/// let graph = builder.build();
/// assert_eq!(graph.edge_count(), 1);
/// assert_eq!(graph.nominal_obligation(a), 100.0);
/// ```
#[derive(Debug, Clone)]
pub struct LiabilityGraphBuilder {
    sink: NodeId,
    own_resources: Vec<f64>,
    liabilities: Vec<(NodeId, NodeId, f64)>,
}

impl LiabilityGraphBuilder {
    /// Start a snapshot of `node_count` nodes with `sink` as the exogenous
    /// drain.
    pub fn new(node_count: usize, sink: NodeId) -> Result<Self, ClearingError> {
        if node_count == 0 {
            return Err(InputViolation::EmptyNetwork.into());
        }
        if node_count > NodeId::MAX_NODES {
            return Err(InputViolation::TooManyNodes { node_count }.into());
        }
        if sink.index() >= node_count {
            return Err(InputViolation::SinkOutOfRange { sink, node_count }.into());
        }
        Ok(Self {
            sink,
            own_resources: vec![0.0; node_count],
            liabilities: Vec::new(),
        })
    }

    pub fn node_count(&self) -> usize {
        self.own_resources.len()
    }

    pub fn sink(&self) -> NodeId {
        self.sink
    }

    /// Reserve room for `additional` liabilities.
    pub fn reserve(&mut self, additional: usize) {
        self.liabilities.reserve(additional);
    }

    /// Add to `node`'s non-network resources (cash flow, liquid assets).
    pub fn add_resources(&mut self, node: NodeId, amount: f64) -> Result<&mut Self, ClearingError> {
        self.check_node(node)?;
        if !amount.is_finite() {
            return Err(InputViolation::NonFinite {
                node,
                field: "own_resources",
            }
            .into());
        }
        self.own_resources[node.index()] += amount;
        Ok(self)
    }

    /// Record that `debtor` owes `creditor` `amount`.
    ///
    /// Zero amounts are accepted and dropped.
    pub fn add_liability(
        &mut self,
        debtor: NodeId,
        creditor: NodeId,
        amount: f64,
    ) -> Result<&mut Self, ClearingError> {
        self.check_node(debtor)?;
        if creditor.index() >= self.node_count() {
            return Err(InputViolation::CounterpartyOutOfRange {
                node: debtor,
                edge: self.liabilities.len(),
                counterparty: creditor,
                node_count: self.node_count(),
            }
            .into());
        }
        if !amount.is_finite() {
            return Err(InputViolation::NonFinite {
                node: debtor,
                field: "edge amount",
            }
            .into());
        }
        if amount < 0.0 {
            return Err(InputViolation::NegativeAmount {
                node: debtor,
                edge: self.liabilities.len(),
                amount,
            }
            .into());
        }
        if amount == 0.0 {
            return Ok(self);
        }
        if debtor == self.sink {
            return Err(InputViolation::SinkHasLiabilities {
                sink: self.sink,
                obligation: amount,
                edges: 1,
            }
            .into());
        }
        if debtor == creditor {
            return Err(InputViolation::SelfLoop { node: debtor }.into());
        }
        self.liabilities.push((debtor, creditor, amount));
        Ok(self)
    }

    /// Freeze the snapshot into flat arrays.
    ///
    /// Edges are ordered by debtor, then creditor, which makes the result
    /// independent of insertion order.
    pub fn build(mut self) -> LiabilityGraph {
        let n = self.node_count();
        self.liabilities
            .sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let mut edge_offsets = Vec::with_capacity(n + 1);
        let mut counterparties: Vec<NodeId> = Vec::with_capacity(self.liabilities.len());
        let mut amounts: Vec<f64> = Vec::with_capacity(self.liabilities.len());
        let mut nominal_obligation = vec![0.0; n];

        let mut cursor = 0;
        for debtor in 0..n {
            edge_offsets.push(counterparties.len());
            let mut total = CompensatedSum::new();
            while cursor < self.liabilities.len() && self.liabilities[cursor].0.index() == debtor {
                let (_, creditor, amount) = self.liabilities[cursor];
                match counterparties.last() {
                    Some(&last) if last == creditor && amounts.len() > edge_offsets[debtor] => {
                        if let Some(merged) = amounts.last_mut() {
                            *merged += amount;
                        }
                    }
                    _ => {
                        counterparties.push(creditor);
                        amounts.push(amount);
                    }
                }
                total.add(amount);
                cursor += 1;
            }
            nominal_obligation[debtor] = total.value();
        }
        edge_offsets.push(counterparties.len());

        LiabilityGraph::from_raw_parts(
            self.sink,
            nominal_obligation,
            self.own_resources,
            edge_offsets,
            counterparties,
            amounts,
        )
    }

    fn check_node(&self, node: NodeId) -> Result<(), ClearingError> {
        if node.index() >= self.node_count() {
            return Err(InputViolation::CounterpartyOutOfRange {
                node,
                edge: self.liabilities.len(),
                counterparty: node,
                node_count: self.node_count(),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(i: u32) -> NodeId {
        NodeId::new(i)
    }

    #[test]
    fn test_build_sorts_and_merges() {
        let mut builder = LiabilityGraphBuilder::new(4, n(3)).unwrap();
        builder.add_liability(n(1), n(0), 5.0).unwrap();
        builder.add_liability(n(0), n(2), 10.0).unwrap();
        builder.add_liability(n(0), n(1), 20.0).unwrap();
        builder.add_liability(n(0), n(2), 15.0).unwrap();
        builder.add_liability(n(2), n(3), 7.0).unwrap();

        let graph = builder.build();
        assert!(graph.validate(1e-4).is_ok());
        assert_eq!(graph.edge_count(), 4);
        assert_eq!(graph.outgoing(n(0)).0, &[n(1), n(2)]);
        assert_eq!(graph.outgoing(n(0)).1, &[20.0, 25.0]);
        assert_eq!(graph.nominal_obligation(n(0)), 45.0);
        assert_eq!(graph.nominal_obligation(n(3)), 0.0);
        assert_eq!(graph.edge_offsets(), &[0, 2, 3, 4, 4]);
    }

    #[test]
    fn test_resources_accumulate() {
        let mut builder = LiabilityGraphBuilder::new(2, n(1)).unwrap();
        builder.add_resources(n(0), 30.0).unwrap();
        builder.add_resources(n(0), -45.0).unwrap();
        let graph = builder.build();
        assert_eq!(graph.own_resources(n(0)), -15.0);
    }

    #[test]
    fn test_rejects_sink_debtor() {
        let mut builder = LiabilityGraphBuilder::new(2, n(1)).unwrap();
        let err = builder.add_liability(n(1), n(0), 1.0).unwrap_err();
        assert!(err.is_input_violation());
    }

    #[test]
    fn test_rejects_self_loop_and_negative() {
        let mut builder = LiabilityGraphBuilder::new(3, n(2)).unwrap();
        assert!(matches!(
            builder.add_liability(n(0), n(0), 1.0),
            Err(ClearingError::Input(InputViolation::SelfLoop { .. }))
        ));
        assert!(matches!(
            builder.add_liability(n(0), n(1), -1.0),
            Err(ClearingError::Input(InputViolation::NegativeAmount { .. }))
        ));
    }

    #[test]
    fn test_rejects_unknown_nodes() {
        assert!(LiabilityGraphBuilder::new(0, n(0)).is_err());
        assert!(LiabilityGraphBuilder::new(2, n(2)).is_err());
        let mut builder = LiabilityGraphBuilder::new(2, n(1)).unwrap();
        assert!(builder.add_liability(n(0), n(5), 1.0).is_err());
        assert!(builder.add_resources(n(7), 1.0).is_err());
    }

    #[test]
    fn test_zero_amount_dropped() {
        let mut builder = LiabilityGraphBuilder::new(2, n(1)).unwrap();
        builder.add_liability(n(0), n(0), 0.0).unwrap();
        assert_eq!(builder.build().edge_count(), 0);
    }
}
