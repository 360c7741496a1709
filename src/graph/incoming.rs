use crate::core::node::NodeId;
use crate::core::numeric::CompensatedSum;
use crate::graph::liability_graph::LiabilityGraph;

/// Transposed view of a [`LiabilityGraph`]: for each creditor, the debtors
/// that owe it and the nominal amounts.
///
/// Lets every node pull its own inflow from the previous round's ratios,
/// so a round writes each node's slot from exactly one place. Incoming
/// edges of a creditor are kept in ascending debtor order (then storage
/// order), which fixes the accumulation order of every inflow.
#[derive(Debug, Clone)]
pub struct IncomingIndex {
    offsets: Vec<usize>,
    debtors: Vec<NodeId>,
    amounts: Vec<f64>,
}

impl IncomingIndex {
    /// Counting-sort transpose of the graph's outgoing edges.
    ///
    /// The graph must already be validated.
    pub fn build(graph: &LiabilityGraph) -> Self {
        let n = graph.node_count();
        let mut offsets = vec![0usize; n + 1];
        for creditor in graph.counterparties() {
            offsets[creditor.index() + 1] += 1;
        }
        for i in 0..n {
            offsets[i + 1] += offsets[i];
        }

        let edge_count = graph.edge_count();
        let mut cursor = offsets.clone();
        let mut debtors = vec![NodeId::default(); edge_count];
        let mut amounts = vec![0.0; edge_count];
        for (debtor, creditor, amount) in graph.edges() {
            let slot = &mut cursor[creditor.index()];
            debtors[*slot] = debtor;
            amounts[*slot] = amount;
            *slot += 1;
        }

        Self {
            offsets,
            debtors,
            amounts,
        }
    }

    pub fn in_degree(&self, node: NodeId) -> usize {
        let i = node.index();
        self.offsets[i + 1] - self.offsets[i]
    }

    /// Incoming edges of `node` as parallel (debtor, amount) slices.
    pub fn incoming(&self, node: NodeId) -> (&[NodeId], &[f64]) {
        let i = node.index();
        let range = self.offsets[i]..self.offsets[i + 1];
        (&self.debtors[range.clone()], &self.amounts[range])
    }

    /// Amount `node` receives when every debtor pays its `ratios` share.
    pub fn inflow(&self, node: NodeId, ratios: &[f64]) -> f64 {
        let (debtors, amounts) = self.incoming(node);
        let mut total = CompensatedSum::new();
        for (debtor, amount) in debtors.iter().zip(amounts) {
            total.add(amount * ratios[debtor.index()]);
        }
        total.value()
    }
}
