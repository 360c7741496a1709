use crate::clearing::bookkeeping::{DefaultFloor, DefaultStatus};
use crate::clearing::engine::{ClearingSolution, RoundSummary};
use crate::core::error::ClearingError;
use crate::core::node::NodeId;
use crate::core::numeric::ordered_sum;
use crate::graph::liability_graph::LiabilityGraph;
use chrono::{DateTime, Utc};
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Something that owns the agent behind a node and wants to hear how
/// clearing went for it.
///
/// The returned effect is opaque to the engine and handed back to the
/// macro driver unchanged.
pub trait ClearingParticipant {
    type Effect;

    fn apply_clearing_result(
        &mut self,
        equity: f64,
        macro_iteration: u64,
        default_round: u32,
    ) -> Self::Effect;
}

/// Final clearing result for one node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeOutcome {
    /// Fraction of nominal obligation paid on every outgoing edge.
    pub ratio: f64,
    /// Own resources plus amount received, minus nominal obligation.
    pub equity: f64,
    /// Amount actually paid out across all outgoing edges.
    pub paid: f64,
    /// Amount actually received across all incoming edges.
    pub received: f64,
    pub status: DefaultStatus,
}

impl NodeOutcome {
    pub fn default_round(&self) -> u32 {
        self.status.default_round()
    }

    pub fn is_insolvent(&self) -> bool {
        self.equity < 0.0
    }
}

/// Network-wide aggregates of one clearing result.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ClearingTotals {
    pub total_nominal: f64,
    pub total_paid: f64,
    pub total_shortfall: f64,
    /// Nodes in default at the fixed point, carried ones included.
    pub defaulted: usize,
    pub carried: usize,
    pub insolvent: usize,
}

/// Everything the macro driver gets back for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearingResponse {
    pub request_id: Uuid,
    pub macro_iteration: u64,
    pub computed_at: DateTime<Utc>,
    /// Rounds executed, including the confirming round.
    pub rounds: u32,
    nodes: Vec<NodeOutcome>,
    /// Actual amount per edge, in the request graph's edge order.
    transfers: Vec<f64>,
    next_floor: DefaultFloor,
    round_summaries: Vec<RoundSummary>,
    totals: ClearingTotals,
}

impl ClearingResponse {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> &[NodeOutcome] {
        &self.nodes
    }

    pub fn node(&self, node: NodeId) -> &NodeOutcome {
        &self.nodes[node.index()]
    }

    pub fn ratio(&self, node: NodeId) -> f64 {
        self.node(node).ratio
    }

    pub fn equity(&self, node: NodeId) -> f64 {
        self.node(node).equity
    }

    pub fn default_round(&self, node: NodeId) -> u32 {
        self.node(node).default_round()
    }

    pub fn status(&self, node: NodeId) -> DefaultStatus {
        self.node(node).status
    }

    pub fn transfers(&self) -> &[f64] {
        &self.transfers
    }

    /// Floor to pass with the next macro iteration's request.
    pub fn next_floor(&self) -> &DefaultFloor {
        &self.next_floor
    }

    pub fn round_summaries(&self) -> &[RoundSummary] {
        &self.round_summaries
    }

    pub fn totals(&self) -> &ClearingTotals {
        &self.totals
    }

    /// Nodes in default at the fixed point, in index order.
    pub fn defaulted_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, outcome)| outcome.status.is_in_default())
            .map(|(i, _)| NodeId::new(i as u32))
            .collect()
    }

    /// Hand each participant its node's result and collect the effects.
    ///
    /// The sink has no owning agent; naming it, or a node outside the
    /// snapshot, is an error.
    pub fn dispatch<'a, P, I>(&self, participants: I) -> Result<Vec<P::Effect>, ClearingError>
    where
        P: ClearingParticipant + 'a,
        I: IntoIterator<Item = (NodeId, &'a mut P)>,
    {
        participants
            .into_iter()
            .map(|(node, participant)| -> Result<P::Effect, ClearingError> {
                let outcome = self
                    .nodes
                    .get(node.index())
                    .filter(|outcome| outcome.status != DefaultStatus::Sink)
                    .ok_or(ClearingError::UnknownParticipant { node })?;
                Ok(participant.apply_clearing_result(
                    outcome.equity,
                    self.macro_iteration,
                    outcome.default_round(),
                ))
            })
            .collect()
    }
}

impl fmt::Display for ClearingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = &self.totals;
        writeln!(f, "=== Clearing Result (macro iteration {}) ===", self.macro_iteration)?;
        writeln!(f, "Request:          {}", self.request_id)?;
        writeln!(f, "Nodes:            {}", self.nodes.len())?;
        writeln!(f, "Edges:            {}", self.transfers.len())?;
        writeln!(f, "Rounds:           {}", self.rounds)?;
        writeln!(f, "Nominal:          {:.2}", t.total_nominal)?;
        writeln!(f, "Paid:             {:.2}", t.total_paid)?;
        writeln!(f, "Shortfall:        {:.2}", t.total_shortfall)?;
        writeln!(f, "In default:       {} ({} carried)", t.defaulted, t.carried)?;
        writeln!(f, "Negative equity:  {}", t.insolvent)?;

        writeln!(f, "\nDefault cascade:")?;
        for summary in &self.round_summaries {
            if summary.newly_defaulted > 0 {
                writeln!(
                    f,
                    "  round {:>4}: +{} ({} total)",
                    summary.round, summary.newly_defaulted, summary.defaulted
                )?;
            }
        }
        Ok(())
    }
}

/// Turns an engine solution into per-node and per-edge results.
pub struct ResultProjector;

impl ResultProjector {
    /// Project `solution` for `graph`.
    ///
    /// Equity is recomputed from the final ratios, so every edge's payment
    /// is counted exactly once on the debtor side and once on the creditor
    /// side.
    pub fn project(
        graph: &LiabilityGraph,
        solution: ClearingSolution,
        request_id: Uuid,
        macro_iteration: u64,
    ) -> ClearingResponse {
        let ratios = &solution.ratios;
        let n = graph.node_count();

        let transfers: Vec<f64> = (0..n)
            .into_par_iter()
            .flat_map_iter(|i| {
                let ratio = ratios[i];
                graph
                    .outgoing(NodeId::new(i as u32))
                    .1
                    .iter()
                    .map(move |amount| amount * ratio)
            })
            .collect();

        let nodes: Vec<NodeOutcome> = (0..n)
            .into_par_iter()
            .map(|i| {
                let node = NodeId::new(i as u32);
                let obligation = graph.nominal_obligation(node);
                let received = solution.incoming.inflow(node, ratios);
                NodeOutcome {
                    ratio: ratios[i],
                    equity: graph.own_resources(node) + received - obligation,
                    paid: ordered_sum(transfers[graph.edge_range(node)].iter().copied()),
                    received,
                    status: solution.book.status(node),
                }
            })
            .collect();

        let total_nominal = graph.total_nominal();
        let total_paid = ordered_sum(transfers.iter().copied());
        let totals = ClearingTotals {
            total_nominal,
            total_paid,
            total_shortfall: total_nominal - total_paid,
            defaulted: solution.book.defaulted_count(),
            carried: solution.book.carried_count(),
            insolvent: nodes.iter().filter(|o| o.is_insolvent()).count(),
        };
        debug!(
            "projected {} transfers, paid {:.2} of {:.2}",
            transfers.len(),
            total_paid,
            total_nominal
        );

        ClearingResponse {
            request_id,
            macro_iteration,
            computed_at: Utc::now(),
            rounds: solution.rounds,
            nodes,
            transfers,
            next_floor: solution.next_floor,
            round_summaries: solution.round_summaries,
            totals,
        }
    }
}
