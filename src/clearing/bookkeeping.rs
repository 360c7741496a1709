//! Default bookkeeping: who is in default, since which round, and what
//! floor the next macro iteration inherits.

use crate::core::error::InputViolation;
use crate::core::node::NodeId;
use crate::core::numeric::is_short;
use serde::{Deserialize, Serialize};

/// Per-node payment-ratio floor carried from one macro iteration into the
/// next.
///
/// `None` means the node enters the iteration unconstrained. A floor of
/// `Some(r)` with `r` short of full payment marks the node as already in
/// default.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DefaultFloor {
    ratios: Vec<Option<f64>>,
}

impl DefaultFloor {
    /// A floor that constrains nobody.
    pub fn none(node_count: usize) -> Self {
        Self {
            ratios: vec![None; node_count],
        }
    }

    pub fn from_ratios(ratios: Vec<Option<f64>>) -> Self {
        Self { ratios }
    }

    pub fn len(&self) -> usize {
        self.ratios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratios.is_empty()
    }

    pub fn get(&self, node: NodeId) -> Option<f64> {
        self.ratios.get(node.index()).copied().flatten()
    }

    pub fn ratios(&self) -> &[Option<f64>] {
        &self.ratios
    }

    /// Number of nodes whose floor is short of full payment.
    pub fn constrained_count(&self, epsilon: f64) -> usize {
        self.ratios
            .iter()
            .filter(|r| r.is_some_and(|r| is_short(r, epsilon)))
            .count()
    }

    /// Check that the floor covers `node_count` nodes with ratios in [0, 1].
    pub fn validate(&self, node_count: usize) -> Result<(), InputViolation> {
        if self.ratios.len() != node_count {
            return Err(InputViolation::LengthMismatch {
                field: "floor",
                expected: node_count,
                actual: self.ratios.len(),
            });
        }
        for (i, ratio) in self.ratios.iter().enumerate() {
            if let Some(r) = *ratio {
                if !(0.0..=1.0).contains(&r) {
                    return Err(InputViolation::FloorOutOfRange {
                        node: NodeId::new(i as u32),
                        ratio: r,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Default state of one node at the end of a clearing computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DefaultStatus {
    Solvent,
    /// Already in default when the iteration started.
    Carried,
    /// First fell short of full payment in `round`.
    Defaulted { round: u32 },
    /// The exogenous sink; never evaluated.
    Sink,
}

impl DefaultStatus {
    pub fn is_in_default(&self) -> bool {
        matches!(self, Self::Carried | Self::Defaulted { .. })
    }

    /// Round of first default in this iteration; 0 if none.
    pub fn default_round(&self) -> u32 {
        match self {
            Self::Defaulted { round } => *round,
            _ => 0,
        }
    }
}

/// Running defaulting-set membership within one macro iteration.
///
/// Membership only ever grows: once a node is recorded in default, no later
/// round removes it.
#[derive(Debug, Clone)]
pub struct DefaultBook {
    sink: NodeId,
    in_default: Vec<bool>,
    carried: Vec<bool>,
    default_round: Vec<u32>,
    defaulted: usize,
}

impl DefaultBook {
    pub fn new(node_count: usize, sink: NodeId) -> Self {
        Self {
            sink,
            in_default: vec![false; node_count],
            carried: vec![false; node_count],
            default_round: vec![0; node_count],
            defaulted: 0,
        }
    }

    /// Put `node` in the defaulting set before round 1.
    pub fn mark_carried(&mut self, node: NodeId) {
        let i = node.index();
        if node == self.sink || self.in_default[i] {
            return;
        }
        self.in_default[i] = true;
        self.carried[i] = true;
        self.defaulted += 1;
    }

    /// Add every node whose ratio fell short in `round`; returns how many
    /// joined the defaulting set.
    pub fn record_round(&mut self, round: u32, ratios: &[f64], epsilon: f64) -> usize {
        let sink = self.sink.index();
        let newly: usize = self
            .in_default
            .iter_mut()
            .zip(self.default_round.iter_mut())
            .zip(ratios)
            .enumerate()
            .map(|(i, ((flag, first), &ratio))| {
                if i == sink || *flag || !is_short(ratio, epsilon) {
                    return 0;
                }
                *flag = true;
                *first = round;
                1
            })
            .sum();
        self.defaulted += newly;
        newly
    }

    pub fn is_in_default(&self, node: NodeId) -> bool {
        self.in_default[node.index()]
    }

    pub fn is_carried(&self, node: NodeId) -> bool {
        self.carried[node.index()]
    }

    /// Round at which `node` first defaulted this iteration; 0 if it has
    /// not, or if it was carried in.
    pub fn default_round(&self, node: NodeId) -> u32 {
        self.default_round[node.index()]
    }

    pub fn defaulted_count(&self) -> usize {
        self.defaulted
    }

    pub fn carried_count(&self) -> usize {
        self.carried.iter().filter(|&&c| c).count()
    }

    pub fn status(&self, node: NodeId) -> DefaultStatus {
        let i = node.index();
        if node == self.sink {
            DefaultStatus::Sink
        } else if self.carried[i] {
            DefaultStatus::Carried
        } else if self.in_default[i] {
            DefaultStatus::Defaulted {
                round: self.default_round[i],
            }
        } else {
            DefaultStatus::Solvent
        }
    }

    /// Current members of the defaulting set, in index order.
    pub fn defaulting_set(&self) -> Vec<NodeId> {
        self.in_default
            .iter()
            .enumerate()
            .filter(|(_, &flag)| flag)
            .map(|(i, _)| NodeId::new(i as u32))
            .collect()
    }

    /// Floor for the next macro iteration.
    ///
    /// Every node in default now is floored at its final ratio, or at its
    /// prior floor if that was lower, so it enters the next iteration at
    /// least as constrained as it leaves this one.
    pub fn next_floor(&self, ratios: &[f64], prior: Option<&DefaultFloor>) -> DefaultFloor {
        let floors = self
            .in_default
            .iter()
            .zip(ratios)
            .enumerate()
            .map(|(i, (&flag, &ratio))| {
                if !flag {
                    return None;
                }
                let prior_ratio = prior
                    .and_then(|p| p.get(NodeId::new(i as u32)))
                    .unwrap_or(1.0);
                Some(ratio.min(prior_ratio))
            })
            .collect();
        DefaultFloor::from_ratios(floors)
    }
}
