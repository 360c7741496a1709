//! A minimal agent population that receives clearing results.

use crate::clearing::projector::ClearingParticipant;
use crate::core::node::NodeId;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sector an agent belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Bank,
    Business,
    Household,
    Government,
    Foreign,
}

impl AgentKind {
    pub fn all() -> [Self; 5] {
        [
            Self::Bank,
            Self::Business,
            Self::Household,
            Self::Government,
            Self::Foreign,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Bank => "bank",
            Self::Business => "business",
            Self::Household => "household",
            Self::Government => "government",
            Self::Foreign => "foreign",
        }
    }

    /// Population share used by [`population`].
    fn share(&self) -> f64 {
        match self {
            Self::Bank => 0.02,
            Self::Business => 0.25,
            Self::Household => 0.68,
            Self::Government => 0.01,
            Self::Foreign => 0.04,
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Book-keeping an agent keeps about its own clearing history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomicAgent {
    pub node: NodeId,
    pub kind: AgentKind,
    /// Equity after the latest clearing.
    pub equity: f64,
    /// Macro iteration in which the agent first defaulted.
    pub defaulted_in: Option<u64>,
    /// Clearing round of that first default.
    pub default_round: u32,
}

impl EconomicAgent {
    pub fn new(node: NodeId, kind: AgentKind) -> Self {
        Self {
            node,
            kind,
            equity: 0.0,
            defaulted_in: None,
            default_round: 0,
        }
    }

    pub fn has_defaulted(&self) -> bool {
        self.defaulted_in.is_some()
    }
}

impl ClearingParticipant for EconomicAgent {
    /// 1 when this result pushed the agent into default for the first
    /// time, else 0.
    type Effect = u32;

    fn apply_clearing_result(&mut self, equity: f64, macro_iteration: u64, default_round: u32) -> u32 {
        self.equity = equity;
        if default_round == 0 || self.defaulted_in.is_some() {
            return 0;
        }
        self.defaulted_in = Some(macro_iteration);
        self.default_round = default_round;
        1
    }
}

/// One agent per non-sink node, with sectors drawn from fixed shares.
pub fn population(node_count: usize, sink: NodeId, seed: u64) -> Vec<EconomicAgent> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..node_count)
        .map(|i| NodeId::new(i as u32))
        .filter(|&node| node != sink)
        .map(|node| {
            let draw: f64 = rng.gen();
            let mut cumulative = 0.0;
            let kind = AgentKind::all()
                .into_iter()
                .find(|kind| {
                    cumulative += kind.share();
                    draw < cumulative
                })
                .unwrap_or(AgentKind::Household);
            EconomicAgent::new(node, kind)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_default_is_reported_once() {
        let mut agent = EconomicAgent::new(NodeId::new(0), AgentKind::Business);
        assert_eq!(agent.apply_clearing_result(10.0, 1, 0), 0);
        assert!(!agent.has_defaulted());
        assert_eq!(agent.apply_clearing_result(-5.0, 2, 3), 1);
        assert_eq!(agent.apply_clearing_result(-9.0, 3, 1), 0);
        assert_eq!(agent.defaulted_in, Some(2));
        assert_eq!(agent.default_round, 3);
        assert_eq!(agent.equity, -9.0);
    }

    #[test]
    fn test_population_skips_sink() {
        let agents = population(100, NodeId::new(99), 1);
        assert_eq!(agents.len(), 99);
        assert!(agents.iter().all(|a| a.node != NodeId::new(99)));
        assert!(agents.iter().any(|a| a.kind == AgentKind::Household));
    }

    #[test]
    fn test_shares_sum_to_one() {
        let total: f64 = AgentKind::all().iter().map(|k| k.share()).sum();
        assert!((total - 1.0).abs() < 1e-12);
    }
}
