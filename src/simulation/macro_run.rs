//! Runs several macro iterations back to back, carrying the default floor
//! from each clearing into the next.

use crate::clearing::bookkeeping::DefaultFloor;
use crate::clearing::engine::ClearingEngine;
use crate::clearing::projector::ClearingResponse;
use crate::clearing::request::ClearingRequest;
use crate::core::error::ClearingError;
use crate::graph::liability_graph::LiabilityGraph;
use crate::simulation::agent::{population, EconomicAgent};
use crate::simulation::stress_test::{generate_network, NetworkConfig};
use log::info;
use serde::{Deserialize, Serialize};

/// Configuration of a multi-iteration stress scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroRunConfig {
    pub network: NetworkConfig,
    pub iterations: u64,
    /// Fraction of own resources lost per iteration, compounding.
    pub resource_shock: f64,
}

impl Default for MacroRunConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            iterations: 6,
            resource_shock: 0.05,
        }
    }
}

/// Outcome of one macro iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationReport {
    pub macro_iteration: u64,
    pub rounds: u32,
    pub defaulted: usize,
    pub carried: usize,
    /// Agents that defaulted for the first time in this iteration.
    pub first_defaults: u32,
    pub total_paid: f64,
    pub total_shortfall: f64,
}

/// Drives successive clearings over the same agent population.
///
/// Each snapshot must number the population identically, so the floor
/// produced by one clearing lines up with the next snapshot's nodes.
pub struct MacroRun<'e> {
    engine: &'e ClearingEngine,
    agents: Vec<EconomicAgent>,
    floor: Option<DefaultFloor>,
    reports: Vec<IterationReport>,
}

impl<'e> MacroRun<'e> {
    pub fn new(engine: &'e ClearingEngine, agents: Vec<EconomicAgent>) -> Self {
        Self {
            engine,
            agents,
            floor: None,
            reports: Vec::new(),
        }
    }

    /// Clear one snapshot, update every agent, and keep the new floor.
    pub fn run_iteration(
        &mut self,
        macro_iteration: u64,
        graph: LiabilityGraph,
    ) -> Result<ClearingResponse, ClearingError> {
        let mut request = ClearingRequest::new(macro_iteration, graph);
        request.floor = self.floor.take();
        let response = self.engine.clear(&request)?;

        let effects = response.dispatch(self.agents.iter_mut().map(|a| (a.node, a)))?;
        let totals = response.totals();
        let report = IterationReport {
            macro_iteration,
            rounds: response.rounds,
            defaulted: totals.defaulted,
            carried: totals.carried,
            first_defaults: effects.iter().sum(),
            total_paid: totals.total_paid,
            total_shortfall: totals.total_shortfall,
        };
        info!(
            "macro iteration {}: {} in default ({} carried, {} first-time) after {} rounds",
            macro_iteration, report.defaulted, report.carried, report.first_defaults, report.rounds
        );

        self.floor = Some(response.next_floor().clone());
        self.reports.push(report);
        Ok(response)
    }

    pub fn agents(&self) -> &[EconomicAgent] {
        &self.agents
    }

    pub fn floor(&self) -> Option<&DefaultFloor> {
        self.floor.as_ref()
    }

    pub fn reports(&self) -> &[IterationReport] {
        &self.reports
    }

    pub fn into_reports(self) -> Vec<IterationReport> {
        self.reports
    }
}

/// Run a seeded scenario: each iteration draws a fresh liability snapshot
/// for the same population and erodes own resources by the shock.
pub fn run_scenario(
    engine: &ClearingEngine,
    config: &MacroRunConfig,
) -> Result<Vec<IterationReport>, ClearingError> {
    if !(0.0..1.0).contains(&config.resource_shock) {
        return Err(ClearingError::InvalidConfig(format!(
            "resource shock must be in [0, 1), got {}",
            config.resource_shock
        )));
    }

    let agents = population(
        config.network.node_count,
        config.network.sink(),
        config.network.seed,
    );
    let mut run = MacroRun::new(engine, agents);
    for t in 0..config.iterations {
        let network = NetworkConfig {
            seed: config.network.seed.wrapping_add(t),
            ..config.network.clone()
        };
        let mut graph = generate_network(&network)?;
        let erosion = (1.0 - config.resource_shock).powi(t as i32);
        for resources in graph.own_resources_mut() {
            if *resources > 0.0 {
                *resources *= erosion;
            }
        }
        run.run_iteration(t, graph)?;
    }
    Ok(run.into_reports())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ClearingConfig;

    fn small_scenario() -> MacroRunConfig {
        MacroRunConfig {
            network: NetworkConfig {
                node_count: 300,
                avg_edges_per_node: 4,
                ..Default::default()
            },
            iterations: 4,
            resource_shock: 0.2,
        }
    }

    #[test]
    fn test_only_prior_defaults_are_carried() {
        let engine = ClearingEngine::new(ClearingConfig::default()).unwrap();
        let reports = run_scenario(&engine, &small_scenario()).unwrap();
        assert_eq!(reports.len(), 4);
        assert_eq!(reports[0].carried, 0);
        for pair in reports.windows(2) {
            // Defaulters that owe nothing in t + 1 drop their floor.
            assert!(pair[1].carried <= pair[0].defaulted);
            assert!(pair[1].defaulted >= pair[1].carried);
        }
    }

    #[test]
    fn test_first_defaults_add_up() {
        let engine = ClearingEngine::new(ClearingConfig::default()).unwrap();
        let reports = run_scenario(&engine, &small_scenario()).unwrap();
        let first: u32 = reports.iter().map(|r| r.first_defaults).sum();
        let last = reports.last().unwrap();
        // Agents whose floor lapsed can be out of default by the end.
        assert!(first as usize >= last.defaulted);
    }

    #[test]
    fn test_rejects_bad_shock() {
        let engine = ClearingEngine::new(ClearingConfig::default()).unwrap();
        let config = MacroRunConfig {
            resource_shock: 1.5,
            ..small_scenario()
        };
        assert!(run_scenario(&engine, &config).is_err());
    }
}
