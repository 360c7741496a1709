//! Fictitious-default clearing engine.
//!
//! Computes the greatest clearing payment vector of a liability snapshot by
//! starting every node at full payment and contracting ratios round by
//! round until neither the defaulting set nor any ratio moves.
//!
//! After every round in which ratios still move, every short or defaulting
//! node is settled exactly (see [`settle`](crate::clearing::settle)). The
//! next round then either pushes another node short or confirms the fixed
//! point, so the round count stays bounded by the number of nodes.
//!
//! # Round structure
//!
//! Each round is a Jacobi update: every node reads only the ratios committed
//! by the previous round and writes only its own slot of a scratch buffer.
//! The buffers are swapped once every node is done, which is the barrier
//! between rounds. Because no node reads a value written in the same round
//! and every inflow is summed in a fixed order, the result is bit-identical
//! whether a round runs on one thread or many.

use crate::clearing::bookkeeping::{DefaultBook, DefaultFloor};
use crate::clearing::projector::{ClearingResponse, ResultProjector};
use crate::clearing::request::ClearingRequest;
use crate::clearing::settle::{settle_defaulting_set, SETTLED_DRIFT};
use crate::core::config::{CarryPolicy, ClearingConfig};
use crate::core::error::ClearingError;
use crate::core::node::NodeId;
use crate::core::numeric::{clamped_ratio, is_short};
use crate::graph::incoming::IncomingIndex;
use crate::graph::liability_graph::LiabilityGraph;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Where the per-node work of a round runs.
#[derive(Debug)]
pub enum RoundExecutor {
    Sequential,
    /// The process-wide rayon pool.
    GlobalPool,
    Dedicated(rayon::ThreadPool),
}

impl RoundExecutor {
    pub fn from_config(config: &ClearingConfig) -> Result<Self, ClearingError> {
        match config.worker_threads {
            0 => Ok(Self::GlobalPool),
            1 => Ok(Self::Sequential),
            threads => rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|i| format!("clearing-worker-{i}"))
                .build()
                .map(Self::Dedicated)
                .map_err(|e| {
                    ClearingError::InvalidConfig(format!("cannot start {threads} workers: {e}"))
                }),
        }
    }

    pub fn is_parallel(&self) -> bool {
        !matches!(self, Self::Sequential)
    }

    fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match self {
            Self::Dedicated(pool) => pool.install(op),
            _ => op(),
        }
    }
}

/// What happened in one round.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round: u32,
    /// Nodes that joined the defaulting set in this round.
    pub newly_defaulted: usize,
    /// Size of the defaulting set after this round.
    pub defaulted: usize,
    /// Largest absolute ratio change against the previous round.
    pub max_ratio_change: f64,
    pub converged: bool,
    /// The defaulting set was settled exactly after this round.
    #[serde(default)]
    pub settled: bool,
}

/// Mutable state of one clearing computation.
///
/// Created by [`ClearingEngine::prepare`] from a validated snapshot and
/// advanced with [`ClearingEngine::step`]. Holding the state directly is
/// useful for inspecting intermediate rounds; [`ClearingEngine::solve`]
/// runs the whole loop.
#[derive(Debug)]
pub struct ClearingState<'g> {
    graph: &'g LiabilityGraph,
    incoming: IncomingIndex,
    ratios: Vec<f64>,
    scratch: Vec<f64>,
    equity: Vec<f64>,
    book: DefaultBook,
    round: u32,
    converged: bool,
    settled: bool,
    last_change: f64,
}

impl<'g> ClearingState<'g> {
    pub fn graph(&self) -> &'g LiabilityGraph {
        self.graph
    }

    /// Rounds executed so far; 0 before the first step.
    pub fn round(&self) -> u32 {
        self.round
    }

    /// Ratios committed by the latest round (round 0: starting ratios).
    pub fn ratios(&self) -> &[f64] {
        &self.ratios
    }

    /// Equity per node as computed in the latest round, from the inflows of
    /// the round before it.
    pub fn round_equity(&self) -> &[f64] {
        &self.equity
    }

    pub fn book(&self) -> &DefaultBook {
        &self.book
    }

    pub fn is_converged(&self) -> bool {
        self.converged
    }
}

/// Fixed point reached by the engine, before projection.
#[derive(Debug, Clone)]
pub struct ClearingSolution {
    pub ratios: Vec<f64>,
    pub book: DefaultBook,
    pub incoming: IncomingIndex,
    pub rounds: u32,
    pub round_summaries: Vec<RoundSummary>,
    pub next_floor: DefaultFloor,
}

/// Clearing payment engine.
///
/// # Examples
///
/// ```
/// use cascade_clearing::prelude::*;
///
/// // A owes B 100 but only has 40.
/// let (a, b, sink) = (NodeId::new(0), NodeId::new(1), NodeId::new(2));
/// let mut builder = LiabilityGraphBuilder::new(3, sink).unwrap();
/// builder.add_liability(a, b, 100.0).unwrap();
/// builder.add_resources(a, 40.0).unwrap();
/// let graph = builder.build();
///
/// let engine = ClearingEngine::new(ClearingConfig::default()).unwrap();
/// let solution = engine.solve(&graph, None).unwrap();
/// assert_eq!(solution.ratios[0], 0.4);
/// assert_eq!(solution.ratios[1], 1.0);
/// ```
#[derive(Debug)]
pub struct ClearingEngine {
    config: ClearingConfig,
    executor: RoundExecutor,
}

impl ClearingEngine {
    pub fn new(config: ClearingConfig) -> Result<Self, ClearingError> {
        config.validate()?;
        let executor = RoundExecutor::from_config(&config)?;
        Ok(Self { config, executor })
    }

    pub fn config(&self) -> &ClearingConfig {
        &self.config
    }

    /// Validate a snapshot and set up round 0.
    ///
    /// Round 0 assumes full payment everywhere, except for nodes carried in
    /// default by `floor`: under [`CarryPolicy::CarryRatio`] they start at
    /// their floor ratio, under [`CarryPolicy::CarryStatus`] they start at
    /// full payment but stay in the defaulting set. Nodes without
    /// obligations and the sink always start (and stay) at 1 and are never
    /// carried, so their floor lapses.
    pub fn prepare<'g>(
        &self,
        graph: &'g LiabilityGraph,
        floor: Option<&DefaultFloor>,
    ) -> Result<ClearingState<'g>, ClearingError> {
        graph.validate(self.config.epsilon)?;
        if let Some(floor) = floor {
            floor.validate(graph.node_count())?;
        }

        let n = graph.node_count();
        let policy = self.config.carry_policy;
        let floor = match (floor, policy) {
            (Some(_), CarryPolicy::Reevaluate) => {
                warn!("default floor supplied but ignored under {policy} policy");
                None
            }
            (floor, _) => floor,
        };

        let mut book = DefaultBook::new(n, graph.sink());
        let mut ratios = vec![1.0; n];
        if let Some(floor) = floor {
            for node in graph.nodes() {
                let Some(carried) = floor.get(node) else {
                    continue;
                };
                // Nothing owed this iteration, nothing to default on.
                if graph.is_sink(node)
                    || graph.nominal_obligation(node) == 0.0
                    || !is_short(carried, self.config.epsilon)
                {
                    continue;
                }
                book.mark_carried(node);
                if policy == CarryPolicy::CarryRatio {
                    ratios[node.index()] = carried;
                }
            }
        }

        let equity = graph
            .all_own_resources()
            .iter()
            .zip(graph.nominal_obligations())
            .map(|(own, obligation)| own - obligation)
            .collect();

        Ok(ClearingState {
            graph,
            incoming: IncomingIndex::build(graph),
            scratch: vec![0.0; n],
            ratios,
            equity,
            book,
            round: 0,
            converged: false,
            settled: false,
            last_change: 0.0,
        })
    }

    /// Run one Jacobi round, commit it, and settle the defaulting set if
    /// ratios are still moving.
    pub fn step(&self, state: &mut ClearingState<'_>) -> RoundSummary {
        let parallel = self.executor.is_parallel()
            && state.graph.node_count() >= self.config.parallel_threshold;

        let graph: &LiabilityGraph = state.graph;
        let incoming: &IncomingIndex = &state.incoming;
        let previous: &[f64] = &state.ratios;
        let evaluate = |(i, (ratio, equity)): (usize, (&mut f64, &mut f64))| -> f64 {
            let (next, next_equity) = evaluate_node(NodeId::new(i as u32), graph, incoming, previous);
            *ratio = next;
            *equity = next_equity;
            (next - previous[i]).abs()
        };

        let scratch = &mut state.scratch;
        let equity = &mut state.equity;
        let max_change = if parallel {
            self.executor.install(|| {
                scratch
                    .par_iter_mut()
                    .zip(equity.par_iter_mut())
                    .enumerate()
                    .map(evaluate)
                    .reduce(|| 0.0, f64::max)
            })
        } else {
            scratch
                .iter_mut()
                .zip(equity.iter_mut())
                .enumerate()
                .map(evaluate)
                .fold(0.0, f64::max)
        };

        std::mem::swap(&mut state.ratios, &mut state.scratch);
        state.round += 1;
        let mut newly_defaulted = state
            .book
            .record_round(state.round, &state.ratios, self.config.epsilon);
        state.last_change = max_change;

        let tolerance = self.config.ratio_tolerance;
        let drift = if std::mem::take(&mut state.settled) {
            tolerance.max(SETTLED_DRIFT)
        } else {
            tolerance
        };
        state.converged = newly_defaulted == 0 && max_change <= drift;

        if !state.converged && max_change > tolerance {
            let report = settle_defaulting_set(
                state.graph,
                &state.incoming,
                &state.book,
                &mut state.ratios,
                tolerance,
                self.config.max_rounds,
            );
            debug!(
                "round {}: settled {} components ({} swept), largest cut {:e}",
                state.round, report.components, report.swept, report.max_change
            );
            // Settling can push nodes short; they default in this round.
            newly_defaulted += state
                .book
                .record_round(state.round, &state.ratios, self.config.epsilon);
            state.settled = true;
        }

        RoundSummary {
            round: state.round,
            newly_defaulted,
            defaulted: state.book.defaulted_count(),
            max_ratio_change: max_change,
            converged: state.converged,
            settled: state.settled,
        }
    }

    /// Iterate a snapshot to its clearing payment vector.
    pub fn solve(
        &self,
        graph: &LiabilityGraph,
        floor: Option<&DefaultFloor>,
    ) -> Result<ClearingSolution, ClearingError> {
        let mut state = self.prepare(graph, floor)?;
        info!(
            "clearing {} nodes / {} edges ({} carried in default, policy {})",
            graph.node_count(),
            graph.edge_count(),
            state.book.carried_count(),
            self.config.carry_policy
        );

        let mut round_summaries = Vec::new();
        loop {
            let summary = self.step(&mut state);
            debug!(
                "round {}: +{} defaulted ({} total), max ratio change {:e}",
                summary.round, summary.newly_defaulted, summary.defaulted, summary.max_ratio_change
            );
            round_summaries.push(summary);
            if summary.converged {
                break;
            }
            if state.round >= self.config.max_rounds {
                warn!(
                    "no fixed point after {} rounds, {} nodes in default",
                    state.round,
                    state.book.defaulted_count()
                );
                return Err(ClearingError::NonConvergence {
                    rounds: state.round,
                    defaulted: state.book.defaulted_count(),
                    max_delta: state.last_change,
                });
            }
        }

        let prior = match self.config.carry_policy {
            CarryPolicy::Reevaluate => None,
            _ => floor,
        };
        let next_floor = state.book.next_floor(&state.ratios, prior);
        info!(
            "converged after {} rounds: {} of {} nodes in default",
            state.round,
            state.book.defaulted_count(),
            graph.node_count()
        );

        Ok(ClearingSolution {
            ratios: state.ratios,
            book: state.book,
            incoming: state.incoming,
            rounds: state.round,
            round_summaries,
            next_floor,
        })
    }

    /// Solve a request and project the result into a response.
    pub fn clear(&self, request: &ClearingRequest) -> Result<ClearingResponse, ClearingError> {
        let solution = self.solve(&request.graph, request.floor.as_ref())?;
        Ok(ResultProjector::project(
            &request.graph,
            solution,
            request.request_id,
            request.macro_iteration,
        ))
    }
}

/// New ratio and equity of `node` given the previous round's ratios.
fn evaluate_node(
    node: NodeId,
    graph: &LiabilityGraph,
    incoming: &IncomingIndex,
    previous: &[f64],
) -> (f64, f64) {
    let obligation = graph.nominal_obligation(node);
    let resources = graph.own_resources(node) + incoming.inflow(node, previous);
    let equity = resources - obligation;
    if graph.is_sink(node) || obligation == 0.0 {
        return (1.0, equity);
    }
    let ratio = clamped_ratio(resources, obligation).min(previous[node.index()]);
    (ratio, equity)
}
