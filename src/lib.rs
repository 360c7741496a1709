//! # cascade-clearing
//!
//! Clearing payment vector engine for cascading default across an
//! economy-wide network of banks, businesses, households, government and
//! foreign entities.
//!
//! Given one macro iteration's liability snapshot, the engine computes the
//! greatest mutually consistent set of (possibly partial) payments, each
//! node's equity, and the round in which each defaulting node first fell
//! short.
//!
//! ## Architecture
//!
//! - **core**: Node identifiers, numeric helpers, configuration, errors
//! - **graph**: Flat liability graph, its builder, and the incoming-edge index
//! - **clearing**: Fictitious-default engine, default bookkeeping, result projection
//! - **simulation**: Random networks, agent population, multi-iteration runs

pub mod clearing;
pub mod core;
pub mod graph;
pub mod simulation;

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::clearing::bookkeeping::{DefaultFloor, DefaultStatus};
    pub use crate::clearing::engine::{ClearingEngine, ClearingSolution, RoundSummary};
    pub use crate::clearing::projector::{ClearingParticipant, ClearingResponse, NodeOutcome};
    pub use crate::clearing::request::ClearingRequest;
    pub use crate::core::config::{CarryPolicy, ClearingConfig};
    pub use crate::core::error::{ClearingError, InputViolation};
    pub use crate::core::node::NodeId;
    pub use crate::graph::builder::LiabilityGraphBuilder;
    pub use crate::graph::liability_graph::LiabilityGraph;
}
