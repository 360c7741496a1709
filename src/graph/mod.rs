pub mod builder;
pub mod incoming;
pub mod liability_graph;
pub mod scc;
