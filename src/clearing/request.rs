use crate::clearing::bookkeeping::DefaultFloor;
use crate::graph::liability_graph::LiabilityGraph;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One macro iteration's clearing job, as handed over by the simulation
/// driver.
///
/// Node indices in `graph` are only meaningful together with the response
/// that carries the same `request_id`.
///
/// # Examples
///
/// ```
/// use cascade_clearing::clearing::request::ClearingRequest;
/// use cascade_clearing::core::node::NodeId;
/// use cascade_clearing::graph::builder::LiabilityGraphBuilder;
///
/// let graph = LiabilityGraphBuilder::new(1, NodeId::new(0)).unwrap().build();
/// let request = ClearingRequest::new(12, graph);
///
/// let json = serde_json::to_string(&request).unwrap();
/// let back: ClearingRequest = serde_json::from_str(&json).unwrap();
/// assert_eq!(back.request_id, request.request_id);
/// assert_eq!(back.macro_iteration, 12);
/// assert!(back.floor.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearingRequest {
    pub request_id: Uuid,
    pub macro_iteration: u64,
    pub graph: LiabilityGraph,
    /// Default state carried over from the previous macro iteration.
    #[serde(default)]
    pub floor: Option<DefaultFloor>,
}

impl ClearingRequest {
    pub fn new(macro_iteration: u64, graph: LiabilityGraph) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            macro_iteration,
            graph,
            floor: None,
        }
    }

    /// Use a caller-chosen id (replays, deterministic tests).
    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_floor(mut self, floor: DefaultFloor) -> Self {
        self.floor = Some(floor);
        self
    }
}
