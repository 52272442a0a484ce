use serde::Serialize;

use crate::geometry::Point;
use crate::host::ConnectorId;

/// One connection to route: a ratsnest line between two connectors that are
/// not yet at the same potential.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) struct Edge {
    /// Position in the distance-sorted edge list; stable across cycles.
    pub(crate) id: usize,
    pub(crate) from: ConnectorId,
    pub(crate) to: ConnectorId,
    pub(crate) p1: Point,
    pub(crate) p2: Point,
    /// Squared length of the ratsnest line.
    pub(crate) distance: f64,
}

/// What happened to one edge during one cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub(crate) struct EdgeResult {
    pub(crate) routed: bool,
    pub(crate) with_jumper: bool,
    pub(crate) vias: usize,
}

impl EdgeResult {
    /// Routed on one layer without help.
    pub(crate) fn clean(&self) -> bool {
        self.routed && !self.with_jumper && self.vias == 0
    }
}

/// The tally of one ordering. Lower is better, field by field: any
/// unrouted edge outweighs every jumper, any jumper every via.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct OrderingScore {
    pub unrouted: usize,
    pub jumpers: usize,
    /// Edges that needed at least one via.
    pub vias: usize,
    /// Vias placed in total.
    pub total_vias: usize,
}

impl OrderingScore {
    pub fn score(&self) -> u64 {
        (self.unrouted as u64)
            .saturating_mul(10_000_000)
            .saturating_add((self.jumpers as u64).saturating_mul(10_000))
            .saturating_add((self.vias as u64).saturating_mul(10))
            .saturating_add(self.total_vias as u64)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RoutingOutcome {
    /// Every edge routed on a single layer.
    Completed,
    /// The cycle limit or the supply of new orderings ran out; the best
    /// ordering found is in place.
    BestEffort,
    /// Stopped by the host; the better of the current and the best ordering
    /// is in place.
    Stopped,
    /// Cancelled by the host; the design is as it was before routing.
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RoutingReport {
    pub outcome: RoutingOutcome,
    pub routed: usize,
    pub unrouted: usize,
    pub jumpers: usize,
    pub vias: usize,
    pub cycles: usize,
    pub off_board_parts: usize,
    pub message: String,
}
