use thiserror::Error;

use crate::geometry::Point;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RouterError {
    #[error("no board found: add a board before routing")]
    NoBoard,
    #[error("more than one board found: select the board to route")]
    MultipleBoards,
    #[error("No connections to route")]
    NoConnections,
    #[error(
        "tiling failure: possibly due to a wire crossing layers. Wire at ({:.3}, {:.3}) to ({:.3}, {:.3})",
        .p1.x, .p1.y, .p2.x, .p2.y
    )]
    WireCrossesLayers { p1: Point, p2: Point },
    #[error("Cannot autoroute: parts or traces are overlapping")]
    Overlapping,
    #[error("invalid router configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to write {0}")]
    TraceOutput(String),
}
