mod builder;
mod drc;
mod edge_router;
mod nearest;
pub(crate) mod nets;
mod pass;
mod polyline;
mod ripup;
mod search;
mod thin;
mod trace;
mod types;

pub use builder::Overlap;
pub use drc::{drc, DrcReport};
pub use edge_router::EdgeRouter;
pub use nets::minimum_ratsnest;
pub use types::{OrderingScore, RoutingOutcome, RoutingReport};
