//! Gridless two-layer autorouter and design rule checker built on
//! corner-stitched tile planes.
//!
//! The router never owns the design it works on. Everything it reads and
//! writes goes through a [`RouterHost`]; [`MemoryScene`] is a self-contained
//! host for tests and batch use.

pub mod config;
pub mod error;
pub mod geometry;
pub mod host;
pub mod lib_tracing;
pub mod routing;
pub mod scene;
pub mod tile;

pub use config::{RouterConfig, RoutingMode, ViaSize};
pub use error::RouterError;
pub use host::{RouterHost, Signals};
pub use lib_tracing::{LibTracer, TracerOptions};
pub use routing::{drc, DrcReport, EdgeRouter, Overlap, OrderingScore, RoutingOutcome, RoutingReport};
pub use scene::MemoryScene;

/// Hasher with fixed keys, so that hash-based containers iterate the same way
/// on every run.
pub(crate) type StableState = std::hash::BuildHasherDefault<std::collections::hash_map::DefaultHasher>;
