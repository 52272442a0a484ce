//! Corner-stitched tile planes.
//!
//! A [`Plane`] partitions a rectangle into non-overlapping tiles. Every tile
//! keeps four stitches to its neighbours (`bl`, `lb`, `tr`, `rt`), which makes
//! point location and neighbour walks proportional to the tile's perimeter
//! rather than to the size of the plane. Tiles live in an arena owned by the
//! plane and are addressed by [`TileId`].

mod plane;
mod search;

pub use plane::{Body, Plane, TileId, TileType};
pub(crate) use plane::NIL;
