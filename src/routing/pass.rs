//! One routing cycle: a fresh tiling of the design, then every edge of one
//! ordering routed against it.

use hashbrown::{HashMap, HashSet};

use crate::config::{RouterConfig, RoutingMode, Widths};
use crate::error::RouterError;
use crate::geometry::real_to_tile;
use crate::host::{Board, ConnectorId, ConnectorInfo, Layer, Progress, RouterHost, Signals, TraceId, TraceInfo};
use crate::tile::{Body, TileId, TileType};
use crate::StableState;

use super::builder::{OverlapPolicy, Tiling, TilingOptions};
use super::nearest::placement_in;
use super::search::{Search, Side};
use super::types::{Edge, EdgeResult, OrderingScore};

type ConnectorSet = HashSet<ConnectorId, StableState>;

/// A tile centre on a plane, used to find a tile again after the plane has
/// been cut up by new traces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Anchor {
    pub(crate) plane: usize,
    pub(crate) x: i32,
    pub(crate) y: i32,
}

/// What one cycle produced.
#[derive(Debug)]
pub(crate) struct CycleResult {
    /// Indexed by edge id.
    pub(crate) results: Vec<EdgeResult>,
    pub(crate) score: OrderingScore,
    /// Every edge routed on a single layer without help.
    pub(crate) all_done: bool,
    /// Traces drawn in the cycle and the edge each was drawn for.
    pub(crate) traces: Vec<(TraceInfo, usize)>,
}

pub(crate) struct RoutePass<'a, H: RouterHost> {
    pub(crate) host: &'a mut H,
    pub(crate) config: &'a RouterConfig,
    pub(crate) signals: &'a Signals,
    pub(crate) tiling: Tiling,
    pub(crate) drawn: Vec<(TraceInfo, usize)>,
    /// Pieces a tapped trace has been split into, keyed by the id its tiles
    /// still carry.
    pub(crate) pieces: HashMap<TraceId, Vec<TraceId>, StableState>,
    pub(crate) can_cross: bool,
}

impl<'a, H: RouterHost> RoutePass<'a, H> {
    pub(crate) fn new(
        host: &'a mut H,
        config: &'a RouterConfig,
        signals: &'a Signals,
        board: Option<&Board>,
        layers: &[Layer],
        widths: Widths,
    ) -> Result<Self, RouterError> {
        let options = TilingOptions {
            connectors: OverlapPolicy::Clip,
            wires: OverlapPolicy::Clip,
            eliminate_thin: true,
            combine_planes: config.mode == RoutingMode::Pcb,
        };
        let tiling = Tiling::build(&*host, config.mode, layers, board, widths, config.keepout, options)?;
        // Clip records nothing today; a policy that reports overlaps must still refuse to route.
        if !tiling.overlaps.is_empty() {
            return Err(RouterError::Overlapping);
        }
        let can_cross = config.both_layers && config.mode == RoutingMode::Pcb && tiling.planes.len() == 2;
        tracing::debug!(
            planes = tiling.planes.len(),
            off_board = tiling.off_board.len(),
            can_cross,
            "tiled design"
        );
        Ok(RoutePass {
            host,
            config,
            signals,
            tiling,
            drawn: Vec::new(),
            pieces: HashMap::default(),
            can_cross,
        })
    }

    /// Size of a via footprint, keepout included, in tile units.
    pub(crate) fn via_tiles(&self) -> i32 {
        real_to_tile(self.config.via_extent())
    }

    /// Routes the edges in `order`. Gives up early once the running tally
    /// can no longer beat `best`.
    pub(crate) fn run_edges(
        &mut self,
        edges: &[Edge],
        order: &[usize],
        best: Option<OrderingScore>,
        cycle: usize,
    ) -> Result<CycleResult, RouterError> {
        let mut results = vec![EdgeResult::default(); edges.len()];
        let mut score = OrderingScore::default();
        let mut clean = 0;

        for (done, &ix) in order.iter().enumerate() {
            let Some(edge) = edges.get(ix) else {
                continue;
            };
            let _span = tracing::debug_span!("edge", id = edge.id).entered();
            let result = self.route_edge(edge)?;
            if !result.routed {
                score.unrouted += 1;
            } else if result.with_jumper {
                score.jumpers += 1;
            } else if result.vias > 0 {
                score.vias += 1;
                score.total_vias += result.vias;
            } else {
                clean += 1;
            }
            results[ix] = result;

            self.host.progress(&Progress {
                cycle,
                max_cycles: self.config.max_cycles,
                edges_done: done + 1,
                edges_total: order.len(),
                message: format!("Routing cycle {}: {} of {} connections", cycle + 1, done + 1, order.len()),
            });
            self.host.process_events();

            if best.map_or(false, |b| score >= b) {
                tracing::debug!(?score, "ordering cannot beat the best so far");
                break;
            }
            if self.signals.is_cancelled() || self.signals.is_stopped() {
                break;
            }
            self.signals.clear_skip_trace();
        }

        Ok(CycleResult {
            results,
            score,
            all_done: clean == edges.len(),
            traces: std::mem::take(&mut self.drawn),
        })
    }

    fn route_edge(&mut self, edge: &Edge) -> Result<EdgeResult, RouterError> {
        let from: ConnectorSet = self.host.equal_potential(edge.from).into_iter().collect();
        if from.contains(&edge.to) {
            tracing::debug!("already connected");
            return Ok(EdgeResult {
                routed: true,
                ..Default::default()
            });
        }
        let to: ConnectorSet = self.host.equal_potential(edge.to).into_iter().collect();

        let mut search = Search::new(self.via_tiles());
        for (plane, tile, side) in self.mark_terminals(&from, &to) {
            search.add_terminal(&self.tiling, plane, tile, side);
        }
        let found = search.propagate(&self.tiling, &mut *self.host, self.signals, self.can_cross);

        let mut result = EdgeResult::default();
        match found {
            Some(complete) => {
                result.routed = true;
                result.vias = self.trace_path(&search, &complete, edge.id)?;
                self.clear_marks();
            }
            None => {
                self.clear_marks();
                let mode_allows = self.config.allow_jumpers && self.config.mode == RoutingMode::Pcb;
                if mode_allows && !self.signals.interrupted() && self.route_with_jumper(&search, edge.id)? {
                    result.routed = true;
                    result.with_jumper = true;
                }
            }
        }
        tracing::debug!(routed = result.routed, jumper = result.with_jumper, vias = result.vias, "edge done");
        Ok(result)
    }

    /// Marks every tile at the potential of either end as a source or
    /// destination terminal. Wires qualify only when long and wide enough to
    /// be tapped.
    fn mark_terminals(&mut self, from: &ConnectorSet, to: &ConnectorSet) -> Vec<(usize, TileId, Side)> {
        let side_of = |c: ConnectorId| {
            if from.contains(&c) {
                Some(Side::Source)
            } else if to.contains(&c) {
                Some(Side::Destination)
            } else {
                None
            }
        };
        let area = self.tiling.tile_max_rect;
        let width = self.tiling.widths.tile;

        let mut marked = Vec::new();
        for ix in 0..self.tiling.planes.len() {
            let plane = &self.tiling.planes[ix].1;
            let found: Vec<(TileId, Side)> = plane
                .tiles_in(&area)
                .into_iter()
                .filter_map(|t| {
                    let side = match plane.body(t) {
                        Body::Connector(c) => side_of(c),
                        Body::Wire(id) => {
                            let r = plane.rect(t);
                            let (short, long) = (r.width().min(r.height()), r.width().max(r.height()));
                            if short < width || long < 3 * width {
                                None
                            } else {
                                self.tiling.scene.traces.get(&id).and_then(|trace| side_of(trace.ends[0]))
                            }
                        }
                        _ => None,
                    }?;
                    Some((t, side))
                })
                .collect();

            let plane = &mut self.tiling.planes[ix].1;
            for (t, side) in found {
                plane.set_tile_type(t, side.tile_type());
                marked.push((ix, t, side));
            }
        }
        marked
    }

    /// Turns every terminal mark back into an obstacle.
    pub(crate) fn clear_marks(&mut self) {
        let area = self.tiling.tile_max_rect;
        let schematic = self.tiling.mode == RoutingMode::Schematic;
        for (_, plane) in &mut self.tiling.planes {
            let marked: Vec<(TileId, Body)> = plane
                .tiles_in(&area)
                .into_iter()
                .filter(|t| matches!(plane.tile_type(*t), TileType::Source | TileType::Destination))
                .map(|t| (t, plane.body(t)))
                .collect();
            for (t, body) in marked {
                let kind = match body {
                    Body::Wire(_) if schematic => TileType::SchematicWireSpace,
                    _ => TileType::Obstacle,
                };
                plane.set_tile_type(t, kind);
            }
        }
    }

    /// Routes between two tiles found by their centres, same layer only.
    pub(crate) fn route_between(&mut self, from: Anchor, to: Anchor, edge: usize) -> Result<bool, RouterError> {
        let mut search = Search::new(self.via_tiles());
        let mut seeded = true;
        for (anchor, side) in [(from, Side::Source), (to, Side::Destination)] {
            let plane = &mut self.tiling.planes[anchor.plane].1;
            let tile = plane.point_search(anchor.x, anchor.y);
            plane.set_tile_type(tile, side.tile_type());
            seeded &= search.add_terminal(&self.tiling, anchor.plane, tile, side).is_some();
        }

        let found = if seeded {
            search.propagate(&self.tiling, &mut *self.host, self.signals, false)
        } else {
            None
        };
        let routed = match found {
            Some(complete) => {
                self.trace_path(&search, &complete, edge)?;
                true
            }
            None => false,
        };
        self.clear_marks();
        Ok(routed)
    }

    /// Places a jumper between free spots next to the two frontiers of a
    /// failed search and routes both of its legs. Everything is undone when
    /// either leg fails.
    fn route_with_jumper(&mut self, search: &Search, edge: usize) -> Result<bool, RouterError> {
        let size = self.config.jumper_size;
        let w = real_to_tile(size.width + 2.0 * self.config.keepout);
        let h = real_to_tile(size.height + 2.0 * self.config.keepout);
        let (Some(n1), Some(n2)) = (
            search.find_nearest_space(&self.tiling, Side::Source, w, h),
            search.find_nearest_space(&self.tiling, Side::Destination, w, h),
        ) else {
            tracing::debug!(edge, "no room for a jumper");
            return Ok(false);
        };
        let (u1, u2) = (search.unit(n1.unit), search.unit(n2.unit));
        if u1.plane != u2.plane {
            tracing::debug!(edge, "jumper ends would be on different layers");
            return Ok(false);
        }
        let layer = self.tiling.planes[u1.plane].0;

        let roots = [search.root(n1.unit), search.root(n2.unit)].map(|r| {
            let unit = search.unit(r);
            let (x, y) = self.tiling.planes[unit.plane].1.rect(unit.tile).center();
            Anchor { plane: unit.plane, x, y }
        });
        let p1 = placement_in(&u1.min_cost_rect, &n1.rect, w, h);
        let p2 = placement_in(&u2.min_cost_rect, &n2.rect, w, h);

        let checkpoint = self.host.checkpoint();
        let saved_tiling = self.tiling.clone();
        let saved_pieces = self.pieces.clone();
        let drawn = self.drawn.len();

        let jumper = self.host.place_jumper(layer, p1, p2, size);
        tracing::debug!(edge, part = jumper.part.0, "placed jumper");
        let mut ok = true;
        for (end, root) in jumper.ends.iter().zip(roots) {
            if !self.route_leg(end, root, edge)? {
                ok = false;
                break;
            }
        }

        if !ok {
            tracing::debug!(edge, "jumper legs did not route, removing it");
            self.host.rollback(&checkpoint);
            self.tiling = saved_tiling;
            self.pieces = saved_pieces;
            self.drawn.truncate(drawn);
        }
        Ok(ok)
    }

    fn route_leg(&mut self, end: &ConnectorInfo, root: Anchor, edge: usize) -> Result<bool, RouterError> {
        let Some(plane) = self.tiling.plane_index(end.layer) else {
            return Ok(false);
        };
        let rect = end.rect.adjusted(self.config.keepout).to_tile();
        self.tiling.insert_tile(
            &*self.host,
            end.layer,
            rect,
            Body::Connector(end.id),
            TileType::Destination,
            OverlapPolicy::Ignore,
        );
        self.tiling.add_connector(end.clone());
        let (x, y) = rect.center();
        self.route_between(root, Anchor { plane, x, y }, edge)
    }
}
