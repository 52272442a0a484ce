//! Bidirectional best-first search over tile adjacency.
//!
//! Two frontiers grow from the tiles of an edge's two terminal sets, one
//! expansion at a time from each side. Every [`PathUnit`] remembers the
//! narrowest channel a standard width trace could use through its tile
//! (the min-cost rectangle); costs are Manhattan gaps between successive
//! min-cost rectangles, so the heuristic never overestimates.

use std::cmp::Reverse;

use hashbrown::HashMap;
use priority_queue::PriorityQueue;

use crate::geometry::{manhattan_gap, real_to_tile, TileRect, WireDirection};
use crate::host::{ConnectorId, RouterHost, Signals, TraceId};
use crate::tile::{Body, Plane, TileId, TileType, NIL};
use crate::StableState;

use super::builder::Tiling;

pub(crate) type UnitId = usize;

/// The frontier a unit belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Side {
    Source,
    Destination,
}

impl Side {
    pub(crate) fn index(self) -> usize {
        match self {
            Side::Source => 0,
            Side::Destination => 1,
        }
    }

    pub(crate) fn other(self) -> Side {
        match self {
            Side::Source => Side::Destination,
            Side::Destination => Side::Source,
        }
    }

    pub(crate) fn tile_type(self) -> TileType {
        match self {
            Side::Source => TileType::Source,
            Side::Destination => TileType::Destination,
        }
    }
}

/// What a root unit stands on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Terminal {
    None,
    Connector(ConnectorId),
    Wire(TraceId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Direction {
    Left,
    Right,
    Up,
    Down,
}

impl Direction {
    fn is_horizontal(self) -> bool {
        matches!(self, Direction::Left | Direction::Right)
    }
}

#[derive(Clone, Debug)]
pub(crate) struct PathUnit {
    pub(crate) tile: TileId,
    pub(crate) plane: usize,
    pub(crate) parent: Option<UnitId>,
    pub(crate) source_cost: i64,
    pub(crate) dest_cost: i64,
    pub(crate) min_cost_rect: TileRect,
    pub(crate) side: Side,
    pub(crate) terminal: Terminal,
    /// Stands for a via to the other layer at this unit's position.
    pub(crate) cross_layer: bool,
    /// Listed in the tile index, where the other frontier can meet it.
    pub(crate) indexed: bool,
}

/// The cheapest meeting of the two frontiers found so far.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct CompletePath {
    pub(crate) cost: i64,
    /// The unit whose expansion found the meeting.
    pub(crate) source: UnitId,
    /// The unit of the other frontier it met.
    pub(crate) dest: UnitId,
    pub(crate) good_enough: bool,
}

/// All units of one edge's search. Dropped as a whole when the edge is done.
pub(crate) struct Search {
    pub(crate) units: Vec<PathUnit>,
    pub(crate) tile_units: HashMap<(usize, TileId), Vec<UnitId>, StableState>,
    queues: [PriorityQueue<UnitId, Reverse<(i64, u64)>, StableState>; 2],
    terminals: [Vec<UnitId>; 2],
    /// Free space found for the via of each cross-layer unit.
    pub(crate) nearest_spaces: HashMap<UnitId, TileRect, StableState>,
    inserted: u64,
    /// Side of the square a via needs, in tile units.
    via_size: i32,
}

impl Search {
    pub(crate) fn new(via_size: i32) -> Search {
        Search {
            units: Vec::new(),
            tile_units: HashMap::default(),
            queues: [PriorityQueue::with_default_hasher(), PriorityQueue::with_default_hasher()],
            terminals: [Vec::new(), Vec::new()],
            nearest_spaces: HashMap::default(),
            inserted: 0,
            via_size,
        }
    }

    pub(crate) fn unit(&self, id: UnitId) -> &PathUnit {
        &self.units[id]
    }

    /// Units of `side` in creation order, skipping those no longer indexed.
    pub(crate) fn indexed_units(&self, side: Side) -> impl Iterator<Item = UnitId> + '_ {
        self.units
            .iter()
            .enumerate()
            .filter(move |(_, u)| u.indexed && u.side == side)
            .map(|(id, _)| id)
    }

    pub(crate) fn root(&self, mut id: UnitId) -> UnitId {
        while let Some(parent) = self.units[id].parent {
            id = parent;
        }
        id
    }

    fn push(&mut self, mut unit: PathUnit, index: bool) -> UnitId {
        let id = self.units.len();
        let priority = unit.source_cost + unit.dest_cost;
        let side = unit.side;
        unit.indexed = index;
        if index {
            self.tile_units.entry((unit.plane, unit.tile)).or_default().push(id);
        }
        self.units.push(unit);
        self.inserted += 1;
        self.queues[side.index()].push(id, Reverse((priority, self.inserted)));
        id
    }

    fn remove(&mut self, id: UnitId) {
        let key = (self.units[id].plane, self.units[id].tile);
        if let Some(list) = self.tile_units.get_mut(&key) {
            list.retain(|u| *u != id);
        }
        self.units[id].indexed = false;
        self.queues[self.units[id].side.index()].remove(&id);
    }

    /// Seeds a frontier with a terminal tile. Returns `None` for tiles that
    /// belong to neither a connector nor a wire.
    pub(crate) fn add_terminal(&mut self, tiling: &Tiling, plane: usize, tile: TileId, side: Side) -> Option<UnitId> {
        let p = &tiling.planes[plane].1;
        let rect = p.rect(tile);
        let half = tiling.widths.half_real;
        let (terminal, min_cost_rect) = match p.body(tile) {
            Body::Connector(id) => {
                let at = tiling.scene.connectors.get(&id)?.terminal;
                (
                    Terminal::Connector(id),
                    TileRect::from_reals(at.x - half, at.y - half, at.x + half, at.y + half),
                )
            }
            Body::Wire(id) => {
                let trace = tiling.scene.traces.get(&id)?;
                let mcr = match tiling.wire_directions.get(&id) {
                    Some(WireDirection::Vertical) => TileRect::new(
                        real_to_tile(trace.p1.x.min(trace.p2.x) - half),
                        rect.ymin,
                        real_to_tile(trace.p1.x.max(trace.p2.x) + half),
                        rect.ymax,
                    ),
                    Some(WireDirection::Horizontal) => TileRect::new(
                        rect.xmin,
                        real_to_tile(trace.p1.y.min(trace.p2.y) - half),
                        rect.xmax,
                        real_to_tile(trace.p1.y.max(trace.p2.y) + half),
                    ),
                    _ => rect,
                };
                (Terminal::Wire(id), mcr)
            }
            _ => return None,
        };

        let id = self.push(
            PathUnit {
                tile,
                plane,
                parent: None,
                source_cost: 0,
                dest_cost: 0,
                min_cost_rect,
                side,
                terminal,
                cross_layer: false,
                indexed: true,
            },
            true,
        );
        self.terminals[side.index()].push(id);
        Some(id)
    }

    /// Estimates every root's distance to the other terminal set.
    fn seed_dest_costs(&mut self) {
        for side in [Side::Source, Side::Destination] {
            let roots = self.terminals[side.index()].clone();
            for id in roots {
                let dest_cost = self.dest_cost(side, &self.units[id].min_cost_rect);
                self.units[id].dest_cost = dest_cost;
                self.inserted += 1;
                self.queues[side.index()].push(id, Reverse((dest_cost, self.inserted)));
            }
        }
    }

    fn dest_cost(&self, side: Side, rect: &TileRect) -> i64 {
        self.terminals[side.other().index()]
            .iter()
            .map(|t| manhattan_gap(&self.units[*t].min_cost_rect, rect))
            .min()
            .unwrap_or(0)
    }

    /// Runs the search until the frontiers meet well enough, one of them
    /// runs dry, or the host interrupts.
    pub(crate) fn propagate<H: RouterHost>(
        &mut self,
        tiling: &Tiling,
        host: &mut H,
        signals: &Signals,
        can_cross: bool,
    ) -> Option<CompletePath> {
        if self.queues[0].is_empty() || self.queues[1].is_empty() {
            return None;
        }
        self.seed_dest_costs();

        let mut complete: Option<CompletePath> = None;
        while !self.queues[0].is_empty() && !self.queues[1].is_empty() {
            host.process_events();
            if signals.interrupted() {
                tracing::debug!(units = self.units.len(), "search interrupted");
                return None;
            }
            let (Some((u1, _)), Some((u2, _))) = (self.queues[0].pop(), self.queues[1].pop()) else {
                break;
            };
            if let Some(c) = &complete {
                if c.cost < self.units[u1].source_cost + self.units[u2].source_cost {
                    break;
                }
            }

            if self.expand(tiling, u1, can_cross, &mut complete) && complete.map_or(false, |c| c.good_enough) {
                break;
            }
            if self.expand(tiling, u2, can_cross, &mut complete) && complete.map_or(false, |c| c.good_enough) {
                break;
            }

        }
        tracing::trace!(units = self.units.len(), found = complete.is_some(), "search finished");
        complete
    }

    /// Expands one unit. True when it improved the complete path.
    fn expand(&mut self, tiling: &Tiling, id: UnitId, can_cross: bool, complete: &mut Option<CompletePath>) -> bool {
        if self.units[id].cross_layer {
            self.cross_layer_dest(tiling, id);
            return false;
        }

        let plane_ix = self.units[id].plane;
        let plane = &tiling.planes[plane_ix].1;
        let side = self.units[id].side;
        let mut improved = false;

        for next in self.seed_next(tiling, plane, id) {
            let unit = &self.units[id];
            let mcr = min_cost_rect(&unit.min_cost_rect, &plane.rect(next), tiling.widths.tile);
            let source_cost = unit.source_cost + manhattan_gap(&unit.min_cost_rect, &mcr);
            let key = (plane_ix, next);

            let mut dominated = Vec::new();
            let mut redundant = false;
            let here: &[UnitId] = self.tile_units.get(&key).map_or(&[], |v| v.as_slice());
            for &other in here {
                let o = &self.units[other];
                if o.side != side || !is_redundant(&o.min_cost_rect, o.source_cost, &mcr, source_cost) {
                    continue;
                }
                if source_cost >= o.source_cost {
                    redundant = true;
                    break;
                }
                dominated.push(other);
            }
            if redundant {
                continue;
            }
            let goals: Vec<UnitId> = here.iter().copied().filter(|u| self.units[*u].side != side).collect();
            for other in dominated {
                self.remove(other);
            }

            let dest_cost = self.dest_cost(side, &mcr);
            let child = self.push(
                PathUnit {
                    tile: next,
                    plane: plane_ix,
                    parent: Some(id),
                    source_cost,
                    dest_cost,
                    min_cost_rect: mcr,
                    side,
                    terminal: Terminal::None,
                    cross_layer: false,
                    indexed: true,
                },
                true,
            );

            let best = goals
                .iter()
                .map(|g| {
                    let goal = &self.units[*g];
                    (manhattan_gap(&goal.min_cost_rect, &mcr) + goal.source_cost + source_cost, *g)
                })
                .min_by_key(|(cost, _)| *cost);
            if let Some((cost, goal)) = best {
                if complete.map_or(true, |c| c.cost > cost) {
                    let good_enough = self.good_enough(child, goal, cost);
                    *complete = Some(CompletePath {
                        cost,
                        source: child,
                        dest: goal,
                        good_enough,
                    });
                    improved = true;
                    if good_enough {
                        break;
                    }
                }
            }
        }

        if can_cross {
            self.cross_layer_source(tiling, id);
        }
        improved
    }

    /// Within 5% of the straight Manhattan distance between the two roots.
    fn good_enough(&self, source: UnitId, dest: UnitId, cost: i64) -> bool {
        let a = &self.units[self.root(source)].min_cost_rect;
        let b = &self.units[self.root(dest)].min_cost_rect;
        (cost as f64) < manhattan_gap(a, b) as f64 * 1.05
    }

    /// Neighbouring tiles a standard width trace can move into from `id`.
    fn seed_next(&self, tiling: &Tiling, plane: &Plane, id: UnitId) -> Vec<TileId> {
        let unit = &self.units[id];
        let tile = plane.rect(unit.tile);
        let max = &tiling.tile_max_rect;
        let w = tiling.widths.tile;
        let mut tiles = Vec::new();

        if tile.xmax < max.xmax && tile.height() >= w {
            let mut next = plane.tr(unit.tile);
            while next != NIL {
                self.append_if(tiling, plane, id, next, Direction::Right, &mut tiles);
                next = plane.lb(next);
                if next == NIL || plane.rect(next).ymax <= tile.ymin {
                    break;
                }
            }
        }

        if tile.xmin > max.xmin && tile.height() >= w {
            let mut next = plane.bl(unit.tile);
            while next != NIL {
                self.append_if(tiling, plane, id, next, Direction::Left, &mut tiles);
                next = plane.rt(next);
                if next == NIL || plane.rect(next).ymin >= tile.ymax {
                    break;
                }
            }
        }

        if tile.ymax < max.ymax && tile.width() >= w {
            let mut next = plane.rt(unit.tile);
            while next != NIL {
                self.append_if(tiling, plane, id, next, Direction::Down, &mut tiles);
                next = plane.bl(next);
                if next == NIL || plane.rect(next).xmax <= tile.xmin {
                    break;
                }
            }
        }

        if tile.ymin > max.ymin && tile.width() >= w {
            let mut next = plane.lb(unit.tile);
            while next != NIL {
                self.append_if(tiling, plane, id, next, Direction::Up, &mut tiles);
                next = plane.tr(next);
                if next == NIL || plane.rect(next).xmin >= tile.xmax {
                    break;
                }
            }
        }
        tiles
    }

    fn append_if(
        &self,
        tiling: &Tiling,
        plane: &Plane,
        id: UnitId,
        next: TileId,
        direction: Direction,
        tiles: &mut Vec<TileId>,
    ) {
        let unit = &self.units[id];
        if unit.parent.map_or(false, |p| self.units[p].tile == next) {
            return;
        }
        let horizontal = direction.is_horizontal();
        let here = plane.tile_type(unit.tile);
        let w = tiling.widths.tile;

        let bail = match plane.tile_type(next) {
            TileType::Obstacle => true,
            // Other nets' schematic wires can be crossed but not followed.
            TileType::SchematicWireSpace => runs_along(tiling, plane.body(next), horizontal),
            TileType::Source => here != TileType::Destination,
            TileType::Destination => here != TileType::Source,
            TileType::Space | TileType::Space2 => false,
            _ => return,
        };
        if bail {
            return;
        }

        let next_rect = plane.rect(next);
        let tile = plane.rect(unit.tile);
        let bail = match here {
            TileType::SchematicWireSpace => {
                runs_along(tiling, plane.body(unit.tile), horizontal)
                    || self.block_direction(plane, id, direction, &next_rect, w)
            }
            TileType::Space | TileType::Space2 if tile.width() < w || tile.height() < w => {
                self.block_direction(plane, id, direction, &next_rect, w)
            }
            _ => false,
        };
        if bail || !self.room_to_next(plane, id, horizontal, &next_rect, w) {
            return;
        }
        tiles.push(next);
    }

    /// The check `append_if` makes of the unit's own tile, for a candidate
    /// rectangle rather than a neighbouring tile.
    pub(crate) fn append_if_rect(
        &self,
        plane: &Plane,
        id: UnitId,
        next_rect: &TileRect,
        direction: Direction,
        width: i32,
    ) -> bool {
        let unit = &self.units[id];
        let tile = plane.rect(unit.tile);
        if plane.tile_type(unit.tile).is_space()
            && (tile.width() < width || tile.height() < width)
            && self.block_direction(plane, id, direction, next_rect, width)
        {
            return false;
        }
        self.room_to_next(plane, id, direction.is_horizontal(), next_rect, width)
    }

    fn room_to_next(&self, plane: &Plane, id: UnitId, horizontal: bool, next: &TileRect, width: i32) -> bool {
        let unit = &self.units[id];
        // Connector roots only offer their terminal; everything else its tile.
        let from = if unit.parent.is_some() || !matches!(unit.terminal, Terminal::Connector(_)) {
            plane.rect(unit.tile)
        } else {
            unit.min_cost_rect
        };
        if horizontal {
            from.ymax.min(next.ymax) - from.ymin.max(next.ymin) >= width
        } else {
            from.xmax.min(next.xmax) - from.xmin.max(next.xmin) >= width
        }
    }

    /// A tile too small for a trace may only be crossed straight through, and
    /// only where the tile it was entered from lines up with `next`.
    fn block_direction(&self, plane: &Plane, id: UnitId, direction: Direction, next: &TileRect, width: i32) -> bool {
        let unit = &self.units[id];
        let Some(parent) = unit.parent else {
            return false;
        };
        let p = plane.rect(self.units[parent].tile);
        let t = plane.rect(unit.tile);
        let y_overlap = next.ymax.min(p.ymax) - next.ymin.max(p.ymin);
        let x_overlap = next.xmax.min(p.xmax) - next.xmin.max(p.xmin);
        if p.xmin == t.xmax {
            direction != Direction::Left || y_overlap < width
        } else if p.xmax == t.xmin {
            direction != Direction::Right || y_overlap < width
        } else if p.ymin == t.ymax {
            direction != Direction::Up || x_overlap < width
        } else if p.ymax == t.ymin {
            direction != Direction::Down || x_overlap < width
        } else {
            false
        }
    }

    /// Offers a via at `id`'s position. Only from open space reached within
    /// the layer, and never straight after another via.
    fn cross_layer_source(&mut self, tiling: &Tiling, id: UnitId) {
        let unit = &self.units[id];
        let plane = &tiling.planes[unit.plane].1;
        if !plane.tile_type(unit.tile).is_space() || unit.cross_layer {
            return;
        }
        let Some(parent) = unit.parent else {
            return;
        };
        if self.units[parent].cross_layer {
            return;
        }

        let max = &tiling.tile_max_rect;
        let penalty = (max.width() as i64 + max.height() as i64) / 2;
        let child = PathUnit {
            parent: Some(id),
            source_cost: unit.source_cost + penalty,
            cross_layer: true,
            terminal: Terminal::None,
            ..unit.clone()
        };
        self.push(child, false);
    }

    /// Lands a via unit on the other layer, if there is room for the via.
    fn cross_layer_dest(&mut self, tiling: &Tiling, id: UnitId) {
        let mut best = None;
        if !self.nearest_space_one(tiling, id, self.via_size, self.via_size, &mut best) {
            return;
        }
        let Some(found) = best else {
            return;
        };
        let unit = &self.units[id];
        let Some(other) = (0..tiling.planes.len()).find(|p| *p != unit.plane) else {
            return;
        };
        let Some(tile) = tiling.planes[other].1.find_in(&found.rect, TileType::is_space) else {
            return;
        };
        let child = PathUnit {
            tile,
            plane: other,
            parent: Some(id),
            cross_layer: false,
            terminal: Terminal::None,
            ..unit.clone()
        };
        self.nearest_spaces.insert(id, found.rect);
        self.push(child, true);
    }

    /// The path from the root of the frontier that found the meeting to the
    /// root of the other frontier.
    pub(crate) fn complete_path(&self, complete: &CompletePath) -> Vec<UnitId> {
        let mut path = Vec::new();
        let mut at = Some(complete.source);
        while let Some(id) = at {
            path.push(id);
            at = self.units[id].parent;
        }
        path.reverse();
        // The meeting tile is listed again by the other side.
        path.pop();
        let mut at = Some(complete.dest);
        while let Some(id) = at {
            path.push(id);
            at = self.units[id].parent;
        }
        path
    }
}

fn runs_along(tiling: &Tiling, body: Body, horizontal: bool) -> bool {
    let Body::Wire(trace) = body else {
        return false;
    };
    match tiling.wire_directions.get(&trace) {
        Some(WireDirection::Horizontal) => horizontal,
        Some(WireDirection::Vertical) => !horizontal,
        _ => false,
    }
}

/// The part of `next` a standard width trace coming from `from` would use:
/// the near edge when approaching from outside, the overlap otherwise.
pub(crate) fn min_cost_rect(from: &TileRect, next: &TileRect, width: i32) -> TileRect {
    let (xmin, xmax) = min_cost_range(from.xmin, from.xmax, next.xmin, next.xmax, width);
    let (ymin, ymax) = min_cost_range(from.ymin, from.ymax, next.ymin, next.ymax, width);
    TileRect::new(xmin, ymin, xmax, ymax)
}

fn min_cost_range(from_min: i32, from_max: i32, next_min: i32, next_max: i32, width: i32) -> (i32, i32) {
    if from_max <= next_min {
        (next_min, (next_min + width).min(next_max))
    } else if from_min >= next_max {
        ((next_max - width).max(next_min), next_max)
    } else {
        (next_min.max(from_min), next_max.min(from_max))
    }
}

/// Whether two units on one tile make each other pointless. Per axis, each
/// unit's cost grows by one for every unit of distance outside its
/// min-cost range, a cone with its apex below the range; the units are
/// redundant when on both axes one apex lies inside the other's cone.
pub(crate) fn is_redundant(old: &TileRect, old_cost: i64, new: &TileRect, new_cost: i64) -> bool {
    let cone = |min: i32, max: i32, cost: i64| {
        let half = (max - min) as f64 / 2.0;
        (min as f64 + half, cost as f64 - half)
    };
    let nested = |a: (f64, f64), b: (f64, f64)| {
        if a.1 < b.1 {
            (b.0 - a.0).abs() <= b.1 - a.1
        } else if a.1 > b.1 {
            (a.0 - b.0).abs() <= a.1 - b.1
        } else {
            true
        }
    };
    nested(cone(new.xmin, new.xmax, new_cost), cone(old.xmin, old.xmax, old_cost))
        && nested(cone(new.ymin, new.ymax, new_cost), cone(old.ymin, old.ymax, old_cost))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TileRect::new(0, 0, 10, 10), TileRect::new(20, 0, 100, 10), TileRect::new(20, 0, 30, 10))]
    #[case(TileRect::new(200, 0, 210, 10), TileRect::new(20, 0, 100, 10), TileRect::new(90, 0, 100, 10))]
    #[case(TileRect::new(40, 0, 60, 10), TileRect::new(20, -50, 100, 0), TileRect::new(40, -10, 60, 0))]
    #[case(TileRect::new(0, 0, 10, 10), TileRect::new(20, 0, 25, 10), TileRect::new(20, 0, 25, 10))]
    fn min_cost_rect_hugs_the_near_edge(#[case] from: TileRect, #[case] next: TileRect, #[case] expected: TileRect) {
        assert_eq!(min_cost_rect(&from, &next, 10), expected);
    }

    #[test]
    fn a_cheaper_unit_over_the_same_channel_is_redundant() {
        let rect = TileRect::new(0, 0, 100, 100);
        assert!(is_redundant(&rect, 50, &rect, 80));
        assert!(is_redundant(&rect, 80, &rect, 50));
    }

    #[test]
    fn distant_channels_are_not_redundant() {
        let old = TileRect::new(0, 0, 10, 10);
        let new = TileRect::new(500, 0, 510, 10);
        assert!(!is_redundant(&old, 100, &new, 110));
    }

    #[test]
    fn cone_apex_must_be_inside_the_other_cone() {
        // 20 units apart, 30 cost apart: the cheaper cone swallows the other.
        let old = TileRect::new(0, 0, 10, 10);
        let new = TileRect::new(20, 0, 30, 10);
        assert!(is_redundant(&old, 10, &new, 40));
        // 20 units apart, 10 cost apart: neither dominates.
        assert!(!is_redundant(&old, 10, &new, 20));
    }

    #[rstest]
    #[case(Side::Source, Side::Destination, TileType::Source)]
    #[case(Side::Destination, Side::Source, TileType::Destination)]
    fn sides_pair_up(#[case] side: Side, #[case] other: Side, #[case] kind: TileType) {
        assert_eq!(side.other(), other);
        assert_eq!(side.tile_type(), kind);
        assert_ne!(side.index(), other.index());
    }
}
