//! Turning a found path into traces.
//!
//! Each tile of the path offers a range along x and along y. Entry and exit
//! coordinates are chosen per axis so that the trace keeps going straight
//! for as many tiles as the ranges allow; the resulting staircase is then
//! cleaned up and its doglegs are replaced by single corners wherever the
//! plane has room.

use crate::config::Widths;
use crate::error::RouterError;
use crate::geometry::{project_onto_segment, real_to_tile, tile_to_real, Point, TileRect, CLOSE_ENOUGH};
use crate::host::{ConnectorId, RouterHost, TraceId, TraceInfo, ViaInfo};
use crate::tile::{Body, Plane, TileType};

use super::builder::OverlapPolicy;
use super::nearest::placement_in;
use super::pass::{Anchor, RoutePass};
use super::search::{CompletePath, Search, Terminal, UnitId};

/// The span a path tile offers along one axis, and where the trace enters
/// and leaves it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Segment {
    min: i32,
    max: i32,
    entry: Option<i32>,
    exit: Option<i32>,
}

impl Segment {
    fn new(min: i32, max: i32) -> Segment {
        Segment {
            min,
            max,
            entry: None,
            exit: None,
        }
    }

    /// A connector's terminal range, entered and left as close to its ends
    /// as the trace allows.
    fn terminal(min: i32, max: i32, half: i32) -> Segment {
        Segment {
            min,
            max,
            entry: Some(min + half),
            exit: Some(max - half),
        }
    }

    fn set_entry(&mut self, entry: i32) {
        self.entry.get_or_insert(entry);
    }

    fn set_exit(&mut self, exit: i32) {
        self.exit.get_or_insert(exit);
    }

    fn resolved(&self) -> (i32, i32) {
        let middle = self.min + (self.max - self.min) / 2;
        (self.entry.unwrap_or(middle), self.exit.unwrap_or(middle))
    }
}

/// Picks entry and exit coordinates along one axis. A segment is left where
/// it was entered when the next one has room there; otherwise the exit is
/// pushed to the side of the common span that the following segments still
/// share.
fn trace_segments(segments: &mut [Segment], width: i32, half: i32) {
    let count = segments.len();
    for ix in 0..count {
        if ix > 0 && segments[ix].entry.is_none() {
            let from = segments[ix];
            let prev_exit = segments[ix - 1].exit.unwrap_or(from.min + half);
            let entry = if prev_exit > from.max - half {
                from.max - half
            } else if prev_exit < from.min + half {
                from.min + half
            } else {
                prev_exit
            };
            segments[ix].set_entry(entry);
        }

        if let Some(entry) = segments[ix].entry {
            if ix + 1 < count {
                let to = segments[ix + 1];
                if to.min <= entry - half && to.max >= entry + half {
                    segments[ix + 1].set_entry(entry);
                    segments[ix].set_exit(entry);
                    continue;
                }
            }
        }

        let mut limit_min = segments[ix].min;
        let mut limit_max = segments[ix].max;
        let mut narrowed = false;
        for jx in ix + 1..count {
            let to = segments[jx];
            if limit_max.min(to.max) - limit_min.max(to.min) >= width {
                limit_min = limit_min.max(to.min).min(limit_max - width);
                limit_max = limit_max.min(to.max).max(limit_min + width);
                continue;
            }

            narrowed = true;
            if limit_max < to.max {
                segments[ix].set_exit(limit_max - half);
                segments[jx].set_entry(to.min + half);
            } else {
                segments[ix].set_exit(limit_min + half);
                segments[jx].set_entry(to.max - half);
            }
            break;
        }

        if !narrowed {
            let entry = *segments[ix].entry.get_or_insert(limit_min + half);
            if (entry - limit_min).abs() <= (entry - limit_max).abs() {
                segments[ix].set_exit(limit_min + half);
            } else {
                segments[ix].set_exit(limit_max - half);
            }
        }
    }
}

/// Drops repeated points, squares off diagonal steps, merges collinear runs
/// and then removes what doglegs the plane allows.
pub(crate) fn clean_points(points: &mut Vec<Point>, plane: &Plane, widths: &Widths) {
    points.dedup();

    let mut ix = 0;
    while ix + 1 < points.len() {
        let (p1, p2) = (points[ix], points[ix + 1]);
        if (p1.x - p2.x).abs() >= CLOSE_ENOUGH && (p1.y - p2.y).abs() >= CLOSE_ENOUGH {
            points.insert(ix + 1, Point::new(p2.x, p1.y));
        }
        ix += 1;
    }

    let mut ix = 0;
    while ix + 2 < points.len() {
        let (p1, p2, p3) = (points[ix], points[ix + 1], points[ix + 2]);
        if (p1.x == p2.x && p2.x == p3.x) || (p1.y == p2.y && p2.y == p3.y) {
            points.remove(ix + 1);
        } else {
            ix += 1;
        }
    }

    remove_corners(points, plane, widths);
}

/// Replaces three-segment doglegs with two-segment corners. The window
/// slides one point at a time; after a replacement it backs up one step so
/// that the new corner can take part in the next window.
fn remove_corners(points: &mut Vec<Point>, plane: &Plane, widths: &Widths) {
    let mut ix = 0;
    while ix + 3 < points.len() {
        let (p0, p1, p2, p3) = (points[ix], points[ix + 1], points[ix + 2], points[ix + 3]);
        ix += 1;
        let at_end = ix == 1 || ix + 3 == points.len();

        let proposed = if p0.y == p1.y {
            let monotonic = (p0.x < p1.x && p2.x < p3.x) || (p0.x > p1.x && p2.x > p3.x);
            if !(p2.y == p3.y && p1.x == p2.x && monotonic) {
                continue;
            }
            let a = Point::new(p3.x, p1.y);
            let b = Point::new(p0.x, p2.y);
            if check_proposed(plane, widths, a, p1, p3, at_end) {
                a
            } else if check_proposed(plane, widths, b, p0, p2, at_end) {
                b
            } else {
                continue;
            }
        } else if p0.x == p1.x {
            let monotonic = (p0.y < p1.y && p2.y < p3.y) || (p0.y > p1.y && p2.y > p3.y);
            if !(p2.x == p3.x && p1.y == p2.y && monotonic) {
                continue;
            }
            let a = Point::new(p1.x, p3.y);
            let b = Point::new(p2.x, p0.y);
            if check_proposed(plane, widths, a, p1, p3, at_end) {
                a
            } else if check_proposed(plane, widths, b, p0, p2, at_end) {
                b
            } else {
                continue;
            }
        } else {
            continue;
        };

        ix -= 1;
        points[ix + 1] = proposed;
        points.remove(ix + 2);
        if ix + 3 < points.len() {
            let next = points[ix + 3];
            if (proposed.x == p3.x && p3.x == next.x) || (proposed.x != p3.x && proposed.y == p3.y && p3.y == next.y) {
                points.remove(ix + 2);
            }
        }
        if ix > 0 {
            let prev = points[ix - 1];
            if (proposed.x == p0.x && p0.x == prev.x) || (proposed.x != p0.x && proposed.y == p0.y && p0.y == prev.y) {
                points.remove(ix);
            }
        }
    }
}

/// Whether a corner at `proposed`, reached from `p1` and left towards `p3`,
/// keeps a standard width trace in free space. The trace's own terminals
/// count as free.
fn check_proposed(plane: &Plane, widths: &Widths, proposed: Point, p1: Point, p3: Point, at_end: bool) -> bool {
    if at_end {
        let t = plane.point_search(real_to_tile(proposed.x), real_to_tile(proposed.y));
        if !plane.tile_type(t).is_free() {
            return false;
        }
    }

    let passable = |kind: TileType| kind.is_free() || matches!(kind, TileType::Source | TileType::Destination);
    let half = widths.half_real;
    let vertical = TileRect::from_reals(proposed.x - half, p1.y.min(p3.y), proposed.x + half, p1.y.max(p3.y));
    let horizontal = TileRect::from_reals(p1.x.min(p3.x), proposed.y - half, p1.x.max(p3.x), proposed.y + half);
    [vertical, horizontal]
        .iter()
        .all(|strip| plane.find_in(strip, |kind| !passable(kind)).is_none())
}

impl<H: RouterHost> RoutePass<'_, H> {
    /// Draws the traces for a found path and returns the number of vias
    /// placed.
    pub(crate) fn trace_path(&mut self, search: &Search, complete: &CompletePath, edge: usize) -> Result<usize, RouterError> {
        let path = search.complete_path(complete);
        let crossings: Vec<UnitId> = path.iter().copied().filter(|u| search.unit(*u).cross_layer).collect();
        if self.can_cross && !crossings.is_empty() {
            return self.trace_via_path(search, &path, &crossings, edge);
        }
        self.trace_one_layer(search, &path, edge)?;
        Ok(0)
    }

    fn trace_one_layer(&mut self, search: &Search, path: &[UnitId], edge: usize) -> Result<(), RouterError> {
        let (Some(&first), Some(&last)) = (path.first(), path.last()) else {
            return Ok(());
        };
        let start = search.unit(first).terminal;
        let end = search.unit(last).terminal;
        let plane_ix = search.unit(first).plane;

        let mut points = self.corridor_points(search, path);
        let start_tap = match (start, points.first()) {
            (Terminal::Wire(wire), Some(near)) => self.tap_point(wire, *near),
            _ => None,
        };
        if let Some((_, at)) = start_tap {
            points.insert(0, at);
        }
        let end_tap = match (end, points.last()) {
            (Terminal::Wire(wire), Some(near)) => self.tap_point(wire, *near),
            _ => None,
        };
        if let Some((_, at)) = end_tap {
            points.push(at);
        }

        let widths = self.tiling.widths;
        clean_points(&mut points, &self.tiling.planes[plane_ix].1, &widths);
        let (Some(&p_start), Some(&p_end)) = (points.first(), points.last()) else {
            return Ok(());
        };
        if points.len() < 2 {
            tracing::warn!(edge, "path collapsed to a single point");
            return Ok(());
        }

        let width = widths.real.min(self.terminal_width(start)).min(self.terminal_width(end));
        let layer = self.tiling.planes[plane_ix].0;
        let wires: Vec<TraceInfo> = points
            .windows(2)
            .map(|pair| self.host.draw_trace(pair[0], pair[1], width, layer))
            .collect();
        tracing::debug!(edge, segments = wires.len(), ?layer, width, "drew traces");

        let start = self.terminal_connector(start, start_tap, p_start, edge);
        let end = self.terminal_connector(end, end_tap, p_end, edge);
        self.hook_up(start, end, &wires);
        self.tiling.retile(&*self.host, &wires)?;
        self.drawn.extend(wires.into_iter().map(|w| (w, edge)));
        Ok(())
    }

    /// The staircase through the path's tiles, without its two outermost
    /// points.
    fn corridor_points(&self, search: &Search, path: &[UnitId]) -> Vec<Point> {
        let widths = &self.tiling.widths;
        let (mut h, mut v): (Vec<Segment>, Vec<Segment>) = path
            .iter()
            .map(|id| {
                let unit = search.unit(*id);
                let rect = self.tiling.planes[unit.plane].1.rect(unit.tile);
                (Segment::new(rect.xmin, rect.xmax), Segment::new(rect.ymin, rect.ymax))
            })
            .unzip();

        for ix in [0, path.len() - 1] {
            let unit = search.unit(path[ix]);
            if let Terminal::Connector(_) = unit.terminal {
                let mcr = unit.min_cost_rect;
                h[ix] = Segment::terminal(mcr.xmin, mcr.xmax, widths.half_tile);
                v[ix] = Segment::terminal(mcr.ymin, mcr.ymax, widths.half_tile);
            }
        }

        trace_segments(&mut h, widths.tile, widths.half_tile);
        trace_segments(&mut v, widths.tile, widths.half_tile);

        let mut points = Vec::with_capacity(path.len() * 2);
        for (h, v) in h.iter().zip(&v) {
            let (xs, ys) = (h.resolved(), v.resolved());
            points.push(Point::new(tile_to_real(xs.0), tile_to_real(ys.0)));
            points.push(Point::new(tile_to_real(xs.1), tile_to_real(ys.1)));
        }
        if points.len() > 2 {
            points.remove(0);
            points.pop();
        }
        points
    }

    /// The piece of `wire` closest to `near`, and the point on it.
    fn tap_point(&self, wire: TraceId, near: Point) -> Option<(TraceId, Point)> {
        let pieces = self.pieces.get(&wire).map_or(&[][..], |p| p.as_slice());
        std::iter::once(&wire)
            .chain(pieces)
            .filter_map(|id| self.tiling.scene.traces.get(id))
            .map(|t| {
                let (at, distance) = project_onto_segment(near, t.p1, t.p2);
                (t.id, at, distance)
            })
            .min_by(|a, b| a.2.total_cmp(&b.2))
            .map(|(id, at, _)| (id, at))
    }

    fn terminal_width(&self, terminal: Terminal) -> f64 {
        match terminal {
            Terminal::Connector(id) => self
                .tiling
                .scene
                .connectors
                .get(&id)
                .map_or(f64::INFINITY, |c| c.min_dimension()),
            Terminal::Wire(id) => self.tiling.scene.traces.get(&id).map_or(f64::INFINITY, |t| t.width),
            Terminal::None => f64::INFINITY,
        }
    }

    /// The connector a new trace chain attaches to. Tapping a wire splits it.
    fn terminal_connector(
        &mut self,
        terminal: Terminal,
        tap: Option<(TraceId, Point)>,
        at: Point,
        edge: usize,
    ) -> Option<ConnectorId> {
        match (terminal, tap) {
            (Terminal::Connector(id), _) => Some(id),
            (Terminal::Wire(wire), Some((piece, _))) => self.split_tapped(wire, piece, at, edge),
            _ => None,
        }
    }

    fn split_tapped(&mut self, wire: TraceId, piece: TraceId, at: Point, edge: usize) -> Option<ConnectorId> {
        let Some(split) = self.host.split_trace(piece, at) else {
            tracing::warn!(trace = piece.0, "could not split tapped trace");
            return None;
        };
        if let Some(direction) = self.tiling.wire_directions.get(&wire).copied() {
            self.tiling.wire_directions.insert(split.second.id, direction);
        }
        self.tiling.scene.add_trace(split.first.clone());
        self.tiling.scene.add_trace(split.second.clone());
        self.pieces.entry(wire).or_default().push(split.second.id);
        if let Some(entry) = self.drawn.iter_mut().find(|(t, _)| t.id == split.first.id) {
            entry.0 = split.first.clone();
        }
        self.drawn.push((split.second, edge));
        Some(split.connector)
    }

    fn hook_up(&mut self, start: Option<ConnectorId>, end: Option<ConnectorId>, wires: &[TraceInfo]) {
        let (Some(first), Some(last)) = (wires.first(), wires.last()) else {
            return;
        };
        if let Some(connector) = start {
            self.host.connect(connector, first.ends[0]);
        }
        for pair in wires.windows(2) {
            self.host.connect(pair[0].ends[1], pair[1].ends[0]);
        }
        if let Some(connector) = end {
            self.host.connect(last.ends[1], connector);
        }
    }

    fn make_via(&mut self, search: &Search, id: UnitId) -> Option<ViaInfo> {
        let space = search.nearest_spaces.get(&id)?;
        let size = self.via_tiles();
        let center = placement_in(&search.unit(id).min_cost_rect, space, size, size);
        let via = self.host.place_via(center, self.config.via);
        tracing::debug!(part = via.part.0, x = center.x, y = center.y, "placed via");
        Some(via)
    }

    /// Places a via at every layer crossing and routes the same-layer legs
    /// between the path's ends and the vias, one small search per leg.
    fn trace_via_path(
        &mut self,
        search: &Search,
        path: &[UnitId],
        crossings: &[UnitId],
        edge: usize,
    ) -> Result<usize, RouterError> {
        let (Some(&first), Some(&last)) = (path.first(), path.last()) else {
            return Ok(0);
        };
        let anchor_of = |id: UnitId| {
            let unit = search.unit(id);
            let (x, y) = self.tiling.planes[unit.plane].1.rect(unit.tile).center();
            Anchor { plane: unit.plane, x, y }
        };
        let mut anchors = vec![anchor_of(first)];
        let end = anchor_of(last);
        let mut current = search.unit(first).plane;
        self.clear_marks();

        let mut vias = 0;
        for &id in crossings {
            let Some(via) = self.make_via(search, id) else {
                tracing::warn!(edge, unit = id, "no space recorded for a via");
                continue;
            };
            vias += 1;

            let mut ends = Vec::with_capacity(2);
            for connector in &via.connectors {
                let Some(plane) = self.tiling.plane_index(connector.layer) else {
                    continue;
                };
                let rect = connector.rect.adjusted(self.config.keepout).to_tile();
                self.tiling.insert_tile(
                    &*self.host,
                    connector.layer,
                    rect,
                    Body::Connector(connector.id),
                    TileType::Destination,
                    OverlapPolicy::Ignore,
                );
                self.tiling.add_connector(connector.clone());
                let (x, y) = rect.center();
                ends.push(Anchor { plane, x, y });
            }
            if let [a, b] = ends[..] {
                let (near, far) = if a.plane == current { (a, b) } else { (b, a) };
                anchors.push(near);
                anchors.push(far);
                current = far.plane;
            }
        }
        anchors.push(end);

        for pair in anchors.chunks(2) {
            if let [from, to] = pair {
                if !self.route_between(*from, *to, edge)? {
                    tracing::warn!(edge, "leg to a via did not route");
                }
            }
        }
        Ok(vias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn widths() -> Widths {
        Widths::new(10.0)
    }

    fn open_plane() -> Plane {
        Plane::new(TileRect::from_reals(0.0, 0.0, 1000.0, 1000.0), TileType::Space)
    }

    #[test]
    fn straight_corridor_stays_straight() {
        let (w, half) = (real_to_tile(10.0), real_to_tile(5.0));
        let mut segments = vec![
            Segment::terminal(real_to_tile(95.0), real_to_tile(105.0), half),
            Segment::new(0, real_to_tile(300.0)),
            Segment::new(real_to_tile(50.0), real_to_tile(200.0)),
            Segment::terminal(real_to_tile(95.0), real_to_tile(105.0), half),
        ];
        trace_segments(&mut segments, w, half);
        for s in &segments {
            assert_eq!(s.resolved(), (real_to_tile(100.0), real_to_tile(100.0)), "{s:?}");
        }
    }

    #[test]
    fn exit_moves_to_the_shared_span() {
        let (w, half) = (10, 5);
        let mut segments = vec![Segment::terminal(0, 10, half), Segment::new(0, 200), Segment::new(150, 200)];
        trace_segments(&mut segments, w, half);
        // The second tile is left at the near edge of the third.
        assert_eq!(segments[1].exit, Some(155));
        assert_eq!(segments[2].entry, Some(155));
        assert!(segments.iter().all(|s| s.entry.is_some() && s.exit.is_some()));
    }

    #[test]
    fn diagonal_steps_get_a_corner() {
        let mut points = vec![Point::new(10.0, 10.0), Point::new(10.0, 10.0), Point::new(100.0, 60.0)];
        clean_points(&mut points, &open_plane(), &widths());
        assert_eq!(points.len(), 3);
        assert!(points.windows(2).all(|p| p[0].x == p[1].x || p[0].y == p[1].y));
    }

    #[test]
    fn collinear_points_are_merged() {
        let mut points = vec![
            Point::new(10.0, 10.0),
            Point::new(50.0, 10.0),
            Point::new(80.0, 10.0),
            Point::new(80.0, 90.0),
        ];
        clean_points(&mut points, &open_plane(), &widths());
        assert_eq!(points, vec![Point::new(10.0, 10.0), Point::new(80.0, 10.0), Point::new(80.0, 90.0)]);
    }

    #[rstest]
    #[case::horizontal(vec![
        Point::new(10.0, 10.0),
        Point::new(50.0, 10.0),
        Point::new(50.0, 90.0),
        Point::new(200.0, 90.0),
    ])]
    #[case::vertical(vec![
        Point::new(10.0, 10.0),
        Point::new(10.0, 50.0),
        Point::new(90.0, 50.0),
        Point::new(90.0, 200.0),
    ])]
    fn open_doglegs_become_corners(#[case] mut points: Vec<Point>) {
        let (first, last) = (points[0], points[3]);
        clean_points(&mut points, &open_plane(), &widths());
        assert_eq!(points.len(), 3);
        assert_eq!(points[0], first);
        assert_eq!(points[2], last);
    }

    #[test]
    fn blocked_doglegs_are_kept() {
        let mut plane = open_plane();
        // Blocks both single-corner alternatives.
        plane.insert(TileRect::from_reals(150.0, 0.0, 160.0, 60.0), TileType::Obstacle, Body::None);
        plane.insert(TileRect::from_reals(0.0, 40.0, 8.0, 200.0), TileType::Obstacle, Body::None);
        let mut points = vec![
            Point::new(10.0, 10.0),
            Point::new(50.0, 10.0),
            Point::new(50.0, 90.0),
            Point::new(200.0, 90.0),
        ];
        let before = points.clone();
        clean_points(&mut points, &plane, &widths());
        assert_eq!(points, before);
    }

    #[test]
    fn own_terminals_do_not_block_a_corner() {
        let mut plane = open_plane();
        plane.insert(TileRect::from_reals(190.0, 80.0, 210.0, 100.0), TileType::Destination, Body::None);
        let mut points = vec![
            Point::new(10.0, 10.0),
            Point::new(50.0, 10.0),
            Point::new(50.0, 90.0),
            Point::new(200.0, 90.0),
        ];
        clean_points(&mut points, &plane, &widths());
        assert_eq!(points.len(), 3);
    }
}
