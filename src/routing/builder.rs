use hashbrown::{HashMap, HashSet};
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

use crate::config::{RoutingMode, Widths};
use crate::error::RouterError;
use crate::geometry::{project_onto_segment, real_to_tile, Point, RealRect, TileRect, WireDirection};
use crate::host::{
    Board, ConnectorId, ConnectorInfo, CopperInfo, Layer, PartId, PartInfo, PartKind, RouterHost, SceneSnapshot,
    TraceId, TraceInfo,
};
use crate::tile::{Body, Plane, TileType};
use crate::StableState;

use super::thin::{collect_thin_tiles, eliminate_thin_tiles};

/// What to do when an insertion lands on copper that is already tiled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OverlapPolicy {
    Ignore,
    /// Record the overlap, except between connectors of one part, and
    /// insert what is left over.
    Report,
    /// Notch the new tile around wires and connectors.
    Clip,
    /// Overlap is fine between copper of one equipotential.
    AllowEquipotential,
}

/// Copper that overlaps, or comes closer than the keepout to, other copper.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Overlap {
    pub layer: Layer,
    pub rect: RealRect,
    pub body: Body,
    pub others: Vec<Body>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct TilingOptions {
    pub(crate) connectors: OverlapPolicy,
    pub(crate) wires: OverlapPolicy,
    pub(crate) eliminate_thin: bool,
    /// Build the union planes used to place vias and jumpers.
    pub(crate) combine_planes: bool,
}

/// Obstacles of both layers merged, once as is and once rotated by 90
/// degrees so that free space can be found along either axis.
#[derive(Clone)]
pub(crate) struct UnionPlanes {
    pub(crate) plane: Plane,
    pub(crate) plane90: Plane,
}

/// The host's scene, indexed for lookups during a pass.
#[derive(Clone, Debug, Default)]
pub(crate) struct SceneIndex {
    pub(crate) parts: IndexMap<PartId, PartInfo, StableState>,
    pub(crate) connectors: IndexMap<ConnectorId, ConnectorInfo, StableState>,
    pub(crate) traces: IndexMap<TraceId, TraceInfo, StableState>,
    pub(crate) copper: Vec<CopperInfo>,
    pub(crate) trace_ends: HashMap<ConnectorId, TraceId, StableState>,
    pub(crate) connections: Vec<(ConnectorId, ConnectorId)>,
}

impl SceneIndex {
    pub(crate) fn new(snapshot: SceneSnapshot) -> Self {
        let mut index = SceneIndex {
            copper: snapshot.copper,
            connections: snapshot.connections,
            ..Default::default()
        };
        for part in snapshot.parts {
            index.parts.insert(part.id, part);
        }
        for connector in snapshot.connectors {
            index.connectors.insert(connector.id, connector);
        }
        for trace in snapshot.traces {
            index.add_trace(trace);
        }
        index
    }

    pub(crate) fn add_trace(&mut self, trace: TraceInfo) {
        for end in trace.ends {
            self.trace_ends.insert(end, trace.id);
        }
        self.traces.insert(trace.id, trace);
    }

    fn part_visible(&self, part: PartId) -> bool {
        self.parts.get(&part).map_or(true, |p| p.visible)
    }

    /// Traces reachable from `start` through trace-to-trace connections.
    fn chained(&self, start: TraceId) -> Vec<TraceId> {
        let mut chain = vec![start];
        let mut seen: HashSet<TraceId, StableState> = HashSet::default();
        seen.insert(start);
        let mut ix = 0;
        while ix < chain.len() {
            let Some(trace) = self.traces.get(&chain[ix]) else {
                ix += 1;
                continue;
            };
            ix += 1;
            for (a, b) in &self.connections {
                let other = if trace.ends.contains(a) {
                    b
                } else if trace.ends.contains(b) {
                    a
                } else {
                    continue;
                };
                if let Some(next) = self.trace_ends.get(other) {
                    if seen.insert(*next) {
                        chain.push(*next);
                    }
                }
            }
        }
        chain
    }
}

/// One tiling pass over the host's scene: a plane per copper layer, the
/// optional union planes, and whatever the pass found wrong.
#[derive(Clone)]
pub(crate) struct Tiling {
    pub(crate) mode: RoutingMode,
    pub(crate) widths: Widths,
    pub(crate) keepout: f64,
    pub(crate) max_rect: RealRect,
    pub(crate) tile_max_rect: TileRect,
    pub(crate) planes: Vec<(Layer, Plane)>,
    pub(crate) union: Option<UnionPlanes>,
    pub(crate) overlaps: Vec<Overlap>,
    pub(crate) off_board: IndexSet<ConnectorId, StableState>,
    pub(crate) wire_directions: HashMap<TraceId, WireDirection, StableState>,
    pub(crate) scene: SceneIndex,
}

/// A plane whose interior `rect` is space, inside a buffer as wide and as
/// tall as `rect` itself.
fn init_plane(rect: TileRect) -> Plane {
    let buffer = TileRect::new(
        rect.xmin - rect.width(),
        rect.ymin - rect.height(),
        rect.xmax + rect.width(),
        rect.ymax + rect.height(),
    );
    let mut plane = Plane::new(buffer, TileType::Buffer);
    plane.insert(rect, TileType::Space, Body::None);
    plane
}

/// The area a pass works in: the board in PCB mode, otherwise everything in
/// the scene with half its size again as margin.
pub(crate) fn routing_area(mode: RoutingMode, board: Option<&Board>, snapshot: &SceneSnapshot) -> RealRect {
    if let (RoutingMode::Pcb, Some(board)) = (mode, board) {
        return board.rect;
    }
    let rects = snapshot
        .parts
        .iter()
        .map(|p| p.rect)
        .chain(snapshot.traces.iter().map(trace_bounds));
    let bounds = rects.reduce(|a, b| a.united(&b)).unwrap_or_default();
    let (w, h) = (bounds.width().max(1.0), bounds.height().max(1.0));
    RealRect::new(bounds.left - w / 2.0, bounds.top - h / 2.0, bounds.right + w / 2.0, bounds.bottom + h / 2.0)
}

fn trace_bounds(trace: &TraceInfo) -> RealRect {
    RealRect::new(
        trace.p1.x.min(trace.p2.x),
        trace.p1.y.min(trace.p2.y),
        trace.p1.x.max(trace.p2.x),
        trace.p1.y.max(trace.p2.y),
    )
}

impl Tiling {
    pub(crate) fn new(
        mode: RoutingMode,
        widths: Widths,
        keepout: f64,
        max_rect: RealRect,
        snapshot: SceneSnapshot,
    ) -> Tiling {
        Tiling {
            mode,
            widths,
            keepout,
            max_rect,
            tile_max_rect: max_rect.to_tile(),
            planes: Vec::new(),
            union: None,
            overlaps: Vec::new(),
            off_board: IndexSet::default(),
            wire_directions: HashMap::default(),
            scene: SceneIndex::new(snapshot),
        }
    }

    /// Tiles every layer in play.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn build<H: RouterHost>(
        host: &H,
        mode: RoutingMode,
        layers: &[Layer],
        board: Option<&Board>,
        widths: Widths,
        keepout: f64,
        options: TilingOptions,
    ) -> Result<Tiling, RouterError> {
        let snapshot = host.scene();
        let max_rect = routing_area(mode, board, &snapshot);
        let mut tiling = Tiling::new(mode, widths, keepout, max_rect, snapshot);

        if options.combine_planes {
            tiling.union = Some(UnionPlanes {
                plane: init_plane(tiling.tile_max_rect),
                plane90: init_plane(tiling.tile_max_rect.rotate90()),
            });
            tiling.clip_parts();
        }

        for layer in layers {
            tiling.tile_layer(host, *layer, board, options)?;
        }

        if options.eliminate_thin {
            let area = tiling.tile_max_rect;
            tiling.eliminate_thin_in_union(&area);
        }
        Ok(tiling)
    }

    pub(crate) fn plane_index(&self, layer: Layer) -> Option<usize> {
        match self.mode {
            RoutingMode::Schematic => (!self.planes.is_empty()).then_some(0),
            RoutingMode::Pcb => self.planes.iter().position(|(l, _)| *l == layer),
        }
    }

    pub(crate) fn plane(&self, layer: Layer) -> Option<&Plane> {
        self.plane_index(layer).map(|ix| &self.planes[ix].1)
    }

    pub(crate) fn plane_mut(&mut self, layer: Layer) -> Option<&mut Plane> {
        self.plane_index(layer).map(|ix| &mut self.planes[ix].1)
    }

    pub(crate) fn layers(&self) -> Vec<Layer> {
        self.planes.iter().map(|(l, _)| *l).collect()
    }

    fn tile_layer<H: RouterHost>(
        &mut self,
        host: &H,
        layer: Layer,
        board: Option<&Board>,
        options: TilingOptions,
    ) -> Result<(), RouterError> {
        self.planes.push((layer, init_plane(self.tile_max_rect)));
        let keepout = self.keepout;

        // Outline corners and other holes in the board.
        if let Some(board) = board {
            for cutout in &board.cutouts {
                self.insert_tile(
                    host,
                    layer,
                    cutout.adjusted(keepout).to_tile(),
                    Body::None,
                    TileType::Obstacle,
                    OverlapPolicy::Ignore,
                );
            }
        }

        match self.mode {
            RoutingMode::Pcb => self.tile_copper(host, layer, options)?,
            RoutingMode::Schematic => self.tile_schematic_parts(host, layer, options),
        }

        if options.eliminate_thin {
            let area = self.tile_max_rect;
            let std_width = self.widths.tile;
            if let Some(plane) = self.plane_mut(layer) {
                let rects = collect_thin_tiles(plane, &area, std_width);
                eliminate_thin_tiles(plane, rects, std_width);
            }
        }
        Ok(())
    }

    fn tile_copper<H: RouterHost>(&mut self, host: &H, layer: Layer, options: TilingOptions) -> Result<(), RouterError> {
        let keepout = self.keepout;

        // Connectors go in first so that pads of one part may touch.
        let connectors: Vec<ConnectorInfo> = self
            .scene
            .connectors
            .values()
            .filter(|c| c.layer == layer && self.scene.part_visible(c.part) && !self.off_board.contains(&c.id))
            .cloned()
            .collect();
        for connector in connectors {
            if !self.max_rect.contains_rect(&connector.rect) {
                tracing::debug!(connector = connector.id.0, "connector is off the board");
                self.off_board.insert(connector.id);
                continue;
            }
            self.insert_tile(
                host,
                layer,
                connector.rect.adjusted(keepout).to_tile(),
                Body::Connector(connector.id),
                TileType::Obstacle,
                options.connectors,
            );
        }

        let mut been_there: HashSet<TraceId, StableState> = HashSet::default();
        let traces: Vec<TraceId> = self
            .scene
            .traces
            .values()
            .filter(|t| t.visible && t.layer == layer)
            .map(|t| t.id)
            .collect();
        for trace in traces {
            if been_there.contains(&trace) {
                continue;
            }
            let chain = self.scene.chained(trace);
            been_there.extend(chain.iter().copied());
            self.tile_wires(host, &chain, TileType::Obstacle, options.wires, options.eliminate_thin)?;
        }

        let copper: Vec<CopperInfo> = self
            .scene
            .copper
            .iter()
            .filter(|c| c.layer == layer && self.scene.part_visible(c.part) && self.max_rect.contains_rect(&c.rect))
            .cloned()
            .collect();
        for c in copper {
            self.insert_tile(
                host,
                layer,
                c.rect.adjusted(keepout).to_tile(),
                Body::Part(c.part),
                TileType::Obstacle,
                options.connectors,
            );
        }
        Ok(())
    }

    fn tile_schematic_parts<H: RouterHost>(&mut self, host: &H, layer: Layer, options: TilingOptions) {
        let keepout = self.keepout;
        let parts: Vec<PartInfo> = self.scene.parts.values().filter(|p| p.visible).cloned().collect();
        for part in parts {
            let part_rect = part.rect.adjusted(keepout).to_tile();
            self.insert_tile(host, layer, part_rect, Body::Part(part.id), TileType::Obstacle, options.connectors);

            let connectors: Vec<ConnectorInfo> = self
                .scene
                .connectors
                .values()
                .filter(|c| c.part == part.id)
                .cloned()
                .collect();
            for connector in connectors {
                let rect = connector.rect.adjusted(keepout).to_tile().extend_to_bounds(&part_rect);
                self.insert_tile(
                    host,
                    layer,
                    rect,
                    Body::Connector(connector.id),
                    TileType::Obstacle,
                    OverlapPolicy::Ignore,
                );
            }
        }
    }

    /// Every part footprint with connectors blocks via and jumper placement.
    fn clip_parts(&mut self) {
        let with_connectors: HashSet<PartId, StableState> = self.scene.connectors.values().map(|c| c.part).collect();
        let rects: Vec<TileRect> = self
            .scene
            .parts
            .values()
            .filter(|p| p.visible && p.kind != PartKind::Jumper && with_connectors.contains(&p.id))
            .filter_map(|p| p.rect.intersected(&self.max_rect))
            .map(|r| r.to_tile())
            .collect();
        for rect in rects {
            self.insert_union(rect, TileType::Obstacle);
        }
    }

    /// Inserts `rect` on `layer` under `policy`, returning whether an overlap
    /// was recorded.
    pub(crate) fn insert_tile<H: RouterHost>(
        &mut self,
        host: &H,
        layer: Layer,
        rect: TileRect,
        body: Body,
        kind: TileType,
        policy: OverlapPolicy,
    ) -> bool {
        if rect.width() <= 0 {
            tracing::debug!(?rect, "attempting to insert zero width tile");
            return false;
        }
        let Some(ix) = self.plane_index(layer) else {
            return false;
        };

        let already: Vec<(TileRect, Body)> = if policy == OverlapPolicy::Ignore {
            Vec::new()
        } else {
            let plane = &self.planes[ix].1;
            plane
                .tiles_in(&rect)
                .into_iter()
                .filter(|t| {
                    !matches!(
                        plane.tile_type(*t),
                        TileType::Space | TileType::Space2 | TileType::SchematicWireSpace | TileType::Buffer
                    )
                })
                .map(|t| (plane.rect(t), plane.body(t)))
                .collect()
        };
        if already.is_empty() {
            self.planes[ix].1.insert(rect, kind, body);
            self.insert_union(rect, kind);
            return false;
        }

        let (overlap, clip_against) = match policy {
            OverlapPolicy::Report => (!self.same_part(body, &already), already),
            OverlapPolicy::Clip => (
                false,
                already
                    .into_iter()
                    .filter(|(_, b)| matches!(b, Body::Wire(_) | Body::Connector(_)))
                    .collect(),
            ),
            OverlapPolicy::AllowEquipotential => (!self.equipotential(host, body, &already), already),
            OverlapPolicy::Ignore => (false, Vec::new()),
        };

        if overlap {
            tracing::debug!(?layer, ?rect, ?body, "overlap not allowed");
            self.overlaps.push(Overlap {
                layer,
                rect: rect.to_real(),
                body,
                others: clip_against.iter().map(|(_, b)| *b).collect(),
            });
        }

        let clips: Vec<TileRect> = clip_against.into_iter().map(|(r, _)| r).collect();
        self.clip_insert(ix, rect, &clips, body, kind);
        overlap
    }

    fn clip_insert(&mut self, ix: usize, rect: TileRect, clips: &[TileRect], body: Body, kind: TileType) {
        let mut rects = vec![rect];
        let mut next = 0;
        while next < rects.len() {
            let r = rects[next];
            next += 1;
            if let Some(pieces) = clips.iter().find_map(|c| r.clip(c)) {
                rects.extend(pieces);
                continue;
            }
            self.planes[ix].1.insert(r, kind, body);
            self.insert_union(r, kind);
        }
    }

    pub(crate) fn insert_union(&mut self, rect: TileRect, kind: TileType) {
        let Some(union) = self.union.as_mut() else {
            return;
        };
        if kind.is_space() {
            return;
        }
        union.plane.insert(rect, TileType::Obstacle, Body::None);
        union.plane90.insert(rect.rotate90(), TileType::Obstacle, Body::None);
    }

    fn same_part(&self, body: Body, already: &[(TileRect, Body)]) -> bool {
        let Body::Connector(id) = body else {
            return false;
        };
        let Some(part) = self.scene.connectors.get(&id).map(|c| c.part) else {
            return false;
        };
        already.iter().all(|(_, b)| match b {
            Body::Connector(other) => self.scene.connectors.get(other).map(|c| c.part) == Some(part),
            _ => false,
        })
    }

    fn equipotential<H: RouterHost>(&self, host: &H, body: Body, already: &[(TileRect, Body)]) -> bool {
        let seed = match body {
            Body::Connector(id) => id,
            Body::Wire(id) => match self.scene.traces.get(&id) {
                Some(trace) => trace.ends[0],
                None => return false,
            },
            _ => return false,
        };
        let same: HashSet<ConnectorId, StableState> = host.equal_potential(seed).into_iter().collect();
        already.iter().all(|(_, b)| match b {
            Body::Connector(id) => same.contains(id),
            Body::Wire(id) => self.scene.traces.get(id).map_or(false, |t| same.contains(&t.ends[0])),
            _ => false,
        })
    }

    /// Tiles the footprints of `traces`, each on its own layer's plane.
    pub(crate) fn tile_wires<H: RouterHost>(
        &mut self,
        host: &H,
        traces: &[TraceId],
        kind: TileType,
        policy: OverlapPolicy,
        eliminate_thin: bool,
    ) -> Result<(), RouterError> {
        let mut footprints = Vec::with_capacity(traces.len());
        for id in traces {
            let Some(trace) = self.scene.traces.get(id).cloned() else {
                continue;
            };
            let (direction, rects) = self.wire_rects(&trace, eliminate_thin);
            self.wire_directions.insert(trace.id, direction);
            footprints.push((trace, rects));
        }

        for (trace, rects) in footprints {
            if self.plane_index(trace.layer).is_none() {
                return Err(RouterError::WireCrossesLayers {
                    p1: trace.p1,
                    p2: trace.p2,
                });
            }
            for rect in rects {
                self.insert_tile(host, trace.layer, rect.to_tile(), Body::Wire(trace.id), kind, policy);
            }
        }
        Ok(())
    }

    /// The footprint of a trace plus keepout. Horizontal and vertical traces
    /// are one rectangle; diagonal ones are rasterised into runs of cells.
    pub(crate) fn wire_rects(&self, trace: &TraceInfo, eliminate_thin: bool) -> (WireDirection, Vec<RealRect>) {
        let k = self.keepout;
        let (p1, p2) = (trace.p1, trace.p2);
        let dx = (p1.x - p2.x).abs();
        let dy = (p1.y - p2.y).abs();
        let direction = WireDirection::of(p1, p2);
        let rects = match direction {
            WireDirection::Vertical => {
                let x = p1.x.min(p2.x) - trace.width / 2.0 - k;
                let y = p1.y.min(p2.y) - k;
                vec![RealRect::new(x, y, x + trace.width + dx + 2.0 * k, y + dy + 2.0 * k)]
            }
            WireDirection::Horizontal => {
                let x = p1.x.min(p2.x) - k;
                let y = p1.y.min(p2.y) - trace.width / 2.0 - k;
                vec![RealRect::new(x, y, x + dx + 2.0 * k, y + trace.width + dy + 2.0 * k)]
            }
            WireDirection::Diagonal => {
                let cell = if eliminate_thin { self.widths.real } else { 1.0 };
                self.rasterize(p1, p2, cell)
            }
        };
        (direction, rects)
    }

    fn rasterize(&self, p1: Point, p2: Point, cell: f64) -> Vec<RealRect> {
        let k = self.keepout;
        let origin = Point::new(p1.x.min(p2.x) - k, p1.y.min(p2.y) - k);
        let cols = (((p1.x - p2.x).abs() + 2.0 * k) / cell).max(1.0) as usize;
        let rows = (((p1.y - p2.y).abs() + 2.0 * k) / cell).max(1.0) as usize;
        let half_pen = (self.widths.real + 2.0 * k) / 2.0;

        let runs_in_row = |row: usize| {
            let mut runs = Vec::new();
            let mut start = None;
            for col in 0..=cols {
                let on = col < cols && {
                    let center = Point::new(
                        origin.x + (col as f64 + 0.5) * cell,
                        origin.y + (row as f64 + 0.5) * cell,
                    );
                    project_onto_segment(center, p1, p2).1 <= half_pen
                };
                match (on, start) {
                    (true, None) => start = Some(col),
                    (false, Some(s)) => {
                        runs.push((s, col));
                        start = None;
                    }
                    _ => {}
                }
            }
            runs
        };

        // Runs spanning the same columns in consecutive rows are merged.
        let mut rects = Vec::new();
        let mut open: Vec<(usize, usize, usize)> = Vec::new();
        let mut emit = |(c0, c1, r0): (usize, usize, usize), r1: usize| {
            rects.push(RealRect::new(
                origin.x + c0 as f64 * cell,
                origin.y + r0 as f64 * cell,
                origin.x + c1 as f64 * cell,
                origin.y + r1 as f64 * cell,
            ));
        };
        for row in 0..rows {
            let runs = runs_in_row(row);
            let mut still_open = Vec::with_capacity(open.len());
            for run in open.drain(..) {
                if runs.contains(&(run.0, run.1)) {
                    still_open.push(run);
                } else {
                    emit(run, row);
                }
            }
            for (c0, c1) in runs {
                if !still_open.iter().any(|r| r.0 == c0 && r.1 == c1) {
                    still_open.push((c0, c1, row));
                }
            }
            open = still_open;
        }
        for run in open {
            emit(run, rows);
        }
        rects
    }

    /// Makes a connector placed during the pass known to terminal lookups.
    pub(crate) fn add_connector(&mut self, connector: ConnectorInfo) {
        self.scene.connectors.insert(connector.id, connector);
    }

    /// Tiles traces drawn during the pass and tidies the space around them,
    /// so that later edges see them.
    pub(crate) fn retile<H: RouterHost>(&mut self, host: &H, traces: &[TraceInfo]) -> Result<(), RouterError> {
        let Some(bounds) = traces.iter().map(trace_bounds).reduce(|a, b| a.united(&b)) else {
            return Ok(());
        };
        let kind = match self.mode {
            RoutingMode::Pcb => TileType::Obstacle,
            RoutingMode::Schematic => TileType::SchematicWireSpace,
        };
        let mut layers = Vec::new();
        for trace in traces {
            if !layers.contains(&trace.layer) {
                layers.push(trace.layer);
            }
            self.scene.add_trace(trace.clone());
        }
        let ids: Vec<TraceId> = traces.iter().map(|t| t.id).collect();
        self.tile_wires(host, &ids, kind, OverlapPolicy::Clip, true)?;

        let area = bounds.to_tile().adjusted(self.widths.tile + real_to_tile(self.keepout));
        let std_width = self.widths.tile;
        for layer in layers {
            if let Some(plane) = self.plane_mut(layer) {
                let rects = collect_thin_tiles(plane, &area, std_width);
                eliminate_thin_tiles(plane, rects, std_width);
            }
        }
        self.eliminate_thin_in_union(&area);
        Ok(())
    }

    /// Thin-tile elimination on the union planes within `area`.
    pub(crate) fn eliminate_thin_in_union(&mut self, area: &TileRect) {
        let std_width = self.widths.tile;
        if let Some(union) = self.union.as_mut() {
            let rects = collect_thin_tiles(&union.plane, area, std_width);
            eliminate_thin_tiles(&mut union.plane, rects, std_width);
            let area90 = area.rotate90();
            let rects = collect_thin_tiles(&union.plane90, &area90, std_width);
            eliminate_thin_tiles(&mut union.plane90, rects, std_width);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouterConfig;
    use crate::scene::MemoryScene;

    fn options(policy: OverlapPolicy) -> TilingOptions {
        TilingOptions {
            connectors: policy,
            wires: policy,
            eliminate_thin: false,
            combine_planes: false,
        }
    }

    fn board_scene() -> (MemoryScene, Board) {
        let rect = RealRect::new(0.0, 0.0, 400.0, 400.0);
        (
            MemoryScene::new(rect),
            Board {
                rect,
                cutouts: Vec::new(),
            },
        )
    }

    fn build(scene: &MemoryScene, board: &Board, options: TilingOptions) -> Tiling {
        let config = RouterConfig::default();
        Tiling::build(
            scene,
            RoutingMode::Pcb,
            &[Layer::Bottom, Layer::Top],
            Some(board),
            Widths::new(config.trace_width),
            config.keepout,
            options,
        )
        .unwrap()
    }

    #[test]
    fn connectors_become_obstacles_with_keepout() {
        let (mut scene, board) = board_scene();
        let part = scene.add_part(RealRect::new(90.0, 90.0, 130.0, 130.0));
        let pad = scene.add_pad(part, Layer::Top, RealRect::new(100.0, 100.0, 120.0, 120.0));
        let tiling = build(&scene, &board, options(OverlapPolicy::Report));

        let top = tiling.plane(Layer::Top).unwrap();
        let t = top.point_search(crate::geometry::real_to_tile(95.0), crate::geometry::real_to_tile(95.0));
        assert_eq!(top.tile_type(t), TileType::Obstacle);
        assert_eq!(top.body(t), Body::Connector(pad));
        let bottom = tiling.plane(Layer::Bottom).unwrap();
        let t = bottom.point_search(crate::geometry::real_to_tile(110.0), crate::geometry::real_to_tile(110.0));
        assert_eq!(bottom.tile_type(t), TileType::Space);
        top.verify().unwrap();
        assert!(tiling.overlaps.is_empty());
    }

    #[test]
    fn pads_of_one_part_may_touch() {
        let (mut scene, board) = board_scene();
        let part = scene.add_part(RealRect::new(90.0, 90.0, 160.0, 130.0));
        scene.add_pad(part, Layer::Top, RealRect::new(100.0, 100.0, 120.0, 120.0));
        scene.add_pad(part, Layer::Top, RealRect::new(125.0, 100.0, 145.0, 120.0));
        let tiling = build(&scene, &board, options(OverlapPolicy::Report));
        assert!(tiling.overlaps.is_empty());

        let other = scene.add_part(RealRect::new(130.0, 90.0, 170.0, 130.0));
        scene.add_pad(other, Layer::Top, RealRect::new(150.0, 100.0, 170.0, 120.0));
        let tiling = build(&scene, &board, options(OverlapPolicy::Report));
        assert_eq!(tiling.overlaps.len(), 1);
        tiling.plane(Layer::Top).unwrap().verify().unwrap();
    }

    #[test]
    fn off_board_connectors_are_skipped() {
        let (mut scene, board) = board_scene();
        let part = scene.add_part(RealRect::new(380.0, 10.0, 450.0, 50.0));
        let pad = scene.add_pad(part, Layer::Bottom, RealRect::new(390.0, 20.0, 420.0, 40.0));
        let tiling = build(&scene, &board, options(OverlapPolicy::Report));
        assert!(tiling.off_board.contains(&pad));
    }

    #[test]
    fn clip_notches_new_wires_around_connectors() {
        let (mut scene, board) = board_scene();
        let part = scene.add_part(RealRect::new(90.0, 90.0, 130.0, 130.0));
        let pad = scene.add_pad(part, Layer::Bottom, RealRect::new(100.0, 100.0, 120.0, 120.0));
        scene.add_trace(Layer::Bottom, Point::new(50.0, 110.0), Point::new(250.0, 110.0), 10.0, true);
        let tiling = build(&scene, &board, options(OverlapPolicy::Clip));

        let plane = tiling.plane(Layer::Bottom).unwrap();
        plane.verify().unwrap();
        let at = |x: f64, y: f64| {
            let t = plane.point_search(crate::geometry::real_to_tile(x), crate::geometry::real_to_tile(y));
            plane.body(t)
        };
        assert_eq!(at(110.0, 110.0), Body::Connector(pad));
        assert!(matches!(at(200.0, 110.0), Body::Wire(_)));
        assert!(tiling.overlaps.is_empty());
    }

    #[test]
    fn diagonal_wires_are_rasterised() {
        let (mut scene, board) = board_scene();
        let trace = scene.add_trace(Layer::Top, Point::new(50.0, 50.0), Point::new(250.0, 250.0), 10.0, true);
        let tiling = build(&scene, &board, options(OverlapPolicy::Clip));
        let (direction, rects) = tiling.wire_rects(&trace, true);
        assert_eq!(direction, WireDirection::Diagonal);
        assert!(rects.len() > 1);
        let center = Point::new(150.0, 150.0);
        assert!(rects.iter().any(|r| r.contains_point(&center)));
        let far = Point::new(240.0, 60.0);
        assert!(!rects.iter().any(|r| r.contains_point(&far)));
        assert_eq!(tiling.wire_directions.get(&trace.id), Some(&WireDirection::Diagonal));
    }

    #[test]
    fn chained_traces_across_layers_fail_tiling() {
        let (mut scene, board) = board_scene();
        let a = scene.add_trace(Layer::Bottom, Point::new(50.0, 50.0), Point::new(150.0, 50.0), 10.0, true);
        let b = scene.add_trace(Layer::Top, Point::new(150.0, 50.0), Point::new(150.0, 150.0), 10.0, true);
        scene.connect(a.ends[1], b.ends[0]);
        let config = RouterConfig::default();
        let result = Tiling::build(
            &scene,
            RoutingMode::Pcb,
            &[Layer::Bottom, Layer::Top],
            Some(&board),
            Widths::new(config.trace_width),
            config.keepout,
            options(OverlapPolicy::Clip),
        );
        assert!(matches!(result, Err(RouterError::WireCrossesLayers { .. })));
    }

    #[test]
    fn retile_turns_new_traces_into_obstacles() {
        let (mut scene, board) = board_scene();
        let mut tiling = build(
            &scene,
            &board,
            TilingOptions {
                combine_planes: true,
                eliminate_thin: true,
                ..options(OverlapPolicy::Clip)
            },
        );
        let trace = scene.draw_trace(Point::new(100.0, 200.0), Point::new(300.0, 200.0), 24.0, Layer::Top);
        tiling.retile(&scene, &[trace.clone()]).unwrap();

        let top = tiling.plane(Layer::Top).unwrap();
        top.verify().unwrap();
        let t = top.point_search(real_to_tile(200.0), real_to_tile(200.0));
        assert_eq!(top.tile_type(t), TileType::Obstacle);
        assert_eq!(top.body(t), Body::Wire(trace.id));
        assert!(tiling.scene.traces.contains_key(&trace.id));
        let bottom = tiling.plane(Layer::Bottom).unwrap();
        assert!(bottom.tile_type(bottom.point_search(real_to_tile(200.0), real_to_tile(200.0))).is_space());
        let union = tiling.union.as_ref().unwrap();
        assert_eq!(
            union.plane.tile_type(union.plane.point_search(real_to_tile(200.0), real_to_tile(200.0))),
            TileType::Obstacle
        );
    }

    #[test]
    fn union_planes_collect_obstacles_of_both_layers() {
        let (mut scene, board) = board_scene();
        let part = scene.add_part(RealRect::new(90.0, 90.0, 130.0, 130.0));
        scene.add_pad(part, Layer::Bottom, RealRect::new(100.0, 100.0, 120.0, 120.0));
        scene.add_trace(Layer::Top, Point::new(200.0, 50.0), Point::new(200.0, 350.0), 10.0, true);
        let tiling = build(
            &scene,
            &board,
            TilingOptions {
                combine_planes: true,
                eliminate_thin: true,
                ..options(OverlapPolicy::Clip)
            },
        );
        let union = tiling.union.as_ref().unwrap();
        union.plane.verify().unwrap();
        union.plane90.verify().unwrap();
        let p = |x: f64| crate::geometry::real_to_tile(x);
        assert_eq!(union.plane.tile_type(union.plane.point_search(p(110.0), p(110.0))), TileType::Obstacle);
        assert_eq!(union.plane.tile_type(union.plane.point_search(p(200.0), p(300.0))), TileType::Obstacle);
        let r90 = TileRect::new(p(199.0), p(299.0), p(201.0), p(301.0)).rotate90();
        assert_eq!(union.plane90.tile_type(union.plane90.point_search(r90.xmin, r90.ymin)), TileType::Obstacle);
    }
}
