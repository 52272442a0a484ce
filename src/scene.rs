//! An in-memory design that the router can work on directly.

use indexmap::{IndexMap, IndexSet};
use petgraph::unionfind::UnionFind;

use crate::config::{JumperSize, ViaSize};
use crate::geometry::{Point, RealRect};
use crate::host::{
    Board, BoardLookup, ConnectorId, ConnectorInfo, CopperInfo, JumperInfo, Layer, PartId, PartInfo, PartKind,
    RouterHost, SceneSnapshot, Signals, SplitTrace, TraceId, TraceInfo, ViaInfo,
};
use crate::StableState;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SceneState {
    parts: IndexMap<PartId, PartInfo, StableState>,
    connectors: IndexMap<ConnectorId, ConnectorInfo, StableState>,
    traces: IndexMap<TraceId, TraceInfo, StableState>,
    /// Connectors at the ends of traces, and the trace each belongs to.
    trace_ends: IndexMap<ConnectorId, TraceId, StableState>,
    copper: Vec<CopperInfo>,
    connections: Vec<(ConnectorId, ConnectorId)>,
    /// Connector pairs joined inside a part, such as the two ends of a jumper.
    buses: Vec<(ConnectorId, ConnectorId)>,
    next_id: u64,
}

impl SceneState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Interrupt {
    Cancel,
    Stop,
    SkipTrace,
}

/// Raises one interrupt on `signals` when a counter reaches `at`.
#[derive(Clone, Debug)]
struct Trigger {
    interrupt: Interrupt,
    signals: Signals,
    at: usize,
    fired: bool,
}

impl Trigger {
    fn new(interrupt: Interrupt, signals: Signals, at: usize) -> Self {
        Trigger {
            interrupt,
            signals,
            at,
            fired: false,
        }
    }

    fn observe(&mut self, count: usize) {
        if self.fired || count < self.at {
            return;
        }
        self.fired = true;
        match self.interrupt {
            Interrupt::Cancel => self.signals.cancel(),
            Interrupt::Stop => self.signals.stop_tracing(),
            Interrupt::SkipTrace => self.signals.skip_trace(),
        }
    }
}

/// A [`RouterHost`] holding the whole design in memory.
///
/// Vias and jumpers are parts with two connectors; traces get a connector at
/// each end. Checkpoints are clones of the design.
#[derive(Clone, Debug, Default)]
pub struct MemoryScene {
    boards: Vec<Board>,
    nets: Vec<Vec<ConnectorId>>,
    state: SceneState,
    after_traces: Option<Trigger>,
    after_events: Option<Trigger>,
    drawn: usize,
    events: usize,
}

impl MemoryScene {
    pub fn new(board: RealRect) -> Self {
        MemoryScene {
            boards: vec![Board {
                rect: board,
                cutouts: Vec::new(),
            }],
            ..Default::default()
        }
    }

    pub fn without_board() -> Self {
        MemoryScene::default()
    }

    pub fn add_board(&mut self, board: Board) {
        self.boards.push(board);
    }

    pub fn add_part(&mut self, rect: RealRect) -> PartId {
        let id = PartId(self.state.next_id());
        self.state.parts.insert(
            id,
            PartInfo {
                id,
                kind: PartKind::Regular,
                rect,
                visible: true,
                autoroutable: false,
            },
        );
        id
    }

    /// Adds a single-layer connector to `part`, attached at its centre.
    pub fn add_pad(&mut self, part: PartId, layer: Layer, rect: RealRect) -> ConnectorId {
        self.insert_connector(part, layer, rect).id
    }

    /// Adds the same pad on both layers, returned bottom first.
    pub fn add_through_hole_pad(&mut self, part: PartId, rect: RealRect) -> [ConnectorId; 2] {
        let [bottom, top] = self.insert_through_hole(part, rect);
        [bottom.id, top.id]
    }

    fn insert_connector(&mut self, part: PartId, layer: Layer, rect: RealRect) -> ConnectorInfo {
        let id = ConnectorId(self.state.next_id());
        let connector = ConnectorInfo {
            id,
            part,
            layer,
            rect,
            terminal: rect.center(),
            cross_layer: None,
        };
        self.state.connectors.insert(id, connector.clone());
        connector
    }

    fn insert_through_hole(&mut self, part: PartId, rect: RealRect) -> [ConnectorInfo; 2] {
        let bottom_id = ConnectorId(self.state.next_id());
        let top_id = ConnectorId(self.state.next_id());
        let pad = |id, layer, cross_layer| ConnectorInfo {
            id,
            part,
            layer,
            rect,
            terminal: rect.center(),
            cross_layer: Some(cross_layer),
        };
        let bottom = pad(bottom_id, Layer::Bottom, top_id);
        let top = pad(top_id, Layer::Top, bottom_id);
        self.state.connectors.insert(bottom_id, bottom.clone());
        self.state.connectors.insert(top_id, top.clone());
        [bottom, top]
    }

    pub fn add_copper(&mut self, part: PartId, layer: Layer, rect: RealRect) {
        self.state.copper.push(CopperInfo { part, layer, rect });
    }

    pub fn add_net(&mut self, connectors: &[ConnectorId]) {
        self.nets.push(connectors.to_vec());
    }

    /// Adds an existing trace. Traces that are not autoroutable are kept by
    /// the router and may only be tapped.
    pub fn add_trace(&mut self, layer: Layer, p1: Point, p2: Point, width: f64, autoroutable: bool) -> TraceInfo {
        let mut trace = self.new_trace(layer, p1, p2, width);
        trace.autoroutable = autoroutable;
        self.state.traces.insert(trace.id, trace.clone());
        trace
    }

    /// Sets `signals` to cancelled once `traces` more traces have been drawn.
    pub fn cancel_after(&mut self, signals: Signals, traces: usize) {
        self.after_traces = Some(Trigger::new(Interrupt::Cancel, signals, traces));
        self.drawn = 0;
    }

    /// Asks the router to stop tracing once `traces` more traces have been drawn.
    pub fn stop_after(&mut self, signals: Signals, traces: usize) {
        self.after_traces = Some(Trigger::new(Interrupt::Stop, signals, traces));
        self.drawn = 0;
    }

    /// Skips the trace in progress on the `events`th call to
    /// [`RouterHost::process_events`] from now. Fires once.
    pub fn skip_trace_at(&mut self, signals: Signals, events: usize) {
        self.after_events = Some(Trigger::new(Interrupt::SkipTrace, signals, events));
        self.events = 0;
    }

    pub fn traces(&self) -> Vec<TraceInfo> {
        self.state.traces.values().cloned().collect()
    }

    pub fn parts(&self) -> Vec<PartInfo> {
        self.state.parts.values().cloned().collect()
    }

    pub fn vias(&self) -> Vec<PartInfo> {
        self.parts_of_kind(PartKind::Via)
    }

    pub fn jumpers(&self) -> Vec<PartInfo> {
        self.parts_of_kind(PartKind::Jumper)
    }

    fn parts_of_kind(&self, kind: PartKind) -> Vec<PartInfo> {
        self.state.parts.values().filter(|p| p.kind == kind).cloned().collect()
    }

    pub fn connections(&self) -> &[(ConnectorId, ConnectorId)] {
        &self.state.connections
    }

    /// Whether `a` and `b` are joined by copper or connections.
    pub fn connected(&self, a: ConnectorId, b: ConnectorId) -> bool {
        self.equal_potential(a).contains(&b)
    }

    fn new_trace(&mut self, layer: Layer, p1: Point, p2: Point, width: f64) -> TraceInfo {
        let id = TraceId(self.state.next_id());
        let ends = [ConnectorId(self.state.next_id()), ConnectorId(self.state.next_id())];
        for end in ends {
            self.state.trace_ends.insert(end, id);
        }
        TraceInfo {
            id,
            layer,
            p1,
            p2,
            width,
            ends,
            autoroutable: true,
            visible: true,
        }
    }

    fn add_router_part(&mut self, kind: PartKind, rect: RealRect) -> PartId {
        let id = PartId(self.state.next_id());
        self.state.parts.insert(
            id,
            PartInfo {
                id,
                kind,
                rect,
                visible: true,
                autoroutable: true,
            },
        );
        id
    }
}

impl RouterHost for MemoryScene {
    type Checkpoint = SceneState;

    fn board(&self) -> BoardLookup {
        match self.boards.as_slice() {
            [] => BoardLookup::Missing,
            [board] => BoardLookup::Single(board.clone()),
            _ => BoardLookup::Multiple,
        }
    }

    fn scene(&self) -> SceneSnapshot {
        SceneSnapshot {
            parts: self.state.parts.values().cloned().collect(),
            connectors: self.state.connectors.values().cloned().collect(),
            traces: self.state.traces.values().cloned().collect(),
            copper: self.state.copper.clone(),
            connections: self.state.connections.clone(),
        }
    }

    fn connector(&self, id: ConnectorId) -> Option<ConnectorInfo> {
        self.state.connectors.get(&id).cloned()
    }

    fn nets(&self) -> Vec<Vec<ConnectorId>> {
        self.nets.clone()
    }

    fn equal_potential(&self, connector: ConnectorId) -> Vec<ConnectorId> {
        let state = &self.state;
        let ids: IndexSet<ConnectorId, StableState> = state
            .connectors
            .keys()
            .chain(state.trace_ends.keys())
            .copied()
            .collect();
        let Some(start) = ids.get_index_of(&connector) else {
            return vec![connector];
        };

        let mut links: Vec<(ConnectorId, ConnectorId)> = Vec::new();
        links.extend(state.connections.iter().copied());
        links.extend(state.buses.iter().copied());
        links.extend(state.traces.values().map(|t| (t.ends[0], t.ends[1])));
        links.extend(
            state
                .connectors
                .values()
                .filter_map(|c| c.cross_layer.map(|other| (c.id, other))),
        );

        let mut sets = UnionFind::<usize>::new(ids.len());
        for (a, b) in links {
            if let (Some(a), Some(b)) = (ids.get_index_of(&a), ids.get_index_of(&b)) {
                sets.union(a, b);
            }
        }
        let root = sets.find_mut(start);
        (0..ids.len())
            .filter(|i| sets.find_mut(*i) == root)
            .filter_map(|i| ids.get_index(i).copied())
            .collect()
    }

    fn draw_trace(&mut self, p1: Point, p2: Point, width: f64, layer: Layer) -> TraceInfo {
        let trace = self.new_trace(layer, p1, p2, width);
        self.state.traces.insert(trace.id, trace.clone());

        self.drawn += 1;
        if let Some(trigger) = &mut self.after_traces {
            trigger.observe(self.drawn);
        }
        trace
    }

    fn process_events(&mut self) {
        self.events += 1;
        if let Some(trigger) = &mut self.after_events {
            trigger.observe(self.events);
        }
    }

    fn place_via(&mut self, center: Point, via: ViaSize) -> ViaInfo {
        let d = via.diameter();
        let rect = RealRect::from_center(center, d, d);
        let part = self.add_router_part(PartKind::Via, rect);
        let connectors = self.insert_through_hole(part, rect);
        ViaInfo { part, connectors }
    }

    fn place_jumper(&mut self, layer: Layer, p1: Point, p2: Point, size: JumperSize) -> JumperInfo {
        let r1 = RealRect::from_center(p1, size.width, size.height);
        let r2 = RealRect::from_center(p2, size.width, size.height);
        let part = self.add_router_part(PartKind::Jumper, r1.united(&r2));
        let a = self.insert_connector(part, layer, r1);
        let b = self.insert_connector(part, layer, r2);
        self.state.buses.push((a.id, b.id));
        JumperInfo { part, ends: [a, b] }
    }

    fn split_trace(&mut self, trace: TraceId, at: Point) -> Option<SplitTrace> {
        let original = self.state.traces.get(&trace).cloned()?;
        let mut second = self.new_trace(original.layer, at, original.p2, original.width);
        second.autoroutable = original.autoroutable;
        second.visible = original.visible;

        // The far end moves to the new piece.
        let far_end = original.ends[1];
        let new_far_end = second.ends[1];
        self.state.trace_ends.shift_remove(&new_far_end);
        second.ends[1] = far_end;
        self.state.trace_ends.insert(far_end, second.id);

        let mut first = original;
        let split_end = second.ends[0];
        first.p2 = at;
        first.ends[1] = ConnectorId(self.state.next_id());
        self.state.trace_ends.insert(first.ends[1], first.id);

        self.state.traces.insert(first.id, first.clone());
        self.state.traces.insert(second.id, second.clone());
        self.state.connections.push((first.ends[1], split_end));

        Some(SplitTrace {
            connector: first.ends[1],
            first,
            second,
        })
    }

    fn connect(&mut self, a: ConnectorId, b: ConnectorId) {
        self.state.connections.push((a, b));
    }

    fn checkpoint(&self) -> SceneState {
        self.state.clone()
    }

    fn rollback(&mut self, checkpoint: &SceneState) {
        self.state = checkpoint.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene() -> MemoryScene {
        MemoryScene::new(RealRect::new(0.0, 0.0, 500.0, 500.0))
    }

    #[test]
    fn board_lookup_counts_boards() {
        assert_eq!(MemoryScene::without_board().board(), BoardLookup::Missing);
        let mut scene = scene();
        assert!(matches!(scene.board(), BoardLookup::Single(_)));
        scene.add_board(Board {
            rect: RealRect::new(0.0, 0.0, 10.0, 10.0),
            cutouts: Vec::new(),
        });
        assert_eq!(scene.board(), BoardLookup::Multiple);
    }

    #[test]
    fn traces_and_connections_join_potentials() {
        let mut scene = scene();
        let part = scene.add_part(RealRect::new(10.0, 10.0, 200.0, 50.0));
        let a = scene.add_pad(part, Layer::Top, RealRect::new(10.0, 10.0, 30.0, 30.0));
        let b = scene.add_pad(part, Layer::Top, RealRect::new(180.0, 10.0, 200.0, 30.0));
        assert!(!scene.connected(a, b));

        let trace = scene.draw_trace(Point::new(20.0, 20.0), Point::new(190.0, 20.0), 10.0, Layer::Top);
        scene.connect(a, trace.ends[0]);
        assert!(!scene.connected(a, b));
        scene.connect(trace.ends[1], b);
        assert!(scene.connected(a, b));
        assert!(scene.equal_potential(a).contains(&trace.ends[0]));
    }

    #[test]
    fn through_hole_pads_are_one_potential() {
        let mut scene = scene();
        let part = scene.add_part(RealRect::new(10.0, 10.0, 50.0, 50.0));
        let [bottom, top] = scene.add_through_hole_pad(part, RealRect::new(10.0, 10.0, 30.0, 30.0));
        assert!(scene.connected(bottom, top));
        assert_eq!(scene.connector(bottom).unwrap().cross_layer, Some(top));
    }

    #[test]
    fn split_trace_keeps_both_ends_connected() {
        let mut scene = scene();
        let trace = scene.add_trace(Layer::Bottom, Point::new(0.0, 100.0), Point::new(200.0, 100.0), 10.0, false);
        let split = scene.split_trace(trace.id, Point::new(80.0, 100.0)).unwrap();

        assert_eq!(split.first.p2, Point::new(80.0, 100.0));
        assert_eq!(split.second.p1, Point::new(80.0, 100.0));
        assert_eq!(split.second.ends[1], trace.ends[1]);
        assert!(!split.second.autoroutable);
        assert_eq!(scene.traces().len(), 2);
        assert!(scene.connected(trace.ends[0], trace.ends[1]));
        assert!(scene.connected(split.connector, trace.ends[1]));
        assert!(scene.split_trace(TraceId(9999), Point::new(0.0, 0.0)).is_none());
    }

    #[test]
    fn rollback_restores_the_checkpoint() {
        let mut scene = scene();
        let checkpoint = scene.checkpoint();
        scene.draw_trace(Point::new(0.0, 0.0), Point::new(10.0, 0.0), 5.0, Layer::Top);
        scene.place_via(
            Point::new(50.0, 50.0),
            ViaSize {
                ring_thickness: 5.0,
                hole_size: 10.0,
            },
        );
        assert_eq!(scene.traces().len(), 1);
        assert_eq!(scene.vias().len(), 1);
        scene.rollback(&checkpoint);
        assert!(scene.traces().is_empty());
        assert!(scene.vias().is_empty());
    }

    #[test]
    fn jumper_ends_share_a_potential() {
        let mut scene = scene();
        let jumper = scene.place_jumper(
            Layer::Top,
            Point::new(50.0, 50.0),
            Point::new(150.0, 50.0),
            JumperSize {
                width: 20.0,
                height: 20.0,
            },
        );
        assert!(scene.connected(jumper.ends[0].id, jumper.ends[1].id));
        assert_eq!(scene.jumpers().len(), 1);
    }

    #[test]
    fn scripted_cancel_fires_after_n_traces() {
        let mut scene = scene();
        let signals = Signals::default();
        scene.cancel_after(signals.clone(), 2);
        scene.draw_trace(Point::new(0.0, 0.0), Point::new(10.0, 0.0), 5.0, Layer::Top);
        assert!(!signals.is_cancelled());
        scene.draw_trace(Point::new(0.0, 10.0), Point::new(10.0, 10.0), 5.0, Layer::Top);
        assert!(signals.is_cancelled());
    }

    #[test]
    fn scripted_skip_fires_once_on_the_nth_event() {
        let mut scene = scene();
        let signals = Signals::default();
        scene.skip_trace_at(signals.clone(), 2);
        scene.process_events();
        assert!(!signals.is_trace_skipped());
        scene.process_events();
        assert!(signals.is_trace_skipped());

        signals.reset();
        scene.process_events();
        assert!(!signals.is_trace_skipped());
    }

    #[test]
    fn scripted_stop_leaves_cancel_alone() {
        let mut scene = scene();
        let signals = Signals::default();
        scene.stop_after(signals.clone(), 1);
        scene.draw_trace(Point::new(0.0, 0.0), Point::new(10.0, 0.0), 5.0, Layer::Top);
        assert!(signals.is_stopped());
        assert!(!signals.is_cancelled());
    }
}
