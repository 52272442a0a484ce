//! The router's view of the application it routes for.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::geometry::{Point, RealRect};

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct ConnectorId(pub u64);

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct TraceId(pub u64);

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct PartId(pub u64);

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub enum Layer {
    Bottom,
    Top,
}

impl Layer {
    pub const ALL: [Layer; 2] = [Layer::Bottom, Layer::Top];

    pub fn other(self) -> Layer {
        match self {
            Layer::Bottom => Layer::Top,
            Layer::Top => Layer::Bottom,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum PartKind {
    Regular,
    Via,
    Jumper,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartInfo {
    pub id: PartId,
    pub kind: PartKind,
    pub rect: RealRect,
    pub visible: bool,
    /// Vias and jumpers the router placed itself.
    pub autoroutable: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectorInfo {
    pub id: ConnectorId,
    pub part: PartId,
    pub layer: Layer,
    pub rect: RealRect,
    /// Where a trace attaches.
    pub terminal: Point,
    /// The same pad on the other copper layer, for through-hole parts and vias.
    pub cross_layer: Option<ConnectorId>,
}

impl ConnectorInfo {
    pub fn min_dimension(&self) -> f64 {
        self.rect.min_dimension()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceInfo {
    pub id: TraceId,
    pub layer: Layer,
    pub p1: Point,
    pub p2: Point,
    pub width: f64,
    /// Connectors at `p1` and `p2`.
    pub ends: [ConnectorId; 2],
    pub autoroutable: bool,
    pub visible: bool,
}

/// Copper that belongs to a part but is not a connector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CopperInfo {
    pub part: PartId,
    pub layer: Layer,
    pub rect: RealRect,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub rect: RealRect,
    /// Areas inside `rect` that are not board, such as the corners of a
    /// non-rectangular outline.
    pub cutouts: Vec<RealRect>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum BoardLookup {
    Missing,
    Single(Board),
    Multiple,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneSnapshot {
    pub parts: Vec<PartInfo>,
    pub connectors: Vec<ConnectorInfo>,
    pub traces: Vec<TraceInfo>,
    pub copper: Vec<CopperInfo>,
    pub connections: Vec<(ConnectorId, ConnectorId)>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ViaInfo {
    pub part: PartId,
    /// Bottom and top connectors.
    pub connectors: [ConnectorInfo; 2],
}

#[derive(Clone, Debug, PartialEq)]
pub struct JumperInfo {
    pub part: PartId,
    pub ends: [ConnectorInfo; 2],
}

#[derive(Clone, Debug, PartialEq)]
pub struct SplitTrace {
    /// The new connector at the split point.
    pub connector: ConnectorId,
    pub first: TraceInfo,
    pub second: TraceInfo,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Progress {
    pub cycle: usize,
    pub max_cycles: usize,
    pub edges_done: usize,
    pub edges_total: usize,
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerVisibility {
    Both,
    Only(Layer),
}

/// Cancellation flags shared between the host and a running router.
///
/// `cancel` aborts and restores the original design, `skip_trace` abandons
/// the edge being searched, `stop_tracing` keeps what has been routed and
/// ends the current cycle.
#[derive(Clone, Debug, Default)]
pub struct Signals {
    cancel: Arc<AtomicBool>,
    skip_trace: Arc<AtomicBool>,
    stop_tracing: Arc<AtomicBool>,
}

impl Signals {
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn skip_trace(&self) {
        self.skip_trace.store(true, Ordering::Relaxed);
    }

    pub fn stop_tracing(&self) {
        self.stop_tracing.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn is_trace_skipped(&self) -> bool {
        self.skip_trace.load(Ordering::Relaxed)
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_tracing.load(Ordering::Relaxed)
    }

    pub(crate) fn interrupted(&self) -> bool {
        self.is_cancelled() || self.is_trace_skipped() || self.is_stopped()
    }

    pub(crate) fn clear_skip_trace(&self) {
        self.skip_trace.store(false, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.cancel.store(false, Ordering::Relaxed);
        self.skip_trace.store(false, Ordering::Relaxed);
        self.stop_tracing.store(false, Ordering::Relaxed);
    }
}

/// What the router needs from the application holding the design.
///
/// Reads are snapshots; the router only changes the design through
/// `draw_trace`, `place_via`, `place_jumper`, `split_trace`, `connect` and
/// `rollback`.
pub trait RouterHost {
    type Checkpoint;

    fn board(&self) -> BoardLookup;

    fn scene(&self) -> SceneSnapshot;

    fn connector(&self, id: ConnectorId) -> Option<ConnectorInfo>;

    /// Groups of part connectors that must end up connected.
    fn nets(&self) -> Vec<Vec<ConnectorId>>;

    /// Every connector electrically joined to `connector`, itself included,
    /// following traces, vias, jumpers and cross-layer pads.
    fn equal_potential(&self, connector: ConnectorId) -> Vec<ConnectorId>;

    /// Connections still needed to join `net`.
    fn ratsnest(&self, net: &[ConnectorId]) -> Vec<(ConnectorId, ConnectorId)>
    where
        Self: Sized,
    {
        crate::routing::nets::minimum_ratsnest(self, net)
    }

    fn draw_trace(&mut self, p1: Point, p2: Point, width: f64, layer: Layer) -> TraceInfo;

    fn place_via(&mut self, center: Point, via: crate::config::ViaSize) -> ViaInfo;

    fn place_jumper(&mut self, layer: Layer, p1: Point, p2: Point, size: crate::config::JumperSize) -> JumperInfo;

    /// Cuts `trace` in two at `at`. `None` when the trace is unknown.
    fn split_trace(&mut self, trace: TraceId, at: Point) -> Option<SplitTrace>;

    fn connect(&mut self, a: ConnectorId, b: ConnectorId);

    fn checkpoint(&self) -> Self::Checkpoint;

    fn rollback(&mut self, checkpoint: &Self::Checkpoint);

    fn process_events(&mut self) {}

    fn progress(&mut self, _progress: &Progress) {}

    fn show_layers(&mut self, _layers: LayerVisibility) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signals_are_shared_between_clones() {
        let host_side = Signals::default();
        let router_side = host_side.clone();
        host_side.skip_trace();
        assert!(router_side.interrupted());
        router_side.clear_skip_trace();
        assert!(!host_side.is_trace_skipped());

        host_side.cancel();
        host_side.stop_tracing();
        assert!(router_side.is_cancelled() && router_side.is_stopped());
        router_side.reset();
        assert!(!host_side.interrupted());
    }
}
