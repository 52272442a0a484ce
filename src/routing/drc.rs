//! Design rule check: copper that overlaps, or comes closer than the
//! clearance, on the same layer.

use indexmap::IndexSet;
use serde::Serialize;

use crate::config::{RouterConfig, RoutingMode, Widths};
use crate::error::RouterError;
use crate::host::{BoardLookup, Layer, PartId, RouterHost};
use crate::StableState;

use super::builder::{Overlap, OverlapPolicy, Tiling, TilingOptions};

const NO_BOARD: &str =
    "The Design Rule Check (DRC) was cancelled, because it could not find a board (or it found more than one).";
const CLEAN: &str =
    "Your sketch is ready for production: there are no connectors or traces that overlap or are too close together.";
const OVERLAPS: &str = "The areas on your board highlighted in red are connectors and traces which overlap or are too close together. Reposition them and run the DRC again to find more problems.";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DrcReport {
    pub ok: bool,
    pub message: String,
    pub overlaps: Vec<Overlap>,
    pub off_board_parts: usize,
}

impl DrcReport {
    fn failed(message: String) -> Self {
        DrcReport {
            ok: false,
            message,
            overlaps: Vec::new(),
            off_board_parts: 0,
        }
    }
}

/// Checks every copper layer of the board in `host`.
///
/// Connectors of different parts may not come within the DRC clearance of
/// each other; traces may touch copper they are connected to.
#[tracing::instrument(skip_all)]
pub fn drc<H: RouterHost>(host: &H, config: &RouterConfig) -> Result<DrcReport, RouterError> {
    config.validate()?;
    let board = match host.board() {
        BoardLookup::Single(board) => board,
        lookup => {
            tracing::warn!(?lookup, "no single board to check");
            return Ok(DrcReport::failed(NO_BOARD.to_string()));
        }
    };

    let layers: &[Layer] = if config.both_layers {
        &Layer::ALL
    } else {
        &[Layer::Bottom]
    };
    let narrowest = host
        .scene()
        .connectors
        .iter()
        .map(|c| c.min_dimension())
        .fold(f64::INFINITY, f64::min);
    let width = config.fitted_trace_width(narrowest);
    let options = TilingOptions {
        connectors: OverlapPolicy::Report,
        wires: OverlapPolicy::AllowEquipotential,
        eliminate_thin: false,
        combine_planes: false,
    };

    let tiling = match Tiling::build(
        host,
        RoutingMode::Pcb,
        layers,
        Some(&board),
        Widths::new(width),
        config.drc_keepout(),
        options,
    ) {
        Ok(tiling) => tiling,
        Err(e @ RouterError::WireCrossesLayers { .. }) => {
            tracing::warn!(error = %e, "tiling failed");
            return Ok(DrcReport::failed(e.to_string()));
        }
        Err(e) => return Err(e),
    };

    let off_board_parts = off_board_parts(&tiling);
    let ok = tiling.overlaps.is_empty();
    let mut message = if ok { CLEAN } else { OVERLAPS }.to_string();
    if off_board_parts > 0 {
        message.push_str(&format!(
            "\n\nNote: {off_board_parts} parts are not located entirely on the board."
        ));
    }
    tracing::info!(ok, overlaps = tiling.overlaps.len(), off_board_parts, "design rule check done");

    Ok(DrcReport {
        ok,
        message,
        overlaps: tiling.overlaps,
        off_board_parts,
    })
}

fn off_board_parts(tiling: &Tiling) -> usize {
    let parts: IndexSet<PartId, StableState> = tiling
        .off_board
        .iter()
        .filter_map(|c| tiling.scene.connectors.get(c).map(|c| c.part))
        .collect();
    parts.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Point, RealRect};
    use crate::host::Board;
    use crate::scene::MemoryScene;
    use rstest::rstest;

    fn scene() -> MemoryScene {
        MemoryScene::new(RealRect::new(0.0, 0.0, 500.0, 500.0))
    }

    fn pad_at(scene: &mut MemoryScene, x: f64) -> crate::host::ConnectorId {
        let part = scene.add_part(RealRect::new(x, 100.0, x + 40.0, 140.0));
        scene.add_pad(part, Layer::Bottom, RealRect::new(x + 10.0, 110.0, x + 30.0, 130.0))
    }

    #[rstest]
    #[case::overlapping(105.0, false)]
    #[case::too_close(135.0, false)]
    #[case::apart(250.0, true)]
    fn pads_of_different_parts(#[case] second: f64, #[case] ok: bool) {
        let mut scene = scene();
        pad_at(&mut scene, 100.0);
        pad_at(&mut scene, second);
        let report = drc(&scene, &RouterConfig::default()).unwrap();
        assert_eq!(report.ok, ok, "{}", report.message);
        assert_eq!(report.overlaps.is_empty(), ok);
    }

    #[test]
    fn connected_trace_may_touch_its_pad() {
        let mut scene = scene();
        let a = pad_at(&mut scene, 100.0);
        let b = pad_at(&mut scene, 300.0);
        let trace = scene.add_trace(Layer::Bottom, Point::new(120.0, 120.0), Point::new(320.0, 120.0), 10.0, true);
        scene.connect(a, trace.ends[0]);
        scene.connect(trace.ends[1], b);
        let report = drc(&scene, &RouterConfig::default()).unwrap();
        assert!(report.ok, "{}", report.message);
    }

    #[test]
    fn stray_trace_over_a_pad_is_reported() {
        let mut scene = scene();
        pad_at(&mut scene, 100.0);
        scene.add_trace(Layer::Bottom, Point::new(50.0, 120.0), Point::new(200.0, 120.0), 10.0, true);
        let report = drc(&scene, &RouterConfig::default()).unwrap();
        assert!(!report.ok);
        assert!(report.message.starts_with("The areas on your board"));
    }

    #[test]
    fn missing_or_ambiguous_board_cancels_the_check() {
        let report = drc(&MemoryScene::without_board(), &RouterConfig::default()).unwrap();
        assert!(!report.ok);
        assert_eq!(report.message, NO_BOARD);

        let mut scene = scene();
        scene.add_board(Board {
            rect: RealRect::new(0.0, 0.0, 10.0, 10.0),
            cutouts: Vec::new(),
        });
        assert!(!drc(&scene, &RouterConfig::default()).unwrap().ok);
    }

    #[test]
    fn off_board_parts_are_noted() {
        let mut scene = scene();
        pad_at(&mut scene, 100.0);
        pad_at(&mut scene, 480.0);
        let report = drc(&scene, &RouterConfig::default()).unwrap();
        assert!(report.ok);
        assert_eq!(report.off_board_parts, 1);
        assert!(report.message.ends_with("Note: 1 parts are not located entirely on the board."));
    }
}
