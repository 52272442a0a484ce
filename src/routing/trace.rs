use std::fs;
use std::path::Path;

use serde_json::json;

use crate::error::RouterError;

use super::pass::CycleResult;
use super::types::{Edge, RoutingReport};

/// Collects what each cycle did, for writing out as a JSON document.
#[derive(Debug, Default)]
pub(crate) struct RoutingTrace {
    edges: Vec<serde_json::Value>,
    cycles: Vec<serde_json::Value>,
}

impl RoutingTrace {
    pub(crate) fn new(edges: &[Edge]) -> Self {
        RoutingTrace {
            edges: edges
                .iter()
                .map(|e| {
                    json!({
                        "id": e.id,
                        "from": e.from.0,
                        "to": e.to.0,
                        "p1": { "x": e.p1.x, "y": e.p1.y },
                        "p2": { "x": e.p2.x, "y": e.p2.y },
                        "distance": e.distance,
                    })
                })
                .collect(),
            cycles: Vec::new(),
        }
    }

    pub(crate) fn record_cycle(&mut self, cycle: usize, order: &[usize], result: &CycleResult, best: bool) {
        let outcomes: Vec<serde_json::Value> = order
            .iter()
            .filter_map(|ix| result.results.get(*ix).map(|r| (ix, r)))
            .map(|(ix, r)| {
                json!({
                    "edge": ix,
                    "routed": r.routed,
                    "jumper": r.with_jumper,
                    "vias": r.vias,
                })
            })
            .collect();
        let traces: Vec<serde_json::Value> = result
            .traces
            .iter()
            .map(|(t, edge)| {
                json!({
                    "edge": edge,
                    "layer": format!("{:?}", t.layer),
                    "p1": { "x": t.p1.x, "y": t.p1.y },
                    "p2": { "x": t.p2.x, "y": t.p2.y },
                    "width": t.width,
                })
            })
            .collect();

        self.cycles.push(json!({
            "cycle": cycle,
            "order": order,
            "score": {
                "unrouted": result.score.unrouted,
                "jumpers": result.score.jumpers,
                "vias": result.score.vias,
                "total_vias": result.score.total_vias,
                "value": result.score.score(),
            },
            "all_done": result.all_done,
            "best": best,
            "edges": outcomes,
            "traces": traces,
        }));
    }

    pub(crate) fn write(self, path: &Path, report: &RoutingReport) -> Result<(), RouterError> {
        let document = json!({
            "edges": self.edges,
            "cycles": self.cycles,
            "report": report,
        });
        let serialized = serde_json::to_string_pretty(&document)
            .map_err(|e| RouterError::TraceOutput(format!("routing trace: {e}")))?;
        fs::write(path, serialized).map_err(|e| RouterError::TraceOutput(format!("{}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "wrote routing trace");
        Ok(())
    }
}
