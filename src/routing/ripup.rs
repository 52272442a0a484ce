use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rstar::{RTree, RTreeObject, AABB};

use crate::geometry::{segment_distance, Point};
use crate::host::TraceInfo;

use super::types::{Edge, EdgeResult};

/// A trace drawn during a cycle, indexed by its bounding box.
struct DrawnSegment {
    p1: Point,
    p2: Point,
    width: f64,
    edge: usize,
}

impl RTreeObject for DrawnSegment {
    type Envelope = AABB<Point>;

    fn envelope(&self) -> Self::Envelope {
        let half = self.width / 2.0;
        AABB::from_corners(
            Point::new(self.p1.x.min(self.p2.x) - half, self.p1.y.min(self.p2.y) - half),
            Point::new(self.p1.x.max(self.p2.x) + half, self.p1.y.max(self.p2.y) + half),
        )
    }
}

/// Hash of an edge ordering, used to recognise orderings already tried.
pub(crate) fn fingerprint(order: &[usize]) -> u64 {
    let mut hasher = DefaultHasher::new();
    order.len().hash(&mut hasher);
    for id in order {
        id.hash(&mut hasher);
    }
    hasher.finish()
}

/// Moves every edge that failed, or needed a jumper or a via, to just before
/// the earliest edge whose traces cross its ratsnest line. Returns `None`
/// when nothing moved.
pub(crate) fn reorder_edges(
    edges: &[Edge],
    order: &[usize],
    results: &[EdgeResult],
    traces: &[(TraceInfo, usize)],
    trace_width: f64,
) -> Option<Vec<usize>> {
    let tree = RTree::bulk_load(
        traces
            .iter()
            .map(|(t, edge)| DrawnSegment {
                p1: t.p1,
                p2: t.p2,
                width: t.width,
                edge: *edge,
            })
            .collect(),
    );

    let mut middle = order.to_vec();
    let mut reordered = false;
    let mut ix = 0;
    while ix < middle.len() {
        let id = middle[ix];
        ix += 1;
        let Some(edge) = edges.get(id) else {
            continue;
        };
        if results.get(id).map_or(false, |r| r.clean()) {
            continue;
        }

        let half = trace_width / 2.0;
        let line = AABB::from_corners(
            Point::new(edge.p1.x.min(edge.p2.x) - half, edge.p1.y.min(edge.p2.y) - half),
            Point::new(edge.p1.x.max(edge.p2.x) + half, edge.p1.y.max(edge.p2.y) + half),
        );
        let min_index = tree
            .locate_in_envelope_intersecting(&line)
            .filter(|s| s.edge != id)
            .filter(|s| segment_distance(edge.p1, edge.p2, s.p1, s.p2) <= (s.width + trace_width) / 2.0)
            .filter_map(|s| middle.iter().position(|e| *e == s.edge))
            .min();

        if let Some(min_index) = min_index {
            if min_index + 1 < ix {
                tracing::debug!(edge = id, from = ix - 1, to = min_index, "moving edge earlier");
                middle.remove(ix - 1);
                middle.insert(min_index, id);
                reordered = true;
            }
        }
    }

    reordered.then_some(middle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{ConnectorId, Layer, TraceId};
    use rstest::rstest;

    fn edge(id: usize, p1: Point, p2: Point) -> Edge {
        Edge {
            id,
            from: ConnectorId(2 * id as u64),
            to: ConnectorId(2 * id as u64 + 1),
            p1,
            p2,
            distance: p1.distance_sqrd(&p2),
        }
    }

    fn trace(p1: Point, p2: Point) -> TraceInfo {
        TraceInfo {
            id: TraceId(0),
            layer: Layer::Bottom,
            p1,
            p2,
            width: 10.0,
            ends: [ConnectorId(100), ConnectorId(101)],
            autoroutable: true,
            visible: true,
        }
    }

    fn routed() -> EdgeResult {
        EdgeResult {
            routed: true,
            ..Default::default()
        }
    }

    #[test]
    fn blocked_edge_moves_before_the_edge_in_its_way() {
        // The trace drawn for edge 0 cuts straight across edge 1's line.
        let edges = vec![
            edge(0, Point::new(100.0, 0.0), Point::new(100.0, 200.0)),
            edge(1, Point::new(0.0, 100.0), Point::new(200.0, 100.0)),
        ];
        let traces = vec![(trace(Point::new(100.0, 0.0), Point::new(100.0, 200.0)), 0)];
        let results = vec![routed(), EdgeResult::default()];
        let order = reorder_edges(&edges, &[0, 1], &results, &traces, 10.0);
        assert_eq!(order, Some(vec![1, 0]));
    }

    #[rstest]
    #[case::all_clean(vec![routed(), routed()])]
    #[case::nothing_in_the_way(vec![routed(), EdgeResult { vias: 1, ..routed() }])]
    fn unchanged_orderings_are_not_offered(#[case] results: Vec<EdgeResult>) {
        let edges = vec![
            edge(0, Point::new(0.0, 0.0), Point::new(50.0, 0.0)),
            edge(1, Point::new(0.0, 300.0), Point::new(50.0, 300.0)),
        ];
        let traces = vec![(trace(Point::new(0.0, 0.0), Point::new(50.0, 0.0)), 0)];
        assert_eq!(reorder_edges(&edges, &[0, 1], &results, &traces, 10.0), None);
    }

    #[test]
    fn fingerprints_follow_the_order() {
        assert_eq!(fingerprint(&[0, 1, 2]), fingerprint(&[0, 1, 2]));
        assert_ne!(fingerprint(&[0, 1, 2]), fingerprint(&[1, 0, 2]));
    }
}
