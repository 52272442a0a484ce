//! From net groups to the ordered list of edges the router works through.

use hashbrown::HashSet;
use indexmap::IndexSet;
use petgraph::algo::min_spanning_tree;
use petgraph::data::Element;
use petgraph::graph::UnGraph;

use crate::config::RoutingMode;
use crate::host::{Board, ConnectorId, ConnectorInfo, Layer, PartId, RouterHost};
use crate::StableState;

use super::builder::routing_area;
use super::types::Edge;

/// Connections still needed to join `net`: a minimum spanning tree over the
/// net's equipotential islands, each tree edge joining the closest pair of
/// connectors of its two islands.
pub fn minimum_ratsnest<H: RouterHost>(host: &H, net: &[ConnectorId]) -> Vec<(ConnectorId, ConnectorId)> {
    let members: IndexSet<ConnectorId, StableState> = net.iter().copied().collect();
    let mut islands: Vec<Vec<ConnectorInfo>> = Vec::new();
    let mut seen: HashSet<ConnectorId, StableState> = HashSet::default();
    for id in &members {
        if seen.contains(id) {
            continue;
        }
        let island: Vec<ConnectorInfo> = host
            .equal_potential(*id)
            .into_iter()
            .filter(|c| members.contains(c) && seen.insert(*c))
            .filter_map(|c| host.connector(c))
            .collect();
        if !island.is_empty() {
            islands.push(island);
        }
    }
    if islands.len() < 2 {
        return Vec::new();
    }

    let mut graph = UnGraph::<usize, (f64, ConnectorId, ConnectorId)>::new_undirected();
    let nodes: Vec<_> = (0..islands.len()).map(|ix| graph.add_node(ix)).collect();
    for i in 0..islands.len() {
        for j in i + 1..islands.len() {
            if let Some(closest) = closest_pair(&islands[i], &islands[j]) {
                graph.add_edge(nodes[i], nodes[j], closest);
            }
        }
    }

    min_spanning_tree(&graph)
        .filter_map(|element| match element {
            Element::Edge { weight: (_, a, b), .. } => Some((a, b)),
            Element::Node { .. } => None,
        })
        .collect()
}

fn closest_pair(a: &[ConnectorInfo], b: &[ConnectorInfo]) -> Option<(f64, ConnectorId, ConnectorId)> {
    a.iter()
        .flat_map(|ca| b.iter().map(move |cb| (ca.terminal.distance_sqrd(&cb.terminal), ca.id, cb.id)))
        .min_by(|x, y| x.0.total_cmp(&y.0))
}

/// The edges to route, shortest first, and the number of parts left out
/// because they are not on the board.
pub(crate) fn collect_edges<H: RouterHost>(
    host: &H,
    mode: RoutingMode,
    board: Option<&Board>,
    layers: &[Layer],
) -> (Vec<Edge>, usize) {
    let max_rect = routing_area(mode, board, &host.scene());
    let mut off_board: IndexSet<PartId, StableState> = IndexSet::default();
    let mut edges = Vec::new();

    for net in host.nets() {
        for (a, b) in host.ratsnest(&net) {
            let (Some(from), Some(to)) = (on_layers(host, mode, layers, a), on_layers(host, mode, layers, b)) else {
                tracing::debug!(from = a.0, to = b.0, "no connector on a routed layer");
                continue;
            };
            let mut outside = false;
            for c in [&from, &to] {
                if !max_rect.contains_rect(&c.rect) {
                    off_board.insert(c.part);
                    outside = true;
                }
            }
            if outside {
                continue;
            }
            edges.push(Edge {
                id: 0,
                from: from.id,
                to: to.id,
                p1: from.terminal,
                p2: to.terminal,
                distance: from.terminal.distance_sqrd(&to.terminal),
            });
        }
    }

    edges.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    for (ix, edge) in edges.iter_mut().enumerate() {
        edge.id = ix;
    }
    if !off_board.is_empty() {
        tracing::info!(parts = off_board.len(), "parts not entirely on the board are not routed");
    }
    (edges, off_board.len())
}

/// `id`, or its counterpart on the other layer when `id` sits on a layer
/// that is not being routed.
fn on_layers<H: RouterHost>(host: &H, mode: RoutingMode, layers: &[Layer], id: ConnectorId) -> Option<ConnectorInfo> {
    let connector = host.connector(id)?;
    if mode == RoutingMode::Schematic || layers.contains(&connector.layer) {
        return Some(connector);
    }
    let other = host.connector(connector.cross_layer?)?;
    layers.contains(&other.layer).then_some(other)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Point, RealRect};
    use crate::scene::MemoryScene;

    fn scene() -> MemoryScene {
        MemoryScene::new(RealRect::new(0.0, 0.0, 1000.0, 1000.0))
    }

    fn pad(scene: &mut MemoryScene, x: f64, y: f64) -> ConnectorId {
        let part = scene.add_part(RealRect::new(x - 20.0, y - 20.0, x + 20.0, y + 20.0));
        scene.add_pad(part, Layer::Bottom, RealRect::new(x - 10.0, y - 10.0, x + 10.0, y + 10.0))
    }

    fn board(scene: &MemoryScene) -> Board {
        match scene.board() {
            crate::host::BoardLookup::Single(board) => board,
            other => panic!("expected one board, got {other:?}"),
        }
    }

    #[test]
    fn ratsnest_spans_the_net_with_short_links() {
        let mut scene = scene();
        let a = pad(&mut scene, 100.0, 100.0);
        let b = pad(&mut scene, 200.0, 100.0);
        let c = pad(&mut scene, 900.0, 100.0);
        let links = minimum_ratsnest(&scene, &[a, b, c]);
        assert_eq!(links.len(), 2);
        let has = |x: ConnectorId, y: ConnectorId| links.iter().any(|l| *l == (x, y) || *l == (y, x));
        assert!(has(a, b));
        assert!(has(b, c));
        assert!(!has(a, c));
    }

    #[test]
    fn connected_islands_need_no_links() {
        let mut scene = scene();
        let a = pad(&mut scene, 100.0, 100.0);
        let b = pad(&mut scene, 200.0, 100.0);
        scene.connect(a, b);
        assert!(minimum_ratsnest(&scene, &[a, b]).is_empty());
    }

    #[test]
    fn edges_come_shortest_first() {
        let mut scene = scene();
        let a = pad(&mut scene, 100.0, 100.0);
        let b = pad(&mut scene, 500.0, 100.0);
        let c = pad(&mut scene, 100.0, 300.0);
        let d = pad(&mut scene, 150.0, 300.0);
        scene.add_net(&[a, b]);
        scene.add_net(&[c, d]);
        let board = board(&scene);
        let (edges, off_board) = collect_edges(&scene, RoutingMode::Pcb, Some(&board), &[Layer::Bottom, Layer::Top]);
        assert_eq!(off_board, 0);
        assert_eq!(edges.len(), 2);
        assert_eq!((edges[0].id, edges[1].id), (0, 1));
        assert!(edges[0].distance < edges[1].distance);
        assert_eq!(edges[0].p1.distance(&edges[0].p2), 50.0);
    }

    #[test]
    fn off_board_parts_are_counted_not_routed() {
        let mut scene = scene();
        let a = pad(&mut scene, 100.0, 100.0);
        let b = pad(&mut scene, 995.0, 100.0);
        scene.add_net(&[a, b]);
        let board = board(&scene);
        let (edges, off_board) = collect_edges(&scene, RoutingMode::Pcb, Some(&board), &[Layer::Bottom]);
        assert!(edges.is_empty());
        assert_eq!(off_board, 1);
    }

    #[test]
    fn top_pads_move_to_their_bottom_twin() {
        let mut scene = scene();
        let part = scene.add_part(RealRect::new(80.0, 80.0, 120.0, 120.0));
        let [bottom, top] = scene.add_through_hole_pad(part, RealRect::new(90.0, 90.0, 110.0, 110.0));
        let other = pad(&mut scene, 300.0, 100.0);
        scene.add_net(&[top, other]);
        let board = board(&scene);
        let (edges, _) = collect_edges(&scene, RoutingMode::Pcb, Some(&board), &[Layer::Bottom]);
        assert_eq!(edges.len(), 1);
        let ends = [edges[0].from, edges[0].to];
        assert!(ends.contains(&bottom));
        assert!(!ends.contains(&top));
        assert_eq!(edges[0].p1.distance(&edges[0].p2), Point::new(100.0, 100.0).distance(&Point::new(300.0, 100.0)));
    }
}
