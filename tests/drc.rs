use tileroute_core::geometry::{Point, RealRect};
use tileroute_core::host::{ConnectorId, Layer};
use tileroute_core::{drc, MemoryScene, RouterConfig};

fn config() -> RouterConfig {
    RouterConfig {
        trace_width: 10.0,
        keepout: 5.0,
        drc_keepout: Some(5.0),
        ..RouterConfig::default()
    }
}

fn pad(scene: &mut MemoryScene, layer: Layer, center: Point) -> ConnectorId {
    let part = scene.add_part(RealRect::from_center(center, 30.0, 30.0));
    scene.add_pad(part, layer, RealRect::from_center(center, 20.0, 20.0))
}

#[test]
fn overlapping_pads_fail_and_separated_pads_pass() {
    let board = RealRect::new(0.0, 0.0, 400.0, 400.0);

    let mut overlapping = MemoryScene::new(board);
    pad(&mut overlapping, Layer::Bottom, Point::new(100.0, 100.0));
    pad(&mut overlapping, Layer::Bottom, Point::new(110.0, 100.0));
    let report = drc(&overlapping, &config()).unwrap();
    assert!(!report.ok);
    assert!(report.overlaps.iter().all(|o| o.layer == Layer::Bottom));

    // Twice the clearance plus a margin between the pad edges.
    let mut apart = MemoryScene::new(board);
    pad(&mut apart, Layer::Bottom, Point::new(100.0, 100.0));
    pad(&mut apart, Layer::Bottom, Point::new(131.0, 100.0));
    let report = drc(&apart, &config()).unwrap();
    assert!(report.ok, "{}", report.message);
    assert!(report.overlaps.is_empty());
}

#[test]
fn pads_on_different_layers_do_not_clash() {
    let mut scene = MemoryScene::new(RealRect::new(0.0, 0.0, 400.0, 400.0));
    pad(&mut scene, Layer::Bottom, Point::new(100.0, 100.0));
    pad(&mut scene, Layer::Top, Point::new(100.0, 100.0));
    assert!(drc(&scene, &config()).unwrap().ok);
}

#[test]
fn single_sided_check_ignores_the_top_layer() {
    let mut scene = MemoryScene::new(RealRect::new(0.0, 0.0, 400.0, 400.0));
    pad(&mut scene, Layer::Top, Point::new(100.0, 100.0));
    pad(&mut scene, Layer::Top, Point::new(105.0, 100.0));
    let single = RouterConfig {
        both_layers: false,
        ..config()
    };
    assert!(drc(&scene, &single).unwrap().ok);
    assert!(!drc(&scene, &config()).unwrap().ok);
}
