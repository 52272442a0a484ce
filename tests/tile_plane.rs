use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tileroute_core::geometry::{manhattan_gap, real_to_tile, tile_to_real, TileRect};
use tileroute_core::tile::{Body, Plane, TileType};

const SIZE: i32 = 10_000;

fn random_rect(rng: &mut StdRng) -> TileRect {
    let x = rng.gen_range(0..SIZE - 10);
    let y = rng.gen_range(0..SIZE - 10);
    let w = rng.gen_range(1..=(SIZE - x).min(2_000));
    let h = rng.gen_range(1..=(SIZE - y).min(2_000));
    TileRect::new(x, y, x + w, y + h)
}

fn assert_exact_cover(plane: &Plane) {
    let bounds = plane.bounds();
    let rects: Vec<TileRect> = plane
        .tiles_in(&bounds)
        .into_iter()
        .filter(|t| !plane.tile_type(*t).is_sentinel())
        .map(|t| plane.rect(t))
        .collect();

    let covered: i64 = rects.iter().map(|r| r.area()).sum();
    assert_eq!(covered, bounds.area());
    for (i, a) in rects.iter().enumerate() {
        assert!(bounds.contains_rect(a), "{a:?} sticks out of {bounds:?}");
        for b in &rects[i + 1..] {
            assert!(a.intersection(b).is_none(), "{a:?} overlaps {b:?}");
        }
    }
}

#[test]
fn random_disjoint_inserts_keep_an_exact_cover() {
    for seed in 0..20 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut plane = Plane::new(TileRect::new(0, 0, SIZE, SIZE), TileType::Space);
        let mut placed: Vec<(TileRect, TileType)> = Vec::new();

        for _ in 0..60 {
            let rect = random_rect(&mut rng);
            if placed.iter().any(|(p, _)| p.intersection(&rect).is_some()) {
                continue;
            }
            let kind = if rng.gen_bool(0.5) {
                TileType::Obstacle
            } else {
                TileType::Space2
            };
            let t = plane.insert(rect, kind, Body::None).expect("rect is inside the plane");
            assert!(plane.rect(t).contains(rect.xmin, rect.ymin));
            assert_eq!(plane.tile_type(t), kind);
            placed.push((rect, kind));
            plane.verify().unwrap_or_else(|e| panic!("seed {seed}: {e}"));
        }

        assert_exact_cover(&plane);
        for (rect, kind) in &placed {
            for (x, y) in [(rect.xmin, rect.ymin), rect.center(), (rect.xmax - 1, rect.ymax - 1)] {
                assert_eq!(plane.tile_type(plane.point_search(x, y)), *kind);
            }
        }
    }
}

#[test]
fn overlapping_inserts_keep_an_exact_cover() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut plane = Plane::new(TileRect::new(0, 0, SIZE, SIZE), TileType::Space);
    for _ in 0..200 {
        let rect = random_rect(&mut rng);
        plane.insert(rect, TileType::Obstacle, Body::None);
        plane.verify().unwrap();
    }
    assert_exact_cover(&plane);
}

#[test]
fn clearing_everything_leaves_a_single_space_tile() {
    let mut rng = StdRng::seed_from_u64(23);
    let bounds = TileRect::new(0, 0, SIZE, SIZE);
    let mut plane = Plane::new(bounds, TileType::Space);
    let start = plane.tile_count();
    let mut placed = Vec::new();
    for _ in 0..100 {
        let rect = random_rect(&mut rng);
        plane.insert(rect, TileType::Obstacle, Body::None);
        placed.push(rect);
    }
    for rect in placed.iter().rev() {
        plane.insert(*rect, TileType::Space, Body::None);
        plane.verify().unwrap();
    }
    assert_eq!(plane.tile_count(), start);
    assert_eq!(plane.rect(plane.point_search(0, 0)), bounds);
}

#[test]
fn coordinates_survive_a_round_trip() {
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..10_000 {
        let x: f64 = rng.gen_range(-100_000.0..100_000.0);
        assert!((tile_to_real(real_to_tile(x)) - x).abs() < 1.0 / 1000.0);
    }
}

#[test]
fn manhattan_gap_never_overestimates() {
    let mut rng = StdRng::seed_from_u64(3);
    for _ in 0..2_000 {
        let a = random_rect(&mut rng);
        let b = random_rect(&mut rng);
        let gap = manhattan_gap(&a, &b);
        for _ in 0..5 {
            let p = (rng.gen_range(a.xmin..=a.xmax), rng.gen_range(a.ymin..=a.ymax));
            let q = (rng.gen_range(b.xmin..=b.xmax), rng.gen_range(b.ymin..=b.ymax));
            let distance = (p.0 - q.0).abs() as i64 + (p.1 - q.1).abs() as i64;
            assert!(gap <= distance, "{a:?} {b:?}: gap {gap} > {distance}");
        }
    }
}
