use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};

/// Number of tile units per real (host) unit.
pub const TILE_FACTOR: f64 = 1000.0;

/// Two real coordinates closer than this are treated as equal when deciding
/// whether a wire is horizontal, vertical or diagonal.
pub const CLOSE_ENOUGH: f64 = 0.5;

pub fn real_to_tile(x: f64) -> i32 {
    (x * TILE_FACTOR).round() as i32
}

pub fn tile_to_real(i: i32) -> f64 {
    i as f64 / TILE_FACTOR
}

#[derive(Clone, Debug, PartialEq, Copy, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }

    pub fn distance_sqrd(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    pub fn distance(&self, other: &Point) -> f64 {
        self.distance_sqrd(other).sqrt()
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, other: Point) -> Point {
        Point {
            x: self.x - other.x,
            y: self.y - other.y,
        }
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, other: Point) -> Point {
        Point {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }
}

impl rstar::Point for Point {
    type Scalar = f64;
    const DIMENSIONS: usize = 2;

    fn generate(mut generator: impl FnMut(usize) -> Self::Scalar) -> Self {
        Point {
            x: generator(0),
            y: generator(1),
        }
    }

    fn nth(&self, index: usize) -> Self::Scalar {
        match index {
            0 => self.x,
            1 => self.y,
            _ => unreachable!("a point has two dimensions"),
        }
    }

    fn nth_mut(&mut self, index: usize) -> &mut Self::Scalar {
        match index {
            0 => &mut self.x,
            1 => &mut self.y,
            _ => unreachable!("a point has two dimensions"),
        }
    }
}

/// Axis aligned rectangle in real coordinates. The y axis points down, as in
/// the host's scene.
#[derive(Clone, Debug, PartialEq, Copy, Default, Serialize, Deserialize)]
pub struct RealRect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl RealRect {
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        RealRect {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn from_center(center: Point, width: f64, height: f64) -> Self {
        RealRect {
            left: center.x - width / 2.0,
            top: center.y - height / 2.0,
            right: center.x + width / 2.0,
            bottom: center.y + height / 2.0,
        }
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    pub fn center(&self) -> Point {
        Point::new((self.left + self.right) / 2.0, (self.top + self.bottom) / 2.0)
    }

    pub fn min_dimension(&self) -> f64 {
        self.width().min(self.height())
    }

    pub fn adjusted(&self, d: f64) -> RealRect {
        RealRect {
            left: self.left - d,
            top: self.top - d,
            right: self.right + d,
            bottom: self.bottom + d,
        }
    }

    pub fn contains_rect(&self, other: &RealRect) -> bool {
        other.left >= self.left && other.right <= self.right && other.top >= self.top && other.bottom <= self.bottom
    }

    pub fn contains_point(&self, p: &Point) -> bool {
        p.x >= self.left && p.x <= self.right && p.y >= self.top && p.y <= self.bottom
    }

    pub fn intersects(&self, other: &RealRect) -> bool {
        self.left < other.right && other.left < self.right && self.top < other.bottom && other.top < self.bottom
    }

    pub fn intersected(&self, other: &RealRect) -> Option<RealRect> {
        if !self.intersects(other) {
            return None;
        }
        Some(RealRect {
            left: self.left.max(other.left),
            top: self.top.max(other.top),
            right: self.right.min(other.right),
            bottom: self.bottom.min(other.bottom),
        })
    }

    pub fn united(&self, other: &RealRect) -> RealRect {
        RealRect {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }

    pub fn to_tile(&self) -> TileRect {
        TileRect::new(
            real_to_tile(self.left),
            real_to_tile(self.top),
            real_to_tile(self.right),
            real_to_tile(self.bottom),
        )
    }
}

/// Half-open rectangle `[xmin, xmax) x [ymin, ymax)` in tile units.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Copy, Default, Serialize, Deserialize)]
pub struct TileRect {
    pub xmin: i32,
    pub ymin: i32,
    pub xmax: i32,
    pub ymax: i32,
}

impl TileRect {
    pub fn new(xmin: i32, ymin: i32, xmax: i32, ymax: i32) -> Self {
        TileRect { xmin, ymin, xmax, ymax }
    }

    pub fn from_reals(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        RealRect::new(left, top, right, bottom).to_tile()
    }

    pub fn width(&self) -> i32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> i32 {
        self.ymax - self.ymin
    }

    pub fn is_empty(&self) -> bool {
        self.xmax <= self.xmin || self.ymax <= self.ymin
    }

    pub fn area(&self) -> i64 {
        if self.is_empty() {
            return 0;
        }
        self.width() as i64 * self.height() as i64
    }

    pub fn center(&self) -> (i32, i32) {
        ((self.xmin + self.xmax) / 2, (self.ymin + self.ymax) / 2)
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.xmin && x < self.xmax && y >= self.ymin && y < self.ymax
    }

    pub fn contains_rect(&self, other: &TileRect) -> bool {
        other.xmin >= self.xmin && other.xmax <= self.xmax && other.ymin >= self.ymin && other.ymax <= self.ymax
    }

    /// Overlap with positive area.
    pub fn intersects(&self, other: &TileRect) -> bool {
        self.xmin < other.xmax && other.xmin < self.xmax && self.ymin < other.ymax && other.ymin < self.ymax
    }

    pub fn intersection(&self, other: &TileRect) -> Option<TileRect> {
        let r = TileRect {
            xmin: self.xmin.max(other.xmin),
            ymin: self.ymin.max(other.ymin),
            xmax: self.xmax.min(other.xmax),
            ymax: self.ymax.min(other.ymax),
        };
        if r.is_empty() {
            None
        } else {
            Some(r)
        }
    }

    pub fn adjusted(&self, d: i32) -> TileRect {
        TileRect {
            xmin: self.xmin - d,
            ymin: self.ymin - d,
            xmax: self.xmax + d,
            ymax: self.ymax + d,
        }
    }

    pub fn to_real(&self) -> RealRect {
        RealRect {
            left: tile_to_real(self.xmin),
            top: tile_to_real(self.ymin),
            right: tile_to_real(self.xmax),
            bottom: tile_to_real(self.ymax),
        }
    }

    /// Notches `self` around `clip`. Returns the pieces of `self` lying
    /// outside `clip` (at most four), or `None` when they do not overlap.
    /// Pieces are cut in the order: below `clip.ymin`, above `clip.ymax`,
    /// left of `clip.xmin`, right of `clip.xmax`.
    pub fn clip(&self, clip: &TileRect) -> Option<Vec<TileRect>> {
        if !self.intersects(clip) {
            return None;
        }

        let mut rest = *self;
        let mut pieces = Vec::with_capacity(4);
        if rest.ymin < clip.ymin {
            pieces.push(TileRect::new(rest.xmin, rest.ymin, rest.xmax, clip.ymin));
            rest.ymin = clip.ymin;
        }
        if rest.ymax > clip.ymax {
            pieces.push(TileRect::new(rest.xmin, clip.ymax, rest.xmax, rest.ymax));
            rest.ymax = clip.ymax;
        }
        if rest.xmin < clip.xmin {
            pieces.push(TileRect::new(rest.xmin, rest.ymin, clip.xmin, rest.ymax));
            rest.xmin = clip.xmin;
        }
        if rest.xmax > clip.xmax {
            pieces.push(TileRect::new(clip.xmax, rest.ymin, rest.xmax, rest.ymax));
        }
        Some(pieces)
    }

    /// Grows `self` so that it reaches the nearest edge of `bounds`. Used to
    /// carry a schematic connector out to its part's boundary. A rectangle
    /// already touching or crossing `bounds` is returned unchanged.
    pub fn extend_to_bounds(&self, bounds: &TileRect) -> TileRect {
        let mut r = *self;
        if r.xmin <= bounds.xmin || r.xmax >= bounds.xmax || r.ymin <= bounds.ymin || r.ymax >= bounds.ymax {
            return r;
        }
        let to_left = r.xmin - bounds.xmin;
        let to_right = bounds.xmax - r.xmax;
        let to_top = r.ymin - bounds.ymin;
        let to_bottom = bounds.ymax - r.ymax;
        let nearest = to_left.min(to_right).min(to_top).min(to_bottom);
        if nearest == to_left {
            r.xmin = bounds.xmin;
        } else if nearest == to_right {
            r.xmax = bounds.xmax;
        } else if nearest == to_top {
            r.ymin = bounds.ymin;
        } else {
            r.ymax = bounds.ymax;
        }
        r
    }

    /// Rotates by 90 degrees about the origin: (x, y) -> (-y, x).
    pub fn rotate90(&self) -> TileRect {
        TileRect {
            xmin: -self.ymax,
            ymin: self.xmin,
            xmax: -self.ymin,
            ymax: self.xmax,
        }
    }

    pub fn unrotate90(&self) -> TileRect {
        TileRect {
            xmin: self.ymin,
            ymin: -self.xmax,
            xmax: self.ymax,
            ymax: -self.xmin,
        }
    }
}

/// Smallest Manhattan distance between any point of `a` and any point of `b`.
/// Zero when the rectangles touch or overlap. Never overestimates the length
/// of a rectilinear path between the two rectangles.
pub fn manhattan_gap(a: &TileRect, b: &TileRect) -> i64 {
    let dx = (a.xmin - b.xmax).max(b.xmin - a.xmax).max(0) as i64;
    let dy = (a.ymin - b.ymax).max(b.ymin - a.ymax).max(0) as i64;
    dx + dy
}

/// Projection of `p` onto the segment `a`-`b`, and the distance from `p` to
/// that projection.
pub fn project_onto_segment(p: Point, a: Point, b: Point) -> (Point, f64) {
    let d = b - a;
    let len_sqrd = d.x * d.x + d.y * d.y;
    if len_sqrd == 0.0 {
        return (a, p.distance(&a));
    }
    let t = (((p.x - a.x) * d.x + (p.y - a.y) * d.y) / len_sqrd).clamp(0.0, 1.0);
    let q = Point::new(a.x + t * d.x, a.y + t * d.y);
    (q, p.distance(&q))
}

fn orientation(a: Point, b: Point, c: Point) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn segments_cross(a1: Point, a2: Point, b1: Point, b2: Point) -> bool {
    let d1 = orientation(b1, b2, a1);
    let d2 = orientation(b1, b2, a2);
    let d3 = orientation(a1, a2, b1);
    let d4 = orientation(a1, a2, b2);
    ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0)) && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
}

/// Shortest distance between the segments `a1`-`a2` and `b1`-`b2`.
pub fn segment_distance(a1: Point, a2: Point, b1: Point, b2: Point) -> f64 {
    if segments_cross(a1, a2, b1, b2) {
        return 0.0;
    }
    let candidates = [
        project_onto_segment(a1, b1, b2).1,
        project_onto_segment(a2, b1, b2).1,
        project_onto_segment(b1, a1, a2).1,
        project_onto_segment(b2, a1, a2).1,
    ];
    candidates.into_iter().fold(f64::INFINITY, f64::min)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WireDirection {
    Horizontal,
    Vertical,
    Diagonal,
}

impl WireDirection {
    pub fn of(p1: Point, p2: Point) -> WireDirection {
        if (p1.x - p2.x).abs() < CLOSE_ENOUGH {
            WireDirection::Vertical
        } else if (p1.y - p2.y).abs() < CLOSE_ENOUGH {
            WireDirection::Horizontal
        } else {
            WireDirection::Diagonal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rstest::rstest;

    #[rstest]
    #[case(0.0)]
    #[case(12.3456)]
    #[case(-987.0004)]
    #[case(1e5 + 0.00049)]
    fn coordinate_round_trip_stays_within_one_tile_unit(#[case] x: f64) {
        let back = tile_to_real(real_to_tile(x));
        assert!((back - x).abs() < 1.0 / TILE_FACTOR);
    }

    #[test]
    fn manhattan_gap_never_overestimates() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..2000 {
            let mut rect = || {
                let x = rng.gen_range(-500..500);
                let y = rng.gen_range(-500..500);
                TileRect::new(x, y, x + rng.gen_range(1..200), y + rng.gen_range(1..200))
            };
            let a = rect();
            let b = rect();
            let gap = manhattan_gap(&a, &b);
            for _ in 0..8 {
                let px = rng.gen_range(a.xmin..=a.xmax);
                let py = rng.gen_range(a.ymin..=a.ymax);
                let qx = rng.gen_range(b.xmin..=b.xmax);
                let qy = rng.gen_range(b.ymin..=b.ymax);
                let d = (px - qx).abs() as i64 + (py - qy).abs() as i64;
                assert!(gap <= d, "{a:?} {b:?} gap {gap} > {d}");
            }
        }
    }

    #[rstest]
    #[case(TileRect::new(0, 0, 10, 10), TileRect::new(10, 0, 20, 10), 0)]
    #[case(TileRect::new(0, 0, 10, 10), TileRect::new(15, 0, 20, 10), 5)]
    #[case(TileRect::new(0, 0, 10, 10), TileRect::new(13, 14, 20, 20), 7)]
    #[case(TileRect::new(0, 0, 10, 10), TileRect::new(2, 2, 4, 4), 0)]
    fn manhattan_gap_cases(#[case] a: TileRect, #[case] b: TileRect, #[case] expected: i64) {
        assert_eq!(manhattan_gap(&a, &b), expected);
        assert_eq!(manhattan_gap(&b, &a), expected);
    }

    #[test]
    fn clip_leaves_the_notched_remainder() {
        let r = TileRect::new(0, 0, 100, 100);
        let pieces = r.clip(&TileRect::new(40, 40, 60, 60)).unwrap();
        assert_eq!(
            pieces,
            vec![
                TileRect::new(0, 0, 100, 40),
                TileRect::new(0, 60, 100, 100),
                TileRect::new(0, 40, 40, 60),
                TileRect::new(60, 40, 100, 60),
            ]
        );
        let area: i64 = pieces.iter().map(TileRect::area).sum();
        assert_eq!(area, 100 * 100 - 20 * 20);
        assert!(r.clip(&TileRect::new(200, 200, 300, 300)).is_none());
        assert!(r.clip(&TileRect::new(-10, -10, 200, 200)).unwrap().is_empty());
    }

    #[test]
    fn extend_to_bounds_reaches_the_nearest_edge() {
        let bounds = TileRect::new(0, 0, 100, 50);
        assert_eq!(
            TileRect::new(5, 20, 15, 30).extend_to_bounds(&bounds),
            TileRect::new(0, 20, 15, 30)
        );
        assert_eq!(
            TileRect::new(40, 42, 60, 48).extend_to_bounds(&bounds),
            TileRect::new(40, 42, 60, 50)
        );
    }

    #[test]
    fn rotation_is_invertible() {
        let r = TileRect::new(-3, 7, 12, 40);
        let rotated = r.rotate90();
        assert_eq!(rotated.width(), r.height());
        assert_eq!(rotated.height(), r.width());
        assert_eq!(rotated.unrotate90(), r);
    }

    #[test]
    fn segment_distance_detects_crossings() {
        let d = segment_distance(
            Point::new(0.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
            Point::new(10.0, 0.0),
        );
        assert_eq!(d, 0.0);
        let d = segment_distance(
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(0.0, 3.0),
            Point::new(10.0, 3.0),
        );
        assert!((d - 3.0).abs() < 1e-9);
    }
}
