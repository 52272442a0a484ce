use std::cell::Cell;

use hashbrown::HashSet;
use serde::Serialize;

use crate::geometry::TileRect;
use crate::host::{ConnectorId, PartId, TraceId};
use crate::StableState;

/// Coordinates of the sentinel tiles. Anything the router inserts lies well
/// inside this range.
pub(crate) const INFINITY: i32 = 1 << 29;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum TileType {
    Space,
    /// Space that thin-tile elimination has already looked at.
    Space2,
    /// Space occupied by another net's schematic wire; crossable, not followable.
    SchematicWireSpace,
    Obstacle,
    Source,
    Destination,
    Buffer,
    DummyLeft,
    DummyRight,
    DummyTop,
    DummyBottom,
}

impl TileType {
    pub fn is_space(self) -> bool {
        matches!(self, TileType::Space | TileType::Space2)
    }

    /// Types a trace may be drawn through.
    pub fn is_free(self) -> bool {
        matches!(self, TileType::Space | TileType::Space2 | TileType::SchematicWireSpace)
    }

    pub fn is_sentinel(self) -> bool {
        matches!(
            self,
            TileType::DummyLeft | TileType::DummyRight | TileType::DummyTop | TileType::DummyBottom
        )
    }
}

/// Host object that caused a tile to be inserted. Tiles never own it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize)]
pub enum Body {
    #[default]
    None,
    Connector(ConnectorId),
    Wire(TraceId),
    Part(PartId),
}

#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TileId(pub(crate) u32);

pub(crate) const NIL: TileId = TileId(u32::MAX);

#[derive(Clone, Debug)]
pub(crate) struct Tile {
    pub(crate) rect: TileRect,
    pub(crate) kind: TileType,
    pub(crate) body: Body,
    pub(crate) bl: TileId,
    pub(crate) lb: TileId,
    pub(crate) tr: TileId,
    pub(crate) rt: TileId,
    pub(crate) live: bool,
}

/// One corner-stitched plane.
///
/// Stitches follow the usual convention with y growing upwards in tile
/// space: `tr` is the tile containing `(xmax, ymax - 1)`, `rt` the tile
/// containing `(xmax - 1, ymax)`, `bl` the tile containing `(xmin - 1, ymin)`
/// and `lb` the tile containing `(xmin, ymin - 1)`.
#[derive(Clone, Debug)]
pub struct Plane {
    pub(crate) tiles: Vec<Tile>,
    free: Vec<TileId>,
    bounds: TileRect,
    pub(crate) hint: Cell<TileId>,
}

impl Plane {
    /// Creates a plane whose interior `bounds` is a single tile of type
    /// `fill`, surrounded by four sentinel tiles reaching out to infinity.
    pub fn new(bounds: TileRect, fill: TileType) -> Plane {
        let b = TileRect::new(
            bounds.xmin.clamp(-INFINITY + 1, INFINITY - 2),
            bounds.ymin.clamp(-INFINITY + 1, INFINITY - 2),
            bounds.xmax.clamp(-INFINITY + 2, INFINITY - 1),
            bounds.ymax.clamp(-INFINITY + 2, INFINITY - 1),
        );
        let center = TileId(0);
        let left = TileId(1);
        let right = TileId(2);
        let bottom = TileId(3);
        let top = TileId(4);
        let tile = |rect: TileRect, kind: TileType, bl: TileId, lb: TileId, tr: TileId, rt: TileId| Tile {
            rect,
            kind,
            body: Body::None,
            bl,
            lb,
            tr,
            rt,
            live: true,
        };
        let tiles = vec![
            tile(b, fill, left, bottom, right, top),
            tile(
                TileRect::new(-INFINITY, -INFINITY, b.xmin, INFINITY),
                TileType::DummyLeft,
                NIL,
                NIL,
                top,
                NIL,
            ),
            tile(
                TileRect::new(b.xmax, -INFINITY, INFINITY, INFINITY),
                TileType::DummyRight,
                bottom,
                NIL,
                NIL,
                NIL,
            ),
            tile(
                TileRect::new(b.xmin, -INFINITY, b.xmax, b.ymin),
                TileType::DummyBottom,
                left,
                NIL,
                right,
                center,
            ),
            tile(
                TileRect::new(b.xmin, b.ymax, b.xmax, INFINITY),
                TileType::DummyTop,
                left,
                center,
                right,
                NIL,
            ),
        ];
        Plane {
            tiles,
            free: Vec::new(),
            bounds: b,
            hint: Cell::new(center),
        }
    }

    /// The rectangle tiled by non-sentinel tiles.
    pub fn bounds(&self) -> TileRect {
        self.bounds
    }

    pub fn rect(&self, id: TileId) -> TileRect {
        self.tiles[id.0 as usize].rect
    }

    pub fn tile_type(&self, id: TileId) -> TileType {
        self.tiles[id.0 as usize].kind
    }

    pub fn body(&self, id: TileId) -> Body {
        self.tiles[id.0 as usize].body
    }

    pub fn set_tile_type(&mut self, id: TileId, kind: TileType) {
        self.tiles[id.0 as usize].kind = kind;
    }

    pub fn bl(&self, id: TileId) -> TileId {
        self.tiles[id.0 as usize].bl
    }

    pub fn lb(&self, id: TileId) -> TileId {
        self.tiles[id.0 as usize].lb
    }

    pub fn tr(&self, id: TileId) -> TileId {
        self.tiles[id.0 as usize].tr
    }

    pub fn rt(&self, id: TileId) -> TileId {
        self.tiles[id.0 as usize].rt
    }

    pub(crate) fn xmin(&self, id: TileId) -> i32 {
        self.tiles[id.0 as usize].rect.xmin
    }

    pub(crate) fn xmax(&self, id: TileId) -> i32 {
        self.tiles[id.0 as usize].rect.xmax
    }

    pub(crate) fn ymin(&self, id: TileId) -> i32 {
        self.tiles[id.0 as usize].rect.ymin
    }

    pub(crate) fn ymax(&self, id: TileId) -> i32 {
        self.tiles[id.0 as usize].rect.ymax
    }

    fn tile_mut(&mut self, id: TileId) -> &mut Tile {
        &mut self.tiles[id.0 as usize]
    }

    /// Number of live tiles, sentinels included.
    pub fn tile_count(&self) -> usize {
        self.tiles.len() - self.free.len()
    }

    fn allocate(&mut self, tile: Tile) -> TileId {
        if let Some(id) = self.free.pop() {
            self.tiles[id.0 as usize] = tile;
            return id;
        }
        assert!(self.tiles.len() < NIL.0 as usize, "tile arena exhausted");
        self.tiles.push(tile);
        TileId(self.tiles.len() as u32 - 1)
    }

    fn release(&mut self, id: TileId) {
        let tile = self.tile_mut(id);
        tile.live = false;
        tile.bl = NIL;
        tile.lb = NIL;
        tile.tr = NIL;
        tile.rt = NIL;
        self.free.push(id);
    }

    /// Splits `tile` at `x`; the returned tile is the right part.
    fn split_x(&mut self, tile: TileId, x: i32) -> TileId {
        let old = self.tiles[tile.0 as usize].clone();
        let new = self.allocate(Tile {
            rect: TileRect::new(x, old.rect.ymin, old.rect.xmax, old.rect.ymax),
            kind: old.kind,
            body: old.body,
            bl: tile,
            lb: NIL,
            tr: old.tr,
            rt: old.rt,
            live: true,
        });

        // Tiles on the right side that pointed back at `tile`.
        let mut tp = old.tr;
        while self.bl(tp) == tile {
            self.tile_mut(tp).bl = new;
            tp = self.lb(tp);
        }
        self.tile_mut(tile).tr = new;
        self.tile_mut(tile).rect.xmax = x;

        // Top side.
        let mut tp = old.rt;
        while self.xmin(tp) >= x {
            self.tile_mut(tp).lb = new;
            tp = self.bl(tp);
        }
        self.tile_mut(tile).rt = tp;

        // Bottom side.
        let mut tp = old.lb;
        while self.xmax(tp) <= x {
            tp = self.tr(tp);
        }
        self.tile_mut(new).lb = tp;
        while self.rt(tp) == tile {
            self.tile_mut(tp).rt = new;
            tp = self.tr(tp);
        }

        new
    }

    /// Splits `tile` at `y`; the returned tile is the upper part.
    fn split_y(&mut self, tile: TileId, y: i32) -> TileId {
        let old = self.tiles[tile.0 as usize].clone();
        let new = self.allocate(Tile {
            rect: TileRect::new(old.rect.xmin, y, old.rect.xmax, old.rect.ymax),
            kind: old.kind,
            body: old.body,
            bl: NIL,
            lb: tile,
            tr: old.tr,
            rt: old.rt,
            live: true,
        });

        // Top side.
        let mut tp = old.rt;
        while self.lb(tp) == tile {
            self.tile_mut(tp).lb = new;
            tp = self.bl(tp);
        }
        self.tile_mut(tile).rt = new;
        self.tile_mut(tile).rect.ymax = y;

        // Right side.
        let mut tp = old.tr;
        while self.ymin(tp) >= y {
            self.tile_mut(tp).bl = new;
            tp = self.lb(tp);
        }
        self.tile_mut(tile).tr = tp;

        // Left side.
        let mut tp = old.bl;
        while self.ymax(tp) <= y {
            tp = self.rt(tp);
        }
        self.tile_mut(new).bl = tp;
        while self.tr(tp) == tile {
            self.tile_mut(tp).tr = new;
            tp = self.rt(tp);
        }

        new
    }

    /// Installs `kind`/`body` over exactly `rect`, splitting and merging
    /// whatever was there before, then restores maximal horizontal strips
    /// around it. Returns the tile at `rect`'s lower left corner; it covers
    /// all of `rect` unless matching tiles beside it cut the rows differently.
    ///
    /// `rect` is clipped to the plane's bounds; an empty result is ignored.
    /// Tile ids that intersected `rect` may be recycled, so callers must look
    /// tiles up again by point afterwards.
    pub fn insert(&mut self, rect: TileRect, kind: TileType, body: Body) -> Option<TileId> {
        let Some(rect) = rect.intersection(&self.bounds) else {
            tracing::debug!(?rect, ?kind, "ignoring zero-area tile insertion");
            return None;
        };

        let mut pending = self.tiles_in(&rect);
        while let Some(mut t) = pending.pop() {
            if self.ymax(t) > rect.ymax {
                self.split_y(t, rect.ymax);
            }
            if self.ymin(t) < rect.ymin {
                t = self.split_y(t, rect.ymin);
            }
            if self.xmax(t) > rect.xmax {
                self.split_x(t, rect.xmax);
            }
            if self.xmin(t) < rect.xmin {
                self.split_x(t, rect.xmin);
            }
        }

        let inside = self.tiles_in(&rect);
        let keep = self.point_search(rect.xmin, rect.ymin);
        if inside.len() == 1 {
            let tile = self.tile_mut(keep);
            tile.kind = kind;
            tile.body = body;
            return Some(self.join_around(keep, &rect));
        }

        let corner = self.point_search(rect.xmax - 1, rect.ymax - 1);
        let (tr, rt) = (self.tr(corner), self.rt(corner));
        let (bl, lb) = (self.bl(keep), self.lb(keep));

        let inside_set: HashSet<TileId, StableState> = inside.iter().copied().collect();
        let mut outside: HashSet<TileId, StableState> = HashSet::default();
        for &t in &inside {
            self.for_each_neighbour(t, |n| {
                if !inside_set.contains(&n) {
                    outside.insert(n);
                }
            });
        }
        for n in outside {
            let tile = self.tile_mut(n);
            for stitch in [&mut tile.bl, &mut tile.lb, &mut tile.tr, &mut tile.rt] {
                if inside_set.contains(&*stitch) {
                    *stitch = keep;
                }
            }
        }

        for &t in &inside {
            if t != keep {
                self.release(t);
            }
        }
        let tile = self.tile_mut(keep);
        tile.rect = rect;
        tile.kind = kind;
        tile.body = body;
        tile.bl = bl;
        tile.lb = lb;
        tile.tr = tr;
        tile.rt = rt;
        Some(self.join_around(keep, &rect))
    }

    fn joinable(&self, a: TileId, b: TileId) -> bool {
        if a == NIL || b == NIL {
            return false;
        }
        let (ta, tb) = (&self.tiles[a.0 as usize], &self.tiles[b.0 as usize]);
        a != b && ta.live && tb.live && !ta.kind.is_sentinel() && ta.kind == tb.kind && ta.body == tb.body
    }

    /// Restores maximal horizontal strips around `t`: no two tiles of the same
    /// type and body side by side, and none stacked with equal x spans.
    /// Returns the tile that ends up at the lower left corner of `rect`.
    fn join_around(&mut self, t: TileId, rect: &TileRect) -> TileId {
        self.hint.set(t);
        let mut pending = vec![t];
        self.for_each_neighbour(t, |n| pending.push(n));

        while let Some(t) = pending.pop() {
            if !self.tiles[t.0 as usize].live || self.tile_type(t).is_sentinel() {
                continue;
            }
            if let Some(n) = self.side_match(t) {
                let (left, right) = if self.xmin(n) < self.xmin(t) { (n, t) } else { (t, n) };
                let (y0, y1) = (
                    self.ymin(t).max(self.ymin(n)),
                    self.ymax(t).min(self.ymax(n)),
                );
                let left = self.clip_rows(left, y0, y1, &mut pending);
                let right = self.clip_rows(right, y0, y1, &mut pending);
                self.join_x(left, right);
                pending.push(left);
                continue;
            }

            let r = self.rect(t);
            let (up, down) = (self.rt(t), self.lb(t));
            if self.joinable(t, up) && self.xmin(up) == r.xmin && self.xmax(up) == r.xmax {
                self.join_y(t, up);
                pending.push(t);
            } else if self.joinable(t, down) && self.xmin(down) == r.xmin && self.xmax(down) == r.xmax {
                self.join_y(down, t);
                pending.push(down);
            }
        }

        self.point_search(rect.xmin, rect.ymin)
    }

    /// A tile of the same type and body beside `t`, on either side.
    fn side_match(&self, t: TileId) -> Option<TileId> {
        let r = self.rect(t);
        let mut tp = self.tr(t);
        while tp != NIL && self.ymax(tp) > r.ymin {
            if self.joinable(t, tp) {
                return Some(tp);
            }
            tp = self.lb(tp);
        }
        let mut tp = self.bl(t);
        while tp != NIL && self.ymin(tp) < r.ymax {
            if self.joinable(t, tp) {
                return Some(tp);
            }
            tp = self.rt(tp);
        }
        None
    }

    /// Cuts `t` down to the rows `y0..y1`, queueing the pieces cut off.
    fn clip_rows(&mut self, mut t: TileId, y0: i32, y1: i32, pending: &mut Vec<TileId>) -> TileId {
        if self.ymax(t) > y1 {
            pending.push(self.split_y(t, y1));
        }
        if self.ymin(t) < y0 {
            pending.push(t);
            t = self.split_y(t, y0);
        }
        t
    }

    /// Absorbs `right`, which has the same vertical span, into `left`.
    fn join_x(&mut self, left: TileId, right: TileId) {
        let mut tp = self.rt(right);
        while tp != NIL && self.lb(tp) == right {
            self.tile_mut(tp).lb = left;
            tp = self.bl(tp);
        }
        let mut tp = self.lb(right);
        while tp != NIL && self.rt(tp) == right {
            self.tile_mut(tp).rt = left;
            tp = self.tr(tp);
        }
        let mut tp = self.tr(right);
        while tp != NIL && self.bl(tp) == right {
            self.tile_mut(tp).bl = left;
            tp = self.lb(tp);
        }

        let gone = self.tiles[right.0 as usize].clone();
        let tile = self.tile_mut(left);
        tile.rect.xmax = gone.rect.xmax;
        tile.tr = gone.tr;
        tile.rt = gone.rt;
        self.forget(right, left);
    }

    /// Absorbs `top`, which has the same horizontal span, into `bottom`.
    fn join_y(&mut self, bottom: TileId, top: TileId) {
        let mut tp = self.bl(top);
        while tp != NIL && self.tr(tp) == top {
            self.tile_mut(tp).tr = bottom;
            tp = self.rt(tp);
        }
        let mut tp = self.tr(top);
        while tp != NIL && self.bl(tp) == top {
            self.tile_mut(tp).bl = bottom;
            tp = self.lb(tp);
        }
        let mut tp = self.rt(top);
        while tp != NIL && self.lb(tp) == top {
            self.tile_mut(tp).lb = bottom;
            tp = self.bl(tp);
        }

        let gone = self.tiles[top.0 as usize].clone();
        let tile = self.tile_mut(bottom);
        tile.rect.ymax = gone.rect.ymax;
        tile.tr = gone.tr;
        tile.rt = gone.rt;
        self.forget(top, bottom);
    }

    fn forget(&mut self, gone: TileId, into: TileId) {
        self.release(gone);
        if self.hint.get() == gone {
            self.hint.set(into);
        }
    }

    /// Calls `f` for every tile sharing an edge with `t`: right side top to
    /// bottom, then left side, top side and bottom side.
    pub(crate) fn for_each_neighbour(&self, t: TileId, mut f: impl FnMut(TileId)) {
        let r = self.rect(t);

        let mut tp = self.tr(t);
        while tp != NIL && self.ymax(tp) > r.ymin {
            f(tp);
            tp = self.lb(tp);
        }

        let mut tp = self.bl(t);
        while tp != NIL && self.ymin(tp) < r.ymax {
            f(tp);
            tp = self.rt(tp);
        }

        let mut tp = self.rt(t);
        while tp != NIL && self.xmax(tp) > r.xmin {
            f(tp);
            tp = self.bl(tp);
        }

        let mut tp = self.lb(t);
        while tp != NIL && self.xmin(tp) < r.xmax {
            f(tp);
            tp = self.tr(tp);
        }
    }

    /// Checks that live tiles exactly cover the bounds and that every stitch
    /// points at the tile containing its corner point.
    pub fn verify(&self) -> Result<(), String> {
        let live: Vec<TileId> = (0..self.tiles.len() as u32)
            .map(TileId)
            .filter(|id| self.tiles[id.0 as usize].live && !self.tile_type(*id).is_sentinel())
            .collect();

        let mut area = 0i64;
        for (i, a) in live.iter().enumerate() {
            let ra = self.rect(*a);
            if ra.is_empty() || !self.bounds.contains_rect(&ra) {
                return Err(format!("tile {a:?} {ra:?} is empty or outside {:?}", self.bounds));
            }
            area += ra.area();
            for b in &live[i + 1..] {
                if ra.intersects(&self.rect(*b)) {
                    return Err(format!("tiles {a:?} and {b:?} overlap"));
                }
            }
        }
        if area != self.bounds.area() {
            return Err(format!("tiles cover {area} of {}", self.bounds.area()));
        }

        let containing = |x: i32, y: i32| {
            (0..self.tiles.len() as u32)
                .map(TileId)
                .find(|id| self.tiles[id.0 as usize].live && self.rect(*id).contains(x, y))
        };
        for &t in &live {
            let r = self.rect(t);
            let expected = [
                ("tr", self.tr(t), containing(r.xmax, r.ymax - 1)),
                ("rt", self.rt(t), containing(r.xmax - 1, r.ymax)),
                ("bl", self.bl(t), containing(r.xmin - 1, r.ymin)),
                ("lb", self.lb(t), containing(r.xmin, r.ymin - 1)),
            ];
            for (name, actual, wanted) in expected {
                if Some(actual) != wanted {
                    return Err(format!("tile {t:?} {r:?}: {name} is {actual:?}, expected {wanted:?}"));
                }
            }

            if let Some(n) = self.side_match(t) {
                return Err(format!("tile {t:?} {r:?} and {n:?} beside it should be one strip"));
            }
            let up = self.rt(t);
            if self.joinable(t, up) && self.xmin(up) == r.xmin && self.xmax(up) == r.xmax {
                return Err(format!("tile {t:?} {r:?} and {up:?} above it should be one tile"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane() -> Plane {
        Plane::new(TileRect::new(0, 0, 1000, 1000), TileType::Space)
    }

    #[test]
    fn new_plane_is_one_tile() {
        let plane = plane();
        plane.verify().unwrap();
        let t = plane.point_search(500, 500);
        assert_eq!(plane.rect(t), TileRect::new(0, 0, 1000, 1000));
        assert_eq!(plane.tile_type(t), TileType::Space);
    }

    #[test]
    fn insert_splits_and_restitches() {
        let mut plane = plane();
        let t = plane
            .insert(TileRect::new(100, 200, 300, 400), TileType::Obstacle, Body::None)
            .unwrap();
        plane.verify().unwrap();
        assert_eq!(plane.rect(t), TileRect::new(100, 200, 300, 400));
        assert_eq!(plane.tile_type(plane.point_search(150, 250)), TileType::Obstacle);
        assert_eq!(plane.tile_type(plane.point_search(50, 250)), TileType::Space);
        assert_eq!(plane.tile_type(plane.point_search(300, 250)), TileType::Space);
    }

    #[test]
    fn insert_over_several_tiles_merges_them() {
        let mut plane = plane();
        plane.insert(TileRect::new(100, 100, 200, 200), TileType::Obstacle, Body::None);
        plane.insert(TileRect::new(300, 150, 400, 250), TileType::Obstacle, Body::None);
        let before = plane.tile_count();
        let t = plane
            .insert(TileRect::new(50, 50, 450, 300), TileType::Space2, Body::None)
            .unwrap();
        plane.verify().unwrap();
        assert!(plane.tile_count() < before);
        assert_eq!(plane.rect(t), TileRect::new(50, 50, 450, 300));
        assert_eq!(plane.point_search(420, 60), t);
    }

    #[test]
    fn clearing_an_obstacle_restores_one_space_tile() {
        let mut plane = plane();
        let start = plane.tile_count();
        plane.insert(TileRect::new(100, 100, 200, 200), TileType::Obstacle, Body::None);
        assert_eq!(plane.tile_count(), start + 4);

        let t = plane
            .insert(TileRect::new(100, 100, 200, 200), TileType::Space, Body::None)
            .unwrap();
        plane.verify().unwrap();
        assert_eq!(plane.tile_count(), start);
        assert_eq!(plane.rect(t), TileRect::new(0, 0, 1000, 1000));
    }

    #[test]
    fn fragments_join_their_neighbours() {
        let mut plane = plane();
        // Two obstacles stacked with a gap, then the gap filled.
        plane.insert(TileRect::new(100, 100, 300, 200), TileType::Obstacle, Body::None);
        plane.insert(TileRect::new(100, 250, 300, 400), TileType::Obstacle, Body::None);
        plane.insert(TileRect::new(100, 200, 300, 250), TileType::Obstacle, Body::None);
        plane.verify().unwrap();

        let t = plane.point_search(150, 220);
        assert_eq!(plane.rect(t), TileRect::new(100, 100, 300, 400));
        // Space to the left of the column is one tile again.
        assert_eq!(plane.rect(plane.point_search(50, 300)), TileRect::new(0, 100, 100, 400));
        assert_eq!(plane.tile_count(), 9);
    }

    #[test]
    fn different_bodies_stay_apart() {
        let mut plane = plane();
        let a = Body::Connector(ConnectorId(1));
        let b = Body::Connector(ConnectorId(2));
        plane.insert(TileRect::new(100, 100, 200, 200), TileType::Obstacle, a);
        plane.insert(TileRect::new(200, 100, 300, 200), TileType::Obstacle, b);
        plane.verify().unwrap();
        assert_eq!(plane.body(plane.point_search(150, 150)), a);
        assert_eq!(plane.rect(plane.point_search(250, 150)), TileRect::new(200, 100, 300, 200));

        plane.insert(TileRect::new(200, 100, 300, 200), TileType::Obstacle, a);
        plane.verify().unwrap();
        assert_eq!(plane.rect(plane.point_search(150, 150)), TileRect::new(100, 100, 300, 200));
    }

    #[test]
    fn zero_area_insert_is_ignored() {
        let mut plane = plane();
        assert!(plane
            .insert(TileRect::new(10, 10, 10, 50), TileType::Obstacle, Body::None)
            .is_none());
        assert!(plane
            .insert(TileRect::new(2000, 2000, 3000, 3000), TileType::Obstacle, Body::None)
            .is_none());
        assert_eq!(plane.tile_count(), 5);
    }
}
