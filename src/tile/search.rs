use std::convert::Infallible;
use std::ops::ControlFlow;

use hashbrown::HashSet;

use super::plane::{Plane, TileId, TileType};
use crate::geometry::TileRect;
use crate::StableState;

impl Plane {
    /// Returns the tile containing `(x, y)`. Points outside the bounds are
    /// clamped onto the nearest border tile.
    pub fn point_search(&self, x: i32, y: i32) -> TileId {
        let b = self.bounds();
        let x = x.clamp(b.xmin, b.xmax - 1);
        let y = y.clamp(b.ymin, b.ymax - 1);

        let mut tp = self.hint.get();
        if y < self.ymin(tp) {
            while y < self.ymin(tp) {
                tp = self.lb(tp);
            }
        } else {
            while y >= self.ymax(tp) {
                tp = self.rt(tp);
            }
        }

        if x < self.xmin(tp) {
            loop {
                while x < self.xmin(tp) {
                    tp = self.bl(tp);
                }
                if y < self.ymax(tp) {
                    break;
                }
                while y >= self.ymax(tp) {
                    tp = self.rt(tp);
                }
                if x >= self.xmin(tp) {
                    break;
                }
            }
        } else {
            while x >= self.xmax(tp) {
                while x >= self.xmax(tp) {
                    tp = self.tr(tp);
                }
                if y >= self.ymin(tp) {
                    break;
                }
                while y < self.ymin(tp) {
                    tp = self.lb(tp);
                }
            }
        }

        self.hint.set(tp);
        tp
    }

    /// Visits every tile intersecting `area` exactly once, walking stitches
    /// outward from the tile at the area's lower left corner. The visitor can
    /// stop the walk by returning `ControlFlow::Break`.
    ///
    /// Degenerate areas are widened to one tile unit.
    pub fn area_search<B>(&self, area: &TileRect, mut visit: impl FnMut(TileId) -> ControlFlow<B>) -> ControlFlow<B> {
        let mut area = *area;
        if area.xmax <= area.xmin {
            area.xmax = area.xmin + 1;
        }
        if area.ymax <= area.ymin {
            area.ymax = area.ymin + 1;
        }
        let Some(area) = area.intersection(&self.bounds()) else {
            return ControlFlow::Continue(());
        };

        let start = self.point_search(area.xmin, area.ymin);
        let mut seen: HashSet<TileId, StableState> = HashSet::default();
        seen.insert(start);
        let mut stack = vec![start];
        while let Some(t) = stack.pop() {
            visit(t)?;
            self.for_each_neighbour(t, |n| {
                if !self.tile_type(n).is_sentinel() && self.rect(n).intersects(&area) && seen.insert(n) {
                    stack.push(n);
                }
            });
        }
        ControlFlow::Continue(())
    }

    /// Calls `f` on every tile intersecting `area`.
    pub fn for_each_in(&self, area: &TileRect, mut f: impl FnMut(TileId)) {
        let flow = self.area_search::<Infallible>(area, |t| {
            f(t);
            ControlFlow::Continue(())
        });
        match flow {
            ControlFlow::Continue(()) => {}
            ControlFlow::Break(never) => match never {},
        }
    }

    /// All tiles intersecting `area`, in visiting order.
    pub fn tiles_in(&self, area: &TileRect) -> Vec<TileId> {
        let mut tiles = Vec::new();
        self.for_each_in(area, |t| tiles.push(t));
        tiles
    }

    /// The first tile in `area` whose type satisfies `pred`.
    pub fn find_in(&self, area: &TileRect, pred: impl Fn(TileType) -> bool) -> Option<TileId> {
        match self.area_search(area, |t| {
            if pred(self.tile_type(t)) {
                ControlFlow::Break(t)
            } else {
                ControlFlow::Continue(())
            }
        }) {
            ControlFlow::Break(t) => Some(t),
            ControlFlow::Continue(()) => None,
        }
    }
}
