//! Free space for vias and jumpers near a search frontier.
//!
//! Candidates come from the union planes, where the obstacles of both
//! layers and every part footprint are merged. The rotated union plane
//! splits space along the other axis and so finds rectangles the first one
//! cuts into slivers.

use crate::geometry::{manhattan_gap, Point, TileRect, TILE_FACTOR};
use crate::tile::Plane;

use super::builder::Tiling;
use super::search::{min_cost_rect, Direction, Search, Side, UnitId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct NearestSpace {
    pub(crate) cost: i64,
    pub(crate) unit: UnitId,
    pub(crate) rect: TileRect,
}

impl Search {
    /// The cheapest unit of `side` with a free `width` x `height` rectangle
    /// next to it.
    pub(crate) fn find_nearest_space(&self, tiling: &Tiling, side: Side, width: i32, height: i32) -> Option<NearestSpace> {
        let mut best = None;
        for id in self.indexed_units(side) {
            if best.map_or(false, |b: NearestSpace| self.unit(id).source_cost >= b.cost) {
                continue;
            }
            self.nearest_space_one(tiling, id, width, height, &mut best);
        }
        best
    }

    /// Looks beside `id`'s tile along both axes. True when `best` improved.
    pub(crate) fn nearest_space_one(
        &self,
        tiling: &Tiling,
        id: UnitId,
        width: i32,
        height: i32,
        best: &mut Option<NearestSpace>,
    ) -> bool {
        let unit = self.unit(id);
        let plane = &tiling.planes[unit.plane].1;
        let tile = plane.rect(unit.tile);
        let max = &tiling.tile_max_rect;
        let reach = tiling.widths.tile;
        let mut found = false;

        if tile.width() >= width {
            let mut area = tile;
            area.xmin = max.xmin.max(tile.xmin - width + reach);
            area.xmax = max.xmax.min(tile.xmax + width - reach);
            if area.width() >= width {
                found |= self.nearest_space_in(tiling, plane, id, &area, width, height, true, best);
            }
        }
        if tile.height() >= height {
            let mut area = tile;
            area.ymin = max.ymin.max(tile.ymin - height + reach);
            area.ymax = max.ymax.min(tile.ymax + height - reach);
            if area.height() >= height {
                found |= self.nearest_space_in(tiling, plane, id, &area, width, height, false, best);
            }
        }
        found
    }

    #[allow(clippy::too_many_arguments)]
    fn nearest_space_in(
        &self,
        tiling: &Tiling,
        plane: &Plane,
        id: UnitId,
        area: &TileRect,
        width: i32,
        height: i32,
        horizontal: bool,
        best: &mut Option<NearestSpace>,
    ) -> bool {
        let Some(union) = tiling.union.as_ref() else {
            return false;
        };
        let unit = self.unit(id);
        let tile = plane.rect(unit.tile);

        let candidates = spaces_in(&union.plane, area, width, height).into_iter().chain(
            spaces_in(&union.plane90, &area.rotate90(), height, width)
                .into_iter()
                .map(|r| r.unrotate90()),
        );

        let mut found = false;
        for candidate in candidates {
            let mcr = min_cost_rect(&unit.min_cost_rect, &candidate, tiling.widths.tile);
            let cost = unit.source_cost + manhattan_gap(&unit.min_cost_rect, &mcr);
            if best.map_or(false, |b| cost >= b.cost) {
                continue;
            }
            let direction = match (horizontal, candidate.xmax <= tile.xmin, candidate.ymax <= tile.ymin) {
                (true, true, _) => Direction::Left,
                (true, false, _) => Direction::Right,
                (false, _, true) => Direction::Up,
                (false, _, false) => Direction::Down,
            };
            if self.append_if_rect(plane, id, &candidate, direction, width) {
                *best = Some(NearestSpace {
                    cost,
                    unit: id,
                    rect: candidate,
                });
                found = true;
            }
        }
        found
    }
}

/// Space tiles of `plane` inside `area` that are at least `width` x `height`.
fn spaces_in(plane: &Plane, area: &TileRect, width: i32, height: i32) -> Vec<TileRect> {
    plane
        .tiles_in(area)
        .into_iter()
        .filter(|t| plane.tile_type(*t).is_space())
        .map(|t| plane.rect(t))
        .filter(|r| r.width() >= width && r.height() >= height)
        .collect()
}

/// Centre of a `width` x `height` footprint as close to `near`'s middle as
/// `space` allows, in real coordinates.
pub(crate) fn placement_in(near: &TileRect, space: &TileRect, width: i32, height: i32) -> Point {
    let half_w = width as f64 / 2.0;
    let half_h = height as f64 / 2.0;
    let cx = (near.xmin as f64 + near.xmax as f64) / 2.0;
    let cy = (near.ymin as f64 + near.ymax as f64) / 2.0;
    let cx = cx.max(space.xmin as f64 + half_w).min(space.xmax as f64 - half_w);
    let cy = cy.max(space.ymin as f64 + half_h).min(space.ymax as f64 - half_h);
    Point::new(cx / TILE_FACTOR, cy / TILE_FACTOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TileRect::new(0, 0, 100, 100), TileRect::new(0, 0, 10_000, 10_000), Point::new(0.5, 0.5))]
    #[case(TileRect::new(0, 0, 100, 100), TileRect::new(5_000, 0, 10_000, 10_000), Point::new(5.5, 0.5))]
    #[case(TileRect::new(20_000, 20_000, 20_100, 20_100), TileRect::new(0, 0, 10_000, 10_000), Point::new(9.5, 9.5))]
    fn placement_stays_inside_the_space(#[case] near: TileRect, #[case] space: TileRect, #[case] expected: Point) {
        let at = placement_in(&near, &space, 1_000, 1_000);
        assert!((at.x - expected.x).abs() < 1e-9, "{at:?}");
        assert!((at.y - expected.y).abs() < 1e-9, "{at:?}");
    }
}
