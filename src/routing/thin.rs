//! Thin-space elimination.
//!
//! Space tiles shorter than a standard trace width cannot carry a trace
//! along their length but still fragment the plane and slow propagation
//! down. Where such a sliver sits under or over an obstacle island, that
//! stretch of it is converted to `Space2`: still free for traces, but never
//! picked up as thin again.
//! Slivers that have no island are then tried against the four shrink cases
//! of the ECO router's routing-graph reduction.

use std::ops::ControlFlow;

use crate::geometry::TileRect;
use crate::tile::{Body, Plane, TileId, TileType, NIL};

/// Rectangles of the thin space tiles intersecting `area`.
pub(crate) fn collect_thin_tiles(plane: &Plane, area: &TileRect, min_height: i32) -> Vec<TileRect> {
    let mut rects = Vec::new();
    plane.for_each_in(area, |t| {
        if is_thin(plane, t, min_height) {
            rects.push(plane.rect(t));
        }
    });
    rects
}

fn is_thin(plane: &Plane, t: TileId, min_height: i32) -> bool {
    plane.tile_type(t) == TileType::Space && plane.rect(t).height() < min_height
}

fn find_one_thin(plane: &Plane, area: &TileRect, min_height: i32) -> Option<TileId> {
    match plane.area_search(area, |t| {
        if is_thin(plane, t, min_height) {
            ControlFlow::Break(t)
        } else {
            ControlFlow::Continue(())
        }
    }) {
        ControlFlow::Break(t) => Some(t),
        ControlFlow::Continue(()) => None,
    }
}

/// Absorbs the thin tiles found in `rects` into `Space2` where possible.
pub(crate) fn eliminate_thin_tiles(plane: &mut Plane, rects: Vec<TileRect>, std_width: i32) {
    let mut remaining = Vec::new();
    for original in rects {
        let mut pending = vec![original];
        while !pending.is_empty() {
            let area = pending.remove(0);
            if area.width() <= 0 {
                continue;
            }
            let Some(tile) = find_one_thin(plane, &area, std_width) else {
                continue;
            };
            let tile_rect = plane.rect(tile);
            if tile_rect.width() < std_width {
                continue;
            }

            match island_rect(plane, tile, &tile_rect) {
                Some(new_rect) => {
                    plane.insert(new_rect, TileType::Space2, Body::None);
                    queue_sides(&mut pending, &area, &new_rect);
                }
                None => remaining.push(area),
            }
        }
    }
    eliminate_thin_tiles_by_shrinking(plane, remaining, std_width);
}

/// The part of `tile` lying directly under or over an obstacle island that
/// fits within the tile's span.
fn island_rect(plane: &Plane, tile: TileId, tile_rect: &TileRect) -> Option<TileRect> {
    let is_island = |t: TileId| matches!(plane.tile_type(t), TileType::Obstacle | TileType::Space2);

    // Along the top.
    let mut tp = plane.rt(tile);
    while tp != NIL && plane.xmin(tp) >= tile_rect.xmin {
        if is_island(tp) && plane.xmax(tp) <= tile_rect.xmax {
            return Some(TileRect::new(plane.xmin(tp), tile_rect.ymin, plane.xmax(tp), tile_rect.ymax));
        }
        tp = plane.bl(tp);
    }

    // Along the bottom.
    let mut tp = plane.lb(tile);
    while tp != NIL && plane.xmax(tp) <= tile_rect.xmax {
        if is_island(tp) && plane.xmin(tp) >= tile_rect.xmin {
            return Some(TileRect::new(plane.xmin(tp), tile_rect.ymin, plane.xmax(tp), tile_rect.ymax));
        }
        tp = plane.tr(tp);
    }
    None
}

fn queue_sides(pending: &mut Vec<TileRect>, area: &TileRect, taken: &TileRect) {
    let mut left = *area;
    left.xmax = taken.xmin;
    if left.width() > 0 {
        pending.push(left);
    }
    let mut right = *area;
    right.xmin = taken.xmax;
    if right.width() > 0 {
        pending.push(right);
    }
}

fn eliminate_thin_tiles_by_shrinking(plane: &mut Plane, mut pending: Vec<TileRect>, std_width: i32) {
    let mut left_over = 0usize;
    while !pending.is_empty() {
        let area = pending.remove(0);
        if area.width() <= 0 {
            continue;
        }
        let Some(tile) = find_one_thin(plane, &area, std_width) else {
            continue;
        };
        let tile_rect = plane.rect(tile);
        if tile_rect.width() < std_width {
            continue;
        }

        let limit = std_width * 5;
        let new_rect = shrink_into_top(plane, tile, &tile_rect, limit)
            .or_else(|| shrink_under_top(plane, tile, &tile_rect, limit))
            .or_else(|| shrink_into_bottom(plane, tile, &tile_rect, limit))
            .or_else(|| shrink_over_bottom(plane, tile, &tile_rect, limit));

        match new_rect {
            Some(new_rect) => {
                plane.insert(new_rect, TileType::Space2, Body::None);
                queue_sides(&mut pending, &area, &new_rect);
            }
            None => left_over += 1,
        }
    }
    if left_over > 0 {
        tracing::debug!(left_over, "thin tiles left after elimination");
    }
}

/// Case 1: a short space tile above sticks out past the right end of the
/// thin tile; its overhang becomes `Space2`.
fn shrink_into_top(plane: &Plane, tile: TileId, t: &TileRect, limit: i32) -> Option<TileRect> {
    let rt = plane.rt(tile);
    let rt_rect = plane.rect(rt);
    if plane.tile_type(rt) != TileType::Space
        || rt_rect.xmax <= t.xmax
        || rt_rect.height() >= limit
        || rt_rect.xmax - t.xmax > limit
    {
        return None;
    }
    let blocks = |tp: TileId| {
        plane.tile_type(tp) == TileType::Space && plane.xmin(tp) >= t.xmax && plane.xmin(tp) < rt_rect.xmax
    };

    let mut tp = plane.rt(rt);
    while tp != NIL && plane.xmin(tp) > t.xmax {
        if blocks(tp) {
            return None;
        }
        tp = plane.bl(tp);
    }
    let mut tp = plane.tr(tile);
    while tp != NIL && plane.xmin(tp) < rt_rect.xmax {
        if blocks(tp) {
            return None;
        }
        tp = plane.tr(tp);
    }

    let mut new_rect = rt_rect;
    new_rect.xmin = t.xmax;
    Some(new_rect)
}

/// Case 2: an obstacle above starts inside the thin tile and runs past its
/// right end; the part of the thin tile left of the obstacle becomes `Space2`.
fn shrink_under_top(plane: &Plane, tile: TileId, t: &TileRect, limit: i32) -> Option<TileRect> {
    let rt = plane.rt(tile);
    let rt_rect = plane.rect(rt);
    if plane.tile_type(rt) != TileType::Obstacle
        || rt_rect.xmax <= t.xmax
        || rt_rect.xmin <= t.xmin
        || t.height() >= limit
        || rt_rect.xmin - t.xmin > limit
    {
        return None;
    }

    let mut tp = plane.lb(tile);
    while tp != NIL && plane.xmin(tp) < t.xmax {
        if plane.tile_type(tp) == TileType::Space && plane.xmin(tp) >= rt_rect.xmin && plane.xmin(tp) < t.xmax {
            return None;
        }
        tp = plane.tr(tp);
    }

    let mut new_rect = *t;
    new_rect.xmax = rt_rect.xmin;
    Some(new_rect)
}

/// Case 3: mirror image of case 1 below the thin tile's left end.
fn shrink_into_bottom(plane: &Plane, tile: TileId, t: &TileRect, limit: i32) -> Option<TileRect> {
    let lb = plane.lb(tile);
    let lb_rect = plane.rect(lb);
    if plane.tile_type(lb) != TileType::Space
        || lb_rect.xmin >= t.xmin
        || lb_rect.height() >= limit
        || lb_rect.xmax - t.xmin > limit
    {
        return None;
    }
    let blocks = |tp: TileId| {
        plane.tile_type(tp) == TileType::Space && plane.xmax(tp) > lb_rect.xmin && plane.xmax(tp) < t.xmin
    };

    let mut tp = plane.tr(tile);
    while tp != NIL && plane.xmax(tp) > lb_rect.xmin {
        if blocks(tp) {
            return None;
        }
        tp = plane.bl(tp);
    }
    let mut tp = plane.lb(lb);
    while tp != NIL && plane.xmax(tp) < t.xmin {
        if blocks(tp) {
            return None;
        }
        tp = plane.tr(tp);
    }

    let mut new_rect = lb_rect;
    new_rect.xmin = t.xmin;
    Some(new_rect)
}

/// Case 4: mirror image of case 2 with the obstacle below.
fn shrink_over_bottom(plane: &Plane, tile: TileId, t: &TileRect, limit: i32) -> Option<TileRect> {
    let lb = plane.lb(tile);
    let lb_rect = plane.rect(lb);
    if plane.tile_type(lb) != TileType::Obstacle
        || lb_rect.xmin >= t.xmin
        || lb_rect.xmax >= t.xmax
        || t.height() >= limit
        || t.xmax - lb_rect.xmax > limit
    {
        return None;
    }

    let mut tp = plane.rt(tile);
    while tp != NIL && plane.xmax(tp) > t.xmin {
        if plane.tile_type(tp) == TileType::Space && plane.xmax(tp) >= t.xmin && plane.xmax(tp) < lb_rect.xmax {
            return None;
        }
        tp = plane.bl(tp);
    }

    let mut new_rect = *t;
    new_rect.xmin = lb_rect.xmax;
    Some(new_rect)
}
