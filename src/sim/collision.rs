//! Tile collision detection and resolution for grid-aligned bodies
//!
//! Two halves:
//! - [`TileCollisionHelper`] scans the ring of tiles around a tile rect and
//!   reports which of the 8 neighbouring directions are solid.
//! - [`check_collision`] resolves a continuous rect that moved past the edge of
//!   its cached collision rect, snapping it back with a small epsilon so the
//!   same contact is not detected again on the next tick.

use glam::Vec2;

use super::entity::EntityHandle;
use super::tiles::{AttributeLayer, TileRegistry};
use crate::consts::SNAP_EPSILON;
use crate::geom::{CollisionDirs, Direction, PointRect, Rect};

/// Penetration difference under which the corner case counts as a tie
const CORNER_TIE: f32 = 1e-4;
/// Penetration that still counts as resting on the edge after a snap
const CROSS_SLACK: f32 = 2.0 * SNAP_EPSILON;

/// Stateless 8-direction neighbour scan
pub struct TileCollisionHelper;

impl TileCollisionHelper {
    /// Solid neighbours of `rect`: edges check the full adjacent row/column,
    /// corners the single diagonal tile of the plus-one-tile rect.
    pub fn compute(
        rect: PointRect,
        layer: &AttributeLayer,
        registry: &TileRegistry,
        ignore_entity: EntityHandle,
    ) -> CollisionDirs {
        Self::compute_ignoring(rect, layer, registry, &[ignore_entity])
    }

    /// Same scan, skipping collision tiles owned by any of `ignore`
    pub fn compute_ignoring(
        rect: PointRect,
        layer: &AttributeLayer,
        registry: &TileRegistry,
        ignore: &[EntityHandle],
    ) -> CollisionDirs {
        let solid = |p| {
            layer.is_solid(p)
                || registry
                    .entity_tiles_at(p)
                    .iter()
                    .any(|owner| !ignore.contains(owner))
        };
        let mut dirs = CollisionDirs::NONE;

        for side in Direction::CARDINALS {
            if rect.outside_edge(side).points().any(solid) {
                dirs.insert(CollisionDirs::edge(side));
            }
        }

        let outer = rect.grown(1);
        let corners = [
            (Direction::Left, Direction::Up, outer.x, outer.y),
            (Direction::Right, Direction::Up, outer.right() - 1, outer.y),
            (Direction::Left, Direction::Down, outer.x, outer.bottom() - 1),
            (Direction::Right, Direction::Down, outer.right() - 1, outer.bottom() - 1),
        ];
        for (h, v, x, y) in corners {
            if solid(glam::IVec2::new(x, y)) {
                dirs.insert(CollisionDirs::corner(h, v));
            }
        }
        dirs
    }
}

/// Outcome of [`check_collision`]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CollisionResolution {
    /// Correction to add to the position
    pub correction: Vec2,
    /// Edges the rect was snapped against
    pub snapped: CollisionDirs,
}

impl CollisionResolution {
    pub fn hit(&self) -> bool {
        !self.snapped.is_empty()
    }
}

/// How far `rect` has crossed `bounds` on `side` (positive = crossed)
fn penetration(rect: &Rect, bounds: &Rect, side: Direction) -> f32 {
    match side {
        Direction::Left => bounds.x - rect.x,
        Direction::Right => rect.right() - bounds.right(),
        Direction::Up => bounds.y - rect.y,
        Direction::Down => rect.bottom() - bounds.bottom(),
        Direction::None => 0.0,
    }
}

/// Correction that puts the crossed edge `SNAP_EPSILON` inside `bounds`
fn snap_back(rect: &Rect, bounds: &Rect, side: Direction) -> f32 {
    let p = penetration(rect, bounds, side) + SNAP_EPSILON;
    match side {
        Direction::Left | Direction::Up => p,
        _ => -p,
    }
}

/// Resolve movement of `rect` by `delta` against the cached collision rect.
///
/// For each axis independently: if the rect crossed the edge it moves towards
/// and that edge is solid, snap back. If the edge is open but both axes crossed
/// into a solid diagonal corner, snap the axis with the smaller penetration
/// (the other axis is where the body came from). Near ties snap the axis with
/// the smaller displacement, so the body slides along the corner.
pub fn check_collision(
    rect: &Rect,
    bounds: &PointRect,
    local_collision: CollisionDirs,
    delta: Vec2,
) -> CollisionResolution {
    let bounds = bounds.to_rect();
    let mut out = CollisionResolution::default();

    let side_x = if delta.x > 0.0 {
        Direction::Right
    } else if delta.x < 0.0 {
        Direction::Left
    } else {
        Direction::None
    };
    let side_y = if delta.y > 0.0 {
        Direction::Down
    } else if delta.y < 0.0 {
        Direction::Up
    } else {
        Direction::None
    };

    // Edges can also be crossed with a zero delta on that axis if a previous
    // correction left the rect outside; check every crossed side in that case.
    let crossed =
        |side: Direction| side != Direction::None && penetration(rect, &bounds, side) > CROSS_SLACK;
    let side_x = if side_x == Direction::None {
        [Direction::Left, Direction::Right]
            .into_iter()
            .find(|s| crossed(*s))
            .unwrap_or(Direction::None)
    } else {
        side_x
    };
    let side_y = if side_y == Direction::None {
        [Direction::Up, Direction::Down]
            .into_iter()
            .find(|s| crossed(*s))
            .unwrap_or(Direction::None)
    } else {
        side_y
    };

    let cross_x = crossed(side_x);
    let cross_y = crossed(side_y);
    let mut snap_x = cross_x && local_collision.contains(CollisionDirs::edge(side_x));
    let mut snap_y = cross_y && local_collision.contains(CollisionDirs::edge(side_y));

    if cross_x && cross_y && !snap_x && !snap_y {
        let corner = CollisionDirs::corner(side_x, side_y);
        if local_collision.contains(corner) {
            let px = penetration(rect, &bounds, side_x);
            let py = penetration(rect, &bounds, side_y);
            if (px - py).abs() <= CORNER_TIE {
                if delta.x.abs() < delta.y.abs() {
                    snap_x = true;
                } else {
                    snap_y = true;
                }
            } else if px < py {
                snap_x = true;
            } else {
                snap_y = true;
            }
        }
    }

    if snap_x {
        out.correction.x = snap_back(rect, &bounds, side_x);
        out.snapped.insert(CollisionDirs::edge(side_x));
    }
    if snap_y {
        out.correction.y = snap_back(rect, &bounds, side_y);
        out.snapped.insert(CollisionDirs::edge(side_y));
    }
    out
}

/// Edges of `bounds` that `rect` is flush against (within `tolerance`) and that
/// are solid in `local_collision`
pub fn touching_directions(
    rect: &Rect,
    bounds: &PointRect,
    local_collision: CollisionDirs,
    tolerance: f32,
) -> CollisionDirs {
    let bounds = bounds.to_rect();
    let mut out = CollisionDirs::NONE;
    for side in Direction::CARDINALS {
        let flag = CollisionDirs::edge(side);
        if local_collision.contains(flag) && penetration(rect, &bounds, side) > -tolerance {
            out.insert(flag);
        }
    }
    out
}
