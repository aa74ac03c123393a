//! Canned-move locomotion: constant-speed directives and animations

use std::rc::Rc;

use glam::Vec2;

use super::{DirtyLevel, same_move, world_axes};
use crate::consts::TILE_EPSILON;
use crate::geom::{Direction, rotate_to_world};
use crate::sim::collision::CollisionResolution;
use crate::sim::entity::{Entity, EntityHandle};
use crate::sim::events::ScriptCallback;
use crate::sim::moves::Move;
use crate::sim::world::Simulation;

/// Upper bound on integration pieces per tick
const MAX_STEPS: usize = 16;

/// First tile-grid snap point crossed by moving `delta` from the current
/// position: the fraction of `delta` to reach it and the exact position
/// there. A boundary within `TILE_EPSILON` ahead counts as reached, so float
/// residue never lets a step skip over it.
fn next_snap_crossing(e: &Entity, delta: Vec2) -> Option<(f32, Vec2)> {
    let min = e.position + e.local_tile_rect.min();
    let mut best: Option<(f32, usize, f32)> = None;
    for axis in 0..2 {
        let d = delta[axis];
        if d == 0.0 {
            continue;
        }
        let m = min[axis];
        let next = if d > 0.0 {
            let b = (m + TILE_EPSILON).floor();
            if m < b { b } else { b + 1.0 }
        } else {
            let b = (m - TILE_EPSILON).ceil();
            if m > b { b } else { b - 1.0 }
        };
        let t = ((next - m) / d).max(0.0);
        if t <= 1.0 + TILE_EPSILON / d.abs() && best.is_none_or(|(bt, _, _)| t < bt) {
            best = Some((t.min(1.0), axis, next));
        }
    }
    best.map(|(t, axis, next)| {
        let mut pos = e.position + delta * t;
        pos[axis] = next - e.local_tile_rect.min()[axis];
        (t, pos)
    })
}

impl Simulation {
    /// Integrate the current directive move, stopping at each tile-grid snap
    /// point to refresh collision, survey and the oracle's choice
    pub(crate) fn do_normal_movement(&mut self, h: EntityHandle, dt: f32) {
        let (Some(e), Some(c)) = (self.entities.get(h), self.controller(h)) else {
            return;
        };
        let start = e.position;
        let orientation = e.orientation_down;
        let current = c.current_move.clone();
        let ignore_collision = current.as_deref().is_some_and(|m| m.flags.ignore_collision);
        let velocity = current
            .as_deref()
            .map(|m| rotate_to_world(m.speed, orientation))
            .unwrap_or(Vec2::ZERO);
        let world_dir = rotate_to_world(c.direction.to_vec2(), orientation);

        self.apply_external_push(h);
        if let Some(c) = self.controller_mut(h) {
            c.speed = velocity;
        }

        let mut remaining = velocity * dt;
        for _ in 0..MAX_STEPS {
            if remaining == Vec2::ZERO {
                break;
            }
            let Some(e) = self.entities.get(h) else {
                return;
            };
            let before = e.position;
            let mut crossing = next_snap_crossing(e, remaining);
            let mut part = match crossing {
                Some((t, _)) if t < 1.0 => remaining * t,
                _ => remaining,
            };
            // Never travel past the end of a distance-limited move
            let left = self.distance_left(h);
            let along = part.dot(world_dir);
            let reaches_end = left.is_some_and(|left| along >= left);
            if let Some(left) = left
                && along > left
            {
                part *= (left / along).max(0.0);
                crossing = None;
            }
            remaining = if reaches_end || part == remaining {
                Vec2::ZERO
            } else {
                remaining - part
            };

            let res = if ignore_collision {
                self.translate(h, part);
                CollisionResolution::default()
            } else {
                self.move_with_collision(h, part)
            };
            if let Some((_, exact)) = crossing
                && !res.hit()
                && let Some(e) = self.entities.get_mut(h)
            {
                e.position = exact;
            }

            let moved = self.entities.get(h).map(|e| e.position - before).unwrap_or_default();
            if let Some(c) = self.controller_mut(h) {
                c.distance = if reaches_end && !res.hit() {
                    c.end_distance
                } else {
                    c.distance + moved.dot(world_dir)
                };
            }
            let update = self.update_rects(h, None);
            if update.tile_rect_changed || crossing.is_some() {
                self.update_local_collision(h);
                self.update_survey(h, true);
            }
            if update.tile_rect_changed
                && let Some(c) = self.controller_mut(h)
            {
                c.mark_dirty(DirtyLevel::ReevalMove);
            }

            if res.hit() {
                self.on_move_blocked(h);
                break;
            }
            if self.end_distance_reached(h) {
                self.end_distance_move(h);
                break;
            }
            if crossing.is_some() && self.requery_at_snap_point(h) {
                break;
            }
        }

        let end = self.entities.get(h).map(|e| e.position).unwrap_or(start);
        self.finish_update(h, end - start);
    }

    fn end_distance_reached(&self, h: EntityHandle) -> bool {
        self.controller(h).is_some_and(|c| {
            c.current_move.is_some() && c.end_distance >= 0.0 && c.distance >= c.end_distance
        })
    }

    /// Distance still to cover before a distance-limited move ends
    fn distance_left(&self, h: EntityHandle) -> Option<f32> {
        self.controller(h)
            .filter(|c| c.current_move.is_some() && c.end_distance >= 0.0)
            .map(|c| c.end_distance - c.distance)
    }

    /// Ask the oracle again at a snap point. True when the move changed and
    /// the rest of this tick's displacement must be dropped.
    fn requery_at_snap_point(&mut self, h: EntityHandle) -> bool {
        let (Some(e), Some(c)) = (self.entities.get(h), self.controller(h)) else {
            return true;
        };
        if c.move_committed() {
            return false;
        }
        let next = c
            .move_set
            .get_move(c.requested_direction, c.current_move.as_deref(), &e.survey);
        if same_move(next.as_ref(), c.current_move.as_ref()) {
            return false;
        }
        self.on_new_tile_position(h, next);
        true
    }

    /// Switch moves after arriving on a new tile
    fn on_new_tile_position(&mut self, h: EntityHandle, next: Option<Rc<Move>>) {
        match next {
            Some(m) => self.set_current_move(h, Some(m)),
            None => {
                let direction = self
                    .controller(h)
                    .map(|c| c.requested_direction)
                    .unwrap_or_default();
                self.do_move_failed_logic(h, direction);
            }
        }
    }

    /// A snap stopped the move. Committed moves are cancelled; plain
    /// directives get reselected on the next `update_changes`.
    fn on_move_blocked(&mut self, h: EntityHandle) {
        let Some(c) = self.controller_mut(h) else {
            return;
        };
        c.mark_dirty(DirtyLevel::ReevalMove);
        if !c.move_committed() {
            return;
        }
        let direction = c.direction;
        let move_name = c.current_move_name().unwrap_or_default().to_string();
        c.requested_direction = Direction::None;
        log::debug!("{:?}: move '{}' blocked", h, move_name);
        self.events
            .push(h, ScriptCallback::MovementFailed { direction, move_name });
        self.select_move(h, Direction::None, true);
    }

    /// Apply the move's end snaps to the position
    fn apply_end_snap(&mut self, h: EntityHandle) {
        let Some(ch) = self.controller_handle(h) else {
            return;
        };
        let (Some(e), Some(c)) = (self.entities.get_mut(h), self.controllers.get(ch)) else {
            return;
        };
        let Some(m) = c.current_move.as_deref() else {
            return;
        };
        let (sx, sy) = world_axes(m.flags.snap_x_end, m.flags.snap_y_end, e.orientation_down);
        if !(sx || sy) {
            return;
        }
        let pos = e.snapped_axis(e.position, sx, sy);
        if pos == e.position {
            return;
        }
        e.position = pos;
        let update = self.update_rects(h, None);
        if update.tile_rect_changed {
            self.update_local_collision(h);
            self.update_survey(h, true);
        }
    }

    /// A distance-limited move covered its distance
    fn end_distance_move(&mut self, h: EntityHandle) {
        self.apply_end_snap(h);
        let Some(c) = self.controller_mut(h) else {
            return;
        };
        let direction = c.direction;
        c.requested_direction = Direction::None;
        log::debug!("{:?}: move ended after {:.3}", h, c.distance);
        self.events.push(h, ScriptCallback::MovementEnded { direction });
        self.select_move(h, Direction::None, true);
    }

    /// Advance the canned animation of the current move
    pub(crate) fn do_animation(&mut self, h: EntityHandle, dt: f32) {
        let (Some(e), Some(c)) = (self.entities.get(h), self.controller(h)) else {
            return;
        };
        let Some(m) = c.current_move.clone() else {
            return;
        };
        if c.animation_move_canceled {
            self.end_animation(h);
            return;
        }
        let start = e.position;
        let orientation = e.orientation_down;
        let world_dir = rotate_to_world(c.direction.to_vec2(), orientation);
        let old_t = c.animation_time;
        let new_t = (old_t + dt).min(m.time_length());
        let delta = rotate_to_world(
            m.animation_offset_at(new_t) - m.animation_offset_at(old_t),
            orientation,
        );

        self.apply_external_push(h);
        let before = self.entities.get(h).map(|e| e.position).unwrap_or(start);
        let res = if m.flags.ignore_collision {
            self.translate(h, delta);
            CollisionResolution::default()
        } else {
            self.move_with_collision(h, delta)
        };
        let moved = self.entities.get(h).map(|e| e.position - before).unwrap_or_default();
        if let Some(c) = self.controller_mut(h) {
            c.animation_time = new_t;
            c.distance += moved.dot(world_dir);
            c.speed = if dt > 0.0 { delta / dt } else { Vec2::ZERO };
            if res.hit() {
                log::debug!("{:?}: animation '{}' cancelled by collision", h, m.name);
                c.animation_move_canceled = true;
            }
        }

        let update = self.update_rects(h, None);
        if update.tile_rect_changed {
            self.update_local_collision(h);
            self.update_survey(h, true);
        }
        if !res.hit() && new_t >= m.time_length() {
            self.end_animation(h);
        }

        let end = self.entities.get(h).map(|e| e.position).unwrap_or(start);
        self.finish_update(h, end - start);
    }

    /// Finish (or drop a cancelled) animation and pick what follows
    fn end_animation(&mut self, h: EntityHandle) {
        self.apply_end_snap(h);
        let Some(c) = self.controller_mut(h) else {
            return;
        };
        let direction = c.direction;
        let requested = c.requested_direction;
        c.animation_move_canceled = false;
        self.events.push(h, ScriptCallback::MovementEnded { direction });
        self.select_move(h, requested, true);
    }
}
