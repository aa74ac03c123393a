//! Physics-integrated movement modes
//!
//! All five physics modes share one integrator; they differ only in how the
//! steering control vector is derived.

use glam::Vec2;

use super::PhysicsMovementMode;
use crate::consts::{TURN_DISTANCE, VELOCITY_CLIP};
use crate::geom::{Direction, rotate_to_local};
use crate::settings::PhysicsSettings;
use crate::sim::collision::CollisionResolution;
use crate::sim::entity::EntityHandle;
use crate::sim::events::ScriptCallback;
use crate::sim::path::AgentState;
use crate::sim::world::Simulation;
use crate::clamp_length;

/// One explicit Euler step: thrust along `control` plus external force,
/// divided by mass, then drag, then the speed cap
pub fn integrate_velocity(
    speed: Vec2,
    control: Vec2,
    external_force: Vec2,
    settings: &PhysicsSettings,
    drag: f32,
    dt: f32,
) -> Vec2 {
    let accel = (control * settings.thrust + external_force) / settings.mass;
    let v = (speed + accel * dt) / (1.0 + drag * dt);
    clamp_length(v, settings.max_speed)
}

/// Scale a unit steering vector down inside the ease-out envelope
fn eased(to_target: Vec2, settings: &PhysicsSettings) -> Vec2 {
    let dist = to_target.length();
    if dist <= 0.0 {
        return Vec2::ZERO;
    }
    let factor = if settings.ease_out_distance > 0.0 {
        (dist / settings.ease_out_distance).min(1.0)
    } else {
        1.0
    };
    to_target / dist * factor
}

/// What the mode asks for this tick
enum Steering {
    Control(Vec2),
    Arrived,
    /// Target gone; not an error
    TargetLost,
    PathFailed(Vec2),
}

impl Simulation {
    fn physics_steering(&mut self, h: EntityHandle) -> Steering {
        let (Some(e), Some(c)) = (self.entities.get(h), self.controller(h)) else {
            return Steering::Control(Vec2::ZERO);
        };
        let center = e.world_rect.center();
        let settings = c.physics;
        let to_target = match c.physics_mode {
            PhysicsMovementMode::None | PhysicsMovementMode::Idle => {
                return Steering::Control(Vec2::ZERO);
            }
            PhysicsMovementMode::Direction => return Steering::Control(c.physics_direction),
            PhysicsMovementMode::Point => c.target_point - center,
            PhysicsMovementMode::Entity => match self.entities.get(c.target_entity) {
                Some(t) => t.world_rect.center() + c.target_offset - center,
                None => return Steering::TargetLost,
            },
            PhysicsMovementMode::Path => {
                let Some(agent) = c.path_agent else {
                    return Steering::TargetLost;
                };
                self.path_cache.update_agent_position(agent, center);
                return match self.path_cache.agent_state(agent) {
                    Some(AgentState::Moving) => {
                        let velocity = self.path_cache.agent_velocity(agent);
                        let control = if settings.max_speed > 0.0 {
                            clamp_length(velocity / settings.max_speed, 1.0)
                        } else {
                            Vec2::ZERO
                        };
                        match self.path_cache.agent_end_point(agent) {
                            Some(end) => {
                                let factor = eased(end - center, &settings).length();
                                Steering::Control(control * factor)
                            }
                            None => Steering::Control(control),
                        }
                    }
                    Some(AgentState::Arrived) => Steering::Arrived,
                    Some(AgentState::Failed) => Steering::PathFailed(
                        self.path_cache.agent_end_point(agent).unwrap_or(center),
                    ),
                    None => Steering::TargetLost,
                };
            }
        };
        if to_target.length() <= settings.move_end_distance {
            Steering::Arrived
        } else {
            Steering::Control(eased(to_target, &settings))
        }
    }

    /// The steered move is over; integration continues in `Idle`
    fn end_physics_move(&mut self, h: EntityHandle) {
        let Some(orientation) = self.entities.get(h).map(|e| e.orientation_down) else {
            return;
        };
        let Some(c) = self.controller(h) else {
            return;
        };
        let direction = Direction::from_vec2(rotate_to_local(c.speed, orientation));
        self.start_physics_idle(h);
        self.events.push(h, ScriptCallback::MovementEnded { direction });
    }

    /// Flip facing when the steering x sign opposes it past the hysteresis
    fn physics_turn(&mut self, h: EntityHandle, steer: Vec2) {
        let Some(e) = self.entities.get_mut(h) else {
            return;
        };
        let local_x = rotate_to_local(steer, e.orientation_down).x;
        let turn = if e.orientation_forward_is_left {
            local_x > TURN_DISTANCE
        } else {
            local_x < -TURN_DISTANCE
        };
        if turn {
            e.orientation_forward_is_left = !e.orientation_forward_is_left;
            log::trace!("'{}' turns", e.name);
            self.events.push(h, ScriptCallback::PhysicsTurn);
        }
    }

    pub(crate) fn do_physics_movement(&mut self, h: EntityHandle, dt: f32) {
        let control = match self.physics_steering(h) {
            Steering::Control(control) => control,
            Steering::Arrived => {
                self.end_physics_move(h);
                Vec2::ZERO
            }
            Steering::TargetLost => {
                log::debug!("{:?}: movement target lost", h);
                self.end_physics_move(h);
                Vec2::ZERO
            }
            Steering::PathFailed(point) => {
                log::debug!("{:?}: no path to {}", h, point);
                self.stop_movement(h);
                self.events.push(h, ScriptCallback::PathMovementFailed { point });
                return;
            }
        };
        self.physics_turn(h, control);

        let Some(start) = self.entities.get(h).map(|e| e.position) else {
            return;
        };
        let Some(c) = self.controller_mut(h) else {
            return;
        };
        let drag = if c.has_solid_collision {
            c.physics.collision_drag
        } else {
            c.physics.drag
        };
        c.speed = integrate_velocity(c.speed, control, c.external_force, &c.physics, drag, dt);
        let step = c.speed * dt;

        self.apply_external_push(h);
        let res = self.move_with_collision(h, step);
        self.resolve_physics_contact(h, res);

        let update = self.update_rects(h, None);
        if update.tile_rect_changed {
            self.update_local_collision(h);
            self.update_survey(h, true);
        }
        let end = self.entities.get(h).map(|e| e.position).unwrap_or(start);
        self.finish_update(h, end - start);
    }

    /// Clip, bounce or rest against the contact normal; one script callback
    /// per new contact normal
    fn resolve_physics_contact(&mut self, h: EntityHandle, res: CollisionResolution) {
        let touching = self.touching_collision_directions(h);
        let Some(c) = self.controller_mut(h) else {
            return;
        };
        if !res.hit() {
            if touching.is_empty() || touching.normal() != c.last_solid_normal {
                c.has_solid_collision = false;
                c.last_solid_normal = Vec2::ZERO;
            }
            return;
        }

        let mut v = c.speed;
        if v.x.abs() < VELOCITY_CLIP {
            v.x = 0.0;
        }
        if v.y.abs() < VELOCITY_CLIP {
            v.y = 0.0;
        }
        let normal = res.snapped.normal();
        let vn = v.dot(normal);
        if vn < 0.0 {
            let bounced = -vn * c.physics.bouncyness;
            v += normal * (bounced - vn);
            c.has_solid_collision = bounced < VELOCITY_CLIP;
        } else {
            c.has_solid_collision = true;
        }
        c.speed = v;

        if normal != c.last_solid_normal {
            c.last_solid_normal = normal;
            let speed = (-vn).max(0.0);
            log::trace!("{:?}: solid contact {} at {:.3}", h, normal, speed);
            self.events
                .push(h, ScriptCallback::SolidCollision { normal, speed });
        }
    }
}
