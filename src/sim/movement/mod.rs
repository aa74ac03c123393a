//! Directional movement controller
//!
//! One controller per movable entity, owned by the entity through a handle and
//! stored in the simulation's controller arena. The controller is a per-tick
//! state machine with two families of locomotion:
//!
//! - canned moves chosen by the [`MoveSet`] oracle (`PhysicsMovementMode::None`)
//! - physics-integrated free movement (every other mode)
//!
//! Submodules hold the tick-time halves: `normal` (moves and animations),
//! `physics`, `collision` (local collision cache, pushing, carrying) and
//! `parent` (the collision-parent graph).

mod collision;
mod normal;
mod parent;
mod physics;

pub use collision::TOUCH_TOLERANCE;
pub use physics::integrate_velocity;

use std::collections::BTreeSet;
use std::rc::Rc;

use glam::Vec2;

use super::entity::EntityHandle;
use super::events::ScriptCallback;
use super::moves::{Move, MoveSet, Transition};
use super::path::AgentId;
use super::world::Simulation;
use crate::geom::{CollisionDirs, Direction, PointRect, rotate_to_world};
use crate::handle::Handle;
use crate::settings::PhysicsSettings;
use crate::sim_panic;

pub type ControllerHandle = Handle<DirectionalMovementController>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhysicsMovementMode {
    /// Canned moves drive the entity
    #[default]
    None,
    /// Physics integration with no steering
    Idle,
    Direction,
    Point,
    Entity,
    Path,
}

impl PhysicsMovementMode {
    pub fn as_u8(self) -> u8 {
        match self {
            PhysicsMovementMode::None => 0,
            PhysicsMovementMode::Idle => 1,
            PhysicsMovementMode::Direction => 2,
            PhysicsMovementMode::Point => 3,
            PhysicsMovementMode::Entity => 4,
            PhysicsMovementMode::Path => 5,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => PhysicsMovementMode::None,
            1 => PhysicsMovementMode::Idle,
            2 => PhysicsMovementMode::Direction,
            3 => PhysicsMovementMode::Point,
            4 => PhysicsMovementMode::Entity,
            5 => PhysicsMovementMode::Path,
            _ => return None,
        })
    }

    pub fn is_physics(self) -> bool {
        self != PhysicsMovementMode::None
    }
}

/// What must be recomputed on the next `update_changes`; requests coalesce
/// to the highest level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DirtyLevel {
    #[default]
    Nothing,
    UpdateSurvey,
    ReevalMove,
}

impl DirtyLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => DirtyLevel::Nothing,
            1 => DirtyLevel::UpdateSurvey,
            2 => DirtyLevel::ReevalMove,
            _ => return None,
        })
    }
}

#[derive(Debug)]
pub struct DirectionalMovementController {
    pub(crate) entity: EntityHandle,
    pub(crate) move_set: Rc<MoveSet>,
    /// Created only to carry graph edges or pushes; the oracle never picks
    /// moves for it until a movement is requested
    pub(crate) passive: bool,

    // Move selection
    pub(crate) direction: Direction,
    pub(crate) requested_direction: Direction,
    pub(crate) current_move: Option<Rc<Move>>,
    pub(crate) previous_move: Option<Rc<Move>>,
    pub(crate) transition: Option<Transition>,
    pub(crate) distance: f32,
    pub(crate) end_distance: f32,
    pub(crate) animation_time: f32,
    pub(crate) animation_move_canceled: bool,

    // Physics
    pub(crate) physics_mode: PhysicsMovementMode,
    pub(crate) physics: PhysicsSettings,
    pub(crate) speed: Vec2,
    pub(crate) external_force: Vec2,
    /// Displacement applied once on the next update, then cleared
    pub(crate) external_push: Vec2,
    pub(crate) physics_direction: Vec2,
    pub(crate) target_point: Vec2,
    pub(crate) target_entity: EntityHandle,
    pub(crate) target_offset: Vec2,
    pub(crate) path_agent: Option<AgentId>,
    pub(crate) path_target: Option<Vec2>,
    pub(crate) has_solid_collision: bool,
    pub(crate) last_solid_normal: Vec2,

    // Local collision cache
    pub(crate) local_collision: CollisionDirs,
    pub(crate) local_collision_tile_rect: PointRect,

    // Collision-parent graph
    pub(crate) collision_parent: EntityHandle,
    pub(crate) collision_parent_scheduled: EntityHandle,
    pub(crate) collision_children: BTreeSet<EntityHandle>,
    pub(crate) collision_ancestor: EntityHandle,
    pub(crate) sort_weight: i32,
    pub(crate) reevaluate_parent_scheduled: bool,
    /// Entity whose change scheduled the reevaluation (`NULL`: unknown or
    /// several)
    pub(crate) reevaluate_parent_caller: EntityHandle,

    // Hard parent
    pub(crate) parent_entity: EntityHandle,
    pub(crate) parent_offset: Vec2,

    pub(crate) dirty: DirtyLevel,
    pub(crate) flow_direction: f32,
    /// World displacement of the last update
    pub(crate) last_delta: Vec2,
}

impl DirectionalMovementController {
    pub(crate) fn new(entity: EntityHandle, move_set: Rc<MoveSet>, physics: PhysicsSettings) -> Self {
        Self {
            entity,
            move_set,
            passive: false,
            direction: Direction::None,
            requested_direction: Direction::None,
            current_move: None,
            previous_move: None,
            transition: None,
            distance: 0.0,
            end_distance: -1.0,
            animation_time: 0.0,
            animation_move_canceled: false,
            physics_mode: PhysicsMovementMode::None,
            physics,
            speed: Vec2::ZERO,
            external_force: Vec2::ZERO,
            external_push: Vec2::ZERO,
            physics_direction: Vec2::ZERO,
            target_point: Vec2::ZERO,
            target_entity: Handle::NULL,
            target_offset: Vec2::ZERO,
            path_agent: None,
            path_target: None,
            has_solid_collision: false,
            last_solid_normal: Vec2::ZERO,
            local_collision: CollisionDirs::NONE,
            local_collision_tile_rect: PointRect::EMPTY,
            collision_parent: Handle::NULL,
            collision_parent_scheduled: Handle::NULL,
            collision_children: BTreeSet::new(),
            collision_ancestor: Handle::NULL,
            sort_weight: 0,
            reevaluate_parent_scheduled: true,
            reevaluate_parent_caller: Handle::NULL,
            parent_entity: Handle::NULL,
            parent_offset: Vec2::ZERO,
            dirty: DirtyLevel::ReevalMove,
            flow_direction: 1.0,
            last_delta: Vec2::ZERO,
        }
    }

    pub(crate) fn mark_dirty(&mut self, level: DirtyLevel) {
        self.dirty = self.dirty.max(level);
    }

    pub fn entity(&self) -> EntityHandle {
        self.entity
    }

    pub fn move_set(&self) -> &Rc<MoveSet> {
        &self.move_set
    }

    pub fn is_passive(&self) -> bool {
        self.passive
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn requested_direction(&self) -> Direction {
        self.requested_direction
    }

    pub fn current_move(&self) -> Option<&Move> {
        self.current_move.as_deref()
    }

    pub fn current_move_name(&self) -> Option<&str> {
        self.current_move.as_deref().map(|m| m.name.as_str())
    }

    pub fn previous_move(&self) -> Option<&Move> {
        self.previous_move.as_deref()
    }

    pub fn transition(&self) -> Option<&Transition> {
        self.transition.as_ref()
    }

    pub fn distance(&self) -> f32 {
        self.distance
    }

    pub fn end_distance(&self) -> f32 {
        self.end_distance
    }

    pub fn animation_time(&self) -> f32 {
        self.animation_time
    }

    pub fn physics_mode(&self) -> PhysicsMovementMode {
        self.physics_mode
    }

    pub fn physics(&self) -> &PhysicsSettings {
        &self.physics
    }

    pub fn speed(&self) -> Vec2 {
        self.speed
    }

    pub fn external_force(&self) -> Vec2 {
        self.external_force
    }

    pub fn external_push(&self) -> Vec2 {
        self.external_push
    }

    pub fn has_solid_collision(&self) -> bool {
        self.has_solid_collision
    }

    pub fn last_solid_normal(&self) -> Vec2 {
        self.last_solid_normal
    }

    pub fn local_collision(&self) -> CollisionDirs {
        self.local_collision
    }

    pub fn local_collision_tile_rect(&self) -> PointRect {
        self.local_collision_tile_rect
    }

    pub fn collision_parent(&self) -> EntityHandle {
        self.collision_parent
    }

    pub fn collision_parent_scheduled(&self) -> EntityHandle {
        self.collision_parent_scheduled
    }

    pub fn collision_children(&self) -> &BTreeSet<EntityHandle> {
        &self.collision_children
    }

    /// Cached root of the collision-parent chain (`NULL` for roots)
    pub fn collision_ancestor(&self) -> EntityHandle {
        self.collision_ancestor
    }

    pub fn sort_weight(&self) -> i32 {
        self.sort_weight
    }

    pub fn dirty_level(&self) -> DirtyLevel {
        self.dirty
    }

    pub fn parent_entity(&self) -> EntityHandle {
        self.parent_entity
    }

    pub fn flow_direction(&self) -> f32 {
        self.flow_direction
    }

    pub fn last_delta(&self) -> Vec2 {
        self.last_delta
    }

    pub fn path_agent(&self) -> Option<AgentId> {
        self.path_agent
    }

    /// A persistent animation that has not finished yet
    fn persistent_move_running(&self) -> bool {
        self.current_move.as_deref().is_some_and(|m| {
            m.flags.persistent
                && m.is_animation()
                && !self.animation_move_canceled
                && self.animation_time < m.time_length()
        })
    }

    /// Moves the oracle must not replace mid-flight
    fn move_committed(&self) -> bool {
        self.persistent_move_running()
            || self.current_move.is_some() && self.end_distance >= 0.0
    }
}

/// Map local snap axes to world axes for an orientation
pub(crate) fn world_axes(x: bool, y: bool, orientation_down: Direction) -> (bool, bool) {
    if orientation_down.is_horizontal() {
        (y, x)
    } else {
        (x, y)
    }
}

fn same_move(a: Option<&Rc<Move>>, b: Option<&Rc<Move>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Rc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

impl Simulation {
    /// Create the controller for `h` if it has none yet
    pub fn ensure_controller(&mut self, h: EntityHandle) -> Option<ControllerHandle> {
        let e = self.entities.get(h)?;
        if let Some(ch) = e.movement_controller {
            return Some(ch);
        }
        if e.state == super::entity::EntityState::Deinitialized {
            return None;
        }
        let set = match &e.move_set {
            Some(set) => Rc::clone(set),
            None => self.default_move_set(),
        };
        let controller = DirectionalMovementController::new(h, set, e.physics);
        let ch = self.controllers.insert(controller);
        if let Some(e) = self.entities.get_mut(h) {
            e.movement_controller = Some(ch);
            log::debug!("movement controller created for '{}'", e.name);
        }
        Some(ch)
    }

    /// Controller for an entity that only needs to hold collision-graph
    /// edges or receive pushes. A newly created one is passive: it never
    /// selects moves of its own.
    pub(crate) fn ensure_passive_controller(&mut self, h: EntityHandle) -> Option<ControllerHandle> {
        if let Some(ch) = self.controller_handle(h) {
            return Some(ch);
        }
        let ch = self.ensure_controller(h)?;
        if let Some(c) = self.controllers.get_mut(ch) {
            c.passive = true;
        }
        Some(ch)
    }

    /// Controller that will drive `h`: an explicit movement request wakes a
    /// passive one
    fn activate_controller(&mut self, h: EntityHandle) -> Option<ControllerHandle> {
        let ch = self.ensure_controller(h)?;
        if let Some(c) = self.controllers.get_mut(ch)
            && c.passive
        {
            log::debug!("{:?}: passive controller activated", h);
            c.passive = false;
            c.mark_dirty(DirtyLevel::ReevalMove);
        }
        Some(ch)
    }

    /// Detach from the graph, drop the path agent and free the controller
    pub(crate) fn destroy_controller(&mut self, h: EntityHandle) {
        let Some(ch) = self.controller_handle(h) else {
            return;
        };
        let children: Vec<EntityHandle> = self
            .controller(h)
            .map(|c| c.collision_children.iter().copied().collect())
            .unwrap_or_default();
        for child in children {
            if let Some(c) = self.controller_mut(child) {
                c.collision_parent_scheduled = Handle::NULL;
            }
            self.make_scheduled_collision_parent_current(child);
        }
        if let Some(c) = self.controller_mut(h) {
            c.collision_parent_scheduled = Handle::NULL;
        }
        self.make_scheduled_collision_parent_current(h);
        self.release_path_agent(h);

        self.controllers.remove(ch);
        if let Some(e) = self.entities.get_mut(h) {
            e.movement_controller = None;
        }
    }

    /// Request canned movement in a local direction. Returns false when the
    /// oracle has no move for it (the failure fallback has run by then).
    pub fn start_new_movement(&mut self, h: EntityHandle, direction: Direction) -> bool {
        if self.activate_controller(h).is_none() {
            return false;
        }
        self.leave_physics_mode(h);
        let Some(c) = self.controller_mut(h) else {
            return false;
        };
        c.requested_direction = direction;
        if c.persistent_move_running() {
            log::trace!("{:?}: direction {:?} deferred by persistent move", h, direction);
            return true;
        }
        self.select_move(h, direction, false)
    }

    /// Like [`Simulation::start_new_movement`], but a no-op when the
    /// direction is already requested
    pub fn change_direction(&mut self, h: EntityHandle, direction: Direction) -> bool {
        if let Some(c) = self.controller(h)
            && !c.physics_mode.is_physics()
            && c.requested_direction == direction
            && c.current_move.is_some()
        {
            return true;
        }
        self.start_new_movement(h, direction)
    }

    /// Start a move by name, bypassing the oracle; `end_distance` overrides
    /// the move's own limit
    pub fn start_named_move(&mut self, h: EntityHandle, name: &str, end_distance: Option<f32>) -> bool {
        if self.activate_controller(h).is_none() {
            return false;
        }
        self.leave_physics_mode(h);
        let Some(c) = self.controller_mut(h) else {
            return false;
        };
        let Some(m) = c.move_set.find(name) else {
            let direction = c.requested_direction;
            log::warn!("unknown move '{name}'");
            self.events.push(
                h,
                ScriptCallback::MovementFailed {
                    direction,
                    move_name: name.to_string(),
                },
            );
            return false;
        };
        c.requested_direction = m.direction;
        self.set_current_move(h, Some(m));
        if let (Some(d), Some(c)) = (end_distance, self.controller_mut(h)) {
            c.end_distance = d;
        }
        true
    }

    /// Ask the oracle for `direction` and switch to its answer. With
    /// `restart`, an unchanged answer starts over as a fresh move.
    fn select_move(&mut self, h: EntityHandle, direction: Direction, restart: bool) -> bool {
        let Some(survey) = self.entities.get(h).map(|e| e.survey) else {
            return false;
        };
        let Some(c) = self.controller(h) else {
            return false;
        };
        match c.move_set.get_move(direction, c.current_move.as_deref(), &survey) {
            Some(m) => {
                if restart || !same_move(Some(&m), c.current_move.as_ref()) {
                    self.set_current_move(h, Some(m));
                }
                true
            }
            None => {
                self.do_move_failed_logic(h, direction);
                false
            }
        }
    }

    /// Report the failure and fall back to the idle move
    fn do_move_failed_logic(&mut self, h: EntityHandle, direction: Direction) {
        let Some(survey) = self.entities.get(h).map(|e| e.survey) else {
            return;
        };
        let Some(c) = self.controller(h) else {
            return;
        };
        let move_name = c.current_move_name().unwrap_or_default().to_string();
        let idle = c
            .move_set
            .get_move(Direction::None, c.current_move.as_deref(), &survey);
        let changed = !same_move(idle.as_ref(), c.current_move.as_ref());
        log::debug!("{:?}: no move for {:?} (current '{}')", h, direction, move_name);
        self.events
            .push(h, ScriptCallback::MovementFailed { direction, move_name });
        if changed {
            self.set_current_move(h, idle);
        }
    }

    /// Replace the current move, resetting per-move progress
    pub(crate) fn set_current_move(&mut self, h: EntityHandle, m: Option<Rc<Move>>) {
        let Some(ch) = self.controller_handle(h) else {
            return;
        };
        let (Some(e), Some(c)) = (self.entities.get_mut(h), self.controllers.get_mut(ch)) else {
            return;
        };
        let prev = c.current_move.take();
        c.transition = match (&prev, &m) {
            (Some(p), Some(n)) if p.name != n.name => c.move_set.transition(p, n),
            _ => None,
        };
        c.previous_move = prev;
        c.distance = 0.0;
        c.animation_time = 0.0;
        c.animation_move_canceled = false;

        let mut snapped = false;
        match &m {
            Some(mv) => {
                log::debug!("'{}' -> move '{}'", e.name, mv.name);
                c.direction = mv.direction;
                c.end_distance = mv.end_distance;
                c.speed = rotate_to_world(mv.speed, e.orientation_down);
                let (sx, sy) = world_axes(
                    mv.flags.snap_x_start,
                    mv.flags.snap_y_start,
                    e.orientation_down,
                );
                if sx || sy {
                    let pos = e.snapped_axis(e.position, sx, sy);
                    snapped = pos != e.position;
                    e.position = pos;
                }
            }
            None => {
                c.direction = Direction::None;
                c.end_distance = -1.0;
                c.speed = Vec2::ZERO;
            }
        }
        c.current_move = m;

        if snapped {
            let update = self.update_rects(h, None);
            if update.tile_rect_changed {
                self.update_local_collision(h);
                self.update_survey(h, true);
            }
        }
    }

    /// Drop the current move and ask the oracle again (orientation changes)
    pub(crate) fn reselect_current_move(&mut self, h: EntityHandle) {
        let Some(c) = self.controller_mut(h) else {
            return;
        };
        if c.physics_mode.is_physics() || c.passive {
            return;
        }
        c.previous_move = c.current_move.take();
        let direction = c.requested_direction;
        self.select_move(h, direction, false);
    }

    pub(crate) fn release_path_agent(&mut self, h: EntityHandle) {
        let agent = self.controller_mut(h).and_then(|c| {
            c.path_target = None;
            c.path_agent.take()
        });
        if let Some(agent) = agent {
            self.path_cache.remove_agent(agent);
        }
    }

    /// Leave any physics mode; the caller picks what runs next
    fn leave_physics_mode(&mut self, h: EntityHandle) {
        let Some(c) = self.controller_mut(h) else {
            return;
        };
        if !c.physics_mode.is_physics() {
            return;
        }
        c.physics_mode = PhysicsMovementMode::None;
        c.target_entity = Handle::NULL;
        self.release_path_agent(h);
    }

    /// Switch into a physics mode; canned moves stop driving the entity
    fn enter_physics_mode(
        &mut self,
        h: EntityHandle,
        mode: PhysicsMovementMode,
    ) -> Option<&mut DirectionalMovementController> {
        self.activate_controller(h)?;
        self.release_path_agent(h);
        let c = self.controller_mut(h)?;
        if c.current_move.is_some() {
            c.previous_move = c.current_move.take();
        }
        c.transition = None;
        c.physics_mode = mode;
        c.direction = Direction::None;
        c.target_entity = Handle::NULL;
        log::debug!("{:?} physics mode {:?}", h, mode);
        Some(c)
    }

    /// Physics integration without steering
    pub fn start_physics_idle(&mut self, h: EntityHandle) -> bool {
        self.enter_physics_mode(h, PhysicsMovementMode::Idle).is_some()
    }

    /// Steer along a world-space direction until stopped
    pub fn start_movement_in_direction(&mut self, h: EntityHandle, direction: Vec2) -> bool {
        let Some(c) = self.enter_physics_mode(h, PhysicsMovementMode::Direction) else {
            return false;
        };
        c.physics_direction = direction.normalize_or_zero();
        true
    }

    /// Steer towards a world point; ends within `move_end_distance`
    pub fn start_movement_to_position(&mut self, h: EntityHandle, point: Vec2) -> bool {
        let Some(c) = self.enter_physics_mode(h, PhysicsMovementMode::Point) else {
            return false;
        };
        c.target_point = point;
        true
    }

    /// Follow another entity's centre plus `offset`
    pub fn start_movement_to_entity(&mut self, h: EntityHandle, target: EntityHandle, offset: Vec2) -> bool {
        if target == h || self.entities.get(target).is_none() {
            return false;
        }
        let Some(c) = self.enter_physics_mode(h, PhysicsMovementMode::Entity) else {
            return false;
        };
        c.target_entity = target;
        c.target_offset = offset;
        true
    }

    /// Follow the path cache's agent towards `target`
    pub fn start_path_movement(&mut self, h: EntityHandle, target: Vec2) -> bool {
        let Some(center) = self.entities.get(h).map(|e| e.world_rect.center()) else {
            return false;
        };
        let Some(c) = self.enter_physics_mode(h, PhysicsMovementMode::Path) else {
            return false;
        };
        let max_speed = c.physics.max_speed;
        let agent = self.path_cache.add_agent(center, target, max_speed);
        if let Some(c) = self.controller_mut(h) {
            c.path_agent = Some(agent);
            c.path_target = Some(target);
        }
        true
    }

    /// Back to canned moves with zero velocity; a pending push survives
    pub fn stop_movement(&mut self, h: EntityHandle) {
        self.leave_physics_mode(h);
        let Some(c) = self.controller_mut(h) else {
            return;
        };
        c.speed = Vec2::ZERO;
        c.external_force = Vec2::ZERO;
        c.requested_direction = Direction::None;
        c.has_solid_collision = false;
        c.last_solid_normal = Vec2::ZERO;
        c.mark_dirty(DirtyLevel::ReevalMove);
        if c.current_move.is_some() {
            self.set_current_move(h, None);
        }
    }

    pub fn set_external_force(&mut self, h: EntityHandle, force: Vec2) {
        if let Some(c) = self.controller_mut(h) {
            c.external_force = force;
        }
    }

    pub fn add_external_push(&mut self, h: EntityHandle, push: Vec2) {
        if let Some(c) = self.controller_mut(h) {
            c.external_push += push;
        }
    }

    pub fn set_physics_settings(&mut self, h: EntityHandle, physics: PhysicsSettings) {
        if let Some(c) = self.controller_mut(h) {
            c.physics = physics;
        }
    }

    /// Slave `h` to `parent`: each update places it at the parent's position
    /// plus `offset` (parent-local). Without an offset the current relative
    /// position is kept.
    pub fn set_parent_entity(&mut self, h: EntityHandle, parent: EntityHandle, offset: Option<Vec2>) -> bool {
        if parent == h {
            sim_panic!("entity {:?} cannot be its own parent", h);
            return false;
        }
        let Some(p) = self.entities.get(parent) else {
            return false;
        };
        let (p_pos, p_orient) = (p.position, p.orientation_down);
        let Some(pos) = self.entities.get(h).map(|e| e.position) else {
            return false;
        };
        if self.ensure_controller(h).is_none() {
            return false;
        }
        let offset =
            offset.unwrap_or_else(|| crate::geom::rotate_to_local(pos - p_pos, p_orient));
        let Some(c) = self.controller_mut(h) else {
            return false;
        };
        c.parent_entity = parent;
        c.parent_offset = offset;
        true
    }

    pub fn clear_parent_entity(&mut self, h: EntityHandle) {
        if let Some(c) = self.controller_mut(h) {
            c.parent_entity = Handle::NULL;
        }
    }

    /// Settle deferred state before this tick's integration pass
    pub fn update_changes(&mut self, h: EntityHandle) {
        self.make_scheduled_collision_parent_current(h);
        let Some(c) = self.controller(h) else {
            return;
        };
        let (dirty, reevaluate, caller) = (c.dirty, c.reevaluate_parent_scheduled, c.reevaluate_parent_caller);

        if reevaluate {
            self.reevaluate_collision_parent(h, caller);
        }
        if dirty >= DirtyLevel::UpdateSurvey {
            self.update_local_collision(h);
            self.update_survey(h, true);
        }
        if dirty >= DirtyLevel::ReevalMove
            && let Some(c) = self.controller(h)
            && !c.physics_mode.is_physics()
            && !c.passive
            && !c.move_committed()
        {
            let direction = c.requested_direction;
            self.select_move(h, direction, false);
        }
        if let Some(c) = self.controller_mut(h) {
            c.dirty = DirtyLevel::Nothing;
        }
    }

    /// Integrate one tick for `h`
    pub fn update_controller(&mut self, h: EntityHandle, dt: f32) {
        let Some(c) = self.controller(h) else {
            return;
        };
        if !c.parent_entity.is_null() {
            if self.follow_parent_entity(h) {
                return;
            }
            if let Some(c) = self.controller_mut(h) {
                log::debug!("{:?}: parent entity gone", h);
                c.parent_entity = Handle::NULL;
            }
        }

        if let Some(c) = self.controller_mut(h)
            && let Some(t) = c.transition.as_mut()
            && t.advance(dt)
        {
            c.transition = None;
        }

        let Some(e) = self.entities.get(h) else {
            return;
        };
        if e.suspended {
            let update = self.update_rects(h, None);
            if update.tile_rect_changed {
                self.update_local_collision(h);
                self.update_survey(h, true);
            }
            return;
        }

        let Some(c) = self.controller(h) else {
            return;
        };
        if c.physics_mode.is_physics() {
            self.do_physics_movement(h, dt);
        } else if c.current_move.as_deref().is_some_and(Move::is_animation) {
            self.do_animation(h, dt);
        } else {
            self.do_normal_movement(h, dt);
        }
    }

    /// Hard-parent slave mode; false when the parent no longer exists
    fn follow_parent_entity(&mut self, h: EntityHandle) -> bool {
        let Some(c) = self.controller(h) else {
            return false;
        };
        let (parent, offset) = (c.parent_entity, c.parent_offset);
        let Some(p) = self.entities.get(parent) else {
            return false;
        };
        let target = p.position + rotate_to_world(offset, p.orientation_down);
        let Some(e) = self.entities.get_mut(h) else {
            return false;
        };
        let delta = target - e.position;
        e.position = target;
        let update = self.update_rects(h, None);
        if update.tile_rect_changed {
            self.update_local_collision(h);
            self.update_survey(h, true);
        }
        self.finish_update(h, delta);
        true
    }

    /// Directions in which `h` is flush against solid tiles
    pub fn touching_collision_directions(&self, h: EntityHandle) -> CollisionDirs {
        let (Some(e), Some(c)) = (self.entities.get(h), self.controller(h)) else {
            return CollisionDirs::NONE;
        };
        super::collision::touching_directions(
            &e.world_rect,
            &c.local_collision_tile_rect,
            c.local_collision,
            TOUCH_TOLERANCE,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::{PointRect, Rect};
    use crate::sim::entity::EntityDesc;

    fn level() -> (Simulation, EntityHandle) {
        let mut sim = Simulation::default();
        sim.layer.fill_solid(PointRect::new(-10, 3, 20, 1));
        let h = sim.spawn_entity(EntityDesc::new("hero", Rect::new(0.0, 0.0, 1.0, 1.0)).movable());
        sim.initialize_entity(h, Vec2::new(0.0, 2.0), false);
        (sim, h)
    }

    #[test]
    fn test_first_tick_selects_idle_move() {
        let (mut sim, h) = level();
        sim.tick();
        assert_eq!(sim.controller(h).unwrap().current_move_name(), Some("stand"));
    }

    #[test]
    fn test_start_new_movement_walks() {
        let (mut sim, h) = level();
        sim.tick();
        assert!(sim.start_new_movement(h, Direction::Right));
        let c = sim.controller(h).unwrap();
        assert_eq!(c.current_move_name(), Some("walk_right"));
        assert_eq!(c.speed(), Vec2::new(3.0, 0.0));
        sim.run_ticks(10);
        assert!(sim.entity(h).unwrap().position().x > 0.4);
    }

    #[test]
    fn test_failed_move_falls_back_to_idle() {
        let (mut sim, h) = level();
        sim.layer.set_solid(glam::IVec2::new(1, 2), true);
        sim.tick();
        assert!(!sim.start_new_movement(h, Direction::Right));
        assert_eq!(sim.controller(h).unwrap().current_move_name(), Some("stand"));
        let failed = sim.events().count_for(h, |c| {
            matches!(c, ScriptCallback::MovementFailed { direction: Direction::Right, .. })
        });
        assert_eq!(failed, 1);
    }

    #[test]
    fn test_dirty_level_coalesces() {
        let (mut sim, h) = level();
        sim.tick();
        let c = sim.controller_mut(h).unwrap();
        c.mark_dirty(DirtyLevel::ReevalMove);
        c.mark_dirty(DirtyLevel::UpdateSurvey);
        assert_eq!(c.dirty_level(), DirtyLevel::ReevalMove);
        sim.update_changes(h);
        assert_eq!(sim.controller(h).unwrap().dirty_level(), DirtyLevel::Nothing);
    }

    #[test]
    fn test_physics_mode_excludes_moves() {
        let (mut sim, h) = level();
        sim.tick();
        assert!(sim.start_movement_in_direction(h, Vec2::new(1.0, 0.0)));
        let c = sim.controller(h).unwrap();
        assert_eq!(c.physics_mode(), PhysicsMovementMode::Direction);
        assert!(c.current_move().is_none());
        sim.add_external_push(h, Vec2::new(0.1, 0.0));
        sim.stop_movement(h);
        let c = sim.controller(h).unwrap();
        assert_eq!(c.physics_mode(), PhysicsMovementMode::None);
        assert_eq!(c.speed(), Vec2::ZERO);
        assert_eq!(c.external_push(), Vec2::new(0.1, 0.0));
    }

    #[test]
    fn test_path_movement_registers_agent() {
        let (mut sim, h) = level();
        assert!(sim.start_path_movement(h, Vec2::new(5.5, 2.5)));
        let agent = sim.controller(h).unwrap().path_agent().unwrap();
        assert!(sim.path_cache().agent_state(agent).is_some());
        sim.stop_movement(h);
        assert!(sim.path_cache().agent_state(agent).is_none());
    }

    #[test]
    fn test_hard_parent_slaves_position() {
        let (mut sim, h) = level();
        let boss = sim.spawn_entity(EntityDesc::new("boss", Rect::new(0.0, 0.0, 1.0, 1.0)).movable());
        sim.initialize_entity(boss, Vec2::new(4.0, 2.0), false);
        assert!(sim.set_parent_entity(h, boss, Some(Vec2::new(0.0, -1.0))));
        sim.tick();
        assert_eq!(sim.entity(h).unwrap().position(), Vec2::new(4.0, 1.0));

        sim.kill(boss);
        sim.tick();
        assert!(sim.controller(h).unwrap().parent_entity().is_null());
    }

    #[test]
    fn test_enum_round_trip() {
        for v in 0..6 {
            assert_eq!(PhysicsMovementMode::from_u8(v).unwrap().as_u8(), v);
        }
        assert!(PhysicsMovementMode::from_u8(6).is_none());
        assert_eq!(DirtyLevel::from_u8(2), Some(DirtyLevel::ReevalMove));
    }
}
