//! Controller save/load
//!
//! A controller is written as a `u32` format version followed by a bincode
//! encoded [`ControllerSnapshot`]. Moves and move sets are stored by name
//! and resolved on load; handles are stored as opaque `u64` values.

use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::rc::Rc;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::error::SaveError;
use crate::geom::{CollisionDirs, Direction, PointRect};
use crate::handle::Handle;
use crate::settings::PhysicsSettings;
use crate::sim::entity::EntityHandle;
use crate::sim::movement::{DirtyLevel, PhysicsMovementMode};
use crate::sim::moves::{Move, MoveSet, Transition};
use crate::sim::world::Simulation;

/// Version number for the controller format (increment when it changes)
pub const SAVE_VERSION: u32 = 2;

/// Every persisted controller field, in stream order. The sort weight is
/// derived and recalculated on load; path agent ids are reissued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerSnapshot {
    pub move_set: String,
    pub passive: bool,
    pub direction: u8,
    pub requested_direction: u8,
    pub current_move: Option<String>,
    pub previous_move: Option<String>,
    pub transition: Option<(String, f32)>,
    pub distance: f32,
    pub end_distance: f32,
    pub animation_time: f32,
    pub animation_move_canceled: bool,

    pub physics_mode: u8,
    pub physics: PhysicsSettings,
    pub speed: Vec2,
    pub external_force: Vec2,
    pub external_push: Vec2,
    pub physics_direction: Vec2,
    pub target_point: Vec2,
    pub target_entity: u64,
    pub target_offset: Vec2,
    pub path_target: Option<Vec2>,
    pub has_solid_collision: bool,
    pub last_solid_normal: Vec2,

    pub local_collision: u8,
    pub local_collision_tile_rect: PointRect,

    pub collision_parent: u64,
    pub collision_parent_scheduled: u64,
    pub collision_children: Vec<u64>,
    pub collision_ancestor: u64,
    pub reevaluate_parent_scheduled: bool,
    pub reevaluate_parent_caller: u64,

    pub parent_entity: u64,
    pub parent_offset: Vec2,

    pub dirty: u8,
    pub flow_direction: f32,
    pub last_delta: Vec2,
}

fn direction(field: &'static str, value: u8) -> Result<Direction, SaveError> {
    Direction::from_u8(value).ok_or(SaveError::InvalidEnum { field, value })
}

fn resolve_move(set: &MoveSet, name: Option<&str>) -> Result<Option<Rc<Move>>, SaveError> {
    match name {
        None => Ok(None),
        Some(name) => set
            .find(name)
            .map(Some)
            .ok_or_else(|| SaveError::UnknownMove(name.to_string())),
    }
}

impl Simulation {
    /// Capture the persisted state of `h`'s controller
    pub fn controller_snapshot(&self, h: EntityHandle) -> Option<ControllerSnapshot> {
        let c = self.controller(h)?;
        Some(ControllerSnapshot {
            move_set: c.move_set.name().to_string(),
            passive: c.passive,
            direction: c.direction.as_u8(),
            requested_direction: c.requested_direction.as_u8(),
            current_move: c.current_move.as_ref().map(|m| m.name.clone()),
            previous_move: c.previous_move.as_ref().map(|m| m.name.clone()),
            transition: c.transition.as_ref().map(|t| (t.name.clone(), t.remaining)),
            distance: c.distance,
            end_distance: c.end_distance,
            animation_time: c.animation_time,
            animation_move_canceled: c.animation_move_canceled,
            physics_mode: c.physics_mode.as_u8(),
            physics: c.physics,
            speed: c.speed,
            external_force: c.external_force,
            external_push: c.external_push,
            physics_direction: c.physics_direction,
            target_point: c.target_point,
            target_entity: c.target_entity.to_bits(),
            target_offset: c.target_offset,
            path_target: c.path_target,
            has_solid_collision: c.has_solid_collision,
            last_solid_normal: c.last_solid_normal,
            local_collision: c.local_collision.bits(),
            local_collision_tile_rect: c.local_collision_tile_rect,
            collision_parent: c.collision_parent.to_bits(),
            collision_parent_scheduled: c.collision_parent_scheduled.to_bits(),
            collision_children: c.collision_children.iter().map(|h| h.to_bits()).collect(),
            collision_ancestor: c.collision_ancestor.to_bits(),
            reevaluate_parent_scheduled: c.reevaluate_parent_scheduled,
            reevaluate_parent_caller: c.reevaluate_parent_caller.to_bits(),
            parent_entity: c.parent_entity.to_bits(),
            parent_offset: c.parent_offset,
            dirty: c.dirty.as_u8(),
            flow_direction: c.flow_direction,
            last_delta: c.last_delta,
        })
    }

    /// Overwrite `h`'s controller (created if missing) with `snap`.
    /// Nothing is modified when the snapshot fails to resolve.
    pub fn restore_controller(&mut self, h: EntityHandle, snap: ControllerSnapshot) -> Result<(), SaveError> {
        let dir = direction("direction", snap.direction)?;
        let requested = direction("requested_direction", snap.requested_direction)?;
        let mode = PhysicsMovementMode::from_u8(snap.physics_mode).ok_or(SaveError::InvalidEnum {
            field: "physics_mode",
            value: snap.physics_mode,
        })?;
        let dirty = DirtyLevel::from_u8(snap.dirty).ok_or(SaveError::InvalidEnum {
            field: "dirty",
            value: snap.dirty,
        })?;
        let set = self
            .move_set(&snap.move_set)
            .ok_or_else(|| SaveError::UnknownMoveSet(snap.move_set.clone()))?;
        let current = resolve_move(&set, snap.current_move.as_deref())?;
        let previous = resolve_move(&set, snap.previous_move.as_deref())?;

        if self.ensure_controller(h).is_none() {
            return Err(SaveError::NoController);
        }
        self.release_path_agent(h);
        let center = self
            .entities
            .get(h)
            .map(|e| e.world_rect.center())
            .unwrap_or_default();
        let agent = match (mode, snap.path_target) {
            (PhysicsMovementMode::Path, Some(target)) => {
                Some(self.path_cache.add_agent(center, target, snap.physics.max_speed))
            }
            _ => None,
        };

        let Some(c) = self.controller_mut(h) else {
            return Err(SaveError::NoController);
        };
        c.move_set = set;
        c.passive = snap.passive;
        c.direction = dir;
        c.requested_direction = requested;
        c.current_move = current;
        c.previous_move = previous;
        c.transition = snap
            .transition
            .map(|(name, remaining)| Transition { name, remaining });
        c.distance = snap.distance;
        c.end_distance = snap.end_distance;
        c.animation_time = snap.animation_time;
        c.animation_move_canceled = snap.animation_move_canceled;
        c.physics_mode = mode;
        c.physics = snap.physics;
        c.speed = snap.speed;
        c.external_force = snap.external_force;
        c.external_push = snap.external_push;
        c.physics_direction = snap.physics_direction;
        c.target_point = snap.target_point;
        c.target_entity = Handle::from_bits(snap.target_entity);
        c.target_offset = snap.target_offset;
        c.path_agent = agent;
        c.path_target = if agent.is_some() { snap.path_target } else { None };
        c.has_solid_collision = snap.has_solid_collision;
        c.last_solid_normal = snap.last_solid_normal;
        c.local_collision = CollisionDirs::from_bits(snap.local_collision);
        c.local_collision_tile_rect = snap.local_collision_tile_rect;
        c.collision_parent = Handle::from_bits(snap.collision_parent);
        c.collision_parent_scheduled = Handle::from_bits(snap.collision_parent_scheduled);
        c.collision_children = snap
            .collision_children
            .iter()
            .map(|bits| Handle::from_bits(*bits))
            .collect::<BTreeSet<_>>();
        c.collision_ancestor = Handle::from_bits(snap.collision_ancestor);
        c.reevaluate_parent_scheduled = snap.reevaluate_parent_scheduled;
        c.reevaluate_parent_caller = Handle::from_bits(snap.reevaluate_parent_caller);
        c.parent_entity = Handle::from_bits(snap.parent_entity);
        c.parent_offset = snap.parent_offset;
        c.dirty = dirty;
        c.flow_direction = snap.flow_direction;
        c.last_delta = snap.last_delta;

        self.recalculate_sort_weight(h);
        log::debug!("{:?}: controller restored", h);
        Ok(())
    }

    /// Write `h`'s controller to `writer`
    pub fn save_controller<W: Write>(&self, h: EntityHandle, mut writer: W) -> Result<(), SaveError> {
        let snap = self.controller_snapshot(h).ok_or(SaveError::NoController)?;
        bincode::serialize_into(&mut writer, &SAVE_VERSION)?;
        bincode::serialize_into(&mut writer, &snap)?;
        Ok(())
    }

    /// Read a controller written by [`Simulation::save_controller`] into `h`
    pub fn load_controller<R: Read>(&mut self, h: EntityHandle, mut reader: R) -> Result<(), SaveError> {
        let version: u32 = bincode::deserialize_from(&mut reader)?;
        if version != SAVE_VERSION {
            return Err(SaveError::VersionMismatch {
                expected: SAVE_VERSION,
                found: version,
            });
        }
        let snap: ControllerSnapshot = bincode::deserialize_from(&mut reader)?;
        self.restore_controller(h, snap)
    }
}
