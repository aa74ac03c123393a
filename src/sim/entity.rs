//! Entity geometry, tile registration and lifecycle
//!
//! An entity owns its position and shape. Every change to either goes through
//! [`Simulation::update_rects`], which keeps the tile registry in sync with
//! the world rect and moves the collision-tile footprint of moving platforms.

use std::collections::BTreeSet;
use std::rc::Rc;

use glam::Vec2;

use super::movement::{ControllerHandle, DirtyLevel};
use super::events::ScriptCallback;
use super::moves::MoveSet;
use super::survey::SurroundingsSurvey;
use super::tiles::EntityTiles;
use super::world::Simulation;
use crate::consts::ALIGN_TOLERANCE;
use crate::geom::{Direction, PointRect, Rect, rotate_to_local};
use crate::handle::Handle;
use crate::settings::PhysicsSettings;
use crate::{is_aligned, sim_panic};

pub type EntityHandle = Handle<Entity>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    /// Created, no position yet
    Loaded,
    /// Positioned and registered with the tile registry
    Initialized,
    /// Unregistered; the controller is gone
    Deinitialized,
}

/// Index into an entity's sensor pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SensorId(pub usize);

/// Spawn parameters
#[derive(Debug, Clone)]
pub struct EntityDesc {
    pub name: String,
    /// Local rect for `orientation_down == Down`, relative to the position
    pub rect: Rect,
    pub orientation_down: Direction,
    pub collision_tiles: Option<EntityTiles>,
    pub can_be_pushed: bool,
    pub screen_space: bool,
    /// Move set name; `None` uses the default set
    pub move_set: Option<String>,
    /// Create the movement controller at initialization
    pub movable: bool,
    pub physics: Option<PhysicsSettings>,
}

impl EntityDesc {
    pub fn new(name: &str, rect: Rect) -> Self {
        Self {
            name: name.to_string(),
            rect,
            orientation_down: Direction::Down,
            collision_tiles: None,
            can_be_pushed: false,
            screen_space: false,
            move_set: None,
            movable: false,
            physics: None,
        }
    }

    pub fn movable(mut self) -> Self {
        self.movable = true;
        self
    }

    pub fn pushable(mut self) -> Self {
        self.can_be_pushed = true;
        self
    }

    pub fn with_collision_tiles(mut self, tiles: EntityTiles) -> Self {
        self.collision_tiles = Some(tiles);
        self
    }

    pub fn with_move_set(mut self, name: &str) -> Self {
        self.move_set = Some(name.to_string());
        self
    }

    pub fn with_physics(mut self, physics: PhysicsSettings) -> Self {
        self.physics = Some(physics);
        self
    }

    pub fn with_orientation(mut self, orientation_down: Direction) -> Self {
        self.orientation_down = orientation_down;
        self
    }
}

#[derive(Debug)]
pub struct Entity {
    pub name: String,
    pub(crate) state: EntityState,
    pub(crate) position: Vec2,
    pub(crate) orientation_down: Direction,
    pub(crate) orientation_forward_is_left: bool,
    /// Authored rect (orientation Down)
    pub(crate) base_rect: Rect,
    pub(crate) local_rect: Rect,
    /// `local_rect` widened to whole tiles around its centre; defines snapping
    pub(crate) local_tile_rect: Rect,
    pub(crate) world_rect: Rect,
    pub(crate) registered_tile_rect: PointRect,
    pub(crate) collision_tiles: Option<EntityTiles>,
    pub(crate) collision_tiles_regd_rect: PointRect,
    pub(crate) movement_controller: Option<ControllerHandle>,
    pub(crate) survey: SurroundingsSurvey,
    pub(crate) prev_survey: SurroundingsSurvey,
    pub(crate) suspended: bool,
    pub(crate) screen_space: bool,
    pub(crate) can_be_pushed: bool,
    pub(crate) sensors: Vec<Option<Rect>>,
    pub(crate) move_set: Option<Rc<MoveSet>>,
    pub(crate) physics: PhysicsSettings,
}

fn tile_span(rect: &Rect) -> Rect {
    let size = (rect.size() - Vec2::splat(crate::consts::TILE_EPSILON))
        .ceil()
        .max(Vec2::ONE);
    let min = rect.center() - size * 0.5;
    Rect::new(min.x, min.y, size.x, size.y)
}

impl Entity {
    fn new(desc: EntityDesc, move_set: Option<Rc<MoveSet>>, physics: PhysicsSettings) -> Self {
        let local_rect = desc.rect.rotated(desc.orientation_down);
        Self {
            name: desc.name,
            state: EntityState::Loaded,
            position: Vec2::ZERO,
            orientation_down: desc.orientation_down,
            orientation_forward_is_left: false,
            base_rect: desc.rect,
            local_rect,
            local_tile_rect: tile_span(&local_rect),
            world_rect: local_rect,
            registered_tile_rect: PointRect::EMPTY,
            collision_tiles: desc.collision_tiles,
            collision_tiles_regd_rect: PointRect::EMPTY,
            movement_controller: None,
            survey: SurroundingsSurvey::default(),
            prev_survey: SurroundingsSurvey::default(),
            suspended: false,
            screen_space: desc.screen_space,
            can_be_pushed: desc.can_be_pushed,
            sensors: Vec::new(),
            move_set,
            physics,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> EntityState {
        self.state
    }

    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn orientation_down(&self) -> Direction {
        self.orientation_down
    }

    pub fn orientation_forward_is_left(&self) -> bool {
        self.orientation_forward_is_left
    }

    pub fn local_rect(&self) -> Rect {
        self.local_rect
    }

    pub fn local_tile_rect(&self) -> Rect {
        self.local_tile_rect
    }

    pub fn world_rect(&self) -> Rect {
        self.world_rect
    }

    pub fn registered_tile_rect(&self) -> PointRect {
        self.registered_tile_rect
    }

    pub fn collision_tiles(&self) -> Option<&EntityTiles> {
        self.collision_tiles.as_ref()
    }

    pub fn collision_tiles_regd_rect(&self) -> PointRect {
        self.collision_tiles_regd_rect
    }

    pub fn movement_controller(&self) -> Option<ControllerHandle> {
        self.movement_controller
    }

    pub fn survey(&self) -> &SurroundingsSurvey {
        &self.survey
    }

    pub fn prev_survey(&self) -> &SurroundingsSurvey {
        &self.prev_survey
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn can_be_pushed(&self) -> bool {
        self.can_be_pushed
    }

    pub fn is_initialized(&self) -> bool {
        self.state == EntityState::Initialized
    }

    /// Whether the entity owns solid collision tiles (acts as a platform)
    pub fn has_solid_collision_tiles(&self) -> bool {
        self.collision_tiles.as_ref().is_some_and(|t| t.has_solid())
    }

    /// Nearest position at which `local_tile_rect` sits on the tile grid
    pub fn snapped_position(&self, pos: Vec2) -> Vec2 {
        let min = pos + self.local_tile_rect.min();
        pos + (min.round() - min)
    }

    /// Snap only the given world axis
    pub(crate) fn snapped_axis(&self, pos: Vec2, x: bool, y: bool) -> Vec2 {
        let snapped = self.snapped_position(pos);
        Vec2::new(
            if x { snapped.x } else { pos.x },
            if y { snapped.y } else { pos.y },
        )
    }

    /// The down-side edge sits on a tile boundary
    pub fn is_down_aligned(&self) -> bool {
        is_aligned(self.world_rect.edge(self.orientation_down), ALIGN_TOLERANCE)
    }

    /// The cross-axis (local left) edge sits on a tile boundary
    pub fn is_cross_aligned(&self) -> bool {
        let left = Direction::Left.to_world(self.orientation_down);
        is_aligned(self.world_rect.edge(left), ALIGN_TOLERANCE)
    }

    /// Row of tiles directly beyond the down-side edge
    pub fn support_row(&self) -> PointRect {
        let tr = self.registered_tile_rect;
        let edge = self.world_rect.edge(self.orientation_down).round() as i32;
        match self.orientation_down {
            Direction::Down => PointRect::new(tr.x, edge, tr.w, 1),
            Direction::Up => PointRect::new(tr.x, edge - 1, tr.w, 1),
            Direction::Right => PointRect::new(edge, tr.y, 1, tr.h),
            Direction::Left => PointRect::new(edge - 1, tr.y, 1, tr.h),
            Direction::None => PointRect::EMPTY,
        }
    }

    /// World rect of a sensor, rotated with the entity
    pub fn sensor_world_rect(&self, id: SensorId) -> Option<Rect> {
        let local = self.sensors.get(id.0).copied().flatten()?;
        Some(local.rotated(self.orientation_down).translated(self.position))
    }

    pub fn sensor_count(&self) -> usize {
        self.sensors.iter().filter(|s| s.is_some()).count()
    }
}

/// What [`Simulation::update_rects`] changed
#[derive(Debug, Clone, Copy, Default)]
pub struct RectUpdate {
    pub old_tile_rect: PointRect,
    pub new_tile_rect: PointRect,
    pub tile_rect_changed: bool,
    pub collision_tiles_moved: bool,
}

impl Simulation {
    pub fn spawn_entity(&mut self, desc: EntityDesc) -> EntityHandle {
        let move_set = match &desc.move_set {
            Some(name) => {
                let set = self.move_set(name);
                if set.is_none() {
                    log::warn!("entity '{}': unknown move set '{}'", desc.name, name);
                }
                set
            }
            None => None,
        };
        let physics = desc.physics.unwrap_or(self.settings.default_physics);
        let movable = desc.movable;
        let h = self.entities.insert(Entity::new(desc, move_set, physics));
        if movable {
            self.ensure_controller(h);
        }
        h
    }

    /// Assign a position and register with the tile registry
    pub fn initialize_entity(&mut self, h: EntityHandle, position: Vec2, snap: bool) -> bool {
        let Some(e) = self.entities.get_mut(h) else {
            sim_panic!("initialize_entity: missing entity {:?}", h);
            return false;
        };
        if e.state != EntityState::Loaded {
            sim_panic!("initialize_entity: '{}' is {:?}", e.name, e.state);
            return false;
        }
        e.position = if snap && !e.screen_space {
            e.snapped_position(position)
        } else {
            position
        };
        e.world_rect = e.local_rect.translated(e.position);
        e.registered_tile_rect = e.world_rect.to_tile_rect();
        e.state = EntityState::Initialized;
        self.registry.register_entity_handle(e.registered_tile_rect, h);
        if let Some(tiles) = &e.collision_tiles {
            let rect = tiles.tile_rect(e.position);
            self.registry.register_entity_tiles(rect, tiles, h);
            e.collision_tiles_regd_rect = rect;
        }
        let (name, pos, has_tiles) = (e.name.clone(), e.position, e.collision_tiles.is_some());
        log::debug!("entity '{name}' initialized at {pos}");

        self.update_survey(h, false);
        if let Some(c) = self.controller_mut(h) {
            c.mark_dirty(DirtyLevel::ReevalMove);
        }
        if has_tiles {
            let rect = self.entities.get(h).map(|e| e.collision_tiles_regd_rect);
            if let Some(rect) = rect {
                self.make_surrounding_entities_schedule_reevaluate_collision_parent(h, rect);
            }
        }
        true
    }

    /// Unregister everything and destroy the controller; the entity stays
    /// addressable until [`Simulation::destroy_entity`]
    pub fn deinitialize_entity(&mut self, h: EntityHandle) {
        let Some(e) = self.entities.get(h) else {
            return;
        };
        if e.state != EntityState::Initialized {
            return;
        }
        log::debug!("entity '{}' deinitialized", e.name);
        self.destroy_controller(h);

        let Some(e) = self.entities.get_mut(h) else {
            return;
        };
        self.registry.unregister_entity_handle(e.registered_tile_rect, h);
        let ct_rect = e.collision_tiles_regd_rect;
        let had_tiles = e.collision_tiles.is_some();
        if had_tiles {
            self.registry.unregister_entity_tiles(ct_rect, h);
        }
        e.registered_tile_rect = PointRect::EMPTY;
        e.collision_tiles_regd_rect = PointRect::EMPTY;
        e.state = EntityState::Deinitialized;

        if had_tiles {
            self.make_surrounding_entities_schedule_reevaluate_collision_parent(h, ct_rect);
        }
    }

    /// Deinitialize and free the slot; every handle to it goes stale
    pub fn destroy_entity(&mut self, h: EntityHandle) {
        self.deinitialize_entity(h);
        self.entities.remove(h);
    }

    pub fn kill(&mut self, h: EntityHandle) {
        if let Some(e) = self.entities.get(h) {
            log::info!("killing entity '{}'", e.name);
        }
        self.destroy_entity(h);
    }

    pub fn set_suspended(&mut self, h: EntityHandle, suspended: bool) {
        if let Some(e) = self.entities.get_mut(h) {
            e.suspended = suspended;
        }
    }

    pub fn set_can_be_pushed(&mut self, h: EntityHandle, value: bool) {
        if let Some(e) = self.entities.get_mut(h) {
            e.can_be_pushed = value;
        }
    }

    pub fn set_orientation_forward_is_left(&mut self, h: EntityHandle, value: bool) {
        if let Some(e) = self.entities.get_mut(h) {
            e.orientation_forward_is_left = value;
        }
    }

    /// Relocate unconditionally, optionally snapping to the tile grid
    pub fn set_position_forced(&mut self, h: EntityHandle, pos: Vec2, snap: bool) {
        let Some(e) = self.entities.get_mut(h) else {
            sim_panic!("set_position_forced: missing entity {:?}", h);
            return;
        };
        e.position = if snap && !e.screen_space {
            e.snapped_position(pos)
        } else {
            pos
        };
        let update = self.update_rects(h, None);
        if update.tile_rect_changed {
            self.update_survey(h, true);
        }
        if let Some(c) = self.controller_mut(h) {
            c.mark_dirty(DirtyLevel::UpdateSurvey);
            c.reevaluate_parent_scheduled = true;
            c.reevaluate_parent_caller = h;
        }
    }

    /// Rotate the entity so `dir` is its floor, keeping the world footprint
    pub fn set_orientation_down(&mut self, h: EntityHandle, dir: Direction) {
        if dir == Direction::None {
            sim_panic!("set_orientation_down: None is not an orientation");
            return;
        }
        let Some(e) = self.entities.get_mut(h) else {
            sim_panic!("set_orientation_down: missing entity {:?}", h);
            return;
        };
        if e.orientation_down == dir {
            return;
        }
        let old_min = e.local_rect.min();
        e.orientation_down = dir;
        e.local_rect = e.base_rect.rotated(dir);
        e.local_tile_rect = tile_span(&e.local_rect);
        e.position += old_min - e.local_rect.min();
        log::debug!("entity '{}' orientation now {:?}", e.name, dir);

        self.update_rects(h, None);

        if self.controller(h).is_some() {
            self.make_scheduled_collision_parent_current(h);
            self.update_local_collision(h);
            self.update_survey(h, true);
            self.reselect_current_move(h);
        }
    }

    /// Recompute derived rects and keep the tile registry in sync
    pub fn update_rects(&mut self, h: EntityHandle, forced_tile_rect: Option<PointRect>) -> RectUpdate {
        let Some(e) = self.entities.get_mut(h) else {
            return RectUpdate::default();
        };
        e.world_rect = e.local_rect.translated(e.position);
        let mut out = RectUpdate {
            old_tile_rect: e.registered_tile_rect,
            new_tile_rect: e.registered_tile_rect,
            ..Default::default()
        };
        if e.state != EntityState::Initialized {
            return out;
        }

        let new_rect = forced_tile_rect.unwrap_or_else(|| e.world_rect.to_tile_rect());
        if new_rect != e.registered_tile_rect {
            self.registry
                .move_register_entity_handle(e.registered_tile_rect, new_rect, h);
            e.registered_tile_rect = new_rect;
            out.new_tile_rect = new_rect;
            out.tile_rect_changed = true;
        }

        let mut moved = None;
        if let Some(tiles) = &e.collision_tiles {
            let new_ct = tiles.tile_rect(e.position);
            if new_ct != e.collision_tiles_regd_rect {
                self.registry
                    .unregister_entity_tiles(e.collision_tiles_regd_rect, h);
                self.registry.register_entity_tiles(new_ct, tiles, h);
                moved = Some((e.collision_tiles_regd_rect, new_ct));
                e.collision_tiles_regd_rect = new_ct;
            }
        }

        if let Some((old_ct, new_ct)) = moved {
            out.collision_tiles_moved = true;
            self.make_surrounding_entities_schedule_reevaluate_collision_parent(h, old_ct);
            self.make_surrounding_entities_schedule_reevaluate_collision_parent(h, new_ct);
        }
        out
    }

    /// Rescan the surroundings; with `do_callbacks`, queue fluid and tile
    /// change events for everything that differs from the previous survey
    pub fn update_survey(&mut self, h: EntityHandle, do_callbacks: bool) {
        let Some(e) = self.entities.get_mut(h) else {
            return;
        };
        let survey = SurroundingsSurvey::scan(
            e.registered_tile_rect,
            e.orientation_down,
            &self.layer,
            &self.registry,
            h,
        );
        e.prev_survey = e.survey;
        e.survey = survey;
        if !do_callbacks {
            return;
        }
        let prev = e.prev_survey;
        for cb in survey.fluid_changes(&prev) {
            self.events.push(h, cb);
        }
        if prev.tile_rect != survey.tile_rect {
            self.events.push(
                h,
                ScriptCallback::TileChange {
                    old: prev.tile_rect,
                    new: survey.tile_rect,
                },
            );
        }
    }

    pub fn set_collision_tiles(&mut self, h: EntityHandle, tiles: Option<EntityTiles>) {
        let Some(e) = self.entities.get_mut(h) else {
            return;
        };
        let old_rect = e.collision_tiles_regd_rect;
        if e.state == EntityState::Initialized && e.collision_tiles.is_some() {
            self.registry.unregister_entity_tiles(old_rect, h);
        }
        e.collision_tiles = tiles;
        e.collision_tiles_regd_rect = PointRect::EMPTY;
        let mut new_rect = PointRect::EMPTY;
        if e.state == EntityState::Initialized {
            if let Some(tiles) = &e.collision_tiles {
                new_rect = tiles.tile_rect(e.position);
                self.registry.register_entity_tiles(new_rect, tiles, h);
                e.collision_tiles_regd_rect = new_rect;
            }
        }
        self.make_surrounding_entities_schedule_reevaluate_collision_parent(h, old_rect);
        self.make_surrounding_entities_schedule_reevaluate_collision_parent(h, new_rect);
    }

    /// Entities around `rect` (grown by a tile) re-pick their collision
    /// parent and re-survey on their next `update_changes`
    pub fn make_surrounding_entities_schedule_reevaluate_collision_parent(
        &mut self,
        h: EntityHandle,
        rect: PointRect,
    ) {
        if rect.is_empty() {
            return;
        }
        let mut affected = self.registry.find_registered_entity_handles(rect.grown(1));
        if let Some(c) = self.controller(h) {
            affected.extend(c.collision_children.iter().copied());
        }
        affected.remove(&h);
        for other in affected {
            if let Some(c) = self.controller_mut(other) {
                // Two different triggers before the next update: remember neither
                let fresh = !c.reevaluate_parent_scheduled || c.reevaluate_parent_caller == h;
                c.reevaluate_parent_caller = if fresh { h } else { Handle::NULL };
                c.reevaluate_parent_scheduled = true;
                c.mark_dirty(DirtyLevel::ReevalMove);
            }
        }
    }

    /// Pick the carrier of `h` and schedule it as collision parent.
    ///
    /// `caller` is the entity whose change triggered the evaluation (`h`
    /// itself after its own move, `NULL` when unknown). An evaluation
    /// triggered by an entity riding on `h` would only bounce back to its
    /// trigger and is skipped.
    pub fn reevaluate_collision_parent(&mut self, h: EntityHandle, caller: EntityHandle) {
        if self.controller(h).is_none() {
            return;
        }
        let bounce = !caller.is_null() && caller != h && self.collision_chain_contains(caller, h);
        if let Some(c) = self.controller_mut(h) {
            c.reevaluate_parent_scheduled = false;
            c.reevaluate_parent_caller = Handle::NULL;
        }
        if bounce {
            log::trace!("{:?}: parent reevaluation from rider {:?} skipped", h, caller);
            return;
        }
        let parent = self.determine_stand_on_parent(h);
        if let Some(c) = self.controller_mut(h) {
            if c.collision_parent_scheduled != parent {
                log::trace!("{:?} schedules collision parent {:?}", h, parent);
                c.collision_parent_scheduled = parent;
            }
        }
    }

    /// Which entity `h` is standing on, `Handle::NULL` for none
    pub fn determine_stand_on_parent(&self, h: EntityHandle) -> EntityHandle {
        let Some(e) = self.entities.get(h) else {
            return Handle::NULL;
        };
        if !e.is_initialized() || e.orientation_down == Direction::None {
            return Handle::NULL;
        }
        let existing = self
            .controller(h)
            .map(|c| c.collision_parent_scheduled)
            .unwrap_or(Handle::NULL);

        let mut candidates = BTreeSet::new();
        for p in e.support_row().points() {
            for owner in self.registry.entity_tiles_at(p) {
                if *owner != h && !self.collision_chain_contains(*owner, h) {
                    candidates.insert(*owner);
                }
            }
        }

        if !e.is_down_aligned() {
            return if candidates.contains(&existing) {
                existing
            } else {
                Handle::NULL
            };
        }

        // Classify carriers by how they moved last tick, in h's frame
        let mut ups = BTreeSet::new();
        let mut downs = BTreeSet::new();
        let mut lefts = BTreeSet::new();
        let mut rights = BTreeSet::new();
        let mut still = BTreeSet::new();
        for c in &candidates {
            let delta = self.controller(*c).map(|c| c.last_delta).unwrap_or(Vec2::ZERO);
            let local = rotate_to_local(delta, e.orientation_down);
            if local.y < -f32::EPSILON {
                ups.insert(*c);
            } else if local.y > f32::EPSILON {
                downs.insert(*c);
            } else if local.x < -f32::EPSILON {
                lefts.insert(*c);
            } else if local.x > f32::EPSILON {
                rights.insert(*c);
            } else {
                still.insert(*c);
            }
        }

        let pick = |set: &BTreeSet<EntityHandle>| {
            if set.contains(&existing) {
                existing
            } else {
                set.first().copied().unwrap_or(Handle::NULL)
            }
        };

        if !ups.is_empty() {
            pick(&ups)
        } else if !downs.is_empty() {
            pick(&downs)
        } else if lefts.len() > rights.len() {
            pick(&lefts)
        } else if rights.len() > lefts.len() {
            pick(&rights)
        } else if !lefts.is_empty() {
            let both: BTreeSet<_> = lefts.union(&rights).copied().collect();
            if !e.is_cross_aligned() && both.contains(&existing) {
                existing
            } else {
                both.first().copied().unwrap_or(Handle::NULL)
            }
        } else {
            pick(&still)
        }
    }

    /// `needle` appears on the collision-parent chain starting at `start`
    pub(crate) fn collision_chain_contains(&self, start: EntityHandle, needle: EntityHandle) -> bool {
        let mut visited = Vec::new();
        let mut cur = start;
        while !cur.is_null() {
            if cur == needle {
                return true;
            }
            if visited.contains(&cur) {
                sim_panic!("collision parent cycle through {:?}", cur);
                return true;
            }
            visited.push(cur);
            cur = match self.controller(cur) {
                Some(c) => c.collision_parent,
                None => Handle::NULL,
            };
        }
        false
    }

    /// Add a local-space sensor rect; `None` when the pool is full
    pub fn add_sensor(&mut self, h: EntityHandle, rect: Rect) -> Option<SensorId> {
        let capacity = self
            .settings
            .max_sensors_per_entity
            .min(crate::consts::MAX_SENSORS);
        let e = self.entities.get_mut(h)?;
        if let Some(i) = e.sensors.iter().position(|s| s.is_none()) {
            e.sensors[i] = Some(rect);
            return Some(SensorId(i));
        }
        if e.sensors.len() >= capacity {
            log::warn!(
                "editor warning: entity '{}' exceeds {} sensors",
                e.name,
                capacity
            );
            return None;
        }
        e.sensors.push(Some(rect));
        Some(SensorId(e.sensors.len() - 1))
    }

    pub fn remove_sensor(&mut self, h: EntityHandle, id: SensorId) {
        if let Some(slot) = self.entities.get_mut(h).and_then(|e| e.sensors.get_mut(id.0)) {
            *slot = None;
        }
    }

    /// Other entities whose world rect overlaps the sensor
    pub fn sensor_overlaps(&self, h: EntityHandle, id: SensorId) -> Vec<EntityHandle> {
        let Some(rect) = self.entities.get(h).and_then(|e| e.sensor_world_rect(id)) else {
            return Vec::new();
        };
        self.registry
            .find_registered_entity_handles(rect.to_tile_rect())
            .into_iter()
            .filter(|other| *other != h)
            .filter(|other| {
                self.entities
                    .get(*other)
                    .is_some_and(|o| o.world_rect.intersects(&rect))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::tiles::FluidType;
    use glam::IVec2;

    fn sim_with(desc: EntityDesc, pos: Vec2) -> (Simulation, EntityHandle) {
        let mut sim = Simulation::default();
        let h = sim.spawn_entity(desc);
        assert!(sim.initialize_entity(h, pos, false));
        (sim, h)
    }

    #[test]
    fn test_initialize_registers_tiles() {
        let (sim, h) = sim_with(
            EntityDesc::new("box", Rect::new(0.0, 0.0, 1.0, 2.0)),
            Vec2::new(3.0, 4.0),
        );
        let e = sim.entity(h).unwrap();
        assert_eq!(e.state(), EntityState::Initialized);
        assert_eq!(e.registered_tile_rect(), PointRect::new(3, 4, 1, 2));
        assert_eq!(sim.registry().tiles_of(h).len(), 2);
    }

    #[test]
    fn test_set_position_forced_snaps() {
        let (mut sim, h) = sim_with(
            EntityDesc::new("box", Rect::new(0.0, 0.0, 1.0, 1.0)),
            Vec2::ZERO,
        );
        sim.set_position_forced(h, Vec2::new(2.4, 1.6), true);
        assert_eq!(sim.entity(h).unwrap().position(), Vec2::new(2.0, 2.0));
        assert_eq!(sim.registry().tiles_of(h), BTreeSet::from([(2, 2)]));
    }

    #[test]
    fn test_half_tile_entity_snaps_to_tile_centre() {
        let (sim, h) = sim_with(
            EntityDesc::new("small", Rect::new(0.0, 0.0, 0.5, 0.5)),
            Vec2::ZERO,
        );
        let e = sim.entity(h).unwrap();
        // Centre (1.35, 1.15) lands on the centre of tile (1, 1)
        let p = e.snapped_position(Vec2::new(1.1, 0.9));
        assert!((p - Vec2::new(1.25, 1.25)).length() < 1e-5);
        // Centre (0.45, 0.65) lands on the centre of tile (0, 0)
        let p = e.snapped_position(Vec2::new(0.2, 0.4));
        assert!((p - Vec2::new(0.25, 0.25)).length() < 1e-5);
    }

    #[test]
    fn test_tile_change_event_only_on_change() {
        let (mut sim, h) = sim_with(
            EntityDesc::new("small", Rect::new(0.0, 0.0, 0.5, 0.5)),
            Vec2::ZERO,
        );
        let tile_changes =
            |sim: &Simulation| sim.events().count_for(h, |c| matches!(c, ScriptCallback::TileChange { .. }));
        // Still inside tile (0, 0)
        sim.set_position_forced(h, Vec2::new(0.2, 0.3), false);
        assert_eq!(sim.entity(h).unwrap().registered_tile_rect(), PointRect::new(0, 0, 1, 1));
        assert_eq!(tile_changes(&sim), 0);
        sim.set_position_forced(h, Vec2::new(1.0, 0.0), false);
        assert_eq!(tile_changes(&sim), 1);
    }

    #[test]
    fn test_fluid_enter_exit() {
        let (mut sim, h) = sim_with(
            EntityDesc::new("box", Rect::new(0.0, 0.0, 1.0, 1.0)),
            Vec2::ZERO,
        );
        sim.layer.fill_fluid(PointRect::new(2, 0, 1, 1), FluidType::Water);
        sim.set_position_forced(h, Vec2::new(2.0, 0.0), false);
        let enters = sim
            .events()
            .count_for(h, |c| matches!(c, ScriptCallback::FluidEnter { fluid: FluidType::Water, .. }));
        assert_eq!(enters, 2);
        sim.drain_events();
        sim.set_position_forced(h, Vec2::new(3.0, 0.0), false);
        let exits = sim
            .events()
            .count_for(h, |c| matches!(c, ScriptCallback::FluidExit { .. }));
        assert_eq!(exits, 2);
    }

    #[test]
    fn test_orientation_keeps_world_footprint() {
        let (mut sim, h) = sim_with(
            EntityDesc::new("tall", Rect::new(-0.5, -2.0, 1.0, 2.0)),
            Vec2::new(4.5, 6.0),
        );
        let before = sim.entity(h).unwrap().world_rect();
        sim.set_orientation_down(h, Direction::Right);
        let e = sim.entity(h).unwrap();
        assert_eq!(e.orientation_down(), Direction::Right);
        assert!((e.world_rect().min() - before.min()).length() < 1e-5);
    }

    #[test]
    fn test_kill_unregisters() {
        let (mut sim, h) = sim_with(
            EntityDesc::new("box", Rect::new(0.0, 0.0, 1.0, 1.0))
                .with_collision_tiles(EntityTiles::solid_block(1, 1, Vec2::ZERO)),
            Vec2::new(1.0, 1.0),
        );
        assert!(sim.registry().is_solid(IVec2::new(1, 1), &sim.layer, false, Handle::NULL));
        sim.kill(h);
        assert!(sim.entity(h).is_none());
        assert!(sim.registry().tiles_of(h).is_empty());
        assert!(!sim.registry().is_solid(IVec2::new(1, 1), &sim.layer, false, Handle::NULL));
    }

    #[test]
    fn test_sensor_pool_exhaustion() {
        let (mut sim, h) = sim_with(
            EntityDesc::new("box", Rect::new(0.0, 0.0, 1.0, 1.0)),
            Vec2::ZERO,
        );
        let cap = sim.settings.max_sensors_per_entity;
        for _ in 0..cap {
            assert!(sim.add_sensor(h, Rect::new(1.0, 0.0, 1.0, 1.0)).is_some());
        }
        assert!(sim.add_sensor(h, Rect::new(1.0, 0.0, 1.0, 1.0)).is_none());
        sim.remove_sensor(h, SensorId(0));
        assert_eq!(sim.add_sensor(h, Rect::new(0.0, 1.0, 1.0, 1.0)), Some(SensorId(0)));
    }

    #[test]
    fn test_sensor_overlaps() {
        let mut sim = Simulation::default();
        let a = sim.spawn_entity(EntityDesc::new("a", Rect::new(0.0, 0.0, 1.0, 1.0)));
        let b = sim.spawn_entity(EntityDesc::new("b", Rect::new(0.0, 0.0, 1.0, 1.0)));
        sim.initialize_entity(a, Vec2::ZERO, false);
        sim.initialize_entity(b, Vec2::new(1.5, 0.0), false);
        let id = sim.add_sensor(a, Rect::new(1.0, 0.0, 1.0, 1.0)).unwrap();
        assert_eq!(sim.sensor_overlaps(a, id), vec![b]);
        // Floor on the left: local right now points down, nothing there
        sim.set_orientation_down(a, Direction::Left);
        let id2 = sim.add_sensor(a, Rect::new(1.0, 0.0, 1.0, 1.0)).unwrap();
        assert!(sim.sensor_overlaps(a, id2).is_empty());
    }

    #[test]
    fn test_reevaluation_triggered_by_rider_is_skipped() {
        let mut sim = Simulation::default();
        let block = |name: &str| {
            EntityDesc::new(name, Rect::new(0.0, 0.0, 3.0, 1.0))
                .with_collision_tiles(EntityTiles::solid_block(3, 1, Vec2::ZERO))
        };
        let carrier = sim.spawn_entity(block("carrier"));
        let rider = sim.spawn_entity(EntityDesc::new("rider", Rect::new(0.0, 0.0, 1.0, 1.0)).movable());
        sim.initialize_entity(carrier, Vec2::new(0.0, 3.0), false);
        sim.initialize_entity(rider, Vec2::new(1.0, 2.0), false);
        sim.run_ticks(3);
        assert_eq!(sim.controller(rider).unwrap().collision_parent(), carrier);

        // New support under the carrier schedules it, remembering the trigger
        let ground = sim.spawn_entity(block("ground"));
        sim.initialize_entity(ground, Vec2::new(0.0, 4.0), false);
        let c = sim.controller(carrier).unwrap();
        assert!(c.reevaluate_parent_scheduled);
        assert_eq!(c.reevaluate_parent_caller, ground);

        // A second trigger before the update: neither is remembered
        let rect = sim.entity(rider).unwrap().registered_tile_rect();
        sim.make_surrounding_entities_schedule_reevaluate_collision_parent(rider, rect);
        assert!(sim.controller(carrier).unwrap().reevaluate_parent_caller.is_null());

        // Coming back from its own rider does nothing
        sim.reevaluate_collision_parent(carrier, rider);
        let c = sim.controller(carrier).unwrap();
        assert!(!c.reevaluate_parent_scheduled);
        assert!(c.collision_parent_scheduled().is_null());

        sim.reevaluate_collision_parent(carrier, ground);
        assert_eq!(sim.controller(carrier).unwrap().collision_parent_scheduled(), ground);
    }

    #[test]
    fn test_stand_on_static_platform_entity() {
        let mut sim = Simulation::default();
        let platform = sim.spawn_entity(
            EntityDesc::new("platform", Rect::new(0.0, 0.0, 3.0, 1.0))
                .with_collision_tiles(EntityTiles::solid_block(3, 1, Vec2::ZERO)),
        );
        let rider = sim.spawn_entity(EntityDesc::new("rider", Rect::new(0.0, 0.0, 1.0, 1.0)).movable());
        sim.initialize_entity(platform, Vec2::new(0.0, 3.0), false);
        sim.initialize_entity(rider, Vec2::new(1.0, 2.0), false);
        assert_eq!(sim.determine_stand_on_parent(rider), platform);

        // Not aligned: may not acquire a new parent
        sim.set_position_forced(rider, Vec2::new(1.0, 1.8), false);
        assert!(sim.determine_stand_on_parent(rider).is_null());
    }
}
