//! Local collision cache, displacement with collision, pushing and carrying

use glam::Vec2;

use super::DirtyLevel;
use crate::consts::PUSH_MARGIN;
use crate::geom::CollisionDirs;
use crate::handle::Handle;
use crate::sign;
use crate::sim::collision::{CollisionResolution, TileCollisionHelper, check_collision};
use crate::sim::entity::EntityHandle;
use crate::sim::world::Simulation;

/// Distance within which an entity counts as touching a solid edge
pub const TOUCH_TOLERANCE: f32 = 1e-3;

impl Simulation {
    /// Rescan the 8 neighbours of the registered tile rect
    pub fn update_local_collision(&mut self, h: EntityHandle) {
        let Some(e) = self.entities.get(h) else {
            return;
        };
        let rect = e.registered_tile_rect;
        let dirs = TileCollisionHelper::compute(rect, &self.layer, &self.registry, h);
        if let Some(c) = self.controller_mut(h) {
            c.local_collision = dirs;
            c.local_collision_tile_rect = rect;
        }
    }

    /// Resolve the current world rect against the cached local collision,
    /// as if it had just moved by `delta`. Applies the correction.
    pub fn check_collision(&mut self, h: EntityHandle, delta: Vec2) -> CollisionResolution {
        let Some(c) = self.controller(h) else {
            return CollisionResolution::default();
        };
        let dirs = c.local_collision;
        self.resolve_against(h, delta, dirs)
    }

    fn resolve_against(&mut self, h: EntityHandle, delta: Vec2, dirs: CollisionDirs) -> CollisionResolution {
        let Some(ch) = self.controller_handle(h) else {
            return CollisionResolution::default();
        };
        let (Some(e), Some(c)) = (self.entities.get_mut(h), self.controllers.get(ch)) else {
            return CollisionResolution::default();
        };
        let res = check_collision(&e.world_rect, &c.local_collision_tile_rect, dirs, delta);
        if res.hit() {
            e.position += res.correction;
            e.world_rect = e.local_rect.translated(e.position);
        }
        res
    }

    /// Move without any collision check
    pub(crate) fn translate(&mut self, h: EntityHandle, delta: Vec2) {
        if let Some(e) = self.entities.get_mut(h) {
            e.position += delta;
            e.world_rect = e.local_rect.translated(e.position);
        }
    }

    /// Move by `delta` and snap back against the local collision cache
    pub(crate) fn move_with_collision(&mut self, h: EntityHandle, delta: Vec2) -> CollisionResolution {
        self.translate(h, delta);
        self.check_collision(h, delta)
    }

    /// Apply and clear the pending external push. Collision tiles of the
    /// collision parent don't block it, so a descending carrier takes its
    /// children along.
    pub(crate) fn apply_external_push(&mut self, h: EntityHandle) -> Vec2 {
        let Some(c) = self.controller_mut(h) else {
            return Vec2::ZERO;
        };
        let push = std::mem::take(&mut c.external_push);
        if push == Vec2::ZERO {
            return Vec2::ZERO;
        }
        let (parent, rect, cached) = (c.collision_parent, c.local_collision_tile_rect, c.local_collision);
        let dirs = if parent.is_null() {
            cached
        } else {
            TileCollisionHelper::compute_ignoring(rect, &self.layer, &self.registry, &[h, parent])
        };
        let start = self.entities.get(h).map(|e| e.position).unwrap_or_default();
        self.translate(h, push);
        self.resolve_against(h, push, dirs);
        let moved = self.entities.get(h).map(|e| e.position - start).unwrap_or_default();
        let update = self.update_rects(h, None);
        if update.tile_rect_changed {
            self.update_local_collision(h);
            self.update_survey(h, true);
            if let Some(c) = self.controller_mut(h) {
                c.mark_dirty(DirtyLevel::ReevalMove);
            }
        }
        moved
    }

    /// `a` and `b` are on the same collision-parent chain
    pub(crate) fn shares_collision_ancestry(&self, a: EntityHandle, b: EntityHandle) -> bool {
        self.collision_chain_contains(a, b) || self.collision_chain_contains(b, a)
    }

    /// Push pushable entities overlapping this entity's solid collision
    /// tiles out along `delta`. Pushes land in `external_push` and are
    /// applied on the pushed entity's next update.
    pub fn push_entities(&mut self, h: EntityHandle, delta: Vec2) {
        let Some(e) = self.entities.get(h) else {
            return;
        };
        let Some(tiles) = e.collision_tiles.as_ref().filter(|t| t.has_solid()) else {
            return;
        };
        if delta == Vec2::ZERO {
            return;
        }
        let rect = tiles.world_rect(e.position);

        let mut pushes = Vec::new();
        for other in self.registry.find_registered_entity_handles(rect.to_tile_rect()) {
            if other == h {
                continue;
            }
            let Some(o) = self.entities.get(other) else {
                continue;
            };
            if !o.can_be_pushed || self.shares_collision_ancestry(h, other) {
                continue;
            }
            let Some(overlap) = rect.intersection(&o.world_rect) else {
                continue;
            };
            let push = Vec2::new(
                sign(delta.x) * (overlap.w + PUSH_MARGIN),
                sign(delta.y) * (overlap.h + PUSH_MARGIN),
            );
            pushes.push((other, push));
        }

        for (other, push) in pushes {
            if self.ensure_passive_controller(other).is_some() {
                log::trace!("{:?} pushes {:?} by {}", h, other, push);
                self.add_external_push(other, push);
            }
        }
    }

    /// Hand this tick's displacement to every collision child
    fn carry_children(&mut self, h: EntityHandle, delta: Vec2) {
        let children: Vec<EntityHandle> = match self.controller(h) {
            Some(c) => c.collision_children.iter().copied().collect(),
            None => return,
        };
        for child in children {
            self.add_external_push(child, delta);
        }
    }

    /// Bookkeeping shared by every locomotion mode once the entity moved
    pub(crate) fn finish_update(&mut self, h: EntityHandle, delta: Vec2) {
        let Some(c) = self.controller_mut(h) else {
            return;
        };
        c.last_delta = delta;
        if delta.x != 0.0 {
            c.flow_direction = sign(delta.x);
        }
        if delta == Vec2::ZERO {
            return;
        }
        self.carry_children(h, delta);
        self.push_entities(h, delta);
        self.reevaluate_collision_parent(h, h);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::{PointRect, Rect};
    use crate::sim::entity::EntityDesc;
    use crate::sim::tiles::EntityTiles;

    #[test]
    fn test_push_overlapping_entity() {
        let mut sim = Simulation::default();
        let pusher = sim.spawn_entity(
            EntityDesc::new("crate", Rect::new(0.0, 0.0, 1.0, 1.0))
                .with_collision_tiles(EntityTiles::solid_block(1, 1, Vec2::ZERO))
                .movable(),
        );
        let box_ = sim.spawn_entity(EntityDesc::new("box", Rect::new(0.0, 0.0, 1.0, 1.0)).pushable());
        sim.initialize_entity(pusher, Vec2::new(0.5, 0.0), false);
        sim.initialize_entity(box_, Vec2::new(1.25, 0.0), false);

        sim.push_entities(pusher, Vec2::new(0.5, 0.0));
        let push = sim.controller(box_).unwrap().external_push();
        assert!((push.x - (0.25 + PUSH_MARGIN)).abs() < 1e-5);
        assert_eq!(push.y, 0.0);
    }

    #[test]
    fn test_unpushable_entity_is_left_alone() {
        let mut sim = Simulation::default();
        let pusher = sim.spawn_entity(
            EntityDesc::new("crate", Rect::new(0.0, 0.0, 1.0, 1.0))
                .with_collision_tiles(EntityTiles::solid_block(1, 1, Vec2::ZERO)),
        );
        let wall = sim.spawn_entity(EntityDesc::new("statue", Rect::new(0.0, 0.0, 1.0, 1.0)));
        sim.initialize_entity(pusher, Vec2::new(0.5, 0.0), false);
        sim.initialize_entity(wall, Vec2::new(1.25, 0.0), false);
        sim.push_entities(pusher, Vec2::new(0.5, 0.0));
        assert!(sim.controller(wall).is_none());
    }

    #[test]
    fn test_push_respects_walls() {
        let mut sim = Simulation::default();
        sim.layer.set_solid(glam::IVec2::new(2, 0), true);
        let h = sim.spawn_entity(EntityDesc::new("box", Rect::new(0.0, 0.0, 1.0, 1.0)).movable());
        sim.initialize_entity(h, Vec2::new(1.0, 0.0), false);
        sim.update_local_collision(h);
        sim.add_external_push(h, Vec2::new(0.4, 0.0));
        sim.apply_external_push(h);
        let e = sim.entity(h).unwrap();
        assert!(e.world_rect().right() <= 2.0);
        assert_eq!(sim.controller(h).unwrap().external_push(), Vec2::ZERO);
    }

    #[test]
    fn test_local_collision_tracks_registered_rect() {
        let mut sim = Simulation::default();
        sim.layer.fill_solid(PointRect::new(0, 1, 1, 1));
        let h = sim.spawn_entity(EntityDesc::new("box", Rect::new(0.0, 0.0, 1.0, 1.0)).movable());
        sim.initialize_entity(h, Vec2::ZERO, false);
        sim.update_local_collision(h);
        let c = sim.controller(h).unwrap();
        assert!(c.local_collision().contains(CollisionDirs::DOWN));
        assert_eq!(c.local_collision_tile_rect(), PointRect::new(0, 0, 1, 1));
        assert!(sim.touching_collision_directions(h).contains(CollisionDirs::DOWN));
    }
}
