//! Collision-parent graph: carriers, children, ancestors and sort weights
//!
//! A collision parent is the entity another one stands on. Changes are
//! scheduled during a tick and made current at the start of the next
//! `update_changes`, so the update order within a tick stays stable.

use super::ControllerHandle;
use crate::handle::Handle;
use crate::sim::entity::EntityHandle;
use crate::sim::events::ScriptCallback;
use crate::sim::world::Simulation;
use crate::sim_panic;

impl Simulation {
    /// Schedule `parent` as the carrier of `h`; takes effect on the next
    /// `update_changes`
    pub fn set_collision_parent_entity(&mut self, h: EntityHandle, parent: EntityHandle) -> Option<ControllerHandle> {
        let ch = self.ensure_passive_controller(h)?;
        if let Some(c) = self.controller_mut(h) {
            c.collision_parent_scheduled = parent;
        }
        Some(ch)
    }

    /// Commit the scheduled collision parent, keeping children sets,
    /// ancestors and sort weights in step and firing carry callbacks
    pub fn make_scheduled_collision_parent_current(&mut self, h: EntityHandle) {
        let Some(c) = self.controller(h) else {
            return;
        };
        let (old, mut sched) = (c.collision_parent, c.collision_parent_scheduled);
        if old == sched {
            return;
        }
        if !sched.is_null() && self.entities.get(sched).is_none() {
            sched = Handle::NULL;
        }
        if !sched.is_null() && (sched == h || self.collision_chain_contains(sched, h)) {
            log::warn!("{:?}: rejected collision parent {:?}, would form a cycle", h, sched);
            if let Some(c) = self.controller_mut(h) {
                c.collision_parent_scheduled = old;
            }
            return;
        }
        if !sched.is_null() && self.ensure_passive_controller(sched).is_none() {
            sched = Handle::NULL;
        }
        if old == sched {
            if let Some(c) = self.controller_mut(h) {
                c.collision_parent_scheduled = old;
            }
            return;
        }

        if let Some(p) = self.controller_mut(old) {
            p.collision_children.remove(&h);
        }
        let (ancestor, weight) = match self.controller_mut(sched) {
            Some(p) => {
                p.collision_children.insert(h);
                let ancestor = if p.collision_ancestor.is_null() {
                    sched
                } else {
                    p.collision_ancestor
                };
                (ancestor, p.sort_weight + 1)
            }
            None => (Handle::NULL, 0),
        };
        if let Some(c) = self.controller_mut(h) {
            c.collision_parent = sched;
            c.collision_parent_scheduled = sched;
        }
        self.override_collision_ancestor_recursive(h, ancestor, weight);
        log::debug!("{:?}: collision parent {:?} -> {:?}", h, old, sched);

        if old.is_null() {
            self.events.push(h, ScriptCallback::CarryBegin { parent: sched });
        } else if sched.is_null() {
            self.events.push(h, ScriptCallback::CarryEnd);
        }
    }

    /// Set ancestor and sort weight of `h`, then of its whole subtree
    pub(crate) fn override_collision_ancestor_recursive(
        &mut self,
        h: EntityHandle,
        ancestor: EntityHandle,
        weight: i32,
    ) {
        let mut stack = vec![(h, ancestor, weight)];
        while let Some((cur, ancestor, weight)) = stack.pop() {
            if weight as usize > self.entities.len() {
                sim_panic!("collision parent chain deeper than entity count at {:?}", cur);
                return;
            }
            let Some(c) = self.controller_mut(cur) else {
                continue;
            };
            c.collision_ancestor = ancestor;
            c.sort_weight = weight;
            let child_ancestor = if ancestor.is_null() { cur } else { ancestor };
            stack.extend(
                c.collision_children
                    .iter()
                    .map(|child| (*child, child_ancestor, weight + 1)),
            );
        }
    }

    /// Root of the collision chain above `h`, `Handle::NULL` when `h` has no
    /// parent
    pub fn get_collision_ancestor(&self, h: EntityHandle) -> EntityHandle {
        let mut visited = vec![h];
        let mut ancestor = Handle::NULL;
        let mut cur = self.controller(h).map_or(Handle::NULL, |c| c.collision_parent);
        while !cur.is_null() {
            if visited.contains(&cur) {
                sim_panic!("collision parent cycle through {:?}", cur);
                return Handle::NULL;
            }
            visited.push(cur);
            ancestor = cur;
            cur = self.controller(cur).map_or(Handle::NULL, |c| c.collision_parent);
        }
        ancestor
    }

    /// Recompute ancestors and sort weights of the whole tree containing
    /// `h`, starting from its topmost ancestor that has a controller
    pub(crate) fn recalculate_sort_weight(&mut self, h: EntityHandle) {
        let mut root = h;
        let mut visited = vec![h];
        while let Some(parent) = self
            .controller(root)
            .map(|c| c.collision_parent)
            .filter(|p| self.controller(*p).is_some())
        {
            if visited.contains(&parent) {
                sim_panic!("collision parent cycle through {:?}", parent);
                return;
            }
            visited.push(parent);
            root = parent;
        }
        self.override_collision_ancestor_recursive(root, Handle::NULL, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::{Direction, Rect};
    use crate::sim::entity::EntityDesc;
    use crate::sim::tiles::EntityTiles;
    use glam::Vec2;

    fn stack_of(n: usize) -> (Simulation, Vec<EntityHandle>) {
        let mut sim = Simulation::default();
        let hs: Vec<_> = (0..n)
            .map(|i| {
                let h = sim.spawn_entity(EntityDesc::new(&format!("e{i}"), Rect::new(0.0, 0.0, 1.0, 1.0)));
                sim.initialize_entity(h, Vec2::new(0.0, -(i as f32)), false);
                sim.ensure_controller(h);
                h
            })
            .collect();
        (sim, hs)
    }

    fn attach(sim: &mut Simulation, child: EntityHandle, parent: EntityHandle) {
        sim.set_collision_parent_entity(child, parent);
        sim.make_scheduled_collision_parent_current(child);
    }

    fn carries(sim: &Simulation, h: EntityHandle) -> (usize, usize) {
        (
            sim.events()
                .count_for(h, |c| matches!(c, ScriptCallback::CarryBegin { .. })),
            sim.events().count_for(h, |c| matches!(c, ScriptCallback::CarryEnd)),
        )
    }

    #[test]
    fn test_carry_callbacks_are_edge_triggered() {
        let (mut sim, hs) = stack_of(3);
        attach(&mut sim, hs[0], hs[1]);
        assert_eq!(carries(&sim, hs[0]), (1, 0));
        // switching carriers is not a begin or an end
        attach(&mut sim, hs[0], hs[2]);
        assert_eq!(carries(&sim, hs[0]), (1, 0));
        assert!(sim.controller(hs[1]).unwrap().collision_children().is_empty());
        assert!(sim.controller(hs[2]).unwrap().collision_children().contains(&hs[0]));
        attach(&mut sim, hs[0], Handle::NULL);
        assert_eq!(carries(&sim, hs[0]), (1, 1));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let (mut sim, hs) = stack_of(3);
        attach(&mut sim, hs[0], hs[1]);
        attach(&mut sim, hs[1], hs[2]);
        attach(&mut sim, hs[2], hs[0]);
        let c = sim.controller(hs[2]).unwrap();
        assert!(c.collision_parent().is_null());
        assert!(c.collision_parent_scheduled().is_null());
        assert!(sim.controller(hs[0]).unwrap().collision_children().is_empty());
    }

    #[test]
    fn test_ancestor_and_weight_propagate() {
        let (mut sim, hs) = stack_of(4);
        attach(&mut sim, hs[0], hs[1]);
        attach(&mut sim, hs[1], hs[2]);
        assert_eq!(sim.controller(hs[0]).unwrap().collision_ancestor(), hs[2]);
        assert_eq!(sim.controller(hs[0]).unwrap().sort_weight(), 2);

        // re-rooting the middle moves the whole subtree
        attach(&mut sim, hs[2], hs[3]);
        let c = sim.controller(hs[0]).unwrap();
        assert_eq!(c.collision_ancestor(), hs[3]);
        assert_eq!(c.sort_weight(), 3);
        assert_eq!(sim.get_collision_ancestor(hs[0]), hs[3]);
        assert!(sim.get_collision_ancestor(hs[3]).is_null());
    }

    #[test]
    fn test_recalculate_sort_weight_matches_attach() {
        let (mut sim, hs) = stack_of(3);
        attach(&mut sim, hs[0], hs[1]);
        attach(&mut sim, hs[1], hs[2]);
        sim.controller_mut(hs[0]).unwrap().sort_weight = 0;
        sim.controller_mut(hs[0]).unwrap().collision_ancestor = Handle::NULL;
        sim.recalculate_sort_weight(hs[0]);
        let c = sim.controller(hs[0]).unwrap();
        assert_eq!(c.sort_weight(), 2);
        assert_eq!(c.collision_ancestor(), hs[2]);
    }

    #[test]
    fn test_carrier_controller_is_passive() {
        let mut sim = Simulation::default();
        let platform = sim.spawn_entity(
            EntityDesc::new("platform", Rect::new(0.0, 0.0, 3.0, 1.0))
                .with_collision_tiles(EntityTiles::solid_block(3, 1, Vec2::ZERO)),
        );
        let rider = sim.spawn_entity(EntityDesc::new("rider", Rect::new(0.0, 0.0, 1.0, 1.0)).movable());
        sim.initialize_entity(platform, Vec2::new(0.0, 3.0), false);
        sim.initialize_entity(rider, Vec2::new(1.0, 2.0), false);

        // Nothing under the platform, but it never asked to move
        sim.run_ticks(60);
        assert_eq!(sim.entity(platform).unwrap().position(), Vec2::new(0.0, 3.0));
        assert_eq!(sim.entity(rider).unwrap().position(), Vec2::new(1.0, 2.0));
        let c = sim.controller(platform).unwrap();
        assert!(c.is_passive());
        assert!(c.current_move().is_none());
        assert!(c.collision_children().contains(&rider));

        // An explicit request hands it to the oracle
        assert!(sim.start_new_movement(platform, Direction::None));
        let c = sim.controller(platform).unwrap();
        assert!(!c.is_passive());
        assert_eq!(c.current_move_name(), Some("fall"));
        sim.run_ticks(5);
        assert!(sim.entity(platform).unwrap().position().y > 3.0);
    }

    #[test]
    fn test_dead_parent_resolves_to_none() {
        let (mut sim, hs) = stack_of(2);
        sim.set_collision_parent_entity(hs[0], hs[1]);
        sim.kill(hs[1]);
        sim.make_scheduled_collision_parent_current(hs[0]);
        assert!(sim.controller(hs[0]).unwrap().collision_parent().is_null());
        assert_eq!(carries(&sim, hs[0]), (0, 0));
    }
}
