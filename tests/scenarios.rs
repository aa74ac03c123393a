//! Cross-module scenarios and properties of the simulation core

use glam::Vec2;
use proptest::prelude::*;
use tilesim::consts::SNAP_EPSILON;
use tilesim::geom::{CollisionDirs, Direction, PointRect, Rect};
use tilesim::handle::Handle;
use tilesim::sim::{EntityDesc, EntityHandle, EntityTiles, PhysicsMovementMode, ScriptCallback, Simulation};

fn unit(name: &str) -> EntityDesc {
    EntityDesc::new(name, Rect::new(0.0, 0.0, 1.0, 1.0))
}

fn level_with_floor(row: i32) -> Simulation {
    let mut sim = Simulation::default();
    sim.layer.fill_solid(PointRect::new(-10, row, 40, 1));
    sim
}

fn count(sim: &Simulation, h: EntityHandle, pred: impl Fn(&ScriptCallback) -> bool) -> usize {
    sim.events().count_for(h, pred)
}

#[test]
fn vertical_fall_lands_on_tile_boundary() {
    let mut sim = level_with_floor(4);
    let h = sim.spawn_entity(unit("hero").movable());
    sim.initialize_entity(h, Vec2::new(2.0, 0.0), true);

    let mut landed = false;
    for _ in 0..240 {
        sim.tick();
        if sim.touching_collision_directions(h).contains(CollisionDirs::DOWN) {
            landed = true;
            break;
        }
    }
    assert!(landed);
    let e = sim.entity(h).unwrap();
    assert!((e.world_rect().bottom() - 4.0).abs() <= 2e-5);
    assert!(!sim.controller(h).unwrap().has_solid_collision());
}

#[test]
fn physics_body_lands_with_solid_collision() {
    let mut sim = level_with_floor(4);
    let h = sim.spawn_entity(unit("ball").movable());
    sim.initialize_entity(h, Vec2::new(2.0, 0.0), true);
    sim.start_physics_idle(h);
    sim.set_external_force(h, Vec2::new(0.0, 20.0));
    sim.run_ticks(180);
    let e = sim.entity(h).unwrap();
    assert!((e.world_rect().bottom() - 4.0).abs() <= 2e-5);
    assert!(sim.controller(h).unwrap().has_solid_collision());
}

#[test]
fn push_chain_applies_on_next_update() {
    let mut sim = level_with_floor(1);
    let a = sim.spawn_entity(
        unit("crate")
            .with_collision_tiles(EntityTiles::solid_block(1, 1, Vec2::ZERO))
            .movable(),
    );
    let b = sim.spawn_entity(unit("box").pushable());
    sim.initialize_entity(a, Vec2::new(0.5, 0.0), false);
    sim.initialize_entity(b, Vec2::new(1.25, 0.0), false);

    sim.push_entities(a, Vec2::new(0.5, 0.0));
    let push = sim.controller(b).unwrap().external_push();
    assert!((push.x - 0.253).abs() < 1e-5);
    assert_eq!(sim.entity(b).unwrap().position().x, 1.25);

    sim.tick();
    let x = sim.entity(b).unwrap().position().x;
    assert!((x - 1.503).abs() < 1e-4);
    assert_eq!(sim.controller(b).unwrap().external_push(), Vec2::ZERO);
}

#[test]
fn orientation_flip_keeps_world_rect() {
    let mut sim = Simulation::default();
    let h = sim.spawn_entity(unit("crawler").movable());
    sim.initialize_entity(h, Vec2::new(3.0, 2.0), true);
    let before = sim.entity(h).unwrap().world_rect();
    sim.set_orientation_down(h, Direction::Right);
    let after = sim.entity(h).unwrap().world_rect();
    assert!((before.x - after.x).abs() < 1e-5);
    assert!((before.y - after.y).abs() < 1e-5);
    assert!((before.w - after.w).abs() < 1e-5);
    assert!((before.h - after.h).abs() < 1e-5);
}

#[test]
fn distance_limited_move_ends_on_time() {
    let mut sim = level_with_floor(1);
    let h = sim.spawn_entity(unit("hero").movable());
    sim.initialize_entity(h, Vec2::ZERO, true);
    sim.tick();
    assert!(sim.start_named_move(h, "step_right", None));

    // 3 tiles/s at 60 Hz covers one tile in 20 ticks
    sim.run_ticks(19);
    assert_eq!(count(&sim, h, |c| matches!(c, ScriptCallback::MovementEnded { .. })), 0);
    sim.run_ticks(2);
    assert_eq!(count(&sim, h, |c| matches!(c, ScriptCallback::MovementEnded { .. })), 1);
}

#[test]
fn carry_begin_and_end_around_platform_lifetime() {
    let mut sim = level_with_floor(4);
    let platform = sim.spawn_entity(
        EntityDesc::new("platform", Rect::new(0.0, 0.0, 2.0, 1.0))
            .with_collision_tiles(EntityTiles::solid_block(2, 1, Vec2::ZERO)),
    );
    sim.initialize_entity(platform, Vec2::new(4.0, 3.0), true);
    let rider = sim.spawn_entity(unit("rider").movable());
    sim.initialize_entity(rider, Vec2::new(4.0, 2.0), true);

    sim.run_ticks(3);
    assert_eq!(sim.controller(rider).unwrap().collision_parent(), platform);
    assert_eq!(count(&sim, rider, |c| matches!(c, ScriptCallback::CarryBegin { .. })), 1);

    sim.kill(platform);
    assert!(sim.entity(platform).is_none());
    assert!(sim.controller(rider).unwrap().collision_parent().is_null());
    assert_eq!(count(&sim, rider, |c| matches!(c, ScriptCallback::CarryEnd)), 1);
}

#[test]
fn walker_falls_at_the_ledge_snap_point() {
    let mut sim = Simulation::default();
    sim.layer.fill_solid(PointRect::new(0, 3, 2, 1));
    let h = sim.spawn_entity(unit("walker").movable());
    sim.initialize_entity(h, Vec2::new(0.0, 2.0), true);
    sim.tick();
    assert!(sim.start_new_movement(h, Direction::Right));

    let mut fell_at = None;
    for _ in 0..60 {
        sim.tick();
        let c = sim.controller(h).unwrap();
        if c.current_move_name() == Some("fall") {
            fell_at = Some(sim.entity(h).unwrap().position());
            break;
        }
        assert_eq!(c.current_move_name(), Some("walk_right"));
        // Never walks on air past the last floor tile
        assert!(sim.entity(h).unwrap().position().x <= 2.0 + SNAP_EPSILON);
    }
    let pos = fell_at.expect("walker never switched to fall");
    assert!((pos.x - 2.0).abs() <= SNAP_EPSILON);
    assert!((pos.y - 2.0).abs() <= SNAP_EPSILON);

    sim.run_ticks(20);
    assert!(sim.entity(h).unwrap().position().y > 3.0);
}

#[test]
fn floating_static_platform_carries_without_falling() {
    let mut sim = Simulation::default();
    let platform = sim.spawn_entity(
        EntityDesc::new("platform", Rect::new(0.0, 0.0, 3.0, 1.0))
            .with_collision_tiles(EntityTiles::solid_block(3, 1, Vec2::ZERO)),
    );
    let rider = sim.spawn_entity(unit("rider").movable());
    sim.initialize_entity(platform, Vec2::new(0.0, 3.0), true);
    sim.initialize_entity(rider, Vec2::new(1.0, 2.0), true);

    sim.run_ticks(60);
    assert_eq!(sim.entity(platform).unwrap().position(), Vec2::new(0.0, 3.0));
    assert_eq!(sim.entity(rider).unwrap().position(), Vec2::new(1.0, 2.0));
    assert_eq!(sim.controller(rider).unwrap().collision_parent(), platform);
    assert_eq!(sim.controller(rider).unwrap().current_move_name(), Some("stand"));
    assert_eq!(count(&sim, rider, |c| matches!(c, ScriptCallback::CarryBegin { .. })), 1);
    assert_eq!(count(&sim, rider, |c| matches!(c, ScriptCallback::CarryEnd)), 0);
}

#[test]
fn mutual_parenting_is_rejected() {
    let mut sim = Simulation::default();
    let a = sim.spawn_entity(unit("a"));
    let b = sim.spawn_entity(unit("b"));
    sim.initialize_entity(a, Vec2::ZERO, true);
    sim.initialize_entity(b, Vec2::new(0.0, 1.0), true);
    sim.set_collision_parent_entity(a, b);
    sim.make_scheduled_collision_parent_current(a);
    sim.set_collision_parent_entity(b, a);
    sim.make_scheduled_collision_parent_current(b);

    assert_eq!(sim.controller(a).unwrap().collision_parent(), b);
    assert!(sim.controller(b).unwrap().collision_parent().is_null());
}

/// Spawns the same entities in the same order, so handles line up
fn roundtrip_scene() -> (Simulation, [EntityHandle; 4]) {
    let mut sim = level_with_floor(6);
    let jumper = sim.spawn_entity(unit("jumper").movable());
    let platform = sim.spawn_entity(
        EntityDesc::new("platform", Rect::new(0.0, 0.0, 2.0, 1.0))
            .with_collision_tiles(EntityTiles::solid_block(2, 1, Vec2::ZERO)),
    );
    let rider = sim.spawn_entity(unit("rider").movable());
    let flyer = sim.spawn_entity(unit("flyer").movable());
    sim.initialize_entity(jumper, Vec2::new(0.0, 5.0), true);
    sim.initialize_entity(platform, Vec2::new(6.0, 5.0), true);
    sim.initialize_entity(rider, Vec2::new(6.0, 4.0), true);
    sim.initialize_entity(flyer, Vec2::new(10.0, 1.0), true);
    (sim, [jumper, platform, rider, flyer])
}

#[test]
fn controller_state_survives_save_and_load() {
    let (mut sim, [jumper, platform, rider, flyer]) = roundtrip_scene();
    sim.run_ticks(3);
    sim.start_new_movement(jumper, Direction::Up);
    sim.start_path_movement(flyer, Vec2::new(14.5, 1.5));
    sim.run_ticks(5);

    let c = sim.controller(jumper).unwrap();
    assert_eq!(c.current_move_name(), Some("jump"));
    assert!(c.animation_time() > 0.0);
    assert!(sim.controller(platform).unwrap().collision_children().contains(&rider));
    assert_eq!(sim.controller(flyer).unwrap().physics_mode(), PhysicsMovementMode::Path);

    // The rider loads before its carrier; sort weights still come out right
    let handles = [rider, jumper, platform, flyer];
    let saved: Vec<Vec<u8>> = handles
        .iter()
        .map(|h| {
            let mut bytes = Vec::new();
            sim.save_controller(*h, &mut bytes).unwrap();
            bytes
        })
        .collect();

    let (mut fresh, fresh_handles) = roundtrip_scene();
    assert_eq!(fresh_handles, [jumper, platform, rider, flyer]);
    for (h, bytes) in handles.iter().zip(&saved) {
        fresh.load_controller(*h, bytes.as_slice()).unwrap();
    }

    for h in handles {
        assert_eq!(fresh.controller_snapshot(h), sim.controller_snapshot(h));
        assert_eq!(
            fresh.controller(h).unwrap().sort_weight(),
            sim.controller(h).unwrap().sort_weight()
        );
    }
    assert!(fresh.controller(flyer).unwrap().path_agent().is_some());
}

fn manual_root(sim: &Simulation, h: EntityHandle, limit: usize) -> (EntityHandle, i32) {
    let mut root = Handle::NULL;
    let mut depth = 0;
    let mut cur = sim.controller(h).unwrap().collision_parent();
    while !cur.is_null() {
        assert!((depth as usize) < limit, "collision parent chain does not terminate");
        root = cur;
        depth += 1;
        cur = sim.controller(cur).unwrap().collision_parent();
    }
    (root, depth)
}

proptest! {
    #[test]
    fn registration_matches_registered_rect(
        moves in prop::collection::vec((-6.0f32..6.0, -6.0f32..6.0, 0usize..4, any::<bool>()), 1..12)
    ) {
        let mut sim = Simulation::default();
        let h = sim.spawn_entity(
            EntityDesc::new("block", Rect::new(0.0, 0.0, 2.0, 1.0))
                .with_collision_tiles(EntityTiles::solid_block(2, 1, Vec2::ZERO)),
        );
        sim.initialize_entity(h, Vec2::ZERO, false);
        for (x, y, orient, snap) in moves {
            sim.set_position_forced(h, Vec2::new(x, y), snap);
            sim.set_orientation_down(h, Direction::CARDINALS[orient]);

            let e = sim.entity(h).unwrap();
            let expected: std::collections::BTreeSet<(i32, i32)> =
                e.registered_tile_rect().points().map(|p| (p.x, p.y)).collect();
            prop_assert_eq!(sim.registry().tiles_of(h), expected);
            let expected_tiles: std::collections::BTreeSet<(i32, i32)> =
                e.collision_tiles_regd_rect().points().map(|p| (p.x, p.y)).collect();
            prop_assert_eq!(sim.registry().entity_tiles_of(h), expected_tiles);
        }
    }

    #[test]
    fn ancestor_cache_matches_manual_walk(
        links in prop::collection::vec((0usize..6, prop::option::of(0usize..6)), 1..30)
    ) {
        let mut sim = Simulation::default();
        let hs: Vec<EntityHandle> = (0..6)
            .map(|i| {
                let h = sim.spawn_entity(unit(&format!("e{i}")));
                sim.initialize_entity(h, Vec2::new(i as f32 * 3.0, 0.0), true);
                sim.ensure_controller(h);
                h
            })
            .collect();
        for (child, parent) in links {
            let parent = parent.map_or(Handle::NULL, |p| hs[p]);
            if parent == hs[child] {
                continue;
            }
            sim.set_collision_parent_entity(hs[child], parent);
            sim.make_scheduled_collision_parent_current(hs[child]);

            for h in &hs {
                let (root, depth) = manual_root(&sim, *h, hs.len());
                let c = sim.controller(*h).unwrap();
                prop_assert_eq!(c.collision_ancestor(), root);
                prop_assert_eq!(c.sort_weight(), depth);
                prop_assert_eq!(sim.get_collision_ancestor(*h), root);
                let parent = c.collision_parent();
                if !parent.is_null() {
                    prop_assert!(sim.controller(parent).unwrap().collision_children().contains(h));
                }
            }
        }
    }

    #[test]
    fn snap_is_applied_once(x in 0.0f32..4.0, sink in 0.0f32..0.45) {
        let mut sim = level_with_floor(1);
        let h = sim.spawn_entity(unit("box").movable());
        sim.initialize_entity(h, Vec2::new(x, 0.0), false);
        sim.update_local_collision(h);
        sim.set_position_forced(h, Vec2::new(x, sink), false);
        sim.check_collision(h, Vec2::new(0.0, sink));
        let once = sim.entity(h).unwrap().position();
        let res = sim.check_collision(h, Vec2::ZERO);
        prop_assert!(!res.hit());
        prop_assert_eq!(sim.entity(h).unwrap().position(), once);
        prop_assert!(sim.entity(h).unwrap().world_rect().bottom() <= 1.0 + 1e-4);
    }
}
