//! tilesim demo entry point
//!
//! Builds a small level headlessly, runs a few seconds of simulation and
//! logs every script callback. Pass a settings JSON path to override the
//! defaults; run with `RUST_LOG=debug` for per-entity detail.

#[cfg(not(target_arch = "wasm32"))]
fn main() {
    use glam::{IVec2, Vec2};
    use tilesim::geom::{Direction, PointRect, Rect};
    use tilesim::settings::SimSettings;
    use tilesim::sim::{EntityDesc, EntityTiles, FluidType, Simulation};

    env_logger::init();
    log::info!("tilesim demo starting...");

    let settings = match std::env::args().nth(1) {
        Some(path) => match SimSettings::load(&path) {
            Ok(settings) => settings,
            Err(e) => {
                log::error!("{}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => SimSettings::default(),
    };
    let mut sim = Simulation::new(settings);

    // Floor with a pond and a wall at the far end
    sim.layer.fill_solid(PointRect::new(0, 6, 24, 1));
    sim.layer.fill_solid(PointRect::new(23, 0, 1, 6));
    sim.layer.fill_fluid(PointRect::new(14, 5, 3, 1), FluidType::Water);
    sim.layer.set_solid(IVec2::new(14, 6), true);

    let hero = sim.spawn_entity(EntityDesc::new("hero", Rect::new(0.0, 0.0, 1.0, 1.0)).movable());
    sim.initialize_entity(hero, Vec2::new(1.0, 5.0), true);

    let crate_ = sim.spawn_entity(
        EntityDesc::new("crate", Rect::new(0.0, 0.0, 1.0, 1.0))
            .with_collision_tiles(EntityTiles::solid_block(1, 1, Vec2::ZERO))
            .pushable(),
    );
    sim.initialize_entity(crate_, Vec2::new(6.0, 5.0), true);

    let lift = sim.spawn_entity(
        EntityDesc::new("lift", Rect::new(0.0, 0.0, 2.0, 1.0))
            .with_collision_tiles(EntityTiles::solid_block(2, 1, Vec2::ZERO))
            .movable(),
    );
    sim.initialize_entity(lift, Vec2::new(18.0, 3.0), true);
    sim.start_movement_in_direction(lift, Vec2::new(0.0, -1.0));

    sim.start_new_movement(hero, Direction::Right);

    let ticks = (4.0 / sim.settings.tick_dt).round() as u32;
    for _ in 0..ticks {
        sim.tick();
        for event in sim.drain_events() {
            let name = sim.entity(event.entity).map_or("<gone>", |e| e.name());
            log::info!("t={} {}: {:?}", sim.time_ticks, name, event.callback);
        }
    }

    for (label, h) in [("hero", hero), ("crate", crate_), ("lift", lift)] {
        if let Some(e) = sim.entity(h) {
            log::info!("{} at {}", label, e.position());
        }
    }
    log::info!("tilesim demo done after {} ticks", ticks);
}

#[cfg(target_arch = "wasm32")]
fn main() {
    // The library is usable from wasm; the demo is native only
}
