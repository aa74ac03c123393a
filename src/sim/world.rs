//! Simulation instance and the fixed-step batch tick
//!
//! One `Simulation` owns everything a tick touches: the entity and controller
//! arenas, the tile registry, the level layer, the path cache, the move sets
//! and the script event queue. Nothing is global; tests build one directly.

use std::collections::HashMap;
use std::rc::Rc;

use super::entity::{Entity, EntityHandle};
use super::events::{EventQueue, ScriptEvent};
use super::movement::{ControllerHandle, DirectionalMovementController};
use super::moves::MoveSet;
use super::path::{DirectPathCache, TileCache};
use super::tiles::{AttributeLayer, TileRegistry};
use crate::handle::Arena;
use crate::settings::SimSettings;

/// Name of the move set installed by [`Simulation::new`]
pub const DEFAULT_MOVE_SET: &str = "platformer";

pub struct Simulation {
    pub settings: SimSettings,
    /// Static level attributes
    pub layer: AttributeLayer,
    pub(crate) registry: TileRegistry,
    pub(crate) entities: Arena<Entity>,
    /// Controller storage (the movement controller manager)
    pub(crate) controllers: Arena<DirectionalMovementController>,
    pub(crate) path_cache: Box<dyn TileCache>,
    pub(crate) events: EventQueue,
    move_sets: HashMap<String, Rc<MoveSet>>,
    /// Simulation tick counter
    pub time_ticks: u64,
}

impl Simulation {
    pub fn new(settings: SimSettings) -> Self {
        Self::with_path_cache(settings, Box::new(DirectPathCache::new()))
    }

    pub fn with_path_cache(settings: SimSettings, path_cache: Box<dyn TileCache>) -> Self {
        let mut sim = Self {
            settings,
            layer: AttributeLayer::new(),
            registry: TileRegistry::new(),
            entities: Arena::new(),
            controllers: Arena::new(),
            path_cache,
            events: EventQueue::new(),
            move_sets: HashMap::new(),
            time_ticks: 0,
        };
        sim.register_move_set(MoveSet::platformer());
        sim
    }

    pub fn register_move_set(&mut self, set: MoveSet) -> Rc<MoveSet> {
        let set = Rc::new(set);
        log::debug!("registered move set '{}'", set.name());
        self.move_sets.insert(set.name().to_string(), Rc::clone(&set));
        set
    }

    pub fn move_set(&self, name: &str) -> Option<Rc<MoveSet>> {
        self.move_sets.get(name).cloned()
    }

    pub(crate) fn default_move_set(&self) -> Rc<MoveSet> {
        match self.move_sets.get(DEFAULT_MOVE_SET) {
            Some(set) => Rc::clone(set),
            None => Rc::new(MoveSet::platformer()),
        }
    }

    pub fn registry(&self) -> &TileRegistry {
        &self.registry
    }

    pub fn entity(&self, h: EntityHandle) -> Option<&Entity> {
        self.entities.get(h)
    }

    pub fn entity_handles(&self) -> Vec<EntityHandle> {
        self.entities.handles()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Controller owned by `h`, if one has been created
    pub fn controller(&self, h: EntityHandle) -> Option<&DirectionalMovementController> {
        let ch = self.entities.get(h)?.movement_controller?;
        self.controllers.get(ch)
    }

    pub(crate) fn controller_mut(
        &mut self,
        h: EntityHandle,
    ) -> Option<&mut DirectionalMovementController> {
        let ch = self.entities.get(h)?.movement_controller?;
        self.controllers.get_mut(ch)
    }

    pub(crate) fn controller_handle(&self, h: EntityHandle) -> Option<ControllerHandle> {
        self.entities.get(h)?.movement_controller
    }

    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    /// Take every script event queued since the last drain
    pub fn drain_events(&mut self) -> Vec<ScriptEvent> {
        self.events.drain()
    }

    pub fn path_cache(&self) -> &dyn TileCache {
        self.path_cache.as_ref()
    }

    /// Owners in update order: parents (lower sort weight) before children
    pub fn update_order(&self) -> Vec<EntityHandle> {
        let mut order: Vec<(i32, EntityHandle)> = self
            .controllers
            .iter()
            .map(|(_, c)| (c.sort_weight, c.entity))
            .collect();
        order.sort();
        order.into_iter().map(|(_, h)| h).collect()
    }

    /// Advance by one fixed timestep
    pub fn tick(&mut self) {
        let dt = self.settings.tick_dt;
        self.tick_with_dt(dt);
    }

    pub fn tick_with_dt(&mut self, dt: f32) {
        self.time_ticks += 1;

        // (a) settle deferred state: parent flushes, survey/move reevaluation
        for h in self.update_order() {
            self.update_changes(h);
        }

        // (b) integrate; the order is re-read so weights changed in (a) apply
        for h in self.update_order() {
            self.update_controller(h, dt);
        }
    }

    pub fn run_ticks(&mut self, n: u32) {
        for _ in 0..n {
            self.tick();
        }
    }
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new(SimSettings::default())
    }
}
