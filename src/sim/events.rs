//! Script callback surface
//!
//! The core never calls into the scripting layer directly. Callbacks are
//! queued as [`ScriptEvent`]s during a tick and drained by the host afterwards,
//! so a callback can never re-enter the simulation mid-update.

use glam::Vec2;

use super::entity::EntityHandle;
use super::tiles::FluidType;
use crate::geom::{Direction, PointRect};

/// How an entity is in contact with a fluid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FluidContact {
    /// At least one occupied tile holds the fluid
    Touch,
    /// Every occupied tile holds the fluid
    Enclosed,
}

/// A single callback to the scripting layer
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptCallback {
    MovementEnded { direction: Direction },
    MovementFailed { direction: Direction, move_name: String },
    PathMovementFailed { point: Vec2 },
    SolidCollision { normal: Vec2, speed: f32 },
    PhysicsTurn,
    CarryBegin { parent: EntityHandle },
    CarryEnd,
    FluidEnter { fluid: FluidType, contact: FluidContact },
    FluidExit { fluid: FluidType, contact: FluidContact },
    TileChange { old: PointRect, new: PointRect },
}

/// Callback addressed to an entity
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptEvent {
    pub entity: EntityHandle,
    pub callback: ScriptCallback,
}

/// Ordered event queue for one simulation instance
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Vec<ScriptEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entity: EntityHandle, callback: ScriptCallback) {
        log::trace!("script event {:?}: {:?}", entity, callback);
        self.events.push(ScriptEvent { entity, callback });
    }

    pub fn drain(&mut self) -> Vec<ScriptEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScriptEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Count queued callbacks for `entity` matching `pred`
    pub fn count_for(&self, entity: EntityHandle, pred: impl Fn(&ScriptCallback) -> bool) -> usize {
        self.events
            .iter()
            .filter(|e| e.entity == entity && pred(&e.callback))
            .count()
    }
}
