//! Deterministic simulation module
//!
//! All entity logic lives here. This module must stay deterministic:
//! - Fixed timestep only
//! - Stable iteration order (sort weight, then entity handle)
//! - No rendering or platform dependencies
//! - Cross-entity references are handles, never pointers

pub mod collision;
pub mod entity;
pub mod events;
pub mod movement;
pub mod moves;
pub mod path;
pub mod survey;
pub mod tiles;
pub mod world;

pub use collision::{CollisionResolution, TileCollisionHelper, check_collision, touching_directions};
pub use entity::{Entity, EntityDesc, EntityHandle, EntityState, RectUpdate, SensorId};
pub use events::{EventQueue, FluidContact, ScriptCallback, ScriptEvent};
pub use movement::{
    ControllerHandle, DirectionalMovementController, DirtyLevel, PhysicsMovementMode, TOUCH_TOLERANCE,
    integrate_velocity,
};
pub use moves::{Move, MoveKind, MoveSet, MoveSetDef, Transition};
pub use path::{AgentId, AgentState, DirectPathCache, TileCache};
pub use survey::SurroundingsSurvey;
pub use tiles::{AttributeLayer, EntityTiles, FluidType, TileAttributes, TileRegistry};
pub use world::{DEFAULT_MOVE_SET, Simulation};
