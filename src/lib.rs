//! tilesim - entity simulation and tile collision core for a 2D platformer
//!
//! Core modules:
//! - `sim`: Deterministic simulation (entities, movement controllers, tile registry)
//! - `geom`: Directions, rects and the 8-direction collision mask
//! - `handle`: Generational handles used for every cross-entity reference
//! - `persistence`: Versioned binary save/load of controller state
//! - `settings`: Data-driven physics tuning

pub mod error;
pub mod geom;
pub mod handle;
pub mod persistence;
pub mod settings;
pub mod sim;

pub use error::{SaveError, SimError};
pub use geom::{CollisionDirs, Direction, PointRect, Rect};
pub use handle::{Arena, Handle};
pub use settings::{PhysicsSettings, SimSettings};

use glam::Vec2;

/// Simulation constants that are part of the behavior contract
pub mod consts {
    /// Default fixed simulation timestep (60 Hz)
    pub const SIM_DT: f32 = 1.0 / 60.0;

    /// Gap left between an entity and the tile edge it was snapped against
    pub const SNAP_EPSILON: f32 = 1e-5;
    /// Slack used when converting continuous rects to tile rects
    pub const TILE_EPSILON: f32 = 1e-4;
    /// Maximum distance from a tile boundary that still counts as aligned
    pub const ALIGN_TOLERANCE: f32 = 0.05;

    /// Velocity components below this are zeroed on collision (anti-jitter)
    pub const VELOCITY_CLIP: f32 = 0.05;
    /// Hysteresis band before a physics-driven entity turns around
    pub const TURN_DISTANCE: f32 = 0.1;
    /// Extra distance added to a push so the pushed entity clears the pusher
    pub const PUSH_MARGIN: f32 = 0.003;

    /// Fixed capacity of the per-entity sensor pool
    pub const MAX_SENSORS: usize = 8;
}

/// Whether `value` lies within `tolerance` of a tile boundary
#[inline]
pub fn is_aligned(value: f32, tolerance: f32) -> bool {
    (value - value.round()).abs() <= tolerance
}

/// Sign of a value with zero mapped to zero (unlike `f32::signum`)
#[inline]
pub fn sign(value: f32) -> f32 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Clamp the length of a vector without changing its direction
#[inline]
pub fn clamp_length(v: Vec2, max: f32) -> Vec2 {
    let len = v.length();
    if len > max && len > 0.0 {
        v * (max / len)
    } else {
        v
    }
}
