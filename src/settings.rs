//! Simulation settings and physics tuning
//!
//! Loaded from JSON so level designers can tune movement without a rebuild.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::consts::{MAX_SENSORS, SIM_DT};
use crate::error::SimError;

/// Mass/drag/thrust parameters for physics-driven movement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsSettings {
    /// Inertia; thrust and external forces are divided by this
    pub mass: f32,
    /// Acceleration applied along the steering direction (tiles/s² at mass 1)
    pub thrust: f32,
    /// Speed cap (tiles/s)
    pub max_speed: f32,
    /// Drag while airborne / free
    pub drag: f32,
    /// Drag used on the tick after a resting solid contact
    pub collision_drag: f32,
    /// Fraction of the normal velocity kept when bouncing off a wall
    pub bouncyness: f32,
    /// Distance over which steering eases out before arrival
    pub ease_out_distance: f32,
    /// Distance at which a point/entity move counts as arrived
    pub move_end_distance: f32,
}

impl Default for PhysicsSettings {
    fn default() -> Self {
        Self {
            mass: 1.0,
            thrust: 40.0,
            max_speed: 8.0,
            drag: 2.0,
            collision_drag: 8.0,
            bouncyness: 0.0,
            ease_out_distance: 1.0,
            move_end_distance: 0.1,
        }
    }
}

impl PhysicsSettings {
    pub fn validate(&self) -> Result<(), SimError> {
        if self.mass <= 0.0 {
            return Err(SimError::InvalidSettings(format!(
                "mass must be positive, got {}",
                self.mass
            )));
        }
        if self.drag < 0.0 || self.collision_drag < 0.0 {
            return Err(SimError::InvalidSettings("drag must not be negative".into()));
        }
        if !(0.0..=1.0).contains(&self.bouncyness) {
            return Err(SimError::InvalidSettings(format!(
                "bouncyness must be within 0..=1, got {}",
                self.bouncyness
            )));
        }
        Ok(())
    }
}

/// Top-level simulation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimSettings {
    /// Fixed timestep in seconds
    pub tick_dt: f32,
    /// Physics parameters for controllers that don't override them
    pub default_physics: PhysicsSettings,
    /// Sensor pool size per entity (capped at `consts::MAX_SENSORS`)
    pub max_sensors_per_entity: usize,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            tick_dt: SIM_DT,
            default_physics: PhysicsSettings::default(),
            max_sensors_per_entity: MAX_SENSORS,
        }
    }
}

impl SimSettings {
    pub fn from_json(json: &str) -> Result<Self, SimError> {
        let settings: SimSettings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let settings = Self::from_json(&json)?;
        log::info!("Loaded settings from {}", path.as_ref().display());
        Ok(settings)
    }

    pub fn to_json(&self) -> Result<String, SimError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), SimError> {
        if self.tick_dt <= 0.0 {
            return Err(SimError::InvalidSettings(format!(
                "tick_dt must be positive, got {}",
                self.tick_dt
            )));
        }
        if self.max_sensors_per_entity > MAX_SENSORS {
            return Err(SimError::InvalidSettings(format!(
                "max_sensors_per_entity may not exceed {MAX_SENSORS}"
            )));
        }
        self.default_physics.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(SimSettings::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings =
            SimSettings::from_json(r#"{ "default_physics": { "bouncyness": 0.5 } }"#).unwrap();
        assert_eq!(settings.default_physics.bouncyness, 0.5);
        assert_eq!(settings.default_physics.mass, 1.0);
        assert_eq!(settings.tick_dt, SIM_DT);
    }

    #[test]
    fn test_rejects_bad_mass() {
        let err = SimSettings::from_json(r#"{ "default_physics": { "mass": 0.0 } }"#);
        assert!(matches!(err, Err(SimError::InvalidSettings(_))));
    }

    #[test]
    fn test_json_roundtrip() {
        let settings = SimSettings::default();
        let json = settings.to_json().unwrap();
        let back = SimSettings::from_json(&json).unwrap();
        assert_eq!(back.default_physics, settings.default_physics);
    }
}
