//! Surroundings survey: a cached scan of the tiles around an entity
//!
//! Solid neighbours are reported in the entity's local frame (so `floor` is
//! always the side gravity points to). Fluid contact is edge-triggered by
//! diffing two consecutive surveys.

use super::entity::EntityHandle;
use super::events::{FluidContact, ScriptCallback};
use super::tiles::{AttributeLayer, FluidType, TileRegistry};
use crate::geom::{Direction, PointRect};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurroundingsSurvey {
    /// Tile rect the survey was taken at
    pub tile_rect: PointRect,
    /// Solid tiles directly below (local)
    pub floor: bool,
    /// Solid tiles directly above (local)
    pub ceiling: bool,
    pub wall_left: bool,
    pub wall_right: bool,
    /// Per fluid (indexed by `FluidType::index`): any occupied tile holds it
    pub touching: [bool; 3],
    /// Per fluid: every occupied tile holds it
    pub enclosed: [bool; 3],
}

impl SurroundingsSurvey {
    pub fn scan(
        tile_rect: PointRect,
        orientation_down: Direction,
        layer: &AttributeLayer,
        registry: &TileRegistry,
        ignore: EntityHandle,
    ) -> Self {
        let solid_side = |local: Direction| {
            let side = local.to_world(orientation_down);
            tile_rect
                .outside_edge(side)
                .points()
                .any(|p| registry.is_solid(p, layer, false, ignore))
        };

        let mut survey = Self {
            tile_rect,
            floor: solid_side(Direction::Down),
            ceiling: solid_side(Direction::Up),
            wall_left: solid_side(Direction::Left),
            wall_right: solid_side(Direction::Right),
            ..Default::default()
        };

        for fluid in FluidType::ALL {
            let i = fluid.index() as usize;
            let mut any = false;
            let mut all = !tile_rect.is_empty();
            for p in tile_rect.points() {
                let has = layer.fluid_at(p, fluid);
                any |= has;
                all &= has;
            }
            survey.touching[i] = any;
            survey.enclosed[i] = all;
        }
        survey
    }

    pub fn is_touching(&self, fluid: FluidType) -> bool {
        self.touching[fluid.index() as usize]
    }

    pub fn is_enclosed(&self, fluid: FluidType) -> bool {
        self.enclosed[fluid.index() as usize]
    }

    pub fn in_any_fluid(&self) -> bool {
        self.touching.iter().any(|t| *t)
    }

    /// Wall on the local side the entity is moving towards
    pub fn wall_towards(&self, local: Direction) -> bool {
        match local {
            Direction::Left => self.wall_left,
            Direction::Right => self.wall_right,
            Direction::Up => self.ceiling,
            Direction::Down => self.floor,
            Direction::None => false,
        }
    }

    /// Fluid enter/exit callbacks between `prev` and `self`, touch before
    /// enclosed, in `FluidType::ALL` order
    pub fn fluid_changes(&self, prev: &SurroundingsSurvey) -> Vec<ScriptCallback> {
        let mut out = Vec::new();
        for fluid in FluidType::ALL {
            let i = fluid.index() as usize;
            for (contact, was, is) in [
                (FluidContact::Touch, prev.touching[i], self.touching[i]),
                (FluidContact::Enclosed, prev.enclosed[i], self.enclosed[i]),
            ] {
                if is && !was {
                    out.push(ScriptCallback::FluidEnter { fluid, contact });
                } else if was && !is {
                    out.push(ScriptCallback::FluidExit { fluid, contact });
                }
            }
        }
        out
    }
}
