//! Level tile attributes and the tile-registration index
//!
//! `AttributeLayer` is the static level: solid tiles and fluids.
//! `TileRegistry` maps tile coordinates to the entities currently occupying
//! them, plus the solid footprints ("entity tiles") of moving platforms.

use std::collections::{BTreeSet, HashMap};

use glam::{IVec2, Vec2};
use serde::{Deserialize, Serialize};

use super::entity::EntityHandle;
use crate::geom::{PointRect, Rect};

/// Fluid kinds tracked by the surroundings survey
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FluidType {
    Water,
    Lava,
    Waterfall,
}

impl FluidType {
    pub const ALL: [FluidType; 3] = [FluidType::Water, FluidType::Lava, FluidType::Waterfall];

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn index(self) -> u8 {
        self as u8
    }
}

/// Attributes of a single level tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TileAttributes {
    pub solid: bool,
    pub water: bool,
    pub lava: bool,
    pub waterfall: bool,
}

impl TileAttributes {
    pub const SOLID: Self = Self {
        solid: true,
        water: false,
        lava: false,
        waterfall: false,
    };

    pub fn fluid(fluid: FluidType) -> Self {
        let mut attrs = Self::default();
        attrs.set_fluid(fluid, true);
        attrs
    }

    pub fn has_fluid(&self, fluid: FluidType) -> bool {
        match fluid {
            FluidType::Water => self.water,
            FluidType::Lava => self.lava,
            FluidType::Waterfall => self.waterfall,
        }
    }

    pub fn set_fluid(&mut self, fluid: FluidType, value: bool) {
        match fluid {
            FluidType::Water => self.water = value,
            FluidType::Lava => self.lava = value,
            FluidType::Waterfall => self.waterfall = value,
        }
    }

    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Sparse static tile attributes of the level
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttributeLayer {
    tiles: HashMap<IVec2, TileAttributes>,
}

impl AttributeLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, p: IVec2) -> TileAttributes {
        self.tiles.get(&p).copied().unwrap_or_default()
    }

    pub fn set(&mut self, p: IVec2, attrs: TileAttributes) {
        if attrs.is_empty() {
            self.tiles.remove(&p);
        } else {
            self.tiles.insert(p, attrs);
        }
    }

    pub fn set_solid(&mut self, p: IVec2, solid: bool) {
        let mut attrs = self.get(p);
        attrs.solid = solid;
        self.set(p, attrs);
    }

    /// Mark every tile of `rect` solid
    pub fn fill_solid(&mut self, rect: PointRect) {
        for p in rect.points() {
            self.set_solid(p, true);
        }
    }

    pub fn fill_fluid(&mut self, rect: PointRect, fluid: FluidType) {
        for p in rect.points() {
            let mut attrs = self.get(p);
            attrs.set_fluid(fluid, true);
            self.set(p, attrs);
        }
    }

    pub fn is_solid(&self, p: IVec2) -> bool {
        self.get(p).solid
    }

    pub fn fluid_at(&self, p: IVec2, fluid: FluidType) -> bool {
        self.get(p).has_fluid(fluid)
    }
}

/// Tile-shaped solid footprint owned by an entity (moving platforms)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTiles {
    pub width: i32,
    pub height: i32,
    /// Row-major solidity, `width * height` entries
    pub solid: Vec<bool>,
    /// Offset of the footprint's min corner from the entity position
    pub offset: Vec2,
}

impl EntityTiles {
    /// Fully solid block of `width` x `height` tiles
    pub fn solid_block(width: i32, height: i32, offset: Vec2) -> Self {
        Self {
            width,
            height,
            solid: vec![true; (width * height).max(0) as usize],
            offset,
        }
    }

    pub fn is_solid_local(&self, x: i32, y: i32) -> bool {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return false;
        }
        self.solid
            .get((y * self.width + x) as usize)
            .copied()
            .unwrap_or(false)
    }

    pub fn has_solid(&self) -> bool {
        self.solid.iter().any(|s| *s)
    }

    /// Continuous world-space extent for an owner at `position`
    pub fn world_rect(&self, position: Vec2) -> Rect {
        let min = position + self.offset;
        Rect::new(min.x, min.y, self.width as f32, self.height as f32)
    }

    /// Tile footprint for an owner at `position` (rounded to the nearest tile)
    pub fn tile_rect(&self, position: Vec2) -> PointRect {
        let min = (position + self.offset).round();
        PointRect::new(min.x as i32, min.y as i32, self.width, self.height)
    }

    /// World tiles that are solid when the footprint sits at `rect`
    pub fn solid_points(&self, rect: PointRect) -> impl Iterator<Item = IVec2> + '_ {
        rect.points()
            .filter(move |p| self.is_solid_local(p.x - rect.x, p.y - rect.y))
    }
}

/// Tile-coordinate index of entity occupancy
#[derive(Debug, Default)]
pub struct TileRegistry {
    entities: HashMap<IVec2, Vec<EntityHandle>>,
    entity_tiles: HashMap<IVec2, Vec<EntityHandle>>,
}

impl TileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_entity_handle(&mut self, rect: PointRect, handle: EntityHandle) {
        for p in rect.points() {
            let slot = self.entities.entry(p).or_default();
            if !slot.contains(&handle) {
                slot.push(handle);
            }
        }
    }

    pub fn unregister_entity_handle(&mut self, rect: PointRect, handle: EntityHandle) {
        for p in rect.points() {
            remove_from(&mut self.entities, p, handle);
        }
    }

    /// Move a registration, touching only the tiles that actually changed
    pub fn move_register_entity_handle(
        &mut self,
        old: PointRect,
        new: PointRect,
        handle: EntityHandle,
    ) {
        for p in old.points().filter(|p| !new.contains(*p)) {
            remove_from(&mut self.entities, p, handle);
        }
        for p in new.points().filter(|p| !old.contains(*p)) {
            let slot = self.entities.entry(p).or_default();
            if !slot.contains(&handle) {
                slot.push(handle);
            }
        }
    }

    /// Register the solid cells of an entity's collision tiles placed at `rect`
    pub fn register_entity_tiles(
        &mut self,
        rect: PointRect,
        tiles: &EntityTiles,
        owner: EntityHandle,
    ) {
        for p in tiles.solid_points(rect) {
            let slot = self.entity_tiles.entry(p).or_default();
            if !slot.contains(&owner) {
                slot.push(owner);
            }
        }
    }

    pub fn unregister_entity_tiles(&mut self, rect: PointRect, owner: EntityHandle) {
        for p in rect.points() {
            remove_from(&mut self.entity_tiles, p, owner);
        }
    }

    /// Entities registered anywhere inside `rect`
    pub fn find_registered_entity_handles(&self, rect: PointRect) -> BTreeSet<EntityHandle> {
        rect.points()
            .filter_map(|p| self.entities.get(&p))
            .flatten()
            .copied()
            .collect()
    }

    /// Owners of solid entity tiles at `p`
    pub fn entity_tiles_at(&self, p: IVec2) -> &[EntityHandle] {
        self.entity_tiles.get(&p).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Tiles `handle` is currently registered on (for consistency checks)
    pub fn tiles_of(&self, handle: EntityHandle) -> BTreeSet<(i32, i32)> {
        self.entities
            .iter()
            .filter(|(_, hs)| hs.contains(&handle))
            .map(|(p, _)| (p.x, p.y))
            .collect()
    }

    /// Tiles where `owner` has registered solid collision tiles
    pub fn entity_tiles_of(&self, owner: EntityHandle) -> BTreeSet<(i32, i32)> {
        self.entity_tiles
            .iter()
            .filter(|(_, hs)| hs.contains(&owner))
            .map(|(p, _)| (p.x, p.y))
            .collect()
    }

    /// Solid check combining the static layer with entity collision tiles
    pub fn is_solid(
        &self,
        p: IVec2,
        layer: &AttributeLayer,
        ignore_tiles: bool,
        ignore_entity: EntityHandle,
    ) -> bool {
        if !ignore_tiles && layer.is_solid(p) {
            return true;
        }
        self.entity_tiles_at(p).iter().any(|h| *h != ignore_entity)
    }
}

fn remove_from(map: &mut HashMap<IVec2, Vec<EntityHandle>>, p: IVec2, handle: EntityHandle) {
    if let Some(slot) = map.get_mut(&p) {
        slot.retain(|h| *h != handle);
        if slot.is_empty() {
            map.remove(&p);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Handle;

    fn handle(bits: u64) -> EntityHandle {
        Handle::from_bits(bits)
    }

    #[test]
    fn test_register_find_unregister() {
        let mut reg = TileRegistry::new();
        let a = handle(1);
        let rect = PointRect::new(0, 0, 2, 2);
        reg.register_entity_handle(rect, a);
        assert!(reg.find_registered_entity_handles(PointRect::new(1, 1, 1, 1)).contains(&a));
        assert_eq!(reg.tiles_of(a).len(), 4);
        reg.unregister_entity_handle(rect, a);
        assert!(reg.tiles_of(a).is_empty());
    }

    #[test]
    fn test_move_register() {
        let mut reg = TileRegistry::new();
        let a = handle(1);
        let old = PointRect::new(0, 0, 2, 1);
        let new = PointRect::new(1, 0, 2, 1);
        reg.register_entity_handle(old, a);
        reg.move_register_entity_handle(old, new, a);
        let expected: BTreeSet<_> = [(1, 0), (2, 0)].into_iter().collect();
        assert_eq!(reg.tiles_of(a), expected);
    }

    #[test]
    fn test_entity_tiles_solidity() {
        let mut reg = TileRegistry::new();
        let layer = AttributeLayer::new();
        let owner = handle(7);
        let mut tiles = EntityTiles::solid_block(2, 1, Vec2::ZERO);
        tiles.solid[1] = false;
        let rect = tiles.tile_rect(Vec2::new(3.2, 5.0));
        assert_eq!(rect, PointRect::new(3, 5, 2, 1));
        reg.register_entity_tiles(rect, &tiles, owner);
        assert!(reg.is_solid(IVec2::new(3, 5), &layer, false, Handle::NULL));
        assert!(!reg.is_solid(IVec2::new(4, 5), &layer, false, Handle::NULL));
        assert!(!reg.is_solid(IVec2::new(3, 5), &layer, false, owner));
        reg.unregister_entity_tiles(rect, owner);
        assert!(reg.entity_tiles_of(owner).is_empty());
    }

    #[test]
    fn test_layer_ignore_tiles() {
        let reg = TileRegistry::new();
        let mut layer = AttributeLayer::new();
        layer.set_solid(IVec2::new(0, 0), true);
        assert!(reg.is_solid(IVec2::ZERO, &layer, false, Handle::NULL));
        assert!(!reg.is_solid(IVec2::ZERO, &layer, true, Handle::NULL));
    }

    #[test]
    fn test_fluid_index() {
        assert_eq!(FluidType::from_index(1), Some(FluidType::Lava));
        assert_eq!(FluidType::from_index(3), None);
    }
}
