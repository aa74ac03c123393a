//! Grid geometry: directions, continuous and tile rects, collision masks
//!
//! World units are tiles. `+y` points down, so `Direction::Down` is `(0, 1)`.

use glam::{IVec2, Vec2};
use serde::{Deserialize, Serialize};

use crate::consts::TILE_EPSILON;

/// Cardinal direction (or none)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    Up,
    #[default]
    Down,
    Left,
    Right,
    None,
}

impl Direction {
    pub const CARDINALS: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    /// Unit vector for this direction (`ZERO` for `None`)
    pub fn to_vec2(self) -> Vec2 {
        match self {
            Direction::Up => Vec2::new(0.0, -1.0),
            Direction::Down => Vec2::new(0.0, 1.0),
            Direction::Left => Vec2::new(-1.0, 0.0),
            Direction::Right => Vec2::new(1.0, 0.0),
            Direction::None => Vec2::ZERO,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
            Direction::None => Direction::None,
        }
    }

    pub fn is_horizontal(self) -> bool {
        matches!(self, Direction::Left | Direction::Right)
    }

    pub fn is_vertical(self) -> bool {
        matches!(self, Direction::Up | Direction::Down)
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Direction::Up => 0,
            Direction::Down => 1,
            Direction::Left => 2,
            Direction::Right => 3,
            Direction::None => 4,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Direction::Up),
            1 => Some(Direction::Down),
            2 => Some(Direction::Left),
            3 => Some(Direction::Right),
            4 => Some(Direction::None),
            _ => None,
        }
    }

    /// Dominant cardinal direction of a vector, `None` for zero
    pub fn from_vec2(v: Vec2) -> Self {
        if v.x == 0.0 && v.y == 0.0 {
            Direction::None
        } else if v.x.abs() >= v.y.abs() {
            if v.x > 0.0 { Direction::Right } else { Direction::Left }
        } else if v.y > 0.0 {
            Direction::Down
        } else {
            Direction::Up
        }
    }

    /// Map a direction authored for `orientation_down = Down` into world space
    pub fn to_world(self, orientation_down: Direction) -> Self {
        Direction::from_vec2(rotate_to_world(self.to_vec2(), orientation_down))
    }

    /// Inverse of [`Direction::to_world`]
    pub fn to_local(self, orientation_down: Direction) -> Self {
        Direction::from_vec2(rotate_to_local(self.to_vec2(), orientation_down))
    }
}

/// Rotate a vector authored with the floor below (`Down`) so that the floor
/// lies towards `orientation_down`. `None` leaves the vector untouched.
#[inline]
pub fn rotate_to_world(v: Vec2, orientation_down: Direction) -> Vec2 {
    match orientation_down {
        Direction::Down | Direction::None => v,
        Direction::Right => Vec2::new(v.y, -v.x),
        Direction::Left => Vec2::new(-v.y, v.x),
        Direction::Up => Vec2::new(-v.x, -v.y),
    }
}

/// Inverse of [`rotate_to_world`]
#[inline]
pub fn rotate_to_local(v: Vec2, orientation_down: Direction) -> Vec2 {
    match orientation_down {
        Direction::Down | Direction::None => v,
        Direction::Right => Vec2::new(-v.y, v.x),
        Direction::Left => Vec2::new(v.y, -v.x),
        Direction::Up => Vec2::new(-v.x, -v.y),
    }
}

/// Continuous axis-aligned rectangle (min corner + size)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn from_min_max(min: Vec2, max: Vec2) -> Self {
        Self::new(min.x, min.y, max.x - min.x, max.y - min.y)
    }

    #[inline]
    pub fn min(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }

    #[inline]
    pub fn max(&self) -> Vec2 {
        Vec2::new(self.right(), self.bottom())
    }

    #[inline]
    pub fn right(&self) -> f32 {
        self.x + self.w
    }

    #[inline]
    pub fn bottom(&self) -> f32 {
        self.y + self.h
    }

    pub fn size(&self) -> Vec2 {
        Vec2::new(self.w, self.h)
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(self.x + self.w * 0.5, self.y + self.h * 0.5)
    }

    pub fn translated(&self, offset: Vec2) -> Self {
        Self::new(self.x + offset.x, self.y + offset.y, self.w, self.h)
    }

    /// Rotate around the local origin (the owning entity's position)
    pub fn rotated(&self, orientation_down: Direction) -> Self {
        let a = rotate_to_world(self.min(), orientation_down);
        let b = rotate_to_world(self.max(), orientation_down);
        Self::from_min_max(a.min(b), a.max(b))
    }

    /// Overlapping region, `None` if the rects only touch or are disjoint
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let min = self.min().max(other.min());
        let max = self.max().min(other.max());
        if max.x > min.x && max.y > min.y {
            Some(Rect::from_min_max(min, max))
        } else {
            None
        }
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.intersection(other).is_some()
    }

    /// Edge coordinate on the given side
    pub fn edge(&self, side: Direction) -> f32 {
        match side {
            Direction::Up => self.y,
            Direction::Down => self.bottom(),
            Direction::Left => self.x,
            Direction::Right => self.right(),
            Direction::None => 0.0,
        }
    }

    /// Tiles touched by this rect. Edges lying exactly on a tile boundary do
    /// not claim the neighbouring tile.
    pub fn to_tile_rect(&self) -> PointRect {
        let x0 = (self.x + TILE_EPSILON).floor() as i32;
        let y0 = (self.y + TILE_EPSILON).floor() as i32;
        let x1 = (self.right() - TILE_EPSILON).ceil() as i32;
        let y1 = (self.bottom() - TILE_EPSILON).ceil() as i32;
        PointRect::new(x0, y0, (x1 - x0).max(1), (y1 - y0).max(1))
    }
}

/// Integer tile rectangle (min corner + size in tiles)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PointRect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl PointRect {
    pub const EMPTY: PointRect = PointRect { x: 0, y: 0, w: 0, h: 0 };

    pub const fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    pub fn is_empty(&self) -> bool {
        self.w <= 0 || self.h <= 0
    }

    pub fn right(&self) -> i32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.h
    }

    pub fn contains(&self, p: IVec2) -> bool {
        p.x >= self.x && p.x < self.right() && p.y >= self.y && p.y < self.bottom()
    }

    /// Grow by `n` tiles on every side
    pub fn grown(&self, n: i32) -> Self {
        Self::new(self.x - n, self.y - n, self.w + 2 * n, self.h + 2 * n)
    }

    /// Iterate every tile in row-major order
    pub fn points(self) -> impl Iterator<Item = IVec2> {
        let (x0, x1) = (self.x, self.right());
        (self.y..self.bottom()).flat_map(move |y| (x0..x1).map(move |x| IVec2::new(x, y)))
    }

    /// The row/column of tiles immediately outside the given side
    pub fn outside_edge(&self, side: Direction) -> PointRect {
        match side {
            Direction::Up => PointRect::new(self.x, self.y - 1, self.w, 1),
            Direction::Down => PointRect::new(self.x, self.bottom(), self.w, 1),
            Direction::Left => PointRect::new(self.x - 1, self.y, 1, self.h),
            Direction::Right => PointRect::new(self.right(), self.y, 1, self.h),
            Direction::None => PointRect::EMPTY,
        }
    }

    pub fn to_rect(&self) -> Rect {
        Rect::new(self.x as f32, self.y as f32, self.w as f32, self.h as f32)
    }
}

/// 8-direction solid-neighbour mask (4 edges + 4 corners)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CollisionDirs(u8);

impl CollisionDirs {
    pub const NONE: Self = Self(0);
    pub const UP: Self = Self(1 << 0);
    pub const DOWN: Self = Self(1 << 1);
    pub const LEFT: Self = Self(1 << 2);
    pub const RIGHT: Self = Self(1 << 3);
    pub const UP_LEFT: Self = Self(1 << 4);
    pub const UP_RIGHT: Self = Self(1 << 5);
    pub const DOWN_LEFT: Self = Self(1 << 6);
    pub const DOWN_RIGHT: Self = Self(1 << 7);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Edge flag for a cardinal direction
    pub fn edge(side: Direction) -> Self {
        match side {
            Direction::Up => Self::UP,
            Direction::Down => Self::DOWN,
            Direction::Left => Self::LEFT,
            Direction::Right => Self::RIGHT,
            Direction::None => Self::NONE,
        }
    }

    /// Corner flag between a horizontal and a vertical side
    pub fn corner(horizontal: Direction, vertical: Direction) -> Self {
        match (horizontal, vertical) {
            (Direction::Left, Direction::Up) => Self::UP_LEFT,
            (Direction::Right, Direction::Up) => Self::UP_RIGHT,
            (Direction::Left, Direction::Down) => Self::DOWN_LEFT,
            (Direction::Right, Direction::Down) => Self::DOWN_RIGHT,
            _ => Self::NONE,
        }
    }

    /// Cardinal directions whose edge flag is set
    pub fn edges(self) -> impl Iterator<Item = Direction> {
        Direction::CARDINALS
            .into_iter()
            .filter(move |d| self.contains(Self::edge(*d)))
    }

    /// Contact normal (pointing away from the solid edges), normalized
    pub fn normal(self) -> Vec2 {
        let sum: Vec2 = self.edges().map(|d| -d.to_vec2()).sum();
        sum.normalize_or_zero()
    }
}

impl std::ops::BitOr for CollisionDirs {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_roundtrip() {
        let v = Vec2::new(0.25, 1.0);
        for d in Direction::CARDINALS {
            let back = rotate_to_local(rotate_to_world(v, d), d);
            assert!((back - v).length() < 1e-6, "{d:?}");
        }
    }

    #[test]
    fn test_down_maps_to_orientation() {
        for d in Direction::CARDINALS {
            assert_eq!(Direction::Down.to_world(d), d);
            assert_eq!(d.to_local(d), Direction::Down);
        }
    }

    #[test]
    fn test_rect_to_tile_rect_aligned() {
        let r = Rect::new(2.0, 3.0, 1.0, 2.0);
        assert_eq!(r.to_tile_rect(), PointRect::new(2, 3, 1, 2));
    }

    #[test]
    fn test_rect_to_tile_rect_straddling() {
        let r = Rect::new(2.5, 3.0, 1.0, 1.0);
        assert_eq!(r.to_tile_rect(), PointRect::new(2, 3, 2, 1));
    }

    #[test]
    fn test_rect_rotation() {
        let r = Rect::new(-0.5, -2.0, 1.0, 2.0);
        let rotated = r.rotated(Direction::Right);
        assert_eq!(rotated, Rect::new(-2.0, -0.5, 2.0, 1.0));
    }

    #[test]
    fn test_intersection() {
        let a = Rect::new(0.0, 0.0, 2.0, 2.0);
        let b = Rect::new(1.5, 0.5, 2.0, 1.0);
        let i = a.intersection(&b).unwrap();
        assert!((i.w - 0.5).abs() < 1e-6);
        assert!((i.h - 1.0).abs() < 1e-6);
        assert!(a.intersection(&Rect::new(2.0, 0.0, 1.0, 1.0)).is_none());
    }

    #[test]
    fn test_collision_dirs_normal() {
        let mut dirs = CollisionDirs::NONE;
        dirs.insert(CollisionDirs::DOWN);
        assert_eq!(dirs.normal(), Vec2::new(0.0, -1.0));
        dirs.insert(CollisionDirs::DOWN_LEFT);
        assert_eq!(dirs.normal(), Vec2::new(0.0, -1.0));
        assert!(dirs.contains(CollisionDirs::DOWN_LEFT));
        assert!(!dirs.contains(CollisionDirs::UP));
    }
}
