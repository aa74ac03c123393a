//! Moves and the move-selection oracle
//!
//! A [`MoveSet`] is shared by every controller that uses it and answers one
//! question: given a requested direction, the current move and the entity's
//! surroundings, which move should run next? Moves are authored in the
//! entity's local frame (floor below) and rotated into world space by the
//! controller.

use std::rc::Rc;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use super::survey::SurroundingsSurvey;
use crate::error::SimError;
use crate::geom::Direction;

/// Behaviour flags of a move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MoveFlags {
    pub snap_x_start: bool,
    pub snap_y_start: bool,
    pub snap_x_end: bool,
    pub snap_y_end: bool,
    /// Skip tile collision while this move runs
    pub ignore_collision: bool,
    /// Direction changes are deferred until the move ends
    pub persistent: bool,
}

/// One segment of a canned animation move
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnimationStep {
    /// Seconds this step takes
    pub duration: f32,
    /// Local displacement covered linearly over the step
    pub offset: Vec2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MoveKind {
    /// Constant speed, integrated every tick
    Directive,
    /// Fixed displacement curve made of discrete steps
    Animation { steps: Vec<AnimationStep> },
    /// Marker move while a physics movement mode drives the entity
    Physics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Move {
    pub name: String,
    /// Local direction this move travels in
    pub direction: Direction,
    /// Local speed (tiles/s) for directive moves
    #[serde(default)]
    pub speed: Vec2,
    pub kind: MoveKind,
    #[serde(default)]
    pub flags: MoveFlags,
    /// Distance after which the move ends; negative means unlimited
    #[serde(default = "unlimited")]
    pub end_distance: f32,
}

fn unlimited() -> f32 {
    -1.0
}

impl Move {
    pub fn directive(name: &str, direction: Direction, speed: Vec2) -> Self {
        Self {
            name: name.to_string(),
            direction,
            speed,
            kind: MoveKind::Directive,
            flags: MoveFlags::default(),
            end_distance: -1.0,
        }
    }

    pub fn animation(name: &str, direction: Direction, steps: Vec<AnimationStep>) -> Self {
        Self {
            name: name.to_string(),
            direction,
            speed: Vec2::ZERO,
            kind: MoveKind::Animation { steps },
            flags: MoveFlags::default(),
            end_distance: -1.0,
        }
    }

    pub fn with_flags(mut self, flags: MoveFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_end_distance(mut self, distance: f32) -> Self {
        self.end_distance = distance;
        self
    }

    pub fn is_animation(&self) -> bool {
        matches!(self.kind, MoveKind::Animation { .. })
    }

    pub fn steps(&self) -> &[AnimationStep] {
        match &self.kind {
            MoveKind::Animation { steps } => steps,
            _ => &[],
        }
    }

    /// Total animation time (0 for non-animation moves)
    pub fn time_length(&self) -> f32 {
        self.steps().iter().map(|s| s.duration).sum()
    }

    /// Local displacement accumulated after `time` seconds of animation
    pub fn animation_offset_at(&self, time: f32) -> Vec2 {
        let mut remaining = time.max(0.0);
        let mut offset = Vec2::ZERO;
        for step in self.steps() {
            if remaining >= step.duration {
                offset += step.offset;
                remaining -= step.duration;
            } else {
                if step.duration > 0.0 {
                    offset += step.offset * (remaining / step.duration);
                }
                break;
            }
        }
        offset
    }
}

/// Survey predicate a selection rule requires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SurveyCondition {
    #[default]
    Always,
    OnFloor,
    InAir,
    InFluid,
    /// The requested direction is not blocked by a wall
    NoWallAhead,
    WallAhead,
}

impl SurveyCondition {
    fn holds(self, survey: &SurroundingsSurvey, direction: Direction) -> bool {
        match self {
            SurveyCondition::Always => true,
            SurveyCondition::OnFloor => survey.floor,
            SurveyCondition::InAir => !survey.floor,
            SurveyCondition::InFluid => survey.in_any_fluid(),
            SurveyCondition::NoWallAhead => !survey.wall_towards(direction),
            SurveyCondition::WallAhead => survey.wall_towards(direction),
        }
    }
}

/// `(direction, current move, survey) -> move` selection rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveRule {
    /// Requested local direction; `None` in the file matches any direction
    #[serde(default)]
    pub direction: Option<Direction>,
    /// Required current move
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub condition: SurveyCondition,
    #[serde(rename = "move")]
    pub move_name: String,
}

/// Blend between two moves, defined by the move set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionDef {
    pub name: String,
    pub from: String,
    pub to: String,
    pub duration: f32,
}

/// Active transition held by a controller
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub name: String,
    pub remaining: f32,
}

impl Transition {
    /// Count down; returns true once finished
    pub fn advance(&mut self, dt: f32) -> bool {
        self.remaining -= dt;
        self.remaining <= 0.0
    }
}

/// Serializable move set description
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MoveSetDef {
    pub name: String,
    pub moves: Vec<Move>,
    pub rules: Vec<MoveRule>,
    #[serde(default)]
    pub transitions: Vec<TransitionDef>,
}

/// The move oracle
#[derive(Debug)]
pub struct MoveSet {
    name: String,
    moves: Vec<Rc<Move>>,
    rules: Vec<MoveRule>,
    transitions: Vec<TransitionDef>,
}

impl MoveSet {
    pub fn from_def(def: MoveSetDef) -> Result<Self, SimError> {
        for rule in &def.rules {
            if !def.moves.iter().any(|m| m.name == rule.move_name) {
                return Err(SimError::InvalidSettings(format!(
                    "move set '{}' rule references unknown move '{}'",
                    def.name, rule.move_name
                )));
            }
        }
        Ok(Self::build(def))
    }

    fn build(def: MoveSetDef) -> Self {
        Self {
            name: def.name,
            moves: def.moves.into_iter().map(Rc::new).collect(),
            rules: def.rules,
            transitions: def.transitions,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, SimError> {
        Self::from_def(serde_json::from_str(json)?)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn find(&self, name: &str) -> Option<Rc<Move>> {
        self.moves.iter().find(|m| m.name == name).cloned()
    }

    /// Select the move for `direction`; `None` if no rule applies
    pub fn get_move(
        &self,
        direction: Direction,
        current: Option<&Move>,
        survey: &SurroundingsSurvey,
    ) -> Option<Rc<Move>> {
        let rule = self.rules.iter().find(|r| {
            r.direction.is_none_or(|d| d == direction)
                && r.from
                    .as_deref()
                    .is_none_or(|from| current.is_some_and(|c| c.name == from))
                && r.condition.holds(survey, direction)
        })?;
        self.find(&rule.move_name)
    }

    pub fn transition(&self, from: &Move, to: &Move) -> Option<Transition> {
        self.transitions
            .iter()
            .find(|t| t.from == from.name && t.to == to.name)
            .map(|t| Transition {
                name: t.name.clone(),
                remaining: t.duration,
            })
    }

    /// Stock platformer moves: stand, walk, fall, jump, and a one-tile step
    pub fn platformer() -> Self {
        let snap_end = MoveFlags {
            snap_x_end: true,
            snap_y_end: true,
            ..Default::default()
        };
        let jump_flags = MoveFlags {
            persistent: true,
            snap_y_end: true,
            ..Default::default()
        };
        let def = MoveSetDef {
            name: "platformer".into(),
            moves: vec![
                Move::directive("stand", Direction::None, Vec2::ZERO),
                Move::directive("fall", Direction::Down, Vec2::new(0.0, 6.0)),
                Move::directive("walk_left", Direction::Left, Vec2::new(-3.0, 0.0)),
                Move::directive("walk_right", Direction::Right, Vec2::new(3.0, 0.0)),
                Move::directive("step_left", Direction::Left, Vec2::new(-3.0, 0.0))
                    .with_flags(snap_end)
                    .with_end_distance(1.0),
                Move::directive("step_right", Direction::Right, Vec2::new(3.0, 0.0))
                    .with_flags(snap_end)
                    .with_end_distance(1.0),
                Move::animation(
                    "jump",
                    Direction::Up,
                    vec![
                        AnimationStep {
                            duration: 0.15,
                            offset: Vec2::new(0.0, -1.0),
                        },
                        AnimationStep {
                            duration: 0.25,
                            offset: Vec2::new(0.0, -1.0),
                        },
                    ],
                )
                .with_flags(jump_flags),
            ],
            rules: vec![
                MoveRule {
                    direction: Some(Direction::Up),
                    from: None,
                    condition: SurveyCondition::OnFloor,
                    move_name: "jump".into(),
                },
                MoveRule {
                    direction: None,
                    from: None,
                    condition: SurveyCondition::InAir,
                    move_name: "fall".into(),
                },
                MoveRule {
                    direction: Some(Direction::Left),
                    from: None,
                    condition: SurveyCondition::NoWallAhead,
                    move_name: "walk_left".into(),
                },
                MoveRule {
                    direction: Some(Direction::Right),
                    from: None,
                    condition: SurveyCondition::NoWallAhead,
                    move_name: "walk_right".into(),
                },
                MoveRule {
                    direction: Some(Direction::None),
                    from: None,
                    condition: SurveyCondition::Always,
                    move_name: "stand".into(),
                },
            ],
            transitions: vec![TransitionDef {
                name: "land".into(),
                from: "fall".into(),
                to: "stand".into(),
                duration: 0.1,
            }],
        };
        Self::build(def)
    }
}
