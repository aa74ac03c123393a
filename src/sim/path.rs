//! Path-following collaborator
//!
//! Controllers in path mode never plan routes themselves; they register an
//! agent with a [`TileCache`] and steer along the velocity it reports.

use std::collections::{HashMap, HashSet};

use glam::{IVec2, Vec2};

/// Agent id handed out by a [`TileCache`]
pub type AgentId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Moving,
    Arrived,
    /// No path exists to the target
    Failed,
}

/// Path agent interface consumed by the movement controller
pub trait TileCache {
    fn add_agent(&mut self, position: Vec2, target: Vec2, max_speed: f32) -> AgentId;
    fn remove_agent(&mut self, agent: AgentId);
    fn update_target_position(&mut self, agent: AgentId, target: Vec2);
    fn update_agent_position(&mut self, agent: AgentId, position: Vec2);
    fn agent_state(&self, agent: AgentId) -> Option<AgentState>;
    fn agent_velocity(&self, agent: AgentId) -> Vec2;
    fn agent_end_point(&self, agent: AgentId) -> Option<Vec2>;
}

#[derive(Debug, Clone)]
struct Agent {
    position: Vec2,
    target: Vec2,
    max_speed: f32,
}

/// Straight-line agents: steer directly at the target, fail when the target
/// tile has been marked unreachable
#[derive(Debug, Default)]
pub struct DirectPathCache {
    agents: HashMap<AgentId, Agent>,
    next_id: AgentId,
    /// Tiles no agent can reach
    pub unreachable: HashSet<IVec2>,
    /// Distance at which an agent counts as arrived
    pub arrive_distance: f32,
}

impl DirectPathCache {
    pub fn new() -> Self {
        Self {
            arrive_distance: 0.1,
            ..Default::default()
        }
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    fn target_reachable(&self, target: Vec2) -> bool {
        !self.unreachable.contains(&target.floor().as_ivec2())
    }
}

impl TileCache for DirectPathCache {
    fn add_agent(&mut self, position: Vec2, target: Vec2, max_speed: f32) -> AgentId {
        let id = self.next_id;
        self.next_id += 1;
        self.agents.insert(
            id,
            Agent {
                position,
                target,
                max_speed,
            },
        );
        log::debug!("path agent {id} added, target {target}");
        id
    }

    fn remove_agent(&mut self, agent: AgentId) {
        self.agents.remove(&agent);
    }

    fn update_target_position(&mut self, agent: AgentId, target: Vec2) {
        if let Some(a) = self.agents.get_mut(&agent) {
            a.target = target;
        }
    }

    fn update_agent_position(&mut self, agent: AgentId, position: Vec2) {
        if let Some(a) = self.agents.get_mut(&agent) {
            a.position = position;
        }
    }

    fn agent_state(&self, agent: AgentId) -> Option<AgentState> {
        let a = self.agents.get(&agent)?;
        Some(if !self.target_reachable(a.target) {
            AgentState::Failed
        } else if a.position.distance(a.target) <= self.arrive_distance {
            AgentState::Arrived
        } else {
            AgentState::Moving
        })
    }

    fn agent_velocity(&self, agent: AgentId) -> Vec2 {
        match self.agents.get(&agent) {
            Some(a) if self.target_reachable(a.target) => {
                (a.target - a.position).normalize_or_zero() * a.max_speed
            }
            _ => Vec2::ZERO,
        }
    }

    fn agent_end_point(&self, agent: AgentId) -> Option<Vec2> {
        self.agents.get(&agent).map(|a| a.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_lifecycle() {
        let mut cache = DirectPathCache::new();
        let id = cache.add_agent(Vec2::ZERO, Vec2::new(3.0, 0.0), 2.0);
        assert_eq!(cache.agent_state(id), Some(AgentState::Moving));
        assert_eq!(cache.agent_velocity(id), Vec2::new(2.0, 0.0));
        cache.update_agent_position(id, Vec2::new(2.95, 0.0));
        assert_eq!(cache.agent_state(id), Some(AgentState::Arrived));
        cache.remove_agent(id);
        assert_eq!(cache.agent_state(id), None);
    }

    #[test]
    fn test_unreachable_target_fails() {
        let mut cache = DirectPathCache::new();
        cache.unreachable.insert(IVec2::new(5, 5));
        let id = cache.add_agent(Vec2::ZERO, Vec2::new(5.5, 5.5), 1.0);
        assert_eq!(cache.agent_state(id), Some(AgentState::Failed));
        assert_eq!(cache.agent_velocity(id), Vec2::ZERO);
        assert_eq!(cache.agent_end_point(id), Some(Vec2::new(5.5, 5.5)));
    }
}
