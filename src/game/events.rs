//! Per-tick game events

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::player::PlayerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeathReason {
    Shot,
    Void,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShotEvent {
    pub shooter: PlayerId,
    pub origin: Vec3,
    pub direction: Vec3,
    pub hit: Option<PlayerId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HitEvent {
    pub shooter: PlayerId,
    pub target: PlayerId,
    pub damage: i32,
    /// Target health after the hit.
    pub health: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeathEvent {
    pub victim: PlayerId,
    pub killer: Option<PlayerId>,
    pub position: Vec3,
    pub reason: DeathReason,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RespawnEvent {
    pub id: PlayerId,
    pub position: Vec3,
    pub health: i32,
    /// Physics recovery rather than a timer expiring.
    pub forced: bool,
}

/// Something that happened during a tick. Produced by the simulation,
/// consumed by respawn scheduling and the broadcast loop.
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    Joined { id: PlayerId },
    Left { id: PlayerId },
    Shot(ShotEvent),
    Hit(HitEvent),
    Death(DeathEvent),
    Respawn(RespawnEvent),
}

impl GameEvent {
    /// The player this event is about.
    pub fn subject(&self) -> PlayerId {
        match self {
            GameEvent::Joined { id } | GameEvent::Left { id } => *id,
            GameEvent::Shot(e) => e.shooter,
            GameEvent::Hit(e) => e.target,
            GameEvent::Death(e) => e.victim,
            GameEvent::Respawn(e) => e.id,
        }
    }
}
