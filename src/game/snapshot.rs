//! World snapshots and broadcast diffing

use std::collections::{BTreeMap, BTreeSet};

use crate::ws::protocol::{
    DeathNotice, EntityState, EntityUpdate, HitNotice, RespawnNotice, ServerMsg, StateBroadcast,
};

use super::events::GameEvent;
use super::player::{Player, PlayerId};

/// Smallest position or angle change worth sending.
pub const CHANGE_EPSILON: f32 = 0.001;

/// Immutable copy of every entity at the end of a tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorldSnapshot {
    pub tick: u64,
    /// Sorted by id
    pub entities: Vec<EntityState>,
}

impl WorldSnapshot {
    pub fn capture<'a>(tick: u64, players: impl Iterator<Item = &'a Player>) -> Self {
        let mut entities: Vec<EntityState> = players.map(entity_state).collect();
        entities.sort_by_key(|e| e.id);
        Self { tick, entities }
    }

    pub fn get(&self, id: PlayerId) -> Option<&EntityState> {
        self.entities
            .binary_search_by_key(&id, |e| e.id)
            .ok()
            .map(|i| &self.entities[i])
    }
}

fn entity_state(player: &Player) -> EntityState {
    EntityState {
        id: player.id,
        name: player.name.clone(),
        position: player.position(),
        velocity: player.velocity,
        yaw: player.transform.yaw,
        pitch: player.transform.pitch,
        health: player.health,
        kills: player.kills,
        deaths: player.deaths,
        alive: player.is_alive(),
    }
}

/// Whether any broadcast-relevant field moved past the epsilon.
fn has_changed(previous: &EntityState, current: &EntityState) -> bool {
    previous.position.distance(current.position) > CHANGE_EPSILON
        || (previous.yaw - current.yaw).abs() > CHANGE_EPSILON
        || (previous.pitch - current.pitch).abs() > CHANGE_EPSILON
        || previous.health != current.health
}

/// Builds the messages for one broadcast from the latest snapshot and the
/// events since the previous broadcast.
///
/// Remembers what each client was last told about every entity, so only
/// changes go out.
#[derive(Debug, Default)]
pub struct DiffBuilder {
    last_sent: BTreeMap<PlayerId, EntityState>,
}

impl DiffBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(&mut self, snapshot: &WorldSnapshot, events: Vec<GameEvent>) -> Vec<ServerMsg> {
        let mut joined_ids = BTreeSet::new();
        let mut left_ids = BTreeSet::new();
        for event in &events {
            match event {
                GameEvent::Joined { id } => {
                    joined_ids.insert(*id);
                }
                GameEvent::Left { id } => {
                    left_ids.insert(*id);
                }
                _ => {}
            }
        }

        // joined and left inside this window: nobody ever hears of it
        let unseen: BTreeSet<PlayerId> = joined_ids
            .iter()
            .filter(|id| left_ids.contains(id) && !self.last_sent.contains_key(id))
            .copied()
            .collect();
        let gone: BTreeSet<PlayerId> = left_ids.union(&unseen).copied().collect();

        let mut messages = Vec::new();
        let mut broadcast = StateBroadcast {
            tick: snapshot.tick,
            ..StateBroadcast::default()
        };

        for event in events {
            if gone.contains(&event.subject()) {
                continue;
            }
            match event {
                GameEvent::Joined { .. } | GameEvent::Left { .. } => {}
                GameEvent::Shot(shot) => messages.push(ServerMsg::Shot {
                    shooter_id: shot.shooter,
                    origin: shot.origin,
                    direction: shot.direction,
                }),
                GameEvent::Hit(hit) => broadcast.hits.push(HitNotice {
                    shooter_id: hit.shooter,
                    target_id: hit.target,
                    damage: hit.damage,
                    health: hit.health,
                }),
                GameEvent::Death(death) => broadcast.deaths.push(DeathNotice {
                    victim_id: death.victim,
                    killer_id: death.killer,
                    position: death.position,
                    reason: death.reason,
                }),
                GameEvent::Respawn(respawn) => broadcast.respawns.push(RespawnNotice {
                    id: respawn.id,
                    position: respawn.position,
                    health: respawn.health,
                }),
            }
        }

        for id in left_ids.difference(&unseen) {
            self.last_sent.remove(id);
            broadcast.left.push(*id);
            messages.push(ServerMsg::Disconnect { id: *id });
        }

        for entity in &snapshot.entities {
            if gone.contains(&entity.id) {
                continue;
            }
            if joined_ids.contains(&entity.id) && !self.last_sent.contains_key(&entity.id) {
                broadcast.joined.push(entity.clone());
                self.last_sent.insert(entity.id, entity.clone());
                continue;
            }

            let changed = self
                .last_sent
                .get(&entity.id)
                .map_or(true, |previous| has_changed(previous, entity));
            if changed {
                broadcast.changed.push(EntityUpdate {
                    id: entity.id,
                    position: entity.position,
                    yaw: entity.yaw,
                    pitch: entity.pitch,
                    health: entity.health,
                });
                self.last_sent.insert(entity.id, entity.clone());
            }
        }

        // anything the snapshot no longer has is gone for good
        self.last_sent
            .retain(|id, _| snapshot.get(*id).is_some());

        if !broadcast.is_empty() {
            messages.push(ServerMsg::StateBroadcast(broadcast));
        }
        messages
    }
}
