//! Hit-scan combat: shot resolution, damage and kills

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::collision::CollisionWorld;
use crate::config::SimConfig;

use super::events::{DeathEvent, DeathReason, GameEvent, HitEvent, ShotEvent};
use super::player::{aim_direction, Player, PlayerId, MAX_PITCH};
use super::ShootCommand;

/// Apply damage to health, returns (new_health, is_dead)
pub fn apply_damage(current_health: i32, damage: i32) -> (i32, bool) {
    let new_health = (current_health - damage).max(0);
    (new_health, new_health == 0)
}

/// Weapon tuning copied out of the simulation config.
#[derive(Debug, Clone)]
pub struct CombatResolver {
    damage: i32,
    range: f32,
    cooldown_ticks: u64,
}

impl CombatResolver {
    pub fn new(config: &SimConfig) -> Self {
        Self {
            damage: config.damage_per_hit,
            range: config.shot_range,
            cooldown_ticks: config.shot_cooldown_ticks(),
        }
    }

    /// Fire every buffered shot, shooters in ascending id order and each
    /// shooter's shots in sequence order.
    ///
    /// Runs after physics, so anyone who fell out of the map this tick is
    /// already dead and has no capsule to hit.
    pub fn resolve(
        &self,
        tick: u64,
        players: &mut BTreeMap<PlayerId, Player>,
        collision: &mut CollisionWorld,
        events: &mut Vec<GameEvent>,
    ) {
        let shooters: Vec<PlayerId> = players
            .values()
            .filter(|p| !p.input.shots.is_empty())
            .map(|p| p.id)
            .collect();

        for shooter_id in shooters {
            let Some(shooter) = players.get_mut(&shooter_id) else {
                continue;
            };
            let mut shots = std::mem::take(&mut shooter.input.shots);
            shots.sort_by_key(|shot| shot.seq);

            for shot in shots {
                self.fire(tick, &shot, players, collision, events);
            }
        }
    }

    fn fire(
        &self,
        tick: u64,
        shot: &ShootCommand,
        players: &mut BTreeMap<PlayerId, Player>,
        collision: &mut CollisionWorld,
        events: &mut Vec<GameEvent>,
    ) {
        let Some(shooter) = players.get_mut(&shot.player_id) else {
            return;
        };
        // a lower id may have killed this shooter earlier in the tick
        if !shooter.is_alive() || tick < shooter.next_shot_tick {
            return;
        }
        shooter.next_shot_tick = tick.saturating_add(self.cooldown_ticks);

        let origin = collision.shape().eye(shooter.position());
        let direction = aim_direction(shot.yaw, shot.pitch.clamp(-MAX_PITCH, MAX_PITCH));
        let hit = collision.raycast_players(origin, direction, self.range, shooter.id);

        events.push(GameEvent::Shot(ShotEvent {
            shooter: shot.player_id,
            origin,
            direction,
            hit: hit.map(|h| h.id),
        }));

        let Some(hit) = hit else {
            return;
        };
        let Some(target) = players.get_mut(&hit.id) else {
            return;
        };
        if !target.is_alive() {
            return;
        }

        let (health, killed) = apply_damage(target.health, self.damage);
        target.health = health;
        events.push(GameEvent::Hit(HitEvent {
            shooter: shot.player_id,
            target: target.id,
            damage: self.damage,
            health,
        }));
        debug!(shooter = %shot.player_id, target = %target.id, health, "Hit registered");

        if !killed {
            return;
        }

        let position = target.position();
        target.kill();
        collision.remove_capsule(target.id);
        events.push(GameEvent::Death(DeathEvent {
            victim: target.id,
            killer: Some(shot.player_id),
            position,
            reason: DeathReason::Shot,
        }));
        info!(killer = %shot.player_id, victim = %hit.id, "Player killed");

        if let Some(shooter) = players.get_mut(&shot.player_id) {
            shooter.kills += 1;
        }
    }
}
