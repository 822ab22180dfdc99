//! Authoritative world state, owned and mutated only by the tick task

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::collision::{CapsuleShape, CollisionWorld, StaticGeometry};
use crate::config::SimConfig;

use super::combat::CombatResolver;
use super::events::{GameEvent, RespawnEvent};
use super::physics::PhysicsIntegrator;
use super::player::{validate_name, ConnectionState, Player, PlayerId, MAX_HEALTH, MAX_PITCH};
use super::respawn::RespawnManager;
use super::snapshot::WorldSnapshot;
use super::spawn::{EmptySpawnPool, SpawnPoint, SpawnPool};
use super::{InputCommand, PlayerCommand, ShootCommand};

/// Why a queued command was not applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InputRejected {
    #[error("Sequence number is not newer than the last applied one")]
    Stale,
    #[error("No such player")]
    UnknownEntity,
    #[error("Player is dead")]
    Dead,
}

/// Why a join was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("Server is full ({max_players} players)")]
    ServerFull { max_players: usize },
    #[error("Invalid player name")]
    InvalidName,
    #[error("Server is shutting down")]
    Unavailable,
}

/// Corrupt world state. The process should restart rather than broadcast it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("Player {id} has health {health} outside 0..=100")]
    HealthOutOfRange { id: PlayerId, health: i32 },
    #[error("Player {id} has non-finite state")]
    NonFinite { id: PlayerId },
    #[error("Alive player {id} has no capsule")]
    MissingCollider { id: PlayerId },
    #[error("Capsule for {id} belongs to no alive player")]
    StaleCollider { id: PlayerId },
    #[error("Respawn timer for {id} references no player")]
    DanglingTimer { id: PlayerId },
    #[error("Dead player {id} has no respawn timer")]
    OrphanedDeath { id: PlayerId },
    #[error("Alive player {id} has a respawn timer")]
    UnexpectedTimer { id: PlayerId },
    #[error("Disconnected player {id} is still in the world")]
    Disconnected { id: PlayerId },
}

/// The canonical entity table plus everything the simulation needs to
/// advance it.
pub struct WorldState {
    config: Arc<SimConfig>,
    tick: u64,
    players: BTreeMap<PlayerId, Player>,
    collision: CollisionWorld,
    spawns: SpawnPool,
    respawns: RespawnManager,
    physics: PhysicsIntegrator,
    combat: CombatResolver,
    next_id: u32,
    events: Vec<GameEvent>,
}

impl WorldState {
    pub fn new(
        config: Arc<SimConfig>,
        geometry: Arc<dyn StaticGeometry>,
        spawn_points: Vec<SpawnPoint>,
        seed: u64,
    ) -> Result<Self, EmptySpawnPool> {
        Ok(Self {
            tick: 0,
            players: BTreeMap::new(),
            collision: CollisionWorld::new(geometry, CapsuleShape::PLAYER),
            spawns: SpawnPool::new(spawn_points, seed)?,
            respawns: RespawnManager::new(config.respawn_delay_ticks()),
            physics: PhysicsIntegrator::new(&config),
            combat: CombatResolver::new(&config),
            next_id: 1,
            events: Vec::new(),
            config,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    #[cfg(test)]
    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    #[cfg(test)]
    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    #[cfg(test)]
    pub fn collision(&self) -> &CollisionWorld {
        &self.collision
    }

    #[cfg(test)]
    pub fn respawns(&self) -> &RespawnManager {
        &self.respawns
    }

    /// Buffer movement and look input for the current tick.
    ///
    /// The newest input's keys and view angles win; jump and dash requests
    /// within one tick accumulate.
    pub fn apply_input(&mut self, cmd: &InputCommand) -> Result<(), InputRejected> {
        let player = self
            .players
            .get_mut(&cmd.player_id)
            .ok_or(InputRejected::UnknownEntity)?;
        if cmd.seq <= player.last_input_seq {
            return Err(InputRejected::Stale);
        }
        if !player.is_alive() {
            return Err(InputRejected::Dead);
        }

        player.last_input_seq = cmd.seq;
        player.transform.yaw = cmd.yaw;
        player.transform.pitch = cmd.pitch.clamp(-MAX_PITCH, MAX_PITCH);
        player.input.move_flags = cmd.move_flags;
        player.input.jump |= cmd.jump;
        player.input.dash |= cmd.dash;
        Ok(())
    }

    /// Buffer a shot, resolved in sequence order during the tick.
    pub fn apply_shoot(&mut self, cmd: &ShootCommand) -> Result<(), InputRejected> {
        let player = self
            .players
            .get_mut(&cmd.player_id)
            .ok_or(InputRejected::UnknownEntity)?;
        if cmd.seq <= player.last_shot_seq {
            return Err(InputRejected::Stale);
        }
        if !player.is_alive() {
            return Err(InputRejected::Dead);
        }

        player.last_shot_seq = cmd.seq;
        player.input.shots.push(cmd.clone());
        Ok(())
    }

    pub fn apply_command(&mut self, command: &PlayerCommand) -> Result<(), InputRejected> {
        match command {
            PlayerCommand::Input(cmd) => self.apply_input(cmd),
            PlayerCommand::Shoot(cmd) => self.apply_shoot(cmd),
        }
    }

    /// Register a new player at a spawn point with a fresh id.
    pub fn add_player(&mut self, name: &str) -> Result<Player, JoinError> {
        let name = validate_name(name).ok_or(JoinError::InvalidName)?;
        if self.players.len() >= self.config.max_players {
            return Err(JoinError::ServerFull {
                max_players: self.config.max_players,
            });
        }

        let id = PlayerId(self.next_id);
        self.next_id += 1;

        let spawn = self.free_spawn();
        let player = Player::new(id, name, &spawn);
        self.collision.set_capsule(id, player.position());
        self.players.insert(id, player.clone());
        self.events.push(GameEvent::Joined { id });

        info!(
            player_id = %id,
            name = %player.name,
            player_count = self.players.len(),
            "Player joined"
        );
        Ok(player)
    }

    /// Remove a player together with its capsule, buffered input and any
    /// pending respawn timer.
    pub fn remove_player(&mut self, id: PlayerId) -> Option<Player> {
        let mut player = self.players.remove(&id)?;
        player.connection = ConnectionState::Disconnected;
        self.collision.remove_capsule(id);
        self.respawns.cancel(id);
        self.events.push(GameEvent::Left { id });

        info!(
            player_id = %id,
            player_count = self.players.len(),
            "Player left"
        );
        Some(player)
    }

    /// Advance the simulation by one fixed step.
    pub fn run_tick(&mut self) {
        self.tick += 1;
        let tick = self.tick;
        let first_new_event = self.events.len();

        self.physics
            .step(tick, &mut self.players, &mut self.collision, &mut self.events);
        self.combat
            .resolve(tick, &mut self.players, &mut self.collision, &mut self.events);

        for event in &self.events[first_new_event..] {
            if let GameEvent::Death(death) = event {
                self.respawns.schedule(death.victim, tick);
            }
        }

        for id in self.respawns.due(tick) {
            self.respawn(id);
        }

        for player in self.players.values_mut() {
            player.input.end_tick();
        }
    }

    fn respawn(&mut self, id: PlayerId) {
        if !self.players.get(&id).is_some_and(|p| !p.is_alive()) {
            return;
        }

        let spawn = self.free_spawn();
        let Some(player) = self.players.get_mut(&id) else {
            return;
        };
        player.respawn_at(&spawn, self.tick);
        self.collision.set_capsule(id, spawn.position);
        self.events.push(GameEvent::Respawn(RespawnEvent {
            id,
            position: spawn.position,
            health: player.health,
            forced: false,
        }));
        debug!(player_id = %id, "Player respawned");
    }

    /// Spawn point no capsule stands on, if the pool has one.
    fn free_spawn(&mut self) -> SpawnPoint {
        self.spawns
            .next_free(|spawn| !self.collision.is_occupied(spawn.position))
    }

    /// Immutable copy of every entity. Only taken between ticks.
    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot::capture(self.tick, self.players.values())
    }

    /// Events produced since the last call.
    pub fn take_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.events)
    }

    /// Cross-check players, capsules and respawn timers.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        for player in self.players.values() {
            let id = player.id;
            if !(0..=MAX_HEALTH).contains(&player.health) {
                return Err(InvariantViolation::HealthOutOfRange {
                    id,
                    health: player.health,
                });
            }
            if !player.is_finite() {
                return Err(InvariantViolation::NonFinite { id });
            }
            if player.connection == ConnectionState::Disconnected {
                return Err(InvariantViolation::Disconnected { id });
            }

            let has_capsule = self.collision.has_capsule(id);
            let has_timer = self.respawns.is_pending(id);
            if player.is_alive() {
                if !has_capsule {
                    return Err(InvariantViolation::MissingCollider { id });
                }
                if has_timer {
                    return Err(InvariantViolation::UnexpectedTimer { id });
                }
            } else {
                if has_capsule {
                    return Err(InvariantViolation::StaleCollider { id });
                }
                if !has_timer {
                    return Err(InvariantViolation::OrphanedDeath { id });
                }
            }
        }

        if let Some(id) = self
            .collision
            .capsule_ids()
            .find(|id| !self.players.contains_key(id))
        {
            return Err(InvariantViolation::StaleCollider { id });
        }
        if let Some(id) = self
            .respawns
            .pending_ids()
            .find(|id| !self.players.contains_key(id))
        {
            return Err(InvariantViolation::DanglingTimer { id });
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn player_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.get_mut(&id)
    }

    #[cfg(test)]
    pub(crate) fn collision_mut(&mut self) -> &mut CollisionWorld {
        &mut self.collision
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::collision::arena::{default_arena, default_spawn_points};
    use crate::game::events::{DeathEvent, DeathReason};
    use crate::game::player::MoveFlags;
    use glam::Vec3;

    pub(crate) fn arena_world(config: SimConfig) -> WorldState {
        let geometry = Arc::new(default_arena().unwrap());
        WorldState::new(Arc::new(config), geometry, default_spawn_points(), 7).unwrap()
    }

    fn input(id: PlayerId, seq: u32) -> InputCommand {
        InputCommand {
            player_id: id,
            seq,
            move_flags: MoveFlags::FORWARD,
            yaw: 0.0,
            pitch: 0.0,
            jump: false,
            dash: false,
        }
    }

    fn shoot(id: PlayerId, seq: u32) -> ShootCommand {
        ShootCommand {
            player_id: id,
            seq,
            yaw: 0.0,
            pitch: 0.0,
        }
    }

    /// Put `id` somewhere it will fall out of the map.
    fn drop_into_void(world: &mut WorldState, id: PlayerId) {
        let position = Vec3::new(100.0, -49.99, 100.0);
        let player = world.player_mut(id).unwrap();
        player.transform.position = position;
        player.velocity = Vec3::new(0.0, -10.0, 0.0);
        world.collision_mut().set_capsule(id, position);
    }

    fn run_until_dead(world: &mut WorldState, id: PlayerId) {
        drop_into_void(world, id);
        world.run_tick();
        assert!(!world.player(id).unwrap().is_alive());
    }

    #[test]
    fn join_places_player_at_a_spawn_point() {
        let mut world = arena_world(SimConfig::default());
        let player = world.add_player("ann").unwrap();

        assert_eq!(player.health, MAX_HEALTH);
        assert!(default_spawn_points()
            .iter()
            .any(|s| s.position == player.position()));

        let snapshot = world.snapshot();
        assert_eq!(snapshot.entities.len(), 1);
        assert_eq!(snapshot.entities[0].position, player.position());
        assert!(world.collision().has_capsule(player.id));
        assert_eq!(world.take_events(), vec![GameEvent::Joined { id: player.id }]);
        world.check_invariants().unwrap();
    }

    #[test]
    fn join_beyond_capacity_is_refused() {
        let mut world = arena_world(SimConfig {
            max_players: 2,
            ..SimConfig::default()
        });
        world.add_player("a").unwrap();
        world.add_player("b").unwrap();
        assert_eq!(
            world.add_player("c").unwrap_err(),
            JoinError::ServerFull { max_players: 2 }
        );
        assert_eq!(world.add_player("  ").unwrap_err(), JoinError::InvalidName);
    }

    #[test]
    fn ids_are_never_reused() {
        let mut world = arena_world(SimConfig::default());
        let first = world.add_player("ann").unwrap().id;
        world.remove_player(first);
        let second = world.add_player("ann").unwrap().id;
        assert_ne!(first, second);
    }

    #[test]
    fn duplicate_input_is_idempotent() {
        let mut world = arena_world(SimConfig::default());
        let id = world.add_player("ann").unwrap().id;

        assert_eq!(world.apply_input(&input(id, 1)), Ok(()));
        assert_eq!(world.apply_input(&input(id, 1)), Err(InputRejected::Stale));
        assert_eq!(world.apply_input(&input(id, 0)), Err(InputRejected::Stale));
        assert_eq!(
            world.apply_input(&input(PlayerId(99), 5)),
            Err(InputRejected::UnknownEntity)
        );
        assert_eq!(world.player(id).unwrap().last_input_seq, 1);
    }

    #[test]
    fn jump_and_dash_accumulate_within_a_tick() {
        let mut world = arena_world(SimConfig::default());
        let id = world.add_player("ann").unwrap().id;

        let mut first = input(id, 1);
        first.jump = true;
        let mut second = input(id, 2);
        second.move_flags = MoveFlags::BACK;
        second.dash = true;
        world.apply_input(&first).unwrap();
        world.apply_input(&second).unwrap();

        let buffered = &world.player(id).unwrap().input;
        assert!(buffered.jump && buffered.dash);
        assert_eq!(buffered.move_flags, MoveFlags::BACK);

        world.run_tick();
        let buffered = &world.player(id).unwrap().input;
        assert!(!buffered.jump && !buffered.dash);
        assert_eq!(buffered.move_flags, MoveFlags::BACK);
    }

    #[test]
    fn shots_have_their_own_sequence() {
        let mut world = arena_world(SimConfig::default());
        let id = world.add_player("ann").unwrap().id;

        world.apply_input(&input(id, 10)).unwrap();
        assert_eq!(world.apply_shoot(&shoot(id, 1)), Ok(()));
        assert_eq!(world.apply_shoot(&shoot(id, 1)), Err(InputRejected::Stale));
    }

    #[test]
    fn void_fall_dies_and_respawns_after_the_delay() {
        let config = SimConfig::default();
        let delay = config.respawn_delay_ticks();
        let mut world = arena_world(config);
        let id = world.add_player("ann").unwrap().id;
        world.take_events();

        run_until_dead(&mut world, id);
        let death_tick = world.tick();
        let events = world.take_events();
        assert!(events.iter().any(|e| matches!(
            e,
            GameEvent::Death(DeathEvent { victim, killer: None, reason: DeathReason::Void, .. }) if *victim == id
        )));
        assert_eq!(world.respawns().due_at(id), Some(death_tick + delay));
        world.check_invariants().unwrap();

        // dead players ignore input and stay put
        let frozen = world.player(id).unwrap().position();
        assert_eq!(world.apply_input(&input(id, 1)), Err(InputRejected::Dead));
        assert_eq!(world.apply_shoot(&shoot(id, 1)), Err(InputRejected::Dead));
        while world.tick() < death_tick + delay - 1 {
            world.run_tick();
            assert_eq!(world.player(id).unwrap().position(), frozen);
            assert!(world.take_events().is_empty());
        }

        world.run_tick();
        let player = world.player(id).unwrap();
        assert!(player.is_alive());
        assert_eq!(player.health, MAX_HEALTH);
        assert_eq!(player.deaths, 1);
        assert!(world.collision().has_capsule(id));
        assert!(matches!(
            world.take_events().as_slice(),
            [GameEvent::Respawn(RespawnEvent { forced: false, health: 100, .. })]
        ));
        world.check_invariants().unwrap();
    }

    #[test]
    fn leaving_while_dead_cancels_the_timer() {
        let mut world = arena_world(SimConfig::default());
        let id = world.add_player("ann").unwrap().id;
        run_until_dead(&mut world, id);
        assert!(world.respawns().is_pending(id));

        let removed = world.remove_player(id).unwrap();
        assert_eq!(removed.connection, ConnectionState::Disconnected);
        assert!(!world.respawns().is_pending(id));
        assert!(!world.collision().has_capsule(id));
        assert!(world.player(id).is_none());
        world.check_invariants().unwrap();
    }

    #[test]
    fn rejoin_starts_from_scratch() {
        let mut world = arena_world(SimConfig::default());
        let first = world.add_player("ann").unwrap().id;
        run_until_dead(&mut world, first);
        world.remove_player(first);

        let again = world.add_player("ann").unwrap();
        assert_ne!(again.id, first);
        assert_eq!(again.health, 100);
        assert_eq!((again.kills, again.deaths), (0, 0));
        assert!(again.is_alive());
    }

    #[test]
    fn invariant_check_catches_corruption() {
        let mut world = arena_world(SimConfig::default());
        let id = world.add_player("ann").unwrap().id;

        world.player_mut(id).unwrap().health = 120;
        assert_eq!(
            world.check_invariants(),
            Err(InvariantViolation::HealthOutOfRange { id, health: 120 })
        );

        world.player_mut(id).unwrap().health = 100;
        world.collision_mut().remove_capsule(id);
        assert_eq!(
            world.check_invariants(),
            Err(InvariantViolation::MissingCollider { id })
        );

        world.collision_mut().set_capsule(PlayerId(42), Vec3::ZERO);
        world.collision_mut().set_capsule(id, Vec3::ZERO);
        assert_eq!(
            world.check_invariants(),
            Err(InvariantViolation::StaleCollider { id: PlayerId(42) })
        );
    }

    /// Shooter and target hanging past the floor edge with nothing in the
    /// line of fire. The target starts at `target_y` falling at 10 m/s and
    /// the shot at it is buffered for the next tick.
    fn shot_at_a_falling_target(world: &mut WorldState, target_y: f32) -> (PlayerId, PlayerId) {
        let shooter = world.add_player("shooter").unwrap().id;
        let target = world.add_player("target").unwrap().id;
        let shooter_at = Vec3::new(40.0, -49.0, 0.0);
        let target_at = Vec3::new(40.0, target_y, -10.0);

        for (id, position, fall) in [(shooter, shooter_at, 0.0), (target, target_at, -10.0)] {
            let player = world.player_mut(id).unwrap();
            player.transform.position = position;
            player.velocity = Vec3::new(0.0, fall, 0.0);
            player.grounded = false;
            world.collision_mut().set_capsule(id, position);
        }

        let shape = world.collision().shape();
        let aim = shape.center(target_at) - shape.eye(shooter_at);
        world
            .apply_shoot(&ShootCommand {
                player_id: shooter,
                seq: 1,
                yaw: (-aim.x).atan2(-aim.z),
                pitch: (aim.y / aim.length()).asin(),
            })
            .unwrap();
        world.take_events();
        (shooter, target)
    }

    #[test]
    fn shot_at_a_falling_target_lands_while_it_is_above_the_void() {
        let mut world = arena_world(SimConfig::default());
        let (shooter, target) = shot_at_a_falling_target(&mut world, -45.0);

        world.run_tick();
        let events = world.take_events();
        assert!(events.iter().any(|e| matches!(
            e,
            GameEvent::Hit(hit) if hit.shooter == shooter && hit.target == target
        )));
        assert_eq!(world.player(target).unwrap().health, MAX_HEALTH - 25);
    }

    #[test]
    fn void_death_takes_priority_over_a_shot_in_the_same_tick() {
        let mut world = arena_world(SimConfig::default());
        let (shooter, target) = shot_at_a_falling_target(&mut world, -49.9);

        world.run_tick();
        let events = world.take_events();
        assert!(!events.iter().any(|e| matches!(e, GameEvent::Hit(_))), "{events:?}");
        assert!(events.iter().any(|e| matches!(
            e,
            GameEvent::Shot(shot) if shot.shooter == shooter && shot.hit.is_none()
        )));
        let deaths: Vec<&DeathEvent> = events
            .iter()
            .filter_map(|e| match e {
                GameEvent::Death(death) => Some(death),
                _ => None,
            })
            .collect();
        assert_eq!(deaths.len(), 1);
        assert_eq!(deaths[0].victim, target);
        assert_eq!(deaths[0].killer, None);
        assert_eq!(deaths[0].reason, DeathReason::Void);

        let victim = world.player(target).unwrap();
        assert_eq!(victim.health, 0);
        assert_eq!(victim.deaths, 1);
        assert_eq!(world.player(shooter).unwrap().kills, 0);
        assert!(world.player(shooter).unwrap().is_alive());
        world.check_invariants().unwrap();
    }

    #[test]
    fn a_full_server_spawns_everyone_apart() {
        let mut world = arena_world(SimConfig {
            max_players: 8,
            ..SimConfig::default()
        });
        let positions: Vec<Vec3> = (0..8)
            .map(|i| world.add_player(&format!("p{i}")).unwrap().position())
            .collect();

        for (i, a) in positions.iter().enumerate() {
            for b in &positions[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn respawn_picks_the_spawn_point_nobody_stands_on() {
        let config = SimConfig {
            max_players: 8,
            ..SimConfig::default()
        };
        let delay = config.respawn_delay_ticks();
        let mut world = arena_world(config);
        let ids: Vec<PlayerId> = (0..8)
            .map(|i| world.add_player(&format!("p{i}")).unwrap().id)
            .collect();
        let victim = ids[0];
        let home = world.player(victim).unwrap().position();

        run_until_dead(&mut world, victim);
        for _ in 0..delay {
            world.run_tick();
        }

        let player = world.player(victim).unwrap();
        assert!(player.is_alive());
        assert_eq!(player.position(), home);
        world.check_invariants().unwrap();
    }

    #[test]
    fn health_stays_in_range_through_a_firefight() {
        let mut world = arena_world(SimConfig {
            shot_cooldown: std::time::Duration::ZERO,
            ..SimConfig::default()
        });
        let a = world.add_player("a").unwrap().id;
        let b = world.add_player("b").unwrap().id;

        let mut seq = 0;
        for _ in 0..300 {
            for (shooter, target) in [(a, b), (b, a)] {
                let (Some(from), Some(to)) = (world.player(shooter), world.player(target)) else {
                    continue;
                };
                let eye = world.collision().shape().eye(from.position());
                let aim = world.collision().shape().center(to.position()) - eye;
                seq += 1;
                let _ = world.apply_shoot(&ShootCommand {
                    player_id: shooter,
                    seq,
                    yaw: (-aim.x).atan2(-aim.z),
                    pitch: (aim.y / aim.length()).asin(),
                });
            }
            world.run_tick();
            world.check_invariants().unwrap();
            for player in world.players() {
                assert!((0..=100).contains(&player.health));
            }
        }
    }
}
