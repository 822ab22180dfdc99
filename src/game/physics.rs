//! Player movement: gravity, walking, dash, jump and capsule slide-move

use std::collections::BTreeMap;

use glam::Vec3;
use tracing::{debug, warn};

use crate::collision::CollisionWorld;
use crate::config::SimConfig;

use super::events::{DeathEvent, DeathReason, GameEvent, RespawnEvent};
use super::player::{DashState, MoveFlags, Player, PlayerId};

/// Clip passes per move before the rest of the motion is dropped.
const MAX_CLIP_ITERATIONS: usize = 3;

/// Gap left between the capsule and whatever it stopped against.
const SKIN: f32 = 0.001;

/// Depth of the downward probe that decides whether a player stands on something.
const GROUND_PROBE: f32 = 0.05;

/// Steepest surface still counted as floor, as the minimum normal Y.
const MIN_WALKABLE_NORMAL_Y: f32 = 0.7;

/// What happened to a player during one physics step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Moved,
    FellIntoVoid,
    Anomaly,
}

/// Movement tuning copied out of the simulation config.
#[derive(Debug, Clone)]
pub struct PhysicsIntegrator {
    dt: f32,
    gravity: f32,
    move_speed: f32,
    sprint_speed: f32,
    jump_impulse: f32,
    dash_speed: f32,
    dash_duration_ticks: u64,
    dash_cooldown_ticks: u64,
    void_y: f32,
}

impl PhysicsIntegrator {
    pub fn new(config: &SimConfig) -> Self {
        Self {
            dt: config.tick_delta(),
            gravity: config.gravity,
            move_speed: config.move_speed,
            sprint_speed: config.sprint_speed,
            jump_impulse: config.jump_impulse,
            dash_speed: config.dash_speed,
            dash_duration_ticks: config.dash_duration_ticks(),
            dash_cooldown_ticks: config.dash_cooldown_ticks(),
            void_y: config.void_y,
        }
    }

    /// Step every alive player in ascending id order.
    pub fn step(
        &self,
        tick: u64,
        players: &mut BTreeMap<PlayerId, Player>,
        collision: &mut CollisionWorld,
        events: &mut Vec<GameEvent>,
    ) {
        for player in players.values_mut().filter(|p| p.is_alive()) {
            match self.step_player(tick, player, collision) {
                StepOutcome::Moved => {}
                StepOutcome::FellIntoVoid => {
                    let position = player.position();
                    player.kill();
                    collision.remove_capsule(player.id);
                    debug!(player_id = %player.id, y = position.y, "Player fell into the void");
                    events.push(GameEvent::Death(DeathEvent {
                        victim: player.id,
                        killer: None,
                        position,
                        reason: DeathReason::Void,
                    }));
                }
                StepOutcome::Anomaly => {
                    warn!(
                        player_id = %player.id,
                        position = ?player.position(),
                        velocity = ?player.velocity,
                        "Non-finite player state, snapping to last good position"
                    );
                    self.recover(player, collision);
                    events.push(GameEvent::Respawn(RespawnEvent {
                        id: player.id,
                        position: player.position(),
                        health: player.health,
                        forced: true,
                    }));
                }
            }
        }
    }

    /// Advance one player by a single fixed step.
    pub fn step_player(&self, tick: u64, player: &mut Player, collision: &mut CollisionWorld) -> StepOutcome {
        let (move_flags, jump, dash) = (player.input.move_flags, player.input.jump, player.input.dash);
        let mut velocity = player.velocity;

        if !player.grounded {
            velocity.y -= self.gravity * self.dt;
        }

        let wish = self.wish_velocity(player, move_flags);
        velocity.x = wish.x;
        velocity.z = wish.z;

        if dash && tick >= player.dash.ready_at {
            let direction = wish
                .try_normalize()
                .unwrap_or_else(|| player.transform.forward());
            player.dash = DashState {
                ready_at: tick.saturating_add(self.dash_cooldown_ticks),
                active_until: tick.saturating_add(self.dash_duration_ticks),
                direction,
            };
        }
        if player.dash.is_active(tick) {
            velocity.x = player.dash.direction.x * self.dash_speed;
            velocity.z = player.dash.direction.z * self.dash_speed;
        }

        if jump && player.grounded {
            velocity.y = self.jump_impulse;
            player.grounded = false;
        }

        if !velocity.is_finite() || !player.position().is_finite() {
            return StepOutcome::Anomaly;
        }

        let position = self.slide_move(collision, player.id, player.position(), &mut velocity);
        if !position.is_finite() || !velocity.is_finite() {
            return StepOutcome::Anomaly;
        }

        player.grounded = match collision.probe_ground(player.id, position, GROUND_PROBE) {
            Some(normal) => normal.y >= MIN_WALKABLE_NORMAL_Y && velocity.y <= 0.0,
            None => false,
        };
        if player.grounded && velocity.y < 0.0 {
            velocity.y = 0.0;
        }

        player.transform.position = position;
        player.velocity = velocity;
        collision.set_capsule(player.id, position);

        if position.y < self.void_y {
            return StepOutcome::FellIntoVoid;
        }
        player.last_good_position = position;
        StepOutcome::Moved
    }

    /// Horizontal velocity requested by the held movement keys.
    fn wish_velocity(&self, player: &Player, flags: MoveFlags) -> Vec3 {
        let (right, forward) = flags.wish_dir();
        let speed = if flags.contains(MoveFlags::SPRINT) {
            self.sprint_speed
        } else {
            self.move_speed
        };
        (player.transform.right() * right + player.transform.forward() * forward) * speed
    }

    /// Move along `velocity * dt`, sliding along whatever is hit. Velocity
    /// loses its component into each contact.
    fn slide_move(&self, collision: &CollisionWorld, id: PlayerId, start: Vec3, velocity: &mut Vec3) -> Vec3 {
        let mut position = start;
        let mut remaining = *velocity * self.dt;

        for _ in 0..MAX_CLIP_ITERATIONS {
            let length = remaining.length();
            if length < 1e-6 {
                break;
            }

            let hit = collision.sweep(id, position, position + remaining);
            if !hit.contact {
                position += remaining;
                break;
            }

            let direction = remaining / length;
            let normal = hit.normal;
            let travel = hit.distance.clamp(0.0, length);
            position += direction * travel + normal * SKIN;
            remaining = direction * (length - travel);

            let into = remaining.dot(normal);
            if into < 0.0 {
                remaining -= normal * into;
            }
            let v_into = velocity.dot(normal);
            if v_into < 0.0 {
                *velocity -= normal * v_into;
            }
        }

        position
    }

    /// Put a player whose state went non-finite back where it last was sane.
    fn recover(&self, player: &mut Player, collision: &mut CollisionWorld) {
        player.transform.position = player.last_good_position;
        if !player.transform.yaw.is_finite() {
            player.transform.yaw = 0.0;
        }
        if !player.transform.pitch.is_finite() {
            player.transform.pitch = 0.0;
        }
        player.velocity = Vec3::ZERO;
        player.grounded = false;
        player.dash = DashState::default();
        player.input = Default::default();
        collision.set_capsule(player.id, player.last_good_position);
    }
}
