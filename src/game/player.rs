//! Server-side player record

use std::fmt;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::spawn::SpawnPoint;
use super::TickInput;

/// Health of a freshly joined or respawned player.
pub const MAX_HEALTH: i32 = 100;

/// Look pitch is kept just short of straight up/down.
pub const MAX_PITCH: f32 = 89.0 * std::f32::consts::PI / 180.0;

/// Longest display name, in characters, after trimming.
pub const MAX_NAME_LEN: usize = 16;

/// Trimmed display name if it is 1-16 characters of ASCII letters, digits,
/// `_`, `-` or space.
pub fn validate_name(raw: &str) -> Option<String> {
    let name = raw.trim();
    let valid_char = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ' ');

    if name.is_empty() || name.chars().count() > MAX_NAME_LEN || !name.chars().all(valid_char) {
        return None;
    }
    Some(name.to_string())
}

/// Connection-scoped player id. Assigned from a counter and never reused
/// while the process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombatState {
    Alive,
    Dead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Active,
    Disconnected,
}

/// Held movement keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MoveFlags(pub u8);

impl MoveFlags {
    #[cfg(test)]
    pub const NONE: Self = Self(0);
    pub const FORWARD: Self = Self(1 << 0);
    pub const BACK: Self = Self(1 << 1);
    pub const LEFT: Self = Self(1 << 2);
    pub const RIGHT: Self = Self(1 << 3);
    pub const SPRINT: Self = Self(1 << 4);

    /// Every bit a client may set.
    pub const ALL: Self = Self(
        Self::FORWARD.0 | Self::BACK.0 | Self::LEFT.0 | Self::RIGHT.0 | Self::SPRINT.0,
    );

    #[inline]
    pub fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 & !Self::ALL.0 == 0
    }

    /// Unit-length wish direction in local space, `x` right and `z` forward.
    /// Opposing keys cancel.
    pub fn wish_dir(self) -> (f32, f32) {
        let mut right = 0.0;
        let mut forward = 0.0;
        if self.contains(Self::FORWARD) {
            forward += 1.0;
        }
        if self.contains(Self::BACK) {
            forward -= 1.0;
        }
        if self.contains(Self::RIGHT) {
            right += 1.0;
        }
        if self.contains(Self::LEFT) {
            right -= 1.0;
        }
        let len = f32::hypot(right, forward);
        if len > 0.0 {
            (right / len, forward / len)
        } else {
            (0.0, 0.0)
        }
    }
}

impl std::ops::BitOr for MoveFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Feet position plus view angles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
}

impl Transform {
    /// Horizontal forward vector. Yaw 0 looks down -Z.
    pub fn forward(&self) -> Vec3 {
        Vec3::new(-self.yaw.sin(), 0.0, -self.yaw.cos())
    }

    pub fn right(&self) -> Vec3 {
        Vec3::new(self.yaw.cos(), 0.0, -self.yaw.sin())
    }
}

/// Aim direction for a yaw/pitch pair.
pub fn aim_direction(yaw: f32, pitch: f32) -> Vec3 {
    Vec3::new(
        -yaw.sin() * pitch.cos(),
        pitch.sin(),
        -yaw.cos() * pitch.cos(),
    )
}

/// Dash bookkeeping, in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DashState {
    /// First tick a new dash may start.
    pub ready_at: u64,
    /// The dash overrides horizontal movement while `tick < active_until`.
    pub active_until: u64,
    pub direction: Vec3,
}

impl DashState {
    pub fn is_active(&self, tick: u64) -> bool {
        tick < self.active_until
    }

    /// Ticks left before the dash can be used again.
    #[cfg(test)]
    pub fn cooldown_remaining(&self, tick: u64) -> u64 {
        self.ready_at.saturating_sub(tick)
    }
}

/// Authoritative player state, owned by the world and only touched on the
/// tick task.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub transform: Transform,
    pub velocity: Vec3,
    pub health: i32,
    pub kills: u32,
    pub deaths: u32,
    pub combat: CombatState,
    pub connection: ConnectionState,
    pub last_input_seq: u32,
    pub last_shot_seq: u32,
    pub grounded: bool,
    pub dash: DashState,
    /// First tick the weapon may fire again.
    pub next_shot_tick: u64,
    /// Most recent position that passed the finite-state check.
    pub last_good_position: Vec3,
    /// Input buffered for the current tick.
    pub input: TickInput,
}

impl Player {
    pub fn new(id: PlayerId, name: String, spawn: &SpawnPoint) -> Self {
        Self {
            id,
            name,
            transform: Transform {
                position: spawn.position,
                yaw: spawn.yaw,
                pitch: 0.0,
            },
            velocity: Vec3::ZERO,
            health: MAX_HEALTH,
            kills: 0,
            deaths: 0,
            combat: CombatState::Alive,
            connection: ConnectionState::Active,
            last_input_seq: 0,
            last_shot_seq: 0,
            grounded: false,
            dash: DashState::default(),
            next_shot_tick: 0,
            last_good_position: spawn.position,
            input: TickInput::default(),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.combat == CombatState::Alive
    }

    pub fn position(&self) -> Vec3 {
        self.transform.position
    }

    pub fn is_finite(&self) -> bool {
        self.transform.position.is_finite()
            && self.velocity.is_finite()
            && self.transform.yaw.is_finite()
            && self.transform.pitch.is_finite()
    }

    /// Reset to full health at `spawn`. Score and sequence counters survive.
    pub fn respawn_at(&mut self, spawn: &SpawnPoint, tick: u64) {
        self.transform = Transform {
            position: spawn.position,
            yaw: spawn.yaw,
            pitch: 0.0,
        };
        self.velocity = Vec3::ZERO;
        self.health = MAX_HEALTH;
        self.combat = CombatState::Alive;
        self.grounded = false;
        self.dash = DashState {
            ready_at: tick,
            ..DashState::default()
        };
        self.next_shot_tick = tick;
        self.last_good_position = spawn.position;
        self.input = TickInput::default();
    }

    /// Health drops to zero or the player falls out of the map.
    pub fn kill(&mut self) {
        self.health = 0;
        self.combat = CombatState::Dead;
        self.velocity = Vec3::ZERO;
        self.dash = DashState::default();
        self.input = TickInput::default();
        self.deaths += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;
    use std::f32::consts::FRAC_PI_2;

    fn spawn() -> SpawnPoint {
        SpawnPoint::new(Vec3::new(1.0, 0.1, 2.0), 0.5)
    }

    #[test]
    fn new_player_starts_alive_with_full_health() {
        let player = Player::new(PlayerId(7), "ann".into(), &spawn());

        assert_eq!(player.health, MAX_HEALTH);
        assert_eq!((player.kills, player.deaths), (0, 0));
        assert!(player.is_alive());
        assert_eq!(player.connection, ConnectionState::Active);
        assert_eq!(player.position(), Vec3::new(1.0, 0.1, 2.0));
        assert_eq!(player.transform.yaw, 0.5);
    }

    #[test]
    fn kill_then_respawn_keeps_score() {
        let mut player = Player::new(PlayerId(1), "bo".into(), &spawn());
        player.kills = 2;
        player.velocity = Vec3::new(1.0, 2.0, 3.0);
        player.kill();

        assert_eq!(player.health, 0);
        assert!(!player.is_alive());
        assert_eq!(player.velocity, Vec3::ZERO);
        assert_eq!(player.deaths, 1);

        let other = SpawnPoint::new(Vec3::new(-5.0, 0.1, 0.0), 1.0);
        player.respawn_at(&other, 300);
        assert!(player.is_alive());
        assert_eq!(player.health, MAX_HEALTH);
        assert_eq!(player.position(), other.position);
        assert_eq!((player.kills, player.deaths), (2, 1));
        assert_eq!(player.dash.cooldown_remaining(300), 0);
    }

    #[rstest]
    #[case("ann", Some("ann"))]
    #[case("  Zed_9-x  ", Some("Zed_9-x"))]
    #[case("sixteen chars ok", Some("sixteen chars ok"))]
    #[case("seventeen chars!!", None)]
    #[case("   ", None)]
    #[case("", None)]
    #[case("<script>", None)]
    #[case("héllo", None)]
    fn names_are_trimmed_and_checked(#[case] raw: &str, #[case] expected: Option<&str>) {
        assert_eq!(validate_name(raw).as_deref(), expected);
    }

    #[test]
    fn move_flags_validate_and_normalise() {
        assert!(MoveFlags::ALL.is_valid());
        assert!(!MoveFlags(0x80).is_valid());

        let (right, forward) = (MoveFlags::FORWARD | MoveFlags::RIGHT).wish_dir();
        assert_relative_eq!(f32::hypot(right, forward), 1.0, epsilon = 1e-6);
        assert_eq!((MoveFlags::FORWARD | MoveFlags::BACK).wish_dir(), (0.0, 0.0));
        assert_eq!(MoveFlags::SPRINT.wish_dir(), (0.0, 0.0));
    }

    #[test]
    fn yaw_rotates_forward_and_right() {
        let t = Transform {
            position: Vec3::ZERO,
            yaw: 0.0,
            pitch: 0.0,
        };
        assert_relative_eq!(t.forward().z, -1.0);
        assert_relative_eq!(t.right().x, 1.0);

        let turned = Transform { yaw: FRAC_PI_2, ..t };
        assert_relative_eq!(turned.forward().x, -1.0, epsilon = 1e-6);
        assert_relative_eq!(turned.right().z, -1.0, epsilon = 1e-6);
    }

    #[test]
    fn aim_direction_is_unit_and_follows_pitch() {
        let dir = aim_direction(0.3, 0.4);
        assert_relative_eq!(dir.length(), 1.0, epsilon = 1e-6);
        assert!(aim_direction(0.0, 0.5).y > 0.0);
        assert_relative_eq!(aim_direction(0.0, 0.0).z, -1.0);
    }
}
