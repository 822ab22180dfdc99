//! Game simulation modules

pub mod broadcast;
pub mod combat;
pub mod events;
pub mod physics;
pub mod player;
pub mod queue;
pub mod respawn;
pub mod server;
pub mod snapshot;
pub mod spawn;
pub mod world;

pub use player::PlayerId;
pub use server::{ServerHandle, TickScheduler};
pub use world::WorldState;

use player::MoveFlags;

/// Movement and look input from one client message
#[derive(Debug, Clone, PartialEq)]
pub struct InputCommand {
    pub player_id: PlayerId,
    pub seq: u32,
    pub move_flags: MoveFlags,
    pub yaw: f32,
    pub pitch: f32,
    pub jump: bool,
    pub dash: bool,
}

/// Fire request. The ray origin is always the shooter's eye.
#[derive(Debug, Clone, PartialEq)]
pub struct ShootCommand {
    pub player_id: PlayerId,
    pub seq: u32,
    pub yaw: f32,
    pub pitch: f32,
}

/// Command queued by a connection for the tick task
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    Input(InputCommand),
    Shoot(ShootCommand),
}

impl PlayerCommand {
    pub fn player_id(&self) -> PlayerId {
        match self {
            PlayerCommand::Input(cmd) => cmd.player_id,
            PlayerCommand::Shoot(cmd) => cmd.player_id,
        }
    }
}

/// Input state for a single tick.
///
/// Movement keys are held until the next input replaces them; jump, dash
/// and shots only count for the tick they arrive in.
#[derive(Debug, Clone, Default)]
pub struct TickInput {
    pub move_flags: MoveFlags,
    pub jump: bool,
    pub dash: bool,
    pub shots: Vec<ShootCommand>,
}

impl TickInput {
    /// Drop the one-shot requests once the tick consumed them.
    pub fn end_tick(&mut self) {
        self.jump = false;
        self.dash = false;
        self.shots.clear();
    }
}
