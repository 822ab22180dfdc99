//! Per-player bounded command queue between connections and the tick task

use std::collections::VecDeque;

use dashmap::DashMap;
use tracing::trace;

use super::player::PlayerId;
use super::PlayerCommand;

/// Commands waiting for the next tick, one bounded queue per player.
///
/// Connection tasks push, the tick task drains. A full queue drops that
/// player's oldest command so the network side never blocks.
pub struct CommandQueue {
    depth: usize,
    queues: DashMap<PlayerId, VecDeque<PlayerCommand>>,
}

impl CommandQueue {
    pub fn new(depth: usize) -> Self {
        Self {
            depth: depth.max(1),
            queues: DashMap::new(),
        }
    }

    /// Queue a command. Returns `true` if an older command was dropped to
    /// make room.
    pub fn push(&self, command: PlayerCommand) -> bool {
        let id = command.player_id();
        let mut queue = self.queues.entry(id).or_default();

        let overflowed = queue.len() >= self.depth;
        if overflowed {
            queue.pop_front();
            trace!(player_id = %id, "Command queue full, dropped oldest");
        }
        queue.push_back(command);
        overflowed
    }

    /// Throw away everything queued for a player.
    pub fn purge(&self, id: PlayerId) -> usize {
        self.queues.remove(&id).map(|(_, q)| q.len()).unwrap_or(0)
    }

    #[cfg(test)]
    pub fn pending(&self, id: PlayerId) -> usize {
        self.queues.get(&id).map(|q| q.len()).unwrap_or(0)
    }

    /// Take all queued commands, players in ascending id order and each
    /// player's commands in arrival order.
    pub fn drain(&self) -> Vec<PlayerCommand> {
        let mut ids: Vec<PlayerId> = self.queues.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();

        let mut commands = Vec::new();
        for id in ids {
            if let Some((_, queue)) = self.queues.remove(&id) {
                commands.extend(queue);
            }
        }
        commands
    }
}
