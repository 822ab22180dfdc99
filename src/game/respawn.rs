//! Death to respawn timers

use std::collections::BTreeMap;

use super::player::PlayerId;

/// Pending respawns keyed by player, each with the tick it falls due.
///
/// A player has at most one timer. Ids come back out of [`due`](Self::due)
/// in ascending order.
#[derive(Debug, Default)]
pub struct RespawnManager {
    delay_ticks: u64,
    pending: BTreeMap<PlayerId, u64>,
}

impl RespawnManager {
    pub fn new(delay_ticks: u64) -> Self {
        Self {
            delay_ticks,
            pending: BTreeMap::new(),
        }
    }

    /// Start the timer for a death at `now`. A second call for the same id
    /// keeps the first timer.
    pub fn schedule(&mut self, id: PlayerId, now: u64) -> u64 {
        *self.pending.entry(id).or_insert(now.saturating_add(self.delay_ticks))
    }

    pub fn cancel(&mut self, id: PlayerId) -> bool {
        self.pending.remove(&id).is_some()
    }

    pub fn is_pending(&self, id: PlayerId) -> bool {
        self.pending.contains_key(&id)
    }

    #[cfg(test)]
    pub fn due_at(&self, id: PlayerId) -> Option<u64> {
        self.pending.get(&id).copied()
    }

    pub fn pending_ids(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.pending.keys().copied()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Remove and return every timer that has elapsed by `now`.
    pub fn due(&mut self, now: u64) -> Vec<PlayerId> {
        let ready: Vec<PlayerId> = self
            .pending
            .iter()
            .filter(|(_, due)| **due <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in &ready {
            self.pending.remove(id);
        }
        ready
    }
}
