//! Spawn points and spawn selection

use glam::Vec3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Static position and facing a player enters the arena at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnPoint {
    pub position: Vec3,
    pub yaw: f32,
}

impl SpawnPoint {
    #[cfg(test)]
    pub fn new(position: Vec3, yaw: f32) -> Self {
        Self { position, yaw }
    }

    /// Spawn at `position` looking towards the arena centre.
    pub fn facing_origin(position: Vec3) -> Self {
        Self {
            position,
            yaw: position.x.atan2(position.z),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Spawn pool is empty")]
pub struct EmptySpawnPool;

/// Seeded spawn selection that never hands out the same point twice in a
/// row when it has a choice.
pub struct SpawnPool {
    points: Vec<SpawnPoint>,
    last: Option<usize>,
    rng: ChaCha8Rng,
}

impl SpawnPool {
    pub fn new(points: Vec<SpawnPoint>, seed: u64) -> Result<Self, EmptySpawnPool> {
        if points.is_empty() {
            return Err(EmptySpawnPool);
        }
        Ok(Self {
            points,
            last: None,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    /// Pick the next spawn point.
    pub fn next(&mut self) -> SpawnPoint {
        let len = self.points.len();
        let index = match self.last {
            Some(last) if len > 1 => {
                // draw from the other len - 1 points
                let pick = self.rng.gen_range(0..len - 1);
                if pick >= last {
                    pick + 1
                } else {
                    pick
                }
            }
            _ => self.rng.gen_range(0..len),
        };
        self.last = Some(index);
        self.points[index]
    }

    /// Pick among the points `is_free` accepts, still skipping the previous
    /// one when another free point exists. Same as [`next`](Self::next) when
    /// nothing is free.
    pub fn next_free(&mut self, is_free: impl Fn(&SpawnPoint) -> bool) -> SpawnPoint {
        let free: Vec<usize> = (0..self.points.len())
            .filter(|&index| is_free(&self.points[index]))
            .collect();
        let fresh: Vec<usize> = free
            .iter()
            .copied()
            .filter(|&index| Some(index) != self.last)
            .collect();

        let candidates = if fresh.is_empty() { free } else { fresh };
        if candidates.is_empty() {
            return self.next();
        }
        let index = candidates[self.rng.gen_range(0..candidates.len())];
        self.last = Some(index);
        self.points[index]
    }
}
