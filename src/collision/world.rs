//! Collision world: static map geometry plus one capsule per alive player

use std::collections::BTreeMap;
use std::sync::Arc;

use glam::Vec3;

use crate::game::PlayerId;

use super::capsule::CapsuleShape;
use super::geometry::{first_overlap, StaticGeometry, SweepHit};

/// Nearest player capsule struck by a ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerHit {
    pub id: PlayerId,
    pub distance: f32,
    pub point: Vec3,
}

/// Everything movement and hit detection collide against.
///
/// Capsules are keyed by player and stored at the player's feet position.
/// Only the tick task mutates this.
pub struct CollisionWorld {
    geometry: Arc<dyn StaticGeometry>,
    shape: CapsuleShape,
    capsules: BTreeMap<PlayerId, Vec3>,
}

impl CollisionWorld {
    pub fn new(geometry: Arc<dyn StaticGeometry>, shape: CapsuleShape) -> Self {
        Self {
            geometry,
            shape,
            capsules: BTreeMap::new(),
        }
    }

    pub fn shape(&self) -> CapsuleShape {
        self.shape
    }

    /// Insert or move a player's capsule.
    pub fn set_capsule(&mut self, id: PlayerId, feet: Vec3) {
        self.capsules.insert(id, feet);
    }

    pub fn remove_capsule(&mut self, id: PlayerId) -> bool {
        self.capsules.remove(&id).is_some()
    }

    pub fn has_capsule(&self, id: PlayerId) -> bool {
        self.capsules.contains_key(&id)
    }

    pub fn capsule_ids(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.capsules.keys().copied()
    }

    /// Whether a capsule standing at `feet` would intersect any player.
    pub fn is_occupied(&self, feet: Vec3) -> bool {
        let center = self.shape.center(feet);
        self.capsules
            .values()
            .any(|&other| self.shape.overlaps(center, &self.shape, self.shape.center(other)))
    }

    /// Sweep `id`'s capsule from `from` to `to` (feet positions) against the
    /// map and every other capsule. Returns the earliest contact.
    pub fn sweep(&self, id: PlayerId, from: Vec3, to: Vec3) -> SweepHit {
        let shape = self.shape;
        let start = shape.center(from);
        let end = shape.center(to);
        let delta = end - start;
        let length = delta.length();

        let mut nearest =
            self.geometry
                .sweep_capsule(start, end, shape.radius, shape.half_height);

        for (&other_id, &other_feet) in &self.capsules {
            if other_id == id {
                continue;
            }
            let other_center = shape.center(other_feet);

            if shape.overlaps(start, &shape, other_center) {
                // Already intersecting: only block motion towards the other body.
                let normal = shape.separation_normal(start, &shape, other_center);
                if delta.dot(normal) < 0.0 && (!nearest.contact || nearest.distance > 0.0) {
                    nearest = SweepHit::touching(normal, 0.0);
                }
                continue;
            }

            let hit = first_overlap(start, end, shape.radius * 0.5, |center| {
                shape.overlaps(center, &shape, other_center)
            });
            if let Some((clear, _)) = hit {
                let distance = length * clear;
                if !nearest.contact || distance < nearest.distance {
                    let stop = start + delta * clear;
                    let normal = shape.separation_normal(stop, &shape, other_center);
                    nearest = SweepHit::touching(normal, distance);
                }
            }
        }

        nearest
    }

    /// Contact normal under `feet` within `depth`, if anything supports the player.
    pub fn probe_ground(&self, id: PlayerId, feet: Vec3, depth: f32) -> Option<Vec3> {
        let hit = self.sweep(id, feet, feet - Vec3::Y * depth);
        hit.contact.then_some(hit.normal)
    }

    /// Nearest capsule other than `exclude` along the ray, within `max_distance`.
    ///
    /// Map geometry in front of the capsule occludes it.
    pub fn raycast_players(
        &self,
        origin: Vec3,
        dir: Vec3,
        max_distance: f32,
        exclude: PlayerId,
    ) -> Option<PlayerHit> {
        let dir = dir.try_normalize()?;

        let nearest = self
            .capsules
            .iter()
            .filter(|(id, _)| **id != exclude)
            .filter_map(|(&id, &feet)| {
                self.shape
                    .ray_distance(feet, origin, dir, max_distance)
                    .map(|distance| PlayerHit {
                        id,
                        distance,
                        point: origin + dir * distance,
                    })
            })
            .min_by(|a, b| a.distance.total_cmp(&b.distance))?;

        let wall = self.geometry.intersect(origin, dir);
        if wall.hit && wall.distance < nearest.distance {
            return None;
        }
        Some(nearest)
    }

    #[cfg(test)]
    pub fn raycast_static(&self, origin: Vec3, dir: Vec3) -> super::geometry::RayHit {
        self.geometry.intersect(origin, dir)
    }
}
