//! Player capsule shape

use glam::Vec3;
use parry3d::math::Real;
use parry3d::query::{Ray, RayCast};
use parry3d::shape::Capsule;

use super::geometry::{to_point, to_vector, translation};

/// Vertical capsule approximating a standing player.
///
/// Positions handed around the simulation are the player's feet; the
/// capsule centre sits `half_height + radius` above them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapsuleShape {
    pub radius: f32,
    /// Half the length of the cylinder section, caps excluded.
    pub half_height: f32,
}

impl CapsuleShape {
    /// 1.8 m tall, 0.4 m radius.
    pub const PLAYER: Self = Self {
        radius: 0.4,
        half_height: 0.5,
    };

    pub fn height(&self) -> f32 {
        2.0 * (self.half_height + self.radius)
    }

    pub fn center(&self, feet: Vec3) -> Vec3 {
        feet + Vec3::Y * (self.half_height + self.radius)
    }

    #[cfg(test)]
    pub fn feet(&self, center: Vec3) -> Vec3 {
        center - Vec3::Y * (self.half_height + self.radius)
    }

    /// Shots originate here.
    pub fn eye(&self, feet: Vec3) -> Vec3 {
        feet + Vec3::Y * (self.height() * 0.9)
    }

    /// Distance between the core segments of two upright capsules.
    pub fn core_distance(&self, center: Vec3, other: &CapsuleShape, other_center: Vec3) -> f32 {
        let delta = center - other_center;
        let horizontal = Vec3::new(delta.x, 0.0, delta.z).length();
        let vertical = (delta.y.abs() - (self.half_height + other.half_height)).max(0.0);
        (horizontal * horizontal + vertical * vertical).sqrt()
    }

    pub fn overlaps(&self, center: Vec3, other: &CapsuleShape, other_center: Vec3) -> bool {
        self.core_distance(center, other, other_center) < self.radius + other.radius
    }

    /// Direction from `other` to this capsule at their closest core points.
    pub fn separation_normal(&self, center: Vec3, other: &CapsuleShape, other_center: Vec3) -> Vec3 {
        let along = (center.y - other_center.y).clamp(-other.half_height, other.half_height);
        let closest = Vec3::new(other_center.x, other_center.y + along, other_center.z);
        let normal = center - closest;
        normal
            .try_normalize()
            .unwrap_or_else(|| Vec3::new(normal.x, 0.0, normal.z).try_normalize().unwrap_or(Vec3::Y))
    }

    /// Ray distance to this capsule standing at `feet`, if within `max_distance`.
    pub fn ray_distance(&self, feet: Vec3, origin: Vec3, dir: Vec3, max_distance: f32) -> Option<f32> {
        let shape = Capsule::new_y(self.half_height, self.radius);
        let ray = Ray::new(to_point(origin), to_vector(dir));
        shape
            .cast_ray(&translation(self.center(feet)), &ray, max_distance as Real, true)
            .filter(|toi| *toi <= max_distance)
    }
}

impl Default for CapsuleShape {
    fn default() -> Self {
        Self::PLAYER
    }
}
