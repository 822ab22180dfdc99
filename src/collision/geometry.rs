//! Static map geometry and the query interface the simulation consumes.
//!
//! The simulation never looks at triangles directly. It asks two questions
//! of whatever the map side prepared: where does a ray hit, and how far can a
//! capsule travel before touching something.

use glam::Vec3;
use parry3d::math::{Isometry, Point, Real, Vector};
use parry3d::query::{self, Ray, RayCast};
use parry3d::shape::{Capsule, TriMesh};

/// Binary search iterations used to refine a contact between two samples.
const SEARCH_ITERATIONS: usize = 12;

/// Result of a ray query against static geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub hit: bool,
    pub point: Vec3,
    /// Distance from the ray origin, `f32::INFINITY` on a miss.
    pub distance: f32,
}

impl RayHit {
    pub const MISS: Self = Self {
        hit: false,
        point: Vec3::ZERO,
        distance: f32::INFINITY,
    };

    pub fn at(point: Vec3, distance: f32) -> Self {
        Self {
            hit: true,
            point,
            distance,
        }
    }
}

/// Result of sweeping a capsule along a straight path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepHit {
    pub contact: bool,
    /// Surface normal pointing back towards the capsule. `Vec3::ZERO` when clear.
    pub normal: Vec3,
    /// Distance the capsule centre can travel before touching. The full path
    /// length when clear.
    pub distance: f32,
}

impl SweepHit {
    pub fn clear(distance: f32) -> Self {
        Self {
            contact: false,
            normal: Vec3::ZERO,
            distance,
        }
    }

    pub fn touching(normal: Vec3, distance: f32) -> Self {
        Self {
            contact: true,
            normal,
            distance,
        }
    }
}

/// Query interface over static map geometry.
///
/// Implementations are prepared once by the map side and only read afterwards,
/// so they must be shareable across threads.
pub trait StaticGeometry: Send + Sync {
    /// Nearest intersection of the ray `origin + t * dir`, `t >= 0`.
    fn intersect(&self, origin: Vec3, dir: Vec3) -> RayHit;

    /// Sweep a vertical capsule, given by its centre, from `from` to `to`.
    fn sweep_capsule(&self, from: Vec3, to: Vec3, radius: f32, half_height: f32) -> SweepHit;
}

#[derive(Debug, thiserror::Error)]
pub enum GeometryError {
    #[error("Invalid triangle mesh: {0}")]
    InvalidMesh(String),
}

/// Static geometry backed by a parry3d triangle mesh.
pub struct TriMeshGeometry {
    mesh: TriMesh,
    triangle_count: usize,
}

impl TriMeshGeometry {
    pub fn new(vertices: &[Vec3], indices: &[[u32; 3]]) -> Result<Self, GeometryError> {
        if indices.is_empty() {
            return Err(GeometryError::InvalidMesh("no triangles".to_string()));
        }
        let points: Vec<Point<Real>> = vertices.iter().map(|v| to_point(*v)).collect();
        let mesh = TriMesh::new(points, indices.to_vec())
            .map_err(|e| GeometryError::InvalidMesh(format!("{:?}", e)))?;

        Ok(Self {
            mesh,
            triangle_count: indices.len(),
        })
    }

    pub fn triangle_count(&self) -> usize {
        self.triangle_count
    }

    fn capsule_overlaps(&self, capsule: &Capsule, center: Vec3) -> bool {
        query::intersection_test(&translation(center), capsule, &Isometry::identity(), &self.mesh)
            .unwrap_or(false)
    }

    /// Normal of the closest mesh feature, pointing from the mesh to the capsule.
    fn contact_normal(&self, capsule: &Capsule, center: Vec3, prediction: f32) -> Option<Vec3> {
        let contact = query::contact(
            &translation(center),
            capsule,
            &Isometry::identity(),
            &self.mesh,
            prediction,
        )
        .ok()
        .flatten()?;

        let normal = -Vec3::new(contact.normal1.x, contact.normal1.y, contact.normal1.z);
        normal.try_normalize()
    }

    /// Every triangle the capsule intersects, with its contact normal.
    fn contacts(&self, capsule: &Capsule, center: Vec3) -> Vec<(usize, Vec3)> {
        let position = translation(center);
        self.mesh
            .triangles()
            .enumerate()
            .filter_map(|(index, triangle)| {
                let contact =
                    query::contact(&position, capsule, &Isometry::identity(), &triangle, 0.0)
                        .ok()
                        .flatten()?;
                let normal = -Vec3::new(contact.normal1.x, contact.normal1.y, contact.normal1.z);
                Some((index, normal.try_normalize()?))
            })
            .collect()
    }

    fn overlaps_excluding(&self, capsule: &Capsule, center: Vec3, skip: &[usize]) -> bool {
        let position = translation(center);
        self.mesh
            .triangles()
            .enumerate()
            .filter(|(index, _)| !skip.contains(index))
            .any(|(_, triangle)| {
                query::intersection_test(&position, capsule, &Isometry::identity(), &triangle)
                    .unwrap_or(false)
            })
    }
}

impl StaticGeometry for TriMeshGeometry {
    fn intersect(&self, origin: Vec3, dir: Vec3) -> RayHit {
        let Some(dir) = dir.try_normalize() else {
            return RayHit::MISS;
        };
        let ray = Ray::new(to_point(origin), to_vector(dir));

        match self
            .mesh
            .cast_ray(&Isometry::identity(), &ray, Real::MAX, true)
        {
            Some(toi) => RayHit::at(origin + dir * toi, toi),
            None => RayHit::MISS,
        }
    }

    fn sweep_capsule(&self, from: Vec3, to: Vec3, radius: f32, half_height: f32) -> SweepHit {
        let capsule = Capsule::new_y(half_height, radius);
        let delta = to - from;
        let length = delta.length();

        // Motion into any surface already touched goes nowhere. Motion away
        // from all of them is only tested against the rest of the mesh.
        let touched: Vec<usize> = if self.capsule_overlaps(&capsule, from) {
            let contacts = self.contacts(&capsule, from);
            if let Some(normal) = most_opposing(&contacts, delta) {
                return SweepHit::touching(normal, 0.0);
            }
            contacts.into_iter().map(|(index, _)| index).collect()
        } else {
            Vec::new()
        };

        let hit = first_overlap(from, to, radius * 0.5, |center| {
            if touched.is_empty() {
                self.capsule_overlaps(&capsule, center)
            } else {
                self.overlaps_excluding(&capsule, center, &touched)
            }
        });

        match hit {
            None => SweepHit::clear(length),
            Some((clear, blocked)) => {
                // Only what the capsule actually runs into at the blocked
                // sample counts, not a surface it merely skims.
                let stop = from + delta * clear;
                let fallback = -delta.try_normalize().unwrap_or(Vec3::NEG_Y);
                let fresh: Vec<(usize, Vec3)> = self
                    .contacts(&capsule, from + delta * blocked)
                    .into_iter()
                    .filter(|(index, _)| !touched.contains(index))
                    .collect();
                let normal = most_opposing(&fresh, delta)
                    .or_else(|| fresh.first().map(|(_, normal)| *normal))
                    .or_else(|| self.contact_normal(&capsule, stop, length + radius))
                    .unwrap_or(fallback);
                SweepHit::touching(normal, length * clear)
            }
        }
    }
}

/// The contact normal that `delta` drives into hardest, if it drives into any.
fn most_opposing(contacts: &[(usize, Vec3)], delta: Vec3) -> Option<Vec3> {
    contacts
        .iter()
        .map(|(_, normal)| *normal)
        .filter(|normal| delta.dot(*normal) < 0.0)
        .min_by(|a, b| delta.dot(*a).total_cmp(&delta.dot(*b)))
}

/// Walk `from → to` in steps no longer than `max_step` and refine the first
/// overlapping sample with a binary search.
///
/// Returns `(clear, blocked)` path fractions bracketing the contact. The
/// stepping keeps fast movers from tunnelling through thin surfaces.
pub(crate) fn first_overlap(
    from: Vec3,
    to: Vec3,
    max_step: f32,
    overlaps: impl Fn(Vec3) -> bool,
) -> Option<(f32, f32)> {
    let length = (to - from).length();
    let samples = ((length / max_step.max(1e-3)).ceil() as usize).clamp(1, 64);

    let mut clear = 0.0_f32;
    for i in 1..=samples {
        let t = i as f32 / samples as f32;
        if overlaps(from.lerp(to, t)) {
            let (mut lo, mut hi) = (clear, t);
            for _ in 0..SEARCH_ITERATIONS {
                let mid = (lo + hi) * 0.5;
                if overlaps(from.lerp(to, mid)) {
                    hi = mid;
                } else {
                    lo = mid;
                }
            }
            return Some((lo, hi));
        }
        clear = t;
    }
    None
}

pub(crate) fn to_point(v: Vec3) -> Point<Real> {
    Point::new(v.x, v.y, v.z)
}

pub(crate) fn to_vector(v: Vec3) -> Vector<Real> {
    Vector::new(v.x, v.y, v.z)
}

pub(crate) fn translation(v: Vec3) -> Isometry<Real> {
    Isometry::translation(v.x, v.y, v.z)
}
