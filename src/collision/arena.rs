//! Built-in arena layout used by the binary

use glam::Vec3;

use crate::game::spawn::SpawnPoint;

use super::geometry::{GeometryError, TriMeshGeometry};

/// Half the side length of the square floor.
pub const FLOOR_HALF_EXTENT: f32 = 30.0;

/// Triangle soup under construction.
#[derive(Debug, Default)]
pub struct MeshBuilder {
    vertices: Vec<Vec3>,
    indices: Vec<[u32; 3]>,
}

impl MeshBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Axis-aligned box between `min` and `max`, all faces included.
    pub fn add_box(&mut self, min: Vec3, max: Vec3) -> &mut Self {
        let base = self.vertices.len() as u32;
        for i in 0..8u32 {
            self.vertices.push(Vec3::new(
                if i & 1 == 0 { min.x } else { max.x },
                if i & 2 == 0 { min.y } else { max.y },
                if i & 4 == 0 { min.z } else { max.z },
            ));
        }

        const FACES: [[u32; 4]; 6] = [
            [0, 1, 3, 2], // -z
            [4, 6, 7, 5], // +z
            [0, 4, 5, 1], // -y
            [2, 3, 7, 6], // +y
            [0, 2, 6, 4], // -x
            [1, 5, 7, 3], // +x
        ];
        for [a, b, c, d] in FACES {
            self.indices.push([base + a, base + b, base + c]);
            self.indices.push([base + a, base + c, base + d]);
        }
        self
    }

    /// Horizontal quad at height `y`.
    pub fn add_floor(&mut self, half_extent: f32, y: f32) -> &mut Self {
        let base = self.vertices.len() as u32;
        self.vertices.extend([
            Vec3::new(-half_extent, y, -half_extent),
            Vec3::new(half_extent, y, -half_extent),
            Vec3::new(half_extent, y, half_extent),
            Vec3::new(-half_extent, y, half_extent),
        ]);
        self.indices.push([base, base + 2, base + 1]);
        self.indices.push([base, base + 3, base + 2]);
        self
    }

    pub fn build(&self) -> Result<TriMeshGeometry, GeometryError> {
        TriMeshGeometry::new(&self.vertices, &self.indices)
    }
}

/// Square floor with four pillars and a low central platform. Walking off
/// any edge leads into the void.
pub fn default_arena() -> Result<TriMeshGeometry, GeometryError> {
    let mut mesh = MeshBuilder::new();
    mesh.add_floor(FLOOR_HALF_EXTENT, 0.0);

    for (x, z) in [(8.0, 8.0), (-8.0, 8.0), (8.0, -8.0), (-8.0, -8.0)] {
        mesh.add_box(Vec3::new(x - 1.0, 0.0, z - 1.0), Vec3::new(x + 1.0, 3.0, z + 1.0));
    }
    mesh.add_box(Vec3::new(-3.0, 0.0, -3.0), Vec3::new(3.0, 1.0, 3.0));

    mesh.build()
}

/// Spawn points around the rim, each facing the centre.
pub fn default_spawn_points() -> Vec<SpawnPoint> {
    let positions = [
        Vec3::new(20.0, 0.1, 20.0),
        Vec3::new(-20.0, 0.1, 20.0),
        Vec3::new(20.0, 0.1, -20.0),
        Vec3::new(-20.0, 0.1, -20.0),
        Vec3::new(0.0, 0.1, 24.0),
        Vec3::new(0.0, 0.1, -24.0),
        Vec3::new(24.0, 0.1, 0.0),
        Vec3::new(-24.0, 0.1, 0.0),
    ];

    positions
        .into_iter()
        .map(|position| SpawnPoint::facing_origin(position))
        .collect()
}
