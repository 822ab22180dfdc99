//! Collision queries over static map geometry and player capsules

pub mod arena;
pub mod capsule;
pub mod geometry;
pub mod world;

pub use capsule::CapsuleShape;
pub use geometry::StaticGeometry;
pub use world::CollisionWorld;
