//! Stateless geometry primitives shared by the broadphase, the shape queries
//! and the narrowphase.

mod aabb;
mod plane;
mod ray;
mod segment;
mod triangle;

pub use aabb::Aabb;
pub use plane::Plane;
pub use ray::Ray;
pub use segment::LineSegment;
pub use triangle::Triangle;
