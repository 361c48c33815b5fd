//! Impetus rigid body physics
//!
//! A CPU rigid body engine: collision detection, contact resolution and
//! sleeping, driven by a fixed timestep.
//!
//! # Architecture
//!
//! The library is organized into layers:
//!
//! 1. **geometry** - Stateless primitives (AABB, ray, plane, segment, triangle)
//! 2. **physics** - Bodies, colliders, broadphase, narrowphase, solver and world
//! 3. **ecs** - hecs ECS integration (feature = "ecs")

pub mod error;
pub mod geometry;
pub mod physics;

#[cfg(feature = "ecs")]
pub mod ecs;

pub use error::{PhysicsError, PhysicsResult};

pub use geometry::{Aabb, LineSegment, Plane, Ray, Triangle};

pub use physics::{
    collider::{Collider, ColliderHandle, Material},
    contact::{ContactManifold, ContactPoint},
    events::{CollisionInfo, PhysicsEvent},
    filter::{CollisionFilter, LayerFilter},
    rigid_body::{BodyHandle, RigidBody},
    shape::ColliderShape,
    PhysicsConfig, PhysicsWorld, RayHit,
};

#[cfg(feature = "ecs")]
pub use ecs::prelude::*;

// Re-export glam for convenience
pub use glam;
