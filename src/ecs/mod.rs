//! hecs integration.
//!
//! Entities carry a [`RigidBodyLink`] to a body in a
//! [`PhysicsWorld`](crate::physics::PhysicsWorld) and a [`Transform`]. The
//! world simulates; [`pull_transforms`] copies its poses into the ECS after a
//! step, and [`push_transforms`] teleports bodies whose ECS transform was
//! edited in between.

pub mod bridge;
pub mod components;
pub mod systems;

pub mod prelude {
    pub use super::bridge::{despawn_body, spawn_body};
    pub use super::components::physics::{ColliderLinks, RigidBodyLink};
    pub use super::components::transform::Transform;
    pub use super::systems::physics::{pull_transforms, push_transforms};
}
