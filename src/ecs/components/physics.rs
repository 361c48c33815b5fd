//! Physics components for ECS entities.

use crate::physics::collider::ColliderHandle;
use crate::physics::rigid_body::BodyHandle;

/// Links an entity to a body in a [`PhysicsWorld`](crate::physics::PhysicsWorld).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RigidBodyLink(pub BodyHandle);

/// Colliders attached to the entity's body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColliderLinks(pub Vec<ColliderHandle>);
