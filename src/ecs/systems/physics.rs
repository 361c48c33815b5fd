//! ECS physics sync systems.
//!
//! Run [`push_transforms`] before advancing the physics world and
//! [`pull_transforms`] after it.

use tracing::{trace, warn};

use crate::ecs::components::physics::RigidBodyLink;
use crate::ecs::components::transform::Transform;
use crate::physics::PhysicsWorld;

/// Squared distance below which an ECS position counts as unchanged.
const POSITION_EPSILON_SQ: f32 = 1e-10;
/// Quaternion dot product above which an ECS rotation counts as unchanged.
const ROTATION_EPSILON: f32 = 1.0 - 1e-7;

/// Copy body poses into the entities' Transform components. Sleeping bodies
/// are skipped. Returns the number of transforms written.
pub fn pull_transforms(world: &mut hecs::World, physics: &PhysicsWorld) -> usize {
    let mut written = 0;
    for (_, (link, transform)) in world.query_mut::<(&RigidBodyLink, &mut Transform)>() {
        let Some(body) = physics.body(link.0) else {
            continue;
        };
        if body.is_asleep() {
            continue;
        }
        transform.position = body.position();
        transform.rotation = body.rotation();
        written += 1;
    }
    written
}

/// Teleport bodies whose ECS transform no longer matches the simulated
/// pose. Velocities are kept and the body is woken. Returns the number of
/// bodies moved.
pub fn push_transforms(world: &mut hecs::World, physics: &mut PhysicsWorld) -> usize {
    let mut moved = 0;
    for (entity, (link, transform)) in world.query_mut::<(&RigidBodyLink, &Transform)>() {
        let Some(body) = physics.body(link.0) else {
            continue;
        };
        let same_position =
            body.position().distance_squared(transform.position) <= POSITION_EPSILON_SQ;
        let same_rotation = body.rotation().dot(transform.rotation).abs() >= ROTATION_EPSILON;
        if same_position && same_rotation {
            continue;
        }
        if !transform.position.is_finite() || !transform.rotation.is_finite() {
            warn!(?entity, "ignoring non-finite transform");
            continue;
        }
        if let Some(body) = physics.body_mut(link.0) {
            body.set_pose(transform.position, transform.rotation);
            moved += 1;
        }
    }
    if moved > 0 {
        trace!(moved, "pushed ECS transforms");
    }
    moved
}
