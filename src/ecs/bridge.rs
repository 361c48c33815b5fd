//! Spawning and despawning entities backed by physics bodies.

use tracing::debug;

use crate::ecs::components::physics::{ColliderLinks, RigidBodyLink};
use crate::ecs::components::transform::Transform;
use crate::error::PhysicsResult;
use crate::physics::collider::Collider;
use crate::physics::rigid_body::RigidBody;
use crate::physics::PhysicsWorld;

/// Add `body` and its colliders to the physics world and spawn an entity
/// linked to it.
///
/// Creates an entity with Transform, RigidBodyLink and ColliderLinks
/// components. If a collider is rejected the body is removed again.
pub fn spawn_body(
    world: &mut hecs::World,
    physics: &mut PhysicsWorld,
    body: RigidBody,
    colliders: impl IntoIterator<Item = Collider>,
) -> PhysicsResult<hecs::Entity> {
    let transform = Transform::from_position_rotation(body.position(), body.rotation());
    let handle = physics.add_body(body)?;

    let mut attached = Vec::new();
    for collider in colliders {
        match physics.add_collider(collider, Some(handle)) {
            Ok(c) => attached.push(c),
            Err(err) => {
                physics.remove_body(handle)?;
                return Err(err);
            }
        }
    }

    Ok(world.spawn((transform, RigidBodyLink(handle), ColliderLinks(attached))))
}

/// Despawn an entity and remove its body from the physics world. Despawning
/// an entity that no longer exists is a no-op.
pub fn despawn_body(
    world: &mut hecs::World,
    physics: &mut PhysicsWorld,
    entity: hecs::Entity,
) -> PhysicsResult<()> {
    let body = world.get::<&RigidBodyLink>(entity).ok().map(|link| link.0);
    if let Some(handle) = body {
        physics.remove_body(handle)?;
    }
    match world.despawn(entity) {
        Ok(()) => {}
        Err(hecs::NoSuchEntity) => debug!(?entity, "entity already despawned"),
    }
    Ok(())
}
