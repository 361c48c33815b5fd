//! Scene builders shared by the benchmarks.

use anyhow::Result;
use glam::Vec3;
use impetus::physics::arena::Arena;
use impetus::physics::broadphase::{BvhConfig, DynamicBvh};
use impetus::{Collider, ColliderShape, PhysicsConfig, PhysicsWorld, RigidBody};

/// Positions on a cubic grid with `spacing` between neighbours.
pub fn grid_positions(n: usize, spacing: f32) -> Vec<Vec3> {
    let side = (n as f32).cbrt().ceil().max(1.0) as usize;
    (0..n)
        .map(|i| {
            let x = (i % side) as f32;
            let y = ((i / side) % side) as f32;
            let z = (i / (side * side)) as f32;
            Vec3::new(x, y, z) * spacing
        })
        .collect()
}

/// Alternating spheres, boxes, capsules and cylinders of roughly unit size.
pub fn mixed_shape(i: usize) -> ColliderShape {
    match i % 4 {
        0 => ColliderShape::Sphere { radius: 0.5 },
        1 => ColliderShape::Box {
            half_extents: Vec3::splat(0.5),
        },
        2 => ColliderShape::Capsule {
            radius: 0.3,
            half_height: 0.3,
        },
        _ => ColliderShape::Cylinder {
            radius: 0.4,
            half_height: 0.4,
        },
    }
}

/// Static colliders on a grid, inserted into a bare tree.
pub fn setup_bvh(n: usize, spacing: f32) -> Result<(Arena<Collider>, DynamicBvh)> {
    let mut colliders = Arena::unbounded("collider");
    let mut bvh = DynamicBvh::new(BvhConfig::default());
    for (i, position) in grid_positions(n, spacing).into_iter().enumerate() {
        let collider = Collider::new(mixed_shape(i)).with_position(position);
        let bounds = collider.shape().compute_aabb(collider.transform());
        let handle = colliders.try_insert(collider)?;
        bvh.insert(handle, bounds)?;
    }
    Ok((colliders, bvh))
}

/// A ground box with `n` dynamic bodies dropped above it. Bodies start
/// slightly overlapping their neighbours below so the first steps are busy.
pub fn setup_world(n: usize) -> Result<PhysicsWorld> {
    let mut world = PhysicsWorld::new(PhysicsConfig::default())?;
    world.add_collider(
        Collider::new(ColliderShape::Box {
            half_extents: Vec3::new(50.0, 0.5, 50.0),
        })
        .with_position(Vec3::new(0.0, -0.5, 0.0)),
        None,
    )?;
    for (i, position) in grid_positions(n, 1.05).into_iter().enumerate() {
        let body = world.add_body(RigidBody::new(position + Vec3::new(0.0, 0.6, 0.0)))?;
        world.add_collider(Collider::new(mixed_shape(i)).with_mass(1.0), Some(body))?;
    }
    Ok(world)
}

/// Step `world` `steps` times and return the number of live manifolds.
pub fn run_steps(world: &mut PhysicsWorld, steps: usize) -> usize {
    for _ in 0..steps {
        world.step();
    }
    world.manifold_count()
}
