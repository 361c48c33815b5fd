//! Collider component: a shape placed in the world, with material, layer,
//! sensor flag and enter/exit callbacks.

use std::fmt;

use glam::{Quat, Vec3};

use crate::error::{PhysicsError, PhysicsResult};
use crate::geometry::Aabb;

use super::arena::Handle;
use super::broadphase::NodeHandle;
use super::events::CollisionInfo;
use super::rigid_body::BodyHandle;
use super::shape::ColliderShape;
use super::transform::Transform;

/// Handle to a collider owned by a [`PhysicsWorld`](super::PhysicsWorld).
pub type ColliderHandle = Handle<Collider>;

/// Number of collision layers.
pub const LAYER_COUNT: u32 = 32;

/// Invoked with the pair's contact data when a collision starts or ends.
pub type CollisionCallback = Box<dyn FnMut(&CollisionInfo)>;
/// Invoked with `(self, other)` when a sensor overlap starts or ends.
pub type SensorCallback = Box<dyn FnMut(ColliderHandle, ColliderHandle)>;

/// Surface and mass parameters of a collider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    /// Mass contributed to the owning body, in kilograms.
    pub mass: f32,
    /// Coulomb friction coefficient.
    pub friction: f32,
    /// Coefficient of restitution (0.0 - 1.0).
    pub restitution: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            mass: 1.0,
            friction: 0.5,
            restitution: 0.0,
        }
    }
}

impl Material {
    pub fn validate(&self) -> PhysicsResult<()> {
        if !self.mass.is_finite() || self.mass <= 0.0 {
            return Err(PhysicsError::InvalidMaterial {
                reason: "mass must be positive and finite",
            });
        }
        if !self.friction.is_finite() || self.friction < 0.0 {
            return Err(PhysicsError::InvalidMaterial {
                reason: "friction must be non-negative and finite",
            });
        }
        if !(0.0..=1.0).contains(&self.restitution) {
            return Err(PhysicsError::InvalidMaterial {
                reason: "restitution must be within 0..=1",
            });
        }
        Ok(())
    }
}

#[derive(Default)]
struct Callbacks {
    collision_enter: Option<CollisionCallback>,
    collision_exit: Option<CollisionCallback>,
    sensor_enter: Option<SensorCallback>,
    sensor_exit: Option<SensorCallback>,
}

/// A convex shape with a world pose.
///
/// A collider attached to a rigid body follows it at a fixed local offset.
/// A collider without a body is static and keeps the transform it was given.
pub struct Collider {
    shape: ColliderShape,
    material: Material,
    is_sensor: bool,
    layer: u32,
    local_position: Vec3,
    local_rotation: Quat,
    transform: Transform,
    pub(crate) body: Option<BodyHandle>,
    pub(crate) leaf: Option<NodeHandle>,
    bounds: Aabb,
    /// Transform version `bounds` was computed from. 0 means never.
    bounds_version: u64,
    /// Keys of the contact manifolds this collider takes part in.
    pub(crate) contacts: Vec<u64>,
    callbacks: Callbacks,
}

impl Collider {
    pub fn new(shape: ColliderShape) -> Self {
        Self {
            shape,
            material: Material::default(),
            is_sensor: false,
            layer: 0,
            local_position: Vec3::ZERO,
            local_rotation: Quat::IDENTITY,
            transform: Transform::identity(),
            body: None,
            leaf: None,
            bounds: Aabb::INVALID,
            bounds_version: 0,
            contacts: Vec::new(),
            callbacks: Callbacks::default(),
        }
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }

    pub fn with_mass(mut self, mass: f32) -> Self {
        self.material.mass = mass;
        self
    }

    pub fn with_friction(mut self, friction: f32) -> Self {
        self.material.friction = friction;
        self
    }

    pub fn with_restitution(mut self, restitution: f32) -> Self {
        self.material.restitution = restitution;
        self
    }

    /// Sensors report overlaps but never generate a contact response. A
    /// static sensor also reports static colliders placed or moved into it.
    pub fn with_sensor(mut self, is_sensor: bool) -> Self {
        self.is_sensor = is_sensor;
        self
    }

    pub fn with_layer(mut self, layer: u32) -> Self {
        self.layer = layer;
        self
    }

    /// Offset from the owning body's origin. Ignored for static colliders.
    pub fn with_local_pose(mut self, position: Vec3, rotation: Quat) -> Self {
        self.local_position = position;
        self.local_rotation = rotation.normalize();
        self
    }

    /// World pose of a static collider.
    pub fn with_position(mut self, position: Vec3) -> Self {
        self.transform.set_position(position);
        self
    }

    pub fn with_position_rotation(mut self, position: Vec3, rotation: Quat) -> Self {
        self.transform.set_position_rotation(position, rotation);
        self
    }

    /// Check the shape, material and layer.
    pub fn validate(&self) -> PhysicsResult<()> {
        self.shape.validate()?;
        self.material.validate()?;
        if self.layer >= LAYER_COUNT {
            return Err(PhysicsError::InvalidLayer(self.layer));
        }
        Ok(())
    }

    #[inline]
    pub fn shape(&self) -> &ColliderShape {
        &self.shape
    }

    #[inline]
    pub fn material(&self) -> &Material {
        &self.material
    }

    #[inline]
    pub fn is_sensor(&self) -> bool {
        self.is_sensor
    }

    #[inline]
    pub fn layer(&self) -> u32 {
        self.layer
    }

    /// Bit for this collider's layer in a layer mask.
    #[inline]
    pub fn layer_bit(&self) -> u32 {
        1 << self.layer
    }

    /// `true` when no rigid body owns this collider.
    #[inline]
    pub fn is_static(&self) -> bool {
        self.body.is_none()
    }

    #[inline]
    pub fn body(&self) -> Option<BodyHandle> {
        self.body
    }

    #[inline]
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn local_position(&self) -> Vec3 {
        self.local_position
    }

    pub fn local_rotation(&self) -> Quat {
        self.local_rotation
    }

    /// Tight world bounds as of the last refresh.
    #[inline]
    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    /// Keys of the manifolds this collider currently takes part in.
    pub fn contact_keys(&self) -> &[u64] {
        &self.contacts
    }

    /// Recompute the world bounds if the transform changed since the last
    /// refresh. Returns `true` if the bounds were recomputed.
    pub(crate) fn refresh_bounds(&mut self) -> bool {
        if self.bounds_version == self.transform.version() {
            return false;
        }
        self.bounds = self.shape.compute_aabb(&self.transform);
        self.bounds_version = self.transform.version();
        true
    }

    pub(crate) fn set_world_pose(&mut self, position: Vec3, rotation: Quat) {
        self.transform.set_position_rotation(position, rotation);
    }

    pub(crate) fn set_local_pose(&mut self, position: Vec3, rotation: Quat) {
        self.local_position = position;
        self.local_rotation = rotation.normalize();
    }

    /// Place this collider relative to its body's pose.
    pub(crate) fn sync_to_body(&mut self, body: &Transform) {
        let position = body.transform_point(self.local_position);
        let rotation = body.rotation() * self.local_rotation;
        self.transform.set_position_rotation(position, rotation);
    }

    #[inline]
    pub fn support(&self, direction: Vec3) -> Vec3 {
        self.shape.support(direction, &self.transform)
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        self.shape.contains_point(point, &self.transform)
    }

    pub fn closest_point(&self, point: Vec3) -> Vec3 {
        self.shape.closest_point(point, &self.transform)
    }

    pub fn set_collision_enter(&mut self, callback: impl FnMut(&CollisionInfo) + 'static) {
        self.callbacks.collision_enter = Some(Box::new(callback));
    }

    pub fn set_collision_exit(&mut self, callback: impl FnMut(&CollisionInfo) + 'static) {
        self.callbacks.collision_exit = Some(Box::new(callback));
    }

    pub fn set_sensor_enter(
        &mut self,
        callback: impl FnMut(ColliderHandle, ColliderHandle) + 'static,
    ) {
        self.callbacks.sensor_enter = Some(Box::new(callback));
    }

    pub fn set_sensor_exit(
        &mut self,
        callback: impl FnMut(ColliderHandle, ColliderHandle) + 'static,
    ) {
        self.callbacks.sensor_exit = Some(Box::new(callback));
    }

    pub(crate) fn fire_collision_enter(&mut self, info: &CollisionInfo) {
        if let Some(callback) = self.callbacks.collision_enter.as_mut() {
            callback(info);
        }
    }

    pub(crate) fn fire_collision_exit(&mut self, info: &CollisionInfo) {
        if let Some(callback) = self.callbacks.collision_exit.as_mut() {
            callback(info);
        }
    }

    pub(crate) fn fire_sensor_enter(&mut self, this: ColliderHandle, other: ColliderHandle) {
        if let Some(callback) = self.callbacks.sensor_enter.as_mut() {
            callback(this, other);
        }
    }

    pub(crate) fn fire_sensor_exit(&mut self, this: ColliderHandle, other: ColliderHandle) {
        if let Some(callback) = self.callbacks.sensor_exit.as_mut() {
            callback(this, other);
        }
    }
}

impl fmt::Debug for Collider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collider")
            .field("shape", &self.shape)
            .field("material", &self.material)
            .field("is_sensor", &self.is_sensor)
            .field("layer", &self.layer)
            .field("transform", &self.transform)
            .field("body", &self.body)
            .field("leaf", &self.leaf)
            .field("bounds", &self.bounds)
            .field("contacts", &self.contacts.len())
            .finish_non_exhaustive()
    }
}
