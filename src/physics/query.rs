//! Scene queries against the broadphase tree.

use glam::Vec3;

use crate::error::{PhysicsError, PhysicsResult};
use crate::geometry::{Aabb, Ray};

use super::collider::ColliderHandle;
use super::narrowphase::PosedShape;
use super::PhysicsWorld;

/// Closest hit of a ray cast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub collider: ColliderHandle,
    /// Distance along the ray. Zero when the ray starts inside the shape.
    pub distance: f32,
    pub point: Vec3,
}

impl PhysicsWorld {
    /// Nearest collider hit by `ray` within `max_distance`.
    ///
    /// Only colliders whose layer bit is set in `layer_mask` are considered.
    /// Sensors are skipped unless `query_sensors` is set.
    pub fn ray_cast(
        &self,
        ray: &Ray,
        max_distance: f32,
        layer_mask: u32,
        query_sensors: bool,
    ) -> Option<RayHit> {
        if layer_mask == 0 || max_distance.is_nan() || max_distance < 0.0 {
            return None;
        }
        let (collider, distance) = self.bvh.ray_cast(ray, max_distance, |handle, limit| {
            let collider = self.colliders.get(handle)?;
            if collider.layer_bit() & layer_mask == 0 || (collider.is_sensor() && !query_sensors) {
                return None;
            }
            collider
                .shape()
                .ray_intersect(ray, limit, collider.transform())
        })?;
        Some(RayHit {
            collider,
            distance,
            point: ray.point_at(distance),
        })
    }

    /// Colliders whose bounds overlap `aabb`.
    pub fn query_aabb(&self, aabb: &Aabb, layer_mask: u32) -> Vec<ColliderHandle> {
        let mut found = Vec::new();
        self.bvh.query_aabb(aabb, |handle| {
            let Some(collider) = self.colliders.get(handle) else {
                return;
            };
            if collider.layer_bit() & layer_mask != 0 && collider.bounds().overlaps(aabb) {
                found.push(handle);
            }
        });
        found
    }

    /// Colliders whose shapes intersect the given collider. Colliders on the
    /// same body are excluded.
    pub fn query_collider(&self, handle: ColliderHandle) -> PhysicsResult<Vec<ColliderHandle>> {
        let collider = self
            .colliders
            .get(handle)
            .ok_or(PhysicsError::StaleColliderHandle)?;
        let posed = PosedShape::from(collider);

        let mut found = Vec::new();
        self.bvh.query_aabb(&collider.bounds(), |other_handle| {
            if other_handle == handle {
                return;
            }
            let Some(other) = self.colliders.get(other_handle) else {
                return;
            };
            if collider.body().is_some() && collider.body() == other.body() {
                return;
            }
            if !collider.bounds().overlaps(&other.bounds()) {
                return;
            }
            if self.narrowphase.intersects(&posed, &PosedShape::from(other)) {
                found.push(other_handle);
            }
        });
        Ok(found)
    }
}
