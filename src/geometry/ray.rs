use glam::Vec3;

use crate::error::{PhysicsError, PhysicsResult};

/// A half-line with a unit-length direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    /// Always normalized.
    pub direction: Vec3,
}

impl Ray {
    /// Create a ray. The direction is normalized; zero-length or non-finite
    /// directions are rejected.
    pub fn new(origin: Vec3, direction: Vec3) -> PhysicsResult<Self> {
        if !origin.is_finite() || !direction.is_finite() {
            return Err(PhysicsError::InvalidRay);
        }
        let direction = direction.try_normalize().ok_or(PhysicsError::InvalidRay)?;
        Ok(Self { origin, direction })
    }

    /// Point at distance `t` along the ray.
    #[inline]
    pub fn point_at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}
