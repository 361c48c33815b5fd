//! World pose with a change counter.

use glam::{Mat4, Quat, Vec3};

/// World-space position and rotation of a body or collider.
///
/// Every mutation bumps `version`. Consumers cache derived data (collider
/// bounds, world inertia, BVH leaves) together with the version they were
/// computed from and recompute only when it differs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    position: Vec3,
    rotation: Quat,
    version: u64,
}

impl Transform {
    /// Create an identity transform.
    pub fn identity() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            version: 1,
        }
    }

    /// Create a transform from a position.
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::identity()
        }
    }

    pub fn from_position_rotation(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation: rotation.normalize(),
            version: 1,
        }
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        self.position
    }

    #[inline]
    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    /// Monotonic change counter.
    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.version += 1;
    }

    pub fn set_rotation(&mut self, rotation: Quat) {
        self.rotation = rotation.normalize();
        self.version += 1;
    }

    pub fn set_position_rotation(&mut self, position: Vec3, rotation: Quat) {
        self.position = position;
        self.rotation = rotation.normalize();
        self.version += 1;
    }

    /// Local point to world space.
    #[inline]
    pub fn transform_point(&self, local: Vec3) -> Vec3 {
        self.position + self.rotation * local
    }

    /// World point to local space.
    #[inline]
    pub fn inverse_transform_point(&self, world: Vec3) -> Vec3 {
        self.rotation.inverse() * (world - self.position)
    }

    /// Local direction to world space (rotation only).
    #[inline]
    pub fn transform_vector(&self, local: Vec3) -> Vec3 {
        self.rotation * local
    }

    #[inline]
    pub fn inverse_transform_vector(&self, world: Vec3) -> Vec3 {
        self.rotation.inverse() * world
    }

    /// Convert to a 4x4 matrix (translation * rotation).
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.position)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_bumps_on_mutation() {
        let mut t = Transform::identity();
        let v0 = t.version();
        t.set_position(Vec3::X);
        assert!(t.version() > v0);
        let v1 = t.version();
        t.set_rotation(Quat::from_rotation_y(0.5));
        assert!(t.version() > v1);
    }

    #[test]
    fn test_point_roundtrip() {
        let t = Transform::from_position_rotation(
            Vec3::new(1.0, 2.0, 3.0),
            Quat::from_rotation_z(std::f32::consts::FRAC_PI_2),
        );
        let local = Vec3::new(1.0, 0.0, 0.0);
        let world = t.transform_point(local);
        assert!((world - Vec3::new(1.0, 3.0, 3.0)).length() < 1e-5);
        assert!((t.inverse_transform_point(world) - local).length() < 1e-5);
        let m = t.to_matrix();
        assert!((m.transform_point3(local) - world).length() < 1e-5);
    }
}
