//! Rigid body state and integration.

use glam::{Mat3, Quat, Vec3};

use super::arena::Handle;
use super::collider::{Collider, ColliderHandle};
use super::transform::Transform;

/// Handle to a rigid body owned by a [`PhysicsWorld`](super::PhysicsWorld).
pub type BodyHandle = Handle<RigidBody>;

/// A dynamic body. Mass and inertia are the sum of its non-sensor colliders.
///
/// The body origin is the reference point for rotation. Colliders placed
/// away from it contribute to the inertia through the parallel-axis theorem.
#[derive(Debug, Clone)]
pub struct RigidBody {
    transform: Transform,
    mass: f32,
    inv_mass: f32,
    local_inv_inertia: Mat3,
    world_inv_inertia: Mat3,
    /// Transform version `world_inv_inertia` was computed from.
    inertia_version: u64,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    force: Vec3,
    torque: Vec3,
    /// Linear damping per second (default: 0.01).
    pub linear_damping: f32,
    /// Angular damping per second (default: 0.01).
    pub angular_damping: f32,
    /// Gravity scale (default: 1.0).
    pub gravity_scale: f32,
    asleep: bool,
    sleep_time: f32,
    pub(crate) island_version: u64,
    pub(crate) colliders: Vec<ColliderHandle>,
    /// Transform version the attached colliders were last placed at.
    pub(crate) synced_version: u64,
}

impl RigidBody {
    /// Create a body at `position` with unit mass until colliders are attached.
    pub fn new(position: Vec3) -> Self {
        Self {
            transform: Transform::from_position(position),
            mass: 1.0,
            inv_mass: 1.0,
            local_inv_inertia: Mat3::IDENTITY,
            world_inv_inertia: Mat3::IDENTITY,
            inertia_version: 0,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            force: Vec3::ZERO,
            torque: Vec3::ZERO,
            linear_damping: 0.01,
            angular_damping: 0.01,
            gravity_scale: 1.0,
            asleep: false,
            sleep_time: 0.0,
            island_version: 0,
            colliders: Vec::new(),
            synced_version: 0,
        }
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.transform.set_rotation(rotation);
        self
    }

    pub fn with_linear_velocity(mut self, velocity: Vec3) -> Self {
        self.linear_velocity = velocity;
        self
    }

    pub fn with_angular_velocity(mut self, velocity: Vec3) -> Self {
        self.angular_velocity = velocity;
        self
    }

    pub fn with_damping(mut self, linear: f32, angular: f32) -> Self {
        self.linear_damping = linear;
        self.angular_damping = angular;
        self
    }

    pub fn with_gravity_scale(mut self, scale: f32) -> Self {
        self.gravity_scale = scale;
        self
    }

    #[inline]
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        self.transform.position()
    }

    #[inline]
    pub fn rotation(&self) -> Quat {
        self.transform.rotation()
    }

    /// Teleport the body. Attached colliders follow on the next step.
    pub fn set_pose(&mut self, position: Vec3, rotation: Quat) {
        self.transform.set_position_rotation(position, rotation);
        self.update_inertia();
    }

    #[inline]
    pub fn mass(&self) -> f32 {
        self.mass
    }

    #[inline]
    pub fn inv_mass(&self) -> f32 {
        self.inv_mass
    }

    /// Inverse inertia tensor in world space, as of the last refresh.
    #[inline]
    pub fn inv_inertia_world(&self) -> Mat3 {
        self.world_inv_inertia
    }

    pub fn colliders(&self) -> &[ColliderHandle] {
        &self.colliders
    }

    pub fn force(&self) -> Vec3 {
        self.force
    }

    pub fn torque(&self) -> Vec3 {
        self.torque
    }

    #[inline]
    pub fn is_asleep(&self) -> bool {
        self.asleep
    }

    /// Seconds spent continuously below the sleep thresholds.
    pub fn sleep_time(&self) -> f32 {
        self.sleep_time
    }

    /// Velocity of the material point at world position `point`.
    #[inline]
    pub fn velocity_at(&self, point: Vec3) -> Vec3 {
        self.linear_velocity + self.angular_velocity.cross(point - self.position())
    }

    /// Rebuild mass and local inertia from the attached colliders.
    pub(crate) fn recompute_mass<'a>(&mut self, colliders: impl IntoIterator<Item = &'a Collider>) {
        let mut mass = 0.0;
        let mut inertia = Mat3::ZERO;
        for collider in colliders {
            if collider.is_sensor() {
                continue;
            }
            let m = collider.material().mass;
            let rot = Mat3::from_quat(collider.local_rotation());
            let diag = Mat3::from_diagonal(collider.shape().inertia_tensor(m));
            let d = collider.local_position();
            // Parallel axis: I + m * (|d|^2 E - d d^T)
            let offset = Mat3::from_diagonal(Vec3::splat(d.length_squared()))
                - Mat3::from_cols(d * d.x, d * d.y, d * d.z);
            inertia += rot * diag * rot.transpose() + offset * m;
            mass += m;
        }

        if mass <= 0.0 {
            self.mass = 1.0;
            self.inv_mass = 1.0;
            self.local_inv_inertia = Mat3::IDENTITY;
        } else {
            self.mass = mass;
            self.inv_mass = 1.0 / mass;
            self.local_inv_inertia = if inertia.determinant().abs() > 1e-12 {
                inertia.inverse()
            } else {
                Mat3::ZERO
            };
        }
        self.inertia_version = 0;
        self.update_inertia();
    }

    /// Recompute the world inverse inertia if the rotation changed.
    pub(crate) fn update_inertia(&mut self) {
        if self.inertia_version == self.transform.version() {
            return;
        }
        let rot = Mat3::from_quat(self.transform.rotation());
        self.world_inv_inertia = rot * self.local_inv_inertia * rot.transpose();
        self.inertia_version = self.transform.version();
    }

    pub(crate) fn add_force(&mut self, force: Vec3) {
        self.force += force;
    }

    pub(crate) fn add_force_at_point(&mut self, force: Vec3, point: Vec3) {
        self.force += force;
        self.torque += (point - self.position()).cross(force);
    }

    pub(crate) fn add_torque(&mut self, torque: Vec3) {
        self.torque += torque;
    }

    /// Instantaneous change of momentum at a world point.
    #[inline]
    pub(crate) fn add_impulse(&mut self, impulse: Vec3, point: Vec3) {
        self.linear_velocity += impulse * self.inv_mass;
        self.angular_velocity += self.world_inv_inertia * (point - self.position()).cross(impulse);
    }

    /// Semi-implicit Euler velocity step: v += (g + F/m) * dt.
    pub(crate) fn integrate_forces(&mut self, gravity: Vec3, dt: f32) {
        self.linear_velocity += (gravity * self.gravity_scale + self.force * self.inv_mass) * dt;
        self.angular_velocity += self.world_inv_inertia * self.torque * dt;

        // Per-second damping, independent of the step rate.
        self.linear_velocity *= 1.0 / (1.0 + dt * self.linear_damping.max(0.0));
        self.angular_velocity *= 1.0 / (1.0 + dt * self.angular_damping.max(0.0));
    }

    /// Integrate positions: p += v * dt, q += 0.5 * omega * q * dt.
    pub(crate) fn integrate_position(&mut self, dt: f32) {
        let linear = self.linear_velocity;
        let omega = self.angular_velocity;
        if linear.length_squared() <= 1e-12 && omega.length_squared() <= 1e-10 {
            return;
        }

        let position = self.transform.position() + linear * dt;
        let mut rotation = self.transform.rotation();
        if omega.length_squared() > 1e-10 {
            let omega_quat = Quat::from_xyzw(omega.x, omega.y, omega.z, 0.0);
            let q_dot = omega_quat * rotation * 0.5;
            rotation = Quat::from_xyzw(
                rotation.x + q_dot.x * dt,
                rotation.y + q_dot.y * dt,
                rotation.z + q_dot.z * dt,
                rotation.w + q_dot.w * dt,
            );
        }
        self.transform.set_position_rotation(position, rotation);
        self.update_inertia();
    }

    pub(crate) fn clear_forces(&mut self) {
        self.force = Vec3::ZERO;
        self.torque = Vec3::ZERO;
    }

    /// Advance the rest timer. Returns the accumulated time.
    pub(crate) fn update_sleep_time(&mut self, dt: f32, linear: f32, angular: f32) -> f32 {
        if self.linear_velocity.length_squared() < linear * linear
            && self.angular_velocity.length_squared() < angular * angular
        {
            self.sleep_time += dt;
        } else {
            self.sleep_time = 0.0;
        }
        self.sleep_time
    }

    pub(crate) fn sleep(&mut self) {
        self.asleep = true;
        self.linear_velocity = Vec3::ZERO;
        self.angular_velocity = Vec3::ZERO;
        self.clear_forces();
    }

    /// Returns `true` if the body was asleep.
    pub(crate) fn wake(&mut self) -> bool {
        let was_asleep = self.asleep;
        self.asleep = false;
        self.sleep_time = 0.0;
        was_asleep
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::shape::ColliderShape;

    fn sphere_body(mass: f32) -> RigidBody {
        let collider = Collider::new(ColliderShape::Sphere { radius: 1.0 }).with_mass(mass);
        let mut body = RigidBody::new(Vec3::ZERO).with_damping(0.0, 0.0);
        body.recompute_mass([&collider]);
        body
    }

    #[test]
    fn test_gravity_integration() {
        let mut body = sphere_body(1.0);
        let dt = 1.0 / 60.0;
        body.integrate_forces(Vec3::new(0.0, -9.81, 0.0), dt);
        assert!(
            (body.linear_velocity.y - (-9.81 * dt)).abs() < 1e-5,
            "Expected vy ~ {}, got {}",
            -9.81 * dt,
            body.linear_velocity.y
        );
    }

    #[test]
    fn test_damping_independent_of_step_rate() {
        let decay = |rate: u32| {
            let mut body = sphere_body(1.0)
                .with_damping(1.0, 1.0)
                .with_linear_velocity(Vec3::X)
                .with_angular_velocity(Vec3::Y);
            let dt = 1.0 / rate as f32;
            for _ in 0..rate {
                body.integrate_forces(Vec3::ZERO, dt);
            }
            (body.linear_velocity.x, body.angular_velocity.y)
        };
        let (slow, slow_angular) = decay(50);
        let (fast, fast_angular) = decay(200);
        // Both approach exp(-1) after one second.
        assert!((slow - fast).abs() < 0.01, "50 Hz: {slow}, 200 Hz: {fast}");
        assert!((slow_angular - fast_angular).abs() < 0.01);
        assert!((fast - (-1.0f32).exp()).abs() < 0.01, "fast = {fast}");
    }

    #[test]
    fn test_position_integration() {
        let mut body = sphere_body(1.0).with_linear_velocity(Vec3::new(1.0, 0.0, 0.0));
        let v0 = body.transform().version();
        body.integrate_position(1.0);
        assert!((body.position().x - 1.0).abs() < 1e-6);
        assert!(body.transform().version() > v0);
    }

    #[test]
    fn test_mass_properties_from_colliders() {
        let body = sphere_body(5.0);
        assert!((body.mass() - 5.0).abs() < 1e-6);
        // Solid sphere I = 2/5 m r^2 = 2
        let inv = body.inv_inertia_world();
        assert!((inv.x_axis.x - 0.5).abs() < 1e-5);

        let offset = Collider::new(ColliderShape::Sphere { radius: 1.0 })
            .with_mass(1.0)
            .with_local_pose(Vec3::X * 2.0, Quat::IDENTITY);
        let mut body = RigidBody::new(Vec3::ZERO);
        body.recompute_mass([&offset]);
        let inertia = body.inv_inertia_world().inverse();
        // Moment about X is unaffected by an offset along X; Y gains m*d^2
        assert!((inertia.x_axis.x - 0.4).abs() < 1e-4);
        assert!((inertia.y_axis.y - 4.4).abs() < 1e-4);
    }

    #[test]
    fn test_impulse_at_point_spins() {
        let mut body = sphere_body(1.0);
        body.add_impulse(Vec3::Z, Vec3::X);
        assert!((body.linear_velocity - Vec3::Z).length() < 1e-6);
        // r x J = X x Z = -Y
        assert!(body.angular_velocity.y < 0.0);
    }

    #[test]
    fn test_sleep_timer() {
        let mut body = sphere_body(1.0);
        assert!((body.update_sleep_time(0.25, 0.1, 0.1) - 0.25).abs() < 1e-6);
        body.linear_velocity = Vec3::X;
        assert_eq!(body.update_sleep_time(0.25, 0.1, 0.1), 0.0);
        body.sleep();
        assert!(body.is_asleep());
        assert_eq!(body.linear_velocity, Vec3::ZERO);
        assert!(body.wake());
        assert!(!body.wake());
    }
}
