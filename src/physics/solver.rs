//! Sequential impulse constraint solver and manifold bookkeeping.

use std::collections::BTreeMap;

use glam::{Mat3, Vec3};
use tracing::trace;

use super::arena::Arena;
use super::collider::{Collider, ColliderHandle};
use super::contact::{manifold_key, Contact, ContactInfo, ContactManifold};
use super::rigid_body::{BodyHandle, RigidBody};

/// Per-step constants used by the velocity solver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverSettings {
    /// Baumgarte stabilization parameter.
    pub baumgarte_factor: f32,
    /// Penetration slop (allowed penetration before position correction).
    pub penetration_slop: f32,
    /// Approach speed below which restitution is ignored.
    pub restitution_slop: f32,
    /// Fraction of last step's impulses re-applied to persistent contacts.
    pub warm_start_ratio: f32,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            baumgarte_factor: 0.2,
            penetration_slop: 0.01,
            restitution_slop: 0.5,
            warm_start_ratio: 0.8,
        }
    }
}

/// Owns every live manifold, keyed by [`manifold_key`].
#[derive(Debug, Clone)]
pub struct ContactSolver {
    manifolds: BTreeMap<u64, ContactManifold>,
    max_iteration: usize,
    persistent_threshold_sq: f32,
}

impl Default for ContactSolver {
    fn default() -> Self {
        Self::new(15, 0.0025)
    }
}

impl ContactSolver {
    pub fn new(max_iteration: usize, persistent_threshold_sq: f32) -> Self {
        Self {
            manifolds: BTreeMap::new(),
            max_iteration,
            persistent_threshold_sq,
        }
    }

    pub fn max_iteration(&self) -> usize {
        self.max_iteration
    }

    pub fn len(&self) -> usize {
        self.manifolds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifolds.is_empty()
    }

    pub fn manifold(&self, key: u64) -> Option<&ContactManifold> {
        self.manifolds.get(&key)
    }

    pub fn manifolds(&self) -> impl Iterator<Item = &ContactManifold> {
        self.manifolds.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = u64> + '_ {
        self.manifolds.keys().copied()
    }

    pub fn clear(&mut self) {
        self.manifolds.clear();
    }

    /// Refresh persistence, then merge this step's narrowphase results.
    /// Returns the keys of manifolds created by this call.
    pub fn step(
        &mut self,
        detected: &[(ColliderHandle, ColliderHandle, ContactInfo)],
        colliders: &mut Arena<Collider>,
    ) -> Vec<u64> {
        self.update(colliders);

        let mut created = Vec::new();
        for (a, b, info) in detected {
            if self.add(*a, *b, info, colliders) {
                created.push(manifold_key(*a, *b));
            }
        }
        trace!(
            manifolds = self.manifolds.len(),
            created = created.len(),
            "contact solver step"
        );
        created
    }

    /// Reproject every manifold and erase the ones left without points.
    pub fn update(&mut self, colliders: &mut Arena<Collider>) {
        let threshold_sq = self.persistent_threshold_sq;
        let mut emptied = Vec::new();
        for (key, manifold) in self.manifolds.iter_mut() {
            let (a, b) = manifold.colliders();
            match (colliders.get(a), colliders.get(b)) {
                (Some(ca), Some(cb)) => {
                    manifold.update(ca.transform(), cb.transform(), threshold_sq);
                    if manifold.is_empty() {
                        emptied.push(*key);
                    }
                }
                _ => emptied.push(*key),
            }
        }
        for key in emptied {
            self.remove(key, colliders);
        }
    }

    /// Merge `info` into the pair's manifold, creating it if needed.
    /// Returns `true` if a new manifold was created.
    pub fn add(
        &mut self,
        a: ColliderHandle,
        b: ColliderHandle,
        info: &ContactInfo,
        colliders: &mut Arena<Collider>,
    ) -> bool {
        if info.points.is_empty() {
            return false;
        }
        let (Some(ca), Some(cb)) = (colliders.get(a), colliders.get(b)) else {
            return false;
        };

        let key = manifold_key(a, b);
        let threshold_sq = self.persistent_threshold_sq;
        if let Some(manifold) = self.manifolds.get_mut(&key) {
            // Stored orientation may be the reverse of this detection.
            if manifold.colliders().0 == a {
                manifold.add(info, ca.transform(), cb.transform(), threshold_sq);
            } else {
                let flipped = info.clone().flipped();
                manifold.add(&flipped, cb.transform(), ca.transform(), threshold_sq);
            }
            return false;
        }

        let friction = (ca.material().friction + cb.material().friction) * 0.5;
        let restitution = (ca.material().restitution + cb.material().restitution) * 0.5;
        let mut manifold = ContactManifold::new(a, b, ca.body(), cb.body(), friction, restitution);
        manifold.add(info, ca.transform(), cb.transform(), threshold_sq);
        self.manifolds.insert(key, manifold);

        for handle in [a, b] {
            if let Some(collider) = colliders.get_mut(handle) {
                collider.contacts.push(key);
            }
        }
        true
    }

    /// Erase a manifold and unlink it from both colliders.
    pub fn remove(&mut self, key: u64, colliders: &mut Arena<Collider>) -> Option<ContactManifold> {
        let manifold = self.manifolds.remove(&key)?;
        let (a, b) = manifold.colliders();
        for handle in [a, b] {
            if let Some(collider) = colliders.get_mut(handle) {
                collider.contacts.retain(|k| *k != key);
            }
        }
        Some(manifold)
    }

    /// Prepare, warm start and iterate the manifolds of one island.
    pub fn solve(
        &mut self,
        keys: &[u64],
        bodies: &mut Arena<RigidBody>,
        settings: &SolverSettings,
        dt: f32,
    ) {
        if dt <= 0.0 {
            return;
        }
        for key in keys {
            if let Some(manifold) = self.manifolds.get_mut(key) {
                prepare_manifold(manifold, bodies, settings, dt);
            }
        }
        for _ in 0..self.max_iteration {
            for key in keys {
                if let Some(manifold) = self.manifolds.get_mut(key) {
                    solve_manifold(manifold, bodies);
                }
            }
        }
    }
}

/// Copy of the body state the solver reads and writes.
#[derive(Debug, Clone, Copy)]
struct SolverBody {
    position: Vec3,
    linear_velocity: Vec3,
    angular_velocity: Vec3,
    inv_mass: f32,
    inv_inertia: Mat3,
}

impl SolverBody {
    /// Static colliders have no body and infinite mass.
    const STATIC: Self = Self {
        position: Vec3::ZERO,
        linear_velocity: Vec3::ZERO,
        angular_velocity: Vec3::ZERO,
        inv_mass: 0.0,
        inv_inertia: Mat3::ZERO,
    };

    fn load(bodies: &Arena<RigidBody>, handle: Option<BodyHandle>) -> Self {
        handle
            .and_then(|h| bodies.get(h))
            .map_or(Self::STATIC, |rb| Self {
                position: rb.position(),
                linear_velocity: rb.linear_velocity,
                angular_velocity: rb.angular_velocity,
                inv_mass: rb.inv_mass(),
                inv_inertia: rb.inv_inertia_world(),
            })
    }

    fn store(&self, bodies: &mut Arena<RigidBody>, handle: Option<BodyHandle>) {
        if let Some(rb) = handle.and_then(|h| bodies.get_mut(h)) {
            rb.linear_velocity = self.linear_velocity;
            rb.angular_velocity = self.angular_velocity;
        }
    }

    #[inline]
    fn velocity_at(&self, r: Vec3) -> Vec3 {
        self.linear_velocity + self.angular_velocity.cross(r)
    }

    #[inline]
    fn apply_impulse(&mut self, impulse: Vec3, r: Vec3) {
        self.linear_velocity += impulse * self.inv_mass;
        self.angular_velocity += self.inv_inertia * r.cross(impulse);
    }

    #[inline]
    fn effective_mass(&self, r: Vec3, direction: Vec3) -> f32 {
        let rn = r.cross(direction);
        self.inv_mass + (self.inv_inertia * rn).dot(rn)
    }
}

fn inverse_or_zero(k: f32) -> f32 {
    if k > 0.0 { 1.0 / k } else { 0.0 }
}

fn prepare_manifold(
    manifold: &mut ContactManifold,
    bodies: &mut Arena<RigidBody>,
    settings: &SolverSettings,
    dt: f32,
) {
    let mut a = SolverBody::load(bodies, manifold.body_a);
    let mut b = SolverBody::load(bodies, manifold.body_b);
    let restitution = manifold.restitution;

    for contact in &mut manifold.contacts {
        contact.r_a = contact.position_a - a.position;
        contact.r_b = contact.position_b - b.position;

        let n = contact.normal;
        contact.normal_mass =
            inverse_or_zero(a.effective_mass(contact.r_a, n) + b.effective_mass(contact.r_b, n));
        for (i, t) in contact.tangents.iter().enumerate() {
            contact.tangent_mass[i] = inverse_or_zero(
                a.effective_mass(contact.r_a, *t) + b.effective_mass(contact.r_b, *t),
            );
        }

        let vn = relative_velocity(&a, &b, contact).dot(n);
        contact.bias = settings.baumgarte_factor / dt
            * (contact.depth - settings.penetration_slop).max(0.0);
        if vn < -settings.restitution_slop {
            contact.bias -= restitution * vn;
        }

        if contact.persistent {
            contact.normal_impulse *= settings.warm_start_ratio;
            contact.tangent_impulse[0] *= settings.warm_start_ratio;
            contact.tangent_impulse[1] *= settings.warm_start_ratio;
            let impulse = n * contact.normal_impulse
                + contact.tangents[0] * contact.tangent_impulse[0]
                + contact.tangents[1] * contact.tangent_impulse[1];
            a.apply_impulse(-impulse, contact.r_a);
            b.apply_impulse(impulse, contact.r_b);
        } else {
            contact.normal_impulse = 0.0;
            contact.tangent_impulse = [0.0; 2];
        }
    }

    a.store(bodies, manifold.body_a);
    b.store(bodies, manifold.body_b);
}

#[inline]
fn relative_velocity(a: &SolverBody, b: &SolverBody, contact: &Contact) -> Vec3 {
    b.velocity_at(contact.r_b) - a.velocity_at(contact.r_a)
}

fn solve_manifold(manifold: &mut ContactManifold, bodies: &mut Arena<RigidBody>) {
    let mut a = SolverBody::load(bodies, manifold.body_a);
    let mut b = SolverBody::load(bodies, manifold.body_b);
    // Skip if both are static
    if a.inv_mass == 0.0 && b.inv_mass == 0.0 {
        return;
    }
    let friction = manifold.friction;

    for contact in &mut manifold.contacts {
        let n = contact.normal;

        // Normal impulse, accumulated and clamped to push only.
        let vn = relative_velocity(&a, &b, contact).dot(n);
        let lambda = (contact.bias - vn) * contact.normal_mass;
        let old_impulse = contact.normal_impulse;
        contact.normal_impulse = (old_impulse + lambda).max(0.0);
        let impulse = n * (contact.normal_impulse - old_impulse);
        a.apply_impulse(-impulse, contact.r_a);
        b.apply_impulse(impulse, contact.r_b);

        // Box friction: each tangent clamped to mu * normal impulse.
        let max_friction = friction * contact.normal_impulse;
        for i in 0..2 {
            let t = contact.tangents[i];
            let vt = relative_velocity(&a, &b, contact).dot(t);
            let lambda = -vt * contact.tangent_mass[i];
            let old_impulse = contact.tangent_impulse[i];
            contact.tangent_impulse[i] =
                (old_impulse + lambda).clamp(-max_friction, max_friction);
            let impulse = t * (contact.tangent_impulse[i] - old_impulse);
            a.apply_impulse(-impulse, contact.r_a);
            b.apply_impulse(impulse, contact.r_b);
        }
    }

    a.store(bodies, manifold.body_a);
    b.store(bodies, manifold.body_b);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::contact::ContactPoint;
    use crate::physics::shape::ColliderShape;

    struct Scene {
        colliders: Arena<Collider>,
        bodies: Arena<RigidBody>,
        ground: ColliderHandle,
        ball: ColliderHandle,
        body: BodyHandle,
    }

    /// Unit sphere resting 0.05 deep in a static box whose top is y = 0.
    fn scene(velocity: Vec3, restitution: f32) -> Scene {
        let mut colliders = Arena::unbounded("collider");
        let mut bodies = Arena::unbounded("rigid body");

        let ground = colliders
            .try_insert(
                Collider::new(ColliderShape::Box {
                    half_extents: Vec3::new(10.0, 0.5, 10.0),
                })
                .with_position(Vec3::new(0.0, -0.5, 0.0))
                .with_restitution(restitution),
            )
            .unwrap();

        let ball_collider = Collider::new(ColliderShape::Sphere { radius: 1.0 })
            .with_restitution(restitution)
            .with_position(Vec3::new(0.0, 0.95, 0.0));
        let mut rb = RigidBody::new(Vec3::new(0.0, 0.95, 0.0)).with_linear_velocity(velocity);
        rb.recompute_mass([&ball_collider]);
        let body = bodies.try_insert(rb).unwrap();
        let ball = colliders.try_insert(ball_collider).unwrap();
        colliders.get_mut(ball).unwrap().body = Some(body);

        Scene {
            colliders,
            bodies,
            ground,
            ball,
            body,
        }
    }

    /// Ground is A, ball is B; normal points up.
    fn touching_info() -> ContactInfo {
        ContactInfo {
            normal: Vec3::Y,
            points: vec![ContactPoint {
                position_a: Vec3::ZERO,
                position_b: Vec3::new(0.0, -0.05, 0.0),
                depth: 0.05,
            }],
        }
    }

    #[test]
    fn test_step_creates_and_links_manifold() {
        let mut s = scene(Vec3::ZERO, 0.0);
        let mut solver = ContactSolver::default();
        let created = solver.step(&[(s.ground, s.ball, touching_info())], &mut s.colliders);
        let key = manifold_key(s.ground, s.ball);
        assert_eq!(created, vec![key]);
        assert_eq!(s.colliders[s.ground].contact_keys(), &[key]);
        assert_eq!(s.colliders[s.ball].contact_keys(), &[key]);

        // Same detection again merges instead of creating.
        let created = solver.step(&[(s.ground, s.ball, touching_info())], &mut s.colliders);
        assert!(created.is_empty());
        assert_eq!(solver.len(), 1);
        assert_eq!(solver.manifold(key).unwrap().len(), 1);
        assert!(solver.manifold(key).unwrap().contacts()[0].persistent);
    }

    #[test]
    fn test_reversed_detection_merges() {
        let mut s = scene(Vec3::ZERO, 0.0);
        let mut solver = ContactSolver::default();
        solver.step(&[(s.ground, s.ball, touching_info())], &mut s.colliders);
        solver.step(
            &[(s.ball, s.ground, touching_info().flipped())],
            &mut s.colliders,
        );
        let manifold = solver.manifold(manifold_key(s.ground, s.ball)).unwrap();
        assert_eq!(manifold.len(), 1);
        assert!((manifold.normal() - Vec3::Y).length() < 1e-6);
    }

    #[test]
    fn test_separated_manifold_is_erased_and_unlinked() {
        let mut s = scene(Vec3::ZERO, 0.0);
        let mut solver = ContactSolver::default();
        solver.step(&[(s.ground, s.ball, touching_info())], &mut s.colliders);

        s.colliders
            .get_mut(s.ball)
            .unwrap()
            .set_world_pose(Vec3::new(0.0, 2.0, 0.0), glam::Quat::IDENTITY);
        solver.step(&[], &mut s.colliders);
        assert!(solver.is_empty());
        assert!(s.colliders[s.ground].contact_keys().is_empty());
        assert!(s.colliders[s.ball].contact_keys().is_empty());
    }

    #[test]
    fn test_solver_stops_approach() {
        let mut s = scene(Vec3::new(0.0, -2.0, 0.0), 0.0);
        let mut solver = ContactSolver::default();
        solver.step(&[(s.ground, s.ball, touching_info())], &mut s.colliders);
        let keys: Vec<u64> = solver.keys().collect();
        solver.solve(&keys, &mut s.bodies, &SolverSettings::default(), 1.0 / 50.0);

        let v = s.bodies[s.body].linear_velocity;
        assert!(v.y >= -1e-4, "still approaching: {v:?}");
        // Only the Baumgarte bias remains: 0.2 * 50 * (0.05 - 0.01) = 0.4
        assert!(v.y < 0.45, "overshoot: {v:?}");
        let contact = solver.manifold(keys[0]).unwrap().contacts()[0];
        assert!(contact.normal_impulse > 0.0);
    }

    #[test]
    fn test_restitution_bounces() {
        let mut s = scene(Vec3::new(0.0, -4.0, 0.0), 1.0);
        let mut solver = ContactSolver::default();
        solver.step(&[(s.ground, s.ball, touching_info())], &mut s.colliders);
        let keys: Vec<u64> = solver.keys().collect();
        solver.solve(&keys, &mut s.bodies, &SolverSettings::default(), 1.0 / 50.0);
        let v = s.bodies[s.body].linear_velocity;
        assert!(v.y > 3.9, "expected a bounce, got {v:?}");
    }

    #[test]
    fn test_friction_is_bounded() {
        let mut s = scene(Vec3::new(5.0, -1.0, 0.0), 0.0);
        let mut solver = ContactSolver::default();
        solver.step(&[(s.ground, s.ball, touching_info())], &mut s.colliders);
        let keys: Vec<u64> = solver.keys().collect();
        solver.solve(&keys, &mut s.bodies, &SolverSettings::default(), 1.0 / 50.0);

        let contact = solver.manifold(keys[0]).unwrap().contacts()[0];
        let bound = 0.5 * contact.normal_impulse + 1e-5;
        assert!(contact.tangent_impulse.iter().all(|t| t.abs() <= bound));
        let v = s.bodies[s.body].linear_velocity;
        assert!(v.x < 5.0 && v.x > 0.0, "friction should slow, not reverse: {v:?}");
    }
}
