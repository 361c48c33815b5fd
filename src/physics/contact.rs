//! Contact data structures and persistent manifolds.

use glam::Vec3;

use crate::geometry::{LineSegment, Triangle};

use super::collider::ColliderHandle;
use super::rigid_body::BodyHandle;
use super::transform::Transform;

/// Maximum number of points a manifold keeps after reduction.
pub const MAX_MANIFOLD_POINTS: usize = 4;

/// One witness pair produced by the narrowphase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactPoint {
    /// Deepest point of shape A inside shape B, in world space.
    pub position_a: Vec3,
    /// Deepest point of shape B inside shape A, in world space.
    pub position_b: Vec3,
    /// Penetration depth, `(position_a - position_b) . normal`.
    pub depth: f32,
}

/// Narrowphase result for one shape pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactInfo {
    /// Contact normal (from shape A to shape B).
    pub normal: Vec3,
    pub points: Vec<ContactPoint>,
}

impl ContactInfo {
    /// Depth of the deepest point.
    pub fn max_depth(&self) -> f32 {
        self.points.iter().map(|p| p.depth).fold(0.0, f32::max)
    }

    /// Swap the roles of A and B.
    pub fn flipped(mut self) -> Self {
        self.normal = -self.normal;
        for point in &mut self.points {
            std::mem::swap(&mut point.position_a, &mut point.position_b);
        }
        self
    }
}

/// Key of the manifold between two colliders, independent of their order.
///
/// Only slot indices are encoded, not generations. Every manifold and pair
/// entry of a collider must be dropped when it is removed, before its slot
/// can be reused.
#[inline]
pub fn manifold_key(a: ColliderHandle, b: ColliderHandle) -> u64 {
    let (lo, hi) = if a.index() < b.index() {
        (a.index(), b.index())
    } else {
        (b.index(), a.index())
    };
    lo as u64 | (hi as u64) << 32
}

/// A single persistent contact point with accumulated impulse data.
#[derive(Debug, Clone, Copy)]
pub struct Contact {
    /// Current world position on A's surface.
    pub position_a: Vec3,
    /// Current world position on B's surface.
    pub position_b: Vec3,
    /// World positions when the point was detected.
    origin_a: Vec3,
    origin_b: Vec3,
    /// Positions in each collider's local frame.
    local_a: Vec3,
    local_b: Vec3,
    /// Contact normal (from A to B).
    pub normal: Vec3,
    /// Friction directions spanning the contact plane.
    pub tangents: [Vec3; 2],
    pub depth: f32,
    /// Accumulated normal impulse.
    pub normal_impulse: f32,
    /// Accumulated tangent impulses (two friction directions).
    pub tangent_impulse: [f32; 2],
    /// Survived at least one update, so its impulses may be warm started.
    pub persistent: bool,
    id: u32,
    // Solver scratch, filled by `prepare` every step.
    pub(crate) r_a: Vec3,
    pub(crate) r_b: Vec3,
    pub(crate) normal_mass: f32,
    pub(crate) tangent_mass: [f32; 2],
    pub(crate) bias: f32,
}

impl Contact {
    fn new(id: u32, point: &ContactPoint, normal: Vec3, ta: &Transform, tb: &Transform) -> Self {
        let (t1, t2) = normal.any_orthonormal_pair();
        Self {
            position_a: point.position_a,
            position_b: point.position_b,
            origin_a: point.position_a,
            origin_b: point.position_b,
            local_a: ta.inverse_transform_point(point.position_a),
            local_b: tb.inverse_transform_point(point.position_b),
            normal,
            tangents: [t1, t2],
            depth: point.depth,
            normal_impulse: 0.0,
            tangent_impulse: [0.0; 2],
            persistent: false,
            id,
            r_a: Vec3::ZERO,
            r_b: Vec3::ZERO,
            normal_mass: 0.0,
            tangent_mass: [0.0; 2],
            bias: 0.0,
        }
    }

    /// Replace the geometry with a fresh detection, keeping impulses.
    fn refresh(&mut self, point: &ContactPoint, normal: Vec3, ta: &Transform, tb: &Transform) {
        let fresh = Self::new(self.id, point, normal, ta, tb);
        *self = Self {
            normal_impulse: self.normal_impulse,
            tangent_impulse: self.tangent_impulse,
            persistent: true,
            ..fresh
        };
    }

    /// Stable identifier within its manifold.
    pub fn id(&self) -> u32 {
        self.id
    }
}

/// Up to four contact points between an unordered collider pair.
#[derive(Debug, Clone)]
pub struct ContactManifold {
    collider_a: ColliderHandle,
    collider_b: ColliderHandle,
    pub(crate) body_a: Option<BodyHandle>,
    pub(crate) body_b: Option<BodyHandle>,
    pub(crate) contacts: Vec<Contact>,
    /// Combined friction coefficient.
    pub friction: f32,
    /// Combined restitution coefficient.
    pub restitution: f32,
    next_id: u32,
}

impl ContactManifold {
    pub fn new(
        collider_a: ColliderHandle,
        collider_b: ColliderHandle,
        body_a: Option<BodyHandle>,
        body_b: Option<BodyHandle>,
        friction: f32,
        restitution: f32,
    ) -> Self {
        Self {
            collider_a,
            collider_b,
            body_a,
            body_b,
            contacts: Vec::with_capacity(MAX_MANIFOLD_POINTS + 1),
            friction,
            restitution,
            next_id: 0,
        }
    }

    #[inline]
    pub fn key(&self) -> u64 {
        manifold_key(self.collider_a, self.collider_b)
    }

    pub fn colliders(&self) -> (ColliderHandle, ColliderHandle) {
        (self.collider_a, self.collider_b)
    }

    pub fn bodies(&self) -> (Option<BodyHandle>, Option<BodyHandle>) {
        (self.body_a, self.body_b)
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Average normal of the points, for event reporting.
    pub fn normal(&self) -> Vec3 {
        self.contacts
            .iter()
            .map(|c| c.normal)
            .sum::<Vec3>()
            .normalize_or_zero()
    }

    /// Reproject cached local points with the colliders' current transforms
    /// and drop the points that separated or drifted farther than
    /// `sqrt(threshold_sq)` from where they were detected. Survivors become
    /// persistent.
    pub fn update(&mut self, ta: &Transform, tb: &Transform, threshold_sq: f32) {
        self.contacts.retain_mut(|contact| {
            let world_a = ta.transform_point(contact.local_a);
            let world_b = tb.transform_point(contact.local_b);
            let depth = (world_a - world_b).dot(contact.normal);
            if depth < 0.0
                || world_a.distance_squared(contact.origin_a) > threshold_sq
                || world_b.distance_squared(contact.origin_b) > threshold_sq
            {
                return false;
            }
            contact.position_a = world_a;
            contact.position_b = world_b;
            contact.depth = depth;
            contact.persistent = true;
            true
        });
    }

    /// Merge narrowphase points. A point within `sqrt(threshold_sq)` of an
    /// existing one replaces its geometry and inherits its impulses.
    /// Excess points are reduced to four.
    pub fn add(&mut self, info: &ContactInfo, ta: &Transform, tb: &Transform, threshold_sq: f32) {
        for point in &info.points {
            let existing = self.contacts.iter().position(|c| {
                c.position_a.distance_squared(point.position_a) < threshold_sq
                    || c.position_b.distance_squared(point.position_b) < threshold_sq
            });
            match existing {
                Some(index) => self.contacts[index].refresh(point, info.normal, ta, tb),
                None => {
                    let id = self.next_id;
                    self.next_id = self.next_id.wrapping_add(1);
                    self.contacts
                        .push(Contact::new(id, point, info.normal, ta, tb));
                }
            }
        }
        if self.contacts.len() > MAX_MANIFOLD_POINTS {
            self.discard();
        }
    }

    /// Reduce to four points: the deepest, the one furthest from it, the one
    /// furthest from their line, and the one furthest from that triangle.
    /// Selection works on contact ids so removals cannot shift it.
    fn discard(&mut self) {
        let mut keep: Vec<u32> = Vec::with_capacity(MAX_MANIFOLD_POINTS);

        let deepest = self
            .contacts
            .iter()
            .max_by(|a, b| a.depth.abs().total_cmp(&b.depth.abs()));
        let Some(deepest) = deepest else {
            return;
        };
        keep.push(deepest.id);
        let p0 = deepest.position_a;

        let pick = |keep: &[u32], score: &dyn Fn(Vec3) -> f32| -> Option<(u32, Vec3)> {
            self.contacts
                .iter()
                .filter(|c| !keep.contains(&c.id))
                .map(|c| (c.id, c.position_a, score(c.position_a)))
                .max_by(|a, b| a.2.total_cmp(&b.2))
                .map(|(id, p, _)| (id, p))
        };

        let Some((id1, p1)) = pick(&keep, &|p| p.distance_squared(p0)) else {
            return;
        };
        keep.push(id1);

        let line = LineSegment::new(p0, p1);
        let Some((id2, p2)) = pick(&keep, &|p| line.distance_sq(p)) else {
            return;
        };
        keep.push(id2);

        let triangle = Triangle::new(p0, p1, p2);
        if let Some((id3, _)) = pick(&keep, &|p| triangle.closest_point(p).distance_squared(p)) {
            keep.push(id3);
        }

        self.contacts.retain(|c| keep.contains(&c.id));
    }
}
