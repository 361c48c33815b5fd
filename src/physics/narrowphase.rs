//! Narrowphase collision detection: GJK, EPA, and specialized tests.

use glam::Vec3;
use tracing::trace;

use crate::geometry::Plane;

use super::collider::Collider;
use super::contact::{ContactInfo, ContactPoint};
use super::epa::Epa;
use super::shape::ColliderShape;
use super::transform::Transform;

const DIRECTION_EPSILON: f32 = 1e-10;
const DUPLICATE_EPSILON: f32 = 1e-10;

/// A shape placed in the world.
#[derive(Debug, Clone, Copy)]
pub struct PosedShape<'a> {
    pub shape: &'a ColliderShape,
    pub transform: &'a Transform,
}

impl<'a> PosedShape<'a> {
    pub fn new(shape: &'a ColliderShape, transform: &'a Transform) -> Self {
        Self { shape, transform }
    }

    #[inline]
    pub fn support(&self, direction: Vec3) -> Vec3 {
        self.shape.support(direction, self.transform)
    }
}

impl<'a> From<&'a Collider> for PosedShape<'a> {
    fn from(collider: &'a Collider) -> Self {
        Self::new(collider.shape(), collider.transform())
    }
}

/// A vertex of the Minkowski difference `A - B`, with the two shape points
/// that produced it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SupportPoint {
    pub point: Vec3,
    pub a: Vec3,
    pub b: Vec3,
}

impl SupportPoint {
    pub fn new(a: &PosedShape, b: &PosedShape, direction: Vec3) -> Self {
        let pa = a.support(direction);
        let pb = b.support(-direction);
        Self {
            point: pa - pb,
            a: pa,
            b: pb,
        }
    }
}

/// A simplex used by the GJK algorithm (up to 4 vertices in 3D).
///
/// The most recently added vertex is always last.
#[derive(Debug, Clone, Copy, Default)]
pub struct Simplex {
    points: [SupportPoint; 4],
    len: usize,
}

impl Simplex {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn points(&self) -> &[SupportPoint] {
        &self.points[..self.len]
    }

    fn push(&mut self, point: SupportPoint) {
        debug_assert!(self.len < 4, "simplex overflow");
        self.points[self.len] = point;
        self.len += 1;
    }

    fn set(&mut self, points: &[SupportPoint]) {
        self.points[..points.len()].copy_from_slice(points);
        self.len = points.len();
    }

    fn contains(&self, point: Vec3) -> bool {
        self.points()
            .iter()
            .any(|p| p.point.distance_squared(point) < DUPLICATE_EPSILON)
    }

    /// Reduce the simplex to the feature closest to the origin and pick the
    /// next search direction. Returns `true` once a tetrahedron encloses the
    /// origin.
    fn update(&mut self, direction: &mut Vec3) -> bool {
        match self.len {
            2 => self.line(direction),
            3 => self.triangle(direction),
            4 => self.tetrahedron(direction),
            _ => false,
        }
    }

    fn line(&mut self, direction: &mut Vec3) -> bool {
        let (a, b) = (self.points[1], self.points[0]);
        let ab = b.point - a.point;
        let ao = -a.point;

        if ab.dot(ao) > 0.0 {
            *direction = triple_cross_product(ab, ao, ab);
        } else {
            self.set(&[a]);
            *direction = ao;
        }
        false
    }

    fn triangle(&mut self, direction: &mut Vec3) -> bool {
        let (a, b, c) = (self.points[2], self.points[1], self.points[0]);
        let ab = b.point - a.point;
        let ac = c.point - a.point;
        let ao = -a.point;
        let abc = ab.cross(ac);

        if abc.cross(ac).dot(ao) > 0.0 {
            if ac.dot(ao) > 0.0 {
                self.set(&[c, a]);
                *direction = triple_cross_product(ac, ao, ac);
            } else {
                self.set(&[b, a]);
                return self.line(direction);
            }
        } else if ab.cross(abc).dot(ao) > 0.0 {
            self.set(&[b, a]);
            return self.line(direction);
        } else if abc.dot(ao) > 0.0 {
            *direction = abc;
        } else {
            // Keep the winding so that the next normal faces the origin.
            self.set(&[b, c, a]);
            *direction = -abc;
        }
        false
    }

    fn tetrahedron(&mut self, direction: &mut Vec3) -> bool {
        let (a, b, c, d) = (self.points[3], self.points[2], self.points[1], self.points[0]);
        let ab = b.point - a.point;
        let ac = c.point - a.point;
        let ad = d.point - a.point;
        let ao = -a.point;

        if ab.cross(ac).dot(ao) > 0.0 {
            self.set(&[c, b, a]);
            return self.triangle(direction);
        }
        if ac.cross(ad).dot(ao) > 0.0 {
            self.set(&[d, c, a]);
            return self.triangle(direction);
        }
        if ad.cross(ab).dot(ao) > 0.0 {
            self.set(&[b, d, a]);
            return self.triangle(direction);
        }
        true
    }
}

#[inline]
fn triple_cross_product(a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    a.cross(b).cross(c)
}

/// Gilbert-Johnson-Keerthi intersection test.
#[derive(Debug, Clone, Copy)]
pub struct Gjk {
    pub max_iterations: usize,
}

impl Default for Gjk {
    fn default() -> Self {
        Self { max_iterations: 64 }
    }
}

impl Gjk {
    pub fn new(max_iterations: usize) -> Self {
        Self { max_iterations }
    }

    /// Returns the terminal tetrahedron if the shapes intersect.
    pub fn intersect(&self, a: &PosedShape, b: &PosedShape) -> Option<Simplex> {
        let mut direction = a.transform.position() - b.transform.position();
        if direction.length_squared() < DIRECTION_EPSILON {
            direction = Vec3::X;
        }

        let mut simplex = Simplex::default();
        let first = SupportPoint::new(a, b, direction);
        simplex.push(first);
        direction = -first.point;

        for _ in 0..self.max_iterations {
            let next = if direction.length_squared() < DIRECTION_EPSILON {
                // The origin lies on the current simplex.
                promote(&simplex, a, b)?
            } else {
                let next = SupportPoint::new(a, b, direction);
                if next.point.dot(direction) <= 0.0 || simplex.contains(next.point) {
                    return None;
                }
                next
            };
            simplex.push(next);
            if simplex.update(&mut direction) {
                return Some(simplex);
            }
        }
        None
    }
}

/// Find a support point that grows a degenerate simplex by one dimension.
/// Fails when the origin sits on the boundary of the Minkowski difference,
/// which means the shapes are only touching.
fn promote(simplex: &Simplex, a: &PosedShape, b: &PosedShape) -> Option<SupportPoint> {
    let points = simplex.points();
    let mut candidates = [Vec3::ZERO; 6];
    let count = match points {
        [_] => {
            candidates = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z];
            6
        }
        [p, q] => {
            let edge = q.point - p.point;
            let u = edge.any_orthonormal_vector();
            let v = edge.cross(u).normalize_or_zero();
            candidates[..4].copy_from_slice(&[u, -u, v, -v]);
            4
        }
        [p, q, r] => {
            let normal = (q.point - p.point).cross(r.point - p.point).normalize_or_zero();
            candidates[..2].copy_from_slice(&[normal, -normal]);
            2
        }
        _ => 0,
    };

    candidates[..count]
        .iter()
        .filter(|d| d.length_squared() > DIRECTION_EPSILON)
        .map(|&d| (d, SupportPoint::new(a, b, d)))
        .find(|(d, s)| s.point.dot(*d) > 1e-6 && !simplex.contains(s.point))
        .map(|(_, s)| s)
}

/// Full contact generation for a shape pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct NarrowPhase {
    pub gjk: Gjk,
    pub epa: Epa,
}

impl NarrowPhase {
    pub fn new(gjk: Gjk, epa: Epa) -> Self {
        Self { gjk, epa }
    }

    /// Boolean overlap test.
    pub fn intersects(&self, a: &PosedShape, b: &PosedShape) -> bool {
        if let (ColliderShape::Sphere { radius: ra }, ColliderShape::Sphere { radius: rb }) =
            (a.shape, b.shape)
        {
            let r = ra + rb;
            return a.transform.position().distance_squared(b.transform.position()) < r * r;
        }
        self.gjk.intersect(a, b).is_some()
    }

    /// Contact normal (A to B), depth and points, or `None` when the shapes
    /// are separated or the contact could not be resolved this step.
    pub fn detect(&self, a: &PosedShape, b: &PosedShape) -> Option<ContactInfo> {
        match (a.shape, b.shape) {
            (ColliderShape::Sphere { radius: ra }, ColliderShape::Sphere { radius: rb }) => {
                sphere_sphere(a.transform.position(), *ra, b.transform.position(), *rb)
            }
            (
                ColliderShape::Box { half_extents: ha },
                ColliderShape::Box { half_extents: hb },
            ) => {
                let info = self.detect_general(a, b)?;
                let points = box_box_points(a.transform, *ha, b.transform, *hb, info.normal);
                match points {
                    Some(clipped) if !clipped.points.is_empty() => Some(clipped),
                    _ => Some(info),
                }
            }
            _ => self.detect_general(a, b),
        }
    }

    fn detect_general(&self, a: &PosedShape, b: &PosedShape) -> Option<ContactInfo> {
        let simplex = self.gjk.intersect(a, b)?;
        let info = self.epa.solve(&simplex, a, b);
        if info.is_none() {
            trace!("EPA failed to resolve an intersecting pair");
        }
        info
    }
}

/// Exact sphere-sphere contact.
pub fn sphere_sphere(center_a: Vec3, radius_a: f32, center_b: Vec3, radius_b: f32) -> Option<ContactInfo> {
    let diff = center_b - center_a;
    let dist_sq = diff.length_squared();
    let radius_sum = radius_a + radius_b;
    if dist_sq >= radius_sum * radius_sum {
        return None;
    }

    let dist = dist_sq.sqrt();
    let normal = if dist > 1e-6 { diff / dist } else { Vec3::Y };
    Some(ContactInfo {
        normal,
        points: vec![ContactPoint {
            position_a: center_a + normal * radius_a,
            position_b: center_b - normal * radius_b,
            depth: radius_sum - dist,
        }],
    })
}

/// Face contact between two boxes. Returns `None` when the normal is closer
/// to an edge-edge configuration than to any face.
fn box_box_points(
    ta: &Transform,
    half_a: Vec3,
    tb: &Transform,
    half_b: Vec3,
    normal: Vec3,
) -> Option<ContactInfo> {
    let box_a = OrientedBox::new(ta, half_a);
    let box_b = OrientedBox::new(tb, half_b);
    let (axis_a, align_a) = box_a.best_axis(normal);
    let (axis_b, align_b) = box_b.best_axis(normal);
    if align_a.max(align_b) < 0.7 {
        return None;
    }

    if align_b > align_a + 1e-3 {
        Some(clip_incident_face(&box_b, axis_b, &box_a, -normal).flipped())
    } else {
        Some(clip_incident_face(&box_a, axis_a, &box_b, normal))
    }
}

struct OrientedBox {
    center: Vec3,
    axes: [Vec3; 3],
    half: [f32; 3],
}

impl OrientedBox {
    fn new(transform: &Transform, half_extents: Vec3) -> Self {
        let rot = transform.rotation();
        Self {
            center: transform.position(),
            axes: [rot * Vec3::X, rot * Vec3::Y, rot * Vec3::Z],
            half: half_extents.to_array(),
        }
    }

    /// Axis index most aligned with `direction`, and the absolute alignment.
    fn best_axis(&self, direction: Vec3) -> (usize, f32) {
        let mut best = (0, f32::MIN);
        for (i, axis) in self.axes.iter().enumerate() {
            let align = axis.dot(direction).abs();
            if align > best.1 {
                best = (i, align);
            }
        }
        best
    }

    /// Outward face normal along `axis` on the side facing `direction`.
    fn face_normal(&self, axis: usize, direction: Vec3) -> Vec3 {
        let n = self.axes[axis];
        if n.dot(direction) >= 0.0 { n } else { -n }
    }
}

/// Clip the incident box face against the reference face's side planes.
/// `normal` points from the reference box to the incident box.
fn clip_incident_face(
    reference: &OrientedBox,
    ref_axis: usize,
    incident: &OrientedBox,
    normal: Vec3,
) -> ContactInfo {
    let ref_normal = reference.face_normal(ref_axis, normal);
    let ref_face = Plane::from_point_normal(
        reference.center + ref_normal * reference.half[ref_axis],
        ref_normal,
    );

    // Incident face is the one most anti-parallel to the reference normal.
    let (inc_axis, _) = incident.best_axis(ref_normal);
    let inc_normal = incident.face_normal(inc_axis, -ref_normal);
    let inc_center = incident.center + inc_normal * incident.half[inc_axis];
    let u = incident.axes[(inc_axis + 1) % 3] * incident.half[(inc_axis + 1) % 3];
    let v = incident.axes[(inc_axis + 2) % 3] * incident.half[(inc_axis + 2) % 3];
    let mut polygon = vec![
        inc_center + u + v,
        inc_center - u + v,
        inc_center - u - v,
        inc_center + u - v,
    ];

    for side in [(ref_axis + 1) % 3, (ref_axis + 2) % 3] {
        let axis = reference.axes[side];
        let extent = reference.half[side];
        for sign in [1.0, -1.0] {
            let plane = Plane::from_point_normal(reference.center + axis * (extent * sign), axis * sign);
            polygon = clip_polygon(&polygon, &plane);
            if polygon.is_empty() {
                break;
            }
        }
    }

    let points = polygon
        .into_iter()
        .filter_map(|p| {
            let s = ref_face.signed_distance(p);
            (s <= 0.0).then(|| ContactPoint {
                position_a: p - ref_normal * s,
                position_b: p,
                depth: -s,
            })
        })
        .collect();

    ContactInfo {
        normal: ref_normal,
        points,
    }
}

/// Sutherland-Hodgman: keep the part of `polygon` behind `plane`.
fn clip_polygon(polygon: &[Vec3], plane: &Plane) -> Vec<Vec3> {
    let mut out = Vec::with_capacity(polygon.len() + 4);
    let Some(&last) = polygon.last() else {
        return out;
    };
    let mut prev = last;
    let mut prev_dist = plane.signed_distance(prev);
    for &current in polygon {
        let dist = plane.signed_distance(current);
        if dist <= 0.0 {
            if prev_dist > 0.0 {
                out.push(prev + (current - prev) * (prev_dist / (prev_dist - dist)));
            }
            out.push(current);
        } else if prev_dist <= 0.0 {
            out.push(prev + (current - prev) * (prev_dist / (prev_dist - dist)));
        }
        prev = current;
        prev_dist = dist;
    }
    out
}
