//! Expanding Polytope Algorithm: penetration depth from a GJK tetrahedron.

use glam::Vec3;
use tracing::trace;

use crate::geometry::Triangle;

use super::contact::{ContactInfo, ContactPoint};
use super::narrowphase::{PosedShape, Simplex, SupportPoint};

/// Polytope face limit. Growing past it is treated as a failed contact.
const MAX_FACES: usize = 256;
const MAX_VERTICES: usize = 128;

#[derive(Debug, Clone, Copy)]
struct Face {
    vertices: [usize; 3],
    normal: Vec3,
    distance: f32,
}

impl Face {
    /// Build a face whose normal points away from `interior`. `None` for
    /// degenerate triangles.
    fn new(points: &[SupportPoint], [i, j, k]: [usize; 3], interior: Vec3) -> Option<Self> {
        let a = points[i].point;
        let normal = (points[j].point - a).cross(points[k].point - a);
        let len = normal.length();
        if len < 1e-10 {
            return None;
        }
        let mut normal = normal / len;
        let mut vertices = [i, j, k];
        if normal.dot(a - interior) < 0.0 {
            normal = -normal;
            vertices.swap(1, 2);
        }
        Some(Self {
            vertices,
            normal,
            distance: normal.dot(a),
        })
    }
}

/// EPA solver settings.
#[derive(Debug, Clone, Copy)]
pub struct Epa {
    /// Stop once a new support point extends the polytope by less than this.
    pub grow_threshold: f32,
    pub max_iterations: usize,
}

impl Default for Epa {
    fn default() -> Self {
        Self {
            grow_threshold: 1e-4,
            max_iterations: 64,
        }
    }
}

impl Epa {
    pub fn new(grow_threshold: f32, max_iterations: usize) -> Self {
        Self {
            grow_threshold,
            max_iterations,
        }
    }

    /// Expand the GJK tetrahedron to the face of `A - B` nearest the origin.
    ///
    /// Returns a single contact point with the normal pointing from A to B.
    /// Degenerate input, NaN barycentrics and polytope overflow yield `None`.
    /// Running out of iterations returns the best face found so far.
    pub fn solve(&self, simplex: &Simplex, a: &PosedShape, b: &PosedShape) -> Option<ContactInfo> {
        if simplex.len() != 4 {
            return None;
        }

        let mut points: Vec<SupportPoint> = Vec::with_capacity(MAX_VERTICES);
        points.extend_from_slice(simplex.points());
        let interior = points.iter().map(|p| p.point).sum::<Vec3>() * 0.25;

        let mut faces: Vec<Face> = Vec::with_capacity(MAX_FACES);
        for indices in [[0, 1, 2], [0, 3, 1], [0, 2, 3], [1, 3, 2]] {
            faces.push(Face::new(&points, indices, interior)?);
        }

        let mut edges: Vec<[usize; 2]> = Vec::new();
        for _ in 0..self.max_iterations {
            let closest = *faces
                .iter()
                .min_by(|x, y| x.distance.total_cmp(&y.distance))?;

            let support = SupportPoint::new(a, b, closest.normal);
            if support.point.dot(closest.normal) - closest.distance < self.grow_threshold {
                return contact_from_face(&points, &closest);
            }
            if points.len() >= MAX_VERTICES {
                trace!(vertices = points.len(), "EPA vertex limit reached");
                return None;
            }

            let new_index = points.len();
            points.push(support);

            edges.clear();
            faces.retain(|face| {
                let visible = face.normal.dot(support.point - points[face.vertices[0]].point) > 0.0;
                if visible {
                    let [i, j, k] = face.vertices;
                    add_edge(&mut edges, i, j);
                    add_edge(&mut edges, j, k);
                    add_edge(&mut edges, k, i);
                }
                !visible
            });

            for &[i, j] in &edges {
                match Face::new(&points, [i, j, new_index], interior) {
                    Some(face) => faces.push(face),
                    None => {
                        trace!("EPA produced a degenerate face");
                        return None;
                    }
                }
            }
            if faces.len() > MAX_FACES {
                trace!(faces = faces.len(), "EPA face limit reached");
                return None;
            }
        }

        let closest = faces
            .iter()
            .min_by(|x, y| x.distance.total_cmp(&y.distance))?;
        contact_from_face(&points, closest)
    }
}

/// Horizon bookkeeping: an edge shared by two removed faces cancels out.
fn add_edge(edges: &mut Vec<[usize; 2]>, a: usize, b: usize) {
    if let Some(pos) = edges.iter().position(|e| e[0] == b && e[1] == a) {
        edges.swap_remove(pos);
    } else {
        edges.push([a, b]);
    }
}

fn contact_from_face(points: &[SupportPoint], face: &Face) -> Option<ContactInfo> {
    let [i, j, k] = face.vertices;
    let (p0, p1, p2) = (points[i], points[j], points[k]);
    let projection = face.normal * face.distance;
    let bary = Triangle::new(p0.point, p1.point, p2.point).barycentric(projection);
    if !bary.is_finite() {
        trace!("EPA closest face has degenerate barycentric coordinates");
        return None;
    }

    let position_a = p0.a * bary.x + p1.a * bary.y + p2.a * bary.z;
    let position_b = p0.b * bary.x + p1.b * bary.y + p2.b * bary.z;
    Some(ContactInfo {
        normal: face.normal,
        points: vec![ContactPoint {
            position_a,
            position_b,
            depth: face.distance.max(0.0),
        }],
    })
}
