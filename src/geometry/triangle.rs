use glam::Vec3;

use super::Ray;

/// Triangle with counter-clockwise winding (normal follows the right-hand rule).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub a: Vec3,
    pub b: Vec3,
    pub c: Vec3,
}

impl Triangle {
    pub fn new(a: Vec3, b: Vec3, c: Vec3) -> Self {
        Self { a, b, c }
    }

    /// Unit normal, or zero for degenerate triangles.
    pub fn normal(&self) -> Vec3 {
        (self.b - self.a).cross(self.c - self.a).normalize_or_zero()
    }

    /// Barycentric coordinates `(u, v, w)` of `p` projected onto the triangle
    /// plane, with `p ≈ u*a + v*b + w*c`. Degenerate triangles yield NaN,
    /// which callers must check for.
    pub fn barycentric(&self, p: Vec3) -> Vec3 {
        let v0 = self.b - self.a;
        let v1 = self.c - self.a;
        let v2 = p - self.a;
        let d00 = v0.dot(v0);
        let d01 = v0.dot(v1);
        let d11 = v1.dot(v1);
        let d20 = v2.dot(v0);
        let d21 = v2.dot(v1);
        let denom = d00 * d11 - d01 * d01;
        if denom.abs() < 1e-12 {
            return Vec3::NAN;
        }
        let v = (d11 * d20 - d01 * d21) / denom;
        let w = (d00 * d21 - d01 * d20) / denom;
        Vec3::new(1.0 - v - w, v, w)
    }

    /// Closest point on the triangle (including its interior) to `p`.
    pub fn closest_point(&self, p: Vec3) -> Vec3 {
        let (a, b, c) = (self.a, self.b, self.c);
        let ab = b - a;
        let ac = c - a;
        let ap = p - a;

        let d1 = ab.dot(ap);
        let d2 = ac.dot(ap);
        if d1 <= 0.0 && d2 <= 0.0 {
            return a;
        }

        let bp = p - b;
        let d3 = ab.dot(bp);
        let d4 = ac.dot(bp);
        if d3 >= 0.0 && d4 <= d3 {
            return b;
        }

        let vc = d1 * d4 - d3 * d2;
        if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
            let v = d1 / (d1 - d3);
            return a + ab * v;
        }

        let cp = p - c;
        let d5 = ab.dot(cp);
        let d6 = ac.dot(cp);
        if d6 >= 0.0 && d5 <= d6 {
            return c;
        }

        let vb = d5 * d2 - d1 * d6;
        if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
            let w = d2 / (d2 - d6);
            return a + ac * w;
        }

        let va = d3 * d6 - d5 * d4;
        if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
            let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
            return b + (c - b) * w;
        }

        let denom = 1.0 / (va + vb + vc);
        let v = vb * denom;
        let w = vc * denom;
        a + ab * v + ac * w
    }

    /// Möller–Trumbore ray/triangle test, double sided.
    pub fn ray_intersect(&self, ray: &Ray) -> Option<f32> {
        let e1 = self.b - self.a;
        let e2 = self.c - self.a;
        let p = ray.direction.cross(e2);
        let det = e1.dot(p);
        if det.abs() < 1e-8 {
            return None;
        }
        let inv_det = 1.0 / det;
        let s = ray.origin - self.a;
        let u = s.dot(p) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }
        let q = s.cross(e1);
        let v = ray.direction.dot(q) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }
        let t = e2.dot(q) * inv_det;
        (t >= 0.0).then_some(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_triangle() -> Triangle {
        Triangle::new(Vec3::ZERO, Vec3::X, Vec3::Z)
    }

    #[test]
    fn test_barycentric_roundtrip() {
        let tri = unit_triangle();
        let p = Vec3::new(0.25, 0.0, 0.25);
        let bary = tri.barycentric(p);
        let rebuilt = tri.a * bary.x + tri.b * bary.y + tri.c * bary.z;
        assert!((rebuilt - p).length() < 1e-6);
        assert!((bary.x + bary.y + bary.z - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_barycentric_degenerate_is_nan() {
        let tri = Triangle::new(Vec3::ZERO, Vec3::X, Vec3::X * 2.0);
        assert!(tri.barycentric(Vec3::ZERO).is_nan());
    }

    #[test]
    fn test_closest_point_regions() {
        let tri = unit_triangle();
        // Above the interior projects straight down
        let p = tri.closest_point(Vec3::new(0.2, 3.0, 0.2));
        assert!((p - Vec3::new(0.2, 0.0, 0.2)).length() < 1e-6);
        // Vertex region
        assert_eq!(tri.closest_point(Vec3::new(-1.0, 0.0, -1.0)), Vec3::ZERO);
        // Edge region
        let e = tri.closest_point(Vec3::new(0.5, 0.0, -2.0));
        assert!((e - Vec3::new(0.5, 0.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_triangle_ray() {
        let tri = unit_triangle();
        let ray = Ray::new(Vec3::new(0.2, 5.0, 0.2), Vec3::NEG_Y).unwrap();
        assert!((tri.ray_intersect(&ray).unwrap() - 5.0).abs() < 1e-5);
        let miss = Ray::new(Vec3::new(2.0, 5.0, 2.0), Vec3::NEG_Y).unwrap();
        assert!(tri.ray_intersect(&miss).is_none());
        // Normal of a counter-clockwise X,Z triangle points down (-Y)
        assert!((tri.normal() - Vec3::NEG_Y).length() < 1e-6);
    }
}
