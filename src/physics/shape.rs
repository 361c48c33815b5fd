//! Collider shape queries: support mapping, bounds, containment, closest
//! point, ray casting and mass properties.
//!
//! Every query has a local-space form operating in the shape's own frame and,
//! where the broadphase or narrowphase needs it, a world-space form taking a
//! [`Transform`]. Capsules and cylinders are aligned with the local Y axis.

use std::f32::consts::PI;

use glam::Vec3;

use crate::error::{PhysicsError, PhysicsResult};
use crate::geometry::{Aabb, LineSegment, Ray};

use super::transform::Transform;

/// Closed set of convex collider shapes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColliderShape {
    /// Oriented box.
    Box { half_extents: Vec3 },
    Sphere { radius: f32 },
    /// Segment from `-half_height` to `+half_height` on Y, swept by `radius`.
    Capsule { radius: f32, half_height: f32 },
    /// Flat-capped cylinder spanning `-half_height..half_height` on Y.
    Cylinder { radius: f32, half_height: f32 },
}

/// Discriminant of [`ColliderShape`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeKind {
    Box,
    Sphere,
    Capsule,
    Cylinder,
}

fn positive(value: f32) -> bool {
    value.is_finite() && value > 0.0
}

impl ColliderShape {
    pub fn cuboid(half_extents: Vec3) -> PhysicsResult<Self> {
        let shape = Self::Box { half_extents };
        shape.validate()?;
        Ok(shape)
    }

    pub fn sphere(radius: f32) -> PhysicsResult<Self> {
        let shape = Self::Sphere { radius };
        shape.validate()?;
        Ok(shape)
    }

    pub fn capsule(radius: f32, half_height: f32) -> PhysicsResult<Self> {
        let shape = Self::Capsule {
            radius,
            half_height,
        };
        shape.validate()?;
        Ok(shape)
    }

    pub fn cylinder(radius: f32, half_height: f32) -> PhysicsResult<Self> {
        let shape = Self::Cylinder {
            radius,
            half_height,
        };
        shape.validate()?;
        Ok(shape)
    }

    pub fn kind(&self) -> ShapeKind {
        match self {
            Self::Box { .. } => ShapeKind::Box,
            Self::Sphere { .. } => ShapeKind::Sphere,
            Self::Capsule { .. } => ShapeKind::Capsule,
            Self::Cylinder { .. } => ShapeKind::Cylinder,
        }
    }

    /// Reject zero, negative and non-finite dimensions.
    pub fn validate(&self) -> PhysicsResult<()> {
        match *self {
            Self::Box { half_extents } => {
                if !(positive(half_extents.x) && positive(half_extents.y) && positive(half_extents.z))
                {
                    return Err(PhysicsError::InvalidShape {
                        reason: "box half extents must be positive and finite",
                    });
                }
            }
            Self::Sphere { radius } => {
                if !positive(radius) {
                    return Err(PhysicsError::InvalidShape {
                        reason: "sphere radius must be positive and finite",
                    });
                }
            }
            Self::Capsule {
                radius,
                half_height,
            } => {
                if !positive(radius) || !half_height.is_finite() || half_height < 0.0 {
                    return Err(PhysicsError::InvalidShape {
                        reason: "capsule radius must be positive and half height non-negative",
                    });
                }
            }
            Self::Cylinder {
                radius,
                half_height,
            } => {
                if !positive(radius) || !positive(half_height) {
                    return Err(PhysicsError::InvalidShape {
                        reason: "cylinder radius and half height must be positive and finite",
                    });
                }
            }
        }
        Ok(())
    }

    /// Support mapping in local space: the point of the shape farthest along
    /// `direction`.
    #[inline]
    pub fn local_support(&self, direction: Vec3) -> Vec3 {
        match *self {
            Self::Box { half_extents } => Vec3::new(
                if direction.x >= 0.0 {
                    half_extents.x
                } else {
                    -half_extents.x
                },
                if direction.y >= 0.0 {
                    half_extents.y
                } else {
                    -half_extents.y
                },
                if direction.z >= 0.0 {
                    half_extents.z
                } else {
                    -half_extents.z
                },
            ),
            Self::Sphere { radius } => direction.normalize_or_zero() * radius,
            Self::Capsule {
                radius,
                half_height,
            } => {
                let base = if direction.y >= 0.0 {
                    Vec3::new(0.0, half_height, 0.0)
                } else {
                    Vec3::new(0.0, -half_height, 0.0)
                };
                base + direction.normalize_or_zero() * radius
            }
            Self::Cylinder {
                radius,
                half_height,
            } => {
                let y = if direction.y >= 0.0 {
                    half_height
                } else {
                    -half_height
                };
                let xz = Vec3::new(direction.x, 0.0, direction.z);
                let xz_len = xz.length();
                let xz_point = if xz_len > 1e-6 {
                    xz * (radius / xz_len)
                } else {
                    Vec3::ZERO
                };
                Vec3::new(xz_point.x, y, xz_point.z)
            }
        }
    }

    /// World-space support point (`FarthestPoint`).
    #[inline]
    pub fn support(&self, direction: Vec3, transform: &Transform) -> Vec3 {
        let local_dir = transform.inverse_transform_vector(direction);
        transform.transform_point(self.local_support(local_dir))
    }

    /// Bounds in the shape's own frame.
    pub fn local_aabb(&self) -> Aabb {
        let half = match *self {
            Self::Box { half_extents } => half_extents,
            Self::Sphere { radius } => Vec3::splat(radius),
            Self::Capsule {
                radius,
                half_height,
            } => Vec3::new(radius, half_height + radius, radius),
            Self::Cylinder {
                radius,
                half_height,
            } => Vec3::new(radius, half_height, radius),
        };
        Aabb::from_center_half_extents(Vec3::ZERO, half)
    }

    /// Tight world-space bounds.
    pub fn compute_aabb(&self, transform: &Transform) -> Aabb {
        let center = transform.position();
        match *self {
            Self::Sphere { radius } => Aabb::from_center_half_extents(center, Vec3::splat(radius)),
            Self::Box { half_extents } => {
                let rot = glam::Mat3::from_quat(transform.rotation());
                let extent = rot.x_axis.abs() * half_extents.x
                    + rot.y_axis.abs() * half_extents.y
                    + rot.z_axis.abs() * half_extents.z;
                Aabb::from_center_half_extents(center, extent)
            }
            Self::Capsule {
                radius,
                half_height,
            } => {
                let axis = transform.transform_vector(Vec3::Y) * half_height;
                Aabb::from_points([center + axis, center - axis]).expanded(radius)
            }
            Self::Cylinder {
                radius,
                half_height,
            } => {
                // Disc extent along world axis i is r * sqrt(1 - axis_i^2).
                let axis = transform.transform_vector(Vec3::Y);
                let disc = (Vec3::ONE - axis * axis).max(Vec3::ZERO);
                let extent = axis.abs() * half_height
                    + Vec3::new(disc.x.sqrt(), disc.y.sqrt(), disc.z.sqrt()) * radius;
                Aabb::from_center_half_extents(center, extent)
            }
        }
    }

    /// Local-space containment test (boundary inclusive).
    pub fn contains_local(&self, p: Vec3) -> bool {
        match *self {
            Self::Box { half_extents } => p.abs().cmple(half_extents).all(),
            Self::Sphere { radius } => p.length_squared() <= radius * radius,
            Self::Capsule {
                radius,
                half_height,
            } => capsule_segment(half_height).distance_sq(p) <= radius * radius,
            Self::Cylinder {
                radius,
                half_height,
            } => p.y.abs() <= half_height && p.x * p.x + p.z * p.z <= radius * radius,
        }
    }

    pub fn contains_point(&self, point: Vec3, transform: &Transform) -> bool {
        self.contains_local(transform.inverse_transform_point(point))
    }

    /// Closest point of the solid shape to `p`, in local space. Points inside
    /// are returned unchanged.
    pub fn closest_point_local(&self, p: Vec3) -> Vec3 {
        match *self {
            Self::Box { half_extents } => p.clamp(-half_extents, half_extents),
            Self::Sphere { radius } => {
                if p.length_squared() <= radius * radius {
                    p
                } else {
                    p.normalize_or_zero() * radius
                }
            }
            Self::Capsule {
                radius,
                half_height,
            } => {
                let c = capsule_segment(half_height).closest_point(p);
                let d = p - c;
                if d.length_squared() <= radius * radius {
                    p
                } else {
                    c + d.normalize_or_zero() * radius
                }
            }
            Self::Cylinder {
                radius,
                half_height,
            } => {
                let y = p.y.clamp(-half_height, half_height);
                let radial = Vec3::new(p.x, 0.0, p.z);
                let radial = if radial.length_squared() > radius * radius {
                    radial.normalize_or_zero() * radius
                } else {
                    radial
                };
                Vec3::new(radial.x, y, radial.z)
            }
        }
    }

    pub fn closest_point(&self, point: Vec3, transform: &Transform) -> Vec3 {
        let local = self.closest_point_local(transform.inverse_transform_point(point));
        transform.transform_point(local)
    }

    /// Local-space ray cast. Returns the entry distance, `0.0` when the ray
    /// starts inside, or `None` on a miss within `max_distance`.
    pub fn ray_intersect_local(&self, ray: &Ray, max_distance: f32) -> Option<f32> {
        if self.contains_local(ray.origin) {
            return Some(0.0);
        }
        let t = match *self {
            Self::Box { .. } => self.local_aabb().ray_intersect(ray, max_distance),
            Self::Sphere { radius } => ray_sphere(ray, Vec3::ZERO, radius),
            Self::Capsule {
                radius,
                half_height,
            } => {
                let side = ray_y_cylinder(ray, radius)
                    .filter(|&t| ray.point_at(t).y.abs() <= half_height);
                let top = ray_sphere(ray, Vec3::new(0.0, half_height, 0.0), radius);
                let bottom = ray_sphere(ray, Vec3::new(0.0, -half_height, 0.0), radius);
                min_hit([side, top, bottom])
            }
            Self::Cylinder {
                radius,
                half_height,
            } => {
                let side = ray_y_cylinder(ray, radius)
                    .filter(|&t| ray.point_at(t).y.abs() <= half_height);
                let cap = |y: f32| {
                    if ray.direction.y.abs() < 1e-8 {
                        return None;
                    }
                    let t = (y - ray.origin.y) / ray.direction.y;
                    if t < 0.0 {
                        return None;
                    }
                    let p = ray.point_at(t);
                    (p.x * p.x + p.z * p.z <= radius * radius).then_some(t)
                };
                min_hit([side, cap(half_height), cap(-half_height)])
            }
        };
        t.filter(|&t| t <= max_distance)
    }

    /// World-space ray cast against the shape placed at `transform`.
    pub fn ray_intersect(&self, ray: &Ray, max_distance: f32, transform: &Transform) -> Option<f32> {
        let local = Ray {
            origin: transform.inverse_transform_point(ray.origin),
            direction: transform.inverse_transform_vector(ray.direction),
        };
        self.ray_intersect_local(&local, max_distance)
    }

    pub fn volume(&self) -> f32 {
        match *self {
            Self::Box { half_extents } => 8.0 * half_extents.x * half_extents.y * half_extents.z,
            Self::Sphere { radius } => 4.0 / 3.0 * PI * radius.powi(3),
            Self::Capsule {
                radius,
                half_height,
            } => PI * radius * radius * 2.0 * half_height + 4.0 / 3.0 * PI * radius.powi(3),
            Self::Cylinder {
                radius,
                half_height,
            } => PI * radius * radius * 2.0 * half_height,
        }
    }

    /// Principal moments of inertia about the local axes for a solid shape
    /// of the given mass.
    pub fn inertia_tensor(&self, mass: f32) -> Vec3 {
        match *self {
            Self::Box { half_extents: h } => {
                let h2 = h * h;
                Vec3::new(h2.y + h2.z, h2.x + h2.z, h2.x + h2.y) * (mass / 3.0)
            }
            Self::Sphere { radius } => Vec3::splat(0.4 * mass * radius * radius),
            Self::Cylinder {
                radius,
                half_height,
            } => {
                let r2 = radius * radius;
                let h = 2.0 * half_height;
                let lateral = mass * (3.0 * r2 + h * h) / 12.0;
                Vec3::new(lateral, 0.5 * mass * r2, lateral)
            }
            Self::Capsule {
                radius,
                half_height,
            } => {
                let r2 = radius * radius;
                let h = 2.0 * half_height;
                let cyl_volume = PI * r2 * h;
                let sphere_volume = 4.0 / 3.0 * PI * r2 * radius;
                let total = cyl_volume + sphere_volume;
                let m_cyl = mass * cyl_volume / total;
                let m_caps = mass * sphere_volume / total;

                let axial = 0.5 * m_cyl * r2 + 0.4 * m_caps * r2;
                let lateral = m_cyl * (3.0 * r2 + h * h) / 12.0
                    + m_caps * (0.4 * r2 + 0.25 * h * h + 0.375 * h * radius);
                Vec3::new(lateral, axial, lateral)
            }
        }
    }
}

fn capsule_segment(half_height: f32) -> LineSegment {
    LineSegment::new(
        Vec3::new(0.0, -half_height, 0.0),
        Vec3::new(0.0, half_height, 0.0),
    )
}

fn min_hit<const N: usize>(hits: [Option<f32>; N]) -> Option<f32> {
    hits.into_iter().flatten().reduce(f32::min)
}

/// Entry distance of a ray into a sphere whose interior excludes the origin.
fn ray_sphere(ray: &Ray, center: Vec3, radius: f32) -> Option<f32> {
    let m = ray.origin - center;
    let b = m.dot(ray.direction);
    let c = m.length_squared() - radius * radius;
    if c > 0.0 && b > 0.0 {
        return None;
    }
    let disc = b * b - c;
    if disc < 0.0 {
        return None;
    }
    Some((-b - disc.sqrt()).max(0.0))
}

/// Entry distance into the infinite cylinder `x^2 + z^2 <= r^2`.
fn ray_y_cylinder(ray: &Ray, radius: f32) -> Option<f32> {
    let (o, d) = (ray.origin, ray.direction);
    let a = d.x * d.x + d.z * d.z;
    if a < 1e-10 {
        return None;
    }
    let b = o.x * d.x + o.z * d.z;
    let c = o.x * o.x + o.z * o.z - radius * radius;
    let disc = b * b - a * c;
    if disc < 0.0 {
        return None;
    }
    let t = (-b - disc.sqrt()) / a;
    (t >= 0.0).then_some(t)
}
