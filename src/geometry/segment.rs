use glam::Vec3;

/// Finite line segment between two points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSegment {
    pub start: Vec3,
    pub end: Vec3,
}

impl LineSegment {
    pub fn new(start: Vec3, end: Vec3) -> Self {
        Self { start, end }
    }

    /// Parameter in `[0, 1]` of the point on the segment closest to `point`.
    pub fn closest_parameter(&self, point: Vec3) -> f32 {
        let d = self.end - self.start;
        let len_sq = d.length_squared();
        if len_sq < 1e-12 {
            return 0.0;
        }
        ((point - self.start).dot(d) / len_sq).clamp(0.0, 1.0)
    }

    /// Point on the segment closest to `point`.
    pub fn closest_point(&self, point: Vec3) -> Vec3 {
        self.start + (self.end - self.start) * self.closest_parameter(point)
    }

    /// Squared distance from `point` to the segment.
    pub fn distance_sq(&self, point: Vec3) -> f32 {
        (point - self.closest_point(point)).length_squared()
    }
}
