use crate::math::Vector3;

/// Vertex after perspective projection: pixel position plus the pre-divide view-space depth
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProjectedVertex {
    pub screen_position: [f32; 2],
    pub depth: f32,
}

/// World-space segment drawn in a fixed color
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LineSegment {
    pub start: Vector3,
    pub end: Vector3,
    pub color: u32,
}

impl LineSegment {
    pub fn new(start: Vector3, end: Vector3, color: u32) -> Self {
        LineSegment { start, end, color }
    }
}
