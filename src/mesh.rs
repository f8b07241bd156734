//! Sampling of scalar fields into regular wireframe grids.

use crate::field::{DomainBounds, ScalarField};
use crate::math::{Vector2, Vector3};

/// Maps the field's y coordinate onto a synthetic view depth.
///
/// `y_min` lands on `near` and `y_max` on `near + span`; the default pushes far rows
/// further down -Z.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthMapping {
    pub near: f32,
    pub span: f32,
}

impl Default for DepthMapping {
    fn default() -> Self {
        DepthMapping {
            near: -5.0,
            span: -25.0,
        }
    }
}

impl DepthMapping {
    pub fn depth_for(&self, y: f32, y_min: f32, y_max: f32) -> f32 {
        let mut range = y_max - y_min;
        if range.abs() < 0.0001 {
            range = 1.0;
        }
        self.near + (y - y_min) / range * self.span
    }

    /// World-space vertex for a domain point, or `None` when the field cannot be evaluated
    /// there or the height falls outside the display range.
    pub fn vertex_for(&self, field: &ScalarField, point: Vector2) -> Option<Vector3> {
        let bounds = field.bounds();
        let height = match field.evaluate(point.x, point.y) {
            Ok(h) => h,
            Err(err) => {
                log::trace!("hole at {point}: {err}");
                return None;
            }
        };
        if !bounds.contains_height(height) {
            return None;
        }
        Some(Vector3::new(
            point.x,
            height,
            self.depth_for(point.y, bounds.y_min, bounds.y_max),
        ))
    }
}

/// `(resolution + 1)²` samples; `None` entries are holes
#[derive(Clone, Debug, PartialEq)]
pub struct SurfaceGrid {
    side: usize,
    cells: Vec<Option<Vector3>>,
}

impl SurfaceGrid {
    /// Number of samples along each axis
    pub fn side(&self) -> usize {
        self.side
    }

    /// Sample `i` steps along x and `j` steps along y
    pub fn get(&self, i: usize, j: usize) -> Option<Vector3> {
        if i >= self.side || j >= self.side {
            return None;
        }
        self.cells[i * self.side + j]
    }

    pub fn holes(&self) -> usize {
        self.cells.iter().filter(|c| c.is_none()).count()
    }

    /// Lowest and highest height among the non-hole samples
    pub fn height_extent(&self) -> Option<(f32, f32)> {
        self.cells.iter().flatten().fold(None, |acc, v| match acc {
            None => Some((v.y, v.y)),
            Some((lo, hi)) => Some((lo.min(v.y), hi.max(v.y))),
        })
    }

    /// Pairs of neighbouring non-hole samples: each sample to its +i and +j neighbour
    pub fn edges(&self) -> impl Iterator<Item = (Vector3, Vector3)> + '_ {
        let side = self.side;
        (0..side)
            .flat_map(move |i| (0..side).map(move |j| (i, j)))
            .flat_map(move |(i, j)| {
                let current = self.get(i, j);
                let right = (i + 1 < side).then(|| self.get(i + 1, j)).flatten();
                let up = (j + 1 < side).then(|| self.get(i, j + 1)).flatten();
                [right, up]
                    .into_iter()
                    .filter_map(move |next| Some((current?, next?)))
            })
    }
}

/// `min + k·step`, pinned to `max` on the last step so rounding never leaves the domain
fn step_coordinate(min: f32, max: f32, step: f32, k: usize, resolution: usize) -> f32 {
    if k == resolution {
        max
    } else {
        (min + k as f32 * step).min(max)
    }
}

/// Samples `field` over `[min_x, max_x] × [min_y, max_y]` at `resolution` steps per axis
pub fn generate_grid(
    field: &ScalarField,
    (min_x, max_x): (f32, f32),
    (min_y, max_y): (f32, f32),
    resolution: usize,
    depth: &DepthMapping,
) -> SurfaceGrid {
    let resolution = resolution.max(1);
    let side = resolution + 1;
    let dx = (max_x - min_x) / resolution as f32;
    let dy = (max_y - min_y) / resolution as f32;
    let DomainBounds { z_min, z_max, .. } = field.bounds();

    let mut cells = Vec::with_capacity(side * side);
    for i in 0..side {
        for j in 0..side {
            let x = step_coordinate(min_x, max_x, dx, i, resolution);
            let y = step_coordinate(min_y, max_y, dy, j, resolution);

            let cell = match field.evaluate(x, y) {
                Ok(height) if height >= z_min && height <= z_max => {
                    Some(Vector3::new(x, height, depth.depth_for(y, min_y, max_y)))
                }
                Ok(_) => None,
                Err(err) => {
                    log::trace!("hole at ({x}, {y}): {err}");
                    None
                }
            };
            cells.push(cell);
        }
    }

    SurfaceGrid { side, cells }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane(z_min: f32, z_max: f32) -> ScalarField {
        ScalarField::new("x + y", |x, y| x + y)
            .unwrap()
            .with_bounds(DomainBounds::new(-1.0, 1.0, -1.0, 1.0, z_min, z_max).unwrap())
    }

    #[test]
    fn out_of_range_height_is_a_hole() {
        let field = ScalarField::new("five", |_, _| 5.0)
            .unwrap()
            .with_bounds(DomainBounds::new(-1.0, 1.0, -1.0, 1.0, -1.0, 1.0).unwrap());
        let grid = generate_grid(&field, (-1.0, 1.0), (-1.0, 1.0), 2, &DepthMapping::default());
        assert_eq!(grid.side(), 3);
        assert_eq!(grid.holes(), 9);
        assert_eq!(grid.height_extent(), None);
    }

    #[test]
    fn depth_spans_near_to_far() {
        let mapping = DepthMapping::default();
        assert_eq!(mapping.depth_for(-1.0, -1.0, 1.0), -5.0);
        assert_eq!(mapping.depth_for(1.0, -1.0, 1.0), -30.0);
        assert_eq!(mapping.depth_for(0.0, -1.0, 1.0), -17.5);
    }

    #[test]
    fn evaluation_errors_become_holes() {
        let field = ScalarField::new("recip", |x, _| 1.0 / x)
            .unwrap()
            .with_bounds(DomainBounds::new(-1.0, 1.0, -1.0, 1.0, -100.0, 100.0).unwrap());
        let grid = generate_grid(&field, (-1.0, 1.0), (-1.0, 1.0), 2, &DepthMapping::default());
        // x = 0 column is infinite
        assert_eq!(grid.get(1, 0), None);
        assert_eq!(grid.get(1, 2), None);
        assert!(grid.get(0, 0).is_some());
        assert_eq!(grid.holes(), 3);
    }

    #[test]
    fn edges_skip_holes() {
        let mapping = DepthMapping::default();
        let full = generate_grid(&plane(-10.0, 10.0), (-1.0, 1.0), (-1.0, 1.0), 1, &mapping);
        assert_eq!(full.edges().count(), 4);

        let clipped = generate_grid(&plane(-0.1, 0.1), (-1.0, 1.0), (-1.0, 1.0), 1, &mapping);
        // only the two zero-height corners survive and they are diagonal to each other
        assert_eq!(clipped.edges().count(), 0);
    }

    #[test]
    fn far_edges_stay_inside_the_domain() {
        let (min, max) = (11.329863, 36.0986);
        let field = ScalarField::new("zero", |_, _| 0.0)
            .unwrap()
            .with_bounds(DomainBounds::new(min, max, min, max, -1e9, 1e9).unwrap());
        let grid = generate_grid(&field, (min, max), (min, max), 12, &DepthMapping::default());
        assert_eq!(grid.holes(), 0);
        assert_eq!(grid.get(12, 12).map(|v| v.x), Some(max));
        assert_eq!(grid.get(0, 12).map(|v| v.z), Some(-30.0));
    }

    #[test]
    fn path_vertices_follow_mesh_convention() {
        let field = plane(-10.0, 10.0);
        let mapping = DepthMapping::default();
        assert_eq!(
            mapping.vertex_for(&field, Vector2::new(0.5, 1.0)),
            Some(Vector3::new(0.5, 1.5, -30.0))
        );
        assert_eq!(mapping.vertex_for(&field, Vector2::new(3.0, 0.0)), None);
        assert_eq!(mapping.vertex_for(&plane(-1.0, 1.0), Vector2::new(1.0, 1.0)), None);
    }
}
