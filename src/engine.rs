//! Wireframe render engine: view transform, near-plane clip, perspective divide and a
//! depth-tested line rasterizer writing into an owned framebuffer.

use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::field::{DomainBounds, ScalarField};
use crate::graphics::{
    argb, pixel_index, Framebuffer, HeightGradient, HeightRange, LineColor,
};
use crate::math::{Transform, Vector2, Vector3};
use crate::mesh::{generate_grid, DepthMapping, SurfaceGrid};
use crate::state::SimulatorState;
use crate::vertex::{LineSegment, ProjectedVertex};

/// Depth of the reference axes' origin
const AXIS_DEPTH: f32 = -15.0;
const AXIS_LENGTH: f32 = 12.0;
const GRID_HALF: f32 = 12.0;
const GRID_STEP: f32 = 3.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineSettings {
    /// Pixels per side of the square framebuffer
    pub buffer_size: usize,
    /// Grid steps per axis when sampling the surface
    pub mesh_resolution: usize,
    /// Geometry at or above this view-space Z is behind the camera
    pub clip_z: f32,
    pub background: u32,
    pub axis_x_color: u32,
    pub axis_y_color: u32,
    pub axis_z_color: u32,
    pub grid_color: u32,
    pub path_color: u32,
    pub gradient: HeightGradient,
    pub depth: DepthMapping,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            buffer_size: 350,
            mesh_resolution: 48,
            clip_z: -0.1,
            background: argb(0, 0, 0),
            axis_x_color: argb(0xCC, 0x44, 0x44),
            axis_y_color: argb(0x44, 0xCC, 0x44),
            axis_z_color: argb(0x44, 0x88, 0xCC),
            grid_color: argb(0x3A, 0x3A, 0x3A),
            path_color: argb(0xFF, 0xD2, 0x00),
            gradient: HeightGradient::default(),
            depth: DepthMapping::default(),
        }
    }
}

/// Perspective divide by view-space Z, then `[-1, 1]` to `[0, size]`. Depth keeps the
/// pre-divide Z.
pub fn project(p: Vector3, size: usize) -> ProjectedVertex {
    let size = size as f32;
    let x = p.x / p.z;
    let y = p.y / p.z;
    ProjectedVertex {
        screen_position: [(x + 1.0) * 0.5 * size, (y + 1.0) * 0.5 * size],
        depth: p.z,
    }
}

/// Camera used until the first view transform is pushed: above and behind the surface,
/// tilted down 25 degrees.
pub fn default_view() -> Transform {
    Transform::translation(Vector3::new(0.0, -20.0, -35.0))
        * Transform::rotation_y(0.0)
        * Transform::rotation_x(-25.0)
}

/// Axes through `(0, 0, AXIS_DEPTH)` and a ground grid on `y = 0`
fn reference_lines(settings: &EngineSettings) -> Vec<LineSegment> {
    let mut lines = vec![
        LineSegment::new(
            Vector3::new(-AXIS_LENGTH, 0.0, AXIS_DEPTH),
            Vector3::new(AXIS_LENGTH, 0.0, AXIS_DEPTH),
            settings.axis_x_color,
        ),
        LineSegment::new(
            Vector3::new(0.0, -AXIS_LENGTH * 0.2, AXIS_DEPTH),
            Vector3::new(0.0, AXIS_LENGTH, AXIS_DEPTH),
            settings.axis_y_color,
        ),
        LineSegment::new(
            Vector3::new(0.0, 0.0, AXIS_DEPTH - AXIS_LENGTH),
            Vector3::new(0.0, 0.0, AXIS_DEPTH + AXIS_LENGTH),
            settings.axis_z_color,
        ),
    ];

    let steps = (2.0 * GRID_HALF / GRID_STEP) as usize;
    for k in 0..=steps {
        let offset = -GRID_HALF + k as f32 * GRID_STEP;
        lines.push(LineSegment::new(
            Vector3::new(-GRID_HALF, 0.0, AXIS_DEPTH + offset),
            Vector3::new(GRID_HALF, 0.0, AXIS_DEPTH + offset),
            settings.grid_color,
        ));
        lines.push(LineSegment::new(
            Vector3::new(offset, 0.0, AXIS_DEPTH - GRID_HALF),
            Vector3::new(offset, 0.0, AXIS_DEPTH + GRID_HALF),
            settings.grid_color,
        ));
    }
    lines
}

/// Surface grid together with the field snapshot it was sampled from
struct MeshCache {
    field: Arc<ScalarField>,
    bounds: DomainBounds,
    grid: SurfaceGrid,
}

/// Everything guarded by the frame lock
struct RenderTarget {
    framebuffer: Framebuffer,
    view: Transform,
    mesh: Option<MeshCache>,
    height_range: HeightRange,
    mesh_revision: u64,
}

/// Copy of a finished frame, safe to present without holding any lock
#[derive(Clone, Debug, PartialEq)]
pub struct FrameSnapshot {
    pub size: usize,
    /// Packed ARGB, row-major, top row first
    pub colors: Vec<u32>,
}

impl FrameSnapshot {
    pub fn color_at(&self, x: usize, row: usize) -> Option<u32> {
        pixel_index(self.size, x, row).map(|i| self.colors[i])
    }
}

pub struct RenderEngine {
    settings: EngineSettings,
    reference_lines: Vec<LineSegment>,
    target: Mutex<RenderTarget>,
}

impl RenderEngine {
    pub fn new(settings: EngineSettings) -> Self {
        let settings = EngineSettings {
            buffer_size: settings.buffer_size.max(1),
            ..settings
        };
        RenderEngine {
            reference_lines: reference_lines(&settings),
            target: Mutex::new(RenderTarget {
                framebuffer: Framebuffer::new(settings.buffer_size, settings.background),
                view: default_view(),
                mesh: None,
                height_range: HeightRange::default(),
                mesh_revision: 0,
            }),
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn reference_lines(&self) -> &[LineSegment] {
        &self.reference_lines
    }

    fn lock_target(&self) -> MutexGuard<'_, RenderTarget> {
        self.target.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_view_transform(&self, view: Transform) {
        self.lock_target().view = view;
    }

    pub fn view_transform(&self) -> Transform {
        self.lock_target().view
    }

    /// Height interval currently used for coloring the surface
    pub fn height_range(&self) -> HeightRange {
        self.lock_target().height_range
    }

    /// Incremented every time the surface grid is resampled
    pub fn mesh_revision(&self) -> u64 {
        self.lock_target().mesh_revision
    }

    /// Renders one frame from the shared simulation. The simulation lock is taken first
    /// and held until the framebuffer lock has been released again.
    pub fn tick(&self, state: &Mutex<SimulatorState>) {
        let state = state.lock().unwrap_or_else(PoisonError::into_inner);
        let simulation = state.simulation();
        self.render(simulation.field(), simulation.path());
    }

    /// Syncs the mesh with `field`, clears, and draws reference lines, wireframe and path
    pub fn render(&self, field: Option<&Arc<ScalarField>>, path: &[Vector2]) {
        let mut target = self.lock_target();
        target.sync_mesh(field, &self.settings);
        target.framebuffer.clear(self.settings.background);

        for line in &self.reference_lines {
            target.draw_3d_line(line.start, line.end, LineColor::Fixed(line.color), &self.settings);
        }

        target.draw_wireframe(&self.settings);

        if let Some(field) = field {
            target.draw_path(field, path, &self.settings);
        }
    }

    /// Copies the last completed frame out under the frame lock only
    pub fn snapshot(&self) -> FrameSnapshot {
        let target = self.lock_target();
        FrameSnapshot {
            size: target.framebuffer.size(),
            colors: target.framebuffer.colors().to_vec(),
        }
    }

    /// Runs `f` against the last completed frame while holding the frame lock
    pub fn with_framebuffer<R>(&self, f: impl FnOnce(&Framebuffer) -> R) -> R {
        f(&self.lock_target().framebuffer)
    }
}

impl RenderTarget {
    fn sync_mesh(&mut self, field: Option<&Arc<ScalarField>>, settings: &EngineSettings) {
        let Some(field) = field else {
            if self.mesh.take().is_some() {
                log::debug!("field unloaded, dropping mesh");
                self.height_range = HeightRange::default();
            }
            return;
        };

        let bounds = field.bounds();
        let fresh = self
            .mesh
            .as_ref()
            .is_some_and(|m| Arc::ptr_eq(&m.field, field) && m.bounds == bounds);
        if fresh {
            return;
        }

        let grid = generate_grid(
            field,
            (bounds.x_min, bounds.x_max),
            (bounds.y_min, bounds.y_max),
            settings.mesh_resolution,
            &settings.depth,
        );
        let (min, max) = grid.height_extent().unwrap_or((bounds.z_min, bounds.z_max));
        self.height_range = HeightRange::new(min, max);
        self.mesh_revision += 1;
        log::debug!(
            "resampled `{}`: {}x{} grid, {} holes, heights {:?}",
            field.name(),
            grid.side(),
            grid.side(),
            grid.holes(),
            self.height_range
        );

        self.mesh = Some(MeshCache {
            field: Arc::clone(field),
            bounds,
            grid,
        });
    }

    fn draw_wireframe(&mut self, settings: &EngineSettings) {
        let Some(mesh) = self.mesh.take() else {
            return;
        };
        for (a, b) in mesh.grid.edges() {
            self.draw_3d_line(a, b, LineColor::Heights(a.y, b.y), settings);
        }
        self.mesh = Some(mesh);
    }

    /// Connects consecutive valid path points; a point that cannot be placed on the
    /// surface breaks the line.
    fn draw_path(&mut self, field: &ScalarField, path: &[Vector2], settings: &EngineSettings) {
        let color = LineColor::Fixed(settings.path_color);
        let mut previous: Option<Vector3> = None;
        for &point in path {
            match settings.depth.vertex_for(field, point) {
                Some(vertex) => {
                    self.draw_3d_line(previous.unwrap_or(vertex), vertex, color, settings);
                    previous = Some(vertex);
                }
                None => previous = None,
            }
        }
    }

    /// Transforms a world-space segment into view space, clips it against the near plane
    /// and rasterizes it. Returns `false` when the segment was discarded.
    fn draw_3d_line(
        &mut self,
        world_a: Vector3,
        world_b: Vector3,
        color: LineColor,
        settings: &EngineSettings,
    ) -> bool {
        let mut a = self.view * world_a;
        let mut b = self.view * world_b;
        let mut color = color;

        if a.z > b.z {
            mem::swap(&mut a, &mut b);
            if let LineColor::Heights(ha, hb) = color {
                color = LineColor::Heights(hb, ha);
            }
        }

        let clip = settings.clip_z;
        if a.z >= clip && b.z >= clip {
            return false;
        }

        if b.z >= clip {
            let f = (clip - a.z) / (b.z - a.z);
            b = a.lerp(b, f);
            if let LineColor::Heights(ha, hb) = color {
                color = LineColor::Heights(ha, ha + (hb - ha) * f);
            }
        }

        let size = self.framebuffer.size();
        let p0 = project(a, size);
        let p1 = project(b, size);
        self.framebuffer
            .draw_line(p0, p1, color, &settings.gradient, &self.height_range);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Simulation;

    fn engine(size: usize) -> RenderEngine {
        RenderEngine::new(EngineSettings {
            buffer_size: size,
            mesh_resolution: 8,
            ..EngineSettings::default()
        })
    }

    fn written(engine: &RenderEngine) -> usize {
        engine.with_framebuffer(|fb| fb.depths().iter().filter(|d| d.is_finite()).count())
    }

    fn plane() -> Arc<ScalarField> {
        plane_over(1.0, 10.0)
    }

    /// `x + y` over `[-half, half]²`, heights limited to `±height`
    fn plane_over(half: f32, height: f32) -> Arc<ScalarField> {
        let bounds = DomainBounds::new(-half, half, -half, half, -height, height).unwrap();
        Arc::new(
            ScalarField::new("x + y", |x, y| x + y)
                .unwrap()
                .with_bounds(bounds),
        )
    }

    /// Camera in front of the sampled surface, which spans z in [-30, -5]
    fn front_view() -> Transform {
        Transform::look_at(
            Vector3::new(0.0, 3.0, 10.0),
            Vector3::new(0.0, 0.0, -17.5),
            Vector3::new(0.0, 1.0, 0.0),
        )
    }

    #[test]
    fn projection_of_visible_points_stays_on_screen() {
        let size = 64;
        let points = [
            Vector3::new(0.0, 0.0, -1.0),
            Vector3::new(1.0, -1.0, -1.0),
            Vector3::new(-3.0, 2.0, -5.0),
            Vector3::new(0.1, -0.1, -0.2),
        ];
        for p in points {
            let projected = project(p, size);
            let [x, y] = projected.screen_position;
            assert!((0.0..=size as f32).contains(&x), "{p} -> {x}");
            assert!((0.0..=size as f32).contains(&y), "{p} -> {y}");
            assert_eq!(projected.depth, p.z);
        }
        assert_eq!(project(Vector3::new(0.0, 0.0, -4.0), size).screen_position, [32.0, 32.0]);
    }

    #[test]
    fn segment_behind_camera_is_never_drawn() {
        let engine = engine(32);
        engine.set_view_transform(Transform::identity());
        let settings = *engine.settings();
        let drawn = engine.lock_target().draw_3d_line(
            Vector3::new(-1.0, 0.0, -0.1),
            Vector3::new(1.0, 1.0, 5.0),
            LineColor::Fixed(settings.path_color),
            &settings,
        );
        assert!(!drawn);
        assert_eq!(written(&engine), 0);
    }

    #[test]
    fn crossing_segment_is_clipped_at_near_plane() {
        let engine = engine(64);
        engine.set_view_transform(Transform::identity());
        let settings = *engine.settings();
        let drawn = engine.lock_target().draw_3d_line(
            Vector3::new(0.0, 0.05, 2.0),
            Vector3::new(0.0, 0.05, -10.0),
            LineColor::Heights(0.0, 1.0),
            &settings,
        );
        assert!(drawn);
        assert!(written(&engine) > 0);
        engine.with_framebuffer(|fb| {
            assert!(fb
                .depths()
                .iter()
                .filter(|d| d.is_finite())
                .all(|&d| d <= settings.clip_z + 1e-4));
        });
    }

    #[test]
    fn clipped_end_takes_interpolated_height() {
        let engine = engine(64);
        engine.set_view_transform(Transform::identity());
        let settings = *engine.settings();

        // Both ends project onto the centre pixel, where the nearer clipped end wins
        let near = Vector3::new(0.0, 0.0, 9.9);
        let far = Vector3::new(0.0, 0.0, -10.1);
        assert!(engine.lock_target().draw_3d_line(
            near,
            far,
            LineColor::Heights(1.0, 0.0),
            &settings,
        ));

        let f = (settings.clip_z - far.z) / (near.z - far.z);
        let range = HeightRange::default();
        let expected = settings.gradient.color_at(0.0 + (1.0 - 0.0) * f, &range);
        let centre = engine.with_framebuffer(|fb| fb.color_at(32, 31));
        assert_eq!(centre, Some(expected));
        assert_ne!(centre, Some(settings.gradient.color_at(1.0, &range)));
        let depth = engine.with_framebuffer(|fb| fb.depths()[31 * 64 + 32]);
        assert!((depth - settings.clip_z).abs() < 1e-4, "{depth}");
    }

    #[test]
    fn render_draws_reference_mesh_and_path() {
        let engine = engine(96);
        engine.set_view_transform(front_view());
        let field = plane_over(6.0, 20.0);
        let path: Vec<Vector2> = (0..=10)
            .map(|k| {
                let t = -5.0 + k as f32;
                Vector2::new(t, t)
            })
            .collect();
        engine.render(Some(&field), &path);

        let settings = *engine.settings();
        let frame = engine.snapshot();
        let count = |color: u32| frame.colors.iter().filter(|&&c| c == color).count();
        assert!(count(settings.path_color) > 0);
        assert!(count(settings.grid_color) > 0);
        let surface = frame
            .colors
            .iter()
            .filter(|&&c| {
                c != settings.background
                    && c != settings.path_color
                    && c != settings.grid_color
                    && c != settings.axis_x_color
                    && c != settings.axis_y_color
                    && c != settings.axis_z_color
            })
            .count();
        assert!(surface > 0);
    }

    #[test]
    fn empty_scene_only_has_reference_lines() {
        let engine = engine(48);
        engine.render(None, &[]);
        let settings = *engine.settings();
        let frame = engine.snapshot();
        assert!(frame.colors.iter().any(|&c| c == settings.grid_color));
        assert!(frame.colors.iter().all(|&c| {
            [
                settings.background,
                settings.grid_color,
                settings.axis_x_color,
                settings.axis_y_color,
                settings.axis_z_color,
            ]
            .contains(&c)
        }));
        assert_eq!(engine.reference_lines().len(), 21);
    }

    #[test]
    fn mesh_is_resampled_only_when_field_or_bounds_change() {
        let engine = engine(32);
        let mut field = plane();
        engine.render(Some(&field), &[]);
        engine.render(Some(&field), &[]);
        assert_eq!(engine.mesh_revision(), 1);
        assert_eq!(engine.height_range(), HeightRange::new(-2.0, 2.0));

        let bounds = DomainBounds::new(-1.0, 1.0, -1.0, 1.0, -1.0, 1.0).unwrap();
        Arc::make_mut(&mut field).set_bounds(bounds);
        engine.render(Some(&field), &[]);
        assert_eq!(engine.mesh_revision(), 2);
        assert_eq!(engine.height_range(), HeightRange::new(-1.0, 1.0));

        engine.render(None, &[]);
        assert_eq!(engine.height_range(), HeightRange::default());
    }

    #[test]
    fn height_range_falls_back_to_field_bounds() {
        let engine = engine(32);
        let bounds = DomainBounds::new(-1.0, 1.0, -1.0, 1.0, -3.0, 4.0).unwrap();
        let high = Arc::new(ScalarField::new("high", |_, _| 50.0).unwrap().with_bounds(bounds));
        engine.render(Some(&high), &[]);
        assert_eq!(engine.height_range(), HeightRange::new(-3.0, 4.0));

        let flat = Arc::new(ScalarField::new("flat", |_, _| 0.5).unwrap().with_bounds(bounds));
        engine.render(Some(&flat), &[]);
        assert_eq!(engine.height_range(), HeightRange { min: 0.5, max: 1.5 });
    }

    #[test]
    fn invalid_path_point_breaks_the_line() {
        let engine = engine(64);
        engine.set_view_transform(Transform::identity());
        let settings = *engine.settings();
        let field = plane_over(6.0, 20.0);
        let path = [
            Vector2::new(0.0, 0.0),
            Vector2::new(50.0, 50.0),
            Vector2::new(2.0, 2.0),
            Vector2::new(4.0, 2.0),
        ];
        engine.lock_target().draw_path(&field, &path, &settings);

        let vertex = |x, y| settings.depth.vertex_for(&field, Vector2::new(x, y)).unwrap();
        let pixel = |p: Vector3| {
            let [x, y] = project(p, 64).screen_position;
            engine.with_framebuffer(|fb| fb.color_at(x as usize, 63 - y as usize))
        };
        let path_color = Some(settings.path_color);

        let (start, resume, end) = (vertex(0.0, 0.0), vertex(2.0, 2.0), vertex(4.0, 2.0));
        assert_eq!(pixel(start), path_color);
        assert_eq!(pixel(resume), path_color);
        for t in [0.3, 0.5, 0.7] {
            assert_ne!(pixel(start.lerp(resume, t)), path_color, "bridged at t = {t}");
        }
        // same depth at both ends, so the projected midpoint is a stepped pixel
        assert_eq!(pixel(resume.lerp(end, 0.5)), path_color);
    }

    #[test]
    fn tick_reads_the_shared_simulation() {
        let engine = engine(64);
        engine.set_view_transform(front_view());

        let mut simulation = Simulation::default();
        simulation.set_field(plane_over(6.0, 20.0));
        simulation.overwrite_path(vec![Vector2::new(-4.0, 1.0), Vector2::new(4.0, 1.0)]);
        let state = SimulatorState::new(simulation).shared();

        engine.tick(&state);
        assert_eq!(engine.mesh_revision(), 1);
        assert!(engine.snapshot().colors.contains(&engine.settings().path_color));
        // both locks are free again
        assert!(state.try_lock().is_ok());
        assert_eq!(engine.snapshot().size, 64);
    }
}
