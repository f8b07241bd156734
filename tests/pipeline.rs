use std::sync::Arc;

use wirefield::camera::{CameraController, CameraKey, CameraSettings};
use wirefield::engine::{project, EngineSettings, RenderEngine};
use wirefield::field::{DomainBounds, ScalarField};
use wirefield::math::{Transform, Vector2, Vector3};
use wirefield::mesh::{generate_grid, DepthMapping};
use wirefield::state::{Simulation, SimulatorState};

fn plane(z_min: f32, z_max: f32) -> ScalarField {
    ScalarField::new("x + y", |x, y| x + y)
        .unwrap()
        .with_bounds(DomainBounds::new(-1.0, 1.0, -1.0, 1.0, z_min, z_max).unwrap())
}

#[test]
fn unit_resolution_plane_has_expected_corners() {
    let grid = generate_grid(
        &plane(-10.0, 10.0),
        (-1.0, 1.0),
        (-1.0, 1.0),
        1,
        &DepthMapping::default(),
    );
    assert_eq!(grid.side(), 2);
    let heights: Vec<f32> = [(0, 0), (1, 0), (0, 1), (1, 1)]
        .iter()
        .map(|&(i, j)| grid.get(i, j).unwrap().y)
        .collect();
    assert_eq!(heights, vec![-2.0, 0.0, 0.0, 2.0]);
    assert_eq!(grid.get(0, 0).unwrap().z, -5.0);
    assert_eq!(grid.get(0, 1).unwrap().z, -30.0);
}

#[test]
fn narrow_height_range_punches_out_extreme_corners() {
    let grid = generate_grid(
        &plane(-0.1, 0.1),
        (-1.0, 1.0),
        (-1.0, 1.0),
        1,
        &DepthMapping::default(),
    );
    assert_eq!(grid.get(0, 0), None);
    assert_eq!(grid.get(1, 1), None);
    assert!(grid.get(1, 0).is_some());
    assert!(grid.get(0, 1).is_some());
    assert_eq!(grid.holes(), 2);
}

#[test]
fn views_compose_associatively() {
    let a = Transform::trs(
        Vector3::new(1.0, -2.0, 3.0),
        Vector3::new(10.0, 20.0, 30.0),
        Vector3::new(1.0, 2.0, 0.5),
    );
    let b = Transform::rotation_y(45.0);
    let c = Transform::translation(Vector3::new(0.0, 0.0, -5.0));
    assert!(((a * b) * c).approx_eq(&(a * (b * c)), 1e-4));
}

#[test]
fn projection_respects_buffer_size() {
    let p = project(Vector3::new(-1.0, 1.0, -1.0), 350);
    assert_eq!(p.screen_position, [350.0, 0.0]);
    assert_eq!(p.depth, -1.0);
}

#[test]
fn optimizer_path_is_rendered_from_camera() {
    let bounds = DomainBounds::new(-6.0, 6.0, -6.0, 6.0, -40.0, 80.0).unwrap();
    let field = ScalarField::new("bowl", |x, y| x * x + y * y)
        .unwrap()
        .with_bounds(bounds);

    let mut simulation = Simulation::default();
    simulation.set_learning_rate(0.1);
    simulation.set_field(Arc::new(field));
    simulation.set_initial_point(5.0, -4.0).unwrap();
    simulation.run_epochs(20).unwrap();
    assert_eq!(simulation.path().len(), 21);
    let last = simulation.current_point().unwrap();
    assert!(last.magnitude() < Vector2::new(5.0, -4.0).magnitude());

    let state = SimulatorState::new(simulation).shared();
    let engine = RenderEngine::new(EngineSettings {
        buffer_size: 120,
        mesh_resolution: 12,
        ..EngineSettings::default()
    });

    let mut camera = CameraController::new(CameraSettings {
        initial_position: Vector3::new(0.0, 20.0, 35.0),
        ..CameraSettings::default()
    });
    camera.key_down(CameraKey::PitchDown);
    for _ in 0..3 {
        camera.step(0.1);
    }
    camera.key_up(CameraKey::PitchDown);
    engine.set_view_transform(camera.step(0.0));
    engine.tick(&state);

    let settings = *engine.settings();
    let frame = engine.snapshot();
    assert_eq!(frame.size, 120);
    assert_eq!(frame.colors.len(), 120 * 120);
    assert!(frame.colors.iter().any(|&c| c != settings.background));

    engine.tick(&state);
    assert_eq!(engine.snapshot(), frame, "identical inputs give identical frames");
    assert_eq!(engine.mesh_revision(), 1);
}
