//! Command-line configuration.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;

use crate::camera::CameraSettings;
use crate::engine::EngineSettings;
use crate::field::{DomainBounds, FieldError, ScalarField};
use crate::graphics::HeightGradient;
use crate::math::Vector2;
use crate::state::{Simulation, SimulationError, SimulatorState};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid color `{0}`, expected #RRGGBB or 0xAARRGGBB")]
    InvalidColor(String),
    #[error("invalid number `{0}`")]
    InvalidNumber(String),
    #[error("expected {expected} comma separated values, found {found}")]
    WrongCount { expected: usize, found: usize },
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
}

/// Parses `#RRGGBB`, `0xRRGGBB` (both opaque) or `0xAARRGGBB`
pub fn parse_color(text: &str) -> Result<u32, ConfigError> {
    let text = text.trim();
    let invalid = || ConfigError::InvalidColor(text.to_string());
    let digits = text
        .strip_prefix('#')
        .or_else(|| text.strip_prefix("0x"))
        .or_else(|| text.strip_prefix("0X"))
        .ok_or_else(invalid)?;
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    let value = u32::from_str_radix(digits, 16).map_err(|_| invalid())?;
    match digits.len() {
        6 => Ok(0xFF00_0000 | value),
        8 if !text.starts_with('#') => Ok(value),
        _ => Err(invalid()),
    }
}

fn parse_list(text: &str, expected: usize) -> Result<Vec<f32>, ConfigError> {
    let values = text
        .split(',')
        .map(|part| {
            let part = part.trim();
            part.parse::<f32>()
                .map_err(|_| ConfigError::InvalidNumber(part.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if values.len() != expected {
        return Err(ConfigError::WrongCount {
            expected,
            found: values.len(),
        });
    }
    Ok(values)
}

/// Parses `xmin,xmax,ymin,ymax,zmin,zmax`
pub fn parse_domain(text: &str) -> Result<DomainBounds, ConfigError> {
    let v = parse_list(text, 6)?;
    Ok(DomainBounds::new(v[0], v[1], v[2], v[3], v[4], v[5])?)
}

/// Parses `x,y`
pub fn parse_point(text: &str) -> Result<Vector2, ConfigError> {
    let v = parse_list(text, 2)?;
    Ok(Vector2::new(v[0], v[1]))
}

/// Wireframe viewer for scalar fields and the gradient descent path across them
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Field expression in x and y
    #[arg(short, long, default_value = "x^2 + y^2")]
    pub expr: String,

    /// Domain and height range: xmin,xmax,ymin,ymax,zmin,zmax
    #[arg(
        long,
        value_parser = parse_domain,
        default_value = "-10,10,-10,10,-10,10",
        allow_hyphen_values = true
    )]
    pub domain: DomainBounds,

    /// Starting point of the optimizer: x,y
    #[arg(long, value_parser = parse_point, default_value = "7,-5", allow_hyphen_values = true)]
    pub start: Vector2,

    #[arg(long, default_value_t = 0.01)]
    pub learning_rate: f32,

    /// Optimizer time multiplier, clamped to [1, 20]
    #[arg(long, default_value_t = 1.0)]
    pub time_scale: f32,

    /// Start with the optimizer paused
    #[arg(long)]
    pub paused: bool,

    /// Framebuffer side length in pixels
    #[arg(long, default_value_t = 350)]
    pub buffer_size: usize,

    /// Surface samples per axis
    #[arg(long, default_value_t = 48)]
    pub mesh_resolution: usize,

    #[arg(long, default_value_t = -0.1, allow_hyphen_values = true)]
    pub clip_z: f32,

    #[arg(long, default_value_t = 7.5)]
    pub fast_factor: f32,
    #[arg(long, default_value_t = 0.15)]
    pub precise_factor: f32,
    #[arg(long, default_value_t = 300.0)]
    pub max_velocity: f32,
    #[arg(long, default_value_t = 1000.0)]
    pub acceleration: f32,
    #[arg(long, default_value_t = 0.97)]
    pub drag: f32,
    #[arg(long, default_value_t = 700.0)]
    pub angular_acceleration: f32,
    #[arg(long, default_value_t = 90.0)]
    pub max_angular_velocity: f32,
    #[arg(long, default_value_t = 0.98)]
    pub angular_drag: f32,

    #[arg(long, value_parser = parse_color, default_value = "#000000")]
    pub background: u32,
    #[arg(long, value_parser = parse_color, default_value = "#CC4444")]
    pub axis_x_color: u32,
    #[arg(long, value_parser = parse_color, default_value = "#44CC44")]
    pub axis_y_color: u32,
    #[arg(long, value_parser = parse_color, default_value = "#4488CC")]
    pub axis_z_color: u32,
    #[arg(long, value_parser = parse_color, default_value = "#3A3A3A")]
    pub grid_color: u32,
    #[arg(long, value_parser = parse_color, default_value = "#FFD200")]
    pub path_color: u32,
    /// Surface color at the lowest height
    #[arg(long, value_parser = parse_color, default_value = "#1E6EFF")]
    pub low_color: u32,
    /// Surface color at the highest height
    #[arg(long, value_parser = parse_color, default_value = "#FF463C")]
    pub high_color: u32,

    /// Target frames per second
    #[arg(long, default_value_t = 60)]
    pub fps: u32,

    /// How long a key counts as held after its last press, for terminals that do not
    /// report key releases
    #[arg(long, default_value_t = 180)]
    pub key_hold_ms: u64,

    /// Write logs to this file (the terminal is used for rendering)
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Config {
    pub fn camera_settings(&self) -> CameraSettings {
        CameraSettings {
            acceleration: self.acceleration,
            max_velocity: self.max_velocity,
            fast_factor: self.fast_factor,
            precise_factor: self.precise_factor,
            drag: self.drag,
            angular_acceleration: self.angular_acceleration,
            max_angular_velocity: self.max_angular_velocity,
            angular_drag: self.angular_drag,
            ..CameraSettings::default()
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            buffer_size: self.buffer_size,
            mesh_resolution: self.mesh_resolution,
            clip_z: self.clip_z,
            background: self.background,
            axis_x_color: self.axis_x_color,
            axis_y_color: self.axis_y_color,
            axis_z_color: self.axis_z_color,
            grid_color: self.grid_color,
            path_color: self.path_color,
            gradient: HeightGradient {
                low: self.low_color,
                high: self.high_color,
            },
            ..EngineSettings::default()
        }
    }

    /// Parses the field, places the optimizer at the start point and applies the
    /// run controls
    pub fn simulator_state(&self) -> Result<SimulatorState, ConfigError> {
        let field = ScalarField::from_expression(&self.expr)?.with_bounds(self.domain);

        let mut simulation = Simulation::default();
        simulation.set_learning_rate(self.learning_rate);
        simulation.set_field(Arc::new(field));
        simulation.set_initial_point(self.start.x, self.start.y)?;

        let mut state = SimulatorState::new(simulation);
        state.set_time_scale(self.time_scale);
        state.set_running(!self.paused);
        Ok(state)
    }
}
