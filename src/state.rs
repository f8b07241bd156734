use std::sync::{Arc, Mutex};
use std::time::Instant;

use thiserror::Error;

use crate::field::{DomainBounds, FieldError, ScalarField};
use crate::math::Vector2;

pub const TIME_SCALE_MIN: f32 = 1.0;
pub const TIME_SCALE_MAX: f32 = 20.0;
/// Longest wall-clock step fed to the optimizer after a stall
pub const MAX_DELTA: f32 = 0.1;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimulationError {
    #[error("no scalar field loaded")]
    NoField,
    #[error("initial point not set")]
    NoStartPoint,
    #[error(transparent)]
    Field(#[from] FieldError),
}

/// Result of a single descent step
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StepOutcome {
    Moved(Vector2),
    /// Gradient fell below the stop threshold; the point did not move
    Converged(Vector2),
}

/// Gradient descent over a scalar field, recording every visited point
#[derive(Clone, Debug)]
pub struct Simulation {
    field: Option<Arc<ScalarField>>,
    current: Option<Vector2>,
    path: Vec<Vector2>,
    learning_rate: f32,
    stop_threshold: f32,
    max_iterations: usize,
    time_elapsed: f32,
}

impl Default for Simulation {
    fn default() -> Self {
        Simulation {
            field: None,
            current: None,
            path: Vec::new(),
            learning_rate: 0.01,
            stop_threshold: 0.0001,
            max_iterations: 5000,
            time_elapsed: 0.0,
        }
    }
}

impl Simulation {
    pub fn field(&self) -> Option<&Arc<ScalarField>> {
        self.field.as_ref()
    }

    pub fn path(&self) -> &[Vector2] {
        &self.path
    }

    pub fn current_point(&self) -> Option<Vector2> {
        self.current
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    pub fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }

    pub fn stop_threshold(&self) -> f32 {
        self.stop_threshold
    }

    pub fn set_stop_threshold(&mut self, threshold: f32) {
        self.stop_threshold = threshold;
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn set_max_iterations(&mut self, max_iterations: usize) {
        self.max_iterations = max_iterations;
    }

    pub fn time_elapsed(&self) -> f32 {
        self.time_elapsed
    }

    pub fn set_time_elapsed(&mut self, time: f32) {
        self.time_elapsed = time.max(0.0);
    }

    /// Replaces the field and forgets the current point and path
    pub fn set_field(&mut self, field: Arc<ScalarField>) {
        log::info!("loaded scalar field `{}`", field.name());
        self.field = Some(field);
        self.current = None;
        self.path.clear();
    }

    /// Changes the bounds of the loaded field. The renderer sees a new field identity
    /// whenever the field is shared, so its mesh cache rebuilds.
    pub fn set_domain(&mut self, bounds: DomainBounds) -> Result<(), SimulationError> {
        let field = self.field.as_mut().ok_or(SimulationError::NoField)?;
        Arc::make_mut(field).set_bounds(bounds);
        log::info!("domain of `{}` set to {bounds:?}", field.name());
        Ok(())
    }

    /// Starts a new path at `(x, y)`
    pub fn set_initial_point(&mut self, x: f32, y: f32) -> Result<(), SimulationError> {
        self.ensure_field()?;
        let start = Vector2::new(x, y);
        self.current = Some(start);
        self.path.clear();
        self.path.push(start);
        log::info!("initial point set to {start}");
        Ok(())
    }

    /// Replaces the recorded path; the last point becomes the current point
    pub fn overwrite_path(&mut self, path: Vec<Vector2>) {
        self.current = path.last().copied();
        self.path = path;
    }

    /// Takes one descent step of `learning_rate · ∇f`, unless the gradient is already
    /// below the stop threshold.
    pub fn step(&mut self, delta: f32) -> Result<StepOutcome, SimulationError> {
        let (field, point) = self.ready()?;
        let grad = field.gradient_at(point.x, point.y)?;

        if grad.magnitude() < self.stop_threshold {
            log::info!("convergence reached at {point}");
            return Ok(StepOutcome::Converged(point));
        }

        let next = point - grad * self.learning_rate;
        self.current = Some(next);
        self.path.push(next);
        self.time_elapsed += delta;
        log::trace!("step taken to {next}");
        Ok(StepOutcome::Moved(next))
    }

    /// Runs `epochs` unconditional steps, stopping early at the first evaluation failure.
    /// Returns how many steps completed.
    pub fn run_epochs(&mut self, epochs: usize) -> Result<usize, SimulationError> {
        let (field, mut point) = self.ready()?;
        let mut completed = 0;
        for _ in 0..epochs {
            match field.gradient_at(point.x, point.y) {
                Ok(grad) => {
                    point = point - grad * self.learning_rate;
                    self.path.push(point);
                    completed += 1;
                }
                Err(err) => {
                    log::warn!("manual epochs halted: {err}");
                    break;
                }
            }
        }
        self.current = Some(point);
        log::info!("ran {completed} manual epochs");
        Ok(completed)
    }

    /// Steps until convergence or `max_iterations`, returning the iteration count
    pub fn run_until_converged(&mut self, delta: f32) -> Result<usize, SimulationError> {
        for iteration in 0..self.max_iterations {
            if let StepOutcome::Converged(_) = self.step(delta)? {
                return Ok(iteration);
            }
        }
        log::info!("max iterations reached without convergence");
        Ok(self.max_iterations)
    }

    fn ensure_field(&self) -> Result<Arc<ScalarField>, SimulationError> {
        self.field.clone().ok_or(SimulationError::NoField)
    }

    fn ready(&self) -> Result<(Arc<ScalarField>, Vector2), SimulationError> {
        let field = self.ensure_field()?;
        let point = self.current.ok_or(SimulationError::NoStartPoint)?;
        Ok((field, point))
    }
}

/// Simulation plus the play/pause and time-scale controls driven once per frame
pub struct SimulatorState {
    simulation: Simulation,
    running: bool,
    time_scale: f32,
    last_tick: Instant,
}

/// The lock the render engine takes before its framebuffer lock
pub type SharedState = Arc<Mutex<SimulatorState>>;

impl SimulatorState {
    pub fn new(simulation: Simulation) -> Self {
        SimulatorState {
            simulation,
            running: false,
            time_scale: TIME_SCALE_MIN,
            last_tick: Instant::now(),
        }
    }

    pub fn shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    pub fn simulation(&self) -> &Simulation {
        &self.simulation
    }

    pub fn simulation_mut(&mut self) -> &mut Simulation {
        &mut self.simulation
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    pub fn time_scale(&self) -> f32 {
        self.time_scale
    }

    pub fn set_time_scale(&mut self, scale: f32) {
        self.time_scale = scale.clamp(TIME_SCALE_MIN, TIME_SCALE_MAX);
    }

    /// Advances by the wall-clock time since the last tick
    pub fn tick(&mut self) {
        let now = Instant::now();
        let delta = now.duration_since(self.last_tick).as_secs_f32();
        self.last_tick = now;
        self.advance(delta);
    }

    /// Takes one optimizer step scaled by the time scale while running. Stops running on
    /// convergence or when the optimizer cannot continue.
    pub fn advance(&mut self, delta: f32) {
        if !self.running {
            return;
        }

        let delta = delta.clamp(0.0, MAX_DELTA);
        match self.simulation.step(delta * self.time_scale) {
            Ok(StepOutcome::Moved(_)) => {}
            Ok(StepOutcome::Converged(_)) => self.running = false,
            Err(err) => {
                log::warn!("optimizer stopped: {err}");
                self.running = false;
            }
        }
    }
}
