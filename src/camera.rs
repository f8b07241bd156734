//! Free-fly camera with damped linear and angular velocity.

use std::collections::HashSet;
use std::time::Instant;

use crate::math::{Transform, Vector3};

/// Logical camera inputs. The host maps its own key codes onto these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CameraKey {
    Forward,
    Back,
    Left,
    Right,
    YawLeft,
    YawRight,
    PitchUp,
    PitchDown,
    /// Multiplies acceleration and top speed by `fast_factor`
    Fast,
    /// Multiplies acceleration and top speed by `precise_factor`
    Precise,
    Reset,
}

/// Tuning constants for [`CameraController`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraSettings {
    pub initial_position: Vector3,
    pub acceleration: f32,
    pub max_velocity: f32,
    pub fast_factor: f32,
    pub precise_factor: f32,
    /// Fraction of velocity lost per second, in `(0, 1)`
    pub drag: f32,
    /// Degrees per second squared
    pub angular_acceleration: f32,
    /// Degrees per second
    pub max_angular_velocity: f32,
    pub angular_drag: f32,
    /// Pitch is clamped to `±pitch_limit` degrees
    pub pitch_limit: f32,
    /// Longest time step integrated in one tick, in seconds
    pub max_delta: f32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        CameraSettings {
            initial_position: Vector3::new(0.0, 0.0, 30.0),
            acceleration: 1000.0,
            max_velocity: 300.0,
            fast_factor: 7.5,
            precise_factor: 0.15,
            drag: 0.97,
            angular_acceleration: 700.0,
            max_angular_velocity: 90.0,
            angular_drag: 0.98,
            pitch_limit: 85.0,
            max_delta: 0.1,
        }
    }
}

/// Turns held keys into a camera pose and a view transform once per tick
pub struct CameraController {
    settings: CameraSettings,
    keys: HashSet<CameraKey>,
    focused: bool,
    last_tick: Instant,

    position: Vector3,
    /// Camera-local velocity, rotated into world space when integrating
    velocity: Vector3,
    yaw: f32,
    yaw_velocity: f32,
    pitch: f32,
    pitch_velocity: f32,

    view: Transform,
}

impl CameraController {
    pub fn new(settings: CameraSettings) -> Self {
        let mut camera = CameraController {
            settings,
            keys: HashSet::new(),
            focused: true,
            last_tick: Instant::now(),
            position: settings.initial_position,
            velocity: Vector3::ZERO,
            yaw: 0.0,
            yaw_velocity: 0.0,
            pitch: 0.0,
            pitch_velocity: 0.0,
            view: Transform::identity(),
        };
        camera.reset();
        camera
    }

    /// Restores the default pose and stops all motion
    pub fn reset(&mut self) {
        self.position = self.settings.initial_position;
        self.velocity = Vector3::ZERO;
        self.yaw = 0.0;
        self.yaw_velocity = 0.0;
        self.pitch = 0.0;
        self.pitch_velocity = 0.0;
        self.view = self.build_view();
    }

    pub fn key_down(&mut self, key: CameraKey) {
        self.keys.insert(key);
    }

    pub fn key_up(&mut self, key: CameraKey) {
        self.keys.remove(&key);
    }

    pub fn is_held(&self, key: CameraKey) -> bool {
        self.keys.contains(&key)
    }

    /// Whether the render surface currently owns keyboard input
    pub fn set_focused(&mut self, focused: bool) {
        if focused != self.focused {
            log::debug!("camera focus {}", if focused { "gained" } else { "lost" });
        }
        self.focused = focused;
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    pub fn position(&self) -> Vector3 {
        self.position
    }

    pub fn velocity(&self) -> Vector3 {
        self.velocity
    }

    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    /// `(yaw, pitch)` angular velocity in degrees per second
    pub fn angular_velocity(&self) -> (f32, f32) {
        (self.yaw_velocity, self.pitch_velocity)
    }

    pub fn view_transform(&self) -> Transform {
        self.view
    }

    /// Advances by the wall-clock time since the previous tick and returns the new view
    pub fn tick(&mut self) -> Transform {
        let now = Instant::now();
        let delta = now.duration_since(self.last_tick).as_secs_f32();
        self.last_tick = now;
        self.step(delta)
    }

    /// Advances the camera by `delta` seconds (clamped to `max_delta`)
    pub fn step(&mut self, delta: f32) -> Transform {
        let dt = delta.clamp(0.0, self.settings.max_delta);

        if !self.focused {
            self.keys.clear();
        }

        self.apply_inputs(dt);
        self.apply_limits_and_drag(dt);
        self.integrate(dt);

        self.view = self.build_view();
        self.view
    }

    /// Acceleration or top speed scaled by the held modifier keys
    fn modified(&self, base: f32) -> f32 {
        let mut value = base;
        if self.is_held(CameraKey::Fast) {
            value *= self.settings.fast_factor;
        }
        if self.is_held(CameraKey::Precise) {
            value *= self.settings.precise_factor;
        }
        value
    }

    fn apply_inputs(&mut self, dt: f32) {
        let accel = self.modified(self.settings.acceleration) * dt;
        let turn = self.settings.angular_acceleration * dt;

        let thrusts = [
            (CameraKey::Forward, Vector3::new(0.0, 0.0, -accel)),
            (CameraKey::Back, Vector3::new(0.0, 0.0, accel)),
            (CameraKey::Left, Vector3::new(-accel, 0.0, 0.0)),
            (CameraKey::Right, Vector3::new(accel, 0.0, 0.0)),
        ];
        for (key, thrust) in thrusts {
            if self.is_held(key) {
                self.velocity = self.velocity + thrust;
            }
        }

        if self.is_held(CameraKey::YawLeft) {
            self.yaw_velocity -= turn;
        }
        if self.is_held(CameraKey::YawRight) {
            self.yaw_velocity += turn;
        }
        if self.is_held(CameraKey::PitchUp) {
            self.pitch_velocity -= turn;
        }
        if self.is_held(CameraKey::PitchDown) {
            self.pitch_velocity += turn;
        }

        if self.is_held(CameraKey::Reset) {
            self.reset();
        }
    }

    fn apply_limits_and_drag(&mut self, dt: f32) {
        let max_velocity = self.modified(self.settings.max_velocity);
        let max_turn = self.settings.max_angular_velocity;

        self.velocity = self.velocity.clamp_magnitude(max_velocity);
        self.yaw_velocity = self.yaw_velocity.clamp(-max_turn, max_turn);
        self.pitch_velocity = self.pitch_velocity.clamp(-max_turn, max_turn);

        self.velocity = self.velocity * (1.0 - self.settings.drag).powf(dt);
        let angular_decay = (1.0 - self.settings.angular_drag).powf(dt);
        self.yaw_velocity *= angular_decay;
        self.pitch_velocity *= angular_decay;
    }

    fn integrate(&mut self, dt: f32) {
        let orientation = Transform::rotation_x(self.pitch) * Transform::rotation_y(self.yaw);
        let world_velocity = orientation * self.velocity;
        self.position = self.position + world_velocity * dt;

        let limit = self.settings.pitch_limit;
        self.yaw += self.yaw_velocity * dt;
        self.pitch = (self.pitch + self.pitch_velocity * dt).clamp(-limit, limit);
    }

    fn build_view(&self) -> Transform {
        Transform::translation(-self.position)
            * Transform::rotation_y(-self.yaw)
            * Transform::rotation_x(-self.pitch)
    }
}
