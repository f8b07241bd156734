//! Terminal host for the render engine: input mapping, focus tracking and a letterboxed
//! half-block blit of the framebuffer.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{
    DisableFocusChange, DisableMouseCapture, EnableFocusChange, EnableMouseCapture, Event,
    KeyCode, KeyEvent, KeyEventKind, KeyModifiers, KeyboardEnhancementFlags, MouseEventKind,
    PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
};
use crossterm::style::{Color, Print, ResetColor, SetBackgroundColor, SetForegroundColor};
use crossterm::terminal::{
    self, BeginSynchronizedUpdate, Clear, ClearType, EndSynchronizedUpdate,
    EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::{execute, queue};

use crate::camera::{CameraController, CameraKey};
use crate::engine::FrameSnapshot;
use crate::graphics::rgb_channels;
use crate::state::SimulatorState;

/// Share of the available square the image may cover
const MARGIN_FACTOR: f32 = 0.97;

/// Raw mode plus the alternate screen. Everything is restored on drop.
pub struct TerminalSession {
    key_release_events: bool,
}

impl TerminalSession {
    pub fn start(out: &mut impl Write) -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        execute!(
            out,
            EnterAlternateScreen,
            Hide,
            EnableMouseCapture,
            EnableFocusChange,
            Clear(ClearType::All)
        )?;

        let key_release_events = terminal::supports_keyboard_enhancement().unwrap_or(false);
        if key_release_events {
            execute!(
                out,
                PushKeyboardEnhancementFlags(
                    KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
                        | KeyboardEnhancementFlags::REPORT_EVENT_TYPES
                )
            )?;
        }
        log::info!(
            "keyboard enhancement {}",
            if key_release_events {
                "enabled, using key release events"
            } else {
                "unavailable, keys are held for a fixed time"
            }
        );

        Ok(TerminalSession { key_release_events })
    }

    /// Whether the terminal reports key releases
    pub fn key_release_events(&self) -> bool {
        self.key_release_events
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        let mut out = io::stdout();
        if self.key_release_events {
            let _ = execute!(out, PopKeyboardEnhancementFlags);
        }
        let _ = execute!(
            out,
            ResetColor,
            DisableFocusChange,
            DisableMouseCapture,
            Show,
            LeaveAlternateScreen
        );
        let _ = terminal::disable_raw_mode();
    }
}

/// Terminal size in character cells, `(columns, rows)`
pub fn terminal_size() -> (u16, u16) {
    termsize::get()
        .map(|size| (size.cols, size.rows))
        .or_else(|| terminal::size().ok())
        .unwrap_or((80, 24))
}

/// Square region of the terminal the frame is drawn into. Every cell shows two pixels
/// stacked vertically.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Letterbox {
    pub left: u16,
    pub top: u16,
    /// Side length in pixels; always even
    pub side: u16,
}

impl Letterbox {
    /// Largest centered square that fits `cols × rows` cells, shrunk by the margin
    pub fn fit(cols: u16, rows: u16) -> Self {
        let available = cols.min(rows.saturating_mul(2));
        let side = ((available as f32 * MARGIN_FACTOR) as u16) & !1;
        Letterbox {
            left: (cols - side) / 2,
            top: (rows - side / 2) / 2,
            side,
        }
    }

    pub fn cell_rows(&self) -> u16 {
        self.side / 2
    }
}

/// Nearest-neighbour lookup of pixel `(x, y)` of a `side`-sized image in `frame`
pub fn sample(frame: &FrameSnapshot, side: u16, x: u16, y: u16) -> u32 {
    let side = side.max(1) as usize;
    let fx = (x as usize * frame.size / side).min(frame.size.saturating_sub(1));
    let fy = (y as usize * frame.size / side).min(frame.size.saturating_sub(1));
    frame.color_at(fx, fy).unwrap_or(0)
}

fn to_color(argb: u32) -> Color {
    let (r, g, b) = rgb_channels(argb);
    Color::Rgb { r, g, b }
}

/// Maps a key code onto a camera input
pub fn camera_key(code: KeyCode) -> Option<CameraKey> {
    match code {
        KeyCode::Char(c) => match c.to_ascii_lowercase() {
            'w' => Some(CameraKey::Forward),
            's' => Some(CameraKey::Back),
            'a' => Some(CameraKey::Left),
            'd' => Some(CameraKey::Right),
            'r' => Some(CameraKey::Reset),
            _ => None,
        },
        KeyCode::Left => Some(CameraKey::YawLeft),
        KeyCode::Right => Some(CameraKey::YawRight),
        KeyCode::Up => Some(CameraKey::PitchUp),
        KeyCode::Down => Some(CameraKey::PitchDown),
        _ => None,
    }
}

/// What the driver loop should do after an event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Control {
    Continue,
    Quit,
}

/// Render surface widget: owns the camera, turns terminal events into held keys and
/// presents finished frames.
pub struct Viewport {
    camera: CameraController,
    key_release_events: bool,
    key_hold: Duration,
    /// Last press or repeat of every held key, used when releases are not reported
    pressed_at: HashMap<CameraKey, Instant>,
    debug: bool,
    needs_clear: bool,
    frames_since_last_update: usize,
    last_fps_calculation: Instant,
    fps: f64,
}

impl Viewport {
    pub fn new(camera: CameraController, key_hold: Duration) -> Self {
        Viewport {
            camera,
            key_release_events: false,
            key_hold,
            pressed_at: HashMap::new(),
            debug: false,
            needs_clear: true,
            frames_since_last_update: 0,
            last_fps_calculation: Instant::now(),
            fps: 0.0,
        }
    }

    pub fn set_key_release_events(&mut self, enabled: bool) {
        self.key_release_events = enabled;
    }

    pub fn camera(&self) -> &CameraController {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut CameraController {
        &mut self.camera
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn handle_event(&mut self, event: &Event, state: &Mutex<SimulatorState>) -> Control {
        let now = Instant::now();
        match event {
            Event::FocusGained => self.camera.set_focused(true),
            Event::FocusLost => {
                self.camera.set_focused(false);
                self.pressed_at.clear();
            }
            Event::Mouse(mouse) => {
                if matches!(mouse.kind, MouseEventKind::Down(_)) {
                    self.camera.set_focused(true);
                }
            }
            Event::Resize(..) => self.needs_clear = true,
            Event::Key(key) => return self.handle_key(key, state, now),
            _ => {}
        }
        Control::Continue
    }

    fn handle_key(
        &mut self,
        key: &KeyEvent,
        state: &Mutex<SimulatorState>,
        now: Instant,
    ) -> Control {
        if key.kind == KeyEventKind::Release {
            if let Some(camera_key) = camera_key(key.code) {
                self.release(camera_key);
            }
            self.sync_modifiers(key.modifiers, now);
            return Control::Continue;
        }

        self.camera.set_focused(true);
        self.sync_modifiers(key.modifiers, now);
        if let Some(camera_key) = camera_key(key.code) {
            self.press(camera_key, now);
            return Control::Continue;
        }

        if key.kind != KeyEventKind::Press {
            return Control::Continue;
        }
        match key.code {
            KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('Q') => return Control::Quit,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return Control::Quit
            }
            KeyCode::Tab => {
                self.debug = !self.debug;
                self.needs_clear = true;
            }
            KeyCode::Char('p') | KeyCode::Char('P') | KeyCode::Char(' ') => {
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                let running = !state.is_running();
                state.set_running(running);
                log::info!("optimizer {}", if running { "resumed" } else { "paused" });
            }
            _ => {}
        }
        Control::Continue
    }

    fn press(&mut self, key: CameraKey, now: Instant) {
        self.camera.key_down(key);
        if !self.key_release_events {
            self.pressed_at.insert(key, now);
        }
    }

    fn release(&mut self, key: CameraKey) {
        self.camera.key_up(key);
        self.pressed_at.remove(&key);
    }

    /// Shift and Ctrl arrive as modifiers on other keys
    fn sync_modifiers(&mut self, modifiers: KeyModifiers, now: Instant) {
        for (flag, key) in [
            (KeyModifiers::SHIFT, CameraKey::Fast),
            (KeyModifiers::CONTROL, CameraKey::Precise),
        ] {
            if modifiers.contains(flag) {
                self.press(key, now);
            } else {
                self.release(key);
            }
        }
    }

    /// Releases keys whose hold time ran out; a no-op when the terminal reports releases
    pub fn expire_keys(&mut self, now: Instant) {
        if self.key_release_events {
            return;
        }
        let hold = self.key_hold;
        let expired: Vec<CameraKey> = self
            .pressed_at
            .iter()
            .filter(|(_, &at)| now.duration_since(at) >= hold)
            .map(|(&key, _)| key)
            .collect();
        for key in expired {
            self.release(key);
        }
    }

    /// Draws `frame` letterboxed into the terminal, plus the overlays
    pub fn present(
        &mut self,
        out: &mut impl Write,
        frame: &FrameSnapshot,
        state: &Mutex<SimulatorState>,
    ) -> io::Result<()> {
        self.frames_since_last_update += 1;
        let now = Instant::now();
        let duration = now.duration_since(self.last_fps_calculation);
        if duration.as_secs_f64() >= 1.0 {
            self.fps = self.frames_since_last_update as f64 / duration.as_secs_f64();
            self.frames_since_last_update = 0;
            self.last_fps_calculation = now;
        }

        let (cols, rows) = terminal_size();
        let layout = Letterbox::fit(cols, rows);

        queue!(out, BeginSynchronizedUpdate)?;
        if self.needs_clear {
            queue!(out, ResetColor, Clear(ClearType::All))?;
            self.needs_clear = false;
        }

        let mut colors: Option<(u32, u32)> = None;
        for row in 0..layout.cell_rows() {
            queue!(out, MoveTo(layout.left, layout.top + row))?;
            for col in 0..layout.side {
                let upper = sample(frame, layout.side, col, row * 2);
                let lower = sample(frame, layout.side, col, row * 2 + 1);
                if colors != Some((upper, lower)) {
                    queue!(
                        out,
                        SetForegroundColor(to_color(upper)),
                        SetBackgroundColor(to_color(lower))
                    )?;
                    colors = Some((upper, lower));
                }
                queue!(out, Print('▀'))?;
            }
        }
        queue!(out, ResetColor)?;

        let (lines, running) = {
            let state = state.lock().unwrap_or_else(PoisonError::into_inner);
            (self.overlay_lines(&state), state.is_running())
        };
        if self.debug {
            for (i, line) in lines.iter().enumerate() {
                queue!(
                    out,
                    MoveTo(layout.left + 1, layout.top + i as u16),
                    SetForegroundColor(Color::White),
                    SetBackgroundColor(Color::Black),
                    Print(line)
                )?;
            }
        }
        if !running {
            let text = "Paused";
            let x = layout.left + layout.side.saturating_sub(text.len() as u16) / 2;
            queue!(
                out,
                MoveTo(x, layout.top),
                SetForegroundColor(Color::White),
                SetBackgroundColor(Color::Black),
                Print(text)
            )?;
        }

        queue!(out, ResetColor, EndSynchronizedUpdate)?;
        out.flush()
    }

    fn overlay_lines(&self, state: &SimulatorState) -> Vec<String> {
        let camera = &self.camera;
        let simulation = state.simulation();
        let field = simulation
            .field()
            .map_or_else(|| "-".to_string(), |f| f.name().to_string());
        let point = simulation
            .current_point()
            .map_or_else(|| "-".to_string(), |p| p.to_string());
        vec![
            format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            format!("FPS: {:.2}", self.fps),
            format!("Camera: {}", camera.position()),
            format!("Yaw: {:.2}, Pitch: {:.2}", camera.yaw(), camera.pitch()),
            format!("Field: {field}"),
            format!("Point: {point}, path: {}", simulation.path().len()),
            format!("Time scale: {:.1}", state.time_scale()),
        ]
    }
}
