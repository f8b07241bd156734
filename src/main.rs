use std::fs::File;
use std::io;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::event;
use log::info;

use wirefield::camera::CameraController;
use wirefield::config::Config;
use wirefield::engine::RenderEngine;
use wirefield::state::SharedState;
use wirefield::widget::{Control, TerminalSession, Viewport};

/// Logs go to `--log-file` when given; the terminal itself belongs to the renderer
fn init_logging(config: &Config) -> Result<()> {
    let default_filter = if config.log_file.is_some() { "info" } else { "off" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter));
    if let Some(path) = &config.log_file {
        let file = File::create(path)
            .with_context(|| format!("could not create log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

/// Single driver thread: input, then optimizer, then camera, then engine, then present
fn run(
    config: &Config,
    state: &SharedState,
    engine: &RenderEngine,
    viewport: &mut Viewport,
) -> Result<()> {
    let frame_time = Duration::from_secs_f64(1.0 / config.fps.max(1) as f64);
    let mut stdout = io::stdout();

    loop {
        let frame_start = Instant::now();

        while event::poll(Duration::ZERO).context("could not poll terminal events")? {
            let event = event::read().context("could not read terminal event")?;
            if viewport.handle_event(&event, state) == Control::Quit {
                return Ok(());
            }
        }
        viewport.expire_keys(Instant::now());

        state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .tick();
        engine.set_view_transform(viewport.camera_mut().tick());
        engine.tick(state);

        let frame = engine.snapshot();
        viewport
            .present(&mut stdout, &frame, state)
            .context("could not draw frame")?;

        if let Some(rest) = frame_time.checked_sub(frame_start.elapsed()) {
            thread::sleep(rest);
        }
    }
}

fn main() -> Result<()> {
    let config = Config::parse();
    init_logging(&config)?;
    info!(
        "Starting {} {} with `{}`",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        config.expr
    );

    let state = config
        .simulator_state()
        .context("could not set up the optimizer")?
        .shared();
    let engine = RenderEngine::new(config.engine_settings());
    let camera = CameraController::new(config.camera_settings());
    let mut viewport = Viewport::new(camera, Duration::from_millis(config.key_hold_ms));

    let mut stdout = io::stdout();
    let session = TerminalSession::start(&mut stdout).context("could not set up the terminal")?;
    viewport.set_key_release_events(session.key_release_events());

    let result = run(&config, &state, &engine, &mut viewport);
    drop(session);

    info!("Exiting");
    result
}
