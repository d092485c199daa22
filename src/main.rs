//! mate-x11
//!
//! Opens the transparent pet window, keeps its shapes in sync with what is
//! drawn and reports visibility until SIGTERM/SIGINT.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mate_x11::config::Config;
use mate_x11::error::X11Error;
use mate_x11::x11::window::{create_pet_window, present_frame};
use mate_x11::x11::{DamageState, Display, ShapeEngine, UpdateLoop, WindowControl};

/// How often the status line is logged
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

/// Opaque ellipse filling the window, drawn until a renderer takes over
fn placeholder_frame(width: u32, height: u32) -> Vec<u8> {
    let (rx, ry) = (width as f32 / 2.0, height as f32 / 2.0);
    let mut rgba = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        for x in 0..width {
            let dx = (x as f32 + 0.5 - rx) / rx;
            let dy = (y as f32 + 0.5 - ry) / ry;
            if dx * dx + dy * dy <= 1.0 {
                rgba.extend_from_slice(&[0x7a, 0xa2, 0xf7, 0xff]);
            } else {
                rgba.extend_from_slice(&[0, 0, 0, 0]);
            }
        }
    }
    rgba
}

/// Explain a startup failure the process cannot recover from
fn report_fatal(err: &X11Error) {
    match err {
        X11Error::ConnectionFailed(_) => {
            error!("{}. Is $DISPLAY set and an X server running?", err)
        }
        X11Error::MissingExtension(_) => {
            error!("{}. The pet window needs SHAPE and DAMAGE support.", err)
        }
        X11Error::NoArgbVisual(_) => {
            error!("{}. Transparency needs a 32-bit TrueColor visual.", err)
        }
        X11Error::NoCompositor(_) => error!(
            "{}. Start a compositor (picom, xfwm4, kwin) or set window.require_compositor = false.",
            err
        ),
        _ => error!("Startup failed: {}", err),
    }
}

struct App {
    control: WindowControl,
    update_loop: UpdateLoop,
}

fn start(config: &Config) -> std::result::Result<App, X11Error> {
    let display = Arc::new(Display::open()?);

    let window = create_pet_window(&display, &config.window)?;
    display.verify_argb(window)?;

    let compositing = match display.check_compositor() {
        Ok(()) => true,
        Err(e @ X11Error::NoCompositor(_)) if !config.window.require_compositor => {
            warn!("{}, continuing without transparency", e);
            false
        }
        Err(e) => return Err(e),
    };

    let (width, height) = (config.window.width, config.window.height);
    let frame = placeholder_frame(width, height);
    present_frame(&display, window, width, height, &frame)?;

    let mut shape = ShapeEngine::new(display.clone(), window, compositing);
    shape.set_full_bounding_shape(width, height)?;
    shape.recompute_input_shape_from_pixels(width, height, &frame)?;
    let shape = Arc::new(Mutex::new(shape));

    let damage = DamageState::create(&display, window)?;
    let update_loop = UpdateLoop::spawn(
        display.clone(),
        window,
        shape,
        Some(damage),
        (width, height),
        &config.update_loop,
    )?;

    let control = WindowControl::new(display, window, &config.window, &config.visibility);
    control.set_topmost(config.window.topmost);
    control.hide_from_taskbar(config.window.hide_from_taskbar);

    Ok(App { control, update_loop })
}

fn log_status(app: &App) {
    let snapshot = app.update_loop.snapshot();
    let position = app.control.position();
    let visible = app.control.is_visible(app.control.window());
    info!(
        "Window {} at ({}, {}) {}x{} visible={} monitors={} shape={:?}",
        app.control.window(),
        position.x,
        position.y,
        snapshot.size.0,
        snapshot.size.1,
        visible,
        snapshot.monitors.len(),
        snapshot.shape_phase,
    );
    debug!(
        "configure_events={} damage_events={} fullscreen={} others={}",
        snapshot.configure_events,
        snapshot.damage_events,
        app.control.is_fullscreen(),
        app.control.visible_windows().len(),
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.filter.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting MateEngine X11 pet window");

    let app = match start(&config) {
        Ok(app) => app,
        Err(e) => {
            report_fatal(&e);
            std::process::exit(1);
        }
    };

    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let mut status_interval = tokio::time::interval(STATUS_INTERVAL);
    status_interval.tick().await; // Skip first immediate tick

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully");
                break;
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully");
                break;
            }
            _ = status_interval.tick() => {
                if !app.update_loop.is_running() {
                    warn!("Update loop stopped, exiting");
                    break;
                }
                log_status(&app);
            }
        }
    }

    app.update_loop.shutdown();
    info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_frame_is_an_opaque_ellipse() {
        let frame = placeholder_frame(40, 20);
        assert_eq!(frame.len(), 40 * 20 * 4);

        let alpha = |x: usize, y: usize| frame[(y * 40 + x) * 4 + 3];
        assert_eq!(alpha(20, 10), 0xff);
        assert_eq!(alpha(0, 0), 0);
        assert_eq!(alpha(39, 19), 0);
    }
}
