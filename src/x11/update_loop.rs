//! Damage-Driven Update Loop
//!
//! A dedicated thread that drains the X event queue for the pet window:
//! configure events rebuild both shapes and refresh the monitor list, damage
//! events refresh the input shape, and destroy ends the loop. The main thread
//! reads the loop's state through [`LoopSnapshot`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};
use x11rb::connection::Connection as _;
use x11rb::protocol::{ErrorKind, Event};
use x11rb::x11_utils::X11Error as ProtocolError;

use crate::config::UpdateLoopConfig;
use crate::error::{Result, X11Error};
use crate::shared::{MonitorList, ShapeMask};
use crate::x11::damage::{self, DamageState};
use crate::x11::display::Display;
use crate::x11::event_stream::EventStream;
use crate::x11::query;
use crate::x11::shape::{ShapeEngine, ShapePhase};
use crate::x11::WindowId;

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// State published by the loop, replaced wholesale on every change
#[derive(Debug, Clone, Default)]
pub struct LoopSnapshot {
    pub monitors: MonitorList,
    pub size: (u32, u32),
    pub shape_phase: ShapePhase,
    pub configure_events: u64,
    pub damage_events: u64,
    /// Pixels currently accepting pointer input
    pub input_pixels: usize,
    pub protocol_errors: u64,
    pub running: bool,
}

/// What an event means for the pet window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopAction {
    Resized { width: u32, height: u32 },
    Moved,
    Damaged,
    Destroyed,
    /// Asynchronous error for an earlier unchecked request
    ProtocolError { expected: bool, affects_shape: bool },
    Ignore,
}

/// Errors that routinely race with window destruction
fn is_expected_error(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::Window | ErrorKind::Drawable | ErrorKind::Match | ErrorKind::DamageBadDamage
    )
}

/// Errors raised by the requests a shape upload is made of
fn affects_shape(error: &ProtocolError) -> bool {
    error.extension_name.as_deref() == Some("SHAPE")
        || matches!(error.request_name, Some("PutImage" | "CreatePixmap" | "CreateGC"))
}

pub(crate) fn classify(event: &Event, window: WindowId, damage: Option<u32>, size: (u32, u32)) -> LoopAction {
    match event {
        Event::ConfigureNotify(e) if e.window == window.raw() => {
            let new_size = (e.width as u32, e.height as u32);
            if new_size != size {
                LoopAction::Resized { width: new_size.0, height: new_size.1 }
            } else {
                LoopAction::Moved
            }
        }
        Event::DamageNotify(e) if Some(e.damage) == damage => LoopAction::Damaged,
        Event::DestroyNotify(e) if e.window == window.raw() => LoopAction::Destroyed,
        Event::Error(e) => LoopAction::ProtocolError {
            expected: is_expected_error(e.error_kind),
            affects_shape: affects_shape(e),
        },
        _ => LoopAction::Ignore,
    }
}

/// Sends on drop so the owner learns the thread has exited, even on panic
struct ExitSignal(mpsc::Sender<()>);

impl Drop for ExitSignal {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

/// Wait up to `timeout` for a thread holding the matching [`ExitSignal`]
///
/// Returns `false` when the thread is still running; it is then detached.
fn join_with_timeout(handle: JoinHandle<()>, exited: &mpsc::Receiver<()>, timeout: Duration) -> bool {
    match exited.recv_timeout(timeout) {
        Ok(()) | Err(RecvTimeoutError::Disconnected) => {
            if handle.join().is_err() {
                warn!("Update loop thread panicked");
            }
            true
        }
        Err(RecvTimeoutError::Timeout) => false,
    }
}

struct LoopContext {
    display: Arc<Display>,
    window: WindowId,
    shape: Arc<Mutex<ShapeEngine>>,
    damage: Option<u32>,
    cancel: Cancellation,
    snapshot: Arc<RwLock<LoopSnapshot>>,
    idle_poll: Duration,
    monitor_refresh: Duration,
}

pub struct UpdateLoop {
    display: Arc<Display>,
    damage: Option<DamageState>,
    cancel: Cancellation,
    snapshot: Arc<RwLock<LoopSnapshot>>,
    handle: JoinHandle<()>,
    exited: mpsc::Receiver<()>,
    shutdown_timeout: Duration,
}

impl UpdateLoop {
    /// Start the loop for `window`, taking ownership of its damage object
    pub fn spawn(
        display: Arc<Display>,
        window: WindowId,
        shape: Arc<Mutex<ShapeEngine>>,
        damage: Option<DamageState>,
        initial_size: (u32, u32),
        config: &UpdateLoopConfig,
    ) -> Result<Self> {
        let cancel = Cancellation::default();
        let (shape_phase, input_pixels) = {
            let shape = shape.lock().unwrap_or_else(PoisonError::into_inner);
            (shape.phase(), shape.input_mask().map_or(0, ShapeMask::count_set))
        };
        let snapshot = Arc::new(RwLock::new(LoopSnapshot {
            monitors: query::enumerate_monitors(&display),
            size: initial_size,
            shape_phase,
            input_pixels,
            running: true,
            ..LoopSnapshot::default()
        }));

        let context = LoopContext {
            display: display.clone(),
            window,
            shape,
            damage: damage.as_ref().map(DamageState::id),
            cancel: cancel.clone(),
            snapshot: snapshot.clone(),
            idle_poll: Duration::from_millis(config.idle_poll_ms.max(1)),
            monitor_refresh: Duration::from_secs(config.monitor_refresh_secs.max(1)),
        };

        let (exit_tx, exited) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("x11-update-loop".into())
            .spawn(move || {
                let _exit = ExitSignal(exit_tx);
                run(context);
            })
            .map_err(X11Error::Spawn)?;

        info!("Update loop started for window {}", window);

        Ok(Self {
            display,
            damage,
            cancel,
            snapshot,
            handle,
            exited,
            shutdown_timeout: Duration::from_millis(config.shutdown_timeout_ms),
        })
    }

    /// Latest published state
    pub fn snapshot(&self) -> LoopSnapshot {
        self.snapshot.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Ordered, best-effort teardown
    ///
    /// Cancel, wait (bounded) for the thread, destroy the damage object, sync,
    /// close the display. A failing step is logged and the next one still runs.
    pub fn shutdown(self) {
        self.cancel.cancel();

        if join_with_timeout(self.handle, &self.exited, self.shutdown_timeout) {
            debug!("Update loop thread exited");
        } else {
            warn!(
                "Update loop did not stop within {:?}, releasing resources anyway",
                self.shutdown_timeout
            );
        }

        if let Some(damage) = self.damage {
            if let Err(e) = damage.destroy(&self.display) {
                warn!("Failed to destroy damage object: {}", e);
            }
        }

        if let Err(e) = self.display.sync() {
            warn!("Final sync failed: {}", e);
        }

        self.display.close();
    }
}

fn run(ctx: LoopContext) {
    let mut stream = match EventStream::new(ctx.display.fd()) {
        Ok(stream) => Some(stream),
        Err(e) => {
            warn!("Falling back to timed polling: {:#}", e);
            None
        }
    };
    let mut last_refresh = Instant::now();

    loop {
        if ctx.cancel.is_cancelled() {
            debug!("Update loop cancelled");
            break;
        }

        let event = match ctx.display.call(|conn| Ok(conn.poll_for_event()?)) {
            Ok(event) => event,
            Err(X11Error::Closed) => {
                debug!("Display closed, stopping update loop");
                break;
            }
            Err(X11Error::Connection(e)) => {
                error!("X connection lost, stopping update loop: {}", e);
                break;
            }
            Err(e) => {
                warn!("Polling X events failed: {}", e);
                idle(&mut stream, ctx.idle_poll);
                continue;
            }
        };

        let Some(event) = event else {
            if last_refresh.elapsed() >= ctx.monitor_refresh {
                refresh_monitors(&ctx);
                last_refresh = Instant::now();
            }
            idle(&mut stream, ctx.idle_poll);
            continue;
        };

        let size = read_snapshot(&ctx).size;
        match classify(&event, ctx.window, ctx.damage, size) {
            LoopAction::Resized { width, height } => {
                debug!("Window {} resized to {}x{}", ctx.window, width, height);
                let report = with_shape(&ctx, |shape| shape.on_resize(width, height));
                publish(&ctx, |snapshot| {
                    snapshot.size = (width, height);
                    snapshot.configure_events += 1;
                    report.apply(snapshot);
                });
                refresh_monitors(&ctx);
                last_refresh = Instant::now();
            }
            LoopAction::Moved => {
                publish(&ctx, |snapshot| snapshot.configure_events += 1);
                refresh_monitors(&ctx);
                last_refresh = Instant::now();
            }
            LoopAction::Damaged => {
                let (width, height) = size;
                let report = with_shape(&ctx, |shape| {
                    if let Some(damage) = ctx.damage {
                        damage::subtract(&ctx.display, damage)?;
                    }
                    shape.recompute_input_shape(width, height)
                });
                publish(&ctx, |snapshot| {
                    snapshot.damage_events += 1;
                    report.apply(snapshot);
                });
            }
            LoopAction::Destroyed => {
                info!("Window {} destroyed, stopping update loop", ctx.window);
                break;
            }
            LoopAction::ProtocolError { expected, affects_shape } => {
                if expected {
                    trace!("X11 error (expected for destroyed windows): {:?}", event);
                } else {
                    warn!("X11 error: {:?}", event);
                }
                let report = if affects_shape {
                    with_shape(&ctx, |shape| {
                        shape.mark_input_stale();
                        Ok(())
                    })
                } else {
                    ShapeReport::default()
                };
                publish(&ctx, |snapshot| {
                    snapshot.protocol_errors += 1;
                    report.apply(snapshot);
                });
            }
            LoopAction::Ignore => {}
        }
    }

    publish(&ctx, |snapshot| snapshot.running = false);
}

fn idle(stream: &mut Option<EventStream>, timeout: Duration) {
    match stream {
        Some(stream) => {
            if let Err(e) = stream.wait_readable(timeout) {
                warn!("{:#}", e);
                thread::sleep(timeout);
            }
        }
        None => thread::sleep(timeout),
    }
}

/// Shape engine state after an operation, empty when the operation failed
#[derive(Debug, Default)]
struct ShapeReport(Option<(ShapePhase, usize)>);

impl ShapeReport {
    fn apply(&self, snapshot: &mut LoopSnapshot) {
        if let Some((phase, input_pixels)) = self.0 {
            snapshot.shape_phase = phase;
            snapshot.input_pixels = input_pixels;
        }
    }
}

/// Run a shape operation, logging failures
fn with_shape(ctx: &LoopContext, f: impl FnOnce(&mut ShapeEngine) -> Result<()>) -> ShapeReport {
    let mut shape = ctx.shape.lock().unwrap_or_else(PoisonError::into_inner);
    match f(&mut shape) {
        Ok(()) => ShapeReport(Some((
            shape.phase(),
            shape.input_mask().map_or(0, ShapeMask::count_set),
        ))),
        Err(e) => {
            warn!("Shape update for window {} failed: {}", ctx.window, e);
            ShapeReport::default()
        }
    }
}

fn refresh_monitors(ctx: &LoopContext) {
    if ctx.display.is_closed() {
        return;
    }
    let monitors = query::enumerate_monitors(&ctx.display);
    publish(ctx, |snapshot| snapshot.monitors = monitors);
}

fn read_snapshot(ctx: &LoopContext) -> LoopSnapshot {
    ctx.snapshot.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn publish(ctx: &LoopContext, update: impl FnOnce(&mut LoopSnapshot)) {
    let mut next = read_snapshot(ctx);
    update(&mut next);
    *ctx.snapshot.write().unwrap_or_else(PoisonError::into_inner) = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use x11rb::protocol::damage::{NotifyEvent as DamageNotifyEvent, ReportLevel};
    use x11rb::protocol::xproto::{ConfigureNotifyEvent, DestroyNotifyEvent, Rectangle};

    const SELF: WindowId = WindowId::from_raw(0x2a00003);

    fn configure(window: u32, width: u16, height: u16) -> Event {
        Event::ConfigureNotify(ConfigureNotifyEvent {
            response_type: 22,
            sequence: 0,
            event: window,
            window,
            above_sibling: 0,
            x: 10,
            y: 20,
            width,
            height,
            border_width: 0,
            override_redirect: false,
        })
    }

    #[test]
    fn test_classify_configure() {
        assert_eq!(
            classify(&configure(SELF.raw(), 400, 600), SELF, None, (320, 480)),
            LoopAction::Resized { width: 400, height: 600 }
        );
        assert_eq!(classify(&configure(SELF.raw(), 320, 480), SELF, None, (320, 480)), LoopAction::Moved);
        assert_eq!(classify(&configure(0x999, 400, 600), SELF, None, (320, 480)), LoopAction::Ignore);
    }

    #[test]
    fn test_classify_destroy() {
        let destroy = |window| {
            Event::DestroyNotify(DestroyNotifyEvent {
                response_type: 17,
                sequence: 0,
                event: window,
                window,
            })
        };
        assert_eq!(classify(&destroy(SELF.raw()), SELF, Some(7), (1, 1)), LoopAction::Destroyed);
        assert_eq!(classify(&destroy(0x1234), SELF, Some(7), (1, 1)), LoopAction::Ignore);
    }

    fn damage_notify(damage: u32) -> Event {
        let area = Rectangle { x: 0, y: 0, width: 320, height: 480 };
        Event::DamageNotify(DamageNotifyEvent {
            response_type: 91,
            level: ReportLevel::NON_EMPTY,
            sequence: 0,
            drawable: SELF.raw(),
            damage,
            timestamp: 0,
            area,
            geometry: area,
        })
    }

    fn protocol_error(kind: ErrorKind, extension: Option<&str>, request: &'static str) -> Event {
        Event::Error(ProtocolError {
            error_kind: kind,
            error_code: 8,
            sequence: 0,
            bad_value: SELF.raw(),
            minor_opcode: 6,
            major_opcode: 129,
            extension_name: extension.map(str::to_string),
            request_name: Some(request),
        })
    }

    #[test]
    fn test_classify_damage() {
        assert_eq!(classify(&damage_notify(7), SELF, Some(7), (320, 480)), LoopAction::Damaged);
        assert_eq!(classify(&damage_notify(9), SELF, Some(7), (320, 480)), LoopAction::Ignore);
        assert_eq!(classify(&damage_notify(7), SELF, None, (320, 480)), LoopAction::Ignore);
    }

    #[test]
    fn test_classify_protocol_errors() {
        let rejected_mask = protocol_error(ErrorKind::Match, Some("SHAPE"), "Mask");
        assert_eq!(
            classify(&rejected_mask, SELF, Some(7), (1, 1)),
            LoopAction::ProtocolError { expected: true, affects_shape: true }
        );

        let bad_image = protocol_error(ErrorKind::Value, None, "PutImage");
        assert_eq!(
            classify(&bad_image, SELF, Some(7), (1, 1)),
            LoopAction::ProtocolError { expected: false, affects_shape: true }
        );

        let gone_damage = protocol_error(ErrorKind::DamageBadDamage, Some("DAMAGE"), "Subtract");
        assert_eq!(
            classify(&gone_damage, SELF, Some(7), (1, 1)),
            LoopAction::ProtocolError { expected: true, affects_shape: false }
        );
    }

    #[test]
    fn test_join_with_timeout_detaches_wedged_thread() {
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            let _exit = ExitSignal(tx);
            thread::sleep(Duration::from_millis(500));
        });

        let started = Instant::now();
        assert!(!join_with_timeout(handle, &rx, Duration::from_millis(20)));
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[test]
    fn test_join_with_timeout_joins_finished_thread() {
        let cancel = Cancellation::default();
        let (tx, rx) = mpsc::channel();
        let flag = cancel.clone();
        let handle = thread::spawn(move || {
            let _exit = ExitSignal(tx);
            while !flag.is_cancelled() {
                thread::sleep(Duration::from_millis(1));
            }
        });

        cancel.cancel();
        assert!(join_with_timeout(handle, &rx, Duration::from_secs(5)));
    }
}
