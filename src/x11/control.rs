//! Window Control Facade
//!
//! The verbs the rest of the application calls. Mutations are sent to the
//! window manager and flushed without waiting for an acknowledgment. Protocol
//! failures never cross this boundary: they are logged and turned into a
//! sentinel (`Point::ZERO`, `false`, an empty list or `None`).

use std::sync::Arc;

use bitflags::bitflags;
use tracing::{debug, warn};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{
    Atom, ClientMessageEvent, ConfigureWindowAux, ConnectionExt as _, EventMask,
};

use crate::config::{MoveMode, VisibilityConfig, WindowConfig};
use crate::error::{Result, X11Error};
use crate::shared::{DragTracker, MonitorList, Point, Rect};
use crate::x11::display::Display;
use crate::x11::query::{self, MouseButtons};
use crate::x11::{occlusion, WindowId};

bitflags! {
    /// `_NET_MOVERESIZE_WINDOW` flags word (gravity lives in the low byte)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MoveResizeFlags: u32 {
        const X                = 1 << 8;
        const Y                = 1 << 9;
        const WIDTH            = 1 << 10;
        const HEIGHT           = 1 << 11;
        const FROM_APPLICATION = 1 << 12;
        const FROM_PAGER       = 1 << 13;
    }
}

/// `_NET_WM_STATE` client message action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum StateAction {
    Remove = 0,
    Add = 1,
    Toggle = 2,
}

impl From<bool> for StateAction {
    fn from(enable: bool) -> Self {
        if enable { StateAction::Add } else { StateAction::Remove }
    }
}

/// Source indication for client messages sent by a normal application
const SOURCE_APPLICATION: u32 = 1;

fn moveresize_data(flags: MoveResizeFlags, x: i32, y: i32, width: u32, height: u32) -> [u32; 5] {
    [flags.bits(), x as u32, y as u32, width, height]
}

fn wm_state_data(action: StateAction, first: Atom, second: Atom) -> [u32; 5] {
    [action as u32, first, second, SOURCE_APPLICATION, 0]
}

/// Fullscreen when the window covers a whole monitor and, if the window
/// manager publishes `_NET_WM_STATE`, that state includes fullscreen
fn fullscreen_verdict(
    rect: &Rect,
    monitors: &[Rect],
    state: Option<&[Atom]>,
    fullscreen: Atom,
) -> bool {
    let covers_monitor = monitors.iter().any(|m| {
        rect.x <= m.x && rect.y <= m.y && rect.right() >= m.right() && rect.bottom() >= m.bottom()
    });

    match state {
        Some(atoms) => covers_monitor && atoms.contains(&fullscreen),
        None => covers_monitor,
    }
}

fn is_desktop_or_dock(types: &[Atom], desktop: Atom, dock: Atom) -> bool {
    types.iter().any(|&t| t == desktop || t == dock)
}

pub struct WindowControl {
    display: Arc<Display>,
    window: WindowId,
    move_mode: MoveMode,
    area_epsilon: f64,
    drag: DragTracker,
}

impl WindowControl {
    pub fn new(
        display: Arc<Display>,
        window: WindowId,
        window_config: &WindowConfig,
        visibility: &VisibilityConfig,
    ) -> Self {
        Self {
            display,
            window,
            move_mode: window_config.move_mode,
            area_epsilon: visibility.area_epsilon,
            drag: DragTracker::new(),
        }
    }

    pub fn window(&self) -> WindowId {
        self.window
    }

    // Position and size

    pub fn position(&self) -> Point {
        self.self_rect().map(|r| r.origin()).unwrap_or(Point::ZERO)
    }

    pub fn set_position(&self, x: i32, y: i32) {
        let result = match self.move_mode {
            MoveMode::WmMessage => self.send_moveresize(
                MoveResizeFlags::X | MoveResizeFlags::Y | MoveResizeFlags::FROM_APPLICATION,
                x,
                y,
                0,
                0,
            ),
            MoveMode::Direct => self.configure(ConfigureWindowAux::new().x(x).y(y)),
        };
        if let Err(e) = result {
            warn!("Failed to move window {} to ({}, {}): {}", self.window, x, y, e);
        }
    }

    /// Current size, `(0, 0)` when the window cannot be queried
    pub fn size(&self) -> (u32, u32) {
        self.self_rect().map(|r| (r.width, r.height)).unwrap_or((0, 0))
    }

    pub fn set_size(&self, width: u32, height: u32) {
        let result = match self.move_mode {
            MoveMode::WmMessage => self.send_moveresize(
                MoveResizeFlags::WIDTH
                    | MoveResizeFlags::HEIGHT
                    | MoveResizeFlags::FROM_APPLICATION,
                0,
                0,
                width,
                height,
            ),
            MoveMode::Direct => {
                self.configure(ConfigureWindowAux::new().width(width).height(height))
            }
        };
        if let Err(e) = result {
            warn!("Failed to resize window {} to {}x{}: {}", self.window, width, height, e);
        }
    }

    // Window manager state

    pub fn set_topmost(&self, topmost: bool) {
        let above = self.display.atoms.net_wm_state_above;
        if let Err(e) = self.send_wm_state(StateAction::from(topmost), above, 0) {
            warn!("Failed to set topmost={} on window {}: {}", topmost, self.window, e);
        }
    }

    pub fn hide_from_taskbar(&self, hide: bool) {
        let atoms = &self.display.atoms;
        if let Err(e) = self.send_wm_state(
            StateAction::from(hide),
            atoms.net_wm_state_skip_taskbar,
            atoms.net_wm_state_skip_pager,
        ) {
            warn!("Failed to set skip-taskbar={} on window {}: {}", hide, self.window, e);
        }
    }

    pub fn is_maximized(&self) -> bool {
        self.is_window_maximized(self.window)
    }

    pub fn is_window_maximized(&self, window: WindowId) -> bool {
        let atoms = &self.display.atoms;
        match query::wm_state(&self.display, window) {
            Ok(Some(state)) => {
                state.contains(&atoms.net_wm_state_maximized_horz)
                    && state.contains(&atoms.net_wm_state_maximized_vert)
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Failed to read _NET_WM_STATE of {}: {}", window, e);
                false
            }
        }
    }

    pub fn is_fullscreen(&self) -> bool {
        self.is_window_fullscreen(self.window)
    }

    pub fn is_window_fullscreen(&self, window: WindowId) -> bool {
        let rect = match query::window_rect(&self.display, window) {
            Ok(rect) => rect,
            Err(e) => {
                warn!("Fullscreen check failed for {}: {}", window, e);
                return false;
            }
        };

        // A window manager without EWMH support leaves the size check alone
        let state = match query::wm_state(&self.display, window) {
            Ok(state) => state,
            Err(e) => {
                debug!("No _NET_WM_STATE for {}, using size only: {}", window, e);
                None
            }
        };

        let monitors = self.all_monitors();
        fullscreen_verdict(
            &rect,
            monitors.as_slice(),
            state.as_deref(),
            self.display.atoms.net_wm_state_fullscreen,
        )
    }

    // Input state

    pub fn mouse_position(&self) -> Point {
        match query::pointer(&self.display) {
            Ok((position, _)) => position,
            Err(e) => {
                warn!("Pointer query failed: {}", e);
                Point::ZERO
            }
        }
    }

    pub fn mouse_buttons(&self) -> MouseButtons {
        match query::pointer(&self.display) {
            Ok((_, buttons)) => buttons,
            Err(e) => {
                warn!("Pointer query failed: {}", e);
                MouseButtons::default()
            }
        }
    }

    pub fn key_down(&self, keycode: u8) -> bool {
        query::key_down(&self.display, keycode).unwrap_or_else(|e| {
            warn!("Keymap query failed: {}", e);
            false
        })
    }

    // Desktop queries

    pub fn all_monitors(&self) -> MonitorList {
        query::enumerate_monitors(&self.display)
    }

    pub fn window_rect(&self, window: WindowId) -> Option<Rect> {
        match query::window_rect(&self.display, window) {
            Ok(rect) => Some(rect),
            Err(X11Error::WindowGone(_)) => None,
            Err(e) => {
                warn!("Geometry query failed for {}: {}", window, e);
                None
            }
        }
    }

    /// Mapped top-level windows other than our own, skipping desktops and docks
    pub fn visible_windows(&self) -> Vec<(WindowId, Rect)> {
        let clients = match query::client_list(&self.display) {
            Ok(clients) => clients,
            Err(e) => {
                warn!("Failed to read _NET_CLIENT_LIST: {}", e);
                return Vec::new();
            }
        };

        let atoms = &self.display.atoms;
        let (desktop, dock) = (atoms.net_wm_window_type_desktop, atoms.net_wm_window_type_dock);
        clients
            .into_iter()
            .filter(|&id| id != self.window)
            .filter_map(|id| match self.candidate_rect(id, desktop, dock) {
                Ok(rect) => rect.map(|rect| (id, rect)),
                Err(e) => {
                    debug!("Skipping window {}: {}", id, e);
                    None
                }
            })
            .collect()
    }

    fn candidate_rect(&self, window: WindowId, desktop: Atom, dock: Atom) -> Result<Option<Rect>> {
        if !query::is_mapped(&self.display, window)? {
            return Ok(None);
        }
        let types = query::window_types(&self.display, window)?;
        if is_desktop_or_dock(&types, desktop, dock) {
            return Ok(None);
        }
        query::window_rect(&self.display, window).map(Some)
    }

    /// Whether any part of `window` is left uncovered by the windows stacked above it
    pub fn is_visible(&self, window: WindowId) -> bool {
        occlusion::is_visible(&self.display, window, self.area_epsilon).unwrap_or_else(|e| {
            warn!("Visibility check failed for {}: {}", window, e);
            false
        })
    }

    /// Monitor containing the centre of `window`
    pub fn monitor_for_window(&self, window: WindowId) -> Option<Rect> {
        let rect = self.window_rect(window)?;
        self.all_monitors().monitor_for_rect(&rect)
    }

    // Dragging

    pub fn pointer_down(&mut self, pointer: Point) {
        match self.self_rect() {
            Some(rect) => {
                self.drag.pointer_down(pointer, rect.origin());
                debug!("Drag started at {:?}, window at {:?}", pointer, rect.origin());
            }
            None => warn!("Cannot start drag: window {} has no geometry", self.window),
        }
    }

    pub fn pointer_move(&self, pointer: Point) {
        if let Some(target) = self.drag.pointer_move(pointer) {
            self.set_position(target.x, target.y);
        }
    }

    pub fn pointer_up(&mut self) {
        if self.drag.is_active() {
            debug!("Drag ended");
        }
        self.drag.pointer_up();
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_active()
    }

    fn self_rect(&self) -> Option<Rect> {
        self.window_rect(self.window)
    }

    /// Send a client message about our window to the root window manager
    fn send_root_message(&self, message_type: Atom, data: [u32; 5]) -> Result<()> {
        let event = ClientMessageEvent::new(32, self.window.raw(), message_type, data);
        let root = self.display.root();
        self.display.call(|conn| {
            conn.send_event(
                false,
                root,
                EventMask::SUBSTRUCTURE_REDIRECT | EventMask::SUBSTRUCTURE_NOTIFY,
                event,
            )?;
            conn.flush()?;
            Ok(())
        })
    }

    fn send_moveresize(
        &self,
        flags: MoveResizeFlags,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let data = moveresize_data(flags, x, y, width, height);
        self.send_root_message(self.display.atoms.net_moveresize_window, data)
    }

    fn send_wm_state(&self, action: StateAction, first: Atom, second: Atom) -> Result<()> {
        let data = wm_state_data(action, first, second);
        self.send_root_message(self.display.atoms.net_wm_state, data)
    }

    fn configure(&self, aux: ConfigureWindowAux) -> Result<()> {
        self.display.call(|conn| {
            conn.configure_window(self.window.raw(), &aux)?;
            conn.flush()?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULLSCREEN: Atom = 301;
    const ABOVE: Atom = 302;

    #[test]
    fn test_moveresize_move_only() {
        let data = moveresize_data(
            MoveResizeFlags::X | MoveResizeFlags::Y | MoveResizeFlags::FROM_APPLICATION,
            -40,
            25,
            0,
            0,
        );
        assert_eq!(data[0], 0x1300);
        assert_eq!(data[1] as i32, -40);
        assert_eq!(&data[2..], &[25, 0, 0]);
    }

    #[test]
    fn test_wm_state_message() {
        assert_eq!(wm_state_data(StateAction::from(true), ABOVE, 0), [1, ABOVE, 0, 1, 0]);
        assert_eq!(wm_state_data(StateAction::from(false), 7, 8), [0, 7, 8, 1, 0]);
        assert_eq!(StateAction::Toggle as u32, 2);
    }

    #[test]
    fn test_fullscreen_needs_state_when_published() {
        let monitors = [Rect::new(0, 0, 1920, 1080), Rect::new(1920, 0, 1280, 1024)];
        let covering = Rect::new(1920, 0, 1280, 1024);

        assert!(fullscreen_verdict(&covering, &monitors, Some(&[ABOVE, FULLSCREEN]), FULLSCREEN));
        assert!(!fullscreen_verdict(&covering, &monitors, Some(&[ABOVE]), FULLSCREEN));
    }

    #[test]
    fn test_fullscreen_falls_back_to_size() {
        let monitors = [Rect::new(0, 0, 1920, 1080)];
        assert!(fullscreen_verdict(&Rect::new(0, 0, 1920, 1080), &monitors, None, FULLSCREEN));
        assert!(!fullscreen_verdict(&Rect::new(0, 30, 1920, 1050), &monitors, None, FULLSCREEN));
        // Claims fullscreen but is still being resized
        let resizing = Rect::new(0, 0, 800, 600);
        assert!(!fullscreen_verdict(&resizing, &monitors, Some(&[FULLSCREEN]), FULLSCREEN));
    }

    #[test]
    fn test_desktop_and_dock_filtered() {
        assert!(is_desktop_or_dock(&[5, 9], 9, 10));
        assert!(is_desktop_or_dock(&[10], 9, 10));
        assert!(!is_desktop_or_dock(&[], 9, 10));
    }
}
