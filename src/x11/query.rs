//! Geometry & Monitor Query
//!
//! Stateless queries against the display. A window that disappears between
//! two requests is reported as `WindowGone`, never as partial data.

use tracing::{debug, warn};
use x11rb::errors::ReplyError;
use x11rb::protocol::randr::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{Atom, AtomEnum, ConnectionExt as _, KeyButMask, MapState};

use crate::error::{Result, X11Error};
use crate::shared::{MonitorList, OutputCrtc, Point, Rect};
use crate::x11::display::Display;
use crate::x11::WindowId;

/// Map a protocol error on `window` to `WindowGone`
fn gone(window: WindowId) -> impl FnOnce(X11Error) -> X11Error {
    move |err| match err {
        X11Error::Reply(ReplyError::X11Error(_)) => X11Error::WindowGone(window),
        other => other,
    }
}

/// Whether the window is viewable (mapped, with all ancestors mapped)
pub fn is_mapped(display: &Display, window: WindowId) -> Result<bool> {
    display
        .call(|conn| Ok(conn.get_window_attributes(window.raw())?.reply()?.map_state))
        .map(|state| state == MapState::VIEWABLE)
        .map_err(gone(window))
}

/// Absolute rect of a window in root coordinates
pub fn window_rect(display: &Display, window: WindowId) -> Result<Rect> {
    let geometry = display
        .call(|conn| Ok(conn.get_geometry(window.raw())?.reply()?))
        .map_err(gone(window))?;

    let translated = display
        .call(|conn| Ok(conn.translate_coordinates(window.raw(), display.root(), 0, 0)?.reply()?))
        .map_err(gone(window))?;

    if !translated.same_screen {
        return Err(X11Error::WindowGone(window));
    }

    Ok(Rect::new(
        translated.dst_x as i32,
        translated.dst_y as i32,
        geometry.width as u32,
        geometry.height as u32,
    ))
}

/// Read a 32-bit list property, `None` when the property is absent
fn read_u32_list(
    display: &Display,
    window: u32,
    property: Atom,
    type_: AtomEnum,
) -> Result<Option<Vec<u32>>> {
    let reply = display.call(|conn| {
        Ok(conn
            .get_property(false, window, property, type_, 0, u32::MAX)?
            .reply()?)
    })?;

    if reply.type_ == u32::from(AtomEnum::NONE) {
        return Ok(None);
    }
    Ok(reply.value32().map(|values| values.collect()))
}

/// `_NET_CLIENT_LIST_STACKING`, bottom to top
pub fn stacking_order(display: &Display) -> Result<Vec<WindowId>> {
    let windows = read_u32_list(
        display,
        display.root(),
        display.atoms.net_client_list_stacking,
        AtomEnum::WINDOW,
    )?
    .unwrap_or_default();

    Ok(windows.into_iter().map(WindowId::from_raw).collect())
}

/// `_NET_CLIENT_LIST`, in mapping order
pub fn client_list(display: &Display) -> Result<Vec<WindowId>> {
    let windows = read_u32_list(
        display,
        display.root(),
        display.atoms.net_client_list,
        AtomEnum::WINDOW,
    )?
    .unwrap_or_default();

    Ok(windows.into_iter().map(WindowId::from_raw).collect())
}

/// `_NET_WM_WINDOW_TYPE` atoms of a window
pub fn window_types(display: &Display, window: WindowId) -> Result<Vec<Atom>> {
    read_u32_list(
        display,
        window.raw(),
        display.atoms.net_wm_window_type,
        AtomEnum::ATOM,
    )
    .map(Option::unwrap_or_default)
    .map_err(gone(window))
}

/// `_NET_WM_STATE` atoms of a window, `None` when the window manager never set it
pub fn wm_state(display: &Display, window: WindowId) -> Result<Option<Vec<Atom>>> {
    read_u32_list(display, window.raw(), display.atoms.net_wm_state, AtomEnum::ATOM)
        .map_err(gone(window))
}

/// Pressed pointer buttons
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MouseButtons {
    pub left: bool,
    pub middle: bool,
    pub right: bool,
}

impl From<KeyButMask> for MouseButtons {
    fn from(mask: KeyButMask) -> Self {
        Self {
            left: mask.contains(KeyButMask::BUTTON1),
            middle: mask.contains(KeyButMask::BUTTON2),
            right: mask.contains(KeyButMask::BUTTON3),
        }
    }
}

/// Pointer position in root coordinates and the pressed buttons
pub fn pointer(display: &Display) -> Result<(Point, MouseButtons)> {
    let reply = display.call(|conn| Ok(conn.query_pointer(display.root())?.reply()?))?;
    Ok((
        Point::new(reply.root_x as i32, reply.root_y as i32),
        MouseButtons::from(reply.mask),
    ))
}

/// Whether `keycode` is currently held down
pub fn key_down(display: &Display, keycode: u8) -> Result<bool> {
    let keys = display.call(|conn| Ok(conn.query_keymap()?.reply()?.keys))?;
    Ok(keymap_contains(&keys, keycode))
}

fn keymap_contains(keys: &[u8; 32], keycode: u8) -> bool {
    keys[(keycode / 8) as usize] & (1 << (keycode % 8)) != 0
}

/// Minimum RandR version providing screen resources with CRTC offsets
const RANDR_MIN_VERSION: (u32, u32) = (1, 3);

/// Enumerate monitors via RandR, falling back to the whole default screen
pub fn enumerate_monitors(display: &Display) -> MonitorList {
    let (screen_width, screen_height) = display.screen_size();

    if !display.extensions.have_randr {
        debug!("RandR unavailable, using screen {}x{}", screen_width, screen_height);
        return MonitorList::fallback(screen_width, screen_height);
    }

    match randr_outputs(display) {
        Ok(outputs) => {
            let monitors = MonitorList::from_outputs(&outputs, screen_width, screen_height);
            debug!("Enumerated {} monitor(s) from {} output(s)", monitors.len(), outputs.len());
            monitors
        }
        Err(e) => {
            warn!("RandR monitor query failed, using full screen: {}", e);
            MonitorList::fallback(screen_width, screen_height)
        }
    }
}

fn randr_outputs(display: &Display) -> Result<Vec<OutputCrtc>> {
    let version = display.call(|conn| {
        Ok(conn
            .randr_query_version(RANDR_MIN_VERSION.0, RANDR_MIN_VERSION.1)?
            .reply()?)
    })?;
    if (version.major_version, version.minor_version) < RANDR_MIN_VERSION {
        return Err(X11Error::MissingExtension("RANDR >= 1.3"));
    }

    let resources = display.call(|conn| {
        Ok(conn.randr_get_screen_resources_current(display.root())?.reply()?)
    })?;
    let timestamp = resources.config_timestamp;

    let mut outputs = Vec::with_capacity(resources.outputs.len());
    for &output in &resources.outputs {
        let info = match display.call(|conn| Ok(conn.randr_get_output_info(output, timestamp)?.reply()?)) {
            Ok(info) => info,
            Err(e) => {
                debug!("Skipping RandR output {}: {}", output, e);
                continue;
            }
        };

        let connected = info.connection == randr::Connection::CONNECTED;
        let crtc = if connected && info.crtc != x11rb::NONE {
            display
                .call(|conn| Ok(conn.randr_get_crtc_info(info.crtc, timestamp)?.reply()?))
                .map(|crtc| Rect::new(crtc.x as i32, crtc.y as i32, crtc.width as u32, crtc.height as u32))
                .ok()
        } else {
            None
        };

        outputs.push(OutputCrtc { connected, crtc });
    }

    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keymap_bits() {
        let mut keys = [0u8; 32];
        keys[4] = 0b0000_0100; // keycode 34
        assert!(keymap_contains(&keys, 34));
        assert!(!keymap_contains(&keys, 33));
        assert!(!keymap_contains(&keys, 255));
    }

    #[test]
    fn test_mouse_buttons_from_mask() {
        let buttons = MouseButtons::from(KeyButMask::BUTTON1 | KeyButMask::BUTTON3 | KeyButMask::SHIFT);
        assert_eq!(buttons, MouseButtons { left: true, middle: false, right: true });
    }
}
