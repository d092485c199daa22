//! Interned EWMH atoms used by the pet window

use x11rb::connection::Connection;
use x11rb::protocol::xproto::{Atom, ConnectionExt as _};

use crate::error::Result;

/// Holds all interned atoms, looked up once when the display opens
#[derive(Debug, Clone)]
pub struct Atoms {
    pub net_wm_state: Atom,
    pub net_wm_state_fullscreen: Atom,
    pub net_wm_state_maximized_horz: Atom,
    pub net_wm_state_maximized_vert: Atom,
    pub net_wm_state_above: Atom,
    pub net_wm_state_skip_taskbar: Atom,
    pub net_wm_state_skip_pager: Atom,
    pub net_wm_window_type: Atom,
    pub net_wm_window_type_desktop: Atom,
    pub net_wm_window_type_dock: Atom,
    pub net_client_list: Atom,
    pub net_client_list_stacking: Atom,
    pub net_moveresize_window: Atom,
    pub motif_wm_hints: Atom,
    pub wm_class: Atom,
    pub utf8_string: Atom,
    pub net_wm_name: Atom,
}

impl Atoms {
    /// Intern all required atoms
    pub fn new<C: Connection>(conn: &C) -> Result<Self> {
        let intern = |name: &str| -> Result<Atom> {
            Ok(conn.intern_atom(false, name.as_bytes())?.reply()?.atom)
        };

        Ok(Self {
            net_wm_state: intern("_NET_WM_STATE")?,
            net_wm_state_fullscreen: intern("_NET_WM_STATE_FULLSCREEN")?,
            net_wm_state_maximized_horz: intern("_NET_WM_STATE_MAXIMIZED_HORZ")?,
            net_wm_state_maximized_vert: intern("_NET_WM_STATE_MAXIMIZED_VERT")?,
            net_wm_state_above: intern("_NET_WM_STATE_ABOVE")?,
            net_wm_state_skip_taskbar: intern("_NET_WM_STATE_SKIP_TASKBAR")?,
            net_wm_state_skip_pager: intern("_NET_WM_STATE_SKIP_PAGER")?,
            net_wm_window_type: intern("_NET_WM_WINDOW_TYPE")?,
            net_wm_window_type_desktop: intern("_NET_WM_WINDOW_TYPE_DESKTOP")?,
            net_wm_window_type_dock: intern("_NET_WM_WINDOW_TYPE_DOCK")?,
            net_client_list: intern("_NET_CLIENT_LIST")?,
            net_client_list_stacking: intern("_NET_CLIENT_LIST_STACKING")?,
            net_moveresize_window: intern("_NET_MOVERESIZE_WINDOW")?,
            motif_wm_hints: intern("_MOTIF_WM_HINTS")?,
            wm_class: intern("WM_CLASS")?,
            utf8_string: intern("UTF8_STRING")?,
            net_wm_name: intern("_NET_WM_NAME")?,
        })
    }

    /// Compositing manager selection for a screen
    pub fn compositor_selection<C: Connection>(conn: &C, screen_num: usize) -> Result<Atom> {
        let name = format!("_NET_WM_CM_S{}", screen_num);
        Ok(conn.intern_atom(false, name.as_bytes())?.reply()?.atom)
    }
}
