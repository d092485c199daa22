//! Display Module
//!
//! Owns the X11 connection, cached atoms and extension information. Every
//! request goes through [`Display::call`], which serializes access with a
//! single mutex held for one protocol call at a time.

use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info, warn};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::xproto::{ConnectionExt as _, ImageOrder};
use x11rb::rust_connection::RustConnection;
use x11rb::NONE;

use crate::error::{Result, X11Error};
use crate::x11::atoms::Atoms;
use crate::x11::WindowId;

/// X11 extension information
#[derive(Debug, Clone, Default)]
pub struct Extensions {
    pub have_shape: bool,
    pub have_damage: bool,
    pub have_randr: bool,
    pub have_render: bool,

    pub shape_version: (u32, u32),
    pub shape_event_base: u8,
    pub damage_version: (u32, u32),
    pub damage_event_base: u8,
    pub damage_error_base: u8,
    pub randr_event_base: u8,
}

/// Server image layout, read from the connection setup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLayout {
    /// Multi-byte pixels are sent most significant byte first
    pub image_msb_first: bool,
    /// Bitmap bits are packed most significant bit first
    pub bitmap_msb_first: bool,
    /// Bitmap scanlines are padded to this many bits
    pub bitmap_scanline_pad: u8,
    /// Largest request the server accepts, in bytes
    pub max_request_bytes: usize,
}

impl ImageLayout {
    /// Byte offset of the alpha channel in a 32-bit ARGB pixel of a ZPixmap image
    pub fn argb_alpha_offset(&self) -> usize {
        if self.image_msb_first { 0 } else { 3 }
    }
}

/// Process-wide display connection
pub struct Display {
    conn: Mutex<Option<RustConnection>>,
    fd: RawFd,
    screen_num: usize,
    screen_count: usize,
    root: u32,
    screen_width: u32,
    screen_height: u32,
    layout: ImageLayout,
    pub atoms: Atoms,
    pub extensions: Extensions,
}

impl Display {
    /// Connect to `$DISPLAY` and cache everything queried repeatedly
    ///
    /// SHAPE and DAMAGE are hard requirements; RANDR and RENDER are optional.
    pub fn open() -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None)?;

        let setup = conn.setup();
        let screen = &setup.roots[screen_num];
        let root = screen.root;
        let screen_width = screen.width_in_pixels as u32;
        let screen_height = screen.height_in_pixels as u32;
        let screen_count = setup.roots.len();
        let layout = ImageLayout {
            image_msb_first: setup.image_byte_order == ImageOrder::MSB_FIRST,
            bitmap_msb_first: setup.bitmap_format_bit_order == ImageOrder::MSB_FIRST,
            bitmap_scanline_pad: setup.bitmap_format_scanline_pad,
            max_request_bytes: conn.maximum_request_bytes(),
        };

        info!("Connected to X server, screen {}, root window 0x{:x}", screen_num, root);
        info!("Screen size: {}x{}", screen_width, screen_height);

        let atoms = Atoms::new(&conn)?;
        let extensions = Self::detect_extensions(&conn)?;
        info!(
            "X11 Extensions: shape={} ({}.{}), damage={} ({}.{}), randr={}, render={}",
            extensions.have_shape,
            extensions.shape_version.0,
            extensions.shape_version.1,
            extensions.have_damage,
            extensions.damage_version.0,
            extensions.damage_version.1,
            extensions.have_randr,
            extensions.have_render,
        );

        if !extensions.have_shape {
            return Err(X11Error::MissingExtension("SHAPE"));
        }
        if !extensions.have_damage {
            return Err(X11Error::MissingExtension("DAMAGE"));
        }

        let fd = conn.stream().as_raw_fd();

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            fd,
            screen_num,
            screen_count,
            root,
            screen_width,
            screen_height,
            layout,
            atoms,
            extensions,
        })
    }

    /// Detect available X11 extensions
    fn detect_extensions(conn: &RustConnection) -> Result<Extensions> {
        let mut ext = Extensions::default();

        let reply = conn.query_extension(b"SHAPE")?.reply()?;
        if reply.present {
            ext.have_shape = true;
            ext.shape_event_base = reply.first_event;
            use x11rb::protocol::shape::ConnectionExt;
            if let Ok(version) = conn.shape_query_version()?.reply() {
                ext.shape_version = (version.major_version as u32, version.minor_version as u32);
            }
        }

        let reply = conn.query_extension(b"DAMAGE")?.reply()?;
        if reply.present {
            ext.have_damage = true;
            ext.damage_event_base = reply.first_event;
            ext.damage_error_base = reply.first_error;
            // Version must be negotiated before any other damage request
            use x11rb::protocol::damage::ConnectionExt;
            if let Ok(version) = conn.damage_query_version(1, 1)?.reply() {
                ext.damage_version = (version.major_version, version.minor_version);
            }
        }

        let reply = conn.query_extension(b"RANDR")?.reply()?;
        if reply.present {
            ext.have_randr = true;
            ext.randr_event_base = reply.first_event;
        }

        let reply = conn.query_extension(b"RENDER")?.reply()?;
        ext.have_render = reply.present;

        debug!("Extension bases: shape_event={}, damage_event={}, damage_error={}",
            ext.shape_event_base, ext.damage_event_base, ext.damage_error_base);

        Ok(ext)
    }

    /// Run one protocol call while holding the connection lock
    ///
    /// Fails with [`X11Error::Closed`] once the display has been closed.
    pub(crate) fn call<R>(&self, f: impl FnOnce(&RustConnection) -> Result<R>) -> Result<R> {
        let guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let conn = guard.as_ref().ok_or(X11Error::Closed)?;
        f(conn)
    }

    pub fn is_closed(&self) -> bool {
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Drop the connection; later calls fail with `Closed`
    pub fn close(&self) {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner).take();
        if conn.is_some() {
            info!("Closed X display connection");
        }
    }

    /// Flush pending requests
    pub fn flush(&self) -> Result<()> {
        self.call(|conn| Ok(conn.flush()?))
    }

    /// Round-trip to the server so every earlier request has been processed
    pub fn sync(&self) -> Result<()> {
        use x11rb::wrapper::ConnectionExt;
        self.call(|conn| Ok(conn.sync()?))
    }

    /// Check that a compositing manager owns `_NET_WM_CM_S<n>` on every screen
    pub fn check_compositor(&self) -> Result<()> {
        for screen_num in 0..self.screen_count {
            let selection = self.call(|conn| Atoms::compositor_selection(conn, screen_num))?;
            let owner = self.call(|conn| Ok(conn.get_selection_owner(selection)?.reply()?.owner))?;
            if owner == NONE {
                return Err(X11Error::NoCompositor(screen_num));
            }
            debug!("Compositor on screen {} owned by 0x{:x}", screen_num, owner);
        }
        Ok(())
    }

    /// Verify that `window` uses a 32-bit visual with an alpha channel
    pub fn verify_argb(&self, window: WindowId) -> Result<()> {
        let visual = self.call(|conn| Ok(conn.get_window_attributes(window.raw())?.reply()?.visual))?;

        if !self.extensions.have_render {
            warn!("RENDER unavailable, checking window depth only");
            let depth = self.call(|conn| Ok(conn.get_geometry(window.raw())?.reply()?.depth))?;
            return if depth == 32 { Ok(()) } else { Err(X11Error::NoArgbVisual(window)) };
        }

        use x11rb::protocol::render::{ConnectionExt, PictType};
        let formats = self.call(|conn| Ok(conn.render_query_pict_formats()?.reply()?))?;

        let format_id = formats
            .screens
            .iter()
            .flat_map(|screen| &screen.depths)
            .flat_map(|depth| &depth.visuals)
            .find(|pict_visual| pict_visual.visual == visual)
            .map(|pict_visual| pict_visual.format);

        let is_argb = format_id
            .and_then(|id| formats.formats.iter().find(|format| format.id == id))
            .is_some_and(|format| {
                format.type_ == PictType::DIRECT && format.depth == 32 && format.direct.alpha_mask != 0
            });

        if is_argb {
            debug!("Window {} uses ARGB visual 0x{:x}", window, visual);
            Ok(())
        } else {
            Err(X11Error::NoArgbVisual(window))
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn screen_num(&self) -> usize {
        self.screen_num
    }

    pub(crate) fn root(&self) -> u32 {
        self.root
    }

    pub fn screen_size(&self) -> (u32, u32) {
        (self.screen_width, self.screen_height)
    }

    pub fn image_layout(&self) -> ImageLayout {
        self.layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alpha_offset_follows_byte_order() {
        let lsb = ImageLayout {
            image_msb_first: false,
            bitmap_msb_first: false,
            bitmap_scanline_pad: 32,
            max_request_bytes: 1 << 18,
        };
        assert_eq!(lsb.argb_alpha_offset(), 3);

        let msb = ImageLayout { image_msb_first: true, ..lsb };
        assert_eq!(msb.argb_alpha_offset(), 0);
    }
}
