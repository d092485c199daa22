//! Pet window creation and frame upload
//!
//! The window is a managed (not override-redirect) top-level so it appears in
//! the EWMH stacking order, with a 32-bit ARGB visual, no border, no
//! decorations and the initial `_NET_WM_STATE` set before mapping.

use tracing::{debug, info};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{
    AtomEnum, ColormapAlloc, ConnectionExt as _, CreateGCAux, CreateWindowAux, EventMask,
    ImageFormat, PropMode, Screen, VisualClass, Visualid, WindowClass,
};
use x11rb::wrapper::ConnectionExt as _;

use crate::config::WindowConfig;
use crate::error::{Result, X11Error};
use crate::shared::mask::BYTES_PER_PIXEL;
use crate::x11::display::Display;
use crate::x11::WindowId;

/// `_MOTIF_WM_HINTS` flag selecting the decorations field
const MOTIF_HINTS_DECORATIONS: u32 = 1 << 1;

/// Fixed part of a PutImage request
const PUT_IMAGE_HEADER_BYTES: usize = 24;

/// Find a 32-bit TrueColor visual for transparency
fn find_argb_visual(screen: &Screen) -> Option<Visualid> {
    screen
        .allowed_depths
        .iter()
        .filter(|depth| depth.depth == 32)
        .flat_map(|depth| &depth.visuals)
        .find(|visual| visual.class == VisualClass::TRUE_COLOR)
        .map(|visual| visual.visual_id)
}

/// Create and map the borderless ARGB pet window
pub fn create_pet_window(display: &Display, config: &WindowConfig) -> Result<WindowId> {
    let root = display.root();
    let screen_num = display.screen_num();

    let visual = display
        .call(|conn| Ok(find_argb_visual(&conn.setup().roots[screen_num])))?
        .ok_or(X11Error::NoArgbVisual(WindowId::from_raw(root)))?;

    let colormap = display.call(|conn| Ok(conn.generate_id()?))?;
    display.call(|conn| {
        conn.create_colormap(ColormapAlloc::NONE, colormap, root, visual)?;
        Ok(())
    })?;

    let (x, y, width, height) = config.protocol_geometry();
    let id = display.call(|conn| Ok(conn.generate_id()?))?;
    let window = WindowId::from_raw(id);
    display.call(|conn| {
        conn.create_window(
            32,
            id,
            root,
            x,
            y,
            width,
            height,
            0,
            WindowClass::INPUT_OUTPUT,
            visual,
            &CreateWindowAux::new()
                .background_pixel(0)
                .border_pixel(0)
                .colormap(colormap)
                .event_mask(EventMask::STRUCTURE_NOTIFY),
        )?
        .check()?;
        Ok(())
    })?;
    debug!("Created pet window {} with visual 0x{:x}", window, visual);

    let atoms = display.atoms.clone();

    display.call(|conn| {
        conn.change_property32(
            PropMode::REPLACE,
            id,
            atoms.motif_wm_hints,
            atoms.motif_wm_hints,
            &[MOTIF_HINTS_DECORATIONS, 0, 0, 0, 0],
        )?;
        conn.change_property8(PropMode::REPLACE, id, AtomEnum::WM_NAME, AtomEnum::STRING, b"MateEngine")?;
        conn.change_property8(PropMode::REPLACE, id, atoms.net_wm_name, atoms.utf8_string, b"MateEngine")?;
        conn.change_property8(PropMode::REPLACE, id, atoms.wm_class, AtomEnum::STRING, b"mate-x11\0MateEngine\0")?;
        Ok(())
    })?;

    let mut state = Vec::new();
    if config.topmost {
        state.push(atoms.net_wm_state_above);
    }
    if config.hide_from_taskbar {
        state.push(atoms.net_wm_state_skip_taskbar);
        state.push(atoms.net_wm_state_skip_pager);
    }
    if !state.is_empty() {
        display.call(|conn| {
            conn.change_property32(PropMode::REPLACE, id, atoms.net_wm_state, AtomEnum::ATOM, &state)?;
            Ok(())
        })?;
    }

    display.call(|conn| {
        conn.map_window(id)?;
        conn.flush()?;
        Ok(())
    })?;

    info!(
        "Pet window {} mapped at ({}, {}) {}x{}",
        window, x, y, width, height
    );
    Ok(window)
}

/// Pack straight-alpha RGBA pixels as premultiplied ARGB32 in the server's byte order
fn pack_argb(rgba: &[u8], msb_first: bool) -> Vec<u32> {
    rgba.chunks_exact(BYTES_PER_PIXEL)
        .map(|px| {
            let alpha = px[3] as u32;
            let premultiply = |c: u8| (c as u32 * alpha + 127) / 255;
            let argb = alpha << 24 | premultiply(px[0]) << 16 | premultiply(px[1]) << 8 | premultiply(px[2]);
            if msb_first { argb.to_be() } else { argb.to_le() }
        })
        .collect()
}

/// Upload one rendered RGBA frame into the window
pub fn present_frame(display: &Display, window: WindowId, width: u32, height: u32, rgba: &[u8]) -> Result<()> {
    let layout = display.image_layout();
    let pixels = pack_argb(rgba, layout.image_msb_first);
    let data: &[u8] = bytemuck::cast_slice(&pixels);

    let stride = width as usize * BYTES_PER_PIXEL;
    if stride == 0 || height == 0 {
        return Ok(());
    }
    let rows_per_band = (layout.max_request_bytes.saturating_sub(PUT_IMAGE_HEADER_BYTES) / stride).max(1);

    let gc = display.call(|conn| Ok(conn.generate_id()?))?;
    display.call(|conn| {
        conn.create_gc(gc, window.raw(), &CreateGCAux::new())?;
        Ok(())
    })?;

    let mut result = Ok(());
    for (band, rows) in data.chunks(rows_per_band * stride).take(height as usize).enumerate() {
        let dst_y = (band * rows_per_band) as i16;
        let band_height = (rows.len() / stride) as u16;
        result = display.call(|conn| {
            conn.put_image(ImageFormat::Z_PIXMAP, window.raw(), gc, width as u16, band_height, 0, dst_y, 0, 32, rows)?;
            Ok(())
        });
        if result.is_err() {
            break;
        }
    }

    display.call(|conn| {
        conn.free_gc(gc)?;
        conn.flush()?;
        Ok(())
    })?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_argb_premultiplies() {
        let rgba = [255, 128, 0, 255, 255, 255, 255, 0, 200, 100, 50, 128];
        let packed = pack_argb(&rgba, false);
        assert_eq!(u32::from_le(packed[0]), 0xff_ff_80_00);
        assert_eq!(u32::from_le(packed[1]), 0);
        assert_eq!(u32::from_le(packed[2]), 0x80_64_32_19);
    }

    #[test]
    fn test_pack_argb_byte_order() {
        let rgba = [1, 2, 3, 255];
        let lsb = pack_argb(&rgba, false);
        let msb = pack_argb(&rgba, true);
        assert_eq!(bytemuck::cast_slice::<u32, u8>(&lsb), &[3, 2, 1, 255]);
        assert_eq!(bytemuck::cast_slice::<u32, u8>(&msb), &[255, 1, 2, 3]);
    }
}
