//! Shape / Transparency Engine
//!
//! Keeps the pet window's bounding shape at the full window rectangle and its
//! input shape at the opaque pixels, so clicks on transparent pixels fall
//! through to whatever is underneath.

use std::sync::Arc;

use tracing::{debug, trace, warn};
use x11rb::connection::Connection;
use x11rb::protocol::shape::{ConnectionExt as _, SK, SO};
use x11rb::protocol::xproto::{ClipOrdering, ConnectionExt as _, CreateGCAux, ImageFormat};

use crate::error::Result;
use crate::shared::mask::RGBA_ALPHA_OFFSET;
use crate::shared::ShapeMask;
use crate::x11::display::Display;
use crate::x11::WindowId;

/// Fixed part of a PutImage request
const PUT_IMAGE_HEADER_BYTES: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShapePhase {
    #[default]
    Uninitialized,
    /// Bounding shape matches the current size, input shape is stale
    BoundingSet,
    /// Input shape reflects the most recently rendered pixels
    InputMaskCurrent,
}

impl ShapePhase {
    /// Phase once the server rejected part of an earlier upload
    pub fn after_rejected_upload(self) -> ShapePhase {
        match self {
            ShapePhase::InputMaskCurrent => ShapePhase::BoundingSet,
            other => other,
        }
    }
}

pub struct ShapeEngine {
    display: Arc<Display>,
    window: WindowId,
    phase: ShapePhase,
    bounding: Option<ShapeMask>,
    input: Option<ShapeMask>,
    degraded: bool,
}

impl ShapeEngine {
    /// `compositing` is false when no compositing manager runs; shaping is then
    /// skipped and the window stays an opaque rectangle.
    pub fn new(display: Arc<Display>, window: WindowId, compositing: bool) -> Self {
        if !compositing {
            warn!("No compositor: window {} will not be shaped", window);
        }
        Self {
            display,
            window,
            phase: ShapePhase::Uninitialized,
            bounding: None,
            input: None,
            degraded: !compositing,
        }
    }

    pub fn phase(&self) -> ShapePhase {
        self.phase
    }

    pub fn input_mask(&self) -> Option<&ShapeMask> {
        self.input.as_ref()
    }

    /// The server reported an error for an earlier upload; the input shape
    /// on screen no longer matches the cached mask
    pub fn mark_input_stale(&mut self) {
        let phase = self.phase.after_rejected_upload();
        if phase != self.phase {
            warn!(
                "Input shape of window {} rejected by the server, waiting for the next frame",
                self.window
            );
            self.input = None;
            self.phase = phase;
        }
    }

    /// Let the whole window rectangle accept drawing
    pub fn set_full_bounding_shape(&mut self, width: u32, height: u32) -> Result<()> {
        if self.degraded {
            return Ok(());
        }

        let mask = ShapeMask::full(width, height);
        self.upload(SK::BOUNDING, &mask)?;
        debug!("Bounding shape set to {}x{} for window {}", width, height, self.window);

        self.bounding = Some(mask);
        self.input = None;
        self.phase = ShapePhase::BoundingSet;
        Ok(())
    }

    /// Rebuild the input shape from the window's current on-screen pixels
    pub fn recompute_input_shape(&mut self, width: u32, height: u32) -> Result<()> {
        if self.degraded {
            return Ok(());
        }
        self.ensure_bounding(width, height)?;

        let image = self.display.call(|conn| {
            Ok(conn
                .get_image(
                    ImageFormat::Z_PIXMAP,
                    self.window.raw(),
                    0,
                    0,
                    width as u16,
                    height as u16,
                    !0,
                )?
                .reply()?)
        })?;

        let mask = if image.depth == 32 {
            ShapeMask::from_alpha(width, height, &image.data, self.display.image_layout().argb_alpha_offset())
        } else {
            warn!("Window {} has depth {}, input shape falls back to full rectangle", self.window, image.depth);
            ShapeMask::full(width, height)
        };

        self.apply_input(mask)
    }

    /// Rebuild the input shape from an RGBA frame rendered by the application
    pub fn recompute_input_shape_from_pixels(&mut self, width: u32, height: u32, rgba: &[u8]) -> Result<()> {
        if self.degraded {
            return Ok(());
        }
        self.ensure_bounding(width, height)?;
        self.apply_input(ShapeMask::from_alpha(width, height, rgba, RGBA_ALPHA_OFFSET))
    }

    /// Geometry changed: full bounding shape at the new size, then a fresh input shape
    pub fn on_resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.set_full_bounding_shape(width, height)?;
        self.recompute_input_shape(width, height)
    }

    fn ensure_bounding(&mut self, width: u32, height: u32) -> Result<()> {
        let current = self
            .bounding
            .as_ref()
            .is_some_and(|b| b.width() == width && b.height() == height);
        if !current {
            self.set_full_bounding_shape(width, height)?;
        }
        Ok(())
    }

    fn apply_input(&mut self, mask: ShapeMask) -> Result<()> {
        let mask = match &self.bounding {
            Some(bounding) => mask.clipped_to(bounding),
            None => mask,
        };
        self.upload(SK::INPUT, &mask)?;
        trace!("Input shape for window {}: {} opaque pixel(s)", self.window, mask.count_set());

        self.input = Some(mask);
        self.phase = ShapePhase::InputMaskCurrent;
        Ok(())
    }

    /// Upload `mask` through a temporary 1-bit pixmap and combine it into the window shape
    fn upload(&self, kind: SK, mask: &ShapeMask) -> Result<()> {
        let window = self.window.raw();
        let (width, height) = (mask.width(), mask.height());

        if width == 0 || height == 0 {
            return self.display.call(|conn| {
                conn.shape_rectangles(SO::SET, kind, ClipOrdering::UNSORTED, window, 0, 0, &[])?;
                conn.flush()?;
                Ok(())
            });
        }

        let layout = self.display.image_layout();
        let (stride, data) = mask.encode(layout.bitmap_scanline_pad, layout.bitmap_msb_first);

        let pixmap = self.display.call(|conn| Ok(conn.generate_id()?))?;
        self.display.call(|conn| {
            conn.create_pixmap(1, pixmap, window, width as u16, height as u16)?;
            Ok(())
        })?;

        let result = self.fill_and_combine(kind, pixmap, width, stride, &data, layout.max_request_bytes);

        // The pixmap is a one-shot upload
        if let Err(e) = self.display.call(|conn| {
            conn.free_pixmap(pixmap)?;
            conn.flush()?;
            Ok(())
        }) {
            warn!("Failed to free shape pixmap 0x{:x}: {}", pixmap, e);
        }

        result
    }

    fn fill_and_combine(
        &self,
        kind: SK,
        pixmap: u32,
        width: u32,
        stride: usize,
        data: &[u8],
        max_request_bytes: usize,
    ) -> Result<()> {
        let gc = self.display.call(|conn| Ok(conn.generate_id()?))?;
        self.display.call(|conn| {
            conn.create_gc(gc, pixmap, &CreateGCAux::new().foreground(1).background(0))?;
            Ok(())
        })?;

        let rows_per_band = rows_per_request(stride, max_request_bytes);
        let mut upload = Ok(());
        for (band, rows) in data.chunks(rows_per_band * stride).enumerate() {
            let dst_y = (band * rows_per_band) as i16;
            let band_height = (rows.len() / stride) as u16;
            upload = self.display.call(|conn| {
                conn.put_image(ImageFormat::Z_PIXMAP, pixmap, gc, width as u16, band_height, 0, dst_y, 0, 1, rows)?;
                Ok(())
            });
            if upload.is_err() {
                break;
            }
        }

        if upload.is_ok() {
            upload = self.display.call(|conn| {
                conn.shape_mask(SO::SET, kind, self.window.raw(), 0, 0, pixmap)?;
                Ok(())
            });
        }

        if let Err(e) = self.display.call(|conn| {
            conn.free_gc(gc)?;
            Ok(())
        }) {
            warn!("Failed to free shape GC 0x{:x}: {}", gc, e);
        }

        upload
    }
}

/// Image rows that fit in one PutImage request
fn rows_per_request(stride: usize, max_request_bytes: usize) -> usize {
    if stride == 0 {
        return 1;
    }
    (max_request_bytes.saturating_sub(PUT_IMAGE_HEADER_BYTES) / stride).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_per_request() {
        // 1920 px wide mask, 32-bit padded: 240 bytes per row
        assert_eq!(rows_per_request(240, 262_140), 1092);
        assert_eq!(rows_per_request(240, 100), 1);
        assert_eq!(rows_per_request(0, 100), 1);
    }

    #[test]
    fn test_rejected_upload_drops_input_phase() {
        assert_eq!(ShapePhase::InputMaskCurrent.after_rejected_upload(), ShapePhase::BoundingSet);
        assert_eq!(ShapePhase::BoundingSet.after_rejected_upload(), ShapePhase::BoundingSet);
        assert_eq!(ShapePhase::Uninitialized.after_rejected_upload(), ShapePhase::Uninitialized);
    }
}
