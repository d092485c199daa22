//! Visibility / Occlusion Engine
//!
//! Reads the stacking order and the rects of everything above the target in
//! one pass, then hands the geometry to [`crate::shared::visibility`].

use tracing::{debug, trace};

use crate::error::{Result, X11Error};
use crate::shared::visibility::is_exposed;
use crate::x11::display::Display;
use crate::x11::query;
use crate::x11::WindowId;

/// Whether any part of `target` is uncovered by windows stacked above it
///
/// Unmapped targets and targets missing from `_NET_CLIENT_LIST_STACKING`
/// are reported as not visible. Windows above the target that vanish
/// mid-query are skipped.
pub fn is_visible(display: &Display, target: WindowId, epsilon: f64) -> Result<bool> {
    if !query::is_mapped(display, target)? {
        trace!("Window {} is not mapped", target);
        return Ok(false);
    }
    let target_rect = query::window_rect(display, target)?;

    let stacking = query::stacking_order(display)?;
    let Some(index) = stacking.iter().position(|&w| w == target) else {
        debug!("Window {} is not in the stacking order", target);
        return Ok(false);
    };

    let mut occluders = Vec::new();
    for &window in &stacking[index + 1..] {
        match query::is_mapped(display, window) {
            Ok(true) => {}
            Ok(false) | Err(X11Error::WindowGone(_)) => continue,
            Err(e) => return Err(e),
        }
        match query::window_rect(display, window) {
            Ok(rect) => occluders.push(rect),
            Err(X11Error::WindowGone(_)) => continue,
            Err(e) => return Err(e),
        }
    }

    let visible = is_exposed(&target_rect, &occluders, epsilon);
    trace!(
        "Window {} at {:?}: {} window(s) above, visible={}",
        target, target_rect, occluders.len(), visible
    );
    Ok(visible)
}
