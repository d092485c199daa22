//! Monitor list and monitor resolution
//!
//! The X11 side only gathers raw output/CRTC data; deciding which outputs
//! become monitors (and the single-screen fallback) happens here.

use std::sync::Arc;

use super::geometry::{Point, Rect};

/// Raw RandR output as seen by the query layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputCrtc {
    /// Output reports a connected sink
    pub connected: bool,
    /// Absolute rect of the CRTC driving this output, `None` when no CRTC is attached
    pub crtc: Option<Rect>,
}

/// Ordered monitor rects, in server enumeration order
///
/// Snapshots are immutable; a refresh builds a new list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MonitorList {
    monitors: Arc<[Rect]>,
}

impl MonitorList {
    pub fn new(monitors: Vec<Rect>) -> Self {
        Self { monitors: monitors.into() }
    }

    /// Build the list from RandR outputs, falling back to the whole screen
    ///
    /// Disconnected outputs, outputs without a CRTC and zero-sized CRTCs are
    /// skipped. When nothing usable remains the result is exactly one rect
    /// covering the default screen at the origin.
    pub fn from_outputs(outputs: &[OutputCrtc], screen_width: u32, screen_height: u32) -> Self {
        let monitors: Vec<Rect> = outputs
            .iter()
            .filter(|output| output.connected)
            .filter_map(|output| output.crtc)
            .filter(|crtc| !crtc.is_empty())
            .collect();

        if monitors.is_empty() {
            return Self::fallback(screen_width, screen_height);
        }

        Self::new(monitors)
    }

    /// Single monitor spanning the default screen
    pub fn fallback(screen_width: u32, screen_height: u32) -> Self {
        Self::new(vec![Rect::new(0, 0, screen_width, screen_height)])
    }

    pub fn as_slice(&self) -> &[Rect] {
        &self.monitors
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rect> {
        self.monitors.iter()
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    /// First monitor containing the point
    pub fn monitor_at(&self, point: Point) -> Option<Rect> {
        self.monitors.iter().copied().find(|m| m.contains(point))
    }

    /// Monitor containing the centre of `rect`
    pub fn monitor_for_rect(&self, rect: &Rect) -> Option<Rect> {
        self.monitor_at(rect.center())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(crtc: Option<Rect>) -> OutputCrtc {
        OutputCrtc { connected: true, crtc }
    }

    #[test]
    fn test_fallback_when_no_outputs() {
        let list = MonitorList::from_outputs(&[], 1920, 1080);
        assert_eq!(list.as_slice(), &[Rect::new(0, 0, 1920, 1080)]);
    }

    #[test]
    fn test_fallback_when_no_usable_outputs() {
        let outputs = [
            output(None),
            output(Some(Rect::new(0, 0, 0, 0))),
            OutputCrtc { connected: false, crtc: Some(Rect::new(0, 0, 1280, 1024)) },
        ];
        let list = MonitorList::from_outputs(&outputs, 2560, 1440);
        assert_eq!(list.as_slice(), &[Rect::new(0, 0, 2560, 1440)]);
    }

    #[test]
    fn test_keeps_enumeration_order_and_skips_disabled() {
        let outputs = [
            output(Some(Rect::new(1920, 0, 2560, 1440))),
            output(None),
            output(Some(Rect::new(0, 360, 1920, 1080))),
        ];
        let list = MonitorList::from_outputs(&outputs, 4480, 1440);
        assert_eq!(
            list.as_slice(),
            &[Rect::new(1920, 0, 2560, 1440), Rect::new(0, 360, 1920, 1080)]
        );
    }

    #[test]
    fn test_monitor_lookup() {
        let list = MonitorList::new(vec![Rect::new(0, 0, 1920, 1080), Rect::new(1920, 0, 1920, 1080)]);
        assert_eq!(list.monitor_at(Point::new(1919, 500)), Some(Rect::new(0, 0, 1920, 1080)));
        assert_eq!(list.monitor_at(Point::new(1920, 500)), Some(Rect::new(1920, 0, 1920, 1080)));
        assert_eq!(list.monitor_at(Point::new(-5, 500)), None);

        // Window straddling the seam belongs to the monitor holding its centre
        let window = Rect::new(1800, 100, 400, 300);
        assert_eq!(list.monitor_for_rect(&window), Some(Rect::new(1920, 0, 1920, 1080)));
    }
}
