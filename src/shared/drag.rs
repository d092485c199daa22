//! Pointer drag tracking
//!
//! The window position is always derived from the anchor captured at
//! pointer-down, never from the previous motion step, so many small moves
//! land exactly where one large move would.

use super::geometry::Point;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DragAnchor {
    pointer: Point,
    window: Point,
}

#[derive(Debug, Default)]
pub struct DragTracker {
    anchor: Option<DragAnchor>,
}

impl DragTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the pointer and window position at the start of a drag
    pub fn pointer_down(&mut self, pointer: Point, window: Point) {
        self.anchor = Some(DragAnchor { pointer, window });
    }

    /// Window position for the current pointer, `None` when no drag is active
    pub fn pointer_move(&self, pointer: Point) -> Option<Point> {
        self.anchor
            .map(|anchor| anchor.window + (pointer - anchor.pointer))
    }

    pub fn pointer_up(&mut self) {
        self.anchor = None;
    }

    pub fn is_active(&self) -> bool {
        self.anchor.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drag_round_trip() {
        let mut drag = DragTracker::new();
        drag.pointer_down(Point::new(500, 400), Point::new(320, 240));
        assert_eq!(drag.pointer_move(Point::new(530, 370)), Some(Point::new(350, 210)));
    }

    #[test]
    fn test_small_moves_match_one_large_move() {
        let mut drag = DragTracker::new();
        drag.pointer_down(Point::new(10, 10), Point::new(100, 100));

        let mut last = None;
        for step in 1..=250 {
            last = drag.pointer_move(Point::new(10 + step, 10 - step / 3));
        }

        let mut single = DragTracker::new();
        single.pointer_down(Point::new(10, 10), Point::new(100, 100));
        assert_eq!(last, single.pointer_move(Point::new(260, 10 - 250 / 3)));
        assert_eq!(last, Some(Point::new(350, 100 - 83)));
    }

    #[test]
    fn test_no_motion_without_pointer_down() {
        let mut drag = DragTracker::new();
        assert_eq!(drag.pointer_move(Point::new(5, 5)), None);

        drag.pointer_down(Point::ZERO, Point::ZERO);
        assert!(drag.is_active());
        drag.pointer_up();
        assert!(!drag.is_active());
        assert_eq!(drag.pointer_move(Point::new(5, 5)), None);
    }
}
