//! Server-independent types shared by the X11 layer and the application

pub mod drag;
pub mod geometry;
pub mod mask;
pub mod monitors;
pub mod visibility;

pub use drag::DragTracker;
pub use geometry::{Point, Rect};
pub use mask::ShapeMask;
pub use monitors::{MonitorList, OutputCrtc};
