//! Native X11 bindings
//!
//! The only module that talks to the server. Raw XIDs stay behind
//! [`WindowId`]; failures are mapped into [`crate::error::X11Error`].

pub mod atoms;
pub mod control;
pub mod damage;
pub mod display;
pub mod event_stream;
pub mod occlusion;
pub mod query;
pub mod shape;
pub mod update_loop;
pub mod window;

use std::fmt;

pub use control::WindowControl;
pub use damage::DamageState;
pub use display::Display;
pub use shape::{ShapeEngine, ShapePhase};
pub use update_loop::{LoopSnapshot, UpdateLoop};

/// Server-side window identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(u32);

impl WindowId {
    /// Wrap an XID handed over by the embedding application
    pub const fn from_raw(xid: u32) -> Self {
        Self(xid)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}
