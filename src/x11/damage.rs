//! Damage tracking for the pet window
//!
//! One DAMAGE object per window, reporting `NON_EMPTY`. The update loop
//! subtracts the whole region after each notification so the next change
//! notifies again.

use tracing::debug;
use x11rb::connection::Connection;
use x11rb::protocol::damage::{ConnectionExt as _, ReportLevel};
use x11rb::NONE;

use crate::error::Result;
use crate::x11::display::Display;
use crate::x11::WindowId;

/// Damage object tracking the pet window's rendered contents
#[derive(Debug)]
pub struct DamageState {
    damage: u32,
}

impl DamageState {
    /// Create a damage object reporting whenever the window becomes non-empty-damaged
    pub fn create(display: &Display, window: WindowId) -> Result<Self> {
        let damage = display.call(|conn| Ok(conn.generate_id()?))?;
        display.call(|conn| {
            conn.damage_create(damage, window.raw(), ReportLevel::NON_EMPTY)?
                .check()?;
            Ok(())
        })?;
        debug!("Created damage object 0x{:x} for window {}", damage, window);

        Ok(Self { damage })
    }

    pub(crate) fn id(&self) -> u32 {
        self.damage
    }

    pub fn destroy(self, display: &Display) -> Result<()> {
        display.call(|conn| {
            conn.damage_destroy(self.damage)?;
            conn.flush()?;
            Ok(())
        })?;
        debug!("Destroyed damage object 0x{:x}", self.damage);
        Ok(())
    }
}

/// Acknowledge all reported damage on `damage` so the next change notifies again
pub(crate) fn subtract(display: &Display, damage: u32) -> Result<()> {
    display.call(|conn| {
        conn.damage_subtract(damage, NONE, NONE)?;
        Ok(())
    })
}
