//! Error taxonomy for the X11 layer
//!
//! Startup errors are fatal to the process. Everything else is transient: the
//! facade logs it and returns a sentinel so the caller retries next tick.

use thiserror::Error;
use x11rb::errors::{ConnectError, ConnectionError, ReplyError, ReplyOrIdError};

use crate::x11::WindowId;

#[derive(Debug, Error)]
pub enum X11Error {
    #[error("cannot open X display: {0}")]
    ConnectionFailed(#[from] ConnectError),

    #[error("required X extension {0} is not available")]
    MissingExtension(&'static str),

    #[error("no 32-bit ARGB visual available for window {0}")]
    NoArgbVisual(WindowId),

    #[error("no compositing manager is running (no owner for _NET_WM_CM_S{0})")]
    NoCompositor(usize),

    #[error("window {0} no longer exists")]
    WindowGone(WindowId),

    #[error("failed to start update loop thread: {0}")]
    Spawn(std::io::Error),

    #[error("X connection already closed")]
    Closed,

    #[error("X connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("X request failed: {0}")]
    Reply(#[from] ReplyError),

    #[error("X resource allocation failed: {0}")]
    ReplyOrId(#[from] ReplyOrIdError),
}

impl X11Error {
    /// Errors the application cannot render its transparent window without
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            X11Error::ConnectionFailed(_)
                | X11Error::MissingExtension(_)
                | X11Error::NoArgbVisual(_)
                | X11Error::NoCompositor(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, X11Error>;
