//! MateEngine X11 desktop integration
//!
//! Transparent, click-through pet window support for X11: display connection,
//! geometry and monitor queries, occlusion tests, shape masks and the
//! damage-driven update loop, exposed through [`x11::WindowControl`].

pub mod config;
pub mod error;
pub mod shared;
pub mod x11;
