//! Configuration system for the MateEngine X11 layer
//!
//! Loads configuration from TOML file at `~/.config/mate-x11/config.toml`
//! Auto-generates default config file on first run if missing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::shared::visibility::DEFAULT_AREA_EPSILON;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub update_loop: UpdateLoopConfig,
    pub visibility: VisibilityConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file, or use defaults if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            info!("Config file not found at {:?}, using defaults", config_path);
            if let Err(e) = Self::save_default(&config_path) {
                warn!("Failed to create default config file: {}", e);
            }
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;

        if config.window.clamp_to_protocol() {
            warn!(
                "Window geometry in {:?} is outside the X11 range, clamped to ({}, {}) {}x{}",
                path, config.window.x, config.window.y, config.window.width, config.window.height
            );
        }

        info!("Configuration loaded from {:?}", path);
        debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Get the path to the config file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("mate-x11");

        Ok(config_dir.join("config.toml"))
    }

    /// Save default configuration to file
    fn save_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let toml_string = toml::to_string_pretty(&Self::default())
            .context("Failed to serialize default config")?;

        fs::write(path, toml_string)
            .context("Failed to write default config file")?;

        info!("Created default config file at {:?}", path);
        Ok(())
    }
}

/// How position and size changes reach the window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveMode {
    /// `_NET_MOVERESIZE_WINDOW` client message to the window manager
    #[default]
    WmMessage,
    /// Direct ConfigureWindow, for window managers that mishandle the client message
    Direct,
}

/// Pet window configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    /// Keep the window above normal windows
    pub topmost: bool,
    /// Keep the window out of taskbars and pagers
    pub hide_from_taskbar: bool,
    pub move_mode: MoveMode,
    /// Exit at startup when no compositing manager runs; otherwise shaping is skipped
    pub require_compositor: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            x: 200,
            y: 200,
            width: 320,
            height: 480,
            topmost: true,
            hide_from_taskbar: true,
            move_mode: MoveMode::WmMessage,
            require_compositor: true,
        }
    }
}

impl WindowConfig {
    /// Position and size as the 16-bit values CreateWindow carries
    ///
    /// Sizes are at least one pixel; a zero-sized window is a protocol error.
    pub fn protocol_geometry(&self) -> (i16, i16, u16, u16) {
        let clamp_pos = |v: i32| v.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        let clamp_size = |v: u32| v.clamp(1, u16::MAX as u32) as u16;
        (
            clamp_pos(self.x),
            clamp_pos(self.y),
            clamp_size(self.width),
            clamp_size(self.height),
        )
    }

    /// Rewrite out-of-range geometry in place, returning whether anything changed
    fn clamp_to_protocol(&mut self) -> bool {
        let (x, y, width, height) = self.protocol_geometry();
        let clamped = (x as i32, y as i32, width as u32, height as u32);
        let changed = clamped != (self.x, self.y, self.width, self.height);
        (self.x, self.y, self.width, self.height) = clamped;
        changed
    }
}

/// Background update loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateLoopConfig {
    /// Longest wait for the X socket before re-checking cancellation
    pub idle_poll_ms: u64,
    /// Bounded wait for the loop thread at shutdown
    pub shutdown_timeout_ms: u64,
    /// Monitor list refresh period
    pub monitor_refresh_secs: u64,
}

impl Default for UpdateLoopConfig {
    fn default() -> Self {
        Self {
            idle_poll_ms: 8,
            shutdown_timeout_ms: 500,
            monitor_refresh_secs: 5,
        }
    }
}

/// Occlusion test configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibilityConfig {
    /// Tolerance subtracted from the window area before comparing with the occluded area
    pub area_epsilon: f64,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            area_epsilon: DEFAULT_AREA_EPSILON,
        }
    }
}

/// Logging configuration (`RUST_LOG` takes precedence)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "mate_x11=debug,info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.window.move_mode, MoveMode::WmMessage);
        assert!(config.window.require_compositor);
        assert_eq!(config.visibility.area_epsilon, 1e-4);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[window]\nmove_mode = \"direct\"\nwidth = 256\n\n[update_loop]\nidle_poll_ms = 4"
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.window.move_mode, MoveMode::Direct);
        assert_eq!(config.window.width, 256);
        assert_eq!(config.window.height, WindowConfig::default().height);
        assert_eq!(config.update_loop.idle_poll_ms, 4);
        assert_eq!(config.update_loop.shutdown_timeout_ms, 500);
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_default_round_trips_through_toml() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_out_of_range_geometry_is_clamped() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[window]\nx = -40000\ny = 70000\nwidth = 0\nheight = 100000").unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(
            (config.window.x, config.window.y, config.window.width, config.window.height),
            (-32768, 32767, 1, 65535)
        );
    }

    #[test]
    fn test_default_geometry_is_unchanged() {
        let mut window = WindowConfig::default();
        assert!(!window.clamp_to_protocol());
        assert_eq!(window.protocol_geometry(), (200, 200, 320, 480));
    }

    #[test]
    fn test_rejects_unknown_move_mode() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[window]\nmove_mode = \"teleport\"").unwrap();
        assert!(Config::load_from(file.path()).is_err());
    }
}
