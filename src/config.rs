// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::Path;

/// Number of frame-sync slots the renderer cycles through by default
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Root configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "vkforge".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GraphicsConfig {
    /// "auto" picks MAILBOX > IMMEDIATE > FIFO from what the surface offers
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
    /// Also accept integrated GPUs during device selection
    pub allow_integrated_gpu: bool,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "auto".to_string(),
            clear_color: [0.1, 0.2, 0.8, 1.0],
            max_frames_in_flight: MAX_FRAMES_IN_FLIGHT,
            allow_integrated_gpu: false,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "vkforge.log".to_string(),
            show_fps: true,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        if config.graphics.max_frames_in_flight == 0 {
            log::warn!(
                "max_frames_in_flight = 0 is invalid, using {}",
                MAX_FRAMES_IN_FLIGHT
            );
            config.graphics.max_frames_in_flight = MAX_FRAMES_IN_FLIGHT;
        }
        Ok(config)
    }

    /// Explicit present mode override, or `None` for the automatic preference order
    pub fn present_mode_override(&self) -> Option<vk::PresentModeKHR> {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "auto" => None,
            "immediate" => Some(vk::PresentModeKHR::IMMEDIATE),
            "mailbox" => Some(vk::PresentModeKHR::MAILBOX),
            "fifo" => Some(vk::PresentModeKHR::FIFO),
            "fifo_relaxed" => Some(vk::PresentModeKHR::FIFO_RELAXED),
            _ => {
                log::warn!(
                    "Unknown present mode '{}', using automatic selection",
                    self.graphics.present_mode
                );
                None
            }
        }
    }

    /// Validation is only ever enabled on debug builds
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.debug.validation_layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.graphics.max_frames_in_flight, MAX_FRAMES_IN_FLIGHT);
        assert!(!config.graphics.allow_integrated_gpu);
        assert_eq!(config.present_mode_override(), None);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
            [window]
            title = "demo"

            [graphics]
            present_mode = "FIFO"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.title, "demo");
        assert_eq!(config.window.height, 720);
        assert_eq!(
            config.present_mode_override(),
            Some(vk::PresentModeKHR::FIFO)
        );
        assert_eq!(config.graphics.clear_color, [0.1, 0.2, 0.8, 1.0]);
    }

    #[test]
    fn zero_frames_in_flight_is_corrected() {
        let config = Config::from_toml("[graphics]\nmax_frames_in_flight = 0\n").unwrap();
        assert_eq!(config.graphics.max_frames_in_flight, MAX_FRAMES_IN_FLIGHT);
    }

    #[test]
    fn unknown_present_mode_falls_back_to_auto() {
        let config = Config::from_toml("[graphics]\npresent_mode = \"warp\"\n").unwrap();
        assert_eq!(config.present_mode_override(), None);
    }

    #[test]
    fn shipped_config_only_accepts_discrete_gpus() {
        let config = Config::from_toml(include_str!("../config.toml")).unwrap();
        assert!(!config.graphics.allow_integrated_gpu);
        assert_eq!(config.present_mode_override(), None);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(Config::from_toml("[window\nwidth = ").is_err());
    }
}
