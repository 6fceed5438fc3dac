//! Configuration loading and parsing.
//!
//! `termweb.toml` is discovered in the working directory first, then the
//! platform config dir. Unknown fields are ignored so the file format can
//! grow without breaking older binaries. Environment variables override the
//! file where noted; the viewer applies platform defaults last.

use anyhow::Result;
use serde::Deserialize;
use std::{fs, path::PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
pub struct ViewerConfig {
    /// Navigate new top-level targets in place instead of opening tabs.
    #[serde(default)]
    pub single_tab: bool,
    #[serde(default = "ViewerConfig::default_toolbar")]
    pub toolbar: bool,
    /// Device pixel ratio handed to the browser viewport.
    #[serde(default = "ViewerConfig::default_scale")]
    pub scale: f64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            single_tab: false,
            toolbar: Self::default_toolbar(),
            scale: Self::default_scale(),
        }
    }
}

impl ViewerConfig {
    const fn default_toolbar() -> bool {
        true
    }
    const fn default_scale() -> f64 {
        1.0
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    /// Scroll direction; `None` defers to `TERMWEB_NATURAL_SCROLL` and then
    /// the platform default (natural on macOS).
    #[serde(default)]
    pub natural_scroll: Option<bool>,
    /// Pixels per wheel nudge (`mod+j` / `mod+k` and wheel steps).
    #[serde(default = "InputConfig::default_scroll_step")]
    pub scroll_step: u32,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            natural_scroll: None,
            scroll_step: Self::default_scroll_step(),
        }
    }
}

impl InputConfig {
    const fn default_scroll_step() -> u32 {
        150
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScreencastConfig {
    /// Starting tier in the adaptive quality ladder (0..=3).
    #[serde(default = "ScreencastConfig::default_initial_tier")]
    pub initial_tier: usize,
}

impl Default for ScreencastConfig {
    fn default() -> Self {
        Self {
            initial_tier: Self::default_initial_tier(),
        }
    }
}

impl ScreencastConfig {
    const fn default_initial_tier() -> usize {
        1
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub viewer: ViewerConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub screencast: ScreencastConfig,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub file: ConfigFile,
    /// Path the file was loaded from, when one existed.
    pub source: Option<PathBuf>,
}

impl Config {
    /// Scroll direction after applying env override and platform default.
    pub fn natural_scroll(&self) -> bool {
        if let Ok(v) = std::env::var("TERMWEB_NATURAL_SCROLL") {
            return v == "1";
        }
        self.file
            .input
            .natural_scroll
            .unwrap_or(cfg!(target_os = "macos"))
    }
}

/// Best-effort config path: working directory first, then the platform
/// config dir.
pub fn discover() -> PathBuf {
    let local = PathBuf::from("termweb.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("termweb").join("termweb.toml");
    }
    PathBuf::from("termweb.toml")
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    match fs::read_to_string(&path) {
        Ok(content) => match toml::from_str::<ConfigFile>(&content) {
            Ok(file) => {
                info!(target: "config", path = %path.display(), "config loaded");
                Ok(Config {
                    file,
                    source: Some(path),
                })
            }
            Err(e) => {
                // A malformed file falls back to defaults rather than
                // refusing to start.
                tracing::warn!(target: "config", path = %path.display(), error = %e, "config parse failed; using defaults");
                Ok(Config::default())
            }
        },
        Err(_) => Ok(Config::default()),
    }
}
