//! Configuration for the preview cache
//!
//! Every field has a default, so an empty or missing config file is valid.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const APP_DIR: &str = "widget-previews";
const DB_FILE: &str = "widgetpreviews.db";
const CONFIG_FILE: &str = "config.toml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Location of the preview database; platform cache dir when unset
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Capacity of the in-memory tier, in previews
    #[serde(default = "default_memory_entries")]
    pub memory_entries: usize,
    /// How many retired buffers are kept for reuse
    #[serde(default = "default_recycle_capacity")]
    pub recycle_capacity: usize,
    /// Upper bound on loads running on blocking workers at once
    #[serde(default = "default_max_concurrent_loads")]
    pub max_concurrent_loads: usize,
    #[serde(default)]
    pub render: RenderConfig,
}

/// Device metrics used by the default preview renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_cell_width")]
    pub cell_width_px: u32,
    #[serde(default = "default_icon_size")]
    pub icon_size_px: u32,
    /// Edge of one placeholder tile drawn for widgets without artwork
    #[serde(default = "default_tile")]
    pub tile_px: u32,
    #[serde(default = "default_padding")]
    pub shortcut_padding_top: u32,
    #[serde(default = "default_padding")]
    pub shortcut_padding_left: u32,
    #[serde(default = "default_padding")]
    pub shortcut_padding_right: u32,
}

fn default_memory_entries() -> usize {
    64
}

fn default_recycle_capacity() -> usize {
    16
}

fn default_max_concurrent_loads() -> usize {
    4
}

fn default_cell_width() -> u32 {
    160
}

fn default_icon_size() -> u32 {
    48
}

fn default_tile() -> u32 {
    80
}

fn default_padding() -> u32 {
    8
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            cell_width_px: default_cell_width(),
            icon_size_px: default_icon_size(),
            tile_px: default_tile(),
            shortcut_padding_top: default_padding(),
            shortcut_padding_left: default_padding(),
            shortcut_padding_right: default_padding(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            memory_entries: default_memory_entries(),
            recycle_capacity: default_recycle_capacity(),
            max_concurrent_loads: default_max_concurrent_loads(),
            render: RenderConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Parse a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Load from the default location, falling back to defaults when
    /// the file does not exist
    pub fn load_or_default() -> Result<Self, ConfigError> {
        let path = Self::default_config_path()?;
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Get the path where the config file is looked up
    /// - Linux: ~/.config/widget-previews/config.toml
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let mut path = dirs::config_dir()
            .or_else(dirs::home_dir)
            .ok_or(ConfigError::NoDirectory("config"))?;
        path.push(APP_DIR);
        path.push(CONFIG_FILE);
        Ok(path)
    }

    /// Get the path where the database should be stored
    /// - Linux: ~/.cache/widget-previews/widgetpreviews.db
    /// - macOS: ~/Library/Caches/widget-previews/widgetpreviews.db
    pub fn resolved_database_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.database_path {
            return Ok(path.clone());
        }

        let mut path = dirs::cache_dir()
            .or_else(dirs::home_dir)
            .ok_or(ConfigError::NoDirectory("cache"))?;
        path.push(APP_DIR);
        path.push(DB_FILE);
        Ok(path)
    }
}
