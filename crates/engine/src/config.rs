use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration, usually read from `vx.toml`.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub ui: UiConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
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
            title: "Vx Engine".to_string(),
            width: 1700,
            height: 900,
            fullscreen: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    /// Only honoured in debug builds.
    pub validation_layers: bool,
    pub frame_timeout_ms: u64,
    pub unfocused_fps_limit: u32,
    pub shader_dir: PathBuf,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "fifo".to_string(),
            validation_layers: true,
            frame_timeout_ms: 1000,
            unfocused_fps_limit: 10,
            shader_dir: PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders")),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct UiConfig {
    pub enabled: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// `filter` follows the `env_logger` filter syntax, e.g. "info" or "vx_engine=debug".
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl Config {
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config = Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        log::info!("Loaded configuration from {path:?}");
        log::debug!("Config: {config:?}");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Requested present mode. Unknown names fall back to FIFO, which every surface supports.
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            other => {
                log::warn!("Unknown present mode '{other}', defaulting to FIFO");
                vk::PresentModeKHR::FIFO
            }
        }
    }

    pub fn frame_timeout_ns(&self) -> u64 {
        self.graphics.frame_timeout_ms.saturating_mul(1_000_000)
    }

    /// Wake-up interval while the window is minimised.
    pub fn unfocused_frame_interval(&self) -> std::time::Duration {
        let fps = self.graphics.unfocused_fps_limit.max(1);
        std::time::Duration::from_millis(1000 / u64::from(fps))
    }

    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.graphics.validation_layers
    }
}
