/// Configuration for the board sync client.
/// Reads client.json from ~/.config/boardsync/client.json (or platform equivalent),
/// then applies BOARDSYNC_API_URL / BOARDSYNC_WS_URL overrides.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_API_URL: &str = "BOARDSYNC_API_URL";
pub const ENV_WS_URL: &str = "BOARDSYNC_WS_URL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Push-channel base; derived from `api_url` when absent.
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub board_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_api_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_delay_ms() -> u64 {
    5000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

impl ReconnectConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            ws_url: None,
            reconnect: ReconnectConfig::default(),
            board_id: None,
        }
    }
}

impl ClientConfig {
    /// Push-channel base URL: explicit `ws_url`, or `api_url` with its scheme
    /// swapped to ws/wss.
    pub fn ws_base(&self) -> String {
        let base = match &self.ws_url {
            Some(url) => url.clone(),
            None => self
                .api_url
                .replacen("https://", "wss://", 1)
                .replacen("http://", "ws://", 1),
        };
        base.trim_end_matches('/').to_string()
    }

    pub fn api_base(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }

    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.api_url = url;
        }
        if let Some(url) = lookup(ENV_WS_URL).filter(|v| !v.trim().is_empty()) {
            self.ws_url = Some(url);
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Default config path: ~/.config/boardsync/client.json
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("boardsync")
        .join("client.json")
}

/// Load config from path. Returns default if the file doesn't exist or
/// can't be parsed. Environment overrides are applied on top.
pub fn load_config(path: &Path) -> ClientConfig {
    let mut config = match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            log::warn!("Failed to parse config {}: {}", path.display(), e);
            ClientConfig::default()
        }),
        Err(_) => {
            log::info!("No config at {}, using defaults", path.display());
            ClientConfig::default()
        }
    };
    config.apply_env(|key| std::env::var(key).ok());
    config
}

/// Load a config the user pointed at explicitly; missing or broken files are errors.
pub fn load_config_strict(path: &Path) -> Result<ClientConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config: ClientConfig =
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    config.apply_env(|key| std::env::var(key).ok());
    Ok(config)
}

/// Save config to path.
pub fn save_config(path: &Path, config: &ClientConfig) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    fs::write(path, content)
}

/// Store `board_id` as the default board, keeping everything else in the
/// file as written. Environment overrides are not persisted.
pub fn remember_board(path: &Path, board_id: i64) -> Result<(), ConfigError> {
    let mut config = match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => ClientConfig::default(),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    config.board_id = Some(board_id);
    save_config(path, &config).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
