//! Optional config file loading. Search order: ./hakoscrape.toml, then
//! $XDG_CONFIG_HOME/hakoscrape/config.toml (or ~/.config/hakoscrape/config.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};

const LOCAL_CONFIG: &str = "hakoscrape.toml";
const APP_DIR: &str = "hakoscrape";

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default, deny_unknown_fields)]
pub struct Config {
    /// Root for finished books. Paths are relative to CWD.
    pub output_dir: Option<PathBuf>,
    /// Root for the image cache.
    pub cache_dir: Option<PathBuf>,
    /// HTTP User-Agent header.
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Minimum delay in seconds between requests.
    pub request_delay_secs: Option<u64>,
    /// Retry ceiling for chapters and images. 0 means unlimited.
    pub retries: Option<u32>,
    /// Delay in seconds before each retry (e.g. [1, 2, 4]); the last value repeats.
    pub retry_backoff_secs: Option<Vec<u64>>,
    /// Render translator notes after their paragraph (default: true).
    pub notes: Option<bool>,
    /// CSS file replacing the built-in stylesheet.
    pub stylesheet: Option<PathBuf>,
}

/// Search order: (1) ./hakoscrape.toml, (2) $XDG_CONFIG_HOME/hakoscrape/config.toml.
/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config() -> Result<Option<Config>, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Cannot determine current directory: {}", e))?;
    let mut paths = vec![cwd.join(LOCAL_CONFIG)];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join(APP_DIR).join("config.toml"));
    }
    for path in &paths {
        if path.exists() {
            return load_config_file(path).map(Some);
        }
    }
    Ok(None)
}

/// Read and parse one config file.
pub fn load_config_file(path: &Path) -> Result<Config, String> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| format!("Cannot read config {}: {}", path.display(), e))?;
    toml::from_str(&s).map_err(|e| format!("Invalid config {}: {}", path.display(), e))
}
