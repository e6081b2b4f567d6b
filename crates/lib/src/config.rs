//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.pgpt/config.json`) and environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// PrivateGPT instance settings.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Where surface state (address, modes, selection, chat log) is kept.
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Base URL, e.g. "http://localhost:8001". Overridden by PGPT_URL env.
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// State file. Relative paths are resolved against the config file's parent.
    /// Omit to use `state.json` next to the config file.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn non_blank(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

/// Resolve the backend URL: env PGPT_URL overrides config.
pub fn resolve_backend_url(config: &Config) -> Option<String> {
    std::env::var("PGPT_URL")
        .ok()
        .and_then(|s| non_blank(&s))
        .or_else(|| config.backend.url.as_deref().and_then(non_blank))
}

/// `PGPT_CONFIG_PATH` when set, else `~/.pgpt/config.json`.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("PGPT_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    match dirs::home_dir() {
        Some(home) => home.join(".pgpt").join("config.json"),
        None => PathBuf::from("config.json"),
    }
}

/// Read the config file. A file that does not exist yet is not an error: the client runs on
/// defaults and remembers the backend address in its state file instead.
/// Returns the path read so the state file can be placed beside it.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok((Config::default(), path));
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    let config = serde_json::from_str(&raw)
        .with_context(|| format!("parsing config from {}", path.display()))?;
    Ok((config, path))
}

/// Where surface state lives: `storage.path` (absolute, or relative to the config file's
/// directory), defaulting to `state.json` in that directory.
pub fn resolve_state_path(config: &Config, config_path: &Path) -> PathBuf {
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    match config.storage.path.as_deref() {
        Some(p) if p.is_absolute() => p.to_path_buf(),
        Some(p) if !p.as_os_str().is_empty() => base.join(p),
        _ => base.join("state.json"),
    }
}
