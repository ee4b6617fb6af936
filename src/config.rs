//! Configuration for toolrack.
//!
//! This module defines the structure of the optional `toolrack.toml` file
//! and provides functionality to load and parse it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level configuration structure corresponding to `toolrack.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Path to the tools catalog (default: `tools.json`).
    pub tools_file: Option<PathBuf>,
    /// Path to the environments catalog (default: `environments.json`).
    pub environments_file: Option<PathBuf>,
    /// Default tracing filter when `RUST_LOG` is unset (default: "warn").
    pub log_filter: Option<String>,
}

/// Loads and parses the configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Returns the default config path if one exists in the current directory.
pub fn find_config() -> Option<PathBuf> {
    let path = PathBuf::from("toolrack.toml");
    path.is_file().then_some(path)
}
