//! Engine tuning configuration.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Tuning knobs for the sync engine. All optional; defaults are safe.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Seconds after which fresh view data is considered stale and gets a
  /// background refetch.
  pub stale_after_secs: u64,
  /// Seconds an unsubscribed view is retained before eviction.
  pub retention_secs: u64,
  /// Seconds a pending mutation may wait for the server before it is
  /// failed as a network timeout and rolled back.
  pub mutation_timeout_secs: u64,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      stale_after_secs: 300,
      retention_secs: 600,
      mutation_timeout_secs: 30,
    }
  }
}

impl EngineConfig {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./boardsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/boardsync/config.yaml
  ///
  /// A missing file (when no explicit path was given) yields the defaults.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("boardsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("boardsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: EngineConfig = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  pub fn stale_after(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.stale_after_secs as i64)
  }

  pub fn retention(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.retention_secs as i64)
  }

  pub fn mutation_timeout(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.mutation_timeout_secs)
  }
}
