//! Optional TOML configuration for the default runtime directory, default
//! capacity, and non-blocking default (`spec.md` §6.3's "thin convenience
//! wrapper", expanded per `SPEC_FULL.md` §7 "Configuration"). CLI flags
//! always override file values.
//!
//! Grounded in the `N10h0ggr-Gladix/shared` config-loading pattern:
//! `serde::Deserialize` struct, `toml::from_str`, a `thiserror` error type,
//! validated after parsing.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Validation(String),
}

/// Top-level `xipc-cli` configuration, loaded from an optional TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_runtime_dir")]
    pub runtime_dir: PathBuf,
    #[serde(default = "default_capacity")]
    pub default_capacity: u32,
    #[serde(default)]
    pub nonblock_default: bool,
}

fn default_runtime_dir() -> PathBuf {
    PathBuf::from(xipc_core::DEFAULT_RUNTIME_DIR)
}

fn default_capacity() -> u32 {
    4096
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runtime_dir: default_runtime_dir(),
            default_capacity: default_capacity(),
            nonblock_default: false,
        }
    }
}

impl Config {
    /// Loads and validates a config file. Absence of the file is not an
    /// error at this layer — the caller decides whether a missing
    /// `--config` path is fatal; `load` itself only runs once a path is
    /// known to exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let cfg: Config = toml::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_capacity == 0 || !self.default_capacity.is_power_of_two() {
            return Err(ConfigError::Validation(
                "default_capacity must be a non-zero power of two".to_string(),
            ));
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn from_str(toml: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(toml)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_empty() {
        let cfg = Config::from_str("").unwrap();
        assert_eq!(cfg.default_capacity, 4096);
        assert!(!cfg.nonblock_default);
    }

    #[test]
    fn parses_overrides() {
        let cfg = Config::from_str(
            r#"
            runtime_dir = "/var/run/xipc"
            default_capacity = 8192
            nonblock_default = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.runtime_dir, PathBuf::from("/var/run/xipc"));
        assert_eq!(cfg.default_capacity, 8192);
        assert!(cfg.nonblock_default);
    }

    #[test]
    fn rejects_non_power_of_two_capacity() {
        let result = Config::from_str("default_capacity = 100");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }
}
