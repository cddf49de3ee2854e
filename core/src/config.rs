//! Runtime knobs.
//!
//! A [`RuntimeConfig`] is read from TOML (or built in code), optionally
//! adjusted from the environment, and then applied process-wide.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::object::set_dump_ref_changes;
use crate::walk::{self, DEFAULT_MAX_DEPTH};

pub const ENV_DUMP_REFS: &str = "UMBRA_DUMP_REFS";
pub const ENV_WALK_MAX_DEPTH: &str = "UMBRA_WALK_MAX_DEPTH";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub refs: RefsConfig,
    pub walk: WalkConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefsConfig {
    /// Emit a trace event for every retain and release.
    pub dump_changes: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkConfig {
    pub max_depth: usize,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing` filter expression used by the CLI.
    pub filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Parse(String),
    Invalid { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(msg) => write!(f, "invalid configuration: {}", msg),
            ConfigError::Invalid { key, value } => write!(f, "invalid value '{}' for {}", value, key),
        }
    }
}

impl std::error::Error for ConfigError {}

impl RuntimeConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = Self::from_toml_str(&text).with_context(|| format!("in config file {}", path.display()))?;
        debug!(target: "umbra::config", path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize configuration")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.walk.max_depth == 0 {
            return Err(ConfigError::Invalid {
                key: "walk.max_depth",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Apply `UMBRA_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_DUMP_REFS) {
            self.refs.dump_changes = parse_flag(&raw).ok_or(ConfigError::Invalid {
                key: ENV_DUMP_REFS,
                value: raw,
            })?;
        }
        if let Some(raw) = lookup(ENV_WALK_MAX_DEPTH) {
            self.walk.max_depth = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: ENV_WALK_MAX_DEPTH,
                value: raw.clone(),
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Install the knobs for the whole process.
    pub fn apply(&self) {
        set_dump_ref_changes(self.refs.dump_changes);
        walk::set_max_depth(self.walk.max_depth);
        debug!(
            target: "umbra::config",
            dump_ref_changes = self.refs.dump_changes,
            walk_max_depth = self.walk.max_depth,
            "applied configuration"
        );
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" | "" => Some(false),
        _ => None,
    }
}
