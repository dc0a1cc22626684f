// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Bridge configuration via `tracklib.yaml`.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::core::{BridgeError, Result};

/// `logging` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive. `RUST_LOG` overrides it.
    pub filter: String,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
            ansi: false,
        }
    }
}

/// `commands` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    /// Upper bound for typed command waits, in milliseconds.
    pub timeout_ms: Option<u64>,
}

impl CommandsConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// `frames` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FramesConfig {
    pub bytes_per_pixel: usize,
    /// Largest accepted frame width or height.
    pub max_dimension: u32,
}

impl FramesConfig {
    pub const DEFAULT_MAX_DIMENSION: u32 = 16384;
}

impl Default for FramesConfig {
    fn default() -> Self {
        Self {
            bytes_per_pixel: 4,
            max_dimension: Self::DEFAULT_MAX_DIMENSION,
        }
    }
}

/// Bridge configuration from `tracklib.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub logging: LoggingConfig,
    pub commands: CommandsConfig,
    pub frames: FramesConfig,
}

impl BridgeConfig {
    /// Configuration file name.
    pub const FILE_NAME: &'static str = "tracklib.yaml";

    /// Parse and validate YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| BridgeError::Configuration(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a directory. Returns error if the file is
    /// missing, cannot be parsed or is invalid.
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(Self::FILE_NAME);

        let content = std::fs::read_to_string(&config_path).map_err(|e| {
            BridgeError::Configuration(format!("Failed to read {}: {}", config_path.display(), e))
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            BridgeError::Configuration(format!("Failed to parse {}: {}", config_path.display(), e))
        })?;
        config.validate()?;

        tracing::info!("Loaded bridge config from {}", config_path.display());
        Ok(config)
    }

    /// Load configuration from a directory, returning defaults if the file is
    /// missing, unparseable or invalid.
    pub fn load_or_default(dir: &Path) -> Self {
        let config_path = dir.join(Self::FILE_NAME);

        if !config_path.exists() {
            tracing::debug!(
                "No {} found in {}, using defaults",
                Self::FILE_NAME,
                dir.display()
            );
            return Self::default();
        }

        match Self::load(dir) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{}, using defaults", e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.frames.bytes_per_pixel == 0 {
            return Err(BridgeError::Configuration(
                "frames.bytes_per_pixel must be non-zero".into(),
            ));
        }
        if self.frames.max_dimension == 0 {
            return Err(BridgeError::Configuration(
                "frames.max_dimension must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
