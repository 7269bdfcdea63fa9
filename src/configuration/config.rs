use super::types::{ImageBounds, ScoreRange};
use crate::error_handling::types::ConfigError;
use serde::Deserialize;
use std::path::Path;

/// Store configuration.
///
/// All fields have defaults so an empty TOML file (or `StoreConfig::default()`)
/// yields a working store. Loaded with [`StoreConfig::from_file`] or built
/// directly by the embedding application.
///
/// # Fields Overview
///
/// - `max_connections`: size of the SQLite connection pool
/// - `busy_timeout_secs`: how long a writer waits on a locked database before
///   the operation is aborted and surfaced as a transient error
/// - `score_range`: inclusive range accepted for prediction confidence
/// - `image_bounds`: when set, bounding boxes must fall inside the image
#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub max_connections: u32,
    pub busy_timeout_secs: u64,
    pub score_range: ScoreRange,
    pub image_bounds: Option<ImageBounds>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            busy_timeout_secs: 5,
            score_range: ScoreRange::default(),
            image_bounds: None,
        }
    }
}

impl StoreConfig {
    /// Reads and validates a configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<StoreConfig, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(ConfigError::IoError)?;
        let config: StoreConfig =
            toml::from_str(&raw).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the numeric sanity of the configured ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.score_range.min.is_finite() || !self.score_range.max.is_finite() {
            return Err(ConfigError::BadScoreRange(String::from(
                "score range bounds must be finite",
            )));
        }
        if self.score_range.min >= self.score_range.max {
            return Err(ConfigError::BadScoreRange(format!(
                "min ({}) must be below max ({})",
                self.score_range.min, self.score_range.max
            )));
        }
        if let Some(bounds) = &self.image_bounds {
            if !(bounds.width.is_finite() && bounds.width > 0.0)
                || !(bounds.height.is_finite() && bounds.height > 0.0)
            {
                return Err(ConfigError::BadImageBounds(format!(
                    "width and height must be finite and positive, got {}x{}",
                    bounds.width, bounds.height
                )));
            }
        }
        Ok(())
    }
}
