use crate::compare::MatchThresholds;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub detection: DetectionConfig,
    pub matching: MatchingConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Detections below this confidence are ignored
    pub min_confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    pub max_distance: f32,

    // Used instead of max_distance when `secure` is set
    #[serde(default = "default_secure_max_distance")]
    pub secure_max_distance: f32,

    #[serde(default)]
    pub secure: bool,

    pub min_match_count: usize,

    // 0.0 disables ratio voting
    #[serde(default)]
    pub min_model_ratio: f32,
}

fn default_secure_max_distance() -> f32 {
    0.45
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Directory,
    Preferences,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: BackendKind,
    /// Directory for `directory`, JSON file for `preferences`
    pub path: PathBuf,
}

impl MatchingConfig {
    /// Thresholds for the current mode
    pub fn thresholds(&self) -> MatchThresholds {
        MatchThresholds {
            max_distance: if self.secure {
                self.secure_max_distance
            } else {
                self.max_distance
            },
            min_match_count: self.min_match_count,
            min_model_ratio: self.min_model_ratio,
        }
    }
}

impl Config {
    /// Load configuration with fallback chain:
    /// 1. /etc/glimpse/glimpse.toml (system-wide)
    /// 2. ~/.config/glimpse/glimpse.toml (user)
    /// 3. Compiled defaults
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(config) = Self::load_from_path("/etc/glimpse/glimpse.toml") {
            config.validate()?;
            return Ok(config);
        }

        if let Some(home) = std::env::var_os("HOME") {
            let user_config = PathBuf::from(home)
                .join(".config")
                .join("glimpse")
                .join("glimpse.toml");
            if let Ok(config) = Self::load_from_path(&user_config) {
                config.validate()?;
                return Ok(config);
            }
        }

        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.detection.min_confidence) {
            return Err(ConfigError::Validation(
                "Detection confidence must be between 0.0 and 1.0".to_string(),
            ));
        }

        // Distances between normalized vectors never exceed 2
        for (label, value) in [
            ("Max distance", self.matching.max_distance),
            ("Secure max distance", self.matching.secure_max_distance),
        ] {
            if !(value > 0.0 && value <= 2.0) {
                return Err(ConfigError::Validation(format!(
                    "{} must be in (0.0, 2.0]",
                    label
                )));
            }
        }

        if self.matching.min_match_count == 0 {
            return Err(ConfigError::Validation(
                "Min match count must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.matching.min_model_ratio) {
            return Err(ConfigError::Validation(
                "Min model ratio must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.storage.backend != BackendKind::Memory
            && self.storage.path.as_os_str().is_empty()
        {
            return Err(ConfigError::Validation(
                "Storage path cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            detection: DetectionConfig {
                min_confidence: 0.6,
            },
            matching: MatchingConfig {
                max_distance: 0.7,
                secure_max_distance: 0.45,
                secure: false,
                min_match_count: 1,
                min_model_ratio: 0.0,
            },
            storage: StorageConfig {
                backend: BackendKind::Directory,
                path: PathBuf::from("/var/lib/glimpse/faces"),
            },
        }
    }
}
