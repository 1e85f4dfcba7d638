//! Configuration management for flowclass
//!
//! Strongly-typed configuration with TOML support. Every section has
//! defaults, so a partial file (or none at all) is a valid configuration.

use crate::detect::DetectorRegistry;
use crate::error::{Error, Result};
use crate::protocol::ProtocolBitmask;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Flow cache sizing
    pub cache: CacheConfig,

    /// Classification budget
    pub classification: ClassificationConfig,

    /// Enabled detectors
    pub detectors: DetectorsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::ConfigNotFound {
                path: path.display().to_string(),
            },
            _ => Error::Io(e),
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(Error::from)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.cache.capacity == 0 {
            return Err(Error::config_value("cache.capacity", "Must be at least 1"));
        }
        if self.cache.max_active_classifications == 0 {
            return Err(Error::config_value(
                "cache.max_active_classifications",
                "Must be at least 1",
            ));
        }

        let c = &self.classification;
        if c.packet_ceiling == 0 {
            return Err(Error::config_value("classification.packet_ceiling", "Must be at least 1"));
        }
        if c.weak_packet_limit == 0 {
            return Err(Error::config_value(
                "classification.weak_packet_limit",
                "Must be at least 1",
            ));
        }
        ProtocolBitmask::from_keys(&c.weak_protocols)?;
        ProtocolBitmask::from_keys(&c.always_inspect)?;
        DetectorRegistry::from_keys(&self.detectors.enabled)?;

        Ok(())
    }

    /// Serialize to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

/// Flow cache sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of tracked flows
    pub capacity: usize,
    /// Maximum number of flows classifying at once (detector scratch regions)
    pub max_active_classifications: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 16384,
            max_active_classifications: 4096,
        }
    }
}

/// Classification budget and finalization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    /// Packets after which any flow is finalized
    pub packet_ceiling: u32,
    /// Packets after which a flow showing a weak protocol is finalized
    pub weak_packet_limit: u32,
    /// Fall back to well-known ports when inspection finds nothing
    pub guess_protocol: bool,
    /// Protocols prone to false positives
    pub weak_protocols: Vec<String>,
    /// Protocols whose flows are never finalized
    pub always_inspect: Vec<String>,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            packet_ceiling: 20,
            weak_packet_limit: 5,
            guess_protocol: true,
            weak_protocols: vec!["http".to_string()],
            always_inspect: vec!["ftp_control".to_string()],
        }
    }
}

/// Enabled detectors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorsConfig {
    /// Detector keys; dispatch order follows detector priority, not this list
    pub enabled: Vec<String>,
}

impl Default for DetectorsConfig {
    fn default() -> Self {
        Self {
            enabled: DetectorRegistry::all()
                .names()
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log file path (None = stderr only)
    pub file: Option<String>,
    /// Enable JSON format logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            json_format: false,
        }
    }
}
