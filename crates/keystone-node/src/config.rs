//! Node configuration.
//!
//! Handles loading and validation of the tool configuration from
//! config files and command-line arguments.

use keystone_governance::GovernanceConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Deployment name
    pub name: String,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Governance parameters
    pub governance: GovernanceConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "keystone".to_string(),
            logging: LoggingConfig::default(),
            governance: GovernanceConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from file.
    /// Path is validated to prevent directory traversal attacks.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        check_path(path)?;

        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let config: NodeConfig = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Name cannot be empty");
        }
        self.logging.format()?;
        self.governance
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid governance config: {}", e))?;
        Ok(())
    }
}

fn check_path(path: &Path) -> anyhow::Result<()> {
    if path.to_string_lossy().contains("..") {
        anyhow::bail!("Invalid path: directory traversal detected");
    }
    Ok(())
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive
    pub level: String,
    /// Log to file
    pub log_file: Option<PathBuf>,
    /// Log format (json|pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_file: None,
            format: "pretty".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn format(&self) -> anyhow::Result<LogFormat> {
        match self.format.as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => anyhow::bail!("Unknown log format '{}' (expected pretty or json)", other),
        }
    }
}
