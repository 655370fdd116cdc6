//! Governance parameters.
//!
//! Loaded from TOML. Defaults are sized for a mainnet token with 18
//! decimals; deployments and tests are expected to set their own values.

use std::path::Path;

use keystone_types::Tick;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::GovernanceError;
use crate::timelock::{GRACE_PERIOD, MAXIMUM_DELAY, MINIMUM_DELAY};

/// One whole token in base units (18 decimals).
pub const TOKEN: u128 = 1_000_000_000_000_000_000;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(#[from] GovernanceError),
}

/// Complete governance configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    pub governor: GovernorConfig,
    pub timelock: TimelockConfig,
}

impl GovernanceConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: GovernanceConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), GovernanceError> {
        self.governor.validate()?;
        self.timelock.validate()
    }
}

/// Proposal and voting parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Ticks between proposal creation and the start of voting
    pub voting_delay: Tick,
    /// Length of the voting window in ticks
    pub voting_period: Tick,
    /// Votes a proposer needs to open a proposal
    #[serde(with = "keystone_types::serialization::amount")]
    pub proposal_threshold: u128,
    /// Minimum for-votes for a proposal to succeed
    #[serde(with = "keystone_types::serialization::amount")]
    pub quorum_votes: u128,
    /// Upper bound on actions in one proposal
    pub max_actions_per_proposal: usize,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            voting_delay: 1,
            voting_period: 40_320, // ~7 days of 15s blocks
            proposal_threshold: 10_000_000 * TOKEN,
            quorum_votes: 40_000_000 * TOKEN,
            max_actions_per_proposal: 10,
        }
    }
}

impl GovernorConfig {
    pub fn validate(&self) -> Result<(), GovernanceError> {
        // Votes are read at voting_start - 1, which must be a settled tick.
        if self.voting_delay == 0 {
            return Err(GovernanceError::InvalidParameter("voting_delay must be at least 1".into()));
        }
        if self.voting_period == 0 {
            return Err(GovernanceError::InvalidParameter("voting_period must be positive".into()));
        }
        if self.max_actions_per_proposal == 0 {
            return Err(GovernanceError::InvalidParameter(
                "max_actions_per_proposal must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Timelock parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelockConfig {
    /// Minimum wait between queueing and execution
    pub delay: Tick,
    /// How long after its eta an action stays executable
    pub grace_period: Tick,
}

impl Default for TimelockConfig {
    fn default() -> Self {
        Self {
            delay: MINIMUM_DELAY,
            grace_period: GRACE_PERIOD,
        }
    }
}

impl TimelockConfig {
    pub fn validate(&self) -> Result<(), GovernanceError> {
        Self::check_delay(self.delay)?;
        if self.grace_period == 0 {
            return Err(GovernanceError::InvalidParameter("grace_period must be positive".into()));
        }
        Ok(())
    }

    /// Delay must lie in `[MINIMUM_DELAY, MAXIMUM_DELAY]`.
    pub fn check_delay(delay: Tick) -> Result<(), GovernanceError> {
        if delay < MINIMUM_DELAY {
            return Err(GovernanceError::InvalidParameter(format!(
                "delay {delay} must be at least {MINIMUM_DELAY}"
            )));
        }
        if delay > MAXIMUM_DELAY {
            return Err(GovernanceError::InvalidParameter(format!(
                "delay {delay} must not exceed {MAXIMUM_DELAY}"
            )));
        }
        Ok(())
    }
}
