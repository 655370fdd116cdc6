//! Keystone Governance - Token-weighted governance with a timelock.
//!
//! This crate provides:
//! - Delegated vote weight with point-in-time checkpoints
//! - Proposal lifecycle and vote tallying
//! - A timelock queue gating privileged actions
//! - A facade wiring the three together under one clock

pub mod action;
pub mod checkpoints;
pub mod config;
pub mod error;
pub mod events;
pub mod proposal;
pub mod system;
pub mod timelock;

pub use action::{Action, ActionCall, ActionExecutor, RecordingExecutor};
pub use checkpoints::{Checkpoint, VotingLedger};
pub use config::{ConfigError, GovernanceConfig, GovernorConfig, TimelockConfig, TOKEN};
pub use error::{ErrorKind, GovernanceError};
pub use events::{EventLog, GovernanceEvent};
pub use proposal::{Governor, Proposal, ProposalActions, ProposalState, Receipt};
pub use system::{Deployment, Governance, GovernanceState};
pub use timelock::{Timelock, GRACE_PERIOD, MAXIMUM_DELAY, MINIMUM_DELAY};
