use keystone_types::{Address, Hash, Tick};
use thiserror::Error;

/// Broad failure classes. Every [`GovernanceError`] belongs to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller lacks the required role.
    Authorization,
    /// Operation attempted outside its time window.
    Timing,
    /// Operation invalid for the entity's lifecycle state.
    State,
    /// Malformed arguments.
    Input,
    /// The invoked target action failed.
    Execution,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Authorization => "authorization",
            ErrorKind::Timing => "timing",
            ErrorKind::State => "state",
            ErrorKind::Input => "input",
            ErrorKind::Execution => "execution",
        }
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "authorization" => Ok(ErrorKind::Authorization),
            "timing" => Ok(ErrorKind::Timing),
            "state" => Ok(ErrorKind::State),
            "input" => Ok(ErrorKind::Input),
            "execution" => Ok(ErrorKind::Execution),
            other => Err(format!("unknown error kind '{other}'")),
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur in governance operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GovernanceError {
    // Authorization
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Proposer votes below threshold: {votes} < {threshold}")]
    BelowProposalThreshold { votes: u128, threshold: u128 },

    // Timing
    #[error("Votes at tick {requested} not yet determined (now {now})")]
    NotYetDetermined { requested: Tick, now: Tick },

    #[error("Clock moved backwards: {requested} < {last}")]
    ClockRegression { requested: Tick, last: Tick },

    #[error("Estimated execution tick {eta} must be at least {earliest}")]
    EtaTooEarly { eta: Tick, earliest: Tick },

    #[error("Transaction hasn't surpassed time lock: now {now} < eta {eta}")]
    TransactionLocked { eta: Tick, now: Tick },

    #[error("Transaction is stale: now {now} > {deadline}")]
    TransactionStale { deadline: Tick, now: Tick },

    // State
    #[error("Proposal not found: {0}")]
    ProposalNotFound(u64),

    #[error("Invalid proposal state: {0}")]
    InvalidState(String),

    #[error("Proposer already has a live proposal: {0}")]
    LiveProposalExists(u64),

    #[error("Voter {0:?} already voted")]
    AlreadyVoted(Address),

    #[error("Transaction already queued: {0}")]
    TransactionAlreadyQueued(Hash),

    #[error("Transaction not queued: {0}")]
    TransactionNotQueued(Hash),

    // Input
    #[error("Invalid account: {0}")]
    InvalidAccount(String),

    #[error("Invalid proposal: {0}")]
    InvalidProposal(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Insufficient balance: {available} < {required}")]
    InsufficientBalance { available: u128, required: u128 },

    #[error("Vote amount overflows")]
    VoteOverflow,

    #[error("Vote amount underflows")]
    VoteUnderflow,

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    // Execution
    #[error("Transaction execution reverted: {0}")]
    ExecutionFailed(String),
}

impl GovernanceError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        use GovernanceError::*;
        match self {
            Unauthorized(_) | BelowProposalThreshold { .. } => ErrorKind::Authorization,
            NotYetDetermined { .. }
            | ClockRegression { .. }
            | EtaTooEarly { .. }
            | TransactionLocked { .. }
            | TransactionStale { .. } => ErrorKind::Timing,
            ProposalNotFound(_)
            | InvalidState(_)
            | LiveProposalExists(_)
            | AlreadyVoted(_)
            | TransactionAlreadyQueued(_)
            | TransactionNotQueued(_) => ErrorKind::State,
            InvalidAccount(_)
            | InvalidProposal(_)
            | InvalidParameter(_)
            | InsufficientBalance { .. }
            | VoteOverflow
            | VoteUnderflow
            | InvalidSnapshot(_) => ErrorKind::Input,
            ExecutionFailed(_) => ErrorKind::Execution,
        }
    }
}
