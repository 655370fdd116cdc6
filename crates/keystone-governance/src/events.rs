//! Typed events emitted by the governance components.

use keystone_types::{Address, Hash, Tick};
use serde::Serialize;

use crate::proposal::ProposalState;

/// Event emitted by a state-changing operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GovernanceEvent {
    DelegateChanged {
        delegator: Address,
        from: Address,
        to: Address,
    },
    DelegateVotesChanged {
        delegate: Address,
        previous: u128,
        new: u128,
    },
    ProposalCreated {
        id: u64,
        proposer: Address,
        actions: usize,
        voting_start: Tick,
        voting_end: Tick,
        description: String,
    },
    VoteCast {
        voter: Address,
        proposal_id: u64,
        support: bool,
        votes: u128,
    },
    ProposalCanceled {
        id: u64,
        previous_state: ProposalState,
    },
    ProposalQueued {
        id: u64,
        eta: Tick,
    },
    ProposalExecuted {
        id: u64,
    },
    QueueTransaction {
        hash: Hash,
        target: Address,
        eta: Tick,
    },
    ExecuteTransaction {
        hash: Hash,
        target: Address,
        eta: Tick,
    },
    CancelTransaction {
        hash: Hash,
        target: Address,
        eta: Tick,
    },
    NewPendingAdmin {
        pending_admin: Address,
    },
    NewAdmin {
        admin: Address,
    },
    NewDelay {
        delay: Tick,
    },
}

/// Append-only buffer drained by the owner of a component.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<GovernanceEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, event: GovernanceEvent) {
        self.events.push(event);
    }

    /// Remove and return every recorded event.
    pub fn drain(&mut self) -> Vec<GovernanceEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
