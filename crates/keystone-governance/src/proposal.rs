//! Proposal lifecycle management.
//!
//! Proposals go through states:
//! Pending -> Active -> Succeeded/Defeated -> Queued -> Executed/Expired,
//! with Canceled reachable from Pending, Active and Queued.
//!
//! The state is never stored. It is derived from the proposal's flags, its
//! tallies and the current tick, so a proposal moves from Active to
//! Succeeded without anyone touching it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use keystone_types::{Address, Tick};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::action::{Action, ActionExecutor};
use crate::checkpoints::VotingLedger;
use crate::config::GovernorConfig;
use crate::error::GovernanceError;
use crate::events::{EventLog, GovernanceEvent};
use crate::timelock::Timelock;

/// Derived lifecycle state of a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalState {
    /// Created, voting has not started
    Pending,
    /// Voting is open
    Active,
    /// Canceled by the guardian or the proposer
    Canceled,
    /// Voting closed without majority or quorum
    Defeated,
    /// Voting closed with majority and quorum, not yet queued
    Succeeded,
    /// Actions are waiting in the timelock
    Queued,
    /// Grace period passed without execution
    Expired,
    /// All actions executed
    Executed,
}

impl ProposalState {
    /// Check if the proposal still counts against its proposer's live slot.
    pub fn is_live(&self) -> bool {
        matches!(self, ProposalState::Pending | ProposalState::Active)
    }

    /// Check if the proposal may still be canceled.
    pub fn is_cancelable(&self) -> bool {
        matches!(
            self,
            ProposalState::Pending | ProposalState::Active | ProposalState::Queued
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalState::Pending => "Pending",
            ProposalState::Active => "Active",
            ProposalState::Canceled => "Canceled",
            ProposalState::Defeated => "Defeated",
            ProposalState::Succeeded => "Succeeded",
            ProposalState::Queued => "Queued",
            ProposalState::Expired => "Expired",
            ProposalState::Executed => "Executed",
        }
    }
}

impl fmt::Display for ProposalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProposalState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let state = match s.to_ascii_lowercase().as_str() {
            "pending" => ProposalState::Pending,
            "active" => ProposalState::Active,
            "canceled" | "cancelled" => ProposalState::Canceled,
            "defeated" => ProposalState::Defeated,
            "succeeded" => ProposalState::Succeeded,
            "queued" => ProposalState::Queued,
            "expired" => ProposalState::Expired,
            "executed" => ProposalState::Executed,
            other => return Err(format!("unknown proposal state '{other}'")),
        };
        Ok(state)
    }
}

/// Ballot receipt for one voter on one proposal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub has_voted: bool,
    pub support: bool,
    pub votes: u128,
}

/// Parallel action lists as submitted by a proposer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalActions {
    pub targets: Vec<Address>,
    #[serde(with = "keystone_types::serialization::amount_vec")]
    pub values: Vec<u128>,
    pub signatures: Vec<String>,
    pub calldatas: Vec<Vec<u8>>,
}

impl ProposalActions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one action to every list.
    pub fn with_action(mut self, action: Action) -> Self {
        self.targets.push(action.target);
        self.values.push(action.value);
        self.signatures.push(action.signature);
        self.calldatas.push(action.data);
        self
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Zip the lists into actions, checking shape and the action ceiling.
    pub fn into_actions(self, max_actions: usize) -> Result<Vec<Action>, GovernanceError> {
        let n = self.targets.len();
        if self.values.len() != n || self.signatures.len() != n || self.calldatas.len() != n {
            return Err(GovernanceError::InvalidProposal(
                "proposal function information arity mismatch".into(),
            ));
        }
        if n == 0 {
            return Err(GovernanceError::InvalidProposal("must provide actions".into()));
        }
        if n > max_actions {
            return Err(GovernanceError::InvalidProposal(format!(
                "too many actions: {n} > {max_actions}"
            )));
        }

        Ok(self
            .targets
            .into_iter()
            .zip(self.values)
            .zip(self.signatures)
            .zip(self.calldatas)
            .map(|(((target, value), signature), data)| Action {
                target,
                value,
                signature,
                data,
            })
            .collect())
    }
}

impl From<&[Action]> for ProposalActions {
    fn from(actions: &[Action]) -> Self {
        actions
            .iter()
            .cloned()
            .fold(ProposalActions::new(), ProposalActions::with_action)
    }
}

/// On-chain proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// Unique proposal ID, starting at 1
    pub id: u64,
    /// Proposer address
    pub proposer: Address,
    /// Ordered actions executed as one unit
    pub actions: Vec<Action>,
    /// Description
    pub description: String,
    /// Tick whose closing vote weights count
    pub snapshot: Tick,
    /// First tick of voting
    pub voting_start: Tick,
    /// First tick after voting
    pub voting_end: Tick,
    /// For votes (weighted)
    pub for_votes: u128,
    /// Against votes (weighted)
    pub against_votes: u128,
    pub canceled: bool,
    pub executed: bool,
    /// Execution tick, set once queued
    pub eta: Option<Tick>,
    /// Receipts by voter
    pub receipts: HashMap<Address, Receipt>,
}

impl Proposal {
    /// Derive the state at `now`.
    pub fn state_at(&self, now: Tick, quorum_votes: u128, grace_period: Tick) -> ProposalState {
        if self.canceled {
            return ProposalState::Canceled;
        }
        if now < self.voting_start {
            return ProposalState::Pending;
        }
        if now < self.voting_end {
            return ProposalState::Active;
        }
        if self.for_votes <= self.against_votes || self.for_votes < quorum_votes {
            return ProposalState::Defeated;
        }
        let Some(eta) = self.eta else {
            return ProposalState::Succeeded;
        };
        if self.executed {
            return ProposalState::Executed;
        }
        if now > eta.saturating_add(grace_period) {
            return ProposalState::Expired;
        }
        ProposalState::Queued
    }

    /// Still Pending or Active.
    pub fn is_live(&self, now: Tick) -> bool {
        !self.canceled && now < self.voting_end
    }

    /// Check if voter has voted.
    pub fn has_voted(&self, voter: &Address) -> bool {
        self.receipts.contains_key(voter)
    }
}

/// Proposal store and vote collector.
///
/// The governor is expected to be the admin of the timelock it queues into;
/// it acts there under its own `address`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Governor {
    address: Address,
    guardian: Option<Address>,
    config: GovernorConfig,
    proposals: BTreeMap<u64, Proposal>,
    proposal_count: u64,
    latest_proposal_ids: HashMap<Address, u64>,
    #[serde(skip)]
    events: EventLog,
}

impl Governor {
    /// Create a governor acting as `address`.
    pub fn new(
        address: Address,
        guardian: Option<Address>,
        config: GovernorConfig,
    ) -> Result<Self, GovernanceError> {
        if address.is_zero() {
            return Err(GovernanceError::InvalidAccount("governor address is zero".into()));
        }
        config.validate()?;

        Ok(Self {
            address,
            guardian: guardian.filter(|g| !g.is_zero()),
            config,
            proposals: BTreeMap::new(),
            proposal_count: 0,
            latest_proposal_ids: HashMap::new(),
            events: EventLog::new(),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn guardian(&self) -> Option<Address> {
        self.guardian
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    pub fn proposal_count(&self) -> u64 {
        self.proposal_count
    }

    pub fn latest_proposal_id(&self, proposer: &Address) -> Option<u64> {
        self.latest_proposal_ids.get(proposer).copied()
    }

    pub fn proposal(&self, id: u64) -> Result<&Proposal, GovernanceError> {
        self.proposals.get(&id).ok_or(GovernanceError::ProposalNotFound(id))
    }

    /// Actions of a proposal as parallel lists.
    pub fn get_actions(&self, id: u64) -> Result<ProposalActions, GovernanceError> {
        Ok(ProposalActions::from(self.proposal(id)?.actions.as_slice()))
    }

    /// Receipt of `voter`; an empty receipt if they have not voted.
    pub fn get_receipt(&self, id: u64, voter: &Address) -> Result<Receipt, GovernanceError> {
        Ok(self
            .proposal(id)?
            .receipts
            .get(voter)
            .copied()
            .unwrap_or_default())
    }

    /// Derive the state of proposal `id` at `now`.
    pub fn state(
        &self,
        id: u64,
        timelock: &Timelock,
        now: Tick,
    ) -> Result<ProposalState, GovernanceError> {
        Ok(self
            .proposal(id)?
            .state_at(now, self.config.quorum_votes, timelock.grace_period()))
    }

    /// Open a proposal.
    pub fn propose(
        &mut self,
        ledger: &VotingLedger,
        proposer: Address,
        actions: ProposalActions,
        description: String,
        now: Tick,
    ) -> Result<u64, GovernanceError> {
        if proposer.is_zero() {
            return Err(GovernanceError::InvalidAccount("proposer is the zero address".into()));
        }
        let actions = actions.into_actions(self.config.max_actions_per_proposal)?;

        let votes = ledger.get_current_votes(&proposer);
        if votes < self.config.proposal_threshold {
            return Err(GovernanceError::BelowProposalThreshold {
                votes,
                threshold: self.config.proposal_threshold,
            });
        }

        if let Some(latest) = self.latest_proposal_id(&proposer) {
            if self.proposal(latest)?.is_live(now) {
                return Err(GovernanceError::LiveProposalExists(latest));
            }
        }

        let voting_start = now.saturating_add(self.config.voting_delay);
        let voting_end = voting_start.saturating_add(self.config.voting_period);
        let id = self.proposal_count + 1;

        let proposal = Proposal {
            id,
            proposer,
            actions,
            description,
            // Weight changes made in the tick the vote opens do not count.
            snapshot: voting_start.saturating_sub(1),
            voting_start,
            voting_end,
            for_votes: 0,
            against_votes: 0,
            canceled: false,
            executed: false,
            eta: None,
            receipts: HashMap::new(),
        };

        self.events.emit(GovernanceEvent::ProposalCreated {
            id,
            proposer,
            actions: proposal.actions.len(),
            voting_start,
            voting_end,
            description: proposal.description.clone(),
        });
        info!(id, proposer = %proposer, voting_start, voting_end, "proposal created");

        self.proposal_count = id;
        self.latest_proposal_ids.insert(proposer, id);
        self.proposals.insert(id, proposal);
        Ok(id)
    }

    /// Cast a vote with the voter's weight at the proposal snapshot.
    pub fn cast_vote(
        &mut self,
        ledger: &VotingLedger,
        timelock: &Timelock,
        id: u64,
        voter: Address,
        support: bool,
        now: Tick,
    ) -> Result<u128, GovernanceError> {
        if voter.is_zero() {
            return Err(GovernanceError::InvalidAccount("voter is the zero address".into()));
        }
        let state = self.state(id, timelock, now)?;
        if state != ProposalState::Active {
            return Err(GovernanceError::InvalidState(format!(
                "voting is closed: proposal {id} is {state}"
            )));
        }

        let proposal = self.proposal_mut(id)?;
        if proposal.has_voted(&voter) {
            return Err(GovernanceError::AlreadyVoted(voter));
        }

        let votes = ledger.get_prior_votes(&voter, proposal.snapshot, now)?;
        let tally = if support {
            &mut proposal.for_votes
        } else {
            &mut proposal.against_votes
        };
        *tally = tally.checked_add(votes).ok_or(GovernanceError::VoteOverflow)?;

        proposal.receipts.insert(
            voter,
            Receipt {
                has_voted: true,
                support,
                votes,
            },
        );

        self.events.emit(GovernanceEvent::VoteCast {
            voter,
            proposal_id: id,
            support,
            votes,
        });
        debug!(id, voter = %voter, support, votes, "vote cast");
        Ok(votes)
    }

    /// Queue every action of a succeeded proposal in the timelock.
    ///
    /// Either all actions are queued or none are.
    pub fn queue(
        &mut self,
        timelock: &mut Timelock,
        id: u64,
        now: Tick,
    ) -> Result<Tick, GovernanceError> {
        let state = self.state(id, timelock, now)?;
        if state != ProposalState::Succeeded {
            return Err(GovernanceError::InvalidState(format!(
                "proposal {id} can only be queued if it is Succeeded, not {state}"
            )));
        }
        self.require_timelock_admin(timelock)?;

        let eta = now.saturating_add(timelock.delay());
        let actions = self.proposal(id)?.actions.clone();

        let mut seen = HashSet::with_capacity(actions.len());
        for action in &actions {
            let hash = action.fingerprint(eta);
            if timelock.is_queued(&hash) || !seen.insert(hash) {
                return Err(GovernanceError::TransactionAlreadyQueued(hash));
            }
        }

        for action in actions {
            timelock.queue_transaction(self.address, action, eta, now)?;
        }

        self.proposal_mut(id)?.eta = Some(eta);
        self.events.emit(GovernanceEvent::ProposalQueued { id, eta });
        info!(id, eta, "proposal queued");
        Ok(eta)
    }

    /// Execute every action of a queued proposal, in order.
    ///
    /// All actions are checked against the timelock window before the
    /// first one runs. If an action reverts, the executor is asked to roll
    /// back the batch, the timelock is restored to its state before the
    /// call, and the proposal stays Queued.
    pub fn execute<E: ActionExecutor + ?Sized>(
        &mut self,
        timelock: &mut Timelock,
        executor: &mut E,
        id: u64,
        now: Tick,
    ) -> Result<(), GovernanceError> {
        let state = self.state(id, timelock, now)?;
        if state != ProposalState::Queued {
            return Err(GovernanceError::InvalidState(format!(
                "proposal {id} can only be executed if it is Queued, not {state}"
            )));
        }
        self.require_timelock_admin(timelock)?;

        let proposal = self.proposal(id)?;
        let eta = proposal.eta.ok_or_else(|| {
            GovernanceError::InvalidState(format!("proposal {id} has no eta"))
        })?;
        let actions = proposal.actions.clone();

        for action in &actions {
            timelock.ensure_executable(action, eta, now)?;
        }

        let before = timelock.clone();
        executor.begin_batch();
        for (index, action) in actions.iter().enumerate() {
            if let Err(err) = timelock.execute_transaction(self.address, action, eta, &mut *executor, now) {
                executor.rollback_batch();
                *timelock = before;
                warn!(id, index, error = %err, "proposal execution failed");
                return Err(err);
            }
        }
        executor.commit_batch();

        self.proposal_mut(id)?.executed = true;
        self.events.emit(GovernanceEvent::ProposalExecuted { id });
        info!(id, "proposal executed");
        Ok(())
    }

    /// Cancel a proposal that is Pending, Active or Queued.
    ///
    /// Allowed for the guardian, and for the proposer once their current
    /// votes have fallen below the proposal threshold.
    pub fn cancel(
        &mut self,
        ledger: &VotingLedger,
        timelock: &mut Timelock,
        id: u64,
        caller: Address,
        now: Tick,
    ) -> Result<(), GovernanceError> {
        let state = self.state(id, timelock, now)?;
        if !state.is_cancelable() {
            return Err(GovernanceError::InvalidState(format!(
                "cannot cancel proposal {id} in state {state}"
            )));
        }

        let proposal = self.proposal(id)?;
        let is_guardian = self.guardian == Some(caller);
        let proposer_below_threshold = caller == proposal.proposer
            && ledger.get_current_votes(&proposal.proposer) < self.config.proposal_threshold;
        if !is_guardian && !proposer_below_threshold {
            return Err(GovernanceError::Unauthorized(
                "cancel: only the guardian, or the proposer once below threshold".into(),
            ));
        }

        if state == ProposalState::Queued {
            self.require_timelock_admin(timelock)?;
            if let Some(eta) = proposal.eta {
                for action in &proposal.actions {
                    timelock.cancel_transaction(self.address, action, eta)?;
                }
            }
        }

        self.proposal_mut(id)?.canceled = true;
        self.events.emit(GovernanceEvent::ProposalCanceled {
            id,
            previous_state: state,
        });
        info!(id, caller = %caller, previous = %state, "proposal canceled");
        Ok(())
    }

    /// Guardian-only: accept a pending timelock admin nomination of this
    /// governor.
    pub fn accept_timelock_admin(
        &mut self,
        timelock: &mut Timelock,
        caller: Address,
    ) -> Result<(), GovernanceError> {
        self.require_guardian(caller, "accept_timelock_admin")?;
        timelock.accept_admin(self.address)
    }

    /// Guardian-only: give up the guardian role for good.
    pub fn abdicate(&mut self, caller: Address) -> Result<(), GovernanceError> {
        self.require_guardian(caller, "abdicate")?;
        self.guardian = None;
        info!(guardian = %caller, "guardian abdicated");
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<GovernanceEvent> {
        self.events.drain()
    }

    fn proposal_mut(&mut self, id: u64) -> Result<&mut Proposal, GovernanceError> {
        self.proposals.get_mut(&id).ok_or(GovernanceError::ProposalNotFound(id))
    }

    fn require_guardian(&self, caller: Address, op: &str) -> Result<(), GovernanceError> {
        if self.guardian != Some(caller) {
            return Err(GovernanceError::Unauthorized(format!("{op}: sender must be guardian")));
        }
        Ok(())
    }

    fn require_timelock_admin(&self, timelock: &Timelock) -> Result<(), GovernanceError> {
        if timelock.admin() != self.address {
            return Err(GovernanceError::Unauthorized(
                "governor is not the timelock admin".into(),
            ));
        }
        Ok(())
    }
}
