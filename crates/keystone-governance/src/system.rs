//! One governance deployment: ledger, governor and timelock behind a clock.
//!
//! Components take the current tick as an argument. [`Governance`] owns the
//! tick, refuses to move it backwards and forwards every operation with it.

use keystone_types::{Address, Hash, Tick};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::action::{Action, ActionExecutor};
use crate::checkpoints::VotingLedger;
use crate::config::{GovernanceConfig, TimelockConfig};
use crate::error::GovernanceError;
use crate::events::{EventLog, GovernanceEvent};
use crate::proposal::{Governor, ProposalActions, ProposalState};
use crate::timelock::Timelock;

/// Addresses of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub governor: Address,
    pub timelock: Address,
    pub guardian: Option<Address>,
}

impl Default for Deployment {
    fn default() -> Self {
        Self {
            governor: Address::derive(b"keystone/governor"),
            timelock: Address::derive(b"keystone/timelock"),
            guardian: Some(Address::derive(b"keystone/guardian")),
        }
    }
}

/// Serializable state of a deployment, without its executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceState {
    pub now: Tick,
    pub ledger: VotingLedger,
    pub governor: Governor,
    pub timelock: Timelock,
}

/// A complete governance deployment.
pub struct Governance<E: ActionExecutor> {
    now: Tick,
    ledger: VotingLedger,
    governor: Governor,
    timelock: Timelock,
    executor: E,
    events: EventLog,
}

impl<E: ActionExecutor> Governance<E> {
    /// Deploy at tick 0. The governor starts out as the timelock admin.
    pub fn new(
        config: &GovernanceConfig,
        deployment: Deployment,
        executor: E,
    ) -> Result<Self, GovernanceError> {
        config.validate()?;
        let governor = Governor::new(
            deployment.governor,
            deployment.guardian,
            config.governor.clone(),
        )?;
        let timelock = Timelock::new(deployment.timelock, deployment.governor, &config.timelock)?;

        Ok(Self {
            now: 0,
            ledger: VotingLedger::new(),
            governor,
            timelock,
            executor,
            events: EventLog::new(),
        })
    }

    /// Rebuild a deployment from a snapshot, after checking its parameters
    /// and checkpoint history.
    pub fn restore(state: GovernanceState, executor: E) -> Result<Self, GovernanceError> {
        state.governor.config().validate()?;
        TimelockConfig {
            delay: state.timelock.delay(),
            grace_period: state.timelock.grace_period(),
        }
        .validate()?;
        if state.timelock.admin().is_zero() {
            return Err(GovernanceError::InvalidSnapshot("timelock admin is zero".into()));
        }
        state.ledger.check_consistency(state.now)?;

        Ok(Self {
            now: state.now,
            ledger: state.ledger,
            governor: state.governor,
            timelock: state.timelock,
            executor,
            events: EventLog::new(),
        })
    }

    /// Rebuild a deployment from a JSON snapshot.
    pub fn restore_json(json: &str, executor: E) -> Result<Self, GovernanceError> {
        let state: GovernanceState = serde_json::from_str(json)
            .map_err(|e| GovernanceError::InvalidSnapshot(e.to_string()))?;
        Self::restore(state, executor)
    }

    pub fn snapshot(&self) -> GovernanceState {
        GovernanceState {
            now: self.now,
            ledger: self.ledger.clone(),
            governor: self.governor.clone(),
            timelock: self.timelock.clone(),
        }
    }

    pub fn snapshot_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.snapshot())
    }

    pub fn now(&self) -> Tick {
        self.now
    }

    /// Move the clock to `tick`.
    pub fn advance_to(&mut self, tick: Tick) -> Result<(), GovernanceError> {
        if tick < self.now {
            return Err(GovernanceError::ClockRegression {
                requested: tick,
                last: self.now,
            });
        }
        debug!(from = self.now, to = tick, "clock advanced");
        self.now = tick;
        Ok(())
    }

    pub fn advance_by(&mut self, ticks: Tick) -> Result<(), GovernanceError> {
        self.advance_to(self.now.saturating_add(ticks))
    }

    pub fn ledger(&self) -> &VotingLedger {
        &self.ledger
    }

    pub fn governor(&self) -> &Governor {
        &self.governor
    }

    pub fn timelock(&self) -> &Timelock {
        &self.timelock
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut E {
        &mut self.executor
    }

    // Token intake

    pub fn mint(&mut self, to: Address, amount: u128) -> Result<(), GovernanceError> {
        let result = self.ledger.mint(to, amount, self.now);
        self.collect();
        result
    }

    pub fn burn(&mut self, from: Address, amount: u128) -> Result<(), GovernanceError> {
        let result = self.ledger.burn(from, amount, self.now);
        self.collect();
        result
    }

    pub fn transfer(
        &mut self,
        from: Address,
        to: Address,
        amount: u128,
    ) -> Result<(), GovernanceError> {
        let result = self.ledger.transfer(from, to, amount, self.now);
        self.collect();
        result
    }

    pub fn delegate(&mut self, account: Address, delegatee: Address) -> Result<(), GovernanceError> {
        let result = self.ledger.delegate(account, delegatee, self.now);
        self.collect();
        result
    }

    pub fn get_current_votes(&self, account: &Address) -> u128 {
        self.ledger.get_current_votes(account)
    }

    pub fn get_prior_votes(&self, account: &Address, tick: Tick) -> Result<u128, GovernanceError> {
        self.ledger.get_prior_votes(account, tick, self.now)
    }

    // Proposals

    pub fn propose(
        &mut self,
        proposer: Address,
        actions: ProposalActions,
        description: impl Into<String>,
    ) -> Result<u64, GovernanceError> {
        let result = self
            .governor
            .propose(&self.ledger, proposer, actions, description.into(), self.now);
        self.collect();
        result
    }

    pub fn state(&self, id: u64) -> Result<ProposalState, GovernanceError> {
        self.governor.state(id, &self.timelock, self.now)
    }

    pub fn cast_vote(
        &mut self,
        id: u64,
        voter: Address,
        support: bool,
    ) -> Result<u128, GovernanceError> {
        let result = self
            .governor
            .cast_vote(&self.ledger, &self.timelock, id, voter, support, self.now);
        self.collect();
        result
    }

    pub fn queue(&mut self, id: u64) -> Result<Tick, GovernanceError> {
        let result = self.governor.queue(&mut self.timelock, id, self.now);
        self.collect();
        result
    }

    pub fn execute(&mut self, id: u64) -> Result<(), GovernanceError> {
        let result = self
            .governor
            .execute(&mut self.timelock, &mut self.executor, id, self.now);
        self.collect();
        result
    }

    pub fn cancel(&mut self, id: u64, caller: Address) -> Result<(), GovernanceError> {
        let result = self
            .governor
            .cancel(&self.ledger, &mut self.timelock, id, caller, self.now);
        self.collect();
        result
    }

    // Guardian

    pub fn accept_timelock_admin(&mut self, caller: Address) -> Result<(), GovernanceError> {
        let result = self.governor.accept_timelock_admin(&mut self.timelock, caller);
        self.collect();
        result
    }

    pub fn abdicate(&mut self, caller: Address) -> Result<(), GovernanceError> {
        self.governor.abdicate(caller)
    }

    // Timelock, called directly by its admin or pending admin

    pub fn queue_transaction(
        &mut self,
        caller: Address,
        action: Action,
        eta: Tick,
    ) -> Result<Hash, GovernanceError> {
        let result = self.timelock.queue_transaction(caller, action, eta, self.now);
        self.collect();
        result
    }

    pub fn execute_transaction(
        &mut self,
        caller: Address,
        action: &Action,
        eta: Tick,
    ) -> Result<Vec<u8>, GovernanceError> {
        let result = self
            .timelock
            .execute_transaction(caller, action, eta, &mut self.executor, self.now);
        self.collect();
        result
    }

    pub fn cancel_transaction(
        &mut self,
        caller: Address,
        action: &Action,
        eta: Tick,
    ) -> Result<bool, GovernanceError> {
        let result = self.timelock.cancel_transaction(caller, action, eta);
        self.collect();
        result
    }

    pub fn set_pending_admin(
        &mut self,
        caller: Address,
        pending_admin: Address,
    ) -> Result<(), GovernanceError> {
        let result = self.timelock.set_pending_admin(caller, pending_admin);
        self.collect();
        result
    }

    pub fn accept_admin(&mut self, caller: Address) -> Result<(), GovernanceError> {
        let result = self.timelock.accept_admin(caller);
        self.collect();
        result
    }

    /// Events emitted since the last call, in emission order.
    pub fn take_events(&mut self) -> Vec<GovernanceEvent> {
        self.events.drain()
    }

    fn collect(&mut self) {
        for event in self
            .ledger
            .take_events()
            .into_iter()
            .chain(self.timelock.take_events())
            .chain(self.governor.take_events())
        {
            self.events.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, RecordingExecutor};
    use crate::config::GovernorConfig;
    use crate::error::ErrorKind;

    fn test_address(n: u8) -> Address {
        let mut addr = [0u8; 20];
        addr[19] = n;
        Address::from_bytes(addr)
    }

    fn test_config() -> GovernanceConfig {
        GovernanceConfig {
            governor: GovernorConfig {
                voting_delay: 1,
                voting_period: 10,
                proposal_threshold: 10,
                quorum_votes: 80,
                max_actions_per_proposal: 5,
            },
            ..Default::default()
        }
    }

    fn deploy() -> Governance<RecordingExecutor> {
        Governance::new(&test_config(), Deployment::default(), RecordingExecutor::new()).unwrap()
    }

    #[test]
    fn test_clock_is_monotonic() {
        let mut gov = deploy();
        gov.advance_to(10).unwrap();
        gov.advance_to(10).unwrap();

        let err = gov.advance_to(9).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timing);
        assert_eq!(gov.now(), 10);

        gov.advance_by(5).unwrap();
        assert_eq!(gov.now(), 15);
    }

    #[test]
    fn test_full_lifecycle_emits_ordered_events() {
        let mut gov = deploy();
        let alice = test_address(1);

        gov.advance_to(1).unwrap();
        gov.mint(alice, 100).unwrap();
        gov.delegate(alice, alice).unwrap();
        gov.take_events();

        gov.advance_to(2).unwrap();
        let action = Action::new(test_address(50), 0, "setFeeTo(address)", vec![1]);
        let id = gov
            .propose(alice, ProposalActions::new().with_action(action), "fee")
            .unwrap();

        gov.advance_to(3).unwrap();
        gov.cast_vote(id, alice, true).unwrap();

        gov.advance_to(13).unwrap();
        assert_eq!(gov.state(id).unwrap(), ProposalState::Succeeded);
        let eta = gov.queue(id).unwrap();

        gov.advance_to(eta).unwrap();
        gov.execute(id).unwrap();
        assert_eq!(gov.state(id).unwrap(), ProposalState::Executed);
        assert_eq!(gov.executor().calls().len(), 1);

        let names: Vec<String> = gov
            .take_events()
            .iter()
            .map(|e| serde_json::to_value(e).unwrap()["event"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            [
                "proposal_created",
                "vote_cast",
                "queue_transaction",
                "proposal_queued",
                "execute_transaction",
                "proposal_executed",
            ]
        );
    }

    #[test]
    fn test_snapshot_restore() {
        let mut gov = deploy();
        let alice = test_address(1);
        gov.advance_to(1).unwrap();
        gov.mint(alice, 100).unwrap();
        gov.delegate(alice, alice).unwrap();
        gov.advance_to(2).unwrap();
        let action = Action::new(test_address(50), 0, "", vec![]);
        let id = gov
            .propose(alice, ProposalActions::new().with_action(action), "noop")
            .unwrap();
        gov.advance_to(3).unwrap();
        gov.cast_vote(id, alice, true).unwrap();

        let json = gov.snapshot_json().unwrap();
        let restored = Governance::restore_json(&json, RecordingExecutor::new()).unwrap();

        assert_eq!(restored.now(), 3);
        assert_eq!(restored.get_current_votes(&alice), 100);
        assert_eq!(restored.get_prior_votes(&alice, 1).unwrap(), 100);
        assert_eq!(restored.state(id).unwrap(), ProposalState::Active);
        assert_eq!(restored.governor().get_receipt(id, &alice).unwrap().votes, 100);
        assert_eq!(restored.timelock().admin(), gov.governor().address());
    }

    #[test]
    fn test_failed_operations_are_reported() {
        let mut gov = deploy();
        let err = gov.cast_vote(7, test_address(1), true).unwrap_err();
        assert_eq!(err, GovernanceError::ProposalNotFound(7));

        let err = gov.transfer(test_address(1), test_address(2), 5).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);
        assert!(gov.take_events().is_empty());
    }

    #[test]
    fn test_restore_rejects_inconsistent_snapshot() {
        let mut gov = deploy();
        let alice = test_address(1);
        gov.advance_to(1).unwrap();
        gov.delegate(alice, alice).unwrap();
        gov.mint(alice, 60).unwrap();
        gov.advance_to(2).unwrap();
        gov.mint(alice, 40).unwrap();
        let snapshot = serde_json::to_value(gov.snapshot()).unwrap();

        let mut reordered = snapshot.clone();
        let history = reordered["ledger"]["checkpoints"][alice.to_string()]
            .as_array_mut()
            .unwrap();
        assert_eq!(history.len(), 2);
        history.reverse();
        let err = Governance::restore_json(&reordered.to_string(), RecordingExecutor::new())
            .err()
            .unwrap();
        assert!(matches!(err, GovernanceError::InvalidSnapshot(_)));
        assert_eq!(err.kind(), ErrorKind::Input);

        let mut rewound = snapshot.clone();
        rewound["now"] = serde_json::json!(1);
        let err = Governance::restore_json(&rewound.to_string(), RecordingExecutor::new())
            .err()
            .unwrap();
        assert!(matches!(err, GovernanceError::InvalidSnapshot(_)));

        let mut instant_vote = snapshot.clone();
        instant_vote["governor"]["config"]["voting_delay"] = serde_json::json!(0);
        let err = Governance::restore_json(&instant_vote.to_string(), RecordingExecutor::new())
            .err()
            .unwrap();
        assert!(matches!(err, GovernanceError::InvalidParameter(_)));

        let err = Governance::restore_json("{}", RecordingExecutor::new()).err().unwrap();
        assert!(matches!(err, GovernanceError::InvalidSnapshot(_)));

        assert!(Governance::restore_json(&snapshot.to_string(), RecordingExecutor::new()).is_ok());
    }

    #[test]
    fn test_zero_voting_delay_is_not_deployable() {
        let mut config = test_config();
        config.governor.voting_delay = 0;
        let err = Governance::new(&config, Deployment::default(), RecordingExecutor::new())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Input);
    }

    #[test]
    fn test_mint_of_zero_leaves_no_balance_entry() {
        let mut gov = deploy();
        gov.mint(test_address(1), 0).unwrap();

        let state = serde_json::to_value(gov.snapshot()).unwrap();
        assert_eq!(state["ledger"]["balances"], serde_json::json!({}));
        assert_eq!(gov.ledger().total_supply(), 0);
    }

    #[test]
    fn test_direct_timelock_calls_go_through_admin_checks() {
        let mut gov = deploy();
        let outsider = test_address(9);
        let governor = gov.governor().address();
        let action = Action::new(test_address(50), 0, "setFeeTo(address)", vec![1]);
        let eta = gov.timelock().delay();

        let err = gov.queue_transaction(outsider, action.clone(), eta).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        let hash = gov.queue_transaction(governor, action.clone(), eta).unwrap();
        assert!(gov.timelock().is_queued(&hash));
        assert!(gov.cancel_transaction(governor, &action, eta).unwrap());
        assert!(!gov.timelock().is_queued(&hash));

        gov.queue_transaction(governor, action.clone(), eta).unwrap();
        gov.advance_to(eta).unwrap();
        gov.execute_transaction(governor, &action, eta).unwrap();
        assert_eq!(gov.executor().calls().len(), 1);

        gov.set_pending_admin(governor, outsider).unwrap();
        gov.accept_admin(outsider).unwrap();
        assert_eq!(gov.timelock().admin(), outsider);

        let names: Vec<String> = gov
            .take_events()
            .iter()
            .map(|e| serde_json::to_value(e).unwrap()["event"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            [
                "queue_transaction",
                "cancel_transaction",
                "queue_transaction",
                "execute_transaction",
                "new_pending_admin",
                "new_admin",
            ]
        );
    }
}
