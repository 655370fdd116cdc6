//! Delegated vote weight with point-in-time history.
//!
//! Every account may delegate its token balance to a delegate (itself
//! included). Each delegate owns an append-only list of checkpoints
//! recording its total delegated weight after every change, so that the
//! weight at any past tick can be recovered with a binary search.

use std::collections::HashMap;

use keystone_types::{Address, Tick};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::GovernanceError;
use crate::events::{EventLog, GovernanceEvent};

/// Vote weight of a delegate from `tick` onwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub tick: Tick,
    pub votes: u128,
}

/// Pending weight change for one delegate: (delegate, previous, new).
type WeightChange = (Address, u128, u128);

/// Tracks balances mirrored from the token ledger, delegation edges and
/// per-delegate checkpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VotingLedger {
    /// Token balances as reported by transfer events
    balances: HashMap<Address, u128>,
    /// Sum of all balances
    total_supply: u128,
    /// account -> delegate (absent means nobody)
    delegates: HashMap<Address, Address>,
    /// delegate -> checkpoints, ordered by tick, at most one per tick
    checkpoints: HashMap<Address, Vec<Checkpoint>>,
    #[serde(skip)]
    events: EventLog,
}

impl VotingLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, account: &Address) -> u128 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn total_supply(&self) -> u128 {
        self.total_supply
    }

    /// Current delegate of `account`, or the zero address if none.
    pub fn delegates(&self, account: &Address) -> Address {
        self.delegates.get(account).copied().unwrap_or(Address::ZERO)
    }

    /// Credit newly issued tokens to `to`.
    pub fn mint(&mut self, to: Address, amount: u128, now: Tick) -> Result<(), GovernanceError> {
        if to.is_zero() {
            return Err(GovernanceError::InvalidAccount("cannot mint to the zero address".into()));
        }
        let supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(GovernanceError::VoteOverflow)?;
        let plan = self.plan_move(Address::ZERO, self.delegates(&to), amount, now)?;

        self.total_supply = supply;
        self.set_balance(to, self.balance_of(&to) + amount);
        self.apply_move(plan, now);
        Ok(())
    }

    /// Remove tokens held by `from`.
    pub fn burn(&mut self, from: Address, amount: u128, now: Tick) -> Result<(), GovernanceError> {
        if from.is_zero() {
            return Err(GovernanceError::InvalidAccount("cannot burn from the zero address".into()));
        }
        let available = self.balance_of(&from);
        if available < amount {
            return Err(GovernanceError::InsufficientBalance { available, required: amount });
        }
        let plan = self.plan_move(self.delegates(&from), Address::ZERO, amount, now)?;

        self.set_balance(from, available - amount);
        self.total_supply -= amount;
        self.apply_move(plan, now);
        Ok(())
    }

    /// Move tokens between accounts. Weight moves between their delegates,
    /// never between the accounts themselves.
    pub fn transfer(
        &mut self,
        from: Address,
        to: Address,
        amount: u128,
        now: Tick,
    ) -> Result<(), GovernanceError> {
        if from.is_zero() || to.is_zero() {
            return Err(GovernanceError::InvalidAccount(
                "cannot transfer from or to the zero address".into(),
            ));
        }
        let available = self.balance_of(&from);
        if available < amount {
            return Err(GovernanceError::InsufficientBalance { available, required: amount });
        }
        let plan = self.plan_move(self.delegates(&from), self.delegates(&to), amount, now)?;

        self.set_balance(from, available - amount);
        // Cannot overflow: the sum of balances is bounded by total_supply.
        *self.balances.entry(to).or_insert(0) += amount;
        self.apply_move(plan, now);
        Ok(())
    }

    /// Point `account`'s whole balance at `new_delegate`.
    ///
    /// Delegating to the current delegate is a no-op. Delegating to the
    /// zero address withdraws the weight from circulation.
    pub fn delegate(
        &mut self,
        account: Address,
        new_delegate: Address,
        now: Tick,
    ) -> Result<(), GovernanceError> {
        if account.is_zero() {
            return Err(GovernanceError::InvalidAccount("delegator is the zero address".into()));
        }
        let current = self.delegates(&account);
        if current == new_delegate {
            return Ok(());
        }
        let plan = self.plan_move(current, new_delegate, self.balance_of(&account), now)?;

        if new_delegate.is_zero() {
            self.delegates.remove(&account);
        } else {
            self.delegates.insert(account, new_delegate);
        }
        self.events.emit(GovernanceEvent::DelegateChanged {
            delegator: account,
            from: current,
            to: new_delegate,
        });
        self.apply_move(plan, now);
        Ok(())
    }

    /// Weight at the latest checkpoint, or 0.
    pub fn get_current_votes(&self, account: &Address) -> u128 {
        self.checkpoints
            .get(account)
            .and_then(|cps| cps.last())
            .map(|cp| cp.votes)
            .unwrap_or(0)
    }

    /// Weight `account` had at the end of `tick`.
    ///
    /// `tick` must be strictly in the past: writes in the current tick are
    /// not final yet.
    pub fn get_prior_votes(
        &self,
        account: &Address,
        tick: Tick,
        now: Tick,
    ) -> Result<u128, GovernanceError> {
        if tick >= now {
            return Err(GovernanceError::NotYetDetermined { requested: tick, now });
        }
        let Some(cps) = self.checkpoints.get(account) else {
            return Ok(0);
        };
        // Index of the first checkpoint strictly after `tick`.
        let idx = cps.partition_point(|cp| cp.tick <= tick);
        Ok(if idx == 0 { 0 } else { cps[idx - 1].votes })
    }

    pub fn num_checkpoints(&self, account: &Address) -> usize {
        self.checkpoints.get(account).map_or(0, Vec::len)
    }

    pub fn checkpoint(&self, account: &Address, index: usize) -> Option<Checkpoint> {
        self.checkpoints.get(account).and_then(|cps| cps.get(index)).copied()
    }

    pub fn checkpoints(&self, account: &Address) -> &[Checkpoint] {
        self.checkpoints.get(account).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Drain recorded events.
    pub fn take_events(&mut self) -> Vec<GovernanceEvent> {
        self.events.drain()
    }

    /// Check a deserialized ledger against the clock it was saved at:
    /// checkpoint ticks strictly increase and none lies past `now`, and the
    /// balances add up to the total supply.
    pub fn check_consistency(&self, now: Tick) -> Result<(), GovernanceError> {
        for (delegate, checkpoints) in &self.checkpoints {
            let ordered = checkpoints.windows(2).all(|w| w[0].tick < w[1].tick);
            if !ordered {
                return Err(GovernanceError::InvalidSnapshot(format!(
                    "checkpoints of {delegate} are not ordered by tick"
                )));
            }
            if let Some(last) = checkpoints.last() {
                if last.tick > now {
                    return Err(GovernanceError::InvalidSnapshot(format!(
                        "checkpoint of {delegate} at tick {} is after tick {now}",
                        last.tick
                    )));
                }
            }
        }

        let sum = self
            .balances
            .values()
            .try_fold(0u128, |acc, b| acc.checked_add(*b))
            .ok_or(GovernanceError::VoteOverflow)?;
        if sum != self.total_supply {
            return Err(GovernanceError::InvalidSnapshot(format!(
                "balances sum to {sum}, total supply is {}",
                self.total_supply
            )));
        }
        Ok(())
    }

    fn set_balance(&mut self, account: Address, balance: u128) {
        if balance == 0 {
            self.balances.remove(&account);
        } else {
            self.balances.insert(account, balance);
        }
    }

    /// Validate a weight move and compute the resulting checkpoint values
    /// without touching state.
    fn plan_move(
        &self,
        src: Address,
        dst: Address,
        amount: u128,
        now: Tick,
    ) -> Result<Vec<WeightChange>, GovernanceError> {
        let mut plan = Vec::with_capacity(2);
        if src == dst || amount == 0 {
            return Ok(plan);
        }
        if !src.is_zero() {
            let old = self.get_current_votes(&src);
            let new = old.checked_sub(amount).ok_or(GovernanceError::VoteUnderflow)?;
            self.ensure_monotonic(&src, now)?;
            plan.push((src, old, new));
        }
        if !dst.is_zero() {
            let old = self.get_current_votes(&dst);
            let new = old.checked_add(amount).ok_or(GovernanceError::VoteOverflow)?;
            self.ensure_monotonic(&dst, now)?;
            plan.push((dst, old, new));
        }
        Ok(plan)
    }

    fn apply_move(&mut self, plan: Vec<WeightChange>, now: Tick) {
        for (delegate, previous, new) in plan {
            self.write_checkpoint(delegate, now, new);
            self.events.emit(GovernanceEvent::DelegateVotesChanged { delegate, previous, new });
        }
    }

    fn ensure_monotonic(&self, delegate: &Address, now: Tick) -> Result<(), GovernanceError> {
        match self.checkpoints.get(delegate).and_then(|cps| cps.last()) {
            Some(last) if last.tick > now => Err(GovernanceError::ClockRegression {
                requested: now,
                last: last.tick,
            }),
            _ => Ok(()),
        }
    }

    /// Append a checkpoint, or overwrite the last one if it is from `now`.
    fn write_checkpoint(&mut self, delegate: Address, now: Tick, votes: u128) {
        let cps = self.checkpoints.entry(delegate).or_default();
        match cps.last_mut() {
            Some(last) if last.tick == now => last.votes = votes,
            _ => cps.push(Checkpoint { tick: now, votes }),
        }
        debug!(delegate = %delegate, tick = now, votes, "checkpoint written");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_address(n: u8) -> Address {
        let mut addr = [0u8; 20];
        addr[19] = n;
        Address::from_bytes(addr)
    }

    #[test]
    fn test_no_votes_without_delegation() {
        let mut ledger = VotingLedger::new();
        let alice = test_address(1);
        ledger.mint(alice, 100, 1).unwrap();

        assert_eq!(ledger.balance_of(&alice), 100);
        assert_eq!(ledger.get_current_votes(&alice), 0);
        assert_eq!(ledger.num_checkpoints(&alice), 0);
    }

    #[test]
    fn test_self_delegation() {
        let mut ledger = VotingLedger::new();
        let alice = test_address(1);
        ledger.mint(alice, 100, 1).unwrap();
        ledger.delegate(alice, alice, 2).unwrap();

        assert_eq!(ledger.get_current_votes(&alice), 100);
        assert_eq!(ledger.checkpoint(&alice, 0), Some(Checkpoint { tick: 2, votes: 100 }));
    }

    #[test]
    fn test_nested_delegation() {
        let mut ledger = VotingLedger::new();
        let wallet = test_address(1);
        let other0 = test_address(2);
        let other1 = test_address(3);
        ledger.mint(wallet, 1_000, 1).unwrap();
        ledger.transfer(wallet, other0, 1, 2).unwrap();
        ledger.transfer(wallet, other1, 2, 2).unwrap();

        assert_eq!(ledger.get_current_votes(&other0), 0);
        assert_eq!(ledger.get_current_votes(&other1), 0);

        ledger.delegate(other0, other1, 3).unwrap();
        assert_eq!(ledger.get_current_votes(&other1), 1);

        ledger.delegate(other1, other1, 4).unwrap();
        assert_eq!(ledger.get_current_votes(&other1), 3);

        ledger.delegate(other1, wallet, 5).unwrap();
        assert_eq!(ledger.get_current_votes(&other1), 1);
        assert_eq!(ledger.get_current_votes(&wallet), 2);
    }

    #[test]
    fn test_transfer_moves_weight_between_delegates() {
        let mut ledger = VotingLedger::new();
        let (alice, bob, carol, dave) = (test_address(1), test_address(2), test_address(3), test_address(4));
        ledger.mint(alice, 100, 1).unwrap();
        ledger.delegate(alice, carol, 1).unwrap();
        ledger.delegate(bob, dave, 1).unwrap();

        ledger.transfer(alice, bob, 40, 2).unwrap();

        assert_eq!(ledger.get_current_votes(&carol), 60);
        assert_eq!(ledger.get_current_votes(&dave), 40);
        assert_eq!(ledger.get_current_votes(&alice), 0);
        assert_eq!(ledger.get_current_votes(&bob), 0);
    }

    #[test]
    fn test_transfer_with_shared_delegate_is_neutral() {
        let mut ledger = VotingLedger::new();
        let (alice, bob, carol) = (test_address(1), test_address(2), test_address(3));
        ledger.mint(alice, 100, 1).unwrap();
        ledger.delegate(alice, carol, 1).unwrap();
        ledger.delegate(bob, carol, 1).unwrap();
        let before = ledger.num_checkpoints(&carol);

        ledger.transfer(alice, bob, 30, 2).unwrap();

        assert_eq!(ledger.get_current_votes(&carol), 100);
        assert_eq!(ledger.num_checkpoints(&carol), before);
    }

    #[test]
    fn test_same_tick_overwrites_checkpoint() {
        let mut ledger = VotingLedger::new();
        let alice = test_address(1);
        ledger.mint(alice, 100, 5).unwrap();
        ledger.delegate(alice, alice, 5).unwrap();
        ledger.mint(alice, 50, 5).unwrap();

        assert_eq!(ledger.num_checkpoints(&alice), 1);
        assert_eq!(ledger.get_current_votes(&alice), 150);

        ledger.mint(alice, 1, 6).unwrap();
        assert_eq!(ledger.num_checkpoints(&alice), 2);
    }

    #[test]
    fn test_delegate_to_current_is_noop() {
        let mut ledger = VotingLedger::new();
        let alice = test_address(1);
        ledger.mint(alice, 10, 1).unwrap();
        ledger.delegate(alice, alice, 1).unwrap();
        ledger.take_events();

        ledger.delegate(alice, alice, 2).unwrap();
        assert!(ledger.take_events().is_empty());
        assert_eq!(ledger.num_checkpoints(&alice), 1);
    }

    #[test]
    fn test_delegate_invalid_account() {
        let mut ledger = VotingLedger::new();
        let err = ledger.delegate(Address::ZERO, test_address(1), 1).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Input);
    }

    #[test]
    fn test_undelegate_to_zero() {
        let mut ledger = VotingLedger::new();
        let alice = test_address(1);
        ledger.mint(alice, 10, 1).unwrap();
        ledger.delegate(alice, alice, 1).unwrap();
        ledger.delegate(alice, Address::ZERO, 2).unwrap();

        assert_eq!(ledger.get_current_votes(&alice), 0);
        assert_eq!(ledger.delegates(&alice), Address::ZERO);
    }

    #[test]
    fn test_get_prior_votes() {
        let mut ledger = VotingLedger::new();
        let alice = test_address(1);
        ledger.mint(alice, 100, 1).unwrap();
        ledger.delegate(alice, alice, 10).unwrap();
        ledger.burn(alice, 30, 20).unwrap();
        ledger.mint(alice, 5, 30).unwrap();

        let now = 31;
        assert_eq!(ledger.get_prior_votes(&alice, 9, now).unwrap(), 0);
        assert_eq!(ledger.get_prior_votes(&alice, 10, now).unwrap(), 100);
        assert_eq!(ledger.get_prior_votes(&alice, 19, now).unwrap(), 100);
        assert_eq!(ledger.get_prior_votes(&alice, 20, now).unwrap(), 70);
        assert_eq!(ledger.get_prior_votes(&alice, 29, now).unwrap(), 70);
        assert_eq!(ledger.get_prior_votes(&alice, 30, now).unwrap(), 75);
        assert_eq!(ledger.get_prior_votes(&test_address(2), 30, now).unwrap(), 0);
    }

    #[test]
    fn test_get_prior_votes_rejects_present_and_future() {
        let ledger = VotingLedger::new();
        let alice = test_address(1);

        let err = ledger.get_prior_votes(&alice, 5, 5).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Timing);
        assert!(ledger.get_prior_votes(&alice, 6, 5).is_err());
    }

    #[test]
    fn test_transfer_insufficient_balance_leaves_state() {
        let mut ledger = VotingLedger::new();
        let (alice, bob) = (test_address(1), test_address(2));
        ledger.mint(alice, 10, 1).unwrap();
        ledger.delegate(alice, alice, 1).unwrap();

        let err = ledger.transfer(alice, bob, 11, 2).unwrap_err();
        assert!(matches!(err, GovernanceError::InsufficientBalance { available: 10, required: 11 }));
        assert_eq!(ledger.balance_of(&alice), 10);
        assert_eq!(ledger.get_current_votes(&alice), 10);
    }

    #[test]
    fn test_clock_regression_rejected() {
        let mut ledger = VotingLedger::new();
        let alice = test_address(1);
        ledger.mint(alice, 10, 1).unwrap();
        ledger.delegate(alice, alice, 10).unwrap();

        let err = ledger.mint(alice, 1, 9).unwrap_err();
        assert!(matches!(err, GovernanceError::ClockRegression { requested: 9, last: 10 }));
        assert_eq!(ledger.balance_of(&alice), 10);
    }

    #[test]
    fn test_events_recorded() {
        let mut ledger = VotingLedger::new();
        let (alice, bob) = (test_address(1), test_address(2));
        ledger.mint(alice, 10, 1).unwrap();
        ledger.delegate(alice, bob, 2).unwrap();

        let events = ledger.take_events();
        assert_eq!(
            events,
            vec![
                GovernanceEvent::DelegateChanged { delegator: alice, from: Address::ZERO, to: bob },
                GovernanceEvent::DelegateVotesChanged { delegate: bob, previous: 0, new: 10 },
            ]
        );
    }

    #[derive(Debug, Clone)]
    enum Op {
        Mint(u8, u32),
        Transfer(u8, u8, u32),
        Delegate(u8, u8),
        Advance(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1..6u8, 0..1_000u32).prop_map(|(a, n)| Op::Mint(a, n)),
            (1..6u8, 1..6u8, 0..1_000u32).prop_map(|(a, b, n)| Op::Transfer(a, b, n)),
            (1..6u8, 0..6u8).prop_map(|(a, d)| Op::Delegate(a, d)),
            (0..3u8).prop_map(Op::Advance),
        ]
    }

    fn run_ops(ops: &[Op]) -> (VotingLedger, Tick) {
        let mut ledger = VotingLedger::new();
        let mut now: Tick = 1;
        for op in ops {
            match *op {
                Op::Mint(a, n) => ledger.mint(test_address(a), n as u128, now).unwrap(),
                Op::Transfer(a, b, n) => {
                    let amount = (n as u128).min(ledger.balance_of(&test_address(a)));
                    ledger.transfer(test_address(a), test_address(b), amount, now).unwrap();
                }
                // Index 0 maps to the zero address, i.e. undelegation.
                Op::Delegate(a, d) => ledger.delegate(test_address(a), test_address(d), now).unwrap(),
                Op::Advance(n) => now += n as Tick,
            }
        }
        (ledger, now)
    }

    proptest! {
        #[test]
        fn prop_checkpoints_strictly_increasing(ops in prop::collection::vec(op_strategy(), 0..60)) {
            let (ledger, _) = run_ops(&ops);
            for n in 1..6u8 {
                let cps = ledger.checkpoints(&test_address(n));
                for pair in cps.windows(2) {
                    prop_assert!(pair[0].tick < pair[1].tick);
                }
            }
        }

        #[test]
        fn prop_weight_conservation(ops in prop::collection::vec(op_strategy(), 0..60)) {
            let (ledger, _) = run_ops(&ops);
            let total_votes: u128 = (1..6u8).map(|n| ledger.get_current_votes(&test_address(n))).sum();
            let delegated: u128 = (1..6u8)
                .map(test_address)
                .filter(|a| !ledger.delegates(a).is_zero())
                .map(|a| ledger.balance_of(&a))
                .sum();
            prop_assert_eq!(total_votes, delegated);
        }

        #[test]
        fn prop_prior_votes_match_linear_scan(
            ops in prop::collection::vec(op_strategy(), 0..60),
            query in 0..200u64,
        ) {
            let (ledger, now) = run_ops(&ops);
            let now = now + 1;
            let tick = query.min(now - 1);
            for n in 1..6u8 {
                let account = test_address(n);
                let expected = ledger
                    .checkpoints(&account)
                    .iter()
                    .rev()
                    .find(|cp| cp.tick <= tick)
                    .map_or(0, |cp| cp.votes);
                prop_assert_eq!(ledger.get_prior_votes(&account, tick, now).unwrap(), expected);
            }
        }
    }
}
