//! Delayed execution queue.
//!
//! Every privileged action has to sit in the queue for at least `delay`
//! ticks and must then be executed within `grace_period` ticks of its eta.
//! Only the admin may queue, execute or cancel. The admin role moves through
//! a two-phase handoff: the admin nominates, the nominee accepts.

use std::collections::HashMap;

use keystone_types::{Address, Hash, Tick};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::action::{Action, ActionExecutor};
use crate::config::TimelockConfig;
use crate::error::GovernanceError;
use crate::events::{EventLog, GovernanceEvent};

/// Two days, in one-second ticks.
pub const MINIMUM_DELAY: Tick = 2 * 24 * 60 * 60;
/// Thirty days, in one-second ticks.
pub const MAXIMUM_DELAY: Tick = 30 * 24 * 60 * 60;
/// Fourteen days, in one-second ticks.
pub const GRACE_PERIOD: Tick = 14 * 24 * 60 * 60;

/// Signatures the timelock answers itself when it is the call target.
pub const SET_DELAY_SIGNATURE: &str = "setDelay(uint64)";
pub const SET_PENDING_ADMIN_SIGNATURE: &str = "setPendingAdmin(address)";

/// An action waiting for its eta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct QueuedTransaction {
    action: Action,
    eta: Tick,
}

/// The timelock and its admin fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timelock {
    /// Address the timelock itself acts under
    address: Address,
    admin: Address,
    pending_admin: Option<Address>,
    delay: Tick,
    grace_period: Tick,
    /// Fingerprint -> queued action. Presence means "not yet executed or canceled".
    queued: HashMap<Hash, QueuedTransaction>,
    #[serde(skip)]
    events: EventLog,
}

impl Timelock {
    /// Create a timelock administered by `admin`.
    pub fn new(
        address: Address,
        admin: Address,
        config: &TimelockConfig,
    ) -> Result<Self, GovernanceError> {
        if address.is_zero() || admin.is_zero() {
            return Err(GovernanceError::InvalidAccount(
                "timelock and admin must be non-zero".into(),
            ));
        }
        config.validate()?;

        Ok(Self {
            address,
            admin,
            pending_admin: None,
            delay: config.delay,
            grace_period: config.grace_period,
            queued: HashMap::new(),
            events: EventLog::new(),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn admin(&self) -> Address {
        self.admin
    }

    pub fn pending_admin(&self) -> Option<Address> {
        self.pending_admin
    }

    pub fn delay(&self) -> Tick {
        self.delay
    }

    pub fn grace_period(&self) -> Tick {
        self.grace_period
    }

    pub fn is_queued(&self, hash: &Hash) -> bool {
        self.queued.contains_key(hash)
    }

    pub fn queued_count(&self) -> usize {
        self.queued.len()
    }

    /// Queue `action` for execution at `eta`.
    pub fn queue_transaction(
        &mut self,
        caller: Address,
        action: Action,
        eta: Tick,
        now: Tick,
    ) -> Result<Hash, GovernanceError> {
        self.require_admin(caller, "queueTransaction")?;

        let earliest = now.saturating_add(self.delay);
        if eta < earliest {
            return Err(GovernanceError::EtaTooEarly { eta, earliest });
        }

        let hash = action.fingerprint(eta);
        if self.queued.contains_key(&hash) {
            return Err(GovernanceError::TransactionAlreadyQueued(hash));
        }

        self.events.emit(GovernanceEvent::QueueTransaction {
            hash,
            target: action.target,
            eta,
        });
        info!(%hash, target = %action.target, eta, "transaction queued");
        self.queued.insert(hash, QueuedTransaction { action, eta });
        Ok(hash)
    }

    /// Check that `action` could be executed at `now` without executing it.
    pub fn ensure_executable(
        &self,
        action: &Action,
        eta: Tick,
        now: Tick,
    ) -> Result<Hash, GovernanceError> {
        let hash = action.fingerprint(eta);
        if !self.queued.contains_key(&hash) {
            return Err(GovernanceError::TransactionNotQueued(hash));
        }
        if now < eta {
            return Err(GovernanceError::TransactionLocked { eta, now });
        }
        let deadline = eta.saturating_add(self.grace_period);
        if now > deadline {
            return Err(GovernanceError::TransactionStale { deadline, now });
        }
        Ok(hash)
    }

    /// Execute a queued action.
    ///
    /// The action leaves the queue before the target is invoked, so a
    /// callback into the timelock cannot execute it a second time. A failed
    /// invocation is not re-queued.
    pub fn execute_transaction<E: ActionExecutor + ?Sized>(
        &mut self,
        caller: Address,
        action: &Action,
        eta: Tick,
        executor: &mut E,
        now: Tick,
    ) -> Result<Vec<u8>, GovernanceError> {
        self.require_admin(caller, "executeTransaction")?;
        let hash = self.ensure_executable(action, eta, now)?;

        self.queued.remove(&hash);

        let result = if action.target == self.address {
            self.dispatch_self(action)
        } else {
            executor.invoke(&action.to_call())
        };

        match result {
            Ok(return_data) => {
                self.events.emit(GovernanceEvent::ExecuteTransaction {
                    hash,
                    target: action.target,
                    eta,
                });
                info!(%hash, target = %action.target, "transaction executed");
                Ok(return_data)
            }
            Err(reason) => {
                warn!(%hash, target = %action.target, %reason, "transaction reverted");
                Err(GovernanceError::ExecutionFailed(reason))
            }
        }
    }

    /// Drop a queued action. Unknown actions are ignored.
    ///
    /// Returns whether anything was removed.
    pub fn cancel_transaction(
        &mut self,
        caller: Address,
        action: &Action,
        eta: Tick,
    ) -> Result<bool, GovernanceError> {
        self.require_admin(caller, "cancelTransaction")?;

        let hash = action.fingerprint(eta);
        let removed = self.queued.remove(&hash).is_some();
        if removed {
            self.events.emit(GovernanceEvent::CancelTransaction {
                hash,
                target: action.target,
                eta,
            });
            info!(%hash, target = %action.target, "transaction canceled");
        }
        Ok(removed)
    }

    /// Nominate the next admin. Callable by the admin or by the timelock
    /// itself through a queued action.
    pub fn set_pending_admin(
        &mut self,
        caller: Address,
        pending_admin: Address,
    ) -> Result<(), GovernanceError> {
        if caller != self.admin && caller != self.address {
            return Err(GovernanceError::Unauthorized(
                "setPendingAdmin: call must come from admin or timelock".into(),
            ));
        }
        if pending_admin.is_zero() {
            return Err(GovernanceError::InvalidAccount("pending admin is the zero address".into()));
        }

        self.pending_admin = Some(pending_admin);
        self.events.emit(GovernanceEvent::NewPendingAdmin { pending_admin });
        info!(pending_admin = %pending_admin, "pending admin nominated");
        Ok(())
    }

    /// Complete the handoff. Only the nominee may call this.
    pub fn accept_admin(&mut self, caller: Address) -> Result<(), GovernanceError> {
        if self.pending_admin != Some(caller) {
            return Err(GovernanceError::Unauthorized(
                "acceptAdmin: call must come from pending admin".into(),
            ));
        }

        self.admin = caller;
        self.pending_admin = None;
        self.events.emit(GovernanceEvent::NewAdmin { admin: caller });
        info!(admin = %caller, "admin accepted");
        Ok(())
    }

    /// Change the delay. Only reachable through a queued self-call.
    pub fn set_delay(&mut self, caller: Address, delay: Tick) -> Result<(), GovernanceError> {
        if caller != self.address {
            return Err(GovernanceError::Unauthorized(
                "setDelay: call must come from timelock".into(),
            ));
        }
        TimelockConfig::check_delay(delay)?;

        self.delay = delay;
        self.events.emit(GovernanceEvent::NewDelay { delay });
        info!(delay, "timelock delay changed");
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<GovernanceEvent> {
        self.events.drain()
    }

    fn require_admin(&self, caller: Address, op: &str) -> Result<(), GovernanceError> {
        if caller != self.admin {
            return Err(GovernanceError::Unauthorized(format!(
                "{op}: call must come from admin"
            )));
        }
        Ok(())
    }

    /// Handle an action whose target is the timelock itself.
    fn dispatch_self(&mut self, action: &Action) -> Result<Vec<u8>, String> {
        if action.value != 0 {
            return Err("timelock functions are not payable".into());
        }
        let this = self.address;
        match action.signature.as_str() {
            SET_DELAY_SIGNATURE => {
                let bytes: [u8; 8] = action
                    .data
                    .as_slice()
                    .try_into()
                    .map_err(|_| format!("setDelay expects 8 bytes, got {}", action.data.len()))?;
                self.set_delay(this, Tick::from_be_bytes(bytes))
                    .map_err(|e| e.to_string())?;
            }
            SET_PENDING_ADMIN_SIGNATURE => {
                let pending = Address::from_slice(&action.data).map_err(|e| e.to_string())?;
                self.set_pending_admin(this, pending).map_err(|e| e.to_string())?;
            }
            other => return Err(format!("timelock has no function '{other}'")),
        }
        Ok(Vec::new())
    }
}
