//! Offline scenario runner.
//!
//! A scenario is a TOML script of governance calls replayed against a fresh
//! deployment with a recording executor:
//!
//! ```toml
//! [[steps]]
//! op = "mint"
//! to = "alice"
//! amount = "100"
//!
//! [[steps]]
//! op = "vote"
//! proposal = 1
//! voter = "bob"
//! support = true
//! expect_error = "state"
//! ```
//!
//! Accounts are written as hex (`0x...`), bech32m (`ks1...`), one of the
//! deployment roles (`governor`, `timelock`, `guardian`) or any other name,
//! which is turned into an address deterministically.

use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use keystone_governance::{
    Action, Deployment, ErrorKind, Governance, GovernanceConfig, GovernanceError, GovernanceEvent,
    GovernanceState, ProposalActions, ProposalState, RecordingExecutor,
};
use keystone_types::{Address, Tick};
use serde::Deserialize;
use tracing::{info, warn};

/// A parsed scenario.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    /// Overrides the configured governance parameters
    #[serde(default)]
    pub governance: Option<GovernanceConfig>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One call and its expected outcome.
#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub op: Op,
    /// Error kind the call must fail with
    #[serde(default)]
    pub expect_error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Advance {
        to: Option<Tick>,
        by: Option<Tick>,
    },
    Mint {
        to: String,
        #[serde(with = "keystone_types::serialization::amount")]
        amount: u128,
    },
    Burn {
        from: String,
        #[serde(with = "keystone_types::serialization::amount")]
        amount: u128,
    },
    Transfer {
        from: String,
        to: String,
        #[serde(with = "keystone_types::serialization::amount")]
        amount: u128,
    },
    Delegate {
        account: String,
        delegatee: String,
    },
    Propose {
        proposer: String,
        #[serde(default)]
        description: String,
        actions: Vec<ActionSpec>,
    },
    Vote {
        proposal: u64,
        voter: String,
        support: bool,
    },
    Queue {
        proposal: u64,
    },
    Execute {
        proposal: u64,
    },
    Cancel {
        proposal: u64,
        caller: String,
    },
    /// Guardian completes a nomination of the governor
    AcceptTimelockAdmin {
        caller: String,
    },
    Abdicate {
        caller: String,
    },
    QueueTransaction {
        caller: String,
        action: ActionSpec,
        eta: Tick,
    },
    ExecuteTransaction {
        caller: String,
        action: ActionSpec,
        eta: Tick,
    },
    CancelTransaction {
        caller: String,
        action: ActionSpec,
        eta: Tick,
    },
    SetPendingAdmin {
        caller: String,
        pending_admin: String,
    },
    /// Nominee takes over the timelock
    AcceptAdmin {
        caller: String,
    },
    ExpectState {
        proposal: u64,
        state: String,
    },
    ExpectVotes {
        account: String,
        #[serde(with = "keystone_types::serialization::amount")]
        votes: u128,
        /// Check prior votes at this tick instead of current votes
        at: Option<Tick>,
    },
}

impl Op {
    pub fn name(&self) -> &'static str {
        match self {
            Op::Advance { .. } => "advance",
            Op::Mint { .. } => "mint",
            Op::Burn { .. } => "burn",
            Op::Transfer { .. } => "transfer",
            Op::Delegate { .. } => "delegate",
            Op::Propose { .. } => "propose",
            Op::Vote { .. } => "vote",
            Op::Queue { .. } => "queue",
            Op::Execute { .. } => "execute",
            Op::Cancel { .. } => "cancel",
            Op::AcceptTimelockAdmin { .. } => "accept_timelock_admin",
            Op::Abdicate { .. } => "abdicate",
            Op::QueueTransaction { .. } => "queue_transaction",
            Op::ExecuteTransaction { .. } => "execute_transaction",
            Op::CancelTransaction { .. } => "cancel_transaction",
            Op::SetPendingAdmin { .. } => "set_pending_admin",
            Op::AcceptAdmin { .. } => "accept_admin",
            Op::ExpectState { .. } => "expect_state",
            Op::ExpectVotes { .. } => "expect_votes",
        }
    }
}

/// An action inside a `propose` step.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionSpec {
    pub target: String,
    #[serde(default, with = "keystone_types::serialization::amount")]
    pub value: u128,
    #[serde(default)]
    pub signature: String,
    /// Hex encoded, with or without `0x`
    #[serde(default)]
    pub data: String,
}

/// Result of a successful run.
#[derive(Debug)]
pub struct ScenarioReport {
    pub steps: usize,
    pub expected_failures: usize,
    pub executed_calls: usize,
    pub events: Vec<GovernanceEvent>,
    pub final_state: GovernanceState,
}

impl Scenario {
    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).context("Failed to parse scenario")
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario '{}'", path.display()))?;
        Self::from_toml_str(&contents)
    }

    /// Replay every step against a fresh deployment.
    ///
    /// Stops at the first step whose outcome differs from what it declares.
    pub fn run(&self, config: &GovernanceConfig) -> anyhow::Result<ScenarioReport> {
        let config = self.governance.as_ref().unwrap_or(config);
        let deployment = Deployment::default();
        let mut runner = Runner {
            gov: Governance::new(config, deployment, RecordingExecutor::new())?,
            deployment,
        };

        let mut expected_failures = 0;
        let mut events = Vec::new();

        for (index, step) in self.steps.iter().enumerate() {
            let number = index + 1;
            let op = step.op.name();
            let outcome = runner.apply(&step.op);
            events.extend(runner.gov.take_events());

            match (outcome, &step.expect_error) {
                (Ok(()), None) => {
                    info!(step = number, op, now = runner.gov.now(), "ok");
                }
                (Ok(()), Some(kind)) => {
                    anyhow::bail!("step {number} ({op}): expected {kind} error, but it succeeded");
                }
                (Err(err), expected) => {
                    let Some(governance_err) = err.downcast_ref::<GovernanceError>() else {
                        return Err(err.context(format!("step {number} ({op})")));
                    };
                    let actual = governance_err.kind();
                    match expected {
                        Some(kind) if ErrorKind::from_str(kind).ok() == Some(actual) => {
                            info!(step = number, op, error = %governance_err, "failed as expected");
                            expected_failures += 1;
                        }
                        Some(kind) => {
                            anyhow::bail!(
                                "step {number} ({op}): expected {kind} error, got {actual}: {governance_err}"
                            );
                        }
                        None => {
                            warn!(step = number, op, error = %governance_err, "step failed");
                            return Err(err.context(format!("step {number} ({op})")));
                        }
                    }
                }
            }
        }

        Ok(ScenarioReport {
            steps: self.steps.len(),
            expected_failures,
            executed_calls: runner.gov.executor().calls().len(),
            events,
            final_state: runner.gov.snapshot(),
        })
    }
}

struct Runner {
    gov: Governance<RecordingExecutor>,
    deployment: Deployment,
}

impl Runner {
    fn account(&self, name: &str) -> anyhow::Result<Address> {
        match name {
            "governor" => Ok(self.deployment.governor),
            "timelock" => Ok(self.deployment.timelock),
            "guardian" => self
                .deployment
                .guardian
                .context("deployment has no guardian"),
            "zero" => Ok(Address::ZERO),
            _ if name.starts_with("0x") || name.starts_with("ks1") => {
                Address::from_str(name).with_context(|| format!("Invalid address '{name}'"))
            }
            _ => Ok(Address::derive(name.as_bytes())),
        }
    }

    fn action(&self, spec: &ActionSpec) -> anyhow::Result<Action> {
        let data = hex::decode(spec.data.trim_start_matches("0x"))
            .with_context(|| format!("Invalid action data '{}'", spec.data))?;
        Ok(Action::new(self.account(&spec.target)?, spec.value, spec.signature.clone(), data))
    }

    fn apply(&mut self, op: &Op) -> anyhow::Result<()> {
        match op {
            Op::Advance { to, by } => match (to, by) {
                (Some(tick), None) => self.gov.advance_to(*tick)?,
                (None, Some(ticks)) => self.gov.advance_by(*ticks)?,
                _ => anyhow::bail!("advance takes exactly one of `to` and `by`"),
            },
            Op::Mint { to, amount } => {
                let to = self.account(to)?;
                self.gov.mint(to, *amount)?;
            }
            Op::Burn { from, amount } => {
                let from = self.account(from)?;
                self.gov.burn(from, *amount)?;
            }
            Op::Transfer { from, to, amount } => {
                let (from, to) = (self.account(from)?, self.account(to)?);
                self.gov.transfer(from, to, *amount)?;
            }
            Op::Delegate { account, delegatee } => {
                let (account, delegatee) = (self.account(account)?, self.account(delegatee)?);
                self.gov.delegate(account, delegatee)?;
            }
            Op::Propose {
                proposer,
                description,
                actions,
            } => {
                let proposer = self.account(proposer)?;
                let actions = actions
                    .iter()
                    .map(|spec| self.action(spec))
                    .collect::<anyhow::Result<Vec<_>>>()?;
                let id = self.gov.propose(
                    proposer,
                    ProposalActions::from(actions.as_slice()),
                    description.clone(),
                )?;
                info!(id, "proposal opened");
            }
            Op::Vote {
                proposal,
                voter,
                support,
            } => {
                let voter = self.account(voter)?;
                self.gov.cast_vote(*proposal, voter, *support)?;
            }
            Op::Queue { proposal } => {
                let eta = self.gov.queue(*proposal)?;
                info!(id = proposal, eta, "proposal eta set");
            }
            Op::Execute { proposal } => self.gov.execute(*proposal)?,
            Op::Cancel { proposal, caller } => {
                let caller = self.account(caller)?;
                self.gov.cancel(*proposal, caller)?;
            }
            Op::AcceptTimelockAdmin { caller } => {
                let caller = self.account(caller)?;
                self.gov.accept_timelock_admin(caller)?;
            }
            Op::Abdicate { caller } => {
                let caller = self.account(caller)?;
                self.gov.abdicate(caller)?;
            }
            Op::QueueTransaction { caller, action, eta } => {
                let (caller, action) = (self.account(caller)?, self.action(action)?);
                let hash = self.gov.queue_transaction(caller, action, *eta)?;
                info!(%hash, eta, "transaction queued directly");
            }
            Op::ExecuteTransaction { caller, action, eta } => {
                let (caller, action) = (self.account(caller)?, self.action(action)?);
                self.gov.execute_transaction(caller, &action, *eta)?;
            }
            Op::CancelTransaction { caller, action, eta } => {
                let (caller, action) = (self.account(caller)?, self.action(action)?);
                if !self.gov.cancel_transaction(caller, &action, *eta)? {
                    warn!(eta, "nothing queued to cancel");
                }
            }
            Op::SetPendingAdmin {
                caller,
                pending_admin,
            } => {
                let (caller, pending_admin) = (self.account(caller)?, self.account(pending_admin)?);
                self.gov.set_pending_admin(caller, pending_admin)?;
            }
            Op::AcceptAdmin { caller } => {
                let caller = self.account(caller)?;
                self.gov.accept_admin(caller)?;
            }
            Op::ExpectState { proposal, state } => {
                let expected = ProposalState::from_str(state).map_err(anyhow::Error::msg)?;
                let actual = self.gov.state(*proposal)?;
                if actual != expected {
                    anyhow::bail!("proposal {proposal} is {actual}, expected {expected}");
                }
            }
            Op::ExpectVotes { account, votes, at } => {
                let who = self.account(account)?;
                let actual = match at {
                    Some(tick) => self.gov.get_prior_votes(&who, *tick)?,
                    None => self.gov.get_current_votes(&who),
                };
                if actual != *votes {
                    anyhow::bail!("{account} has {actual} votes, expected {votes}");
                }
            }
        }
        Ok(())
    }
}
