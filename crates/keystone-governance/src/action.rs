//! Privileged actions and the boundary through which they are executed.
//!
//! The timelock does not interpret actions. It only fingerprints them and
//! hands an [`ActionCall`] to an [`ActionExecutor`] once the time gate opens.

use keystone_types::{Address, Hash, Tick};
use serde::{Deserialize, Serialize};

/// One call a proposal wants to make.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Action {
    /// Contract or module receiving the call
    pub target: Address,
    /// Native value attached to the call
    #[serde(with = "keystone_types::serialization::amount")]
    pub value: u128,
    /// Human-readable function signature, e.g. `setFeeTo(address)`; may be empty
    pub signature: String,
    /// Encoded arguments
    pub data: Vec<u8>,
}

impl Action {
    pub fn new(target: Address, value: u128, signature: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            target,
            value,
            signature: signature.into(),
            data,
        }
    }

    /// Deterministic fingerprint of `(target, value, signature, data, eta)`.
    ///
    /// Variable-length fields are length-prefixed so that no two distinct
    /// tuples share an encoding.
    pub fn fingerprint(&self, eta: Tick) -> Hash {
        let signature_len = (self.signature.len() as u64).to_be_bytes();
        let data_len = (self.data.len() as u64).to_be_bytes();
        Hash::compute_multi(&[
            self.target.as_bytes(),
            &self.value.to_be_bytes(),
            &signature_len,
            self.signature.as_bytes(),
            &data_len,
            &self.data,
            &eta.to_be_bytes(),
        ])
    }

    /// Payload delivered to the target: selector followed by data, or the
    /// raw data when no signature is given.
    pub fn calldata(&self) -> Vec<u8> {
        if self.signature.is_empty() {
            return self.data.clone();
        }
        let mut out = Vec::with_capacity(4 + self.data.len());
        out.extend_from_slice(&selector(&self.signature));
        out.extend_from_slice(&self.data);
        out
    }

    /// Build the call handed to an executor.
    pub fn to_call(&self) -> ActionCall {
        ActionCall {
            target: self.target,
            value: self.value,
            signature: self.signature.clone(),
            calldata: self.calldata(),
        }
    }
}

/// First four bytes of the blake3 digest of a function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = Hash::compute(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&digest.as_bytes()[..4]);
    out
}

/// A call ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionCall {
    pub target: Address,
    pub value: u128,
    pub signature: String,
    pub calldata: Vec<u8>,
}

/// The single boundary through which queued actions reach the outside world.
///
/// Implementations return the call's return data, or a revert reason.
pub trait ActionExecutor {
    fn invoke(&mut self, call: &ActionCall) -> Result<Vec<u8>, String>;

    /// Called before the first action of a multi-action proposal.
    fn begin_batch(&mut self) {}

    /// Called after every action of the batch succeeded.
    fn commit_batch(&mut self) {}

    /// Called when an action of the batch failed. Implementations that can
    /// undo the effects of earlier calls should do so here.
    fn rollback_batch(&mut self) {}
}

impl<E: ActionExecutor + ?Sized> ActionExecutor for &mut E {
    fn invoke(&mut self, call: &ActionCall) -> Result<Vec<u8>, String> {
        (**self).invoke(call)
    }

    fn begin_batch(&mut self) {
        (**self).begin_batch()
    }

    fn commit_batch(&mut self) {
        (**self).commit_batch()
    }

    fn rollback_batch(&mut self) {
        (**self).rollback_batch()
    }
}

/// Executor that records every call and reverts for configured targets.
///
/// Batches are transactional: calls recorded inside a batch are dropped on
/// rollback.
#[derive(Debug, Default, Clone)]
pub struct RecordingExecutor {
    calls: Vec<ActionCall>,
    failing: Vec<Address>,
    batch_start: Option<usize>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call to `target` revert.
    pub fn fail_on(mut self, target: Address) -> Self {
        self.failing.push(target);
        self
    }

    /// Calls that took effect, in order.
    pub fn calls(&self) -> &[ActionCall] {
        &self.calls
    }
}

impl ActionExecutor for RecordingExecutor {
    fn invoke(&mut self, call: &ActionCall) -> Result<Vec<u8>, String> {
        if self.failing.contains(&call.target) {
            return Err(format!("call to {:x} reverted", call.target));
        }
        self.calls.push(call.clone());
        Ok(call.calldata.clone())
    }

    fn begin_batch(&mut self) {
        self.batch_start = Some(self.calls.len());
    }

    fn commit_batch(&mut self) {
        self.batch_start = None;
    }

    fn rollback_batch(&mut self) {
        if let Some(start) = self.batch_start.take() {
            self.calls.truncate(start);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_address(n: u8) -> Address {
        let mut addr = [0u8; 20];
        addr[19] = n;
        Address::from_bytes(addr)
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let action = Action::new(test_address(1), 5, "setFeeTo(address)", vec![1, 2, 3]);
        assert_eq!(action.fingerprint(100), action.fingerprint(100));
        assert_ne!(action.fingerprint(100), action.fingerprint(101));
    }

    #[test]
    fn test_fingerprint_covers_every_field() {
        let base = Action::new(test_address(1), 5, "f()", vec![1]);
        let eta = 10;
        let variants = [
            Action::new(test_address(2), 5, "f()", vec![1]),
            Action::new(test_address(1), 6, "f()", vec![1]),
            Action::new(test_address(1), 5, "g()", vec![1]),
            Action::new(test_address(1), 5, "f()", vec![2]),
        ];
        for other in variants {
            assert_ne!(base.fingerprint(eta), other.fingerprint(eta));
        }
    }

    #[test]
    fn test_fingerprint_length_prefix() {
        // Same concatenated bytes, different split between signature and data.
        let a = Action::new(test_address(1), 0, "ab", b"c".to_vec());
        let b = Action::new(test_address(1), 0, "a", b"bc".to_vec());
        assert_ne!(a.fingerprint(1), b.fingerprint(1));
    }

    #[test]
    fn test_calldata_encoding() {
        let raw = Action::new(test_address(1), 0, "", vec![9, 9]);
        assert_eq!(raw.calldata(), vec![9, 9]);

        let with_sig = Action::new(test_address(1), 0, "setOwner(address)", vec![7]);
        let calldata = with_sig.calldata();
        assert_eq!(calldata.len(), 5);
        assert_eq!(&calldata[..4], &selector("setOwner(address)"));
        assert_eq!(calldata[4], 7);
    }

    #[test]
    fn test_recording_executor_rollback() {
        let mut exec = RecordingExecutor::new().fail_on(test_address(9));
        let ok = Action::new(test_address(1), 0, "", vec![]).to_call();
        let bad = Action::new(test_address(9), 0, "", vec![]).to_call();

        exec.invoke(&ok).unwrap();
        exec.begin_batch();
        exec.invoke(&ok).unwrap();
        assert!(exec.invoke(&bad).is_err());
        exec.rollback_batch();

        assert_eq!(exec.calls().len(), 1);
    }
}
