use crate::error::ShardConnError;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Identity of the coordinated transaction this backend is driving.
///
/// The coordinator advertises this triple to workers so that distributed
/// deadlock detection can attribute worker-side transactions back to their
/// initiator. It is purely session-local bookkeeping here: one backend, one
/// active distributed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributedTransactionId {
    pub initiator_node_id: u32,
    /// Monotonic per-backend counter; never reused within a session.
    pub transaction_number: u64,
    pub started_at_micros: u64,
}

#[derive(Debug, Default)]
pub(crate) struct SessionState {
    current: Option<DistributedTransactionId>,
    next_transaction_number: u64,
}

impl SessionState {
    pub(crate) fn assign(
        &mut self,
        initiator_node_id: u32,
    ) -> Result<DistributedTransactionId, ShardConnError> {
        if self.current.is_some() {
            return Err(ShardConnError::Validation(
                "a distributed transaction is already in progress".into(),
            ));
        }
        self.next_transaction_number += 1;
        let id = DistributedTransactionId {
            initiator_node_id,
            transaction_number: self.next_transaction_number,
            started_at_micros: now_micros(),
        };
        self.current = Some(id);
        Ok(id)
    }

    pub(crate) fn unset(&mut self) {
        self.current = None;
    }

    pub(crate) fn current(&self) -> Option<DistributedTransactionId> {
        self.current
    }
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
