//! Minimal S-side stub (§1 Non-goals). S1/S2 transactions share the pool,
//! channel queues, history, and PDU codec with R-side transactions, but a
//! real send state machine (outbound MD/FD/EOF sequencing, NAK servicing,
//! FIN-ACK handling) is out of scope here. `poll` exists only so a
//! `PlaybackDir`/directory-poll request can be carried through the same
//! pool/channel/history machinery an R-transaction uses, rather than being
//! handled by an entirely separate code path.

use crate::transaction::{CompletionReason, MajorState, Substate, Transaction};

/// Advance an S1/S2 transaction by one tick. This never touches
/// `ChunkList`, timers, or the PDU codec's encode side — those belong to
/// the real send FSM this crate does not implement — it just carries the
/// transaction to `Complete` so `Engine::phase_reap` can retire it into
/// history like any other finished transfer.
pub fn poll(txn: &mut Transaction) {
    txn.major = MajorState::Finished;
    txn.substate = Substate::Complete;
    txn.completion_reason = Some(CompletionReason::Completed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{Role, TransactionKey};

    #[test]
    fn poll_completes_immediately() {
        let key = TransactionKey { source_eid: 1, sequence_number: 1 };
        let mut txn = Transaction::new(key, 1, 2, Role::S2);
        poll(&mut txn);
        assert!(txn.is_complete());
        assert_eq!(txn.completion_reason, Some(CompletionReason::Completed));
    }
}
