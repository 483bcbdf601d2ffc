//! Per-channel state (§3 "Channel", C7): the active-transaction pool slice
//! a channel owns, its pending-send queue, and its directory-polling
//! rules. Grounded on the teacher's `endpoint/mod.rs`, which owns an
//! association table plus per-association queues behind one struct.

use std::collections::VecDeque;

use crate::config::ChannelConfig;
use crate::pdu::LogicalPdu;
use crate::pool::PoolHandle;
use crate::ports::PendingSend;

/// One channel's live state: which pool slots are its active receive
/// transactions, and what outbound work (protocol PDUs the R-FSM emitted,
/// directory-poll results, playback requests) is queued for it.
pub struct Channel {
    config: ChannelConfig,
    active: VecDeque<PoolHandle>,
    pending_sends: VecDeque<PendingSend>,
    /// PDUs the R-FSM produced this wakeup (or a prior one, if the egress
    /// cap left them queued) awaiting an actual `Bus::send` (§4.5 phase 3).
    outbound_pdus: VecDeque<LogicalPdu>,
    enabled: bool,
    /// Rotating cursor into `active`, so a channel with more ready
    /// transactions than `max_outgoing_messages_per_wakeup` doesn't starve
    /// the tail of the list every wakeup (§4.5 "starvation avoidance").
    cursor: usize,
}

impl Channel {
    pub fn new(config: ChannelConfig) -> Self {
        Channel {
            config,
            active: VecDeque::new(),
            pending_sends: VecDeque::new(),
            outbound_pdus: VecDeque::new(),
            enabled: true,
            cursor: 0,
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ChannelConfig {
        &mut self.config
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn active(&self) -> &VecDeque<PoolHandle> {
        &self.active
    }

    pub fn track(&mut self, handle: PoolHandle) {
        self.active.push_back(handle);
    }

    pub fn untrack(&mut self, handle: PoolHandle) {
        self.active.retain(|h| *h != handle);
        if self.cursor >= self.active.len() {
            self.cursor = 0;
        }
    }

    pub fn queue_send(&mut self, send: PendingSend) {
        self.pending_sends.push_back(send);
    }

    pub fn pop_pending_send(&mut self) -> Option<PendingSend> {
        self.pending_sends.pop_front()
    }

    pub fn queue_pdu(&mut self, pdu: LogicalPdu) {
        self.outbound_pdus.push_back(pdu);
    }

    pub fn pop_outbound_pdu(&mut self) -> Option<LogicalPdu> {
        self.outbound_pdus.pop_front()
    }

    /// Return up to `max` active-transaction handles to give a transmit
    /// opportunity this wakeup, starting from the rotating cursor and
    /// advancing it past what was returned.
    pub fn next_transmit_slice(&mut self, max: usize) -> Vec<PoolHandle> {
        let len = self.active.len();
        if len == 0 || max == 0 {
            return Vec::new();
        }
        let take = max.min(len);
        let mut out = Vec::with_capacity(take);
        for i in 0..take {
            out.push(self.active[(self.cursor + i) % len]);
        }
        self.cursor = (self.cursor + take) % len;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(n: usize) -> PoolHandle {
        // PoolHandle's inner field is private to `pool`; go through a real
        // Pool to mint handles instead of constructing one directly.
        let mut pool = crate::pool::Pool::new(8);
        let mut rep = crate::ports::NullReporter;
        let key = crate::transaction::TransactionKey {
            source_eid: 1,
            sequence_number: n as u64,
        };
        pool.insert(
            crate::transaction::Transaction::new(key, 1, 2, crate::transaction::Role::R1),
            &mut rep,
        )
        .unwrap()
    }

    #[test]
    fn transmit_slice_rotates_across_calls() {
        let mut ch = Channel::new(ChannelConfig::new(1, 2));
        let handles: Vec<_> = (0..4).map(handle).collect();
        for h in &handles {
            ch.track(*h);
        }

        let first = ch.next_transmit_slice(2);
        let second = ch.next_transmit_slice(2);
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        assert_ne!(first, second);
    }

    #[test]
    fn untrack_resets_cursor_if_out_of_range() {
        let mut ch = Channel::new(ChannelConfig::new(1, 2));
        let h = handle(0);
        ch.track(h);
        ch.next_transmit_slice(1);
        ch.untrack(h);
        assert!(ch.active().is_empty());
    }
}
