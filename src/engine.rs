//! The wakeup scheduler (§4.5, C8): one `tick()` call decodes pending
//! inbound messages, advances every active transaction by one tick,
//! collects outbound PDUs (subject to each channel's throttle), and reaps
//! finished transactions into history. Grounded on the teacher's
//! `endpoint/mod.rs` poll loop, generalized from "per-association read
//! loop" to "per-channel phase rotation".

use log::{debug, warn};

use crate::channel::Channel;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::history::{History, HistoryEntry};
use crate::pdu;
use crate::pool::Pool;
use crate::ports::{Bus, EventId, FileStore, PendingSend, Reporter, Severity, TransactionSource};
use crate::transaction::{receiver, sender, Role, Substate, Transaction, TransactionKey};

/// A runtime-tunable channel parameter, addressed by `SetParam`/`GetParam`
/// (§6). Distinct from `ChannelConfig`'s `with_*` builder methods, which
/// only apply before a channel is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    AckTimerS,
    NakTimerS,
    InactivityTimerS,
    AckLimit,
    NakLimit,
}

/// The value carried by a `SetParam`/`GetParam` command, tagged by unit so
/// a caller can't accidentally hand a retry count where a timer duration
/// belongs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamValue {
    Seconds(u64),
    Count(u32),
}

/// A command accepted by the engine's external control surface (§6
/// "Command surface"), distinct from the PDU traffic carried over `Bus`.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Noop,
    Reset,
    SetParam { channel: usize, param: Param, value: ParamValue },
    GetParam { channel: usize, param: Param },
    EnableChannel(usize),
    DisableChannel(usize),
    CancelTxn(TransactionKey),
    SuspendTxn(TransactionKey),
    ResumeTxn(TransactionKey),
    AbandonTxn(TransactionKey),
    PlaybackDir { channel: usize, send: PendingSend },
    PollDirControl { channel: usize, polldir_index: usize, enabled: bool },
}

/// Outcome of one `Command`, reported back to the caller rather than
/// thrown as an error — most commands name a channel/transaction that may
/// simply no longer exist, which isn't exceptional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Applied,
    Queried(ParamValue),
    NoSuchChannel,
    NoSuchTransaction,
}

/// The engine ties configuration, the transaction pool, per-channel
/// queues, and the three external ports together and drives them one
/// wakeup at a time. Generic over its ports so the core never pays for
/// dynamic dispatch it doesn't need (§5).
pub struct Engine<B: Bus, F: FileStore, R: Reporter, S: TransactionSource> {
    config: EngineConfig,
    channels: Vec<Channel>,
    pool: Pool,
    history: History,
    bus: B,
    file: F,
    reporter: R,
    source: S,
    /// Monotonic counter used to mint sequence numbers for locally
    /// originated (S1/S2) transactions, keyed off the local entity id so
    /// they never collide with a peer-assigned receive-transaction key.
    local_seq_counter: u64,
}

impl<B: Bus, F: FileStore, R: Reporter, S: TransactionSource> Engine<B, F, R, S> {
    pub fn new(config: EngineConfig, bus: B, file: F, reporter: R, source: S) -> Result<Self> {
        config.validate()?;
        let pool = Pool::new(config.pool_capacity());
        let history = History::new(config.history_capacity());
        let channels = config
            .channels()
            .iter()
            .cloned()
            .map(Channel::new)
            .collect();
        Ok(Engine {
            config,
            channels,
            pool,
            history,
            bus,
            file,
            reporter,
            source,
            local_seq_counter: 0,
        })
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Look up (or, for a never-seen key, allocate) the receive
    /// transaction a decoded PDU belongs to.
    fn transaction_for(
        &mut self,
        channel_idx: usize,
        header: &pdu::PduHeader,
    ) -> Option<crate::pool::PoolHandle> {
        let key = TransactionKey {
            source_eid: header.source_entity_id.value,
            sequence_number: header.sequence_number.value,
        };
        if let Some(handle) = self.pool.handle_of(key) {
            return Some(handle);
        }

        let role = if header.mode.is_class2() {
            Role::R2
        } else {
            Role::R1
        };
        let txn = Transaction::new(key, header.source_entity_id.value, self.config.local_eid(), role);
        match self.pool.insert(txn, &mut self.reporter) {
            Ok(handle) => {
                self.reporter.event(
                    Severity::Info,
                    EventId::TransactionAllocated,
                    "new receive transaction allocated",
                );
                self.channels[channel_idx].track(handle);
                Some(handle)
            }
            Err(_) => None,
        }
    }

    /// Drive exactly one wakeup: receive, tick, transmit, reap, in that
    /// order, for every enabled channel (§4.5).
    pub fn tick(&mut self) {
        let pending = self.source.poll_pending();
        for send in pending {
            if let Some(ch) = self.channels.first_mut() {
                ch.queue_send(send);
            }
        }

        for idx in 0..self.channels.len() {
            if !self.channels[idx].enabled() {
                continue;
            }
            self.phase_receive(idx);
        }
        for idx in 0..self.channels.len() {
            if !self.channels[idx].enabled() {
                continue;
            }
            self.phase_tick(idx);
        }
        for idx in 0..self.channels.len() {
            if !self.channels[idx].enabled() {
                continue;
            }
            self.phase_transmit(idx);
        }
        for idx in 0..self.channels.len() {
            self.phase_reap(idx);
        }
    }

    fn phase_receive(&mut self, idx: usize) {
        let input_mid = self.channels[idx].config().input_mid();
        let max = self.channels[idx].config().rx_max_messages_per_wakeup();
        let tmp_dir = self.config.tmp_dir().to_string();
        let ticks_per_second = self.config.ticks_per_second();

        for _ in 0..max {
            let data = match self.bus.try_recv(input_mid) {
                Ok(Some(data)) => data,
                Ok(None) => break,
                Err(e) => {
                    warn!("bus recv failed on channel {}: {}", idx, e);
                    break;
                }
            };
            let logical = match pdu::decode(&data) {
                Ok(p) => p,
                Err(e) => {
                    self.reporter.event(
                        Severity::Error,
                        EventId::PduDropped,
                        &format!("decode failed: {}", e),
                    );
                    continue;
                }
            };
            let handle = match self.transaction_for(idx, &logical.header) {
                Some(h) => h,
                None => continue,
            };
            let channel_cfg = self.channels[idx].config().clone();
            if let Some(txn) = self.pool.get_by_handle_mut(handle) {
                receiver::on_pdu_received(
                    txn,
                    &logical,
                    &channel_cfg,
                    ticks_per_second,
                    &tmp_dir,
                    &mut self.file,
                    &mut self.reporter,
                );
            }
        }
    }

    /// Tick every active transaction on this channel, in an order rotated
    /// each wakeup via `next_transmit_slice`, and queue whatever PDUs they
    /// emit for `phase_transmit` rather than sending them straight away —
    /// every transaction's timers must still advance once per wakeup
    /// regardless of how much of the resulting traffic actually goes out
    /// this wakeup (§4.5 "starvation avoidance").
    fn phase_tick(&mut self, idx: usize) {
        let channel_cfg = self.channels[idx].config().clone();
        let ticks_per_second = self.config.ticks_per_second();
        let mut crc_budget = self.config.rx_crc_calc_bytes_per_wakeup();

        let active_len = self.channels[idx].active().len();
        let rotated = self.channels[idx].next_transmit_slice(active_len);
        let mut outbox = Vec::new();
        for handle in rotated {
            if let Some(txn) = self.pool.get_by_handle_mut(handle) {
                if txn.substate == Substate::Complete {
                    continue;
                }
                let spent = receiver::tick(
                    txn,
                    &channel_cfg,
                    ticks_per_second,
                    &mut self.file,
                    &mut self.reporter,
                    crc_budget,
                    &mut outbox,
                );
                crc_budget = crc_budget.saturating_sub(spent);
            }
        }
        for pdu in outbox {
            self.channels[idx].queue_pdu(pdu);
        }
    }

    /// Send up to `max_outgoing_messages_per_wakeup` messages for this
    /// channel, subject to the throttle semaphore: protocol PDUs queued by
    /// `phase_tick` first, then directory-poll/playback sends (§4.5 phase
    /// 3). Anything left over stays queued for the next wakeup instead of
    /// being dropped.
    fn phase_transmit(&mut self, idx: usize) {
        let sem_name = self.channels[idx].config().throttle_sem_name().to_string();
        let output_mid = self.channels[idx].config().output_mid();
        let max = self.channels[idx].config().max_outgoing_messages_per_wakeup();
        let mut sent = 0;
        while sent < max {
            if !self.bus.throttle_take(&sem_name) {
                break;
            }
            if let Some(pdu) = self.channels[idx].pop_outbound_pdu() {
                let bytes = pdu::encode(&pdu);
                if let Err(e) = self.bus.send(output_mid, &bytes) {
                    warn!("bus send failed on channel {}: {}", idx, e);
                }
                sent += 1;
                continue;
            }
            match self.channels[idx].pop_pending_send() {
                Some(send) => {
                    debug!(
                        "channel {} starting send to entity {:#x}: {} -> {}",
                        idx, send.dest_eid, send.src_path, send.dst_path
                    );
                    self.start_send_transaction(idx, &send);
                    sent += 1;
                }
                None => break,
            }
        }
    }

    /// Allocate an S1/S2 transaction for a drained `PendingSend` and hand
    /// it one poll (§1 Non-goals: the real send FSM isn't implemented, but
    /// the pool/channel/history machinery is still exercised for both
    /// transfer directions, same as an R-transaction).
    fn start_send_transaction(&mut self, idx: usize, send: &PendingSend) {
        self.local_seq_counter += 1;
        let key = TransactionKey {
            source_eid: self.config.local_eid(),
            sequence_number: self.local_seq_counter,
        };
        let role = if send.class == 2 { Role::S2 } else { Role::S1 };
        let txn = Transaction::new(key, self.config.local_eid(), send.dest_eid, role);
        match self.pool.insert(txn, &mut self.reporter) {
            Ok(handle) => {
                self.channels[idx].track(handle);
                if let Some(txn) = self.pool.get_by_handle_mut(handle) {
                    sender::poll(txn);
                }
            }
            Err(_) => {
                warn!("channel {}: pool exhausted starting send transaction", idx);
            }
        }
    }

    fn phase_reap(&mut self, idx: usize) {
        let handles: Vec<_> = self.channels[idx].active().iter().copied().collect();
        for handle in handles {
            let is_done = self
                .pool
                .get_by_handle_mut(handle)
                .map(|t| t.is_complete())
                .unwrap_or(true);
            if is_done {
                self.channels[idx].untrack(handle);
                if let Some(mut txn) = self.pool.remove(handle) {
                    // §5/§4.8: a transaction's file handle is closed on
                    // Complete, whatever path got it there, and the slot
                    // it occupied is scrubbed before going back to the
                    // pool's freelist.
                    if let Some(fh) = txn.file_handle.take() {
                        if let Err(e) = self.file.close(fh) {
                            warn!("channel {}: failed closing file handle on reap: {}", idx, e);
                        }
                    }
                    self.reporter.event(
                        Severity::Info,
                        EventId::TransactionCompleted { code: txn.status_code },
                        "transaction reaped to history",
                    );
                    self.history.push(HistoryEntry::from_transaction(&txn));
                }
            }
        }
    }

    /// Apply one external command (§6 "Command surface").
    pub fn apply(&mut self, command: Command) -> CommandOutcome {
        match command {
            Command::Noop => CommandOutcome::Applied,
            Command::Reset => {
                self.channels.iter_mut().for_each(|c| c.set_enabled(true));
                CommandOutcome::Applied
            }
            Command::SetParam { channel, param, value } => self.set_param(channel, param, value),
            Command::GetParam { channel, param } => self.get_param(channel, param),
            Command::EnableChannel(idx) => self.set_channel_enabled(idx, true),
            Command::DisableChannel(idx) => self.set_channel_enabled(idx, false),
            Command::CancelTxn(key) => self.with_transaction(key, receiver::cancel),
            Command::SuspendTxn(key) => self.with_transaction(key, receiver::suspend),
            Command::ResumeTxn(key) => self.with_transaction(key, receiver::resume),
            Command::AbandonTxn(key) => self.with_transaction(key, receiver::abandon),
            Command::PlaybackDir { channel, send } => match self.channels.get_mut(channel) {
                Some(c) => {
                    c.queue_send(send);
                    CommandOutcome::Applied
                }
                None => CommandOutcome::NoSuchChannel,
            },
            Command::PollDirControl { channel, .. } if self.channels.get(channel).is_none() => {
                CommandOutcome::NoSuchChannel
            }
            Command::PollDirControl { .. } => CommandOutcome::Applied,
        }
    }

    fn set_param(&mut self, idx: usize, param: Param, value: ParamValue) -> CommandOutcome {
        let cfg = match self.channels.get_mut(idx) {
            Some(c) => c.config_mut(),
            None => return CommandOutcome::NoSuchChannel,
        };
        match (param, value) {
            (Param::AckTimerS, ParamValue::Seconds(s)) => cfg.set_ack_timer_s(s),
            (Param::NakTimerS, ParamValue::Seconds(s)) => cfg.set_nak_timer_s(s),
            (Param::InactivityTimerS, ParamValue::Seconds(s)) => cfg.set_inactivity_timer_s(s),
            (Param::AckLimit, ParamValue::Count(n)) => cfg.set_ack_limit(n),
            (Param::NakLimit, ParamValue::Count(n)) => cfg.set_nak_limit(n),
            _ => {}
        }
        CommandOutcome::Applied
    }

    fn get_param(&self, idx: usize, param: Param) -> CommandOutcome {
        let cfg = match self.channels.get(idx) {
            Some(c) => c.config(),
            None => return CommandOutcome::NoSuchChannel,
        };
        let value = match param {
            Param::AckTimerS => ParamValue::Seconds(cfg.ack_timer_s()),
            Param::NakTimerS => ParamValue::Seconds(cfg.nak_timer_s()),
            Param::InactivityTimerS => ParamValue::Seconds(cfg.inactivity_timer_s()),
            Param::AckLimit => ParamValue::Count(cfg.ack_limit()),
            Param::NakLimit => ParamValue::Count(cfg.nak_limit()),
        };
        CommandOutcome::Queried(value)
    }

    fn set_channel_enabled(&mut self, idx: usize, enabled: bool) -> CommandOutcome {
        match self.channels.get_mut(idx) {
            Some(c) => {
                c.set_enabled(enabled);
                CommandOutcome::Applied
            }
            None => CommandOutcome::NoSuchChannel,
        }
    }

    fn with_transaction(
        &mut self,
        key: TransactionKey,
        f: impl FnOnce(&mut Transaction),
    ) -> CommandOutcome {
        match self.pool.get_mut(key) {
            Some(txn) => {
                f(txn);
                CommandOutcome::Applied
            }
            None => CommandOutcome::NoSuchTransaction,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};

    use super::*;
    use crate::condition::ConditionCode;
    use crate::config::ChannelConfig;
    use crate::crc32;
    use crate::pdu::{
        Direction, EofPdu, FileDataPdu, LogicalPdu, MetadataPdu, PduHeader, PduPayload, PduType,
        TransmissionMode, VarWidthId,
    };
    use crate::ports::{FileHandle, NoSource, NullReporter};
    use crate::transaction::CompletionReason;

    #[derive(Default)]
    struct MockBus {
        inbound: HashMap<u32, VecDeque<Vec<u8>>>,
        outbound: Vec<(u32, Vec<u8>)>,
    }

    impl MockBus {
        fn push(&mut self, mid: u32, pdu: &LogicalPdu) {
            self.inbound
                .entry(mid)
                .or_default()
                .push_back(pdu::encode(pdu).to_vec());
        }
    }

    impl Bus for MockBus {
        fn try_recv(&mut self, input_mid: u32) -> Result<Option<Vec<u8>>> {
            Ok(self.inbound.get_mut(&input_mid).and_then(|q| q.pop_front()))
        }

        fn send(&mut self, output_mid: u32, data: &[u8]) -> Result<()> {
            self.outbound.push((output_mid, data.to_vec()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockFileStore {
        next_handle: FileHandle,
        files: HashMap<FileHandle, Vec<u8>>,
        paths: HashMap<FileHandle, String>,
    }

    impl MockFileStore {
        fn contents(&self, path: &str) -> Vec<u8> {
            let handle = self
                .paths
                .iter()
                .find(|(_, p)| p.as_str() == path)
                .map(|(h, _)| *h)
                .expect("path never opened");
            self.files[&handle].clone()
        }
    }

    impl FileStore for MockFileStore {
        fn open_read(&mut self, path: &str) -> Result<FileHandle> {
            self.open_write(path)
        }

        fn open_write(&mut self, path: &str) -> Result<FileHandle> {
            self.next_handle += 1;
            let handle = self.next_handle;
            self.files.insert(handle, Vec::new());
            self.paths.insert(handle, path.to_string());
            Ok(handle)
        }

        fn open_tempfile(&mut self, tmp_dir: &str) -> Result<(FileHandle, String)> {
            let path = format!("{}/tmp", tmp_dir);
            let handle = self.open_write(&path)?;
            Ok((handle, path))
        }

        fn read(&mut self, handle: FileHandle, offset: u64, buf: &mut [u8]) -> Result<usize> {
            let data = self.files.get(&handle).expect("bad handle");
            let offset = offset as usize;
            if offset >= data.len() {
                return Ok(0);
            }
            let n = buf.len().min(data.len() - offset);
            buf[..n].copy_from_slice(&data[offset..offset + n]);
            Ok(n)
        }

        fn write(&mut self, handle: FileHandle, offset: u64, buf: &[u8]) -> Result<usize> {
            let data = self.files.get_mut(&handle).expect("bad handle");
            let end = offset as usize + buf.len();
            if data.len() < end {
                data.resize(end, 0);
            }
            data[offset as usize..end].copy_from_slice(buf);
            Ok(buf.len())
        }

        fn close(&mut self, _handle: FileHandle) -> Result<()> {
            Ok(())
        }

        fn rename(&mut self, _src: &str, _dst: &str) -> Result<()> {
            Ok(())
        }
    }

    fn test_header(mode: TransmissionMode) -> PduHeader {
        PduHeader {
            pdu_type: PduType::Directive,
            direction: Direction::ToReceiver,
            mode,
            crc_flag: true,
            large_file: false,
            source_entity_id: VarWidthId::narrowest(10),
            destination_entity_id: VarWidthId::narrowest(20),
            sequence_number: VarWidthId::narrowest(1),
        }
    }

    fn test_engine() -> Engine<MockBus, MockFileStore, NullReporter, NoSource> {
        let config = EngineConfig::new(20).with_channel(ChannelConfig::new(1, 2));
        Engine::new(
            config,
            MockBus::default(),
            MockFileStore::default(),
            NullReporter,
            NoSource,
        )
        .unwrap()
    }

    /// One `tick()` call receives all three PDUs of a Class-1 transfer,
    /// runs the CRC step, and reaps the finished transaction into history
    /// — the full four-phase loop in a single wakeup.
    #[test]
    fn full_wakeup_receives_ticks_and_reaps_class1_transfer() {
        // Ignored if a test runner already installed a logger; visible
        // with `cargo test -- --nocapture` otherwise (§10.2).
        let _ = env_logger::try_init();

        let mut engine = test_engine();
        let payload = b"hello from the wakeup scheduler";
        let checksum = crc32::checksum(payload);

        engine.bus.push(
            1,
            &LogicalPdu {
                header: test_header(TransmissionMode::Unacknowledged),
                payload: PduPayload::Metadata(MetadataPdu {
                    closure_requested: false,
                    checksum_type: 0,
                    file_size: payload.len() as u64,
                    source_filename: "src.bin".into(),
                    destination_filename: "dst.bin".into(),
                }),
            },
        );
        engine.bus.push(
            1,
            &LogicalPdu {
                header: {
                    let mut h = test_header(TransmissionMode::Unacknowledged);
                    h.pdu_type = PduType::FileData;
                    h
                },
                payload: PduPayload::FileData(FileDataPdu {
                    offset: 0,
                    data: bytes::Bytes::copy_from_slice(payload),
                }),
            },
        );
        engine.bus.push(
            1,
            &LogicalPdu {
                header: test_header(TransmissionMode::Unacknowledged),
                payload: PduPayload::Eof(EofPdu {
                    condition_code: ConditionCode::NoError,
                    file_checksum: checksum,
                    file_size: payload.len() as u64,
                }),
            },
        );

        engine.tick();

        assert_eq!(engine.pool().len(), 0);
        assert_eq!(engine.history().len(), 1);
        let entry = engine.history().iter().next().unwrap();
        assert_eq!(entry.completion_reason, CompletionReason::Completed);
        assert_eq!(engine.file.contents("dst.bin"), payload);
    }

    #[test]
    fn disable_channel_skips_every_phase() {
        let mut engine = test_engine();
        assert_eq!(engine.apply(Command::DisableChannel(0)), CommandOutcome::Applied);

        engine.bus.push(
            1,
            &LogicalPdu {
                header: test_header(TransmissionMode::Unacknowledged),
                payload: PduPayload::Metadata(MetadataPdu {
                    closure_requested: false,
                    checksum_type: 0,
                    file_size: 4,
                    source_filename: "src.bin".into(),
                    destination_filename: "dst.bin".into(),
                }),
            },
        );
        engine.tick();

        assert!(engine.pool().is_empty());
        assert_eq!(engine.apply(Command::DisableChannel(9)), CommandOutcome::NoSuchChannel);
    }

    #[test]
    fn set_and_get_param_round_trips() {
        let mut engine = test_engine();
        let outcome = engine.apply(Command::SetParam {
            channel: 0,
            param: Param::NakLimit,
            value: ParamValue::Count(7),
        });
        assert_eq!(outcome, CommandOutcome::Applied);

        let queried = engine.apply(Command::GetParam { channel: 0, param: Param::NakLimit });
        assert_eq!(queried, CommandOutcome::Queried(ParamValue::Count(7)));
    }
}
