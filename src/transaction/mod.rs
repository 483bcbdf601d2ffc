//! Per-transaction state (§3 "Transaction", §4.4) and the R-side state
//! machine that drives it (§4.5, C6). The S-side shares this record's
//! shape (role, queues, pool) but its business logic is out of scope
//! (§1) — `Role::S1`/`Role::S2` transactions only participate in pool and
//! queue bookkeeping here.

pub mod receiver;
pub mod sender;

use std::fmt;

use crate::chunklist::ChunkList;
use crate::condition::ConditionCode;
use crate::crc32;
use crate::ports::FileHandle;
use crate::timer::Timer;

/// Unique key for a transaction: `(source-entity-id, sequence-number)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionKey {
    pub source_eid: u64,
    pub sequence_number: u64,
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:#x}, {})", self.source_eid, self.sequence_number)
    }
}

/// Transaction role, fixed at allocation (§3).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    /// Class 1 receiver: unacknowledged, streamed, CRC-on-the-fly.
    R1,
    /// Class 2 receiver: acknowledged, NAK/FIN-ACK driven.
    R2,
    /// Class 1 sender — shares pool/queue machinery only (§1 Non-goals).
    S1,
    /// Class 2 sender — shares pool/queue machinery only (§1 Non-goals).
    S2,
}

impl Role {
    pub fn is_receiver(&self) -> bool {
        matches!(self, Role::R1 | Role::R2)
    }

    pub fn is_class2(&self) -> bool {
        matches!(self, Role::R2 | Role::S2)
    }
}

/// Coarse transaction state (§3 "state.major").
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MajorState {
    Idle,
    Active,
    DropOnError,
    Finished,
}

impl Default for MajorState {
    fn default() -> Self {
        MajorState::Idle
    }
}

/// Fine-grained receive substate (§3, §4.4 state diagram). NAK
/// generation/retransmission is driven by `Flags::send_nak` while the
/// transaction stays in `RecvFileData`/`WaitEof` rather than by a
/// dedicated substate of its own.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Substate {
    WaitMd,
    RecvFileData,
    WaitEof,
    SendFin,
    WaitFinAck,
    Complete,
}

impl Default for Substate {
    fn default() -> Self {
        Substate::WaitMd
    }
}

impl fmt::Display for Substate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Substate::WaitMd => "WaitMd",
            Substate::RecvFileData => "RecvFileData",
            Substate::WaitEof => "WaitEof",
            Substate::SendFin => "SendFin",
            Substate::WaitFinAck => "WaitFinAck",
            Substate::Complete => "Complete",
        };
        write!(f, "{}", s)
    }
}

/// Boolean flags latched during the transaction's life (§3 "flags").
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Flags {
    pub md_recv: bool,
    pub eof_recv: bool,
    pub crc_ok: bool,
    pub send_ack: bool,
    pub send_nak: bool,
    pub send_fin: bool,
    pub inactivity_fired: bool,
    pub canceled: bool,
    pub suspended: bool,
}

/// Retry counters (§3 "counters").
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    pub ack_retries: u32,
    pub nak_retries: u32,
}

/// The three tick-driven timers a receive transaction owns (§3 "timers").
#[derive(Debug, Copy, Clone, Default)]
pub struct Timers {
    pub ack: Timer,
    pub nak: Timer,
    pub inactivity: Timer,
}

impl Timers {
    /// Advance all three timers by one tick, unless the transaction is
    /// suspended (§9 O3: freeze all three timers while suspended).
    pub fn tick_all(&mut self, suspended: bool) {
        if suspended {
            return;
        }
        self.ack.tick_once();
        self.nak.tick_once();
        self.inactivity.tick_once();
    }
}

/// Source/destination/temp filenames associated with a transfer (§3
/// "fnames").
#[derive(Debug, Clone, Default)]
pub struct FileNames {
    pub source_name: String,
    pub destination_name: String,
    pub temp_name: Option<String>,
}

/// Why a transaction reached `Complete` (§10.5 "History entry content").
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompletionReason {
    Completed,
    Dropped,
    Canceled,
    Abandoned,
}

/// Per-transfer state (§3 "Transaction").
#[derive(Debug, Clone)]
pub struct Transaction {
    pub key: TransactionKey,
    pub peer_eid: u64,
    pub dest_eid: u64,
    pub role: Role,
    pub major: MajorState,
    pub substate: Substate,
    pub flags: Flags,
    pub timers: Timers,
    pub counters: Counters,
    pub file_size_expected: Option<u64>,
    pub file_size_received_bytes: u64,
    pub crc_expected: u32,
    pub crc_running: u32,
    pub crc_bytes_consumed: u64,
    pub chunks: ChunkList,
    pub file_handle: Option<FileHandle>,
    pub fnames: FileNames,
    pub status_code: ConditionCode,
    pub completion_reason: Option<CompletionReason>,
    /// Large-file bit to use when encoding outbound PDUs for this
    /// transaction, latched from the peer's MD/EOF/FD PDUs.
    pub large_file: bool,
    /// Set once the chunked CRC verification step (§4.5.1) has started, so
    /// repeated ticks know to resume rather than re-seed the register.
    pub crc_verification_started: bool,
}

impl Transaction {
    pub fn new(key: TransactionKey, peer_eid: u64, dest_eid: u64, role: Role) -> Self {
        Transaction {
            key,
            peer_eid,
            dest_eid,
            role,
            major: MajorState::Idle,
            substate: Substate::WaitMd,
            flags: Flags::default(),
            timers: Timers::default(),
            counters: Counters::default(),
            file_size_expected: None,
            file_size_received_bytes: 0,
            crc_expected: 0,
            crc_running: crc32::INITIAL_REGISTER,
            crc_bytes_consumed: 0,
            chunks: ChunkList::new(),
            file_handle: None,
            fnames: FileNames::default(),
            status_code: ConditionCode::NoError,
            completion_reason: None,
            large_file: false,
            crc_verification_started: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.substate == Substate::Complete
    }

    /// P4: a transaction must never have both `send_fin` and `send_nak`
    /// latched simultaneously.
    pub fn check_flag_invariant(&self) -> bool {
        !(self.flags.send_fin && self.flags.send_nak)
    }
}
