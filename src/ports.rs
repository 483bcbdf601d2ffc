//! Narrow interfaces to collaborators that live outside the core (§1, §6):
//! event/telemetry emission, filesystem access, message-bus transport, and
//! the directory-poller that produces pending send-transactions. The core
//! calls through these traits; it never implements their business logic.

use crate::condition::ConditionCode;
use crate::error::Result;

/// Severity of a `Reporter` event, matching the spec's "classified event
/// sink (informational/error/debug)" (C10).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Info,
    Error,
}

/// A stable identifier for each distinguishable event the core can emit,
/// so a Reporter implementation can count/downlink by event id without
/// string matching (§10.5 of the expanded spec).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EventId {
    PduDropped,
    TransactionAllocated,
    TransactionCompleted { code: ConditionCode },
    PoolExhausted,
    InactivityTimerExpired,
    AckLimitReached,
    NakLimitReached,
    FileChecksumFailure,
    FileSizeError,
    FilestoreRejection,
}

/// Classified event sink. A narrow interface — the core never decides how
/// events are counted, logged, or downlinked, only that they occurred.
pub trait Reporter {
    fn event(&mut self, severity: Severity, id: EventId, detail: &str);
}

/// A no-op Reporter, useful for tests and for engines run without ground
/// telemetry wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn event(&mut self, _severity: Severity, _id: EventId, _detail: &str) {}
}

/// Opaque handle to an open file, owned exclusively by one transaction.
pub type FileHandle = u64;

/// Narrow filesystem port (§6 "File surface"). All operations are expected
/// to complete, or make partial progress, within one wakeup — there are no
/// blocking suspension points in the core (§5).
pub trait FileStore {
    fn open_read(&mut self, path: &str) -> Result<FileHandle>;
    fn open_write(&mut self, path: &str) -> Result<FileHandle>;
    /// Returns a handle plus the path the temp file was created at.
    fn open_tempfile(&mut self, tmp_dir: &str) -> Result<(FileHandle, String)>;
    fn read(&mut self, handle: FileHandle, offset: u64, buf: &mut [u8]) -> Result<usize>;
    fn write(&mut self, handle: FileHandle, offset: u64, buf: &[u8]) -> Result<usize>;
    fn close(&mut self, handle: FileHandle) -> Result<()>;
    fn rename(&mut self, src: &str, dst: &str) -> Result<()>;
}

/// Narrow message-bus port (§6 "Message bus"). The core neither frames nor
/// addresses messages — each inbound message is treated as exactly one PDU.
pub trait Bus {
    /// Pop up to one inbound message for the given input message-id.
    /// Returns `Ok(None)` if no message is available (non-blocking).
    fn try_recv(&mut self, input_mid: u32) -> Result<Option<Vec<u8>>>;
    /// Send one outbound message. Returns `Err(CfdpError::BusSend(_))` if
    /// the transport rejects it (§7: per-channel fault, report, continue).
    fn send(&mut self, output_mid: u32, data: &[u8]) -> Result<()>;
    /// Current unit count of the channel's outbound throttle semaphore.
    /// `None` means unthrottled.
    fn throttle_units(&self, _sem_name: &str) -> Option<u32> {
        None
    }
    /// Consume one unit of the named throttle semaphore. Returns `false`
    /// if no units were available (transmission halts for this wakeup).
    fn throttle_take(&mut self, _sem_name: &str) -> bool {
        true
    }
}

/// A pending outbound send-transaction request, as produced by directory
/// polling or a `PlaybackDir` command. The core only stores and schedules
/// these; the enqueue policy is external (§1 Non-goals).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub priority: u8,
    pub class: u8,
    pub dest_eid: u64,
    pub src_path: String,
    pub dst_path: String,
}

/// Narrow directory-poller / playback-enqueue port (§1 Non-goals,
/// §6 Command surface `PlaybackDir`/`PollDirControl`).
pub trait TransactionSource {
    /// Drain any pending-send requests ready to be enqueued this wakeup.
    fn poll_pending(&mut self) -> Vec<PendingSend>;
}

/// A `TransactionSource` that never produces work, for engines that only
/// receive.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSource;

impl TransactionSource for NoSource {
    fn poll_pending(&mut self) -> Vec<PendingSend> {
        Vec::new()
    }
}
