use thiserror::Error;

/// Result alias used at every fallible port boundary in this crate.
pub type Result<T> = std::result::Result<T, CfdpError>;

/// Reasons a PDU byte buffer failed to decode.
///
/// These never unwind a transaction: the codec returns them to its caller
/// (the engine), which drops the PDU, reports it, and keeps the transaction
/// (if any) alive. See `ConditionCode` for the separate, non-error taxonomy
/// of latched transaction outcomes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("buffer underrun: need {need} bytes, have {have}")]
    Underrun { need: usize, have: usize },
    #[error("unrecognized PDU file directive/type code {0:#x}")]
    BadPduType(u8),
    #[error("large-file header bit inconsistent with field widths present")]
    LargeFileMismatch,
    #[error("unsupported TLV type {0:#x}")]
    UnsupportedTlv(u8),
    #[error("entity-id/sequence-number length field {0} is out of the 1..=8 range")]
    BadEntityIdWidth(u8),
    #[error("unsupported checksum type {0:#x}")]
    BadChecksumType(u8),
}

/// Reason a filestore operation could not complete.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum IoErrorReason {
    #[error("not found")]
    NotFound,
    #[error("permission denied")]
    PermissionDenied,
    #[error("no space left")]
    NoSpace,
    #[error("would block")]
    WouldBlock,
    #[error("other filestore error")]
    Other,
}

/// Errors that cross a port boundary (codec misuse by the caller, filestore
/// failures, bus failures, invalid configuration at construction time).
///
/// Per-PDU malformed input and per-transaction faults are *not* represented
/// here — those are latched into `ConditionCode` on the transaction and
/// reported through the `Reporter` port, per the spec's error propagation
/// policy (drop-and-report, never unwind).
#[derive(Debug, Error)]
pub enum CfdpError {
    #[error("PDU decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("filestore error on {path}: {reason}")]
    Io { path: String, reason: IoErrorReason },
    #[error("bus send failed: {0}")]
    BusSend(String),
    #[error("transaction pool exhausted")]
    PoolExhausted,
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}
