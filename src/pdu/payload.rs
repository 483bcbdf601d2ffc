use bytes::Bytes;
use tinyvec::ArrayVec;

use crate::chunklist::MAX_NAK_SEGMENTS;
use crate::condition::ConditionCode;

/// File directive codes (CCSDS 727.0-B-4 table 5-4), used on the wire and
/// to identify which directive an ACK acknowledges.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DirectiveCode {
    Eof,
    Fin,
    Ack,
    Metadata,
    Nak,
    Prompt,
    Keepalive,
}

impl DirectiveCode {
    pub(crate) fn to_wire(self) -> u8 {
        match self {
            DirectiveCode::Eof => 0x04,
            DirectiveCode::Fin => 0x05,
            DirectiveCode::Ack => 0x06,
            DirectiveCode::Metadata => 0x07,
            DirectiveCode::Nak => 0x08,
            DirectiveCode::Prompt => 0x09,
            DirectiveCode::Keepalive => 0x0c,
        }
    }

    pub(crate) fn from_wire(code: u8) -> Option<Self> {
        Some(match code {
            0x04 => DirectiveCode::Eof,
            0x05 => DirectiveCode::Fin,
            0x06 => DirectiveCode::Ack,
            0x07 => DirectiveCode::Metadata,
            0x08 => DirectiveCode::Nak,
            0x09 => DirectiveCode::Prompt,
            0x0c => DirectiveCode::Keepalive,
            _ => return None,
        })
    }
}

/// A contiguous `[start, end)` NAK segment.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct NakSegment {
    pub start: u64,
    pub end: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataPdu {
    pub closure_requested: bool,
    pub checksum_type: u8,
    pub file_size: u64,
    pub source_filename: String,
    pub destination_filename: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileDataPdu {
    pub offset: u64,
    pub data: Bytes,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EofPdu {
    pub condition_code: ConditionCode,
    pub file_checksum: u32,
    pub file_size: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FinPdu {
    pub condition_code: ConditionCode,
    /// True if the file was delivered completely (as opposed to partially,
    /// in the case of a cancelled or faulted transfer).
    pub delivery_complete: bool,
    /// True if the filestore ended up with the file in a usable state.
    pub file_status_retained: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AckPdu {
    pub acked_directive: DirectiveCode,
    pub condition_code: ConditionCode,
    pub transaction_status: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NakPdu {
    pub scope_start: u64,
    pub scope_end: u64,
    pub segments: ArrayVec<[NakSegment; MAX_NAK_SEGMENTS]>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct KeepAlivePdu {
    pub progress: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PromptPdu {
    pub nak_requested: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PduPayload {
    Metadata(MetadataPdu),
    FileData(FileDataPdu),
    Eof(EofPdu),
    Fin(FinPdu),
    Ack(AckPdu),
    Nak(NakPdu),
    Keepalive(KeepAlivePdu),
    Prompt(PromptPdu),
}

impl PduPayload {
    pub fn directive_code(&self) -> Option<DirectiveCode> {
        match self {
            PduPayload::Metadata(_) => Some(DirectiveCode::Metadata),
            PduPayload::FileData(_) => None,
            PduPayload::Eof(_) => Some(DirectiveCode::Eof),
            PduPayload::Fin(_) => Some(DirectiveCode::Fin),
            PduPayload::Ack(_) => Some(DirectiveCode::Ack),
            PduPayload::Nak(_) => Some(DirectiveCode::Nak),
            PduPayload::Keepalive(_) => Some(DirectiveCode::Keepalive),
            PduPayload::Prompt(_) => Some(DirectiveCode::Prompt),
        }
    }
}
