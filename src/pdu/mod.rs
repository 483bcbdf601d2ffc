//! The on-wire CFDP PDU family: a typed "Logical PDU" union plus a codec
//! that encodes/decodes it bit-exactly per CCSDS 727.0-B-4 (§4.3).

pub mod codec;
pub mod header;
pub mod payload;

pub use codec::{decode, encode, LogicalPdu};
pub use header::{Direction, PduHeader, PduType, TransmissionMode, VarWidthId};
pub use payload::{
    AckPdu, DirectiveCode, EofPdu, FileDataPdu, FinPdu, KeepAlivePdu, MetadataPdu, NakPdu,
    NakSegment, PduPayload, PromptPdu,
};
