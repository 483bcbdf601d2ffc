//! Core state machines for a CCSDS File Delivery Protocol (CFDP) engine.
//!
//! This crate contains a fully deterministic, tick-driven implementation of
//! CFDP receive-side protocol logic (CCSDS 727.0-B-4). It performs no I/O,
//! reads no wall-clock time, and runs no background threads: all work
//! happens inside one `Engine::tick()` call, driven by PDUs and time
//! handed in through the `Bus`/`FileStore`/`Reporter`/`TransactionSource`
//! ports (§6).
//!
//! The most important type is [`Engine`], which owns a [`Pool`] of
//! [`Transaction`](transaction::Transaction) records, one [`Channel`] per
//! configured message-bus pairing, and a [`History`] of completed
//! transfers. `Transaction` contains the bulk of the protocol logic
//! (`transaction::receiver` implements the R1/R2 state machine).

#![warn(rust_2018_idioms)]
#![allow(clippy::too_many_arguments)]

pub mod channel;
pub mod chunklist;
pub mod condition;
pub mod config;
pub mod crc32;
pub mod engine;
pub mod error;
pub mod history;
pub mod pdu;
pub mod pool;
pub mod ports;
pub mod timer;
pub mod transaction;

pub use crate::channel::Channel;
pub use crate::config::{ChannelConfig, EngineConfig, PollDirConfig};
pub use crate::engine::{Command, CommandOutcome, Engine, Param, ParamValue};
pub use crate::error::{CfdpError, Result};
pub use crate::history::{History, HistoryEntry};
pub use crate::pool::{Pool, PoolHandle};
pub use crate::transaction::{Role, Transaction, TransactionKey};
