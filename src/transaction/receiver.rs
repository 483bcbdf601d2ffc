//! The R-FSM: drives a `Transaction` with `Role::R1`/`Role::R2` through
//! §4.4's state diagram from incoming PDUs and tick-driven timer/CRC work.
//!
//! Three entry points are called by the channel/engine machinery (§4.5,
//! C8): [`on_pdu_received`] once per inbound PDU addressed to this
//! transaction, [`tick`] once per wakeup for every active transaction, and
//! the `cancel`/`suspend`/`resume`/`abandon` command handlers.

use tinyvec::ArrayVec;

use crate::chunklist::MAX_NAK_SEGMENTS;
use crate::condition::ConditionCode;
use crate::config::ChannelConfig;
use crate::crc32;
use crate::pdu::{
    AckPdu, Direction, DirectiveCode, EofPdu, FinPdu, LogicalPdu, NakPdu, NakSegment, PduHeader,
    PduPayload, PduType, TransmissionMode, VarWidthId,
};
use crate::ports::{EventId, FileStore, Reporter, Severity};

use super::{CompletionReason, Substate, Transaction};

fn header(txn: &Transaction, pdu_type: PduType, direction: Direction) -> PduHeader {
    PduHeader {
        pdu_type,
        direction,
        mode: if txn.role.is_class2() {
            TransmissionMode::Acknowledged
        } else {
            TransmissionMode::Unacknowledged
        },
        crc_flag: true,
        large_file: txn.large_file,
        source_entity_id: VarWidthId::narrowest(txn.key.source_eid),
        destination_entity_id: VarWidthId::narrowest(txn.dest_eid),
        sequence_number: VarWidthId::narrowest(txn.key.sequence_number),
    }
}

fn restart_inactivity(txn: &mut Transaction, channel: &ChannelConfig, ticks_per_second: u64) {
    if txn.flags.suspended {
        return;
    }
    txn.timers
        .inactivity
        .init_rel_sec(channel.inactivity_timer_s(), ticks_per_second);
}

/// Latch the first fault a transaction sees (later faults don't override
/// the original reason) and drive it towards completion. Class 1
/// transactions have no sender to negotiate closure with, so they finish
/// immediately; Class 2 transactions still owe the sender a FIN.
fn fault<R: Reporter>(
    txn: &mut Transaction,
    reporter: &mut R,
    code: ConditionCode,
    event: EventId,
    detail: &str,
) {
    if txn.status_code.is_success() {
        txn.status_code = code;
    }
    reporter.event(Severity::Error, event, detail);
    if txn.role.is_class2() {
        txn.flags.send_nak = false;
        txn.flags.send_fin = true;
        txn.substate = Substate::SendFin;
    } else {
        finish(txn, CompletionReason::Dropped);
    }
}

fn finish(txn: &mut Transaction, reason: CompletionReason) {
    txn.substate = Substate::Complete;
    txn.major = super::MajorState::Finished;
    txn.completion_reason = Some(reason);
}

/// Handle one inbound PDU addressed to this transaction (§4.4's
/// PDU-triggered edges). Every PDU — valid or not — restarts the
/// inactivity timer unless the transaction is suspended (§9 O3).
pub fn on_pdu_received<F: FileStore, R: Reporter>(
    txn: &mut Transaction,
    pdu: &LogicalPdu,
    channel: &ChannelConfig,
    ticks_per_second: u64,
    tmp_dir: &str,
    file: &mut F,
    reporter: &mut R,
) {
    if txn.substate == Substate::Complete {
        return;
    }
    if !txn.large_file && pdu.header.large_file {
        txn.large_file = pdu.header.large_file;
    }
    if txn.flags.suspended {
        // Still record a first MD's file size so coverage bookkeeping isn't
        // lost across the suspend, but take no other action (§9 O3).
        if let PduPayload::Metadata(md) = &pdu.payload {
            if !txn.flags.md_recv {
                txn.file_size_expected = Some(md.file_size);
            }
        }
        return;
    }

    restart_inactivity(txn, channel, ticks_per_second);

    match &pdu.payload {
        PduPayload::Metadata(md) => handle_metadata(txn, md, file, reporter),
        PduPayload::FileData(fd) => {
            handle_file_data(txn, fd, channel, ticks_per_second, tmp_dir, file, reporter)
        }
        PduPayload::Eof(eof) => handle_eof(txn, eof, reporter),
        PduPayload::Ack(ack) if ack.acked_directive == DirectiveCode::Fin => {
            handle_fin_ack(txn, reporter)
        }
        _ => {
            reporter.event(
                Severity::Debug,
                EventId::PduDropped,
                "PDU not meaningful to a receive transaction in its current state",
            );
        }
    }
}

fn handle_metadata<F: FileStore, R: Reporter>(
    txn: &mut Transaction,
    md: &crate::pdu::MetadataPdu,
    file: &mut F,
    reporter: &mut R,
) {
    if txn.flags.md_recv {
        return;
    }
    txn.file_size_expected = Some(md.file_size);
    txn.fnames.source_name = md.source_filename.clone();
    txn.fnames.destination_name = md.destination_filename.clone();
    txn.flags.md_recv = true;

    match txn.substate {
        Substate::WaitMd => {
            match file.open_write(&md.destination_filename) {
                Ok(handle) => txn.file_handle = Some(handle),
                Err(_) => {
                    fault(
                        txn,
                        reporter,
                        ConditionCode::FilestoreRejection,
                        EventId::FilestoreRejection,
                        "could not open destination file for writing",
                    );
                    return;
                }
            }
            txn.substate = Substate::RecvFileData;
        }
        Substate::RecvFileData => {
            // File data arrived before metadata: the bytes already written
            // went to a temp file. Now that we know the real destination,
            // move it into place.
            if let Some(temp_path) = txn.fnames.temp_name.take() {
                if let Some(handle) = txn.file_handle.take() {
                    let _ = file.close(handle);
                }
                if file.rename(&temp_path, &md.destination_filename).is_err() {
                    fault(
                        txn,
                        reporter,
                        ConditionCode::FilestoreRejection,
                        EventId::FilestoreRejection,
                        "could not move temp file to destination path",
                    );
                    return;
                }
                match file.open_write(&md.destination_filename) {
                    Ok(handle) => txn.file_handle = Some(handle),
                    Err(_) => {
                        fault(
                            txn,
                            reporter,
                            ConditionCode::FilestoreRejection,
                            EventId::FilestoreRejection,
                            "could not reopen destination file after move",
                        );
                    }
                }
            }
        }
        _ => {}
    }
}

fn handle_file_data<F: FileStore, R: Reporter>(
    txn: &mut Transaction,
    fd: &crate::pdu::FileDataPdu,
    channel: &ChannelConfig,
    ticks_per_second: u64,
    tmp_dir: &str,
    file: &mut F,
    reporter: &mut R,
) {
    let end = fd.offset + fd.data.len() as u64;
    if let Some(expected) = txn.file_size_expected {
        if end > expected {
            reporter.event(
                Severity::Error,
                EventId::FileSizeError,
                "file data PDU extends past the advertised file size",
            );
            if txn.status_code.is_success() {
                txn.status_code = ConditionCode::FileSizeError;
            }
            return;
        }
    }

    if txn.substate == Substate::WaitMd {
        match file.open_tempfile(tmp_dir) {
            Ok((handle, path)) => {
                txn.file_handle = Some(handle);
                txn.fnames.temp_name = Some(path);
            }
            Err(_) => {
                fault(
                    txn,
                    reporter,
                    ConditionCode::FilestoreRejection,
                    EventId::FilestoreRejection,
                    "could not open a temp file for out-of-order file data",
                );
                return;
            }
        }
        txn.substate = Substate::RecvFileData;
    }

    if let Some(handle) = txn.file_handle {
        if file.write(handle, fd.offset, &fd.data).is_err() {
            fault(
                txn,
                reporter,
                ConditionCode::FilestoreRejection,
                EventId::FilestoreRejection,
                "write to destination/temp file failed",
            );
            return;
        }
    }

    let before = txn.chunks.total_bytes();
    txn.chunks.add(fd.offset, fd.data.len() as u64);
    let after = txn.chunks.total_bytes();
    txn.file_size_received_bytes = after;
    if after > before {
        // §9 O2: any coverage-increasing file data resets the NAK retry
        // counter, since it shows the sender is still making progress.
        txn.counters.nak_retries = 0;
    }

    txn.timers.ack.init_rel_sec(channel.ack_timer_s(), ticks_per_second);
}

fn handle_eof<R: Reporter>(txn: &mut Transaction, eof: &EofPdu, reporter: &mut R) {
    if txn.flags.eof_recv {
        return;
    }
    txn.flags.eof_recv = true;
    txn.crc_expected = eof.file_checksum;
    txn.file_size_expected.get_or_insert(eof.file_size);

    if !eof.condition_code.is_success() {
        // Sender cancelled/faulted the transfer; fold the peer's condition
        // code into our own record and finish without demanding a NAK/FIN
        // round trip.
        if txn.status_code.is_success() {
            txn.status_code = eof.condition_code;
        }
        reporter.event(
            Severity::Info,
            EventId::TransactionCompleted { code: eof.condition_code },
            "sender reported a non-success EOF condition code",
        );
        finish(txn, CompletionReason::Canceled);
        return;
    }

    if txn.role.is_class2() {
        txn.flags.send_ack = true;
    }
    if txn.substate == Substate::WaitMd || txn.substate == Substate::RecvFileData {
        txn.substate = Substate::WaitEof;
    }
}

fn handle_fin_ack<R: Reporter>(txn: &mut Transaction, reporter: &mut R) {
    if txn.substate != Substate::WaitFinAck {
        return;
    }
    reporter.event(
        Severity::Info,
        EventId::TransactionCompleted { code: txn.status_code },
        "FIN acknowledged by sender",
    );
    let reason = if txn.flags.canceled {
        CompletionReason::Canceled
    } else {
        CompletionReason::Completed
    };
    finish(txn, reason);
}

fn completion_ready(txn: &Transaction) -> bool {
    txn.flags.md_recv
        && txn.flags.eof_recv
        && txn
            .file_size_expected
            .map_or(false, |len| txn.chunks.is_covered(len))
}

/// Consume up to `budget` bytes of chunked CRC verification (§4.5.1),
/// reading back from the file via `file`. Returns the number of bytes
/// actually consumed so the caller's shared per-wakeup budget can be
/// debited.
fn step_crc<F: FileStore, R: Reporter>(
    txn: &mut Transaction,
    channel: &ChannelConfig,
    ticks_per_second: u64,
    file: &mut F,
    reporter: &mut R,
    budget: u32,
) -> u32 {
    let expected = match txn.file_size_expected {
        Some(n) => n,
        None => return 0,
    };
    if txn.crc_bytes_consumed >= expected {
        return 0;
    }
    let remaining = expected - txn.crc_bytes_consumed;
    let want = remaining.min(budget as u64) as usize;
    if want == 0 {
        return 0;
    }
    let handle = match txn.file_handle {
        Some(h) => h,
        None => return 0,
    };

    let mut buf = vec![0u8; want];
    let n = match file.read(handle, txn.crc_bytes_consumed, &mut buf) {
        Ok(n) => n,
        Err(_) => {
            fault(
                txn,
                reporter,
                ConditionCode::FilestoreRejection,
                EventId::FilestoreRejection,
                "read-back for CRC verification failed",
            );
            return 0;
        }
    };
    if n == 0 {
        return 0;
    }
    txn.crc_running = crc32::update(txn.crc_running, &buf[..n]);
    txn.crc_bytes_consumed += n as u64;
    txn.crc_verification_started = true;

    if txn.crc_bytes_consumed >= expected {
        let final_crc = crc32::finalize(txn.crc_running);
        if final_crc == txn.crc_expected {
            txn.flags.crc_ok = true;
            complete_transfer(txn, channel, ticks_per_second, reporter);
        } else {
            fault(
                txn,
                reporter,
                ConditionCode::FileChecksumFailure,
                EventId::FileChecksumFailure,
                "destination file checksum does not match the sender's",
            );
        }
    }
    n as u32
}

fn complete_transfer<R: Reporter>(
    txn: &mut Transaction,
    channel: &ChannelConfig,
    ticks_per_second: u64,
    reporter: &mut R,
) {
    reporter.event(
        Severity::Info,
        EventId::TransactionCompleted { code: txn.status_code },
        "file received and verified",
    );
    if txn.role.is_class2() {
        txn.flags.send_fin = true;
        txn.substate = Substate::SendFin;
        txn.timers
            .ack
            .init_rel_sec(channel.ack_timer_s(), ticks_per_second);
    } else {
        finish(txn, CompletionReason::Completed);
    }
}

fn build_nak(txn: &Transaction) -> NakPdu {
    if !txn.flags.md_recv {
        // CCSDS convention: scope (0, 0) with no segments requests a
        // metadata retransmit.
        return NakPdu {
            scope_start: 0,
            scope_end: 0,
            segments: ArrayVec::new(),
        };
    }
    let mut segments: ArrayVec<[NakSegment; MAX_NAK_SEGMENTS]> = ArrayVec::new();
    let total = txn.file_size_expected.unwrap_or(0);
    txn.chunks.compute_gaps(total, 0, MAX_NAK_SEGMENTS, |_, gap| {
        segments.push(NakSegment {
            start: gap.offset,
            end: gap.end(),
        });
    });
    NakPdu {
        scope_start: 0,
        scope_end: total,
        segments,
    }
}

fn build_fin(txn: &Transaction) -> FinPdu {
    FinPdu {
        condition_code: txn.status_code,
        delivery_complete: txn.status_code.is_success(),
        file_status_retained: txn.file_handle.is_some() || txn.status_code.is_success(),
    }
}

/// Advance one wakeup's worth of timer/CRC/retransmit-request work for this
/// transaction. Appends any PDUs it needs to send to `outbox` and returns
/// the number of CRC-verification bytes it consumed from `crc_budget`.
pub fn tick<F: FileStore, R: Reporter>(
    txn: &mut Transaction,
    channel: &ChannelConfig,
    ticks_per_second: u64,
    file: &mut F,
    reporter: &mut R,
    crc_budget: u32,
    outbox: &mut Vec<LogicalPdu>,
) -> u32 {
    if txn.substate == Substate::Complete {
        return 0;
    }
    txn.timers.tick_all(txn.flags.suspended);
    if txn.flags.suspended {
        return 0;
    }

    if txn.timers.inactivity.take_expired() && !txn.flags.inactivity_fired {
        txn.flags.inactivity_fired = true;
        fault(
            txn,
            reporter,
            ConditionCode::InactivityTimerExpired,
            EventId::InactivityTimerExpired,
            "no PDU received before the inactivity timer expired",
        );
    }

    let mut crc_spent = 0;
    if completion_ready(txn) && !txn.flags.crc_ok {
        crc_spent = step_crc(txn, channel, ticks_per_second, file, reporter, crc_budget);
    }

    if txn.role.is_class2() {
        tick_class2(txn, channel, ticks_per_second, reporter, outbox);
    }

    crc_spent
}

fn tick_class2<R: Reporter>(
    txn: &mut Transaction,
    channel: &ChannelConfig,
    ticks_per_second: u64,
    reporter: &mut R,
    outbox: &mut Vec<LogicalPdu>,
) {
    if txn.flags.send_ack {
        outbox.push(LogicalPdu {
            header: header(txn, PduType::Directive, Direction::ToReceiver),
            payload: PduPayload::Ack(AckPdu {
                acked_directive: DirectiveCode::Eof,
                condition_code: txn.status_code,
                transaction_status: 0,
            }),
        });
        txn.flags.send_ack = false;
    }

    match txn.substate {
        Substate::RecvFileData | Substate::WaitEof => {
            let gaps_remain = txn
                .file_size_expected
                .map_or(true, |len| !txn.chunks.is_covered(len));
            txn.flags.send_nak = !txn.flags.md_recv || gaps_remain;

            if txn.flags.send_nak && txn.timers.nak.take_expired() {
                maybe_send_nak(txn, channel, ticks_per_second, reporter, outbox);
            } else if txn.flags.send_nak && !txn.timers.nak.is_armed() {
                txn.timers.nak.init_rel_sec(channel.nak_timer_s(), ticks_per_second);
            }
        }
        Substate::SendFin => {
            outbox.push(LogicalPdu {
                header: header(txn, PduType::Directive, Direction::ToReceiver),
                payload: PduPayload::Fin(build_fin(txn)),
            });
            txn.flags.send_fin = false;
            txn.substate = Substate::WaitFinAck;
            txn.timers.ack.init_rel_sec(channel.ack_timer_s(), ticks_per_second);
        }
        Substate::WaitFinAck => {
            if txn.timers.ack.take_expired() {
                txn.counters.ack_retries += 1;
                if txn.counters.ack_retries > channel.ack_limit() {
                    reporter.event(
                        Severity::Error,
                        EventId::AckLimitReached,
                        "FIN retransmission limit reached without an ACK",
                    );
                    if txn.status_code.is_success() {
                        txn.status_code = ConditionCode::AckLimitReached;
                    }
                    finish(txn, CompletionReason::Abandoned);
                    return;
                }
                outbox.push(LogicalPdu {
                    header: header(txn, PduType::Directive, Direction::ToReceiver),
                    payload: PduPayload::Fin(build_fin(txn)),
                });
                txn.timers.ack.init_rel_sec(channel.ack_timer_s(), ticks_per_second);
            }
        }
        _ => {}
    }
}

fn maybe_send_nak<R: Reporter>(
    txn: &mut Transaction,
    channel: &ChannelConfig,
    ticks_per_second: u64,
    reporter: &mut R,
    outbox: &mut Vec<LogicalPdu>,
) {
    txn.counters.nak_retries += 1;
    if txn.counters.nak_retries > channel.nak_limit() {
        fault(
            txn,
            reporter,
            ConditionCode::NakLimitReached,
            EventId::NakLimitReached,
            "NAK retry limit reached without filling the remaining gaps",
        );
        return;
    }
    outbox.push(LogicalPdu {
        header: header(txn, PduType::Directive, Direction::ToReceiver),
        payload: PduPayload::Nak(build_nak(txn)),
    });
    txn.timers.nak.init_rel_sec(channel.nak_timer_s(), ticks_per_second);
}

/// Cancel a transaction on local request (§10.5 Cancel vs Abandon): the
/// transfer stops making progress but a Class 2 receiver still attempts to
/// notify the sender with a FIN carrying `CancelRequestReceived`.
pub fn cancel(txn: &mut Transaction) {
    if txn.substate == Substate::Complete {
        return;
    }
    txn.flags.canceled = true;
    if txn.status_code.is_success() {
        txn.status_code = ConditionCode::CancelRequestReceived;
    }
    if txn.role.is_class2() {
        txn.flags.send_nak = false;
        txn.flags.send_fin = true;
        txn.substate = Substate::SendFin;
    } else {
        finish(txn, CompletionReason::Canceled);
    }
}

/// Abandon a transaction unconditionally: no FIN is sent, no further
/// bookkeeping happens, the slot is simply freed to history (§10.5).
pub fn abandon(txn: &mut Transaction) {
    if txn.status_code.is_success() {
        txn.status_code = ConditionCode::CancelRequestReceived;
    }
    finish(txn, CompletionReason::Abandoned);
}

/// Suspend a transaction: freeze its three timers in place (§9 O3) and
/// stop reacting to PDUs beyond minimal file-size bookkeeping.
pub fn suspend(txn: &mut Transaction) {
    if txn.substate == Substate::Complete {
        return;
    }
    txn.flags.suspended = true;
    if txn.status_code.is_success() {
        txn.status_code = ConditionCode::SuspendRequestReceived;
    }
}

/// Resume a suspended transaction: timers pick back up with their frozen
/// remaining counts (no re-arming), since `Timer::tick_once` was simply
/// never called while suspended.
pub fn resume(txn: &mut Transaction) {
    txn.flags.suspended = false;
    if txn.status_code == ConditionCode::SuspendRequestReceived {
        txn.status_code = ConditionCode::NoError;
    }
}
