//! Transfer engine: the RUNNING-state halves of the session.
//!
//! RX applies incoming chunks at their absolute offsets (idempotent, so
//! retransmitted chunks simply overwrite) and consumes the feedback the peer
//! piggybacks for our outbound file. TX picks at most one frame per step, in
//! priority order: a deferred write-termination, the next chunk of the
//! active outbound file, a new outbound file from the availability probe,
//! else an empty data frame as feedback carrier and keepalive.

use tracing::{debug, trace, warn};

use thermit_proto::{
    CHUNK_COUNT_MAX, FCode, FEEDBACK_FILE_READY, FILE_INFO_MAX, FILEID_INACTIVE, FILENAME_MAX,
    FileInfo, PAYLOAD_MAX, Packet,
};

use crate::{
    env::Environment,
    progress::{chunk_len, chunk_offset},
};

use super::Session;

impl<E: Environment> Session<E> {
    /// RX dispatch for the RUNNING state.
    pub(super) fn rx_running(&mut self, pkt: &Packet<'_>) {
        match pkt.fcode {
            FCode::DataTransfer => self.rx_data(pkt),
            FCode::NewFileStart => self.rx_new_file(pkt),
            FCode::WriteTerminated => self.rx_write_terminated(),
            FCode::OutOfSync => {
                debug!(role = ?self.role, "peer lost sync, renegotiating");
                self.resync();
            }
            FCode::SyncProposal | FCode::SyncResponse | FCode::SyncAck => {
                self.fault("sync frame while running");
            }
        }
    }

    /// A data frame carries up to two things: a chunk for our inbound file
    /// and feedback for our outbound one. Either may be absent.
    fn rx_data(&mut self, pkt: &Packet<'_>) {
        if self.rx.running() && pkt.snd_file_id == self.rx.file_id() && !pkt.payload.is_empty() {
            self.apply_chunk(pkt.snd_chunk_no, pkt.payload);
        }

        if self.tx.running() && pkt.rec_file_id == self.tx.file_id() {
            // Feedback naming our file proves the announcement arrived.
            self.file_start_acked = true;
            if pkt.rec_feedback == FEEDBACK_FILE_READY {
                debug!(file_id = self.tx.file_id(), file = %self.tx.file_name(), "peer reports file complete");
                self.diag.sent_files += 1;
                self.teardown_transfer_tx();
                self.peer_feedback = 0;
            } else {
                self.peer_feedback = pkt.rec_feedback;
            }
        }
    }

    /// Write one received chunk at its computed offset and retire its bitmap
    /// bit. Closes out the transfer when the bitmap clears.
    fn apply_chunk(&mut self, chunk_no: u8, payload: &[u8]) {
        if chunk_no >= self.rx.chunks_needed() {
            warn!(chunk_no, "chunk index out of range, ignoring");
            return;
        }
        let expected = chunk_len(chunk_no, self.rx.file_size(), self.params.chunk_size);
        if payload.len() != usize::from(expected) {
            warn!(
                chunk_no,
                got = payload.len(),
                expected,
                "chunk length mismatch, ignoring"
            );
            return;
        }
        let Some(file) = self.rx.file() else {
            return;
        };

        let offset = chunk_offset(chunk_no, self.params.chunk_size);
        match self.env.file_write(file, offset, payload) {
            Ok(()) => {
                self.rx.set_chunk_status(chunk_no, true);
                self.diag.received_bytes += payload.len() as u64;
                trace!(
                    chunk_no,
                    progress_x100 = self.rx.progress_x100(),
                    "chunk written"
                );
                if self.rx.is_complete() {
                    self.finish_rx_file();
                }
            }
            Err(err) => {
                warn!(%err, chunk_no, "destination write failed");
                self.send_wtf = true;
            }
        }
    }

    fn finish_rx_file(&mut self) {
        debug!(file = %self.rx.file_name(), file_id = self.rx.file_id(), "incoming file complete");
        self.last_rx_file_id = self.rx.file_id();
        self.diag.received_files += 1;
        self.teardown_transfer_rx();
    }

    /// `NEW_FILE_START`: open the announced destination and arm the inbound
    /// record. Any refusal latches the deferred write-termination instead of
    /// touching an active transfer.
    fn rx_new_file(&mut self, pkt: &Packet<'_>) {
        if self.rx.running() {
            if pkt.snd_file_id == self.rx.file_id() {
                // Duplicate announcement: the sender has not seen our
                // feedback yet. Keep the transfer as it is.
                trace!(file_id = pkt.snd_file_id, "repeated file announcement ignored");
                return;
            }
            warn!("new file announced while one is in progress");
            self.send_wtf = true;
            return;
        }
        let info = match FileInfo::parse(pkt.payload) {
            Ok(info) => info,
            Err(err) => {
                warn!(%err, "malformed file info");
                self.send_wtf = true;
                return;
            }
        };
        if info.size > self.params.max_file_size {
            warn!(
                size = info.size,
                max = self.params.max_file_size,
                "announced file exceeds negotiated bound"
            );
            self.send_wtf = true;
            return;
        }
        let file = match self.env.file_open_write(&info.name, u32::from(info.size)) {
            Ok(file) => file,
            Err(err) => {
                warn!(%err, name = %info.name, "cannot open destination file");
                self.send_wtf = true;
                return;
            }
        };
        if let Err(err) = self.rx.begin(
            file,
            pkt.snd_file_id,
            &info.name,
            info.size,
            self.params.chunk_size,
        ) {
            warn!(%err, "cannot start inbound transfer");
            let _ = self.env.file_close(file);
            self.send_wtf = true;
            return;
        }
        debug!(
            name = %info.name,
            size = info.size,
            file_id = pkt.snd_file_id,
            chunks = self.rx.chunks_needed(),
            "inbound transfer started"
        );
        if self.rx.is_complete() {
            // Zero-size files carry no chunks.
            self.finish_rx_file();
        }
    }

    /// The peer gave up writing the file we are sending; drop it locally and
    /// stay in RUNNING.
    fn rx_write_terminated(&mut self) {
        if self.tx.running() {
            warn!(
                file_id = self.tx.file_id(),
                file = %self.tx.file_name(),
                "peer terminated the transfer, dropping outbound file"
            );
            self.teardown_transfer_tx();
            self.peer_feedback = 0;
        }
    }

    /// TX decision for the RUNNING state, in priority order.
    pub(super) fn emit_running_tx(&mut self) {
        if self.send_wtf {
            if self.send_frame(FCode::WriteTerminated, self.snd_file_id_byte(), 0, &[]) {
                self.send_wtf = false;
            }
            return;
        }
        if self.tx.running() {
            if self.file_start_acked {
                self.emit_chunk();
            } else {
                // The peer has not named our file yet; chunks would land in
                // the void if the announcement was lost.
                self.emit_file_start();
            }
            return;
        }
        if self.try_start_outbound() {
            return;
        }
        self.emit_idle();
    }

    /// The `SFID` byte for frames that carry no chunk.
    fn snd_file_id_byte(&self) -> u8 {
        if self.tx.running() {
            self.tx.file_id()
        } else {
            FILEID_INACTIVE
        }
    }

    /// Read and emit the chunk under the cursor, then advance it.
    fn emit_chunk(&mut self) {
        if self.tx.chunks_needed() == 0 {
            // Zero-length file: nothing to send, wait for the peer's
            // completion report.
            self.emit_idle();
            return;
        }
        let chunk_no = self.tx.chunk_no();
        let len = chunk_len(chunk_no, self.tx.file_size(), self.params.chunk_size);
        let offset = chunk_offset(chunk_no, self.params.chunk_size);
        let Some(file) = self.tx.file() else {
            self.teardown_transfer_tx();
            return;
        };

        let mut payload = [0u8; PAYLOAD_MAX];
        let want = usize::from(len);
        match self.env.file_read(file, offset, &mut payload[..want]) {
            Ok(read) if read == want => {
                let file_id = self.tx.file_id();
                if self.send_frame(FCode::DataTransfer, file_id, chunk_no, &payload[..want]) {
                    self.diag.sent_bytes += want as u64;
                    self.advance_chunk_cursor();
                }
            }
            Ok(_) | Err(_) => {
                warn!(chunk_no, file = %self.tx.file_name(), "source read failed, aborting outbound transfer");
                self.teardown_transfer_tx();
                self.send_wtf = true;
            }
        }
    }

    /// Advance the chunk cursor after emitting `chunk_no`. Past the last
    /// chunk the cursor wraps to the peer's lowest dirty chunk, which is
    /// what drives retransmission until the bitmap clears on the far side.
    fn advance_chunk_cursor(&mut self) {
        let next = (u16::from(self.tx.chunk_no()) + 1) % CHUNK_COUNT_MAX as u16;
        if next < u16::from(self.tx.chunks_needed()) {
            self.tx.set_chunk_no(next as u8);
        } else if self.peer_feedback < self.tx.chunks_needed() {
            self.tx.set_chunk_no(self.peer_feedback);
            self.diag.retransmits += 1;
            trace!(chunk_no = self.peer_feedback, "retransmission pass");
        }
        // Otherwise hold position until fresher feedback arrives.
    }

    /// Probe the environment for a new outbound file; returns `true` when a
    /// `NEW_FILE_START` was emitted.
    fn try_start_outbound(&mut self) -> bool {
        let Some(outgoing) = self.env.poll_outgoing() else {
            return false;
        };
        if outgoing.size > self.params.max_file_size {
            warn!(
                name = %outgoing.name,
                size = outgoing.size,
                max = self.params.max_file_size,
                "outgoing file exceeds negotiated bound, skipping"
            );
            return false;
        }
        if outgoing.name.len() > FILENAME_MAX {
            warn!(name = %outgoing.name, "outgoing file name too long, skipping");
            return false;
        }
        let (file, size_on_disk) = match self.env.file_open_read(&outgoing.name) {
            Ok(opened) => opened,
            Err(err) => {
                warn!(%err, name = %outgoing.name, "cannot open outgoing file, skipping");
                return false;
            }
        };
        if size_on_disk != u32::from(outgoing.size) {
            warn!(
                name = %outgoing.name,
                announced = outgoing.size,
                size_on_disk,
                "size changed since the probe, skipping"
            );
            let _ = self.env.file_close(file);
            return false;
        }

        let file_id = self.allocate_file_id();
        if let Err(err) = self.tx.begin(
            file,
            file_id,
            &outgoing.name,
            outgoing.size,
            self.params.chunk_size,
        ) {
            warn!(%err, "cannot start outbound transfer");
            let _ = self.env.file_close(file);
            return false;
        }
        self.peer_feedback = 0;
        self.file_start_acked = false;

        debug!(
            name = %outgoing.name,
            size = outgoing.size,
            file_id,
            chunks = self.tx.chunks_needed(),
            "outbound transfer started"
        );
        self.emit_file_start();
        true
    }

    /// Announce (or re-announce) the active outbound file.
    fn emit_file_start(&mut self) {
        let info = FileInfo {
            size: self.tx.file_size(),
            name: self.tx.file_name().to_owned(),
        };
        let mut payload = [0u8; FILE_INFO_MAX];
        let len = match info.encode(&mut payload) {
            Ok(len) => len,
            Err(err) => {
                warn!(%err, "cannot encode file info");
                self.teardown_transfer_tx();
                return;
            }
        };
        self.send_frame(FCode::NewFileStart, self.tx.file_id(), 0, &payload[..len]);
    }

    /// Empty `DATA_TRANSFER` as feedback carrier and keepalive. Emitted
    /// whenever a transfer is active in either direction or the peer talked
    /// this step; when fully idle, only after `keep_alive_ms` of TX silence.
    fn emit_idle(&mut self) {
        let idle_for = self.env.now_ms().saturating_sub(self.last_tx_ms);
        if self.rx.running()
            || self.tx.running()
            || self.traffic_this_step
            || idle_for >= u64::from(self.params.keep_alive_ms)
        {
            self.send_frame(FCode::DataTransfer, self.snd_file_id_byte(), 0, &[]);
        }
    }
}
