//! Session layer state machine and step driver.
//!
//! A session walks the three-step parameter negotiation and then hands the
//! RUNNING state to the transfer engine. Dispatch is keyed on
//! `(role, state, function code)` for RX and `(role, state)` for TX; these
//! tables are the only place the state changes.
//!
//! # State machine
//!
//! ```text
//!              proposal/response            ACK exchange
//! SyncFirst ───────────────────> SyncSecond ───────────> Running
//!     ^                               │                     │
//!     │        re-init                │ fault               │ fault / peer OUT_OF_SYNC
//!     └────────────────────────── OutOfSync <───────────────┘
//! ```
//!
//! Faults (unexpected function codes, unparseable frames, a failed
//! negotiation) land in `OutOfSync`; the slave announces it with an
//! `OUT_OF_SYNC` frame and both sides re-initialize to `SyncFirst`.

mod transfer;

use bytes::BytesMut;
use tracing::{debug, trace, warn};

use thermit_proto::{
    FCode, FEEDBACK_FILE_READY, FILEID_INACTIVE, FILEID_MAX, Framer, L2_MTU, MSG_SIZE_MAX,
    PAYLOAD_MAX, Packet, Parameters, enframe,
};

use crate::{
    diagnostics::Diagnostics, env::Environment, error::SessionError, progress::Progress,
};

/// Endpoint role, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initiates parameter negotiation.
    Master,
    /// Answers the master's proposal with a compromise.
    Slave,
}

/// Session protocol states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Inert sentinel before the adaptation interface is wired. A
    /// constructed session never steps in it; `step` is a no-op here.
    WaitCbConfig,
    /// Proposal/response exchange.
    SyncFirst,
    /// Acknowledgement exchange.
    SyncSecond,
    /// Data transfer.
    Running,
    /// Fault; the next TX re-initializes to `SyncFirst`.
    OutOfSync,
}

/// A single thermit endpoint bound to one link and one peer.
///
/// The session owns its [`Environment`], its stream framer and a reusable
/// outbound frame buffer. It is single-owner: exactly one caller drives it
/// through [`Session::step`], and nothing in it blocks beyond what the
/// environment's link operations do.
pub struct Session<E: Environment> {
    env: E,
    role: Role,
    state: State,
    /// Local capability set; negotiation input, restored on re-sync.
    local: Parameters,
    /// Effective parameter set (the negotiated compromise once `Running`).
    params: Parameters,
    rx: Progress,
    tx: Progress,
    framer: Framer,
    out_buf: BytesMut,
    diag: Diagnostics,
    next_file_id: u8,
    /// Slave latch: a proposal arrived, answer on the next TX.
    proposal_received: bool,
    /// Slave latch: the master's ACK arrived, confirm and run.
    ack_received: bool,
    /// Deferred transfer error: emit `WRITE_TERMINATED_FORCEFULLY` next TX.
    send_wtf: bool,
    /// Whether the peer's feedback has named our outbound file yet. Until it
    /// does, the file announcement is re-sent instead of chunks, so a lost
    /// `NEW_FILE_START` cannot strand the transfer.
    file_start_acked: bool,
    /// Lowest dirty chunk the peer last reported for our outbound file.
    peer_feedback: u8,
    /// File id of the last completed inbound transfer. Kept sticky so the
    /// "file is ready" feedback still names the file the peer is finishing.
    last_rx_file_id: u8,
    /// Whether this step's RX poll delivered a valid frame.
    traffic_this_step: bool,
    /// Clock of the last successful TX, for keepalive pacing.
    last_tx_ms: u64,
}

impl<E: Environment> Session<E> {
    /// Create a session with the default local capability set, open its link
    /// and start negotiation.
    pub fn new(link_name: &str, role: Role, env: E) -> Result<Self, SessionError> {
        Self::with_parameters(link_name, role, env, Parameters::default())
    }

    /// Create a session advertising `local` as its capability set.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidParameters`] when the local chunk size is
    ///   zero or larger than a frame payload
    /// - [`SessionError::LinkOpen`] when the environment cannot open the link
    pub fn with_parameters(
        link_name: &str,
        role: Role,
        mut env: E,
        local: Parameters,
    ) -> Result<Self, SessionError> {
        if local.chunk_size == 0 {
            return Err(SessionError::InvalidParameters {
                reason: "chunk size is zero",
            });
        }
        if usize::from(local.chunk_size) > PAYLOAD_MAX {
            return Err(SessionError::InvalidParameters {
                reason: "chunk size exceeds the frame payload",
            });
        }

        env.link_open(link_name)
            .map_err(|source| SessionError::LinkOpen {
                name: link_name.to_owned(),
                source,
            })?;
        let now = env.now_ms();
        debug!(?role, link = link_name, "session created");

        Ok(Self {
            env,
            role,
            state: State::SyncFirst,
            local,
            params: local,
            rx: Progress::idle(),
            tx: Progress::idle(),
            framer: Framer::new(),
            out_buf: BytesMut::with_capacity(L2_MTU),
            diag: Diagnostics::default(),
            next_file_id: 0,
            proposal_received: false,
            ack_received: false,
            send_wtf: false,
            file_start_acked: true,
            peer_feedback: 0,
            last_rx_file_id: FILEID_INACTIVE,
            traffic_this_step: false,
            last_tx_ms: now,
        })
    }

    /// Current protocol state.
    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// Role fixed at construction.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Effective parameters: the local capability set until negotiation
    /// completes, the compromise afterwards.
    #[must_use]
    pub fn parameters(&self) -> Parameters {
        self.params
    }

    /// Diagnostics counters, with the framer's CRC drop count folded in.
    #[must_use]
    pub fn diagnostics(&self) -> Diagnostics {
        let mut diag = self.diag;
        diag.crc_errors = self.framer.crc_errors();
        diag
    }

    /// Inbound transfer progress.
    #[must_use]
    pub fn rx_progress(&self) -> &Progress {
        &self.rx
    }

    /// Outbound transfer progress.
    #[must_use]
    pub fn tx_progress(&self) -> &Progress {
        &self.tx
    }

    /// The adaptation environment, for callers that need to reach through
    /// the session (queueing outbound files, advancing a test clock).
    pub fn environment_mut(&mut self) -> &mut E {
        &mut self.env
    }

    /// Drive the session: one RX poll, then at most one TX emission.
    ///
    /// Total — it never panics, and it only blocks as far as the
    /// environment's `link_read`/`link_write` do. Returns the post-step
    /// state.
    pub fn step(&mut self) -> State {
        if self.state == State::WaitCbConfig {
            return self.state;
        }
        self.traffic_this_step = false;
        self.poll_rx();
        self.emit_tx();
        self.state
    }

    /// Abandon the current exchange, drop any active transfers and restart
    /// negotiation from `SyncFirst`.
    pub fn reset(&mut self) {
        self.resync();
    }

    /// Read whatever the link has (at most one MTU per step — the peer emits
    /// at most one frame per step in turn) and run completed frames through
    /// the dispatcher.
    fn poll_rx(&mut self) {
        let mut bytes = [0u8; L2_MTU];
        let count = match self.env.link_read(&mut bytes) {
            Ok(count) => count,
            // A failed read is "no bytes available" for this step.
            Err(_) => 0,
        };
        for index in 0..count {
            if self.framer.follow(bytes[index]) {
                let mut body = [0u8; MSG_SIZE_MAX];
                let len = self.framer.body().len();
                body[..len].copy_from_slice(self.framer.body());
                self.framer.reset();
                self.handle_body(&body[..len]);
            }
        }
    }

    /// Parse one framed body and dispatch it by `(role, state, fcode)`.
    fn handle_body(&mut self, body: &[u8]) {
        let pkt = match Packet::parse(body) {
            Ok(pkt) => pkt,
            Err(err) => {
                warn!(role = ?self.role, state = ?self.state, %err, "dropping unparseable frame");
                self.fault("unparseable frame");
                return;
            }
        };
        trace!(role = ?self.role, state = ?self.state, fcode = ?pkt.fcode, "frame received");
        self.traffic_this_step = true;

        match self.state {
            State::SyncFirst => self.rx_sync_first(&pkt),
            State::SyncSecond => self.rx_sync_second(&pkt),
            State::Running => self.rx_running(&pkt),
            // No RX in the fault or unwired states; TX re-initializes.
            State::OutOfSync | State::WaitCbConfig => {}
        }
    }

    fn rx_sync_first(&mut self, pkt: &Packet<'_>) {
        match (self.role, pkt.fcode) {
            (Role::Slave, FCode::SyncProposal) => match Parameters::from_wire(pkt.payload) {
                Ok(proposal) => {
                    self.params = self.local.best_common(&proposal);
                    self.proposal_received = true;
                    debug!(params = ?self.params, "proposal received, compromise computed");
                }
                Err(err) => {
                    warn!(%err, "malformed sync proposal");
                    self.fault("malformed proposal");
                }
            },
            (Role::Master, FCode::SyncResponse) => match Parameters::from_wire(pkt.payload) {
                Ok(response) => {
                    // Accept only a minimal compromise: recomputing the
                    // best-common against our capabilities must leave the
                    // response unchanged.
                    if response.best_common(&self.local) == response {
                        self.params = response;
                        self.state = State::SyncSecond;
                        debug!(params = ?self.params, "response accepted");
                    } else {
                        warn!(?response, "slave compromise is not minimal");
                        self.fault("negotiation failure");
                    }
                }
                Err(err) => {
                    warn!(%err, "malformed sync response");
                    self.fault("malformed response");
                }
            },
            _ => self.fault("unexpected frame during first sync"),
        }
    }

    fn rx_sync_second(&mut self, pkt: &Packet<'_>) {
        if pkt.fcode != FCode::SyncAck {
            self.fault("unexpected frame during second sync");
            return;
        }
        match self.role {
            // The master's transition happens here; the slave confirms on
            // its next TX and transitions there.
            Role::Master => self.enter_running(),
            Role::Slave => self.ack_received = true,
        }
    }

    fn enter_running(&mut self) {
        self.state = State::Running;
        debug!(role = ?self.role, params = ?self.params, "negotiation complete");
    }

    /// Build this step's outbound frame, if the `(role, state)` table calls
    /// for one.
    fn emit_tx(&mut self) {
        match (self.role, self.state) {
            (Role::Master, State::SyncFirst) => {
                let payload = self.local.to_wire();
                self.send_frame(FCode::SyncProposal, 0, 0, &payload);
            }
            (Role::Slave, State::SyncFirst) => {
                if self.proposal_received {
                    let payload = self.params.to_wire();
                    if self.send_frame(FCode::SyncResponse, 0, 0, &payload) {
                        self.state = State::SyncSecond;
                    }
                }
            }
            (Role::Master, State::SyncSecond) => {
                // Re-sent every step until the slave's ACK arrives; the RX
                // side performs the transition.
                self.send_frame(FCode::SyncAck, 0, 0, &[]);
            }
            (Role::Slave, State::SyncSecond) => {
                if self.ack_received && self.send_frame(FCode::SyncAck, 0, 0, &[]) {
                    self.enter_running();
                }
            }
            (_, State::Running) => self.emit_running_tx(),
            (Role::Slave, State::OutOfSync) => {
                self.send_frame(FCode::OutOfSync, 0, 0, &[]);
                self.resync();
            }
            (Role::Master, State::OutOfSync) => self.resync(),
            (_, State::WaitCbConfig) => {}
        }
    }

    /// Build one frame, bracket it for the stream and write it to the link.
    ///
    /// Returns `false` when the device rejected the write; the frame is lost
    /// and only the diagnostics counter records it.
    fn send_frame(&mut self, fcode: FCode, snd_file_id: u8, snd_chunk_no: u8, payload: &[u8]) -> bool {
        let pkt = Packet {
            fcode,
            rec_file_id: self.rec_file_id_byte(),
            rec_feedback: self.feedback_byte(),
            snd_file_id,
            snd_chunk_no,
            payload,
        };
        let mut body = [0u8; MSG_SIZE_MAX];
        let len = match pkt.encode(&mut body) {
            Ok(len) => len,
            Err(err) => {
                warn!(%err, "failed to encode outbound frame");
                return false;
            }
        };
        self.out_buf.clear();
        enframe(&body[..len], &mut self.out_buf);
        match self.env.link_write(&self.out_buf) {
            Ok(()) => {
                trace!(?fcode, len, "frame sent");
                self.last_tx_ms = self.env.now_ms();
                true
            }
            Err(err) => {
                warn!(%err, "link write failed, frame lost");
                self.diag.link_errors += 1;
                false
            }
        }
    }

    /// The `RFID` byte: the file being received, the last one completed, or
    /// inactive. Sync frames carry zero.
    fn rec_file_id_byte(&self) -> u8 {
        if self.state != State::Running {
            return 0;
        }
        if self.rx.running() {
            self.rx.file_id()
        } else {
            self.last_rx_file_id
        }
    }

    /// The `RFB` byte: lowest dirty chunk while receiving, "file is ready"
    /// otherwise. Sync frames carry zero.
    fn feedback_byte(&self) -> u8 {
        if self.state != State::Running {
            return 0;
        }
        if self.rx.running() {
            self.rx.first_dirty().unwrap_or(FEEDBACK_FILE_READY)
        } else {
            FEEDBACK_FILE_READY
        }
    }

    fn fault(&mut self, reason: &'static str) {
        if self.state != State::OutOfSync {
            warn!(role = ?self.role, state = ?self.state, reason, "protocol fault");
            self.state = State::OutOfSync;
        }
    }

    /// Drop transfers and negotiation results and return to `SyncFirst`.
    fn resync(&mut self) {
        self.teardown_transfer_rx();
        self.teardown_transfer_tx();
        self.params = self.local;
        self.proposal_received = false;
        self.ack_received = false;
        self.send_wtf = false;
        self.peer_feedback = 0;
        self.last_rx_file_id = FILEID_INACTIVE;
        self.framer.reset();
        self.state = State::SyncFirst;
        self.diag.reconnections += 1;
        debug!(role = ?self.role, "re-initialized to first sync");
    }

    fn teardown_transfer_rx(&mut self) {
        if let Some(file) = self.rx.file() {
            let _ = self.env.file_close(file);
        }
        self.rx.clear();
    }

    fn teardown_transfer_tx(&mut self) {
        if let Some(file) = self.tx.file() {
            let _ = self.env.file_close(file);
        }
        self.tx.clear();
        self.file_start_acked = true;
    }

    /// Next outbound file id, advancing modulo `FILEID_MAX`. Peers tolerate
    /// reuse after wrap; `FILEID_INACTIVE` is never allocated.
    fn allocate_file_id(&mut self) -> u8 {
        let id = self.next_file_id;
        self.next_file_id = (self.next_file_id + 1) % FILEID_MAX;
        id
    }
}

impl<E: Environment> Drop for Session<E> {
    /// Teardown is the cancellation primitive: close open files, release the
    /// link.
    fn drop(&mut self) {
        self.teardown_transfer_rx();
        self.teardown_transfer_tx();
        let _ = self.env.link_close();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::env::{EnvError, FileHandle, OutgoingFile};

    /// Scripted environment: bytes in a queue, emitted frames collected.
    #[derive(Default)]
    struct StubEnv {
        inbound: VecDeque<u8>,
        outbound: Vec<Vec<u8>>,
        now: u64,
    }

    impl Environment for StubEnv {
        fn link_open(&mut self, _name: &str) -> Result<(), EnvError> {
            Ok(())
        }
        fn link_close(&mut self) -> Result<(), EnvError> {
            Ok(())
        }
        fn link_read(&mut self, buf: &mut [u8]) -> Result<usize, EnvError> {
            let mut count = 0;
            while count < buf.len() {
                match self.inbound.pop_front() {
                    Some(byte) => {
                        buf[count] = byte;
                        count += 1;
                    }
                    None => break,
                }
            }
            Ok(count)
        }
        fn link_write(&mut self, frame: &[u8]) -> Result<(), EnvError> {
            self.outbound.push(frame.to_vec());
            Ok(())
        }
        fn file_open_read(&mut self, name: &str) -> Result<(FileHandle, u32), EnvError> {
            Err(EnvError::NotFound(name.to_owned()))
        }
        fn file_open_write(&mut self, name: &str, _size: u32) -> Result<FileHandle, EnvError> {
            Err(EnvError::NotFound(name.to_owned()))
        }
        fn file_close(&mut self, _file: FileHandle) -> Result<(), EnvError> {
            Ok(())
        }
        fn file_read(
            &mut self,
            _file: FileHandle,
            _offset: u32,
            _buf: &mut [u8],
        ) -> Result<usize, EnvError> {
            Err(EnvError::InvalidHandle)
        }
        fn file_write(
            &mut self,
            _file: FileHandle,
            _offset: u32,
            _data: &[u8],
        ) -> Result<(), EnvError> {
            Err(EnvError::InvalidHandle)
        }
        fn poll_outgoing(&mut self) -> Option<OutgoingFile> {
            None
        }
        fn now_ms(&self) -> u64 {
            self.now
        }
    }

    fn session(role: Role) -> Session<StubEnv> {
        Session::new("stub0", role, StubEnv::default()).unwrap()
    }

    /// Pop the oldest emitted wire frame and strip the sentinels.
    fn pop_body(session: &mut Session<StubEnv>) -> Vec<u8> {
        let wire = session.environment_mut().outbound.remove(0);
        assert_eq!(&wire[..2], &[0xA5, 0xA5]);
        assert_eq!(&wire[wire.len() - 2..], &[0x5A, 0x5A]);
        wire[2..wire.len() - 2].to_vec()
    }

    /// Inject a packet as a framed wire image into the session's inbound
    /// queue.
    fn inject(session: &mut Session<StubEnv>, pkt: &Packet<'_>) {
        let mut body = [0u8; MSG_SIZE_MAX];
        let len = pkt.encode(&mut body).unwrap();
        let mut wire = BytesMut::new();
        enframe(&body[..len], &mut wire);
        session.environment_mut().inbound.extend(wire);
    }

    fn empty_frame(fcode: FCode) -> Packet<'static> {
        Packet {
            fcode,
            rec_file_id: 0,
            rec_feedback: 0,
            snd_file_id: 0,
            snd_chunk_no: 0,
            payload: &[],
        }
    }

    #[test]
    fn rejects_degenerate_local_parameters() {
        let zero = Parameters {
            chunk_size: 0,
            ..Parameters::default()
        };
        assert!(matches!(
            Session::with_parameters("stub0", Role::Master, StubEnv::default(), zero),
            Err(SessionError::InvalidParameters { .. })
        ));

        let oversized = Parameters {
            chunk_size: (PAYLOAD_MAX + 1) as u16,
            ..Parameters::default()
        };
        assert!(matches!(
            Session::with_parameters("stub0", Role::Master, StubEnv::default(), oversized),
            Err(SessionError::InvalidParameters { .. })
        ));
    }

    #[test]
    fn master_first_step_emits_a_proposal() {
        let mut master = session(Role::Master);
        assert_eq!(master.step(), State::SyncFirst);

        let body = pop_body(&mut master);
        let pkt = Packet::parse(&body).unwrap();
        assert_eq!(pkt.fcode, FCode::SyncProposal);
        // Sync frames carry zeroed transfer fields.
        assert_eq!(
            (pkt.rec_file_id, pkt.rec_feedback, pkt.snd_file_id, pkt.snd_chunk_no),
            (0, 0, 0, 0)
        );
        assert_eq!(pkt.payload, Parameters::default().to_wire());
    }

    #[test]
    fn slave_stays_quiet_until_a_proposal_arrives() {
        let mut slave = session(Role::Slave);
        assert_eq!(slave.step(), State::SyncFirst);
        assert!(slave.environment_mut().outbound.is_empty());
    }

    #[test]
    fn slave_answers_a_proposal_with_the_compromise() {
        let mut slave = Session::with_parameters(
            "stub0",
            Role::Slave,
            StubEnv::default(),
            Parameters {
                chunk_size: 64,
                ..Parameters::default()
            },
        )
        .unwrap();

        let proposal = Parameters::default();
        let wire = proposal.to_wire();
        inject(
            &mut slave,
            &Packet {
                payload: &wire,
                ..empty_frame(FCode::SyncProposal)
            },
        );
        assert_eq!(slave.step(), State::SyncSecond);

        let body = pop_body(&mut slave);
        let pkt = Packet::parse(&body).unwrap();
        assert_eq!(pkt.fcode, FCode::SyncResponse);
        let response = Parameters::from_wire(pkt.payload).unwrap();
        assert_eq!(response.chunk_size, 64);
        assert_eq!(response.max_file_size, 16_000);
    }

    #[test]
    fn master_accepts_a_minimal_response_and_acks() {
        let mut master = session(Role::Master);
        let response = Parameters::default();
        let wire = response.to_wire();
        inject(
            &mut master,
            &Packet {
                payload: &wire,
                ..empty_frame(FCode::SyncResponse)
            },
        );
        assert_eq!(master.step(), State::SyncSecond);
        let body = pop_body(&mut master);
        assert_eq!(Packet::parse(&body).unwrap().fcode, FCode::SyncAck);
        assert_eq!(master.parameters(), response);
    }

    #[test]
    fn master_rejects_a_non_minimal_response() {
        let mut master = session(Role::Master);
        // A response above the master's capability cannot be the compromise.
        let inflated = Parameters {
            max_file_size: 60_000,
            ..Parameters::default()
        };
        let wire = inflated.to_wire();
        inject(
            &mut master,
            &Packet {
                payload: &wire,
                ..empty_frame(FCode::SyncResponse)
            },
        );
        // The fault is raised on RX; the same step's TX re-initializes.
        assert_eq!(master.step(), State::SyncFirst);
        assert_eq!(master.diagnostics().reconnections, 1);
    }

    #[test]
    fn unexpected_frame_during_sync_faults() {
        let mut slave = session(Role::Slave);
        inject(&mut slave, &empty_frame(FCode::DataTransfer));
        slave.step();
        // Slave announced the fault before re-initializing.
        let body = pop_body(&mut slave);
        assert_eq!(Packet::parse(&body).unwrap().fcode, FCode::OutOfSync);
        assert_eq!(slave.state(), State::SyncFirst);
    }

    #[test]
    fn handshake_completes_in_three_round_trips() {
        let mut master = session(Role::Master);
        let mut slave = session(Role::Slave);

        for _ in 0..3 {
            master.step();
            let frames: Vec<Vec<u8>> = master.environment_mut().outbound.drain(..).collect();
            for frame in frames {
                slave.environment_mut().inbound.extend(frame);
            }
            slave.step();
            let frames: Vec<Vec<u8>> = slave.environment_mut().outbound.drain(..).collect();
            for frame in frames {
                master.environment_mut().inbound.extend(frame);
            }
        }
        // One more step lets the master consume the slave's final ACK.
        master.step();

        assert_eq!(master.state(), State::Running);
        assert_eq!(slave.state(), State::Running);
        assert_eq!(master.parameters(), slave.parameters());
    }

    #[test]
    fn garbage_bytes_never_leave_the_declared_states() {
        let mut slave = session(Role::Slave);
        let noise: Vec<u8> = (0u16..600).map(|value| (value % 251) as u8).collect();
        for piece in noise.chunks(32) {
            slave.environment_mut().inbound.extend(piece.iter().copied());
            let state = slave.step();
            assert!(matches!(
                state,
                State::SyncFirst | State::SyncSecond | State::Running | State::OutOfSync
            ));
        }
    }

    #[test]
    fn file_ids_wrap_below_the_inactive_marker() {
        let mut master = session(Role::Master);
        for expected in 0..FILEID_MAX {
            assert_eq!(master.allocate_file_id(), expected);
        }
        // Wrapped around; the inactive marker is never handed out.
        assert_eq!(master.allocate_file_id(), 0);
    }
}
