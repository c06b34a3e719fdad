use std::collections::BTreeMap;

use gw_common::{
    AdminReplyCode, Clock, ConnectionId, DisconnectReason, LibraryId, SequenceIndex, SessionId,
    StreamStatus, Transport, TransportRecord, GATEWAY_LIBRARY_ID,
};
use tracing::{debug, info, instrument, warn};

use crate::error::SessionError;
use crate::wire::{self, FixHeader, MessageBuilder};

/// `state ∈ {...}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    SentLogon,
    AwaitingLogon,
    Active,
    AwaitingResend,
    AwaitingLogout,
    Disconnected,
    Disabled,
}

/// Governs whether sequence numbers survive a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceMode {
    Persistent,
    Transient,
}

/// Result of feeding one inbound frame to [`Session::on_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Deliver one or more application payloads to the consumer, in
    /// ascending `MsgSeqNum` order. More than one payload means a resend
    /// gap just closed and previously-queued messages were released
    /// alongside the message that closed it.
    Deliver(Vec<Vec<u8>>),
    /// An admin message was processed; nothing to hand to the consumer.
    Consume,
    /// The session is now `DISCONNECTED`; no further calls should deliver
    /// messages until a fresh `connect`/acceptor-side Logon.
    Disconnect(DisconnectReason),
    /// The message was out of sequence and has been queued for delivery
    /// once the resend gap closes.
    Queue,
}

/// Fixed construction parameters, concretizing the gateway's
/// configuration surface (read from TOML by the embedding crate).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub session_id: SessionId,
    pub connection_id: ConnectionId,
    pub library_id: LibraryId,
    pub sender_comp_id: String,
    pub target_comp_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub heartbeat_interval_ms: u64,
    pub persistence_mode: PersistenceMode,
    /// Exposed with an explicit default of `false`.
    pub allow_lower_seqnum_logon: bool,
    pub stream_id: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SentKind {
    Admin,
    Application,
}

#[derive(Debug, Clone)]
struct SentRecord {
    kind: SentKind,
    msg_type: String,
    body_fields: Vec<(u32, String)>,
    sending_time_ns: u64,
}

/// Owns the lifecycle of one FIX session, the largest single component of
/// the core engine.
pub struct Session<C: Clock, T: Transport> {
    config: SessionConfig,
    state: SessionState,
    next_sent_seq_no: u64,
    next_recv_seq_no: u64,
    sequence_index: SequenceIndex,
    last_sent_time: u64,
    last_received_time: u64,
    awaiting_resend_from: Option<u64>,
    awaiting_resend_to: Option<u64>,
    /// Position returned by the Logout that moved the session into
    /// `AWAITING_LOGOUT`, replayed on any further idempotent
    /// `start_logout` call instead of recomputing one.
    logout_position: Option<i64>,
    disconnect_deadline: Option<u64>,
    test_request_sent_at: Option<u64>,
    pending_deliveries: BTreeMap<u64, Vec<u8>>,
    sent_log: BTreeMap<u64, SentRecord>,
    pending_resend_replay: Option<(u64, u64)>,
    clock: C,
    transport: T,
}

impl<C: Clock, T: Transport> Session<C, T> {
    pub fn new(config: SessionConfig, clock: C, transport: T) -> Self {
        let now = clock.now_ns();
        Self {
            config,
            state: SessionState::Connected,
            next_sent_seq_no: 1,
            next_recv_seq_no: 1,
            sequence_index: 0,
            last_sent_time: now,
            last_received_time: now,
            awaiting_resend_from: None,
            awaiting_resend_to: None,
            logout_position: None,
            disconnect_deadline: None,
            test_request_sent_at: None,
            pending_deliveries: BTreeMap::new(),
            sent_log: BTreeMap::new(),
            pending_resend_replay: None,
            clock,
            transport,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn next_sent_seq_no(&self) -> u64 {
        self.next_sent_seq_no
    }

    pub fn next_recv_seq_no(&self) -> u64 {
        self.next_recv_seq_no
    }

    pub fn sequence_index(&self) -> SequenceIndex {
        self.sequence_index
    }

    pub fn library_id(&self) -> LibraryId {
        self.config.library_id
    }

    /// Initiator-side `connect`: `CONNECTED -> SENT_LOGON`, emitting Logon.
    #[instrument(skip(self), fields(session_id = self.config.session_id))]
    pub fn connect(&mut self) -> Result<i64, SessionError> {
        if self.state != SessionState::Connected {
            return Err(SessionError::NotConnected);
        }
        let now = self.clock.now_ns();
        let fields = vec![(108u32, self.config.heartbeat_interval_ms.to_string())];
        let position = self.send_admin(wire::MSG_TYPE_LOGON, &fields, now)?;
        self.state = SessionState::SentLogon;
        info!(new_state = ?self.state, "logon sent");
        Ok(position)
    }

    /// `on_message(header, body, receive_time_ns) -> Action`. `raw` is a
    /// complete SOH-delimited frame; decoding failures are translated into
    /// a terminal `Disconnect(InvalidMessage)` rather than returned as an
    /// error.
    #[instrument(skip(self, raw), fields(session_id = self.config.session_id))]
    pub fn on_message(&mut self, raw: &[u8], receive_time_ns: u64) -> Action {
        if matches!(self.state, SessionState::Disconnected | SessionState::Disabled) {
            return Action::Consume;
        }

        let header = match wire::decode_header(raw) {
            Ok(h) => h,
            Err(reason) => {
                warn!(reason, "malformed frame, disconnecting");
                return self.transition_disconnected(DisconnectReason::InvalidMessage);
            }
        };

        self.last_received_time = receive_time_ns;
        self.test_request_sent_at = None;

        let expected = self.next_recv_seq_no;

        // A Logon with a lower-than-expected seqnum is
        // configuration-dependent, not a blanket protocol error
        // like any other message type's regression would be.
        if header.msg_type == wire::MSG_TYPE_LOGON && header.msg_seq_num < expected {
            return if self.config.allow_lower_seqnum_logon {
                self.next_recv_seq_no = header.msg_seq_num + 1;
                self.handle_logon(header, receive_time_ns)
            } else {
                warn!(seq = header.msg_seq_num, expected, "lower-seqnum logon rejected");
                self.transition_disconnected(DisconnectReason::AuthenticationRejected)
            };
        }

        if header.msg_seq_num < expected {
            if header.poss_dup {
                debug!(seq = header.msg_seq_num, "duplicate replay, ignoring");
                return Action::Consume;
            }
            warn!(seq = header.msg_seq_num, expected, "out-of-sequence, disconnecting");
            return self.transition_disconnected(DisconnectReason::OutOfSequence);
        }

        if header.msg_seq_num > expected {
            return self.handle_gap(header, raw, receive_time_ns);
        }

        self.next_recv_seq_no += 1;
        self.dispatch_in_sequence(header, raw, receive_time_ns)
    }

    fn handle_gap(&mut self, header: FixHeader, raw: &[u8], now_ns: u64) -> Action {
        let expected = self.next_recv_seq_no;
        self.pending_deliveries.insert(header.msg_seq_num, raw.to_vec());

        if self.state != SessionState::AwaitingResend {
            self.awaiting_resend_from = Some(expected);
            self.awaiting_resend_to = Some(header.msg_seq_num - 1);
            let from = expected;
            let to = header.msg_seq_num - 1;
            if self.emit_resend_request(from, to, now_ns).is_err() {
                warn!(from, to, "resend request back-pressured, will retry on poll");
            }
            self.state = SessionState::AwaitingResend;
            info!(from, to, "gap detected, requesting resend");
        }
        Action::Queue
    }

    fn dispatch_in_sequence(&mut self, header: FixHeader, raw: &[u8], now_ns: u64) -> Action {
        match header.msg_type.as_str() {
            wire::MSG_TYPE_LOGON => self.handle_logon(header, now_ns),
            wire::MSG_TYPE_LOGOUT => self.handle_logout(now_ns),
            wire::MSG_TYPE_HEARTBEAT => Action::Consume,
            wire::MSG_TYPE_TEST_REQUEST => self.handle_test_request(header, now_ns),
            wire::MSG_TYPE_RESEND_REQUEST => self.handle_resend_request(header, now_ns),
            wire::MSG_TYPE_SEQUENCE_RESET => self.handle_sequence_reset(header),
            wire::MSG_TYPE_REJECT => {
                warn!("received Reject");
                Action::Consume
            }
            _ => self.deliver_application(raw),
        }
    }

    fn deliver_application(&mut self, raw: &[u8]) -> Action {
        let mut delivered = vec![raw.to_vec()];
        if self.state == SessionState::AwaitingResend {
            if let Some(to) = self.awaiting_resend_to {
                if self.next_recv_seq_no > to {
                    delivered.extend(self.drain_pending_deliveries());
                    self.state = SessionState::Active;
                    self.awaiting_resend_from = None;
                    self.awaiting_resend_to = None;
                    info!("resend gap closed, returning to ACTIVE");
                }
            }
        }
        Action::Deliver(delivered)
    }

    fn drain_pending_deliveries(&mut self) -> Vec<Vec<u8>> {
        let mut drained = Vec::new();
        loop {
            match self.pending_deliveries.first_key_value() {
                Some((&seq, _)) if seq == self.next_recv_seq_no => {
                    let body = self.pending_deliveries.remove(&seq).expect("key observed above");
                    self.next_recv_seq_no += 1;
                    drained.push(body);
                }
                _ => break,
            }
        }
        drained
    }

    fn handle_logon(&mut self, header: FixHeader, now_ns: u64) -> Action {
        if header.reset_seq_num_flag {
            // A reset is only "expected" while this Logon is part of the
            // handshake itself (a fresh acceptor-side attach, or the
            // initiator awaiting its own Logon's reply); a reset arriving
            // once the session is already ACTIVE is a mid-session surprise.
            let reset_expected = matches!(self.state, SessionState::Connected | SessionState::SentLogon);
            if self.config.persistence_mode == PersistenceMode::Persistent && !reset_expected {
                warn!("unexpected reset on PERSISTENT session, rejecting");
                let _ = self.send_logout_with_reason(now_ns, "MsgSeqNumNotValid");
                return self.transition_disconnected(DisconnectReason::AuthenticationRejected);
            }
            self.sequence_index += 1;
            self.next_recv_seq_no = 2;
            // The final next_sent_seq_no depends on whether our own Logon
            // (seq 1) has already gone out: the initiator sent it before
            // this reply arrived, so its counter is already past 1; the
            // acceptor hasn't sent its reply yet, so it's stamped as seq 1
            // just below and the counter is set to its post-reply value
            // directly rather than left to a conditional send to bump it.
            self.next_sent_seq_no = match self.state {
                SessionState::Connected => 1,
                _ => 2,
            };
        }

        match self.state {
            SessionState::Connected => {
                let fields = vec![(108u32, self.config.heartbeat_interval_ms.to_string())];
                let _ = self.send_admin(wire::MSG_TYPE_LOGON, &fields, now_ns);
                self.state = SessionState::Active;
                info!("acceptor logon accepted, session ACTIVE");
            }
            SessionState::SentLogon => {
                self.state = SessionState::Active;
                info!("initiator logon acknowledged, session ACTIVE");
            }
            _ => {}
        }
        Action::Consume
    }

    fn handle_logout(&mut self, now_ns: u64) -> Action {
        match self.state {
            SessionState::Active => {
                if let Ok(position) = self.send_admin(wire::MSG_TYPE_LOGOUT, &[], now_ns) {
                    self.logout_position = Some(position);
                }
                self.state = SessionState::AwaitingLogout;
                self.disconnect_deadline = Some(now_ns + 2 * self.heartbeat_interval_ns());
                info!("logout received, awaiting disconnect");
                Action::Consume
            }
            SessionState::AwaitingLogout => self.transition_disconnected(DisconnectReason::LogoutComplete),
            _ => Action::Consume,
        }
    }

    fn handle_test_request(&mut self, header: FixHeader, now_ns: u64) -> Action {
        let fields = match header.test_req_id {
            Some(id) => vec![(112u32, id)],
            None => Vec::new(),
        };
        let _ = self.send_admin(wire::MSG_TYPE_HEARTBEAT, &fields, now_ns);
        Action::Consume
    }

    fn handle_resend_request(&mut self, header: FixHeader, now_ns: u64) -> Action {
        let from = header.begin_seq_no.unwrap_or(1);
        let to = match header.end_seq_no {
            Some(0) | None => self.next_sent_seq_no - 1,
            Some(end) => end,
        };
        if self.emit_resend_request_reply(from, to, now_ns).is_err() {
            self.pending_resend_replay = Some((from, to));
        }
        Action::Consume
    }

    fn handle_sequence_reset(&mut self, header: FixHeader) -> Action {
        if let Some(new_seq) = header.new_seq_no {
            debug!(new_seq, "SequenceReset advancing next_recv_seq_no");
            self.next_recv_seq_no = self.next_recv_seq_no.max(new_seq);
            if self.state == SessionState::AwaitingResend {
                if let Some(to) = self.awaiting_resend_to {
                    if self.next_recv_seq_no > to {
                        let drained = self.drain_pending_deliveries();
                        self.state = SessionState::Active;
                        self.awaiting_resend_from = None;
                        self.awaiting_resend_to = None;
                        if !drained.is_empty() {
                            return Action::Deliver(drained);
                        }
                    }
                }
            }
        }
        Action::Consume
    }

    /// `send_application(body, type) -> position | BackpressureError`.
    /// `body_fields` are the application-level tag/value pairs beyond the
    /// header this session stamps.
    #[instrument(skip(self, body_fields), fields(session_id = self.config.session_id))]
    pub fn send_application(
        &mut self,
        body_fields: &[(u32, String)],
        msg_type: &str,
    ) -> Result<i64, SessionError> {
        if !matches!(self.state, SessionState::Active | SessionState::AwaitingResend) {
            return Err(SessionError::NotConnected);
        }
        let now = self.clock.now_ns();
        let seq_no = self.next_sent_seq_no;
        let position = self.publish(msg_type, seq_no, now, false, None, body_fields)?;
        self.sent_log.insert(
            seq_no,
            SentRecord {
                kind: SentKind::Application,
                msg_type: msg_type.to_owned(),
                body_fields: body_fields.to_vec(),
                sending_time_ns: now,
            },
        );
        self.next_sent_seq_no += 1;
        self.last_sent_time = now;
        Ok(position)
    }

    /// `start_logout() -> position | error`. Idempotent: a second call
    /// while already `AWAITING_LOGOUT` returns the prior position without
    /// emitting a second Logout.
    #[instrument(skip(self), fields(session_id = self.config.session_id))]
    pub fn start_logout(&mut self) -> Result<i64, SessionError> {
        if self.state == SessionState::AwaitingLogout {
            return Ok(self.logout_position.expect("AWAITING_LOGOUT always records its Logout's position"));
        }
        if self.state != SessionState::Active {
            return Err(SessionError::NotConnected);
        }
        let now = self.clock.now_ns();
        let position = self.send_admin(wire::MSG_TYPE_LOGOUT, &[], now)?;
        self.state = SessionState::AwaitingLogout;
        self.disconnect_deadline = Some(now + 2 * self.heartbeat_interval_ns());
        self.logout_position = Some(position);
        Ok(position)
    }

    /// User-initiated teardown with no logout handshake, idempotent like
    /// `start_logout`.
    pub fn request_disconnect(&mut self) -> Action {
        if self.state == SessionState::Disconnected {
            return Action::Disconnect(DisconnectReason::RequestedByUser);
        }
        self.transition_disconnected(DisconnectReason::RequestedByUser)
    }

    /// `release_to_gateway()`: hands ownership to the gateway-managed
    /// pool pending a future `acquire`.
    pub fn release_to_gateway(&mut self) -> AdminReplyCode {
        self.config.library_id = GATEWAY_LIBRARY_ID;
        AdminReplyCode::Ok
    }

    /// `acquire(connection_id)`: claims ownership for
    /// `requesting_library_id`, rejecting if another library already owns
    /// the session or the session has not completed logon.
    pub fn acquire(&mut self, requesting_library_id: LibraryId, connection_id: ConnectionId) -> AdminReplyCode {
        if self.config.connection_id != connection_id {
            return AdminReplyCode::UnknownSession;
        }
        if self.config.library_id != GATEWAY_LIBRARY_ID && self.config.library_id != requesting_library_id {
            return AdminReplyCode::OtherSessionOwner;
        }
        if self.state != SessionState::Active {
            return AdminReplyCode::SessionNotLoggedIn;
        }
        self.config.library_id = requesting_library_id;
        AdminReplyCode::Ok
    }

    /// Driver tick: emits Heartbeat/TestRequest as the silence thresholds
    /// are crossed, disconnects on a full timeout, and
    /// resumes any back-pressured resend replay. Returns the number of
    /// distinct actions taken.
    #[instrument(skip(self), fields(session_id = self.config.session_id))]
    pub fn poll(&mut self, now_ns: u64) -> i32 {
        if matches!(self.state, SessionState::Disconnected | SessionState::Disabled) {
            return 0;
        }
        let mut progress = 0;

        if let Some((from, to)) = self.pending_resend_replay.take() {
            if self.emit_resend_request_reply(from, to, now_ns).is_ok() {
                progress += 1;
            } else {
                self.pending_resend_replay = Some((from, to));
            }
        }

        let interval_ns = self.heartbeat_interval_ns();
        if matches!(self.state, SessionState::Active | SessionState::AwaitingResend)
            && now_ns.saturating_sub(self.last_sent_time) >= interval_ns
            && self.send_admin(wire::MSG_TYPE_HEARTBEAT, &[], now_ns).is_ok()
        {
            progress += 1;
        }

        let silence = now_ns.saturating_sub(self.last_received_time);
        if silence >= heartbeat_multiple(interval_ns, 24, 10) {
            self.transition_disconnected(DisconnectReason::HeartbeatTimeout);
            progress += 1;
        } else if silence >= heartbeat_multiple(interval_ns, 12, 10) && self.test_request_sent_at.is_none() {
            let fields = vec![(112u32, "TEST".to_owned())];
            if self.send_admin(wire::MSG_TYPE_TEST_REQUEST, &fields, now_ns).is_ok() {
                self.test_request_sent_at = Some(now_ns);
                progress += 1;
            }
        }

        if self.state == SessionState::AwaitingLogout {
            if let Some(deadline) = self.disconnect_deadline {
                if now_ns >= deadline {
                    self.transition_disconnected(DisconnectReason::LogoutComplete);
                    progress += 1;
                }
            }
        }

        progress
    }

    fn transition_disconnected(&mut self, reason: DisconnectReason) -> Action {
        self.state = SessionState::Disconnected;
        self.disconnect_deadline = None;
        self.test_request_sent_at = None;
        self.logout_position = None;
        if self.config.persistence_mode == PersistenceMode::Transient {
            self.next_sent_seq_no = 1;
            self.next_recv_seq_no = 1;
            self.sent_log.clear();
            self.pending_deliveries.clear();
        }
        info!(?reason, "session DISCONNECTED");
        Action::Disconnect(reason)
    }

    fn emit_resend_request(&mut self, from: u64, to: u64, now_ns: u64) -> Result<i64, SessionError> {
        let fields = vec![
            (wire::TAG_BEGIN_SEQ_NO, from.to_string()),
            (wire::TAG_END_SEQ_NO, to.to_string()),
        ];
        self.send_admin(wire::MSG_TYPE_RESEND_REQUEST, &fields, now_ns)
    }

    /// Replays `[from, to]` per the resend policy: application messages
    /// are resent verbatim with `PossDupFlag=Y`; contiguous runs
    /// of admin (or no-longer-logged) messages are coalesced into a single
    /// SequenceReset-GapFill.
    fn emit_resend_request_reply(&mut self, from: u64, to: u64, now_ns: u64) -> Result<(), SessionError> {
        let mut seq = from;
        let mut admin_run_start: Option<u64> = None;

        while seq <= to {
            let record = self.sent_log.get(&seq).cloned();
            match record {
                Some(r) if r.kind == SentKind::Application => {
                    if let Some(run_start) = admin_run_start.take() {
                        self.send_gap_fill(run_start, seq, now_ns)?;
                    }
                    self.publish(&r.msg_type, seq, r.sending_time_ns, true, Some(&r.sending_time_ns.to_string()), &r.body_fields)?;
                }
                _ => {
                    if admin_run_start.is_none() {
                        admin_run_start = Some(seq);
                    }
                }
            }
            seq += 1;
        }
        if let Some(run_start) = admin_run_start {
            self.send_gap_fill(run_start, to + 1, now_ns)?;
        }
        Ok(())
    }

    fn send_gap_fill(&mut self, gap_from: u64, new_seq_no: u64, now_ns: u64) -> Result<(), SessionError> {
        let fields = vec![
            (wire::TAG_GAP_FILL_FLAG, "Y".to_owned()),
            (wire::TAG_NEW_SEQ_NO, new_seq_no.to_string()),
        ];
        self.publish(wire::MSG_TYPE_SEQUENCE_RESET, gap_from, now_ns, true, Some(&now_ns.to_string()), &fields)?;
        Ok(())
    }

    fn send_admin(&mut self, msg_type: &str, fields: &[(u32, String)], now_ns: u64) -> Result<i64, SessionError> {
        let seq_no = self.next_sent_seq_no;
        let position = self.publish(msg_type, seq_no, now_ns, false, None, fields)?;
        self.sent_log.insert(
            seq_no,
            SentRecord {
                kind: SentKind::Admin,
                msg_type: msg_type.to_owned(),
                body_fields: fields.to_vec(),
                sending_time_ns: now_ns,
            },
        );
        self.next_sent_seq_no += 1;
        self.last_sent_time = now_ns;
        Ok(position)
    }

    fn send_logout_with_reason(&mut self, now_ns: u64, reason: &str) -> Result<i64, SessionError> {
        let fields = vec![(58u32, reason.to_owned())];
        self.send_admin(wire::MSG_TYPE_LOGOUT, &fields, now_ns)
    }

    fn publish(
        &self,
        msg_type: &str,
        seq_no: u64,
        now_ns: u64,
        poss_dup: bool,
        orig_sending_time: Option<&str>,
        fields: &[(u32, String)],
    ) -> Result<i64, SessionError> {
        let builder = MessageBuilder::new(&self.config.sender_comp_id, &self.config.target_comp_id);
        let frame = builder.build(msg_type, seq_no, now_ns, poss_dup, orig_sending_time, fields);
        let record = TransportRecord {
            stream_id: self.config.stream_id,
            session_id: self.config.session_id,
            connection_id: self.config.connection_id,
            library_id: self.config.library_id,
            message_type: msg_type.to_owned(),
            sequence_index: self.sequence_index,
            sequence_number: seq_no,
            status: StreamStatus::Ok,
            payload: frame,
        };
        self.transport.try_publish(record).map_err(|_| SessionError::BackPressured)
    }

    fn heartbeat_interval_ns(&self) -> u64 {
        self.config.heartbeat_interval_ms * 1_000_000
    }
}

/// `interval_ns * numerator / denominator`, computed in integer arithmetic
/// to avoid float drift on the 1.2x/2.4x thresholds.
fn heartbeat_multiple(interval_ns: u64, numerator: u64, denominator: u64) -> u64 {
    interval_ns * numerator / denominator
}
