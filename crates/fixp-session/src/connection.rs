//! FIXP/iLink3 connection state machine, the binary sibling of
//! `fix_session::Session`. Where FIX blocks on a gap until resend closes
//! it, iLink3 is forward-only: a receiver that notices a gap accepts the
//! higher sequence number immediately and tells the sender about the hole
//! with `NotApplied` rather than stalling.

use std::collections::BTreeMap;

use gw_common::{
    BackPressure, Clock, ConnectionId, DisconnectReason, LibraryId, Transport, TransportRecord,
};
use tracing::{debug, instrument, warn};

use crate::error::FixpError;
use crate::messages::FixpMessage;

/// State of one FIXP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixpConnectionState {
    Connected,
    SentNegotiate,
    RetryNegotiate,
    NegotiateRejected,
    Negotiated,
    SentEstablish,
    RetryEstablish,
    EstablishRejected,
    Established,
    /// Republishing a range the peer reported missing via `NotApplied`.
    Retransmitting,
    /// One `keep_alive_interval` elapsed with no message from the peer; a
    /// keepalive `Sequence` has been sent and a second silent interval will
    /// escalate to `Terminate`.
    AwaitingKeepalive,
    /// Our own graceful `Terminate` is back-pressured; `poll` retries the
    /// send until the transport accepts it.
    RetryTerminate,
    /// `Terminate` sent, waiting for the TCP layer to actually drop so the
    /// connection can move to `Unbound`.
    SentTerminate,
    Unbinding,
    Unbound,
}

/// Outcome of feeding one decoded [`FixpMessage`] to the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Consume,
    Deliver(Vec<u8>),
    Disconnect(DisconnectReason),
}

#[derive(Debug, Clone)]
pub struct FixpConnectionConfig {
    pub connection_id: ConnectionId,
    pub library_id: LibraryId,
    pub session_id: u64,
    pub keep_alive_interval_ms: u64,
    pub stream_id: i32,
}

/// A reserved, not-yet-published outbound message.
///
/// The real Aeron `ExclusiveBufferClaim` reserves a byte range in shared
/// memory so the payload can be written in place with no copy; that flyweight
/// layer is out of scope here. This is a deliberately thin
/// stand-in: [`FixpConnection::try_claim`] validates the connection can send
/// and hands back the message to commit or abort, without touching sequence
/// state until [`FixpConnection::commit`] actually publishes it.
pub struct Claim {
    message: FixpMessage,
}

pub struct FixpConnection<C: Clock, T: Transport> {
    config: FixpConnectionConfig,
    state: FixpConnectionState,
    uuid: u64,
    last_uuid: u64,
    next_sent_seq_no: u64,
    next_recv_seq_no: u64,
    /// Sentinel `-1` when no retransmission is in flight.
    retransmit_fill_seq_no: i64,
    last_received_time: u64,
    last_sent_time: u64,
    sent_keepalive_at: Option<u64>,
    unbind_deadline: Option<u64>,
    /// Our own outbound business messages, kept so a peer `NotApplied` can
    /// be answered by republishing the exact payload.
    sent_log: BTreeMap<u64, Vec<u8>>,
    discontinuity_count: u64,
    clock: C,
    transport: T,
}

impl<C: Clock, T: Transport> FixpConnection<C, T> {
    pub fn new(config: FixpConnectionConfig, clock: C, transport: T) -> Self {
        let now = clock.now_ns();
        Self {
            config,
            state: FixpConnectionState::Connected,
            uuid: 0,
            last_uuid: 0,
            next_sent_seq_no: 1,
            next_recv_seq_no: 1,
            retransmit_fill_seq_no: -1,
            last_received_time: now,
            last_sent_time: now,
            sent_keepalive_at: None,
            unbind_deadline: None,
            sent_log: BTreeMap::new(),
            discontinuity_count: 0,
            clock,
            transport,
        }
    }

    pub fn state(&self) -> FixpConnectionState {
        self.state
    }

    pub fn uuid(&self) -> u64 {
        self.uuid
    }

    pub fn retransmit_fill_seq_no(&self) -> i64 {
        self.retransmit_fill_seq_no
    }

    pub fn next_sent_seq_no(&self) -> u64 {
        self.next_sent_seq_no
    }

    pub fn next_recv_seq_no(&self) -> u64 {
        self.next_recv_seq_no
    }

    pub fn discontinuity_count(&self) -> u64 {
        self.discontinuity_count
    }

    /// Begin the Negotiate/Establish handshake.
    #[instrument(skip(self), fields(connection_id = self.config.connection_id))]
    pub fn connect(&mut self) {
        let msg = FixpMessage::Negotiate {
            session_id: self.config.session_id,
        };
        match self.publish_admin(&msg) {
            Ok(_) => self.state = FixpConnectionState::SentNegotiate,
            Err(BackPressure) => {
                warn!("negotiate back-pressured, will retry on poll");
                self.state = FixpConnectionState::RetryNegotiate;
            }
        }
    }

    fn send_establish(&mut self) {
        let msg = FixpMessage::Establish {
            keep_alive_interval_ms: self.config.keep_alive_interval_ms,
        };
        match self.publish_admin(&msg) {
            Ok(_) => self.state = FixpConnectionState::SentEstablish,
            Err(BackPressure) => {
                warn!("establish back-pressured, will retry on poll");
                self.state = FixpConnectionState::RetryEstablish;
            }
        }
    }

    #[instrument(skip(self, message), fields(connection_id = self.config.connection_id))]
    pub fn on_message(&mut self, message: FixpMessage, receive_time_ns: u64) -> Action {
        self.last_received_time = receive_time_ns;
        self.sent_keepalive_at = None;
        // Any message from the peer proves it's alive, regardless of which
        // message type carried it: the keepalive ladder only tracks
        // silence, not message kind.
        if self.state == FixpConnectionState::AwaitingKeepalive {
            debug!("peer message received, keepalive ladder reset");
            self.state = FixpConnectionState::Established;
        }

        match (&self.state, message) {
            (FixpConnectionState::SentNegotiate, FixpMessage::NegotiateResponse { uuid, last_uuid }) => {
                self.uuid = uuid;
                self.last_uuid = last_uuid;
                self.state = FixpConnectionState::Negotiated;
                debug!(uuid, last_uuid, "negotiated");
                self.send_establish();
                Action::Consume
            }
            (FixpConnectionState::SentNegotiate, FixpMessage::NegotiateReject { reason }) => {
                warn!(reason, "negotiate rejected");
                self.state = FixpConnectionState::NegotiateRejected;
                Action::Disconnect(DisconnectReason::AuthenticationRejected)
            }
            (FixpConnectionState::SentEstablish, FixpMessage::EstablishAck { next_seq_no }) => {
                self.next_recv_seq_no = next_seq_no;
                self.state = FixpConnectionState::Established;
                debug!(next_seq_no, "established");
                Action::Consume
            }
            (FixpConnectionState::SentEstablish, FixpMessage::EstablishReject { reason }) => {
                warn!(reason, "establish rejected");
                self.state = FixpConnectionState::EstablishRejected;
                Action::Disconnect(DisconnectReason::AuthenticationRejected)
            }
            (FixpConnectionState::Established, FixpMessage::Sequence { next_seq_no }) => {
                // Keepalive ping; it also carries the peer's outbound
                // sequence, which we don't otherwise need since business
                // messages already carry their own seq_no.
                let _ = next_seq_no;
                Action::Consume
            }
            (FixpConnectionState::Established, FixpMessage::Business { seq_no, payload }) => {
                self.apply_business(seq_no, payload)
            }
            (FixpConnectionState::Established, FixpMessage::NotApplied { from_seq, count }) => {
                self.enter_retransmitting(from_seq, count);
                Action::Consume
            }
            (FixpConnectionState::Retransmitting, FixpMessage::Business { seq_no, payload }) => {
                // Peer keeps sending forward while we catch it up.
                self.apply_business(seq_no, payload)
            }
            (FixpConnectionState::Established | FixpConnectionState::Retransmitting, FixpMessage::Terminate { reason }) => {
                warn!(reason, "peer terminated");
                self.state = FixpConnectionState::Unbound;
                Action::Disconnect(DisconnectReason::RequestedByUser)
            }
            (_, FixpMessage::Terminate { reason }) => {
                warn!(reason, "peer terminated before establish completed");
                self.state = FixpConnectionState::Unbound;
                Action::Disconnect(DisconnectReason::RequestedByUser)
            }
            (state, message) => {
                warn!(?state, msg_type = message.transport_message_type(), "unexpected message for state");
                Action::Consume
            }
        }
    }

    fn apply_business(&mut self, seq_no: u64, payload: Vec<u8>) -> Action {
        if seq_no < self.next_recv_seq_no {
            // Already applied; ignore.
            return Action::Consume;
        }
        if seq_no > self.next_recv_seq_no {
            let from_seq = self.next_recv_seq_no;
            let count = (seq_no - from_seq) as u32;
            self.discontinuity_count += 1;
            self.notify_not_applied(from_seq, count);
        }
        self.next_recv_seq_no = seq_no + 1;
        Action::Deliver(payload)
    }

    fn notify_not_applied(&mut self, from_seq: u64, count: u32) {
        let msg = FixpMessage::NotApplied { from_seq, count };
        if self.publish_admin(&msg).is_err() {
            warn!(from_seq, count, "not-applied notification back-pressured, dropped");
        }
    }

    /// The peer told us (via `NotApplied`) that it is missing
    /// `[from_seq, from_seq + count)` of what we sent it. Republish the
    /// range from our own log.
    fn enter_retransmitting(&mut self, from_seq: u64, count: u32) {
        self.state = FixpConnectionState::Retransmitting;
        let to_seq = from_seq + count as u64 - 1;
        self.retransmit_fill_seq_no = to_seq as i64;
        for seq in from_seq..=to_seq {
            if let Some(payload) = self.sent_log.get(&seq).cloned() {
                let _ = self.publish_business(seq, payload);
            } else {
                warn!(seq, "not-applied range references a message we never sent");
            }
        }
    }

    /// Called by the embedding framework once the transport confirms our
    /// own publication at `seq_no` looped back — the retransmit
    /// acknowledgement is implicit rather than a distinct message type.
    /// Once every republished sequence has been observed we return to
    /// `ESTABLISHED` and clear the sentinel.
    pub fn on_own_message_seq_observed(&mut self, seq_no: u64) {
        if self.state == FixpConnectionState::Retransmitting
            && self.retransmit_fill_seq_no >= 0
            && seq_no >= self.retransmit_fill_seq_no as u64
        {
            self.retransmit_fill_seq_no = -1;
            self.state = FixpConnectionState::Established;
            debug!("retransmission acknowledged, back to established");
        }
    }

    /// Reserve an outbound business message.
    pub fn try_claim(&self, payload: Vec<u8>) -> Result<Claim, FixpError> {
        if !matches!(
            self.state,
            FixpConnectionState::Established
                | FixpConnectionState::Retransmitting
                | FixpConnectionState::AwaitingKeepalive
        ) {
            return Err(FixpError::NotConnected);
        }
        Ok(Claim {
            message: FixpMessage::Business { seq_no: 0, payload },
        })
    }

    /// Publish a claimed message, assigning it the next outbound sequence.
    pub fn commit(&mut self, claim: Claim) -> Result<i64, FixpError> {
        let payload = match claim.message {
            FixpMessage::Business { payload, .. } => payload,
            _ => unreachable!("Claim only ever wraps a Business message"),
        };
        let seq_no = self.next_sent_seq_no;
        let position = self
            .publish_business(seq_no, payload)
            .map_err(|_| FixpError::BackPressured)?;
        self.next_sent_seq_no += 1;
        Ok(position)
    }

    /// Discard a reservation without publishing it.
    pub fn abort(&mut self, _claim: Claim) {}

    fn publish_business(&mut self, seq_no: u64, payload: Vec<u8>) -> Result<i64, BackPressure> {
        self.sent_log.insert(seq_no, payload.clone());
        let record = TransportRecord {
            stream_id: self.config.stream_id,
            session_id: self.config.session_id as i64,
            connection_id: self.config.connection_id,
            library_id: self.config.library_id,
            message_type: "Business".to_owned(),
            sequence_index: 0,
            sequence_number: seq_no,
            status: gw_common::StreamStatus::Ok,
            payload,
        };
        let position = self.transport.try_publish(record)?;
        self.last_sent_time = self.clock.now_ns();
        Ok(position)
    }

    fn publish_admin(&mut self, message: &FixpMessage) -> Result<i64, BackPressure> {
        let record = TransportRecord {
            stream_id: self.config.stream_id,
            session_id: self.config.session_id as i64,
            connection_id: self.config.connection_id,
            library_id: self.config.library_id,
            message_type: message.transport_message_type().to_owned(),
            sequence_index: 0,
            sequence_number: 0,
            status: gw_common::StreamStatus::Ok,
            payload: message.encode(),
        };
        let position = self.transport.try_publish(record)?;
        self.last_sent_time = self.clock.now_ns();
        Ok(position)
    }

    fn keep_alive_interval_ns(&self) -> u64 {
        self.config.keep_alive_interval_ms.max(1) * 1_000_000
    }

    /// Send the graceful `Terminate`, moving to `Unbinding` on success or
    /// `RetryTerminate` if the transport pushes back.
    fn send_terminate(&mut self, now_ns: u64, reason: &str) {
        let msg = FixpMessage::Terminate {
            reason: reason.to_owned(),
        };
        let interval = self.keep_alive_interval_ns();
        match self.publish_admin(&msg) {
            Ok(_) => {
                self.state = FixpConnectionState::Unbinding;
                self.unbind_deadline = Some(now_ns + interval);
            }
            Err(BackPressure) => {
                warn!("terminate back-pressured, will retry on poll");
                self.state = FixpConnectionState::RetryTerminate;
            }
        }
    }

    /// Drive retries and the keepalive timeout chain. Returns the number of
    /// actions taken.
    ///
    /// The keepalive ladder is two steps: one silent interval
    /// sends a `Sequence` keepalive and moves to `AWAITING_KEEPALIVE`; a
    /// second silent interval with still nothing from the peer escalates to
    /// `Terminate` and `UNBINDING`.
    #[instrument(skip(self), fields(connection_id = self.config.connection_id))]
    pub fn poll(&mut self, now_ns: u64) -> i32 {
        let mut progress = 0;

        match self.state {
            FixpConnectionState::RetryNegotiate => {
                self.connect();
                progress += 1;
                return progress;
            }
            FixpConnectionState::RetryEstablish => {
                self.send_establish();
                progress += 1;
                return progress;
            }
            FixpConnectionState::RetryTerminate => {
                self.send_terminate(now_ns, "keepalive timeout");
                progress += 1;
                return progress;
            }
            FixpConnectionState::Unbinding => {
                if let Some(deadline) = self.unbind_deadline {
                    if now_ns >= deadline {
                        self.state = FixpConnectionState::Unbound;
                        progress += 1;
                        return progress;
                    }
                }
                return progress;
            }
            FixpConnectionState::Established | FixpConnectionState::Retransmitting => {
                let interval = self.keep_alive_interval_ns();
                let silence = now_ns.saturating_sub(self.last_received_time);
                if silence >= interval {
                    let msg = FixpMessage::Sequence {
                        next_seq_no: self.next_sent_seq_no,
                    };
                    if self.publish_admin(&msg).is_ok() {
                        self.sent_keepalive_at = Some(now_ns);
                        self.state = FixpConnectionState::AwaitingKeepalive;
                        progress += 1;
                    }
                }
            }
            FixpConnectionState::AwaitingKeepalive => {
                let interval = self.keep_alive_interval_ns();
                let silence = now_ns.saturating_sub(self.last_received_time);
                if silence >= interval * 2 {
                    self.send_terminate(now_ns, "keepalive timeout");
                    progress += 1;
                }
            }
            _ => return progress,
        }

        progress
    }

    /// Finalize the `Unbinding` timeout with the reason it is expected to
    /// carry.
    pub fn unbind_timed_out(&self) -> bool {
        self.state == FixpConnectionState::Unbound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_common::{ManualClock, TestTransport};

    fn config() -> FixpConnectionConfig {
        FixpConnectionConfig {
            connection_id: 1,
            library_id: 1,
            session_id: 77,
            keep_alive_interval_ms: 1,
            stream_id: 9,
        }
    }

    fn established(clock: ManualClock, transport: TestTransport) -> FixpConnection<ManualClock, TestTransport> {
        let mut conn = FixpConnection::new(config(), clock, transport);
        conn.connect();
        assert_eq!(conn.state(), FixpConnectionState::SentNegotiate);
        conn.on_message(
            FixpMessage::NegotiateResponse { uuid: 5, last_uuid: 0 },
            0,
        );
        assert_eq!(conn.state(), FixpConnectionState::SentEstablish);
        conn.on_message(FixpMessage::EstablishAck { next_seq_no: 1 }, 0);
        assert_eq!(conn.state(), FixpConnectionState::Established);
        conn
    }

    #[test]
    fn negotiate_establish_handshake_reaches_established() {
        let conn = established(ManualClock::new(0), TestTransport::unbounded());
        assert_eq!(conn.uuid(), 5);
        assert_eq!(conn.next_recv_seq_no(), 1);
    }

    #[test]
    fn negotiate_back_pressure_retries_on_poll() {
        let transport = TestTransport::new(0);
        let mut conn = FixpConnection::new(config(), ManualClock::new(0), transport);
        conn.connect();
        assert_eq!(conn.state(), FixpConnectionState::RetryNegotiate);
    }

    #[test]
    fn inbound_gap_is_accepted_forward_and_reported() {
        let mut conn = established(ManualClock::new(0), TestTransport::unbounded());
        let action = conn.on_message(FixpMessage::Business { seq_no: 1, payload: vec![1] }, 0);
        assert_eq!(action, Action::Deliver(vec![1]));

        // seq 2 and 3 never arrive; seq 4 does.
        let action = conn.on_message(FixpMessage::Business { seq_no: 4, payload: vec![4] }, 0);
        assert_eq!(action, Action::Deliver(vec![4]));
        assert_eq!(conn.next_recv_seq_no(), 5);
        assert_eq!(conn.discontinuity_count(), 1);
    }

    /// Out-of-range retransmit: the peer reports a hole via `NotApplied`
    /// and we republish exactly that range from our own sent log.
    #[test]
    fn not_applied_triggers_retransmission_then_returns_to_established() {
        let transport = TestTransport::unbounded();
        let mut conn = established(ManualClock::new(0), transport);

        for seq in 1..=25u64 {
            let claim = conn.try_claim(vec![seq as u8]).unwrap();
            conn.commit(claim).unwrap();
        }
        assert_eq!(conn.state(), FixpConnectionState::Established);

        conn.on_message(FixpMessage::NotApplied { from_seq: 20, count: 3 }, 0);
        assert_eq!(conn.state(), FixpConnectionState::Retransmitting);
        assert_eq!(conn.retransmit_fill_seq_no(), 22);

        conn.on_own_message_seq_observed(21);
        assert_eq!(conn.state(), FixpConnectionState::Retransmitting);

        conn.on_own_message_seq_observed(22);
        assert_eq!(conn.state(), FixpConnectionState::Established);
        assert_eq!(conn.retransmit_fill_seq_no(), -1);
    }

    #[test]
    fn silence_sends_keepalive_then_terminates_and_unbinds() {
        let mut conn = established(ManualClock::new(0), TestTransport::unbounded());
        // keep_alive_interval_ms = 1 -> interval_ns = 1_000_000
        let progress = conn.poll(1_000_000);
        assert!(progress >= 1);
        assert_eq!(conn.state(), FixpConnectionState::AwaitingKeepalive);

        let progress = conn.poll(2_000_000);
        assert!(progress >= 1);
        assert_eq!(conn.state(), FixpConnectionState::Unbinding);

        let progress = conn.poll(3_000_001);
        assert_eq!(progress, 1);
        assert_eq!(conn.state(), FixpConnectionState::Unbound);
    }

    #[test]
    fn message_during_awaiting_keepalive_resets_the_ladder() {
        let mut conn = established(ManualClock::new(0), TestTransport::unbounded());
        conn.poll(1_000_000);
        assert_eq!(conn.state(), FixpConnectionState::AwaitingKeepalive);

        conn.on_message(FixpMessage::Sequence { next_seq_no: 1 }, 1_500_000);
        assert_eq!(conn.state(), FixpConnectionState::Established);

        // silence is measured from the just-reset receive time, so the next
        // poll at only one interval past it is not yet a second silent
        // interval.
        let progress = conn.poll(2_000_000);
        assert_eq!(progress, 0);
        assert_eq!(conn.state(), FixpConnectionState::Established);
    }

    #[test]
    fn terminate_back_pressure_is_retried_from_awaiting_keepalive() {
        // Negotiate, Establish, and the keepalive Sequence each consume one
        // slot; the fourth publish (Terminate) finds the transport full.
        let transport = TestTransport::new(3);
        let mut conn = established(ManualClock::new(0), transport);

        let progress = conn.poll(1_000_000);
        assert!(progress >= 1);
        assert_eq!(conn.state(), FixpConnectionState::AwaitingKeepalive);

        let progress = conn.poll(2_000_000);
        assert!(progress >= 1);
        assert_eq!(conn.state(), FixpConnectionState::RetryTerminate);
    }

    #[test]
    fn claim_before_established_is_rejected() {
        let conn = FixpConnection::new(config(), ManualClock::new(0), TestTransport::unbounded());
        let err = conn.try_claim(vec![1]).unwrap_err();
        assert_eq!(err, FixpError::NotConnected);
    }
}
