//! FIXP/iLink3 connection state machine, the binary sibling of the
//! `fix-session` crate. The SBE wire codec is out of scope; this
//! crate owns Negotiate/Establish lifecycle, forward-only gap handling,
//! keepalive timeout, and `NotApplied`-driven retransmission.

mod connection;
mod error;
mod messages;

pub use connection::{Action, Claim, FixpConnection, FixpConnectionConfig, FixpConnectionState};
pub use error::FixpError;
pub use messages::FixpMessage;

#[cfg(test)]
mod tests {
    use super::*;
    use gw_common::{ManualClock, TestTransport};

    fn config() -> FixpConnectionConfig {
        FixpConnectionConfig {
            connection_id: 11,
            library_id: 1,
            session_id: 4001,
            keep_alive_interval_ms: 1_000,
            stream_id: 3,
        }
    }

    fn handshake(conn: &mut FixpConnection<ManualClock, TestTransport>) {
        conn.connect();
        conn.on_message(FixpMessage::NegotiateResponse { uuid: 1, last_uuid: 0 }, 0);
        conn.on_message(FixpMessage::EstablishAck { next_seq_no: 1 }, 0);
    }

    #[test]
    fn full_lifecycle_negotiate_establish_business_terminate() {
        let mut conn = FixpConnection::new(config(), ManualClock::new(0), TestTransport::unbounded());
        handshake(&mut conn);
        assert_eq!(conn.state(), FixpConnectionState::Established);

        let claim = conn.try_claim(b"order-1".to_vec()).unwrap();
        let position = conn.commit(claim).unwrap();
        assert!(position > 0);
        assert_eq!(conn.next_sent_seq_no(), 2);

        let action = conn.on_message(
            FixpMessage::Business {
                seq_no: 1,
                payload: b"ack-1".to_vec(),
            },
            1,
        );
        assert_eq!(action, Action::Deliver(b"ack-1".to_vec()));

        let action = conn.on_message(
            FixpMessage::Terminate {
                reason: "done".to_owned(),
            },
            2,
        );
        assert!(matches!(action, Action::Disconnect(_)));
        assert_eq!(conn.state(), FixpConnectionState::Unbound);
    }

    #[test]
    fn abort_discards_claim_without_advancing_sequence() {
        let mut conn = FixpConnection::new(config(), ManualClock::new(0), TestTransport::unbounded());
        handshake(&mut conn);
        let claim = conn.try_claim(b"scratch".to_vec()).unwrap();
        conn.abort(claim);
        assert_eq!(conn.next_sent_seq_no(), 1);
    }
}
