//! FIXP/iLink3 session-level message catalog.
//!
//! The real wire format is SBE-encoded binary with fixed block lengths per
//! the iLink3 specification; the codec itself is explicitly out of scope.
//! Messages therefore arrive at [`crate::FixpConnection`] pre-decoded as
//! this enum — the concern here is the state machine, not the flyweight
//! layout.

/// One decoded FIXP session-level (or business) message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixpMessage {
    Negotiate {
        session_id: u64,
    },
    NegotiateResponse {
        uuid: u64,
        last_uuid: u64,
    },
    NegotiateReject {
        reason: String,
    },
    Establish {
        keep_alive_interval_ms: u64,
    },
    EstablishAck {
        next_seq_no: u64,
    },
    EstablishReject {
        reason: String,
    },
    Terminate {
        reason: String,
    },
    /// Keepalive ping carrying the sender's current outbound sequence.
    Sequence {
        next_seq_no: u64,
    },
    NotApplied {
        from_seq: u64,
        count: u32,
    },
    RetransmitRequest {
        uuid: u64,
        from_seq: u64,
        count: u32,
    },
    Retransmission {
        from_seq: u64,
        payloads: Vec<Vec<u8>>,
    },
    /// An application message on the business sequence space.
    Business {
        seq_no: u64,
        payload: Vec<u8>,
    },
}

impl FixpMessage {
    pub fn transport_message_type(&self) -> &'static str {
        match self {
            FixpMessage::Negotiate { .. } => "Negotiate",
            FixpMessage::NegotiateResponse { .. } => "NegotiateResponse",
            FixpMessage::NegotiateReject { .. } => "NegotiateReject",
            FixpMessage::Establish { .. } => "Establish",
            FixpMessage::EstablishAck { .. } => "EstablishAck",
            FixpMessage::EstablishReject { .. } => "EstablishReject",
            FixpMessage::Terminate { .. } => "Terminate",
            FixpMessage::Sequence { .. } => "Sequence",
            FixpMessage::NotApplied { .. } => "NotApplied",
            FixpMessage::RetransmitRequest { .. } => "RetransmitRequest",
            FixpMessage::Retransmission { .. } => "Retransmission",
            FixpMessage::Business { .. } => "Business",
        }
    }

    /// Minimal, non-SBE serialization used only so the transport has
    /// opaque bytes to carry and the session has something to store in its
    /// own resend log. Never parsed back by a peer in this workspace.
    pub fn encode(&self) -> Vec<u8> {
        format!("{self:?}").into_bytes()
    }
}
