//! Admin reply codes and disconnect reasons shared across A and B.

/// Reply code for `release_to_gateway`/`acquire` admin calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminReplyCode {
    Ok,
    UnknownSession,
    OtherSessionOwner,
    SessionNotLoggedIn,
}

/// Terminal reason recorded on a `DISCONNECTED`/`UNBOUND` transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Peer closed the logout handshake cleanly.
    LogoutComplete,
    /// `poll` discovered the peer never acked our TestRequest in time.
    HeartbeatTimeout,
    /// Framing/field parsing failed irrecoverably.
    InvalidMessage,
    /// A lower-than-expected sequence number arrived without `PossDupFlag`.
    OutOfSequence,
    /// Logon credentials were rejected.
    AuthenticationRejected,
    /// User-initiated teardown via `request_disconnect`.
    RequestedByUser,
    /// The underlying socket closed without a logout exchange.
    SocketClosed,
    /// FIXP keepalive elapsed a second time while `UNBINDING`.
    UnbindTimeout,
}
