/// Caller-visible failures of the FIX session state machine (spec.md §7).
///
/// Protocol-level failures (out-of-sequence, bad framing, auth rejection,
/// heartbeat timeout) are *not* represented here: per spec.md §7 they are
/// translated into state transitions and a [`crate::DisconnectReason`] on
/// the returned [`crate::Action`] rather than thrown. This enum only covers
/// the calls that can fail without a state transition doing the talking.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("transport is back-pressured, retry")]
    BackPressured,
    #[error("session is not connected")]
    NotConnected,
    #[error("session is disabled")]
    SessionDisabled,
    #[error("unknown session")]
    UnknownSession,
    #[error("session is owned by another library")]
    OtherSessionOwner,
}
