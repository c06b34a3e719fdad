/// Caller-visible failures of the FIXP/iLink3 connection state machine.
/// As with `fix_session::SessionError`, protocol-level failures are
/// translated into state transitions rather than returned here — this
/// only covers calls that fail without a transition to show for it.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FixpError {
    #[error("transport is back-pressured, retry")]
    BackPressured,
    #[error("connection is not connected")]
    NotConnected,
}
