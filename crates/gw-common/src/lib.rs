//! Shared identity types, clock, and transport abstractions used by the
//! FIX session state machine, the FIXP connection state machine, and the
//! message logger.
//!
//! Kept deliberately small: everything here is either a primitive-typed
//! identity (mirroring the upstream engine's use of raw `long`s instead of
//! string/UUID identities) or an injected collaborator (clock, transport)
//! so that the state machines never read wall-clock time or talk to a real
//! socket directly.

pub mod clock;
pub mod ids;
pub mod reply;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use ids::{ConnectionId, LibraryId, SequenceIndex, SessionId};
pub use reply::{AdminReplyCode, DisconnectReason};
pub use transport::{BackPressure, StreamStatus, Transport, TransportRecord};
