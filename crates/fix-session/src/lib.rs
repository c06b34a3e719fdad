//! FIX session state machine, the largest component of the core engine.
//! Owns the lifecycle of one logical FIX counterparty pair: logon,
//! heartbeats, resend, logout, and disconnect.
//!
//! The binary FIXP/iLink3 analogue lives in the sibling `fixp-session`
//! crate; the two don't share code because the wire protocols they manage
//! diverge at almost every state, and this crate never runs more than one
//! dialect per instance.

mod error;
mod session;
mod wire;

pub use error::SessionError;
pub use session::{Action, PersistenceMode, Session, SessionConfig, SessionState};
pub use wire::{decode_header, FixHeader, MessageBuilder};
