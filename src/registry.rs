//! Session registry and cluster leader gate.
//!
//! Two responsibilities that are cross-session infrastructure rather than
//! internal to a single [`fix_session::Session`]:
//!
//! 1. The `connection_id -> session_id` lookup a gateway worker needs
//!    before it can even construct/attach a `Session`, backed by
//!    [`prim_map::PrimLongMap`] rather than `HashMap`.
//! 2. The two-phase `release_to_gateway`/`acquire` rendezvous (the admin
//!    command stream: command, then ack; ownership only changes on ack, so
//!    other workers observing the session before ack see it as
//!    `UNKNOWN_SESSION`) and the single-leader gate that only lets one
//!    cluster node's `poll` actually transmit (`leader_session_id` is a
//!    single atomic integer; only the leader's reservations are actually
//!    transmitted).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use gw_common::{AdminReplyCode, ConnectionId, LibraryId, SessionId, GATEWAY_LIBRARY_ID};
use prim_map::PrimLongMap;

const NO_CONNECTION: i64 = i64::MIN;

/// Tracks which library currently owns each session and maps live TCP
/// attaches to the session they belong to.
///
/// Ownership changes happen in two phases so that a worker racing the
/// rendezvous never observes a session mid-handoff as anything other than
/// `UNKNOWN_SESSION`.
pub struct SessionRegistry {
    connection_to_session: PrimLongMap,
    owners: HashMap<SessionId, LibraryId>,
    /// Sessions with an outstanding `release_to_gateway` awaiting its ack.
    pending_release: HashMap<SessionId, LibraryId>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            connection_to_session: PrimLongMap::new(NO_CONNECTION),
            owners: HashMap::new(),
            pending_release: HashMap::new(),
        }
    }

    /// Register a freshly-owned session, e.g. on initial logon.
    pub fn register(&mut self, connection_id: ConnectionId, session_id: SessionId, library_id: LibraryId) {
        self.connection_to_session.insert(connection_id, session_id);
        self.owners.insert(session_id, library_id);
    }

    pub fn lookup_session(&self, connection_id: ConnectionId) -> Option<SessionId> {
        let session_id = self.connection_to_session.get(connection_id);
        (session_id != NO_CONNECTION).then_some(session_id)
    }

    pub fn owner(&self, session_id: SessionId) -> Option<LibraryId> {
        self.owners.get(&session_id).copied()
    }

    /// Phase 1 of `release_to_gateway`: record the command. Ownership does
    /// not change yet, matching `fix_session::Session::release_to_gateway`
    /// moving its own `library_id` to the gateway sentinel immediately but
    /// the *registry's* view only flipping once the admin stream acks it.
    pub fn submit_release(&mut self, session_id: SessionId, releasing_library_id: LibraryId) {
        self.pending_release.insert(session_id, releasing_library_id);
    }

    /// Phase 2: the admin command stream acked the release. Only now does
    /// the session become acquirable by a different library.
    pub fn ack_release(&mut self, session_id: SessionId) -> AdminReplyCode {
        match self.pending_release.remove(&session_id) {
            Some(_) => {
                self.owners.insert(session_id, GATEWAY_LIBRARY_ID);
                AdminReplyCode::Ok
            }
            None => AdminReplyCode::UnknownSession,
        }
    }

    /// `acquire(connection_id)` as observed from the registry side: a
    /// worker other than the one performing the release/acquire rendezvous
    /// sees `UNKNOWN_SESSION` for any session with an outstanding,
    /// not-yet-acked release.
    pub fn try_acquire(
        &mut self,
        session_id: SessionId,
        library_id: LibraryId,
        connection_id: ConnectionId,
    ) -> AdminReplyCode {
        if self.pending_release.contains_key(&session_id) {
            return AdminReplyCode::UnknownSession;
        }
        match self.owners.get(&session_id).copied() {
            None => AdminReplyCode::UnknownSession,
            Some(owner) if owner != GATEWAY_LIBRARY_ID && owner != library_id => {
                AdminReplyCode::OtherSessionOwner
            }
            _ => {
                self.owners.insert(session_id, library_id);
                self.connection_to_session.insert(connection_id, session_id);
                AdminReplyCode::Ok
            }
        }
    }

    pub fn remove(&mut self, session_id: SessionId, connection_id: ConnectionId) {
        self.owners.remove(&session_id);
        self.pending_release.remove(&session_id);
        self.connection_to_session.remove(connection_id);
    }
}

/// Single-leader gate for the cluster-streams wrapper.
///
/// `leader_session_id` is a single atomic integer shared across the
/// cluster; only the node whose local session matches it actually
/// transmits on `poll` — every other node's `poll` is a guaranteed no-op,
/// observed as zero progress.
pub struct LeaderGate {
    leader_session_id: AtomicI64,
}

impl LeaderGate {
    pub fn new(initial_leader: SessionId) -> Self {
        Self {
            leader_session_id: AtomicI64::new(initial_leader),
        }
    }

    pub fn current_leader(&self) -> SessionId {
        self.leader_session_id.load(Ordering::SeqCst)
    }

    pub fn set_leader(&self, session_id: SessionId) {
        self.leader_session_id.store(session_id, Ordering::SeqCst);
    }

    pub fn is_leader(&self, session_id: SessionId) -> bool {
        self.current_leader() == session_id
    }

    /// Run `poll_fn` only if `session_id` is the current leader; otherwise
    /// return zero progress without invoking it.
    pub fn poll_if_leader(&self, session_id: SessionId, poll_fn: impl FnOnce() -> i32) -> i32 {
        if self.is_leader(session_id) {
            poll_fn()
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_connection_looks_up_to_nothing() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.lookup_session(99), None);
    }

    #[test]
    fn register_then_lookup_round_trips() {
        let mut registry = SessionRegistry::new();
        registry.register(1, 100, 7);
        assert_eq!(registry.lookup_session(1), Some(100));
        assert_eq!(registry.owner(100), Some(7));
    }

    #[test]
    fn acquire_before_ack_sees_unknown_session() {
        let mut registry = SessionRegistry::new();
        registry.register(1, 100, 7);
        registry.submit_release(100, 7);
        assert_eq!(registry.try_acquire(100, 9, 2), AdminReplyCode::UnknownSession);
    }

    #[test]
    fn acquire_after_ack_succeeds_for_new_owner() {
        let mut registry = SessionRegistry::new();
        registry.register(1, 100, 7);
        registry.submit_release(100, 7);
        assert_eq!(registry.ack_release(100), AdminReplyCode::Ok);
        assert_eq!(registry.try_acquire(100, 9, 2), AdminReplyCode::Ok);
        assert_eq!(registry.owner(100), Some(9));
        assert_eq!(registry.lookup_session(2), Some(100));
    }

    #[test]
    fn acquire_by_a_third_library_is_rejected() {
        let mut registry = SessionRegistry::new();
        registry.register(1, 100, 7);
        assert_eq!(registry.try_acquire(100, 9, 1), AdminReplyCode::OtherSessionOwner);
    }

    #[test]
    fn ack_release_without_a_pending_command_is_unknown_session() {
        let mut registry = SessionRegistry::new();
        assert_eq!(registry.ack_release(100), AdminReplyCode::UnknownSession);
    }

    #[test]
    fn leader_gate_blocks_non_leader_poll() {
        let gate = LeaderGate::new(1);
        let mut calls = 0;
        let progress = gate.poll_if_leader(2, || {
            calls += 1;
            5
        });
        assert_eq!(progress, 0);
        assert_eq!(calls, 0);

        let progress = gate.poll_if_leader(1, || {
            calls += 1;
            5
        });
        assert_eq!(progress, 5);
        assert_eq!(calls, 1);
    }

    #[test]
    fn set_leader_changes_who_may_poll() {
        let gate = LeaderGate::new(1);
        gate.set_leader(2);
        assert!(gate.is_leader(2));
        assert!(!gate.is_leader(1));
    }
}
