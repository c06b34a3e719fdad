//! Gateway core: wires the FIX session state machine, the FIXP/iLink3
//! connection state machine, the message logger, and the supporting
//! primitive map into one crate.
//!
//! This crate itself owns only the ambient, cross-session pieces — config
//! loading and the session registry/leader gate — everything per-session
//! lives in `fix_session`/`fixp_session`, and the reordering buffer lives
//! in `session_logger`.

pub mod config;
pub mod registry;

pub use config::{load_config_from_path, load_config_from_str, ConfigError, GatewayConfig, LoggerConfig, SessionDefaults};
pub use registry::{LeaderGate, SessionRegistry};

pub use fix_session::{Action as FixAction, PersistenceMode, Session, SessionConfig, SessionState};
pub use fixp_session::{Action as FixpAction, FixpConnection, FixpConnectionConfig, FixpConnectionState, FixpMessage};
pub use session_logger::{Dialect, MessageConsumer, ReorderingBuffer, StreamOrigin};

#[cfg(test)]
mod tests {
    use super::*;
    use gw_common::{ManualClock, TestTransport};

    /// End-to-end smoke test wiring config, registry, and a live session
    /// together: a config-driven session logs on, the registry tracks its
    /// ownership, and a release/acquire rendezvous hands it to a second
    /// library — exercising components A, F, and G together.
    #[test]
    fn config_driven_session_through_release_and_acquire() {
        let cfg = load_config_from_str(
            r#"
                schema_version = 1
                [session]
                heartbeat_interval_ms = 1000
                persistence_mode = "persistent"
            "#,
        )
        .unwrap();

        let session_config = SessionConfig {
            session_id: 1,
            connection_id: 10,
            library_id: 5,
            sender_comp_id: "ACPT".to_owned(),
            target_comp_id: "INIT".to_owned(),
            username: None,
            password: None,
            heartbeat_interval_ms: cfg.session.heartbeat_interval_ms,
            persistence_mode: cfg.session.persistence_mode,
            allow_lower_seqnum_logon: cfg.session.allow_lower_seqnum_logon,
            stream_id: 1,
        };
        let mut session = Session::new(session_config, ManualClock::new(0), TestTransport::unbounded());

        let logon = fix_session::MessageBuilder::new("INIT", "ACPT").build(
            "A",
            1,
            0,
            false,
            None,
            &[(108, "1000".to_owned())],
        );
        session.on_message(&logon, 0);
        assert_eq!(session.state(), SessionState::Active);

        let mut registry = SessionRegistry::new();
        registry.register(10, 1, 5);

        assert_eq!(session.release_to_gateway(), gw_common::AdminReplyCode::Ok);
        registry.submit_release(1, 5);
        assert_eq!(
            registry.try_acquire(1, 9, 10),
            gw_common::AdminReplyCode::UnknownSession
        );
        assert_eq!(registry.ack_release(1), gw_common::AdminReplyCode::Ok);
        assert_eq!(registry.try_acquire(1, 9, 10), gw_common::AdminReplyCode::Ok);
        assert_eq!(session.acquire(9, 10), gw_common::AdminReplyCode::Ok);
        assert_eq!(session.library_id(), 9);
    }

    #[test]
    fn leader_gate_governs_which_session_may_poll_transport() {
        let gate = LeaderGate::new(1);
        let clock = ManualClock::new(0);
        let transport = TestTransport::unbounded();
        let mut session = Session::new(
            SessionConfig {
                session_id: 2,
                connection_id: 20,
                library_id: 1,
                sender_comp_id: "ACPT".to_owned(),
                target_comp_id: "INIT".to_owned(),
                username: None,
                password: None,
                heartbeat_interval_ms: 1,
                persistence_mode: PersistenceMode::Transient,
                allow_lower_seqnum_logon: false,
                stream_id: 1,
            },
            clock,
            transport,
        );
        session.connect().unwrap();

        let progress = gate.poll_if_leader(2, || session.poll(10_000_000));
        assert_eq!(progress, 0, "session 2 is not the leader (session 1 is)");

        gate.set_leader(2);
        let progress = gate.poll_if_leader(2, || session.poll(10_000_000));
        assert!(progress > 0, "once leader, poll should make progress");
    }
}
