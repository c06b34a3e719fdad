//! Abstract transport stream.
//!
//! The Aeron-style publication/subscription transport is treated as an
//! external collaborator: a *stream* offering
//! `try_reserve(len) -> position | backpressure` plus a polling consumer,
//! framed with `stream_id`, `session_id`, `connection_id`, `library_id`,
//! `message_type`, `sequence_index`, `sequence_number`, and `status`. Only
//! that interface lives in this crate; the real publication/subscription
//! machinery is out of scope.

use crate::ids::{ConnectionId, LibraryId, SequenceIndex, SessionId};
use std::sync::Mutex;

/// Result of a failed `try_reserve`/`try_claim`: the transport's buffer is
/// full and the caller must retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackPressure;

/// Status tag carried on a transport record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Ok,
    Invalid,
    CatchupReplay,
}

/// One framed record written to (or read from) the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRecord {
    pub stream_id: i32,
    pub session_id: SessionId,
    pub connection_id: ConnectionId,
    pub library_id: LibraryId,
    pub message_type: String,
    pub sequence_index: SequenceIndex,
    pub sequence_number: u64,
    pub status: StreamStatus,
    pub payload: Vec<u8>,
}

/// Abstract multi-producer publication stream.
///
/// Each producer reserves a contiguous byte range and must commit or abort
/// before any other reservation on the same stream proceeds.
/// Implementations used in production wrap the real Aeron publication;
/// [`TestTransport`] below is an in-memory fake used by every test in this
/// workspace, a hand-rolled fake rather than a mocking framework.
pub trait Transport: Send + Sync {
    /// Reserve space for a record and publish it atomically. Returns the
    /// publication position on success.
    fn try_publish(&self, record: TransportRecord) -> Result<i64, BackPressure>;
}

/// In-memory transport used by tests. Bounded by `capacity`; once that many
/// records are buffered without being drained via [`TestTransport::drain`],
/// further publishes observe [`BackPressure`].
pub struct TestTransport {
    inner: Mutex<TestTransportInner>,
}

struct TestTransportInner {
    capacity: usize,
    records: Vec<TransportRecord>,
    next_position: i64,
}

impl TestTransport {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(TestTransportInner {
                capacity,
                records: Vec::new(),
                next_position: 0,
            }),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    /// Remove and return all buffered records, freeing capacity.
    pub fn drain(&self) -> Vec<TransportRecord> {
        let mut inner = self.inner.lock().expect("test transport lock poisoned");
        std::mem::take(&mut inner.records)
    }

    /// Peek at buffered records without draining them.
    pub fn peek(&self) -> Vec<TransportRecord> {
        self.inner
            .lock()
            .expect("test transport lock poisoned")
            .records
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("test transport lock poisoned").records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Transport for TestTransport {
    fn try_publish(&self, record: TransportRecord) -> Result<i64, BackPressure> {
        let mut inner = self.inner.lock().expect("test transport lock poisoned");
        if inner.records.len() >= inner.capacity {
            return Err(BackPressure);
        }
        inner.next_position += record.payload.len() as i64 + 1;
        let position = inner.next_position;
        inner.records.push(record);
        Ok(position)
    }
}
