//! Primitive identity types.
//!
//! The upstream engine identifies sessions, connections, and libraries with
//! raw `long`s rather than strings or UUIDs; this rewrite keeps that scheme
//! so that [`prim_map`](https://docs.rs/prim-map)'s open-addressed
//! `i64 -> i64` map is a natural fit for the session registry.

/// Stable identity of a logical FIX/FIXP session, surviving reconnects.
pub type SessionId = i64;

/// Identity of one TCP attach. A session may be re-acquired under a new
/// `ConnectionId` across reconnects while keeping the same `SessionId`.
pub type ConnectionId = i64;

/// Identity of the library (worker) that currently owns a session.
pub type LibraryId = i64;

/// Generation counter incremented on every sequence-number reset, used to
/// disambiguate replayed messages across resets (spec: "Sequence index").
pub type SequenceIndex = u32;

/// Sentinel `LibraryId` meaning "owned by the gateway process itself",
/// used while a session is between `release_to_gateway` and the next
/// `acquire`.
pub const GATEWAY_LIBRARY_ID: LibraryId = -1;
