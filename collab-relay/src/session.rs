//! Session registry: which document each live connection has joined.
//!
//! One registry exists per server process. It is plain data with `&mut self`
//! mutation; the hub owns it behind a single lock so `join`, `leave` and
//! relay lookups never interleave.

use std::collections::{HashMap, HashSet};
use std::fmt;
use uuid::Uuid;

/// Opaque per-socket handle assigned when the transport connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Caller-chosen document identifier; also the session (room) name.
pub type DocumentId = String;

/// Result of [`SessionRegistry::join`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The connection had no session and now belongs to the document's.
    Joined,
    /// Already a member of this document's session; nothing changed.
    AlreadyJoined,
    /// Left `previous` before joining the new document.
    Moved { previous: DocumentId },
}

/// Connection ↔ document membership.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    memberships: HashMap<ConnectionId, DocumentId>,
    rooms: HashMap<DocumentId, HashSet<ConnectionId>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put `conn` in the session for `doc_id`.
    ///
    /// A connection is in at most one session: a membership elsewhere is
    /// dropped first, and joining the current session again is a no-op.
    pub fn join(&mut self, conn: ConnectionId, doc_id: &str) -> JoinOutcome {
        if self.session_of(conn) == Some(doc_id) {
            return JoinOutcome::AlreadyJoined;
        }
        let outcome = match self.leave(conn) {
            Some(previous) => JoinOutcome::Moved { previous },
            None => JoinOutcome::Joined,
        };

        self.memberships.insert(conn, doc_id.to_owned());
        self.rooms.entry(doc_id.to_owned()).or_default().insert(conn);
        outcome
    }

    /// Remove `conn` from its session, returning the document it left.
    /// Safe to call for connections without a session.
    pub fn leave(&mut self, conn: ConnectionId) -> Option<DocumentId> {
        let doc_id = self.memberships.remove(&conn)?;
        if let Some(members) = self.rooms.get_mut(&doc_id) {
            members.remove(&conn);
            if members.is_empty() {
                self.rooms.remove(&doc_id);
                log::debug!("Session {doc_id} removed (empty)");
            }
        }
        Some(doc_id)
    }

    /// The document `conn` currently belongs to.
    pub fn session_of(&self, conn: ConnectionId) -> Option<&str> {
        self.memberships.get(&conn).map(String::as_str)
    }

    /// Everyone else in `conn`'s session. Empty when `conn` has no session.
    pub fn peers_of(&self, conn: ConnectionId) -> impl Iterator<Item = ConnectionId> + '_ {
        self.memberships
            .get(&conn)
            .and_then(|doc_id| self.rooms.get(doc_id))
            .into_iter()
            .flatten()
            .copied()
            .filter(move |peer| *peer != conn)
    }

    pub fn member_count(&self, doc_id: &str) -> usize {
        self.rooms.get(doc_id).map_or(0, HashSet::len)
    }

    pub fn session_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn active_documents(&self) -> Vec<DocumentId> {
        self.rooms.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peers(registry: &SessionRegistry, conn: ConnectionId) -> HashSet<ConnectionId> {
        registry.peers_of(conn).collect()
    }

    #[test]
    fn test_join_and_peers() {
        let mut registry = SessionRegistry::new();
        let (a, b, c, d) = (
            ConnectionId::new(),
            ConnectionId::new(),
            ConnectionId::new(),
            ConnectionId::new(),
        );

        assert_eq!(registry.join(a, "doc-1"), JoinOutcome::Joined);
        registry.join(b, "doc-1");
        registry.join(c, "doc-1");
        registry.join(d, "doc-2");

        assert_eq!(peers(&registry, a), HashSet::from([b, c]));
        assert_eq!(peers(&registry, d), HashSet::new());
        assert_eq!(registry.member_count("doc-1"), 3);
        assert_eq!(registry.session_count(), 2);
    }

    #[test]
    fn test_rejoin_same_document_is_noop() {
        let mut registry = SessionRegistry::new();
        let a = ConnectionId::new();

        registry.join(a, "doc");
        assert_eq!(registry.join(a, "doc"), JoinOutcome::AlreadyJoined);
        assert_eq!(registry.member_count("doc"), 1);
    }

    #[test]
    fn test_join_other_document_leaves_first() {
        let mut registry = SessionRegistry::new();
        let (a, b) = (ConnectionId::new(), ConnectionId::new());
        registry.join(a, "one");
        registry.join(b, "one");

        assert_eq!(
            registry.join(a, "two"),
            JoinOutcome::Moved {
                previous: "one".into()
            }
        );
        assert_eq!(registry.session_of(a), Some("two"));
        assert_eq!(registry.member_count("one"), 1);
        assert_eq!(peers(&registry, b), HashSet::new());
    }

    #[test]
    fn test_leave_is_idempotent() {
        let mut registry = SessionRegistry::new();
        let a = ConnectionId::new();

        assert_eq!(registry.leave(a), None);
        registry.join(a, "doc");
        assert_eq!(registry.leave(a), Some("doc".into()));
        assert_eq!(registry.leave(a), None);
        assert_eq!(registry.session_of(a), None);
    }

    #[test]
    fn test_empty_session_is_collected() {
        let mut registry = SessionRegistry::new();
        let (a, b) = (ConnectionId::new(), ConnectionId::new());
        registry.join(a, "doc");
        registry.join(b, "doc");

        registry.leave(a);
        assert_eq!(registry.active_documents(), vec!["doc".to_string()]);
        registry.leave(b);
        assert_eq!(registry.session_count(), 0);
        assert!(registry.active_documents().is_empty());
    }

    #[test]
    fn test_leave_removes_from_peer_sets() {
        let mut registry = SessionRegistry::new();
        let (a, b, c) = (ConnectionId::new(), ConnectionId::new(), ConnectionId::new());
        for conn in [a, b, c] {
            registry.join(conn, "doc");
        }

        registry.leave(c);
        assert_eq!(peers(&registry, a), HashSet::from([b]));
        assert_eq!(peers(&registry, c), HashSet::new());
    }

    #[test]
    fn test_no_session_has_no_peers() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.peers_of(ConnectionId::new()).count(), 0);
    }
}
