//! The connection registry: owner of every session's lifetime.
//!
//! Ids are assigned monotonically and never reused, so a completion that
//! outlives its session simply misses the lookup. Iteration order is
//! ascending id and stable between mutations, which the datagram scheduler
//! relies on.

use crate::session::{ClientSession, ConnectionId};
use io_reactor::{ConnId, Reactor};
use std::collections::{BTreeMap, HashMap};

/// Mapping from [`ConnectionId`] to session, plus the id counter and a
/// reverse index from reactor socket ids.
pub struct ConnectionRegistry {
    sessions: BTreeMap<ConnectionId, ClientSession>,
    by_sock: HashMap<usize, ConnectionId>,
    next_id: ConnectionId,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: BTreeMap::new(),
            by_sock: HashMap::new(),
            next_id: 0,
        }
    }

    /// Take the next connection id. Ids start at 0 and strictly increase.
    pub fn allocate_id(&mut self) -> ConnectionId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Insert a session under its own id.
    pub fn insert(&mut self, session: ClientSession) {
        self.by_sock.insert(session.sock().as_usize(), session.id());
        self.sessions.insert(session.id(), session);
    }

    pub fn lookup(&self, id: ConnectionId) -> Option<&ClientSession> {
        self.sessions.get(&id)
    }

    pub fn lookup_mut(&mut self, id: ConnectionId) -> Option<&mut ClientSession> {
        self.sessions.get_mut(&id)
    }

    /// Resolve a reactor socket id back to the owning connection id.
    pub fn lookup_by_sock(&self, sock: ConnId) -> Option<ConnectionId> {
        self.by_sock.get(&sock.as_usize()).copied()
    }

    /// Remove a session, releasing both index entries.
    pub fn remove(&mut self, id: ConnectionId) -> Option<ClientSession> {
        let session = self.sessions.remove(&id)?;
        self.by_sock.remove(&session.sock().as_usize());
        Some(session)
    }

    /// Iterate sessions in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &ClientSession> {
        self.sessions.values()
    }

    /// Iterate sessions mutably in ascending id order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClientSession> {
        self.sessions.values_mut()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Stop every session and empty the registry.
    ///
    /// Returns the ids that were closed. After this no in-flight completion
    /// can touch a session: lookups miss, and `stopped` short-circuits
    /// anything already holding one.
    pub fn close_all(&mut self, reactor: &mut Reactor) -> Vec<ConnectionId> {
        let ids: Vec<ConnectionId> = self.sessions.keys().copied().collect();
        for session in self.sessions.values_mut() {
            session.stop(reactor);
        }
        self.by_sock.clear();
        self.sessions.clear();
        ids
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
