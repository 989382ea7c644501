//! Identifier and completion types for the reactor.

use std::io;
use std::net::SocketAddr;

/// Opaque stream connection identifier.
///
/// Returned when registering a connection or accepting a new one and used to
/// address the connection in subsequent calls. Slots are reused after a
/// connection closes; callers that outlive a connection must map completions
/// through their own stable ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(pub(crate) usize);

impl ConnId {
    /// Create a connection ID from a raw slot value.
    ///
    /// Primarily useful for testing.
    #[inline]
    pub fn new(slot: usize) -> Self {
        Self(slot)
    }

    /// Get the raw value of the connection ID.
    #[inline]
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

/// Opaque listener identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) usize);

impl ListenerId {
    /// Create a listener ID from a raw value.
    #[inline]
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    /// Get the raw value of the listener ID.
    #[inline]
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

/// Opaque datagram socket identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UdpSocketId(pub(crate) usize);

impl UdpSocketId {
    /// Create a socket ID from a raw value.
    #[inline]
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    /// Get the raw value of the socket ID.
    #[inline]
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

/// A readiness event produced by [`poll`](crate::Reactor::poll).
#[derive(Debug)]
pub enum Completion {
    // === Stream connection events ===
    /// Data is available to read; call `recv()`.
    Recv { conn_id: ConnId },

    /// The connection can accept more outbound data.
    ///
    /// Emitted when the socket becomes writable again after a send reported
    /// `WouldBlock`.
    SendReady { conn_id: ConnId },

    /// The peer closed the connection.
    Closed { conn_id: ConnId },

    /// An error surfaced on this connection.
    Error { conn_id: ConnId, error: io::Error },

    // === Listener events ===
    /// A new connection was accepted and registered.
    Accept {
        listener_id: ListenerId,
        conn_id: ConnId,
        addr: SocketAddr,
    },

    /// An error surfaced on a listener.
    ListenerError {
        listener_id: ListenerId,
        error: io::Error,
    },

    // === Datagram socket events ===
    /// A datagram is available; call `recv_from()`.
    UdpReadable { socket_id: UdpSocketId },

    /// The socket can accept more outbound datagrams.
    UdpWritable { socket_id: UdpSocketId },

    /// An error surfaced on a datagram socket.
    UdpError {
        socket_id: UdpSocketId,
        error: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conn_id_roundtrip() {
        let id = ConnId::new(42);
        assert_eq!(id.as_usize(), 42);
        let copy = id;
        assert_eq!(id, copy);
    }

    #[test]
    fn test_ids_hash_distinct() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(ConnId::new(1));
        set.insert(ConnId::new(2));
        set.insert(ConnId::new(1));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_listener_id_roundtrip() {
        assert_eq!(ListenerId::new(7).as_usize(), 7);
    }

    #[test]
    fn test_udp_socket_id_roundtrip() {
        assert_eq!(UdpSocketId::new(9).as_usize(), 9);
    }

    #[test]
    fn test_completion_debug() {
        let completion = Completion::Recv {
            conn_id: ConnId::new(3),
        };
        assert!(format!("{:?}", completion).contains("Recv"));
    }
}
